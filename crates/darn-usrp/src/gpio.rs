//! # Antenna Control Signals
//!
//! GPIO lines on each motherboard drive the antenna front end: the T/R
//! switch, the attenuator and an oscilloscope sync line. Two banks carry the
//! same signals with opposite polarity so both active-high and active-low
//! hardware can be wired directly.
//!
//! ## State masks
//!
//! ```text
//!               tr   attenuator   scope_sync
//! idle           .        .            .
//! rx_only        ■        .            .
//! tx_only        ■        ■            .
//! full_duplex    ■        ■            ■
//! ```
//!
//! The active-low bank is driven with the complement of these masks,
//! restricted to the role lines. Status inputs (AGC, low power) and the
//! manual test-mode output live on separate lines.
//!
//! Role lines are handed to the device's ATR state machine when the banks
//! are programmed, with one ATR register per state. [`AntennaControl::apply_state`]
//! additionally writes a state into the `OUT` register; under a command time
//! this lands on a pulse boundary.

use crate::error::{UsrpError, UsrpResult};
use crate::hal::{GpioAttr, UsrpDevice};
use darn_core::config::GpioOptions;
use tracing::{debug, info};

/// RF chain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtrState {
    Idle,
    RxOnly,
    TxOnly,
    FullDuplex,
}

impl AtrState {
    pub const ALL: [AtrState; 4] = [
        AtrState::Idle,
        AtrState::RxOnly,
        AtrState::TxOnly,
        AtrState::FullDuplex,
    ];

    /// ATR register holding the level for this state.
    pub fn atr_register(&self) -> GpioAttr {
        match self {
            AtrState::Idle => GpioAttr::Atr0x,
            AtrState::RxOnly => GpioAttr::AtrRx,
            AtrState::TxOnly => GpioAttr::AtrTx,
            AtrState::FullDuplex => GpioAttr::AtrXx,
        }
    }
}

/// Polarity role of a GPIO bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankRole {
    /// Lines asserted high
    High,
    /// Lines asserted low
    Low,
}

impl BankRole {
    pub const BOTH: [BankRole; 2] = [BankRole::High, BankRole::Low];
}

/// Status lines decoded from a bank readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFlag {
    AgcStatus,
    LowPower,
    TestMode,
}

/// All status flags of one bank on one board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusReadback {
    pub agc_status: bool,
    pub low_power: bool,
    pub test_mode: bool,
}

/// GPIO line masks and the state masks derived from them.
///
/// Built once from options and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalMasks {
    scope_sync: u32,
    attenuator: u32,
    tr: u32,
    agc_status: u32,
    low_power: u32,
    test_mode: u32,
    idle: u32,
    rx_only: u32,
    tx_only: u32,
    full_duplex: u32,
}

impl SignalMasks {
    /// Derive masks from role and status lines.
    pub fn new(
        scope_sync: u32,
        attenuator: u32,
        tr: u32,
        agc_status: u32,
        low_power: u32,
        test_mode: u32,
    ) -> UsrpResult<Self> {
        let named = [
            ("scope_sync", scope_sync),
            ("attenuator", attenuator),
            ("tr", tr),
            ("agc_status", agc_status),
            ("low_power", low_power),
            ("test_mode", test_mode),
        ];
        for (name, mask) in &named {
            if *mask == 0 {
                return Err(UsrpError::config(format!("{} mask is zero", name)));
            }
        }
        for (i, (a_name, a)) in named.iter().enumerate() {
            for (b_name, b) in &named[i + 1..] {
                if a & b != 0 {
                    return Err(UsrpError::config(format!(
                        "{} and {} masks overlap on {:#x}",
                        a_name,
                        b_name,
                        a & b
                    )));
                }
            }
        }

        let idle = 0;
        let rx_only = tr;
        let tx_only = tr | attenuator;
        let full_duplex = tx_only | rx_only | scope_sync;

        let masks = Self {
            scope_sync,
            attenuator,
            tr,
            agc_status,
            low_power,
            test_mode,
            idle,
            rx_only,
            tx_only,
            full_duplex,
        };

        for (i, a) in AtrState::ALL.iter().enumerate() {
            for b in &AtrState::ALL[i + 1..] {
                if masks.state_mask(*a) == masks.state_mask(*b) {
                    return Err(UsrpError::config(format!("{:?} and {:?} share a mask", a, b)));
                }
            }
        }
        Ok(masks)
    }

    pub fn from_options(gpio: &GpioOptions) -> UsrpResult<Self> {
        Self::new(
            gpio.scope_sync_mask,
            gpio.attenuator_mask,
            gpio.tr_mask,
            gpio.agc_status_mask,
            gpio.low_power_mask,
            gpio.test_mode_mask,
        )
    }

    /// Active-high mask for a state.
    pub fn state_mask(&self, state: AtrState) -> u32 {
        match state {
            AtrState::Idle => self.idle,
            AtrState::RxOnly => self.rx_only,
            AtrState::TxOnly => self.tx_only,
            AtrState::FullDuplex => self.full_duplex,
        }
    }

    /// Level to drive on a bank for a state.
    pub fn bank_mask(&self, bank: BankRole, state: AtrState) -> u32 {
        match bank {
            BankRole::High => self.state_mask(state),
            BankRole::Low => !self.state_mask(state) & self.role_lines(),
        }
    }

    pub fn flag_mask(&self, flag: StatusFlag) -> u32 {
        match flag {
            StatusFlag::AgcStatus => self.agc_status,
            StatusFlag::LowPower => self.low_power,
            StatusFlag::TestMode => self.test_mode,
        }
    }

    /// Lines switched with the radar state.
    pub fn role_lines(&self) -> u32 {
        self.scope_sync | self.attenuator | self.tr
    }

    pub fn output_lines(&self) -> u32 {
        self.role_lines() | self.test_mode
    }

    pub fn input_lines(&self) -> u32 {
        self.agc_status | self.low_power
    }

    pub fn scope_sync(&self) -> u32 {
        self.scope_sync
    }

    pub fn attenuator(&self) -> u32 {
        self.attenuator
    }

    pub fn tr(&self) -> u32 {
        self.tr
    }
}

/// Physical bank names for each polarity role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioBankAssignment {
    high: String,
    low: String,
}

impl GpioBankAssignment {
    pub fn new(high: impl Into<String>, low: impl Into<String>) -> UsrpResult<Self> {
        let (high, low) = (high.into(), low.into());
        if high.is_empty() || low.is_empty() {
            return Err(UsrpError::config("GPIO bank names must be set"));
        }
        if high == low {
            return Err(UsrpError::config(format!(
                "high and low banks are both {}",
                high
            )));
        }
        Ok(Self { high, low })
    }

    pub fn from_options(gpio: &GpioOptions) -> UsrpResult<Self> {
        Self::new(gpio.bank_high.clone(), gpio.bank_low.clone())
    }

    pub fn bank(&self, role: BankRole) -> &str {
        match role {
            BankRole::High => &self.high,
            BankRole::Low => &self.low,
        }
    }
}

/// GPIO operations on every motherboard of a device.
pub struct AntennaControl<'a> {
    device: &'a mut dyn UsrpDevice,
    masks: SignalMasks,
    banks: &'a GpioBankAssignment,
}

impl<'a> AntennaControl<'a> {
    pub fn new(
        device: &'a mut dyn UsrpDevice,
        masks: SignalMasks,
        banks: &'a GpioBankAssignment,
    ) -> Self {
        Self { device, masks, banks }
    }

    pub fn masks(&self) -> &SignalMasks {
        &self.masks
    }

    /// Set line directions, ATR registers and idle levels on both banks.
    ///
    /// Every output line is driven manually through timed `OUT` writes, so
    /// `CTRL` is cleared on them. The ATR registers still carry each state's
    /// pattern for readback and for boards that switch them to ATR control.
    /// Status lines become inputs.
    pub fn program_banks(&mut self) -> UsrpResult<()> {
        let m = self.masks;
        let all_lines = m.output_lines() | m.input_lines();
        for mboard in 0..self.device.num_mboards() {
            for role in BankRole::BOTH {
                let bank = self.banks.bank(role);
                self.device
                    .set_gpio_attr(bank, GpioAttr::Ctrl, 0, m.output_lines(), mboard)?;
                self.device
                    .set_gpio_attr(bank, GpioAttr::Ddr, m.output_lines(), all_lines, mboard)?;
                for state in AtrState::ALL {
                    self.device.set_gpio_attr(
                        bank,
                        state.atr_register(),
                        m.bank_mask(role, state),
                        m.role_lines(),
                        mboard,
                    )?;
                }
                self.device.set_gpio_attr(
                    bank,
                    GpioAttr::Out,
                    m.bank_mask(role, AtrState::Idle),
                    m.output_lines(),
                    mboard,
                )?;
            }
        }
        info!(
            high = self.banks.bank(BankRole::High),
            low = self.banks.bank(BankRole::Low),
            role_lines = format_args!("{:#x}", m.role_lines()),
            "Programmed GPIO banks"
        );
        Ok(())
    }

    /// Drive a state on one bank of every board.
    pub fn apply_state(&mut self, bank: BankRole, state: AtrState) -> UsrpResult<()> {
        let name = self.banks.bank(bank);
        let value = self.masks.bank_mask(bank, state);
        for mboard in 0..self.device.num_mboards() {
            self.device
                .set_gpio_attr(name, GpioAttr::Out, value, self.masks.role_lines(), mboard)?;
        }
        debug!(bank = name, ?state, value = format_args!("{:#x}", value), "Applied ATR state");
        Ok(())
    }

    /// Drive a state on both banks.
    pub fn apply(&mut self, state: AtrState) -> UsrpResult<()> {
        for bank in BankRole::BOTH {
            self.apply_state(bank, state)?;
        }
        Ok(())
    }

    /// Raw readback of a bank, one entry per board.
    pub fn read_bank_state(&self, bank: BankRole) -> UsrpResult<Vec<u32>> {
        let name = self.banks.bank(bank);
        (0..self.device.num_mboards())
            .map(|mboard| self.device.gpio_attr(name, GpioAttr::Readback, mboard))
            .collect()
    }

    pub fn read_bank_high_state(&self) -> UsrpResult<Vec<u32>> {
        self.read_bank_state(BankRole::High)
    }

    pub fn read_bank_low_state(&self) -> UsrpResult<Vec<u32>> {
        self.read_bank_state(BankRole::Low)
    }

    /// Whether a status line reads set on one board.
    pub fn status(&self, bank: BankRole, flag: StatusFlag, board: usize) -> UsrpResult<bool> {
        let raw = self.readback(bank, board)?;
        Ok(raw & self.masks.flag_mask(flag) != 0)
    }

    pub fn decode_agc_status(&self, bank: BankRole, board: usize) -> UsrpResult<bool> {
        self.status(bank, StatusFlag::AgcStatus, board)
    }

    pub fn decode_low_power_status(&self, bank: BankRole, board: usize) -> UsrpResult<bool> {
        self.status(bank, StatusFlag::LowPower, board)
    }

    pub fn decode_test_mode(&self, bank: BankRole, board: usize) -> UsrpResult<bool> {
        self.status(bank, StatusFlag::TestMode, board)
    }

    /// Every status flag from a single readback.
    pub fn status_readback(&self, bank: BankRole, board: usize) -> UsrpResult<StatusReadback> {
        let raw = self.readback(bank, board)?;
        let set = |flag| raw & self.masks.flag_mask(flag) != 0;
        Ok(StatusReadback {
            agc_status: set(StatusFlag::AgcStatus),
            low_power: set(StatusFlag::LowPower),
            test_mode: set(StatusFlag::TestMode),
        })
    }

    pub fn set_test_mode(&mut self, board: usize) -> UsrpResult<()> {
        self.update_test_mode(board, |out, bit| out | bit)
    }

    pub fn clear_test_mode(&mut self, board: usize) -> UsrpResult<()> {
        self.update_test_mode(board, |out, bit| out & !bit)
    }

    pub fn invert_test_mode(&mut self, board: usize) -> UsrpResult<()> {
        self.update_test_mode(board, |out, bit| out ^ bit)
    }

    fn update_test_mode(
        &mut self,
        board: usize,
        update: impl Fn(u32, u32) -> u32,
    ) -> UsrpResult<()> {
        self.check_board(board)?;
        let bank = self.banks.bank(BankRole::High);
        let bit = self.masks.test_mode;
        let out = self.device.gpio_attr(bank, GpioAttr::Out, board)?;
        let next = update(out, bit);
        self.device.set_gpio_attr(bank, GpioAttr::Out, next, bit, board)?;
        debug!(board, test_mode = next & bit != 0, "Updated test mode");
        Ok(())
    }

    fn readback(&self, bank: BankRole, board: usize) -> UsrpResult<u32> {
        self.check_board(board)?;
        self.device.gpio_attr(self.banks.bank(bank), GpioAttr::Readback, board)
    }

    fn check_board(&self, board: usize) -> UsrpResult<()> {
        let count = self.device.num_mboards();
        if board >= count {
            return Err(UsrpError::config(format!(
                "motherboard {} out of range ({} boards)",
                board, count
            )));
        }
        Ok(())
    }
}
