//! The owning device handle.
//!
//! [`Usrp`] owns the device, the optional GPS clock, the driver options, the
//! derived signal masks and the pending command context. The three control
//! components borrow what they need through short-lived views:
//!
//! ```text
//!                  ┌──────────────► configurator()  DeviceConfigurator
//!  Usrp (owner) ───┼──────────────► signals()       AntennaControl
//!                  └──────────────► scheduler()     CommandScheduler
//! ```
//!
//! Teardown is explicit through [`Usrp::close`]; dropping an open handle
//! performs the same teardown and logs any failure.

use crate::channels::ChannelSet;
use crate::configurator::DeviceConfigurator;
use crate::error::{UsrpError, UsrpResult};
use crate::gpio::{AntennaControl, AtrState, BankRole, GpioBankAssignment, SignalMasks};
use crate::hal::{GpsClock, UsrpDevice};
use crate::scheduler::{CommandContext, CommandScheduler};
use darn_core::DriverOptions;
use tracing::{info, warn};

/// A configured radio device and its control state.
pub struct Usrp {
    device: Box<dyn UsrpDevice>,
    gps: Option<Box<dyn GpsClock>>,
    options: DriverOptions,
    masks: SignalMasks,
    banks: GpioBankAssignment,
    context: CommandContext,
    closed: bool,
}

impl Usrp {
    /// Take ownership of a device and program its GPIO banks.
    pub fn new(
        device: Box<dyn UsrpDevice>,
        gps: Option<Box<dyn GpsClock>>,
        options: DriverOptions,
    ) -> UsrpResult<Self> {
        options
            .validate()
            .map_err(|e| UsrpError::config(e.to_string()))?;
        let masks = SignalMasks::from_options(&options.gpio)?;
        let banks = GpioBankAssignment::from_options(&options.gpio)?;

        for mboard in 0..device.num_mboards() {
            let available = device.gpio_banks(mboard);
            for role in BankRole::BOTH {
                let bank = banks.bank(role);
                if !available.iter().any(|b| b == bank) {
                    return Err(UsrpError::config(format!(
                        "GPIO bank {} not present on motherboard {}",
                        bank, mboard
                    )));
                }
            }
        }

        let mut usrp = Self {
            device,
            gps,
            options,
            masks,
            banks,
            context: CommandContext::Immediate,
            closed: false,
        };
        usrp.signals().program_banks()?;
        info!(device = %usrp.device.name(), "USRP ready");
        Ok(usrp)
    }

    /// Bring the device up from the options: clocking, subdevices, rates and
    /// reference lock. Returns the achieved TX and RX rates.
    pub fn configure_from_options(&mut self) -> UsrpResult<(f64, f64)> {
        let device = self.options.device.clone();
        let mut config = self.configurator();
        config.set_clock_source(&device.clock_source)?;
        config.set_time_source(&device.time_source, &device.clock_addr)?;
        config.set_tx_subdev(&device.tx_subdev)?;
        config.set_main_rx_subdev(&device.main_rx_subdev)?;
        if device.interferometer_antenna_count > 0 {
            config.set_interferometer_rx_subdev(
                &device.interferometer_rx_subdev,
                device.interferometer_antenna_count,
            )?;
        }
        let tx_rate = config.set_tx_rate(&ChannelSet::first(device.main_antenna_count)?)?;
        let rx_rate = config.set_rx_rate(&ChannelSet::first(
            device.main_antenna_count + device.interferometer_antenna_count,
        )?)?;
        config.check_reference_lock()?;
        Ok((tx_rate, rx_rate))
    }

    pub fn configurator(&mut self) -> DeviceConfigurator<'_> {
        DeviceConfigurator::new(
            self.device.as_mut(),
            self.gps.as_deref(),
            &self.options,
            &self.context,
        )
    }

    pub fn signals(&mut self) -> AntennaControl<'_> {
        AntennaControl::new(self.device.as_mut(), self.masks, &self.banks)
    }

    pub fn scheduler(&mut self) -> CommandScheduler<'_> {
        CommandScheduler::new(self.device.as_mut(), self.gps.as_deref(), &mut self.context)
    }

    pub fn masks(&self) -> &SignalMasks {
        &self.masks
    }

    pub fn banks(&self) -> &GpioBankAssignment {
        &self.banks
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn command_context(&self) -> CommandContext {
        self.context
    }

    /// Clear the command time, drive both banks idle and release the device.
    pub fn close(mut self) -> UsrpResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> UsrpResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Every step runs even when an earlier one fails; the first error wins
        let cleared = self.scheduler().clear_command_time();
        let idled = self.signals().apply(AtrState::Idle);
        let released = self.device.close();
        cleared.and(idled).and(released)?;
        info!("USRP closed");
        Ok(())
    }
}

impl Drop for Usrp {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "USRP teardown failed");
        }
    }
}
