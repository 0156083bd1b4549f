//! # Simulated USRP
//!
//! A software multi-motherboard USRP for tests and bench runs without
//! hardware. It behaves like an N200 stack with low-frequency daughterboards:
//!
//! - sample rates quantize to integer decimations of the master clock
//! - tuning quantizes to the DDS resolution
//! - GPIO banks keep real CTRL/DDR/OUT/ATR registers with masked writes;
//!   lines under ATR control read back the idle register, since the
//!   simulated radio never reports transmit activity to the ATR engine
//! - `ref_locked` reads true after a configurable number of polls
//! - creating a stream invalidates the previous stream in that direction
//!
//! Every configuration command is recorded in a log together with the
//! command time in force when it was issued, so tests can check scheduling
//! without a hardware timeline. Timed commands are applied to the simulated
//! registers immediately. The log and the TX record keep at most
//! [`SimConfig::log_capacity`] entries each, dropping the oldest.
//!
//! The device time is manual by default: it only moves when a test calls
//! [`SimHandle::advance`].

use super::{
    GpioAttr, GpsClock, RxStream, StreamArgs, StreamCommand, StreamDirection, TxStream,
    UsrpDevice,
};
use crate::error::{StreamError, UsrpError, UsrpResult};
use crate::metadata::{RxErrorCode, RxMetadata, TxMetadata};
use darn_core::{IQSample, TimeSpec};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Largest integer decimation of the master clock.
const MAX_DECIMATION: f64 = 512.0;

/// Simulated device parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Number of motherboards
    pub num_mboards: usize,
    /// Master clock rate in Hz; rates are integer decimations of it
    pub master_clock_rate: f64,
    /// Tuning step in Hz
    pub tune_resolution_hz: f64,
    /// Tunable range in Hz, inclusive
    pub freq_range: (f64, f64),
    pub clock_sources: Vec<String>,
    pub time_sources: Vec<String>,
    /// Front ends per board, same for TX and RX
    pub frontends: Vec<String>,
    pub gpio_banks: Vec<String>,
    /// Polls of `ref_locked` that read false before it locks; `None` never locks
    pub ref_lock_after_polls: Option<u32>,
    /// Largest number of samples one `recv` call returns
    pub rx_fragment_len: usize,
    /// Advance device time with the host clock instead of manually
    pub free_running: bool,
    /// Entries kept in the command log and the TX record
    pub log_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_mboards: 1,
            master_clock_rate: 100_000_000.0,
            tune_resolution_hz: 100_000_000.0 / 4_294_967_296.0,
            freq_range: (0.0, 30_000_000.0),
            clock_sources: vec!["internal".into(), "external".into(), "mimo".into()],
            time_sources: vec!["none".into(), "internal".into(), "external".into(), "mimo".into()],
            frontends: vec!["A:A".into(), "A:B".into(), "A:AB".into(), "A:BA".into()],
            gpio_banks: vec!["RXA".into(), "TXA".into()],
            ref_lock_after_polls: Some(0),
            rx_fragment_len: 1024,
            free_running: false,
            log_capacity: 65_536,
        }
    }
}

impl SimConfig {
    /// Default parameters with `num_mboards` boards.
    pub fn with_mboards(num_mboards: usize) -> Self {
        Self {
            num_mboards,
            ..Default::default()
        }
    }
}

// =============================================================================
// Command log
// =============================================================================

/// A configuration command as the device saw it.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommandKind {
    ClockSource { mboard: usize, source: String },
    TimeSource { mboard: usize, source: String },
    SubdevSpec { direction: StreamDirection, mboard: usize, spec: String },
    Rate { direction: StreamDirection, chan: usize, rate: f64 },
    Tune { direction: StreamDirection, chan: usize, freq: f64 },
    Gpio { bank: String, attr: GpioAttr, value: u32, mask: u32, mboard: usize },
    SetTimeNow(TimeSpec),
    SetTimeNextPps(TimeSpec),
}

/// Logged command with the command time in force when it was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct SimCommand {
    pub time: Option<TimeSpec>,
    pub kind: SimCommandKind,
}

/// One TX submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTxRecord {
    pub time: Option<TimeSpec>,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    pub num_channels: usize,
    pub num_samps: usize,
}

// =============================================================================
// Device state
// =============================================================================

#[derive(Debug, Clone)]
struct Board {
    clock_source: String,
    time_source: String,
    tx_spec: Vec<String>,
    rx_spec: Vec<String>,
    gpio: HashMap<(String, GpioAttr), u32>,
    inputs: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    rate: f64,
    freq: f64,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    boards: Vec<Board>,
    tx_chans: Vec<Channel>,
    rx_chans: Vec<Channel>,
    command_time: Option<TimeSpec>,
    time_base: TimeSpec,
    time_origin: Instant,
    lock_polls: u32,
    log: VecDeque<SimCommand>,
    tx_generation: u64,
    rx_generation: u64,
    tx_records: VecDeque<SimTxRecord>,
    stream_commands: Vec<StreamCommand>,
    rx_errors: VecDeque<RxErrorCode>,
    gpio_fault: bool,
    closed: bool,
}

impl SimState {
    fn new(config: SimConfig) -> Self {
        let board = Board {
            clock_source: "internal".to_string(),
            time_source: "none".to_string(),
            tx_spec: vec!["A:A".to_string()],
            rx_spec: vec!["A:A".to_string()],
            gpio: HashMap::new(),
            inputs: HashMap::new(),
        };
        let default_chan = Channel {
            rate: config.master_clock_rate / 100.0,
            freq: 0.0,
        };
        Self {
            boards: vec![board; config.num_mboards],
            tx_chans: vec![default_chan; config.num_mboards],
            rx_chans: vec![default_chan; config.num_mboards],
            config,
            command_time: None,
            time_base: TimeSpec::ZERO,
            time_origin: Instant::now(),
            lock_polls: 0,
            log: VecDeque::new(),
            tx_generation: 0,
            rx_generation: 0,
            tx_records: VecDeque::new(),
            stream_commands: Vec::new(),
            rx_errors: VecDeque::new(),
            gpio_fault: false,
            closed: false,
        }
    }

    fn check_open(&self) -> UsrpResult<()> {
        if self.closed {
            return Err(UsrpError::hardware("device is closed"));
        }
        Ok(())
    }

    fn board(&self, mboard: usize) -> UsrpResult<&Board> {
        self.boards
            .get(mboard)
            .ok_or_else(|| UsrpError::config(format!("motherboard {} out of range", mboard)))
    }

    fn board_mut(&mut self, mboard: usize) -> UsrpResult<&mut Board> {
        let count = self.boards.len();
        self.boards
            .get_mut(mboard)
            .ok_or_else(|| {
                UsrpError::config(format!(
                    "motherboard {} out of range ({} boards)",
                    mboard, count
                ))
            })
    }

    fn chans(&self, direction: StreamDirection) -> &Vec<Channel> {
        match direction {
            StreamDirection::Tx => &self.tx_chans,
            StreamDirection::Rx => &self.rx_chans,
        }
    }

    fn chan(&self, direction: StreamDirection, chan: usize) -> UsrpResult<&Channel> {
        let chans = self.chans(direction);
        chans.get(chan).ok_or_else(|| {
            UsrpError::config(format!(
                "{} channel {} out of range ({} channels)",
                direction,
                chan,
                chans.len()
            ))
        })
    }

    fn chan_mut(&mut self, direction: StreamDirection, chan: usize) -> UsrpResult<&mut Channel> {
        let chans = match direction {
            StreamDirection::Tx => &mut self.tx_chans,
            StreamDirection::Rx => &mut self.rx_chans,
        };
        let count = chans.len();
        chans.get_mut(chan).ok_or_else(|| {
            UsrpError::config(format!(
                "{} channel {} out of range ({} channels)",
                direction, chan, count
            ))
        })
    }

    /// Resize the channel table after a subdevice change, keeping settings.
    fn remap_channels(&mut self, direction: StreamDirection) {
        let count: usize = self
            .boards
            .iter()
            .map(|b| match direction {
                StreamDirection::Tx => b.tx_spec.len(),
                StreamDirection::Rx => b.rx_spec.len(),
            })
            .sum();
        let default_chan = Channel {
            rate: self.config.master_clock_rate / 100.0,
            freq: 0.0,
        };
        let chans = match direction {
            StreamDirection::Tx => &mut self.tx_chans,
            StreamDirection::Rx => &mut self.rx_chans,
        };
        chans.resize(count, default_chan);
    }

    fn now(&self) -> TimeSpec {
        if self.config.free_running {
            self.time_base + self.time_origin.elapsed()
        } else {
            self.time_base
        }
    }

    fn record(&mut self, kind: SimCommandKind) {
        let time = self.command_time;
        push_bounded(&mut self.log, SimCommand { time, kind }, self.config.log_capacity);
    }

    fn readback(&self, board: &Board, bank: &str) -> u32 {
        let reg = |attr| board.gpio.get(&(bank.to_string(), attr)).copied().unwrap_or(0);
        let ddr = reg(GpioAttr::Ddr);
        let ctrl = reg(GpioAttr::Ctrl);
        let inputs = board.inputs.get(bank).copied().unwrap_or(0);
        let driven = (reg(GpioAttr::Out) & !ctrl) | (reg(GpioAttr::Atr0x) & ctrl);
        (driven & ddr) | (inputs & !ddr)
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Simulated device
// =============================================================================

/// Simulated multi-motherboard USRP.
pub struct SimUsrp {
    state: Arc<Mutex<SimState>>,
}

impl SimUsrp {
    pub fn new(config: SimConfig) -> Self {
        info!(mboards = config.num_mboards, "Creating simulated USRP");
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
        }
    }

    /// Inspection and fault-injection handle, valid after the device is moved.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimUsrp {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl UsrpDevice for SimUsrp {
    fn name(&self) -> String {
        format!("Simulated USRP ({} motherboards)", lock(&self.state).boards.len())
    }

    fn num_mboards(&self) -> usize {
        lock(&self.state).boards.len()
    }

    fn num_channels(&self, direction: StreamDirection) -> usize {
        lock(&self.state).chans(direction).len()
    }

    fn clock_sources(&self, _mboard: usize) -> Vec<String> {
        lock(&self.state).config.clock_sources.clone()
    }

    fn set_clock_source(&mut self, source: &str, mboard: usize) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        if !state.config.clock_sources.iter().any(|s| s == source) {
            return Err(UsrpError::config(format!("unsupported clock source: {}", source)));
        }
        state.board_mut(mboard)?.clock_source = source.to_string();
        state.record(SimCommandKind::ClockSource {
            mboard,
            source: source.to_string(),
        });
        Ok(())
    }

    fn time_sources(&self, _mboard: usize) -> Vec<String> {
        lock(&self.state).config.time_sources.clone()
    }

    fn set_time_source(&mut self, source: &str, mboard: usize) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        if !state.config.time_sources.iter().any(|s| s == source) {
            return Err(UsrpError::config(format!("unsupported time source: {}", source)));
        }
        state.board_mut(mboard)?.time_source = source.to_string();
        state.record(SimCommandKind::TimeSource {
            mboard,
            source: source.to_string(),
        });
        Ok(())
    }

    fn frontends(&self, _direction: StreamDirection, _mboard: usize) -> Vec<String> {
        lock(&self.state).config.frontends.clone()
    }

    fn set_subdev_spec(
        &mut self,
        direction: StreamDirection,
        spec: &str,
        mboard: usize,
    ) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        let tokens: Vec<String> = spec.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return Err(UsrpError::config("empty subdevice spec"));
        }
        if let Some(bad) = tokens.iter().find(|t| !state.config.frontends.contains(t)) {
            return Err(UsrpError::config(format!("unknown front end {} in \"{}\"", bad, spec)));
        }
        let board = state.board_mut(mboard)?;
        match direction {
            StreamDirection::Tx => board.tx_spec = tokens,
            StreamDirection::Rx => board.rx_spec = tokens,
        }
        state.remap_channels(direction);
        state.record(SimCommandKind::SubdevSpec {
            direction,
            mboard,
            spec: spec.to_string(),
        });
        Ok(())
    }

    fn subdev_spec(&self, direction: StreamDirection, mboard: usize) -> UsrpResult<String> {
        let state = lock(&self.state);
        let board = state.board(mboard)?;
        Ok(match direction {
            StreamDirection::Tx => board.tx_spec.join(" "),
            StreamDirection::Rx => board.rx_spec.join(" "),
        })
    }

    fn rate_range(&self, direction: StreamDirection, chan: usize) -> UsrpResult<(f64, f64)> {
        let state = lock(&self.state);
        state.chan(direction, chan)?;
        let mcr = state.config.master_clock_rate;
        Ok((mcr / MAX_DECIMATION, mcr))
    }

    fn set_rate(&mut self, direction: StreamDirection, rate: f64, chan: usize) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        let mcr = state.config.master_clock_rate;
        let min = mcr / MAX_DECIMATION;
        if !(rate >= min && rate <= mcr) {
            return Err(UsrpError::config(format!(
                "{} rate {} Hz outside [{}, {}]",
                direction, rate, min, mcr
            )));
        }
        let decimation = (mcr / rate).round().clamp(1.0, MAX_DECIMATION);
        state.chan_mut(direction, chan)?.rate = mcr / decimation;
        state.record(SimCommandKind::Rate { direction, chan, rate });
        Ok(())
    }

    fn rate(&self, direction: StreamDirection, chan: usize) -> UsrpResult<f64> {
        let state = lock(&self.state);
        state.chan(direction, chan).map(|c| c.rate)
    }

    fn freq_range(&self, direction: StreamDirection, chan: usize) -> UsrpResult<(f64, f64)> {
        let state = lock(&self.state);
        state.chan(direction, chan)?;
        Ok(state.config.freq_range)
    }

    fn set_center_freq(
        &mut self,
        direction: StreamDirection,
        freq: f64,
        chan: usize,
    ) -> UsrpResult<f64> {
        let mut state = lock(&self.state);
        state.check_open()?;
        let (min, max) = state.config.freq_range;
        if !(freq >= min && freq <= max) {
            return Err(UsrpError::config(format!(
                "{} frequency {} Hz outside [{}, {}]",
                direction, freq, min, max
            )));
        }
        let step = state.config.tune_resolution_hz;
        let achieved = (freq / step).round() * step;
        state.chan_mut(direction, chan)?.freq = achieved;
        state.record(SimCommandKind::Tune { direction, chan, freq });
        Ok(achieved)
    }

    fn center_freq(&self, direction: StreamDirection, chan: usize) -> UsrpResult<f64> {
        let state = lock(&self.state);
        state.chan(direction, chan).map(|c| c.freq)
    }

    fn set_command_time(&mut self, time: TimeSpec) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        state.command_time = Some(time);
        Ok(())
    }

    fn clear_command_time(&mut self) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        state.command_time = None;
        Ok(())
    }

    fn time_now(&self, mboard: usize) -> UsrpResult<TimeSpec> {
        let state = lock(&self.state);
        state.check_open()?;
        state.board(mboard)?;
        Ok(state.now())
    }

    fn set_time_now(&mut self, time: TimeSpec) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        state.time_base = time;
        state.time_origin = Instant::now();
        state.record(SimCommandKind::SetTimeNow(time));
        Ok(())
    }

    fn set_time_next_pps(&mut self, time: TimeSpec) -> UsrpResult<()> {
        // No PPS is simulated; the edge is taken to be now
        let mut state = lock(&self.state);
        state.check_open()?;
        state.time_base = time;
        state.time_origin = Instant::now();
        state.record(SimCommandKind::SetTimeNextPps(time));
        Ok(())
    }

    fn gpio_banks(&self, _mboard: usize) -> Vec<String> {
        lock(&self.state).config.gpio_banks.clone()
    }

    fn set_gpio_attr(
        &mut self,
        bank: &str,
        attr: GpioAttr,
        value: u32,
        mask: u32,
        mboard: usize,
    ) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        state.check_open()?;
        if state.gpio_fault {
            return Err(UsrpError::hardware(format!("GPIO write to {} failed", bank)));
        }
        if attr == GpioAttr::Readback {
            return Err(UsrpError::config("READBACK is read-only"));
        }
        if !state.config.gpio_banks.iter().any(|b| b == bank) {
            return Err(UsrpError::config(format!("unknown GPIO bank: {}", bank)));
        }
        let board = state.board_mut(mboard)?;
        let reg = board.gpio.entry((bank.to_string(), attr)).or_insert(0);
        *reg = (*reg & !mask) | (value & mask);
        state.record(SimCommandKind::Gpio {
            bank: bank.to_string(),
            attr,
            value,
            mask,
            mboard,
        });
        Ok(())
    }

    fn gpio_attr(&self, bank: &str, attr: GpioAttr, mboard: usize) -> UsrpResult<u32> {
        let state = lock(&self.state);
        state.check_open()?;
        if !state.config.gpio_banks.iter().any(|b| b == bank) {
            return Err(UsrpError::config(format!("unknown GPIO bank: {}", bank)));
        }
        let board = state.board(mboard)?;
        Ok(match attr {
            GpioAttr::Readback => state.readback(board, bank),
            _ => board.gpio.get(&(bank.to_string(), attr)).copied().unwrap_or(0),
        })
    }

    fn mboard_sensor(&self, name: &str, mboard: usize) -> UsrpResult<bool> {
        let mut state = lock(&self.state);
        state.check_open()?;
        state.board(mboard)?;
        match name {
            "ref_locked" => {
                let locked = state
                    .config
                    .ref_lock_after_polls
                    .map_or(false, |after| state.lock_polls >= after);
                state.lock_polls = state.lock_polls.saturating_add(1);
                Ok(locked)
            }
            other => Err(UsrpError::config(format!("unknown sensor: {}", other))),
        }
    }

    fn create_tx_stream(&mut self, args: &StreamArgs) -> UsrpResult<Box<dyn TxStream>> {
        let mut state = lock(&self.state);
        state.check_open()?;
        check_stream_channels(&state, StreamDirection::Tx, &args.channels)?;
        state.tx_generation += 1;
        debug!(
            generation = state.tx_generation,
            channels = ?args.channels,
            "Created sim TX stream"
        );
        Ok(Box::new(SimTxStream {
            state: Arc::clone(&self.state),
            generation: state.tx_generation,
            num_channels: args.channels.len(),
        }))
    }

    fn create_rx_stream(&mut self, args: &StreamArgs) -> UsrpResult<Box<dyn RxStream>> {
        let mut state = lock(&self.state);
        state.check_open()?;
        check_stream_channels(&state, StreamDirection::Rx, &args.channels)?;
        state.rx_generation += 1;
        let rate = state.rx_chans[args.channels[0]].rate;
        debug!(
            generation = state.rx_generation,
            channels = ?args.channels,
            "Created sim RX stream"
        );
        Ok(Box::new(SimRxStream {
            state: Arc::clone(&self.state),
            generation: state.rx_generation,
            num_channels: args.channels.len(),
            rate,
            active: None,
        }))
    }

    fn close(&mut self) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        if !state.closed {
            info!("Closing simulated USRP");
            state.closed = true;
        }
        Ok(())
    }
}

fn check_stream_channels(
    state: &SimState,
    direction: StreamDirection,
    channels: &[usize],
) -> UsrpResult<()> {
    if channels.is_empty() {
        return Err(UsrpError::config(format!("{} stream needs at least one channel", direction)));
    }
    let count = state.chans(direction).len();
    if let Some(bad) = channels.iter().find(|&&c| c >= count) {
        return Err(UsrpError::config(format!(
            "{} channel {} out of range ({} channels)",
            direction, bad, count
        )));
    }
    Ok(())
}

// =============================================================================
// Simulated streams
// =============================================================================

struct SimTxStream {
    state: Arc<Mutex<SimState>>,
    generation: u64,
    num_channels: usize,
}

impl TxStream for SimTxStream {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn send(
        &mut self,
        buffs: &[&[IQSample]],
        metadata: &TxMetadata,
        _timeout: Duration,
    ) -> UsrpResult<usize> {
        let mut state = lock(&self.state);
        if state.closed || state.tx_generation != self.generation {
            return Err(StreamError::StaleHandle("tx").into());
        }
        if buffs.len() != self.num_channels {
            return Err(StreamError::ChannelMismatch {
                expected: self.num_channels,
                actual: buffs.len(),
            }
            .into());
        }
        let num_samps = buffs.first().map_or(0, |b| b.len());
        if buffs.iter().any(|b| b.len() != num_samps) {
            return Err(StreamError::Submit("channel buffers differ in length".to_string()).into());
        }
        let record = SimTxRecord {
            time: metadata.time_spec(),
            start_of_burst: metadata.start_of_burst(),
            end_of_burst: metadata.end_of_burst(),
            num_channels: buffs.len(),
            num_samps,
        };
        let capacity = state.config.log_capacity;
        push_bounded(&mut state.tx_records, record, capacity);
        Ok(num_samps)
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveReceive {
    start: TimeSpec,
    remaining: usize,
    delivered: usize,
    finite: bool,
}

struct SimRxStream {
    state: Arc<Mutex<SimState>>,
    generation: u64,
    num_channels: usize,
    rate: f64,
    active: Option<ActiveReceive>,
}

impl SimRxStream {
    fn check_current(&self, state: &SimState) -> UsrpResult<()> {
        if state.closed || state.rx_generation != self.generation {
            return Err(StreamError::StaleHandle("rx").into());
        }
        Ok(())
    }
}

impl RxStream for SimRxStream {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn issue_stream_cmd(&mut self, command: &StreamCommand) -> UsrpResult<()> {
        let mut state = lock(&self.state);
        self.check_current(&state)?;
        let now = state.now();
        state.stream_commands.push(*command);
        self.active = match *command {
            StreamCommand::NumSampsAndDone { num_samps, time } => Some(ActiveReceive {
                start: time.unwrap_or(now),
                remaining: num_samps,
                delivered: 0,
                finite: true,
            }),
            StreamCommand::StartContinuous { time } => Some(ActiveReceive {
                start: time.unwrap_or(now),
                remaining: usize::MAX,
                delivered: 0,
                finite: false,
            }),
            StreamCommand::StopContinuous => None,
        };
        Ok(())
    }

    fn recv(
        &mut self,
        buffs: &mut [&mut [IQSample]],
        metadata: &mut RxMetadata,
        _timeout: Duration,
    ) -> UsrpResult<usize> {
        let mut state = lock(&self.state);
        self.check_current(&state)?;
        if buffs.len() != self.num_channels {
            return Err(StreamError::ChannelMismatch {
                expected: self.num_channels,
                actual: buffs.len(),
            }
            .into());
        }

        let delivered = self.active.map_or(0, |a| a.delivered);
        if let Some(code) = state.rx_errors.pop_front() {
            *metadata = RxMetadata::from_parts(false, false, None, code, delivered, false);
            return Ok(0);
        }
        let Some(mut active) = self.active else {
            *metadata = RxMetadata::from_parts(false, false, None, RxErrorCode::Timeout, 0, false);
            return Ok(0);
        };

        let room = buffs.iter().map(|b| b.len()).min().unwrap_or(0);
        let n = room.min(active.remaining).min(state.config.rx_fragment_len);
        for buf in buffs.iter_mut() {
            for (i, sample) in buf[..n].iter_mut().enumerate() {
                *sample = IQSample::new(1.0, (active.delivered + i) as f32);
            }
        }

        let time = active.start + TimeSpec::from_secs_f64(active.delivered as f64 / self.rate);
        active.remaining -= n;
        let done = active.finite && active.remaining == 0;
        *metadata = RxMetadata::from_parts(
            active.delivered == 0,
            done,
            Some(time),
            RxErrorCode::None,
            active.delivered,
            false,
        );
        active.delivered += n;
        self.active = if done { None } else { Some(active) };
        Ok(n)
    }
}

// =============================================================================
// Inspection handle
// =============================================================================

/// Shared view of a [`SimUsrp`] for tests and bench tools.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Move the manual device clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = lock(&self.state);
        state.time_base += by;
    }

    /// Device time as the device would report it.
    pub fn now(&self) -> TimeSpec {
        lock(&self.state).now()
    }

    /// Logged configuration commands, oldest first.
    pub fn commands(&self) -> Vec<SimCommand> {
        lock(&self.state).log.iter().cloned().collect()
    }

    pub fn clear_commands(&self) {
        lock(&self.state).log.clear();
    }

    /// Command time currently in force.
    pub fn command_time(&self) -> Option<TimeSpec> {
        lock(&self.state).command_time
    }

    /// Drive the input lines of a bank.
    pub fn set_input_lines(&self, bank: &str, mboard: usize, value: u32) {
        let mut state = lock(&self.state);
        if let Some(board) = state.boards.get_mut(mboard) {
            board.inputs.insert(bank.to_string(), value);
        }
    }

    /// Change how many `ref_locked` polls read false; resets the poll count.
    pub fn set_ref_lock_after(&self, polls: Option<u32>) {
        let mut state = lock(&self.state);
        state.config.ref_lock_after_polls = polls;
        state.lock_polls = 0;
    }

    /// Number of `ref_locked` polls so far.
    pub fn lock_polls(&self) -> u32 {
        lock(&self.state).lock_polls
    }

    /// Make every GPIO write fail with a hardware fault.
    pub fn set_gpio_fault(&self, failing: bool) {
        lock(&self.state).gpio_fault = failing;
    }

    /// Report `code` from the next `recv` call instead of samples.
    pub fn inject_rx_error(&self, code: RxErrorCode) {
        lock(&self.state).rx_errors.push_back(code);
    }

    pub fn tx_records(&self) -> Vec<SimTxRecord> {
        lock(&self.state).tx_records.iter().cloned().collect()
    }

    pub fn stream_commands(&self) -> Vec<StreamCommand> {
        lock(&self.state).stream_commands.clone()
    }

    pub fn clock_source(&self, mboard: usize) -> Option<String> {
        lock(&self.state).boards.get(mboard).map(|b| b.clock_source.clone())
    }

    pub fn time_source(&self, mboard: usize) -> Option<String> {
        lock(&self.state).boards.get(mboard).map(|b| b.time_source.clone())
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

// =============================================================================
// Simulated GPS clock
// =============================================================================

/// GPS-disciplined clock with fixed answers.
#[derive(Debug, Clone, Default)]
pub struct SimGpsClock {
    locked: bool,
    gps_time: i64,
    failing: bool,
}

impl SimGpsClock {
    pub fn new(locked: bool, gps_time: i64) -> Self {
        Self {
            locked,
            gps_time,
            failing: false,
        }
    }

    /// A clock whose queries all fail.
    pub fn unreachable() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }
}

impl GpsClock for SimGpsClock {
    fn is_locked(&self) -> UsrpResult<bool> {
        if self.failing {
            return Err(UsrpError::hardware("GPS clock unreachable"));
        }
        Ok(self.locked)
    }

    fn gps_time(&self) -> UsrpResult<i64> {
        if self.failing {
            return Err(UsrpError::hardware("GPS clock unreachable"));
        }
        Ok(self.gps_time)
    }
}
