//! # Hardware Abstraction Layer (HAL)
//!
//! Capability traits the control layer drives a radio through:
//!
//! - **UsrpDevice**: multi-motherboard device (clocking, subdevices, rates,
//!   tuning, command time, GPIO banks, sensors, stream creation)
//! - **TxStream / RxStream**: timestamped sample I/O, moved into worker threads
//! - **GpsClock**: the GPS-disciplined reference clock, when one is attached
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PulseDriver / radar control                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Usrp: DeviceConfigurator, AntennaControl, CommandScheduler│
//! ├─────────────────────────────────────────────────────────────┤
//! │        HAL Interface: UsrpDevice, TxStream, RxStream        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   SimUsrp (tests, bench)     │   SDK-backed device          │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Channel indices are global across motherboards, in subdevice-spec order.
//! Commands issued while a command time is set execute at that device time.

use crate::error::UsrpResult;
use crate::metadata::{RxMetadata, TxMetadata};
use darn_core::{CpuFormat, IQSample, TimeSpec, WireFormat};
use std::time::Duration;

pub mod sim;

pub use sim::{SimCommand, SimCommandKind, SimConfig, SimGpsClock, SimHandle, SimTxRecord, SimUsrp};

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Receive stream
    Rx,
    /// Transmit stream
    Tx,
}

impl std::fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamDirection::Rx => f.write_str("rx"),
            StreamDirection::Tx => f.write_str("tx"),
        }
    }
}

/// GPIO bank attribute registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpioAttr {
    /// 1 = line driven by the ATR state machine, 0 = manual
    Ctrl,
    /// 1 = output, 0 = input
    Ddr,
    /// Manual output level
    Out,
    /// ATR level while idle
    Atr0x,
    /// ATR level while receiving only
    AtrRx,
    /// ATR level while transmitting only
    AtrTx,
    /// ATR level in full duplex
    AtrXx,
    /// Current pin levels (read-only)
    Readback,
}

impl GpioAttr {
    /// SDK attribute name.
    pub fn as_str(&self) -> &'static str {
        match self {
            GpioAttr::Ctrl => "CTRL",
            GpioAttr::Ddr => "DDR",
            GpioAttr::Out => "OUT",
            GpioAttr::Atr0x => "ATR_0X",
            GpioAttr::AtrRx => "ATR_RX",
            GpioAttr::AtrTx => "ATR_TX",
            GpioAttr::AtrXx => "ATR_XX",
            GpioAttr::Readback => "READBACK",
        }
    }
}

/// Stream creation arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamArgs {
    pub cpu_format: CpuFormat,
    pub wire_format: WireFormat,
    pub channels: Vec<usize>,
}

/// RX stream command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamCommand {
    /// Receive exactly `num_samps` samples, then stop
    NumSampsAndDone {
        num_samps: usize,
        time: Option<TimeSpec>,
    },
    /// Receive until stopped
    StartContinuous { time: Option<TimeSpec> },
    /// Stop a continuous receive
    StopContinuous,
}

/// A multi-motherboard radio device.
///
/// Setters return errors for values the device rejects outright. Values the
/// device accepts but quantizes are reported through the getters or the
/// tune result, never by failing.
pub trait UsrpDevice: Send {
    /// Human-readable device description.
    fn name(&self) -> String;

    /// Number of motherboards.
    fn num_mboards(&self) -> usize;

    /// Channel count in a direction, given the current subdevice specs.
    fn num_channels(&self, direction: StreamDirection) -> usize;

    /// Reference clock sources a board supports.
    fn clock_sources(&self, mboard: usize) -> Vec<String>;

    fn set_clock_source(&mut self, source: &str, mboard: usize) -> UsrpResult<()>;

    /// PPS/time sources a board supports.
    fn time_sources(&self, mboard: usize) -> Vec<String>;

    fn set_time_source(&mut self, source: &str, mboard: usize) -> UsrpResult<()>;

    /// Front ends (`DB:FE` names) a board offers in a direction.
    fn frontends(&self, direction: StreamDirection, mboard: usize) -> Vec<String>;

    /// Map front ends to channels on one board, e.g. `"A:A A:B"`.
    fn set_subdev_spec(
        &mut self,
        direction: StreamDirection,
        spec: &str,
        mboard: usize,
    ) -> UsrpResult<()>;

    fn subdev_spec(&self, direction: StreamDirection, mboard: usize) -> UsrpResult<String>;

    /// Sample rates a channel accepts, inclusive.
    fn rate_range(&self, direction: StreamDirection, chan: usize) -> UsrpResult<(f64, f64)>;

    fn set_rate(&mut self, direction: StreamDirection, rate: f64, chan: usize) -> UsrpResult<()>;

    /// Achieved sample rate of a channel.
    fn rate(&self, direction: StreamDirection, chan: usize) -> UsrpResult<f64>;

    /// Center frequencies a channel can tune to, inclusive.
    fn freq_range(&self, direction: StreamDirection, chan: usize) -> UsrpResult<(f64, f64)>;

    /// Tune a channel; returns the achieved center frequency.
    fn set_center_freq(
        &mut self,
        direction: StreamDirection,
        freq: f64,
        chan: usize,
    ) -> UsrpResult<f64>;

    fn center_freq(&self, direction: StreamDirection, chan: usize) -> UsrpResult<f64>;

    /// Execute subsequent commands at `time` on every board.
    fn set_command_time(&mut self, time: TimeSpec) -> UsrpResult<()>;

    /// Execute subsequent commands immediately.
    fn clear_command_time(&mut self) -> UsrpResult<()>;

    /// Current device time of a board.
    fn time_now(&self, mboard: usize) -> UsrpResult<TimeSpec>;

    /// Set the device time on every board now.
    fn set_time_now(&mut self, time: TimeSpec) -> UsrpResult<()>;

    /// Set the device time on every board at the next PPS edge.
    fn set_time_next_pps(&mut self, time: TimeSpec) -> UsrpResult<()>;

    /// GPIO banks a board exposes.
    fn gpio_banks(&self, mboard: usize) -> Vec<String>;

    /// Write `value` to the bits of `attr` selected by `mask`.
    fn set_gpio_attr(&mut self, bank: &str, attr: GpioAttr, value: u32, mask: u32, mboard: usize)
        -> UsrpResult<()>;

    fn gpio_attr(&self, bank: &str, attr: GpioAttr, mboard: usize) -> UsrpResult<u32>;

    /// Boolean motherboard sensor, e.g. `"ref_locked"`.
    fn mboard_sensor(&self, name: &str, mboard: usize) -> UsrpResult<bool>;

    fn create_tx_stream(&mut self, args: &StreamArgs) -> UsrpResult<Box<dyn TxStream>>;

    fn create_rx_stream(&mut self, args: &StreamArgs) -> UsrpResult<Box<dyn RxStream>>;

    /// Release the device. Further calls may fail.
    fn close(&mut self) -> UsrpResult<()>;
}

/// Transmit side of the streaming path.
pub trait TxStream: Send {
    /// Number of channels, one buffer each per send.
    fn num_channels(&self) -> usize;

    /// Submit one buffer per channel; returns samples sent per channel.
    fn send(
        &mut self,
        buffs: &[&[IQSample]],
        metadata: &TxMetadata,
        timeout: Duration,
    ) -> UsrpResult<usize>;
}

/// Receive side of the streaming path.
pub trait RxStream: Send {
    fn num_channels(&self) -> usize;

    fn issue_stream_cmd(&mut self, command: &StreamCommand) -> UsrpResult<()>;

    /// Fill one buffer per channel; returns samples received per channel.
    ///
    /// Timeouts and device-side failures are reported in
    /// `metadata.error_code()`, not as `Err`.
    fn recv(
        &mut self,
        buffs: &mut [&mut [IQSample]],
        metadata: &mut RxMetadata,
        timeout: Duration,
    ) -> UsrpResult<usize>;
}

/// GPS-disciplined reference clock.
pub trait GpsClock: Send {
    fn is_locked(&self) -> UsrpResult<bool>;

    /// Whole GPS seconds.
    fn gps_time(&self) -> UsrpResult<i64>;
}
