//! # darn-core
//!
//! Device-independent building blocks for the radar USRP driver:
//!
//! - **timing**: absolute device time ([`TimeSpec`]) and host-side timers
//! - **types**: I/Q sample and stream format types
//! - **config**: YAML driver options ([`DriverOptions`])
//! - **logging**: `tracing` subscriber bootstrap
//! - **packet**: the per-pulse [`DriverPacket`] sent by radar control
//! - **sequence**: diagnostic pulse and packet-sequence generation
//!
//! The hardware-facing control layer lives in `darn-usrp`.

pub mod config;
pub mod logging;
pub mod packet;
pub mod sequence;
pub mod timing;
pub mod types;

pub use config::{ConfigError, DriverOptions};
pub use packet::{DriverPacket, PacketError, SamplesBuffer};
pub use timing::{MonotonicTimer, TimeSpec};
pub use types::{CpuFormat, IQBuffer, IQSample, WireFormat};
