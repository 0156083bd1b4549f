//! # USRP Control Layer
//!
//! Device control for a phased-array HF radar built from networked USRP
//! motherboards sharing a GPS-disciplined reference.
//!
//! ## Overview
//!
//! - **Configuration**: clock/time sources, subdevice mapping, rates, tuning
//!   and stream creation ([`DeviceConfigurator`])
//! - **Antenna signalling**: ATR/GPIO programming of the high and low banks
//!   and status line decoding ([`AntennaControl`])
//! - **Timed commands**: command time set/clear and device time queries
//!   ([`CommandScheduler`])
//! - **Burst metadata**: TX framing and RX error reporting ([`TxMetadata`],
//!   [`RxMetadata`])
//! - **Pulse driver**: per-pulse scheduling from radar control packets
//!   ([`PulseDriver`])
//!
//! ## Control Flow
//!
//! ```text
//! DriverPacket → PulseDriver → CommandScheduler → AntennaControl → TX stream
//!                     └──────► ReceiveRequest ──► RX thread → ReceiveOutcome
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use darn_core::DriverOptions;
//! use darn_usrp::{ChannelSet, PulseDriver, SimConfig, SimUsrp, Usrp};
//!
//! let options = DriverOptions::load()?;
//! let device = Box::new(SimUsrp::new(SimConfig::with_mboards(16)));
//! let mut usrp = Usrp::new(device, None, options)?;
//! usrp.configure_from_options()?;
//!
//! let mut driver = PulseDriver::new(&mut usrp, ChannelSet::first(16)?, ChannelSet::first(20)?)?;
//! # let packets: Vec<darn_core::DriverPacket> = Vec::new();
//! for packet in &packets {
//!     driver.handle_packet(&mut usrp, packet)?;
//! }
//! usrp.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod channels;
pub mod configurator;
pub mod driver;
pub mod error;
pub mod gpio;
pub mod hal;
pub mod metadata;
pub mod scheduler;
pub mod stream;
pub mod usrp;

pub use channels::ChannelSet;
pub use configurator::DeviceConfigurator;
pub use driver::{PulseDriver, PulseOutcome};
pub use error::{StreamError, UsrpError, UsrpResult};
pub use gpio::{
    AntennaControl, AtrState, BankRole, GpioBankAssignment, SignalMasks, StatusFlag,
    StatusReadback,
};
pub use hal::{
    GpsClock, RxStream, SimConfig, SimGpsClock, SimUsrp, StreamCommand, StreamDirection,
    TxStream, UsrpDevice,
};
pub use metadata::{RxErrorCode, RxMetadata, TxMetadata};
pub use scheduler::{CommandContext, CommandScheduler, DeviceTime};
pub use stream::{
    receive_samples, spawn_rx_worker, ReceiveOutcome, ReceiveProgress, ReceiveRequest,
};
pub use usrp::Usrp;
