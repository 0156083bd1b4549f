//! Error taxonomy for the control layer.
//!
//! - [`UsrpError::Configuration`]: a bad channel set, unsupported source or
//!   subdevice name, invalid rate/frequency. A programming or options
//!   mistake; never retried.
//! - [`UsrpError::HardwareFault`]: reference not locked in budget, device
//!   unresponsive. Fatal to the session.
//! - [`UsrpError::Stream`]: a per-call streaming failure. Recoverable at the
//!   caller's discretion and never affects other channels or later calls.

use crate::metadata::RxErrorCode;
use darn_core::PacketError;

/// Result type for control-layer operations
pub type UsrpResult<T> = Result<T, UsrpError>;

/// Errors raised by the control layer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UsrpError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl UsrpError {
    pub fn config(msg: impl Into<String>) -> Self {
        UsrpError::Configuration(msg.into())
    }

    pub fn hardware(msg: impl Into<String>) -> Self {
        UsrpError::HardwareFault(msg.into())
    }

    /// Whether the caller may retry the failed call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, UsrpError::Stream(_))
    }
}

impl From<PacketError> for UsrpError {
    fn from(err: PacketError) -> Self {
        UsrpError::Configuration(err.to_string())
    }
}

/// Per-call streaming failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("receive failed: {0}")]
    Receive(RxErrorCode),

    #[error("stream handle was replaced by a newer {0} stream")]
    StaleHandle(&'static str),

    #[error("expected buffers for {expected} channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("submit failed: {0}")]
    Submit(String),
}
