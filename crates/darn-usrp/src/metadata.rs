//! # Burst Metadata
//!
//! Framing attached to every buffer crossing the streaming interface.
//!
//! TX metadata is a builder: flags are set for one submission, read back by
//! the stream and then dropped. Nothing carries over between submissions.
//!
//! RX metadata is a read-only snapshot filled in by one receive call. The
//! caller must check [`RxMetadata::error_code`] before trusting the samples
//! the call returned; the control layer never retries on its own.
//!
//! Completion of a fragmented receive is decided by comparing the delivered
//! sample count to the requested count (see `stream::ReceiveProgress`);
//! there is no separate "more fragments" flag.

use darn_core::TimeSpec;

/// Transmit metadata for one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxMetadata {
    start_of_burst: bool,
    end_of_burst: bool,
    time_spec: Option<TimeSpec>,
}

impl TxMetadata {
    /// Fresh metadata: mid-burst, untimed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start_of_burst(&mut self, start_of_burst: bool) -> &mut Self {
        self.start_of_burst = start_of_burst;
        self
    }

    pub fn set_end_of_burst(&mut self, end_of_burst: bool) -> &mut Self {
        self.end_of_burst = end_of_burst;
        self
    }

    /// Send at `time_spec` instead of as soon as possible.
    pub fn set_time_spec(&mut self, time_spec: TimeSpec) -> &mut Self {
        self.time_spec = Some(time_spec);
        self
    }

    /// Drop the time spec and send as soon as possible.
    pub fn clear_time_spec(&mut self) -> &mut Self {
        self.time_spec = None;
        self
    }

    pub fn start_of_burst(&self) -> bool {
        self.start_of_burst
    }

    pub fn end_of_burst(&self) -> bool {
        self.end_of_burst
    }

    pub fn has_time_spec(&self) -> bool {
        self.time_spec.is_some()
    }

    pub fn time_spec(&self) -> Option<TimeSpec> {
        self.time_spec
    }
}

/// Receive error codes, with the radio SDK's numeric values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RxErrorCode {
    #[default]
    None,
    /// No packet arrived within the timeout
    Timeout,
    /// A timed stream command arrived after its time
    LateCommand,
    /// Expected another stream command
    BrokenChain,
    /// Host did not keep up and samples were dropped
    Overflow,
    /// Multi-channel alignment failed
    Alignment,
    /// The packet could not be parsed
    BadPacket,
    /// Any code the SDK reports that is not listed above
    Other(u32),
}

impl RxErrorCode {
    /// Map an SDK error code.
    pub fn from_raw(code: u32) -> Self {
        match code {
            0x0 => RxErrorCode::None,
            0x1 => RxErrorCode::Timeout,
            0x2 => RxErrorCode::LateCommand,
            0x4 => RxErrorCode::BrokenChain,
            0x8 => RxErrorCode::Overflow,
            0xc => RxErrorCode::Alignment,
            0xf => RxErrorCode::BadPacket,
            other => RxErrorCode::Other(other),
        }
    }

    /// SDK numeric value.
    pub fn as_raw(&self) -> u32 {
        match self {
            RxErrorCode::None => 0x0,
            RxErrorCode::Timeout => 0x1,
            RxErrorCode::LateCommand => 0x2,
            RxErrorCode::BrokenChain => 0x4,
            RxErrorCode::Overflow => 0x8,
            RxErrorCode::Alignment => 0xc,
            RxErrorCode::BadPacket => 0xf,
            RxErrorCode::Other(code) => *code,
        }
    }

    pub fn is_error(&self) -> bool {
        *self != RxErrorCode::None
    }
}

impl std::fmt::Display for RxErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RxErrorCode::None => f.write_str("none"),
            RxErrorCode::Timeout => f.write_str("timeout"),
            RxErrorCode::LateCommand => f.write_str("late command"),
            RxErrorCode::BrokenChain => f.write_str("broken chain"),
            RxErrorCode::Overflow => f.write_str("overflow"),
            RxErrorCode::Alignment => f.write_str("alignment failure"),
            RxErrorCode::BadPacket => f.write_str("bad packet"),
            RxErrorCode::Other(code) => write!(f, "error code {:#x}", code),
        }
    }
}

/// Receive metadata filled in by one receive call.
///
/// Fields are written by the stream implementation through the crate-private
/// setters and read by callers through the getters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RxMetadata {
    pub(crate) start_of_burst: bool,
    pub(crate) end_of_burst: bool,
    pub(crate) time_spec: Option<TimeSpec>,
    pub(crate) error_code: RxErrorCode,
    pub(crate) fragment_offset: usize,
    pub(crate) out_of_sequence: bool,
}

impl RxMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata as reported by a device driver.
    pub fn from_parts(
        start_of_burst: bool,
        end_of_burst: bool,
        time_spec: Option<TimeSpec>,
        error_code: RxErrorCode,
        fragment_offset: usize,
        out_of_sequence: bool,
    ) -> Self {
        Self {
            start_of_burst,
            end_of_burst,
            time_spec,
            error_code,
            fragment_offset,
            out_of_sequence,
        }
    }

    pub fn start_of_burst(&self) -> bool {
        self.start_of_burst
    }

    pub fn end_of_burst(&self) -> bool {
        self.end_of_burst
    }

    pub fn has_time_spec(&self) -> bool {
        self.time_spec.is_some()
    }

    /// Device time of the first sample of this call, if reported.
    pub fn time_spec(&self) -> Option<TimeSpec> {
        self.time_spec
    }

    pub fn error_code(&self) -> RxErrorCode {
        self.error_code
    }

    /// Samples of this burst delivered by earlier calls.
    pub fn fragment_offset(&self) -> usize {
        self.fragment_offset
    }

    /// The device detected a sequence-number gap.
    pub fn out_of_sequence(&self) -> bool {
        self.out_of_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_metadata_builder() {
        let t = TimeSpec::new(4, 0.25);
        let mut md = TxMetadata::new();
        md.set_start_of_burst(true).set_end_of_burst(false).set_time_spec(t);

        assert!(md.start_of_burst());
        assert!(!md.end_of_burst());
        assert!(md.has_time_spec());
        assert_eq!(md.time_spec(), Some(t));

        md.clear_time_spec();
        assert!(!md.has_time_spec());
        assert_eq!(md.time_spec(), None);
    }

    #[test]
    fn test_fresh_tx_metadata_is_untimed() {
        let md = TxMetadata::new();
        assert!(!md.start_of_burst());
        assert!(!md.end_of_burst());
        assert!(!md.has_time_spec());
    }

    #[test]
    fn test_error_code_mapping() {
        for code in [
            RxErrorCode::None,
            RxErrorCode::Timeout,
            RxErrorCode::LateCommand,
            RxErrorCode::BrokenChain,
            RxErrorCode::Overflow,
            RxErrorCode::Alignment,
            RxErrorCode::BadPacket,
        ] {
            assert_eq!(RxErrorCode::from_raw(code.as_raw()), code);
        }
        assert_eq!(RxErrorCode::from_raw(0x3), RxErrorCode::Other(0x3));
        assert!(!RxErrorCode::None.is_error());
        assert!(RxErrorCode::Overflow.is_error());
    }

    #[test]
    fn test_rx_metadata_getters() {
        let md = RxMetadata::from_parts(
            false,
            true,
            Some(TimeSpec::new(1, 0.0)),
            RxErrorCode::None,
            4096,
            true,
        );
        assert!(md.end_of_burst());
        assert!(md.has_time_spec());
        assert_eq!(md.fragment_offset(), 4096);
        assert!(md.out_of_sequence());
        assert!(!md.error_code().is_error());
    }
}
