//! Sample types shared by the driver and its collaborators.
//!
//! The device streams complex baseband samples. On the host side the driver
//! works in single precision (`fc32`), which is what the waveform generator
//! produces and what the radio SDK converts to and from the wire format.

use num_complex::Complex32;

/// A single I/Q sample
pub type IQSample = Complex32;

/// A buffer of I/Q samples for one channel
pub type IQBuffer = Vec<IQSample>;

/// Host-side sample format understood by the streaming path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFormat {
    /// Complex float32
    Fc32,
    /// Complex float64
    Fc64,
    /// Complex int16
    Sc16,
    /// Complex int8
    Sc8,
}

impl CpuFormat {
    /// Parse a format name as used by the radio SDK.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fc32" => Some(CpuFormat::Fc32),
            "fc64" => Some(CpuFormat::Fc64),
            "sc16" => Some(CpuFormat::Sc16),
            "sc8" => Some(CpuFormat::Sc8),
            _ => None,
        }
    }

    /// SDK name of this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuFormat::Fc32 => "fc32",
            CpuFormat::Fc64 => "fc64",
            CpuFormat::Sc16 => "sc16",
            CpuFormat::Sc8 => "sc8",
        }
    }
}

/// Over-the-wire sample format between host and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Complex int16
    Sc16,
    /// Complex int8
    Sc8,
}

impl WireFormat {
    /// Parse a format name as used by the radio SDK.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sc16" => Some(WireFormat::Sc16),
            "sc8" => Some(WireFormat::Sc8),
            _ => None,
        }
    }

    /// SDK name of this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Sc16 => "sc16",
            WireFormat::Sc8 => "sc8",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        for name in ["fc32", "fc64", "sc16", "sc8"] {
            assert_eq!(CpuFormat::parse(name).map(|f| f.as_str()), Some(name));
        }
        assert_eq!(WireFormat::parse("sc16"), Some(WireFormat::Sc16));
        assert_eq!(WireFormat::parse("fc32"), None);
        assert_eq!(CpuFormat::parse("complex"), None);
    }
}
