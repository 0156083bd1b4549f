//! Driver packet: one pulse worth of instructions from radar control.
//!
//! The radar-control process sends one packet per pulse. Field numbers match
//! the protobuf schema used on the messaging channel so packets decode
//! directly from the wire bytes.
//!
//! Sample buffers are large and identical for every pulse of a sequence, so
//! radar control only attaches them to the first packet it sends; later
//! packets carry an empty `channel_samples` and the driver reuses what it
//! cached.

use crate::types::{IQBuffer, IQSample};
use prost::Message;

/// Error type for packet decoding and validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PacketError {
    #[error("failed to decode driver packet: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("packet has no channels")]
    NoChannels,

    #[error("channel {0} listed twice")]
    DuplicateChannel(u32),

    #[error("expected samples for {expected} channels, got {actual}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("channel {channel}: {real} real vs {imag} imaginary samples")]
    RaggedSamples {
        channel: usize,
        real: usize,
        imag: usize,
    },

    #[error("channel {channel} has {len} samples, channel 0 has {expected}")]
    UnequalChannelLengths {
        channel: usize,
        len: usize,
        expected: usize,
    },
}

/// Samples for one channel, split into real and imaginary parts.
#[derive(Clone, PartialEq, Message)]
pub struct SamplesBuffer {
    #[prost(float, repeated, tag = "1")]
    pub real: Vec<f32>,

    #[prost(float, repeated, tag = "2")]
    pub imag: Vec<f32>,
}

impl SamplesBuffer {
    /// Split complex samples into a buffer.
    pub fn from_samples(samples: &[IQSample]) -> Self {
        Self {
            real: samples.iter().map(|s| s.re).collect(),
            imag: samples.iter().map(|s| s.im).collect(),
        }
    }

    /// Number of complex samples (the shorter of the two parts).
    pub fn len(&self) -> usize {
        self.real.len().min(self.imag.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recombine into complex samples.
    pub fn to_samples(&self) -> IQBuffer {
        self.real
            .iter()
            .zip(&self.imag)
            .map(|(&re, &im)| IQSample::new(re, im))
            .collect()
    }
}

/// Per-pulse instructions from radar control.
#[derive(Clone, PartialEq, Message)]
pub struct DriverPacket {
    /// Channels this pulse is transmitted on
    #[prost(uint32, repeated, tag = "1")]
    pub channels: Vec<u32>,

    /// One buffer per entry of `channels`, or empty to reuse the cached ones
    #[prost(message, repeated, tag = "2")]
    pub channel_samples: Vec<SamplesBuffer>,

    /// First pulse of a sequence
    #[prost(bool, tag = "3")]
    pub sob: bool,

    /// Last pulse of a sequence
    #[prost(bool, tag = "4")]
    pub eob: bool,

    /// TX sample rate the samples were generated for, in Hz
    #[prost(double, tag = "5")]
    pub txrate: f64,

    /// Offset of this pulse from the sequence start, in microseconds
    #[prost(uint64, tag = "6")]
    pub timetosendsamples: u64,

    /// TX center frequency in Hz
    #[prost(double, tag = "7")]
    pub txcenterfreq: f64,

    /// RX center frequency in Hz
    #[prost(double, tag = "8")]
    pub rxcenterfreq: f64,

    /// Samples to receive for the whole sequence
    #[prost(uint64, tag = "9")]
    pub numberofreceivesamples: u64,
}

impl DriverPacket {
    /// Decode a packet from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        Ok(Self::decode(bytes)?)
    }

    /// Encode a packet to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Channels as host indices.
    pub fn channel_indices(&self) -> Vec<usize> {
        self.channels.iter().map(|&c| c as usize).collect()
    }

    /// Whether this packet carries sample buffers.
    pub fn has_samples(&self) -> bool {
        !self.channel_samples.is_empty()
    }

    /// Check channel list and sample buffers for internal consistency.
    ///
    /// Device-dependent checks (channel range) are left to the driver.
    pub fn validate(&self) -> Result<(), PacketError> {
        if self.channels.is_empty() {
            return Err(PacketError::NoChannels);
        }
        for (i, ch) in self.channels.iter().enumerate() {
            if self.channels[..i].contains(ch) {
                return Err(PacketError::DuplicateChannel(*ch));
            }
        }

        if !self.has_samples() {
            return Ok(());
        }
        if self.channel_samples.len() != self.channels.len() {
            return Err(PacketError::ChannelCountMismatch {
                expected: self.channels.len(),
                actual: self.channel_samples.len(),
            });
        }

        let expected = self.channel_samples[0].real.len();
        for (channel, buffer) in self.channel_samples.iter().enumerate() {
            if buffer.real.len() != buffer.imag.len() {
                return Err(PacketError::RaggedSamples {
                    channel,
                    real: buffer.real.len(),
                    imag: buffer.imag.len(),
                });
            }
            if buffer.real.len() != expected {
                return Err(PacketError::UnequalChannelLengths {
                    channel,
                    len: buffer.real.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Complex samples per channel.
    pub fn samples(&self) -> Vec<IQBuffer> {
        self.channel_samples.iter().map(SamplesBuffer::to_samples).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_samples(channels: Vec<u32>, len: usize) -> DriverPacket {
        let samples: Vec<IQSample> = (0..len)
            .map(|i| IQSample::new(i as f32, -(i as f32)))
            .collect();
        DriverPacket {
            channel_samples: channels
                .iter()
                .map(|_| SamplesBuffer::from_samples(&samples))
                .collect(),
            channels,
            sob: true,
            eob: false,
            txrate: 5.0e6,
            timetosendsamples: 1500,
            txcenterfreq: 12.0e6,
            rxcenterfreq: 14.0e6,
            numberofreceivesamples: 1_000_000,
        }
    }

    #[test]
    fn test_wire_round_trip() {
        let packet = packet_with_samples(vec![0, 1, 2], 16);
        let decoded = DriverPacket::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.samples()[1][3], IQSample::new(3.0, -3.0));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = DriverPacket::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, PacketError::Decode(_)));
    }

    #[test]
    fn test_validate_without_samples() {
        let mut packet = packet_with_samples(vec![0, 1], 8);
        packet.channel_samples.clear();
        assert!(packet.validate().is_ok());
        assert!(!packet.has_samples());
    }

    #[test]
    fn test_validate_errors() {
        let mut packet = packet_with_samples(vec![], 8);
        assert_eq!(packet.validate(), Err(PacketError::NoChannels));

        packet = packet_with_samples(vec![0, 3, 0], 8);
        assert_eq!(packet.validate(), Err(PacketError::DuplicateChannel(0)));

        packet = packet_with_samples(vec![0, 1], 8);
        packet.channel_samples.pop();
        assert_eq!(
            packet.validate(),
            Err(PacketError::ChannelCountMismatch { expected: 2, actual: 1 })
        );

        packet = packet_with_samples(vec![0, 1], 8);
        packet.channel_samples[1].imag.pop();
        assert!(matches!(packet.validate(), Err(PacketError::RaggedSamples { channel: 1, .. })));

        packet = packet_with_samples(vec![0, 1], 8);
        packet.channel_samples[1] = SamplesBuffer::from_samples(&[IQSample::new(1.0, 0.0)]);
        assert!(matches!(
            packet.validate(),
            Err(PacketError::UnequalChannelLengths { channel: 1, len: 1, expected: 8 })
        ));
    }
}
