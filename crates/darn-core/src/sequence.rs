//! # Diagnostic Pulse Sequences
//!
//! Builds the packet stream radar control would send for a multi-pulse
//! sequence, for exercising the driver without the real control process.
//!
//! A sequence is a list of pulse offsets in units of `tau`. Exactly one
//! packet opens the burst (SOB) and exactly one closes it (EOB):
//!
//! ```text
//! offsets:  0        9     12      20   22     26 27
//!           │        │     │       │    │      │  │
//! SOB       ■        □     □       □    □      □  □
//! EOB       □        □     □       □    □      □  ■
//! ```
//!
//! ## Example
//!
//! ```rust
//! use darn_core::sequence::PulseSequence;
//!
//! let seq = PulseSequence::new(vec![0, 9, 12, 20, 22, 26, 27], 1500);
//! let packets = seq.packets(&[0, 1], &[], 5.0e6, 12.0e6, 14.0e6, 100_000);
//! assert!(packets[0].sob && !packets[0].eob);
//! assert!(packets[6].eob);
//! ```

use crate::packet::{DriverPacket, SamplesBuffer};
use crate::types::{IQBuffer, IQSample};
use std::f64::consts::PI;
use std::time::Duration;

/// Generate a test pulse: a sum of complex tones with linear edge ramps.
///
/// Each tone has amplitude `1/sqrt(2)`. The first and last `ramp_len` of the
/// pulse are shaped so the envelope rises from and falls to zero.
pub fn make_pulse(
    tx_rate: f64,
    tones_hz: &[f64],
    pulse_len: Duration,
    ramp_len: Duration,
) -> IQBuffer {
    let amplitude = 1.0 / 2f64.sqrt();
    let num_samples = (tx_rate * pulse_len.as_secs_f64()).round() as usize;
    let ramp = ((tx_rate * ramp_len.as_secs_f64()).round() as usize).min(num_samples / 2);

    let mut samples: IQBuffer = (0..num_samples)
        .map(|n| {
            tones_hz.iter().fold(IQSample::new(0.0, 0.0), |acc, &freq| {
                let phase = (2.0 * PI * freq / tx_rate * n as f64) % (2.0 * PI);
                acc + IQSample::new(
                    (amplitude * phase.cos()) as f32,
                    (amplitude * phase.sin()) as f32,
                )
            })
        })
        .collect();

    for i in 0..ramp {
        let gain = (i + 1) as f32 / ramp as f32;
        samples[i] *= gain;
        samples[num_samples - 1 - i] *= gain;
    }

    samples
}

/// A pulse sequence: offsets in units of `tau_us` microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseSequence {
    offsets: Vec<u32>,
    tau_us: u64,
}

impl PulseSequence {
    /// Create a sequence from pulse offsets and the lag unit.
    pub fn new(offsets: Vec<u32>, tau_us: u64) -> Self {
        Self { offsets, tau_us }
    }

    /// The seven-pulse sequence used by the standard bench test.
    pub fn seven_pulse(tau_us: u64) -> Self {
        Self::new(vec![0, 9, 12, 20, 22, 26, 27], tau_us)
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Start-of-burst flag for the pulse at `index`.
    pub fn sob(&self, index: usize) -> bool {
        index == 0 && !self.offsets.is_empty()
    }

    /// End-of-burst flag for the pulse at `index`.
    pub fn eob(&self, index: usize) -> bool {
        !self.offsets.is_empty() && index == self.offsets.len() - 1
    }

    /// Offset of the pulse at `index` from the sequence start, in microseconds.
    ///
    /// `None` past the last pulse.
    pub fn time_to_send_us(&self, index: usize) -> Option<u64> {
        self.offsets.get(index).map(|&o| self.offset_us(o))
    }

    fn offset_us(&self, offset: u32) -> u64 {
        u64::from(offset) * self.tau_us
    }

    /// Build one packet per pulse.
    ///
    /// `samples` is attached to the first packet only, one copy per channel;
    /// pass an empty slice to build packets that rely on cached samples.
    pub fn packets(
        &self,
        channels: &[u32],
        samples: &[IQSample],
        tx_rate: f64,
        tx_freq: f64,
        rx_freq: f64,
        rx_samples: u64,
    ) -> Vec<DriverPacket> {
        self.offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| DriverPacket {
                channels: channels.to_vec(),
                channel_samples: if i == 0 && !samples.is_empty() {
                    channels
                        .iter()
                        .map(|_| SamplesBuffer::from_samples(samples))
                        .collect()
                } else {
                    Vec::new()
                },
                sob: self.sob(i),
                eob: self.eob(i),
                txrate: tx_rate,
                timetosendsamples: self.offset_us(offset),
                txcenterfreq: tx_freq,
                rxcenterfreq: rx_freq,
                numberofreceivesamples: rx_samples,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_flags_bracket_sequence() {
        let seq = PulseSequence::seven_pulse(1500);
        let packets = seq.packets(&[0], &[], 5.0e6, 12.0e6, 14.0e6, 1_000_000);

        let sob: Vec<u32> = packets
            .iter()
            .zip(seq.offsets())
            .filter(|(p, _)| p.sob)
            .map(|(_, &o)| o)
            .collect();
        let eob: Vec<u32> = packets
            .iter()
            .zip(seq.offsets())
            .filter(|(p, _)| p.eob)
            .map(|(_, &o)| o)
            .collect();

        assert_eq!(sob, vec![0]);
        assert_eq!(eob, vec![27]);
        assert!(packets[1..6].iter().all(|p| !p.sob && !p.eob));
    }

    #[test]
    fn test_single_pulse_has_both_flags() {
        let seq = PulseSequence::new(vec![0], 1500);
        assert!(seq.sob(0));
        assert!(seq.eob(0));
    }

    #[test]
    fn test_time_to_send() {
        let seq = PulseSequence::seven_pulse(1500);
        assert_eq!(seq.time_to_send_us(0), Some(0));
        assert_eq!(seq.time_to_send_us(6), Some(27 * 1500));
        assert_eq!(seq.time_to_send_us(7), None);
    }

    #[test]
    fn test_samples_only_on_first_packet() {
        let pulse = make_pulse(
            1.0e6,
            &[1.0e4],
            Duration::from_micros(300),
            Duration::from_micros(10),
        );
        let seq = PulseSequence::new(vec![0, 3, 5], 1000);
        let packets = seq.packets(&[0, 1], &pulse, 1.0e6, 12.0e6, 12.0e6, 5000);

        assert_eq!(packets[0].channel_samples.len(), 2);
        assert_eq!(packets[0].channel_samples[1].len(), pulse.len());
        assert!(packets[1..].iter().all(|p| !p.has_samples()));
        assert!(packets.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_make_pulse_shape() {
        let rate = 1.0e6;
        let pulse = make_pulse(
            rate,
            &[1.0e5],
            Duration::from_micros(300),
            Duration::from_micros(10),
        );
        assert_eq!(pulse.len(), 300);

        let full = 1.0 / 2f32.sqrt();
        // Ramped edges start small and reach full amplitude after the ramp
        assert!((pulse[0].norm() - full / 10.0).abs() < 1e-5);
        assert!((pulse[299].norm() - full / 10.0).abs() < 1e-5);
        assert!((pulse[150].norm() - full).abs() < 1e-5);
        assert!((pulse[9].norm() - full).abs() < 1e-5);
    }

    #[test]
    fn test_make_pulse_sums_tones() {
        let pulse = make_pulse(1.0e6, &[0.0, 0.0], Duration::from_micros(100), Duration::ZERO);
        let expected = 2.0 / 2f32.sqrt();
        assert!((pulse[50].re - expected).abs() < 1e-5);
        assert!(pulse[50].im.abs() < 1e-6);
    }
}
