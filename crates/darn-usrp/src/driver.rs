//! # Pulse Driver
//!
//! Turns a stream of [`DriverPacket`]s into timed antenna switching and TX
//! submissions. A sequence opens on a start-of-burst packet and closes on an
//! end-of-burst packet:
//!
//! ```text
//!  SOB packet:  [rate] [retune] now + lead ──► sequence start ──► ReceiveRequest
//!  every pulse: t = start + offset, t_end = t + samples / tx_rate
//!               set_command_time(t)     → apply(FullDuplex)
//!               set_command_time(t_end) → apply(RxOnly, or Idle on EOB)
//!               clear_command_time()
//!               send(samples, {sob, eob, t})
//!  EOB packet:  sequence closed, banks idle from t_end
//! ```
//!
//! The role lines are driven manually, so every pulse carries both of its
//! edges as timed writes.
//!
//! A start-of-burst packet is checked against the device's rate and tuning
//! ranges before anything is changed. A rejected packet leaves the driver
//! and the device as they were.
//!
//! Sample buffers are cached: packets after the first may omit them and the
//! last buffers sent are reused.

use crate::channels::ChannelSet;
use crate::error::{StreamError, UsrpError, UsrpResult};
use crate::gpio::AtrState;
use crate::hal::{StreamDirection, TxStream};
use crate::metadata::TxMetadata;
use crate::stream::ReceiveRequest;
use crate::usrp::Usrp;
use darn_core::{DriverPacket, IQBuffer, IQSample, MonotonicTimer, TimeSpec};
use std::time::Duration;
use tracing::{debug, info, warn};

const RATE_TOLERANCE_HZ: f64 = 1e-6;

/// What one packet produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseOutcome {
    /// Device time the pulse was scheduled at
    pub pulse_time: TimeSpec,
    /// Receive window opened by a start-of-burst packet
    pub receive: Option<ReceiveRequest>,
}

/// Per-pulse transmit and antenna sequencing.
pub struct PulseDriver {
    tx_stream: Box<dyn TxStream>,
    tx_channels: ChannelSet,
    rx_channels: ChannelSet,
    samples: Vec<IQBuffer>,
    requested_tx_rate: f64,
    tx_rate: f64,
    tx_freq: Option<f64>,
    rx_freq: Option<f64>,
    sequence_start: Option<TimeSpec>,
    pulses_sent: u64,
    sequences_completed: u64,
    send_timeout: Duration,
}

impl PulseDriver {
    /// Set the configured rates and create the TX stream.
    pub fn new(
        usrp: &mut Usrp,
        tx_channels: ChannelSet,
        rx_channels: ChannelSet,
    ) -> UsrpResult<Self> {
        let streams = usrp.options().streams.clone();
        let requested_tx_rate = usrp.options().rates.tx_sample_rate;
        let mut config = usrp.configurator();
        let tx_rate = config.set_tx_rate(&tx_channels)?;
        config.set_rx_rate(&rx_channels)?;
        let tx_stream =
            config.create_tx_stream(&streams.cpu_format, &streams.wire_format, &tx_channels)?;

        info!(tx = %tx_channels, rx = %rx_channels, tx_rate, "Pulse driver ready");
        Ok(Self {
            tx_stream,
            tx_channels,
            rx_channels,
            samples: Vec::new(),
            requested_tx_rate,
            tx_rate,
            tx_freq: None,
            rx_freq: None,
            sequence_start: None,
            pulses_sent: 0,
            sequences_completed: 0,
            send_timeout: Duration::from_millis(100),
        })
    }

    pub fn with_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Schedule and transmit one pulse.
    ///
    /// Packets that break the sequence rules are rejected before anything
    /// changes on the device or in the driver.
    pub fn handle_packet(
        &mut self,
        usrp: &mut Usrp,
        packet: &DriverPacket,
    ) -> UsrpResult<PulseOutcome> {
        let timer = MonotonicTimer::start();
        let channels = self.check_packet(packet)?;
        let fresh = packet.has_samples().then(|| packet.samples());

        let mut receive = None;
        let start = match self.sequence_start {
            Some(start) => start,
            None => {
                let start = self.open_sequence(usrp, packet, channels)?;
                if packet.numberofreceivesamples > 0 {
                    receive = Some(ReceiveRequest {
                        start,
                        num_samps: packet.numberofreceivesamples as usize,
                    });
                }
                start
            }
        };
        if let Some(samples) = fresh {
            self.samples = samples;
        }

        let pulse_time = start + Duration::from_micros(packet.timetosendsamples);
        if let Err(e) = self.transmit(usrp, packet, pulse_time) {
            warn!(error = %e, %pulse_time, "Pulse failed, closing sequence");
            self.sequence_start = None;
            return Err(e);
        }

        self.pulses_sent += 1;
        if packet.eob {
            self.sequence_start = None;
            self.sequences_completed += 1;
        }
        debug!(
            %pulse_time,
            sob = packet.sob,
            eob = packet.eob,
            elapsed_us = timer.elapsed_micros(),
            "Pulse scheduled"
        );
        Ok(PulseOutcome { pulse_time, receive })
    }

    /// Forget the open sequence, if any.
    pub fn abort_sequence(&mut self) {
        if self.sequence_start.take().is_some() {
            warn!("Sequence aborted");
        }
    }

    fn check_packet(&self, packet: &DriverPacket) -> UsrpResult<ChannelSet> {
        packet.validate()?;
        let channels = ChannelSet::try_from(packet.channels.as_slice())?;

        match (packet.sob, self.sequence_start) {
            (true, Some(start)) => {
                return Err(UsrpError::config(format!(
                    "start of burst while the sequence started at {} is still open",
                    start
                )));
            }
            (false, None) => return Err(UsrpError::config("pulse without an open sequence")),
            _ => {}
        }
        if !packet.sob && channels != self.tx_channels {
            return Err(UsrpError::config(format!(
                "channels {} differ from {} within a sequence",
                channels, self.tx_channels
            )));
        }

        if packet.has_samples() {
            if packet.channel_samples[0].is_empty() {
                return Err(UsrpError::config("pulse samples are empty"));
            }
        } else if self.samples.len() != channels.len() {
            return Err(UsrpError::config(format!(
                "no cached samples for channels {}",
                channels
            )));
        }
        Ok(channels)
    }

    fn open_sequence(
        &mut self,
        usrp: &mut Usrp,
        packet: &DriverPacket,
        channels: ChannelSet,
    ) -> UsrpResult<TimeSpec> {
        let timing = usrp.options().timing.clone();
        let streams = usrp.options().streams.clone();

        let new_channels = channels != self.tx_channels;
        let rate = if packet.txrate > 0.0 {
            packet.txrate
        } else {
            self.requested_tx_rate
        };
        let new_rate = (rate - self.requested_tx_rate).abs() > RATE_TOLERANCE_HZ;
        let tx_freq = (packet.txcenterfreq > 0.0
            && (new_channels || self.tx_freq != Some(packet.txcenterfreq)))
        .then_some(packet.txcenterfreq);
        let rx_freq = (packet.rxcenterfreq > 0.0 && self.rx_freq != Some(packet.rxcenterfreq))
            .then_some(packet.rxcenterfreq);

        {
            let config = usrp.configurator();
            if new_channels || new_rate {
                config.check_rate(StreamDirection::Tx, rate, &channels)?;
            }
            if let Some(freq) = tx_freq {
                config.check_center_freq(StreamDirection::Tx, freq, &channels)?;
            }
            if let Some(freq) = rx_freq {
                config.check_center_freq(StreamDirection::Rx, freq, &self.rx_channels)?;
            }
        }

        let mut config = usrp.configurator();
        if new_channels || new_rate {
            self.tx_rate = config.set_tx_rate_to(rate, &channels)?;
            self.requested_tx_rate = rate;
        }
        if new_channels {
            self.tx_stream =
                config.create_tx_stream(&streams.cpu_format, &streams.wire_format, &channels)?;
            self.tx_channels = channels;
            self.tx_freq = None;
        }
        if let Some(freq) = tx_freq {
            config.set_tx_center_freq(freq, &self.tx_channels, timing.tune_delay())?;
            self.tx_freq = Some(freq);
        }
        if let Some(freq) = rx_freq {
            config.set_rx_center_freq(freq, &self.rx_channels, timing.tune_delay())?;
            self.rx_freq = Some(freq);
        }

        // Pulses must not start before a scheduled retune lands
        let retuned = tx_freq.is_some() || rx_freq.is_some();
        let lead = if retuned {
            timing.scheduling_delay().max(timing.tune_delay())
        } else {
            timing.scheduling_delay()
        };
        let now = usrp.scheduler().current_device_time()?;
        let start = now.time + lead;
        self.sequence_start = Some(start);
        debug!(%start, gps_locked = now.gps_locked, retuned, "Sequence opened");
        Ok(start)
    }

    fn transmit(
        &mut self,
        usrp: &mut Usrp,
        packet: &DriverPacket,
        pulse_time: TimeSpec,
    ) -> UsrpResult<()> {
        let buffs: Vec<&[IQSample]> = self.samples.iter().map(|b| b.as_slice()).collect();
        let expected = buffs.first().map_or(0, |b| b.len());
        let pulse_end = pulse_time + Duration::from_secs_f64(expected as f64 / self.tx_rate);
        let after = if packet.eob {
            AtrState::Idle
        } else {
            AtrState::RxOnly
        };

        let switched = Self::switch_antennas(usrp, pulse_time, pulse_end, after);
        let cleared = usrp.scheduler().clear_command_time();
        switched?;
        cleared?;

        let mut metadata = TxMetadata::new();
        metadata
            .set_start_of_burst(packet.sob)
            .set_end_of_burst(packet.eob)
            .set_time_spec(pulse_time);

        let sent = self.tx_stream.send(&buffs, &metadata, self.send_timeout)?;
        if sent != expected {
            return Err(
                StreamError::Submit(format!("sent {} of {} samples", sent, expected)).into(),
            );
        }
        Ok(())
    }

    fn switch_antennas(
        usrp: &mut Usrp,
        pulse_time: TimeSpec,
        pulse_end: TimeSpec,
        after: AtrState,
    ) -> UsrpResult<()> {
        usrp.scheduler().set_command_time(pulse_time)?;
        usrp.signals().apply(AtrState::FullDuplex)?;
        usrp.scheduler().set_command_time(pulse_end)?;
        usrp.signals().apply(after)
    }

    pub fn tx_channels(&self) -> &ChannelSet {
        &self.tx_channels
    }

    pub fn rx_channels(&self) -> &ChannelSet {
        &self.rx_channels
    }

    /// Achieved TX rate
    pub fn tx_rate(&self) -> f64 {
        self.tx_rate
    }

    pub fn sequence_start(&self) -> Option<TimeSpec> {
        self.sequence_start
    }

    pub fn is_sequence_open(&self) -> bool {
        self.sequence_start.is_some()
    }

    pub fn pulses_sent(&self) -> u64 {
        self.pulses_sent
    }

    pub fn sequences_completed(&self) -> u64 {
        self.sequences_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{GpioAttr, SimCommandKind, SimConfig, SimHandle, SimUsrp};
    use darn_core::sequence::{make_pulse, PulseSequence};
    use darn_core::DriverOptions;

    fn setup() -> (Usrp, SimHandle, PulseDriver) {
        let dev = Box::new(SimUsrp::new(SimConfig::with_mboards(2)));
        let handle = dev.handle();
        let mut usrp = Usrp::new(dev, None, DriverOptions::default()).unwrap();
        let channels = ChannelSet::first(2).unwrap();
        let driver = PulseDriver::new(&mut usrp, channels.clone(), channels).unwrap();
        handle.clear_commands();
        (usrp, handle, driver)
    }

    fn pulse() -> IQBuffer {
        make_pulse(5.0e6, &[1.0e5], Duration::from_micros(300), Duration::from_micros(10))
    }

    fn seven_pulse_packets(tx_rate: f64) -> (PulseSequence, Vec<DriverPacket>) {
        let seq = PulseSequence::seven_pulse(1500);
        let packets = seq.packets(&[0, 1], &pulse(), tx_rate, 12.0e6, 14.0e6, 1000);
        (seq, packets)
    }

    #[test]
    fn test_seven_pulse_sequence() {
        let (mut usrp, handle, mut driver) = setup();
        let (seq, packets) = seven_pulse_packets(5.0e6);

        let outcomes: Vec<PulseOutcome> = packets
            .iter()
            .map(|p| driver.handle_packet(&mut usrp, p).unwrap())
            .collect();

        // Frozen clock at zero, retune on the first packet sets the lead
        let start = TimeSpec::ZERO + Duration::from_micros(100_000);
        let expected: Vec<TimeSpec> = (0..seq.len())
            .map(|i| start + Duration::from_micros(seq.time_to_send_us(i).unwrap()))
            .collect();
        let times: Vec<TimeSpec> = outcomes.iter().map(|o| o.pulse_time).collect();
        assert_eq!(times, expected);

        assert_eq!(
            outcomes[0].receive,
            Some(ReceiveRequest { start, num_samps: 1000 })
        );
        assert!(outcomes[1..].iter().all(|o| o.receive.is_none()));

        let records = handle.tx_records();
        assert_eq!(records.len(), 7);
        let sob: Vec<usize> = (0..7).filter(|&i| records[i].start_of_burst).collect();
        let eob: Vec<usize> = (0..7).filter(|&i| records[i].end_of_burst).collect();
        assert_eq!(sob, vec![0]);
        assert_eq!(eob, vec![6]);
        for (record, time) in records.iter().zip(&expected) {
            assert_eq!(record.time, Some(*time));
            assert_eq!(record.num_channels, 2);
            assert_eq!(record.num_samps, 1500);
        }

        // Two boards, two banks: four timed OUT writes per edge
        let gpio: Vec<(Option<TimeSpec>, u32)> = handle
            .commands()
            .into_iter()
            .filter_map(|c| match c.kind {
                SimCommandKind::Gpio {
                    attr: GpioAttr::Out,
                    value,
                    ..
                } => Some((c.time, value)),
                _ => None,
            })
            .collect();
        assert_eq!(gpio.len(), 56);
        let width = Duration::from_secs_f64(1500.0 / 5.0e6);
        for (i, (chunk, time)) in gpio.chunks(8).zip(&expected).enumerate() {
            let end = Some(*time + width);
            assert!(chunk[..4].iter().all(|(t, _)| *t == Some(*time)));
            assert!(chunk[4..].iter().all(|(t, _)| *t == end));
            // High bank on both boards, then low bank
            let after: Vec<u32> = chunk[4..].iter().map(|(_, v)| *v).collect();
            if i == 6 {
                assert_eq!(after, vec![0x00, 0x00, 0x07, 0x07]);
            } else {
                assert_eq!(after, vec![0x04, 0x04, 0x03, 0x03]);
            }
        }

        assert_eq!(handle.command_time(), None);
        assert!(!driver.is_sequence_open());
        assert_eq!(driver.pulses_sent(), 7);
        assert_eq!(driver.sequences_completed(), 1);
    }

    #[test]
    fn test_banks_idle_after_end_of_burst() {
        let (mut usrp, _handle, mut driver) = setup();
        usrp.signals().program_banks().unwrap();
        let (_, packets) = seven_pulse_packets(5.0e6);

        driver.handle_packet(&mut usrp, &packets[0]).unwrap();
        assert_eq!(usrp.signals().read_bank_high_state().unwrap(), vec![0x04, 0x04]);

        for p in &packets[1..] {
            driver.handle_packet(&mut usrp, p).unwrap();
        }
        let role_lines = usrp.signals().masks().role_lines();
        assert_eq!(usrp.signals().read_bank_high_state().unwrap(), vec![0, 0]);
        assert_eq!(
            usrp.signals().read_bank_low_state().unwrap(),
            vec![role_lines, role_lines]
        );
    }

    #[test]
    fn test_out_of_range_sob_changes_nothing() {
        let (mut usrp, handle, mut driver) = setup();
        let mut packet = PulseSequence::new(vec![0], 1500)
            .packets(&[1], &pulse(), 2.5e6, 12.0e6, 14.0e6, 0)
            .remove(0);
        packet.rxcenterfreq = 45.0e6;

        let err = driver.handle_packet(&mut usrp, &packet).unwrap_err();
        assert!(matches!(err, UsrpError::Configuration(_)));
        assert!(handle.commands().is_empty());
        assert!(handle.tx_records().is_empty());
        assert_eq!(driver.tx_channels().as_slice(), &[0, 1]);
        assert_eq!(driver.tx_rate(), 5.0e6);
        assert!(!driver.is_sequence_open());

        packet.rxcenterfreq = 14.0e6;
        driver.handle_packet(&mut usrp, &packet).unwrap();
        assert_eq!(driver.tx_channels().as_slice(), &[1]);
        assert_eq!(driver.tx_rate(), 2.5e6);
    }

    #[test]
    fn test_quantized_rate_not_reapplied() {
        let (mut usrp, handle, mut driver) = setup();
        // 100 MHz / round(100 MHz / 3 MHz) lands on 3.0303 MHz
        let (_, packets) = seven_pulse_packets(3.0e6);
        let tx_rates = || {
            handle
                .commands()
                .iter()
                .filter(|c| {
                    matches!(
                        c.kind,
                        SimCommandKind::Rate {
                            direction: StreamDirection::Tx,
                            ..
                        }
                    )
                })
                .count()
        };

        for p in &packets {
            driver.handle_packet(&mut usrp, p).unwrap();
        }
        assert_eq!(tx_rates(), 2);
        assert!((driver.tx_rate() - 100.0e6 / 33.0).abs() < 1e-6);

        for p in &packets {
            driver.handle_packet(&mut usrp, p).unwrap();
        }
        assert_eq!(tx_rates(), 2);
    }

    #[test]
    fn test_pulse_without_sequence_rejected() {
        let (mut usrp, handle, mut driver) = setup();
        let (_, packets) = seven_pulse_packets(5.0e6);

        let err = driver.handle_packet(&mut usrp, &packets[1]).unwrap_err();
        assert!(matches!(err, UsrpError::Configuration(_)));
        assert!(handle.tx_records().is_empty());
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_sob_while_open_rejected() {
        let (mut usrp, handle, mut driver) = setup();
        let (_, packets) = seven_pulse_packets(5.0e6);

        driver.handle_packet(&mut usrp, &packets[0]).unwrap();
        let start = driver.sequence_start();
        let err = driver.handle_packet(&mut usrp, &packets[0]).unwrap_err();
        assert!(matches!(err, UsrpError::Configuration(_)));
        assert_eq!(driver.sequence_start(), start);
        assert_eq!(driver.pulses_sent(), 1);
        assert_eq!(handle.tx_records().len(), 1);

        driver.abort_sequence();
        assert!(driver.handle_packet(&mut usrp, &packets[0]).is_ok());
    }

    #[test]
    fn test_missing_samples_rejected() {
        let (mut usrp, handle, mut driver) = setup();
        let packets =
            PulseSequence::seven_pulse(1500).packets(&[0, 1], &[], 5.0e6, 12.0e6, 14.0e6, 0);

        let err = driver.handle_packet(&mut usrp, &packets[0]).unwrap_err();
        assert!(err.to_string().contains("no cached samples"));
        assert!(!driver.is_sequence_open());
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_channel_change_within_sequence_rejected() {
        let (mut usrp, _handle, mut driver) = setup();
        let (_, packets) = seven_pulse_packets(5.0e6);
        driver.handle_packet(&mut usrp, &packets[0]).unwrap();

        let mut moved = packets[1].clone();
        moved.channels = vec![1];
        let err = driver.handle_packet(&mut usrp, &moved).unwrap_err();
        assert!(err.to_string().contains("within a sequence"));
        assert!(driver.is_sequence_open());
    }

    #[test]
    fn test_second_sequence_changes_rate_without_retune() {
        let (mut usrp, handle, mut driver) = setup();
        let (_, packets) = seven_pulse_packets(5.0e6);
        for p in &packets {
            driver.handle_packet(&mut usrp, p).unwrap();
        }
        handle.clear_commands();

        let (_, packets) = seven_pulse_packets(2.5e6);
        let outcome = driver.handle_packet(&mut usrp, &packets[0]).unwrap();
        assert_eq!(driver.tx_rate(), 2.5e6);

        let log = handle.commands();
        let rates: Vec<f64> = log
            .iter()
            .filter_map(|c| match c.kind {
                SimCommandKind::Rate { direction: StreamDirection::Tx, rate, .. } => Some(rate),
                _ => None,
            })
            .collect();
        assert_eq!(rates, vec![2.5e6, 2.5e6]);
        assert!(!log.iter().any(|c| matches!(c.kind, SimCommandKind::Tune { .. })));

        // No retune, so only the scheduling delay leads the sequence
        assert_eq!(outcome.pulse_time, TimeSpec::ZERO + Duration::from_micros(50_000));
    }

    #[test]
    fn test_cached_samples_reused() {
        let (mut usrp, handle, mut driver) = setup();
        let (_, packets) = seven_pulse_packets(5.0e6);
        for p in &packets {
            driver.handle_packet(&mut usrp, p).unwrap();
        }

        let bare =
            PulseSequence::new(vec![0, 4], 1500).packets(&[0, 1], &[], 5.0e6, 12.0e6, 14.0e6, 0);
        for p in &bare {
            driver.handle_packet(&mut usrp, p).unwrap();
        }
        let records = handle.tx_records();
        assert_eq!(records.len(), 9);
        assert!(records.iter().all(|r| r.num_samps == 1500));
    }

    #[test]
    fn test_sob_with_new_channels_recreates_stream() {
        let (mut usrp, handle, mut driver) = setup();
        let packets =
            PulseSequence::new(vec![0], 1500).packets(&[1], &pulse(), 5.0e6, 12.0e6, 14.0e6, 0);

        driver.handle_packet(&mut usrp, &packets[0]).unwrap();
        assert_eq!(driver.tx_channels().as_slice(), &[1]);
        let records = handle.tx_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].num_channels, 1);
    }
}
