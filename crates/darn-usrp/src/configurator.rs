//! # Device Configuration
//!
//! Clocking, subdevice mapping, sample rates, tuning, reference lock and
//! stream creation for every motherboard of a device.
//!
//! Rates and frequencies are quantized by the hardware. Every setter returns
//! the achieved value, and callers must do timing math with that value
//! rather than with what they asked for.
//!
//! ## Typical bring-up
//!
//! ```rust,ignore
//! let mut usrp = Usrp::new(Box::new(device), None, options)?;
//! let mut config = usrp.configurator();
//! config.set_clock_source("external")?;
//! config.set_time_source("external", "")?;
//! config.set_tx_subdev("A:A")?;
//! config.set_main_rx_subdev("A:A")?;
//! config.set_interferometer_rx_subdev("A:B", 4)?;
//! let tx_rate = config.set_tx_rate(&tx_channels)?;
//! config.set_tx_center_freq(12.0e6, &tx_channels, tune_delay)?;
//! config.check_reference_lock()?;
//! ```

use crate::channels::ChannelSet;
use crate::error::{UsrpError, UsrpResult};
use crate::hal::{GpsClock, RxStream, StreamArgs, StreamDirection, TxStream, UsrpDevice};
use crate::scheduler::CommandContext;
use darn_core::{CpuFormat, DriverOptions, TimeSpec, WireFormat};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rates closer than this are the same rate.
const RATE_TOLERANCE_HZ: f64 = 1e-6;

/// Configuration operations on one device.
pub struct DeviceConfigurator<'a> {
    device: &'a mut dyn UsrpDevice,
    gps: Option<&'a dyn GpsClock>,
    options: &'a DriverOptions,
    context: &'a CommandContext,
}

impl<'a> DeviceConfigurator<'a> {
    pub fn new(
        device: &'a mut dyn UsrpDevice,
        gps: Option<&'a dyn GpsClock>,
        options: &'a DriverOptions,
        context: &'a CommandContext,
    ) -> Self {
        Self {
            device,
            gps,
            options,
            context,
        }
    }

    // =========================================================================
    // Clocking
    // =========================================================================

    /// Select the reference clock on every board.
    pub fn set_clock_source(&mut self, source: &str) -> UsrpResult<()> {
        for mboard in 0..self.device.num_mboards() {
            if !self.device.clock_sources(mboard).iter().any(|s| s == source) {
                return Err(UsrpError::config(format!(
                    "clock source {} not supported by motherboard {}",
                    source, mboard
                )));
            }
            self.device.set_clock_source(source, mboard)?;
        }
        info!(source, "Set clock source");
        Ok(())
    }

    /// Select the PPS source on every board and align device time.
    ///
    /// With `"external"` the device time is set to the GPS second after the
    /// next PPS edge, which needs an attached GPS clock. Any other source
    /// resets the device time to zero.
    pub fn set_time_source(&mut self, source: &str, clock_addr: &str) -> UsrpResult<()> {
        for mboard in 0..self.device.num_mboards() {
            if !self.device.time_sources(mboard).iter().any(|s| s == source) {
                return Err(UsrpError::config(format!(
                    "time source {} not supported by motherboard {}",
                    source, mboard
                )));
            }
            self.device.set_time_source(source, mboard)?;
        }

        if source == "external" {
            let gps = self.gps.ok_or_else(|| {
                UsrpError::config(format!(
                    "external time source needs a GPS clock (clock_addr {:?})",
                    clock_addr
                ))
            })?;
            let gps_time = gps.gps_time()?;
            self.device.set_time_next_pps(TimeSpec::new(gps_time + 1, 0.0))?;
            info!(
                source,
                clock_addr,
                gps_time = gps_time + 1,
                "Aligned device time to GPS at next PPS"
            );
        } else {
            self.device.set_time_now(TimeSpec::ZERO)?;
            info!(source, "Reset device time to zero");
        }
        Ok(())
    }

    /// Wait for every board's reference lock, within the configured retry budget.
    pub fn check_reference_lock(&mut self) -> UsrpResult<()> {
        let retries = self.options.timing.lock_retries;
        let interval = self.options.timing.lock_poll_interval();
        for mboard in 0..self.device.num_mboards() {
            let mut locked = false;
            for attempt in 1..=retries {
                if self.device.mboard_sensor("ref_locked", mboard)? {
                    locked = true;
                    debug!(mboard, attempt, "Reference locked");
                    break;
                }
                if attempt < retries {
                    std::thread::sleep(interval);
                }
            }
            if !locked {
                return Err(UsrpError::hardware(format!(
                    "motherboard {} reference not locked after {} polls",
                    mboard, retries
                )));
            }
        }
        info!("Reference locked on all motherboards");
        Ok(())
    }

    /// GPS lock of the reference clock; false if none is attached or it does not answer.
    pub fn gps_locked(&self) -> bool {
        match self.gps {
            Some(gps) => gps.is_locked().unwrap_or_else(|e| {
                warn!(error = %e, "GPS lock query failed");
                false
            }),
            None => false,
        }
    }

    // =========================================================================
    // Subdevices
    // =========================================================================

    pub fn set_tx_subdev(&mut self, spec: &str) -> UsrpResult<()> {
        for mboard in 0..self.device.num_mboards() {
            self.apply_subdev(StreamDirection::Tx, spec, mboard)?;
        }
        info!(spec, "Set TX subdevice");
        Ok(())
    }

    pub fn set_main_rx_subdev(&mut self, spec: &str) -> UsrpResult<()> {
        for mboard in 0..self.device.num_mboards() {
            self.apply_subdev(StreamDirection::Rx, spec, mboard)?;
        }
        info!(spec, "Set main RX subdevice");
        Ok(())
    }

    /// Append `spec` to the RX spec in force on the first `antenna_count` boards.
    ///
    /// Repeating the call with the same `spec` leaves the mapping unchanged.
    pub fn set_interferometer_rx_subdev(
        &mut self,
        spec: &str,
        antenna_count: usize,
    ) -> UsrpResult<()> {
        let boards = self.device.num_mboards();
        if antenna_count > boards {
            return Err(UsrpError::config(format!(
                "{} interferometer antennas but only {} motherboards",
                antenna_count, boards
            )));
        }
        let mut combined = Vec::with_capacity(antenna_count);
        for mboard in 0..antenna_count {
            let current = self.device.subdev_spec(StreamDirection::Rx, mboard)?;
            combined.push(append_subdev(&current, spec, mboard)?);
        }
        for (mboard, full) in combined.iter().enumerate() {
            self.apply_subdev(StreamDirection::Rx, full, mboard)?;
        }
        info!(spec, antenna_count, "Set interferometer RX subdevice");
        Ok(())
    }

    fn apply_subdev(
        &mut self,
        direction: StreamDirection,
        spec: &str,
        mboard: usize,
    ) -> UsrpResult<()> {
        let frontends = self.device.frontends(direction, mboard);
        let mut tokens = spec.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Err(UsrpError::config(format!("empty {} subdevice spec", direction)));
        }
        for token in tokens {
            if !is_frontend_token(token) || !frontends.iter().any(|f| f == token) {
                return Err(UsrpError::config(format!(
                    "{} subdevice {} not available on motherboard {}",
                    direction, token, mboard
                )));
            }
        }
        self.device.set_subdev_spec(direction, spec, mboard)
    }

    // =========================================================================
    // Rates
    // =========================================================================

    /// Request the configured TX rate; returns the achieved rate.
    pub fn set_tx_rate(&mut self, channels: &ChannelSet) -> UsrpResult<f64> {
        self.set_rate(StreamDirection::Tx, self.options.rates.tx_sample_rate, channels)
    }

    /// Request the configured RX rate; returns the achieved rate.
    pub fn set_rx_rate(&mut self, channels: &ChannelSet) -> UsrpResult<f64> {
        self.set_rate(StreamDirection::Rx, self.options.rates.rx_sample_rate, channels)
    }

    /// Request an explicit TX rate; returns the achieved rate.
    pub fn set_tx_rate_to(&mut self, rate: f64, channels: &ChannelSet) -> UsrpResult<f64> {
        self.set_rate(StreamDirection::Tx, rate, channels)
    }

    /// Request an explicit RX rate; returns the achieved rate.
    pub fn set_rx_rate_to(&mut self, rate: f64, channels: &ChannelSet) -> UsrpResult<f64> {
        self.set_rate(StreamDirection::Rx, rate, channels)
    }

    pub fn get_tx_rate(&self, channel: usize) -> UsrpResult<f64> {
        self.device.rate(StreamDirection::Tx, channel)
    }

    pub fn get_rx_rate(&self, channel: usize) -> UsrpResult<f64> {
        self.device.rate(StreamDirection::Rx, channel)
    }

    /// Check that every channel accepts `rate` without touching the device.
    pub fn check_rate(
        &self,
        direction: StreamDirection,
        rate: f64,
        channels: &ChannelSet,
    ) -> UsrpResult<()> {
        channels.check_range(direction, self.device.num_channels(direction))?;
        if !(rate > 0.0) {
            return Err(UsrpError::config(format!(
                "{} rate must be positive, got {}",
                direction, rate
            )));
        }
        for ch in channels.iter() {
            let (min, max) = self.device.rate_range(direction, ch)?;
            if rate < min || rate > max {
                return Err(UsrpError::config(format!(
                    "{} rate {} Hz outside [{}, {}] on channel {}",
                    direction, rate, min, max, ch
                )));
            }
        }
        Ok(())
    }

    fn set_rate(
        &mut self,
        direction: StreamDirection,
        rate: f64,
        channels: &ChannelSet,
    ) -> UsrpResult<f64> {
        self.check_rate(direction, rate, channels)?;
        for ch in channels.iter() {
            self.device.set_rate(direction, rate, ch)?;
        }

        let mut achieved: Option<f64> = None;
        for ch in channels.iter() {
            let actual = self.device.rate(direction, ch)?;
            match achieved {
                Some(first) if (first - actual).abs() > RATE_TOLERANCE_HZ => {
                    return Err(UsrpError::config(format!(
                        "{} channels settled on different rates: {} Hz and {} Hz",
                        direction, first, actual
                    )));
                }
                Some(_) => {}
                None => achieved = Some(actual),
            }
        }
        let achieved = achieved.ok_or_else(|| UsrpError::config("channel set is empty"))?;
        info!(%direction, requested = rate, achieved, channels = %channels, "Set sample rate");
        Ok(achieved)
    }

    // =========================================================================
    // Tuning
    // =========================================================================

    /// Tune TX channels; returns the achieved frequency.
    ///
    /// A non-zero `tune_delay` issues every retune under one command time so
    /// the channels change together.
    pub fn set_tx_center_freq(
        &mut self,
        freq: f64,
        channels: &ChannelSet,
        tune_delay: Duration,
    ) -> UsrpResult<f64> {
        self.set_center_freq(StreamDirection::Tx, freq, channels, tune_delay)
    }

    /// Tune RX channels; returns the achieved frequency.
    pub fn set_rx_center_freq(
        &mut self,
        freq: f64,
        channels: &ChannelSet,
        tune_delay: Duration,
    ) -> UsrpResult<f64> {
        self.set_center_freq(StreamDirection::Rx, freq, channels, tune_delay)
    }

    pub fn get_tx_center_freq(&self, channel: usize) -> UsrpResult<f64> {
        self.device.center_freq(StreamDirection::Tx, channel)
    }

    pub fn get_rx_center_freq(&self, channel: usize) -> UsrpResult<f64> {
        self.device.center_freq(StreamDirection::Rx, channel)
    }

    /// Check that every channel can tune to `freq` without touching the device.
    pub fn check_center_freq(
        &self,
        direction: StreamDirection,
        freq: f64,
        channels: &ChannelSet,
    ) -> UsrpResult<()> {
        channels.check_range(direction, self.device.num_channels(direction))?;
        for ch in channels.iter() {
            let (min, max) = self.device.freq_range(direction, ch)?;
            if !(freq >= min && freq <= max) {
                return Err(UsrpError::config(format!(
                    "{} frequency {} Hz outside [{}, {}] on channel {}",
                    direction, freq, min, max, ch
                )));
            }
        }
        Ok(())
    }

    fn set_center_freq(
        &mut self,
        direction: StreamDirection,
        freq: f64,
        channels: &ChannelSet,
        tune_delay: Duration,
    ) -> UsrpResult<f64> {
        self.check_center_freq(direction, freq, channels)?;

        let timed = !tune_delay.is_zero();
        if timed {
            let tune_time = self.device.time_now(0)? + tune_delay;
            self.device.set_command_time(tune_time)?;
            debug!(%direction, %tune_time, "Scheduling retune");
        }

        let tuned = self.tune_channels(direction, freq, channels);

        if timed {
            // Put back whatever command time the scheduler had set
            let restored = match self.context.time() {
                Some(t) => self.device.set_command_time(t),
                None => self.device.clear_command_time(),
            };
            if let Err(e) = restored {
                return Err(tuned.err().unwrap_or(e));
            }
        }

        let achieved = tuned?;
        info!(%direction, requested = freq, achieved, channels = %channels, "Set center frequency");
        Ok(achieved)
    }

    fn tune_channels(
        &mut self,
        direction: StreamDirection,
        freq: f64,
        channels: &ChannelSet,
    ) -> UsrpResult<f64> {
        let mut achieved = None;
        for ch in channels.iter() {
            let actual = self.device.set_center_freq(direction, freq, ch)?;
            achieved.get_or_insert(actual);
        }
        achieved.ok_or_else(|| UsrpError::config("channel set is empty"))
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Create the TX stream. An earlier TX stream stops working.
    pub fn create_tx_stream(
        &mut self,
        cpu_format: &str,
        wire_format: &str,
        channels: &ChannelSet,
    ) -> UsrpResult<Box<dyn TxStream>> {
        let args = self.stream_args(StreamDirection::Tx, cpu_format, wire_format, channels)?;
        let stream = self.device.create_tx_stream(&args)?;
        info!(cpu_format, wire_format, channels = %channels, "Created TX stream");
        Ok(stream)
    }

    /// Create the RX stream. An earlier RX stream stops working.
    pub fn create_rx_stream(
        &mut self,
        cpu_format: &str,
        wire_format: &str,
        channels: &ChannelSet,
    ) -> UsrpResult<Box<dyn RxStream>> {
        let args = self.stream_args(StreamDirection::Rx, cpu_format, wire_format, channels)?;
        let stream = self.device.create_rx_stream(&args)?;
        info!(cpu_format, wire_format, channels = %channels, "Created RX stream");
        Ok(stream)
    }

    fn stream_args(
        &self,
        direction: StreamDirection,
        cpu_format: &str,
        wire_format: &str,
        channels: &ChannelSet,
    ) -> UsrpResult<StreamArgs> {
        let cpu = CpuFormat::parse(cpu_format)
            .ok_or_else(|| UsrpError::config(format!("unsupported CPU format: {}", cpu_format)))?;
        let wire = WireFormat::parse(wire_format)
            .ok_or_else(|| UsrpError::config(format!("unsupported wire format: {}", wire_format)))?;
        channels.check_range(direction, self.device.num_channels(direction))?;
        Ok(StreamArgs {
            cpu_format: cpu,
            wire_format: wire,
            channels: channels.as_slice().to_vec(),
        })
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Multi-line summary of boards, subdevices, rates and frequencies.
    pub fn describe(
        &self,
        tx_channels: &ChannelSet,
        rx_channels: &ChannelSet,
    ) -> UsrpResult<String> {
        let mut out = String::new();
        let boards = self.device.num_mboards();
        // Writing to a String cannot fail
        let _ = writeln!(out, "Device: {}", self.device.name());
        let _ = writeln!(out, "  Motherboards: {}", boards);
        for mboard in 0..boards {
            let _ = writeln!(
                out,
                "  Board {}: TX subdev \"{}\", RX subdev \"{}\"",
                mboard,
                self.device.subdev_spec(StreamDirection::Tx, mboard)?,
                self.device.subdev_spec(StreamDirection::Rx, mboard)?
            );
        }
        for ch in tx_channels.iter() {
            let _ = writeln!(
                out,
                "  TX channel {}: rate {:.3} Msps, freq {:.6} MHz",
                ch,
                self.get_tx_rate(ch)? / 1e6,
                self.get_tx_center_freq(ch)? / 1e6
            );
        }
        for ch in rx_channels.iter() {
            let _ = writeln!(
                out,
                "  RX channel {}: rate {:.3} Msps, freq {:.6} MHz",
                ch,
                self.get_rx_rate(ch)? / 1e6,
                self.get_rx_center_freq(ch)? / 1e6
            );
        }
        let _ = writeln!(out, "  GPS locked: {}", self.gps_locked());
        Ok(out)
    }
}

/// Main spec of `current` followed by `extra`, dropping an earlier copy of
/// `extra` at the end. The same front end may not appear twice.
fn append_subdev(current: &str, extra: &str, mboard: usize) -> UsrpResult<String> {
    let mut main: Vec<&str> = current.split_whitespace().collect();
    let extra: Vec<&str> = extra.split_whitespace().collect();
    if extra.is_empty() {
        return Err(UsrpError::config("empty interferometer subdevice spec"));
    }
    if main.len() > extra.len() && main.ends_with(&extra) {
        main.truncate(main.len() - extra.len());
    }
    if main.is_empty() {
        return Err(UsrpError::config(format!(
            "no main RX subdevice set on motherboard {}",
            mboard
        )));
    }

    let tokens: Vec<&str> = main.into_iter().chain(extra).collect();
    for (i, token) in tokens.iter().enumerate() {
        if tokens[..i].contains(token) {
            return Err(UsrpError::config(format!(
                "front end {} mapped twice on motherboard {}",
                token, mboard
            )));
        }
    }
    Ok(tokens.join(" "))
}

/// `DB:FE`, both parts non-empty.
fn is_frontend_token(token: &str) -> bool {
    match token.split_once(':') {
        Some((db, fe)) => !db.is_empty() && !fe.is_empty() && !fe.contains(':'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::hal::{SimCommandKind, SimConfig, SimGpsClock, SimUsrp};
    use crate::metadata::TxMetadata;
    use darn_core::IQSample;

    fn options() -> DriverOptions {
        let mut options = DriverOptions::default();
        options.timing.lock_poll_interval_ms = 0;
        options.timing.lock_retries = 3;
        options
    }

    fn chans(list: &[usize]) -> ChannelSet {
        ChannelSet::new(list.to_vec()).unwrap()
    }

    #[test]
    fn test_clock_source() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(2));
        let handle = dev.handle();
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        config.set_clock_source("external").unwrap();
        assert_eq!(handle.clock_source(1).as_deref(), Some("external"));

        let err = config.set_clock_source("rubidium").unwrap_err();
        assert!(matches!(err, UsrpError::Configuration(_)));
    }

    #[test]
    fn test_time_source_aligns_to_gps() {
        let mut dev = SimUsrp::default();
        let handle = dev.handle();
        let gps = SimGpsClock::new(true, 1_000);
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, Some(&gps), &options, &context);

        config.set_time_source("external", "192.168.10.3").unwrap();
        assert_eq!(handle.time_source(0).as_deref(), Some("external"));
        assert_eq!(handle.now(), TimeSpec::new(1_001, 0.0));
        assert!(handle
            .commands()
            .iter()
            .any(|c| c.kind == SimCommandKind::SetTimeNextPps(TimeSpec::new(1_001, 0.0))));
        assert!(config.gps_locked());
    }

    #[test]
    fn test_time_source_without_gps() {
        let mut dev = SimUsrp::default();
        let handle = dev.handle();
        handle.advance(Duration::from_secs(5));
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        assert!(config.set_time_source("external", "").is_err());
        config.set_time_source("internal", "").unwrap();
        assert_eq!(handle.now(), TimeSpec::ZERO);
        assert!(!config.gps_locked());
    }

    #[test]
    fn test_gps_query_failure_reads_unlocked() {
        let mut dev = SimUsrp::default();
        let gps = SimGpsClock::unreachable();
        let options = options();
        let context = CommandContext::default();
        let config = DeviceConfigurator::new(&mut dev, Some(&gps), &options, &context);
        assert!(!config.gps_locked());
    }

    #[test]
    fn test_interferometer_subdev() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(4));
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        config.set_main_rx_subdev("A:A").unwrap();
        config.set_interferometer_rx_subdev("A:B", 2).unwrap();
        assert!(config.set_interferometer_rx_subdev("A:B", 5).is_err());
        assert!(config.set_tx_subdev("A:A:A").is_err());
        assert!(config.set_tx_subdev("C:A").is_err());
        assert!(config.set_tx_subdev("  ").is_err());
        drop(config);

        assert_eq!(dev.subdev_spec(StreamDirection::Rx, 0).unwrap(), "A:A A:B");
        assert_eq!(dev.subdev_spec(StreamDirection::Rx, 1).unwrap(), "A:A A:B");
        assert_eq!(dev.subdev_spec(StreamDirection::Rx, 2).unwrap(), "A:A");
        assert_eq!(dev.num_channels(StreamDirection::Rx), 6);
    }

    #[test]
    fn test_interferometer_follows_applied_main_spec() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(2));
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        config.set_main_rx_subdev("A:B").unwrap();
        config.set_interferometer_rx_subdev("A:A", 1).unwrap();
        config.set_interferometer_rx_subdev("A:A", 1).unwrap();
        assert!(config.set_interferometer_rx_subdev("A:B", 2).is_err());
        drop(config);

        assert_eq!(dev.subdev_spec(StreamDirection::Rx, 0).unwrap(), "A:B A:A");
        assert_eq!(dev.subdev_spec(StreamDirection::Rx, 1).unwrap(), "A:B");
    }

    #[test]
    fn test_rate_is_idempotent() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(3));
        let mut options = options();
        options.rates.tx_sample_rate = 3.0e6;
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        let channels = chans(&[0, 1, 2]);
        let first = config.set_tx_rate(&channels).unwrap();
        let second = config.set_tx_rate(&channels).unwrap();
        assert_eq!(first, second);
        assert!((first - 100.0e6 / 33.0).abs() < 1e-6);
        assert_eq!(config.get_tx_rate(2).unwrap(), first);
    }

    #[test]
    fn test_rate_rejects_bad_channels() {
        let mut dev = SimUsrp::default();
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        let err = config.set_rx_rate(&chans(&[0, 1])).unwrap_err();
        assert!(matches!(err, UsrpError::Configuration(_)));
        assert!(config.set_rx_rate_to(-1.0, &chans(&[0])).is_err());
        assert!(config.set_rx_rate_to(1.0e3, &chans(&[0])).is_err());
    }

    #[test]
    fn test_range_checks_leave_device_untouched() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(2));
        let handle = dev.handle();
        let options = options();
        let context = CommandContext::default();
        let config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        let both = chans(&[0, 1]);
        assert!(config.check_rate(StreamDirection::Tx, 5.0e6, &both).is_ok());
        assert!(config.check_rate(StreamDirection::Tx, 200.0e6, &both).is_err());
        assert!(config.check_center_freq(StreamDirection::Rx, 12.0e6, &both).is_ok());
        assert!(config.check_center_freq(StreamDirection::Rx, 45.0e6, &both).is_err());
        assert!(config.check_center_freq(StreamDirection::Rx, 12.0e6, &chans(&[2])).is_err());
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_tune_round_trip_within_resolution() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(2));
        let resolution = SimConfig::default().tune_resolution_hz;
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        let requested = 12.345_678_9e6;
        let achieved = config
            .set_tx_center_freq(requested, &chans(&[0, 1]), Duration::ZERO)
            .unwrap();
        assert!((achieved - requested).abs() <= resolution);
        for ch in 0..2 {
            let readback = config.get_tx_center_freq(ch).unwrap();
            assert_eq!(readback, achieved);
            assert!((readback - requested).abs() <= resolution);
        }
    }

    #[test]
    fn test_delayed_tune_shares_command_time() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(3));
        let handle = dev.handle();
        handle.advance(Duration::from_secs(20));
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        config
            .set_rx_center_freq(14.0e6, &chans(&[0, 1, 2]), Duration::from_millis(100))
            .unwrap();

        let tunes: Vec<_> = handle
            .commands()
            .into_iter()
            .filter(|c| matches!(c.kind, SimCommandKind::Tune { .. }))
            .collect();
        assert_eq!(tunes.len(), 3);
        let expected = TimeSpec::new(20, 0.1);
        assert!(tunes.iter().all(|c| c.time == Some(expected)));
        assert_eq!(handle.command_time(), None);
    }

    #[test]
    fn test_delayed_tune_restores_scheduled_time() {
        let mut dev = SimUsrp::default();
        let handle = dev.handle();
        let pending = TimeSpec::new(9, 0.0);
        dev.set_command_time(pending).unwrap();
        let context = CommandContext::Scheduled(pending);
        let options = options();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        config
            .set_tx_center_freq(10.0e6, &chans(&[0]), Duration::from_millis(5))
            .unwrap();
        assert_eq!(handle.command_time(), Some(pending));
    }

    #[test]
    fn test_failed_tune_still_restores_context() {
        let mut dev = SimUsrp::default();
        let handle = dev.handle();
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        assert!(config
            .set_tx_center_freq(90.0e6, &chans(&[0]), Duration::from_millis(5))
            .is_err());
        assert_eq!(handle.command_time(), None);
    }

    #[test]
    fn test_reference_lock_within_budget() {
        let mut dev = SimUsrp::new(SimConfig {
            num_mboards: 2,
            ref_lock_after_polls: Some(2),
            ..Default::default()
        });
        let handle = dev.handle();
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        config.check_reference_lock().unwrap();
        assert_eq!(handle.lock_polls(), 4);
    }

    #[test]
    fn test_reference_lock_gives_up() {
        let mut dev = SimUsrp::new(SimConfig {
            ref_lock_after_polls: None,
            ..Default::default()
        });
        let handle = dev.handle();
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        let err = config.check_reference_lock().unwrap_err();
        assert!(matches!(err, UsrpError::HardwareFault(_)));
        assert_eq!(handle.lock_polls(), 3);
    }

    #[test]
    fn test_stream_creation() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(2));
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);

        assert!(config.create_tx_stream("fc16", "sc16", &chans(&[0])).is_err());
        assert!(config.create_tx_stream("fc32", "fc32", &chans(&[0])).is_err());
        assert!(config.create_rx_stream("fc32", "sc16", &chans(&[2])).is_err());

        let mut old = config.create_tx_stream("fc32", "sc16", &chans(&[0, 1])).unwrap();
        let mut new = config.create_tx_stream("fc32", "sc8", &chans(&[0, 1])).unwrap();
        let buf = vec![IQSample::new(0.5, 0.0); 8];
        let buffs = [buf.as_slice(), buf.as_slice()];

        let err = old.send(&buffs, &TxMetadata::new(), Duration::ZERO).unwrap_err();
        assert_eq!(err, UsrpError::Stream(StreamError::StaleHandle("tx")));
        assert_eq!(new.send(&buffs, &TxMetadata::new(), Duration::ZERO).unwrap(), 8);
    }

    #[test]
    fn test_describe() {
        let mut dev = SimUsrp::new(SimConfig::with_mboards(2));
        let options = options();
        let context = CommandContext::default();
        let mut config = DeviceConfigurator::new(&mut dev, None, &options, &context);
        config.set_tx_rate(&chans(&[0, 1])).unwrap();
        config.set_tx_center_freq(12.0e6, &chans(&[0, 1]), Duration::ZERO).unwrap();

        let text = config.describe(&chans(&[0, 1]), &chans(&[0])).unwrap();
        assert!(text.contains("Motherboards: 2"));
        assert!(text.contains("TX channel 1: rate 5.000 Msps, freq 12.000000 MHz"));
        assert!(text.contains("GPS locked: false"));
    }

    #[test]
    fn test_frontend_token_shape() {
        assert!(is_frontend_token("A:B"));
        assert!(is_frontend_token("A:AB"));
        assert!(!is_frontend_token("AB"));
        assert!(!is_frontend_token("A:"));
        assert!(!is_frontend_token("A:A:A"));
    }
}
