//! # Device Time Model
//!
//! Absolute hardware time for a radio device, and a monotonic host timer
//! for measuring how long the control path takes.
//!
//! Device time is kept as whole seconds plus a fractional part so that
//! timestamps far from the epoch keep sub-nanosecond resolution in the
//! fraction:
//!
//! ```text
//!   full_secs        frac_secs
//! ┌────────────┐ ┌──────────────────┐
//! │   i64 s    │ │ f64 in [0.0, 1.0)│
//! └────────────┘ └──────────────────┘
//!        │                │
//!        └─── to_ticks(tick_rate) ──► hardware tick count
//! ```
//!
//! ## Example
//!
//! ```rust
//! use darn_core::timing::TimeSpec;
//! use std::time::Duration;
//!
//! let now = TimeSpec::new(12, 0.75);
//! let pulse = now + Duration::from_micros(1500);
//! assert!(pulse > now);
//! assert_eq!(pulse.full_secs(), 12);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Sub};
use std::time::{Duration, Instant};

/// Absolute time on a device's free-running clock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeSpec {
    /// Whole seconds since the device epoch
    full_secs: i64,
    /// Fractional seconds, always in `[0.0, 1.0)`
    frac_secs: f64,
}

impl TimeSpec {
    /// The device epoch.
    pub const ZERO: TimeSpec = TimeSpec {
        full_secs: 0,
        frac_secs: 0.0,
    };

    /// Create a time from whole and fractional seconds.
    ///
    /// The fractional part may be outside `[0, 1)`; it is folded into the
    /// whole seconds.
    pub fn new(full_secs: i64, frac_secs: f64) -> Self {
        let carry = frac_secs.floor();
        let mut spec = Self {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        };
        // floor() of a value a hair below an integer can leave frac == 1.0
        if spec.frac_secs >= 1.0 {
            spec.full_secs += 1;
            spec.frac_secs -= 1.0;
        }
        spec
    }

    /// Create a time from real seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(0, secs)
    }

    /// Create a time from a tick count at the given tick rate.
    pub fn from_ticks(ticks: i64, tick_rate: f64) -> Self {
        let rate = tick_rate.round() as i64;
        if rate > 0 && (tick_rate - rate as f64).abs() < f64::EPSILON {
            let full = ticks.div_euclid(rate);
            let rem = ticks.rem_euclid(rate);
            Self::new(full, rem as f64 / tick_rate)
        } else {
            Self::from_secs_f64(ticks as f64 / tick_rate)
        }
    }

    /// Create a time from a host duration.
    pub fn from_duration(duration: Duration) -> Self {
        Self::new(
            duration.as_secs() as i64,
            duration.subsec_nanos() as f64 / 1e9,
        )
    }

    /// Whole seconds.
    #[inline]
    pub fn full_secs(&self) -> i64 {
        self.full_secs
    }

    /// Fractional seconds in `[0, 1)`.
    #[inline]
    pub fn frac_secs(&self) -> f64 {
        self.frac_secs
    }

    /// Real seconds (loses resolution far from the epoch).
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }

    /// Tick count at the given tick rate, rounded to the nearest tick.
    pub fn to_ticks(&self, tick_rate: f64) -> i64 {
        let whole = self.full_secs.saturating_mul(tick_rate.round() as i64);
        whole.saturating_add((self.frac_secs * tick_rate).round() as i64)
    }

    /// Signed distance to `other` in seconds (`self - other`).
    pub fn secs_since(&self, other: &TimeSpec) -> f64 {
        (self.full_secs - other.full_secs) as f64 + (self.frac_secs - other.frac_secs)
    }

    /// Time until `later`, or zero if `later` is not in the future.
    pub fn duration_until(&self, later: &TimeSpec) -> Duration {
        let secs = later.secs_since(self);
        if secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

impl PartialEq for TimeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_spec(other) == Ordering::Equal
    }
}

impl PartialOrd for TimeSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_spec(other))
    }
}

impl TimeSpec {
    fn cmp_spec(&self, other: &Self) -> Ordering {
        self.full_secs.cmp(&other.full_secs).then(
            self.frac_secs
                .partial_cmp(&other.frac_secs)
                .unwrap_or(Ordering::Equal),
        )
    }
}

impl Add for TimeSpec {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.full_secs + other.full_secs, self.frac_secs + other.frac_secs)
    }
}

impl Add<Duration> for TimeSpec {
    type Output = Self;

    fn add(self, duration: Duration) -> Self::Output {
        self + TimeSpec::from_duration(duration)
    }
}

impl AddAssign<Duration> for TimeSpec {
    fn add_assign(&mut self, duration: Duration) {
        *self = *self + duration;
    }
}

impl Sub for TimeSpec {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.full_secs - other.full_secs, self.frac_secs - other.frac_secs)
    }
}

impl std::fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}s", self.full_secs, (self.frac_secs * 1e9) as u64)
    }
}

/// Monotonic host timer for measuring control-path latency.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since start.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed microseconds since start.
    #[inline]
    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Return the elapsed time and restart.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.start;
        self.start = now;
        elapsed
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_fraction() {
        let t = TimeSpec::new(1, 2.25);
        assert_eq!(t.full_secs(), 3);
        assert!((t.frac_secs() - 0.25).abs() < 1e-12);

        let t = TimeSpec::new(5, -0.5);
        assert_eq!(t.full_secs(), 4);
        assert!((t.frac_secs() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_add_duration_carries() {
        let t = TimeSpec::new(10, 0.9995) + Duration::from_micros(1500);
        assert_eq!(t.full_secs(), 11);
        assert!((t.frac_secs() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_ordering() {
        let a = TimeSpec::new(3, 0.5);
        let b = TimeSpec::new(3, 0.5000001);
        let c = TimeSpec::new(4, 0.0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, TimeSpec::new(2, 1.5));
    }

    #[test]
    fn test_ticks_round_trip() {
        let rate = 100_000_000.0;
        let t = TimeSpec::from_ticks(250_000_123, rate);
        assert_eq!(t.full_secs(), 2);
        assert_eq!(t.to_ticks(rate), 250_000_123);
    }

    #[test]
    fn test_subtraction_and_distance() {
        let a = TimeSpec::new(7, 0.25);
        let b = TimeSpec::new(5, 0.75);
        let d = a - b;
        assert_eq!(d.full_secs(), 1);
        assert!((d.frac_secs() - 0.5).abs() < 1e-12);
        assert!((b.secs_since(&a) + 1.5).abs() < 1e-12);
        assert_eq!(a.duration_until(&b), Duration::ZERO);
        assert_eq!(b.duration_until(&a), Duration::from_millis(1500));
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeSpec::new(2, 0.5).to_string(), "2.500000000s");
    }

    #[test]
    fn test_monotonic_timer_lap() {
        let mut timer = MonotonicTimer::start();
        let first = timer.lap();
        assert!(timer.elapsed() <= first + Duration::from_secs(1));
    }
}
