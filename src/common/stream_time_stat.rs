//! Timing helpers for the tick loop and the session poll loop.
//!
//! [`StreamTimeStat`] keeps a running peak/mean/sigma of some per-tick
//! measurement (the scheduler feeds it compositor compute time in usec).
//! [`MicroTimer`] is a dumb interval timer driven by [`crate::common::get_micro_time`].
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamTimeStat {
    peak: f64,
    mean: f64,
    sigma: f64,
    window: u64,
    samples: u64,
}

impl StreamTimeStat {
    pub fn build(window_size: u64) -> StreamTimeStat {
        StreamTimeStat {
            peak: 0.0,
            mean: 0.0,
            sigma: 0.0,
            window: window_size.max(1),
            samples: 0,
        }
    }
    pub fn clear(&mut self) {
        self.peak = 0.0;
        self.mean = 0.0;
        self.sigma = 0.0;
        self.samples = 0;
    }
    pub fn get_peak(&self) -> f64 {
        self.peak
    }
    pub fn get_mean(&self) -> f64 {
        self.mean
    }
    pub fn get_sigma(&self) -> f64 {
        self.sigma
    }
    pub fn get_samples(&self) -> u64 {
        self.samples
    }

    /// Fold a sample in.  The peak holds the largest value seen since the last clear.
    pub fn add_sample(&mut self, sample: f64) {
        if sample > self.peak {
            self.peak = sample;
        }
        self.samples += 1;
        // Until the window fills up this is a plain average
        let n = self.samples.min(self.window) as f64;
        self.mean += (sample - self.mean) / n;
        self.sigma += ((self.mean - sample).abs() - self.sigma) / n;
    }
}

impl fmt::Display for StreamTimeStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ peak: {:.1}, mean: {:.1}, sigma: {:.1}, samples: {} }}",
            self.peak, self.mean, self.sigma, self.samples
        )
    }
}

#[cfg(test)]
mod test_stream_time_stat {
    use super::*;

    #[test]
    fn build_is_empty() {
        let stat = StreamTimeStat::build(100);
        assert_eq!(stat.get_mean(), 0.0);
        assert_eq!(stat.get_samples(), 0);
    }
    #[test]
    fn add_sample() {
        let mut stat = StreamTimeStat::build(4);
        stat.add_sample(100.0);
        assert_eq!(stat.get_mean(), 100.0);
        stat.add_sample(300.0);
        assert_eq!(stat.get_mean(), 200.0);
        assert_eq!(stat.get_peak(), 300.0);
        stat.clear();
        assert_eq!(stat.get_peak(), 0.0);
    }
}

/// Interval timer in microseconds.  Caller supplies "now" so tests can drive it.
pub struct MicroTimer {
    last_time: u128,
    interval: u128,
}

impl MicroTimer {
    pub fn build(now: u128, interval: u128) -> MicroTimer {
        MicroTimer {
            last_time: now,
            interval,
        }
    }
    pub fn set_interval(&mut self, interval: u128) {
        self.interval = interval;
    }
    pub fn get_interval(&self) -> u128 {
        self.interval
    }
    pub fn expired(&self, now: u128) -> bool {
        (self.last_time + self.interval) <= now
    }
    pub fn reset(&mut self, now: u128) {
        self.last_time = now;
    }
    pub fn since(&self, now: u128) -> u128 {
        now.saturating_sub(self.last_time)
    }
    /// how long until the timer expires (zero once it has)
    pub fn remaining(&self, now: u128) -> u128 {
        (self.last_time + self.interval).saturating_sub(now)
    }
}
