//! Sliding-window rate estimation
//!
//! One meter per counter, one writer per meter. Readers that live in other
//! threads observe the rate through [`crate::metrics::CameraMetrics`].

use std::collections::VecDeque;

/// Window over which rates are computed, in seconds.
pub const DEFAULT_WINDOW_SECS: f64 = 10.0;
/// Hard cap on retained timestamps.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Wall-clock seconds since the Unix epoch. Frame keys are derived from this
/// clock, so it is shared by every stage that names or parses keys.
pub fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Events-per-second meter over the last [`DEFAULT_WINDOW_SECS`] seconds.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    start: Option<f64>,
    max_events: usize,
    window_secs: f64,
    timestamps: VecDeque<f64>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_EVENTS, DEFAULT_WINDOW_SECS)
    }

    pub fn with_limits(max_events: usize, window_secs: f64) -> Self {
        Self {
            start: None,
            max_events,
            window_secs,
            timestamps: VecDeque::new(),
        }
    }

    /// Marks the start of measurement.
    pub fn start(&mut self) {
        self.start = Some(now());
    }

    /// Records one event at the current time.
    pub fn update(&mut self) {
        self.update_at(now());
    }

    /// Current rate in events per second.
    pub fn rate(&mut self) -> f64 {
        self.rate_at(now())
    }

    fn update_at(&mut self, curr: f64) {
        if self.start.is_none() {
            self.start = Some(curr);
        }
        self.timestamps.push_back(curr);
        if self.timestamps.len() > self.max_events + 100 {
            let excess = self.timestamps.len() - self.max_events;
            self.timestamps.drain(..excess);
        }
        self.expire(curr);
    }

    fn rate_at(&mut self, curr: f64) -> f64 {
        let start = *self.start.get_or_insert(curr);
        self.expire(curr);
        // Denominator clamped to >= 1 so a burst right after start does not
        // report an absurd rate.
        let secs = (curr - start).min(self.window_secs).max(1.0);
        self.timestamps.len() as f64 / secs
    }

    fn expire(&mut self, curr: f64) {
        let threshold = curr - self.window_secs;
        while self.timestamps.front().is_some_and(|&t| t < threshold) {
            self.timestamps.pop_front();
        }
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_over_full_window() {
        let mut meter = FpsMeter::new();
        let t0 = 1000.0;
        meter.start = Some(t0);
        // 5 events per second for 10 seconds
        for i in 0..50 {
            meter.update_at(t0 + i as f64 * 0.2);
        }
        let rate = meter.rate_at(t0 + 10.0);
        assert!((rate - 5.0).abs() < 0.5, "rate was {rate}");
    }

    #[test]
    fn denominator_clamped_early() {
        let mut meter = FpsMeter::new();
        let t0 = 1000.0;
        meter.start = Some(t0);
        for i in 0..5 {
            meter.update_at(t0 + i as f64 * 0.1);
        }
        // Half a second in, the divisor is still 1.
        assert_eq!(meter.rate_at(t0 + 0.5), 5.0);
    }

    #[test]
    fn rate_monotone_within_subwindow() {
        let mut meter = FpsMeter::new();
        let t0 = 1000.0;
        meter.start = Some(t0);
        let mut last = 0.0;
        // Inside the clamped first second every update raises the rate.
        for i in 0..10 {
            let t = t0 + i as f64 * 0.1;
            meter.update_at(t);
            let rate = meter.rate_at(t);
            assert!(rate >= last, "rate {rate} dropped below {last}");
            last = rate;
        }
    }

    #[test]
    fn old_timestamps_expire() {
        let mut meter = FpsMeter::new();
        let t0 = 1000.0;
        meter.start = Some(t0);
        for i in 0..10 {
            meter.update_at(t0 + i as f64);
        }
        // 30 seconds later everything has left the window.
        assert_eq!(meter.rate_at(t0 + 40.0), 0.0);
    }

    #[test]
    fn buffer_truncated_past_cap() {
        let mut meter = FpsMeter::with_limits(100, 1000.0);
        let t0 = 1000.0;
        meter.start = Some(t0);
        for i in 0..250 {
            meter.update_at(t0 + i as f64 * 0.001);
        }
        assert!(meter.timestamps.len() <= 200);
    }
}
