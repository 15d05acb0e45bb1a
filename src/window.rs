//! Clock and rolling-window utilities.
//!
//! Every timestamp on the hot path is a [`std::time::Instant`] so retention
//! math never has to worry about wall-clock adjustment. `RollingWindow`
//! appends on the hot path and evicts everything older than the window on
//! the next read.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Direction a byte count was observed moving, for split throughput stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A single throughput observation: `bytes` crossed the wire at `at`.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputSample {
    pub at: Instant,
    pub bytes: u64,
    pub direction: Direction,
}

/// A time-indexed, self-evicting sample sequence; retention is strictly
/// `[now - window, now]`.
#[derive(Debug)]
pub struct RollingWindow<T> {
    window: Duration,
    samples: VecDeque<(Instant, T)>,
}

impl<T> RollingWindow<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: Instant, value: T) {
        self.samples.push_back((at, value));
        self.evict(at);
    }

    /// Drop every sample older than `now - window`, then return the
    /// remaining live samples.
    pub fn evict(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.window);
        while let Some((ts, _)) = self.samples.front() {
            if let Some(cutoff) = cutoff {
                if *ts < cutoff {
                    self.samples.pop_front();
                    continue;
                }
            }
            break;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Instant, T)> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn oldest(&self) -> Option<&(Instant, T)> {
        self.samples.front()
    }
}

/// A fixed-capacity ring of the most recent `N` values, oldest dropped first.
/// Used for queue-latency samples: unlike `RollingWindow` this is bounded by
/// count, not by age.
#[derive(Debug)]
pub struct SampleRing {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn stats(&self) -> LatencyStats {
        if self.samples.is_empty() {
            return LatencyStats::default();
        }
        let sum: f64 = self.samples.iter().sum();
        let avg = sum / self.samples.len() as f64;
        let min = self.samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self
            .samples
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        LatencyStats { avg, min, max }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Trend classification for an error rate compared old-half vs recent-half
/// of the retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Classify `recent` vs `older` half-window error counts: both zero -> stable;
/// only one side nonzero -> that side's direction; otherwise the 1.5x / 0.5x
/// ratio thresholds apply.
pub fn classify_error_trend(older_half: usize, recent_half: usize) -> ErrorTrend {
    if older_half == 0 && recent_half == 0 {
        return ErrorTrend::Stable;
    }
    if older_half == 0 {
        return ErrorTrend::Increasing;
    }
    if recent_half == 0 {
        return ErrorTrend::Decreasing;
    }
    let ratio = recent_half as f64 / older_half as f64;
    if ratio > 1.5 {
        ErrorTrend::Increasing
    } else if ratio < 0.5 {
        ErrorTrend::Decreasing
    } else {
        ErrorTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_samples_older_than_window() {
        let mut w = RollingWindow::new(Duration::from_secs(60));
        let t0 = Instant::now();
        w.push(t0, 10u64);
        w.push(t0 + Duration::from_secs(30), 20u64);
        // 61s later the first sample must be gone, the second must remain.
        w.evict(t0 + Duration::from_secs(61));
        let remaining: Vec<u64> = w.iter().map(|(_, v)| *v).collect();
        assert_eq!(remaining, vec![20]);
    }

    #[test]
    fn sample_ring_bounds_by_count_not_age() {
        let mut ring = SampleRing::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            ring.push(v);
        }
        let stats = ring.stats();
        // oldest (1.0) should have been evicted, leaving 2,3,4
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.avg - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn error_trend_boundaries() {
        assert_eq!(classify_error_trend(0, 0), ErrorTrend::Stable);
        assert_eq!(classify_error_trend(0, 5), ErrorTrend::Increasing);
        assert_eq!(classify_error_trend(5, 0), ErrorTrend::Decreasing);
        // ratio exactly 1.5 is not > 1.5, so stays stable
        assert_eq!(classify_error_trend(2, 3), ErrorTrend::Stable);
        assert_eq!(classify_error_trend(2, 4), ErrorTrend::Increasing);
        assert_eq!(classify_error_trend(4, 1), ErrorTrend::Decreasing);
    }
}
