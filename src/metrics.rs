//! Derived per-port metrics: throughput, connection health, error trend, and
//! queue/latency stats computed from the raw samples `PortTelemetry` keeps.
//!
//! These are pure functions, kept separate from `port_manager.rs` so the
//! formulas can be unit tested against exact boundary values without needing
//! a live port.

use crate::window::{classify_error_trend, ErrorTrend, LatencyStats};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ThroughputMetrics {
    pub bytes_per_second: f64,
    pub read_bps: f64,
    pub write_bps: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectionMetrics {
    pub connection_success_rate: f64,
    pub uptime_percent: f64,
    /// `None` renders as "unbounded" (zero failures observed yet).
    pub mtbf_hours: Option<f64>,
    pub seconds_since_last_activity: f64,
    pub total_connection_attempts: u64,
    pub successful_connections: u64,
    pub is_currently_connected: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ErrorMetrics {
    pub errors_per_hour: u64,
    pub error_trend: ErrorTrendLabel,
}

/// Serializable mirror of `ErrorTrend` (the window type doesn't derive
/// Serialize to keep that module free of the serde dependency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorTrendLabel {
    Increasing,
    Decreasing,
    Stable,
}

impl From<ErrorTrend> for ErrorTrendLabel {
    fn from(t: ErrorTrend) -> Self {
        match t {
            ErrorTrend::Increasing => ErrorTrendLabel::Increasing,
            ErrorTrend::Decreasing => ErrorTrendLabel::Decreasing,
            ErrorTrend::Stable => ErrorTrendLabel::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueMetrics {
    pub current_size: usize,
    pub max_size: usize,
    pub utilization_percent: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
}

pub fn connection_success_rate(attempts: u64, successes: u64) -> f64 {
    if attempts == 0 {
        0.0
    } else {
        successes as f64 / attempts as f64 * 100.0
    }
}

/// `total_time_seconds` / `downtime_seconds` -> uptime%, guarding the
/// degenerate `total_time == 0` case (engine just started).
pub fn uptime_percent(total_time_secs: f64, downtime_secs: f64) -> f64 {
    if total_time_secs <= 0.0 {
        return 0.0;
    }
    ((total_time_secs - downtime_secs) / total_time_secs * 100.0).clamp(0.0, 100.0)
}

/// `None` means "unbounded" (zero failures observed yet).
pub fn mtbf_hours(total_time_secs: f64, attempts: u64, successes: u64) -> Option<f64> {
    let failures = attempts.saturating_sub(successes);
    if failures == 0 {
        None
    } else {
        Some(total_time_secs / 3600.0 / failures as f64)
    }
}

pub fn queue_utilization_percent(current_size: usize, max_size: usize) -> f64 {
    if max_size == 0 {
        0.0
    } else {
        current_size as f64 / max_size as f64 * 100.0
    }
}

pub fn error_trend(older_half: usize, recent_half: usize) -> ErrorTrendLabel {
    classify_error_trend(older_half, recent_half).into()
}

pub fn latency_metrics_from_stats(stats: LatencyStats) -> (f64, f64, f64) {
    let min = if stats.min.is_finite() { stats.min } else { 0.0 };
    let max = if stats.max.is_finite() { stats.max } else { 0.0 };
    (stats.avg, min, max)
}
