//! Status Aggregator: composes per-port snapshots plus engine lifecycle
//! state into the single `EngineStatus` record any external caller (the CLI,
//! a future GUI) sees.
//!
//! Four-level health ladder over exact boundary numbers: errors_per_hour >
//! 10, queue_utilization_percent > 80, last_activity < 60s.

use serde::Serialize;

use crate::engine::Engine;
use crate::port_manager::PortSnapshot;
use crate::types::PortRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Good,
    Ok,
}

/// `core` section of `EngineStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub running: bool,
    pub incoming_port: String,
    pub outgoing_ports: Vec<String>,
    pub active_threads: usize,
    /// Direction-keyed, e.g. `"COM54->131&141"` / `"131->Incoming"`.
    pub bytes_transferred: Vec<(String, u64)>,
    /// Direction-keyed, same scheme as `bytes_transferred` (e.g.
    /// `"COM54->131&141"`). Only `thread_restart_counts` below is
    /// owner-keyed.
    pub error_counts: Vec<(String, u64)>,
    pub thread_restart_counts: Vec<(String, u32)>,
}

/// `critical_metrics` section.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalMetrics {
    pub system_uptime_hours: f64,
    pub active_connections: String,
    pub current_throughput_bps: f64,
    pub error_rate_per_hour: u64,
    pub seconds_since_last_activity: f64,
    pub avg_queue_utilization_percent: f64,
    pub peak_throughput_bps: f64,
}

/// One entry of the `per-port` section.
#[derive(Debug, Clone, Serialize)]
pub struct PortStatusView {
    pub role: String,
    pub connected: bool,
    pub owner: Option<String>,
    pub last_activity: Option<f64>,
    pub queue_size: usize,
    pub error_count: u64,
    pub throughput_bps: f64,
    pub uptime_percent: f64,
    pub mtbf_hours: Option<f64>,
    pub queue_latency_ms: f64,
}

/// `system_health` section.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub all_ports_connected: bool,
    pub total_port_errors: u64,
    pub total_queue_backlog: usize,
    pub overall_health_status: HealthStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub core: CoreStatus,
    pub critical_metrics: CriticalMetrics,
    pub ports: Vec<PortStatusView>,
    pub system_health: SystemHealth,
    pub last_error: Option<String>,
}

/// Health ladder, applied in order: any disconnected port is `Critical`;
/// else any port over the error-rate or queue-utilization ceilings is
/// `Warning`; else any port active within the last minute is `Good`;
/// otherwise the system is merely idle and healthy (`Ok`).
pub fn classify_health(ports: &[PortSnapshot]) -> HealthStatus {
    let all_connected = ports.iter().all(|p| p.connected);
    if !all_connected {
        return HealthStatus::Critical;
    }

    let high_error_rate = ports.iter().any(|p| p.errors.errors_per_hour > 10);
    let high_queue_usage = ports.iter().any(|p| p.queue.utilization_percent > 80.0);
    if high_error_rate || high_queue_usage {
        return HealthStatus::Warning;
    }

    let any_recent_activity = ports
        .iter()
        .any(|p| p.seconds_since_last_activity.map(|s| s < 60.0).unwrap_or(false));
    if any_recent_activity {
        HealthStatus::Good
    } else {
        HealthStatus::Ok
    }
}

/// Build the aggregate `EngineStatus` the CLI's `status`/`status --json`
/// subcommands render.
pub fn engine_status(engine: &Engine) -> EngineStatus {
    let ports = engine.manager().snapshot();
    let roles = [PortRole::Incoming, PortRole::OutgoingA, PortRole::OutgoingB];

    let active_threads = if engine.is_running() { roles.len() } else { 0 };

    let bytes_transferred = roles
        .iter()
        .map(|&role| (engine.direction_label(role), engine.bytes_transferred(role)))
        .collect();
    let error_counts = roles
        .iter()
        .map(|&role| (engine.direction_label(role), engine.handler_errors(role)))
        .collect();
    let thread_restart_counts = roles
        .iter()
        .map(|&role| (role.owner_name().to_string(), engine.watchdog().restart_count(role)))
        .collect();

    let system_uptime_hours = engine
        .started_at()
        .map(|t| t.elapsed().as_secs_f64() / 3600.0)
        .unwrap_or(0.0);

    let connected_ports = ports.iter().filter(|p| p.connected).count();
    let current_throughput_bps: f64 = ports.iter().map(|p| p.throughput.bytes_per_second).sum();
    let peak_throughput_bps = engine.observe_throughput(current_throughput_bps);
    let error_rate_per_hour: u64 = ports.iter().map(|p| p.errors.errors_per_hour).sum();
    let seconds_since_last_activity = ports
        .iter()
        .filter_map(|p| p.seconds_since_last_activity)
        .fold(0.0_f64, f64::max);
    let avg_queue_utilization_percent = if ports.is_empty() {
        0.0
    } else {
        ports.iter().map(|p| p.queue.utilization_percent).sum::<f64>() / ports.len() as f64
    };

    let critical_metrics = CriticalMetrics {
        system_uptime_hours,
        active_connections: format!("{connected_ports}/{}", ports.len()),
        current_throughput_bps,
        error_rate_per_hour,
        seconds_since_last_activity,
        avg_queue_utilization_percent,
        peak_throughput_bps,
    };

    let system_health = SystemHealth {
        all_ports_connected: connected_ports == ports.len(),
        total_port_errors: ports.iter().map(|p| p.recent_error_count).sum(),
        total_queue_backlog: ports.iter().map(|p| p.queue_size).sum(),
        overall_health_status: classify_health(&ports),
    };

    let port_views = ports
        .iter()
        .map(|p| PortStatusView {
            role: p.role.owner_name().to_string(),
            connected: p.connected,
            owner: p.owner.clone(),
            last_activity: p.seconds_since_last_activity,
            queue_size: p.queue_size,
            error_count: p.recent_error_count,
            throughput_bps: p.throughput.bytes_per_second,
            uptime_percent: p.connection.uptime_percent,
            mtbf_hours: p.connection.mtbf_hours,
            queue_latency_ms: p.queue.avg_latency_ms,
        })
        .collect();

    EngineStatus {
        core: CoreStatus {
            running: engine.is_running(),
            incoming_port: engine.config().incoming_port.clone(),
            outgoing_ports: vec![
                engine.config().outgoing_a_port.clone(),
                engine.config().outgoing_b_port.clone(),
            ],
            active_threads,
            bytes_transferred,
            error_counts,
            thread_restart_counts,
        },
        critical_metrics,
        ports: port_views,
        system_health,
        last_error: engine.last_error().map(|(_, msg)| msg),
    }
}
