//! The Port Manager — sole mediator of serial hardware.
//!
//! A master lock guards the ownership table; a per-port serializing lock
//! guards the open handle; per-port telemetry (throughput/error/latency
//! windows) lives behind its own short lock so `snapshot()` never blocks on
//! in-flight I/O. Ports are held in a fixed `[PortSlot; 3]` array indexed by
//! `PortRole` rather than a dynamic string-keyed map.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::metrics::{
    connection_success_rate, error_trend, latency_metrics_from_stats, mtbf_hours,
    queue_utilization_percent, uptime_percent, ConnectionMetrics, ErrorMetrics, QueueMetrics,
    ThroughputMetrics,
};
use crate::types::{PortId, PortRole, ACQUIRE_ORDER};
use crate::window::{Direction, RollingWindow, SampleRing};

/// Every port's queue holds at most this many pending chunks before
/// `enqueue` starts reporting `Full`.
pub const Q_MAX: usize = 1000;
/// Throughput retention window.
pub const W_TP: Duration = Duration::from_secs(60);
/// Error retention window.
pub const W_ERR: Duration = Duration::from_secs(3600);
/// Latency ring capacity.
pub const N_LAT: usize = 100;
/// Display byte-counter wraparound threshold.
pub const BYTE_COUNTER_RESET_THRESHOLD: u64 = 1_000_000;

/// A serial connection abstraction narrow enough to be backed by a real
/// `serialport::SerialPort` or, in tests, an in-memory loopback pair — this
/// is the seam that lets ownership, queueing, and recovery behavior be
/// exercised without real hardware.
pub trait SerialConnection: Read + Write + Send {
    /// Bytes immediately available to read without blocking.
    fn bytes_available(&mut self) -> std::io::Result<usize>;
}

impl SerialConnection for Box<dyn serialport::SerialPort> {
    fn bytes_available(&mut self) -> std::io::Result<usize> {
        self.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

/// Opens a named serial device at a given baud with a small I/O timeout.
/// Boxed so the port manager can be built against either real hardware or
/// a fake opener in tests.
pub type PortOpener =
    Arc<dyn Fn(&str, u32, Duration) -> std::io::Result<Box<dyn SerialConnection>> + Send + Sync>;

fn real_opener() -> PortOpener {
    Arc::new(|path, baud, timeout| {
        serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map(|p| Box::new(p) as Box<dyn SerialConnection>)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub errors: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ok,
    Busy,
    OpenFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Ok,
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    Denied,
    IoError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    Empty,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Ok,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueOutcome {
    Data(Vec<u8>),
    Empty,
}

struct OwnerEntry {
    id: PortId,
    owner: String,
}

struct OwnerTable {
    entries: [Option<OwnerEntry>; 3],
}

impl OwnerTable {
    fn new() -> Self {
        Self {
            entries: [None, None, None],
        }
    }
}

struct PortIo {
    handle: Option<Box<dyn SerialConnection>>,
    baud: u32,
    opened_at: Option<Instant>,
}

struct PortTelemetry {
    stats: PortStats,
    throughput: RollingWindow<(u64, Direction)>,
    errors: RollingWindow<()>,
    latency: SampleRing,
    connection_attempts: u64,
    connection_successes: u64,
    total_downtime: Duration,
    /// Set when the port transitions into a disconnected state (explicit
    /// release, or a failed acquire while not already disconnected);
    /// cleared (and folded into `total_downtime`) on the next successful
    /// acquire. See DESIGN.md for the rationale behind starting the clock
    /// on a failed acquire too, not only on an explicit release.
    disconnected_since: Option<Instant>,
    last_activity: Option<Instant>,
    currently_connected: bool,
    queue_drops: u64,
}

impl PortTelemetry {
    fn new() -> Self {
        Self {
            stats: PortStats::default(),
            throughput: RollingWindow::new(W_TP),
            errors: RollingWindow::new(W_ERR),
            latency: SampleRing::new(N_LAT),
            connection_attempts: 0,
            connection_successes: 0,
            total_downtime: Duration::ZERO,
            disconnected_since: None,
            last_activity: None,
            currently_connected: false,
            queue_drops: 0,
        }
    }

    fn record_error(&mut self, at: Instant) {
        self.stats.errors += 1;
        self.errors.push(at, ());
    }
}

struct PortSlot {
    io: Mutex<PortIo>,
    telemetry: Mutex<PortTelemetry>,
    queue_tx: Sender<(Vec<u8>, Instant)>,
    queue_rx: Receiver<(Vec<u8>, Instant)>,
}

impl PortSlot {
    fn new() -> Self {
        let (queue_tx, queue_rx) = bounded(Q_MAX);
        Self {
            io: Mutex::new(PortIo {
                handle: None,
                baud: 0,
                opened_at: None,
            }),
            telemetry: Mutex::new(PortTelemetry::new()),
            queue_tx,
            queue_rx,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortSnapshot {
    pub role: PortRole,
    pub id: Option<PortId>,
    pub connected: bool,
    pub owner: Option<String>,
    pub stats: PortStats,
    pub queue_size: usize,
    pub recent_error_count: u64,
    pub seconds_since_last_activity: Option<f64>,
    pub throughput: ThroughputMetrics,
    pub connection: ConnectionMetrics,
    pub errors: ErrorMetrics,
    pub queue: QueueMetrics,
    /// Cumulative queue-full drops for this port; this is the
    /// `data_loss_events` signal surfaced to the status aggregator.
    pub queue_drops: u64,
}

pub struct PortManager {
    system_start: Instant,
    opener: PortOpener,
    timeout: Duration,
    master: Mutex<OwnerTable>,
    slots: [PortSlot; 3],
}

impl PortManager {
    pub fn new(timeout: Duration) -> Self {
        Self::with_opener(timeout, real_opener())
    }

    /// Construct against a fake `PortOpener` — used by tests to exercise
    /// the engine without real hardware.
    pub fn with_opener(timeout: Duration, opener: PortOpener) -> Self {
        Self {
            system_start: Instant::now(),
            opener,
            timeout,
            master: Mutex::new(OwnerTable::new()),
            slots: [PortSlot::new(), PortSlot::new(), PortSlot::new()],
        }
    }

    fn slot(&self, role: PortRole) -> &PortSlot {
        &self.slots[role.index()]
    }

    fn owner_matches(table: &OwnerTable, role: PortRole, owner: &str) -> bool {
        matches!(&table.entries[role.index()], Some(e) if e.owner == owner)
    }

    /// `acquire(port_id, baud, owner) -> ok | busy | open_failed`. `role`
    /// pins the port to one of the three fixed fabric slots, resolved
    /// explicitly by the caller rather than inferred from a thread name.
    pub fn acquire(
        &self,
        role: PortRole,
        port_id: PortId,
        baud: u32,
        owner: &str,
        _timeout: Duration,
    ) -> AcquireOutcome {
        assert!(!owner.is_empty(), "owner must be non-empty");
        assert!(baud > 0, "baud must be positive");

        let mut table = self.master.lock().unwrap();
        if let Some(entry) = &table.entries[role.index()] {
            return if entry.owner == owner {
                log::debug!("{role} already owns {port_id}, acquire is idempotent");
                AcquireOutcome::Ok
            } else {
                log::warn!(
                    "{port_id} owned by {}, denied to {owner}",
                    entry.owner
                );
                AcquireOutcome::Busy
            };
        }

        let slot = self.slot(role);
        let now = Instant::now();
        let mut telemetry = slot.telemetry.lock().unwrap();
        telemetry.connection_attempts += 1;

        match (self.opener)(port_id.as_str(), baud, self.timeout) {
            Ok(handle) => {
                telemetry.connection_successes += 1;
                if let Some(since) = telemetry.disconnected_since.take() {
                    telemetry.total_downtime += now.saturating_duration_since(since);
                }
                telemetry.last_activity = Some(now);
                telemetry.currently_connected = true;
                drop(telemetry);

                let mut io = slot.io.lock().unwrap();
                io.handle = Some(handle);
                io.baud = baud;
                io.opened_at = Some(now);
                drop(io);

                table.entries[role.index()] = Some(OwnerEntry {
                    id: port_id.clone(),
                    owner: owner.to_string(),
                });
                log::info!("{port_id} acquired by {owner}");
                AcquireOutcome::Ok
            }
            Err(e) => {
                if telemetry.disconnected_since.is_none() {
                    telemetry.disconnected_since = Some(now);
                }
                telemetry.record_error(now);
                drop(telemetry);
                log::error!("failed to open {port_id} for {owner}: {e}");
                AcquireOutcome::OpenFailed
            }
        }
    }

    /// `release(port_id, owner) -> ok | not_owner`. Data queues are *not*
    /// cleared so a subsequent acquire can drain pending data.
    pub fn release(&self, role: PortRole, owner: &str) -> ReleaseOutcome {
        let mut table = self.master.lock().unwrap();
        match &table.entries[role.index()] {
            None => ReleaseOutcome::NotOwner,
            Some(entry) if entry.owner != owner => ReleaseOutcome::NotOwner,
            Some(entry) => {
                let port_id = entry.id.clone();
                let slot = self.slot(role);
                {
                    let mut io = slot.io.lock().unwrap();
                    io.handle = None;
                    io.opened_at = None;
                }
                {
                    let mut telemetry = slot.telemetry.lock().unwrap();
                    telemetry.currently_connected = false;
                    telemetry.disconnected_since = Some(Instant::now());
                }
                table.entries[role.index()] = None;
                log::info!("{port_id} released by {owner}");
                ReleaseOutcome::Ok
            }
        }
    }

    /// `write(port_id, bytes, owner) -> ok | denied | io_error`.
    pub fn write(&self, role: PortRole, bytes: &[u8], owner: &str) -> WriteOutcome {
        {
            let table = self.master.lock().unwrap();
            if !Self::owner_matches(&table, role, owner) {
                return WriteOutcome::Denied;
            }
        }

        let slot = self.slot(role);
        let mut io = slot.io.lock().unwrap();
        let Some(handle) = io.handle.as_mut() else {
            return WriteOutcome::Denied;
        };

        match handle.write_all(bytes) {
            Ok(()) => {
                let now = Instant::now();
                let mut telemetry = slot.telemetry.lock().unwrap();
                telemetry.stats.bytes_written += bytes.len() as u64;
                telemetry.last_activity = Some(now);
                telemetry.throughput.push(now, (bytes.len() as u64, Direction::Write));
                WriteOutcome::Ok
            }
            Err(e) => {
                let now = Instant::now();
                let mut telemetry = slot.telemetry.lock().unwrap();
                telemetry.record_error(now);
                log::error!("write error on {role}: {e}");
                WriteOutcome::IoError
            }
        }
    }

    /// `read_available(port_id, owner) -> bytes? | denied`. Non-blocking:
    /// returns whatever the driver reports as immediately available.
    pub fn read_available(&self, role: PortRole, owner: &str) -> ReadOutcome {
        {
            let table = self.master.lock().unwrap();
            if !Self::owner_matches(&table, role, owner) {
                return ReadOutcome::Denied;
            }
        }

        let slot = self.slot(role);
        let mut io = slot.io.lock().unwrap();
        let Some(handle) = io.handle.as_mut() else {
            return ReadOutcome::Denied;
        };

        let available = match handle.bytes_available() {
            Ok(n) => n,
            Err(e) => {
                let now = Instant::now();
                let mut telemetry = slot.telemetry.lock().unwrap();
                telemetry.record_error(now);
                log::error!("read error on {role}: {e}");
                return ReadOutcome::Empty;
            }
        };

        if available == 0 {
            return ReadOutcome::Empty;
        }

        let mut buf = vec![0u8; available];
        match handle.read(&mut buf) {
            Ok(0) => ReadOutcome::Empty,
            Ok(n) => {
                buf.truncate(n);
                let now = Instant::now();
                let mut telemetry = slot.telemetry.lock().unwrap();
                telemetry.stats.bytes_read += n as u64;
                telemetry.last_activity = Some(now);
                telemetry.throughput.push(now, (n as u64, Direction::Read));
                ReadOutcome::Data(buf)
            }
            Err(e) => {
                let now = Instant::now();
                let mut telemetry = slot.telemetry.lock().unwrap();
                telemetry.record_error(now);
                log::error!("read error on {role}: {e}");
                ReadOutcome::Empty
            }
        }
    }

    /// `enqueue(target_port, bytes, source_owner) -> ok | full`. No
    /// ownership check beyond logging attribution.
    pub fn enqueue(&self, target: PortRole, bytes: Vec<u8>, source_owner: &str) -> EnqueueOutcome {
        let slot = self.slot(target);
        match slot.queue_tx.try_send((bytes, Instant::now())) {
            Ok(()) => EnqueueOutcome::Ok,
            Err(TrySendError::Full(_)) => {
                slot.telemetry.lock().unwrap().queue_drops += 1;
                log::warn!("queue full for {target}, dropping data from {source_owner}");
                EnqueueOutcome::Full
            }
            Err(TrySendError::Disconnected(_)) => {
                // Receiver dropped only when the manager itself is torn
                // down; treat as a drop rather than panicking the caller.
                slot.telemetry.lock().unwrap().queue_drops += 1;
                EnqueueOutcome::Full
            }
        }
    }

    /// `dequeue(port_id, wait <= 1ms) -> bytes? | empty`. Records a
    /// `LatencySample` on success.
    pub fn dequeue(&self, role: PortRole) -> DequeueOutcome {
        let slot = self.slot(role);
        match slot.queue_rx.recv_timeout(Duration::from_millis(1)) {
            Ok((bytes, enqueued_at)) => {
                let now = Instant::now();
                let latency_ms = now.saturating_duration_since(enqueued_at).as_secs_f64() * 1000.0;
                slot.telemetry.lock().unwrap().latency.push(latency_ms);
                DequeueOutcome::Data(bytes)
            }
            Err(_) => DequeueOutcome::Empty,
        }
    }

    pub fn queue_drops(&self, role: PortRole) -> u64 {
        self.slot(role).telemetry.lock().unwrap().queue_drops
    }

    /// `snapshot() -> per-port record`. Never blocks on the data plane
    /// beyond a brief master-lock hold plus per-slot telemetry locks.
    pub fn snapshot(&self) -> Vec<PortSnapshot> {
        let now = Instant::now();
        let table = self.master.lock().unwrap();
        let mut out = Vec::with_capacity(3);

        for role in ACQUIRE_ORDER {
            let entry = &table.entries[role.index()];
            let slot = self.slot(role);
            let mut telemetry = slot.telemetry.lock().unwrap();
            telemetry.throughput.evict(now);
            telemetry.errors.evict(now);

            let queue_size = slot.queue_tx.len();

            let total_time = now.duration_since(self.system_start).as_secs_f64();
            let downtime = telemetry.total_downtime.as_secs_f64()
                + telemetry
                    .disconnected_since
                    .map(|since| now.saturating_duration_since(since).as_secs_f64())
                    .unwrap_or(0.0);

            let mut total_bytes = 0u64;
            let mut read_bytes = 0u64;
            let mut write_bytes = 0u64;
            for (_, (bytes, dir)) in telemetry.throughput.iter() {
                total_bytes += bytes;
                match dir {
                    Direction::Read => read_bytes += bytes,
                    Direction::Write => write_bytes += bytes,
                }
            }
            let span = telemetry
                .throughput
                .oldest()
                .map(|(ts, _)| now.saturating_duration_since(*ts).as_secs_f64())
                .unwrap_or(1.0)
                .min(W_TP.as_secs_f64())
                .max(1.0);

            let recent_error_count = telemetry.errors.len() as u64;
            let half_window_secs = W_ERR.as_secs_f64() / 2.0;
            let mut recent_half = 0usize;
            for (ts, _) in telemetry.errors.iter() {
                if now.duration_since(*ts).as_secs_f64() <= half_window_secs {
                    recent_half += 1;
                }
            }
            let older_half = telemetry.errors.len() - recent_half;

            let (avg_latency, min_latency, max_latency) =
                latency_metrics_from_stats(telemetry.latency.stats());
            let queue_drops = telemetry.queue_drops;

            let seconds_since_last_activity =
                telemetry.last_activity.map(|t| now.duration_since(t).as_secs_f64());

            out.push(PortSnapshot {
                role,
                id: entry.as_ref().map(|e| e.id.clone()),
                connected: telemetry.currently_connected,
                owner: entry.as_ref().map(|e| e.owner.clone()),
                stats: telemetry.stats,
                queue_size,
                recent_error_count,
                seconds_since_last_activity,
                throughput: ThroughputMetrics {
                    bytes_per_second: total_bytes as f64 / span,
                    read_bps: read_bytes as f64 / span,
                    write_bps: write_bytes as f64 / span,
                },
                connection: ConnectionMetrics {
                    connection_success_rate: connection_success_rate(
                        telemetry.connection_attempts,
                        telemetry.connection_successes,
                    ),
                    uptime_percent: uptime_percent(total_time, downtime),
                    mtbf_hours: mtbf_hours(
                        total_time,
                        telemetry.connection_attempts,
                        telemetry.connection_successes,
                    ),
                    seconds_since_last_activity: seconds_since_last_activity.unwrap_or(f64::INFINITY),
                    total_connection_attempts: telemetry.connection_attempts,
                    successful_connections: telemetry.connection_successes,
                    is_currently_connected: telemetry.currently_connected,
                },
                errors: ErrorMetrics {
                    errors_per_hour: recent_error_count,
                    error_trend: error_trend(older_half, recent_half),
                },
                queue: QueueMetrics {
                    current_size: queue_size,
                    max_size: Q_MAX,
                    utilization_percent: queue_utilization_percent(queue_size, Q_MAX),
                    avg_latency_ms: avg_latency,
                    min_latency_ms: min_latency,
                    max_latency_ms: max_latency,
                },
                queue_drops,
            });
        }

        out
    }

    /// Closes every open handle, clears ownership, drains queues.
    /// Best-effort: never fails.
    pub fn shutdown_all(&self) {
        let mut table = self.master.lock().unwrap();
        for role in ACQUIRE_ORDER {
            let slot = self.slot(role);
            {
                let mut io = slot.io.lock().unwrap();
                io.handle = None;
                io.opened_at = None;
            }
            {
                let mut telemetry = slot.telemetry.lock().unwrap();
                telemetry.currently_connected = false;
                telemetry.disconnected_since = Some(Instant::now());
            }
            while slot.queue_rx.try_recv().is_ok() {}
            table.entries[role.index()] = None;
        }
        log::info!("port manager shutdown_all complete");
    }
}

/// Side index from `PortId` to the role it was last acquired under —
/// convenience for callers (e.g. the CLI) that only have a device path.
/// Not used on the hot path; built on demand from a snapshot.
pub fn role_index(snapshot: &[PortSnapshot]) -> HashMap<PortId, PortRole> {
    snapshot
        .iter()
        .filter_map(|s| s.id.clone().map(|id| (id, s.role)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;

    /// An in-memory loopback-ish fake: writes recorded to `written`, reads
    /// drain from a pre-seeded `Cursor`. Good enough to exercise ownership,
    /// queueing, and error paths without touching real hardware.
    struct FakePort {
        inbox: Cursor<Vec<u8>>,
        written: Arc<StdMutex<Vec<u8>>>,
        fail_reads: bool,
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.fail_reads {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
            }
            self.inbox.read(buf)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SerialConnection for FakePort {
        fn bytes_available(&mut self) -> std::io::Result<usize> {
            Ok((self.inbox.get_ref().len() as u64 - self.inbox.position()) as usize)
        }
    }

    fn fake_opener(seed: Vec<u8>, written: Arc<StdMutex<Vec<u8>>>) -> PortOpener {
        Arc::new(move |_path, _baud, _timeout| {
            Ok(Box::new(FakePort {
                inbox: Cursor::new(seed.clone()),
                written: Arc::clone(&written),
                fail_reads: false,
            }) as Box<dyn SerialConnection>)
        })
    }

    fn failing_opener() -> PortOpener {
        Arc::new(|_path, _baud, _timeout| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"))
        })
    }

    #[test]
    fn acquire_is_idempotent_for_same_owner() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        let id = PortId::new("COM1");
        assert_eq!(
            pm.acquire(PortRole::Incoming, id.clone(), 115200, "IncomingPortOwner", Duration::from_secs(1)),
            AcquireOutcome::Ok
        );
        assert_eq!(
            pm.acquire(PortRole::Incoming, id, 115200, "IncomingPortOwner", Duration::from_secs(1)),
            AcquireOutcome::Ok
        );
    }

    #[test]
    fn acquire_denies_second_owner() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        let id = PortId::new("COM1");
        assert_eq!(
            pm.acquire(PortRole::Incoming, id.clone(), 115200, "owner-a", Duration::from_secs(1)),
            AcquireOutcome::Ok
        );
        assert_eq!(
            pm.acquire(PortRole::Incoming, id, 115200, "owner-b", Duration::from_secs(1)),
            AcquireOutcome::Busy
        );
    }

    #[test]
    fn release_then_acquire_by_new_owner_succeeds() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        let id = PortId::new("COM1");
        pm.acquire(PortRole::Incoming, id.clone(), 115200, "owner-a", Duration::from_secs(1));
        assert_eq!(pm.release(PortRole::Incoming, "owner-a"), ReleaseOutcome::Ok);
        assert_eq!(
            pm.acquire(PortRole::Incoming, id, 115200, "owner-b", Duration::from_secs(1)),
            AcquireOutcome::Ok
        );
    }

    #[test]
    fn release_by_non_owner_fails() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        let id = PortId::new("COM1");
        pm.acquire(PortRole::Incoming, id, 115200, "owner-a", Duration::from_secs(1));
        assert_eq!(pm.release(PortRole::Incoming, "owner-b"), ReleaseOutcome::NotOwner);
    }

    #[test]
    fn open_failure_reports_open_failed_and_does_not_own() {
        let pm = PortManager::with_opener(Duration::from_millis(100), failing_opener());
        let outcome = pm.acquire(PortRole::Incoming, PortId::new("COM-missing"), 115200, "owner-a", Duration::from_secs(1));
        assert_eq!(outcome, AcquireOutcome::OpenFailed);
        let snap = pm.snapshot();
        let incoming = snap.iter().find(|s| s.role == PortRole::Incoming).unwrap();
        assert!(!incoming.connected);
        assert!(incoming.owner.is_none());
    }

    #[test]
    fn write_denied_without_ownership() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        assert_eq!(pm.write(PortRole::Incoming, b"hi", "nobody"), WriteOutcome::Denied);
    }

    #[test]
    fn read_available_returns_seeded_bytes() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(b"hello world".to_vec(), Arc::new(StdMutex::new(vec![]))));
        pm.acquire(PortRole::Incoming, PortId::new("COM1"), 115200, "IncomingPortOwner", Duration::from_secs(1));
        match pm.read_available(PortRole::Incoming, "IncomingPortOwner") {
            ReadOutcome::Data(bytes) => assert_eq!(bytes, b"hello world"),
            other => panic!("expected data, got {other:?}"),
        }
        // second read: nothing left.
        assert_eq!(pm.read_available(PortRole::Incoming, "IncomingPortOwner"), ReadOutcome::Empty);
    }

    #[test]
    fn write_goes_through_to_the_handle() {
        let written = Arc::new(StdMutex::new(vec![]));
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::clone(&written)));
        pm.acquire(PortRole::OutgoingA, PortId::new("COM131"), 115200, "Port131Owner", Duration::from_secs(1));
        assert_eq!(pm.write(PortRole::OutgoingA, b"hello world", "Port131Owner"), WriteOutcome::Ok);
        assert_eq!(&*written.lock().unwrap(), b"hello world");
    }

    #[test]
    fn enqueue_full_at_q_max_boundary() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        for _ in 0..Q_MAX {
            assert_eq!(pm.enqueue(PortRole::OutgoingA, vec![0u8], "src"), EnqueueOutcome::Ok);
        }
        assert_eq!(pm.enqueue(PortRole::OutgoingA, vec![0u8], "src"), EnqueueOutcome::Full);
        assert_eq!(pm.queue_drops(PortRole::OutgoingA), 1);
    }

    #[test]
    fn enqueue_at_q_max_minus_one_then_one_more_is_ok() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        for _ in 0..Q_MAX - 1 {
            assert_eq!(pm.enqueue(PortRole::OutgoingA, vec![0u8], "src"), EnqueueOutcome::Ok);
        }
        assert_eq!(pm.enqueue(PortRole::OutgoingA, vec![0u8], "src"), EnqueueOutcome::Ok);
        let snap = pm.snapshot();
        let slot = snap.iter().find(|s| s.role == PortRole::OutgoingA).unwrap();
        assert_eq!(slot.queue_size, Q_MAX);
    }

    #[test]
    fn dequeue_records_latency_and_empties() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        pm.enqueue(PortRole::Incoming, b"abc".to_vec(), "src");
        match pm.dequeue(PortRole::Incoming) {
            DequeueOutcome::Data(bytes) => assert_eq!(bytes, b"abc"),
            DequeueOutcome::Empty => panic!("expected data"),
        }
        assert_eq!(pm.dequeue(PortRole::Incoming), DequeueOutcome::Empty);
    }

    #[test]
    fn shutdown_all_clears_ownership_and_queues() {
        let pm = PortManager::with_opener(Duration::from_millis(100), fake_opener(vec![], Arc::new(StdMutex::new(vec![]))));
        pm.acquire(PortRole::Incoming, PortId::new("COM1"), 115200, "IncomingPortOwner", Duration::from_secs(1));
        pm.enqueue(PortRole::OutgoingA, vec![1, 2, 3], "src");
        pm.shutdown_all();
        let snap = pm.snapshot();
        for s in &snap {
            assert!(!s.connected);
            assert!(s.owner.is_none());
            assert_eq!(s.queue_size, 0);
        }
    }
}
