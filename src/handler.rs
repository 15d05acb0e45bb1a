//! The data-plane handler loop shared by all three threads.
//!
//! Read whatever is waiting, fan the bytes out to one or more target
//! queues, then drain this port's own inbound queue and write it out —
//! repeated on a tight poll interval with a heartbeat touch each pass so the
//! watchdog can tell a live loop from a wedged one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::port_manager::{
    DequeueOutcome, EnqueueOutcome, PortManager, ReadOutcome, WriteOutcome,
    BYTE_COUNTER_RESET_THRESHOLD,
};
use crate::types::{PortRole, TransferDirection};

/// Poll interval for a healthy loop iteration.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Backoff after any error before the loop continues.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// Consecutive errors at or below this count log at `warn`; beyond it, only
/// every tenth logs, escalated to `error`.
pub const WARN_THRESHOLD: u32 = 3;
pub const ESCALATE_EVERY: u32 = 10;

/// Lock-free heartbeat a handler thread touches every pass. Stored as a raw
/// monotonic tick count from an arbitrary epoch — the watchdog only cares
/// whether it's still advancing, not its absolute value.
#[derive(Debug, Default)]
pub struct Heartbeat {
    ticks: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn touch(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Signals a handler thread to stop at the next poll boundary. Plain
/// `AtomicBool`-backed flag, checked every pass.
pub type StopFlag = Arc<std::sync::atomic::AtomicBool>;

pub fn new_stop_flag() -> StopFlag {
    Arc::new(std::sync::atomic::AtomicBool::new(false))
}

/// The operator-facing display byte counter for one transfer direction.
/// Wraps around at `BYTE_COUNTER_RESET_THRESHOLD` bytes so it never grows
/// unbounded over a long-lived run; the underlying monotonic `PortStats`
/// counters inside the port manager are untouched by this reset.
#[derive(Debug)]
pub struct DisplayByteCounter {
    direction: TransferDirection,
    count: AtomicU64,
}

impl DisplayByteCounter {
    pub fn new(direction: TransferDirection) -> Arc<Self> {
        Arc::new(Self {
            direction,
            count: AtomicU64::new(0),
        })
    }

    /// Adds `n` bytes, resetting to zero (and logging) if the running total
    /// exceeds the threshold.
    pub fn add(&self, n: u64) {
        let new_total = self.count.fetch_add(n, Ordering::Relaxed) + n;
        if new_total > BYTE_COUNTER_RESET_THRESHOLD {
            log::info!(
                "{}: resetting byte counter at {new_total} bytes",
                self.direction.label()
            );
            self.count.store(0, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Total handler-level errors observed for one direction, independent of
/// the per-port `PortStats::errors` counter the port manager keeps.
#[derive(Debug, Default)]
pub struct HandlerErrorCounter {
    total: AtomicU64,
}

impl HandlerErrorCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// A single port's role in the data plane: which queue it drains to write
/// out, and which other ports' queues it fans newly-read bytes into.
pub struct HandlerSpec {
    pub role: PortRole,
    pub owner: &'static str,
    pub fan_out_to: Vec<PortRole>,
    pub direction: TransferDirection,
}

/// Runs one handler's forward loop until `stop` is set. Blocking — intended
/// to be the body of a dedicated `std::thread::spawn` closure: parallel
/// OS-level tasks, not a cooperative async runtime.
///
/// Fan-out is not atomic across targets: a queue-full drop on one target
/// does not roll back delivery already enqueued on another (see DESIGN.md's
/// Open Question record). The display byte counter only advances when
/// every fan-out target accepted the chunk.
pub fn run_handler(
    manager: Arc<PortManager>,
    spec: HandlerSpec,
    heartbeat: Arc<Heartbeat>,
    stop: StopFlag,
    bytes_counter: Arc<DisplayByteCounter>,
    error_counter: Arc<HandlerErrorCounter>,
    last_error: Arc<Mutex<Option<(Instant, String)>>>,
) {
    log::info!("{} handler starting", spec.owner);
    let mut consecutive_errors: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        heartbeat.touch();
        let mut had_error = false;

        match manager.read_available(spec.role, spec.owner) {
            ReadOutcome::Data(bytes) => {
                let mut all_forwarded = true;
                for target in &spec.fan_out_to {
                    if let EnqueueOutcome::Full =
                        manager.enqueue(*target, bytes.clone(), spec.owner)
                    {
                        all_forwarded = false;
                        log::warn!(
                            "{}: queue full forwarding to {target}, dropping {} bytes",
                            spec.owner,
                            bytes.len()
                        );
                    }
                }
                if all_forwarded {
                    bytes_counter.add(bytes.len() as u64);
                    log::debug!("{}: {} bytes distributed", spec.direction.label(), bytes.len());
                }
            }
            ReadOutcome::Empty => {}
            ReadOutcome::Denied => {
                // Port not currently owned by us (not yet acquired, or lost
                // mid-run). Treated as an error condition — nothing to read
                // from, fall through to draining our own outbound queue so
                // buffered data isn't stranded.
                had_error = true;
            }
        }

        if let DequeueOutcome::Data(bytes) = manager.dequeue(spec.role) {
            match manager.write(spec.role, &bytes, spec.owner) {
                WriteOutcome::Ok => {
                    log::debug!("{}: wrote {} bytes", spec.owner, bytes.len());
                }
                WriteOutcome::Denied => {
                    had_error = true;
                    log::warn!("{}: write denied, dropping {} queued bytes", spec.owner, bytes.len());
                }
                WriteOutcome::IoError => {
                    had_error = true;
                    *last_error.lock().unwrap() =
                        Some((Instant::now(), format!("{}: write failed", spec.owner)));
                }
            }
        }

        if had_error {
            error_counter.bump();
            consecutive_errors += 1;
            if consecutive_errors <= WARN_THRESHOLD {
                log::warn!("{} handler error ({consecutive_errors})", spec.owner);
            } else if consecutive_errors % ESCALATE_EVERY == 0 {
                log::error!(
                    "{}: {consecutive_errors} consecutive errors",
                    spec.owner
                );
            }
            std::thread::sleep(ERROR_BACKOFF);
        } else {
            consecutive_errors = 0;
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    log::info!("{} handler stopping", spec.owner);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_advances_on_touch() {
        let hb = Heartbeat::new();
        assert_eq!(hb.ticks(), 0);
        hb.touch();
        hb.touch();
        assert_eq!(hb.ticks(), 2);
    }

    #[test]
    fn stop_flag_starts_clear() {
        let flag = new_stop_flag();
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn display_byte_counter_accumulates() {
        let counter = DisplayByteCounter::new(TransferDirection::IncomingToOutgoing);
        counter.add(100);
        counter.add(50);
        assert_eq!(counter.get(), 150);
    }

    #[test]
    fn display_byte_counter_resets_past_threshold() {
        let counter = DisplayByteCounter::new(TransferDirection::IncomingToOutgoing);
        counter.add(BYTE_COUNTER_RESET_THRESHOLD);
        counter.add(1);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn error_counter_counts_bumps() {
        let counter = HandlerErrorCounter::new();
        counter.bump();
        counter.bump();
        assert_eq!(counter.get(), 2);
    }
}
