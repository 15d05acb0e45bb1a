//! The Router Engine: lifecycle orchestration.
//!
//! `start()` acquires all three ports in a fixed lexical order, rolling
//! back in reverse on partial failure, then spawns the three data-plane
//! handler threads plus the watchdog; `stop()` signals every thread and
//! releases every port, also in reverse order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::RouterConfig;
use crate::handler::{
    new_stop_flag, run_handler, DisplayByteCounter, HandlerErrorCounter, Heartbeat, HandlerSpec,
    StopFlag,
};
use crate::port_manager::{AcquireOutcome, PortManager};
use crate::types::{PortId, PortRole, TransferDirection, ACQUIRE_ORDER};
use crate::watchdog::Watchdog;

/// `stop()` waits at most this long per handler thread before giving up and
/// moving on to the next one.
const HANDLER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for the watchdog thread specifically.
const WATCHDOG_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Bound on `retry_on_startup` retries. A bounded, small cap is enough for
/// a transient hardware glitch without turning a permanently missing port
/// into a hang.
const STARTUP_RETRY_ATTEMPTS: u32 = 8;

/// Joins `handle`, giving up after `timeout` rather than blocking forever.
/// A handle that outlives its deadline is not forcibly killed (Rust has no
/// such primitive) — it is left to finish on its own once its stop flag
/// takes effect.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Ok,
    AlreadyRunning,
    PortBusy(PortRole),
    PortOpenFailed(PortRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Ok,
    NotRunning,
}

struct RunningHandles {
    stop_flags: [StopFlag; 3],
    heartbeats: [Arc<Heartbeat>; 3],
    threads: Vec<JoinHandle<()>>,
    watchdog_stop: StopFlag,
    watchdog_thread: Option<JoinHandle<()>>,
}

/// Top-level engine object: owns the port manager, the watchdog, and the
/// handle to whichever threads are currently running. Cheaply cloneable via
/// `Arc` so the CLI layer and the data-plane threads can share one instance.
pub struct Engine {
    config: RouterConfig,
    manager: Arc<PortManager>,
    watchdog: Arc<Watchdog>,
    running: AtomicBool,
    handles: Mutex<Option<RunningHandles>>,
    started_at: Mutex<Option<Instant>>,
    last_error: Arc<Mutex<Option<(Instant, String)>>>,
    /// Display byte counters, one per role, keyed to match the
    /// `bytes_transferred` status field.
    byte_counters: [Arc<DisplayByteCounter>; 3],
    error_counters: [Arc<HandlerErrorCounter>; 3],
    /// Engine-wide monotonic max of summed instantaneous throughput,
    /// surfaced as `peak_throughput_bps`. See DESIGN.md for the reset-vs-
    /// persist-across-restarts design decision.
    peak_throughput_bps: Mutex<f64>,
}

impl Engine {
    /// Validates `config` (positive baud rates, positive timeout) before
    /// any port is touched, then builds the engine against a real
    /// `PortManager` backed by the `serialport` crate.
    pub fn new(config: RouterConfig) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let timeout = Duration::from_millis(config.timeout_ms);
        Ok(Self::with_manager(config, Arc::new(PortManager::new(timeout))))
    }

    /// Construct against a pre-built `PortManager` — lets tests inject a
    /// fake-hardware-backed manager.
    pub fn with_manager(config: RouterConfig, manager: Arc<PortManager>) -> Self {
        Self {
            config,
            manager,
            watchdog: Arc::new(Watchdog::new()),
            running: AtomicBool::new(false),
            handles: Mutex::new(None),
            started_at: Mutex::new(None),
            last_error: Arc::new(Mutex::new(None)),
            byte_counters: [
                DisplayByteCounter::new(TransferDirection::IncomingToOutgoing),
                DisplayByteCounter::new(TransferDirection::OutgoingAToIncoming),
                DisplayByteCounter::new(TransferDirection::OutgoingBToIncoming),
            ],
            error_counters: [
                HandlerErrorCounter::new(),
                HandlerErrorCounter::new(),
                HandlerErrorCounter::new(),
            ],
            peak_throughput_bps: Mutex::new(0.0),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PortManager> {
        &self.manager
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock().unwrap()
    }

    pub fn bytes_transferred(&self, role: PortRole) -> u64 {
        self.byte_counters[role.index()].get()
    }

    pub fn handler_errors(&self, role: PortRole) -> u64 {
        self.error_counters[role.index()].get()
    }

    /// Display key for this role's byte counter: `"{incoming_port}->131&141"`
    /// for the fan-out leg, `"131->Incoming"` / `"141->Incoming"` for the two
    /// return legs — the "131"/"141" suffixes are fixed labels for the two
    /// outgoing ports, not derived from the configured device path.
    pub fn direction_label(&self, role: PortRole) -> String {
        match role {
            PortRole::Incoming => format!("{}->131&141", self.config.incoming_port),
            PortRole::OutgoingA => "131->Incoming".to_string(),
            PortRole::OutgoingB => "141->Incoming".to_string(),
        }
    }

    /// Updates and returns the engine-wide peak instantaneous throughput
    /// seen so far, given this cycle's summed bytes/sec across all ports.
    pub fn observe_throughput(&self, current_total_bps: f64) -> f64 {
        let mut peak = self.peak_throughput_bps.lock().unwrap();
        if current_total_bps > *peak {
            *peak = current_total_bps;
        }
        *peak
    }

    fn port_id_for(&self, role: PortRole) -> PortId {
        match role {
            PortRole::Incoming => PortId::new(self.config.incoming_port.clone()),
            PortRole::OutgoingA => PortId::new(self.config.outgoing_a_port.clone()),
            PortRole::OutgoingB => PortId::new(self.config.outgoing_b_port.clone()),
        }
    }

    fn baud_for(&self, role: PortRole) -> u32 {
        match role {
            PortRole::Incoming => self.config.baud_rate,
            PortRole::OutgoingA | PortRole::OutgoingB => self.config.outgoing_baud,
        }
    }

    fn fan_out_for(role: PortRole) -> Vec<PortRole> {
        match role {
            PortRole::Incoming => vec![PortRole::OutgoingA, PortRole::OutgoingB],
            PortRole::OutgoingA | PortRole::OutgoingB => vec![PortRole::Incoming],
        }
    }

    fn direction_for(role: PortRole) -> TransferDirection {
        match role {
            PortRole::Incoming => TransferDirection::IncomingToOutgoing,
            PortRole::OutgoingA => TransferDirection::OutgoingAToIncoming,
            PortRole::OutgoingB => TransferDirection::OutgoingBToIncoming,
        }
    }

    /// Acquire all three ports in `ACQUIRE_ORDER`, spawn the handler threads
    /// and the watchdog. On a failed acquire, every port acquired so far is
    /// released in reverse order before returning, and no threads are
    /// spawned.
    pub fn start(self: &Arc<Self>) -> StartOutcome {
        if self.running.swap(true, Ordering::AcqRel) {
            self.running.store(true, Ordering::Release);
            return StartOutcome::AlreadyRunning;
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut acquired: Vec<PortRole> = Vec::new();

        for role in ACQUIRE_ORDER {
            let mut outcome = self.manager.acquire(
                role,
                self.port_id_for(role),
                self.baud_for(role),
                role.owner_name(),
                timeout,
            );

            // Opt-in backoff-wrapped retry around a failed open. Busy is a
            // distinct ownership conflict, not a transient open failure, so
            // it is never retried here.
            if self.config.retry_on_startup {
                let retry_cap = Duration::from_secs(self.config.retry_delay_max_s);
                let mut attempt = 0u32;
                while matches!(outcome, AcquireOutcome::OpenFailed) && attempt < STARTUP_RETRY_ATTEMPTS {
                    let delay = crate::reconnect::backoff_delay(attempt, retry_cap);
                    log::warn!("{role}: open failed, retrying in {delay:?} (attempt {attempt})");
                    std::thread::sleep(delay);
                    outcome = self.manager.acquire(
                        role,
                        self.port_id_for(role),
                        self.baud_for(role),
                        role.owner_name(),
                        timeout,
                    );
                    attempt += 1;
                }
            }

            match outcome {
                AcquireOutcome::Ok => acquired.push(role),
                AcquireOutcome::Busy | AcquireOutcome::OpenFailed => {
                    for acquired_role in acquired.into_iter().rev() {
                        self.manager.release(acquired_role, acquired_role.owner_name());
                    }
                    self.running.store(false, Ordering::Release);
                    return match outcome {
                        AcquireOutcome::Busy => StartOutcome::PortBusy(role),
                        _ => StartOutcome::PortOpenFailed(role),
                    };
                }
            }
        }

        let mut threads = Vec::with_capacity(3);
        let mut stop_flags: Vec<StopFlag> = Vec::with_capacity(3);
        let mut heartbeats: Vec<Arc<Heartbeat>> = Vec::with_capacity(3);

        for role in ACQUIRE_ORDER {
            let stop_flag = new_stop_flag();
            let heartbeat = Heartbeat::new();
            let spec = HandlerSpec {
                role,
                owner: role.owner_name(),
                fan_out_to: Self::fan_out_for(role),
                direction: Self::direction_for(role),
            };

            let manager = Arc::clone(&self.manager);
            let hb = Arc::clone(&heartbeat);
            let flag = Arc::clone(&stop_flag);
            let last_error = Arc::clone(&self.last_error);
            let bytes_counter = Arc::clone(&self.byte_counters[role.index()]);
            let error_counter = Arc::clone(&self.error_counters[role.index()]);
            let handle = std::thread::Builder::new()
                .name(format!("{role}"))
                .spawn(move || run_handler(manager, spec, hb, flag, bytes_counter, error_counter, last_error))
                .expect("failed to spawn handler thread");

            threads.push(handle);
            stop_flags.push(stop_flag);
            heartbeats.push(heartbeat);

            let engine = Arc::clone(self);
            self.watchdog.register(
                role,
                Arc::clone(heartbeats.last().unwrap()),
                Arc::clone(stop_flags.last().unwrap()),
                Box::new(move |restarted_role, new_flag| {
                    engine.spawn_replacement_handler(restarted_role, new_flag);
                }),
            );
        }

        let watchdog_stop = new_stop_flag();
        let watchdog = Arc::clone(&self.watchdog);
        let wd_flag = Arc::clone(&watchdog_stop);
        let watchdog_thread = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || watchdog.run(wd_flag))
            .expect("failed to spawn watchdog thread");

        *self.handles.lock().unwrap() = Some(RunningHandles {
            stop_flags: [
                stop_flags[0].clone(),
                stop_flags[1].clone(),
                stop_flags[2].clone(),
            ],
            heartbeats: [
                Arc::clone(&heartbeats[0]),
                Arc::clone(&heartbeats[1]),
                Arc::clone(&heartbeats[2]),
            ],
            threads,
            watchdog_stop,
            watchdog_thread: Some(watchdog_thread),
        });
        *self.started_at.lock().unwrap() = Some(Instant::now());

        log::info!("engine started: incoming={} outgoing_a={} outgoing_b={}",
            self.config.incoming_port, self.config.outgoing_a_port, self.config.outgoing_b_port);
        StartOutcome::Ok
    }

    /// Invoked by the watchdog's restart closure — spawns a fresh handler
    /// thread for a single role using a watchdog-issued `StopFlag`, without
    /// touching the other two handlers. The port itself stays acquired
    /// throughout: a stalled read/write loop, not a lost connection, is what
    /// the watchdog treats here (a genuinely dropped port surfaces as
    /// `ReadOutcome::Denied`/`WriteOutcome::Denied` inside the new loop and
    /// is handled there, not by this restart path).
    fn spawn_replacement_handler(self: &Arc<Self>, role: PortRole, new_flag: StopFlag) {
        if !self.is_running() {
            return;
        }
        let heartbeat = Heartbeat::new();
        let spec = HandlerSpec {
            role,
            owner: role.owner_name(),
            fan_out_to: Self::fan_out_for(role),
            direction: Self::direction_for(role),
        };
        let manager = Arc::clone(&self.manager);
        let hb = Arc::clone(&heartbeat);
        let flag = Arc::clone(&new_flag);
        let last_error = Arc::clone(&self.last_error);
        let bytes_counter = Arc::clone(&self.byte_counters[role.index()]);
        let error_counter = Arc::clone(&self.error_counters[role.index()]);
        let handle = std::thread::Builder::new()
            .name(format!("{role}-restart"))
            .spawn(move || run_handler(manager, spec, hb, flag, bytes_counter, error_counter, last_error));

        if let (Ok(handle), Some(handles)) = (handle, self.handles.lock().unwrap().as_mut()) {
            handles.heartbeats[role.index()] = heartbeat;
            handles.stop_flags[role.index()] = new_flag;
            handles.threads.push(handle);
        }
    }

    /// Signal every handler and the watchdog to stop, join them (bounded by
    /// a 5s-per-handler/2s-watchdog deadline), then release every port in
    /// reverse acquisition order. A handler that outlives its
    /// deadline is abandoned rather than joined further — its stop flag is
    /// already set, so it will exit on its own; `shutdown_all()` below is
    /// the unconditional emergency cleanup that makes this safe even if it
    /// doesn't.
    pub fn stop(&self) -> StopOutcome {
        if !self.running.swap(false, Ordering::AcqRel) {
            return StopOutcome::NotRunning;
        }

        let mut handles = self.handles.lock().unwrap().take();
        if let Some(h) = handles.as_mut() {
            for flag in &h.stop_flags {
                flag.store(true, Ordering::Relaxed);
            }
            h.watchdog_stop.store(true, Ordering::Relaxed);
            for t in h.threads.drain(..) {
                if !join_with_timeout(t, HANDLER_JOIN_TIMEOUT) {
                    log::warn!("handler thread did not stop within {HANDLER_JOIN_TIMEOUT:?}");
                }
            }
            if let Some(t) = h.watchdog_thread.take() {
                if !join_with_timeout(t, WATCHDOG_JOIN_TIMEOUT) {
                    log::warn!("watchdog thread did not stop within {WATCHDOG_JOIN_TIMEOUT:?}");
                }
            }
        }

        let mut release_failed = false;
        for role in ACQUIRE_ORDER.into_iter().rev() {
            if self.manager.release(role, role.owner_name()) != crate::port_manager::ReleaseOutcome::Ok {
                release_failed = true;
            }
        }
        if release_failed {
            log::error!("one or more port releases failed during stop(); running emergency shutdown_all()");
            self.manager.shutdown_all();
        }
        *self.started_at.lock().unwrap() = None;

        log::info!("engine stopped");
        StopOutcome::Ok
    }

    pub fn last_error(&self) -> Option<(Instant, String)> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_manager::PortOpener;
    use std::io::{Cursor, Read, Write};
    use crate::port_manager::SerialConnection;

    struct LoopbackPort {
        buf: Cursor<Vec<u8>>,
    }

    impl Read for LoopbackPort {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            self.buf.read(out)
        }
    }
    impl Write for LoopbackPort {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl SerialConnection for LoopbackPort {
        fn bytes_available(&mut self) -> std::io::Result<usize> {
            Ok((self.buf.get_ref().len() as u64 - self.buf.position()) as usize)
        }
    }

    fn always_open_opener() -> PortOpener {
        Arc::new(|_path, _baud, _timeout| {
            Ok(Box::new(LoopbackPort { buf: Cursor::new(vec![]) }) as Box<dyn SerialConnection>)
        })
    }

    fn failing_opener() -> PortOpener {
        Arc::new(|_path, _baud, _timeout| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no device"))
        })
    }

    fn test_config() -> RouterConfig {
        let mut c = RouterConfig::default();
        c.incoming_port = "LOOP0".into();
        c.outgoing_a_port = "LOOP1".into();
        c.outgoing_b_port = "LOOP2".into();
        c
    }

    #[test]
    fn start_then_stop_round_trips() {
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), always_open_opener()));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::Ok);
        assert!(engine.is_running());
        assert_eq!(engine.stop(), StopOutcome::Ok);
        assert!(!engine.is_running());
    }

    #[test]
    fn double_start_reports_already_running() {
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), always_open_opener()));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::Ok);
        assert_eq!(engine.start(), StartOutcome::AlreadyRunning);
        engine.stop();
    }

    #[test]
    fn stop_without_start_reports_not_running() {
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), always_open_opener()));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn retry_on_startup_succeeds_after_transient_open_failures() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts2 = Arc::clone(&attempts);
        let opener: PortOpener = Arc::new(move |_path, _baud, _timeout| {
            if attempts2.fetch_add(1, Ordering::Relaxed) < 2 {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no device yet"))
            } else {
                Ok(Box::new(LoopbackPort { buf: Cursor::new(vec![]) }) as Box<dyn SerialConnection>)
            }
        });
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), opener));
        let mut config = test_config();
        config.retry_on_startup = true;
        config.retry_delay_max_s = 1;
        let engine = Arc::new(Engine::with_manager(config, manager));
        assert_eq!(engine.start(), StartOutcome::Ok);
        engine.stop();
    }

    #[test]
    fn open_failure_rolls_back_and_reports_role() {
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), failing_opener()));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::PortOpenFailed(PortRole::Incoming));
        assert!(!engine.is_running());
        let snap = engine.manager().snapshot();
        assert!(snap.iter().all(|s| !s.connected));
    }

    /// A loopback peer whose readable bytes and written bytes are visible
    /// to the test from outside the handler thread, keyed to a fixed path
    /// so the same opener can hand out three independent peers.
    #[derive(Clone)]
    struct SharedBuf {
        readable: Arc<Mutex<std::collections::VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl SharedBuf {
        fn new() -> Self {
            Self {
                readable: Arc::new(Mutex::new(std::collections::VecDeque::new())),
                written: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn push_readable(&self, bytes: &[u8]) {
            self.readable.lock().unwrap().extend(bytes.iter().copied());
        }

        fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }
    }

    struct SharedLoopbackPort {
        buf: SharedBuf,
    }

    impl Read for SharedLoopbackPort {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let mut readable = self.buf.readable.lock().unwrap();
            let n = out.len().min(readable.len());
            for slot in out.iter_mut().take(n) {
                *slot = readable.pop_front().unwrap();
            }
            Ok(n)
        }
    }
    impl Write for SharedLoopbackPort {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.buf.written.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    impl SerialConnection for SharedLoopbackPort {
        fn bytes_available(&mut self) -> std::io::Result<usize> {
            Ok(self.buf.readable.lock().unwrap().len())
        }
    }

    struct SharedPorts {
        incoming: SharedBuf,
        outgoing_a: SharedBuf,
        outgoing_b: SharedBuf,
        opener: PortOpener,
    }

    /// Three independent loopback peers wired to `test_config()`'s
    /// `LOOP0`/`LOOP1`/`LOOP2` paths, letting a test push bytes into one
    /// side and observe what lands on the others through a real,
    /// multi-threaded `Engine`.
    fn shared_loopback_ports() -> SharedPorts {
        let incoming = SharedBuf::new();
        let outgoing_a = SharedBuf::new();
        let outgoing_b = SharedBuf::new();
        let (i, a, b) = (incoming.clone(), outgoing_a.clone(), outgoing_b.clone());
        let opener: PortOpener = Arc::new(move |path, _baud, _timeout| match path {
            "LOOP0" => Ok(Box::new(SharedLoopbackPort { buf: i.clone() }) as Box<dyn SerialConnection>),
            "LOOP1" => Ok(Box::new(SharedLoopbackPort { buf: a.clone() }) as Box<dyn SerialConnection>),
            "LOOP2" => Ok(Box::new(SharedLoopbackPort { buf: b.clone() }) as Box<dyn SerialConnection>),
            other => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such test port: {other}"),
            )),
        });
        SharedPorts { incoming, outgoing_a, outgoing_b, opener }
    }

    #[test]
    fn incoming_bytes_fan_out_to_both_outgoing_peers() {
        let SharedPorts { incoming, outgoing_a, outgoing_b, opener } = shared_loopback_ports();
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), opener));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::Ok);

        incoming.push_readable(b"hello");
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(outgoing_a.written(), b"hello");
        assert_eq!(outgoing_b.written(), b"hello");
        assert_eq!(engine.bytes_transferred(PortRole::Incoming), 5);

        engine.stop();
    }

    #[test]
    fn reply_from_outgoing_a_reaches_incoming() {
        let SharedPorts { incoming, outgoing_a, opener, .. } = shared_loopback_ports();
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), opener));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::Ok);

        outgoing_a.push_readable(b"ack");
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(incoming.written(), b"ack");
        assert_eq!(engine.bytes_transferred(PortRole::OutgoingA), 3);

        engine.stop();
    }

    #[test]
    fn full_fan_out_queue_drops_the_chunk_and_withholds_the_byte_count() {
        let SharedPorts { incoming, outgoing_a, outgoing_b, opener } = shared_loopback_ports();
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), opener));

        // Saturate OutgoingA's inbound queue before any handler thread
        // exists to drain it, so the very first real fan-out attempt below
        // lands on a full queue.
        for _ in 0..crate::port_manager::Q_MAX {
            manager.enqueue(PortRole::OutgoingA, vec![0u8], "pre-fill");
        }

        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::Ok);

        incoming.push_readable(b"x");
        std::thread::sleep(Duration::from_millis(50));

        assert!(engine.manager().queue_drops(PortRole::OutgoingA) >= 1);
        assert_eq!(outgoing_b.written(), b"x");
        // Partial fan-out: the display counter only advances when every
        // target accepted the chunk.
        assert_eq!(engine.bytes_transferred(PortRole::Incoming), 0);

        engine.stop();
        let _ = incoming;
    }

    #[test]
    fn watchdog_restart_produces_a_live_handler_that_keeps_routing() {
        let SharedPorts { incoming, outgoing_a, outgoing_b, opener } = shared_loopback_ports();
        let manager = Arc::new(PortManager::with_opener(Duration::from_millis(50), opener));
        let engine = Arc::new(Engine::with_manager(test_config(), manager));
        assert_eq!(engine.start(), StartOutcome::Ok);

        engine.watchdog().force_stale(PortRole::Incoming);
        let restarted = engine.watchdog().check_once();
        assert_eq!(restarted, vec![PortRole::Incoming]);
        assert_eq!(engine.watchdog().restart_count(PortRole::Incoming), 1);

        // The replacement thread spun up by the restart must still be a
        // live participant in the data plane, not a dangling stand-in.
        incoming.push_readable(b"ping");
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(outgoing_a.written(), b"ping");
        assert_eq!(outgoing_b.written(), b"ping");

        engine.stop();
    }
}
