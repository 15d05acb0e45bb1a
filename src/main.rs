//! CLI entry point: `start`, `status`, `config`, `list-ports`. There is no
//! separate OS-level daemon and no cross-process `stop`, so this binary
//! just hosts one engine in the foreground per invocation. `start` blocks
//! until Ctrl+C, then runs the same graceful `stop()` path the engine
//! exposes to any caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use serial_router::{engine_status, Engine, RouterConfig, StartOutcome};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "serial-router")]
#[command(version = VERSION)]
#[command(about = "Routes bytes between one incoming serial port and two fixed outgoing ports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire all three ports and run the data plane in the foreground
    /// until interrupted (Ctrl+C).
    Start,
    /// Print a point-in-time status snapshot. Since there is no running
    /// background daemon to query, this starts the engine, waits briefly
    /// for activity, reports, then stops it again.
    Status {
        #[arg(long)]
        json: bool,
        #[arg(long, default_value_t = 2)]
        observe_secs: u64,
    },
    /// Print or overwrite the persisted configuration
    /// (`~/.serial_router/config.json`).
    Config {
        /// Set `incoming_port` and persist, instead of just printing.
        #[arg(long)]
        set_incoming_port: Option<String>,
    },
    /// List serial devices the OS currently reports, to help pick
    /// `incoming_port`.
    ListPorts,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => cmd_start(),
        Commands::Status { json, observe_secs } => cmd_status(json, observe_secs),
        Commands::Config { set_incoming_port } => cmd_config(set_incoming_port),
        Commands::ListPorts => cmd_list_ports(),
    }
}

fn build_engine() -> Result<Arc<Engine>> {
    let config = RouterConfig::load().context("loading configuration")?;
    let engine = Engine::new(config).context("validating configuration")?;
    Ok(Arc::new(engine))
}

fn cmd_start() -> Result<()> {
    let engine = build_engine()?;

    match engine.start() {
        StartOutcome::Ok => {}
        StartOutcome::AlreadyRunning => {
            println!("engine already running");
            return Ok(());
        }
        StartOutcome::PortBusy(role) => {
            anyhow::bail!("port for {role} is already owned by another process");
        }
        StartOutcome::PortOpenFailed(role) => {
            anyhow::bail!("failed to open the port for {role}");
        }
    }

    println!(
        "serial-router started: incoming={} outgoing_a={} outgoing_b={} (Ctrl+C to stop)",
        engine.config().incoming_port,
        engine.config().outgoing_a_port,
        engine.config().outgoing_b_port
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("installing Ctrl+C handler")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    println!("stopping...");
    engine.stop();
    Ok(())
}

fn cmd_status(json: bool, observe_secs: u64) -> Result<()> {
    let engine = build_engine()?;

    match engine.start() {
        StartOutcome::Ok => {}
        other => anyhow::bail!("could not start engine for status observation: {other:?}"),
    }

    std::thread::sleep(Duration::from_secs(observe_secs));
    let status = engine_status(&engine);
    engine.stop();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!(
            "running={} health={:?} active_threads={}",
            status.core.running, status.system_health.overall_health_status, status.core.active_threads
        );
        println!(
            "uptime_hours={:.3} active_connections={} throughput_bps={:.0}",
            status.critical_metrics.system_uptime_hours,
            status.critical_metrics.active_connections,
            status.critical_metrics.current_throughput_bps
        );
        for port in &status.ports {
            println!(
                "  {:<20} connected={:<5} errors={:<4} queue={:<4} uptime%={:.1}",
                port.role, port.connected, port.error_count, port.queue_size, port.uptime_percent
            );
        }
    }

    Ok(())
}

fn cmd_config(set_incoming_port: Option<String>) -> Result<()> {
    let mut config = RouterConfig::load().context("loading configuration")?;

    if let Some(incoming) = set_incoming_port {
        config.incoming_port = incoming;
        config.save().context("saving configuration")?;
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_list_ports() -> Result<()> {
    let ports = serial_router::port_enum::list_available_ports()
        .map_err(|e| anyhow::anyhow!(e))
        .context("enumerating serial ports")?;

    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{} ({})", port.path, port.kind);
    }
    Ok(())
}
