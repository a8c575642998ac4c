//! Timing gateway - resilient connection layer for race timing hardware
//!
//! Keeps the WebSocket links to the chip/tag reader, barcode scanner, and
//! per-station bridge processes alive across failures, runs the guarded
//! session refresh, and can replay a recorded simulation against the
//! results backend.
//!
//! Module structure:
//! - `domain/` - Wire messages, session parameters, simulation types
//! - `io/` - External interfaces (link supervisor, registry, backend REST)
//! - `services/` - Critical section, session refresh, replay scheduler
//! - `infra/` - Configuration

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use timing_gateway::domain::{Message, RunState};
use timing_gateway::infra::Config;
use timing_gateway::io::{BackendClient, LinkCallbacks, LinkConfig, LinkRegistry, LinkSupervisor};
use timing_gateway::services::{ReplayScheduler, SessionService};
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Timing gateway - hardware link supervision and simulation replay
#[derive(Parser, Debug)]
#[command(name = "timing-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Replay the given simulation id once, then exit
    #[arg(long)]
    simulate: Option<i64>,
}

/// Callback wiring for one link: state changes and hardware status go to
/// the log, standing in for the UI layer
fn link_callbacks(name: &str) -> LinkCallbacks {
    let open_name = name.to_string();
    let close_name = name.to_string();
    let msg_name = name.to_string();

    LinkCallbacks::default()
        .with_on_open(move || {
            info!(name = %open_name, "link_ready");
        })
        .with_on_close(move || {
            info!(name = %close_name, "link_lost");
        })
        .with_on_message(move |msg: Message| match msg {
            Message::ConnectionStatus { connected, detailedstatus } => {
                info!(
                    name = %msg_name,
                    connected = %connected,
                    detail = %detailedstatus.map_or("-", |d| d.as_str()),
                    "hardware_status"
                );
            }
            Message::AvailableDevices { devices } => {
                info!(
                    name = %msg_name,
                    device_types = %devices.len(),
                    "available_devices"
                );
            }
            other => {
                debug!(name = %msg_name, opcode = %other.opcode(), "link_message");
            }
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("timing-gateway starting");

    // Parse command line arguments using clap
    let args = Args::parse();

    // Load configuration from TOML file
    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        backend = %config.backend_base_url(),
        reader = %config.reader_endpoint(),
        scanner = %config.scanner_endpoint(),
        stations = %config.stations().len(),
        probe_interval_ms = %config.probe_interval().as_millis(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backend = Arc::new(BackendClient::new(&config)?);

    // Build one supervised link per process: reader, scanner, and any
    // per-station bridges. Each gets its own endpoint and callbacks.
    let mut registry = LinkRegistry::new(config.probe_interval());
    let base_link = LinkConfig {
        endpoint: String::new(),
        check_connected_wait: config.check_connected_wait(),
        reopen_socket_wait: config.reopen_socket_wait(),
        ping_interval: config.ping_interval(),
    };

    registry.insert(LinkSupervisor::spawn(
        "reader",
        LinkConfig { endpoint: config.reader_endpoint().to_string(), ..base_link.clone() },
        link_callbacks("reader"),
        shutdown_rx.clone(),
    ));
    registry.insert(LinkSupervisor::spawn(
        "scanner",
        LinkConfig { endpoint: config.scanner_endpoint().to_string(), ..base_link.clone() },
        link_callbacks("scanner"),
        shutdown_rx.clone(),
    ));
    for station in config.stations() {
        registry.insert(LinkSupervisor::spawn(
            station.name.clone(),
            LinkConfig { endpoint: station.endpoint.clone(), ..base_link.clone() },
            link_callbacks(&station.name),
            shutdown_rx.clone(),
        ));
    }

    let registry = Arc::new(registry);
    registry.open_all().await;

    // Fixed-period is_connected probe across every link
    let probe_handle = tokio::spawn(registry.clone().run_probe(shutdown_rx.clone()));

    // Guarded session refresh loop
    let session = Arc::new(SessionService::new(&config, backend.clone(), registry.clone()));
    let session_handle = tokio::spawn(session.clone().run(shutdown_rx.clone()));

    // One-shot replay mode: drive a simulation run to completion and exit
    if let Some(simulation_id) = args.simulate {
        let scheduler = ReplayScheduler::new(backend.clone(), config.tick_interval());
        match scheduler.start(simulation_id).await {
            Ok(run_id) => {
                info!(run_id = %run_id, steps = %scheduler.remaining_steps(), "replay_run_started");
                let mut poll = tokio::time::interval(Duration::from_millis(500));
                loop {
                    poll.tick().await;
                    if scheduler.state() == RunState::Finished {
                        break;
                    }
                }
                let _ = scheduler.stop();
                info!(run_id = %run_id, "replay_run_complete");
            }
            Err(e) => error!(simulation_id = %simulation_id, error = %e, "replay_run_failed"),
        }

        let _ = shutdown_tx.send(true);
        let _ = tokio::join!(probe_handle, session_handle);
        info!("timing-gateway shutdown complete");
        return Ok(());
    }

    // Handle shutdown on Ctrl+C
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(probe_handle, session_handle);
    info!("timing-gateway shutdown complete");
    Ok(())
}
