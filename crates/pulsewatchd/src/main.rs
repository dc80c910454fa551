//! pulsewatchd: the pulsewatch daemon.
//!
//! Single binary that assembles the monitoring subsystems:
//! - State store (redb)
//! - HTTP prober + per-service probe tasks
//! - Health classification, incidents, and alerts
//! - Metrics retention loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! pulsewatchd serve --port 5000 --data-dir ./data --config pulsewatch.toml
//! pulsewatchd check https://api.example.com/health --timeout 5s
//! pulsewatchd config
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulsewatch_engine::{Engine, MonitorService, validate_service};
use pulsewatch_health::{HttpProbe, check_once};
use pulsewatch_state::{MonitorConfig, ProbeConfig, StateStore, parse_duration};

const DEFAULT_FILTER: &str = "info,pulsewatch=debug,pulsewatchd=debug";

#[derive(Parser)]
#[command(name = "pulsewatchd", about = "HTTP endpoint health monitor", version)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor and serve the API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "5000")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,

        /// Keep all state in memory (nothing survives a restart).
        #[arg(long)]
        in_memory: bool,
    },

    /// Probe a URL once and print the outcome as JSON.
    Check {
        url: String,

        /// Probe timeout, e.g. "500ms" or "5s".
        #[arg(long, default_value = "5s", value_parser = duration_arg)]
        timeout: Duration,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}, expected e.g. 500ms, 5s, 1m"))
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            in_memory,
        } => run_serve(config, port, data_dir, in_memory).await,
        Command::Check { url, timeout } => run_check(config, &url, timeout).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_serve(
    config: MonitorConfig,
    port: u16,
    data_dir: PathBuf,
    in_memory: bool,
) -> anyhow::Result<()> {
    info!("pulsewatch daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = if in_memory {
        info!("using in-memory state store");
        StateStore::open_in_memory()?
    } else {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let db_path = data_dir.join("pulsewatch.redb");
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        store
    };

    let probe = Arc::new(HttpProbe::new(&config.probe).context("building HTTP client")?);
    let engine = Arc::new(Engine::new(store, config)?);
    let monitor = Arc::new(MonitorService::new(engine.clone(), probe));

    let resumed = monitor.start().await?;
    info!(services = resumed, "probe tasks running");

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = engine.metrics_store().clone();
    let prune_handle = tokio::spawn(async move {
        metrics.run(shutdown_rx).await;
    });

    // ── API server ─────────────────────────────────────────────

    let router = pulsewatch_api::build_router(monitor.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let served = server.await;

    monitor.shutdown().await;
    let _ = prune_handle.await;

    served?;
    info!("pulsewatch daemon stopped");
    Ok(())
}

async fn run_check(mut config: MonitorConfig, url: &str, timeout: Duration) -> anyhow::Result<()> {
    let (_, url) = validate_service("check", url)?;
    config.probe = ProbeConfig {
        timeout,
        ..config.probe
    };
    let probe = HttpProbe::new(&config.probe).context("building HTTP client")?;

    let outcome = check_once(&probe, &url, timeout).await;
    let report = json!({
        "url": url,
        "checked_at": outcome.checked_at,
        "status_code": outcome.status_code,
        "response_time": outcome.response_time,
        "error": outcome.error,
        "detail": outcome.detail,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
