// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wf_config::RuntimeConfig;
use wf_daemon::{build_app, wire, AppState};
use wf_engine::driver::ExecutorRegistry;
use wf_master::Dispatcher;
use wf_worker::{run_service_loop, ReconnectConfig, WorkerIdentity, WorkerNode, DEFAULT_HEARTBEAT_INTERVAL};

#[derive(Parser, Debug)]
#[command(name = "wf-daemon", version, about = "Workflow execution core: master and worker processes")]
struct Args {
    /// Path to a TOML configuration file; falls back to built-in defaults
    /// and `WF_*` environment overrides when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the master: HTTP control plane plus the TCP worker listener.
    Master {
        /// Override the configured HTTP listen address.
        #[arg(long)]
        http_addr: Option<String>,
        /// Override the configured TCP worker listen address.
        #[arg(long)]
        wire_addr: Option<String>,
    },
    /// Run a worker: dial a master and service tasks until disconnected.
    Worker {
        /// Master address to dial, e.g. `127.0.0.1:9100`.
        #[arg(long)]
        master_addr: String,
        /// Identifier this worker proposes for itself.
        #[arg(long)]
        slave_id: String,
        /// Worker kind/flavor string used by label/manual scheduling.
        #[arg(long, default_value = "vu-runner")]
        kind: String,
        /// Dialable address advertised for diagnostics.
        #[arg(long, default_value = "unknown")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = wf_config::load_config(args.config.as_deref()).context("load configuration")?;
    wf_config::apply_env_overrides(&mut config);
    let warnings = wf_config::validate_config(&config).context("validate configuration")?;

    let filter = match &config.log_level {
        Some(level) => EnvFilter::new(format!("wf={level}")),
        None => EnvFilter::new("wf=info"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for warning in &warnings {
        tracing::warn!(%warning, "configuration warning");
    }

    match args.command {
        Command::Master { http_addr, wire_addr } => run_master(config, http_addr, wire_addr).await,
        Command::Worker { master_addr, slave_id, kind, address } => run_worker(config, master_addr, slave_id, kind, address).await,
    }
}

async fn run_master(config: RuntimeConfig, http_addr: Option<String>, wire_addr: Option<String>) -> Result<()> {
    let http_addr = http_addr.unwrap_or_else(|| config.master_listen_addr.clone());
    let wire_addr = wire_addr.unwrap_or_else(|| default_wire_addr(&config.master_listen_addr));

    let dispatcher = Arc::new(Dispatcher::new(config.heartbeat_interval_ms as i64));
    let state = Arc::new(AppState::new(Arc::new(config), dispatcher));

    let wire_state = state.clone();
    let wire_addr_for_task = wire_addr.clone();
    let wire_task = tokio::spawn(async move {
        if let Err(err) = wire::run(&wire_addr_for_task, wire_state).await {
            tracing::error!(error = %err, "wire listener stopped");
        }
    });

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&http_addr).await.with_context(|| format!("bind HTTP on {http_addr}"))?;
    tracing::info!(http_addr = %http_addr, wire_addr = %wire_addr, "master listening");

    let serve = axum::serve(listener, app);
    tokio::select! {
        result = serve => result.context("serve HTTP")?,
        _ = wire_task => {}
    }
    Ok(())
}

/// Pick a distinct TCP port for the wire listener when the caller didn't
/// override it: the HTTP control plane and the worker wire protocol cannot
/// share one `TcpListener`, so this bumps the configured HTTP port by one.
fn default_wire_addr(http_addr: &str) -> String {
    match http_addr.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(p) => format!("{host}:{}", p.wrapping_add(1)),
            Err(_) => format!("{http_addr}1"),
        },
        None => format!("{http_addr}:9100"),
    }
}

async fn run_worker(config: RuntimeConfig, master_addr: String, slave_id: String, kind: String, address: String) -> Result<()> {
    let identity = WorkerIdentity {
        slave_id: slave_id.clone(),
        kind,
        address,
        max_vus: config.worker.max_vus,
        cpu_cores: config.worker.cpu_cores,
        memory_mb: config.worker.memory_mb,
        labels: Default::default(),
    };

    let registry = ExecutorRegistry::new();
    let worker = Arc::new(WorkerNode::new(identity, registry));

    let reconnect_config = ReconnectConfig::default();
    let conn = worker.connect(&master_addr, &reconnect_config).await.context("connect to master")?;
    tracing::info!(%slave_id, %master_addr, "worker connected");

    let heartbeat_interval = if config.heartbeat_interval_ms > 0 {
        std::time::Duration::from_millis(config.heartbeat_interval_ms)
    } else {
        DEFAULT_HEARTBEAT_INTERVAL
    };

    let err = run_service_loop(worker, conn, heartbeat_interval).await;
    Err(anyhow::anyhow!(err)).context("worker service loop ended")
}
