use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nanostatus::api::{spawn_api_server, ApiState};
use nanostatus::config::ProcessConfig;
use nanostatus::{config, probe, retention, scheduler::Scheduler, store::Store};

/// Overrides layered over the environment per §6: CLI flag, then env var,
/// then built-in default, mirroring the teacher's `Args`/env layering.
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Override DB_PATH.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Override PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Override the discovered monitors.yaml location.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut process_config = ProcessConfig::from_env();
    if let Some(db_path) = args.db_path.clone() {
        process_config.db_path = db_path;
    }
    if let Some(port) = args.port {
        process_config.port = port;
    }

    init(&process_config.log_level);
    info!(?process_config, "starting nanostatusd");

    let store = Store::new(&process_config.db_path).await?;
    let events = Arc::new(nanostatus::events::EventBus::new());

    let monitors_yaml = args.config.unwrap_or_else(|| process_config.monitors_yaml_path());
    if let Err(err) = config::reconcile(&store, &events, &monitors_yaml).await {
        warn!(error = %err, "initial config reconciliation failed");
    }

    let client = probe::build_client();
    let scheduler = Arc::new(Scheduler::new(store.clone(), Arc::clone(&events), client));

    info!("running boot sweep");
    scheduler.boot_sweep().await;

    let reconcile_handle = Arc::clone(&scheduler).spawn_reconcile_loop();
    let retention_handle = retention::spawn_daily_loop(store.clone());

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", process_config.port)
        .parse()
        .expect("port from config is always a valid socket address component");
    let api_state = ApiState {
        store: store.clone(),
        events: Arc::clone(&events),
    };
    match spawn_api_server(bind_addr, api_state).await {
        Ok(addr) => info!("API server listening on http://{addr}"),
        Err(err) => error!(error = %err, "failed to start API server"),
    }

    info!("nanostatusd running, press Ctrl+C to shut down");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
    }

    reconcile_handle.abort();
    retention_handle.abort();
    scheduler.shutdown().await;
    store.close().await;
    info!("shutdown complete");

    Ok(())
}
