//! # Hubsim — Process Entry Point
//!
//! One binary, two roles, selected by subcommand:
//!
//! - No subcommand: runs the **controller** — binds the HTTP API and both
//!   bus listeners, then serves indefinitely.
//! - `worker`: runs a single **hub worker** — the controller spawns this
//!   itself (see `controller::spawn_worker`) once per hub, but it can be
//!   launched directly against a running controller for debugging.
//!
//! Both roles run on tokio's multi-threaded runtime: unlike the original
//! system's cooperative single-thread scheduler, tree mutation here is not
//! implicitly race-free, which is exactly why the controller tree lives
//! behind an explicit `tokio::sync::Mutex` rather than bare interior
//! mutability.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use hubsim::config::Settings;
use hubsim::controller::{api, dispatcher, AppState};
use hubsim::bus::{Downlink, Uplink};
use hubsim::nms_client::NmsClient;
use hubsim::prom_metrics::Metrics;

#[derive(Parser)]
#[command(name = "hubsim", about = "Network management simulator: drives a real NMS against a fleet of simulated hubs, APs and RTs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single hub worker process. The controller launches this as a
    /// subprocess per hub (see `controller::spawn_worker`), setting every
    /// NMS/auth env var the flattened [`Settings`] above also declares;
    /// launched directly from a shell it reads the exact same variables.
    Worker {
        /// Network index this worker's hub belongs to.
        #[arg(long)]
        net: u32,
        /// Hub index this worker owns.
        #[arg(long)]
        hub: u32,
        /// Controller downlink (PUB) address to subscribe against.
        #[arg(long)]
        pub_endpoint: String,
        /// Controller uplink (PULL) address to push frames to.
        #[arg(long)]
        pull_endpoint: String,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.settings.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    match cli.command {
        Some(Commands::Worker { net, hub, pub_endpoint, pull_endpoint }) => {
            let worker_settings = (&cli.settings).into();
            runtime.block_on(run_worker(worker_settings, &pub_endpoint, &pull_endpoint, net, hub))
        }
        None => runtime.block_on(run_controller(cli.settings)),
    }
}

async fn run_controller(settings: Settings) -> Result<()> {
    let worker_settings = (&settings).into();
    let nms = NmsClient::new(&worker_settings).context("failed to build NMS HTTP client")?;
    let downlink = Downlink::bind(&settings.pub_endpoint())
        .await
        .with_context(|| format!("failed to bind downlink on {}", settings.pub_endpoint()))?;
    let uplink = Uplink::bind(&settings.pull_endpoint())
        .await
        .with_context(|| format!("failed to bind uplink on {}", settings.pull_endpoint()))?;
    let metrics = Metrics::new();

    let app_host = settings.app_host.clone();
    let app_port = settings.app_port;
    let state = Arc::new(AppState::new(settings, nms, downlink, metrics));

    tokio::spawn(dispatcher::run(state.clone(), uplink));

    let router = api::build_router(state);
    let listener = tokio::net::TcpListener::bind((app_host.as_str(), app_port))
        .await
        .with_context(|| format!("failed to bind HTTP API on {app_host}:{app_port}"))?;
    tracing::info!(host = %app_host, port = app_port, "hubsim controller listening");
    axum::serve(listener, router).await.context("controller HTTP server exited")?;
    Ok(())
}

async fn run_worker(
    settings: hubsim::config::WorkerSettings,
    pub_endpoint: &str,
    pull_endpoint: &str,
    net: u32,
    hub: u32,
) -> Result<()> {
    hubsim::hub_worker::run(settings, pub_endpoint, pull_endpoint, net, hub)
        .await
        .context("hub worker exited")
}
