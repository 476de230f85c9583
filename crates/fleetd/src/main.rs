//! fleetd: the fleetgrid autoscaling daemon.
//!
//! Single binary that assembles the autoscaler:
//! - env-sourced settings (fatal on any invalid entry)
//! - the scaling decision engine for the configured mode
//! - the instrumentation reporter
//! - an HTTP server for `/healthz` and `/metrics`
//!
//! # Usage
//!
//! ```text
//! EC2_INSTANCES_ALLOWED_TYPES=t2.micro,m5.large fleetd run --port 9052
//! ```
//!
//! `run` wires the in-memory backends (a self-contained pool, useful
//! for drills and development); production deployments inject real
//! EC2/Swarm/Dask adapters behind the same capability traits.

mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleetgrid_autoscale::{ComputationalDemand, DynamicDemand, ScalingEngine};
use fleetgrid_cloud::{InMemoryDask, InMemoryEc2, InMemorySwarm};
use fleetgrid_metrics::FleetReporter;
use fleetgrid_state::{EC2InstanceType, ScalingMode, Settings, SystemClock};

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop and the HTTP endpoints.
    Run {
        /// Port for /healthz and /metrics.
        #[arg(long, default_value = "9052")]
        port: u16,
    },
}

const GIB: u64 = 1024 * 1024 * 1024;

/// The instance shapes the in-memory region knows about.
fn builtin_catalog() -> Vec<EC2InstanceType> {
    let shape = |name: &str, cpus: f64, ram_gib: u64| EC2InstanceType {
        name: name.to_string(),
        cpus,
        ram: ram_gib * GIB,
    };
    vec![
        shape("t2.micro", 1.0, 1),
        shape("t2.xlarge", 4.0, 16),
        shape("m5.large", 2.0, 8),
        shape("m5.xlarge", 4.0, 16),
        shape("m5.2xlarge", 8.0, 32),
        shape("m5.4xlarge", 16.0, 64),
        shape("r5.2xlarge", 8.0, 64),
        shape("r5.4xlarge", 16.0, 128),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug,fleetgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { port } => run(port).await,
    }
}

async fn run(port: u16) -> anyhow::Result<()> {
    info!("fleetd starting");

    let settings = Arc::new(Settings::from_env()?);
    info!(
        mode = ?settings.mode,
        poll_interval_secs = settings.poll_interval.as_secs(),
        grace_period_secs = settings.time_before_termination.as_secs(),
        max_instances = settings.max_instances,
        "settings loaded"
    );

    let clock = SystemClock;
    let reporter = FleetReporter::new();
    let ec2 = InMemoryEc2::new(clock, builtin_catalog());
    let swarm = InMemorySwarm::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // the demand source is a construction-time choice, never switched
    // at runtime
    let engine_handle = match settings.mode {
        ScalingMode::Dynamic => {
            let engine = ScalingEngine::new(
                settings.clone(),
                ec2,
                swarm.clone(),
                DynamicDemand::new(swarm),
                reporter.clone(),
                clock,
            );
            tokio::spawn(engine.run(shutdown_rx))
        }
        ScalingMode::Computational => {
            let engine = ScalingEngine::new(
                settings.clone(),
                ec2,
                swarm,
                ComputationalDemand::new(InMemoryDask::new(), settings.clone()),
                reporter.clone(),
                clock,
            );
            tokio::spawn(engine.run(shutdown_rx))
        }
    };
    info!("scaling engine started");

    let router = http::build_router(reporter);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install CTRL+C handler");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;
    let _ = engine_handle.await;

    info!("fleetd stopped");
    Ok(())
}
