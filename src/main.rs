//! Crowd predictor - HTTP inference service
//!
//! Module structure:
//! - `domain/` - Prediction inputs, labels, feature encoding
//! - `services/` - Classifier, training, inference service
//! - `io/` - HTTP server, Prometheus formatting, checkpoints
//! - `infra/` - Config, metrics, logging

use clap::Parser;
use crowd_predictor::infra::config::ConfigArgs;
use crowd_predictor::infra::{logging, Metrics};
use crowd_predictor::io::{start_server, AppState};
use crowd_predictor::services::CrowdPredictor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Crowd predictor - transit crowd-level inference service
#[derive(Parser, Debug)]
#[command(name = "crowd-server", version, about)]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Override the listen port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();
    info!(git_hash = %logging::GIT_HASH, "crowd-server starting");

    let args = Args::parse();
    let mut config = args.config.load();
    if let Some(port) = args.port {
        config = config.with_port(port);
    }

    let checkpoint_path = config.checkpoint_path();
    info!(
        config_file = %config.config_file(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        checkpoint = %checkpoint_path.display(),
        metrics_interval_secs = %config.metrics_interval_secs(),
        "config_loaded"
    );

    // Random init only happens without a checkpoint; seed it like training
    let mut rng = StdRng::seed_from_u64(config.training_seed());
    let predictor = Arc::new(CrowdPredictor::load_or_init(&checkpoint_path, &mut rng)?);
    let metrics = Arc::new(Metrics::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => break,
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let ip: IpAddr = config.bind_address().parse()?;
    let addr = SocketAddr::new(ip, config.port());
    start_server(addr, AppState::new(predictor, metrics.clone()), shutdown_rx).await?;

    metrics.report().log();
    info!("crowd-server shutdown complete");
    Ok(())
}
