//! Inference router daemon.
//!
//! Runs the router's background services (health probes, cache sweeping,
//! config reload, admin and metrics endpoints) until SIGINT/SIGTERM. With
//! `--model` it instead submits a single call and prints the reply.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use inference_router::config::load_config;
use inference_router::lifecycle::{shutdown_signal, Services, Shutdown};
use inference_router::observability::logging::init_tracing;
use inference_router::{Router, RouterConfig, SubmitOptions};

#[derive(Parser)]
#[command(name = "inference-router")]
#[command(about = "Routes inference calls across a pool of model endpoints", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Submit one call for this model and exit.
    #[arg(short, long)]
    model: Option<String>,

    /// Payload for the one-shot call.
    #[arg(short, long, default_value = "")]
    payload: String,

    /// Time budget for the one-shot call, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };

    init_tracing(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "inference-router starting");
    tracing::info!(
        endpoints = config.endpoints.len(),
        policy = ?config.balancer.policy,
        max_attempts = config.retries.max_attempts,
        cache = config.cache.enabled,
        "Configuration loaded"
    );

    let router = Arc::new(Router::new(config.clone())?);

    if let Some(model) = cli.model {
        let mut opts = SubmitOptions::new();
        if let Some(ms) = cli.timeout_ms {
            opts = opts.timeout(Duration::from_millis(ms));
        }
        let response = router.submit(&model, cli.payload, opts).await?;
        tracing::info!(endpoint = %response.endpoint, "Call served");
        println!("{}", String::from_utf8_lossy(&response.body));
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let services = Services::start(router, &config, cli.config.as_deref(), &shutdown)?;

    shutdown_signal().await;
    shutdown.trigger();
    services.join(Duration::from_secs(10)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
