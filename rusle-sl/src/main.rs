//! rusle-sl - Soil Loss Microservice
//!
//! Accepts an area of interest, composes the RUSLE factors into a soil loss
//! expression and has a remote compute service materialize tiles, statistics
//! and exports.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rusle_common::config::TomlConfig;
use rusle_common::events::EventBus;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rusle_sl::services::{BoundaryCatalog, HttpComputeClient};
use rusle_sl::AppState;

/// Command-line arguments for rusle-sl
#[derive(Parser, Debug)]
#[command(name = "rusle-sl")]
#[command(about = "RUSLE soil loss microservice")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RUSLE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overrides [server].host
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overrides [server].port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter when RUST_LOG is unset, overrides [logging].level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::resolve(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rusle-sl (Soil Loss) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        max_aoi_area_km2 = config.limits.max_aoi_area_km2,
        default_scale_m = config.limits.default_export_scale,
        compute_url = %config.compute.base_url,
        "Configuration resolved"
    );

    let catalog = match &config.catalog.boundaries_path {
        Some(path) => BoundaryCatalog::load(path)
            .with_context(|| format!("Failed to load boundary catalog {}", path.display()))?,
        None => {
            warn!("No boundary catalog configured, admin region lookups will fail");
            BoundaryCatalog::empty()
        }
    };

    let compute = HttpComputeClient::new(&config.compute)
        .context("Failed to create compute service client")?;

    let event_bus = EventBus::new(256);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::new(config, catalog, Arc::new(compute), event_bus);
    rusle_sl::spawn_sweeper(state.clone());
    rusle_sl::api::spawn_error_tracker(state.clone());

    let app = rusle_sl::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
