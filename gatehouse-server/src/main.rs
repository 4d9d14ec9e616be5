//! Gatehouse HTTP Server binary

use anyhow::Context;
use gatehouse_core::manifest::scan_directory;
use gatehouse_core::{DescriptorCache, Gatekeeper, GatehouseConfig};
use gatehouse_server::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,gatehouse=debug")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Gatehouse HTTP Server v{}", env!("CARGO_PKG_VERSION"));

    gatehouse_server::metrics::init_prometheus()?;
    gatehouse_server::metrics::init_metrics();

    let config = match std::env::var_os("GATEHOUSE_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            info!("Loading configuration from {}", path.display());
            GatehouseConfig::from_file(&path)
                .with_context(|| format!("Failed to load configuration: {}", path.display()))?
        }
        None => GatehouseConfig::default(),
    };

    let manifests = PathBuf::from(
        std::env::var("GATEHOUSE_MANIFESTS").unwrap_or_else(|_| "manifests".to_string()),
    );
    info!("Scanning manifests in {}", manifests.display());

    let policy = config.authorization.duplicate_fields;
    let cache = DescriptorCache::new(&config.cache, move || {
        let report = scan_directory(&manifests, policy)?;
        for skipped in &report.skipped {
            warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
        }
        Ok(report.registry)
    });

    let gatekeeper = Gatekeeper::from_config(config, Arc::new(cache)).context("Failed to build gatekeeper")?;

    let debug = std::env::var("DEBUG").is_ok();
    let state = AppState::with_debug(Arc::new(gatekeeper), debug);

    let app = gatehouse_server::router(state)
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, shutting down gracefully...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Server shutdown complete");
    Ok(())
}
