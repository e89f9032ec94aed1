//! Spend-permission collection HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p spendgate-server --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p spendgate-server
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p spendgate-server
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `3000`)
//! - `DATABASE_URL` - Override the Postgres connection string
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;

use alloy_provider::ProviderBuilder;
use axum::http::Method;
use axum::{Json, Router};
use spendgate::settlement::SettlementExecutor;
use spendgate::{Collector, MemoryPermissionStore, PermissionStore};
use spendgate_evm::{
    BundlerClient, NetworkConfig, SmartSpender, network_by_caip2, parse_caip2, signer_from_key,
};
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use url::Url;

use spendgate_server::collect_router;
use spendgate_server::config::{AppConfig, SettlementConfig, StoreBackend, StoreConfig};
use spendgate_server::store::PgPermissionStore;

#[tokio::main]
async fn main() {
    // Initialize tracing with RUST_LOG env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }
    install_crypto_provider();

    let config = AppConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        store = ?config.store.backend,
        settlement = config.settlement.enabled,
        "Loaded configuration"
    );

    let mut collector = Collector::new(open_store(&config.store).await?);
    if config.settlement.enabled {
        collector = collector.with_executor(connect_spender(&config.settlement).await?);
    } else {
        tracing::warn!("Settlement disabled: permissions will be stored but not approved on-chain");
    }

    let app = Router::new()
        .merge(collect_router(Arc::new(collector)))
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Pins the process-wide rustls crypto provider, which sqlx and reqwest share.
///
/// Returns `false` if a provider was already installed.
fn install_crypto_provider() -> bool {
    let installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();
    if !installed {
        tracing::debug!("rustls crypto provider already installed");
    }
    installed
}

/// Opens the configured record store.
async fn open_store(
    config: &StoreConfig,
) -> Result<Arc<dyn PermissionStore>, Box<dyn std::error::Error>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store: records will not survive a restart");
            Ok(Arc::new(MemoryPermissionStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty() && !url.starts_with('$'))
                .ok_or("store.database_url is required for the postgres backend")?;
            let store = PgPermissionStore::connect(url, config.max_connections).await?;
            tracing::info!(max_connections = config.max_connections, "Connected to Postgres");
            Ok(Arc::new(store))
        }
    }
}

/// Builds the smart-account spender used for settlement.
async fn connect_spender(
    config: &SettlementConfig,
) -> Result<Arc<dyn SettlementExecutor>, Box<dyn std::error::Error>> {
    let network = if let Some(known) = network_by_caip2(&config.network) {
        known
    } else {
        let chain_id = parse_caip2(&config.network)
            .ok_or_else(|| format!("Invalid CAIP-2 network: {}", config.network))?;
        tracing::warn!(
            network = %config.network,
            "No known network config found, using canonical deployments without an explorer"
        );
        NetworkConfig::new(chain_id, None)
    };

    let key = config.spender_private_key.trim();
    if key.is_empty() || key.starts_with('$') {
        return Err("settlement.spender_private_key not resolved (missing env var?)".into());
    }
    let signer = signer_from_key(key)?;

    let rpc_url: Url = config
        .rpc_url
        .parse()
        .map_err(|e| format!("Invalid RPC URL for {}: {e}", config.network))?;
    let bundler_url: Url = config
        .bundler_url
        .parse()
        .map_err(|e| format!("Invalid bundler URL: {e}"))?;

    let provider = ProviderBuilder::new().connect_http(rpc_url);
    let bundler = BundlerClient::new(bundler_url).with_timeout(config.request_timeout());
    let mut spender = SmartSpender::connect(provider, network, signer, bundler)
        .await?
        .with_receipt_timeout(config.receipt_timeout())
        .with_poll_interval(config.poll_interval());

    if let Some(url) = config
        .paymaster_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        let paymaster_url: Url = url
            .parse()
            .map_err(|e| format!("Invalid paymaster URL: {e}"))?;
        spender = spender
            .with_paymaster(BundlerClient::new(paymaster_url).with_timeout(config.request_timeout()));
    }

    tracing::info!(
        network = %spender.network().network,
        spender = %spender.spender_address(),
        "Settlement enabled"
    );
    Ok(Arc::new(spender))
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            tracing::warn!("Failed to install SIGTERM handler, waiting for Ctrl-C only");
            let _ = ctrl_c.await;
            return;
        };
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_err() {
            tracing::warn!("Failed to listen for Ctrl-C");
        }
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
