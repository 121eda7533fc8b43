//! Signet Gateway
//!
//! JSON-RPC gateway in front of the Signet signing service. Every RPC
//! request is authenticated by API key or mTLS client certificate, scoped
//! to one organization, and counted against that organization's quota.
//!
//! # Features
//!
//! - Dual authentication (API key first, client certificate fallback)
//! - Configurable TLS client certificate policy
//! - Per-organization request quotas
//! - PostgreSQL or in-memory credential stores
//! - Prometheus metrics export
//! - Graceful shutdown handling
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! signet-gateway
//!
//! # Start with custom config
//! signet-gateway --config /path/to/gateway.toml
//!
//! # Start with environment overrides
//! SIGNET__SERVER__PORT=8443 SIGNET__AUTH__MTLS__CLIENT_AUTH=RequireAnyClientCert signet-gateway
//! ```

mod config;
mod rpc;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signet_auth::repository::{InMemoryApiKeyRepository, InMemoryCertificateRepository};
use signet_auth::{ApiKeyRepository, AuthService, CertificateRepository};
use signet_db::Database;

use crate::config::{GatewayConfig, StoreBackend};
use crate::rpc::{build_router, AppState, RouterLimits};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Signet Gateway - authenticated JSON-RPC signing gateway
#[derive(Parser, Debug)]
#[command(name = "signet-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "SIGNET_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "SIGNET_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SIGNET_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SIGNET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "SIGNET_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// TLS client certificate policy
    #[arg(long, env = "SIGNET_CLIENT_AUTH")]
    client_auth: Option<String>,

    /// Enable development mode (in-memory stores, debug logging)
    #[arg(long, env = "SIGNET_DEV_MODE")]
    dev_mode: bool,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let mut gateway_config = if args.dev_mode && args.config.is_none() {
        GatewayConfig::development()
    } else {
        GatewayConfig::load(args.config.as_deref())?
    };
    apply_overrides(&mut gateway_config, &args);

    // Initialize logging
    init_logging(&gateway_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Signet Gateway"
    );

    // Validate configuration
    if let Err(errors) = gateway_config.validate() {
        for error in &errors {
            tracing::error!(error = %error, "Invalid configuration");
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }

    // Initialize credential stores and auth service
    let (db, api_key_repo, cert_repo) = init_stores(&gateway_config).await?;
    let auth = AuthService::new(gateway_config.auth.clone(), api_key_repo, cert_repo);
    tracing::info!(
        client_auth = %gateway_config.auth.mtls.client_auth,
        mtls_enabled = gateway_config.auth.mtls.enabled,
        quota_enabled = gateway_config.auth.quota.enabled,
        "Authentication service initialized"
    );

    spawn_quota_cleanup(&auth, gateway_config.auth.quota.window);

    // Start metrics server if enabled
    if gateway_config.metrics.enabled {
        start_metrics_server(gateway_config.metrics.port)?;
    }

    // Create router
    let app = build_router(
        AppState { auth, db },
        RouterLimits {
            max_body_size: gateway_config.server.max_body_size,
            request_timeout: gateway_config.server.request_timeout(),
        },
    );

    let addr = gateway_config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let drain_timeout = gateway_config.server.shutdown_timeout();

    if gateway_config.tls.enabled {
        let tls_config = tls::server_config(&gateway_config.tls, gateway_config.auth.mtls.client_auth)?;
        tracing::info!(%addr, "Server listening (TLS)");
        tls::serve(listener, tls_config, app, shutdown_signal(), drain_timeout).await?;
    } else {
        tracing::warn!(%addr, "Server listening without TLS; client certificates are unavailable");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

fn apply_overrides(config: &mut GatewayConfig, args: &Args) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    if let Some(db_url) = &args.database_url {
        config.database.postgres_url = db_url.clone();
    }
    if let Some(mode) = &args.client_auth {
        config.auth.mtls.client_auth = mode.clone().into();
    }
}

/// Initialize tracing/logging
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .try_init()?;
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .try_init()?;
        }
    }

    Ok(())
}

type Stores = (
    Option<Arc<Database>>,
    Arc<dyn ApiKeyRepository>,
    Arc<dyn CertificateRepository>,
);

/// Initialize credential stores
async fn init_stores(config: &GatewayConfig) -> anyhow::Result<Stores> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory credential stores; nothing is persisted");
            let api_keys: Arc<dyn ApiKeyRepository> = Arc::new(InMemoryApiKeyRepository::new());
            let certs: Arc<dyn CertificateRepository> = Arc::new(InMemoryCertificateRepository::new());
            Ok((None, api_keys, certs))
        }
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = Database::connect(&config.database).await?;

            let health = db.health_check().await;
            if !health.healthy {
                anyhow::bail!("Database health check failed");
            }
            tracing::info!(postgres = health.postgres, "Database health check passed");

            let api_keys: Arc<dyn ApiKeyRepository> = db.api_key_repo();
            let certs: Arc<dyn CertificateRepository> = db.certificate_repo();
            Ok((Some(Arc::new(db)), api_keys, certs))
        }
    }
}

/// Periodically drop idle quota windows
fn spawn_quota_cleanup(auth: &AuthService, window: Duration) {
    if !auth.quota.is_enabled() {
        return;
    }

    let quota = auth.quota.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(window.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            quota.cleanup().await;
        }
    });
}

/// Start Prometheus metrics server
fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(port = port, "Metrics server started");
    Ok(())
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
