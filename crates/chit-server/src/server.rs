use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    handlers::{health, issue_secret, redeem_secret},
    store::{Store, DEFAULT_RETENTION, DEFAULT_SWEEP_DELAY, DEFAULT_SWEEP_INTERVAL},
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Delay before the first expiry sweep ($CHIT_SWEEP_DELAY).
    pub sweep_initial_delay: Duration,
    /// Time between expiry sweeps ($CHIT_SWEEP_INTERVAL).
    pub sweep_interval: Duration,
    /// Unredeemed secrets older than this are purged ($CHIT_RETENTION).
    pub retention: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("CHIT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("CHIT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            sweep_initial_delay: env_duration("CHIT_SWEEP_DELAY").unwrap_or(DEFAULT_SWEEP_DELAY),
            sweep_interval: env_duration("CHIT_SWEEP_INTERVAL").unwrap_or(DEFAULT_SWEEP_INTERVAL),
            retention: env_duration("CHIT_RETENTION").unwrap_or(DEFAULT_RETENTION),
        }
    }
}

/// Read a humantime duration such as `10s` or `15m` from `var`.
/// Unset or unparseable values yield `None`.
fn env_duration(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|v| humantime::parse_duration(v.trim()).ok())
}

/// Build the HTTP routes over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/string", get(issue_secret).post(redeem_secret))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    if cfg.sweep_interval.is_zero() {
        anyhow::bail!("sweep interval must be greater than zero");
    }

    let store = Store::new(cfg.retention);

    // Spawn the background expiry sweep.
    let sweeper = store
        .clone()
        .spawn_sweep(cfg.sweep_initial_delay, cfg.sweep_interval);
    info!(
        retention = ?cfg.retention,
        interval = ?cfg.sweep_interval,
        "expiry sweep scheduled"
    );

    let app = router(AppState { store });

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "chit server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    sweeper.shutdown().await;
    info!("shutdown complete");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
