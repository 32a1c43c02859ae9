use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use chit_server::store::crypto::hash_secret;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "chit", about = "chit: one-time challenge secrets", version)]
struct Cli {
    /// chit server URL (default: http://localhost:8080 or $CHIT_SERVER)
    #[arg(long, env = "CHIT_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chit HTTP server
    ///
    /// Unset flags fall back to the CHIT_* environment and then to built-in defaults.
    Serve {
        /// Port to listen on (default: $CHIT_PORT or 8080)
        #[arg(long)]
        port: Option<u16>,
        /// Host to bind (default: $CHIT_HOST or 0.0.0.0)
        #[arg(long)]
        host: Option<String>,
        /// Delay before the first expiry sweep, e.g. 10s (default: $CHIT_SWEEP_DELAY or 10s)
        #[arg(long, value_parser = parse_duration)]
        sweep_delay: Option<Duration>,
        /// Time between expiry sweeps, e.g. 10s (default: $CHIT_SWEEP_INTERVAL or 10s)
        #[arg(long, value_parser = parse_duration)]
        sweep_interval: Option<Duration>,
        /// How long an unredeemed secret is kept, e.g. 15m (default: $CHIT_RETENTION or 15m)
        #[arg(long, value_parser = parse_duration)]
        retention: Option<Duration>,
    },
    /// Request a secret for a request id
    Issue {
        /// Request id the secret is bound to
        id: i32,
    },
    /// Prove possession of a secret issued for a request id
    Redeem {
        /// Request id the secret was issued for
        id: i32,
        /// The secret (hashed locally before sending unless --raw)
        secret: String,
        /// Send SECRET unchanged; use when it is already a bcrypt hash
        #[arg(long)]
        raw: bool,
    },
    /// Print a bcrypt hash of a value, as redeem would send it
    Hash {
        plaintext: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CHIT_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            sweep_delay,
            sweep_interval,
            retention,
        } => {
            let mut cfg = chit_server::ServerConfig::default();
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            if let Some(delay) = sweep_delay {
                cfg.sweep_initial_delay = delay;
            }
            if let Some(interval) = sweep_interval {
                cfg.sweep_interval = interval;
            }
            if let Some(retention) = retention {
                cfg.retention = retention;
            }
            chit_server::run(cfg).await
        }

        Commands::Issue { id } => {
            let secret = cmd_issue(&cli.server, id).await?;
            println!("{secret}");
            Ok(())
        }

        Commands::Redeem { id, secret, raw } => {
            let hash = if raw { secret } else { hash_secret(&secret)? };
            cmd_redeem(&cli.server, id, &hash).await?;
            println!("OK");
            Ok(())
        }

        Commands::Hash { plaintext } => {
            println!("{}", hash_secret(&plaintext)?);
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_issue(server: &str, id: i32) -> Result<String> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/string", server.trim_end_matches('/')))
        .query(&[("id", id)])
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let text = resp.text().await.context("read response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {text}");
    }
    Ok(text)
}

async fn cmd_redeem(server: &str, id: i32, hash: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/string", server.trim_end_matches('/')))
        .query(&[("id", id.to_string()), ("string", hash.to_owned())])
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {text}");
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "10s", "15m", "1h".
fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}
