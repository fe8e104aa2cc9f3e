//! Garven hub server.
//!
//! Reads configuration from environment variables (see [`Config`]), builds the
//! cluster hub and serves the WebSocket entrypoint plus the HTTP API until
//! SIGINT. On shutdown every cluster connection is closed; clusters
//! re-identify against the next process.
//!
//! ## Quick start
//!
//! ```bash
//! GARVEN_SECRET_KEY=changeme \
//! GARVEN_API_KEY=devkey \
//! GARVEN_LOG_LEVEL=garven_cluster=debug,info \
//!   cargo run --bin garven --release
//! ```

use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use garven_server::{app, config::Config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────────
    let config = Config::from_env();

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .compact()
        .init();

    info!(
        version       = env!("CARGO_PKG_VERSION"),
        port          = config.port,
        cluster_count = config.cluster_count,
        total_shards  = config.total_shards,
        "Garven starting"
    );

    if config.secret_key.is_empty() {
        error!("GARVEN_SECRET_KEY is empty; clusters identifying with an empty secret will be accepted");
    }
    if config.max_consecutive_timeouts == 0 {
        info!("repeated-timeout disconnect disabled (GARVEN_MAX_CONSECUTIVE_TIMEOUTS=0)");
    }

    // ── Hub + HTTP ────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("[::]:{}", config.port).parse()?;
    let state = AppState::new(config);
    let hub = state.hub.clone();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!(%addr, "Garven listening");

    tokio::select! {
        result = axum::serve(listener, app(state)) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
                return Err(anyhow::anyhow!("{}", e));
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down gracefully");
        }
    }

    hub.shutdown();
    info!("Garven shutdown complete");
    Ok(())
}
