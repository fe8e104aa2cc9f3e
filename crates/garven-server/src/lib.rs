//! # garven-server
//!
//! The Garven hub process: a WebSocket entrypoint bot clusters connect to,
//! plus the HTTP API that fans requests out to them through
//! [`garven_cluster::ClusterHub`].
//!
//! The binary in `main.rs` only loads [`config::Config`], builds an
//! [`AppState`] and serves [`app`]. Integration tests do the same over a
//! loopback listener.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use serde_json::{Map, Value};
use tower_http::cors::CorsLayer;

use garven_cluster::{ClusterHub, Outcomes, RequestError};

pub mod auth;
pub mod config;
pub mod metrics;
pub mod routes;
pub mod shard;
pub mod ws;

use auth::ApiKeyAuth;
use config::Config;
use metrics::HubMetrics;

// ── Shared state ──────────────────────────────────────────────────────────────

/// Everything a handler can reach. Cloning is cheap; all fields share.
#[derive(Clone)]
pub struct AppState {
    pub hub:     ClusterHub,
    pub config:  Arc<Config>,
    pub metrics: Arc<HubMetrics>,
    pub auth:    ApiKeyAuth,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            hub:     ClusterHub::new(config.hub_config()),
            auth:    ApiKeyAuth::new(config.api_key.clone()),
            metrics: Arc::new(HubMetrics::new()),
            config:  Arc::new(config),
        }
    }

    /// [`ClusterHub::request_all`] with the configured timeout, counted in metrics.
    pub async fn request_all(&self, route: &str, arguments: Map<String, Value>) -> Outcomes {
        let start = Instant::now();
        let outcomes = self.hub.request_all_default(route, arguments).await;
        self.metrics.record(
            &self.metrics.request_all_count,
            &self.metrics.request_all_latency_us,
            start.elapsed().as_micros() as u64,
        );
        self.metrics.record_outcomes(&outcomes);
        outcomes
    }

    /// [`ClusterHub::request`] with the configured timeout, counted in metrics.
    pub async fn request(
        &self,
        id: &str,
        route: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, RequestError> {
        let start = Instant::now();
        let result = self
            .hub
            .request(id, route, arguments, self.hub.request_timeout())
            .await;
        self.metrics.record(
            &self.metrics.request_count,
            &self.metrics.request_latency_us,
            start.elapsed().as_micros() as u64,
        );
        result
    }

    pub fn note_partial(&self, partial: bool) {
        if partial {
            self.metrics.inc(&self.metrics.partial_response_count);
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the full HTTP + WebSocket router.
pub fn app(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/aggregate/guilds/count", get(routes::guild_count))
        .route("/aggregate/cached/count", get(routes::cached_count))
        .route("/aggregate/guilds/:guild_id/shard_info", get(routes::shard_info))
        .route("/cluster/status", get(routes::cluster_status))
        .route("/cluster/:cluster_id/notify", post(routes::notify))
        .route("/premium/:user_id/refresh", post(routes::refresh_premium))
        .route("/premium/shared_guilds", post(routes::shared_guilds))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/ws", get(ws::entrypoint))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .merge(guarded)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
