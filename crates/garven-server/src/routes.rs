//! HTTP handlers: aggregate, cluster and premium routes.
//!
//! Endpoints (all but `/health` and `/metrics` sit behind [`crate::auth`]):
//!   GET  /health                              → liveness + connected clusters
//!   GET  /metrics                             → Prometheus text
//!   GET  /aggregate/guilds/count              → summed guild count
//!   GET  /aggregate/cached/count              → cached item counts per cluster
//!   GET  /aggregate/guilds/:guild_id/shard_info → shard + cluster for a guild
//!   GET  /cluster/status                      → merged shard health
//!   POST /cluster/:cluster_id/notify          → send a notice to one cluster
//!   POST /premium/:user_id/refresh            → refresh premium on every cluster
//!   POST /premium/shared_guilds               → guilds the bot shares with a list

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use garven_cluster::aggregate::{self, CachedItemsStatistic, ClusterHealth, SharedGuilds, Statistic};
use garven_cluster::RequestError;

use crate::shard::{self, GuildShardInfo, ShardError};
use crate::AppState;

// ── Bodies ────────────────────────────────────────────────────────────────────

/// The JSON shape of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SharedGuildsRequest {
    pub guild_ids: Vec<u64>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_)  => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(Message::new(self.to_string()))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<ShardError> for ApiError {
    fn from(e: ShardError) -> Self {
        warn!(error = %e, "shard lookup rejected");
        ApiError::BadRequest("guild_id was incorrect / out of range".into())
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        error!(error = %e, "cluster request failed");
        ApiError::Unavailable(e.to_string())
    }
}

// ── Liveness / metrics ───────────────────────────────────────────────────────

// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connected_clusters": state.hub.registry().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /metrics: Prometheus text exposition format
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.to_prometheus(state.hub.registry());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

// ── Aggregate ────────────────────────────────────────────────────────────────

// GET /aggregate/guilds/count
pub async fn guild_count(State(state): State<AppState>) -> Json<Statistic> {
    let outcomes = state.request_all("guild_count", Map::new()).await;
    let stat = aggregate::guild_count(&outcomes, state.config.cluster_count);
    state.note_partial(stat.partial_response);
    Json(stat)
}

// GET /aggregate/cached/count
pub async fn cached_count(State(state): State<AppState>) -> Json<CachedItemsStatistic> {
    let outcomes = state.request_all("cached_item_count", Map::new()).await;
    let stat = aggregate::cached_items(&outcomes, state.config.cluster_count);
    state.note_partial(stat.partial_response);
    Json(stat)
}

// GET /aggregate/guilds/:guild_id/shard_info
pub async fn shard_info(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
) -> Result<Json<GuildShardInfo>, ApiError> {
    let info = shard::parse_and_resolve(
        &guild_id,
        state.config.total_shards,
        state.config.shards_per_cluster,
    )?;
    Ok(Json(info))
}

// ── Cluster ──────────────────────────────────────────────────────────────────

// GET /cluster/status
pub async fn cluster_status(State(state): State<AppState>) -> Json<ClusterHealth> {
    let outcomes = state.request_all("cluster_status", Map::new()).await;
    let expected = usize::try_from(state.config.total_shards).unwrap_or(usize::MAX);
    let health = aggregate::cluster_health(&outcomes, expected);
    state.note_partial(health.partial_response);
    Json(health)
}

// POST /cluster/:cluster_id/notify
pub async fn notify(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body?;
    let mut arguments = Map::new();
    arguments.insert("message".into(), Value::String(body.message));

    state.request(&cluster_id, "notify", arguments).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Premium ──────────────────────────────────────────────────────────────────

// POST /premium/:user_id/refresh
pub async fn refresh_premium(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id: u64 = user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("user_id must be an integer, got '{user_id}'")))?;

    let mut arguments = Map::new();
    arguments.insert("user_id".into(), json!(user_id));

    let outcomes = state.request_all("refresh_premium", arguments).await;
    match aggregate::all_succeeded(&outcomes) {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(failed) => {
            error!(user_id, failed = ?failed, "premium refresh failed on some clusters");
            Err(ApiError::Unavailable("Some bot clusters failed to refresh correctly.".into()))
        }
    }
}

// POST /premium/shared_guilds
pub async fn shared_guilds(
    State(state): State<AppState>,
    body: Result<Json<SharedGuildsRequest>, JsonRejection>,
) -> Result<Json<SharedGuilds>, ApiError> {
    let Json(body) = body?;
    let mut arguments = Map::new();
    arguments.insert("guild_ids".into(), json!(body.guild_ids));

    let outcomes = state.request_all("shared_guilds", arguments).await;
    let shared = aggregate::shared_guilds(&outcomes, state.config.cluster_count);
    state.note_partial(shared.partial_response);
    Ok(Json(shared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_message(response: Response) -> Message {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unavailable_maps_to_503_with_message() {
        let response = ApiError::from(RequestError::UnknownClient("7".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_message(response).await.message.contains("'7'"));
    }

    #[tokio::test]
    async fn shard_error_maps_to_400() {
        let response = ApiError::from(ShardError::InvalidGuildId("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_message(response).await,
            Message::new("guild_id was incorrect / out of range")
        );
    }
}
