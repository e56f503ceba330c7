use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::CoordinateError;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Comma-separated target indices; used when the request path does
    /// not carry them.
    pub indices: Option<String>,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok", "service": "filterjoin"}))
}

/// `POST /{indices}/_coordinate_search` and `POST /_coordinate_search`.
/// The body is the query document; filter joins are resolved before the
/// query is delegated upstream.
pub async fn coordinate_search_handler(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    Query(params): Query<SearchParams>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let indices = split_indices(
        path.map(|Path(p)| p)
            .or(params.indices)
            .unwrap_or_else(|| "_all".to_string()),
    );

    match state.coordinate.execute(&indices, &body).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            log::warn!("Coordinated search failed: {}", e);
            Err(error_response(&e))
        }
    }
}

/// `POST /_filterjoin/cache/clear` — administrative, not request-path.
pub async fn cache_clear_handler(State(state): State<AppState>) -> Json<Value> {
    state.cache.clear();
    Json(json!({"acknowledged": true}))
}

/// `GET /_filterjoin/cache/stats`
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<Value> {
    let metrics = state.cache.metrics();
    let hit_rate = metrics.hit_rate();
    let mut stats = serde_json::to_value(&metrics).unwrap_or_else(|_| json!({}));
    if let Some(map) = stats.as_object_mut() {
        map.insert("hit_rate".to_string(), json!(hit_rate));
    }
    Json(stats)
}

fn split_indices(raw: String) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn error_response(e: &CoordinateError) -> (StatusCode, Json<Value>) {
    let status = if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(json!({"error": e.to_string()})))
}
