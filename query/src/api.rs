//! HTTP surface for the read-only query daemon. Generalises
//! `server/src/api.rs` from "aggregate many agents' metrics over a
//! write endpoint" to "serve one scheduler's live snapshot over a
//! handful of read endpoints" — `GET /summary` replaces `POST /metrics`
//! as the one endpoint worth protecting with an API key.

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use tracing::warn;

use common::summary::StateSummary;

use crate::database::QueryDatabase;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Latest published summary, refreshed by the polling task in `main.rs`.
    pub summary: watch::Receiver<StateSummary>,
    pub database: std::sync::Arc<QueryDatabase>,
    pub api_key: Option<std::sync::Arc<String>>,
}

impl AppState {
    pub fn new(summary: watch::Receiver<StateSummary>, database: std::sync::Arc<QueryDatabase>, api_key: Option<String>) -> Self {
        AppState { summary, database, api_key: api_key.map(std::sync::Arc::new) }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/summary", get(get_summary))
        .route("/checkpoints", get(get_checkpoints))
        .route("/tasks/{name}/{point}", get(get_task_history))
        .with_state(state)
}

/// Constant-time API key check, same rationale as
/// `server/src/api.rs::validate_api_key`: a naive `==` comparison leaks
/// the matching prefix length through timing. A missing `api_key` in
/// config means the surface is unauthenticated (suitable for a
/// loopback-only bind).
fn validate_api_key(headers: &HeaderMap, expected: &Option<std::sync::Arc<String>>) -> Result<(), ApiError> {
    use subtle::ConstantTimeEq;

    let Some(expected) = expected else { return Ok(()) };

    let provided = match headers.get("x-api-key") {
        Some(v) => v.to_str().map_err(|_| ApiError::Unauthorized)?,
        None => return Err(ApiError::Unauthorized),
    };

    let matches = provided.len() == expected.len() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));
    if matches {
        Ok(())
    } else {
        warn!("rejected query request with invalid api key");
        Err(ApiError::Unauthorized)
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cylc-query",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_summary(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<StateSummary>, ApiError> {
    validate_api_key(&headers, &state.api_key)?;
    Ok(Json(state.summary.borrow().clone()))
}

async fn get_checkpoints(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    validate_api_key(&headers, &state.api_key)?;
    let checkpoints = state
        .database
        .list_checkpoints()
        .map_err(|e| ApiError::Database(e.to_string()))?;
    let body: Vec<_> = checkpoints
        .into_iter()
        .map(|c| serde_json::json!({ "id": c.id, "name": c.name, "time_created": c.time_created }))
        .collect();
    Ok(Json(body))
}

async fn get_task_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath((name, point)): AxumPath<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    validate_api_key(&headers, &state.api_key)?;
    let history = state
        .database
        .task_history(&name, &point)
        .map_err(|e| ApiError::Database(e.to_string()))?;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!("no recorded history for {name}.{point}")));
    }
    let body: Vec<_> = history
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "submit_num": r.submit_num,
                "state": r.state,
                "time_updated": r.time_updated,
                "host": r.host,
                "job_id": r.job_id,
            })
        })
        .collect();
    Ok(Json(body))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", key.parse().unwrap());
        headers
    }

    #[test]
    fn no_configured_key_means_every_request_passes() {
        assert!(validate_api_key(&HeaderMap::new(), &None).is_ok());
    }

    #[test]
    fn missing_header_is_rejected_when_a_key_is_configured() {
        let expected = Some(std::sync::Arc::new("secret".to_string()));
        assert!(validate_api_key(&HeaderMap::new(), &expected).is_err());
    }

    #[test]
    fn matching_key_is_accepted() {
        let expected = Some(std::sync::Arc::new("secret".to_string()));
        assert!(validate_api_key(&headers_with("secret"), &expected).is_ok());
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let expected = Some(std::sync::Arc::new("secret".to_string()));
        assert!(validate_api_key(&headers_with("wrong"), &expected).is_err());
    }
}
