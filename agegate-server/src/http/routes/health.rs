//! Health check endpoint

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinError;

use crate::http::server::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub database: DatabaseHealth,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub message: &'static str,
}

impl HealthResponse {
    fn new(connected: bool) -> Self {
        let timestamp = Utc::now().to_rfc3339();
        if connected {
            Self {
                status: "ok",
                message: "API is running",
                database: DatabaseHealth {
                    connected: true,
                    message: "Database connection is healthy",
                },
                timestamp,
            }
        } else {
            Self {
                status: "degraded",
                message: "API is running but database connection is not healthy",
                database: DatabaseHealth {
                    connected: false,
                    message: "Database connection failed",
                },
                timestamp,
            }
        }
    }
}

/// GET /health
///
/// The check runs in its own task so a panicking driver call becomes a 500
/// instead of tearing down the connection.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db = Arc::clone(&state.db);
    health_response(tokio::spawn(async move { db.check_health().await }).await)
}

fn health_response(outcome: Result<bool, JoinError>) -> Response {
    match outcome {
        Ok(true) => (StatusCode::OK, Json(HealthResponse::new(true))).into_response(),
        Ok(false) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::new(false))).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "Health check task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": "Health check failed",
                    "error": "Database check did not complete",
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response()
        }
    }
}

/// Health routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
