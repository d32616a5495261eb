//! API error types with IntoResponse
//!
//! Every error becomes `{"error": true, "message": ..., "timestamp": ...}`.
//! Server-side failures are logged and answered with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::db::repos::UserError;
use crate::models::ValidationError;

const GENERIC_MESSAGE: &str = "Internal Server Error";

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Validation failed (400)
    Validation(ValidationError),

    /// Request body is not valid JSON (400)
    InvalidJson { reason: String },

    /// Email already taken (400)
    Conflict { email: String },

    /// Resource not found or hidden (404)
    NotFound { message: String },

    /// Request exceeded its deadline (408)
    Timeout,

    /// Store or connection failure (500, logged)
    Database { cause: String },

    /// Internal error (500, logged)
    Internal { message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidJson { .. } | Self::Conflict { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Database { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::InvalidJson { reason } => format!("Invalid JSON body: {}", reason),
            Self::Conflict { email } => format!("User with email '{}' already exists", email),
            Self::NotFound { message } => message.clone(),
            Self::Timeout => "Request timed out".to_string(),
            Self::Database { cause } => {
                tracing::error!("Database error: {}", cause);
                GENERIC_MESSAGE.to_string()
            }
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                GENERIC_MESSAGE.to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": true,
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<UserError> for ApiError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::InvalidId(e) | UserError::Validation(e) => Self::Validation(e),
            UserError::Conflict { email } => Self::Conflict { email },
            UserError::Store(e) => Self::Database {
                cause: e.to_string(),
            },
            UserError::Connection(e) => Self::Database {
                cause: e.to_string(),
            },
        }
    }
}
