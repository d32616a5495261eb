//! User endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::http::error::ApiError;
use crate::http::extractors::{JsonBody, ValidAgeFilter};
use crate::http::server::AppState;
use crate::models::User;

/// List response: the page plus the total matching `minAge`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListResponse {
    pub count: usize,
    pub total_count: u64,
    pub data: Vec<User>,
}

/// GET /users - visible users ordered by age
async fn list_users(
    State(state): State<Arc<AppState>>,
    ValidAgeFilter(filter): ValidAgeFilter,
) -> Result<Json<UserListResponse>, ApiError> {
    let users = state.users.find_by_age(filter).await?;
    let total_count = state.users.count_by_age(filter.min_age).await?;

    Ok(Json(UserListResponse {
        count: users.len(),
        total_count,
        data: users,
    }))
}

/// GET /users/{id} - a single user, if old enough to be visible
async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    state
        .users
        .find_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            message: "User not found or does not meet age requirements".to_string(),
        })
}

/// POST /users - create a user
async fn create_user(
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.users.create(body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// User routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user))
}
