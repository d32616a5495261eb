//! Custom Axum extractors
//!
//! Rejections are reported as [`ApiError`] so clients always get the JSON
//! error body.

use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::Json;
use serde_json::Value;

use super::error::ApiError;
use crate::models::{AgeFilter, AgeFilterParams, ValidationError};

/// Extract and validate `minAge` / `limit` from the query string
pub struct ValidAgeFilter(pub AgeFilter);

impl<S> FromRequestParts<S> for ValidAgeFilter
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params): Query<AgeFilterParams> = Query::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                ApiError::Validation(ValidationError::InvalidFormat {
                    field: "query",
                    reason: "malformed query string",
                })
            })?;

        Ok(Self(AgeFilter::try_from(params)?))
    }
}

/// Any JSON body, with parse failures mapped to a 400
pub struct JsonBody(pub Value);

impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidJson {
                reason: rejection.body_text(),
            })?;

        Ok(Self(value))
    }
}
