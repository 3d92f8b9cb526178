//! Request body extraction.
//!
//! The page and other clients do not always label their JSON bodies, so
//! [`JsonBody`] parses the body whatever its `Content-Type` says and turns
//! every failure into an [`ApiError`] with the usual JSON error body.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge(e.body_text())
            } else {
                ApiError::InvalidInput(format!("Failed to read request body: {}", e.body_text()))
            }
        })?;

        let Json(value) = Json::<T>::from_bytes(&bytes)
            .map_err(|e| ApiError::InvalidInput(format!("Invalid JSON body: {}", e.body_text())))?;

        Ok(Self(value))
    }
}
