//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("validation failed: {0}")]
  Validation(String),

  #[error("busy: {0}")]
  LockTimeout(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<archgraph_engine::Error> for ApiError {
  fn from(e: archgraph_engine::Error) -> Self {
    use archgraph_engine::Error as E;
    match e {
      E::Validation(inner) => Self::Validation(inner.to_string()),
      e @ E::LockTimeout { .. } => Self::LockTimeout(e.to_string()),
      E::Storage(inner) => Self::Store(inner),
      other => Self::Internal(other.to_string()),
    }
  }
}

impl From<archgraph_core::Error> for ApiError {
  fn from(e: archgraph_core::Error) -> Self {
    archgraph_engine::Error::from(e).into()
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
      ApiError::LockTimeout(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
      ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
    };
    if status.is_server_error() {
      error!(%status, "{message}");
    }
    (status, Json(json!({ "error": message }))).into_response()
  }
}
