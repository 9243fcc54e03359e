//! Error types for the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing errors.
#[derive(Debug, Error)]
pub enum WebError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<rowgit_store::StoreError> for WebError {
    fn from(err: rowgit_store::StoreError) -> Self {
        use rowgit_store::StoreError;
        match err {
            // On a read-only GET surface, a path that is missing or has
            // the wrong shape is simply an absent resource.
            StoreError::NotFound(p) | StoreError::NotADirectory(p) | StoreError::IsADirectory(p) => {
                WebError::NotFound(p)
            }
            other => WebError::Internal(other.to_string()),
        }
    }
}

impl From<rowgit_git::GitError> for WebError {
    fn from(err: rowgit_git::GitError) -> Self {
        match err {
            rowgit_git::GitError::Store(e) => e.into(),
            other => WebError::Internal(other.to_string()),
        }
    }
}
