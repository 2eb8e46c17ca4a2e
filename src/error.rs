//! Typed error kinds (spec §7) and their HTTP mapping, grounded on
//! `perstarkse-minne/common/src/error.rs`'s `thiserror`-based `AppError`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session gone: {0}")]
    SessionGone(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("model returned malformed extraction output: {0}")]
    ExtractionMalformed(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::SessionGone(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExtractionMalformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::EmbeddingUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The sentence sent to the caller — never the raw diagnostic (§7).
    fn user_message(&self) -> String {
        match self {
            AppError::InvalidInput(m) => m.clone(),
            AppError::SessionGone(_) => "This session no longer exists.".to_string(),
            AppError::Conflict(m) => m.clone(),
            AppError::UpstreamUnavailable(_) => {
                "A downstream service is temporarily unavailable. Please try again.".to_string()
            }
            AppError::ExtractionMalformed(_) => {
                "The document could not be fully processed; partial results were saved."
                    .to_string()
            }
            AppError::EmbeddingUnavailable(_) => {
                "Embedding generation is temporarily unavailable.".to_string()
            }
            AppError::Internal(_) => "An internal error occurred.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = ?self, "internal error");
        } else {
            tracing::warn!(error = %self, "request failed");
        }

        let status = self.status_code();
        let body = Json(json!({ "error": self.user_message() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
