use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use monitor::ValidationError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures of the management API, rendered as `{"detail": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("Target not found")]
    NotFound,
    #[error("{0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let detail = match self {
            ApiError::Storage(e) => {
                error!(error = %format!("{e:#}"), "storage failure while serving request");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "detail": detail }))
    }
}
