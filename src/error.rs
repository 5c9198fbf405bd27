//! Error handling for the application
//!
//! Two layers, following the pipeline's propagation policy:
//! `ScrapeError` carries the per-URL scraping taxonomy (403/429/parse/other)
//! consumed by the worker, and `AppError` is the HTTP-facing error with
//! status-code mapping for the axum handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Scraping error taxonomy
///
/// The worker treats these unevenly: `Forbidden` aborts the whole batch and
/// fails the job without a retry, everything else is recorded per URL and the
/// batch continues.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// HTTP 403. IP or User-Agent block; retrying will not help.
    #[error("HTTP 403 Forbidden — likely IP/UA block: {url}")]
    Forbidden { url: String },

    /// HTTP 429 persisted beyond the retry budget.
    #[error("HTTP 429 Too Many Requests — retry budget ({retries}) exhausted: {url}")]
    RateLimit { url: String, retries: u32 },

    /// Essential field (title) could not be recovered from the HTML.
    #[error("failed to parse article (no title recovered): {url}")]
    Parse { url: String },

    /// Generic HTTP/network exhaustion.
    #[error("scrape failed after {retries} retries: {url}: {message}")]
    Exhausted {
        url: String,
        retries: u32,
        message: String,
    },
}

impl ScrapeError {
    /// Fatal errors abort the batch and fail the job without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScrapeError::Forbidden { .. })
    }
}

/// LLM client errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Monthly budget exceeded or operator override; callers must stop.
    #[error("Gemini kill switch is active — monthly token budget exceeded or operator override")]
    KillSwitch,

    #[error("Gemini API call failed: {0}")]
    Api(String),

    /// Model output did not match the required JSON schema.
    #[error("LLM output failed validation: {0}")]
    Validation(String),
}

/// Main application error type for the HTTP surface
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Resource conflict: {message}")]
    Conflict { message: String },

    #[error("Database query failed")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::BadRequest { .. } => "BAD_REQUEST",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs, not in the response body.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.error_code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_is_fatal() {
        let err = ScrapeError::Forbidden {
            url: "https://news.example/a/1".to_string(),
        };
        assert!(err.is_fatal());

        let err = ScrapeError::RateLimit {
            url: "https://news.example/a/1".to_string(),
            retries: 3,
        };
        assert!(!err.is_fatal());

        let err = ScrapeError::Parse {
            url: "https://news.example/a/1".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_status_codes() {
        let err = AppError::NotFound {
            resource: "article 9".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = AppError::BadRequest {
            message: "bad date".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
