use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parley_core::error::{self, ApiError};
use parley_core::reminders::FailureKind;

/// Postgres SQLSTATE for unique_violation.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Internal error type that converts to structured API responses
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Validation error (400)
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Resource not found (404)
    #[error("{resource} not found")]
    NotFound { resource: String },
    /// Missing or wrong admin token (401)
    #[error("unauthorized")]
    Unauthorized,
    /// An adapter or storage call exceeded its time bound (504)
    #[error("{adapter} did not respond within {}ms", .after.as_millis())]
    AdapterTimeout {
        adapter: &'static str,
        after: Duration,
    },
    /// An adapter answered with an error or could not be reached (502)
    #[error("{adapter} unavailable: {message}")]
    AdapterUnavailable {
        adapter: &'static str,
        message: String,
    },
    /// Enrichment failed on its last permitted attempt (500)
    #[error("enrichment for '{code}' gave up after {attempts} attempts")]
    EnrichmentExhausted { code: String, attempts: i32 },
    /// Database error (500)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Internal error (500)
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: None,
            docs_hint: None,
        }
    }

    pub fn unavailable(adapter: &'static str, err: impl std::fmt::Display) -> Self {
        AppError::AdapterUnavailable {
            adapter,
            message: err.to_string(),
        }
    }

    /// Classification used in scheduler run reports.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AppError::AdapterTimeout { .. } => FailureKind::AdapterTimeout,
            AppError::AdapterUnavailable { .. } => FailureKind::AdapterUnavailable,
            AppError::Database(_) => FailureKind::Storage,
            _ => FailureKind::Internal,
        }
    }
}

/// True when `err` is a Postgres unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message: "Missing or invalid admin token".to_string(),
                    field: Some("headers.authorization".to_string()),
                    received: None,
                    request_id,
                    docs_hint: Some("Send `Authorization: Bearer <PARLEY_ADMIN_TOKEN>`".to_string()),
                },
            ),
            AppError::AdapterTimeout { adapter, after } => {
                tracing::warn!(adapter, after_ms = after.as_millis() as u64, "Adapter timeout");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ApiError {
                        error: error::codes::ADAPTER_TIMEOUT.to_string(),
                        message: format!("{adapter} did not respond in time"),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry the request shortly.".to_string()),
                    },
                )
            }
            AppError::AdapterUnavailable { adapter, message } => {
                tracing::warn!(adapter, %message, "Adapter unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError {
                        error: error::codes::ADAPTER_UNAVAILABLE.to_string(),
                        message: format!("{adapter} is currently unavailable"),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::EnrichmentExhausted { code, attempts } => {
                tracing::error!(%code, attempts, "Enrichment exhausted");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::ENRICHMENT_EXHAUSTED.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}
