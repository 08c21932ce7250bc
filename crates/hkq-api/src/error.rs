//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use hkq_core::{HkqError, StoreError};

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    UnknownIntent(String),
    UnsupportedLanguage(String),
    BadRequest(String),
    SchemaViolation(String),
    MalformedQuery(String),
    StoreTimeout(String),
    StoreUnavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::UnknownIntent(intent) => (
                StatusCode::NOT_FOUND,
                ApiError::new("UNKNOWN_INTENT", format!("No template for intent '{intent}'")),
            ),
            AppError::UnsupportedLanguage(language) => (
                StatusCode::BAD_REQUEST,
                ApiError::new(
                    "UNSUPPORTED_LANGUAGE",
                    format!("Language '{language}' is not supported"),
                ),
            ),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg))
            }
            AppError::SchemaViolation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("SCHEMA_VIOLATION", "Query template does not fit the ontology")
                    .with_details(msg),
            ),
            AppError::MalformedQuery(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("MALFORMED_QUERY", "Graph store rejected the compiled query")
                    .with_details(msg),
            ),
            AppError::StoreTimeout(msg) => (
                StatusCode::GATEWAY_TIMEOUT,
                ApiError::new("STORE_TIMEOUT", "Graph store did not answer in time")
                    .with_details(msg),
            ),
            AppError::StoreUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                ApiError::new("STORE_UNAVAILABLE", "Graph store is unavailable").with_details(msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", "Internal server error").with_details(msg),
            ),
        };

        if status.is_server_error() {
            warn!(code = %error.code, status = status.as_u16(), "Request failed");
        }
        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<HkqError> for AppError {
    fn from(err: HkqError) -> Self {
        match err {
            HkqError::UnknownIntent(intent) => AppError::UnknownIntent(intent),
            HkqError::UnsupportedLanguage(language) => AppError::UnsupportedLanguage(language),
            HkqError::InvalidInput(msg) => AppError::BadRequest(msg),
            HkqError::SchemaViolation { intent, detail } => {
                AppError::SchemaViolation(format!("{intent}: {detail}"))
            }
            HkqError::Store(StoreError::Timeout(after)) => {
                AppError::StoreTimeout(format!("no answer after {after:?}"))
            }
            HkqError::Store(StoreError::MalformedQuery(msg)) => AppError::MalformedQuery(msg),
            HkqError::Store(err @ (StoreError::Connection(_) | StoreError::InvalidResponse(_))) => {
                AppError::StoreUnavailable(err.to_string())
            }
            HkqError::InvalidOntology(msg) => {
                AppError::Internal(format!("Invalid ontology: {msg}"))
            }
            HkqError::InvalidTemplate(msg) => {
                AppError::Internal(format!("Invalid template: {msg}"))
            }
            HkqError::ConfigError(msg) => AppError::Internal(format!("Configuration error: {msg}")),
            HkqError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status_of(err: HkqError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(HkqError::UnknownIntent("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(HkqError::UnsupportedLanguage("ln".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(HkqError::SchemaViolation {
                intent: "x".into(),
                detail: "y".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StoreError::Timeout(Duration::from_secs(1)).into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(StoreError::Connection("refused".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(StoreError::MalformedQuery("line 1".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
