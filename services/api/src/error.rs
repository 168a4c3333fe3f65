//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use crate::config::ConfigError;
use crate::web::rest::ErrorBody;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::{error, warn};
use tuvi_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Request body failed its declarative validation rules.
    #[error("Invalid payload: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// Request body was not JSON of the expected shape.
    #[error("Malformed body: {0}")]
    Body(#[from] JsonRejection),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

fn field_details(fields: impl IntoIterator<Item = (String, Vec<String>)>) -> Value {
    let map: Map<String, Value> = fields
        .into_iter()
        .map(|(field, messages)| (field, json!(messages)))
        .collect();
    json!({ "fieldErrors": map })
}

impl ApiError {
    /// Status, client-facing message and optional details.
    fn parts(&self) -> (StatusCode, String, Option<Value>) {
        match self {
            ApiError::Invalid(errors) => {
                let fields = errors.field_errors().into_iter().map(|(field, errs)| {
                    let messages = errs
                        .iter()
                        .map(|e| match &e.message {
                            Some(message) => message.to_string(),
                            None => e.code.to_string(),
                        })
                        .collect();
                    (field.to_string(), messages)
                });
                (StatusCode::BAD_REQUEST, "Invalid payload".to_string(), Some(field_details(fields)))
            }
            ApiError::Body(rejection) => (
                StatusCode::BAD_REQUEST,
                "Invalid payload".to_string(),
                Some(json!({ "formErrors": [rejection.body_text()] })),
            ),
            ApiError::Port(port) => match port {
                PortError::Validation { field, message } => (
                    StatusCode::BAD_REQUEST,
                    "Invalid payload".to_string(),
                    Some(field_details([(field.clone(), vec![message.clone()])])),
                ),
                PortError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone(), None),
                PortError::Conflict(message) => (StatusCode::CONFLICT, message.clone(), None),
                PortError::NoActivePrompt | PortError::NoReviewer => {
                    (StatusCode::BAD_REQUEST, port.to_string(), None)
                }
                PortError::Unauthorized => (StatusCode::UNAUTHORIZED, port.to_string(), None),
                PortError::Configuration(message) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, message.clone(), None)
                }
                PortError::Unexpected(_) => internal(),
            },
            _ => internal(),
        }
    }
}

fn internal() -> (StatusCode, String, Option<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
        None,
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = self.parts();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Server error");
        } else {
            warn!(error = %self, status = status.as_u16(), "Client error");
        }

        let body = ErrorBody {
            error: message,
            details,
        };
        (status, Json(body)).into_response()
    }
}
