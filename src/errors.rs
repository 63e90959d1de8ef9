//! Error handling for the CI compliance engine
//!
//! Every fallible operation in the crate returns [`CiResult`]. The four
//! user-facing kinds (not found, forbidden, invalid state, validation) carry
//! distinct codes so the calling layer can render the right guidance.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the compliance engine
#[derive(Error, Debug)]
pub enum CiError {
    #[error("Resource not found: {resource} - {id}")]
    NotFound { resource: String, id: String },

    #[error("Forbidden: {operation} - {reason}")]
    Forbidden { operation: String, reason: String },

    #[error("Invalid state: {operation} not permitted while report is {status}")]
    InvalidState { operation: String, status: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Computation error: {message}")]
    Computation { message: String },

    #[error("Unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("Audit integrity violation: {message}")]
    AuditIntegrity { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database operation failed: {operation} - {source}")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type CiResult<T> = Result<T, CiError>;

/// Stable classification of a [`CiError`] exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    ValidationError,
    Conflict,
    ComputationError,
    Unauthenticated,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ComputationError => "computation_error",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::ComputationError | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl CiError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn forbidden(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Forbidden {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, status: impl Into<String>) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            status: status.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Engine invariant violation. Callers should route these through
    /// [`crate::log_sink::alert_defect`].
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    pub fn audit_integrity(message: impl Into<String>) -> Self {
        Self::AuditIntegrity {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn database(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CiError::NotFound { .. } => ErrorKind::NotFound,
            CiError::Forbidden { .. } => ErrorKind::Forbidden,
            CiError::InvalidState { .. } => ErrorKind::InvalidState,
            CiError::Validation { .. } => ErrorKind::ValidationError,
            CiError::Conflict { .. } => ErrorKind::Conflict,
            CiError::Computation { .. } => ErrorKind::ComputationError,
            CiError::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            CiError::AuditIntegrity { .. }
            | CiError::Config { .. }
            | CiError::Database { .. }
            | CiError::Serialization { .. }
            | CiError::MutexPoisoned { .. }
            | CiError::Io { .. } => ErrorKind::Internal,
        }
    }

    /// True for denials the audit log records as attempts.
    pub fn is_denial(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Forbidden | ErrorKind::InvalidState | ErrorKind::Conflict
        )
    }
}

#[derive(Serialize)]
struct ErrBody {
    code: &'static str,
    error: String,
}

impl IntoResponse for CiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = ErrBody {
            code: kind.code(),
            error: self.to_string(),
        };
        (kind.status(), Json(body)).into_response()
    }
}

/// Lock a mutex without panicking on poison.
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self) -> CiResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> CiResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| CiError::MutexPoisoned {
            resource: "compliance_store".to_string(),
        })
    }
}

impl From<sled::Error> for CiError {
    fn from(err: sled::Error) -> Self {
        CiError::database("sled_operation", err)
    }
}

impl From<serde_json::Error> for CiError {
    fn from(err: serde_json::Error) -> Self {
        CiError::serialization("json_operation", err)
    }
}

impl From<std::io::Error> for CiError {
    fn from(err: std::io::Error) -> Self {
        CiError::io("io_operation", err)
    }
}

impl From<figment::Error> for CiError {
    fn from(err: figment::Error) -> Self {
        CiError::config(err.to_string())
    }
}
