//! Unified error type for the HTTP handlers, stores and background tasks.
//!
//! `AppError` renders as `{ "kind": "...", "message": "..." }` so the UI can
//! tell a validation failure from a storage or scanner problem.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::ser::SerializeStruct;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// SQLite or flat-file persistence failures.
    #[error("{0}")]
    Database(String),

    /// Filesystem and process-spawn failures.
    #[error("{0}")]
    Io(String),

    /// Missing or malformed user input (form validation).
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate ids, duplicate addresses, dangling subnet references.
    #[error("{0}")]
    Conflict(String),

    /// fping could not be run or produced unusable output.
    #[error("{0}")]
    Scan(String),

    /// A notification provider rejected or failed to deliver an alert.
    #[error("{0}")]
    Notification(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Io(_) => "Io",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::Scan(_) => "Scan",
            AppError::Notification(_) => "Notification",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Notification(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Scan(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self)
    }
}

// ---- From implementations for `?` in stores and handlers ----

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::Conflict(err.to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Database(format!("stored data is not valid JSON: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("background task failed: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Notification(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::InvalidInput(format!("invalid URL: {}", err))
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AppError::Internal(format!("failed to build workbook: {}", err))
    }
}
