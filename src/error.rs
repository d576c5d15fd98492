//! Structured error types for request handling.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    ValidationFailed,

    // Access errors
    Unauthenticated,
    InvalidCredentials,
    Forbidden,

    // Not found errors
    NotFound,

    // Conflict errors
    AlreadyExists,
    IdentityConflict,
    StorageConflict,

    // Upstream errors
    ProviderUnavailable,

    // Internal errors
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed => 422,
            ErrorCode::Unauthenticated | ErrorCode::InvalidCredentials => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyExists
            | ErrorCode::IdentityConflict
            | ErrorCode::StorageConflict => 409,
            ErrorCode::ProviderUnavailable => 502,
            ErrorCode::DatabaseError | ErrorCode::InternalError => 500,
        }
    }
}

/// Structured error returned by services and rendered at the HTTP boundary.
#[derive(Debug, Serialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::ValidationFailed, format!("The {} field is required.", field))
            .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, reason).with_field(field)
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorCode::Unauthenticated, "You must be signed in.")
    }

    pub fn invalid_credentials() -> Self {
        Self::new(
            ErrorCode::InvalidCredentials,
            "These credentials do not match our records.",
        )
    }

    pub fn forbidden(action: &str, task_id: i64) -> Self {
        Self::new(
            ErrorCode::Forbidden,
            format!("You are not allowed to {} task {}.", action, task_id),
        )
    }

    pub fn task_not_found(task_id: i64) -> Self {
        Self::new(ErrorCode::NotFound, format!("Task not found: {}", task_id))
    }

    pub fn already_exists(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message).with_field(field)
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

// Allow using ? with anyhow errors from the database layer
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app_err) => app_err,
            Err(err) => {
                if err.downcast_ref::<rusqlite::Error>().is_some() {
                    AppError::database(err)
                } else {
                    AppError::internal(err)
                }
            }
        }
    }
}

/// Result type for service operations.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_statuses() {
        assert_eq!(ErrorCode::ValidationFailed.http_status(), 422);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::IdentityConflict.http_status(), 409);
        assert_eq!(ErrorCode::ProviderUnavailable.http_status(), 502);
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_app_error() {
        let err: anyhow::Error = AppError::forbidden("update", 7).into();
        let back: AppError = err.into();
        assert_eq!(back.code, ErrorCode::Forbidden);
    }

    #[test]
    fn test_missing_field_serialization() {
        let json = serde_json::to_value(AppError::missing_field("title")).unwrap();
        assert_eq!(json["code"], "VALIDATION_FAILED");
        assert_eq!(json["field"], "title");
        assert!(json.get("details").is_none());
    }
}
