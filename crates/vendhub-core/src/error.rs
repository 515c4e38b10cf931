//! Error types shared across the VendHub workspace.

use thiserror::Error;

/// The workspace-wide error type.
#[derive(Debug, Error)]
pub enum VendHubError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: {from} → {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VendHubError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, VendHubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = VendHubError::not_found("Task", "t-1");
        assert_eq!(e.to_string(), "Task 't-1' not found");

        let e = VendHubError::InvalidTransition {
            from: "COMPLETED".into(),
            to: "IN_PROGRESS".into(),
        };
        assert!(e.to_string().contains("COMPLETED → IN_PROGRESS"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: VendHubError = io.into();
        assert!(matches!(e, VendHubError::Io(_)));
    }
}
