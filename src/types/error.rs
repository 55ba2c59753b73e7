//! Error types for examdesk
//!
//! Every component returns [`ExamdeskError`]; the HTTP layer maps variants to
//! status codes and the public JSON envelope.

use hyper::StatusCode;

use super::usage::UsageLimits;

/// Main error type for examdesk operations
#[derive(Debug, thiserror::Error)]
pub enum ExamdeskError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    DuplicateSubmission(String),

    #[error("{message}")]
    LimitExceeded {
        message: String,
        limits: Box<UsageLimits>,
    },

    #[error("Question generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExamdeskError {
    pub fn limit_exceeded(message: impl Into<String>, limits: UsageLimits) -> Self {
        Self::LimitExceeded {
            message: message.into(),
            limits: Box::new(limits),
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateSubmission(_) => StatusCode::CONFLICT,
            Self::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamGeneration(_) => StatusCode::BAD_GATEWAY,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to an end user.
    ///
    /// Upstream, storage and internal failures are replaced with generic text.
    pub fn public_message(&self) -> String {
        match self {
            Self::UpstreamGeneration(_) => {
                "Question generation is temporarily unavailable. Please try again later.".into()
            }
            Self::Transport(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                "Internal server error".into()
            }
            Self::Unauthorized(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Usage snapshot carried by a quota rejection
    pub fn limits(&self) -> Option<&UsageLimits> {
        match self {
            Self::LimitExceeded { limits, .. } => Some(limits),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateSubmission(_))
    }
}

impl From<std::io::Error> for ExamdeskError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ExamdeskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for ExamdeskError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for ExamdeskError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<bson::ser::Error> for ExamdeskError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encoding failed: {}", err))
    }
}

impl From<mongodb::error::Error> for ExamdeskError {
    fn from(err: mongodb::error::Error) -> Self {
        if crate::db::is_duplicate_key(&err) {
            Self::DuplicateSubmission("Record already exists".into())
        } else {
            Self::Database(err.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ExamdeskError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for examdesk operations
pub type Result<T> = std::result::Result<T, ExamdeskError>;
