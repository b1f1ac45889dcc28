//! Token store error types

use thiserror::Error;

/// Token store errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid user name: {0:?}")]
    InvalidUserName(String),

    #[error("secret service request timed out")]
    Timeout,

    #[error("secret service unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected secret service response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}
