use thiserror::Error;

use crate::xa::error::XaError;

/// Umbrella error type for the crate, mirroring the host database's top-level
/// `DbError` so this coordinator slots into a larger server's error handling
/// without every caller having to match on `XaError` directly.
#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("XA error: {0}")]
    Xa(#[from] XaError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
