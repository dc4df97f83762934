//! Error types for ip-core.

use thiserror::Error;

/// Error type for ip-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Fail(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
