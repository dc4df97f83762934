//! Error types for ip-synth.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
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

    #[error("driver error: {0}")]
    Driver(String),
}

impl From<ip_core::Error> for Error {
    fn from(e: ip_core::Error) -> Self {
        Error::Fail(e.to_string())
    }
}
