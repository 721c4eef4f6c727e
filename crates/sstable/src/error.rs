use std::io;

use thiserror::Error;

/// Errors produced while building or reading sorted tables.
#[derive(Debug, Error)]
pub enum SstError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// On-disk bytes failed a checksum, magic or structural check.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller broke a builder precondition (e.g. unsorted input).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("compression error: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, SstError>;

pub(crate) fn corruption(msg: impl Into<String>) -> SstError {
    SstError::Corruption(msg.into())
}
