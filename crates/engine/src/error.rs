use config::ConfigError;
use sstable::SstError;
use thiserror::Error;
use wal::WalError;

/// Errors surfaced by [`Db`](crate::Db) and the transaction layer.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// A checksum or format check failed, or a merge operator rejected its
    /// input.
    #[error("corruption: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The call was malformed: unknown or dropped column family, oversized
    /// key, a merge without an operator, an operation on a finished
    /// transaction.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Optimistic validation failed at commit. The transaction stays active.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// The write would stall and the caller asked not to wait, or waited
    /// past `write_stall_timeout`.
    #[error("busy: {0}")]
    Busy(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<WalError> for Error {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(e) => Error::Io(e),
            WalError::Corrupt { .. } => Error::Corruption(e.to_string()),
            WalError::TooLarge(_) => Error::InvalidArgument(e.to_string()),
        }
    }
}

impl From<SstError> for Error {
    fn from(e: SstError) -> Self {
        match e {
            SstError::Io(e) => Error::Io(e),
            SstError::Corruption(msg) | SstError::Compression(msg) => Error::Corruption(msg),
            SstError::InvalidArgument(msg) => Error::InvalidArgument(msg),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}
