use thiserror::Error;

use crate::crypto::CryptoError;
use crate::store::StoreError;

/// Failures surfaced by the lifecycle manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Rejected before any storage call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Absent, expired, or already revealed.
    #[error("secret not found")]
    NotFound,

    /// Passphrase did not open the secret. The record is left intact.
    #[error("cannot decrypt secret")]
    Authentication,

    /// Storage did not answer in time. Safe to retry.
    #[error("storage timed out")]
    StorageTimeout,

    /// Storage refused or failed the call. Safe to retry.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageTimeout | Error::StorageUnavailable(_))
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Authentication => Error::Authentication,
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Timeout => Error::StorageTimeout,
            StoreError::Unavailable(reason) => Error::StorageUnavailable(reason),
            // A lost conditional update means someone else consumed the record.
            StoreError::ConditionFailed => Error::NotFound,
            StoreError::AlreadyExists => Error::Internal("public key collision".into()),
            StoreError::Corrupt(reason) => Error::Internal(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
