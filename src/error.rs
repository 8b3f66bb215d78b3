//! Error types for the entity access layer.
//!
//! Backend errors (`StoreError`, `CacheError`) stay close to the backend that
//! raised them. The service layer folds them into [`Error`], which is the only
//! error type callers of the read path and admin operations ever see.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`Store`](crate::database::Store) backend.
///
/// Absence is not an error: stores return `Ok(None)` / an empty row set for
/// ids they do not hold.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a [`Cache`](crate::cache::Cache) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Service-level error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Bad id or id list. Raised before any cache or store access.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store is unreachable and no stale fallback was available.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The cache is unreachable. Never raised on the read path.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A mutating administrative cache operation failed.
    #[error("cache operation failed: {0}")]
    CacheOperationFailed(String),

    /// The caller's deadline elapsed.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
        }
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(reason) => Self::CacheUnavailable(reason),
        }
    }
}

/// Result alias for service operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
