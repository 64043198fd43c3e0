//! Error surface of the consistency core.
//!
//! Domain, authorization and storage failures all funnel into [`CoreError`],
//! the single error type returned by the services in [`crate::services`].

use thiserror::Error;

use tradeerp_auth::AuthzError;
use tradeerp_core::DomainError;

/// Storage-layer error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency or uniqueness violation.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Connection, transaction or query failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error returned by every core operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("inconsistent: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    Store(StoreError),
}

impl CoreError {
    pub fn not_found(what: &str, id: impl core::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }
}

impl From<DomainError> for CoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::InvalidState(msg) => Self::InvalidState(msg),
            DomainError::Inconsistent(msg) => Self::Inconsistent(msg),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

impl From<AuthzError> for CoreError {
    fn from(err: AuthzError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}
