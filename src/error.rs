//! Error types shared by the store boundary and the database helpers.

use std::fmt;

use thiserror::Error;

/// Status codes reported by the backing document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    PermissionDenied,
    FailedPrecondition,
    Aborted,
    Unavailable,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "invalid-argument",
            ErrorCode::NotFound => "not-found",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::FailedPrecondition => "failed-precondition",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A failure reported by the backing store.
///
/// Operation helpers hand these back unchanged; subscriptions capture them
/// into the binding's error cell instead.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}

/// Errors returned by [`crate::Database`] helpers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("document store is not initialized; call Database::initialize(..) before using data helpers")]
    NotInitialized,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to decode document: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    /// Returns the store status code, if this error came from the store.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Store(e) => Some(e.code),
            _ => None,
        }
    }
}
