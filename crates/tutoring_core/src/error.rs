//! crates/tutoring_core/src/error.rs
//!
//! The error type returned by every core marketplace operation.

use crate::ports::PortError;

/// The broad category of a [`ServiceError`], used by callers to decide how
/// to present it and whether anything may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input. Correct it and resubmit.
    Validation,
    /// The current state forbids the request (slot taken, wrong status, duplicate).
    Conflict,
    /// The caller is not the right participant.
    Unauthorized,
    NotFound,
    /// The backing store or network failed.
    Store,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Backing store error: {0}")]
    Store(#[from] PortError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        ServiceError::Unauthorized(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// The result of an operation whose primary state change went through.
///
/// `follow_ups` lists compensating side effects (slot release, refund, chat
/// creation, rating update) that failed afterwards. The primary change is
/// never rolled back for them; a non-empty list means manual follow-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub value: T,
    pub follow_ups: Vec<String>,
}

impl<T> Applied<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            follow_ups: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.follow_ups.is_empty()
    }

    /// A single "partial error" message for the caller, if anything failed.
    pub fn partial_error(&self) -> Option<String> {
        if self.follow_ups.is_empty() {
            None
        } else {
            Some(format!("Partial error: {}", self.follow_ups.join("; ")))
        }
    }
}
