//! crates/tutoring_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the marketplace's core logic.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! booking and session rules independent of the concrete document database,
//! auth provider, blob storage, and notification delivery.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use futures::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;

use crate::domain::{Notification, Session};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    AlreadyExists(String),
    /// A compare-and-swap write lost against a concurrent writer.
    #[error("Version conflict: {0}")]
    VersionConflict(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Document Store
//=========================================================================================

/// A stored document. `version` starts at 1 and grows by one on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

/// Top-level field updates. Keys may be dotted paths (`"deletedBy.u1"`)
/// which address nested object fields.
pub type Patch = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals { field: String, value: Value },
    /// Inclusive on both ends; an absent bound is open.
    Range {
        field: String,
        start: Option<Value>,
        end: Option<Value>,
    },
    ArrayContains { field: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A query over one collection: a conjunction of filters plus ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equals {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn where_between(
        mut self,
        field: &str,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::Range {
            field: field.to_string(),
            start: Some(start.into()),
            end: Some(end.into()),
        });
        self
    }

    pub fn where_array_contains(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Live query results. Each item is the full, current result set.
/// Dropping the stream tears the subscription down.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = PortResult<Vec<Document>>> + Send>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>>;

    /// Inserts a new document; fails with `AlreadyExists` if the id is taken.
    async fn create(&self, collection: &str, id: &str, data: Value) -> PortResult<Document>;

    /// Inserts or overwrites unconditionally.
    async fn set(&self, collection: &str, id: &str, data: Value) -> PortResult<Document>;

    /// Merges `patch` into an existing document as one atomic write.
    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document>;

    /// Overwrites the document only if it is still at `expected_version`.
    async fn replace_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        data: Value,
    ) -> PortResult<Document>;

    /// Deletes the document only if it is still at `expected_version`.
    async fn delete_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
    ) -> PortResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()>;

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>>;

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream>;
}

//=========================================================================================
// Authentication
//=========================================================================================

/// Provider errors; `code()` is surfaced verbatim to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("auth/invalid-email")]
    InvalidEmail,
    #[error("auth/weak-password")]
    WeakPassword,
    #[error("auth/email-already-in-use")]
    EmailAlreadyInUse,
    #[error("auth/user-not-found")]
    UserNotFound,
    #[error("auth/wrong-password")]
    WrongPassword,
    #[error("auth/invalid-token")]
    InvalidToken,
    #[error("auth/internal-error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::InvalidToken => "auth/invalid-token",
            AuthError::Internal(_) => "auth/internal-error",
        }
    }
}

/// The result of a successful sign-up or sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub uid: String,
    pub token: String,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    /// Resolves a bearer token to the uid it was issued for.
    async fn verify_token(&self, token: &str) -> Result<String, AuthError>;

    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;
}

//=========================================================================================
// Blob Storage, Notifications, Payments, Clock
//=========================================================================================

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path` and returns a download URL.
    async fn upload(&self, path: &str, bytes: &[u8]) -> PortResult<String>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers a notification. Callers treat this as fire-and-forget.
    async fn notify(&self, notification: &Notification) -> PortResult<()>;
}

#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Releases the held payment for a completed session to the tutor.
    async fn release(&self, session: &Session) -> PortResult<()>;

    /// Returns the payment for a cancelled session to the student.
    async fn refund(&self, session: &Session) -> PortResult<()>;
}

pub trait Clock: Send + Sync {
    /// Wall-clock time in the marketplace's local timezone, used for
    /// calendar rules (past dates, cancellation cutoff).
    fn local_now(&self) -> NaiveDateTime;

    /// Timestamp used for `createdAt`-style fields.
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
