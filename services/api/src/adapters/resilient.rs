//! services/api/src/adapters/resilient.rs
//!
//! A `DocumentStore` decorator that bounds every call with a timeout and
//! retries idempotent reads with exponential backoff.
//!
//! Writes are never retried here: a write that timed out may still have been
//! applied, and replaying a booking could double-book. Callers that need to
//! retry writes do so with compare-and-swap loops of their own.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tutoring_core::ports::{
    Document, DocumentStore, Patch, PortError, PortResult, Query, SnapshotStream,
};

/// Retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempts for a read, including the first one
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier (2.0 for exponential)
    pub backoff_multiplier: f64,
    /// Upper bound on any single store call
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Calculate backoff for attempt number (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(backoff_ms as u64).min(self.max_backoff)
    }
}

/// Only failures that might go away on their own are worth another read.
fn is_transient(error: &PortError) -> bool {
    matches!(error, PortError::Timeout(_) | PortError::Unexpected(_))
}

pub struct ResilientStore {
    inner: Arc<dyn DocumentStore>,
    config: RetryConfig,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn DocumentStore>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = PortResult<T>>,
    ) -> PortResult<T> {
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PortError::Timeout(format!(
                "{} took longer than {:?}",
                what, self.config.timeout
            ))),
        }
    }

    async fn read<'a, T, F, Fut>(&'a self, what: &str, mut op: F) -> PortResult<T>
    where
        F: FnMut(&'a dyn DocumentStore) -> Fut,
        Fut: Future<Output = PortResult<T>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.bounded(what, op(self.inner.as_ref())).await {
                Err(e) if is_transient(&e) && attempt + 1 < attempts => {
                    let backoff = self.config.backoff_for_attempt(attempt);
                    warn!("{} failed ({}), retrying in {:?}", what, e, backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl DocumentStore for ResilientStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        self.read("get", |store| store.get(collection, id)).await
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        self.bounded("create", self.inner.create(collection, id, data))
            .await
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        self.bounded("set", self.inner.set(collection, id, data)).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        self.bounded("update", self.inner.update(collection, id, patch))
            .await
    }

    async fn replace_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        data: Value,
    ) -> PortResult<Document> {
        self.bounded(
            "replace",
            self.inner
                .replace_if_version(collection, id, expected_version, data),
        )
        .await
    }

    async fn delete_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
    ) -> PortResult<()> {
        self.bounded(
            "delete",
            self.inner.delete_if_version(collection, id, expected_version),
        )
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        self.bounded("delete", self.inner.delete(collection, id)).await
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        self.read("query", |store| store.query(query)).await
    }

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream> {
        self.bounded("subscribe", self.inner.subscribe(query)).await
    }
}
