//! services/api/src/adapters/postgres.rs
//!
//! This module contains the PostgreSQL document store, which is the concrete
//! implementation of the `DocumentStore` port from the `core` crate. Every
//! collection lives in one `documents` table as versioned JSONB rows.
//!
//! Filters are pre-applied in SQL through JSONB containment where they can be,
//! then re-checked in Rust with the same matching rules the in-memory store
//! uses, so both backends answer queries identically.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use tracing::{error, warn};
use tutoring_core::documents::apply_patch;
use tutoring_core::ports::{
    Document, DocumentStore, Filter, Patch, PortError, PortResult, Query, SnapshotStream,
};

/// The `LISTEN`/`NOTIFY` channel carrying the name of each written collection.
const CHANGE_CHANNEL: &str = "document_changes";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn announce(&self, collection: &str) {
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(collection)
            .execute(&self.pool)
            .await
        {
            warn!("Failed to announce change to {}: {:?}", collection, e);
        }
    }

    async fn run_query(pool: &PgPool, query: &Query) -> PortResult<Vec<Document>> {
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, version, data FROM documents \
             WHERE collection = $1 AND data @> $2 ORDER BY seq",
        )
        .bind(&query.collection)
        .bind(containment(query))
        .fetch_all(pool)
        .await
        .map_err(unexpected)?;

        let mut docs: Vec<Document> = records
            .into_iter()
            .map(DocumentRecord::to_domain)
            .filter(|doc| query.matches(&doc.data))
            .collect();
        query.arrange(&mut docs);
        Ok(docs)
    }

    /// Tells a failed conditional write apart: missing row or stale version.
    async fn conditional_failure(&self, collection: &str, id: &str, expected: u64) -> PortError {
        match self.get(collection, id).await {
            Ok(Some(doc)) => PortError::VersionConflict(format!(
                "{}/{} is at version {}, expected {}",
                collection, id, doc.version, expected
            )),
            Ok(None) => PortError::NotFound(format!("{}/{}", collection, id)),
            Err(e) => e,
        }
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    id: String,
    version: i64,
    data: Value,
}

impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            version: u64::try_from(self.version).unwrap_or_default(),
            data: self.data,
        }
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    error!("Document store query failed: {:?}", e);
    PortError::Unexpected(e.to_string())
}

fn version_param(version: u64) -> PortResult<i64> {
    i64::try_from(version)
        .map_err(|_| PortError::Unexpected(format!("version {} is out of range", version)))
}

/// Builds the JSONB object every matching row must contain. Covers equality
/// and array-membership filters; ranges are left to the exact check.
pub fn containment(query: &Query) -> Value {
    let mut root = Map::new();
    for filter in &query.filters {
        let (field, leaf) = match filter {
            Filter::Equals { field, value } => (field, value.clone()),
            Filter::ArrayContains { field, value } => (field, Value::Array(vec![value.clone()])),
            Filter::Range { .. } => continue,
        };
        let keys: Vec<&str> = field.split('.').collect();
        insert_path(&mut root, &keys, leaf);
    }
    Value::Object(root)
}

/// The first filter on a path wins; a path running through a scalar is skipped.
fn insert_path(map: &mut Map<String, Value>, keys: &[&str], leaf: Value) {
    match keys {
        [] => {}
        [last] => {
            map.entry(last.to_string()).or_insert(leaf);
        }
        [first, rest @ ..] => {
            if let Value::Object(child) = map
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
            {
                insert_path(child, rest, leaf);
            }
        }
    }
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, version, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(DocumentRecord::to_domain))
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3) \
             ON CONFLICT (collection, id) DO NOTHING \
             RETURNING id, version, data",
        )
        .bind(collection)
        .bind(id)
        .bind(&data)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::AlreadyExists(format!("{}/{}", collection, id)))?;
        self.announce(collection).await;
        Ok(record.to_domain())
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "INSERT INTO documents (collection, id, version, data) VALUES ($1, $2, 1, $3) \
             ON CONFLICT (collection, id) DO UPDATE \
             SET data = EXCLUDED.data, version = documents.version + 1, updated_at = now() \
             RETURNING id, version, data",
        )
        .bind(collection)
        .bind(id)
        .bind(&data)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        self.announce(collection).await;
        Ok(record.to_domain())
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let current = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, version, data FROM documents \
             WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;

        let mut data = current.data;
        apply_patch(&mut data, &patch)?;
        let record = sqlx::query_as::<_, DocumentRecord>(
            "UPDATE documents SET data = $3, version = version + 1, updated_at = now() \
             WHERE collection = $1 AND id = $2 \
             RETURNING id, version, data",
        )
        .bind(collection)
        .bind(id)
        .bind(&data)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        self.announce(collection).await;
        Ok(record.to_domain())
    }

    async fn replace_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        data: Value,
    ) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "UPDATE documents SET data = $4, version = version + 1, updated_at = now() \
             WHERE collection = $1 AND id = $2 AND version = $3 \
             RETURNING id, version, data",
        )
        .bind(collection)
        .bind(id)
        .bind(version_param(expected_version)?)
        .bind(&data)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(record) => {
                self.announce(collection).await;
                Ok(record.to_domain())
            }
            None => Err(self.conditional_failure(collection, id, expected_version).await),
        }
    }

    async fn delete_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "DELETE FROM documents WHERE collection = $1 AND id = $2 AND version = $3",
        )
        .bind(collection)
        .bind(id)
        .bind(version_param(expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(self.conditional_failure(collection, id, expected_version).await);
        }
        self.announce(collection).await;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        self.announce(collection).await;
        Ok(())
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        Self::run_query(&self.pool, query).await
    }

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream> {
        // Listen before the first read so no change slips between them.
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(unexpected)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(unexpected)?;
        let initial = Self::run_query(&self.pool, &query).await?;
        let pool = self.pool.clone();

        let stream = async_stream::stream! {
            let mut last = initial.clone();
            yield Ok(initial);
            loop {
                match listener.recv().await {
                    Ok(notification) if notification.payload() != query.collection => continue,
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(unexpected(e));
                        break;
                    }
                }
                match Self::run_query(&pool, &query).await {
                    Ok(snapshot) => {
                        if snapshot != last {
                            last = snapshot.clone();
                            yield Ok(snapshot);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tutoring_core::ports::Direction;

    #[test]
    fn containment_nests_dotted_fields_and_wraps_array_members() {
        let query = Query::collection("chats")
            .where_eq("participants.tutorId", "t1")
            .where_array_contains("participantIds", "s1")
            .where_between("date", "2024-06-01", "2024-06-30")
            .order_by("lastMessageTime", Direction::Descending);
        assert_eq!(
            containment(&query),
            json!({
                "participants": {"tutorId": "t1"},
                "participantIds": ["s1"]
            })
        );
    }

    #[test]
    fn clashing_filters_are_left_to_the_exact_check() {
        let query = Query::collection("users")
            .where_eq("role", "tutor")
            .where_eq("role.kind", "x")
            .where_eq("role", "student");
        assert_eq!(containment(&query), json!({"role": "tutor"}));
    }

    #[test]
    fn no_filters_match_everything() {
        assert_eq!(containment(&Query::collection("subjects")), json!({}));
    }
}
