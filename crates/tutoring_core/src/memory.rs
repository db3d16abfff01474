//! crates/tutoring_core/src/memory.rs
//!
//! An in-process `DocumentStore`. Backs the `memory` deployment mode and
//! every core test. Writes are atomic per document and versioned, and live
//! subscriptions re-run their query whenever their collection changes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::documents::apply_patch;
use crate::ports::{Document, DocumentStore, Patch, PortError, PortResult, Query, SnapshotStream};

const CHANGE_BUFFER: usize = 256;

struct Stored {
    version: u64,
    /// Insertion order, the tiebreak for equal sort keys.
    seq: u64,
    data: Value,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, HashMap<String, Stored>>,
    next_seq: u64,
}

#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
    changes: broadcast::Sender<String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            changes,
        }
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PortError::Unexpected("memory store lock poisoned".to_string()))
    }

    fn announce(&self, collection: &str) {
        // No receivers simply means nobody is subscribed.
        let _ = self.changes.send(collection.to_string());
    }

    fn run_query(&self, query: &Query) -> PortResult<Vec<Document>> {
        let inner = self.lock()?;
        let mut hits: Vec<(u64, Document)> = inner
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, stored)| query.matches(&stored.data))
                    .map(|(id, stored)| {
                        (
                            stored.seq,
                            Document {
                                id: id.clone(),
                                version: stored.version,
                                data: stored.data.clone(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        hits.sort_by_key(|(seq, _)| *seq);
        let mut docs: Vec<Document> = hits.into_iter().map(|(_, doc)| doc).collect();
        query.arrange(&mut docs);
        Ok(docs)
    }

    fn write(
        &self,
        collection: &str,
        id: &str,
        apply: impl FnOnce(Option<&Stored>) -> PortResult<Option<Value>>,
    ) -> PortResult<Option<Document>> {
        let mut inner = self.lock()?;
        let seq = inner.next_seq;
        let docs = inner.collections.entry(collection.to_string()).or_default();
        let current = docs.get(id);
        let next_version = current.map_or(1, |s| s.version + 1);
        let keep_seq = current.map(|s| s.seq);

        let outcome = match apply(current)? {
            Some(data) => {
                docs.insert(
                    id.to_string(),
                    Stored {
                        version: next_version,
                        seq: keep_seq.unwrap_or(seq),
                        data: data.clone(),
                    },
                );
                Some(Document {
                    id: id.to_string(),
                    version: next_version,
                    data,
                })
            }
            None => {
                docs.remove(id);
                None
            }
        };
        if keep_seq.is_none() {
            inner.next_seq += 1;
        }
        drop(inner);

        self.announce(collection);
        Ok(outcome)
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .map(|inner| inner.collections.get(collection).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn written(doc: Option<Document>, collection: &str, id: &str) -> PortResult<Document> {
    doc.ok_or_else(|| PortError::Unexpected(format!("{}/{} vanished during write", collection, id)))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> PortResult<Option<Document>> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| Document {
                id: id.to_string(),
                version: stored.version,
                data: stored.data.clone(),
            }))
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        let doc = self.write(collection, id, |current| match current {
            Some(_) => Err(PortError::AlreadyExists(format!("{}/{}", collection, id))),
            None => Ok(Some(data)),
        })?;
        written(doc, collection, id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> PortResult<Document> {
        let doc = self.write(collection, id, |_| Ok(Some(data)))?;
        written(doc, collection, id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> PortResult<Document> {
        let doc = self.write(collection, id, |current| {
            let stored =
                current.ok_or_else(|| PortError::NotFound(format!("{}/{}", collection, id)))?;
            let mut data = stored.data.clone();
            apply_patch(&mut data, &patch)?;
            Ok(Some(data))
        })?;
        written(doc, collection, id)
    }

    async fn replace_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        data: Value,
    ) -> PortResult<Document> {
        let doc = self.write(collection, id, |current| match current {
            None => Err(PortError::NotFound(format!("{}/{}", collection, id))),
            Some(s) if s.version != expected_version => Err(PortError::VersionConflict(format!(
                "{}/{} is at version {}, expected {}",
                collection, id, s.version, expected_version
            ))),
            Some(_) => Ok(Some(data)),
        })?;
        written(doc, collection, id)
    }

    async fn delete_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
    ) -> PortResult<()> {
        self.write(collection, id, |current| match current {
            None => Err(PortError::NotFound(format!("{}/{}", collection, id))),
            Some(s) if s.version != expected_version => Err(PortError::VersionConflict(format!(
                "{}/{} is at version {}, expected {}",
                collection, id, s.version, expected_version
            ))),
            Some(_) => Ok(None),
        })?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> PortResult<()> {
        self.write(collection, id, |_| Ok(None))?;
        Ok(())
    }

    async fn query(&self, query: &Query) -> PortResult<Vec<Document>> {
        self.run_query(query)
    }

    async fn subscribe(&self, query: Query) -> PortResult<SnapshotStream> {
        // Subscribe before the first read so no change slips between them.
        let mut changes = self.changes.subscribe();
        let initial = self.run_query(&query)?;
        let store = self.clone();

        let stream = async_stream::stream! {
            let mut last = initial.clone();
            yield Ok(initial);
            loop {
                match changes.recv().await {
                    Ok(collection) if collection != query.collection => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                match store.run_query(&query) {
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
