use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{parent_path, CollectionChange, DocumentStore};
use crate::subscription::Subscription;
use crate::utils::random_id;

/// In-process [`DocumentStore`]. Clones share the same documents, so two
/// orchestrators holding clones talk to each other as if through a remote
/// store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Entry>,
    next_seq: u64,
    next_watcher: u64,
    doc_watchers: HashMap<String, Vec<(u64, DocumentSender)>>,
    collection_watchers: HashMap<String, Vec<(u64, CollectionSender)>>,
    offline: bool,
    writes: usize,
}

type DocumentSender = mpsc::UnboundedSender<Result<Option<Value>, StoreError>>;
type CollectionSender = mpsc::UnboundedSender<Result<CollectionChange, StoreError>>;

struct Entry {
    seq: u64,
    value: Value,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every read and write fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.inner).offline = offline;
    }

    /// Number of live watches across all paths.
    pub fn watcher_count(&self) -> usize {
        let inner = lock(&self.inner);
        inner.doc_watchers.values().map(Vec::len).sum::<usize>()
            + inner.collection_watchers.values().map(Vec::len).sum::<usize>()
    }

    /// Live watches on one collection.
    pub fn collection_watcher_count(&self, collection: &str) -> usize {
        lock(&self.inner)
            .collection_watchers
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Drops every listener as a lost connection would: each live watch
    /// yields one `Unavailable` error and then ends.
    pub fn interrupt_watches(&self) {
        let mut inner = lock(&self.inner);
        let documents = std::mem::take(&mut inner.doc_watchers);
        let collections = std::mem::take(&mut inner.collection_watchers);
        drop(inner);

        for (path, watchers) in documents {
            for (_, tx) in watchers {
                let _ = tx.send(Err(StoreError::Unavailable(format!("listener on {path} lost"))));
            }
        }
        for (collection, watchers) in collections {
            for (_, tx) in watchers {
                let _ = tx.send(Err(StoreError::Unavailable(format!(
                    "listener on {collection} lost"
                ))));
            }
        }
        debug!("memory store listeners interrupted");
    }

    /// Successful mutations so far.
    pub fn write_count(&self) -> usize {
        lock(&self.inner).writes
    }
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn children(&self, collection: &str) -> Vec<(u64, String, Value)> {
        let mut children: Vec<_> = self
            .docs
            .iter()
            .filter(|(path, _)| parent_path(path) == Some(collection))
            .map(|(path, entry)| {
                let id = path[collection.len() + 1..].to_string();
                (entry.seq, id, entry.value.clone())
            })
            .collect();
        children.sort_by_key(|(seq, _, _)| *seq);
        children
    }

    fn upsert(&mut self, path: &str, value: Value) {
        self.writes += 1;
        let created = match self.docs.get_mut(path) {
            Some(entry) => {
                entry.value = value.clone();
                false
            }
            None => {
                self.next_seq += 1;
                self.docs.insert(
                    path.to_string(),
                    Entry {
                        seq: self.next_seq,
                        value: value.clone(),
                    },
                );
                true
            }
        };

        self.notify_document(path, Some(value.clone()));
        if created {
            if let Some(collection) = parent_path(path) {
                let id = path[collection.len() + 1..].to_string();
                let remaining = self.children(collection).len();
                self.notify_collection(
                    collection,
                    CollectionChange::Added {
                        id,
                        value,
                        remaining,
                    },
                );
            }
        }
    }

    fn remove(&mut self, path: &str) {
        if self.docs.remove(path).is_none() {
            return;
        }
        self.writes += 1;
        self.notify_document(path, None);
        if let Some(collection) = parent_path(path) {
            let id = path[collection.len() + 1..].to_string();
            let remaining = self.children(collection).len();
            self.notify_collection(collection, CollectionChange::Removed { id, remaining });
        }
    }

    fn notify_document(&mut self, path: &str, value: Option<Value>) {
        if let Some(watchers) = self.doc_watchers.get_mut(path) {
            watchers.retain(|(_, tx)| tx.send(Ok(value.clone())).is_ok());
        }
    }

    fn notify_collection(&mut self, collection: &str, change: CollectionChange) {
        if let Some(watchers) = self.collection_watchers.get_mut(collection) {
            watchers.retain(|(_, tx)| tx.send(Ok(change.clone())).is_ok());
        }
    }
}

fn unregister_document(inner: Weak<Mutex<Inner>>, path: String, id: u64) -> impl FnOnce() + Send {
    move || {
        if let Some(inner) = inner.upgrade() {
            let mut inner = lock(&inner);
            if let Some(watchers) = inner.doc_watchers.get_mut(&path) {
                watchers.retain(|(watcher, _)| *watcher != id);
                if watchers.is_empty() {
                    inner.doc_watchers.remove(&path);
                }
            }
        }
    }
}

fn unregister_collection(
    inner: Weak<Mutex<Inner>>,
    collection: String,
    id: u64,
) -> impl FnOnce() + Send {
    move || {
        if let Some(inner) = inner.upgrade() {
            let mut inner = lock(&inner);
            if let Some(watchers) = inner.collection_watchers.get_mut(&collection) {
                watchers.retain(|(watcher, _)| *watcher != id);
                if watchers.is_empty() {
                    inner.collection_watchers.remove(&collection);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let inner = lock(&self.inner);
        inner.check_online()?;
        Ok(inner.docs.get(path).map(|entry| entry.value.clone()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        inner.check_online()?;
        inner.upsert(path, value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        inner.check_online()?;
        let mut merged = match inner.docs.get(path).map(|entry| &entry.value) {
            Some(Value::Object(existing)) => existing.clone(),
            Some(_) => Map::new(),
            None => return Err(StoreError::NotFound(path.to_string())),
        };
        merged.extend(fields);
        inner.upsert(path, Value::Object(merged));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = lock(&self.inner);
        inner.check_online()?;
        inner.remove(path);
        Ok(())
    }

    async fn add(&self, collection: &str, value: Value) -> Result<String, StoreError> {
        let mut inner = lock(&self.inner);
        inner.check_online()?;
        let id = random_id();
        inner.upsert(&format!("{collection}/{id}"), value);
        Ok(id)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let inner = lock(&self.inner);
        inner.check_online()?;
        Ok(inner
            .children(collection)
            .into_iter()
            .map(|(_, id, value)| (id, value))
            .collect())
    }

    fn watch_document(&self, path: &str) -> Subscription<Result<Option<Value>, StoreError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        inner.next_watcher += 1;
        let id = inner.next_watcher;

        let current = inner.docs.get(path).map(|entry| entry.value.clone());
        let _ = tx.send(Ok(current));
        inner
            .doc_watchers
            .entry(path.to_string())
            .or_default()
            .push((id, tx));
        debug!("watching document {path} (watcher {id})");

        Subscription::from_receiver(
            rx,
            unregister_document(Arc::downgrade(&self.inner), path.to_string(), id),
        )
    }

    fn watch_collection(
        &self,
        collection: &str,
    ) -> Subscription<Result<CollectionChange, StoreError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        inner.next_watcher += 1;
        let id = inner.next_watcher;

        for (index, (_, doc_id, value)) in inner.children(collection).into_iter().enumerate() {
            let _ = tx.send(Ok(CollectionChange::Added {
                id: doc_id,
                value,
                remaining: index + 1,
            }));
        }
        inner
            .collection_watchers
            .entry(collection.to_string())
            .or_default()
            .push((id, tx));
        debug!("watching collection {collection} (watcher {id})");

        Subscription::from_receiver(
            rx,
            unregister_collection(Arc::downgrade(&self.inner), collection.to_string(), id),
        )
    }
}
