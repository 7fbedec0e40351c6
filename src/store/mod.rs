//! Shared document store collaborator.
//!
//! Both participants see the same tree of JSON documents addressed by
//! `/`-separated paths. A collection is the set of documents directly under
//! a path; each document may itself have sub-collections. Storage and
//! replication are the store's business: this crate only relies on the
//! operations below and on push delivery of changes.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::subscription::Subscription;

pub use memory::MemoryStore;

/// Change to a watched collection. `remaining` is the number of documents
/// in the collection once the change is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange {
    Added {
        id: String,
        value: Value,
        remaining: usize,
    },
    Removed {
        id: String,
        remaining: usize,
    },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Creates or overwrites the document.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merges `fields` into an existing document; `NotFound` if absent.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Deleting an absent document succeeds.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Appends a document under a store-assigned id and returns the id.
    async fn add(&self, collection: &str, value: Value) -> Result<String, StoreError>;

    /// Documents of a collection in creation order.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Current value first, then every change; `None` while absent.
    ///
    /// A failed listener yields an `Err`; a watch that ends before it was
    /// cancelled lost its source as well.
    fn watch_document(&self, path: &str) -> Subscription<Result<Option<Value>, StoreError>>;

    /// Existing documents first (as `Added`, in creation order), then every
    /// addition and removal. Failures are reported like `watch_document`.
    fn watch_collection(
        &self,
        collection: &str,
    ) -> Subscription<Result<CollectionChange, StoreError>>;
}

pub fn join_path(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

pub(crate) fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}
