//! Document store abstraction the migrations run against.
//!
//! Backends:
//! - [`MemoryStore`]: in-process collections, used directly by tests and as
//!   the working set of the file backend
//! - [`JsonFileStore`]: a directory of JSON collection dumps, written back on
//!   [`DocumentStore::flush`]
//!
//! Every call blocks until the store has finished it. Single-document writes
//! are atomic; nothing spans documents.

use crate::document::{Document, DocumentId};
use crate::schema_migration::LOCK_COLLECTION;
use crate::Result;
use serde::{Deserialize, Serialize};

pub mod cursor;
pub mod file;
pub mod memory;
pub mod registry;
pub mod update;

pub use cursor::Cursor;
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use registry::CollectionRegistry;
pub use update::{Filter, Update, UpdateOp, UpdateResult};

/// Operation counters kept by every backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Documents returned by reads
    pub documents_read: u64,
    /// `update_one` / `update_many` calls issued
    pub update_calls: u64,
    /// Documents changed by updates
    pub documents_modified: u64,
    pub documents_inserted: u64,
    pub documents_deleted: u64,
}

/// Primitive operations of a document store.
///
/// Reads and updates against a collection that does not exist fail with
/// [`crate::Error::CollectionNotFound`]; inserts create the collection.
pub trait DocumentStore: Send + Sync {
    /// Names of all existing collections, sorted
    fn collection_names(&self) -> Result<Vec<String>>;

    fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collection_names()?.iter().any(|c| c == name))
    }

    /// Create an empty collection. No-op if it already exists.
    fn create_collection(&self, name: &str) -> Result<()>;

    /// Insert a new document; fails with `DuplicateKey` if the id is taken.
    fn insert_one(&self, collection: &str, document: Document) -> Result<()>;

    fn find_one(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>>;

    /// Up to `limit` documents matching `filter` with ids strictly greater
    /// than `after`, in id order.
    fn find_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&DocumentId>,
        limit: usize,
    ) -> Result<Vec<Document>>;

    /// Apply `update` to every document matching `filter`
    fn update_many(&self, collection: &str, filter: &Filter, update: &Update)
        -> Result<UpdateResult>;

    /// Apply `update` to a single document by id
    fn update_one(&self, collection: &str, id: &DocumentId, update: &Update)
        -> Result<UpdateResult>;

    fn delete_one(&self, collection: &str, id: &DocumentId) -> Result<bool>;

    fn stats(&self) -> StoreStats;

    /// Make every completed write durable
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Take the store-wide maintenance lock, recording `record` as its
    /// holder. Fails with `DuplicateKey` while any lock is held, including
    /// one taken by another process on the same data.
    fn acquire_lock(&self, record: Document) -> Result<()> {
        self.insert_one(LOCK_COLLECTION, record)?;
        self.flush()
    }

    /// The record of the current lock holder, if any
    fn current_lock(&self) -> Result<Option<Document>> {
        if !self.has_collection(LOCK_COLLECTION)? {
            return Ok(None);
        }
        Ok(self
            .find_page(LOCK_COLLECTION, &Filter::all(), None, 1)?
            .into_iter()
            .next())
    }

    /// Drop the lock. Returns whether one was held.
    fn release_lock(&self) -> Result<bool> {
        let Some(record) = self.current_lock()? else {
            return Ok(false);
        };
        let removed = self.delete_one(LOCK_COLLECTION, record.id())?;
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }
}
