//! In-memory document store

use super::{DocumentStore, Filter, StoreStats, Update, UpdateResult};
use crate::document::{Document, DocumentId};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

type Collection = BTreeMap<DocumentId, Map<String, Value>>;

#[derive(Default)]
struct Counters {
    documents_read: AtomicU64,
    update_calls: AtomicU64,
    documents_modified: AtomicU64,
    documents_inserted: AtomicU64,
    documents_deleted: AtomicU64,
}

/// Collections held in ordered maps keyed by document id
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load documents into a collection, creating it if needed.
    /// Loading does not count towards [`StoreStats`].
    pub fn load_collection<I>(&self, name: &str, documents: I) -> Result<usize>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut collections = self.collections.write();
        let collection = collections.entry(name.to_string()).or_default();
        let mut loaded = 0;
        for document in documents {
            let id = document.id().clone();
            if collection.contains_key(&id) {
                return Err(Error::DuplicateKey {
                    collection: name.to_string(),
                    id: id.to_string(),
                });
            }
            collection.insert(id, document.into_fields());
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Every document of a collection in id order
    pub fn dump_collection(&self, name: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
        collection
            .values()
            .map(|fields| Document::from_fields(fields.clone()))
            .collect()
    }

    /// Drop every collection. Counters are kept.
    pub fn clear(&self) {
        self.collections.write().clear();
    }

    fn apply_update(
        fields: &mut Map<String, Value>,
        update: &Update,
        result: &mut UpdateResult,
    ) {
        result.matched += 1;
        if update.apply(fields) {
            result.modified += 1;
        }
    }

    fn record_update(&self, result: &UpdateResult) {
        self.counters.update_calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .documents_modified
            .fetch_add(result.modified, Ordering::Relaxed);
    }
}

impl DocumentStore for MemoryStore {
    fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    fn create_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let id = document.id().clone();
        if target.contains_key(&id) {
            return Err(Error::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        target.insert(id, document.into_fields());
        self.counters
            .documents_inserted
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn find_one(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        let collections = self.collections.read();
        let source = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        match source.get(id) {
            Some(fields) => {
                self.counters.documents_read.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Document::from_fields(fields.clone())?))
            }
            None => Ok(None),
        }
    }

    fn find_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&DocumentId>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let source = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let page = source
            .range((lower, Bound::Unbounded))
            .filter(|(_, fields)| filter.matches(fields))
            .take(limit)
            .map(|(_, fields)| Document::from_fields(fields.clone()))
            .collect::<Result<Vec<_>>>()?;

        self.counters
            .documents_read
            .fetch_add(page.len() as u64, Ordering::Relaxed);
        trace!(collection, %filter, returned = page.len(), "find_page");
        Ok(page)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult> {
        update.validate()?;
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let mut result = UpdateResult::default();
        for fields in target.values_mut().filter(|fields| filter.matches(fields)) {
            Self::apply_update(fields, update, &mut result);
        }
        self.record_update(&result);
        trace!(collection, %filter, %update, matched = result.matched, modified = result.modified, "update_many");
        Ok(result)
    }

    fn update_one(
        &self,
        collection: &str,
        id: &DocumentId,
        update: &Update,
    ) -> Result<UpdateResult> {
        update.validate()?;
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;

        let mut result = UpdateResult::default();
        if let Some(fields) = target.get_mut(id) {
            Self::apply_update(fields, update, &mut result);
        }
        self.record_update(&result);
        trace!(collection, %id, %update, modified = result.modified, "update_one");
        Ok(result)
    }

    fn delete_one(&self, collection: &str, id: &DocumentId) -> Result<bool> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        let deleted = target.remove(id).is_some();
        if deleted {
            self.counters
                .documents_deleted
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            documents_read: self.counters.documents_read.load(Ordering::Relaxed),
            update_calls: self.counters.update_calls.load(Ordering::Relaxed),
            documents_modified: self.counters.documents_modified.load(Ordering::Relaxed),
            documents_inserted: self.counters.documents_inserted.load(Ordering::Relaxed),
            documents_deleted: self.counters.documents_deleted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn store_with_scenarios() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .load_collection(
                "scenarios",
                vec![
                    doc(json!({"_id": "s1", "projectId": "p1"})),
                    doc(json!({"_id": "s2", "projectId": "p2"})),
                    doc(json!({"_id": "s3", "projectId": "p1"})),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_find_page_walks_in_id_order() {
        let store = store_with_scenarios();
        let filter = Filter::eq("projectId", json!("p1"));

        let first = store.find_page("scenarios", &filter, None, 1).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id().as_str(), "s1");

        let second = store
            .find_page("scenarios", &filter, Some(first[0].id()), 10)
            .unwrap();
        let ids: Vec<&str> = second.iter().map(|d| d.id().as_str()).collect();
        assert_eq!(ids, vec!["s3"]);
    }

    #[test]
    fn test_update_many_counts_matched_and_modified() {
        let store = store_with_scenarios();
        let update = Update::new().set("accessGroup", json!("g"));

        let result = store
            .update_many("scenarios", &Filter::eq("projectId", json!("p1")), &update)
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 2, modified: 2 });

        let again = store
            .update_many("scenarios", &Filter::eq("projectId", json!("p1")), &update)
            .unwrap();
        assert_eq!(again, UpdateResult { matched: 2, modified: 0 });

        let stats = store.stats();
        assert_eq!(stats.update_calls, 2);
        assert_eq!(stats.documents_modified, 2);
    }

    #[test]
    fn test_missing_collection_is_an_error() {
        let store = MemoryStore::new();
        let update = Update::new().set("a", json!(1));
        assert!(matches!(
            store.update_many("bookmarks", &Filter::all(), &update),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(store.find_page("bookmarks", &Filter::all(), None, 10).is_err());
        assert!(!store.has_collection("bookmarks").unwrap());
    }

    #[test]
    fn test_insert_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store.insert_one("_migration_lock", doc(json!({"_id": "lock"}))).unwrap();
        assert!(matches!(
            store.insert_one("_migration_lock", doc(json!({"_id": "lock"}))),
            Err(Error::DuplicateKey { .. })
        ));
        assert!(store.delete_one("_migration_lock", &"lock".into()).unwrap());
        assert!(!store.delete_one("_migration_lock", &"lock".into()).unwrap());
    }

    #[test]
    fn test_update_one_on_unknown_id_matches_nothing() {
        let store = store_with_scenarios();
        let result = store
            .update_one("scenarios", &"s9".into(), &Update::new().set("a", json!(1)))
            .unwrap();
        assert_eq!(result, UpdateResult::default());
    }

    #[test]
    fn test_updates_cannot_touch_primary_key() {
        let store = store_with_scenarios();
        let result = store.update_one(
            "scenarios",
            &"s1".into(),
            &Update::new().rename("projectId", "_id"),
        );
        assert!(matches!(result, Err(Error::InvalidUpdate(_))));
    }
}
