//! Capability registry: which collections a store actually has.
//!
//! Built once before a run so stages consult a fixed answer instead of probing
//! the store mid-migration.

use super::DocumentStore;
use crate::{Error, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionRegistry {
    present: BTreeSet<String>,
}

impl CollectionRegistry {
    pub fn load(store: &dyn DocumentStore) -> Result<Self> {
        Ok(Self::from_names(store.collection_names()?))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            present: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.present.contains(collection)
    }

    /// Fail with `CollectionNotFound` for the first missing collection
    pub fn require(&self, collections: &[&str]) -> Result<()> {
        match collections.iter().find(|c| !self.contains(c)) {
            Some(missing) => Err(Error::CollectionNotFound((*missing).to_string())),
            None => Ok(()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.present.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_registry_reflects_store_catalog() {
        let store = MemoryStore::new();
        store.create_collection("projects").unwrap();
        store.create_collection("bundles").unwrap();

        let registry = CollectionRegistry::load(&store).unwrap();
        assert!(registry.contains("projects"));
        assert!(!registry.contains("aggregationAreas"));
        assert_eq!(registry.iter().collect::<Vec<_>>(), vec!["bundles", "projects"]);

        // Fixed at load time
        store.create_collection("aggregationAreas").unwrap();
        assert!(!registry.contains("aggregationAreas"));
    }

    #[test]
    fn test_require_names_missing_collection() {
        let registry = CollectionRegistry::from_names(["projects"]);
        assert!(registry.require(&["projects"]).is_ok());
        match registry.require(&["projects", "scenarios"]) {
            Err(Error::CollectionNotFound(name)) => assert_eq!(name, "scenarios"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
