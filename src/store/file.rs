//! Directory-of-dumps store.
//!
//! Each collection is one `<name>.json` file holding a JSON array of
//! documents, the shape `mongoexport --jsonArray` produces. The whole
//! directory is loaded into a [`MemoryStore`] on open; collections touched by
//! a write are rewritten on [`DocumentStore::flush`], each through a temporary
//! file and a rename so a crash never leaves a half-written dump.
//!
//! The maintenance lock is a `migration.lock` file next to the dumps, so two
//! processes that opened the same directory still exclude each other.

use super::{DocumentStore, Filter, MemoryStore, StoreStats, Update, UpdateResult};
use crate::document::{Document, DocumentId};
use crate::schema_migration::LOCK_COLLECTION;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DUMP_EXTENSION: &str = "json";
/// Maintenance lock, created exclusively so that separate processes exclude
/// each other. Not a dump: it never becomes a collection.
const LOCK_FILE: &str = "migration.lock";

pub struct JsonFileStore {
    dir: PathBuf,
    inner: MemoryStore,
    dirty: Mutex<BTreeSet<String>>,
}

impl JsonFileStore {
    /// Load every `*.json` dump in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "store directory {} does not exist",
                dir.display()
            )));
        }

        let inner = MemoryStore::new();
        load_dumps(&dir, &inner)?;

        info!(path = %dir.display(), "Opened JSON file store");
        Ok(Self {
            dir,
            inner,
            dirty: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Replace the working set with what is on disk now
    fn reload(&self) -> Result<()> {
        self.inner.clear();
        load_dumps(&self.dir, &self.inner)?;
        debug!(path = %self.dir.display(), "Reloaded collection dumps");
        Ok(())
    }

    fn write_lock_file(&self, file: &mut fs::File, record: Document) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&record.into_value())?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn dump_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", collection, DUMP_EXTENSION))
    }

    fn mark_dirty(&self, collection: &str) {
        self.dirty.lock().insert(collection.to_string());
    }

    fn write_collection(&self, collection: &str) -> Result<()> {
        let documents: Vec<Value> = self
            .inner
            .dump_collection(collection)?
            .into_iter()
            .map(Document::into_value)
            .collect();

        let target = self.dump_path(collection);
        let staging = target.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(fs::File::create(&staging)?);
            serde_json::to_writer_pretty(&mut writer, &documents)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| Error::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&staging, &target)?;
        debug!(collection, documents = documents.len(), "Wrote collection dump");
        Ok(())
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(&['/', '\\'][..]) || name.starts_with('.') {
        return Err(Error::Config(format!("invalid collection name `{}`", name)));
    }
    Ok(())
}

fn load_dumps(dir: &Path, inner: &MemoryStore) -> Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();

    for path in entries {
        if path.extension().and_then(|e| e.to_str()) != Some(DUMP_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let documents = read_dump(&path)?;
        let loaded = inner.load_collection(name, documents)?;
        debug!(collection = name, documents = loaded, "Loaded collection dump");
    }
    Ok(())
}

fn read_dump(path: &Path) -> Result<Vec<Document>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let value: Value = serde_json::from_reader(reader)?;
    match value {
        Value::Array(items) => items.into_iter().map(Document::from_value).collect(),
        _ => Err(Error::InvalidDocument(format!(
            "{} must contain a JSON array of documents",
            path.display()
        ))),
    }
}

impl DocumentStore for JsonFileStore {
    fn collection_names(&self) -> Result<Vec<String>> {
        self.inner.collection_names()
    }

    fn has_collection(&self, name: &str) -> Result<bool> {
        self.inner.has_collection(name)
    }

    fn create_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        if !self.inner.has_collection(name)? {
            self.inner.create_collection(name)?;
            self.mark_dirty(name);
        }
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        validate_collection_name(collection)?;
        self.inner.insert_one(collection, document)?;
        self.mark_dirty(collection);
        Ok(())
    }

    fn find_one(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        self.inner.find_one(collection, id)
    }

    fn find_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&DocumentId>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        self.inner.find_page(collection, filter, after, limit)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult> {
        let result = self.inner.update_many(collection, filter, update)?;
        if result.modified > 0 {
            self.mark_dirty(collection);
        }
        Ok(result)
    }

    fn update_one(
        &self,
        collection: &str,
        id: &DocumentId,
        update: &Update,
    ) -> Result<UpdateResult> {
        let result = self.inner.update_one(collection, id, update)?;
        if result.modified > 0 {
            self.mark_dirty(collection);
        }
        Ok(result)
    }

    fn delete_one(&self, collection: &str, id: &DocumentId) -> Result<bool> {
        let deleted = self.inner.delete_one(collection, id)?;
        if deleted {
            self.mark_dirty(collection);
        }
        Ok(deleted)
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }

    fn flush(&self) -> Result<()> {
        let pending: Vec<String> = std::mem::take(&mut *self.dirty.lock()).into_iter().collect();
        for (index, collection) in pending.iter().enumerate() {
            if let Err(e) = self.write_collection(collection) {
                // Keep the unwritten collections dirty for the next flush
                self.dirty.lock().extend(pending[index..].iter().cloned());
                return Err(e);
            }
        }
        if !pending.is_empty() {
            info!(collections = pending.len(), "Flushed collection dumps");
        }
        Ok(())
    }

    /// Creates the lock file exclusively, then reloads every dump so the run
    /// works on the data as the previous holder left it.
    fn acquire_lock(&self, record: Document) -> Result<()> {
        if !self.dirty.lock().is_empty() {
            return Err(Error::Storage(
                "unflushed writes pending; flush before taking the maintenance lock".to_string(),
            ));
        }

        let path = self.lock_path();
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateKey {
                    collection: LOCK_COLLECTION.to_string(),
                    id: record.id().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let taken = self
            .write_lock_file(&mut file, record)
            .and_then(|()| self.reload());
        if let Err(e) = taken {
            if let Err(cleanup) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %cleanup, "Could not remove lock file");
            }
            return Err(e);
        }
        Ok(())
    }

    fn current_lock(&self) -> Result<Option<Document>> {
        let content = match fs::read(self.lock_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // Created but not yet written by its holder
        if content.is_empty() {
            return Ok(Some(Document::from_value(serde_json::json!({"_id": "unknown"}))?));
        }
        Ok(Some(Document::from_value(serde_json::from_slice(&content)?)?))
    }

    fn release_lock(&self) -> Result<bool> {
        match fs::remove_file(self.lock_path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_dump(dir: &Path, name: &str, docs: Value) {
        fs::write(dir.join(format!("{}.json", name)), docs.to_string()).unwrap();
    }

    #[test]
    fn test_open_loads_every_dump() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "projects", json!([{"_id": "p1", "group": "g"}]));
        write_dump(dir.path(), "regional-analyses", json!([]));
        fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let store = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.collection_names().unwrap(),
            vec!["projects".to_string(), "regional-analyses".to_string()]
        );
        let project = store.find_one("projects", &"p1".into()).unwrap().unwrap();
        assert_eq!(project.get_str("group"), Some("g"));
    }

    #[test]
    fn test_flush_rewrites_only_modified_collections() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "projects", json!([{"_id": "p1", "group": "g"}]));
        write_dump(dir.path(), "bundles", json!([{"_id": "b1", "projectId": "p1"}]));
        let untouched_before = fs::read_to_string(dir.path().join("bundles.json")).unwrap();

        let store = JsonFileStore::open(dir.path()).unwrap();
        store
            .update_many("projects", &Filter::all(), &Update::new().rename("group", "accessGroup"))
            .unwrap();
        store.flush().unwrap();

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        let project = reopened.find_one("projects", &"p1".into()).unwrap().unwrap();
        assert_eq!(project.get_str("accessGroup"), Some("g"));
        assert!(!project.contains("group"));

        let untouched_after = fs::read_to_string(dir.path().join("bundles.json")).unwrap();
        assert_eq!(untouched_before, untouched_after);
        assert!(!dir.path().join("projects.json.tmp").exists());
    }

    #[test]
    fn test_open_rejects_malformed_dump() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "projects", json!({"_id": "p1"}));
        assert!(matches!(
            JsonFileStore::open(dir.path()),
            Err(Error::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(JsonFileStore::open(dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_collection_names_must_be_file_safe() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.create_collection("../escape").is_err());
        assert!(store.create_collection("_migrations").is_ok());
    }

    fn lock_record(holder: &str) -> Document {
        Document::from_value(json!({"_id": "_maintenance", "holder": holder})).unwrap()
    }

    #[test]
    fn test_lock_excludes_other_handles_on_same_directory() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "projects", json!([]));
        let first = JsonFileStore::open(dir.path()).unwrap();
        let second = JsonFileStore::open(dir.path()).unwrap();

        first.acquire_lock(lock_record("first")).unwrap();
        assert!(matches!(
            second.acquire_lock(lock_record("second")),
            Err(Error::DuplicateKey { .. })
        ));
        let held = second.current_lock().unwrap().unwrap();
        assert_eq!(held.get_str("holder"), Some("first"));

        assert!(first.release_lock().unwrap());
        assert!(!first.release_lock().unwrap());
        assert!(second.current_lock().unwrap().is_none());
        second.acquire_lock(lock_record("second")).unwrap();
    }

    #[test]
    fn test_lock_reloads_changes_made_by_other_handles() {
        let dir = TempDir::new().unwrap();
        write_dump(dir.path(), "projects", json!([{"_id": "p1", "group": "g"}]));
        let stale = JsonFileStore::open(dir.path()).unwrap();

        let writer = JsonFileStore::open(dir.path()).unwrap();
        writer
            .update_many("projects", &Filter::all(), &Update::new().rename("group", "accessGroup"))
            .unwrap();
        writer.flush().unwrap();

        stale.acquire_lock(lock_record("stale")).unwrap();
        let project = stale.find_one("projects", &"p1".into()).unwrap().unwrap();
        assert_eq!(project.get_str("accessGroup"), Some("g"));
        assert!(!project.contains("group"));
        assert!(stale.collection_names().unwrap().iter().all(|c| !c.contains("lock")));
    }

    #[test]
    fn test_lock_refused_with_unflushed_writes() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.create_collection("projects").unwrap();
        assert!(matches!(
            store.acquire_lock(lock_record("eager")),
            Err(Error::Storage(_))
        ));
        assert!(store.current_lock().unwrap().is_none());
    }
}
