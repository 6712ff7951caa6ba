#![allow(dead_code)]

use lightning_migrate::schema_migration::{MigrationConfig, MigrationContext};
use lightning_migrate::store::{CollectionRegistry, DocumentStore, MemoryStore};
use lightning_migrate::{Document, DocumentId};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

pub fn load(store: &MemoryStore, collection: &str, documents: Vec<Value>) {
    let documents = documents
        .into_iter()
        .map(|d| Document::from_value(d).expect("fixture document"));
    store
        .load_collection(collection, documents)
        .expect("load fixture collection");
}

/// A pre-migration data set.
///
/// - p1 (group g1): scenarios s1, s2; bookmark, bundle, regional analysis
/// - p2 (group g2): scenario s3; bookmark, regional analysis
/// - p3 (no group): scenario s4
/// - p4 (group g4): nothing references it
/// - orphans: modification m5 (scenario gone), regional analysis r2
pub fn legacy_store(with_aggregation_areas: bool) -> MemoryStore {
    let store = MemoryStore::new();
    load(
        &store,
        "projects",
        vec![
            json!({"_id": "p1", "name": "Downtown", "group": "g1"}),
            json!({"_id": "p2", "name": "Suburbs", "group": "g2"}),
            json!({"_id": "p3", "name": "Ungrouped"}),
            json!({"_id": "p4", "name": "Empty", "group": "g4"}),
        ],
    );
    load(
        &store,
        "scenarios",
        vec![
            json!({"_id": "s1", "projectId": "p1", "name": "baseline"}),
            json!({"_id": "s2", "projectId": "p1", "name": "frequent"}),
            json!({"_id": "s3", "projectId": "p2", "name": "baseline"}),
            json!({"_id": "s4", "projectId": "p3", "name": "baseline"}),
        ],
    );
    load(
        &store,
        "modifications",
        vec![
            json!({
                "_id": "m1",
                "scenario": "s1",
                "type": "add-trip-pattern",
                "timetables": [
                    {"id": "t1", "headwaySecs": 600},
                    {"id": "t2", "headwaySecs": 900},
                ],
                "entries": [{"id": "e1", "stopId": "a"}],
            }),
            json!({"_id": "m2", "scenario": "s2", "type": "remove-stops"}),
            json!({
                "_id": "m3",
                "scenario": "s3",
                "timetables": [],
                "entries": [{"id": "e7"}, {"label": "no id"}],
            }),
            json!({"_id": "m4", "scenario": "s4", "timetables": [{"id": "t9"}]}),
            json!({"_id": "m5", "scenario": "deleted-scenario"}),
        ],
    );
    load(
        &store,
        "bookmarks",
        vec![
            json!({"_id": "b1", "projectId": "p1"}),
            json!({"_id": "b2", "projectId": "p2"}),
        ],
    );
    load(&store, "bundles", vec![json!({"_id": "u1", "projectId": "p1"})]);
    load(
        &store,
        "regional-analyses",
        vec![
            json!({"_id": "r1", "projectId": "p2"}),
            json!({"_id": "r2", "projectId": "deleted-project"}),
        ],
    );
    if with_aggregation_areas {
        load(
            &store,
            "aggregationAreas",
            vec![
                json!({"_id": "a1", "projectId": "p1"}),
                json!({"_id": "a2", "projectId": "p3"}),
            ],
        );
    }
    store
}

/// Fetch a document's fields as a JSON object
pub fn get(store: &dyn DocumentStore, collection: &str, id: &str) -> Value {
    store
        .find_one(collection, &DocumentId::new(id))
        .expect("find_one")
        .unwrap_or_else(|| panic!("{}/{} missing", collection, id))
        .into_value()
}

/// Every document of every collection, for before/after comparisons
pub fn snapshot(store: &MemoryStore) -> Vec<(String, Vec<Value>)> {
    store
        .collection_names()
        .expect("collection names")
        .into_iter()
        .map(|name| {
            let documents = store
                .dump_collection(&name)
                .expect("dump")
                .into_iter()
                .map(Document::into_value)
                .collect();
            (name, documents)
        })
        .collect()
}

pub fn small_batches() -> MigrationConfig {
    MigrationConfig {
        batch_size: 2,
        ..MigrationConfig::default()
    }
}

/// Run `f` with a context over `store`
pub fn with_context<T>(
    store: &dyn DocumentStore,
    config: &MigrationConfig,
    f: impl FnOnce(&MigrationContext<'_>) -> T,
) -> T {
    let registry = CollectionRegistry::load(store).expect("registry");
    let ctx = MigrationContext {
        store,
        registry: &registry,
        config,
    };
    f(&ctx)
}

pub fn write_dump(dir: &Path, collection: &str, documents: Value) {
    fs::write(
        dir.join(format!("{}.json", collection)),
        serde_json::to_vec_pretty(&documents).expect("serialize dump"),
    )
    .expect("write dump");
}

pub fn read_dump(dir: &Path, collection: &str) -> Value {
    let bytes = fs::read(dir.join(format!("{}.json", collection))).expect("read dump");
    serde_json::from_slice(&bytes).expect("parse dump")
}
