//! Read-only consistency check of the access-group layout.
//!
//! Checks that no pre-migration field names survive and that every record
//! below a project carries the same `accessGroup` as that project. Records
//! whose parent no longer exists are counted as orphans, not violations;
//! the migration never touches them.

use crate::document::Document;
use crate::schema::collections::{MODIFICATIONS, PROJECTS, SCENARIOS};
use crate::schema::fields::*;
use crate::schema::{OPTIONAL_PROJECT_DEPENDENTS, PROJECT_DEPENDENTS};
use crate::store::{CollectionRegistry, Cursor, DocumentStore, Filter};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Violations kept in full; the rest are only counted
const MAX_REPORTED_VIOLATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub collection: String,
    pub id: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.collection, self.id, self.reason)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub records_checked: u64,
    /// Records whose project or scenario does not exist
    pub orphans: u64,
    pub violation_count: u64,
    /// The first violations found, capped
    pub violations: Vec<Violation>,
    /// Collections skipped because they do not exist
    pub skipped_collections: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violation_count == 0
    }

    /// `Err(Error::Validation)` summarising the violations, if any
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        let sample: Vec<String> = self.violations.iter().take(5).map(|v| v.to_string()).collect();
        Err(Error::Validation(format!(
            "{} access-group violation(s) in {} records, e.g. {}",
            self.violation_count,
            self.records_checked,
            sample.join("; ")
        )))
    }

    fn violation(&mut self, document: &Document, collection: &str, reason: impl Into<String>) {
        self.violation_count += 1;
        if self.violations.len() < MAX_REPORTED_VIOLATIONS {
            self.violations.push(Violation {
                collection: collection.to_string(),
                id: document.id().to_string(),
                reason: reason.into(),
            });
        }
    }
}

fn access_group_of(document: &Document) -> Value {
    document.get(ACCESS_GROUP).cloned().unwrap_or(Value::Null)
}

/// Walk every project-owned collection and compare access groups.
///
/// Holds one access-group value per project and per scenario in memory;
/// everything else is streamed in pages of `batch_size`.
pub fn audit_access_groups(store: &dyn DocumentStore, batch_size: usize) -> Result<AuditReport> {
    let registry = CollectionRegistry::load(store)?;
    let mut report = AuditReport::default();

    let mut project_groups: HashMap<String, Value> = HashMap::new();
    if registry.contains(PROJECTS) {
        Cursor::new(store, PROJECTS, Filter::all(), batch_size)?.try_for_each(|project| {
            report.records_checked += 1;
            if project.contains(GROUP) {
                report.violation(&project, PROJECTS, "legacy field `group` still present");
            }
            project_groups.insert(project.id().to_string(), access_group_of(&project));
            Ok(())
        })?;
    } else {
        report.skipped_collections.push(PROJECTS.to_string());
    }

    for &collection in OPTIONAL_PROJECT_DEPENDENTS.iter().chain(PROJECT_DEPENDENTS) {
        if !registry.contains(collection) {
            report.skipped_collections.push(collection.to_string());
            continue;
        }
        Cursor::new(store, collection, Filter::all(), batch_size)?.try_for_each(|document| {
            report.records_checked += 1;
            check_against_project(&mut report, &project_groups, collection, &document);
            Ok(())
        })?;
    }

    // Scenario id -> the access group its project hands down
    let mut scenario_groups: HashMap<String, Value> = HashMap::new();
    if registry.contains(SCENARIOS) {
        Cursor::new(store, SCENARIOS, Filter::all(), batch_size)?.try_for_each(|scenario| {
            report.records_checked += 1;
            if let Some(expected) =
                check_against_project(&mut report, &project_groups, SCENARIOS, &scenario)
            {
                scenario_groups.insert(scenario.id().to_string(), expected);
            }
            Ok(())
        })?;
    } else {
        report.skipped_collections.push(SCENARIOS.to_string());
    }

    if registry.contains(MODIFICATIONS) {
        Cursor::new(store, MODIFICATIONS, Filter::all(), batch_size)?.try_for_each(
            |modification| {
                report.records_checked += 1;
                check_modification(&mut report, &scenario_groups, &modification);
                Ok(())
            },
        )?;
    } else {
        report.skipped_collections.push(MODIFICATIONS.to_string());
    }

    if report.is_clean() {
        info!(
            records = report.records_checked,
            orphans = report.orphans,
            "Access-group audit passed"
        );
    } else {
        warn!(
            records = report.records_checked,
            violations = report.violation_count,
            orphans = report.orphans,
            "Access-group audit found violations"
        );
    }
    Ok(report)
}

/// Compare a project-owned record with its project. Returns the project's
/// access group, or `None` for an orphan.
fn check_against_project(
    report: &mut AuditReport,
    project_groups: &HashMap<String, Value>,
    collection: &str,
    document: &Document,
) -> Option<Value> {
    let expected = document
        .get_str(PROJECT_ID)
        .and_then(|project_id| project_groups.get(project_id));
    let Some(expected) = expected else {
        debug!(collection, id = %document.id(), "Orphaned record");
        report.orphans += 1;
        return None;
    };

    let actual = access_group_of(document);
    if !document.contains(ACCESS_GROUP) {
        report.violation(document, collection, "missing `accessGroup`");
    } else if actual != *expected {
        report.violation(
            document,
            collection,
            format!("accessGroup {} differs from project's {}", actual, expected),
        );
    }
    Some(expected.clone())
}

fn check_modification(
    report: &mut AuditReport,
    scenario_groups: &HashMap<String, Value>,
    modification: &Document,
) {
    if modification.contains(SCENARIO) {
        report.violation(modification, MODIFICATIONS, "legacy field `scenario` still present");
    }

    for (array_field, id_field) in [(TIMETABLES, TIMETABLE_ID), (ENTRIES, ENTRY_ID)] {
        let Some(Value::Array(items)) = modification.get(array_field) else {
            continue;
        };
        let unqualified = items
            .iter()
            .filter(|item| matches!(item, Value::Object(fields) if fields.contains_key(NESTED_ID)))
            .count();
        if unqualified > 0 {
            report.violation(
                modification,
                MODIFICATIONS,
                format!(
                    "{} element(s) of `{}` still use `id` instead of `{}`",
                    unqualified, array_field, id_field
                ),
            );
        }
    }

    let expected = modification
        .get_str(SCENARIO_ID)
        .and_then(|scenario_id| scenario_groups.get(scenario_id));
    let Some(expected) = expected else {
        debug!(id = %modification.id(), "Orphaned modification");
        report.orphans += 1;
        return;
    };

    if !modification.contains(ACCESS_GROUP) {
        report.violation(modification, MODIFICATIONS, "missing `accessGroup`");
    } else {
        let actual = access_group_of(modification);
        if actual != *expected {
            report.violation(
                modification,
                MODIFICATIONS,
                format!("accessGroup {} differs from project's {}", actual, expected),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn load(store: &MemoryStore, collection: &str, docs: Vec<Value>) {
        let docs = docs.into_iter().map(|d| Document::from_value(d).unwrap());
        store.load_collection(collection, docs).unwrap();
    }

    fn migrated_store() -> MemoryStore {
        let store = MemoryStore::new();
        load(&store, PROJECTS, vec![json!({"_id": "p1", "accessGroup": "g1"})]);
        load(&store, "bookmarks", vec![json!({"_id": "b1", "projectId": "p1", "accessGroup": "g1"})]);
        load(&store, "bundles", vec![]);
        load(&store, "regional-analyses", vec![]);
        load(&store, SCENARIOS, vec![json!({"_id": "s1", "projectId": "p1", "accessGroup": "g1"})]);
        load(
            &store,
            MODIFICATIONS,
            vec![json!({
                "_id": "m1",
                "scenarioId": "s1",
                "accessGroup": "g1",
                "timetables": [{"timetableId": "t1"}],
            })],
        );
        store
    }

    #[test]
    fn test_clean_data_set_passes() {
        let report = audit_access_groups(&migrated_store(), 10).unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.records_checked, 4);
        assert_eq!(report.orphans, 0);
        assert_eq!(report.skipped_collections, vec!["aggregationAreas".to_string()]);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_detects_mismatch_and_legacy_fields() {
        let store = migrated_store();
        load(
            &store,
            MODIFICATIONS,
            vec![json!({
                "_id": "m2",
                "scenario": "s1",
                "scenarioId": "s1",
                "accessGroup": "other",
                "entries": [{"id": "e1"}],
            })],
        );

        let report = audit_access_groups(&store, 1).unwrap();
        assert_eq!(report.violation_count, 3);
        assert!(report.violations.iter().all(|v| v.id == "m2"));
        assert!(matches!(report.into_result(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_orphans_are_not_violations() {
        let store = migrated_store();
        load(&store, "bundles", vec![json!({"_id": "x", "projectId": "gone"})]);
        load(&store, MODIFICATIONS, vec![json!({"_id": "m9", "scenarioId": "gone"})]);

        let report = audit_access_groups(&store, 10).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.orphans, 2);
    }

    #[test]
    fn test_missing_access_group_is_not_null() {
        let store = migrated_store();
        load(&store, PROJECTS, vec![json!({"_id": "p2"})]);
        load(
            &store,
            "bookmarks",
            vec![
                json!({"_id": "b2", "projectId": "p2", "accessGroup": null}),
                json!({"_id": "b3", "projectId": "p2"}),
            ],
        );

        let report = audit_access_groups(&store, 10).unwrap();
        assert_eq!(report.violation_count, 1);
        assert_eq!(report.violations[0].id, "b3");
    }
}
