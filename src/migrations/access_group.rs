//! 3.0.0: access groups.
//!
//! Projects' `group` becomes `accessGroup` and is copied onto everything that
//! hangs off a project, so records can be access-checked without walking up
//! to their project. Embedded timetables and entries stop using a bare `id`.
//!
//! Stages, in order:
//! 1. rename `projects.group` → `accessGroup`, `modifications.scenario` →
//!    `scenarioId`
//! 2. backfill `accessGroup` from each project onto its bookmarks, bundles,
//!    regional analyses, aggregation areas (when the collection exists),
//!    scenarios, and the scenarios' modifications
//! 3. rename `id` → `timetableId` / `entryId` inside each modification's
//!    `timetables` / `entries`
//!
//! The backfill is a point-in-time copy; nothing keeps it in sync afterwards.

use super::audit;
use crate::document::Document;
use crate::schema::collections::{MODIFICATIONS, PROJECTS, SCENARIOS};
use crate::schema::fields::*;
use crate::schema::{OPTIONAL_PROJECT_DEPENDENTS, PROJECT_DEPENDENTS, REQUIRED_COLLECTIONS};
use crate::schema_migration::{
    Migration, MigrationContext, MigrationStage, SchemaVersion, StageReport,
};
use crate::store::{Cursor, Filter, Update};
use crate::Result;
use serde_json::Value;
use tracing::debug;

pub struct AccessGroupMigration;

impl Migration for AccessGroupMigration {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::new(3, 0)
    }

    fn description(&self) -> &str {
        "Rename project group to accessGroup, backfill accessGroup onto project data, qualify nested timetable and entry ids"
    }

    fn required_collections(&self) -> &[&'static str] {
        REQUIRED_COLLECTIONS
    }

    fn stages(&self) -> Vec<Box<dyn MigrationStage>> {
        vec![
            Box::new(RenameTopLevelFields),
            Box::new(BackfillAccessGroup),
            Box::new(QualifyNestedIds),
        ]
    }

    fn validate_postconditions(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        audit::audit_access_groups(ctx.store, ctx.config.batch_size)?.into_result()
    }
}

/// (collection, old field, new field)
const TOP_LEVEL_RENAMES: &[(&str, &str, &str)] = &[
    (PROJECTS, GROUP, ACCESS_GROUP),
    (MODIFICATIONS, SCENARIO, SCENARIO_ID),
];

/// Stage 1: collection-wide renames of top-level fields
pub struct RenameTopLevelFields;

impl MigrationStage for RenameTopLevelFields {
    fn name(&self) -> &'static str {
        "rename-top-level-fields"
    }

    fn run(&self, ctx: &MigrationContext<'_>, report: &mut StageReport) -> Result<()> {
        for &(collection, from, to) in TOP_LEVEL_RENAMES {
            let result = ctx.store.update_many(
                collection,
                &Filter::all(),
                &Update::new().rename(from, to),
            )?;
            debug!(
                collection,
                from,
                to,
                matched = result.matched,
                modified = result.modified,
                "Renamed field"
            );
            report.record(result);
        }
        Ok(())
    }
}

/// Stage 2: copy each project's `accessGroup` onto its dependents
pub struct BackfillAccessGroup;

impl BackfillAccessGroup {
    fn backfill_project(
        &self,
        ctx: &MigrationContext<'_>,
        project: &Document,
        direct_dependents: &[&str],
        report: &mut StageReport,
    ) -> Result<()> {
        // A project without a group hands down an explicit null
        let access_group = project.get(ACCESS_GROUP).cloned().unwrap_or(Value::Null);
        let set_group = Update::new().set(ACCESS_GROUP, access_group);
        let by_project = Filter::eq(PROJECT_ID, project.id().to_value());

        for &collection in direct_dependents {
            report.record(ctx.store.update_many(collection, &by_project, &set_group)?);
        }

        let scenarios = Cursor::new(ctx.store, SCENARIOS, by_project, ctx.config.batch_size)?;
        let mut scenario_count = 0u64;
        let visited = scenarios.try_for_each(|scenario| {
            let by_scenario = Filter::eq(SCENARIO_ID, scenario.id().to_value());
            report.record(ctx.store.update_many(MODIFICATIONS, &by_scenario, &set_group)?);
            report.record(ctx.store.update_one(SCENARIOS, scenario.id(), &set_group)?);
            scenario_count += 1;
            Ok(())
        })?;
        report.documents_read += visited;

        debug!(
            project = %project.id(),
            scenarios = scenario_count,
            "Backfilled project access group"
        );
        Ok(())
    }
}

impl MigrationStage for BackfillAccessGroup {
    fn name(&self) -> &'static str {
        "backfill-access-group"
    }

    fn run(&self, ctx: &MigrationContext<'_>, report: &mut StageReport) -> Result<()> {
        let mut direct_dependents: Vec<&str> = Vec::new();
        for &collection in OPTIONAL_PROJECT_DEPENDENTS {
            if ctx.registry.contains(collection) {
                direct_dependents.push(collection);
            } else {
                debug!(collection, "Optional collection absent, skipping");
            }
        }
        direct_dependents.extend_from_slice(PROJECT_DEPENDENTS);

        let projects = Cursor::new(ctx.store, PROJECTS, Filter::all(), ctx.config.batch_size)?;
        let visited = projects.try_for_each(|project| {
            self.backfill_project(ctx, &project, &direct_dependents, report)
        })?;
        report.documents_read += visited;
        Ok(())
    }
}

/// (array field, qualified id field)
const NESTED_ARRAYS: &[(&str, &str)] = &[(TIMETABLES, TIMETABLE_ID), (ENTRIES, ENTRY_ID)];

/// Stage 3: `id` → `timetableId` / `entryId` inside embedded arrays.
///
/// Each array is written back on its own, so a modification with both
/// timetables and entries receives two writes.
pub struct QualifyNestedIds;

impl MigrationStage for QualifyNestedIds {
    fn name(&self) -> &'static str {
        "qualify-nested-ids"
    }

    fn run(&self, ctx: &MigrationContext<'_>, report: &mut StageReport) -> Result<()> {
        let modifications =
            Cursor::new(ctx.store, MODIFICATIONS, Filter::all(), ctx.config.batch_size)?;
        let visited = modifications.try_for_each(|modification| {
            for &(array_field, id_field) in NESTED_ARRAYS {
                // An array with no `id` left to move is not written back
                let Some(rewritten) = qualify_ids(modification.get(array_field), id_field) else {
                    continue;
                };
                let update = Update::new().set(array_field, Value::Array(rewritten));
                report.record(ctx.store.update_one(MODIFICATIONS, modification.id(), &update)?);
            }
            Ok(())
        })?;
        report.documents_read += visited;
        Ok(())
    }
}

/// Move each element's `id` to `id_field`. Returns the rewritten array, or
/// `None` when the value is not a non-empty array or no element carries `id`
/// (which is what makes a second run a no-op).
pub fn qualify_ids(array: Option<&Value>, id_field: &str) -> Option<Vec<Value>> {
    let items = match array {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return None,
    };

    let mut changed = false;
    let rewritten = items
        .iter()
        .map(|item| match item {
            Value::Object(fields) if fields.contains_key(NESTED_ID) => {
                let mut fields = fields.clone();
                if let Some(id) = fields.remove(NESTED_ID) {
                    fields.insert(id_field.to_string(), id);
                }
                changed = true;
                Value::Object(fields)
            }
            other => other.clone(),
        })
        .collect();

    changed.then_some(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qualify_ids_moves_identifier() {
        let timetables = json!([
            {"id": "tt1", "headway": 600},
            {"id": "tt2", "timetableId": "stale"},
        ]);
        let rewritten = qualify_ids(Some(&timetables), TIMETABLE_ID).unwrap();
        assert_eq!(
            Value::Array(rewritten),
            json!([
                {"timetableId": "tt1", "headway": 600},
                {"timetableId": "tt2"},
            ])
        );
    }

    #[test]
    fn test_qualify_ids_ignores_empty_and_non_arrays() {
        assert!(qualify_ids(None, ENTRY_ID).is_none());
        assert!(qualify_ids(Some(&json!([])), ENTRY_ID).is_none());
        assert!(qualify_ids(Some(&json!({"id": "x"})), ENTRY_ID).is_none());
        assert!(qualify_ids(Some(&Value::Null), ENTRY_ID).is_none());
    }

    #[test]
    fn test_qualify_ids_is_a_no_op_once_applied() {
        let entries = json!([{"entryId": "e1"}, "not-an-object"]);
        assert!(qualify_ids(Some(&entries), ENTRY_ID).is_none());
    }

    #[test]
    fn test_qualify_ids_keeps_elements_without_id() {
        let entries = json!([{"id": "e1"}, {"name": "no id"}, 7]);
        let rewritten = qualify_ids(Some(&entries), ENTRY_ID).unwrap();
        assert_eq!(
            Value::Array(rewritten),
            json!([{"entryId": "e1"}, {"name": "no id"}, 7])
        );
    }

    #[test]
    fn test_migration_identity() {
        let migration = AccessGroupMigration;
        assert_eq!(migration.version().to_string(), "3.0.0");
        let names: Vec<&str> = migration.stages().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec!["rename-top-level-fields", "backfill-access-group", "qualify-nested-ids"]
        );
    }
}
