//! Migration definition and interface

use super::{MigrationConfig, SchemaVersion};
use crate::store::{CollectionRegistry, DocumentStore, UpdateResult};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Everything a stage may touch while it runs
pub struct MigrationContext<'a> {
    pub store: &'a dyn DocumentStore,
    pub registry: &'a CollectionRegistry,
    pub config: &'a MigrationConfig,
}

/// Counters for one stage of a migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    /// Documents fetched through cursors
    pub documents_read: u64,
    /// Update calls issued
    pub update_calls: u64,
    pub documents_matched: u64,
    pub documents_modified: u64,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Account for one update call
    pub fn record(&mut self, result: UpdateResult) {
        self.update_calls += 1;
        self.documents_matched += result.matched;
        self.documents_modified += result.modified;
    }
}

/// One ordered step of a migration
pub trait MigrationStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &MigrationContext<'_>, report: &mut StageReport) -> Result<()>;
}

/// Migration trait that all migrations must implement
pub trait Migration: Send + Sync {
    /// Get the version this migration upgrades to
    fn version(&self) -> SchemaVersion;

    /// Get a description of what this migration does
    fn description(&self) -> &str;

    /// Collections that must exist before the migration may start
    fn required_collections(&self) -> &[&'static str] {
        &[]
    }

    /// Get the list of stages, in execution order
    fn stages(&self) -> Vec<Box<dyn MigrationStage>>;

    /// Post-migration validation
    fn validate_postconditions(&self, _ctx: &MigrationContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run every stage in order. The first failing stage aborts the run;
    /// stages already completed stay applied.
    fn migrate_up(&self, ctx: &MigrationContext<'_>) -> Result<Vec<StageReport>> {
        ctx.registry.require(self.required_collections())?;

        let mut reports = Vec::new();
        for stage in self.stages() {
            let started = Instant::now();
            let mut report = StageReport::new(stage.name());
            info!(stage = stage.name(), "Starting stage");

            stage.run(ctx, &mut report)?;

            report.duration_ms = started.elapsed().as_millis() as u64;
            info!(
                stage = stage.name(),
                documents_read = report.documents_read,
                update_calls = report.update_calls,
                documents_matched = report.documents_matched,
                documents_modified = report.documents_modified,
                duration_ms = report.duration_ms,
                "Stage completed"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}
