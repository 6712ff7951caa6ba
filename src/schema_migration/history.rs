//! Migration history tracking and management

use super::{ExecutionResult, SchemaVersion, StageReport, HISTORY_COLLECTION};
use crate::document::Document;
use crate::store::{Cursor, DocumentStore, Filter};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Migration history record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Unique ID for this migration execution
    #[serde(rename = "_id")]
    pub id: String,

    /// Migration version
    pub version: SchemaVersion,

    /// Migration description
    pub description: String,

    /// Execution timestamp
    pub executed_at: DateTime<Utc>,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Success status
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Checksum of migration identity
    pub checksum: String,

    /// User who executed the migration
    pub executed_by: Option<String>,

    /// Per-stage counters
    #[serde(default)]
    pub stages: Vec<StageReport>,
}

/// Migration history manager
pub struct MigrationHistory {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl MigrationHistory {
    pub fn new(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self { store, batch_size }
    }

    /// Record a migration execution
    pub fn record_migration(&self, result: &ExecutionResult) -> Result<MigrationRecord> {
        let record = MigrationRecord {
            id: generate_migration_id(),
            version: result.version.clone(),
            description: result.description.clone(),
            executed_at: result.started_at,
            duration_ms: result.duration_ms,
            success: result.success,
            error: result.error.clone(),
            checksum: calculate_checksum(&result.version, &result.description),
            executed_by: get_current_user(),
            stages: result.stages.clone(),
        };

        self.save_record(&record)?;

        info!(
            "Recorded migration {} to version {} (success: {})",
            record.id, record.version, record.success
        );

        Ok(record)
    }

    /// Get migration history, newest first
    pub fn get_history(&self, limit: Option<usize>) -> Result<Vec<MigrationRecord>> {
        if !self.store.has_collection(HISTORY_COLLECTION)? {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let cursor = Cursor::new(
            self.store.as_ref(),
            HISTORY_COLLECTION,
            Filter::all(),
            self.batch_size,
        )?;
        for document in cursor {
            let record: MigrationRecord = serde_json::from_value(document?.into_value())?;
            records.push(record);
        }

        // Sort by execution time (newest first)
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));

        if let Some(limit) = limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    /// Get the last successful migration
    pub fn get_last_successful_migration(&self) -> Result<Option<MigrationRecord>> {
        let history = self.get_history(None)?;
        Ok(history.into_iter().find(|r| r.success))
    }

    /// Get failed migrations
    pub fn get_failed_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let history = self.get_history(None)?;
        Ok(history.into_iter().filter(|r| !r.success).collect())
    }

    /// Save a history record
    fn save_record(&self, record: &MigrationRecord) -> Result<()> {
        let document = Document::from_value(serde_json::to_value(record)?)?;
        self.store.insert_one(HISTORY_COLLECTION, document)
    }

    /// Generate migration statistics
    pub fn get_statistics(&self) -> Result<MigrationStatistics> {
        let history = self.get_history(None)?;

        let total_migrations = history.len();
        let successful_migrations = history.iter().filter(|r| r.success).count();
        let failed_migrations = total_migrations - successful_migrations;

        let total_duration_ms: u64 = history.iter().map(|r| r.duration_ms).sum();
        let avg_duration_ms = if total_migrations > 0 {
            total_duration_ms / total_migrations as u64
        } else {
            0
        };

        let last_migration = history.first().cloned();

        let versions_applied: Vec<SchemaVersion> = history
            .iter()
            .filter(|r| r.success)
            .map(|r| r.version.clone())
            .collect();

        Ok(MigrationStatistics {
            total_migrations,
            successful_migrations,
            failed_migrations,
            avg_duration_ms,
            total_duration_ms,
            last_migration,
            versions_applied,
        })
    }
}

/// Migration statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatistics {
    /// Total number of migrations executed
    pub total_migrations: usize,

    /// Number of successful migrations
    pub successful_migrations: usize,

    /// Number of failed migrations
    pub failed_migrations: usize,

    /// Average duration in milliseconds
    pub avg_duration_ms: u64,

    /// Total duration in milliseconds
    pub total_duration_ms: u64,

    /// Last migration record
    pub last_migration: Option<MigrationRecord>,

    /// List of versions successfully applied
    pub versions_applied: Vec<SchemaVersion>,
}

/// Generate a unique migration ID
fn generate_migration_id() -> String {
    let timestamp = Utc::now().timestamp_micros();
    let random: u32 = rand::random();
    format!("{:016x}_{:08x}", timestamp, random)
}

/// Checksum of a migration's identity, stable across runs
fn calculate_checksum(version: &SchemaVersion, description: &str) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(version.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(description.as_bytes());
    format!("{:08x}", hasher.finalize())
}

/// Get current user (for audit trail)
fn get_current_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
}
