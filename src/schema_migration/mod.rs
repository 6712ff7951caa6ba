//! Schema migration framework
//!
//! Applies versioned data migrations to a document store:
//! - Versioned migrations made of ordered stages
//! - Schema version stamped into the store after each migration
//! - Migration history tracking, failures included
//! - Exclusive maintenance lock for the duration of a run
//! - Optional post-migration validation
//!
//! There is no rollback. A failed migration leaves the data set partially
//! migrated and the maintenance lock in place until an operator releases it.

use crate::store::DocumentStore;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

pub mod executor;
pub mod history;
pub mod lock;
pub mod migration;
pub mod versioning;

pub use executor::{ExecutionResult, MigrationExecutor};
pub use history::{MigrationHistory, MigrationRecord, MigrationStatistics};
pub use lock::MaintenanceLock;
pub use migration::{Migration, MigrationContext, MigrationStage, StageReport};
pub use versioning::{SchemaVersion, VersionManager};

/// Metadata collection holding the schema version document
pub const MIGRATIONS_COLLECTION: &str = "_migrations";
/// Metadata collection holding one record per migration execution
pub const HISTORY_COLLECTION: &str = "_migration_history";
/// Metadata collection holding the maintenance lock
pub const LOCK_COLLECTION: &str = "_migration_lock";

const VERSION_DOCUMENT_ID: &str = "_schema_version";

/// Schema migration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Documents fetched per cursor page
    pub batch_size: usize,

    /// Run each migration's post-condition checks after it completes
    pub validate_after_migration: bool,

    /// Refuse to run unless the maintenance lock can be taken
    pub require_exclusive_lock: bool,

    /// Name recorded in the lock; defaults to `user@pid`
    pub lock_holder: Option<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            validate_after_migration: true,
            require_exclusive_lock: true,
            lock_holder: None,
        }
    }
}

impl MigrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if matches!(&self.lock_holder, Some(holder) if holder.trim().is_empty()) {
            return Err(Error::Config("lock_holder must not be blank".to_string()));
        }
        Ok(())
    }

    pub fn lock_holder(&self) -> String {
        self.lock_holder.clone().unwrap_or_else(|| {
            let user = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string());
            format!("{}@{}", user, std::process::id())
        })
    }
}

/// Schema migration manager
pub struct MigrationManager {
    store: Arc<dyn DocumentStore>,
    config: MigrationConfig,
    version_manager: VersionManager,
    executor: MigrationExecutor,
    history: MigrationHistory,
    migrations: RwLock<BTreeMap<SchemaVersion, Box<dyn Migration>>>,
}

impl MigrationManager {
    /// Create a new migration manager
    pub fn new(store: Arc<dyn DocumentStore>, config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            version_manager: VersionManager::new(store.clone()),
            executor: MigrationExecutor::new(store.clone(), config.clone()),
            history: MigrationHistory::new(store.clone(), config.batch_size),
            store,
            config,
            migrations: RwLock::new(BTreeMap::new()),
        })
    }

    /// Register a migration
    pub fn register_migration(&self, migration: Box<dyn Migration>) -> Result<()> {
        let version = migration.version();
        let mut migrations = self.migrations.write();

        if migrations.contains_key(&version) {
            return Err(Error::Config(format!(
                "Migration version {} already registered",
                version
            )));
        }

        info!("Registered migration version {}", version);
        migrations.insert(version, migration);

        Ok(())
    }

    /// Get current schema version
    pub fn current_version(&self) -> Result<SchemaVersion> {
        self.version_manager.current_version()
    }

    /// Get target version (latest available migration)
    pub fn target_version(&self) -> Result<SchemaVersion> {
        let migrations = self.migrations.read();
        migrations
            .keys()
            .last()
            .cloned()
            .ok_or_else(|| Error::Config("No migrations registered".to_string()))
    }

    /// Check if migrations are needed
    pub fn needs_migration(&self) -> Result<bool> {
        Ok(!self.pending_migrations()?.is_empty())
    }

    /// Versions and descriptions of registered migrations newer than the
    /// store, in the order they would run
    pub fn pending_migrations(&self) -> Result<Vec<(SchemaVersion, String)>> {
        let current = self.current_version()?;
        let migrations = self.migrations.read();
        Ok(migrations
            .iter()
            .filter(|(version, _)| **version > current)
            .map(|(version, m)| (version.clone(), m.description().to_string()))
            .collect())
    }

    /// Run pending migrations
    pub fn migrate(&self) -> Result<Vec<ExecutionResult>> {
        if !self.needs_migration()? {
            info!("Database is up to date at version {}", self.current_version()?);
            return Ok(Vec::new());
        }

        let lock = if self.config.require_exclusive_lock {
            Some(MaintenanceLock::acquire(
                self.store.as_ref(),
                &self.config.lock_holder(),
            )?)
        } else {
            None
        };

        // Re-read under the lock: another runner may have finished meanwhile
        let current = self.current_version()?;
        let pending = self.pending_migrations()?;
        if pending.is_empty() {
            info!("Database was migrated to version {} by another runner", current);
            if let Some(lock) = lock {
                lock.release(self.store.as_ref())?;
            }
            return Ok(Vec::new());
        }

        info!(
            "Migrating from version {} through {} pending migration(s)",
            current,
            pending.len()
        );

        let mut results = Vec::new();
        let migrations = self.migrations.read();
        for (version, _) in pending {
            let migration = migrations
                .get(&version)
                .ok_or_else(|| Error::Migration(format!("Migration {} not found", version)))?;

            let result = self.executor.execute(migration.as_ref())?;
            self.history.record_migration(&result)?;

            if !result.success {
                let reason = result.error.clone().unwrap_or_default();
                error!(
                    "Migration {} failed; data set left partially migrated at version {}",
                    version, current
                );
                self.store.flush()?;
                return Err(Error::Migration(format!(
                    "migration {} failed: {}",
                    version, reason
                )));
            }

            self.version_manager.set_version(&version)?;
            results.push(result);
        }

        self.store.flush()?;
        if let Some(lock) = lock {
            lock.release(self.store.as_ref())?;
        }

        info!("Migration completed successfully");
        Ok(results)
    }

    /// Get migration history
    pub fn get_history(&self, limit: Option<usize>) -> Result<Vec<MigrationRecord>> {
        self.history.get_history(limit)
    }

    /// Executions that failed, newest first
    pub fn get_failed_migrations(&self) -> Result<Vec<MigrationRecord>> {
        self.history.get_failed_migrations()
    }

    pub fn get_last_successful_migration(&self) -> Result<Option<MigrationRecord>> {
        self.history.get_last_successful_migration()
    }

    pub fn get_statistics(&self) -> Result<MigrationStatistics> {
        self.history.get_statistics()
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }
}
