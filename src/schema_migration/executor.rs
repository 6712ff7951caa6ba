//! Migration executor: runs one migration and reports what happened

use super::{Migration, MigrationConfig, MigrationContext, SchemaVersion, StageReport};
use crate::store::{CollectionRegistry, DocumentStore};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Result of a migration execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Migration version
    pub version: SchemaVersion,

    /// Migration description
    pub description: String,

    /// Start time
    pub started_at: DateTime<Utc>,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Success status
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Reports of the stages that completed
    pub stages: Vec<StageReport>,
}

/// Migration executor
pub struct MigrationExecutor {
    store: Arc<dyn DocumentStore>,
    config: MigrationConfig,
}

impl MigrationExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, config: MigrationConfig) -> Self {
        Self { store, config }
    }

    /// Execute a migration.
    ///
    /// A failing migration is reported through `ExecutionResult::success`
    /// rather than `Err`, so the caller can still record it. Nothing is undone:
    /// whatever the failed stage wrote before failing stays written.
    pub fn execute(&self, migration: &dyn Migration) -> Result<ExecutionResult> {
        let start_time = Instant::now();
        let started_at = Utc::now();

        info!(
            "Starting migration to version {}: {}",
            migration.version(),
            migration.description()
        );

        // Loaded once per migration: later stages see the catalog as it was
        // when the migration started.
        let outcome = CollectionRegistry::load(self.store.as_ref()).and_then(|registry| {
            let ctx = MigrationContext {
                store: self.store.as_ref(),
                registry: &registry,
                config: &self.config,
            };
            let stages = migration.migrate_up(&ctx)?;
            self.store.flush()?;
            if self.config.validate_after_migration {
                migration.validate_postconditions(&ctx)?;
            }
            Ok(stages)
        });

        let duration = start_time.elapsed();
        let result = match outcome {
            Ok(stages) => {
                info!(
                    "Migration {} completed successfully in {:?}",
                    migration.version(),
                    duration
                );
                ExecutionResult {
                    version: migration.version(),
                    description: migration.description().to_string(),
                    started_at,
                    duration_ms: duration.as_millis() as u64,
                    success: true,
                    error: None,
                    stages,
                }
            }
            Err(e) => {
                error!(
                    "Migration {} failed after {:?}: {}",
                    migration.version(),
                    duration,
                    e
                );
                // Persist whatever was written before the failure so the
                // dumps match what the history says happened.
                if let Err(flush_error) = self.store.flush() {
                    error!("Flush after failed migration also failed: {}", flush_error);
                }
                ExecutionResult {
                    version: migration.version(),
                    description: migration.description().to_string(),
                    started_at,
                    duration_ms: duration.as_millis() as u64,
                    success: false,
                    error: Some(e.to_string()),
                    stages: Vec::new(),
                }
            }
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentId};
    use crate::schema_migration::MigrationStage;
    use crate::store::{Filter, MemoryStore, StoreStats, Update, UpdateResult};
    use crate::Error;

    /// Store whose catalog cannot be listed
    struct UnlistableStore(MemoryStore);

    impl DocumentStore for UnlistableStore {
        fn collection_names(&self) -> Result<Vec<String>> {
            Err(Error::Storage("catalog unavailable".to_string()))
        }

        fn has_collection(&self, name: &str) -> Result<bool> {
            self.0.has_collection(name)
        }

        fn create_collection(&self, name: &str) -> Result<()> {
            self.0.create_collection(name)
        }

        fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
            self.0.insert_one(collection, document)
        }

        fn find_one(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
            self.0.find_one(collection, id)
        }

        fn find_page(
            &self,
            collection: &str,
            filter: &Filter,
            after: Option<&DocumentId>,
            limit: usize,
        ) -> Result<Vec<Document>> {
            self.0.find_page(collection, filter, after, limit)
        }

        fn update_many(
            &self,
            collection: &str,
            filter: &Filter,
            update: &Update,
        ) -> Result<UpdateResult> {
            self.0.update_many(collection, filter, update)
        }

        fn update_one(
            &self,
            collection: &str,
            id: &DocumentId,
            update: &Update,
        ) -> Result<UpdateResult> {
            self.0.update_one(collection, id, update)
        }

        fn delete_one(&self, collection: &str, id: &DocumentId) -> Result<bool> {
            self.0.delete_one(collection, id)
        }

        fn stats(&self) -> StoreStats {
            self.0.stats()
        }
    }

    struct Noop;

    impl MigrationStage for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn run(&self, _ctx: &MigrationContext<'_>, _report: &mut StageReport) -> Result<()> {
            Ok(())
        }
    }

    struct Checked {
        postcondition_holds: bool,
    }

    impl Migration for Checked {
        fn version(&self) -> SchemaVersion {
            SchemaVersion::new(1, 0)
        }

        fn description(&self) -> &str {
            "checked"
        }

        fn stages(&self) -> Vec<Box<dyn MigrationStage>> {
            vec![Box::new(Noop)]
        }

        fn validate_postconditions(&self, _ctx: &MigrationContext<'_>) -> Result<()> {
            if self.postcondition_holds {
                Ok(())
            } else {
                Err(Error::Validation("postcondition violated".to_string()))
            }
        }
    }

    #[test]
    fn test_successful_execution() {
        let executor = MigrationExecutor::new(Arc::new(MemoryStore::new()), MigrationConfig::default());
        let result = executor
            .execute(&Checked {
                postcondition_holds: true,
            })
            .unwrap();
        assert!(result.success);
        assert_eq!(result.stages.len(), 1);
        assert_eq!(result.version, SchemaVersion::new(1, 0));
    }

    #[test]
    fn test_postcondition_failure_marks_result_failed() {
        let executor = MigrationExecutor::new(Arc::new(MemoryStore::new()), MigrationConfig::default());
        let result = executor
            .execute(&Checked {
                postcondition_holds: false,
            })
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("postcondition"));
    }

    #[test]
    fn test_postconditions_skipped_when_disabled() {
        let config = MigrationConfig {
            validate_after_migration: false,
            ..MigrationConfig::default()
        };
        let executor = MigrationExecutor::new(Arc::new(MemoryStore::new()), config);
        let result = executor
            .execute(&Checked {
                postcondition_holds: false,
            })
            .unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_catalog_failure_is_reported_in_result() {
        let executor = MigrationExecutor::new(
            Arc::new(UnlistableStore(MemoryStore::new())),
            MigrationConfig::default(),
        );
        let result = executor
            .execute(&Checked {
                postcondition_holds: true,
            })
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("catalog unavailable"));
        assert!(result.stages.is_empty());
    }
}
