//! Configuration loading for migration runs.
//!
//! Sources are layered, later ones winning:
//! 1. built-in defaults
//! 2. an optional JSON file (unknown keys rejected, missing keys defaulted)
//! 3. `LIGHTNING_MIGRATE_*` environment variables
//!
//! Command line flags are applied on top by the binary.

use crate::schema_migration::MigrationConfig;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_BATCH_SIZE: &str = "LIGHTNING_MIGRATE_BATCH_SIZE";
pub const ENV_VALIDATE: &str = "LIGHTNING_MIGRATE_VALIDATE";
pub const ENV_REQUIRE_LOCK: &str = "LIGHTNING_MIGRATE_REQUIRE_LOCK";
pub const ENV_LOCK_HOLDER: &str = "LIGHTNING_MIGRATE_LOCK_HOLDER";

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
}

/// Load the configuration from defaults, `file` and the process environment
pub fn load_config(file: Option<&Path>) -> Result<MigrationConfig> {
    load_config_with(file, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup
pub fn load_config_with<F>(file: Option<&Path>, env: F) -> Result<MigrationConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match file {
        Some(path) => load_from_file(path)?,
        None => MigrationConfig::default(),
    };
    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Parse a JSON configuration file
pub fn load_from_file(path: &Path) -> Result<MigrationConfig> {
    let content = fs::read_to_string(path)?;
    let config: MigrationConfig = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("{}: JSON parse error: {}", path.display(), e))
    })?;
    debug!(source = ?ConfigSource::File(path.to_path_buf()), "Loaded configuration");
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut MigrationConfig, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();

    if let Some(batch_size) = env(ENV_BATCH_SIZE) {
        config.batch_size = batch_size
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid {}: {}", ENV_BATCH_SIZE, batch_size)))?;
        applied.push(ENV_BATCH_SIZE);
    }

    if let Some(validate) = env(ENV_VALIDATE) {
        config.validate_after_migration = parse_bool(ENV_VALIDATE, &validate)?;
        applied.push(ENV_VALIDATE);
    }

    if let Some(require_lock) = env(ENV_REQUIRE_LOCK) {
        config.require_exclusive_lock = parse_bool(ENV_REQUIRE_LOCK, &require_lock)?;
        applied.push(ENV_REQUIRE_LOCK);
    }

    if let Some(holder) = env(ENV_LOCK_HOLDER) {
        config.lock_holder = Some(holder);
        applied.push(ENV_LOCK_HOLDER);
    }

    if !applied.is_empty() {
        debug!(source = ?ConfigSource::Environment, variables = ?applied, "Applied overrides");
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("Invalid {}: {}", key, value))),
    }
}
