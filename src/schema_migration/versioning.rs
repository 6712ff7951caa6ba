//! Schema versioning: the version a data set is at, stored in the data set

use super::{MIGRATIONS_COLLECTION, VERSION_DOCUMENT_ID};
use crate::document::{Document, DocumentId};
use crate::store::{DocumentStore, Update};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Schema version representation
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    /// Major version (breaking changes)
    major: u32,

    /// Minor version (backward compatible changes)
    minor: u32,

    /// Patch version (bug fixes)
    patch: u32,
}

impl SchemaVersion {
    /// Create a new schema version
    pub const fn new(major: u32, minor: u32) -> Self {
        Self::with_patch(major, minor, 0)
    }

    /// Create a new schema version with patch
    pub const fn with_patch(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version of a data set that has never been migrated
    pub const fn initial() -> Self {
        Self::new(0, 0)
    }

    /// Parse version from string (e.g., "3.0" or "v3.0.0")
    pub fn parse(version_str: &str) -> Result<Self> {
        let trimmed = version_str.trim().trim_start_matches('v');
        let parts: Vec<&str> = trimmed.split('.').collect();

        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::Parse(format!("Invalid version format: {}", version_str)));
        }

        let component = |s: &str, name: &str| {
            s.parse::<u32>()
                .map_err(|_| Error::Parse(format!("Invalid {} version in {}", name, version_str)))
        };
        let major = component(parts[0], "major")?;
        let minor = component(parts[1], "minor")?;
        let patch = match parts.get(2) {
            Some(p) => component(*p, "patch")?,
            None => 0,
        };

        Ok(Self::with_patch(major, minor, patch))
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn patch(&self) -> u32 {
        self.patch
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

/// Version manager for tracking current schema version
pub struct VersionManager {
    store: Arc<dyn DocumentStore>,
    version_id: DocumentId,
}

impl VersionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            version_id: DocumentId::new(VERSION_DOCUMENT_ID),
        }
    }

    /// Get current schema version
    pub fn current_version(&self) -> Result<SchemaVersion> {
        if !self.store.has_collection(MIGRATIONS_COLLECTION)? {
            return Ok(SchemaVersion::initial());
        }
        match self.store.find_one(MIGRATIONS_COLLECTION, &self.version_id)? {
            Some(document) => {
                let version = document.get_str("version").ok_or_else(|| {
                    Error::InvalidDocument("schema version document has no `version`".to_string())
                })?;
                SchemaVersion::parse(version)
            }
            // No version set, assume initial version
            None => Ok(SchemaVersion::initial()),
        }
    }

    /// Set current schema version
    pub fn set_version(&self, version: &SchemaVersion) -> Result<()> {
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.store.create_collection(MIGRATIONS_COLLECTION)?;

        let existing = self.store.find_one(MIGRATIONS_COLLECTION, &self.version_id)?;
        if existing.is_some() {
            let update = Update::new()
                .set("version", json!(version.to_string()))
                .set("updatedAt", json!(updated_at));
            self.store
                .update_one(MIGRATIONS_COLLECTION, &self.version_id, &update)?;
        } else {
            let document = Document::from_value(json!({
                "_id": self.version_id.as_str(),
                "version": version.to_string(),
                "updatedAt": updated_at,
            }))?;
            self.store.insert_one(MIGRATIONS_COLLECTION, document)?;
        }
        Ok(())
    }
}
