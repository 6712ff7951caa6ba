//! Maintenance lock.
//!
//! Migrations read a parent and fan its value out to children without any
//! isolation, so they require exclusive use of the data set. The lock lives
//! with the data (see [`DocumentStore::acquire_lock`]), which makes it visible
//! to every runner pointed at the same store and keeps it in place across a
//! crash.

use crate::document::Document;
use crate::store::DocumentStore;
use crate::{Error, Result};
use serde_json::json;
use tracing::{info, warn};

const LOCK_DOCUMENT_ID: &str = "_maintenance";

/// Proof that the caller holds the maintenance lock
#[derive(Debug)]
pub struct MaintenanceLock {
    holder: String,
}

impl MaintenanceLock {
    /// Take the lock, failing with [`Error::Locked`] if someone else holds it
    pub fn acquire(store: &dyn DocumentStore, holder: &str) -> Result<Self> {
        let document = Document::from_value(json!({
            "_id": LOCK_DOCUMENT_ID,
            "holder": holder,
            "acquiredAt": chrono::Utc::now().to_rfc3339(),
            "pid": std::process::id(),
        }))?;

        match store.acquire_lock(document) {
            Ok(()) => {
                info!(holder, "Acquired maintenance lock");
                Ok(Self {
                    holder: holder.to_string(),
                })
            }
            Err(Error::DuplicateKey { .. }) => {
                let (holder, since) = Self::current(store)?.unwrap_or_default();
                Err(Error::Locked { holder, since })
            }
            Err(e) => Err(e),
        }
    }

    /// Holder and acquisition time of the current lock, if any
    pub fn current(store: &dyn DocumentStore) -> Result<Option<(String, String)>> {
        Ok(store.current_lock()?.map(|doc| {
            (
                doc.get_str("holder").unwrap_or("unknown").to_string(),
                doc.get_str("acquiredAt").unwrap_or("unknown").to_string(),
            )
        }))
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Give the lock back after a successful run
    pub fn release(self, store: &dyn DocumentStore) -> Result<()> {
        store.release_lock()?;
        info!(holder = %self.holder, "Released maintenance lock");
        Ok(())
    }

    /// Remove a lock left behind by a failed or crashed run. Returns whether
    /// a lock was present.
    pub fn force_release(store: &dyn DocumentStore) -> Result<bool> {
        let removed = store.release_lock()?;
        if removed {
            warn!("Maintenance lock forcibly released");
        }
        Ok(removed)
    }
}
