//! Data migrations shipped with this tool, plus the audit that checks the
//! layout they produce.

pub mod access_group;
pub mod audit;

pub use access_group::AccessGroupMigration;
pub use audit::{audit_access_groups, AuditReport, Violation};

use crate::schema_migration::Migration;

/// Every known migration, in no particular order
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![Box::new(AccessGroupMigration)]
}
