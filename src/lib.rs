//! One-off data migrations for the analysis document database.
//!
//! The [`schema_migration`] framework runs versioned [`migrations`] against
//! any [`store::DocumentStore`], records what happened, and stamps the schema
//! version into the store.

pub mod config_management;
pub mod document;
pub mod error;
pub mod logging;
pub mod migrations;
pub mod schema;
pub mod schema_migration;
pub mod store;

pub use document::{Document, DocumentId};
pub use error::{Error, Result};
