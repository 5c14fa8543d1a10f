//! Academic records loader.
//!
//! Reads a CSV or spreadsheet file of one entity type, validates every row
//! against the caller's institution, and upserts the rows in a single
//! transaction when the whole file is clean.

pub mod config;
pub mod entities;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod schema;
pub mod store;
pub mod table;
pub mod tenant;

pub use error::{LoadError, RowError, StoreError};
pub use ingest::{Counts, Policies, ReferencePolicy};
pub use model::EntityKind;
pub use orchestrator::{Orchestrator, Outcome};
pub use store::{MemoryStore, PgStore, Store};
pub use tenant::TenantContext;
