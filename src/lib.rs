//! qb: model-driven query construction and schema migration for SQL
//! databases and DynamoDB single-table designs.
//!
//! User-authored model declarations are normalized into a metadata graph
//! that feeds three surfaces: a composable relational query builder with
//! eager loading and soft-delete discipline, an incremental migration
//! generator that diffs the model-derived plan against a persisted snapshot
//! per dialect, and a DynamoDB adapter covering entity key patterns, request
//! building and table migrations.

pub mod config;
pub mod constants;
pub mod dialect;
pub mod diff;
pub mod dynamodb;
pub mod error;
pub mod hooks;
pub mod meta;
pub mod migrate;
pub mod model;
pub mod naming;
pub mod plan;
pub mod query;
pub mod snapshot;

pub use config::Config;
pub use dialect::DialectKind;
pub use error::{Error, Result};
pub use meta::SchemaMeta;
pub use migrate::{generate, GenerateOptions, GenerateResult};
pub use model::{normalize, JsonModelSource, ModelSource, NormalizedModel, RawModel};
pub use query::{Db, QueryBuilder};
pub use snapshot::{Snapshot, SnapshotStore};
