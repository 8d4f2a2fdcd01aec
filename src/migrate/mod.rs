//! Migration generation: models in, DDL out, snapshot updated on success.
//!
//! The core transformation is pure; filesystem effects (model loading,
//! snapshot read/write) sit at the edges. When the diff is empty the
//! snapshot is left untouched.

use std::path::Path;

use tracing::info;

use crate::dialect::DialectKind;
use crate::diff::{diff_plans, render_ops, MigrationOp};
use crate::error::Result;
use crate::meta::SchemaMeta;
use crate::model::{normalize, ModelSource};
use crate::plan::{compile, MigrationPlan};
use crate::snapshot::{Snapshot, SnapshotStore};

pub const NO_CHANGES_SQL: &str = "-- no changes";

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub dialect: DialectKind,
    /// Ignore the stored snapshot and emit the full schema from scratch.
    pub full: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Postgres,
            full: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub has_changes: bool,
    pub sql: String,
    pub plan: MigrationPlan,
    pub ops: Vec<MigrationOp>,
}

/// Pure core: diff a prior plan against the current one and render the DDL.
pub fn generate_from_plans(
    prior: Option<&MigrationPlan>,
    current: &MigrationPlan,
) -> Result<(Vec<MigrationOp>, String)> {
    let ops = diff_plans(prior, current);
    let sql = if ops.is_empty() {
        NO_CHANGES_SQL.to_string()
    } else {
        render_ops(&ops, current.dialect.driver())?
    };
    Ok((ops, sql))
}

/// Load models, compile the current plan, diff against the stored snapshot
/// and persist the new snapshot when changes were emitted.
pub fn generate(
    source: &dyn ModelSource,
    workspace_root: &Path,
    options: &GenerateOptions,
) -> Result<GenerateResult> {
    let models = source.load()?.into_iter().map(normalize).collect();
    let meta = SchemaMeta::build(models);
    let current = compile(&meta, options.dialect);

    let store = SnapshotStore::new(workspace_root);
    let prior = if options.full {
        None
    } else {
        store.read(options.dialect)?
    };

    let (ops, sql) = generate_from_plans(prior.as_ref().map(|s| &s.plan), &current)?;
    if ops.is_empty() {
        info!(dialect = %options.dialect, "no schema changes detected");
        return Ok(GenerateResult {
            has_changes: false,
            sql,
            plan: current,
            ops,
        });
    }

    info!(dialect = %options.dialect, operations = ops.len(), "schema changes detected");
    store.write(&Snapshot::of(current.clone()))?;

    Ok(GenerateResult {
        has_changes: true,
        sql,
        plan: current,
        ops,
    })
}

/// Remove the stored snapshot for one dialect only.
pub fn delete_migration_files(workspace_root: &Path, dialect: DialectKind) -> Result<()> {
    SnapshotStore::new(workspace_root).delete(dialect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaticModelSource;

    fn source(defs: &[&str]) -> StaticModelSource {
        StaticModelSource::new(
            defs.iter()
                .map(|json| serde_json::from_str(json).unwrap())
                .collect(),
        )
    }

    #[test]
    fn first_run_creates_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(&[r#"{"name": "User"}"#]);
        let result = generate(&src, dir.path(), &GenerateOptions::default()).unwrap();

        assert!(result.has_changes);
        assert!(result.sql.contains("CREATE TABLE \"users\""));
        let snapshot = SnapshotStore::new(dir.path())
            .read(DialectKind::Postgres)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.plan.tables.len(), 1);
    }

    #[test]
    fn unchanged_second_run_reports_no_changes_and_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(&[r#"{"name": "User"}"#]);
        generate(&src, dir.path(), &GenerateOptions::default()).unwrap();

        let store = SnapshotStore::new(dir.path());
        let before = store.read(DialectKind::Postgres).unwrap().unwrap();

        let result = generate(&src, dir.path(), &GenerateOptions::default()).unwrap();
        assert!(!result.has_changes);
        assert!(result.sql.to_lowercase().contains("no changes"));

        let after = store.read(DialectKind::Postgres).unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[test]
    fn incremental_run_alters_instead_of_recreating() {
        let dir = tempfile::tempdir().unwrap();
        generate(
            &source(&[r#"{"name": "User"}"#]),
            dir.path(),
            &GenerateOptions::default(),
        )
        .unwrap();

        let result = generate(
            &source(&[r#"{"name": "User", "attributes": [{"name": "name"}]}"#]),
            dir.path(),
            &GenerateOptions::default(),
        )
        .unwrap();

        assert!(result.has_changes);
        assert!(result.sql.starts_with("ALTER TABLE \"users\" ADD COLUMN \"name\""));
        assert!(!result.sql.contains("CREATE TABLE \"users\""));
    }

    #[test]
    fn full_reset_ignores_the_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(&[r#"{"name": "User"}"#]);
        generate(&src, dir.path(), &GenerateOptions::default()).unwrap();

        let result = generate(
            &src,
            dir.path(),
            &GenerateOptions {
                full: true,
                ..GenerateOptions::default()
            },
        )
        .unwrap();
        assert!(result.has_changes);
        assert!(result.sql.contains("CREATE TABLE \"users\""));
    }

    #[test]
    fn delete_helper_targets_one_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(&[r#"{"name": "User"}"#]);
        generate(&src, dir.path(), &GenerateOptions::default()).unwrap();
        generate(
            &src,
            dir.path(),
            &GenerateOptions {
                dialect: DialectKind::Sqlite,
                full: false,
            },
        )
        .unwrap();

        delete_migration_files(dir.path(), DialectKind::Postgres).unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.read(DialectKind::Postgres).unwrap().is_none());
        assert!(store.read(DialectKind::Sqlite).unwrap().is_some());
    }
}
