//! Snapshot store: the last successfully applied migration plan, persisted
//! per dialect under `.qb/` in the workspace root.
//!
//! Reads are tolerant: a missing file, an empty file, malformed JSON or an
//! unrecognizable shape all read as "no prior snapshot". Only genuine disk
//! I/O failures raise. Writes go through a temp file and an atomic rename.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{SNAPSHOT_DIR, SNAPSHOT_FILE_PREFIX};
use crate::dialect::DialectKind;
use crate::error::{Error, Result};
use crate::plan::{plan_hash, MigrationPlan};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub plan: MigrationPlan,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn of(plan: MigrationPlan) -> Self {
        let hash = plan_hash(&plan);
        Self {
            plan,
            hash,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    workspace_root: PathBuf,
}

impl SnapshotStore {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    pub fn path(&self, dialect: DialectKind) -> PathBuf {
        self.workspace_root
            .join(SNAPSHOT_DIR)
            .join(format!("{}{}.json", SNAPSHOT_FILE_PREFIX, dialect))
    }

    /// Read the snapshot for a dialect. `Ok(None)` covers every degradable
    /// case; `Err` is reserved for disk failures other than absence.
    pub fn read(&self, dialect: DialectKind) -> Result<Option<Snapshot>> {
        let path = self.path(dialect);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::Snapshot { path, source }),
        };
        if content.trim().is_empty() {
            debug!(path = %path.display(), "snapshot file is empty; treating as absent");
            return Ok(None);
        }
        Ok(parse_snapshot(&content, &path))
    }

    /// Persist a snapshot atomically: write to a temp sibling, then rename.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.path(snapshot.plan.dialect);
        let dir = path.parent().expect("snapshot path always has a parent");
        fs::create_dir_all(dir).map_err(|source| Error::Snapshot {
            path: dir.to_path_buf(),
            source,
        })?;

        let payload = serde_json::to_string_pretty(snapshot)
            .expect("snapshots always serialize");
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload).map_err(|source| Error::Snapshot {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| Error::Snapshot { path, source })?;
        Ok(())
    }

    /// Remove the snapshot for one dialect only. Absence is not an error.
    pub fn delete(&self, dialect: DialectKind) -> Result<()> {
        let path = self.path(dialect);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Snapshot { path, source }),
        }
    }
}

/// Parse either the wrapped shape or a legacy bare plan. Anything else
/// degrades to `None`.
fn parse_snapshot(content: &str, path: &Path) -> Option<Snapshot> {
    if let Ok(snapshot) = serde_json::from_str::<Snapshot>(content) {
        return Some(snapshot);
    }

    // Legacy shape: the plan object at the root, no wrapper. Upgrade in
    // memory; the next successful write persists the wrapped form.
    if let Ok(plan) = serde_json::from_str::<MigrationPlan>(content) {
        debug!(path = %path.display(), "upgrading legacy snapshot shape in memory");
        let hash = plan_hash(&plan);
        return Some(Snapshot {
            updated_at: plan.generated_at,
            hash,
            plan,
        });
    }

    warn!(path = %path.display(), "snapshot is malformed; treating as absent");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::SchemaMeta;
    use crate::model::normalize;
    use crate::plan::compile;

    fn sample_plan() -> MigrationPlan {
        let models = vec![normalize(
            serde_json::from_str(r#"{"name": "User", "attributes": [{"name": "email"}]}"#).unwrap(),
        )];
        compile(&SchemaMeta::build(models), DialectKind::Postgres)
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let snapshot = Snapshot::of(sample_plan());

        store.write(&snapshot).unwrap();
        let read = store.read(DialectKind::Postgres).unwrap().unwrap();
        assert_eq!(read.hash, snapshot.hash);
        assert_eq!(read.plan.tables.len(), 1);

        // Path is dialect-keyed.
        assert!(store.path(DialectKind::Postgres).ends_with(".qb/model-snapshot.postgres.json"));
        assert!(store.read(DialectKind::Mysql).unwrap().is_none());
    }

    #[test]
    fn missing_and_empty_files_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.read(DialectKind::Postgres).unwrap().is_none());

        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(store.path(DialectKind::Postgres), "").unwrap();
        assert!(store.read(DialectKind::Postgres).unwrap().is_none());
    }

    #[test]
    fn malformed_json_degrades_to_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(store.path(DialectKind::Postgres), "{truncated").unwrap();
        assert!(store.read(DialectKind::Postgres).unwrap().is_none());

        fs::write(store.path(DialectKind::Postgres), r#"{"other": "shape"}"#).unwrap();
        assert!(store.read(DialectKind::Postgres).unwrap().is_none());
    }

    #[test]
    fn legacy_bare_plan_is_upgraded_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let plan = sample_plan();
        fs::create_dir_all(dir.path().join(SNAPSHOT_DIR)).unwrap();
        fs::write(
            store.path(DialectKind::Postgres),
            serde_json::to_string(&plan).unwrap(),
        )
        .unwrap();

        let snapshot = store.read(DialectKind::Postgres).unwrap().unwrap();
        assert_eq!(snapshot.plan.tables.len(), 1);
        assert_eq!(snapshot.hash, plan_hash(&plan));
    }

    #[test]
    fn delete_removes_only_the_given_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let mut plan = sample_plan();
        store.write(&Snapshot::of(plan.clone())).unwrap();
        plan.dialect = DialectKind::Mysql;
        store.write(&Snapshot::of(plan)).unwrap();

        store.delete(DialectKind::Postgres).unwrap();
        assert!(store.read(DialectKind::Postgres).unwrap().is_none());
        assert!(store.read(DialectKind::Mysql).unwrap().is_some());

        // Deleting again is fine.
        store.delete(DialectKind::Postgres).unwrap();
    }
}
