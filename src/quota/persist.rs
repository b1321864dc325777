// src/quota/persist.rs
//! Durable ledger snapshot: one JSON record read at startup and rewritten
//! after every mutating operation. Corrupt or missing files degrade to a
//! fresh ledger with a warning; persistence failures never take the
//! admission path down.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::ledger::PersistedLedger;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted ledger, if any. A malformed file is treated as
    /// absent (logged, not fatal) so a bad disk state cannot brick startup.
    pub fn load(&self) -> Option<PersistedLedger> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(_) => return None,
        };
        match serde_json::from_str::<PersistedLedger>(&content) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring unreadable ledger snapshot"
                );
                None
            }
        }
    }

    /// Write the snapshot atomically: temp file in the same directory, then
    /// rename over the target.
    pub fn save(&self, ledger: &PersistedLedger) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let json = serde_json::to_vec_pretty(ledger).context("serializing ledger snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }

    /// Best-effort save used on the hot path; failures log and move on.
    pub fn save_best_effort(&self, ledger: &PersistedLedger) {
        if let Err(e) = self.save(ledger) {
            tracing::warn!(error = %e, "ledger snapshot write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn persisted(used: u64) -> PersistedLedger {
        PersistedLedger {
            limit: 10_000,
            used,
            reset_at: Utc::now(),
            reservations: vec![],
            history: vec![],
            fired: Default::default(),
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("quota_ledger.json"));
        store.save(&persisted(420)).unwrap();

        let loaded = store.load().expect("snapshot present");
        assert_eq!(loaded.used, 420);
        assert_eq!(loaded.limit, 10_000);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota_ledger.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SnapshotStore::new(path);
        assert!(store.load().is_none());
    }
}
