//! Rollback checkpoints.
//!
//! A checkpoint is a content-addressed snapshot of the files a critical
//! operation (or batch) may mutate, captured before the first attempt.
//! Restoration is a pure copy-back: bytes and mode go back exactly as
//! recorded, a `Missing` snapshot removes the path. Restoration runs to
//! completion collecting per-file failures; it is single-attempt, and a
//! partial result is surfaced, never retried.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bespoke_types::{FileBackup, FileSnapshot, RollbackPlan};
use bespoke_utils::{
    atomic_write::{AtomicWriteOptions, FileSyncPolicy, PersistMode, atomic_write_with_options},
    sha256_bytes,
};

/// Opaque identifier for a rollback point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct CheckpointId(u64);

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Checkpoint {
    id: CheckpointId,
    files: BTreeMap<PathBuf, FileSnapshot>,
}

/// Outcome of one restoration attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RollbackReport {
    pub checkpoint: CheckpointId,
    pub restored: Vec<PathBuf>,
    /// Per-file restore failures with their causes.
    pub failed: Vec<(PathBuf, String)>,
}

impl RollbackReport {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_partial() {
            let failed: Vec<String> = self
                .failed
                .iter()
                .map(|(p, why)| format!("{}: {why}", p.display()))
                .collect();
            format!(
                "partial rollback of checkpoint {}: restored {}, failed {} ({})",
                self.checkpoint,
                self.restored.len(),
                self.failed.len(),
                failed.join("; ")
            )
        } else {
            format!(
                "rolled back checkpoint {} ({} files)",
                self.checkpoint,
                self.restored.len()
            )
        }
    }
}

/// In-memory checkpoint store, session-scoped.
#[derive(Debug, Default)]
pub(crate) struct CheckpointStore {
    next_id: u64,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointStore {
    /// Snapshot the given paths as they exist right now.
    pub(crate) fn capture(&mut self, targets: &[PathBuf]) -> CheckpointId {
        let id = CheckpointId(self.next_id);
        self.next_id += 1;

        let mut files = BTreeMap::new();
        for path in targets {
            files.insert(path.clone(), snapshot_file(path));
        }
        self.checkpoints.push(Checkpoint { id, files });
        id
    }

    pub(crate) fn contains(&self, id: CheckpointId) -> bool {
        self.checkpoints.iter().any(|c| c.id == id)
    }

    /// Undo data recorded under a checkpoint, as a serializable plan.
    pub(crate) fn plan_for(&self, id: CheckpointId) -> Option<RollbackPlan> {
        self.checkpoints.iter().find(|c| c.id == id).map(|c| {
            let entries = c
                .files
                .iter()
                .map(|(path, prior)| FileBackup {
                    path: path.clone(),
                    prior: prior.clone(),
                })
                .collect();
            RollbackPlan { entries }
        })
    }

    /// Restore every file recorded under the checkpoint, most recently
    /// captured path first. Runs to completion; failures are collected.
    pub(crate) fn restore(&mut self, id: CheckpointId) -> Option<RollbackReport> {
        let index = self.checkpoints.iter().position(|c| c.id == id)?;
        let checkpoint = self.checkpoints.remove(index);

        let mut report = RollbackReport {
            checkpoint: id,
            restored: Vec::new(),
            failed: Vec::new(),
        };
        for (path, prior) in checkpoint.files.iter().rev() {
            match restore_file(path, prior) {
                Ok(()) => report.restored.push(path.clone()),
                Err(why) => {
                    tracing::warn!(path = %path.display(), "Rollback restore failed: {why}");
                    report.failed.push((path.clone(), why));
                }
            }
        }
        Some(report)
    }

    /// Drop a checkpoint once its operation and dependents have succeeded.
    pub(crate) fn discard(&mut self, id: CheckpointId) {
        self.checkpoints.retain(|c| c.id != id);
    }
}

fn snapshot_file(path: &Path) -> FileSnapshot {
    match fs::read(path) {
        Ok(bytes) => {
            let sha256 = sha256_bytes(&bytes);
            let mode = file_mode(path);
            FileSnapshot::Existed { bytes, mode, sha256 }
        }
        Err(_) => FileSnapshot::Missing,
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Option<u32> {
    None
}

fn restore_file(path: &Path, prior: &FileSnapshot) -> Result<(), String> {
    match prior {
        FileSnapshot::Existed { bytes, mode, sha256 } => {
            let opts = AtomicWriteOptions {
                file_sync: FileSyncPolicy::SyncAll,
                mode: mode.map_or(PersistMode::Default, PersistMode::Preserve),
            };
            atomic_write_with_options(path, bytes, opts).map_err(|e| e.to_string())?;
            // Verify the copy-back against the recorded hash.
            let written = fs::read(path).map_err(|e| e.to_string())?;
            let actual = sha256_bytes(&written);
            if actual == *sha256 {
                Ok(())
            } else {
                Err(format!("restored content hash mismatch: {actual}"))
            }
        }
        FileSnapshot::Missing => {
            if path.is_dir() {
                fs::remove_dir_all(path).map_err(|e| e.to_string())
            } else if path.exists() {
                fs::remove_file(path).map_err(|e| e.to_string())
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_rewrites_prior_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "original").expect("seed");

        let mut store = CheckpointStore::default();
        let id = store.capture(&[path.clone()]);
        fs::write(&path, "clobbered").expect("mutate");

        let report = store.restore(id).expect("known checkpoint");
        assert!(!report.is_partial());
        assert_eq!(fs::read_to_string(&path).expect("read"), "original");
    }

    #[test]
    fn restore_removes_files_that_were_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("new.txt");

        let mut store = CheckpointStore::default();
        let id = store.capture(&[path.clone()]);
        fs::write(&path, "created after checkpoint").expect("create");

        let report = store.restore(id).expect("known checkpoint");
        assert!(!report.is_partial());
        assert!(!path.exists());
    }

    #[test]
    fn restore_removes_directories_created_after_capture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("newdir");

        let mut store = CheckpointStore::default();
        let id = store.capture(&[path.clone()]);
        fs::create_dir_all(path.join("inner")).expect("create");

        let report = store.restore(id).expect("known checkpoint");
        assert!(!report.is_partial());
        assert!(!path.exists());
    }

    #[test]
    fn plan_carries_prior_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "prior").expect("seed");

        let mut store = CheckpointStore::default();
        let id = store.capture(&[path.clone()]);

        let plan = store.plan_for(id).expect("plan");
        assert_eq!(plan.entries.len(), 1);
        assert!(plan.entries[0].prior.existed());
        assert_eq!(plan.entries[0].prior.len(), 5);
    }

    #[test]
    fn discard_forgets_the_checkpoint() {
        let mut store = CheckpointStore::default();
        let id = store.capture(&[]);
        assert!(store.contains(id));
        store.discard(id);
        assert!(!store.contains(id));
        assert!(store.restore(id).is_none());
    }
}
