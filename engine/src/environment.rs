//! Session environment tracking.
//!
//! The tracker is the sole reader of "current truth": after every attempt
//! it re-reads actual disk state for the affected paths instead of
//! trusting the tool's self-report. It also owns the checkpoint store and
//! the running operation statistics that feed the end-of-session review.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::json;

use bespoke_types::{OperationId, ToolResult};
use bespoke_utils::sha256_file;

use crate::EngineError;
use crate::checkpoints::{CheckpointId, CheckpointStore, RollbackReport};

/// Observed on-disk state of one path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileStateInfo {
    pub exists: bool,
    pub is_directory: bool,
    pub size: u64,
    pub sha256: Option<String>,
    pub mode: Option<u32>,
    pub last_verified_at: DateTime<Utc>,
}

impl FileStateInfo {
    /// Re-read one path from disk.
    #[must_use]
    pub fn observe(path: &Path) -> Self {
        let now = Utc::now();
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                is_directory: meta.is_dir(),
                size: meta.len(),
                sha256: if meta.is_file() {
                    sha256_file(path).ok()
                } else {
                    None
                },
                mode: mode_of(&meta),
                last_verified_at: now,
            },
            Err(_) => Self {
                exists: false,
                is_directory: false,
                size: 0,
                sha256: None,
                mode: None,
                last_verified_at: now,
            },
        }
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode())
}

#[cfg(not(unix))]
fn mode_of(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Running success/failure tallies with a map of common error kinds.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OperationStats {
    pub succeeded: u32,
    pub failed: u32,
    pub error_kinds: BTreeMap<String, u32>,
}

impl OperationStats {
    fn record(&mut self, result: &ToolResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            let kind = classify_error(&result.result);
            *self.error_kinds.entry(kind.to_string()).or_insert(0) += 1;
        }
    }
}

/// Bucket a failure message into a coarse error kind for the stats map.
fn classify_error(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("read-only") {
        "permission_denied"
    } else if lower.contains("no such file") || lower.contains("not found") {
        "not_found"
    } else if lower.contains("outside workspace") || lower.contains("denied pattern") {
        "sandbox_denied"
    } else if lower.contains("utf-8") || lower.contains("invalid") || lower.contains("expected") {
        "invalid_data"
    } else if lower.contains("verification failed") {
        "verification_failed"
    } else {
        "other"
    }
}

/// Session-scoped view of the workspace. Never persisted.
#[derive(Debug)]
pub struct EnvironmentTracker {
    root: PathBuf,
    file_states: BTreeMap<PathBuf, FileStateInfo>,
    operation_sequence: Vec<OperationId>,
    checkpoints: CheckpointStore,
    stats: OperationStats,
}

impl EnvironmentTracker {
    pub fn new(root: PathBuf) -> Result<Self, EngineError> {
        // The sandbox hands out canonical paths; tracking and verification
        // must compare against the same view or a symlinked root makes
        // every in-workspace prefix check fail.
        let root = match std::fs::canonicalize(&root) {
            Ok(canonical) => canonical,
            Err(_) => return Err(EngineError::WorkspaceInvalid { path: root }),
        };
        if !root.is_dir() {
            return Err(EngineError::WorkspaceInvalid { path: root });
        }
        Ok(Self {
            root,
            file_states: BTreeMap::new(),
            operation_sequence: Vec::new(),
            checkpoints: CheckpointStore::default(),
            stats: OperationStats::default(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn file_state(&self, path: &Path) -> Option<&FileStateInfo> {
        self.file_states.get(path)
    }

    #[must_use]
    pub fn stats(&self) -> &OperationStats {
        &self.stats
    }

    #[must_use]
    pub fn operation_sequence(&self) -> &[OperationId] {
        &self.operation_sequence
    }

    /// Compact serializable view, captured into each operation record.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "workspace_root": self.root,
            "workspace_valid": self.root.is_dir(),
            "tracked_files": self.file_states.len(),
            "operations_executed": self.operation_sequence.len(),
            "stats": self.stats,
        })
    }

    /// Update tracked state for every path the attempt touched, re-reading
    /// actual disk state. Returns "path: created|modified|deleted|verified"
    /// lines describing what changed relative to the tracked view.
    pub fn record(&mut self, id: &OperationId, result: &ToolResult) -> Vec<String> {
        let mut changes = Vec::new();
        for path in &result.affected_files {
            let fresh = FileStateInfo::observe(path);
            let change = match self.file_states.get(path) {
                Some(prev) if prev.exists && !fresh.exists => "deleted",
                Some(prev) if !prev.exists && fresh.exists => "created",
                Some(prev) if prev.sha256 != fresh.sha256 || prev.size != fresh.size => "modified",
                Some(_) => "verified",
                None if fresh.exists => "created",
                None => "verified",
            };
            changes.push(format!("{}: {change}", display_relative(path, &self.root)));
            self.file_states.insert(path.clone(), fresh);
        }
        if self.operation_sequence.last() != Some(id) {
            self.operation_sequence.push(id.clone());
        }
        self.stats.record(result);
        changes
    }

    /// Capture a rollback point covering the given paths.
    pub fn push_rollback_point(&mut self, targets: &[PathBuf]) -> CheckpointId {
        let id = self.checkpoints.capture(targets);
        tracing::debug!(checkpoint = %id, files = targets.len(), "Captured rollback point");
        id
    }

    /// Undo data recorded under a checkpoint.
    #[must_use]
    pub fn rollback_plan(&self, id: CheckpointId) -> Option<bespoke_types::RollbackPlan> {
        self.checkpoints.plan_for(id)
    }

    /// Restore a checkpoint. Single attempt; per-file failures make the
    /// report partial and are surfaced to the caller, never retried.
    pub fn rollback_to(&mut self, id: CheckpointId) -> Option<RollbackReport> {
        let report = self.checkpoints.restore(id)?;
        for path in report.restored.iter().chain(report.failed.iter().map(|(p, _)| p)) {
            let fresh = FileStateInfo::observe(path);
            self.file_states.insert(path.clone(), fresh);
        }
        Some(report)
    }

    /// Discard a rollback point whose operation succeeded.
    pub fn discard_rollback_point(&mut self, id: CheckpointId) {
        self.checkpoints.discard(id);
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_touching(path: &Path) -> ToolResult {
        ToolResult::success("ok").with_affected_files([path.to_path_buf()])
    }

    #[test]
    fn new_rejects_non_directory_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").expect("seed");
        assert!(matches!(
            EnvironmentTracker::new(file),
            Err(EngineError::WorkspaceInvalid { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn root_is_canonicalized_through_symlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        std::fs::create_dir(&real).expect("real dir");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let tracker = EnvironmentTracker::new(link).expect("tracker");
        assert_eq!(
            tracker.root(),
            std::fs::canonicalize(&real).expect("canonical")
        );
    }

    #[test]
    fn record_hash_matches_independent_rehash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "observed content").expect("seed");

        let mut tracker = EnvironmentTracker::new(dir.path().to_path_buf()).expect("tracker");
        let id = OperationId::new("op-1").expect("id");
        tracker.record(&id, &success_touching(&path));

        let tracked = tracker.file_state(&path).expect("tracked");
        assert_eq!(
            tracked.sha256.as_deref(),
            Some(sha256_file(&path).expect("rehash").as_str())
        );
    }

    #[test]
    fn record_labels_created_modified_deleted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        let mut tracker = EnvironmentTracker::new(dir.path().to_path_buf()).expect("tracker");
        let id = OperationId::new("op-1").expect("id");

        std::fs::write(&path, "one").expect("write");
        let changes = tracker.record(&id, &success_touching(&path));
        assert_eq!(changes, vec!["f.txt: created"]);

        std::fs::write(&path, "two").expect("rewrite");
        let changes = tracker.record(&id, &success_touching(&path));
        assert_eq!(changes, vec!["f.txt: modified"]);

        std::fs::remove_file(&path).expect("remove");
        let changes = tracker.record(&id, &success_touching(&path));
        assert_eq!(changes, vec!["f.txt: deleted"]);
    }

    #[test]
    fn stats_bucket_failures_by_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut tracker = EnvironmentTracker::new(dir.path().to_path_buf()).expect("tracker");
        let id = OperationId::new("op-1").expect("id");

        tracker.record(&id, &ToolResult::failure("Permission denied (os error 13)"));
        tracker.record(&id, &ToolResult::failure("No such file or directory"));
        tracker.record(&id, &ToolResult::success("ok"));

        let stats = tracker.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.error_kinds.get("permission_denied"), Some(&1));
        assert_eq!(stats.error_kinds.get("not_found"), Some(&1));
    }

    #[test]
    fn rollback_updates_tracked_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "before").expect("seed");

        let mut tracker = EnvironmentTracker::new(dir.path().to_path_buf()).expect("tracker");
        let id = OperationId::new("op-1").expect("id");
        tracker.record(&id, &success_touching(&path));

        let checkpoint = tracker.push_rollback_point(std::slice::from_ref(&path));
        std::fs::write(&path, "after - much longer content").expect("mutate");
        tracker.record(&id, &success_touching(&path));

        let report = tracker.rollback_to(checkpoint).expect("restore");
        assert!(!report.is_partial());
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "before");
        assert_eq!(tracker.file_state(&path).expect("tracked").size, 6);
    }
}
