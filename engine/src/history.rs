//! Operation history.
//!
//! Full per-attempt records stay in the session; what survives it is a
//! condensed entry per sealed operation. Condensation keeps the net state
//! diff and the user-relevant warnings, and drops attempt-level noise.
//! The durable sink is an append-only JSONL file; writing to it is
//! best-effort and never fails an operation.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;

use bespoke_types::{CheckCategory, CheckValue, FinalState, HistoryEntry, OperationRecord};
use bespoke_utils::format_bytes;

/// Session history plus an optional durable JSONL sink.
#[derive(Debug)]
pub struct HistoryManager {
    durable_path: Option<PathBuf>,
    session_entries: Vec<HistoryEntry>,
}

impl HistoryManager {
    #[must_use]
    pub fn new(durable_path: Option<PathBuf>) -> Self {
        Self {
            durable_path,
            session_entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.session_entries
    }

    /// Condense a sealed record and retain the entry. Durable persistence
    /// failures are logged and swallowed.
    pub fn append(&mut self, record: &OperationRecord) -> &HistoryEntry {
        let entry = Self::condense(record);
        self.persist(&entry);
        self.session_entries.push(entry);
        self.session_entries
            .last()
            .unwrap_or_else(|| unreachable!("entry pushed above"))
    }

    /// Reduce a full record to its durable form.
    #[must_use]
    pub fn condense(record: &OperationRecord) -> HistoryEntry {
        let final_state = record.final_state().unwrap_or(FinalState::Failed);
        let success = final_state == FinalState::Succeeded;

        let target = record
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("<no path>");
        let mut summary = format!("{} {} on {target}", record.tool, final_state);
        if let Some(size) = verified_size(record) {
            summary.push_str(&format!(" ({})", format_bytes(size)));
        }

        HistoryEntry {
            operation_id: record.operation_id.clone(),
            batch_id: record.batch_id.clone(),
            summary,
            files_affected: record.affected_files(),
            success,
            final_state,
            attempt_count: record.attempt_count(),
            important_warnings: important_warnings(record),
            state_changes: net_state_changes(record),
            completed_at: Utc::now(),
        }
    }

    fn persist(&self, entry: &HistoryEntry) {
        let Some(path) = &self.durable_path else {
            return;
        };
        if let Err(why) = append_jsonl(path, entry) {
            tracing::warn!(path = %path.display(), "History persistence failed: {why}");
        }
    }
}

fn append_jsonl(path: &PathBuf, entry: &HistoryEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
    writeln!(file, "{line}")
}

/// Verified byte size from the sealing attempt, when verification took one.
fn verified_size(record: &OperationRecord) -> Option<u64> {
    let attempt = record.last_attempt()?;
    if !attempt.result.success {
        return None;
    }
    match attempt.result.verification.get(CheckCategory::Content, "size") {
        Some(CheckValue::Count(size)) => Some(*size),
        _ => None,
    }
}

/// Warnings worth keeping after the session: tool-reported conditions and
/// security check failures. Quality and content check chatter is dropped.
fn important_warnings(record: &OperationRecord) -> Vec<String> {
    let mut seen = Vec::new();
    for warning in record.all_warnings() {
        if warning.starts_with("quality: ") || warning.starts_with("content: ") {
            continue;
        }
        if !seen.contains(&warning) {
            seen.push(warning);
        }
    }
    seen
}

/// Net per-path state diff in first-touched order. The last mutation per
/// path wins; a "verified" observation never supersedes an earlier
/// created/modified/deleted label, it only fills in untouched paths.
fn net_state_changes(record: &OperationRecord) -> Vec<String> {
    let mut last: BTreeMap<&str, &str> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();
    for attempt in &record.attempts {
        for line in &attempt.state_changes {
            if let Some((path, change)) = line.split_once(": ") {
                match last.entry(path) {
                    Entry::Vacant(slot) => {
                        slot.insert(change);
                        order.push(path);
                    }
                    Entry::Occupied(mut slot) => {
                        if change != "verified" {
                            slot.insert(change);
                        }
                    }
                }
            }
        }
    }
    order
        .into_iter()
        .map(|path| format!("{path}: {}", last[path]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bespoke_types::{
        AttemptRecord, OperationId, OperationRequest, StrategyKind, ToolKind, ToolResult,
    };
    use serde_json::json;

    fn sealed_record(state: FinalState, attempts: Vec<AttemptRecord>) -> OperationRecord {
        let request = OperationRequest::new(
            OperationId::new("op-9").expect("id"),
            ToolKind::WriteFile,
            json!({"path": "src/main.rs", "content": "fn main() {}"}),
        );
        let mut record = OperationRecord::begin(&request, Utc::now(), json!({}));
        for attempt in attempts {
            record.push_attempt(attempt);
        }
        record.seal(state);
        record
    }

    fn attempt(n: u32, result: ToolResult, state_changes: Vec<String>) -> AttemptRecord {
        AttemptRecord {
            attempt_number: n,
            strategy: StrategyKind::Direct,
            result,
            timestamp: Utc::now(),
            state_changes,
        }
    }

    #[test]
    fn condensed_entry_summarizes_tool_and_target() {
        let record = sealed_record(
            FinalState::Succeeded,
            vec![attempt(1, ToolResult::success("ok"), vec![])],
        );
        let entry = HistoryManager::condense(&record);
        assert!(entry.success);
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.summary, "write_file succeeded on src/main.rs");
    }

    #[test]
    fn quality_warnings_do_not_survive_condensation() {
        let mut result = ToolResult::success("ok");
        result.push_warning("quality: check 'lint_passed' failed");
        result.push_warning("security: check 'owner_valid' failed");
        result.push_warning("delete target did not exist");
        let record = sealed_record(FinalState::Succeeded, vec![attempt(1, result, vec![])]);

        let entry = HistoryManager::condense(&record);
        assert_eq!(
            entry.important_warnings,
            vec![
                "security: check 'owner_valid' failed",
                "delete target did not exist",
            ]
        );
    }

    #[test]
    fn state_changes_collapse_to_net_diff() {
        let record = sealed_record(
            FinalState::Succeeded,
            vec![
                attempt(
                    1,
                    ToolResult::failure("partial write"),
                    vec!["a.txt: created".to_string()],
                ),
                attempt(
                    2,
                    ToolResult::success("ok"),
                    vec!["a.txt: modified".to_string(), "b.txt: created".to_string()],
                ),
            ],
        );
        let entry = HistoryManager::condense(&record);
        assert_eq!(entry.state_changes, vec!["a.txt: modified", "b.txt: created"]);
    }

    #[test]
    fn verified_does_not_supersede_a_mutation() {
        let record = sealed_record(
            FinalState::Succeeded,
            vec![
                attempt(
                    1,
                    ToolResult::success("ok"),
                    vec!["a.txt: created".to_string()],
                ),
                attempt(
                    2,
                    ToolResult::success("ok"),
                    vec!["a.txt: verified".to_string()],
                ),
            ],
        );
        let entry = HistoryManager::condense(&record);
        assert_eq!(entry.state_changes, vec!["a.txt: created"]);
    }

    #[test]
    fn append_writes_one_json_line_per_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history").join("session.jsonl");
        let mut manager = HistoryManager::new(Some(path.clone()));

        let record = sealed_record(
            FinalState::Succeeded,
            vec![attempt(1, ToolResult::success("ok"), vec![])],
        );
        manager.append(&record);
        manager.append(&record);

        let contents = std::fs::read_to_string(&path).expect("durable file");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: HistoryEntry = serde_json::from_str(lines[0]).expect("valid json line");
        assert_eq!(parsed.summary, "write_file succeeded on src/main.rs");
    }

    #[test]
    fn persistence_failure_does_not_panic_or_drop_the_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory at the sink path makes the open fail.
        let path = dir.path().join("history.jsonl");
        std::fs::create_dir(&path).expect("blocker");

        let mut manager = HistoryManager::new(Some(path));
        let record = sealed_record(
            FinalState::Failed,
            vec![attempt(1, ToolResult::failure("boom"), vec![])],
        );
        manager.append(&record);
        assert_eq!(manager.entries().len(), 1);
        assert!(!manager.entries()[0].success);
    }
}
