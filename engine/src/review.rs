//! End-of-session review.
//!
//! The review is assembled once, when the session finishes: one line per
//! operation, the net environment diff, aggregated check tallies, every
//! partial rollback, and follow-up suggestions derived from the error
//! kinds the session actually hit.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use bespoke_types::{
    BatchId, CheckCategory, FinalState, HistoryEntry, OperationId, OperationRecord,
};

use crate::checkpoints::RollbackReport;
use crate::environment::OperationStats;
use crate::session::Termination;

/// One operation, condensed to a review line.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OperationLine {
    pub operation_id: OperationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub summary: String,
    pub final_state: FinalState,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<&HistoryEntry> for OperationLine {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            operation_id: entry.operation_id.clone(),
            batch_id: entry.batch_id.clone(),
            summary: entry.summary.clone(),
            final_state: entry.final_state,
            attempt_count: entry.attempt_count,
            warnings: entry.important_warnings.clone(),
        }
    }
}

/// Passed/failed counts for one check group across the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CheckTally {
    pub passed: usize,
    pub failed: usize,
}

/// Structured summary of a finished session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionReview {
    pub goal: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<String>,
    pub operations: Vec<OperationLine>,
    /// Net "path: change" lines across the whole session.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment_changes: Vec<String>,
    pub check_tallies: BTreeMap<CheckCategory, CheckTally>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial_rollbacks: Vec<String>,
    pub operation_stats: OperationStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
}

impl SessionReview {
    pub(crate) fn assemble(
        goal: String,
        plan: Vec<String>,
        records: &[OperationRecord],
        entries: &[HistoryEntry],
        stats: &OperationStats,
        rollback_reports: &[RollbackReport],
        termination: Option<Termination>,
    ) -> Self {
        let operations: Vec<OperationLine> = entries.iter().map(OperationLine::from).collect();
        let suggestions = suggestions(stats, entries);
        Self {
            goal,
            plan,
            operations,
            environment_changes: net_changes(entries),
            check_tallies: check_tallies(records),
            partial_rollbacks: rollback_reports
                .iter()
                .filter(|r| r.is_partial())
                .map(RollbackReport::describe)
                .collect(),
            operation_stats: stats.clone(),
            suggestions,
            termination,
        }
    }
}

/// Collapse per-operation state changes to a session-wide net diff, in
/// first-touched order. The last mutation per path wins; a "verified"
/// observation never supersedes an earlier created/modified/deleted label.
fn net_changes(entries: &[HistoryEntry]) -> Vec<String> {
    let mut last: BTreeMap<&str, &str> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();
    for entry in entries {
        for line in &entry.state_changes {
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

fn check_tallies(records: &[OperationRecord]) -> BTreeMap<CheckCategory, CheckTally> {
    let mut out: BTreeMap<CheckCategory, CheckTally> = BTreeMap::new();
    for record in records {
        for attempt in &record.attempts {
            for (category, (passed, failed)) in attempt.result.verification.tally() {
                let tally = out.entry(category).or_default();
                tally.passed += passed;
                tally.failed += failed;
            }
        }
    }
    out
}

/// Follow-up suggestions keyed off the session's dominant error kinds.
fn suggestions(stats: &OperationStats, entries: &[HistoryEntry]) -> Vec<String> {
    let mut out = Vec::new();
    for kind in stats.error_kinds.keys() {
        let hint = match kind.as_str() {
            "permission_denied" => "check file permissions inside the workspace",
            "not_found" => "confirm target paths exist before reading them",
            "sandbox_denied" => "keep operation paths inside the workspace root",
            "invalid_data" => "validate content encodings and formats before writing",
            "verification_failed" => "review verification warnings on the failed operations",
            _ => continue,
        };
        out.push(hint.to_string());
    }
    let unfinished = entries
        .iter()
        .filter(|e| e.final_state != FinalState::Succeeded)
        .count();
    if unfinished > 0 {
        out.push(format!(
            "{unfinished} operation(s) did not complete; review them before retrying the goal"
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bespoke_types::ToolResult;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn entry(id: &str, state: FinalState, changes: &[&str]) -> HistoryEntry {
        HistoryEntry {
            operation_id: OperationId::new(id).expect("id"),
            batch_id: None,
            summary: format!("write_file {} on {id}.txt", state.label()),
            files_affected: BTreeSet::new(),
            success: state == FinalState::Succeeded,
            final_state: state,
            attempt_count: 1,
            important_warnings: Vec::new(),
            state_changes: changes.iter().map(ToString::to_string).collect(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn net_changes_keep_last_change_per_path() {
        let entries = vec![
            entry("a", FinalState::Succeeded, &["f.txt: created"]),
            entry("b", FinalState::Succeeded, &["f.txt: modified", "g.txt: created"]),
        ];
        assert_eq!(
            net_changes(&entries),
            vec!["f.txt: modified", "g.txt: created"]
        );
    }

    #[test]
    fn read_back_does_not_erase_a_creation() {
        let entries = vec![
            entry("a", FinalState::Succeeded, &["f.txt: created"]),
            entry("b", FinalState::Succeeded, &["f.txt: verified"]),
        ];
        assert_eq!(net_changes(&entries), vec!["f.txt: created"]);
    }

    #[test]
    fn suggestions_follow_error_kinds() {
        let mut stats = OperationStats::default();
        stats.error_kinds.insert("permission_denied".to_string(), 2);
        let entries = vec![entry("a", FinalState::Failed, &[])];

        let out = suggestions(&stats, &entries);
        assert!(out.iter().any(|s| s.contains("permissions")));
        assert!(out.iter().any(|s| s.contains("did not complete")));
    }

    #[test]
    fn clean_session_has_no_suggestions() {
        let stats = OperationStats::default();
        let entries = vec![entry("a", FinalState::Succeeded, &[])];
        assert!(suggestions(&stats, &entries).is_empty());
    }

    #[test]
    fn review_serializes_with_stable_shape() {
        let mut record = OperationRecord::begin(
            &bespoke_types::OperationRequest::new(
                OperationId::new("op-1").expect("id"),
                bespoke_types::ToolKind::WriteFile,
                serde_json::json!({"path": "a.txt", "content": "x"}),
            ),
            Utc::now(),
            serde_json::json!({}),
        );
        let mut result = ToolResult::success("ok");
        result
            .verification
            .insert(CheckCategory::Critical, "exists", true);
        record.push_attempt(bespoke_types::AttemptRecord {
            attempt_number: 1,
            strategy: bespoke_types::StrategyKind::Direct,
            result,
            timestamp: Utc::now(),
            state_changes: Vec::new(),
        });
        record.seal(FinalState::Succeeded);

        let review = SessionReview::assemble(
            "create a file".to_string(),
            vec!["write a.txt".to_string()],
            std::slice::from_ref(&record),
            &[entry("op-1", FinalState::Succeeded, &["a.txt: created"])],
            &OperationStats::default(),
            &[],
            None,
        );

        let json = serde_json::to_value(&review).expect("serializable");
        assert_eq!(json["goal"], "create a file");
        assert_eq!(json["check_tallies"]["critical"]["passed"], 1);
        assert_eq!(json["environment_changes"][0], "a.txt: created");
    }
}
