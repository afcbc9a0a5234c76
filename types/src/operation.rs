//! Operation requests, per-session records, and the condensed durable
//! history entry.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::ids::{BatchId, OperationId};
use crate::profile::ToolKind;
use crate::result::{StrategyKind, ToolResult};

/// One requested tool invocation, before execution.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperationRequest {
    pub id: OperationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub tool: ToolKind,
    pub args: serde_json::Value,
    /// Operations that must already have succeeded in this session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<OperationId>,
}

impl OperationRequest {
    #[must_use]
    pub fn new(id: OperationId, tool: ToolKind, args: serde_json::Value) -> Self {
        Self {
            id,
            batch_id: None,
            tool,
            args,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = OperationId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    #[must_use]
    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

/// Terminal outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Succeeded,
    Failed,
    RolledBack,
    Skipped,
}

impl FinalState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One attempt within an operation's retry history.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed.
    pub attempt_number: u32,
    pub strategy: StrategyKind,
    pub result: ToolResult,
    pub timestamp: DateTime<Utc>,
    /// Per-attempt "path: created|modified|deleted" lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_changes: Vec<String>,
}

/// Full trace of one logical operation across all attempts.
///
/// Created when execution begins, appended-to per attempt, and sealed
/// exactly once when the retry loop ends. Retained only for the session,
/// then condensed into a [`HistoryEntry`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperationRecord {
    pub operation_id: OperationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub tool: ToolKind,
    pub args: serde_json::Value,
    pub start_time: DateTime<Utc>,
    /// Environment view captured when the operation began.
    pub environment_at_start: serde_json::Value,
    pub attempts: Vec<AttemptRecord>,
    final_state: Option<FinalState>,
}

impl OperationRecord {
    #[must_use]
    pub fn begin(
        request: &OperationRequest,
        start_time: DateTime<Utc>,
        environment_at_start: serde_json::Value,
    ) -> Self {
        Self {
            operation_id: request.id.clone(),
            batch_id: request.batch_id.clone(),
            tool: request.tool,
            args: request.args.clone(),
            start_time,
            environment_at_start,
            attempts: Vec::new(),
            final_state: None,
        }
    }

    pub fn push_attempt(&mut self, attempt: AttemptRecord) {
        debug_assert!(self.final_state.is_none(), "attempt after seal");
        self.attempts.push(attempt);
    }

    /// Seal the record. The first seal wins; a second seal is a logic bug
    /// upstream and is ignored rather than mutating history.
    pub fn seal(&mut self, state: FinalState) {
        if self.final_state.is_none() {
            self.final_state = Some(state);
        } else {
            debug_assert!(false, "operation sealed twice");
        }
    }

    #[must_use]
    pub const fn final_state(&self) -> Option<FinalState> {
        self.final_state
    }

    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.final_state.is_some()
    }

    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    #[must_use]
    pub fn last_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Union of files touched by any attempt.
    #[must_use]
    pub fn affected_files(&self) -> BTreeSet<PathBuf> {
        self.attempts
            .iter()
            .flat_map(|a| a.result.affected_files.iter().cloned())
            .collect()
    }

    /// All warnings accumulated across attempts, in order.
    #[must_use]
    pub fn all_warnings(&self) -> Vec<String> {
        self.attempts
            .iter()
            .flat_map(|a| a.result.warnings.iter().cloned())
            .collect()
    }
}

/// Durable, condensed record of one sealed operation. Never mutated.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    pub operation_id: OperationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// One line: tool, outcome, and primary target.
    pub summary: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub files_affected: BTreeSet<PathBuf>,
    pub success: bool,
    pub final_state: FinalState,
    pub attempt_count: u32,
    /// Filtered subset of all warnings - only user-relevant ones survive
    /// condensation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub important_warnings: Vec<String>,
    /// Net state diff across the whole operation, not per-attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub state_changes: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OperationRequest {
        OperationRequest::new(
            OperationId::new("op-1").unwrap(),
            ToolKind::WriteFile,
            serde_json::json!({"path": "a.txt", "content": "hi"}),
        )
    }

    fn attempt(n: u32, success: bool) -> AttemptRecord {
        let result = if success {
            ToolResult::success("ok")
        } else {
            ToolResult::failure("nope")
        };
        AttemptRecord {
            attempt_number: n,
            strategy: StrategyKind::Direct,
            result,
            timestamp: Utc::now(),
            state_changes: Vec::new(),
        }
    }

    #[test]
    fn record_seals_once() {
        let mut record = OperationRecord::begin(&request(), Utc::now(), serde_json::json!({}));
        assert!(!record.is_sealed());
        record.push_attempt(attempt(1, true));
        record.seal(FinalState::Succeeded);
        assert_eq!(record.final_state(), Some(FinalState::Succeeded));
        assert_eq!(record.attempt_count(), 1);
    }

    #[test]
    fn warnings_aggregate_across_attempts() {
        let mut record = OperationRecord::begin(&request(), Utc::now(), serde_json::json!({}));
        let mut first = attempt(1, false);
        first.result.push_warning("first failed");
        record.push_attempt(first);
        record.push_attempt(attempt(2, true));
        record.seal(FinalState::Succeeded);
        assert_eq!(record.all_warnings(), vec!["first failed"]);
    }

    #[test]
    fn final_state_labels_are_snake_case() {
        assert_eq!(FinalState::RolledBack.to_string(), "rolled_back");
        assert_eq!(
            serde_json::to_value(FinalState::Skipped).unwrap(),
            serde_json::json!("skipped")
        );
    }
}
