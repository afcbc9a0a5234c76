//! Retry strategy selection.
//!
//! The planner owns no per-tool knowledge of its own: the ordered strategy
//! list lives in the operation profile table and is consulted read-only.

use bespoke_types::{AttemptRecord, StrategyKind, ToolKind};

/// Selects the next distinct retry strategy for a failed operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPlanner {
    max_attempts: u32,
}

impl RetryPlanner {
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// First untried strategy from the tool's ordered list, or `None` when
    /// the list or the attempt ceiling is exhausted, whichever comes first.
    /// An already-succeeded history is never retried.
    #[must_use]
    pub fn next_strategy(&self, tool: ToolKind, attempts: &[AttemptRecord]) -> Option<StrategyKind> {
        if attempts.last().is_some_and(|a| a.result.success) {
            return None;
        }
        if attempts.len() as u32 >= self.max_attempts {
            return None;
        }
        tool.profile()
            .strategies
            .iter()
            .find(|s| !attempts.iter().any(|a| a.strategy == **s))
            .copied()
    }
}
