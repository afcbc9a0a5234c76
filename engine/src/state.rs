//! Operation phase transition authority.
//!
//! This module is the single encoding point for named operation-phase
//! edges and legality checks. The executor delegates transition decisions
//! here instead of embedding the graph in multiple call sites.

use crate::EngineError;

/// Phase of one operation's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseTag {
    Pending,
    PreCheck,
    Executing,
    Verifying,
    Retry,
    Succeeded,
    RolledBack,
    Failed,
    Skipped,
}

impl PhaseTag {
    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PreCheck => "pre_check",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Retry => "retry",
            Self::Succeeded => "succeeded",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub(crate) const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::RolledBack | Self::Failed | Self::Skipped
        )
    }
}

/// Named edge between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseEdge {
    Begin,
    Launch,
    Inspect,
    PlanRetry,
    Relaunch,
    Complete,
    RollBack,
    Fail,
    Skip,
}

#[must_use]
pub(crate) fn transition_edge(from: PhaseTag, to: PhaseTag) -> Option<PhaseEdge> {
    use PhaseEdge::{Begin, Complete, Fail, Inspect, Launch, PlanRetry, Relaunch, RollBack, Skip};
    use PhaseTag::{
        Executing, Failed, Pending, PreCheck, Retry, RolledBack, Skipped, Succeeded, Verifying,
    };

    match (from, to) {
        (Pending, PreCheck) => Some(Begin),
        (Pending, Skipped) => Some(Skip),
        (PreCheck, Executing) => Some(Launch),
        (PreCheck | Retry, Failed) => Some(Fail),
        (Executing, Verifying) => Some(Inspect),
        (Verifying, Retry) => Some(PlanRetry),
        (Verifying, Succeeded) => Some(Complete),
        (Retry, Executing) => Some(Relaunch),
        (Retry, RolledBack) => Some(RollBack),
        _ => None,
    }
}

#[must_use]
pub(crate) fn is_legal_transition(from: PhaseTag, edge: PhaseEdge, to: PhaseTag) -> bool {
    transition_edge(from, to) == Some(edge)
}

/// Phase driver carried by the executor. Every move goes through
/// [`Phase::advance`], so an illegal edge is an error, not a silent jump.
#[derive(Debug)]
pub(crate) struct Phase {
    current: PhaseTag,
}

impl Phase {
    pub(crate) const fn new() -> Self {
        Self {
            current: PhaseTag::Pending,
        }
    }

    pub(crate) const fn current(&self) -> PhaseTag {
        self.current
    }

    pub(crate) fn advance(&mut self, to: PhaseTag) -> Result<PhaseEdge, EngineError> {
        let Some(edge) = transition_edge(self.current, to) else {
            return Err(EngineError::IllegalTransition {
                from: self.current.label(),
                to: to.label(),
            });
        };
        debug_assert!(is_legal_transition(self.current, edge, to));
        self.current = to;
        Ok(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_the_graph() {
        let mut phase = Phase::new();
        for next in [
            PhaseTag::PreCheck,
            PhaseTag::Executing,
            PhaseTag::Verifying,
            PhaseTag::Retry,
            PhaseTag::Executing,
            PhaseTag::Verifying,
            PhaseTag::Succeeded,
        ] {
            phase.advance(next).expect("legal edge");
        }
        assert!(phase.current().is_terminal());
    }

    #[test]
    fn rollback_only_reachable_from_retry() {
        assert!(transition_edge(PhaseTag::Retry, PhaseTag::RolledBack).is_some());
        assert!(transition_edge(PhaseTag::Verifying, PhaseTag::RolledBack).is_none());
        assert!(transition_edge(PhaseTag::Executing, PhaseTag::RolledBack).is_none());
    }

    #[test]
    fn skip_only_from_pending() {
        assert!(transition_edge(PhaseTag::Pending, PhaseTag::Skipped).is_some());
        assert!(transition_edge(PhaseTag::PreCheck, PhaseTag::Skipped).is_none());
    }

    #[test]
    fn terminal_phases_have_no_outgoing_edges() {
        for terminal in [
            PhaseTag::Succeeded,
            PhaseTag::RolledBack,
            PhaseTag::Failed,
            PhaseTag::Skipped,
        ] {
            for target in [PhaseTag::Pending, PhaseTag::Executing, PhaseTag::Retry] {
                assert!(transition_edge(terminal, target).is_none());
            }
        }
    }

    #[test]
    fn illegal_advance_is_an_error() {
        let mut phase = Phase::new();
        let err = phase.advance(PhaseTag::Verifying).expect_err("illegal");
        assert!(matches!(err, EngineError::IllegalTransition { .. }));
        assert_eq!(phase.current(), PhaseTag::Pending);
    }
}
