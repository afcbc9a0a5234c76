//! Batch planning.
//!
//! A batch is an ordered group of operations sharing one pre-batch
//! checkpoint. This module holds the pure half of coordination: dependency
//! ordering and transitive-dependent computation. Actually driving the
//! members, rolling back the shared checkpoint, and sealing skipped
//! dependents is the session's job.

use std::collections::{BTreeMap, BTreeSet};

use bespoke_types::{BatchId, FinalState, OperationId, OperationRequest};

use crate::EngineError;
use crate::checkpoints::RollbackReport;

/// A group of operations submitted together.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub batch_id: BatchId,
    pub operations: Vec<OperationRequest>,
}

impl BatchRequest {
    /// Stamp every member with the batch id.
    #[must_use]
    pub fn new(batch_id: BatchId, operations: impl IntoIterator<Item = OperationRequest>) -> Self {
        let operations = operations
            .into_iter()
            .map(|op| op.with_batch(batch_id.clone()))
            .collect();
        Self { batch_id, operations }
    }

    #[must_use]
    pub fn contains(&self, id: &OperationId) -> bool {
        self.operations.iter().any(|op| op.id == *id)
    }

    /// Submission-order indices rearranged so every member runs after its
    /// in-batch dependencies. Dependencies outside the batch are left to
    /// the per-operation pre-check. Ties keep submission order.
    pub fn execution_order(&self) -> Result<Vec<usize>, EngineError> {
        let position: BTreeMap<&OperationId, usize> = self
            .operations
            .iter()
            .enumerate()
            .map(|(i, op)| (&op.id, i))
            .collect();

        let mut order = Vec::with_capacity(self.operations.len());
        let mut placed = vec![false; self.operations.len()];
        // Kahn-style fixpoint over submission order; no progress in a full
        // sweep means a cycle.
        while order.len() < self.operations.len() {
            let before = order.len();
            for (i, op) in self.operations.iter().enumerate() {
                if placed[i] {
                    continue;
                }
                let ready = op.dependencies.iter().all(|dep| {
                    position.get(dep).is_none_or(|&dep_index| placed[dep_index])
                });
                if ready {
                    placed[i] = true;
                    order.push(i);
                }
            }
            if order.len() == before {
                let stuck = self
                    .operations
                    .iter()
                    .enumerate()
                    .find(|(i, _)| !placed[*i])
                    .map(|(_, op)| op.id.clone())
                    .unwrap_or_else(|| unreachable!("unplaced member exists"));
                return Err(EngineError::BatchCycle {
                    batch_id: self.batch_id.clone(),
                    operation_id: stuck,
                });
            }
        }
        Ok(order)
    }

    /// Every member that depends on `failed`, directly or through other
    /// members. These are sealed skipped when `failed` goes terminal
    /// without succeeding.
    #[must_use]
    pub fn transitive_dependents(&self, failed: &OperationId) -> BTreeSet<OperationId> {
        let mut dependents: BTreeSet<OperationId> = BTreeSet::new();
        let mut grew = true;
        while grew {
            grew = false;
            for op in &self.operations {
                if dependents.contains(&op.id) {
                    continue;
                }
                let hit = op
                    .dependencies
                    .iter()
                    .any(|dep| dep == failed || dependents.contains(dep));
                if hit {
                    dependents.insert(op.id.clone());
                    grew = true;
                }
            }
        }
        dependents
    }
}

/// Outcome of one batch, in execution order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub outcomes: Vec<(OperationId, FinalState)>,
    /// Present when a critical member failure forced the shared checkpoint
    /// to be restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
}

impl BatchSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, state)| *state == FinalState::Succeeded)
    }

    #[must_use]
    pub fn outcome_of(&self, id: &OperationId) -> Option<FinalState> {
        self.outcomes
            .iter()
            .find(|(op, _)| op == id)
            .map(|(_, state)| *state)
    }
}
