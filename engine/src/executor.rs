//! The per-operation execution loop.
//!
//! One call to [`OperationExecutor::run`] owns an operation from pre-check
//! to its sealed terminal state: execute an attempt, verify the real-world
//! effect, pick the next distinct strategy on failure, and roll back a
//! critical operation when retries exhaust. Primitive errors become failed
//! attempts, never propagated panics; the only errors surfaced from here
//! are engine-level bugs such as illegal phase transitions.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;

use bespoke_tools::{ToolCtx, ToolRegistry, target_path, validate_args};
use bespoke_types::{
    AttemptRecord, FinalState, OperationId, OperationRecord, OperationRequest, StrategyKind,
    ToolResult,
};

use crate::EngineError;
use crate::checkpoints::{CheckpointId, RollbackReport};
use crate::environment::{EnvironmentTracker, FileStateInfo};
use crate::retry::RetryPlanner;
use crate::state::{Phase, PhaseTag};
use crate::verification::VerificationEngine;

/// A sealed operation plus any rollback the executor itself performed.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub record: OperationRecord,
    pub final_state: FinalState,
    /// Present when this executor restored its own checkpoint.
    pub rollback: Option<RollbackReport>,
}

/// Drives single operations through the phase graph.
#[derive(Debug)]
pub struct OperationExecutor {
    planner: RetryPlanner,
    verifier: VerificationEngine,
}

impl OperationExecutor {
    #[must_use]
    pub fn new(planner: RetryPlanner, verifier: VerificationEngine) -> Self {
        Self { planner, verifier }
    }

    /// Execute one operation to a terminal state.
    ///
    /// `shared_checkpoint` is set for batch members: the executor then
    /// seals a critical exhaustion as rolled-back without restoring, and
    /// the batch coordinator restores the shared checkpoint once.
    pub async fn run(
        &self,
        request: &OperationRequest,
        shared_checkpoint: Option<CheckpointId>,
        succeeded: &BTreeSet<OperationId>,
        registry: &ToolRegistry,
        ctx: &ToolCtx,
        tracker: &mut EnvironmentTracker,
    ) -> Result<ExecutionOutcome, EngineError> {
        let mut record = OperationRecord::begin(request, Utc::now(), tracker.snapshot());
        let mut phase = Phase::new();
        phase.advance(PhaseTag::PreCheck)?;

        let target = match Self::pre_check(request, succeeded, registry, ctx) {
            Ok(target) => target,
            Err(cause) => {
                tracing::warn!(operation = %request.id, "Pre-check failed: {cause}");
                let result = ToolResult::failure(cause);
                let state_changes = tracker.record(&request.id, &result);
                record.push_attempt(AttemptRecord {
                    attempt_number: 1,
                    strategy: StrategyKind::Direct,
                    result,
                    timestamp: Utc::now(),
                    state_changes,
                });
                phase.advance(PhaseTag::Failed)?;
                record.seal(FinalState::Failed);
                return Ok(ExecutionOutcome {
                    record,
                    final_state: FinalState::Failed,
                    rollback: None,
                });
            }
        };

        let profile = request.tool.profile();
        let pre_state = FileStateInfo::observe(&target);
        let checkpoint = if profile.critical {
            Some(shared_checkpoint.map_or_else(
                || (tracker.push_rollback_point(std::slice::from_ref(&target)), true),
                |id| (id, false),
            ))
        } else {
            None
        };

        while let Some(strategy) = self.planner.next_strategy(request.tool, &record.attempts) {
            phase.advance(PhaseTag::Executing)?;
            let attempt_number = record.attempt_count() + 1;
            tracing::info!(
                operation = %request.id,
                tool = %request.tool,
                %strategy,
                attempt = attempt_number,
                "Executing attempt"
            );

            let mut result =
                Self::attempt(request, strategy, registry, ctx).await;
            phase.advance(PhaseTag::Verifying)?;

            if result.success {
                let report =
                    self.verifier
                        .verify(request.tool, &request.args, &target, &pre_state);
                result.warnings.extend(report.warnings());
                if !report.passed() {
                    let failed = report.failures_in(bespoke_types::CheckCategory::Critical);
                    let cause = format!("verification failed: {}", failed.join(", "));
                    let mut replacement = ToolResult::failure(cause);
                    replacement.affected_files = result.affected_files.clone();
                    replacement.warnings = result.warnings.clone();
                    result = replacement;
                }
                result.verification = report;
            }
            if let Some((id, _)) = checkpoint {
                result.rollback_info = tracker.rollback_plan(id);
            }
            // A late success still reports how the first approach failed.
            if result.success {
                if let Some(first) = record.attempts.first() {
                    result.push_warning(format!(
                        "attempt 1 ({}) failed: {}",
                        first.strategy, first.result.result
                    ));
                }
            }

            let state_changes = tracker.record(&request.id, &result);
            let succeeded_attempt = result.success;
            record.push_attempt(AttemptRecord {
                attempt_number,
                strategy,
                result,
                timestamp: Utc::now(),
                state_changes,
            });

            if succeeded_attempt {
                phase.advance(PhaseTag::Succeeded)?;
                record.seal(FinalState::Succeeded);
                if let Some((id, owned)) = checkpoint {
                    if owned {
                        tracker.discard_rollback_point(id);
                    }
                }
                return Ok(ExecutionOutcome {
                    record,
                    final_state: FinalState::Succeeded,
                    rollback: None,
                });
            }

            phase.advance(PhaseTag::Retry)?;
        }

        // Retries exhausted without success.
        match checkpoint {
            Some((id, owned)) => {
                phase.advance(PhaseTag::RolledBack)?;
                record.seal(FinalState::RolledBack);
                let rollback = if owned {
                    let report = tracker.rollback_to(id);
                    if let Some(report) = &report {
                        tracing::warn!(operation = %request.id, "{}", report.describe());
                    }
                    report
                } else {
                    // Shared checkpoint: the batch coordinator restores it.
                    None
                };
                Ok(ExecutionOutcome {
                    record,
                    final_state: FinalState::RolledBack,
                    rollback,
                })
            }
            None => {
                phase.advance(PhaseTag::Failed)?;
                record.seal(FinalState::Failed);
                Ok(ExecutionOutcome {
                    record,
                    final_state: FinalState::Failed,
                    rollback: None,
                })
            }
        }
    }

    /// Static validation before any filesystem effect: known tool, schema-
    /// valid arguments, sandbox-legal target, satisfied dependencies.
    fn pre_check(
        request: &OperationRequest,
        succeeded: &BTreeSet<OperationId>,
        registry: &ToolRegistry,
        ctx: &ToolCtx,
    ) -> Result<PathBuf, String> {
        let primitive = registry
            .lookup(request.tool)
            .map_err(|e| e.to_string())?;
        validate_args(&primitive.schema(), &request.args).map_err(|e| e.to_string())?;
        let target =
            target_path(request.tool, &request.args, &ctx.sandbox).map_err(|e| e.to_string())?;
        for dep in &request.dependencies {
            if !succeeded.contains(dep) {
                return Err(format!("unmet dependency: operation {dep} has not succeeded"));
            }
        }
        Ok(target)
    }

    /// One raw attempt. Primitive errors become failed results.
    async fn attempt(
        request: &OperationRequest,
        strategy: StrategyKind,
        registry: &ToolRegistry,
        ctx: &ToolCtx,
    ) -> ToolResult {
        let primitive = match registry.lookup(request.tool) {
            Ok(primitive) => primitive,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        match primitive.execute(strategy, request.args.clone(), ctx).await {
            Ok(raw) => {
                let mut result =
                    ToolResult::success(raw.message).with_affected_files(raw.affected_files);
                result.warnings = raw.warnings;
                if let Some(payload) = raw.payload {
                    result = result.with_diagnostic("payload", payload);
                }
                result
            }
            Err(e) => {
                tracing::warn!(operation = %request.id, %strategy, "Attempt failed: {e}");
                ToolResult::failure(e.to_string())
            }
        }
    }
}
