//! The session: one sandboxed workspace, one bounded run of operations.
//!
//! A session executes operations strictly sequentially, holds the full
//! per-attempt records for its own lifetime, and condenses each sealed
//! operation into history as it goes. It is also the batch coordinator:
//! batches share one pre-batch checkpoint, and the session restores that
//! checkpoint and seals skipped dependents when a critical member fails
//! out.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::Utc;

use bespoke_config::Settings;
use bespoke_tools::{
    Sandbox, ToolCtx, ToolPrimitive, ToolRegistry, default_sandbox_deny_patterns,
};
use bespoke_types::{
    BatchId, FinalState, OperationId, OperationRecord, OperationRequest,
};

use crate::EngineError;
use crate::batch::{BatchRequest, BatchSummary};
use crate::checkpoints::RollbackReport;
use crate::environment::EnvironmentTracker;
use crate::executor::OperationExecutor;
use crate::history::HistoryManager;
use crate::retry::RetryPlanner;
use crate::review::SessionReview;
use crate::verification::VerificationEngine;

/// Why a session stopped accepting operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The per-session operation ceiling was reached.
    OperationLimitReached,
    /// The caller cancelled the session.
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperationLimitReached => f.write_str("operation limit reached"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session terminated: {0}")]
    Terminated(Termination),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Mint a fresh operation id.
#[must_use]
pub fn mint_operation_id() -> OperationId {
    OperationId::new(uuid::Uuid::new_v4().to_string()).expect("uuid is non-empty")
}

/// Mint a fresh batch id.
#[must_use]
pub fn mint_batch_id() -> BatchId {
    BatchId::new(uuid::Uuid::new_v4().to_string()).expect("uuid is non-empty")
}

/// One bounded run of tool operations against a sandboxed workspace.
pub struct Session {
    goal: String,
    plan: Vec<String>,
    settings: Settings,
    registry: ToolRegistry,
    ctx: ToolCtx,
    executor: OperationExecutor,
    tracker: EnvironmentTracker,
    history: HistoryManager,
    records: Vec<OperationRecord>,
    succeeded: BTreeSet<OperationId>,
    rollback_reports: Vec<RollbackReport>,
    operations_started: u32,
    cancelled: bool,
    termination: Option<Termination>,
}

impl Session {
    pub fn new(
        workspace_root: PathBuf,
        goal: impl Into<String>,
        settings: Settings,
    ) -> Result<Self, EngineError> {
        let mut denied = if settings.include_default_denies {
            default_sandbox_deny_patterns()
        } else {
            Vec::new()
        };
        denied.extend(settings.denied_patterns.iter().cloned());

        let sandbox = Sandbox::new(workspace_root.clone(), denied)?;
        let tracker = EnvironmentTracker::new(workspace_root)?;
        let executor = OperationExecutor::new(
            RetryPlanner::new(settings.max_attempts),
            VerificationEngine::new(tracker.root().to_path_buf()),
        );
        let history_path = settings
            .history_enabled
            .then(|| settings.history_path.clone())
            .flatten();

        tracing::info!(
            workspace = %tracker.root().display(),
            max_operations = settings.max_operations,
            "Session opened"
        );
        Ok(Self {
            goal: goal.into(),
            plan: Vec::new(),
            settings,
            registry: ToolRegistry::with_builtins(),
            ctx: ToolCtx::new(sandbox),
            executor,
            tracker,
            history: HistoryManager::new(history_path),
            records: Vec::new(),
            succeeded: BTreeSet::new(),
            rollback_reports: Vec::new(),
            operations_started: 0,
            cancelled: false,
            termination: None,
        })
    }

    #[must_use]
    pub fn with_plan(mut self, plan: impl IntoIterator<Item = String>) -> Self {
        self.plan.extend(plan);
        self
    }

    /// Swap in a replacement primitive. Used for instrumented tools.
    pub fn replace_tool(&mut self, primitive: Box<dyn ToolPrimitive>) {
        self.registry.replace(primitive);
    }

    #[must_use]
    pub fn tracker(&self) -> &EnvironmentTracker {
        &self.tracker
    }

    #[must_use]
    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    #[must_use]
    pub fn operations_started(&self) -> u32 {
        self.operations_started
    }

    /// Stop accepting operations. In-flight work is unaffected; the next
    /// submission is refused.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        if self.termination.is_none() {
            self.termination = Some(Termination::Cancelled);
        }
        tracing::info!("Session cancelled");
    }

    /// Execute a single operation to its terminal state.
    pub async fn execute(
        &mut self,
        request: OperationRequest,
    ) -> Result<FinalState, SessionError> {
        self.admit()?;
        self.run_one(&request, None).await.map_err(SessionError::Engine)
    }

    /// Execute a batch under one shared checkpoint.
    ///
    /// Members run in dependency order. A non-critical member failure
    /// skips its transitive dependents and the batch continues; a critical
    /// member rollback restores the shared checkpoint and bars the
    /// remaining critical members, while independent non-critical members
    /// still proceed.
    pub async fn execute_batch(
        &mut self,
        batch: BatchRequest,
    ) -> Result<BatchSummary, SessionError> {
        let order = batch.execution_order().map_err(SessionError::Engine)?;

        // One checkpoint covers every critical member's target.
        let critical_targets: Vec<PathBuf> = batch
            .operations
            .iter()
            .filter(|op| op.tool.profile().critical)
            .filter_map(|op| {
                bespoke_tools::target_path(op.tool, &op.args, &self.ctx.sandbox).ok()
            })
            .collect();
        let shared = (!critical_targets.is_empty())
            .then(|| self.tracker.push_rollback_point(&critical_targets));

        let mut outcomes: Vec<(OperationId, FinalState)> = Vec::new();
        let mut skipped: BTreeSet<OperationId> = BTreeSet::new();
        let mut batch_rollback: Option<RollbackReport> = None;
        let mut critical_path_failed = false;

        for index in order {
            let request = &batch.operations[index];
            let on_critical_path = request.tool.profile().critical;
            let barred = (critical_path_failed && on_critical_path)
                || skipped.contains(&request.id);
            if barred || self.admit().is_err() {
                self.seal_skipped(request);
                outcomes.push((request.id.clone(), FinalState::Skipped));
                continue;
            }

            // A restored checkpoint no longer exists; only an unconsumed
            // one is handed down.
            let checkpoint = if critical_path_failed { None } else { shared };
            let state = self
                .run_one(request, checkpoint)
                .await
                .map_err(SessionError::Engine)?;
            outcomes.push((request.id.clone(), state));

            match state {
                FinalState::Succeeded => {}
                FinalState::RolledBack => {
                    // Critical member exhausted its retries under the
                    // shared checkpoint: restore once, fail the critical
                    // path. Non-critical members keep running.
                    if let Some(id) = shared {
                        if let Some(report) = self.tracker.rollback_to(id) {
                            tracing::warn!(batch = %batch.batch_id, "{}", report.describe());
                            if report.is_partial() {
                                self.rollback_reports.push(report.clone());
                            }
                            batch_rollback = Some(report);
                        }
                    }
                    critical_path_failed = true;
                    skipped.extend(batch.transitive_dependents(&request.id));
                }
                FinalState::Failed | FinalState::Skipped => {
                    skipped.extend(batch.transitive_dependents(&request.id));
                }
            }
        }

        if batch_rollback.is_none() {
            if let Some(id) = shared {
                self.tracker.discard_rollback_point(id);
            }
        }

        Ok(BatchSummary {
            batch_id: batch.batch_id,
            outcomes,
            rollback: batch_rollback,
        })
    }

    /// Consume the session and produce its structured review.
    #[must_use]
    pub fn finish(self) -> SessionReview {
        tracing::info!(
            operations = self.operations_started,
            succeeded = self.succeeded.len(),
            "Session finished"
        );
        SessionReview::assemble(
            self.goal,
            self.plan,
            &self.records,
            self.history.entries(),
            self.tracker.stats(),
            &self.rollback_reports,
            self.termination,
        )
    }

    /// Gate every submission on cancellation and the operation ceiling.
    fn admit(&mut self) -> Result<(), SessionError> {
        if self.cancelled {
            return Err(SessionError::Terminated(Termination::Cancelled));
        }
        if self.operations_started >= self.settings.max_operations {
            self.termination = Some(Termination::OperationLimitReached);
            return Err(SessionError::Terminated(Termination::OperationLimitReached));
        }
        Ok(())
    }

    async fn run_one(
        &mut self,
        request: &OperationRequest,
        shared: Option<crate::checkpoints::CheckpointId>,
    ) -> Result<FinalState, EngineError> {
        self.operations_started += 1;
        let outcome = self
            .executor
            .run(
                request,
                shared,
                &self.succeeded,
                &self.registry,
                &self.ctx,
                &mut self.tracker,
            )
            .await?;

        if outcome.final_state == FinalState::Succeeded {
            self.succeeded.insert(request.id.clone());
        }
        if let Some(report) = outcome.rollback {
            self.rollback_reports.push(report);
        }
        self.history.append(&outcome.record);
        self.records.push(outcome.record);
        Ok(outcome.final_state)
    }

    /// Seal a never-started member as skipped and record it.
    fn seal_skipped(&mut self, request: &OperationRequest) {
        tracing::info!(operation = %request.id, "Skipping batch member");
        let mut record = OperationRecord::begin(request, Utc::now(), self.tracker.snapshot());
        record.seal(FinalState::Skipped);
        self.history.append(&record);
        self.records.push(record);
    }
}
