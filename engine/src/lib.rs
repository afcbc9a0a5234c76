//! The Bespoke execution core.
//!
//! One session owns a sandboxed workspace and executes tool operations
//! strictly sequentially: pre-check, execute, verify, retry with a distinct
//! strategy, roll back critical failures, and condense every sealed
//! operation into durable history. The [`Session`] type is the public
//! entry point; everything else is plumbing beneath it.

mod batch;
mod checkpoints;
mod environment;
mod executor;
mod history;
mod retry;
mod review;
mod session;
mod state;
mod verification;

pub use batch::{BatchRequest, BatchSummary};
pub use checkpoints::{CheckpointId, RollbackReport};
pub use environment::{EnvironmentTracker, FileStateInfo, OperationStats};
pub use executor::{ExecutionOutcome, OperationExecutor};
pub use history::HistoryManager;
pub use retry::RetryPlanner;
pub use review::{CheckTally, OperationLine, SessionReview};
pub use session::{Session, SessionError, Termination, mint_batch_id, mint_operation_id};
pub use verification::VerificationEngine;

use std::path::PathBuf;

use bespoke_tools::ToolError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("workspace root {path} is not a directory")]
    WorkspaceInvalid { path: PathBuf },
    #[error("illegal operation phase transition: {from} -> {to}")]
    IllegalTransition { from: &'static str, to: &'static str },
    #[error("batch {batch_id} has a dependency cycle involving {operation_id}")]
    BatchCycle {
        batch_id: bespoke_types::BatchId,
        operation_id: bespoke_types::OperationId,
    },
}
