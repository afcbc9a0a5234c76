//! Core domain types for Bespoke - no IO, no async.
//!
//! Everything here is pure data: tool outcome envelopes, verification
//! reports, operation records, and the static operation-type profile
//! table. Filesystem inspection, hashing, and persistence live in the
//! boundary crates (`bespoke-tools`, `bespoke-engine`).

mod ids;
mod operation;
mod profile;
mod result;
mod verification;

pub use ids::{BatchId, IdParseError, OperationId};
pub use operation::{
    AttemptRecord, FinalState, HistoryEntry, OperationRecord, OperationRequest,
};
pub use profile::{OperationCategory, OperationProfile, Strictness, ToolKind};
pub use result::{FileBackup, FileSnapshot, RollbackPlan, StrategyKind, ToolResult};
pub use verification::{CheckCategory, CheckValue, VerificationReport};
