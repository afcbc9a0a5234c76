//! Tool outcome envelope and rollback data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::ids::OperationId;
use crate::verification::VerificationReport;

/// Named retry strategy. Each variant is a distinct approach to an
/// operation, not a bare repeat of the previous attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The tool's default mechanism.
    Direct,
    /// Re-encode and stream the content through a buffered writer.
    AlternateEncoding,
    /// Write to a sibling temp file, then atomically rename into place.
    TempFileRename,
    /// Read raw bytes and decode with UTF-8 replacement.
    LossyUtf8,
    /// Create each path component individually.
    ComponentWise,
    /// Rename the target aside, then remove the renamed entry.
    RenameThenDelete,
    /// Serialize compact instead of pretty-printed.
    CompactFormat,
}

impl StrategyKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::AlternateEncoding => "alternate_encoding",
            Self::TempFileRename => "temp_file_rename",
            Self::LossyUtf8 => "lossy_utf8",
            Self::ComponentWise => "component_wise",
            Self::RenameThenDelete => "rename_then_delete",
            Self::CompactFormat => "compact_format",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// File state captured before a mutating operation.
///
/// Existence is an enum, not maybe-bytes: a missing file is a first-class
/// snapshot whose restoration removes the path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileSnapshot {
    Existed {
        bytes: Vec<u8>,
        /// Unix mode bits, when available on the platform.
        mode: Option<u32>,
        /// SHA-256 of `bytes`, so restoration can be verified without
        /// re-reading the payload.
        sha256: String,
    },
    Missing,
}

impl FileSnapshot {
    #[must_use]
    pub const fn existed(&self) -> bool {
        matches!(self, Self::Existed { .. })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Existed { bytes, .. } => bytes.len(),
            Self::Missing => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Prior state of one path, sufficient to undo a mutation by copy-back.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileBackup {
    pub path: PathBuf,
    pub prior: FileSnapshot,
}

/// Content-addressed undo data for one operation. Restoration is a pure
/// copy-back with no replay logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollbackPlan {
    pub entries: Vec<FileBackup>,
}

impl RollbackPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Uniform outcome envelope for one tool invocation attempt.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Human-readable outcome, or the failure cause when `success` is false.
    pub result: String,
    #[serde(default, skip_serializing_if = "VerificationReport::is_empty")]
    pub verification: VerificationReport,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<OperationId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub affected_files: BTreeSet<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_info: Option<RollbackPlan>,
}

impl ToolResult {
    #[must_use]
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: result.into(),
            ..Self::default()
        }
    }

    /// Failed outcome. `result` must describe the failure cause; the
    /// cause is also recorded under `diagnostics["error"]`.
    #[must_use]
    pub fn failure(result: impl Into<String>) -> Self {
        let result = result.into();
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert(
            "error".to_string(),
            serde_json::Value::String(result.clone()),
        );
        Self {
            success: false,
            result,
            diagnostics,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_affected_files(mut self, files: impl IntoIterator<Item = PathBuf>) -> Self {
        self.affected_files.extend(files);
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.diagnostics.insert(key.into(), value);
        self
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}
