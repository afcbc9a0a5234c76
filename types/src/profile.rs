//! The operation-type profile table.
//!
//! This table is the single policy source consulted by verification,
//! retry planning, and the executor. It is intentionally data: criticality,
//! backup requirements, the ordered retry-strategy list, and verification
//! strictness live here and nowhere else.

use std::fmt;

use crate::result::StrategyKind;

/// The built-in tool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    WriteFile,
    ReadFile,
    CreateDirectory,
    DeleteFile,
    SaveJson,
    LoadJson,
}

impl ToolKind {
    pub const ALL: [Self; 6] = [
        Self::WriteFile,
        Self::ReadFile,
        Self::CreateDirectory,
        Self::DeleteFile,
        Self::SaveJson,
        Self::LoadJson,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WriteFile => "write_file",
            Self::ReadFile => "read_file",
            Self::CreateDirectory => "create_directory",
            Self::DeleteFile => "delete_file",
            Self::SaveJson => "save_json",
            Self::LoadJson => "load_json",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "write_file" => Some(Self::WriteFile),
            "read_file" => Some(Self::ReadFile),
            "create_directory" => Some(Self::CreateDirectory),
            "delete_file" => Some(Self::DeleteFile),
            "save_json" => Some(Self::SaveJson),
            "load_json" => Some(Self::LoadJson),
            _ => None,
        }
    }

    #[must_use]
    pub const fn profile(self) -> &'static OperationProfile {
        profile(self)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tool category grouping operations with shared policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    FileCreation,
    FileRead,
    DirectoryOps,
    JsonOps,
}

impl OperationCategory {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FileCreation => "file_creation",
            Self::FileRead => "file_read",
            Self::DirectoryOps => "directory_ops",
            Self::JsonOps => "json_ops",
        }
    }
}

/// How many verification check groups run for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Critical + content checks only.
    Basic,
    /// All four groups: critical, content, security, quality.
    Strict,
}

/// Static per-tool policy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationProfile {
    pub category: OperationCategory,
    /// Critical operations get a pre-operation rollback point and are
    /// rolled back when retries exhaust.
    pub critical: bool,
    /// Whether a content backup of the target must be captured before
    /// the primitive runs.
    pub requires_backup: bool,
    /// Ordered retry-strategy list. Position is priority; each entry is
    /// a distinct approach, never a bare repeat.
    pub strategies: &'static [StrategyKind],
    pub strictness: Strictness,
}

const WRITE_FILE: OperationProfile = OperationProfile {
    category: OperationCategory::FileCreation,
    critical: true,
    requires_backup: true,
    strategies: &[
        StrategyKind::Direct,
        StrategyKind::AlternateEncoding,
        StrategyKind::TempFileRename,
    ],
    strictness: Strictness::Strict,
};

const READ_FILE: OperationProfile = OperationProfile {
    category: OperationCategory::FileRead,
    critical: false,
    requires_backup: false,
    strategies: &[StrategyKind::Direct, StrategyKind::LossyUtf8],
    strictness: Strictness::Basic,
};

const CREATE_DIRECTORY: OperationProfile = OperationProfile {
    category: OperationCategory::DirectoryOps,
    critical: true,
    requires_backup: false,
    strategies: &[StrategyKind::Direct, StrategyKind::ComponentWise],
    strictness: Strictness::Basic,
};

const DELETE_FILE: OperationProfile = OperationProfile {
    category: OperationCategory::DirectoryOps,
    critical: true,
    requires_backup: true,
    strategies: &[StrategyKind::Direct, StrategyKind::RenameThenDelete],
    strictness: Strictness::Basic,
};

const SAVE_JSON: OperationProfile = OperationProfile {
    category: OperationCategory::JsonOps,
    critical: true,
    requires_backup: true,
    strategies: &[
        StrategyKind::Direct,
        StrategyKind::CompactFormat,
        StrategyKind::TempFileRename,
    ],
    strictness: Strictness::Basic,
};

const LOAD_JSON: OperationProfile = OperationProfile {
    category: OperationCategory::JsonOps,
    critical: false,
    requires_backup: false,
    strategies: &[StrategyKind::Direct, StrategyKind::LossyUtf8],
    strictness: Strictness::Basic,
};

/// Look up the profile for a tool. Total over [`ToolKind`].
#[must_use]
pub const fn profile(kind: ToolKind) -> &'static OperationProfile {
    match kind {
        ToolKind::WriteFile => &WRITE_FILE,
        ToolKind::ReadFile => &READ_FILE,
        ToolKind::CreateDirectory => &CREATE_DIRECTORY,
        ToolKind::DeleteFile => &DELETE_FILE,
        ToolKind::SaveJson => &SAVE_JSON,
        ToolKind::LoadJson => &LOAD_JSON,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_every_tool_name() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::parse("shell"), None);
    }

    #[test]
    fn strategy_lists_have_no_duplicates() {
        for kind in ToolKind::ALL {
            let strategies = kind.profile().strategies;
            for (i, a) in strategies.iter().enumerate() {
                for b in &strategies[i + 1..] {
                    assert_ne!(a, b, "{kind} lists {a:?} twice");
                }
            }
        }
    }

    #[test]
    fn critical_tools_that_overwrite_require_backup() {
        assert!(ToolKind::WriteFile.profile().requires_backup);
        assert!(ToolKind::DeleteFile.profile().requires_backup);
        assert!(ToolKind::SaveJson.profile().requires_backup);
        assert!(!ToolKind::ReadFile.profile().requires_backup);
    }

    #[test]
    fn read_class_tools_are_non_critical() {
        assert!(!ToolKind::ReadFile.profile().critical);
        assert!(!ToolKind::LoadJson.profile().critical);
        assert!(ToolKind::WriteFile.profile().critical);
    }
}
