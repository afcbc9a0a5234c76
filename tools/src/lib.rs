//! Tool primitive framework - core types, helpers, and the built-in
//! filesystem tools.
//!
//! A primitive is the raw mechanism of one tool: it takes validated
//! arguments plus the strategy to attempt and touches the filesystem.
//! Verification, retry planning, and rollback live above this crate; a
//! primitive reports what it did and nothing more.

pub mod builtins;
pub mod sandbox;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde_json::Value;

use bespoke_types::{StrategyKind, ToolKind};
pub use sandbox::{DEFAULT_SANDBOX_DENY_PATTERNS, Sandbox, default_sandbox_deny_patterns};

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<RawOutcome, ToolError>> + Send + 'a>>;

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Sandbox violation: {0}")]
    SandboxViolation(DenialReason),
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("Strategy {strategy} not supported by {tool}")]
    UnsupportedStrategy {
        tool: ToolKind,
        strategy: StrategyKind,
    },
}

impl ToolError {
    pub(crate) fn execution(tool: ToolKind, err: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            tool: tool.name().to_string(),
            message: err.to_string(),
        }
    }
}

/// Denial reason for sandbox policy.
#[derive(Debug, Clone)]
pub enum DenialReason {
    PathOutsideWorkspace {
        attempted: PathBuf,
        resolved: PathBuf,
    },
    DeniedPatternMatched {
        attempted: PathBuf,
        pattern: String,
    },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::PathOutsideWorkspace {
                attempted,
                resolved,
            } => write!(
                f,
                "Path outside workspace (attempted: {}, resolved: {})",
                attempted.display(),
                resolved.display()
            ),
            DenialReason::DeniedPatternMatched { attempted, pattern } => write!(
                f,
                "Path '{}' matched denied pattern '{}'",
                attempted.display(),
                pattern
            ),
        }
    }
}

/// What a primitive actually did, before any verification.
#[derive(Debug, Clone, Default)]
pub struct RawOutcome {
    /// Human-readable description of the effect.
    pub message: String,
    /// Every path the attempt touched or inspected.
    pub affected_files: Vec<PathBuf>,
    /// Tool-specific payload (file content, parsed JSON, sizes).
    pub payload: Option<Value>,
    /// Degraded-path notes (lossy decode, already-absent delete target).
    pub warnings: Vec<String>,
}

impl RawOutcome {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.affected_files.push(path);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Per-call tool context.
#[derive(Debug)]
pub struct ToolCtx {
    pub sandbox: Sandbox,
}

impl ToolCtx {
    #[must_use]
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

/// Proof that a tool primitive is safe for dynamic dispatch.
pub trait ToolPrimitive: Send + Sync {
    fn kind(&self) -> ToolKind;
    /// JSON Schema for the tool's arguments.
    fn schema(&self) -> Value;
    /// Run one attempt using the given strategy.
    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    if let Err(err) = validator.validate(args) {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// Resolve the target path of a tool call without executing it.
///
/// The executor uses this before execution to decide which paths a
/// rollback point must cover. Mutating tools resolve for creation
/// (parents may not exist yet); read tools resolve against what exists.
pub fn target_path(kind: ToolKind, args: &Value, sandbox: &Sandbox) -> Result<PathBuf, ToolError> {
    let raw = args
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::BadArgs {
            message: "missing required 'path' argument".to_string(),
        })?;
    match kind {
        ToolKind::WriteFile | ToolKind::CreateDirectory | ToolKind::SaveJson => {
            sandbox.resolve_path_for_create(raw)
        }
        ToolKind::ReadFile | ToolKind::DeleteFile | ToolKind::LoadJson => sandbox.resolve_path(raw),
    }
}

/// Tool registry keyed by tool kind.
#[derive(Default)]
pub struct ToolRegistry {
    primitives: HashMap<ToolKind, Box<dyn ToolPrimitive>>,
}

impl ToolRegistry {
    /// Registry with all six built-in primitives.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for primitive in builtins::all() {
            // Builtins are distinct by construction.
            let _ = registry.register(primitive);
        }
        registry
    }

    pub fn register(&mut self, primitive: Box<dyn ToolPrimitive>) -> Result<(), ToolError> {
        let kind = primitive.kind();
        if self.primitives.contains_key(&kind) {
            return Err(ToolError::DuplicateTool {
                name: kind.name().to_string(),
            });
        }
        self.primitives.insert(kind, primitive);
        Ok(())
    }

    /// Replace an existing primitive, returning the previous one if any.
    pub fn replace(&mut self, primitive: Box<dyn ToolPrimitive>) -> Option<Box<dyn ToolPrimitive>> {
        self.primitives.insert(primitive.kind(), primitive)
    }

    pub fn lookup(&self, kind: ToolKind) -> Result<&dyn ToolPrimitive, ToolError> {
        self.primitives
            .get(&kind)
            .map(std::convert::AsRef::as_ref)
            .ok_or_else(|| ToolError::UnknownTool {
                name: kind.name().to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, kind: ToolKind) -> bool {
        self.primitives.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_rejects_duplicate_registration() {
        let mut registry = ToolRegistry::with_builtins();
        let err = registry
            .register(Box::new(builtins::ReadFileTool))
            .expect_err("duplicate");
        assert!(matches!(err, ToolError::DuplicateTool { .. }));
    }

    #[test]
    fn registry_with_builtins_covers_every_tool() {
        let registry = ToolRegistry::with_builtins();
        for kind in ToolKind::ALL {
            assert!(registry.contains(kind), "{kind} missing");
        }
    }

    #[test]
    fn validate_args_rejects_missing_required_field() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
        });
        assert!(validate_args(&schema, &json!({"path": "a.txt"})).is_ok());
        assert!(validate_args(&schema, &json!({})).is_err());
    }

    #[test]
    fn target_path_requires_path_argument() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sandbox = Sandbox::new(dir.path().to_path_buf(), vec![]).expect("sandbox");
        let err = target_path(ToolKind::WriteFile, &json!({}), &sandbox).expect_err("no path");
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }
}
