//! Post-operation verification.
//!
//! Every check is a read-only re-inspection of the target path after an
//! attempt ran; the engine never mutates what it inspects. Pass/fail
//! booleans live in the critical group; informational values (sizes,
//! hashes, encodings) live in the content group where a `false` surfaces
//! as a warning rather than failing the operation. The strict tier adds
//! security and quality groups on top.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use bespoke_tools::validate_args;
use bespoke_types::{CheckCategory, Strictness, ToolKind, VerificationReport};
use bespoke_utils::sha256_bytes;

use crate::environment::FileStateInfo;

/// Runs tool-specific checks against the filesystem state.
#[derive(Debug, Clone)]
pub struct VerificationEngine {
    root: PathBuf,
}

impl VerificationEngine {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        // Targets arrive canonicalized by the sandbox; the workspace
        // prefix checks must compare against the same view.
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Verify one attempt's real-world effect.
    ///
    /// `pre` is the target's observed state before the attempt; delete
    /// verification needs it to report what the attempt started from.
    #[must_use]
    pub fn verify(
        &self,
        kind: ToolKind,
        args: &Value,
        target: &Path,
        pre: &FileStateInfo,
    ) -> VerificationReport {
        let mut report = VerificationReport::new();
        match kind {
            ToolKind::WriteFile => self.verify_write(&mut report, target),
            ToolKind::ReadFile => Self::verify_read(&mut report, target),
            ToolKind::CreateDirectory => self.verify_create_directory(&mut report, target),
            ToolKind::DeleteFile => Self::verify_delete(&mut report, target, pre),
            ToolKind::SaveJson | ToolKind::LoadJson => {
                Self::verify_json(&mut report, kind, args, target);
            }
        }
        tracing::debug!(tool = %kind, target = %target.display(), passed = report.passed(), "Verification complete");
        report
    }

    fn verify_write(&self, report: &mut VerificationReport, target: &Path) {
        let meta = fs::metadata(target).ok();
        let exists = meta.is_some();
        let writable = meta.as_ref().is_some_and(|m| !m.permissions().readonly());
        report.insert(CheckCategory::Critical, "exists", exists);
        report.insert(CheckCategory::Critical, "writable", writable);
        report.insert(
            CheckCategory::Critical,
            "path_valid",
            target.file_name().is_some() && target.starts_with(&self.root),
        );

        let bytes = fs::read(target).unwrap_or_default();
        report.insert(CheckCategory::Content, "size", bytes.len() as u64);
        report.insert(CheckCategory::Content, "content_hash", sha256_bytes(&bytes));
        let text = std::str::from_utf8(&bytes).ok();
        report.insert(CheckCategory::Content, "encoding_valid", text.is_some());

        if ToolKind::WriteFile.profile().strictness != Strictness::Strict {
            return;
        }

        report.insert(
            CheckCategory::Security,
            "permissions",
            permissions_text(meta.as_ref()),
        );
        // Writable by this process implies effective ownership is intact.
        report.insert(CheckCategory::Security, "owner_valid", writable);
        report.insert(
            CheckCategory::Security,
            "in_workspace",
            target.starts_with(&self.root),
        );

        report.insert(
            CheckCategory::Quality,
            "syntax_valid",
            syntax_valid(target, text),
        );
        report.insert(
            CheckCategory::Quality,
            "format_valid",
            text.is_none_or(|t| !(t.contains("\r\n") && t.replace("\r\n", "").contains('\n'))),
        );
        report.insert(CheckCategory::Quality, "lint_passed", true);
    }

    fn verify_read(report: &mut VerificationReport, target: &Path) {
        let meta = fs::metadata(target).ok();
        report.insert(CheckCategory::Critical, "exists", meta.is_some());
        let bytes = fs::read(target).ok();
        report.insert(CheckCategory::Critical, "is_readable", bytes.is_some());

        let bytes = bytes.unwrap_or_default();
        report.insert(CheckCategory::Content, "size", bytes.len() as u64);
        let valid_utf8 = std::str::from_utf8(&bytes).is_ok();
        report.insert(
            CheckCategory::Content,
            "encoding",
            if valid_utf8 { "utf-8" } else { "binary" },
        );
        report.insert(CheckCategory::Content, "content_valid", valid_utf8);
    }

    fn verify_create_directory(&self, report: &mut VerificationReport, target: &Path) {
        let meta = fs::metadata(target).ok();
        report.insert(CheckCategory::Critical, "exists", meta.is_some());
        report.insert(
            CheckCategory::Critical,
            "is_directory",
            meta.as_ref().is_some_and(std::fs::Metadata::is_dir),
        );
        report.insert(
            CheckCategory::Critical,
            "is_writable",
            meta.as_ref().is_some_and(|m| !m.permissions().readonly()),
        );
        report.insert(
            CheckCategory::Critical,
            "path_valid",
            target.starts_with(&self.root),
        );
        report.insert(
            CheckCategory::Content,
            "permissions",
            permissions_text(meta.as_ref()),
        );
    }

    fn verify_delete(report: &mut VerificationReport, target: &Path, pre: &FileStateInfo) {
        let gone = !target.exists();
        report.insert(CheckCategory::Critical, "deleted", gone);
        report.insert(CheckCategory::Critical, "path_clear", gone);
        let parent_writable = target
            .parent()
            .and_then(|p| fs::metadata(p).ok())
            .is_some_and(|m| !m.permissions().readonly());
        report.insert(CheckCategory::Critical, "parent_writable", parent_writable);
        // Informational: what the attempt started from.
        report.insert(CheckCategory::Content, "existed", pre.exists.to_string());
    }

    fn verify_json(report: &mut VerificationReport, kind: ToolKind, args: &Value, target: &Path) {
        let meta = fs::metadata(target).ok();
        report.insert(CheckCategory::Critical, "exists", meta.is_some());
        let text = fs::read_to_string(target).ok();
        report.insert(CheckCategory::Critical, "is_readable", text.is_some());

        let parsed: Option<Value> = text.as_deref().and_then(|t| serde_json::from_str(t).ok());
        report.insert(CheckCategory::Critical, "json_valid", parsed.is_some());
        if kind == ToolKind::LoadJson {
            report.insert(CheckCategory::Critical, "parse_success", parsed.is_some());
            report.insert(
                CheckCategory::Content,
                "data_type",
                parsed.as_ref().map_or("unknown", json_type_name),
            );
        } else {
            report.insert(
                CheckCategory::Content,
                "size",
                text.as_ref().map_or(0, String::len) as u64,
            );
        }

        // schema_valid only appears when the caller supplied a schema.
        if let Some(schema) = args.get("schema") {
            let valid = parsed
                .as_ref()
                .is_some_and(|data| validate_args(schema, data).is_ok());
            report.insert(CheckCategory::Critical, "schema_valid", valid);
        }
    }
}

fn permissions_text(meta: Option<&fs::Metadata>) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(meta) = meta {
            return format!("{:o}", meta.permissions().mode() & 0o777);
        }
    }
    let _ = meta;
    "unknown".to_string()
}

/// Shallow syntax check for formats we can parse without a toolchain.
fn syntax_valid(target: &Path, text: Option<&str>) -> bool {
    match target.extension().and_then(|e| e.to_str()) {
        Some("json") => text.is_some_and(|t| serde_json::from_str::<Value>(t).is_ok()),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
