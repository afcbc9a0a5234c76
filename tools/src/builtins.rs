//! Built-in tool primitives.
//!
//! Each primitive implements every strategy its profile lists. Strategy
//! dispatch is a match inside `execute`; an unlisted strategy is an
//! `UnsupportedStrategy` error rather than a silent fallback.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};

use bespoke_types::{StrategyKind, ToolKind};
use bespoke_utils::atomic_write;

use super::{RawOutcome, ToolCtx, ToolError, ToolFut, ToolPrimitive, parse_args};

/// All six built-in primitives.
#[must_use]
pub fn all() -> Vec<Box<dyn ToolPrimitive>> {
    vec![
        Box::new(WriteFileTool),
        Box::new(ReadFileTool),
        Box::new(CreateDirectoryTool),
        Box::new(DeleteFileTool),
        Box::new(SaveJsonTool),
        Box::new(LoadJsonTool),
    ]
}

fn display_path(path: &Path, ctx: &ToolCtx) -> String {
    path.strip_prefix(ctx.sandbox.root())
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Create missing parents, then re-validate against symlink swaps.
fn ensure_parent(ctx: &ToolCtx, path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| ToolError::ExecutionFailed {
            tool: "create_parents".to_string(),
            message: e.to_string(),
        })?;
    }
    ctx.sandbox.validate_created_parent(path)
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

fn path_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "Workspace-relative path." }
        },
        "required": ["path"]
    })
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SaveJsonArgs {
    path: String,
    data: Value,
}

#[derive(Debug, Default)]
pub struct WriteFileTool;

impl ToolPrimitive for WriteFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WriteFile
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative path." },
                "content": { "type": "string", "description": "Full file content." }
            },
            "required": ["path", "content"]
        })
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_path_for_create(&typed.path)?;
            ensure_parent(ctx, &resolved)?;

            let bytes = typed.content.as_bytes();
            match strategy {
                StrategyKind::Direct => {
                    fs::write(&resolved, bytes)
                        .map_err(|e| ToolError::execution(ToolKind::WriteFile, e))?;
                }
                StrategyKind::AlternateEncoding => {
                    // Stream through a buffered writer and fsync; sidesteps
                    // short-write failures a one-shot write can hit.
                    let file = fs::File::create(&resolved)
                        .map_err(|e| ToolError::execution(ToolKind::WriteFile, e))?;
                    let mut writer = std::io::BufWriter::new(file);
                    for chunk in bytes.chunks(8 * 1024) {
                        writer
                            .write_all(chunk)
                            .map_err(|e| ToolError::execution(ToolKind::WriteFile, e))?;
                    }
                    writer
                        .into_inner()
                        .map_err(|e| ToolError::execution(ToolKind::WriteFile, e))?
                        .sync_all()
                        .map_err(|e| ToolError::execution(ToolKind::WriteFile, e))?;
                }
                StrategyKind::TempFileRename => {
                    atomic_write(&resolved, bytes)
                        .map_err(|e| ToolError::execution(ToolKind::WriteFile, e))?;
                }
                other => {
                    return Err(ToolError::UnsupportedStrategy {
                        tool: ToolKind::WriteFile,
                        strategy: other,
                    });
                }
            }

            let message = format!(
                "Wrote {} bytes to {}",
                bytes.len(),
                display_path(&resolved, ctx)
            );
            Ok(RawOutcome::new(message)
                .with_file(resolved)
                .with_payload(json!({ "bytes_written": bytes.len() })))
        })
    }
}

#[derive(Debug, Default)]
pub struct ReadFileTool;

impl ToolPrimitive for ReadFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ReadFile
    }

    fn schema(&self) -> Value {
        path_only_schema()
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_path(&typed.path)?;

            let raw = fs::read(&resolved).map_err(|e| ToolError::execution(ToolKind::ReadFile, e))?;
            let mut outcome = RawOutcome::default();
            let content = match strategy {
                StrategyKind::Direct => String::from_utf8(raw).map_err(|e| {
                    ToolError::execution(ToolKind::ReadFile, format!("invalid UTF-8: {e}"))
                })?,
                StrategyKind::LossyUtf8 => {
                    let decoded = String::from_utf8_lossy(&raw);
                    if decoded.contains('\u{fffd}') {
                        outcome.warnings.push(format!(
                            "{}: invalid UTF-8 replaced during lossy decode",
                            display_path(&resolved, ctx)
                        ));
                    }
                    decoded.into_owned()
                }
                other => {
                    return Err(ToolError::UnsupportedStrategy {
                        tool: ToolKind::ReadFile,
                        strategy: other,
                    });
                }
            };

            outcome.message = format!(
                "Read {} bytes from {}",
                content.len(),
                display_path(&resolved, ctx)
            );
            outcome.payload = Some(json!({ "content": content, "size": content.len() }));
            outcome.affected_files.push(resolved);
            Ok(outcome)
        })
    }
}

#[derive(Debug, Default)]
pub struct CreateDirectoryTool;

impl ToolPrimitive for CreateDirectoryTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CreateDirectory
    }

    fn schema(&self) -> Value {
        path_only_schema()
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_path_for_create(&typed.path)?;

            match strategy {
                StrategyKind::Direct => {
                    fs::create_dir_all(&resolved)
                        .map_err(|e| ToolError::execution(ToolKind::CreateDirectory, e))?;
                }
                StrategyKind::ComponentWise => {
                    // One level at a time. Isolates which component fails
                    // when a recursive create keeps erroring.
                    let missing: Vec<PathBuf> = resolved
                        .ancestors()
                        .take_while(|a| !a.exists())
                        .map(Path::to_path_buf)
                        .collect();
                    for dir in missing.into_iter().rev() {
                        match fs::create_dir(&dir) {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                            Err(e) => {
                                return Err(ToolError::ExecutionFailed {
                                    tool: ToolKind::CreateDirectory.name().to_string(),
                                    message: format!("{}: {e}", dir.display()),
                                });
                            }
                        }
                    }
                }
                other => {
                    return Err(ToolError::UnsupportedStrategy {
                        tool: ToolKind::CreateDirectory,
                        strategy: other,
                    });
                }
            }

            let message = format!("Created directory {}", display_path(&resolved, ctx));
            Ok(RawOutcome::new(message).with_file(resolved))
        })
    }
}

#[derive(Debug, Default)]
pub struct DeleteFileTool;

impl ToolPrimitive for DeleteFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::DeleteFile
    }

    fn schema(&self) -> Value {
        path_only_schema()
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_path(&typed.path)?;

            // Deleting what is already gone is the desired end state.
            if !resolved.exists() {
                let mut outcome = RawOutcome::new(format!(
                    "File {} was already absent",
                    display_path(&resolved, ctx)
                ));
                outcome.warnings.push(format!(
                    "{}: delete target did not exist",
                    display_path(&resolved, ctx)
                ));
                outcome.affected_files.push(resolved);
                return Ok(outcome);
            }
            if resolved.is_dir() {
                return Err(ToolError::ExecutionFailed {
                    tool: ToolKind::DeleteFile.name().to_string(),
                    message: format!("{} is a directory", display_path(&resolved, ctx)),
                });
            }

            match strategy {
                StrategyKind::Direct => {
                    fs::remove_file(&resolved)
                        .map_err(|e| ToolError::execution(ToolKind::DeleteFile, e))?;
                }
                StrategyKind::RenameThenDelete => {
                    // Rename first so a locked/busy unlink still gets the
                    // name out of the way.
                    let aside = resolved.with_extension("deleting");
                    fs::rename(&resolved, &aside)
                        .map_err(|e| ToolError::execution(ToolKind::DeleteFile, e))?;
                    fs::remove_file(&aside)
                        .map_err(|e| ToolError::execution(ToolKind::DeleteFile, e))?;
                }
                other => {
                    return Err(ToolError::UnsupportedStrategy {
                        tool: ToolKind::DeleteFile,
                        strategy: other,
                    });
                }
            }

            let message = format!("Deleted {}", display_path(&resolved, ctx));
            Ok(RawOutcome::new(message).with_file(resolved))
        })
    }
}

#[derive(Debug, Default)]
pub struct SaveJsonTool;

impl ToolPrimitive for SaveJsonTool {
    fn kind(&self) -> ToolKind {
        ToolKind::SaveJson
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative path." },
                "data": { "description": "JSON value to persist." }
            },
            "required": ["path", "data"]
        })
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: SaveJsonArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_path_for_create(&typed.path)?;
            ensure_parent(ctx, &resolved)?;

            let serialized = match strategy {
                StrategyKind::Direct | StrategyKind::TempFileRename => {
                    serde_json::to_string_pretty(&typed.data)
                        .map_err(|e| ToolError::execution(ToolKind::SaveJson, e))?
                }
                StrategyKind::CompactFormat => serde_json::to_string(&typed.data)
                    .map_err(|e| ToolError::execution(ToolKind::SaveJson, e))?,
                other => {
                    return Err(ToolError::UnsupportedStrategy {
                        tool: ToolKind::SaveJson,
                        strategy: other,
                    });
                }
            };

            match strategy {
                StrategyKind::TempFileRename => {
                    atomic_write(&resolved, serialized.as_bytes())
                        .map_err(|e| ToolError::execution(ToolKind::SaveJson, e))?;
                }
                _ => {
                    fs::write(&resolved, serialized.as_bytes())
                        .map_err(|e| ToolError::execution(ToolKind::SaveJson, e))?;
                }
            }

            let message = format!(
                "Saved JSON ({} bytes) to {}",
                serialized.len(),
                display_path(&resolved, ctx)
            );
            Ok(RawOutcome::new(message)
                .with_file(resolved)
                .with_payload(json!({ "bytes_written": serialized.len() })))
        })
    }
}

#[derive(Debug, Default)]
pub struct LoadJsonTool;

impl ToolPrimitive for LoadJsonTool {
    fn kind(&self) -> ToolKind {
        ToolKind::LoadJson
    }

    fn schema(&self) -> Value {
        path_only_schema()
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = ctx.sandbox.resolve_path(&typed.path)?;

            let raw = fs::read(&resolved).map_err(|e| ToolError::execution(ToolKind::LoadJson, e))?;
            let mut outcome = RawOutcome::default();
            let text = match strategy {
                StrategyKind::Direct => String::from_utf8(raw).map_err(|e| {
                    ToolError::execution(ToolKind::LoadJson, format!("invalid UTF-8: {e}"))
                })?,
                StrategyKind::LossyUtf8 => {
                    let decoded = String::from_utf8_lossy(&raw);
                    if decoded.contains('\u{fffd}') {
                        outcome.warnings.push(format!(
                            "{}: invalid UTF-8 replaced during lossy decode",
                            display_path(&resolved, ctx)
                        ));
                    }
                    decoded.into_owned()
                }
                other => {
                    return Err(ToolError::UnsupportedStrategy {
                        tool: ToolKind::LoadJson,
                        strategy: other,
                    });
                }
            };

            let data: Value = serde_json::from_str(&text)
                .map_err(|e| ToolError::execution(ToolKind::LoadJson, e))?;

            outcome.message = format!(
                "Loaded JSON ({}) from {}",
                json_type_name(&data),
                display_path(&resolved, ctx)
            );
            outcome.payload = Some(json!({ "data": data, "type": json_type_name(&data) }));
            outcome.affected_files.push(resolved);
            Ok(outcome)
        })
    }
}
