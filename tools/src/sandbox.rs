use std::path::{Path, PathBuf};

use super::{DenialReason, ToolError};

/// Default deny patterns for sensitive files in the workspace sandbox.
pub const DEFAULT_SANDBOX_DENY_PATTERNS: &[&str] = &[
    "**/.ssh/**",
    "**/.gnupg/**",
    "**/.aws/**",
    "**/.git/**",
    "**/.git-credentials",
    "**/.npmrc",
    "**/.netrc",
    "**/.env",
    "**/.env.*",
    "**/*.env",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/*.pem",
    "**/*.key",
];

#[must_use]
pub fn default_sandbox_deny_patterns() -> Vec<String> {
    DEFAULT_SANDBOX_DENY_PATTERNS
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

#[derive(Debug, Clone)]
struct DenyPattern {
    pattern: String,
    matcher: globset::GlobMatcher,
}

/// Workspace filesystem sandbox.
///
/// Every tool path argument resolves through here: relative paths against
/// the workspace root, absolute paths only when they already point inside
/// it. Traversal components, control characters, and deny-pattern matches
/// are rejected before any filesystem access.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    deny_patterns: Vec<DenyPattern>,
}

impl Sandbox {
    pub fn new(root: PathBuf, denied_patterns: Vec<String>) -> Result<Self, ToolError> {
        let canonical = std::fs::canonicalize(&root).map_err(|_e| {
            ToolError::SandboxViolation(DenialReason::PathOutsideWorkspace {
                attempted: root.clone(),
                resolved: root,
            })
        })?;

        let mut deny_patterns = Vec::new();
        for pat in denied_patterns {
            let mut builder = globset::GlobBuilder::new(&pat);
            // Case-insensitive so "Secret.PEM" cannot bypass a "*.pem" rule.
            builder.case_insensitive(true);
            let glob = builder.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid denied pattern '{pat}': {e}"),
            })?;
            deny_patterns.push(DenyPattern {
                pattern: pat,
                matcher: glob.compile_matcher(),
            });
        }

        Ok(Self {
            root: canonical,
            deny_patterns,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and resolve a path within the workspace.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.validate_and_resolve(path)?;
        let canonical = canonicalize_existing(&resolved)?;
        self.check_allowed(&resolved, canonical)
    }

    /// Validate and resolve a path for file creation, allowing non-existent
    /// parent directories (as long as they would land inside the workspace).
    pub fn resolve_path_for_create(&self, path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.validate_and_resolve(path)?;
        let canonical = canonicalize_for_create(&resolved)?;
        self.check_allowed(&resolved, canonical)
    }

    /// Shared validation prefix: unsafe chars, `..` rejection, absolute
    /// path handling. Returns the resolved-but-not-yet-canonicalized path.
    fn validate_and_resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        if contains_unsafe_path_chars(path) {
            return Err(ToolError::BadArgs {
                message: "path contains invalid control characters".to_string(),
            });
        }
        let input = PathBuf::from(path);
        if input
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideWorkspace {
                    attempted: input.clone(),
                    resolved: input,
                },
            ));
        }
        if input.is_absolute() {
            if input.starts_with(&self.root) {
                Ok(input)
            } else {
                Err(ToolError::SandboxViolation(
                    DenialReason::PathOutsideWorkspace {
                        attempted: input.clone(),
                        resolved: input,
                    },
                ))
            }
        } else {
            Ok(self.root.join(input))
        }
    }

    /// Shared post-canonicalize suffix: root check + deny-pattern check.
    fn check_allowed(&self, resolved: &Path, canonical: PathBuf) -> Result<PathBuf, ToolError> {
        if !canonical.starts_with(&self.root) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideWorkspace {
                    attempted: resolved.to_path_buf(),
                    resolved: canonical,
                },
            ));
        }
        if let Some(pat) = self.matches_denied_pattern(&canonical) {
            return Err(ToolError::SandboxViolation(
                DenialReason::DeniedPatternMatched {
                    attempted: canonical,
                    pattern: pat,
                },
            ));
        }
        Ok(canonical)
    }

    /// Post-creation validation for TOCTOU mitigation.
    ///
    /// After `create_dir_all` creates the directory tree and before writing
    /// content, re-canonicalize the parent and verify it is still inside the
    /// workspace with no symlink in the chain. This closes the race window
    /// where another process swaps a directory for a symlink between
    /// `resolve_path_for_create` and the actual write.
    pub fn validate_created_parent(&self, path: &Path) -> Result<(), ToolError> {
        let parent = path.parent().ok_or_else(|| ToolError::BadArgs {
            message: "path has no parent directory".to_string(),
        })?;

        // Walk the path chain checking for symlinks
        let mut current = parent.to_path_buf();
        loop {
            if let Ok(meta) = std::fs::symlink_metadata(&current)
                && meta.file_type().is_symlink()
            {
                return Err(ToolError::SandboxViolation(
                    DenialReason::PathOutsideWorkspace {
                        attempted: path.to_path_buf(),
                        resolved: current,
                    },
                ));
            }
            match current.parent() {
                Some(p) if p != current => current = p.to_path_buf(),
                _ => break,
            }
        }

        let canonical = std::fs::canonicalize(parent).map_err(|_| {
            ToolError::SandboxViolation(DenialReason::PathOutsideWorkspace {
                attempted: path.to_path_buf(),
                resolved: parent.to_path_buf(),
            })
        })?;
        if !canonical.starts_with(&self.root) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideWorkspace {
                    attempted: path.to_path_buf(),
                    resolved: canonical,
                },
            ));
        }
        Ok(())
    }

    fn matches_denied_pattern(&self, path: &Path) -> Option<String> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        for pat in &self.deny_patterns {
            if pat.matcher.is_match(&normalized) {
                return Some(pat.pattern.clone());
            }
        }
        None
    }

    /// Check if a path matches any deny pattern (lightweight, no
    /// canonicalization). For full validation use `resolve_path()`.
    #[must_use]
    pub fn is_path_denied(&self, path: &Path) -> bool {
        self.matches_denied_pattern(path).is_some()
    }
}

/// Canonicalize a path that should exist, or whose parent must exist.
fn canonicalize_existing(resolved: &Path) -> Result<PathBuf, ToolError> {
    if resolved.exists() {
        std::fs::canonicalize(resolved).map_err(|_| outside(resolved))
    } else {
        let parent = resolved.parent().ok_or_else(|| outside(resolved))?;
        let parent_canon = std::fs::canonicalize(parent).map_err(|_| outside(resolved))?;
        Ok(parent_canon.join(resolved.file_name().unwrap_or_default()))
    }
}

/// Canonicalize for creation: walk up to the nearest existing ancestor.
fn canonicalize_for_create(resolved: &Path) -> Result<PathBuf, ToolError> {
    if resolved.exists() {
        return std::fs::canonicalize(resolved).map_err(|_| outside(resolved));
    }

    let mut existing_ancestor = resolved.parent();
    let mut non_existent_parts: Vec<&std::ffi::OsStr> = Vec::new();

    if let Some(file_name) = resolved.file_name() {
        non_existent_parts.push(file_name);
    }

    while let Some(ancestor) = existing_ancestor {
        if ancestor.exists() {
            break;
        }
        if let Some(dir_name) = ancestor.file_name() {
            non_existent_parts.push(dir_name);
        }
        existing_ancestor = ancestor.parent();
    }

    let existing = existing_ancestor.ok_or_else(|| outside(resolved))?;
    let canon_existing = std::fs::canonicalize(existing).map_err(|_| outside(resolved))?;

    // Rejoin non-existent parts in reverse order (they were collected bottom-up)
    let mut result = canon_existing;
    for part in non_existent_parts.into_iter().rev() {
        result = result.join(part);
    }
    Ok(result)
}

fn outside(path: &Path) -> ToolError {
    ToolError::SandboxViolation(DenialReason::PathOutsideWorkspace {
        attempted: path.to_path_buf(),
        resolved: path.to_path_buf(),
    })
}

fn contains_unsafe_path_chars(input: &str) -> bool {
    input.chars().any(is_unsafe_path_char)
}

/// Rejects C0/C1 control characters and DEL. Control characters in paths
/// cause platform-dependent behavior and can bypass deny matching.
fn is_unsafe_path_char(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}' | '\u{0080}'..='\u{009f}')
}
