//! End-to-end session scenarios driven through the public API.

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Value, json};

use bespoke_config::Settings;
use bespoke_engine::{
    BatchRequest, Session, SessionError, Termination, mint_batch_id, mint_operation_id,
};
use bespoke_tools::{ToolCtx, ToolError, ToolFut, ToolPrimitive};
use bespoke_types::{FinalState, OperationId, OperationRequest, StrategyKind, ToolKind};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn settings(max_operations: u32, history_path: Option<PathBuf>) -> Settings {
    Settings {
        max_operations,
        max_attempts: 3,
        denied_patterns: Vec::new(),
        include_default_denies: true,
        history_enabled: history_path.is_some(),
        history_path,
    }
}

fn session(root: &Path, max_operations: u32) -> Session {
    init_tracing();
    Session::new(
        root.to_path_buf(),
        "integration scenario",
        settings(max_operations, None),
    )
    .expect("session")
}

fn write_request(id: &str, path: &str, content: &str) -> OperationRequest {
    OperationRequest::new(
        OperationId::new(id).expect("id"),
        ToolKind::WriteFile,
        json!({"path": path, "content": content}),
    )
}

#[tokio::test]
async fn write_file_happy_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);

    let state = session
        .execute(write_request("op-1", "notes.txt", "hello world"))
        .await
        .expect("executes");

    assert_eq!(state, FinalState::Succeeded);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).expect("written"),
        "hello world"
    );

    let record = &session.records()[0];
    assert_eq!(record.attempt_count(), 1);
    let verification = &record.last_attempt().expect("attempt").result.verification;
    assert!(verification.passed());
    assert_eq!(
        verification.get(bespoke_types::CheckCategory::Content, "size"),
        Some(&bespoke_types::CheckValue::Count(11))
    );
}

/// A write primitive that fails its first two strategies, so only the
/// third distinct strategy lands the content.
struct FlakyWrite {
    calls: AtomicU32,
}

impl ToolPrimitive for FlakyWrite {
    fn kind(&self) -> ToolKind {
        ToolKind::WriteFile
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
            },
            "required": ["path", "content"],
        })
    }

    fn execute<'a>(&'a self, strategy: StrategyKind, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if strategy != StrategyKind::TempFileRename {
                return Err(ToolError::ExecutionFailed {
                    tool: "write_file".to_string(),
                    message: format!("simulated {strategy} failure"),
                });
            }
            let raw = args["path"].as_str().unwrap_or_default();
            let path = ctx.sandbox.resolve_path_for_create(raw)?;
            let content = args["content"].as_str().unwrap_or_default();
            std::fs::write(&path, content).map_err(|e| ToolError::ExecutionFailed {
                tool: "write_file".to_string(),
                message: e.to_string(),
            })?;
            Ok(bespoke_tools::RawOutcome::new("wrote file").with_file(path))
        })
    }
}

#[tokio::test]
async fn write_recovers_on_third_strategy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);
    session.replace_tool(Box::new(FlakyWrite {
        calls: AtomicU32::new(0),
    }));

    let state = session
        .execute(write_request("op-1", "stubborn.txt", "finally"))
        .await
        .expect("executes");

    assert_eq!(state, FinalState::Succeeded);
    let record = &session.records()[0];
    assert_eq!(record.attempt_count(), 3);
    let strategies: Vec<StrategyKind> = record.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(
        strategies,
        vec![
            StrategyKind::Direct,
            StrategyKind::AlternateEncoding,
            StrategyKind::TempFileRename,
        ]
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("stubborn.txt")).expect("written"),
        "finally"
    );
    // The eventual success still notes how the first approach failed.
    let warnings = record.all_warnings();
    assert!(
        warnings.iter().any(|w| w.contains("attempt 1") && w.contains("direct")),
        "warnings: {warnings:?}"
    );
}

#[tokio::test]
async fn delete_of_absent_file_succeeds_and_keeps_the_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);

    let state = session
        .execute(OperationRequest::new(
            OperationId::new("op-1").expect("id"),
            ToolKind::DeleteFile,
            json!({"path": "never-created.txt"}),
        ))
        .await
        .expect("executes");

    assert_eq!(state, FinalState::Succeeded);
    let review = session.finish();
    let line = &review.operations[0];
    assert_eq!(line.final_state, FinalState::Succeeded);
    assert!(
        line.warnings.iter().any(|w| w.contains("did not exist")),
        "warnings: {:?}",
        line.warnings
    );
}

#[tokio::test]
async fn batch_rolls_back_and_skips_dependents_on_critical_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    // A file where the batch wants a directory makes every
    // create_directory strategy fail.
    std::fs::write(dir.path().join("blocked"), "a file, not a dir").expect("seed");
    let mut session = session(dir.path(), 25);

    let dir_op = OperationRequest::new(
        OperationId::new("make-dir").expect("id"),
        ToolKind::CreateDirectory,
        json!({"path": "blocked"}),
    );
    let file_op = write_request("write-into-dir", "blocked/readme.txt", "content")
        .with_dependencies([OperationId::new("make-dir").expect("id")]);

    let summary = session
        .execute_batch(BatchRequest::new(mint_batch_id(), vec![dir_op, file_op]))
        .await
        .expect("batch runs");

    assert_eq!(
        summary.outcome_of(&OperationId::new("make-dir").expect("id")),
        Some(FinalState::RolledBack)
    );
    assert_eq!(
        summary.outcome_of(&OperationId::new("write-into-dir").expect("id")),
        Some(FinalState::Skipped)
    );
    let rollback = summary.rollback.as_ref().expect("shared checkpoint restored");
    assert!(!rollback.is_partial());
    // The blocking file survived untouched and nothing was written.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("blocked")).expect("read"),
        "a file, not a dir"
    );
    assert!(!dir.path().join("blocked/readme.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_workspace_root_still_verifies_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let real = dir.path().join("realdir");
    std::fs::create_dir(&real).expect("real dir");
    let link = dir.path().join("ws-link");
    std::os::unix::fs::symlink(&real, &link).expect("symlink");

    let mut session = session(&link, 25);
    let state = session
        .execute(write_request("op-1", "notes.txt", "hello"))
        .await
        .expect("executes");

    assert_eq!(state, FinalState::Succeeded);
    assert_eq!(
        std::fs::read_to_string(real.join("notes.txt")).expect("written"),
        "hello"
    );
}

#[tokio::test]
async fn batch_rollback_lets_independent_noncritical_members_proceed() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("blocked"), "a file, not a dir").expect("seed");
    std::fs::write(dir.path().join("report.txt"), "still readable").expect("seed");
    let mut session = session(dir.path(), 25);

    let dir_op = OperationRequest::new(
        OperationId::new("make-dir").expect("id"),
        ToolKind::CreateDirectory,
        json!({"path": "blocked"}),
    );
    let read_op = OperationRequest::new(
        OperationId::new("read-report").expect("id"),
        ToolKind::ReadFile,
        json!({"path": "report.txt"}),
    );
    let file_op = write_request("write-into-dir", "blocked/readme.txt", "content")
        .with_dependencies([OperationId::new("make-dir").expect("id")]);

    let summary = session
        .execute_batch(BatchRequest::new(
            mint_batch_id(),
            vec![dir_op, file_op, read_op],
        ))
        .await
        .expect("batch runs");

    assert_eq!(
        summary.outcome_of(&OperationId::new("make-dir").expect("id")),
        Some(FinalState::RolledBack)
    );
    assert_eq!(
        summary.outcome_of(&OperationId::new("write-into-dir").expect("id")),
        Some(FinalState::Skipped)
    );
    // The read neither depends on the failed member nor touches the
    // checkpointed paths, so it runs to completion.
    assert_eq!(
        summary.outcome_of(&OperationId::new("read-report").expect("id")),
        Some(FinalState::Succeeded)
    );
    assert!(summary.rollback.is_some());
}

#[tokio::test]
async fn batch_continues_past_non_dependent_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);

    // read_file is non-critical; its failure must not disturb the write.
    let bad_read = OperationRequest::new(
        OperationId::new("read-ghost").expect("id"),
        ToolKind::ReadFile,
        json!({"path": "ghost.txt"}),
    );
    let good_write = write_request("independent-write", "kept.txt", "still here");

    let summary = session
        .execute_batch(BatchRequest::new(mint_batch_id(), vec![bad_read, good_write]))
        .await
        .expect("batch runs");

    assert_eq!(
        summary.outcome_of(&OperationId::new("read-ghost").expect("id")),
        Some(FinalState::Failed)
    );
    assert_eq!(
        summary.outcome_of(&OperationId::new("independent-write").expect("id")),
        Some(FinalState::Succeeded)
    );
    assert!(summary.rollback.is_none());
    assert!(dir.path().join("kept.txt").exists());
}

#[tokio::test]
async fn operation_ceiling_terminates_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 2);

    for n in 0..2 {
        session
            .execute(write_request(
                &format!("op-{n}"),
                &format!("file-{n}.txt"),
                "x",
            ))
            .await
            .expect("under the ceiling");
    }

    let refused = session
        .execute(write_request("op-over", "file-over.txt", "x"))
        .await
        .expect_err("over the ceiling");
    assert!(matches!(
        refused,
        SessionError::Terminated(Termination::OperationLimitReached)
    ));
    assert!(!dir.path().join("file-over.txt").exists());

    let review = session.finish();
    assert_eq!(review.termination, Some(Termination::OperationLimitReached));
    assert_eq!(review.operations.len(), 2);
}

#[tokio::test]
async fn cancelled_session_refuses_new_operations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);

    session
        .execute(write_request("op-1", "before.txt", "done"))
        .await
        .expect("runs before cancel");
    session.cancel();

    let refused = session
        .execute(write_request("op-2", "after.txt", "never"))
        .await
        .expect_err("cancelled");
    assert!(matches!(
        refused,
        SessionError::Terminated(Termination::Cancelled)
    ));

    let review = session.finish();
    assert_eq!(review.termination, Some(Termination::Cancelled));
    assert!(dir.path().join("before.txt").exists());
    assert!(!dir.path().join("after.txt").exists());
}

#[tokio::test]
async fn sandbox_denies_escape_and_denied_patterns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);

    let escape = session
        .execute(write_request("op-1", "../escape.txt", "x"))
        .await
        .expect("sealed, not errored");
    assert_eq!(escape, FinalState::Failed);

    let denied = session
        .execute(write_request("op-2", ".ssh/authorized_keys", "x"))
        .await
        .expect("sealed, not errored");
    assert_eq!(denied, FinalState::Failed);
}

#[tokio::test]
async fn save_then_load_json_roundtrip_with_review() {
    let dir = tempfile::tempdir().expect("tempdir");
    let history = dir.path().join("state").join("history.jsonl");
    init_tracing();
    let mut session = Session::new(
        dir.path().to_path_buf(),
        "persist settings",
        settings(25, Some(history.clone())),
    )
    .expect("session")
    .with_plan(["save settings".to_string(), "reload them".to_string()]);

    let save = OperationRequest::new(
        OperationId::new("save").expect("id"),
        ToolKind::SaveJson,
        json!({"path": "settings.json", "data": {"theme": "dark", "retries": 3}}),
    );
    let load = OperationRequest::new(
        OperationId::new("load").expect("id"),
        ToolKind::LoadJson,
        json!({"path": "settings.json"}),
    )
    .with_dependencies([OperationId::new("save").expect("id")]);

    assert_eq!(session.execute(save).await.expect("save"), FinalState::Succeeded);
    assert_eq!(session.execute(load).await.expect("load"), FinalState::Succeeded);

    // Pretty-printed with 2-space indentation by default.
    let on_disk = std::fs::read_to_string(dir.path().join("settings.json")).expect("read");
    assert!(on_disk.contains("  \"retries\": 3"));

    let review = session.finish();
    assert_eq!(review.goal, "persist settings");
    assert_eq!(review.plan.len(), 2);
    assert!(review.operations.iter().all(|l| l.final_state == FinalState::Succeeded));
    assert_eq!(review.operation_stats.succeeded, 2);
    assert!(review.suggestions.is_empty());
    assert!(
        review
            .environment_changes
            .iter()
            .any(|c| c == "settings.json: created"),
        "changes: {:?}",
        review.environment_changes
    );

    // Durable history got one JSONL line per operation.
    let lines = std::fs::read_to_string(&history).expect("history file");
    assert_eq!(lines.lines().count(), 2);
}

#[tokio::test]
async fn unmet_dependency_is_sealed_failed_with_cause() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session(dir.path(), 25);

    let blocked = write_request("blocked", "blocked.txt", "x")
        .with_dependencies([mint_operation_id()]);
    let state = session.execute(blocked).await.expect("sealed");

    assert_eq!(state, FinalState::Failed);
    let review = session.finish();
    assert!(
        review.operations[0].summary.contains("failed"),
        "summary: {}",
        review.operations[0].summary
    );
    assert_eq!(review.operation_stats.failed, 1);
}
