//! Orchestrator loop scenarios: tool cycles, the allowed-files guard,
//! loop detection, and text-encoded tool calls.

use std::sync::Arc;

use maestro::analyzer::Intent;
use maestro::api::types::Message;
use maestro::cancel::CancelFlag;
use maestro::orchestrator::{Orchestrator, OrchestratorRequest};
use maestro::tools::ToolRegistry;

use crate::support::{call, text, text_and_call, ScriptedProvider};

fn request(intent: Intent, allowed: Vec<String>, cwd: &std::path::Path) -> OrchestratorRequest {
    OrchestratorRequest {
        system_prompt: "you are a coding agent".to_string(),
        messages: vec![Message::user("do the task")],
        model_id: "scripted-model".to_string(),
        intent,
        allowed_files: allowed,
        cwd: cwd.to_path_buf(),
    }
}

#[tokio::test]
async fn terminal_text_ends_the_loop() {
    let provider = Arc::new(ScriptedProvider::new(vec![text("all done")]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);
    let dir = tempfile::TempDir::new().unwrap();

    let outcome = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "all done");
    assert!(outcome.loop_reason.is_none());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn tool_cycle_reads_file_then_answers() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("test.txt"), "Hello World").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        call("read_file", serde_json::json!({"path": "test.txt"})),
        text("The file says: Hello World"),
    ]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert!(outcome.text.contains("Hello World"));
    assert!(outcome.modified_files.is_empty());
    assert!(outcome.last_command_output.is_none());
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn run_command_frame_surfaces_on_clean_exit() {
    let dir = tempfile::TempDir::new().unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        call("run_command", serde_json::json!({"command": "echo the build broke"})),
        text("the command ran"),
    ]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Review, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "the command ran");
    let command_output = outcome.last_command_output.unwrap();
    assert!(command_output.contains("the build broke"));
    assert!(command_output.contains("exit_code: 0"));
}

#[tokio::test]
async fn text_encoded_calls_are_normalized() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        text("Let me check. [read_file(path=\"a.txt\")]"),
        text("it says alpha"),
    ]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "it says alpha");
    assert_eq!(provider.calls(), 2);
}

// Seed scenario: deny unrelated file writes. The Editor tries b.go while
// only a.go is allowed; the write is rejected with a corrective message,
// the Editor retries against a.go, and b.go never exists on disk.
#[tokio::test]
async fn guard_rejects_write_outside_allowed_files() {
    let dir = tempfile::TempDir::new().unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        call(
            "write_file",
            serde_json::json!({"path": "b.go", "content": "package main\n"}),
        ),
        call(
            "write_file",
            serde_json::json!({"path": "a.go", "content": "package main\n"}),
        ),
        text("wrote a.go"),
    ]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(
            request(Intent::Edit, vec!["a.go".to_string()], dir.path()),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

    assert!(!dir.path().join("b.go").exists());
    assert!(dir.path().join("a.go").exists());
    assert_eq!(outcome.modified_files.len(), 1);
    assert!(outcome.modified_files[0].ends_with("a.go"));
}

// Seed scenario: loop detection. Five identical read_file calls in a row
// stop the orchestrator with the named reason; the last tool result is
// returned.
#[tokio::test]
async fn repeated_tool_call_stops_the_loop() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("x"), "contents of x").unwrap();

    let responses: Vec<_> = (0..10)
        .map(|i| {
            text_and_call(
                &format!("scanning, round {}", i),
                "read_file",
                serde_json::json!({"path": "x"}),
            )
        })
        .collect();
    let provider = Arc::new(ScriptedProvider::new(responses));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.loop_reason.as_deref(),
        Some("repeated tool call: read_file")
    );
    // The most recent relevant tool result comes back with the reason.
    assert!(outcome.text.contains("contents of x"));
    assert_eq!(provider.calls(), 5);
}

#[tokio::test]
async fn repeated_response_stops_the_loop() {
    let dir = tempfile::TempDir::new().unwrap();

    // Same text every round, but distinct tool calls so only the
    // content rule can trip.
    let responses: Vec<_> = (0..6)
        .map(|i| {
            text_and_call(
                "still looking",
                "read_file",
                serde_json::json!({"path": format!("f{}", i)}),
            )
        })
        .collect();
    let provider = Arc::new(ScriptedProvider::new(responses));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(outcome.loop_reason.as_deref(), Some("repeated response"));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn unknown_tool_becomes_error_frame_not_failure() {
    let dir = tempfile::TempDir::new().unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        call("summon_daemon", serde_json::json!({})),
        text("ok, I will stop doing that"),
    ]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Edit, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    // The error was fed back; the model recovered and terminated.
    assert_eq!(outcome.text, "ok, I will stop doing that");
}

#[tokio::test]
async fn tool_execution_error_is_recoverable() {
    let dir = tempfile::TempDir::new().unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        call("read_file", serde_json::json!({"path": "missing.txt"})),
        text("the file does not exist"),
    ]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let outcome = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(outcome.text, "the file does not exist");
}

#[tokio::test]
async fn provider_error_propagates() {
    let dir = tempfile::TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![])); // exhausted immediately
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let result = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &CancelFlag::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cancellation_stops_before_provider_call() {
    let dir = tempfile::TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![text("never seen")]));
    let registry = ToolRegistry::new();
    let orchestrator = Orchestrator::new(provider.as_ref(), &registry);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = orchestrator
        .run(request(Intent::Query, vec![], dir.path()), &cancel)
        .await;
    assert!(matches!(result, Err(maestro::errors::MaestroError::Cancelled)));
    assert_eq!(provider.calls(), 0);
}
