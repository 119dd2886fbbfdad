//! Conductor pipeline scenarios: query, create, rename, retry.

use std::sync::Arc;

use maestro::analyzer::Task;
use maestro::errors::{ErrorClass, MaestroError};

use crate::support::{call, conductor_with, text, ScriptedProvider};

const PLAN_CREATE: &str = r#"Plan:
1. Create the file.

Files:
output.txt

Success Criteria:
- output.txt exists with the exact content 'test content'
"#;

const PLAN_RENAME: &str = r#"Plan:
1. Rename the function in place.

Files:
code.go

Success Criteria:
- code.go defines func new()
- the package still builds
"#;

// Seed scenario: query file content. The analysis extracts test.txt, the
// Conductor pre-loads it through read_file, and the single provider call
// in the orchestrator loop answers from that context.
#[tokio::test]
async fn query_file_content() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();
    std::fs::write(work.path().join("test.txt"), "Hello World").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        // complexity predictor
        text("simple"),
        // analyzer answer, grounded in the pre-loaded file content
        text("test.txt contains: Hello World"),
    ]));
    let conductor = conductor_with(provider.clone(), state.path());

    let answer = conductor
        .execute(&Task::new("Show me the content of test.txt", work.path()))
        .await
        .unwrap();

    assert!(answer.contains("Hello World"));
    // One call for the complexity predictor, exactly one in the loop.
    assert_eq!(provider.calls(), 2);
    // Nothing in the workspace changed.
    assert_eq!(
        std::fs::read_to_string(work.path().join("test.txt")).unwrap(),
        "Hello World"
    );
}

// Seed scenario: create a file. After the run, output.txt holds the exact
// bytes, the plan allowed it, and the Reviewer reported SUCCESS.
#[tokio::test]
async fn create_a_file() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        text("simple"),                       // complexity
        text("The workspace is empty."),      // analyzer
        text(PLAN_CREATE),                    // planner
        call(
            "write_file",
            serde_json::json!({"path": "output.txt", "content": "test content"}),
        ),                                    // editor acts
        text("Created output.txt."),          // editor finishes
        text("SUCCESS"),                      // reviewer
    ]));
    let conductor = conductor_with(provider.clone(), state.path());

    let answer = conductor
        .execute(&Task::new("Create output.txt with 'test content'", work.path()))
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(work.path().join("output.txt")).unwrap(),
        "test content"
    );
    assert!(answer.contains("SUCCESS"));
}

// Seed scenario: rename a function via apply_patch.
#[tokio::test]
async fn rename_function() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();
    std::fs::write(work.path().join("code.go"), "package main\n\nfunc old() {}\n").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        text("simple"),
        text("code.go defines func old()."),
        text(PLAN_RENAME),
        call(
            "apply_patch",
            serde_json::json!({"path": "code.go", "search": "func old()", "replace": "func new()"}),
        ),
        text("Renamed old to new."),
        text("SUCCESS"),
    ]));
    let conductor = conductor_with(provider.clone(), state.path());

    conductor
        .execute(&Task::new("Rename function old to new in code.go", work.path()))
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(work.path().join("code.go")).unwrap(),
        "package main\n\nfunc new() {}\n"
    );
}

// Reviewer failure drives another Edit attempt with a corrective prompt;
// the second attempt succeeds.
#[tokio::test]
async fn review_failure_retries_edit() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();
    std::fs::write(work.path().join("code.go"), "package main\n\nfunc old() {}\n").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        text("simple"),
        text("code.go defines func old()."),
        text(PLAN_RENAME),
        // attempt 1: editor writes the wrong name
        call(
            "apply_patch",
            serde_json::json!({"path": "code.go", "search": "func old()", "replace": "func wrong()"}),
        ),
        text("Renamed."),
        // reviewer rejects with a classified failure
        text("- code.go does not match expected: func new() is absent"),
        // attempt 2: editor fixes it
        call(
            "apply_patch",
            serde_json::json!({"path": "code.go", "search": "func wrong()", "replace": "func new()"}),
        ),
        text("Fixed the rename."),
        text("SUCCESS"),
    ]));
    let conductor = conductor_with(provider.clone(), state.path());

    conductor
        .execute(&Task::new("Rename function old to new in code.go", work.path()))
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(work.path().join("code.go")).unwrap(),
        "package main\n\nfunc new() {}\n"
    );
}

// Attempt exhaustion restores the snapshot: the workspace ends byte
// identical to its pre-edit state.
#[tokio::test]
async fn exhausted_attempts_roll_back() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();
    let original = "package main\n\nfunc old() {}\n";
    std::fs::write(work.path().join("code.go"), original).unwrap();

    let mut responses = vec![
        text("simple"),
        text("code.go defines func old()."),
        text(PLAN_RENAME),
    ];
    // Three failing attempts (max_attempts default 3). The editor patches
    // in fresh garbage each round so every apply_patch matches.
    for (wrong, prev) in [("v1", "old"), ("v2", "v1"), ("v3", "v2")] {
        responses.push(call(
            "apply_patch",
            serde_json::json!({
                "path": "code.go",
                "search": format!("func {}()", prev),
                "replace": format!("func {}()", wrong)
            }),
        ));
        responses.push(text("Edited."));
        responses.push(text("- criterion not satisfied: func new() is absent"));
    }
    let provider = Arc::new(ScriptedProvider::new(responses));
    let conductor = conductor_with(provider.clone(), state.path());

    let result = conductor
        .execute(&Task::new("Rename function old to new in code.go", work.path()))
        .await;

    assert!(result.is_err());
    assert_eq!(
        std::fs::read_to_string(work.path().join("code.go")).unwrap(),
        original
    );
}

// Classification runs over the Reviewer's output combined with the last
// run_command output: the Reviewer's prose here carries no keyword
// signature, but the command it ran surfaced a build error, so the
// failure classifies as `build` rather than `unknown`.
#[tokio::test]
async fn classification_sees_raw_command_output() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();
    let original = "package main\n\nfunc old() {}\n";
    std::fs::write(work.path().join("code.go"), original).unwrap();

    let mut responses = vec![
        text("simple"),
        text("code.go defines func old()."),
        text(PLAN_RENAME),
    ];
    // Every attempt: the editor rewrites the file, the reviewer runs a
    // command whose output holds the real error, then reports vaguely.
    for _ in 0..3 {
        responses.push(call(
            "write_file",
            serde_json::json!({"path": "code.go", "content": "package main\nimport \"missing\"\n"}),
        ));
        responses.push(text("Rewrote code.go."));
        responses.push(call(
            "run_command",
            serde_json::json!({"command": "echo 'app.go:3: cannot find package missing'"}),
        ));
        responses.push(text("- criterion 2 is unverified; see the command output"));
    }
    let provider = Arc::new(ScriptedProvider::new(responses));
    let conductor = conductor_with(provider.clone(), state.path());

    let err = conductor
        .execute(&Task::new("Rename function old to new in code.go", work.path()))
        .await
        .unwrap_err();

    match err {
        MaestroError::Review { class, detail } => {
            assert_eq!(class, ErrorClass::Build);
            assert!(detail.contains("cannot find package"));
            assert!(detail.contains("criterion 2 is unverified"));
        }
        other => panic!("expected a classified review failure, got {}", other),
    }
    // Exhaustion still rolls the workspace back.
    assert_eq!(
        std::fs::read_to_string(work.path().join("code.go")).unwrap(),
        original
    );
}

// A plan with no file list is a PlanError, before any edit happens.
#[tokio::test]
async fn plan_without_files_fails_fast() {
    let work = tempfile::TempDir::new().unwrap();
    let state = tempfile::TempDir::new().unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        text("simple"),
        text("Nothing notable."),
        text("I would just do it.\n\nSuccess Criteria:\n- it works\n"),
    ]));
    let conductor = conductor_with(provider.clone(), state.path());

    let result = conductor
        .execute(&Task::new("Create output.txt with 'test content'", work.path()))
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("plan"));
}
