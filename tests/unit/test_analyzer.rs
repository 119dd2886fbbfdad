//! Task analysis scenarios: the complexity gate, decomposition parsing,
//! and the classifier's provider fallback.

use std::sync::Arc;

use maestro::analyzer::{Intent, Task, TaskAnalyzer};
use maestro::api::Provider;

use crate::support::{text, ScriptedProvider};

fn analyzer(provider: &Arc<ScriptedProvider>) -> TaskAnalyzer {
    let provider: Arc<dyn Provider> = provider.clone();
    TaskAnalyzer::new(provider, "scripted-model")
}

const MOVEMENTS_JSON: &str = r#"[
  {"id": "m1", "name": "schema", "goal": "add the schema", "dependencies": [],
   "required_files": ["db.go"], "output_files": ["db.go"],
   "success_criteria": ["schema migrates cleanly"]},
  {"id": "m2", "name": "handler", "goal": "add the handler", "dependencies": ["m1"],
   "required_files": [], "output_files": ["api.go"],
   "success_criteria": ["handler returns 200"]}
]"#;

#[tokio::test]
async fn simple_complexity_skips_decomposition() {
    // Only the complexity call is scripted; a decomposition request would
    // exhaust the script and fail the analysis.
    let provider = Arc::new(ScriptedProvider::new(vec![text("simple")]));
    let analysis = analyzer(&provider)
        .analyze(&Task::new("Fix the typo in README.md", "."))
        .await
        .unwrap();

    assert_eq!(analysis.complexity, 3);
    assert!(analysis.movements.is_empty());
    assert!(!analysis.predictor_unavailable);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn complex_task_gets_decomposed() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        text("multistep"),
        text(MOVEMENTS_JSON),
    ]));
    let analysis = analyzer(&provider)
        .analyze(&Task::new("Add persistence and update api.go and db.go", "."))
        .await
        .unwrap();

    assert_eq!(analysis.complexity, 8);
    assert_eq!(analysis.movements.len(), 2);
    assert_eq!(analysis.movements[1].dependencies, vec!["m1"]);
    assert!(analysis.output_files.contains(&"api.go".to_string()));
}

#[tokio::test]
async fn decomposition_tolerates_markdown_fences() {
    let fenced = format!("```json\n{}\n```", MOVEMENTS_JSON);
    let provider = Arc::new(ScriptedProvider::new(vec![text("complex"), text(&fenced)]));
    let analysis = analyzer(&provider)
        .analyze(&Task::new("Add persistence across api.go and db.go", "."))
        .await
        .unwrap();
    assert_eq!(analysis.movements.len(), 2);
}

#[tokio::test]
async fn empty_decomposition_is_an_error() {
    let provider = Arc::new(ScriptedProvider::new(vec![text("complex"), text("[]")]));
    let result = analyzer(&provider)
        .analyze(&Task::new("Add persistence to the service", "."))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn garbled_decomposition_is_an_error() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        text("complex"),
        text("movements: m1 then m2"),
    ]));
    let result = analyzer(&provider)
        .analyze(&Task::new("Add persistence to the service", "."))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn ambiguous_intent_falls_back_to_provider() {
    // "frobnicate the widget" hits no intent keywords: confidence 0.0.
    let provider = Arc::new(ScriptedProvider::new(vec![
        text("research"), // classifier fallback
        text("simple"),   // complexity
    ]));
    let analysis = analyzer(&provider)
        .analyze(&Task::new("frobnicate the widget", "."))
        .await
        .unwrap();

    assert_eq!(analysis.intent, Intent::Research);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn unparseable_complexity_flags_predictor_unavailable() {
    let provider = Arc::new(ScriptedProvider::new(vec![text("banana")]));
    let analysis = analyzer(&provider)
        .analyze(&Task::new("Fix the login bug", "."))
        .await
        .unwrap();

    assert_eq!(analysis.complexity, 5);
    assert!(analysis.predictor_unavailable);
}
