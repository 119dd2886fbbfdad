//! Task analysis
//!
//! Turns raw task text into a structured [`TaskAnalysis`]: intent,
//! imperative verb, mentioned file paths, a complexity estimate, and (for
//! complex tasks) a movement decomposition requested from the Provider.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::types::{ChatRequest, Message};
use crate::api::Provider;
use crate::errors::{PlanError, Result};
use crate::symphony::{Movement, MovementStatus};

/// Task intent. Drives agent selection, tool subsets, and loop-detector
/// iteration budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Query,
    Edit,
    Plan,
    Research,
    Review,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "query",
            Intent::Edit => "edit",
            Intent::Plan => "plan",
            Intent::Research => "research",
            Intent::Review => "review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "query" => Some(Intent::Query),
            "edit" => Some(Intent::Edit),
            "plan" => Some(Intent::Plan),
            "research" => Some(Intent::Research),
            "review" => Some(Intent::Review),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One top-level invocation. Immutable once created.
#[derive(Debug, Clone)]
pub struct Task {
    pub text: String,
    pub cwd: PathBuf,
    pub attempt_budget: usize,
    pub supervised: bool,
}

impl Task {
    pub fn new(text: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            cwd: cwd.into(),
            attempt_budget: 3,
            supervised: false,
        }
    }
}

/// The Analyzer's verdict on a task. Read-only downstream.
#[derive(Debug, Clone)]
pub struct TaskAnalysis {
    pub intent: Intent,
    pub verb: Option<String>,
    pub complexity: u8,
    pub required_files: Vec<String>,
    pub output_files: Vec<String>,
    pub movements: Vec<Movement>,
    pub predictor_unavailable: bool,
}

/// Closed vocabulary of imperative verbs, matched as lowercase substrings.
const VERBS: &[&str] = &[
    "add",
    "create",
    "fix",
    "refactor",
    "rename",
    "update",
    "delete",
    "remove",
    "implement",
    "optimize",
    "document",
    "test",
    "debug",
    "migrate",
    "review",
];

/// Mentioned file paths. Longest extensions come first in the alternation
/// so `.json` wins over `.js`.
static FILE_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9_\-./]+\.(?:json|yaml|html|yml|css|txt|md|go|py|ts|js)")
        .expect("file path regex")
});

/// Extract file paths mentioned verbatim, deduplicated in
/// first-appearance order.
pub fn extract_paths(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut paths = Vec::new();
    for m in FILE_PATH_RE.find_iter(text) {
        let path = m.as_str().to_string();
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    }
    paths
}

/// The earliest-occurring verb from the closed vocabulary.
pub fn extract_verb(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    VERBS
        .iter()
        .filter_map(|v| lower.find(v).map(|pos| (pos, *v)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, v)| v.to_string())
}

/// Remove a surrounding markdown code fence, if present.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. "json") on the fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

const QUERY_KEYWORDS: &[&str] = &[
    "show", "what", "where", "which", "display", "print", "content of", "explain", "how many",
];
const EDIT_KEYWORDS: &[&str] = &[
    "create", "add", "fix", "rename", "update", "change", "implement", "write", "delete",
    "remove", "refactor", "modify",
];
const PLAN_KEYWORDS: &[&str] = &["plan", "design", "outline", "propose", "roadmap"];
const RESEARCH_KEYWORDS: &[&str] = &[
    "research",
    "investigate",
    "explore",
    "find out",
    "compare",
    "survey",
];
const REVIEW_KEYWORDS: &[&str] = &["review", "audit", "verify", "validate", "inspect"];

/// Embedded zero-tool intent classifier. Returns the winning intent and a
/// confidence in [0, 1]; confidence is the winner's share of all keyword
/// hits, so ambiguous tasks score low and fall through to the Provider.
pub fn classify_intent(text: &str) -> (Intent, f32) {
    let lower = text.to_lowercase();
    let count = |keywords: &[&str]| keywords.iter().filter(|k| lower.contains(*k)).count();

    let scores = [
        (Intent::Query, count(QUERY_KEYWORDS)),
        (Intent::Edit, count(EDIT_KEYWORDS)),
        (Intent::Plan, count(PLAN_KEYWORDS)),
        (Intent::Research, count(RESEARCH_KEYWORDS)),
        (Intent::Review, count(REVIEW_KEYWORDS)),
    ];

    let total: usize = scores.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return (Intent::Edit, 0.0);
    }
    let (intent, best) = scores
        .iter()
        .max_by_key(|(_, n)| *n)
        .map(|(i, n)| (*i, *n))
        .unwrap_or((Intent::Edit, 0));
    (intent, best as f32 / total as f32)
}

const DECOMPOSITION_PROMPT: &str = r#"Decompose the task into ordered movements. Respond with STRICT JSON only: an array of objects, each with fields:
  "id" (string), "name" (string), "description" (string), "goal" (string),
  "dependencies" (array of movement ids), "required_files" (array of paths),
  "output_files" (array of paths), "success_criteria" (array of testable statements).
No prose, no markdown fences, JSON only."#;

#[derive(Debug, Deserialize)]
struct MovementSpec {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    goal: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    required_files: Vec<String>,
    #[serde(default)]
    output_files: Vec<String>,
    #[serde(default)]
    success_criteria: Vec<String>,
}

/// Classifies intent and complexity and, for complex tasks, requests a
/// movement decomposition from the Provider.
pub struct TaskAnalyzer {
    provider: Arc<dyn Provider>,
    model: String,
    confidence_threshold: f32,
}

impl TaskAnalyzer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            confidence_threshold: 0.7,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub async fn analyze(&self, task: &Task) -> Result<TaskAnalysis> {
        let (mut intent, confidence) = classify_intent(&task.text);
        if confidence < self.confidence_threshold {
            debug!(confidence, "embedded classifier unsure, asking provider");
            if let Some(llm_intent) = self.classify_with_provider(&task.text).await {
                intent = llm_intent;
            }
        }

        let verb = extract_verb(&task.text);
        let required_files = extract_paths(&task.text);

        let (complexity, predictor_unavailable) = self.predict_complexity(&task.text).await;

        let movements = if complexity >= 6 {
            self.decompose(&task.text).await?
        } else {
            Vec::new()
        };

        let output_files: Vec<String> = movements
            .iter()
            .flat_map(|m| m.output_files.iter().cloned())
            .collect();

        Ok(TaskAnalysis {
            intent,
            verb,
            complexity,
            required_files,
            output_files,
            movements,
            predictor_unavailable,
        })
    }

    async fn classify_with_provider(&self, text: &str) -> Option<Intent> {
        let request = ChatRequest::new(
            "Classify the task into exactly one of: query, edit, plan, research, review. Respond with the single word only.",
            self.model.as_str(),
        )
        .with_messages(vec![Message::user(text)]);

        match self.provider.chat(request).await {
            Ok(outcome) => {
                let word = outcome
                    .text
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .trim_matches(|c: char| !c.is_alphabetic())
                    .to_string();
                Intent::parse(&word)
            }
            Err(e) => {
                warn!("intent classification call failed: {}", e);
                None
            }
        }
    }

    /// Three-class complexity prediction: simple -> 3, complex -> 7,
    /// multistep -> 8. When the predictor is unavailable the score
    /// defaults to 5 and the analysis is flagged.
    async fn predict_complexity(&self, text: &str) -> (u8, bool) {
        let request = ChatRequest::new(
            "Rate the coding task complexity. Respond with exactly one word: simple, complex, or multistep.",
            self.model.as_str(),
        )
        .with_messages(vec![Message::user(text)]);

        match self.provider.chat(request).await {
            Ok(outcome) => {
                let lower = outcome.text.to_lowercase();
                if lower.contains("multistep") {
                    (8, false)
                } else if lower.contains("complex") {
                    (7, false)
                } else if lower.contains("simple") {
                    (3, false)
                } else {
                    (5, true)
                }
            }
            Err(e) => {
                warn!("complexity predictor unavailable: {}", e);
                (5, true)
            }
        }
    }

    async fn decompose(&self, text: &str) -> Result<Vec<Movement>> {
        let request = ChatRequest::new(DECOMPOSITION_PROMPT, self.model.as_str())
            .with_messages(vec![Message::user(text)]);
        let outcome = self.provider.chat(request).await.map_err(crate::errors::MaestroError::from)?;

        let body = strip_markdown_fences(&outcome.text);
        let specs: Vec<MovementSpec> = serde_json::from_str(body)
            .map_err(|e| PlanError::InvalidDecomposition(e.to_string()))?;
        if specs.is_empty() {
            return Err(PlanError::EmptyDecomposition.into());
        }

        Ok(specs
            .into_iter()
            .map(|spec| Movement {
                id: spec.id,
                name: spec.name,
                description: spec.description,
                goal: spec.goal,
                dependencies: spec.dependencies,
                required_files: spec.required_files,
                output_files: spec.output_files,
                success_criteria: spec.success_criteria,
                status: MovementStatus::Pending,
            })
            .collect())
    }
}
