//! Loop detection
//!
//! Bounds the cost of an orchestrator run and stops pathological behavior:
//! the same tool call repeated verbatim, the same assistant response
//! re-emitted, or simply too many iterations for the task's intent.

use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;

use crate::analyzer::Intent;
use crate::tools::ToolKind;

/// How many identical consecutive tool calls trip the detector.
const TOOL_CALL_REPEAT_LIMIT: usize = 5;
/// How many identical responses (consecutive or within the window) trip it.
const RESPONSE_REPEAT_LIMIT: usize = 3;
/// Response window size for non-consecutive repetition.
const RESPONSE_WINDOW: usize = 5;
/// Read-only streak that escalates when the intent demands edits.
const NO_PROGRESS_THRESHOLD: usize = 10;

/// Why the detector stopped the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSignal {
    RepeatedToolCall(String),
    RepeatedResponse,
    IterationCap,
}

impl LoopSignal {
    pub fn reason(&self) -> String {
        match self {
            LoopSignal::RepeatedToolCall(name) => format!("repeated tool call: {}", name),
            LoopSignal::RepeatedResponse => "repeated response".to_string(),
            LoopSignal::IterationCap => "iteration cap reached".to_string(),
        }
    }
}

/// Iteration budget per intent.
fn max_iterations_for(intent: Intent) -> usize {
    match intent {
        Intent::Query => 15,
        Intent::Plan => 20,
        Intent::Edit => 25,
        Intent::Research => 30,
        // Review runs a bounded verification pass; the query budget fits.
        Intent::Review => 15,
    }
}

/// Bounded-memory detector over tool calls and assistant responses.
pub struct LoopDetector {
    intent: Intent,
    iterations: usize,
    max_iterations: usize,
    recent_calls: VecDeque<String>,
    recent_responses: VecDeque<String>,
    made_progress: bool,
    scanned: bool,
    read_only_streak: usize,
}

impl LoopDetector {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            iterations: 0,
            max_iterations: max_iterations_for(intent),
            recent_calls: VecDeque::with_capacity(TOOL_CALL_REPEAT_LIMIT + 1),
            recent_responses: VecDeque::with_capacity(RESPONSE_WINDOW + 1),
            made_progress: false,
            scanned: false,
            read_only_streak: 0,
        }
    }

    #[cfg(test)]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Count an iteration; signals once the intent's cap is exceeded.
    pub fn begin_iteration(&mut self) -> Option<LoopSignal> {
        if self.iterations >= self.max_iterations {
            return Some(LoopSignal::IterationCap);
        }
        self.iterations += 1;
        None
    }

    /// Record a tool call; signals after [`TOOL_CALL_REPEAT_LIMIT`]
    /// identical consecutive calls.
    pub fn record_tool_call(&mut self, name: &str, args: &Value, cwd: &Path) -> Option<LoopSignal> {
        let key = canonicalize_call(name, args, cwd);
        self.recent_calls.push_back(key.clone());
        if self.recent_calls.len() > TOOL_CALL_REPEAT_LIMIT {
            self.recent_calls.pop_front();
        }
        if self.recent_calls.len() == TOOL_CALL_REPEAT_LIMIT
            && self.recent_calls.iter().all(|k| k == &key)
        {
            return Some(LoopSignal::RepeatedToolCall(name.to_string()));
        }
        None
    }

    /// Record progress signals: mutating tools mean progress, read-only
    /// tools mean the model is still scanning.
    pub fn note_tool_kind(&mut self, kind: ToolKind) {
        match kind {
            ToolKind::Mutating => {
                self.made_progress = true;
                self.read_only_streak = 0;
            }
            ToolKind::ReadOnly => {
                self.scanned = true;
                self.read_only_streak += 1;
            }
            ToolKind::Command => {
                self.read_only_streak = 0;
            }
        }
    }

    /// Record an assistant response sample; signals when the same text
    /// shows up [`RESPONSE_REPEAT_LIMIT`] times consecutively or within
    /// the last [`RESPONSE_WINDOW`] samples.
    pub fn record_response(&mut self, text: &str) -> Option<LoopSignal> {
        let sample = text.trim().to_string();
        if sample.is_empty() {
            return None;
        }
        self.recent_responses.push_back(sample.clone());
        if self.recent_responses.len() > RESPONSE_WINDOW {
            self.recent_responses.pop_front();
        }
        let occurrences = self
            .recent_responses
            .iter()
            .filter(|r| **r == sample)
            .count();
        if occurrences >= RESPONSE_REPEAT_LIMIT {
            return Some(LoopSignal::RepeatedResponse);
        }
        None
    }

    /// A long read-only streak with zero mutations, on an intent that
    /// demands edits, halves the remaining iteration budget.
    pub fn escalate_if_stalled(&mut self) {
        if self.intent == Intent::Edit
            && !self.made_progress
            && self.read_only_streak >= NO_PROGRESS_THRESHOLD
        {
            self.max_iterations = self.max_iterations.min(self.iterations + 2);
        }
    }

    pub fn made_progress(&self) -> bool {
        self.made_progress
    }
}

/// Canonical form of a tool call: JSON with sorted keys (serde_json maps
/// preserve insertion order, so rebuild through a BTreeMap), whitespace
/// collapsed, path-like arguments resolved against the cwd.
pub fn canonicalize_call(name: &str, args: &Value, cwd: &Path) -> String {
    let canonical = canonicalize_value(args, cwd, true);
    format!("{}:{}", name, canonical)
}

fn canonicalize_value(value: &Value, cwd: &Path, top: bool) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            let inner = keys
                .iter()
                .map(|k| {
                    let v = &map[*k];
                    let rendered = if top && is_path_key(k) {
                        canonicalize_path(v, cwd)
                    } else {
                        canonicalize_value(v, cwd, false)
                    };
                    format!("{}={}", k, rendered)
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", inner)
        }
        Value::Array(items) => {
            let inner = items
                .iter()
                .map(|v| canonicalize_value(v, cwd, false))
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        Value::String(s) => s.split_whitespace().collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

fn is_path_key(key: &str) -> bool {
    matches!(key, "path" | "file" | "filename" | "cwd")
}

fn canonicalize_path(value: &Value, cwd: &Path) -> String {
    match value {
        Value::String(s) => {
            let p = Path::new(s);
            if p.is_absolute() {
                s.clone()
            } else {
                cwd.join(p).display().to_string()
            }
        }
        other => canonicalize_value(other, cwd, false),
    }
}
