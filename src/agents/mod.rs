//! Agent profiles
//!
//! An agent is the orchestrator loop plus a role: a fixed system prompt,
//! a tool subset, and a model chosen for that role. The profiles here are
//! the closed set of workers the Conductor drives.

use serde::{Deserialize, Serialize};

pub mod planner;
pub mod reviewer;

/// Worker roles the Conductor knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Classifier,
    Analyzer,
    Planner,
    Editor,
    Reviewer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Classifier => "classifier",
            AgentRole::Analyzer => "analyzer",
            AgentRole::Planner => "planner",
            AgentRole::Editor => "editor",
            AgentRole::Reviewer => "reviewer",
        }
    }

    /// Roles that cannot function on a model without tool-call support.
    pub fn requires_tools(&self) -> bool {
        !matches!(self, AgentRole::Classifier)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A role's static configuration.
pub struct AgentProfile {
    pub role: AgentRole,
    pub system_prompt: &'static str,
    pub tool_names: &'static [&'static str],
}

const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_files", "project_map", "grep"];
const EDITOR_TOOLS: &[&str] = &[
    "read_file",
    "write_file",
    "apply_patch",
    "list_files",
    "project_map",
    "grep",
    "run_command",
];
const REVIEWER_TOOLS: &[&str] = &["read_file", "list_files", "project_map", "grep", "run_command"];

const ANALYZER_PROMPT: &str = r#"You are a codebase analyst. Examine the files relevant to the task and produce a compact, structured summary: what each relevant file does, the conventions in use, and anything the task will need to touch. Use read-only tools. Do not propose changes. When you have enough context, respond with the summary as plain text."#;

const PLANNER_PROMPT: &str = r#"You are a planner for a coding agent. Produce a concrete implementation plan for the task.

The plan MUST contain:
1. A short numbered sequence of steps.
2. A section titled "Files" listing every file to create or modify, one path per line.
3. A section titled "Success Criteria" with one testable statement per line, each starting with "- ".

Use read-only tools to inspect the codebase first. Keep the plan minimal: only the files the task genuinely needs."#;

const EDITOR_PROMPT: &str = r#"You are a coding agent. Implement the plan step by step using the available tools. Read a file before editing it. Prefer apply_patch for surgical edits; use write_file for new files. Only touch files named in the plan. Verify each step before proceeding. When the implementation is complete, respond with a short summary of what was done and no tool calls."#;

const REVIEWER_PROMPT: &str = r#"You are a reviewer. Verify the changes against each success criterion. Read the modified files; run build or test commands when they are warranted by the criteria. When a criterion names a dependency version, accept semantically equivalent expressions (for example "~> 1.15.4" satisfies "1.15.4").

When every criterion holds, respond with a single line containing SUCCESS.
Otherwise respond with a list of the specific issues found, one per line. Never write SUCCESS together with a list of issues."#;

const CLASSIFIER_PROMPT: &str = r#"Classify the task into exactly one of: query, edit, plan, research, review. Respond with the single word only."#;

/// The static profile for a role.
pub fn profile_for(role: AgentRole) -> AgentProfile {
    match role {
        AgentRole::Classifier => AgentProfile {
            role,
            system_prompt: CLASSIFIER_PROMPT,
            tool_names: &[],
        },
        AgentRole::Analyzer => AgentProfile {
            role,
            system_prompt: ANALYZER_PROMPT,
            tool_names: READ_ONLY_TOOLS,
        },
        AgentRole::Planner => AgentProfile {
            role,
            system_prompt: PLANNER_PROMPT,
            tool_names: READ_ONLY_TOOLS,
        },
        AgentRole::Editor => AgentProfile {
            role,
            system_prompt: EDITOR_PROMPT,
            tool_names: EDITOR_TOOLS,
        },
        AgentRole::Reviewer => AgentProfile {
            role,
            system_prompt: REVIEWER_PROMPT,
            tool_names: REVIEWER_TOOLS,
        },
    }
}
