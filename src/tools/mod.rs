use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod file;
pub mod search;
pub mod shell;

use file::{ApplyPatch, ListFiles, ProjectMap, ReadFile, WriteFile};
use search::Grep;
use shell::RunCommand;

use crate::api::types::ToolDefinition;
use crate::errors::ToolError;

/// Directories never descended into by `project_map`, `list_files`,
/// `grep`, or the dependency-graph walk: VCS metadata, vendored
/// dependencies, and build outputs.
pub const DENY_LIST: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// True when a directory name is on the deny-list.
pub fn is_denied_dir(name: &str) -> bool {
    DENY_LIST.contains(&name)
}

/// What a tool does to the workspace. Drives loop-detector progress
/// signals and the Reviewer's build/test skip decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ReadOnly,
    Mutating,
    Command,
}

/// The workspace a tool call runs against. Relative paths in arguments
/// resolve against `cwd`.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub cwd: PathBuf,
}

impl ToolContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }

    /// Resolve a possibly-relative path argument against the workspace.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd.join(p)
        }
    }
}

/// Outcome of one tool execution. `error` carries a recoverable failure
/// that is fed back to the model; `modified_files` accumulates across a
/// conversation for the Reviewer and checkpoint scope.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub text: String,
    pub error: Option<String>,
    pub modified_files: Vec<PathBuf>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
            modified_files: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            text: message.clone(),
            error: Some(message),
            modified_files: Vec::new(),
        }
    }

    pub fn with_modified(mut self, path: PathBuf) -> Self {
        self.modified_files.push(path);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A whitelisted, side-effecting operation on the workspace. Each tool has
/// a JSON schema for its arguments and an async `execute`; tools are
/// registered in a [`ToolRegistry`] and invoked by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn kind(&self) -> ToolKind;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Name-keyed registry over the closed tool set.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The full built-in set.
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry.register(ReadFile);
        registry.register(WriteFile);
        registry.register(ApplyPatch);
        registry.register(ProjectMap);
        registry.register(ListFiles);
        registry.register(Grep);
        registry.register(RunCommand);
        registry
    }

    /// A registry restricted to the named subset. Unknown names are
    /// ignored so role profiles can be declared statically.
    pub fn with_tools(names: &[&str]) -> Self {
        let full = Self::new();
        let mut registry = Self {
            tools: HashMap::new(),
        };
        for (name, tool) in full.tools {
            if names.contains(&name.as_str()) {
                registry.tools.insert(name, tool);
            }
        }
        registry
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Schema definitions for every registered tool, for the Provider's
    /// `tools` array.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Validate arguments against the tool's schema and execute.
    ///
    /// Validation failures and execution failures both come back as
    /// `Err(ToolError)`; the orchestrator converts them into tool frames
    /// so the model can recover.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        validate_args(name, &tool.schema(), &args)?;
        tool.execute(args, ctx)
            .await
            .map_err(|e| ToolError::Execution {
                name: name.to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the `required` keys of a tool schema against the supplied
/// arguments. Handlers receive already-validated input.
fn validate_args(name: &str, schema: &Value, args: &Value) -> std::result::Result<(), ToolError> {
    let Some(object) = args.as_object() else {
        return Err(ToolError::InvalidArguments {
            name: name.to_string(),
            message: "arguments must be a JSON object".to_string(),
        });
    };
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !object.contains_key(key) {
                return Err(ToolError::InvalidArguments {
                    name: name.to_string(),
                    message: format!("missing required argument '{}'", key),
                });
            }
        }
    }
    Ok(())
}
