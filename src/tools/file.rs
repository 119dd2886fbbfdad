use super::{is_denied_dir, Tool, ToolContext, ToolKind, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fs;

pub struct ReadFile;
pub struct WriteFile;
pub struct ApplyPatch;
pub struct ProjectMap;
pub struct ListFiles;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Use for examining code, configs, or any text file."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path to the file, relative to the workspace"}
            },
            "required": ["path"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
        }
        let args: Args = serde_json::from_value(args)?;
        let path = ctx.resolve(&args.path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", args.path))?;
        Ok(ToolResult::ok(content))
    }
}

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write or overwrite an entire file. Creates parent directories if needed."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            content: String,
        }
        let args: Args = serde_json::from_value(args)?;
        let path = ctx.resolve(&args.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &args.content)?;
        Ok(
            ToolResult::ok(format!("wrote {} bytes to {}", args.content.len(), args.path))
                .with_modified(path),
        )
    }
}

#[async_trait]
impl Tool for ApplyPatch {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a surgical edit: replace an exact search block with new text. The search must match exactly once; include enough context for a unique match."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "search": {"type": "string", "description": "Exact text to find (must be unique)"},
                "replace": {"type": "string", "description": "Replacement text (empty to delete)"}
            },
            "required": ["path", "search", "replace"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mutating
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            search: String,
            replace: String,
        }
        let args: Args = serde_json::from_value(args)?;
        if args.search.trim().is_empty() {
            return Err(crate::errors::ToolError::MissingSearch.into());
        }

        let path = ctx.resolve(&args.path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", args.path))?;

        let matches = content.matches(&args.search).count();
        let new_content = match matches {
            1 => content.replacen(&args.search, &args.replace, 1),
            0 => {
                // Literal miss: retry with whitespace-insensitive matching
                // before giving up. Never guess beyond that.
                let pattern = whitespace_insensitive_pattern(&args.search);
                let re = Regex::new(&pattern)
                    .with_context(|| "failed to build whitespace-normalized pattern")?;
                let found: Vec<_> = re.find_iter(&content).collect();
                match found.len() {
                    1 => {
                        let m = found[0];
                        format!("{}{}{}", &content[..m.start()], args.replace, &content[m.end()..])
                    }
                    0 => anyhow::bail!("search block not found in {}", args.path),
                    n => anyhow::bail!(
                        "search block matches {} locations in {} after whitespace normalization, expected exactly 1",
                        n,
                        args.path
                    ),
                }
            }
            n => anyhow::bail!(
                "search block matches {} times in {}, expected exactly 1",
                n,
                args.path
            ),
        };

        fs::write(&path, &new_content)?;
        Ok(ToolResult::ok(format!("patched {}", args.path)).with_modified(path))
    }
}

/// Build a regex matching the search text with every whitespace run
/// treated as `\s+`.
fn whitespace_insensitive_pattern(search: &str) -> String {
    let tokens: Vec<String> = search
        .split_whitespace()
        .map(regex::escape)
        .collect();
    tokens.join(r"\s+")
}

#[async_trait]
impl Tool for ProjectMap {
    fn name(&self) -> &str {
        "project_map"
    }

    fn description(&self) -> &str {
        "List the project structure to a bounded depth. Noisy directories (VCS, vendored deps, build outputs) are always excluded."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "default": "."},
                "max_depth": {"type": "integer", "default": 3}
            },
            "required": []
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default = "default_dot")]
            path: String,
            #[serde(default = "default_depth")]
            max_depth: usize,
        }
        let args: Args = serde_json::from_value(args)?;
        let root = ctx.resolve(&args.path);

        let mut lines = Vec::new();
        let walker = walkdir::WalkDir::new(&root)
            .min_depth(1)
            .max_depth(args.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && is_denied_dir(&name)) && !name.starts_with('.')
            });

        for entry in walker.filter_map(|e| e.ok()) {
            let depth = entry.depth();
            let name = entry.file_name().to_string_lossy().into_owned();
            let marker = if entry.file_type().is_dir() { "/" } else { "" };
            lines.push(format!("{}{}{}", "  ".repeat(depth - 1), name, marker));
        }

        Ok(ToolResult::ok(lines.join("\n")))
    }
}

#[async_trait]
impl Tool for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a single directory."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "default": "."}
            },
            "required": []
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            #[serde(default = "default_dot")]
            path: String,
        }
        let args: Args = serde_json::from_value(args)?;
        let dir = ctx.resolve(&args.path);

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to list directory: {}", args.path))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                entries.push(format!("{}/", name));
            } else {
                entries.push(name);
            }
        }
        entries.sort_unstable();
        Ok(ToolResult::ok(entries.join("\n")))
    }
}

fn default_dot() -> String {
    ".".to_string()
}
fn default_depth() -> usize {
    3
}
