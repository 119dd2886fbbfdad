use super::{is_denied_dir, Tool, ToolContext, ToolKind, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::fs;

/// Maximum matches returned before truncating, to keep tool frames small.
const MAX_MATCHES: usize = 200;

pub struct Grep;

#[async_trait]
impl Tool for Grep {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns path:line matches."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression to search for"},
                "path": {"type": "string", "default": "."},
                "case_insensitive": {"type": "boolean", "default": false}
            },
            "required": ["pattern"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            pattern: String,
            #[serde(default = "default_dot")]
            path: String,
            #[serde(default)]
            case_insensitive: bool,
        }
        let args: Args = serde_json::from_value(args)?;
        let re = RegexBuilder::new(&args.pattern)
            .case_insensitive(args.case_insensitive)
            .build()
            .with_context(|| format!("invalid pattern: {}", args.pattern))?;

        let root = ctx.resolve(&args.path);
        let mut matches = Vec::new();
        let mut truncated = false;

        let walker = walkdir::WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && (is_denied_dir(&name) || name.starts_with('.')))
            });

        'outer: for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue; // skip binary files
            };
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{}:{}: {}", rel, idx + 1, line.trim_end()));
                    if matches.len() >= MAX_MATCHES {
                        truncated = true;
                        break 'outer;
                    }
                }
            }
        }

        let mut text = matches.join("\n");
        if truncated {
            text.push_str("\n... (truncated)");
        }
        if text.is_empty() {
            text = "no matches".to_string();
        }
        Ok(ToolResult::ok(text))
    }
}

fn default_dot() -> String {
    ".".to_string()
}
