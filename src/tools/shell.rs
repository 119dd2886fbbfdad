use super::{Tool, ToolContext, ToolKind, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Platform shell and flag for command execution.
pub fn default_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

const MAX_OUTPUT_CHARS: usize = 10_000;

pub struct RunCommand;

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. Use for builds, tests, and inspection. Runs with a timeout; the exit code is reported, not judged."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Command to execute"},
                "timeout_secs": {"type": "integer", "default": 60}
            },
            "required": ["command"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Command
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        #[derive(Deserialize)]
        struct Args {
            command: String,
            #[serde(default = "default_timeout")]
            timeout_secs: u64,
        }
        fn default_timeout() -> u64 {
            60
        }

        let args: Args = serde_json::from_value(args)?;

        let (shell, flag) = default_shell();
        let mut cmd = tokio::process::Command::new(shell);
        // kill_on_drop delivers SIGKILL when the timeout drops the future.
        cmd.kill_on_drop(true);
        cmd.arg(flag).arg(&args.command);
        cmd.current_dir(&ctx.cwd);

        let output =
            tokio::time::timeout(Duration::from_secs(args.timeout_secs), cmd.output()).await;

        let (exit_code, stdout, stderr, timed_out) = match output {
            Ok(Ok(output)) => (
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                false,
            ),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => (
                -1,
                String::new(),
                format!("command timed out after {}s", args.timeout_secs),
                true,
            ),
        };

        let text = format!(
            "exit_code: {}\nstdout:\n{}\nstderr:\n{}",
            exit_code,
            truncate(&stdout),
            truncate(&stderr)
        );

        // Nonzero exit is data for the Reviewer, not a tool failure; only
        // a timeout is surfaced as a recoverable error.
        let result = if timed_out {
            ToolResult {
                text: text.clone(),
                error: Some(text),
                modified_files: Vec::new(),
            }
        } else {
            ToolResult::ok(text)
        };
        Ok(result)
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > MAX_OUTPUT_CHARS {
        let truncated: String = s.chars().take(MAX_OUTPUT_CHARS).collect();
        format!("{}\n... (truncated)", truncated)
    } else {
        s.to_string()
    }
}
