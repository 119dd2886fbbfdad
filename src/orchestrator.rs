//! Orchestrator loop
//!
//! Drives a single worker model through tool cycles until it produces a
//! terminal response. The loop is stateless between calls: it borrows the
//! Provider and the tool registry and mutates nothing globally except
//! through the registry's tools.

use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::analyzer::Intent;
use crate::api::types::{ChatRequest, Message, ToolCall};
use crate::api::{is_builtin_tool, BuiltinHost, Provider};
use crate::cancel::CancelFlag;
use crate::errors::{MaestroError, Result};
use crate::loop_detector::LoopDetector;
use crate::output;
use crate::tool_parser::parse_tool_calls;
use crate::tools::{ToolContext, ToolRegistry};

/// Inputs for one orchestrator run.
pub struct OrchestratorRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub model_id: String,
    pub intent: Intent,
    /// Files the Editor may mutate. Empty disables the guard.
    pub allowed_files: Vec<String>,
    pub cwd: PathBuf,
}

/// How a run ended: terminal assistant text, or a loop-detector stop
/// carrying the most recent relevant tool output.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    pub text: String,
    pub modified_files: Vec<PathBuf>,
    pub loop_reason: Option<String>,
    pub iterations: usize,
    /// The last `run_command` tool frame, kept for error classification:
    /// the recovery contract classifies the Reviewer's prose combined
    /// with the raw command output.
    pub last_command_output: Option<String>,
}

impl OrchestratorOutcome {
    pub fn stopped_by_loop(&self) -> bool {
        self.loop_reason.is_some()
    }
}

pub struct Orchestrator<'a> {
    provider: &'a dyn Provider,
    tools: &'a ToolRegistry,
    builtin_host: Option<&'a dyn BuiltinHost>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(provider: &'a dyn Provider, tools: &'a ToolRegistry) -> Self {
        Self {
            provider,
            tools,
            builtin_host: None,
        }
    }

    pub fn with_builtin_host(mut self, host: &'a dyn BuiltinHost) -> Self {
        self.builtin_host = Some(host);
        self
    }

    pub async fn run(
        &self,
        request: OrchestratorRequest,
        cancel: &CancelFlag,
    ) -> Result<OrchestratorOutcome> {
        let mut messages = request.messages;
        let mut detector = LoopDetector::new(request.intent);
        let mut modified_files: Vec<PathBuf> = Vec::new();
        let mut last_tool_output: Option<String> = None;
        let mut last_command_output: Option<String> = None;
        let ctx = ToolContext::new(&request.cwd);
        let tool_defs = self.tools.definitions();

        loop {
            if cancel.is_cancelled() {
                return Err(MaestroError::Cancelled);
            }

            if let Some(signal) = detector.begin_iteration() {
                let reason = signal.reason();
                info!(%reason, "loop detector stopped the run");
                return Ok(OrchestratorOutcome {
                    text: last_tool_output.unwrap_or_default(),
                    modified_files,
                    loop_reason: Some(reason),
                    iterations: detector.iterations(),
                    last_command_output,
                });
            }

            let chat = ChatRequest::new(request.system_prompt.as_str(), request.model_id.as_str())
                .with_messages(messages.clone())
                .with_tools(tool_defs.clone())
                .with_intent(request.intent);
            let response = self.provider.chat(chat).await.map_err(MaestroError::from)?;

            // Normalize: providers without structured tool calls encode
            // them in the assistant text.
            let mut tool_calls = response.tool_calls.clone();
            let mut text = response.text.clone();
            if tool_calls.is_empty() {
                let parsed = parse_tool_calls(&response.text);
                for error in &parsed.errors {
                    warn!("tool parse error: {}", error);
                }
                if !parsed.calls.is_empty() {
                    debug!("extracted {} tool calls from text", parsed.calls.len());
                    text = parsed.text;
                    tool_calls = parsed
                        .calls
                        .into_iter()
                        .map(|c| ToolCall::new(c.name, c.arguments))
                        .collect();
                }
            }

            if tool_calls.is_empty() {
                return Ok(OrchestratorOutcome {
                    text: response.text,
                    modified_files,
                    loop_reason: None,
                    iterations: detector.iterations(),
                    last_command_output,
                });
            }

            messages.push(Message::assistant_with_calls(text.clone(), tool_calls.clone()));

            for call in &tool_calls {
                if cancel.is_cancelled() {
                    return Err(MaestroError::Cancelled);
                }

                if let Some(signal) =
                    detector.record_tool_call(&call.name, &call.arguments, &request.cwd)
                {
                    let reason = signal.reason();
                    info!(%reason, tool = %call.name, "loop detector stopped the run");
                    return Ok(OrchestratorOutcome {
                        text: last_tool_output.unwrap_or_default(),
                        modified_files,
                        loop_reason: Some(reason),
                        iterations: detector.iterations(),
                        last_command_output,
                    });
                }

                output::tool_call(&call.name);
                let frame = self
                    .dispatch(call, &ctx, &request.allowed_files, &mut detector, &mut modified_files)
                    .await;
                last_tool_output = Some(frame.clone());
                if call.name == "run_command" {
                    last_command_output = Some(frame.clone());
                }
                messages.push(Message::tool(frame, &call.id));
            }

            detector.escalate_if_stalled();

            if let Some(signal) = detector.record_response(&text) {
                let reason = signal.reason();
                info!(%reason, "loop detector stopped the run");
                return Ok(OrchestratorOutcome {
                    text: last_tool_output.unwrap_or_default(),
                    modified_files,
                    loop_reason: Some(reason),
                    iterations: detector.iterations(),
                    last_command_output,
                });
            }
        }
    }

    /// Execute one tool call and render its result frame. Errors never
    /// escape: they become frame text so the model can recover.
    async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        allowed_files: &[String],
        detector: &mut LoopDetector,
        modified_files: &mut Vec<PathBuf>,
    ) -> String {
        // Built-in tools run on their hosting provider, never locally.
        if is_builtin_tool(&call.name) {
            return match self.builtin_host {
                Some(host) => match host.invoke_builtin(call).await {
                    Ok(text) => {
                        output::tool_success(&call.name);
                        text
                    }
                    Err(e) => {
                        output::tool_failure(&call.name, &e.to_string());
                        format!("error: {}", e)
                    }
                },
                None => format!("error: built-in tool '{}' has no hosting provider", call.name),
            };
        }

        let Some(tool) = self.tools.get(&call.name) else {
            output::tool_failure(&call.name, "unknown tool");
            return format!("error: unknown tool '{}'", call.name);
        };

        if let Some(rejection) = check_allowed(&call.name, &call.arguments, allowed_files) {
            output::tool_failure(&call.name, &rejection);
            return rejection;
        }

        match self
            .tools
            .execute(&call.name, call.arguments.clone(), ctx)
            .await
        {
            Ok(result) => {
                detector.note_tool_kind(tool.kind());
                modified_files.extend(result.modified_files.iter().cloned());
                if result.is_error() {
                    output::tool_failure(&call.name, result.error.as_deref().unwrap_or(""));
                } else {
                    output::tool_success(&call.name);
                }
                result.text
            }
            Err(e) => {
                output::tool_failure(&call.name, &e.to_string());
                format!("error: {}", e)
            }
        }
    }
}

/// The Editor's allowed-files guard for mutating file tools. Returns a
/// corrective message when the requested path is outside the plan; the
/// model gets a chance to retry against an allowed path. An empty allowed
/// list disables the guard.
pub fn check_allowed(tool_name: &str, args: &Value, allowed: &[String]) -> Option<String> {
    if allowed.is_empty() || !matches!(tool_name, "write_file" | "apply_patch") {
        return None;
    }
    let path = args.get("path").and_then(|p| p.as_str()).unwrap_or("");
    if path_allowed(allowed, path) {
        return None;
    }
    let rejection = crate::errors::ToolError::PathNotAllowed {
        path: path.to_string(),
    };
    Some(format!(
        "error: {}. Allowed: {}. Re-issue the call against one of those paths.",
        rejection,
        allowed.join(", ")
    ))
}

/// Exact, suffix, or substring match against the allowed list.
pub fn path_allowed(allowed: &[String], path: &str) -> bool {
    allowed.iter().any(|entry| {
        path == entry.as_str()
            || path.ends_with(entry.as_str())
            || entry.ends_with(path)
            || path.contains(entry.as_str())
            || entry.contains(path)
    })
}
