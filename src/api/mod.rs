//! Provider capability
//!
//! One-shot and streaming chat against an LLM backend, normalized behind
//! the [`Provider`] trait. Heterogeneous tool-call encodings (structured
//! arrays, text markup, error bodies carrying `failed_generation`) are
//! decoded here so the orchestrator only ever sees [`ChatOutcome`].

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub mod types;

use crate::errors::ProviderError;
use crate::tool_parser::parse_tool_calls;
use types::{ChatOutcome, ChatRequest, Message, StreamChunk, ToolCall};

/// Tools that belong to provider-side infrastructure rather than the local
/// registry. The orchestrator dispatches these back to their hosting
/// provider by name.
pub const BUILTIN_TOOL_NAMES: &[&str] = &["web_search", "code_interpreter"];

pub fn is_builtin_tool(name: &str) -> bool {
    BUILTIN_TOOL_NAMES.contains(&name)
}

/// Chat capability contract. Implementations are HTTP drivers; tests
/// script the trait directly.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier of the backend this provider talks to (e.g. "groq").
    fn backend(&self) -> &str;

    /// One-shot chat completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, ProviderError>;

    /// Streaming chat; chunks go to `sink`, the assembled outcome is
    /// returned once the stream ends.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatOutcome, ProviderError>;
}

/// Hosts provider-side built-in tools (`web_search` and friends).
#[async_trait]
pub trait BuiltinHost: Send + Sync {
    async fn invoke_builtin(&self, call: &ToolCall) -> Result<String, ProviderError>;
}

/// Credential lookup: `<BACKEND>_API_KEY` with the backend name uppercased.
pub fn api_key_for(backend: &str) -> Option<String> {
    std::env::var(format!("{}_API_KEY", backend.to_uppercase())).ok()
}

// ---------------------------------------------------------------------------
// OpenAI-compatible wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireToolDef>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    compound_custom: Option<CompoundCustom>,
}

/// Some backends declare their built-in tools through a side channel
/// instead of the main `tools` array.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct CompoundCustom {
    tools: CompoundTools,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CompoundTools {
    enabled_tools: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireToolDef {
    #[serde(rename = "type")]
    def_type: &'static str,
    function: WireFunctionDef,
}

#[derive(Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn to_wire_messages(request: &ChatRequest) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(request.messages.len() + 1);
    wire.push(WireMessage {
        role: "system".to_string(),
        content: request.system_prompt.clone(),
        tool_calls: None,
        tool_call_id: None,
    });
    for message in &request.messages {
        wire.push(WireMessage {
            role: message.role.clone(),
            content: message.content.clone(),
            tool_calls: message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        call_type: "function".to_string(),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: message.tool_call_id.clone(),
        });
    }
    wire
}

fn from_wire_call(wire: &WireToolCall) -> ToolCall {
    let arguments = serde_json::from_str(&wire.function.arguments)
        .unwrap_or_else(|_| Value::String(wire.function.arguments.clone()));
    ToolCall {
        id: wire.id.clone(),
        name: wire.function.name.clone(),
        arguments,
    }
}

/// Mine an HTTP error body for `failed_generation` content with embedded
/// tool calls. Some backends report parser-side failures this way, with
/// the would-be assistant turn attached.
pub(crate) fn mine_failed_generation(body: &str) -> Option<ChatOutcome> {
    let json: Value = serde_json::from_str(body).ok()?;
    let failed = json
        .get("error")
        .and_then(|e| e.get("failed_generation"))
        .or_else(|| json.get("failed_generation"))?
        .as_str()?;
    let parsed = parse_tool_calls(failed);
    if parsed.calls.is_empty() {
        return None;
    }
    Some(ChatOutcome {
        text: parsed.text,
        tool_calls: parsed
            .calls
            .into_iter()
            .map(|c| ToolCall::new(c.name, c.arguments))
            .collect(),
    })
}

/// Accumulates incremental tool-call deltas from an SSE stream into
/// complete calls, keyed by index.
#[derive(Default)]
struct ToolCallAccumulator {
    pending: std::collections::BTreeMap<usize, (String, String, String)>, // (id, name, args)
}

impl ToolCallAccumulator {
    fn push(&mut self, delta: &WireToolCallDelta) {
        let entry = self
            .pending
            .entry(delta.index)
            .or_insert_with(|| (String::new(), String::new(), String::new()));
        if let Some(id) = &delta.id {
            entry.0 = id.clone();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.1 = name.clone();
            }
            if let Some(args) = &function.arguments {
                entry.2.push_str(args);
            }
        }
    }

    fn flush(self) -> Vec<ToolCall> {
        self.pending
            .into_values()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, args)| {
                let arguments =
                    serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()));
                ToolCall {
                    id: if id.is_empty() {
                        format!("call_{}", uuid::Uuid::new_v4())
                    } else {
                        id
                    },
                    name,
                    arguments,
                }
            })
            .collect()
    }
}

/// OpenAI-compatible HTTP driver.
pub struct HttpProvider {
    client: reqwest::Client,
    backend: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    builtin_tools: Vec<String>,
}

impl HttpProvider {
    pub fn new(
        backend: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let backend = backend.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let api_key = api_key_for(&backend);
        Ok(Self {
            client,
            backend,
            base_url: base_url.into(),
            api_key,
            temperature: 0.2,
            builtin_tools: Vec::new(),
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Declare provider-side built-in tools for the compound request shape.
    pub fn with_builtin_tools(mut self, names: Vec<String>) -> Self {
        self.builtin_tools = names;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> WireRequest {
        WireRequest {
            model: request.model_id.clone(),
            messages: to_wire_messages(request),
            tools: request
                .tools
                .iter()
                .map(|t| WireToolDef {
                    def_type: "function",
                    function: WireFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
            temperature: self.temperature,
            stream,
            compound_custom: if self.builtin_tools.is_empty() {
                None
            } else {
                Some(CompoundCustom {
                    tools: CompoundTools {
                        enabled_tools: self.builtin_tools.clone(),
                    },
                })
            },
        }
    }

    async fn post(&self, body: &WireRequest) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.to_string())
            }
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn backend(&self) -> &str {
        &self.backend
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, ProviderError> {
        let body = self.build_request(&request, false);
        let response = self.post(&body).await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // A 4xx carrying failed_generation may still hold the turn the
            // model meant to produce.
            if let Some(outcome) = mine_failed_generation(&text) {
                debug!("recovered {} tool calls from failed_generation", outcome.tool_calls.len());
                return Ok(outcome);
            }
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                message: text.chars().take(500).collect(),
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response has no choices".to_string()))?;

        Ok(ChatOutcome {
            text: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .iter()
                .map(from_wire_call)
                .collect(),
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatOutcome, ProviderError> {
        let body = self.build_request(&request, true);
        let response = self.post(&body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Some(outcome) = mine_failed_generation(&text) {
                return Ok(outcome);
            }
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                message: text.chars().take(500).collect(),
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::default();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);

                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data.trim() == "[DONE]" {
                        continue;
                    }
                    let Ok(chunk) = serde_json::from_str::<WireStreamChunk>(data) else {
                        warn!("unparseable stream chunk: {}", data);
                        continue;
                    };
                    for choice in &chunk.choices {
                        if let Some(text) = &choice.delta.content {
                            content.push_str(text);
                            let _ = sink.send(StreamChunk::Content(text.clone())).await;
                        }
                        if let Some(deltas) = &choice.delta.tool_calls {
                            for delta in deltas {
                                accumulator.push(delta);
                            }
                        }
                        if choice.finish_reason.is_some() {
                            debug!("stream finished: {:?}", choice.finish_reason);
                        }
                    }
                }
            }
        }

        let tool_calls = accumulator.flush();
        for call in &tool_calls {
            let _ = sink.send(StreamChunk::ToolCall(call.clone())).await;
        }
        let _ = sink.send(StreamChunk::Done).await;

        Ok(ChatOutcome { text: content, tool_calls })
    }
}

#[async_trait]
impl BuiltinHost for HttpProvider {
    /// Run a provider-side built-in tool by issuing a compound chat
    /// request that names it; the assistant turn is the tool result.
    async fn invoke_builtin(&self, call: &ToolCall) -> Result<String, ProviderError> {
        let request = ChatRequest::new(
            "Execute the requested built-in tool and return its output.",
            "compound",
        )
        .with_messages(vec![Message::user(format!(
            "{}({})",
            call.name, call.arguments
        ))]);
        let outcome = self.chat(request).await?;
        Ok(outcome.text)
    }
}
