//! Scripted provider and fixtures shared by the scenario tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use maestro::api::types::{ChatOutcome, ChatRequest, StreamChunk, ToolCall};
use maestro::api::Provider;
use maestro::catalog::{ExecutionHistory, ModelSelector};
use maestro::conductor::{Conductor, StaticProviderPool};
use maestro::config::Config;
use maestro::errors::ProviderError;

/// A provider that replays a fixed script of responses.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ChatOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatOutcome>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn backend(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Network("script exhausted".to_string()))
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatOutcome, ProviderError> {
        let outcome = self.chat(request).await?;
        let _ = sink.send(StreamChunk::Content(outcome.text.clone())).await;
        let _ = sink.send(StreamChunk::Done).await;
        Ok(outcome)
    }
}

/// Response with text only.
pub fn text(content: &str) -> ChatOutcome {
    ChatOutcome {
        text: content.to_string(),
        tool_calls: Vec::new(),
    }
}

/// Response carrying one structured tool call.
pub fn call(name: &str, args: serde_json::Value) -> ChatOutcome {
    ChatOutcome {
        text: String::new(),
        tool_calls: vec![ToolCall::new(name, args)],
    }
}

/// Response with text plus one tool call.
pub fn text_and_call(content: &str, name: &str, args: serde_json::Value) -> ChatOutcome {
    ChatOutcome {
        text: content.to_string(),
        tool_calls: vec![ToolCall::new(name, args)],
    }
}

/// A Conductor wired to the scripted provider, with all state dirs under
/// a temp dir.
pub fn conductor_with(
    provider: Arc<ScriptedProvider>,
    state_dir: &std::path::Path,
) -> Conductor {
    let mut config = Config::default();
    config.backend = "scripted".to_string();
    config.model = "scripted-model".to_string();
    config.state_dir = Some(state_dir.to_path_buf());

    let provider: Arc<dyn Provider> = provider;
    let pool = StaticProviderPool::new().with("scripted", provider);
    let selector = ModelSelector::new(config.effective_catalog(), ExecutionHistory::ephemeral());
    Conductor::new(Arc::new(pool), selector, config)
}
