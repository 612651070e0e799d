pub mod anthropic;
pub mod error;
pub mod json;

use serde::Serialize;

/// Output of a tool run before the model call, handed to the model as extra context.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub name: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Pipeline stage issuing the call; used for diagnostics only.
    pub stage: &'static str,
    pub system: String,
    pub prompt: String,
    pub tool_outputs: Vec<ToolOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

/// The reasoning capability: prompt (plus tool outputs) in, free-form text out.
#[async_trait::async_trait]
pub trait ReasoningClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String>;
}
