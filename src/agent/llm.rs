//! LLM provider clients.
//!
//! The tool-calling loop runs against the local model host (Ollama's
//! non-streaming `/api/chat` with function-calling schemas). Hosted
//! providers — Claude and OpenAI — are plain completion backends selected
//! per connection; they answer without tools, which keeps their protocol
//! surface to a single POST each.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::Config;

/// One conversation message in the model host's chat shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::plain("tool", content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls: Some(tool_calls),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }
}

/// A structured tool invocation from the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// OpenAI-format function definition handed to the model host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One progress frame from a streaming model pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

/// Client for the local model host.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Non-streaming chat completion with optional tool schemas.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        enable_thinking: bool,
    ) -> Result<ChatMessage> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(tools) = tools {
            body["tools"] = json!(tools);
        }
        if !enable_thinking {
            body["think"] = json!(false);
        }

        debug!(
            "model host request: model={}, {} messages, {} tools",
            model,
            messages.len(),
            tools.map_or(0, |t| t.len())
        );

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("chat request to {} failed", self.base_url))?;
        let parsed: ChatResponse = resp.json().await.context("malformed chat response")?;
        Ok(parsed.message)
    }

    /// Installed models, with `:latest` aliases normalized in.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("cannot reach model host at {}", self.base_url))?;
        let tags: TagsResponse = resp.json().await.context("malformed tags response")?;

        let mut names = Vec::new();
        for model in tags.models {
            if let Some(stripped) = model.name.strip_suffix(":latest") {
                names.push(stripped.to_string());
            }
            names.push(model.name);
        }
        Ok(names)
    }

    /// Reachability probe.
    pub async fn is_online(&self) -> bool {
        self.http
            .get(format!("{}/api/version", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Stream a model pull, invoking `on_progress` per JSON-line frame.
    /// The callback returns `false` to stop forwarding (e.g. the client
    /// socket closed); the pull keeps no other state.
    pub async fn pull<F>(&self, model: &str, mut on_progress: F) -> Result<()>
    where
        F: FnMut(PullProgress) -> bool,
    {
        // Pulls can take many minutes; this client carries no timeout.
        let http = reqwest::Client::new();
        let resp = http
            .post(format!("{}/api/pull", self.base_url))
            .json(&json!({"name": model, "stream": true}))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("pull request failed")?;

        let mut stream = resp.bytes_stream();
        let mut buf = Vec::new();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("pull stream interrupted")?;
            buf.extend_from_slice(&chunk);
            while let Some(newline) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(progress) = serde_json::from_str::<PullProgress>(line) {
                    if !on_progress(progress) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Which backend answers a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "claude" => Some(Self::Claude),
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub name: String,
}

/// Providers usable with the current configuration. Ollama is always
/// listed — there is no cheap pre-check beyond the online probe.
pub fn available_providers(cfg: &Config) -> Vec<ProviderInfo> {
    let mut providers = Vec::new();
    if !cfg.anthropic_api_key.is_empty() {
        providers.push(ProviderInfo {
            id: "claude",
            name: "Claude Haiku".to_string(),
        });
    }
    if !cfg.openai_api_key.is_empty() {
        providers.push(ProviderInfo {
            id: "openai",
            name: format!("OpenAI ({})", cfg.openai_model),
        });
    }
    providers.push(ProviderInfo {
        id: "ollama",
        name: format!("Ollama ({})", cfg.ollama_model),
    });
    providers
}

/// Pick the default provider: explicit config first, else the first one
/// with credentials (Claude > OpenAI > Ollama).
pub fn default_provider(cfg: &Config) -> ProviderKind {
    if let Some(kind) = ProviderKind::parse(&cfg.llm_provider) {
        return kind;
    }
    if !cfg.anthropic_api_key.is_empty() {
        ProviderKind::Claude
    } else if !cfg.openai_api_key.is_empty() {
        ProviderKind::OpenAi
    } else {
        ProviderKind::Ollama
    }
}

/// Plain (tool-less) completion against a hosted provider.
pub async fn generate_simple(
    cfg: &Config,
    provider: ProviderKind,
    system: &str,
    messages: &[ChatMessage],
) -> Result<String> {
    // Tool-role bookkeeping stays local; hosted providers only see turns.
    let turns: Vec<Value> = messages
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .filter(|m| !m.content.is_empty())
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    let http = reqwest::Client::builder()
        .timeout(cfg.chat_timeout)
        .build()
        .unwrap_or_default();

    match provider {
        ProviderKind::Claude => {
            let resp = http
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", &cfg.anthropic_api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&json!({
                    "model": "claude-haiku-4-5",
                    "max_tokens": 300,
                    "system": system,
                    "messages": turns,
                }))
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .context("Claude request failed")?;
            let body: Value = resp.json().await?;
            let text = body["content"][0]["text"].as_str().unwrap_or_default();
            info!("Claude response: {} chars", text.len());
            Ok(text.to_string())
        }
        ProviderKind::OpenAi => {
            let mut all = vec![json!({"role": "system", "content": system})];
            all.extend(turns);
            let resp = http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&cfg.openai_api_key)
                .json(&json!({
                    "model": cfg.openai_model,
                    "max_tokens": 300,
                    "messages": all,
                }))
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .context("OpenAI request failed")?;
            let body: Value = resp.json().await?;
            let text = body["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default();
            info!("OpenAI response ({}): {} chars", cfg.openai_model, text.len());
            Ok(text.to_string())
        }
        ProviderKind::Ollama => bail!("ollama turns go through the orchestrator loop"),
    }
}
