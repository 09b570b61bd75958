//! Conversation orchestrator — the tool-calling loop over the LLM.
//!
//! Owns the per-connection message history. A turn appends the user text,
//! trims, then loops the model host: structured tool calls (or calls the
//! fallback parser digs out of plain text) are dispatched and fed back as
//! tool-role messages until the model produces text, with the final
//! iteration forced tool-less. Hosted providers (Claude/OpenAI) skip the
//! loop and answer with a plain completion.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::llm::{
    self, ChatMessage, FunctionCall, OllamaClient, ProviderKind, ToolCall,
};
use crate::agent::tools::{self, ToolContext};
use crate::config::Config;

/// UI hook invoked as `(tool_name, arguments)` before each dispatch.
pub type ToolCallHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

const APOLOGY: &str = "I wasn't able to complete that request.";

const SYSTEM_TEMPLATE: &str = "You are a helpful voice assistant. Keep responses \
concise: one to three sentences, spoken naturally as in a conversation. Today is \
{date}. The current time is {time}. Use the available tools when a question needs \
current or personal information, and answer from the tool results.";

// Strip <think>...</think> blocks that thinking-capable models leak.
static THINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

// Tool calls emitted as plain text, e.g. `gc_search {"query": "..."}` or
// `search({"query": "..."})`. Single-level braces only.
static TEXT_TOOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)(?:^|['"`\s])(\w+)\s*\(?\s*(\{[^}]*\})\s*\)?"#).unwrap()
});

// Model-invented tool names mapped to registry names.
static TOOL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("gc_search", "web_search"),
        ("search", "web_search"),
        ("web_search", "web_search"),
        ("check_calendar", "check_calendar"),
        ("calendar", "check_calendar"),
        ("get_calendar", "check_calendar"),
        ("search_notes", "search_notes"),
        ("notes", "search_notes"),
        ("get_notes", "search_notes"),
    ])
});

/// Per-connection conversation state and model plumbing.
pub struct Orchestrator {
    cfg: Arc<Config>,
    client: OllamaClient,
    tool_ctx: ToolContext,
    messages: Vec<ChatMessage>,
    active_model: String,
    provider: ProviderKind,
}

impl Orchestrator {
    pub fn new(cfg: Arc<Config>) -> Self {
        let client = OllamaClient::new(&cfg.ollama_url, cfg.chat_timeout);
        let tool_ctx = ToolContext::new(&cfg);
        let provider = llm::default_provider(&cfg);
        Self {
            cfg,
            client,
            tool_ctx,
            messages: Vec::new(),
            active_model: String::new(),
            provider,
        }
    }

    /// A handle on the model-host client for catalog reads and pulls.
    pub fn client(&self) -> OllamaClient {
        self.client.clone()
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn set_provider(&mut self, provider: ProviderKind) {
        self.provider = provider;
    }

    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    /// Switch models. The history is cleared — mixing histories across
    /// models confuses tool-calling behavior.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.active_model = model.into();
        self.clear_history();
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Check which configured model the host actually has: preferred,
    /// else fallback, else none (empty string).
    pub async fn ensure_model(&mut self) -> Result<String> {
        let installed = self.client.list_models().await?;
        if installed.iter().any(|m| m == &self.cfg.ollama_model) {
            self.active_model = self.cfg.ollama_model.clone();
        } else if installed.iter().any(|m| m == &self.cfg.ollama_fallback_model) {
            warn!(
                "preferred model '{}' not found, using fallback '{}'",
                self.cfg.ollama_model, self.cfg.ollama_fallback_model
            );
            self.active_model = self.cfg.ollama_fallback_model.clone();
        } else {
            self.active_model = String::new();
        }
        Ok(self.active_model.clone())
    }

    /// Run one user turn through the tool-calling loop and return the
    /// assistant's final text.
    pub async fn chat(
        &mut self,
        user_input: &str,
        on_tool_call: Option<ToolCallHook>,
    ) -> Result<String> {
        self.messages.push(ChatMessage::user(user_input));
        self.trim_history();

        let system = build_system_prompt();

        if self.provider != ProviderKind::Ollama {
            let reply =
                llm::generate_simple(&self.cfg, self.provider, &system, &self.messages).await?;
            self.messages.push(ChatMessage::assistant(&reply));
            return Ok(reply);
        }

        if self.active_model.is_empty() {
            self.ensure_model().await?;
            if self.active_model.is_empty() {
                bail!(
                    "no model available on the model host; pull one with: ollama pull {}",
                    self.cfg.ollama_model
                );
            }
        }

        let mut all = Vec::with_capacity(self.messages.len() + 1);
        all.push(ChatMessage::system(&system));
        all.extend(self.messages.iter().cloned());
        let schemas = tools::schemas();

        let mut text = String::new();
        for iteration in 0..self.cfg.max_tool_calls_per_turn {
            // On the last iteration, omit tools to force a text answer.
            let is_last = iteration + 1 == self.cfg.max_tool_calls_per_turn;
            let tools_for_call = if is_last { None } else { Some(schemas.as_slice()) };

            let response = self
                .client
                .chat(&self.active_model, &all, tools_for_call, self.cfg.enable_thinking)
                .await?;

            text = strip_thinking(&response.content);
            let mut tool_calls = response.tool_calls.unwrap_or_default();

            if tool_calls.is_empty() && !text.is_empty() {
                let parsed = parse_text_tool_calls(&text);
                if !parsed.is_empty() {
                    info!(
                        "detected {} tool call(s) in text output (fallback parser)",
                        parsed.len()
                    );
                    tool_calls = parsed;
                    // The text was a tool call, not a real response.
                    text.clear();
                }
            }

            if tool_calls.is_empty() {
                if !text.is_empty() {
                    self.messages.push(ChatMessage::assistant(&text));
                }
                return Ok(text);
            }

            let assistant = ChatMessage::assistant_with_tools(&text, tool_calls.clone());
            self.messages.push(assistant.clone());
            all.push(assistant);

            for call in &tool_calls {
                if let Some(hook) = &on_tool_call {
                    hook(&call.function.name, &call.function.arguments);
                }
                let result = tools::dispatch(
                    &call.function.name,
                    call.function.arguments.clone(),
                    &self.tool_ctx,
                )
                .await;
                let message = ChatMessage::tool(result);
                self.messages.push(message.clone());
                all.push(message);
            }
        }

        // The forced tool-less final call should have returned above.
        Ok(if text.is_empty() { APOLOGY.to_string() } else { text })
    }

    /// Trim to `max_history_messages` without stranding a tool message at
    /// the head or splitting an assistant-with-tool_calls group.
    fn trim_history(&mut self) {
        let limit = self.cfg.max_history_messages;
        if self.messages.len() <= limit {
            return;
        }
        let mut cut = self.messages.len() - limit;

        // Never leave orphaned tool results at the new head.
        while cut < self.messages.len() && self.messages[cut].role == "tool" {
            cut += 1;
        }
        // An assistant carrying tool_calls right before the cut comes
        // along, with any tool results it owns.
        if cut > 0 && self.messages[cut - 1].has_tool_calls() {
            cut -= 1;
            while cut > 0 && self.messages[cut - 1].role == "tool" {
                cut -= 1;
                if cut > 0 && self.messages[cut - 1].has_tool_calls() {
                    cut -= 1;
                }
            }
        }

        self.messages.drain(..cut);
    }
}

fn build_system_prompt() -> String {
    let now = chrono::Local::now();
    SYSTEM_TEMPLATE
        .replace("{date}", &now.format("%A, %B %d, %Y").to_string())
        .replace("{time}", &now.format("%I:%M %p").to_string())
}

/// Remove `<think>...</think>` spans and trim.
pub fn strip_thinking(text: &str) -> String {
    THINK_RE.replace_all(text, "").trim().to_string()
}

/// Detect tool calls embedded in plain text output.
///
/// Some models skip the structured protocol and print
/// `gc_search {"query": "weather in Austin"}` instead. Names resolve
/// through the alias table; unknown names and unparsable braces are
/// skipped.
pub fn parse_text_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for caps in TEXT_TOOL_RE.captures_iter(text) {
        let raw_name = caps[1].to_lowercase();
        let Some(&name) = TOOL_ALIASES.get(raw_name.as_str()) else {
            continue;
        };
        let Ok(arguments) = serde_json::from_str::<Value>(&caps[2]) else {
            continue;
        };
        info!("parsed text tool call: {} -> {}", raw_name, name);
        calls.push(ToolCall {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        });
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_group(n_results: usize) -> Vec<ChatMessage> {
        let call = ToolCall {
            function: FunctionCall {
                name: "web_search".into(),
                arguments: json!({"query": "q"}),
            },
        };
        let mut group = vec![ChatMessage::assistant_with_tools("", vec![call])];
        for i in 0..n_results {
            group.push(ChatMessage::tool(format!("result {i}")));
        }
        group
    }

    fn orchestrator_with_limit(limit: usize) -> Orchestrator {
        let mut cfg = Config::default();
        cfg.max_history_messages = limit;
        Orchestrator::new(Arc::new(cfg))
    }

    #[test]
    fn trim_is_a_noop_under_the_limit() {
        let mut orch = orchestrator_with_limit(10);
        orch.messages.push(ChatMessage::user("hi"));
        orch.trim_history();
        assert_eq!(orch.messages.len(), 1);
    }

    #[test]
    fn trim_never_leaves_a_tool_message_at_the_head() {
        let mut orch = orchestrator_with_limit(3);
        orch.messages.push(ChatMessage::user("u0"));
        orch.messages.extend(tool_group(2)); // assistant + 2 tools
        orch.messages.push(ChatMessage::assistant("a"));
        orch.messages.push(ChatMessage::user("u1"));
        // naive cut of len-3 would land on a tool message
        orch.trim_history();
        assert_ne!(orch.messages[0].role, "tool");
        assert!(orch.messages.len() <= 3);
    }

    #[test]
    fn trim_keeps_tool_groups_atomic() {
        for limit in 2..8 {
            let mut orch = orchestrator_with_limit(limit);
            orch.messages.push(ChatMessage::user("u0"));
            orch.messages.extend(tool_group(3));
            orch.messages.push(ChatMessage::assistant("a0"));
            orch.messages.push(ChatMessage::user("u1"));
            orch.messages.extend(tool_group(1));
            orch.messages.push(ChatMessage::assistant("a1"));
            orch.trim_history();

            assert_ne!(orch.messages[0].role, "tool", "limit {limit}");
            // Every tool message must still follow its owning assistant.
            for (i, m) in orch.messages().iter().enumerate() {
                if m.role == "tool" {
                    let prev = &orch.messages()[i - 1];
                    assert!(
                        prev.role == "tool" || prev.has_tool_calls(),
                        "orphaned tool at {i} with limit {limit}"
                    );
                }
            }
        }
    }

    #[test]
    fn strip_thinking_removes_leaked_blocks() {
        assert_eq!(
            strip_thinking("<think>hmm, tools?</think>The weather is sunny."),
            "The weather is sunny."
        );
        assert_eq!(strip_thinking("no blocks here"), "no blocks here");
        assert_eq!(strip_thinking("<think>a\nb\nc</think>"), "");
    }

    #[test]
    fn text_fallback_parses_aliased_calls() {
        let calls = parse_text_tool_calls(r#"gc_search {"query": "weather in Austin"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "web_search");
        assert_eq!(calls[0].function.arguments["query"], "weather in Austin");
    }

    #[test]
    fn text_fallback_handles_paren_syntax_and_unknown_names() {
        let calls = parse_text_tool_calls(r#"calendar({"date": "2026-08-01"})"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "check_calendar");

        assert!(parse_text_tool_calls(r#"frobnicate {"x": 1}"#).is_empty());
        assert!(parse_text_tool_calls("just prose, no calls").is_empty());
    }

    #[test]
    fn text_fallback_skips_malformed_json() {
        assert!(parse_text_tool_calls(r#"search {"query": unquoted}"#).is_empty());
    }

    #[test]
    fn system_prompt_carries_date_and_time() {
        let prompt = build_system_prompt();
        assert!(!prompt.contains("{date}"));
        assert!(!prompt.contains("{time}"));
        let year = chrono::Local::now().format("%Y").to_string();
        assert!(prompt.contains(&year));
    }

    #[test]
    fn set_model_clears_history() {
        let mut orch = orchestrator_with_limit(20);
        orch.messages.push(ChatMessage::user("hello"));
        orch.set_model("qwen3:8b");
        assert!(orch.messages().is_empty());
        assert_eq!(orch.active_model(), "qwen3:8b");
    }
}
