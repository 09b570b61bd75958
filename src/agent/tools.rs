//! Tool dispatch — routes model tool calls to their executors.
//!
//! The contract is narrow: `dispatch` always returns a string and never
//! fails. Bad arguments, unknown names, executor errors, even panics all
//! come back as error strings for the model to read and react to.

use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tracing::{error, info};

use crate::agent::llm::{FunctionDefinition, ToolDefinition};
use crate::config::Config;
use crate::tools::{calendar, notes, web_search};

/// Names the dispatcher knows, in catalog order.
pub const KNOWN_TOOLS: &[&str] = &[web_search::NAME, calendar::NAME, notes::NAME];

/// Shared state handed to executors.
#[derive(Clone)]
pub struct ToolContext {
    pub http: reqwest::Client,
    pub tavily_api_key: String,
    pub brave_api_key: String,
}

impl ToolContext {
    pub fn new(cfg: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.search_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            tavily_api_key: cfg.tavily_api_key.clone(),
            brave_api_key: cfg.brave_api_key.clone(),
        }
    }
}

/// Function-calling schemas for every registered tool.
pub fn schemas() -> Vec<ToolDefinition> {
    [
        web_search::definition(),
        calendar::definition(),
        notes::definition(),
    ]
    .into_iter()
    .map(|(name, description, parameters)| ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    })
    .collect()
}

/// Execute a tool call by name. Always returns a string, never fails.
///
/// `args` may arrive as a mapping or as a JSON-encoded string — some
/// models double-encode their arguments.
pub async fn dispatch(name: &str, args: Value, ctx: &ToolContext) -> String {
    let args = match args {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => parsed,
            Err(_) => {
                return format!(
                    "Error: invalid JSON arguments for tool '{name}': {}",
                    &raw[..raw.len().min(200)]
                )
            }
        },
        other => other,
    };
    let args = if args.is_object() {
        args
    } else {
        Value::Object(Default::default())
    };

    let outcome = AssertUnwindSafe(run_tool(name, args, ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(result)) => {
            info!("tool '{}' returned {} chars", name, result.len());
            result
        }
        Ok(Err(message)) => message,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!("tool '{}' panicked: {}", name, detail);
            format!("Error executing '{name}': panic: {detail}")
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(name: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args)
        .map_err(|e| format!("Error: invalid arguments for '{name}': {e}"))
}

async fn run_tool(name: &str, args: Value, ctx: &ToolContext) -> Result<String, String> {
    let result = match name {
        web_search::NAME => web_search::execute(ctx, parse_args(name, args)?).await,
        calendar::NAME => calendar::execute(parse_args(name, args)?).await,
        notes::NAME => notes::execute(parse_args(name, args)?).await,
        _ => {
            return Err(format!(
                "Error: unknown tool '{name}'. Available tools: {}",
                KNOWN_TOOLS.join(", ")
            ))
        }
    };

    result.map_err(|e| {
        error!("tool '{}' failed: {:#}", name, e);
        format!("Error executing '{name}': {e:#}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext {
            http: reqwest::Client::new(),
            tavily_api_key: String::new(),
            brave_api_key: String::new(),
        }
    }

    #[tokio::test]
    async fn unknown_tool_lists_known_names() {
        let out = dispatch("frobnicate", json!({}), &ctx()).await;
        assert!(out.starts_with("Error: unknown tool 'frobnicate'"));
        for name in KNOWN_TOOLS {
            assert!(out.contains(name), "missing {name} in {out}");
        }
    }

    #[tokio::test]
    async fn string_encoded_arguments_are_parsed() {
        let out = dispatch(notes::NAME, json!("{\"query\": \"recipe\"}"), &ctx()).await;
        assert!(out.contains("Pasta"), "got: {out}");
    }

    #[tokio::test]
    async fn malformed_string_arguments_become_an_error_string() {
        let out = dispatch(notes::NAME, json!("{not json"), &ctx()).await;
        assert!(out.starts_with("Error: invalid JSON arguments"));
    }

    #[tokio::test]
    async fn missing_required_argument_is_a_validation_error() {
        let out = dispatch(notes::NAME, json!({}), &ctx()).await;
        assert!(out.starts_with("Error: invalid arguments for 'search_notes'"));
    }

    #[tokio::test]
    async fn calendar_defaults_its_date() {
        let out = dispatch(calendar::NAME, json!({}), &ctx()).await;
        assert!(out.contains("Team standup"));
    }

    #[test]
    fn schemas_cover_every_known_tool() {
        let schemas = schemas();
        assert_eq!(schemas.len(), KNOWN_TOOLS.len());
        for schema in &schemas {
            assert_eq!(schema.r#type, "function");
            assert!(KNOWN_TOOLS.contains(&schema.function.name.as_str()));
            assert!(schema.function.parameters["type"] == "object");
        }
    }
}
