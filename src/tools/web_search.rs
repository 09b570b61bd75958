//! Web search with a Tavily → Brave → DuckDuckGo fallback chain.
//!
//! Each provider either produces a formatted result block or bows out with
//! `None`; the first hit wins. Snippets are stripped of HTML before they
//! reach the model.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::tools::ToolContext;

pub const NAME: &str = "web_search";

const MAX_RESULTS: usize = 5;
const SNIPPET_MAX_LEN: usize = 500;

pub fn definition() -> (&'static str, &'static str, Value) {
    (
        NAME,
        "Search the web for current information. Use for weather, news, \
         prices, recent events, or anything requiring up-to-date data.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query",
                },
            },
            "required": ["query"],
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct Args {
    pub query: String,
}

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static HTML_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#x[0-9a-fA-F]+;|&[a-z]+;").unwrap());

fn clean_html(text: &str) -> String {
    let text = HTML_TAG_RE.replace_all(text, "");
    HTML_ENTITY_RE.replace_all(&text, "").trim().to_string()
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub async fn execute(ctx: &ToolContext, args: Args) -> Result<String> {
    let query = args.query.trim();
    if query.is_empty() {
        return Ok("Error: no search query provided.".to_string());
    }

    let mut result = None;
    if !ctx.tavily_api_key.is_empty() {
        result = search_tavily(ctx, query).await;
    }
    if result.is_none() && !ctx.brave_api_key.is_empty() {
        result = search_brave(ctx, query).await;
    }
    if result.is_none() {
        result = search_duckduckgo(ctx, query).await;
    }

    Ok(result.unwrap_or_else(|| {
        format!("Web search failed for '{query}'. All search providers returned no results.")
    }))
}

async fn search_tavily(ctx: &ToolContext, query: &str) -> Option<String> {
    let resp = ctx
        .http
        .post("https://api.tavily.com/search")
        .header("X-API-Key", &ctx.tavily_api_key)
        .json(&json!({
            "query": query,
            "max_results": MAX_RESULTS,
            "include_answer": true,
        }))
        .send()
        .await
        .and_then(|r| r.error_for_status());
    let data: Value = match resp {
        Ok(resp) => resp.json().await.ok()?,
        Err(e) => {
            warn!("Tavily search failed: {e}");
            return None;
        }
    };

    let mut lines = vec![format!("Web search results for '{query}':")];

    // Tavily can return a direct answer, which is gold for factual queries.
    let answer = data["answer"].as_str().unwrap_or_default();
    if !answer.is_empty() {
        lines.push(format!("Direct answer: {answer}"));
        lines.push(String::new());
    }

    let results = data["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() && answer.is_empty() {
        return None;
    }

    for (i, r) in results.iter().take(MAX_RESULTS).enumerate() {
        let title = clean_html(r["title"].as_str().unwrap_or("No title"));
        let url = r["url"].as_str().unwrap_or_default();
        let snippet = clean_html(r["content"].as_str().unwrap_or_default());
        lines.push(format!("{}. {title} ({url})", i + 1));
        if !snippet.is_empty() {
            lines.push(format!("   {}", truncate(&snippet, SNIPPET_MAX_LEN)));
        }
    }

    info!("Tavily: {} results for '{}'", results.len(), truncate(query, 60));
    Some(lines.join("\n"))
}

async fn search_brave(ctx: &ToolContext, query: &str) -> Option<String> {
    let resp = ctx
        .http
        .get("https://api.search.brave.com/res/v1/web/search")
        .query(&[("q", query), ("count", &MAX_RESULTS.to_string())])
        .header("X-Subscription-Token", &ctx.brave_api_key)
        .header("Accept", "application/json")
        .send()
        .await
        .and_then(|r| r.error_for_status());
    let data: Value = match resp {
        Ok(resp) => resp.json().await.ok()?,
        Err(e) => {
            warn!("Brave search failed: {e}");
            return None;
        }
    };

    let mut lines = vec![format!("Web search results for '{query}':")];

    // Brave infobox carries structured facts (market cap, population, ...).
    let infobox = &data["infobox"];
    if infobox.is_object() {
        if let Some(title) = infobox["title"].as_str() {
            lines.push(format!("Infobox: {title}"));
        }
        let desc = clean_html(infobox["description"].as_str().unwrap_or_default());
        if !desc.is_empty() {
            lines.push(format!("  {}", truncate(&desc, SNIPPET_MAX_LEN)));
        }
        for fact in infobox["facts"].as_array().unwrap_or(&Vec::new()).iter().take(8) {
            lines.push(format!(
                "  {}: {}",
                fact["label"].as_str().unwrap_or_default(),
                clean_html(fact["value"].as_str().unwrap_or_default())
            ));
        }
    }

    let results = data["web"]["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() && !infobox.is_object() {
        return None;
    }

    for (i, r) in results.iter().take(MAX_RESULTS).enumerate() {
        let title = clean_html(r["title"].as_str().unwrap_or("No title"));
        let url = r["url"].as_str().unwrap_or_default();
        let desc = clean_html(r["description"].as_str().unwrap_or_default());
        lines.push(format!("{}. {title} ({url})", i + 1));
        if !desc.is_empty() {
            lines.push(format!("   {}", truncate(&desc, SNIPPET_MAX_LEN)));
        }
    }

    info!("Brave: {} results for '{}'", results.len(), truncate(query, 60));
    Some(lines.join("\n"))
}

async fn search_duckduckgo(ctx: &ToolContext, query: &str) -> Option<String> {
    let resp = ctx
        .http
        .get("https://api.duckduckgo.com/")
        .query(&[("q", query), ("format", "json"), ("no_html", "1")])
        .send()
        .await
        .and_then(|r| r.error_for_status());
    let data: Value = match resp {
        Ok(resp) => resp.json().await.ok()?,
        Err(e) => {
            warn!("DuckDuckGo search failed: {e}");
            return None;
        }
    };

    let mut lines = vec![format!("Web search results for '{query}':")];
    let mut count = 0;

    let abstract_text = data["AbstractText"].as_str().unwrap_or_default();
    if !abstract_text.is_empty() {
        lines.push(format!(
            "Direct answer: {}",
            truncate(abstract_text, SNIPPET_MAX_LEN)
        ));
        count += 1;
    }

    for topic in data["RelatedTopics"]
        .as_array()
        .unwrap_or(&Vec::new())
        .iter()
        .take(MAX_RESULTS)
    {
        let text = clean_html(topic["Text"].as_str().unwrap_or_default());
        let url = topic["FirstURL"].as_str().unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        count += 1;
        lines.push(format!(
            "{count}. {} ({url})",
            truncate(&text, SNIPPET_MAX_LEN)
        ));
    }

    if count == 0 {
        return None;
    }
    info!("DuckDuckGo: {} results for '{}'", count, truncate(query, 60));
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_stripped_from_snippets() {
        assert_eq!(clean_html("<b>Austin</b> weather &amp; news"), "Austin weather  news");
        assert_eq!(clean_html("plain"), "plain");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }

    #[tokio::test]
    async fn empty_query_is_an_error_string_not_an_err() {
        let ctx = ToolContext {
            http: reqwest::Client::new(),
            tavily_api_key: String::new(),
            brave_api_key: String::new(),
        };
        let out = execute(&ctx, Args { query: "  ".into() }).await.unwrap();
        assert_eq!(out, "Error: no search query provided.");
    }
}
