//! Notes search tool — stub over a small fixed set.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

pub const NAME: &str = "search_notes";

pub fn definition() -> (&'static str, &'static str, Value) {
    (
        NAME,
        "Search your personal notes for saved information, lists, and reminders.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search term to find in notes.",
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

const NOTES: &[(&str, &str)] = &[
    (
        "shopping",
        "Shopping list (Feb 15):\n- Oat milk\n- Avocados\n- Sourdough bread\n- Dark chocolate\n- Olive oil",
    ),
    (
        "recipe",
        "Pasta recipe:\n1. Boil water, cook spaghetti 8 min\n2. Saute garlic in olive oil\n3. Add crushed tomatoes, basil, salt\n4. Toss pasta, top with parmesan",
    ),
    (
        "ideas",
        "Project ideas:\n- Build a voice assistant with tool calling\n- Automate home lighting with HomeKit\n- Learn Rust by building a CLI tool",
    ),
];

pub async fn execute(args: Args) -> Result<String> {
    let query = args.query.to_lowercase();
    let matches: Vec<&str> = NOTES
        .iter()
        .filter(|(key, content)| key.contains(&query) || content.to_lowercase().contains(&query))
        .map(|(_, content)| *content)
        .collect();

    if matches.is_empty() {
        Ok(format!("No notes found matching '{}'.", args.query))
    } else {
        Ok(format!(
            "Notes matching '{}':\n\n{}",
            args.query,
            matches.join("\n\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_matches_note_keys_and_bodies() {
        let out = execute(Args {
            query: "shopping".into(),
        })
        .await
        .unwrap();
        assert!(out.contains("Oat milk"));

        let out = execute(Args {
            query: "HomeKit".into(),
        })
        .await
        .unwrap();
        assert!(out.contains("Project ideas"));
    }

    #[tokio::test]
    async fn no_match_reports_cleanly() {
        let out = execute(Args {
            query: "zzz-nothing".into(),
        })
        .await
        .unwrap();
        assert!(out.starts_with("No notes found"));
    }
}
