//! Calendar tool — stub with fixed events.
//!
//! Exists to prove multi-tool routing; the events are canned.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

pub const NAME: &str = "check_calendar";

pub fn definition() -> (&'static str, &'static str, Value) {
    (
        NAME,
        "Check your calendar for upcoming events and appointments.",
        json!({
            "type": "object",
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Date to check in YYYY-MM-DD format. Defaults to today.",
                },
            },
            "required": [],
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct Args {
    #[serde(default)]
    pub date: Option<String>,
}

pub async fn execute(args: Args) -> Result<String> {
    let date = args
        .date
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    Ok(format!(
        "Calendar for {date}:\n\
         - 9:00 AM: Team standup (Zoom)\n\
         - 11:30 AM: Lunch with Alex at Torchy's Tacos\n\
         - 2:00 PM: Dentist appointment\n\
         - 5:00 PM: Yoga class"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_date_is_echoed() {
        let out = execute(Args {
            date: Some("2026-03-01".into()),
        })
        .await
        .unwrap();
        assert!(out.starts_with("Calendar for 2026-03-01:"));
    }
}
