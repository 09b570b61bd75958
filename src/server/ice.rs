//! ICE server configuration: TURN credential fetch with env fallback.
//!
//! `hello` wants fresh TURN credentials (they expire); when a Twilio
//! account is configured we mint a token per connection, otherwise the
//! static `ICE_SERVERS_JSON` list is used. The same list is serialized to
//! the browser and converted for the server-side peer connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::config::Config;

/// One ICE server as exchanged with the browser. `urls` may be a single
/// string or a list, per the WebRTC dictionary shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerEntry {
    #[serde(default)]
    pub urls: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

fn url_list(urls: &Value) -> Vec<String> {
    match urls {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Convert entries into the peer-connection configuration shape.
pub fn to_rtc(entries: &[IceServerEntry]) -> Vec<RTCIceServer> {
    entries
        .iter()
        .map(|e| RTCIceServer {
            urls: url_list(&e.urls),
            username: e.username.clone(),
            credential: e.credential.clone(),
            ..Default::default()
        })
        .filter(|s| !s.urls.is_empty())
        .collect()
}

/// Parse the `ICE_SERVERS_JSON` fallback list.
pub fn from_env_json(raw: &str) -> Vec<IceServerEntry> {
    match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(_) => {
            warn!("invalid ICE_SERVERS_JSON, using empty list");
            Vec::new()
        }
    }
}

/// Fetch fresh TURN credentials, falling back to the env-provided list.
pub async fn fetch_ice_servers(cfg: &Config) -> Vec<IceServerEntry> {
    if !cfg.twilio_account_sid.is_empty() && !cfg.twilio_auth_token.is_empty() {
        match fetch_twilio(cfg).await {
            Ok(servers) if !servers.is_empty() => return servers,
            Ok(_) => warn!("Twilio returned no ICE servers"),
            Err(e) => warn!("Twilio TURN fetch failed: {e:#}"),
        }
    }
    from_env_json(&cfg.ice_servers_json)
}

async fn fetch_twilio(cfg: &Config) -> anyhow::Result<Vec<IceServerEntry>> {
    #[derive(Deserialize)]
    struct TokenResponse {
        #[serde(default)]
        ice_servers: Vec<TwilioIceServer>,
    }
    #[derive(Deserialize)]
    struct TwilioIceServer {
        #[serde(default)]
        url: String,
        #[serde(default)]
        urls: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        credential: String,
    }

    let endpoint = format!(
        "https://api.twilio.com/2010-04-01/Accounts/{}/Tokens.json",
        cfg.twilio_account_sid
    );
    let resp = reqwest::Client::new()
        .post(&endpoint)
        .basic_auth(&cfg.twilio_account_sid, Some(&cfg.twilio_auth_token))
        .send()
        .await?
        .error_for_status()?;
    let token: TokenResponse = resp.json().await?;

    Ok(token
        .ice_servers
        .into_iter()
        .map(|s| {
            let url = if s.urls.is_empty() { s.url } else { s.urls };
            IceServerEntry {
                urls: Value::String(url),
                username: s.username,
                credential: s.credential,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn env_json_accepts_string_and_list_urls() {
        let entries = from_env_json(
            r#"[{"urls": "stun:stun.l.google.com:19302"},
                {"urls": ["turn:turn.example.com"], "username": "u", "credential": "c"}]"#,
        );
        assert_eq!(entries.len(), 2);

        let rtc = to_rtc(&entries);
        assert_eq!(rtc[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(rtc[1].urls, vec!["turn:turn.example.com"]);
        assert_eq!(rtc[1].username, "u");
    }

    #[test]
    fn invalid_env_json_is_an_empty_list() {
        assert!(from_env_json("not json").is_empty());
        assert!(from_env_json("{}").is_empty());
    }

    #[test]
    fn entries_without_urls_are_dropped_for_the_peer_connection() {
        let entries = vec![IceServerEntry {
            urls: json!(null),
            username: String::new(),
            credential: String::new(),
        }];
        assert!(to_rtc(&entries).is_empty());
    }
}
