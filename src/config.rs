//! Environment-driven configuration.
//!
//! Everything the gateway needs arrives through the environment: the
//! shared auth token, listen settings, ICE fallback JSON, provider API
//! keys, model host coordinates and the orchestrator limits. Defaults are
//! tuned for local development against a stock Ollama install.

use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Shared token checked on `hello`.
    pub auth_token: String,
    pub port: u16,
    /// Fallback ICE server list as raw JSON (used when TURN fetch is
    /// unavailable or fails).
    pub ice_servers_json: String,
    /// Directory of static browser assets.
    pub web_dir: String,

    // TURN credential fetch
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,

    // Search tool keys
    pub tavily_api_key: String,
    pub brave_api_key: String,

    // LLM providers
    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub openai_model: String,
    /// Explicit default provider id; empty = auto-detect.
    pub llm_provider: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub ollama_fallback_model: String,

    // Speech
    pub tts_default_voice: String,
    pub transcribe_interval: Duration,

    // Orchestrator limits
    pub max_tool_calls_per_turn: usize,
    pub max_history_messages: usize,
    pub enable_thinking: bool,

    // Timeouts
    pub chat_timeout: Duration,
    pub search_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_token: "devtoken".to_string(),
            port: 8080,
            ice_servers_json: "[]".to_string(),
            web_dir: "web".to_string(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            tavily_api_key: String::new(),
            brave_api_key: String::new(),
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            llm_provider: String::new(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "qwen3:8b".to_string(),
            ollama_fallback_model: "qwen2.5:14b".to_string(),
            tts_default_voice: "en_US-lessac-medium".to_string(),
            transcribe_interval: Duration::from_secs(5),
            max_tool_calls_per_turn: 5,
            max_history_messages: 20,
            enable_thinking: false,
            chat_timeout: Duration::from_secs(60),
            search_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auth_token: env_or("AUTH_TOKEN", &defaults.auth_token),
            port: env_parse("PORT", defaults.port),
            ice_servers_json: env_or("ICE_SERVERS_JSON", &defaults.ice_servers_json),
            web_dir: env_or("WEB_DIR", &defaults.web_dir),
            twilio_account_sid: env_or("TWILIO_ACCOUNT_SID", ""),
            twilio_auth_token: env_or("TWILIO_AUTH_TOKEN", ""),
            tavily_api_key: env_or("TAVILY_API_KEY", ""),
            brave_api_key: env_or("BRAVE_API_KEY", ""),
            anthropic_api_key: env_or("ANTHROPIC_API_KEY", ""),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            openai_model: env_or("OPENAI_MODEL", &defaults.openai_model),
            llm_provider: env_or("LLM_PROVIDER", "").to_lowercase(),
            ollama_url: env_or("OLLAMA_URL", &defaults.ollama_url),
            ollama_model: env_or("OLLAMA_MODEL", &defaults.ollama_model),
            ollama_fallback_model: env_or(
                "OLLAMA_FALLBACK_MODEL",
                &defaults.ollama_fallback_model,
            ),
            tts_default_voice: env_or("TTS_DEFAULT_VOICE", &defaults.tts_default_voice),
            transcribe_interval: Duration::from_secs_f64(env_parse(
                "TRANSCRIBE_INTERVAL_SECS",
                5.0,
            )),
            max_tool_calls_per_turn: env_parse("MAX_TOOL_CALLS_PER_TURN", 5),
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES", 20),
            enable_thinking: env_parse("ENABLE_THINKING", false),
            chat_timeout: Duration::from_secs_f64(env_parse("CHAT_TIMEOUT_SECS", 60.0)),
            search_timeout: Duration::from_secs_f64(env_parse("SEARCH_TIMEOUT_SECS", 10.0)),
        }
    }
}
