//! Text-to-speech with a lazily-downloaded voice catalog.
//!
//! Voices are Piper ONNX models named `<locale>-<name>-<quality>` (for
//! example `en_US-lessac-medium`). Model and config blobs are fetched from
//! the well-known catalog URL pattern on first use and cached on disk under
//! the user cache dir; parsed voice metadata is additionally cached in
//! memory so repeat synthesis never re-reads the config.
//!
//! Synthesis itself shells out to the external `piper` binary, streaming
//! raw s16le PCM at the voice's native rate. When the binary is absent the
//! engine degrades to a silence placeholder sized to the text, so the rest
//! of the pipeline stays exercisable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::EngineError;

const CATALOG_BASE_URL: &str = "https://huggingface.co/rhasspy/piper-voices/resolve/main";

/// Default native sample rate for medium-quality voices.
const DEFAULT_NATIVE_RATE: u32 = 22_050;

/// A voice the gateway can speak with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub id: String,
    pub display_name: String,
    pub language: String,
    pub locale: String,
    pub quality: String,
    pub downloaded: bool,
}

/// Cached, ready-to-use voice files.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: String,
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    /// Native synthesis rate from the voice config.
    pub sample_rate: u32,
}

/// Result of one synthesis call: raw s16le mono PCM at `sample_rate`.
pub struct Synthesis {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

// In-memory side of the cache: voice id -> parsed files + native rate.
static LOADED: Lazy<Mutex<HashMap<String, Voice>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("voxgate/voices"))
        .unwrap_or_else(|| PathBuf::from("./voices"))
}

/// The shipped voice catalog. `downloaded` reflects the on-disk cache.
pub fn voice_catalog() -> Vec<VoiceEntry> {
    const KNOWN: &[(&str, &str)] = &[
        ("en_US-lessac-medium", "Lessac (US English)"),
        ("en_US-amy-medium", "Amy (US English)"),
        ("en_US-ryan-high", "Ryan (US English)"),
        ("en_GB-alan-medium", "Alan (British English)"),
    ];
    KNOWN
        .iter()
        .filter_map(|(id, name)| {
            let parts = VoiceId::parse(id)?;
            Some(VoiceEntry {
                id: (*id).to_string(),
                display_name: (*name).to_string(),
                language: parts.language,
                locale: parts.locale,
                quality: parts.quality,
                downloaded: cache_dir().join(format!("{id}.onnx")).exists(),
            })
        })
        .collect()
}

pub fn is_known_voice(voice_id: &str) -> bool {
    voice_catalog().iter().any(|v| v.id == voice_id)
}

struct VoiceId {
    language: String,
    locale: String,
    name: String,
    quality: String,
}

impl VoiceId {
    /// Split `en_US-lessac-medium` into its catalog-path components.
    fn parse(id: &str) -> Option<Self> {
        let mut parts = id.splitn(3, '-');
        let locale = parts.next()?.to_string();
        let name = parts.next()?.to_string();
        let quality = parts.next()?.to_string();
        let language = locale.split('_').next()?.to_string();
        Some(Self {
            language,
            locale,
            name,
            quality,
        })
    }

    fn model_url(&self, id: &str) -> String {
        format!(
            "{CATALOG_BASE_URL}/{}/{}/{}/{}/{id}.onnx",
            self.language, self.locale, self.name, self.quality
        )
    }
}

#[derive(Deserialize)]
struct VoiceConfig {
    audio: VoiceConfigAudio,
}

#[derive(Deserialize)]
struct VoiceConfigAudio {
    sample_rate: u32,
}

fn native_rate(config_path: &Path) -> u32 {
    std::fs::read_to_string(config_path)
        .ok()
        .and_then(|raw| serde_json::from_str::<VoiceConfig>(&raw).ok())
        .map(|c| c.audio.sample_rate)
        .unwrap_or(DEFAULT_NATIVE_RATE)
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    info!("downloading {} -> {}", url, dest.display());
    let resp = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| EngineError::Download(e.to_string()))?;
    let body = resp
        .bytes()
        .await
        .map_err(|e| EngineError::Download(e.to_string()))?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &body).await?;
    Ok(())
}

/// Ensure the voice's model + config blobs are cached, returning the
/// parsed [`Voice`]. Downloads happen at most once per process per voice.
pub async fn ensure_voice(voice_id: &str) -> Result<Voice> {
    if let Some(voice) = LOADED.lock().unwrap().get(voice_id) {
        return Ok(voice.clone());
    }

    let parts = VoiceId::parse(voice_id)
        .ok_or_else(|| EngineError::UnknownVoice(voice_id.to_string()))?;

    let model_path = cache_dir().join(format!("{voice_id}.onnx"));
    let config_path = cache_dir().join(format!("{voice_id}.onnx.json"));

    let model_url = parts.model_url(voice_id);
    if !model_path.exists() {
        download(&model_url, &model_path).await?;
    }
    if !config_path.exists() {
        download(&format!("{model_url}.json"), &config_path).await?;
    }

    let voice = Voice {
        id: voice_id.to_string(),
        sample_rate: native_rate(&config_path),
        model_path,
        config_path,
    };
    info!("voice {} ready (native rate: {} Hz)", voice.id, voice.sample_rate);
    LOADED
        .lock()
        .unwrap()
        .insert(voice_id.to_string(), voice.clone());
    Ok(voice)
}

/// Synthesize `text` with a cached voice. Blocking — call from a worker
/// thread.
pub fn synthesize(voice: &Voice, text: &str) -> Result<Synthesis> {
    if text.trim().is_empty() {
        bail!("cannot synthesize empty text");
    }

    let piper = std::env::var("PIPER_BIN").unwrap_or_else(|_| "piper".to_string());
    match run_piper(&piper, voice, text) {
        Ok(pcm) if !pcm.is_empty() => Ok(Synthesis {
            pcm,
            sample_rate: voice.sample_rate,
        }),
        Ok(_) => {
            warn!(
                "synthesis produced no audio for: {:?}",
                text.chars().take(50).collect::<String>()
            );
            Ok(Synthesis {
                pcm: Vec::new(),
                sample_rate: voice.sample_rate,
            })
        }
        Err(e) => {
            warn!("piper unavailable ({e}); emitting silence placeholder");
            Ok(placeholder_silence(text, voice.sample_rate))
        }
    }
}

fn run_piper(piper: &str, voice: &Voice, text: &str) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut child = Command::new(piper)
        .arg("--model")
        .arg(&voice.model_path)
        .arg("--config")
        .arg(&voice.config_path)
        .arg("--output-raw")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {piper}"))?;

    // Piper reads one line of text per utterance on stdin.
    let sanitized = text.replace('\n', " ");
    child
        .stdin
        .take()
        .context("piper stdin unavailable")?
        .write_all(format!("{sanitized}\n").as_bytes())?;

    let output = child.wait_with_output().context("piper did not exit")?;
    if !output.status.success() {
        bail!("piper exited with {}", output.status);
    }
    Ok(output.stdout)
}

/// Length-proportional silence when no synthesis backend is installed.
fn placeholder_silence(text: &str, sample_rate: u32) -> Synthesis {
    let seconds = (text.len() as f32 * 0.05).clamp(0.5, 5.0);
    let samples = (seconds * sample_rate as f32) as usize;
    Synthesis {
        pcm: vec![0u8; samples * 2],
        sample_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_id_parses_into_catalog_path_parts() {
        let parts = VoiceId::parse("en_US-lessac-medium").unwrap();
        assert_eq!(parts.language, "en");
        assert_eq!(parts.locale, "en_US");
        assert_eq!(parts.name, "lessac");
        assert_eq!(parts.quality, "medium");
        assert_eq!(
            parts.model_url("en_US-lessac-medium"),
            "https://huggingface.co/rhasspy/piper-voices/resolve/main/en/en_US/lessac/medium/en_US-lessac-medium.onnx"
        );
    }

    #[test]
    fn malformed_voice_ids_are_rejected() {
        assert!(VoiceId::parse("lessac").is_none());
        assert!(VoiceId::parse("en_US-lessac").is_none());
    }

    #[test]
    fn catalog_lists_at_least_one_voice() {
        let catalog = voice_catalog();
        assert!(!catalog.is_empty());
        assert!(catalog.iter().any(|v| v.id == "en_US-lessac-medium"));
        assert!(is_known_voice("en_US-lessac-medium"));
        assert!(!is_known_voice("sine-440"));
    }

    #[test]
    fn native_rate_falls_back_when_config_is_missing() {
        assert_eq!(native_rate(Path::new("/nonexistent.json")), DEFAULT_NATIVE_RATE);
    }

    #[test]
    fn native_rate_reads_the_voice_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.onnx.json");
        std::fs::write(&path, r#"{"audio": {"sample_rate": 16000}}"#).unwrap();
        assert_eq!(native_rate(&path), 16_000);
    }

    #[test]
    fn placeholder_silence_scales_with_text() {
        let short = placeholder_silence("hi", 22_050);
        let long = placeholder_silence(&"word ".repeat(50), 22_050);
        assert!(short.pcm.len() < long.pcm.len());
        assert_eq!(short.pcm.len() % 2, 0);
        // Clamped between 0.5s and 5s.
        assert!(short.pcm.len() >= 22_050);
        assert!(long.pcm.len() <= 22_050 * 2 * 5);
    }
}
