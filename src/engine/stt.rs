//! Speech-to-text over raw PCM.
//!
//! The engine is pinned to 16 kHz internally; callers hand in whatever rate
//! the audio plane uses and the conversion happens here. Transcription is
//! blocking CPU work — run it through `spawn_blocking`.
//!
//! The actual model is whisper.cpp via `whisper-rs`, compiled in with the
//! `whisper` feature. Without it the engine degrades to empty transcripts
//! (the signalling layer already treats an empty transcript as "nothing
//! heard" and skips the agent turn).

use anyhow::Result;
use std::path::PathBuf;

use crate::audio::resample::{pcm16_to_f32, resample};

/// Sample rate the model expects.
pub const STT_SAMPLE_RATE: u32 = 16_000;

/// Resolve the on-disk model path (`STT_MODEL_PATH` overrides the default
/// cache location).
pub fn model_path() -> PathBuf {
    if let Ok(path) = std::env::var("STT_MODEL_PATH") {
        return PathBuf::from(path);
    }
    dirs::cache_dir()
        .map(|d| d.join("voxgate/stt/ggml-base.bin"))
        .unwrap_or_else(|| PathBuf::from("./models/ggml-base.bin"))
}

/// Transcribe s16le mono PCM bytes to text.
///
/// Returns an empty string when nothing was detected. Blocking.
pub fn transcribe(audio: &[u8], sample_rate: u32) -> Result<String> {
    if audio.is_empty() {
        return Ok(String::new());
    }

    let samples = pcm16_to_f32(audio);
    let samples = if sample_rate != STT_SAMPLE_RATE {
        resample(&samples, sample_rate, STT_SAMPLE_RATE)?
    } else {
        samples
    };

    tracing::debug!(
        "transcribing {:.2}s of audio ({} samples @ {} Hz)",
        samples.len() as f64 / STT_SAMPLE_RATE as f64,
        samples.len(),
        STT_SAMPLE_RATE
    );

    backend::transcribe_f32(&samples)
}

#[cfg(feature = "whisper")]
mod backend {
    use super::*;
    use anyhow::Context;
    use once_cell::sync::OnceCell;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    // One-shot initialization so two simultaneous first uses load once.
    static ENGINE: OnceCell<Mutex<WhisperContext>> = OnceCell::new();

    fn engine() -> Result<&'static Mutex<WhisperContext>> {
        ENGINE.get_or_try_init(|| {
            let path = model_path();
            tracing::info!("loading whisper model from {}", path.display());
            let ctx = WhisperContext::new_with_params(
                path.to_str().unwrap_or_default(),
                WhisperContextParameters::default(),
            )
            .context("failed to load whisper model")?;
            Ok(Mutex::new(ctx))
        })
    }

    pub fn transcribe_f32(samples: &[f32]) -> Result<String> {
        let engine = engine()?;
        let ctx = engine.lock().unwrap();
        let mut state = ctx.create_state().context("whisper state")?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: 5,
            patience: -1.0,
        });
        params.set_language(Some("en"));
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);

        state.full(params, samples).context("whisper inference")?;

        let mut parts = Vec::new();
        for i in 0..state.full_n_segments().unwrap_or(0) {
            if let Ok(segment) = state.full_get_segment_text(i) {
                let segment = segment.trim().to_string();
                if !segment.is_empty() {
                    parts.push(segment);
                }
            }
        }
        let text = parts.join(" ").trim().to_string();
        tracing::info!("transcription: {:?}", text.chars().take(100).collect::<String>());
        Ok(text)
    }
}

#[cfg(not(feature = "whisper"))]
mod backend {
    use super::*;
    use std::sync::Once;

    static WARNED: Once = Once::new();

    pub fn transcribe_f32(_samples: &[f32]) -> Result<String> {
        WARNED.call_once(|| {
            tracing::warn!(
                "built without the `whisper` feature; transcription returns empty \
                 (model expected at {})",
                model_path().display()
            );
        });
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_audio_transcribes_to_empty_string() {
        assert_eq!(transcribe(&[], 48_000).unwrap(), "");
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn missing_backend_degrades_to_empty_not_error() {
        let pcm: Vec<u8> = vec![0; 48_000 * 2]; // 1s of silence
        assert_eq!(transcribe(&pcm, 48_000).unwrap(), "");
    }

    #[test]
    fn model_path_honors_env_override() {
        std::env::set_var("STT_MODEL_PATH", "/tmp/test-model.bin");
        assert_eq!(model_path(), PathBuf::from("/tmp/test-model.bin"));
        std::env::remove_var("STT_MODEL_PATH");
    }
}
