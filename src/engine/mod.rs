//! Speech engines: speech-to-text and text-to-speech.
//!
//! Both engines are process-wide lazy singletons — model blobs are heavy
//! and a connection must never pay the load cost twice. The session layer
//! calls them from `spawn_blocking`; nothing in this module suspends the
//! reactor.

pub mod stt;
pub mod tts;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown voice: {0}")]
    UnknownVoice(String),
    #[error("voice model download failed: {0}")]
    Download(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("transcription failed: {0}")]
    Transcription(String),
}
