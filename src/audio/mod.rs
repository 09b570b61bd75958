//! Audio plane: FIFO queue, clocked frame source, mic normalization, resampling.
//!
//! Everything downstream of TTS and upstream of STT speaks one format:
//! 48 kHz, mono, signed 16-bit little-endian PCM. A frame is 20 ms of that
//! stream — 960 samples, 1,920 bytes.

pub mod clock;
pub mod ingest;
pub mod queue;
pub mod resample;

/// Sample rate of the WebRTC audio plane.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples per 20 ms frame at 48 kHz.
pub const FRAME_SAMPLES: usize = 960;

/// Bytes per frame (16-bit mono).
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Frame duration.
pub const FRAME_DURATION: std::time::Duration = std::time::Duration::from_millis(20);

pub use clock::{AudioFrame, ClockedSource, Generator, SineWave};
pub use queue::AudioQueue;
