//! Clocked frame source for the outbound WebRTC track.
//!
//! The peer connection's writer task pulls one 20 ms frame at a time;
//! [`ClockedSource::next_frame`] paces those pulls against a monotonic
//! clock so frames leave at wall-clock rate regardless of how fast the
//! producer can fill them. Pacing server-side keeps the browser's jitter
//! buffer shallow and makes barge-in take effect on the next tick.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::queue::AudioQueue;
use super::{FRAME_BYTES, FRAME_SAMPLES, SAMPLE_RATE};

/// One 20 ms packet of outbound audio: 960 samples of s16le mono at 48 kHz,
/// stamped with a presentation timestamp in 1/48000 units.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pcm: Bytes,
    pub pts: i64,
}

/// Frame producer attached to the source.
///
/// A small tagged variant rather than a trait object: there are exactly two
/// producers and the hot path runs once per 20 ms.
pub enum Generator {
    /// Connectivity-check tone.
    Sine(SineWave),
    /// TTS playback path: drains the FIFO queue, silence on underflow.
    Fifo(Arc<AudioQueue>),
}

impl Generator {
    fn next_chunk(&mut self) -> Bytes {
        match self {
            Generator::Sine(s) => s.next_chunk(),
            Generator::Fifo(q) => Bytes::from(q.read(FRAME_BYTES)),
        }
    }
}

struct ClockState {
    start: Option<Instant>,
    frame_count: u64,
}

/// Paced 48 kHz mono frame source, switchable between silence and an
/// attached generator. The clock never resets on generator switch —
/// continuity of pace is the point.
pub struct ClockedSource {
    clock: Mutex<ClockState>,
    generator: Mutex<Option<Generator>>,
}

impl ClockedSource {
    pub fn new() -> Self {
        Self {
            clock: Mutex::new(ClockState {
                start: None,
                frame_count: 0,
            }),
            generator: Mutex::new(None),
        }
    }

    /// Attach a frame producer. Takes effect on the next tick.
    pub fn set_generator(&self, generator: Generator) {
        *self.generator.lock().unwrap() = Some(generator);
    }

    /// Detach the producer — the track reverts to silence.
    pub fn clear_generator(&self) {
        *self.generator.lock().unwrap() = None;
    }

    pub fn has_generator(&self) -> bool {
        self.generator.lock().unwrap().is_some()
    }

    /// Produce the next frame at real-time pace.
    ///
    /// Sleeps until `start + frame_count * 20ms` if that instant is still in
    /// the future; a late caller catches up on the next tick (error bounded
    /// by one frame).
    pub async fn next_frame(&self) -> AudioFrame {
        let (target, pts) = {
            let mut clock = self.clock.lock().unwrap();
            let start = *clock.start.get_or_insert_with(Instant::now);
            let target = start + Duration::from_micros(clock.frame_count * 20_000);
            clock.frame_count += 1;
            (target, (clock.frame_count as i64 - 1) * FRAME_SAMPLES as i64)
        };

        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }

        let pcm = match self.generator.lock().unwrap().as_mut() {
            Some(generator) => generator.next_chunk(),
            None => Bytes::from_static(&SILENCE),
        };

        AudioFrame { pcm, pts }
    }
}

impl Default for ClockedSource {
    fn default() -> Self {
        Self::new()
    }
}

static SILENCE: [u8; FRAME_BYTES] = [0u8; FRAME_BYTES];

/// Phase-continuous sine tone generator.
///
/// Each connectivity-check "voice" is a fixed frequency; phase carries over
/// between chunks so there are no clicks at frame boundaries.
pub struct SineWave {
    frequency: f64,
    amplitude: f64,
    phase: f64,
}

impl SineWave {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            amplitude: 0.3,
            phase: 0.0,
        }
    }

    /// Resolve a sine voice id (`sine-220`, `sine-440`, `sine-880`).
    pub fn for_voice(voice_id: &str) -> Option<Self> {
        let frequency = match voice_id {
            "sine-220" => 220.0,
            "sine-440" => 440.0,
            "sine-880" => 880.0,
            _ => return None,
        };
        Some(Self::new(frequency))
    }

    fn next_chunk(&mut self) -> Bytes {
        let phase_inc = 2.0 * PI * self.frequency / SAMPLE_RATE as f64;
        let mut pcm = Vec::with_capacity(FRAME_BYTES);
        for _ in 0..FRAME_SAMPLES {
            let value = self.amplitude * self.phase.sin();
            let sample = (value * 32767.0).clamp(-32768.0, 32767.0) as i16;
            pcm.extend_from_slice(&sample.to_le_bytes());
            self.phase += phase_inc;
        }
        // Keep phase in [0, 2pi) to avoid floating point drift
        self.phase %= 2.0 * PI;
        Bytes::from(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn frames_have_fixed_shape_and_increasing_pts() {
        let source = ClockedSource::new();
        let mut last_pts = -1i64;
        for i in 0..5 {
            let frame = source.next_frame().await;
            assert_eq!(frame.pcm.len(), FRAME_BYTES);
            assert_eq!(frame.pts, i * FRAME_SAMPLES as i64);
            assert!(frame.pts > last_pts);
            last_pts = frame.pts;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_tracks_the_wall_clock() {
        let source = ClockedSource::new();
        let begin = Instant::now();
        for _ in 0..50 {
            source.next_frame().await;
        }
        // 50 frames = 1 second of audio; the paused clock auto-advances
        // through the sleeps, so elapsed time reflects pure pacing.
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(980), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1020), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn detached_source_emits_silence() {
        let source = ClockedSource::new();
        let frame = source.next_frame().await;
        assert!(frame.pcm.iter().all(|&b| b == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn attach_then_clear_is_identical_to_never_attaching() {
        let source = ClockedSource::new();
        source.set_generator(Generator::Sine(SineWave::new(440.0)));
        let tone = source.next_frame().await;
        assert!(tone.pcm.iter().any(|&b| b != 0));

        source.clear_generator();
        let silent = source.next_frame().await;
        assert!(silent.pcm.iter().all(|&b| b == 0));
        // PTS keeps counting — the clock does not reset on switch.
        assert_eq!(silent.pts, FRAME_SAMPLES as i64);
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_generator_drains_queue_then_goes_silent() {
        let queue = Arc::new(AudioQueue::new());
        queue.enqueue(vec![0x11; FRAME_BYTES + 4]);

        let source = ClockedSource::new();
        source.set_generator(Generator::Fifo(queue.clone()));

        let first = source.next_frame().await;
        assert!(first.pcm.iter().all(|&b| b == 0x11));

        let second = source.next_frame().await;
        assert!(second.pcm[..4].iter().all(|&b| b == 0x11));
        assert!(second.pcm[4..].iter().all(|&b| b == 0));
        assert_eq!(queue.available(), 0);
    }

    #[test]
    fn sine_phase_is_continuous_across_chunks() {
        let mut wave = SineWave::new(440.0);
        let a = wave.next_chunk();
        let b = wave.next_chunk();

        let last = i16::from_le_bytes([a[a.len() - 2], a[a.len() - 1]]) as f64;
        let next = i16::from_le_bytes([b[0], b[1]]) as f64;
        // One sample step of a 440 Hz tone at 48 kHz never jumps more than
        // amplitude * 2*pi*f/fs ~= 566; a phase reset would jump far more.
        assert!((next - last).abs() < 1200.0, "discontinuity {last} -> {next}");
    }

    #[test]
    fn unknown_sine_voice_is_rejected() {
        assert!(SineWave::for_voice("sine-123").is_none());
        assert!(SineWave::for_voice("en_US-lessac-medium").is_none());
    }
}
