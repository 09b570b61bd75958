//! Mic capture state and the periodic transcriber.
//!
//! Capture is a flat list of normalized PCM chunks appended by the ingest
//! task while recording is on. Transcription is rolling: every wake the
//! periodic task re-transcribes the *entire* buffer, so partials only ever
//! improve and no overlap-stitching is needed. Short utterances are the
//! design center, which keeps the quadratic rework cheap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::audio::SAMPLE_RATE;
use crate::engine::stt;

/// Callback invoked with `(text, partial)` for every transcript.
pub type TranscriptSink = Arc<dyn Fn(String, bool) + Send + Sync>;

/// Shared capture buffer. Appends race only with the atomic flag; the
/// chunk list itself is mutex-guarded byte pushes.
pub struct RecordingState {
    active: AtomicBool,
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl RecordingState {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            chunks: Mutex::new(Vec::new()),
        }
    }

    /// Clear the buffer and start capturing.
    pub fn begin(&self) {
        self.chunks.lock().unwrap().clear();
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Append one normalized frame. Dropped unless recording is on.
    pub fn append(&self, pcm: Vec<u8>) {
        if !self.is_active() || pcm.is_empty() {
            return;
        }
        self.chunks.lock().unwrap().push(pcm);
    }

    /// Concatenation of everything captured so far. Does not clear — the
    /// periodic transcriber always works over the full utterance.
    pub fn snapshot(&self) -> Vec<u8> {
        self.chunks.lock().unwrap().concat()
    }

    /// Stop capturing and drain the buffer.
    pub fn finish(&self) -> Vec<u8> {
        self.active.store(false, Ordering::SeqCst);
        let mut chunks = self.chunks.lock().unwrap();
        let full = chunks.concat();
        chunks.clear();
        full
    }
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the rolling partial-transcription task.
///
/// Each wake: if still recording and the buffer is non-empty, snapshot the
/// full capture, run STT on a worker thread, and report the partial if the
/// mic is still live. Exits on its own once recording stops; `stop` also
/// aborts it so a wake never outlives the session.
pub fn spawn_periodic_transcriber(
    state: Arc<RecordingState>,
    interval: Duration,
    on_partial: TranscriptSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if !state.is_active() {
                break;
            }
            let snapshot = state.snapshot();
            if snapshot.is_empty() {
                continue;
            }
            let text = match tokio::task::spawn_blocking(move || {
                stt::transcribe(&snapshot, SAMPLE_RATE)
            })
            .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!("partial transcription failed: {e:#}");
                    continue;
                }
                Err(_) => break,
            };
            if !text.is_empty() && state.is_active() {
                on_partial(text, true);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_are_dropped_while_inactive() {
        let state = RecordingState::new();
        state.append(vec![1, 2]);
        assert!(state.snapshot().is_empty());

        state.begin();
        state.append(vec![1, 2]);
        state.append(vec![3]);
        assert_eq!(state.snapshot(), vec![1, 2, 3]);
        // Snapshot does not consume.
        assert_eq!(state.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn begin_clears_previous_capture() {
        let state = RecordingState::new();
        state.begin();
        state.append(vec![9]);
        state.begin();
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn finish_drains_and_deactivates() {
        let state = RecordingState::new();
        state.begin();
        state.append(vec![7, 8]);
        assert_eq!(state.finish(), vec![7, 8]);
        assert!(!state.is_active());
        assert!(state.snapshot().is_empty());
        // Appends after finish are dropped.
        state.append(vec![1]);
        assert!(state.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_exits_once_recording_stops() {
        let state = Arc::new(RecordingState::new());
        state.begin();
        let sink: TranscriptSink = Arc::new(|_, _| {});
        let handle =
            spawn_periodic_transcriber(state.clone(), Duration::from_secs(5), sink);

        state.finish();
        tokio::time::sleep(Duration::from_secs(6)).await;
        // First wake sees recording off and the task returns.
        handle.await.unwrap();
    }
}
