//! Per-connection session: one peer connection, one outbound track, and
//! the four pipelines hanging off them.
//!
//! The session is created on the first `webrtc_offer` and owned exclusively
//! by the signalling handler. Teardown is cancellation: every background
//! task (paced writer, mic ingest, periodic transcriber) is aborted before
//! the peer connection closes.

pub mod recording;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::audio::ingest::MicDecoder;
use crate::audio::resample::resample_pcm16;
use crate::audio::{
    AudioQueue, ClockedSource, Generator, SineWave, FRAME_DURATION, SAMPLE_RATE,
};
use crate::engine::tts;
use recording::{spawn_periodic_transcriber, RecordingState, TranscriptSink};

/// One WebRTC session and its audio pipelines.
pub struct Session {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    source: Arc<ClockedSource>,
    queue: Arc<AudioQueue>,
    recording: Arc<RecordingState>,
    transcribe_interval: Duration,
    writer: JoinHandle<()>,
    mic_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    transcriber: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Build the peer connection, outbound track and paced writer.
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
        transcribe_interval: Duration,
    ) -> Result<Self> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| anyhow!("media engine setup: {e}"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| anyhow!("interceptor setup: {e}"))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .context("failed to create peer connection")?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "voxgate".to_owned(),
        ));

        let source = Arc::new(ClockedSource::new());
        let queue = Arc::new(AudioQueue::new());
        let recording = Arc::new(RecordingState::new());
        let mic_task: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));

        pc.on_peer_connection_state_change(Box::new(|state| {
            info!("connection state: {state}");
            Box::pin(async {})
        }));
        pc.on_ice_connection_state_change(Box::new(|state| {
            info!("ICE connection state: {state}");
            Box::pin(async {})
        }));

        {
            let recording = recording.clone();
            let mic_task = mic_task.clone();
            pc.on_track(Box::new(move |remote: Arc<TrackRemote>, _, _| {
                if remote.kind() != RTPCodecType::Audio {
                    return Box::pin(async {});
                }
                info!("inbound audio track: ssrc={}", remote.ssrc());
                let handle = tokio::spawn(mic_ingest(remote, recording.clone()));
                if let Some(old) = mic_task.lock().unwrap().replace(handle) {
                    old.abort();
                }
                Box::pin(async {})
            }));
        }

        let writer = spawn_paced_writer(track.clone(), source.clone());

        Ok(Self {
            pc,
            track,
            source,
            queue,
            recording,
            transcribe_interval,
            writer,
            mic_task,
            transcriber: Mutex::new(None),
        })
    }

    /// Process the client's SDP offer and return the answer SDP.
    ///
    /// No trickle ICE: gathering runs to completion so the answer carries
    /// every candidate.
    pub async fn handle_offer(&self, sdp: &str) -> Result<String> {
        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("failed to add outbound track")?;

        // Drain RTCP so the interceptor chain keeps running.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| anyhow!("invalid offer SDP: {e}"))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| anyhow!("set remote description: {e}"))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| anyhow!("create answer: {e}"))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| anyhow!("set local description: {e}"))?;
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("local description missing after gathering"))?;
        info!("SDP answer created");
        Ok(local.sdp)
    }

    /// Attach the connectivity-check tone generator.
    pub fn start_audio(&self, voice_id: &str) -> Result<()> {
        let wave = SineWave::for_voice(voice_id)
            .ok_or_else(|| anyhow!("unknown voice: {voice_id}"))?;
        self.source.set_generator(Generator::Sine(wave));
        info!("audio started: {voice_id}");
        Ok(())
    }

    /// Detach the generator — the track reverts to silence on the next tick.
    pub fn stop_audio(&self) {
        self.source.clear_generator();
        info!("audio stopped");
    }

    /// Speak a reply, sentence by sentence.
    ///
    /// Sentences are synthesized sequentially on worker threads so playback
    /// of sentence one starts while later ones are still rendering, and
    /// ordering stays trivial.
    pub async fn speak_text(&self, text: &str, voice_id: &str) -> Result<()> {
        self.source.set_generator(Generator::Fifo(self.queue.clone()));

        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(());
        }

        let voice = tts::ensure_voice(voice_id).await?;
        for sentence in sentences {
            let voice = voice.clone();
            let pcm = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
                let synth = tts::synthesize(&voice, &sentence)?;
                if synth.pcm.is_empty() {
                    return Ok(Vec::new());
                }
                resample_pcm16(&synth.pcm, synth.sample_rate, SAMPLE_RATE)
            })
            .await
            .context("synthesis task panicked")??;
            self.queue.enqueue(pcm);
        }
        Ok(())
    }

    /// Barge-in: drop queued audio and detach the generator. Any in-flight
    /// synthesis still lands in the queue but is never read. Idempotent.
    pub fn stop_speaking(&self) {
        self.queue.clear();
        self.source.clear_generator();
    }

    /// Start mic capture and the rolling partial transcriber.
    pub fn start_recording(&self, on_partial: TranscriptSink) {
        if let Some(old) = self.transcriber.lock().unwrap().take() {
            old.abort();
        }
        self.recording.begin();
        let handle = spawn_periodic_transcriber(
            self.recording.clone(),
            self.transcribe_interval,
            on_partial,
        );
        *self.transcriber.lock().unwrap() = Some(handle);
        info!("mic recording started");
    }

    /// Stop capture, run one final STT pass over the full utterance, and
    /// return the transcript (empty if nothing was heard).
    pub async fn stop_recording(&self) -> Result<String> {
        if let Some(handle) = self.transcriber.lock().unwrap().take() {
            handle.abort();
        }
        let buffer = self.recording.finish();
        if buffer.is_empty() {
            return Ok(String::new());
        }
        let text = tokio::task::spawn_blocking(move || {
            crate::engine::stt::transcribe(&buffer, SAMPLE_RATE)
        })
        .await
        .context("transcription task panicked")??;
        Ok(text)
    }

    /// Tear everything down. Cancellation is the normal path.
    pub async fn close(&self) {
        self.stop_speaking();
        if let Some(handle) = self.transcriber.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.mic_task.lock().unwrap().take() {
            handle.abort();
        }
        self.writer.abort();
        if let Err(e) = self.pc.close().await {
            warn!("peer connection close: {e}");
        }
        info!("session closed");
    }
}

/// Outbound writer: pull paced frames, Opus-encode, hand to the track.
fn spawn_paced_writer(
    track: Arc<TrackLocalStaticSample>,
    source: Arc<ClockedSource>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut encoder =
            match opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip) {
                Ok(encoder) => encoder,
                Err(e) => {
                    warn!("opus encoder unavailable, outbound audio disabled: {e}");
                    return;
                }
            };
        loop {
            let frame = source.next_frame().await;
            let samples: Vec<i16> = frame
                .pcm
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let encoded = match encoder.encode_vec(&samples, 1024) {
                Ok(data) => data,
                Err(e) => {
                    warn!("opus encode failed: {e}");
                    continue;
                }
            };
            // Errors before the track is bound just mean nobody is listening
            // yet; the clock keeps running either way.
            if let Err(e) = track
                .write_sample(&Sample {
                    data: encoded.into(),
                    duration: FRAME_DURATION,
                    ..Default::default()
                })
                .await
            {
                debug!("write_sample: {e}");
            }
        }
    })
}

/// Inbound track pump: decode, normalize, append while recording.
async fn mic_ingest(remote: Arc<TrackRemote>, recording: Arc<RecordingState>) {
    let mut decoder = match MicDecoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!("mic decoder unavailable: {e}");
            return;
        }
    };
    loop {
        let (packet, _) = match remote.read_rtp().await {
            Ok(pair) => pair,
            // A failed recv is end-of-stream, not an error.
            Err(_) => break,
        };
        if packet.payload.is_empty() {
            continue;
        }
        match decoder.decode_frame(&packet.payload) {
            Ok(pcm) => recording.append(pcm),
            Err(e) => debug!("mic decode error: {e}"),
        }
    }
    debug!("inbound track ended");
}

/// Split text into sentences at end-punctuation followed by whitespace.
///
/// Input with no terminal punctuation comes back as a single sentence;
/// empty input yields nothing.
pub fn split_sentences(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            let piece = current.trim().to_string();
            if !piece.is_empty() {
                sentences.push(piece);
            }
            current.clear();
        }
    }
    let piece = current.trim().to_string();
    if !piece.is_empty() {
        sentences.push(piece);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation_plus_whitespace() {
        assert_eq!(
            split_sentences("Hello there. How are you?"),
            vec!["Hello there.", "How are you?"]
        );
        assert_eq!(
            split_sentences("One! Two?  Three."),
            vec!["One!", "Two?", "Three."]
        );
    }

    #[test]
    fn no_terminal_punctuation_is_one_sentence() {
        assert_eq!(split_sentences("just a fragment"), vec!["just a fragment"]);
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n ").is_empty());
    }

    #[test]
    fn punctuation_inside_a_token_does_not_split() {
        assert_eq!(
            split_sentences("Version 2.5 shipped today."),
            vec!["Version 2.5 shipped today."]
        );
    }

    #[tokio::test]
    async fn session_builds_and_closes_cleanly() {
        let session = Session::new(Vec::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!session.source.has_generator());
        session.close().await;
    }

    #[tokio::test]
    async fn stop_speaking_twice_equals_once() {
        let session = Session::new(Vec::new(), Duration::from_secs(5))
            .await
            .unwrap();
        session.queue.enqueue(vec![1; 1920]);
        session
            .source
            .set_generator(Generator::Fifo(session.queue.clone()));

        session.stop_speaking();
        assert_eq!(session.queue.available(), 0);
        assert!(!session.source.has_generator());

        session.stop_speaking();
        assert_eq!(session.queue.available(), 0);
        assert!(!session.source.has_generator());
        session.close().await;
    }

    #[tokio::test]
    async fn stop_recording_with_no_audio_is_empty() {
        let session = Session::new(Vec::new(), Duration::from_secs(5))
            .await
            .unwrap();
        session.start_recording(Arc::new(|_, _| {}));
        let text = session.stop_recording().await.unwrap();
        assert_eq!(text, "");
        session.close().await;
    }

    #[tokio::test]
    async fn start_audio_rejects_unknown_voice() {
        let session = Session::new(Vec::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(session.start_audio("sine-440").is_ok());
        assert!(session.start_audio("not-a-voice").is_err());
        session.close().await;
    }
}
