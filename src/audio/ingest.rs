//! Inbound audio normalization.
//!
//! The browser sends whatever Opus stream `getUserMedia` produced; the
//! decoder hands us float samples that may be interleaved stereo. Everything
//! past this module is 48 kHz s16le mono, so the conversion happens exactly
//! once, here.

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::SAMPLE_RATE;

/// Max decoded samples per channel for one Opus packet (120 ms at 48 kHz).
const MAX_OPUS_FRAME: usize = 5760;

/// Scale float samples to the signed 16-bit range, saturating.
pub fn f32_to_i16_saturating(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Keep every Nth sample starting at 0 — the first channel of an
/// interleaved stream. A no-op for mono.
pub fn downmix_first_channel(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(channels).copied().collect()
}

/// Interleave i16 samples into little-endian bytes.
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Stateful decoder for the inbound track: Opus payload in, normalized
/// 48 kHz s16le mono bytes out.
pub struct MicDecoder {
    decoder: opus::Decoder,
    channels: usize,
    /// First-frame diagnostic emitted once per session.
    logged_format: bool,
}

impl MicDecoder {
    pub fn new() -> Result<Self> {
        // Negotiated as 2-channel Opus; the decoder upmixes mono sources.
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Stereo)
            .context("failed to create Opus decoder for inbound track")?;
        Ok(Self {
            decoder,
            channels: 2,
            logged_format: false,
        })
    }

    /// Decode one RTP payload into normalized mono PCM bytes.
    pub fn decode_frame(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut buf = vec![0.0f32; MAX_OPUS_FRAME * self.channels];
        let samples_per_channel = self
            .decoder
            .decode_float(payload, &mut buf, false)
            .context("Opus decode failed")?;
        buf.truncate(samples_per_channel * self.channels);

        if !self.logged_format {
            self.logged_format = true;
            let (min, max) = buf
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
            info!(
                "inbound audio: f32 interleaved, {} Hz, {} ch, {} samples/frame, range [{:.3}, {:.3}]",
                SAMPLE_RATE, self.channels, samples_per_channel, min, max
            );
        } else {
            debug!("decoded {} samples/channel", samples_per_channel);
        }

        let scaled = f32_to_i16_saturating(&buf);
        let mono = downmix_first_channel(&scaled, self.channels);
        Ok(pcm_bytes(&mono))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_samples_scale_and_saturate() {
        let out = f32_to_i16_saturating(&[0.0, 0.5, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 16383);
        assert_eq!(out[2], 32767);
        assert_eq!(out[3], -32767);
        // Out-of-range input saturates instead of wrapping.
        assert_eq!(out[4], 32767);
        assert_eq!(out[5], -32768);
    }

    #[test]
    fn stereo_downmix_keeps_the_first_channel() {
        let interleaved = [1, -1, 2, -2, 3, -3];
        assert_eq!(downmix_first_channel(&interleaved, 2), vec![1, 2, 3]);
    }

    #[test]
    fn mono_downmix_is_identity() {
        let samples = [5, 6, 7];
        assert_eq!(downmix_first_channel(&samples, 1), vec![5, 6, 7]);
    }

    #[test]
    fn pcm_bytes_are_little_endian() {
        assert_eq!(pcm_bytes(&[0x0102, -2]), vec![0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn normalized_frame_is_two_bytes_per_sample() {
        let frame: Vec<f32> = vec![0.1; 960 * 2]; // 20 ms stereo
        let mono = downmix_first_channel(&f32_to_i16_saturating(&frame), 2);
        assert_eq!(pcm_bytes(&mono).len(), 960 * 2);
    }
}
