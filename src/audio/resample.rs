//! Sample-rate conversion between the audio plane and the speech engines.
//!
//! Two conversions exist: 48 kHz mic audio down to the 16 kHz the STT
//! engine is pinned to, and TTS output up from a voice's native rate
//! (typically 22,050 Hz) to 48 kHz. Both go through the same FFT resampler,
//! fed in fixed chunks with a zero-padded tail.

use anyhow::{Context, Result};
use rubato::{FftFixedIn, Resampler as _};

const CHUNK_SIZE: usize = 1024;

/// Resample a mono f32 signal from `from_rate` to `to_rate`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        2, // sub-chunks for quality
        1, // mono
    )
    .context("failed to construct resampler")?;

    let mut output = Vec::new();
    let mut pos = 0;

    while pos + CHUNK_SIZE <= samples.len() {
        let chunk = &samples[pos..pos + CHUNK_SIZE];
        let result = resampler.process(&[chunk], None).context("resample failed")?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
        pos += CHUNK_SIZE;
    }

    // Pad the tail up to a full chunk, then trim the output proportionally.
    if pos < samples.len() {
        let remaining = &samples[pos..];
        let mut padded = vec![0.0f32; CHUNK_SIZE];
        padded[..remaining.len()].copy_from_slice(remaining);
        let result = resampler
            .process(&[&padded], None)
            .context("resample failed on tail chunk")?;
        if let Some(channel) = result.first() {
            let tail_len =
                (remaining.len() as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
            let take = tail_len.min(channel.len());
            output.extend_from_slice(&channel[..take]);
        }
    }

    Ok(output)
}

/// Decode s16le PCM bytes into normalized floats in [-1.0, 1.0].
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Clip floats to the i16 range and encode as s16le PCM bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clipped = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&clipped.to_le_bytes());
    }
    out
}

/// Resample s16le PCM bytes between rates, staying in byte form.
pub fn resample_pcm16(bytes: &[u8], from_rate: u32, to_rate: u32) -> Result<Vec<u8>> {
    let floats = pcm16_to_f32(bytes);
    let resampled = resample(&floats, from_rate, to_rate)?;
    Ok(f32_to_pcm16(&resampled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rate_is_passthrough() {
        let signal = vec![0.1f32, -0.2, 0.3];
        assert_eq!(resample(&signal, 48_000, 48_000).unwrap(), signal);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(resample(&[], 48_000, 16_000).unwrap().is_empty());
    }

    #[test]
    fn downsample_48k_to_16k_thirds_the_length() {
        let signal = vec![0.0f32; 48_000]; // 1 second
        let out = resample(&signal, 48_000, 16_000).unwrap();
        let err = (out.len() as i64 - 16_000).unsigned_abs() as usize;
        assert!(err <= CHUNK_SIZE, "got {} samples", out.len());
    }

    #[test]
    fn upsample_22050_to_48k_scales_the_length() {
        let signal: Vec<f32> = (0..22_050)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let out = resample(&signal, 22_050, 48_000).unwrap();
        let err = (out.len() as i64 - 48_000).unsigned_abs() as usize;
        assert!(err <= 3 * CHUNK_SIZE, "got {} samples", out.len());
    }

    #[test]
    fn pcm16_round_trip_preserves_values() {
        let bytes = f32_to_pcm16(&[0.0, 0.25, -0.25, 0.999]);
        let floats = pcm16_to_f32(&bytes);
        assert!((floats[0]).abs() < 1e-4);
        assert!((floats[1] - 0.25).abs() < 1e-3);
        assert!((floats[2] + 0.25).abs() < 1e-3);
    }

    #[test]
    fn f32_to_pcm16_clips_out_of_range() {
        let bytes = f32_to_pcm16(&[1.5, -1.5]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32768);
    }
}
