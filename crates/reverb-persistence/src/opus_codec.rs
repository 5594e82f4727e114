//! Thin wrapper around `audiopus` so callers never touch the raw FFI
//! types directly. Opus only accepts fixed frame sizes (2.5-60ms); a
//! persisted chunk (default 30s) is many such frames concatenated with
//! a 16-bit length prefix per frame, so it can be decoded back to PCM
//! one frame at a time without re-deriving frame boundaries.

use audiopus::coder::{Decoder, Encoder};
use audiopus::{Application, Channels, SampleRate};

use crate::{PersistenceError, Result};

/// Opus frame duration used throughout the pipeline; 20ms is the
/// reference implementation's chunking granularity for VoIP-profile
/// encoding.
const FRAME_DURATION_MS: u32 = 20;

fn frame_size_samples(sample_rate: u32) -> usize {
    (sample_rate as usize * FRAME_DURATION_MS as usize) / 1000
}

fn sample_rate_of(hz: u32) -> Result<SampleRate> {
    match hz {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(PersistenceError::Codec(format!(
            "unsupported Opus sample rate: {other}"
        ))),
    }
}

fn channels_of(count: u8) -> Result<Channels> {
    match count {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(PersistenceError::Codec(format!(
            "unsupported channel count: {other}"
        ))),
    }
}

/// Encode one 20ms frame of 16-bit PCM into a raw Opus packet. `pcm` must
/// be exactly `frame_size_samples(sample_rate) * channels` long; shorter
/// trailing frames are zero-padded by the caller ([`encode_opus_frame`]).
fn encode_raw_frame(encoder: &mut Encoder, pcm: &[i16]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; 4096];
    let written = encoder
        .encode(pcm, &mut out)
        .map_err(|e| PersistenceError::Codec(e.to_string()))?;
    out.truncate(written);
    Ok(out)
}

/// Encode a full PCM buffer (one persisted chunk's worth) as a sequence
/// of length-prefixed Opus frames.
pub fn encode_opus_frame(pcm: &[i16], sample_rate: u32, channels: u8) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(
        sample_rate_of(sample_rate)?,
        channels_of(channels)?,
        Application::Voip,
    )
    .map_err(|e| PersistenceError::Codec(e.to_string()))?;

    let frame_len = frame_size_samples(sample_rate) * channels as usize;
    let mut out = Vec::new();
    for frame in pcm.chunks(frame_len) {
        let padded;
        let input: &[i16] = if frame.len() == frame_len {
            frame
        } else {
            let mut owned = frame.to_vec();
            owned.resize(frame_len, 0);
            padded = owned;
            &padded
        };
        let packet = encode_raw_frame(&mut encoder, input)?;
        out.extend_from_slice(&(packet.len() as u16).to_le_bytes());
        out.extend_from_slice(&packet);
    }
    Ok(out)
}

/// Decode a length-prefixed Opus frame sequence back into 16-bit PCM.
pub fn decode_opus_frame(data: &[u8], sample_rate: u32, channels: u8) -> Result<Vec<i16>> {
    let mut decoder = Decoder::new(sample_rate_of(sample_rate)?, channels_of(channels)?)
        .map_err(|e| PersistenceError::Codec(e.to_string()))?;

    let frame_len = frame_size_samples(sample_rate) * channels as usize;
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 2 <= data.len() {
        let len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if pos + len > data.len() {
            break;
        }
        let packet = &data[pos..pos + len];
        pos += len;

        let mut pcm_out = vec![0i16; frame_len];
        let written = decoder
            .decode(Some(packet), &mut pcm_out, false)
            .map_err(|e| PersistenceError::Codec(e.to_string()))?;
        pcm_out.truncate(written * channels as usize);
        out.extend_from_slice(&pcm_out);
    }
    Ok(out)
}

/// Reconstruct a WAV byte buffer in-memory from a conversation's
/// stored, Opus-compressed chunks. Chunks must already be in
/// `chunk_index` order.
pub fn reconstruct_wav(chunks: &[reverb_models::AudioChunk]) -> Result<Vec<u8>> {
    let Some(first) = chunks.first() else {
        return Ok(Vec::new());
    };
    let spec = hound::WavSpec {
        channels: first.channels as u16,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buffer);
        let mut writer = hound::WavWriter::new(cursor, spec)?;
        for chunk in chunks {
            let pcm = decode_opus_frame(&chunk.audio_data, chunk.sample_rate, chunk.channels)?;
            for sample in pcm {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(samples: usize) -> Vec<i16> {
        (0..samples).map(|i| ((i % 200) as i16 - 100) * 50).collect()
    }

    #[test]
    fn encode_then_decode_round_trips_frame_count() {
        // 1s of audio at 16kHz mono = 50 frames of 20ms each.
        let pcm = tone(16_000);
        let packet = encode_opus_frame(&pcm, 16_000, 1).unwrap();
        assert!(!packet.is_empty());

        let decoded = decode_opus_frame(&packet, 16_000, 1).unwrap();
        // Decoded length is a whole number of 20ms frames; the final
        // frame was zero-padded, so it may be >= the input length.
        assert!(decoded.len() >= pcm.len());
        assert_eq!(decoded.len() % 320, 0);
    }

    #[test]
    fn unsupported_sample_rate_is_rejected() {
        let err = encode_opus_frame(&tone(160), 44_100, 1).unwrap_err();
        assert!(matches!(err, PersistenceError::Codec(_)));
    }

    #[test]
    fn reconstruct_wav_is_empty_for_no_chunks() {
        assert!(reconstruct_wav(&[]).unwrap().is_empty());
    }
}
