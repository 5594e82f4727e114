//! Per-packet Opus decode for wearable clients. Distinct from `reverb_persistence::opus_codec`, which decodes the
//! length-prefixed multi-frame sequences the persistence worker writes
//! to disk: a gateway `audio-chunk` carries exactly one raw Opus packet
//! per WS frame, with no length prefix.

use std::sync::Arc;

use audiopus::coder::Decoder;
use audiopus::{Channels, SampleRate};
use tokio::sync::Semaphore;

use crate::error::{GatewayError, Result};

fn sample_rate_of(hz: u32) -> Result<SampleRate> {
    match hz {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(GatewayError::Codec(format!("unsupported Opus sample rate: {other}"))),
    }
}

fn channels_of(count: u8) -> Result<Channels> {
    match count {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(GatewayError::Codec(format!("unsupported channel count: {other}"))),
    }
}

/// Decode one raw Opus packet to 16-bit PCM bytes, bounded by the
/// gateway's shared decode-concurrency semaphore: CPU-bound, shared
/// across sessions, not on the request task.
/// `tokio::task::spawn_blocking` keeps the actual decode off the async
/// executor while the permit caps how many run at once.
pub async fn decode_packet(
    permits: &Arc<Semaphore>,
    packet: Vec<u8>,
    sample_rate: u32,
    channels: u8,
    frame_max_samples: usize,
) -> Result<Vec<u8>> {
    let _permit = permits
        .acquire()
        .await
        .map_err(|_| GatewayError::Codec("opus decode pool closed".to_string()))?;

    let rate = sample_rate_of(sample_rate)?;
    let chans = channels_of(channels)?;

    tokio::task::spawn_blocking(move || {
        let mut decoder =
            Decoder::new(rate, chans).map_err(|e| GatewayError::Codec(e.to_string()))?;
        let mut pcm = vec![0i16; frame_max_samples * channels as usize];
        let written = decoder
            .decode(Some(&packet), &mut pcm, false)
            .map_err(|e| GatewayError::Codec(e.to_string()))?;
        pcm.truncate(written * channels as usize);
        let mut bytes = Vec::with_capacity(pcm.len() * 2);
        for sample in pcm {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(bytes)
    })
    .await
    .map_err(|e| GatewayError::Codec(format!("decode task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_unsupported_sample_rate() {
        let permits = Arc::new(Semaphore::new(1));
        let err = decode_packet(&permits, vec![0u8; 4], 44_100, 1, 960)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Codec(_)));
    }

    #[tokio::test]
    async fn garbage_packet_is_a_codec_error_not_a_panic() {
        let permits = Arc::new(Semaphore::new(1));
        let err = decode_packet(&permits, vec![0xFF, 0xFF, 0xFF], 16_000, 1, 960)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Codec(_)));
    }
}
