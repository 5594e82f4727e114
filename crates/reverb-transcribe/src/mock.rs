//! Provider-agnostic test doubles. Neither type talks to a network; both
//! exist so the rest of the workspace (and this crate's own consumer
//! loop tests) can exercise the full pipeline without a real STT vendor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reverb_models::{Segment, SegmentType, Word};

use crate::batch::{BatchStt, BatchTranscript};
use crate::stt::{SpeechToText, SttCapabilities, SttResult, StreamingSession};
use crate::Result;

/// Emits one final [`SttResult`] every time accumulated PCM crosses
/// `words_per_chunk` bytes, echoing a deterministic word count so tests
/// can assert on the aggregator without needing real speech.
pub struct MockStreamingStt {
    capabilities: SttCapabilities,
    bytes_per_result: usize,
}

impl MockStreamingStt {
    pub fn new(bytes_per_result: usize) -> Self {
        Self {
            capabilities: SttCapabilities {
                diarization: false,
                word_timestamps: true,
                multilingual: false,
            },
            bytes_per_result,
        }
    }
}

impl Default for MockStreamingStt {
    fn default() -> Self {
        Self::new(3200) // 100ms @ 16kHz/16-bit/mono
    }
}

#[async_trait]
impl SpeechToText for MockStreamingStt {
    fn capabilities(&self) -> SttCapabilities {
        self.capabilities
    }

    async fn new_session(&self, session_id: &str) -> Result<Box<dyn StreamingSession>> {
        Ok(Box::new(MockStreamingSession {
            session_id: session_id.to_string(),
            pending_bytes: 0,
            bytes_per_result: self.bytes_per_result,
            chunk_seq: 0,
            elapsed_seconds: 0.0,
        }))
    }
}

struct MockStreamingSession {
    session_id: String,
    pending_bytes: usize,
    bytes_per_result: usize,
    chunk_seq: u64,
    elapsed_seconds: f64,
}

impl MockStreamingSession {
    fn emit(&mut self, sample_rate: u32, channels: u8, sample_width: u8) -> SttResult {
        let samples = self.bytes_per_result / (sample_width.max(1) as usize);
        let duration =
            samples as f64 / channels.max(1) as f64 / sample_rate.max(1) as f64;
        let start = self.elapsed_seconds;
        let end = start + duration;
        self.elapsed_seconds = end;
        self.chunk_seq += 1;
        let text = format!("mock word {}", self.chunk_seq);
        SttResult {
            text: text.clone(),
            words: vec![Word {
                word: text.clone(),
                start,
                end,
                confidence: 1.0,
                speaker: None,
            }],
            segments: vec![Segment {
                start,
                end,
                text,
                speaker: "SPEAKER_00".to_string(),
                segment_type: SegmentType::Speech,
            }],
            is_final: true,
        }
    }
}

#[async_trait]
impl StreamingSession for MockStreamingSession {
    async fn push_audio(
        &mut self,
        pcm: &[u8],
        sample_rate: u32,
        channels: u8,
        sample_width: u8,
    ) -> Result<Vec<SttResult>> {
        self.pending_bytes += pcm.len();
        let mut results = Vec::new();
        while self.pending_bytes >= self.bytes_per_result {
            self.pending_bytes -= self.bytes_per_result;
            results.push(self.emit(sample_rate, channels, sample_width));
        }
        tracing::trace!(session_id = %self.session_id, results = results.len(), "mock stt push_audio");
        Ok(results)
    }

    async fn finish(&mut self) -> Result<Vec<SttResult>> {
        if self.pending_bytes == 0 {
            return Ok(Vec::new());
        }
        self.pending_bytes = 0;
        Ok(vec![self.emit(16_000, 1, 2)])
    }
}

/// Always returns a fixed transcript, with a counter so repeated calls in
/// a test are distinguishable.
pub struct MockBatchStt {
    calls: AtomicU64,
}

impl MockBatchStt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
        })
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchStt for MockBatchStt {
    fn capabilities(&self) -> SttCapabilities {
        SttCapabilities {
            diarization: false,
            word_timestamps: true,
            multilingual: false,
        }
    }

    async fn transcribe_wav(&self, wav_bytes: &[u8]) -> Result<BatchTranscript> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let text = format!("mock batch transcript #{n} ({} bytes)", wav_bytes.len());
        Ok(BatchTranscript {
            text: text.clone(),
            words: vec![Word {
                word: text,
                start: 0.0,
                end: 1.0,
                confidence: 1.0,
                speaker: None,
            }],
            segments: vec![],
            provider: "mock".to_string(),
            model: "mock-batch-1".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streaming_session_emits_once_per_configured_chunk() {
        let stt = MockStreamingStt::new(320); // 10ms @ 16kHz mono 16-bit
        let mut session = stt.new_session("sess-1").await.unwrap();

        let results = session
            .push_audio(&[0u8; 320], 16_000, 1, 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_final);

        let results = session
            .push_audio(&[0u8; 100], 16_000, 1, 2)
            .await
            .unwrap();
        assert!(results.is_empty());

        let flushed = session.finish().await.unwrap();
        assert_eq!(flushed.len(), 1);
    }

    #[tokio::test]
    async fn batch_stt_counts_calls() {
        let stt = MockBatchStt::new();
        stt.transcribe_wav(&[0u8; 10]).await.unwrap();
        stt.transcribe_wav(&[0u8; 10]).await.unwrap();
        assert_eq!(stt.call_count(), 2);
    }
}
