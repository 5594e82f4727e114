use async_trait::async_trait;
use reverb_models::{Segment, Word};

use crate::stt::SttCapabilities;
use crate::Result;

/// Output of a non-streaming, whole-file transcription. Distinct from
/// [`crate::SttResult`]: a batch provider has no interim/final split,
/// and carries its own model identity since it may differ from
/// whatever did the streaming pass.
#[derive(Debug, Clone)]
pub struct BatchTranscript {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub provider: String,
    pub model: String,
}

/// Batch re-transcription of reconstructed WAV audio. The speaker
/// recognition job's long-audio windowing operates on this trait's
/// output, not on live stream results.
#[async_trait]
pub trait BatchStt: Send + Sync {
    fn capabilities(&self) -> SttCapabilities;

    async fn transcribe_wav(&self, wav_bytes: &[u8]) -> Result<BatchTranscript>;
}
