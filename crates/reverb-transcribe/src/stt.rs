use async_trait::async_trait;
use reverb_models::{Segment, Word};

use crate::Result;

/// Capability flags the core's config registry publishes per provider.
/// Downstream consumers (speaker recognition, the Conversation
/// Monitor's segment handling) use these to decide whether they need to
/// fill in what the provider didn't supply.
#[derive(Debug, Clone, Copy, Default)]
pub struct SttCapabilities {
    pub diarization: bool,
    pub word_timestamps: bool,
    pub multilingual: bool,
}

/// One interim or final result out of a streaming provider.
#[derive(Debug, Clone)]
pub struct SttResult {
    pub text: String,
    pub words: Vec<Word>,
    pub segments: Vec<Segment>,
    pub is_final: bool,
}

/// A provider-specific streaming session, created fresh for each audio
/// session (most streaming STT wire protocols are stateful per
/// connection: the provider tracks its own rolling audio context).
#[async_trait]
pub trait StreamingSession: Send {
    /// Feed one chunk of raw PCM and return whatever results the provider
    /// is ready to emit — zero, one, or several (some providers batch).
    async fn push_audio(
        &mut self,
        pcm: &[u8],
        sample_rate: u32,
        channels: u8,
        sample_width: u8,
    ) -> Result<Vec<SttResult>>;

    /// Flush on end-of-stream; the provider may emit a last final result
    /// here that it was holding back pending more context.
    async fn finish(&mut self) -> Result<Vec<SttResult>>;
}

/// Factory for streaming sessions, one per provider. Kept separate from
/// [`StreamingSession`] because the factory is `Send + Sync` and shared
/// across the whole process while each session is single-owner,
/// `Send`-only state private to one consumer task.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn capabilities(&self) -> SttCapabilities;

    async fn new_session(&self, session_id: &str) -> Result<Box<dyn StreamingSession>>;
}
