use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Payload published on `transcription:interim:<session_id>`.
/// Forwarded by the gateway to the client as `{type:
/// "interim_transcript", data: ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterimMessage {
    pub text: String,
    pub is_final: bool,
    pub words: Vec<reverb_models::Word>,
    pub segments: Vec<reverb_models::Segment>,
}

/// A single subscriber's receive half. One gateway task per connection
/// holds one of these, subscribing to the interim-results pub/sub topic
/// and forwarding each message to the client.
#[async_trait]
pub trait InterimSubscription: Send {
    async fn recv(&mut self) -> Option<InterimMessage>;
}

/// Single writer (the streaming transcription consumer), many
/// transient readers (one per connected gateway task).
#[async_trait]
pub trait InterimPubSub: Send + Sync {
    async fn publish(&self, session_id: &str, message: InterimMessage) -> Result<()>;

    async fn subscribe(&self, session_id: &str) -> Result<Box<dyn InterimSubscription>>;
}
