use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, Notify};

use crate::audio_stream::{AudioConsumer, AudioEntry, AudioStream};
use crate::pubsub::{InterimMessage, InterimPubSub, InterimSubscription};
use crate::result_stream::{ResultEntry, ResultStream};
use crate::{FabricError, Result};

struct Topic {
    entries: Vec<AudioEntry>,
    removed: bool,
    notify: Arc<Notify>,
}

impl Topic {
    fn new() -> Self {
        Topic {
            entries: Vec::new(),
            removed: false,
            notify: Arc::new(Notify::new()),
        }
    }
}

/// In-memory, multi-consumer-group fan-out for the audio stream. Every
/// group opened against a client_id gets its own cursor over the same
/// backing log, mirroring `XREADGROUP`'s per-group delivery.
///
/// The topic map itself is kept behind an inner `Arc` (rather than
/// implementing [`AudioStream`] on `Arc<Self>`) so `Arc<InMemoryAudioStream>`
/// coerces to `Arc<dyn AudioStream>` like every other backend, letting
/// callers hold one trait-object handle regardless of which backend is
/// wired in.
#[derive(Clone, Default)]
pub struct InMemoryAudioStream {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl InMemoryAudioStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AudioStream for InMemoryAudioStream {
    async fn publish(&self, client_id: &str, entry: AudioEntry) -> Result<()> {
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(client_id.to_string()).or_insert_with(Topic::new);
        if topic.removed {
            return Err(FabricError::SessionGone(client_id.to_string()));
        }
        topic.entries.push(entry);
        topic.notify.notify_waiters();
        Ok(())
    }

    async fn set_ttl(&self, client_id: &str, ttl: Duration) -> Result<()> {
        let client_id = client_id.to_string();
        let topics = Arc::clone(&self.topics);
        // Reference implementation relies on the backend's native
        // per-key expiry; this backend only lives for the process, so a
        // delayed background removal is the closest equivalent and is
        // enough for tests that assert post-disconnect drain behavior.
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut topics = topics.lock().await;
            if let Some(topic) = topics.get_mut(&client_id) {
                topic.removed = true;
                topic.notify.notify_waiters();
            }
        });
        Ok(())
    }

    async fn open_consumer_group(
        &self,
        client_id: &str,
        _group: &str,
    ) -> Result<Box<dyn AudioConsumer>> {
        let mut topics = self.topics.lock().await;
        let topic = topics
            .entry(client_id.to_string())
            .or_insert_with(Topic::new);
        Ok(Box::new(MemoryAudioConsumer {
            client_id: client_id.to_string(),
            cursor: 0,
            notify: topic.notify.clone(),
            store: Arc::clone(&self.topics),
        }))
    }
}

struct MemoryAudioConsumer {
    client_id: String,
    cursor: usize,
    notify: Arc<Notify>,
    store: Arc<Mutex<HashMap<String, Topic>>>,
}

#[async_trait]
impl AudioConsumer for MemoryAudioConsumer {
    async fn read_next(&mut self) -> Result<Option<AudioEntry>> {
        loop {
            {
                let topics = self.store.lock().await;
                let Some(topic) = topics.get(&self.client_id) else {
                    return Ok(None);
                };
                if self.cursor < topic.entries.len() {
                    let entry = topic.entries[self.cursor].clone();
                    self.cursor += 1;
                    return Ok(Some(entry));
                }
                if topic.removed {
                    return Ok(None);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&mut self, _chunk_id: &str) -> Result<()> {
        Ok(())
    }
}

struct ResultTopic {
    entries: Vec<ResultEntry>,
}

/// In-memory results stream: append-only per session, read back as a
/// full snapshot for the Aggregator.
#[derive(Default)]
pub struct InMemoryResultStream {
    sessions: Mutex<HashMap<String, ResultTopic>>,
}

impl InMemoryResultStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ResultStream for InMemoryResultStream {
    async fn publish(&self, session_id: &str, entry: ResultEntry) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ResultTopic { entries: Vec::new() })
            .entries
            .push(entry);
        Ok(())
    }

    async fn read_all(&self, session_id: &str) -> Result<Vec<ResultEntry>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(session_id)
            .map(|t| t.entries.clone())
            .unwrap_or_default())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(session_id: &str, seq: u64) -> AudioEntry {
        AudioEntry {
            session_id: session_id.to_string(),
            chunk_id: AudioEntry::format_chunk_id(seq),
            audio: vec![0u8; 4],
            sample_rate: 16000,
            channels: 1,
            sample_width: 2,
            user_id: "user-1".to_string(),
            client_id: session_id.to_string(),
        }
    }

    #[tokio::test]
    async fn two_groups_both_see_every_entry() {
        let stream = InMemoryAudioStream::new();
        stream.publish("sess-1", chunk("sess-1", 0)).await.unwrap();

        let mut persistence = stream
            .open_consumer_group("sess-1", "persistence")
            .await
            .unwrap();
        let mut transcribe = stream
            .open_consumer_group("sess-1", "transcribe")
            .await
            .unwrap();

        stream.publish("sess-1", chunk("sess-1", 1)).await.unwrap();

        let a = persistence.read_next().await.unwrap().unwrap();
        let b = transcribe.read_next().await.unwrap().unwrap();
        assert_eq!(a.chunk_id, "00000");
        assert_eq!(b.chunk_id, "00000");

        let a2 = persistence.read_next().await.unwrap().unwrap();
        let b2 = transcribe.read_next().await.unwrap().unwrap();
        assert_eq!(a2.chunk_id, "00001");
        assert_eq!(b2.chunk_id, "00001");
    }

    #[tokio::test]
    async fn consumer_group_observes_end_sentinel() {
        let stream = InMemoryAudioStream::new();
        let mut consumer = stream.open_consumer_group("sess-1", "persistence").await.unwrap();
        stream
            .publish_end("sess-1", "sess-1", "user-1")
            .await
            .unwrap();
        let entry = consumer.read_next().await.unwrap().unwrap();
        assert!(entry.is_end());
    }

    #[tokio::test]
    async fn results_round_trip_in_publication_order() {
        let results = InMemoryResultStream::new();
        results
            .publish(
                "sess-1",
                ResultEntry {
                    chunk_index: 0,
                    text: "hello".into(),
                    words: vec![],
                    segments: vec![],
                    provider: "deepgram".into(),
                    is_final: true,
                },
            )
            .await
            .unwrap();
        results
            .publish(
                "sess-1",
                ResultEntry {
                    chunk_index: 1,
                    text: "world".into(),
                    words: vec![],
                    segments: vec![],
                    provider: "deepgram".into(),
                    is_final: true,
                },
            )
            .await
            .unwrap();

        let all = results.read_all("sess-1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "hello");

        results.delete("sess-1").await.unwrap();
        assert!(results.read_all("sess-1").await.unwrap().is_empty());
    }
}

/// In-memory `transcription:interim:<session_id>` topic, one
/// `tokio::sync::broadcast` channel per session. A subscriber that joins
/// after a message was published simply misses it — matching real pub/
/// sub, which has no replay; subscribers only ever need messages from
/// now on.
#[derive(Default)]
pub struct InMemoryInterimPubSub {
    channels: Mutex<HashMap<String, broadcast::Sender<InterimMessage>>>,
}

impl InMemoryInterimPubSub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn sender(&self, session_id: &str) -> broadcast::Sender<InterimMessage> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl InterimPubSub for InMemoryInterimPubSub {
    async fn publish(&self, session_id: &str, message: InterimMessage) -> Result<()> {
        let sender = self.sender(session_id).await;
        // No subscribers is not an error: the gateway task may not have
        // attached yet, or may already have disconnected.
        let _ = sender.send(message);
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<Box<dyn InterimSubscription>> {
        let sender = self.sender(session_id).await;
        Ok(Box::new(BroadcastSubscription {
            receiver: sender.subscribe(),
        }))
    }
}

struct BroadcastSubscription {
    receiver: broadcast::Receiver<InterimMessage>,
}

#[async_trait]
impl InterimSubscription for BroadcastSubscription {
    async fn recv(&mut self) -> Option<InterimMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
