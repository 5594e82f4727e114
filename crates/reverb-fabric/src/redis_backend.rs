use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::audio_stream::{AudioConsumer, AudioEntry, AudioStream};
use crate::pubsub::{InterimMessage, InterimPubSub, InterimSubscription};
use crate::result_stream::{ResultEntry, ResultStream};
use crate::{FabricError, Result};

fn audio_stream_key(client_id: &str) -> String {
    format!("audio:stream:{client_id}")
}

fn results_stream_key(session_id: &str) -> String {
    format!("transcription:results:{session_id}")
}

fn interim_topic(session_id: &str) -> String {
    format!("transcription:interim:{session_id}")
}

/// Redis Streams-backed audio fabric. One stream key per client_id;
/// every consumer group created against it (`open_consumer_group`) sees
/// the full history independently via `XREADGROUP`, matching the
/// in-memory backend's fan-out semantics.
#[derive(Clone)]
pub struct RedisAudioStream {
    conn: ConnectionManager,
}

impl RedisAudioStream {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisAudioStream { conn }
    }
}

#[async_trait]
impl AudioStream for RedisAudioStream {
    async fn publish(&self, client_id: &str, entry: AudioEntry) -> Result<()> {
        let payload = serde_json::to_vec(&entry).map_err(|e| FabricError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        let key = audio_stream_key(client_id);
        conn.xadd::<_, _, _, _, ()>(&key, "*", &[("entry", payload)])
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn set_ttl(&self, client_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = audio_stream_key(client_id);
        let _: () = conn
            .expire(&key, ttl.as_secs() as i64)
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn open_consumer_group(
        &self,
        client_id: &str,
        group: &str,
    ) -> Result<Box<dyn AudioConsumer>> {
        let mut conn = self.conn.clone();
        let key = audio_stream_key(client_id);
        let created: std::result::Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&key, group, "0")
            .await;
        if let Err(e) = created {
            // BUSYGROUP means the group already exists (crash-recovery
            // resume path); any other error is a real backend failure.
            if !e.to_string().contains("BUSYGROUP") {
                return Err(FabricError::Backend(e.to_string()));
            }
        }
        Ok(Box::new(RedisAudioConsumer {
            conn: self.conn.clone(),
            key,
            group: group.to_string(),
            consumer: format!("{group}-1"),
        }))
    }
}

struct RedisAudioConsumer {
    conn: ConnectionManager,
    key: String,
    group: String,
    consumer: String,
}

#[async_trait]
impl AudioConsumer for RedisAudioConsumer {
    async fn read_next(&mut self) -> Result<Option<AudioEntry>> {
        use redis::streams::{StreamReadOptions, StreamReadReply};

        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(0);
        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.key], &[">"], &opts)
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;

        for stream_key in reply.keys {
            for id in stream_key.ids {
                let Some(redis::Value::BulkString(bytes)) = id.map.get("entry") else {
                    continue;
                };
                let entry: AudioEntry =
                    serde_json::from_slice(bytes).map_err(|e| FabricError::Backend(e.to_string()))?;
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn ack(&mut self, chunk_id: &str) -> Result<()> {
        let _: () = self
            .conn
            .xack(&self.key, &self.group, &[chunk_id])
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Redis Streams-backed results fabric. Single writer, read back as a
/// full ordered snapshot for the Aggregator.
#[derive(Clone)]
pub struct RedisResultStream {
    conn: ConnectionManager,
}

impl RedisResultStream {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisResultStream { conn }
    }
}

#[async_trait]
impl ResultStream for RedisResultStream {
    async fn publish(&self, session_id: &str, entry: ResultEntry) -> Result<()> {
        let payload = serde_json::to_vec(&entry).map_err(|e| FabricError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.xadd::<_, _, _, _, ()>(results_stream_key(session_id), "*", &[("entry", payload)])
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn read_all(&self, session_id: &str) -> Result<Vec<ResultEntry>> {
        use redis::streams::{StreamRangeReply, StreamId};

        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrange_all(results_stream_key(session_id))
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;

        let mut entries = Vec::with_capacity(reply.ids.len());
        for StreamId { map, .. } in reply.ids {
            let Some(redis::Value::BulkString(bytes)) = map.get("entry") else {
                continue;
            };
            let entry: ResultEntry =
                serde_json::from_slice(bytes).map_err(|e| FabricError::Backend(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(results_stream_key(session_id))
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Redis `PUBLISH`/`SUBSCRIBE`-backed interim transcript fan-out
/// (`transcription:interim:<session_id>`). Publishing reuses the shared
/// `ConnectionManager`; subscribing opens its own dedicated connection
/// per subscriber, since a connection driving `SUBSCRIBE` can no
/// longer issue ordinary commands.
#[derive(Clone)]
pub struct RedisInterimPubSub {
    conn: ConnectionManager,
    client: redis::Client,
}

impl RedisInterimPubSub {
    pub fn new(conn: ConnectionManager, client: redis::Client) -> Self {
        RedisInterimPubSub { conn, client }
    }
}

#[async_trait]
impl InterimPubSub for RedisInterimPubSub {
    async fn publish(&self, session_id: &str, message: InterimMessage) -> Result<()> {
        let payload = serde_json::to_vec(&message).map_err(|e| FabricError::Backend(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(interim_topic(session_id), payload)
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<Box<dyn InterimSubscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        pubsub
            .subscribe(interim_topic(session_id))
            .await
            .map_err(|e| FabricError::Backend(e.to_string()))?;
        Ok(Box::new(RedisInterimSubscription { pubsub }))
    }
}

struct RedisInterimSubscription {
    pubsub: redis::aio::PubSub,
}

#[async_trait]
impl InterimSubscription for RedisInterimSubscription {
    async fn recv(&mut self) -> Option<InterimMessage> {
        let mut stream = self.pubsub.on_message();
        let msg = stream.next().await?;
        let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
        drop(stream);
        serde_json::from_slice(&payload).ok()
    }
}
