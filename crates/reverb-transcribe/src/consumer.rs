//! The long-running streaming transcription job: tails the audio stream
//! through its own consumer group, feeds PCM to a provider-specific
//! [`StreamingSession`], and mirrors every result onto the result
//! stream and the interim pub/sub topic.

use std::sync::Arc;

use reverb_fabric::{AudioStream, InterimMessage, InterimPubSub, ResultEntry, ResultStream};
use reverb_session::{KeyValueStore, SessionStore};
use tokio_util::sync::CancellationToken;

use crate::stt::{SpeechToText, SttResult};

#[derive(Debug, Clone)]
pub struct TranscriptionConsumerConfig {
    pub session_id: String,
    pub client_id: String,
    pub provider: String,
}

fn transcription_complete_key(session_id: &str) -> String {
    format!("transcription:complete:{session_id}")
}

/// Run the transcription consumer until the `END` sentinel arrives, the
/// audio stream disappears, or `cancel` fires.
#[allow(clippy::too_many_arguments)]
pub async fn run_transcription_consumer(
    config: TranscriptionConsumerConfig,
    audio_stream: Arc<dyn AudioStream>,
    results: Arc<dyn ResultStream>,
    interim: Arc<dyn InterimPubSub>,
    sessions: Arc<dyn SessionStore>,
    kv: Arc<dyn KeyValueStore>,
    stt: Arc<dyn SpeechToText>,
    cancel: CancellationToken,
) -> crate::Result<()> {
    let mut streaming = match stt.new_session(&config.session_id).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(session_id = %config.session_id, %err, "transcription consumer: provider session failed to start");
            let _ = sessions
                .set_transcription_error(&config.session_id, err.to_string())
                .await;
            let _ = kv
                .set(&transcription_complete_key(&config.session_id), "error".into(), None)
                .await;
            return Err(err);
        }
    };

    let mut consumer = match audio_stream
        .open_consumer_group(&config.client_id, "transcribe")
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::warn!(client_id = %config.client_id, %err, "transcription consumer: could not open consumer group");
            return Ok(());
        }
    };

    let mut chunk_index: u64 = 0;
    let mut ok = true;

    loop {
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(session_id = %config.session_id, "transcription consumer cancelled");
                break;
            }
            entry = consumer.read_next() => entry,
        };

        let Some(entry) = entry.ok().flatten() else {
            tracing::info!(session_id = %config.session_id, "transcription consumer: audio stream gone, exiting");
            break;
        };

        if entry.is_end() {
            let _ = consumer.ack(&entry.chunk_id).await;
            match streaming.finish().await {
                Ok(batch) => {
                    for result in batch {
                        publish(&results, &interim, &config, chunk_index, result).await;
                        chunk_index += 1;
                    }
                }
                Err(err) => {
                    tracing::error!(session_id = %config.session_id, %err, "transcription consumer: finish() failed");
                    let _ = sessions
                        .set_transcription_error(&config.session_id, err.to_string())
                        .await;
                    ok = false;
                }
            }
            break;
        }

        match streaming
            .push_audio(&entry.audio, entry.sample_rate, entry.channels, entry.sample_width)
            .await
        {
            Ok(batch) => {
                for result in batch {
                    publish(&results, &interim, &config, chunk_index, result).await;
                    chunk_index += 1;
                }
                let _ = consumer.ack(&entry.chunk_id).await;
            }
            Err(err) => {
                tracing::error!(session_id = %config.session_id, %err, "transcription consumer: provider error");
                let _ = sessions
                    .set_transcription_error(&config.session_id, err.to_string())
                    .await;
                ok = false;
                let _ = consumer.ack(&entry.chunk_id).await;
                break;
            }
        }
    }

    let _ = kv
        .set(
            &transcription_complete_key(&config.session_id),
            if ok { "ok".into() } else { "error".into() },
            None,
        )
        .await;
    Ok(())
}

async fn publish(
    results: &Arc<dyn ResultStream>,
    interim: &Arc<dyn InterimPubSub>,
    config: &TranscriptionConsumerConfig,
    chunk_index: u64,
    result: SttResult,
) {
    let entry = ResultEntry {
        chunk_index,
        text: result.text.clone(),
        words: result.words.clone(),
        segments: result.segments.clone(),
        provider: config.provider.clone(),
        is_final: result.is_final,
    };
    if let Err(err) = results.publish(&config.session_id, entry).await {
        tracing::warn!(session_id = %config.session_id, %err, "transcription consumer: result stream publish failed");
    }
    let message = InterimMessage {
        text: result.text,
        is_final: result.is_final,
        words: result.words,
        segments: result.segments,
    };
    if let Err(err) = interim.publish(&config.session_id, message).await {
        tracing::warn!(session_id = %config.session_id, %err, "transcription consumer: interim publish failed");
    }
}
