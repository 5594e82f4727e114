//! `event_dispatch` stage: the chain's terminal job. Dispatches
//! `conversation.complete` to plugins exactly once, carrying the final
//! `end_reason` — a dedicated job so the streaming and file-upload
//! ingestion paths share the same emission point. The exactly-once
//! guarantee falls out of the DAG itself: this job only runs after
//! `title_summary`, which only runs after `memory_extraction`
//! (`chain.rs`), and `reverb_jobs::JobQueue` runs each job at most once.

use reverb_persistence::ConversationRepository;
use reverb_plugins::PluginRouter;
use uuid::Uuid;

use crate::Result;

pub async fn run_event_dispatch(
    conversation_id: Uuid,
    conversations: &dyn ConversationRepository,
    router: &PluginRouter,
) -> Result<()> {
    let conversation = conversations.get(conversation_id).await?;
    let data = serde_json::json!({
        "conversation_id": conversation.conversation_id,
        "end_reason": conversation.end_reason,
        "title": conversation.title,
        "summary": conversation.summary,
        "processing_status": conversation.processing_status,
    });

    router
        .dispatch_event("conversation.complete", &conversation.user_id, data, None)
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reverb_models::Conversation;
    use reverb_persistence::InMemoryConversationRepository;
    use reverb_plugins::{Plugin, PluginContext, PluginResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPlugin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        async fn on_conversation_complete(
            &self,
            _ctx: &PluginContext,
        ) -> std::result::Result<Option<PluginResult>, reverb_plugins::PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(PluginResult::ok()))
        }
    }

    #[tokio::test]
    async fn dispatches_conversation_complete_once() {
        let conversations = InMemoryConversationRepository::new();
        let mut conversation = Conversation::new_recording("user-1", "client-1");
        conversation.close(reverb_models::EndReason::UserStopped);
        let id = conversation.conversation_id;
        conversations.create(conversation).await.unwrap();

        let plugin = Arc::new(CountingPlugin {
            calls: AtomicUsize::new(0),
        });
        let mut router = PluginRouter::new();
        router.register_plugin(
            reverb_models::PluginRegistration {
                plugin_id: "counter".into(),
                enabled: true,
                events: vec!["conversation.complete".into()],
                condition: reverb_models::PluginCondition {
                    kind: reverb_models::PluginConditionKind::Always,
                    wake_words: vec![],
                },
                access_level: None,
                config: serde_json::json!({}),
            },
            plugin.clone(),
        );

        run_event_dispatch(id, conversations.as_ref(), &router).await.unwrap();
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
    }
}
