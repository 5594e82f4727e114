use std::sync::Arc;

use reverb_persistence::ConversationRepository;
use reverb_session::{KeyValueStore, SessionStore};
use uuid::Uuid;

use crate::context::PluginResult;
use crate::router::PluginRouter;
use crate::PluginError;

fn conversation_current_key(session_id: &str) -> String {
    format!("conversation:current:{session_id}")
}

/// The services API exposed to plugins via their execution context: a
/// narrow, named surface rather than direct access to the
/// session/conversation stores, so a plugin can't reach into state it has
/// no business touching.
pub struct PluginServices {
    sessions: Arc<dyn SessionStore>,
    kv: Arc<dyn KeyValueStore>,
    conversations: Arc<dyn ConversationRepository>,
    router: Arc<PluginRouter>,
}

impl PluginServices {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        kv: Arc<dyn KeyValueStore>,
        conversations: Arc<dyn ConversationRepository>,
        router: Arc<PluginRouter>,
    ) -> Self {
        Self {
            sessions,
            kv,
            conversations,
            router,
        }
    }

    /// Sets `session.conversation_close_requested`; the monitor picks it
    /// up on its next tick.
    pub async fn close_conversation(&self, session_id: &str, reason: &str) -> Result<(), PluginError> {
        self.sessions
            .request_conversation_close_if_unset(session_id, reason.to_string())
            .await
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        Ok(())
    }

    /// Toggles the `starred` flag on whichever conversation is currently
    /// open for `session_id`.
    pub async fn star_conversation(&self, session_id: &str) -> Result<bool, PluginError> {
        let raw = self
            .kv
            .get(&conversation_current_key(session_id))
            .await
            .map_err(|err| PluginError::Failed(err.to_string()))?
            .ok_or_else(|| PluginError::Failed(format!("no open conversation for session {session_id}")))?;
        let conversation_id = Uuid::parse_str(&raw)
            .map_err(|err| PluginError::Failed(format!("invalid conversation id: {err}")))?;

        let updated = self
            .conversations
            .mutate(
                conversation_id,
                Box::new(|conversation| conversation.starred = !conversation.starred),
            )
            .await
            .map_err(|err| PluginError::Failed(err.to_string()))?;
        Ok(updated.starred)
    }

    /// Invokes `plugin_id`'s `on_plugin_action` directly, bypassing the
    /// normal event-subscription dispatch.
    pub async fn call_plugin(
        &self,
        plugin_id: &str,
        action: &str,
        data: serde_json::Value,
        user_id: Option<&str>,
    ) -> PluginResult {
        self.router
            .invoke_plugin_action(plugin_id, action, data, user_id.unwrap_or("system"))
            .await
    }
}
