use std::collections::HashMap;
use std::sync::Arc;

use reverb_models::{PluginCondition, PluginConditionKind, PluginRegistration};

use crate::context::{PluginContext, PluginResult};
use crate::plugin::Plugin;
use crate::wake_word::{extract_command_after_wake_word, normalize_text_for_wake_word};

/// An inverted index from event name to subscribed plugin ids, built
/// once at registration time, and a dispatch loop that evaluates each
/// plugin's condition, calls the event-family callback, and swallows
/// per-plugin errors without halting the event as a whole.
pub struct PluginRouter {
    plugins: HashMap<String, (PluginRegistration, Arc<dyn Plugin>)>,
    by_event: HashMap<String, Vec<String>>,
}

impl Default for PluginRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRouter {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
            by_event: HashMap::new(),
        }
    }

    /// Register a plugin under the event subscriptions declared in its
    /// manifest entry.
    pub fn register_plugin(&mut self, registration: PluginRegistration, plugin: Arc<dyn Plugin>) {
        let plugin_id = registration.plugin_id.clone();
        for event in &registration.events {
            self.by_event
                .entry(event.clone())
                .or_default()
                .push(plugin_id.clone());
        }
        tracing::info!(plugin_id = %plugin_id, events = ?registration.events, "registered plugin");
        self.plugins.insert(plugin_id, (registration, plugin));
    }

    pub fn registration(&self, plugin_id: &str) -> Option<&PluginRegistration> {
        self.plugins.get(plugin_id).map(|(reg, _)| reg)
    }

    /// Dispatch `event` to every subscribed, enabled plugin whose
    /// condition matches, in registration order, stopping early if a
    /// plugin returns `should_continue=false`.
    pub async fn dispatch_event(
        &self,
        event: &str,
        user_id: &str,
        data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Vec<PluginResult> {
        let mut results = Vec::new();
        let Some(plugin_ids) = self.by_event.get(event) else {
            return results;
        };

        for plugin_id in plugin_ids {
            let Some((registration, plugin)) = self.plugins.get(plugin_id) else {
                continue;
            };
            if !registration.enabled {
                continue;
            }

            let mut data = data.clone();
            if !Self::should_execute(&registration.condition, &mut data) {
                continue;
            }

            let ctx = PluginContext::new(user_id, event, data)
                .with_metadata(metadata.clone().unwrap_or_else(|| serde_json::json!({})));

            match Self::execute(plugin.as_ref(), event, &ctx).await {
                Ok(Some(result)) => {
                    let should_continue = result.should_continue;
                    results.push(result);
                    if !should_continue {
                        tracing::info!(plugin_id = %plugin_id, "stopped further processing");
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(plugin_id = %plugin_id, %err, "plugin execution failed");
                }
            }
        }

        results
    }

    /// Bypasses normal event dispatch and directly invokes a specific
    /// plugin's `on_plugin_action`.
    pub async fn invoke_plugin_action(
        &self,
        plugin_id: &str,
        action: &str,
        data: serde_json::Value,
        user_id: &str,
    ) -> PluginResult {
        let Some((registration, plugin)) = self.plugins.get(plugin_id) else {
            return PluginResult::failed(format!("plugin '{plugin_id}' not found"));
        };
        if !registration.enabled {
            return PluginResult::failed(format!("plugin '{plugin_id}' is disabled"));
        }

        let mut data = data;
        if let Some(obj) = data.as_object_mut() {
            obj.insert("action".to_string(), serde_json::json!(action));
        }
        let ctx = PluginContext::new(user_id, "plugin_action", data);

        match plugin.on_plugin_action(&ctx).await {
            Ok(Some(result)) => result,
            Ok(None) => PluginResult::ok(),
            Err(err) => PluginResult::failed(err.to_string()),
        }
    }

    fn should_execute(condition: &PluginCondition, data: &mut serde_json::Value) -> bool {
        match condition.kind {
            PluginConditionKind::Always => true,
            PluginConditionKind::Conditional => true,
            PluginConditionKind::WakeWord => {
                let transcript = data
                    .get("transcript")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let normalized_transcript = normalize_text_for_wake_word(&transcript);

                for wake_word in &condition.wake_words {
                    let normalized_wake_word = normalize_text_for_wake_word(wake_word);
                    if !normalized_wake_word.is_empty()
                        && normalized_transcript.starts_with(&normalized_wake_word)
                    {
                        let command = extract_command_after_wake_word(&transcript, wake_word);
                        if let Some(obj) = data.as_object_mut() {
                            obj.insert("command".to_string(), serde_json::json!(command));
                            obj.insert(
                                "original_transcript".to_string(),
                                serde_json::json!(transcript),
                            );
                        }
                        return true;
                    }
                }
                false
            }
        }
    }

    async fn execute(
        plugin: &dyn Plugin,
        event: &str,
        ctx: &PluginContext,
    ) -> Result<Option<PluginResult>, crate::PluginError> {
        if event.starts_with("transcript.") {
            plugin.on_transcript(ctx).await
        } else if event.starts_with("conversation.") {
            plugin.on_conversation_complete(ctx).await
        } else if event.starts_with("memory.") {
            plugin.on_memory_processed(ctx).await
        } else {
            Ok(None)
        }
    }
}

/// Fixed button-state-to-event mapping. `LONG_PRESS` has no default
/// event (reserved).
pub fn button_event_name(state: &str) -> Option<&'static str> {
    match state {
        "SINGLE_PRESS" => Some("button.single_press"),
        "DOUBLE_PRESS" => Some("button.double_press"),
        _ => None,
    }
}
