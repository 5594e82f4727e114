use async_trait::async_trait;

use crate::context::{PluginContext, PluginResult};
use crate::plugin::Plugin;
use crate::PluginError;

/// A contract-conformance fixture, not a production plugin: logs
/// whatever command a `wake_word` condition extracted. Useful as a
/// smoke test for a manifest's wake-word configuration and as the
/// minimal example new plugin authors copy from.
#[derive(Default)]
pub struct WakeWordLogger;

#[async_trait]
impl Plugin for WakeWordLogger {
    async fn on_transcript(&self, ctx: &PluginContext) -> Result<Option<PluginResult>, PluginError> {
        match ctx.data.get("command").and_then(|v| v.as_str()) {
            Some(command) => {
                tracing::info!(user_id = %ctx.user_id, command, "wake word command heard");
                Ok(Some(PluginResult::ok_with_data(serde_json::json!({ "command": command }))))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logs_and_returns_success_when_command_present() {
        let plugin = WakeWordLogger;
        let ctx = PluginContext::new(
            "user-1",
            "transcript.streaming",
            serde_json::json!({"command": "turn off the lights"}),
        );
        let result = plugin.on_transcript(&ctx).await.unwrap().unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn no_op_when_no_command_extracted() {
        let plugin = WakeWordLogger;
        let ctx = PluginContext::new("user-1", "transcript.streaming", serde_json::json!({}));
        assert!(plugin.on_transcript(&ctx).await.unwrap().is_none());
    }
}
