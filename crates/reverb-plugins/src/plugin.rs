use async_trait::async_trait;

use crate::context::{PluginContext, PluginResult};
use crate::PluginError;

/// The plugin trait, dispatched dynamically as `Arc<dyn Plugin>`.
/// Default bodies return `Ok(None)`: a plugin overrides only the
/// hooks it cares about.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn on_transcript(&self, _ctx: &PluginContext) -> Result<Option<PluginResult>, PluginError> {
        Ok(None)
    }

    async fn on_conversation_complete(
        &self,
        _ctx: &PluginContext,
    ) -> Result<Option<PluginResult>, PluginError> {
        Ok(None)
    }

    async fn on_memory_processed(
        &self,
        _ctx: &PluginContext,
    ) -> Result<Option<PluginResult>, PluginError> {
        Ok(None)
    }

    async fn on_plugin_action(&self, _ctx: &PluginContext) -> Result<Option<PluginResult>, PluginError> {
        Ok(None)
    }
}
