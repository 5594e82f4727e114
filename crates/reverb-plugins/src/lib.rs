//! Plugin Router.
//!
//! An async event-driven router built around `Arc<dyn Trait>` dispatch:
//! wake-word normalization/extraction plus a dispatch loop that fans an
//! event out to every subscribed plugin.

pub mod builtin;
mod context;
mod manifest;
mod plugin;
mod router;
mod services;
mod wake_word;

pub use context::{PluginContext, PluginResult};
pub use manifest::{load_manifest, KNOWN_EVENTS};
pub use plugin::Plugin;
pub use router::{button_event_name, PluginRouter};
pub use services::PluginServices;
pub use wake_word::{extract_command_after_wake_word, normalize_text_for_wake_word};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin error: {0}")]
    Failed(String),
    #[error("invalid plugin manifest: {0}")]
    Manifest(String),
    #[error("plugin '{plugin_id}' declares unknown event '{event}'")]
    UnknownEvent { plugin_id: String, event: String },
    #[error("plugin '{0}' has a wake_word condition with no wake_words")]
    MissingWakeWords(String),
}
