use serde::{Deserialize, Serialize};

/// The event payload and metadata handed to a plugin hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginContext {
    pub user_id: String,
    pub event: String,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl PluginContext {
    pub fn new(user_id: impl Into<String>, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            user_id: user_id.into(),
            event: event.into(),
            data,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The outcome of one plugin hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub message: Option<String>,
    pub should_continue: bool,
}

impl PluginResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            should_continue: true,
        }
    }

    pub fn ok_with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            should_continue: true,
        }
    }

    pub fn stop(mut self) -> Self {
        self.should_continue = false;
        self
    }
}
