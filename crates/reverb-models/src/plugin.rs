use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginConditionKind {
    Always,
    WakeWord,
    Conditional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCondition {
    #[serde(rename = "type")]
    pub kind: PluginConditionKind,
    #[serde(default)]
    pub wake_words: Vec<String>,
}

/// Immutable-per-process-start registration loaded from the
/// plugin-configuration YAML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRegistration {
    pub plugin_id: String,
    pub enabled: bool,
    pub events: Vec<String>,
    pub condition: PluginCondition,
    pub access_level: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}
