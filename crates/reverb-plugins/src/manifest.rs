use std::collections::HashMap;

use reverb_models::{PluginCondition, PluginConditionKind, PluginRegistration};
use serde::Deserialize;

use crate::PluginError;

/// The fixed event vocabulary. Nothing else is valid in a plugin's
/// `events` list.
pub const KNOWN_EVENTS: &[&str] = &[
    "conversation.complete",
    "transcript.streaming",
    "transcript.batch",
    "memory.processed",
    "conversation.starred",
    "button.single_press",
    "button.double_press",
    "plugin_action",
];

fn default_condition() -> PluginCondition {
    PluginCondition {
        kind: PluginConditionKind::Always,
        wake_words: Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct RawPluginEntry {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default = "default_condition")]
    condition: PluginCondition,
    #[serde(default)]
    access_level: Option<String>,
    #[serde(flatten)]
    config: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    plugins: HashMap<String, RawPluginEntry>,
}

/// Parse and validate a plugin-configuration YAML document: unknown
/// event names and unknown condition types are rejected at load time.
pub fn load_manifest(yaml: &str) -> Result<HashMap<String, PluginRegistration>, PluginError> {
    let raw: RawManifest =
        serde_yaml::from_str(yaml).map_err(|err| PluginError::Manifest(err.to_string()))?;

    let mut plugins = HashMap::with_capacity(raw.plugins.len());
    for (plugin_id, entry) in raw.plugins {
        for event in &entry.events {
            if !KNOWN_EVENTS.contains(&event.as_str()) {
                return Err(PluginError::UnknownEvent {
                    plugin_id: plugin_id.clone(),
                    event: event.clone(),
                });
            }
        }
        if entry.condition.kind == PluginConditionKind::WakeWord && entry.condition.wake_words.is_empty() {
            return Err(PluginError::MissingWakeWords(plugin_id.clone()));
        }

        plugins.insert(
            plugin_id.clone(),
            PluginRegistration {
                plugin_id,
                enabled: entry.enabled,
                events: entry.events,
                condition: entry.condition,
                access_level: entry.access_level,
                config: serde_json::to_value(entry.config).unwrap_or_else(|_| serde_json::json!({})),
            },
        );
    }
    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_well_formed_manifest() {
        let yaml = r#"
plugins:
  wake_word_logger:
    enabled: true
    events: [transcript.streaming]
    condition:
      type: wake_word
      wake_words: ["hey vivi"]
    log_level: debug
"#;
        let plugins = load_manifest(yaml).unwrap();
        let reg = &plugins["wake_word_logger"];
        assert!(reg.enabled);
        assert_eq!(reg.condition.kind, PluginConditionKind::WakeWord);
        assert_eq!(reg.config["log_level"], "debug");
    }

    #[test]
    fn rejects_unknown_event_name() {
        let yaml = r#"
plugins:
  bad:
    enabled: true
    events: [transcript.not_a_real_event]
"#;
        assert!(matches!(
            load_manifest(yaml),
            Err(PluginError::UnknownEvent { .. })
        ));
    }

    #[test]
    fn rejects_wake_word_condition_with_no_words() {
        let yaml = r#"
plugins:
  bad:
    enabled: true
    events: [transcript.streaming]
    condition:
      type: wake_word
      wake_words: []
"#;
        assert!(matches!(
            load_manifest(yaml),
            Err(PluginError::MissingWakeWords(_))
        ));
    }

    #[test]
    fn defaults_to_always_condition_when_omitted() {
        let yaml = r#"
plugins:
  simple:
    enabled: true
    events: [conversation.complete]
"#;
        let plugins = load_manifest(yaml).unwrap();
        assert_eq!(plugins["simple"].condition.kind, PluginConditionKind::Always);
    }
}
