//! Layered process configuration: a TOML file on disk, overridable by
//! environment variables, captured once at worker start and handed out
//! as read-only — a worker that sees stale config exits on the next
//! supervisor tick rather than reloading live.

pub mod limits;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_sqlite_path() -> String {
    "reverb.sqlite3".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_provider")]
    pub streaming_provider: Option<String>,
    #[serde(default)]
    pub batch_provider: Option<String>,
    #[serde(default)]
    pub diarization: bool,
    #[serde(default)]
    pub word_timestamps: bool,
    #[serde(default)]
    pub multilingual: bool,
}

fn default_provider() -> Option<String> {
    Some("mock-streaming-stt".to_string())
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            streaming_provider: default_provider(),
            batch_provider: Some("mock-batch-stt".to_string()),
            diarization: true,
            word_timestamps: true,
            multilingual: false,
        }
    }
}

/// When a conversation has both a streaming and a batch transcript
/// version, run `memory_extraction` once, over the batch version, after
/// `batch_retranscribe` completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PostChainConfig {
    #[serde(default)]
    pub always_batch_retranscribe: bool,
    #[serde(default = "default_true")]
    pub memory_extraction_once_over_batch: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PostChainConfig {
    fn default() -> Self {
        Self {
            always_batch_retranscribe: false,
            memory_extraction_once_over_batch: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub post_chain: PostChainConfig,
    #[serde(default)]
    pub plugin_manifest_path: Option<String>,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default)]
    pub ws_auth_secret: Option<String>,
}

fn default_inactivity_timeout_secs() -> u64 {
    limits::DEFAULT_INACTIVITY_TIMEOUT.as_secs()
}

impl AppConfig {
    /// Load from a TOML file, then apply `REVERB_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        let mut config: AppConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path_ref.display().to_string(),
                source,
            })?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_env_only() -> Self {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("REVERB_REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(path) = std::env::var("REVERB_SQLITE_PATH") {
            self.storage.sqlite_path = path;
        }
        if let Ok(path) = std::env::var("REVERB_PLUGIN_MANIFEST") {
            self.plugin_manifest_path = Some(path);
        }
        if let Ok(secs) = std::env::var("REVERB_INACTIVITY_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.inactivity_timeout_secs = parsed;
            }
        }
        if let Ok(secret) = std::env::var("REVERB_WS_AUTH_SECRET") {
            self.ws_auth_secret = Some(secret);
        }
    }

    pub fn inactivity_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.inactivity_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(
            config.inactivity_timeout_secs,
            limits::DEFAULT_INACTIVITY_TIMEOUT.as_secs()
        );
    }

    #[test]
    fn loads_from_file_and_applies_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[redis]\nurl = \"redis://example:6380\"\n").unwrap();

        std::env::set_var("REVERB_SQLITE_PATH", "/tmp/override.sqlite3");
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.redis.url, "redis://example:6380");
        assert_eq!(config.storage.sqlite_path, "/tmp/override.sqlite3");
        std::env::remove_var("REVERB_SQLITE_PATH");
    }
}
