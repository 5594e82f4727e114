//! Named thresholds and timeouts for the ingest and conversation lifecycle
//! pipeline. Centralizing these as constants (overridable via
//! [`crate::AppConfig`]) is the single source of truth for pipeline
//! tuning.

use std::time::Duration;

/// Minimum word count for `has_speech`.
pub const SPEECH_MIN_WORDS: usize = 1;

/// Minimum duration (seconds) of speech for `has_speech`.
pub const SPEECH_MIN_SECONDS: f64 = 0.5;

/// Grace period for last-moment final results once the session has
/// already gone finalizing/finished.
pub const SPEECH_DETECTION_GRACE: Duration = Duration::from_secs(15);

/// How long to poll for a speaker-check result.
pub const SPEAKER_CHECK_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Speech-detection job timeout, with graceful-exit margin.
pub const SPEECH_DETECTION_TIMEOUT: Duration = Duration::from_secs(24 * 3600);
pub const SPEECH_DETECTION_EXIT_MARGIN: Duration = Duration::from_secs(60);

/// Conversation monitor tick interval.
pub const MONITOR_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Conversation monitor job timeout (3h minus 60s margin).
pub const MONITOR_TIMEOUT: Duration = Duration::from_secs(3 * 3600 - 60);

/// Hard cap on a single conversation's duration.
pub const MONITOR_MAX_DURATION: Duration = Duration::from_secs(3 * 3600);

/// Default inactivity timeout, measured in audio time.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Wait budgets during conversation close.
pub const CLOSE_WAIT_TRANSCRIPTION_COMPLETE: Duration = Duration::from_secs(30);
pub const CLOSE_WAIT_AUDIO_CHUNKS: Duration = Duration::from_secs(30);

/// Batch-mode rolling flush threshold.
pub const BATCH_ROLLING_FLUSH: Duration = Duration::from_secs(30 * 60);

/// Audio stream retention after disconnect.
pub const AUDIO_STREAM_DISCONNECT_TTL: Duration = Duration::from_secs(60);

/// Session record TTL after a conversation ends.
pub const SESSION_TTL_AFTER_CONVERSATION: Duration = Duration::from_secs(3600);

/// `session:conversation_count:<session_id>` TTL.
pub const CONVERSATION_COUNT_TTL: Duration = Duration::from_secs(3600);

/// `conversation:current:<session_id>` TTL.
pub const CONVERSATION_CURRENT_TTL: Duration = Duration::from_secs(24 * 3600);

/// Audio persistence worker timeout.
pub const PERSISTENCE_WORKER_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Duration of each persisted audio chunk.
pub const PERSISTENCE_CHUNK_DURATION: Duration = Duration::from_secs(30);

/// Speaker-recognition long-audio windowing.
pub const SPEAKER_LONG_AUDIO_THRESHOLD: Duration = Duration::from_secs(1500);
pub const SPEAKER_WINDOW_SEGMENT: Duration = Duration::from_secs(900);
pub const SPEAKER_WINDOW_OVERLAP: Duration = Duration::from_secs(30);
