//! Configuration types for the lesson engine.
//!
//! Everything has a default so a missing `lesson-engine.json` yields a
//! working engine; the file only needs the keys that differ.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "lesson-engine.json";

/// Upper bound on lives; the session model never holds more than this.
pub const MAX_LIVES: u8 = 3;

fn default_content_dir() -> String {
    "lessons".to_string()
}

fn default_progress_dir() -> String {
    ".lesson/progress".to_string()
}

const fn default_max_lives() -> u8 {
    MAX_LIVES
}

const fn default_passive_delay_ms() -> u64 {
    3000
}

const fn default_video_threshold() -> f64 {
    0.8
}

const fn default_wrong_flash_ms() -> u64 {
    600
}

const fn default_min_words() -> usize {
    10
}

const fn default_port() -> u16 {
    3000
}

const fn default_finished_session_ttl_secs() -> u64 {
    600
}

const fn default_event_capacity() -> usize {
    100
}

/// Main configuration for the lesson engine and its host surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Directory holding `<lessonId>.json` lesson documents.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,

    /// Directory holding `<userId>.json` learner progress documents.
    #[serde(default = "default_progress_dir")]
    pub progress_dir: String,

    /// Lives a learner starts each attempt with.
    #[serde(default = "default_max_lives")]
    pub max_lives: u8,

    /// Exposure rules for passive steps.
    #[serde(default)]
    pub passive: PassiveConfig,

    /// Interaction tuning for `match_pairs` steps.
    #[serde(default)]
    pub match_pairs: MatchPairsConfig,

    /// Defaults for reflection steps.
    #[serde(default)]
    pub reflection: ReflectionConfig,

    /// HTTP host surface settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Broadcast buffer size per event subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            progress_dir: default_progress_dir(),
            max_lives: default_max_lives(),
            passive: PassiveConfig::default(),
            match_pairs: MatchPairsConfig::default(),
            reflection: ReflectionConfig::default(),
            server: ServerConfig::default(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `lesson-engine.json`; returns defaults when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            EngineError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `lesson-engine.json` inside `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ConfigParseError` if the file cannot be read or
    /// is not valid JSON, and `EngineError::ConfigValidationError` if a value
    /// is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(EngineError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| EngineError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `maxLives` must be within `1..=3`
    /// - `passive.videoThreshold` must be within `(0, 1]`
    /// - `eventCapacity` must be greater than 0
    /// - `contentDir` and `progressDir` must not be empty
    pub fn validate(&self) -> Result<()> {
        if self.max_lives == 0 || self.max_lives > MAX_LIVES {
            return Err(EngineError::config_validation(
                format!("maxLives must be between 1 and {MAX_LIVES}"),
                "Set maxLives to 3 (or fewer for a harder mode) in your lesson-engine.json",
            ));
        }

        let threshold = self.passive.video_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(EngineError::config_validation(
                "passive.videoThreshold must be in (0, 1]",
                "Use a playback fraction such as 0.8 in your lesson-engine.json",
            ));
        }

        if self.event_capacity == 0 {
            return Err(EngineError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 (100 is a good default)",
            ));
        }

        if self.content_dir.trim().is_empty() {
            return Err(EngineError::config_validation(
                "contentDir must not be empty",
                "Point contentDir at the directory containing lesson JSON files",
            ));
        }

        if self.progress_dir.trim().is_empty() {
            return Err(EngineError::config_validation(
                "progressDir must not be empty",
                "Point progressDir at a writable directory",
            ));
        }

        Ok(())
    }

    /// The session rules derived from this configuration.
    #[must_use]
    pub const fn session_rules(&self) -> SessionRules {
        SessionRules {
            max_lives: self.max_lives,
            video_threshold: self.passive.video_threshold,
            reflection_min_words: self.reflection.default_min_words,
        }
    }
}

/// Exposure rules for passive steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassiveConfig {
    /// Delay before a `content` step unlocks, in milliseconds.
    #[serde(default = "default_passive_delay_ms")]
    pub content_delay_ms: u64,

    /// Delay before a `code_snippet` step unlocks, in milliseconds.
    #[serde(default = "default_passive_delay_ms")]
    pub code_delay_ms: u64,

    /// Fraction of a video that must be played before it unlocks.
    #[serde(default = "default_video_threshold")]
    pub video_threshold: f64,
}

impl Default for PassiveConfig {
    fn default() -> Self {
        Self {
            content_delay_ms: default_passive_delay_ms(),
            code_delay_ms: default_passive_delay_ms(),
            video_threshold: default_video_threshold(),
        }
    }
}

impl PassiveConfig {
    /// Exposure delay for content steps.
    #[must_use]
    pub const fn content_delay(&self) -> Duration {
        Duration::from_millis(self.content_delay_ms)
    }

    /// Exposure delay for code snippet steps.
    #[must_use]
    pub const fn code_delay(&self) -> Duration {
        Duration::from_millis(self.code_delay_ms)
    }
}

/// Interaction tuning for `match_pairs` steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPairsConfig {
    /// How long a rejected pair stays in its "wrong" state, in milliseconds.
    #[serde(default = "default_wrong_flash_ms")]
    pub wrong_flash_ms: u64,
}

impl Default for MatchPairsConfig {
    fn default() -> Self {
        Self {
            wrong_flash_ms: default_wrong_flash_ms(),
        }
    }
}

/// Defaults for reflection steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionConfig {
    /// Minimum words when the step does not specify its own minimum.
    #[serde(default = "default_min_words")]
    pub default_min_words: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            default_min_words: default_min_words(),
        }
    }
}

/// HTTP host surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long a finished session stays addressable after its last
    /// request, in seconds.
    #[serde(default = "default_finished_session_ttl_secs")]
    pub finished_session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            finished_session_ttl_secs: default_finished_session_ttl_secs(),
        }
    }
}

/// The subset of configuration the session state machine consults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionRules {
    /// Lives at the start of every attempt.
    pub max_lives: u8,
    /// Playback fraction that unlocks a video step.
    pub video_threshold: f64,
    /// Reflection minimum when the step sets none.
    pub reflection_min_words: usize,
}

impl Default for SessionRules {
    fn default() -> Self {
        EngineConfig::default().session_rules()
    }
}
