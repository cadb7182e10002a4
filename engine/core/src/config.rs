//! Engine Configuration
//!
//! Layered settings for the decoder, progress estimator and session driver.
//! The optional file lives at
//! `$XDG_CONFIG_HOME/stream-engine/engine.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [decoder]
//! max_line_bytes = 1048576
//!
//! [progress]
//! ceiling = 90
//! status_weight = 5
//! action_weight = 10
//! observation_weight = 10
//!
//! [session]
//! idle_timeout_ms = 30000   # 0 disables
//! snapshot_channel = true
//!
//! [classifier.aliases]
//! reasoning = "thought"
//! answer = "final"
//! ```
//!
//! # Environment Variables
//!
//! - `STREAM_ENGINE_MAX_LINE_BYTES`
//! - `STREAM_ENGINE_PROGRESS_CEILING`
//! - `STREAM_ENGINE_IDLE_TIMEOUT_MS`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::KindTable;
use crate::decoder::DEFAULT_MAX_LINE_BYTES;
use crate::progress::ProgressConfig;

/// Environment variable for the decoder line limit
pub const ENV_MAX_LINE_BYTES: &str = "STREAM_ENGINE_MAX_LINE_BYTES";

/// Environment variable for the progress ceiling
pub const ENV_PROGRESS_CEILING: &str = "STREAM_ENGINE_PROGRESS_CEILING";

/// Environment variable for the idle timeout
pub const ENV_IDLE_TIMEOUT_MS: &str = "STREAM_ENGINE_IDLE_TIMEOUT_MS";

// =============================================================================
// Error Types
// =============================================================================

/// Configuration could not be loaded or is out of range
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("cannot read {path}: {source}")]
    ReadError {
        /// File that was opened
        path: PathBuf,
        /// I/O failure
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`EngineToml`]
    #[error("malformed engine config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid engine config: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Highest-priority layer that contributed a value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command line
    Cli,
    /// `STREAM_ENGINE_*` variables
    Env,
    /// `engine.toml`
    File,
    /// Built-in defaults
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => f.write_str("cli"),
            Self::Env => f.write_str("env"),
            Self::File => f.write_str("file"),
            Self::Default => f.write_str("defaults"),
        }
    }
}

// =============================================================================
// File Layout
// =============================================================================

/// `[decoder]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderToml {
    /// Longest accepted line in bytes
    pub max_line_bytes: Option<usize>,
}

/// `[progress]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressToml {
    /// Highest value before completion
    pub ceiling: Option<u8>,
    /// Increment per status message
    pub status_weight: Option<u8>,
    /// Increment per action step
    pub action_weight: Option<u8>,
    /// Increment per observation step
    pub observation_weight: Option<u8>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Idle timeout in milliseconds (0 disables)
    pub idle_timeout_ms: Option<u64>,
    /// Whether to publish snapshots on a watch channel
    pub snapshot_channel: Option<bool>,
}

/// `[classifier]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierToml {
    /// Extra discriminants, each mapped onto a built-in one
    pub aliases: BTreeMap<String, String>,
}

/// Whole `engine.toml` document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineToml {
    /// Decoder section
    pub decoder: DecoderToml,
    /// Progress section
    pub progress: ProgressToml,
    /// Session section
    pub session: SessionToml,
    /// Classifier section
    pub classifier: ClassifierToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Resolved engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Longest accepted line in bytes
    pub max_line_bytes: usize,

    /// Progress weights and ceiling
    pub progress: ProgressConfig,

    /// Fail the session when no chunk arrives for this long
    pub idle_timeout: Option<Duration>,

    /// Whether the engine publishes snapshots while running
    pub snapshot_channel: bool,

    /// Discriminant aliases (alias → built-in discriminant)
    pub aliases: BTreeMap<String, String>,

    /// File the values were read from
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            progress: ProgressConfig::default(),
            idle_timeout: None,
            snapshot_channel: true,
            aliases: BTreeMap::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl EngineConfig {
    /// Built-in defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer the configuration was resolved from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Override the recorded layer
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a progress ceiling of 100
    /// or more, a zero line limit, or an alias pointing at an unknown
    /// discriminant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.progress.ceiling >= 100 {
            return Err(ConfigError::ValidationError(format!(
                "progress ceiling must be below 100, got {}",
                self.progress.ceiling
            )));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_line_bytes must be greater than 0".to_string(),
            ));
        }
        let table = KindTable::default();
        for (alias, target) in &self.aliases {
            if table.lookup(target).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "alias `{alias}` points at unknown discriminant `{target}`"
                )));
            }
        }
        Ok(())
    }

    /// Build the classifier table, including configured aliases
    #[must_use]
    pub fn kind_table(&self) -> KindTable {
        let mut table = KindTable::default();
        for (alias, target) in &self.aliases {
            if !table.add_alias(alias.clone(), target) {
                tracing::warn!(
                    alias = %alias,
                    target = %target,
                    "Ignoring alias to unknown discriminant"
                );
            }
        }
        table
    }
}

// =============================================================================
// Loading
// =============================================================================

/// `engine.toml` under the platform config directory
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stream-engine").join("engine.toml"))
}

/// Load configuration from the default path, environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// resulting values fail validation. A missing file is not an error.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration, reading `path` when given
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// the resulting values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` in place of the process environment
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<EngineConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = EngineConfig::default();

    match path {
        Some(file) if file.exists() => {
            let raw = std::fs::read_to_string(&file).map_err(|source| ConfigError::ReadError {
                path: file.clone(),
                source,
            })?;
            let document: EngineToml = toml::from_str(&raw)?;
            apply_toml_config(&mut config, &document);
            tracing::info!(path = %file.display(), "Engine config file loaded");
            config.config_file_path = Some(file);
            config.source = ConfigSource::File;
        }
        Some(file) => {
            tracing::debug!(path = %file.display(), "No engine config file, using defaults");
        }
        None => {}
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

fn idle_timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Copy every value present in the file
fn apply_toml_config(config: &mut EngineConfig, toml: &EngineToml) {
    if let Some(limit) = toml.decoder.max_line_bytes {
        config.max_line_bytes = limit;
    }

    if let Some(ceiling) = toml.progress.ceiling {
        config.progress.ceiling = ceiling;
    }
    if let Some(weight) = toml.progress.status_weight {
        config.progress.status_weight = weight;
    }
    if let Some(weight) = toml.progress.action_weight {
        config.progress.action_weight = weight;
    }
    if let Some(weight) = toml.progress.observation_weight {
        config.progress.observation_weight = weight;
    }

    if let Some(ms) = toml.session.idle_timeout_ms {
        config.idle_timeout = idle_timeout_from_ms(ms);
    }
    if let Some(enabled) = toml.session.snapshot_channel {
        config.snapshot_channel = enabled;
    }

    config.aliases.extend(
        toml.classifier
            .aliases
            .iter()
            .map(|(alias, target)| (alias.clone(), target.clone())),
    );
}

fn read_env<T, F>(env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Overlay `STREAM_ENGINE_*` values
fn apply_env_config<F>(config: &mut EngineConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(limit) = read_env::<usize, _>(&env, ENV_MAX_LINE_BYTES) {
        config.max_line_bytes = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(ceiling) = read_env::<u8, _>(&env, ENV_PROGRESS_CEILING) {
        config.progress.ceiling = ceiling;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = read_env::<u64, _>(&env, ENV_IDLE_TIMEOUT_MS) {
        config.idle_timeout = idle_timeout_from_ms(ms);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Command-Line Overrides
// =============================================================================

/// Values given on the command line
///
/// Applied after [`load_config`]; validate again afterwards.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Line limit override
    pub max_line_bytes: Option<usize>,

    /// Idle timeout override (milliseconds, 0 disables)
    pub idle_timeout_ms: Option<u64>,

    /// Progress ceiling override
    pub progress_ceiling: Option<u8>,
}

impl ConfigOverrides {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set line limit override
    #[must_use]
    pub fn with_max_line_bytes(mut self, bytes: usize) -> Self {
        self.max_line_bytes = Some(bytes);
        self
    }

    /// Set idle timeout override
    #[must_use]
    pub fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = Some(ms);
        self
    }

    /// Set progress ceiling override
    #[must_use]
    pub fn with_progress_ceiling(mut self, ceiling: u8) -> Self {
        self.progress_ceiling = Some(ceiling);
        self
    }

    /// Write the overrides into `config`
    pub fn apply(&self, config: &mut EngineConfig) {
        if self.max_line_bytes.is_some()
            || self.idle_timeout_ms.is_some()
            || self.progress_ceiling.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(limit) = self.max_line_bytes {
            config.max_line_bytes = limit;
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.idle_timeout = idle_timeout_from_ms(ms);
        }
        if let Some(ceiling) = self.progress_ceiling {
            config.progress.ceiling = ceiling;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
