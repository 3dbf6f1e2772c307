//! Configuration for the sync engine.
//!
//! Layered, highest priority first:
//! 1. Values set programmatically on [`SyncConfig`]
//! 2. TOML config file (`~/.config/murmur/sync.toml`)
//! 3. Compiled defaults
//!
//! A missing config file is not an error (defaults are used). An explicit
//! path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Could not determine the user's config directory.
    #[error("could not determine config directory (no HOME or XDG_CONFIG_HOME)")]
    NoConfigDir,
}

/// Which open views suppress unread counting for incoming messages.
///
/// The product never settled whether a conversation open in a background
/// pane of a split view counts as "read as it arrives", so it is a policy,
/// not a constant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnreadPolicy {
    /// Only the conversation rendered in the active detail view suppresses
    /// counting.
    #[default]
    ActiveDetailOnly,
    /// Any visible pane suppresses counting (desktop split view).
    AnyVisiblePane,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    typing: TypingFileConfig,
    unread: UnreadFileConfig,
    sync: SyncFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    ttl_ms: Option<u64>,
    local_stop_after_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

/// `[unread]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UnreadFileConfig {
    policy: Option<UnreadPolicy>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    message_page_size: Option<usize>,
    event_buffer: Option<usize>,
    subscription_buffer: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Typing indicator timings.
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// Remote indicator time-to-live.
    pub ttl: Duration,
    /// Quiet period before reporting the local typing-stop.
    pub local_stop_after: Duration,
    /// How often the engine sweeps for expired indicators.
    pub sweep_interval: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            ttl: crate::typing::TYPING_TTL,
            local_stop_after: crate::typing::LOCAL_STOP_AFTER,
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// Buffer sizes and page limits.
#[derive(Debug, Clone)]
pub struct SyncTuning {
    /// Messages fetched per REST page.
    pub message_page_size: usize,
    /// Capacity of the engine's outward event channel.
    pub event_buffer: usize,
    /// Capacity of per-kind bus subscription channels.
    pub subscription_buffer: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            message_page_size: 50,
            event_buffer: 256,
            subscription_buffer: 64,
        }
    }
}

/// Push-channel reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Fully resolved engine configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Typing indicator timings.
    pub typing: TypingConfig,
    /// Unread counting policy for open views.
    pub unread_policy: UnreadPolicy,
    /// Buffer sizes and page limits.
    pub tuning: SyncTuning,
    /// Push-channel reconnect behavior.
    pub reconnect: ReconnectConfig,
}

impl SyncConfig {
    /// Loads configuration from the default location, falling back to
    /// compiled defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config directory cannot be determined
    /// or an existing file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let path = dir.join("murmur").join("sync.toml");
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from an explicit path. A missing file here is an
    /// error, unlike the default location.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parses a TOML document into a resolved config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseToml`] on syntax or type errors.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;
        let defaults = Self::default();

        Ok(Self {
            typing: TypingConfig {
                ttl: file
                    .typing
                    .ttl_ms
                    .map_or(defaults.typing.ttl, Duration::from_millis),
                local_stop_after: file
                    .typing
                    .local_stop_after_ms
                    .map_or(defaults.typing.local_stop_after, Duration::from_millis),
                sweep_interval: file
                    .typing
                    .sweep_interval_ms
                    .map_or(defaults.typing.sweep_interval, Duration::from_millis),
            },
            unread_policy: file.unread.policy.unwrap_or_default(),
            tuning: SyncTuning {
                message_page_size: file
                    .sync
                    .message_page_size
                    .unwrap_or(defaults.tuning.message_page_size),
                event_buffer: file.sync.event_buffer.unwrap_or(defaults.tuning.event_buffer),
                subscription_buffer: file
                    .sync
                    .subscription_buffer
                    .unwrap_or(defaults.tuning.subscription_buffer),
            },
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                connect_timeout: file
                    .reconnect
                    .connect_timeout_ms
                    .map_or(defaults.reconnect.connect_timeout, Duration::from_millis),
            },
        })
    }
}
