// RUNTIME PREFERENCES (Operator Choices)

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerPreferences {
    /// Reject documents whose stored ip_int disagrees with their ip
    pub strict_ip_int: bool,

    /// Keep scanner fields that have no typed counterpart
    pub keep_unknown_fields: bool,

    /// Truncate oversized plugin output instead of rejecting the document
    pub truncate_plugin_output: bool,
}

impl Default for NormalizerPreferences {
    fn default() -> Self {
        Self {
            strict_ip_int: env_flag(env_vars::NORMALIZER_STRICT_IP_INT, false),
            keep_unknown_fields: env_flag(env_vars::NORMALIZER_KEEP_UNKNOWN_FIELDS, true),
            truncate_plugin_output: env_flag(env_vars::NORMALIZER_TRUNCATE_PLUGIN_OUTPUT, true),
        }
    }
}

/// Which observation keeps the latest flag when two share a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    IncomingWins,
    CurrentWins,
}

impl TiePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "incoming" | "incoming_wins" => Some(TiePolicy::IncomingWins),
            "current" | "current_wins" => Some(TiePolicy::CurrentWins),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverPreferences {
    /// Store out-of-order observations as history rather than dropping them
    pub keep_history: bool,

    /// Tie-break rule for equal observation times
    pub tie_policy: TiePolicy,

    /// Whether to log every flag flip at debug level
    pub log_flag_changes: bool,

    /// A ticket closed within this many days is reopened rather than replaced
    pub ticket_reopen_days: u32,
}

impl Default for ResolverPreferences {
    fn default() -> Self {
        Self {
            keep_history: env_flag(env_vars::RESOLVER_KEEP_HISTORY, true),
            tie_policy: env::var(env_vars::RESOLVER_TIE_POLICY)
                .ok()
                .and_then(|v| TiePolicy::parse(&v))
                .unwrap_or(TiePolicy::IncomingWins),
            log_flag_changes: env_flag(env_vars::RESOLVER_LOG_FLAG_CHANGES, false),
            ticket_reopen_days: env::var(env_vars::RESOLVER_TICKET_REOPEN_DAYS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingPreferences {
    /// Whether to use structured JSON logging
    pub use_structured_logging: bool,

    /// Whether to enable console output
    pub enable_console_logging: bool,

    /// Minimum level that reaches the logger
    pub min_log_level: LogLevel,

    /// Whether to tag events with the source currently being ingested
    pub include_source_context: bool,
}

impl Default for LoggingPreferences {
    fn default() -> Self {
        Self {
            use_structured_logging: env_flag(env_vars::LOGGING_USE_STRUCTURED, false),
            enable_console_logging: env_flag(env_vars::LOGGING_ENABLE_CONSOLE, false),
            min_log_level: env::var(env_vars::LOGGING_MIN_LEVEL)
                .ok()
                .and_then(|v| parse_log_level(&v))
                .unwrap_or(LogLevel::Info),
            include_source_context: env_flag(env_vars::LOGGING_INCLUDE_SOURCE_CONTEXT, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Convert to events::LogLevel for compatibility
    pub fn to_events_log_level(&self) -> crate::logging::events::LogLevel {
        match self {
            LogLevel::Error => crate::logging::events::LogLevel::Error,
            LogLevel::Warning => crate::logging::events::LogLevel::Warning,
            LogLevel::Info => crate::logging::events::LogLevel::Info,
            LogLevel::Debug => crate::logging::events::LogLevel::Debug,
        }
    }
}

/// Parse log level from string (used for environment variables)
fn parse_log_level(level: &str) -> Option<LogLevel> {
    match level.to_lowercase().as_str() {
        "error" | "0" => Some(LogLevel::Error),
        "warning" | "warn" | "1" => Some(LogLevel::Warning),
        "info" | "2" => Some(LogLevel::Info),
        "debug" | "3" => Some(LogLevel::Debug),
        _ => None,
    }
}

/// Errors raised while loading runtime configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub normalizer: NormalizerPreferences,
    pub resolver: ResolverPreferences,
    pub logging: LoggingPreferences,
}

impl RuntimeConfig {
    /// Parse preferences from TOML; missing sections fall back to environment defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load preferences from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

/// Environment variable names for configuration
pub mod env_vars {
    // Normalizer
    pub const NORMALIZER_STRICT_IP_INT: &str = "HYGIENE_NORMALIZER_STRICT_IP_INT";
    pub const NORMALIZER_KEEP_UNKNOWN_FIELDS: &str = "HYGIENE_NORMALIZER_KEEP_UNKNOWN_FIELDS";
    pub const NORMALIZER_TRUNCATE_PLUGIN_OUTPUT: &str = "HYGIENE_NORMALIZER_TRUNCATE_PLUGIN_OUTPUT";

    // Resolver
    pub const RESOLVER_KEEP_HISTORY: &str = "HYGIENE_RESOLVER_KEEP_HISTORY";
    pub const RESOLVER_TIE_POLICY: &str = "HYGIENE_RESOLVER_TIE_POLICY";
    pub const RESOLVER_LOG_FLAG_CHANGES: &str = "HYGIENE_RESOLVER_LOG_FLAG_CHANGES";
    pub const RESOLVER_TICKET_REOPEN_DAYS: &str = "HYGIENE_RESOLVER_TICKET_REOPEN_DAYS";

    // Logging
    pub const LOGGING_USE_STRUCTURED: &str = "HYGIENE_LOGGING_USE_STRUCTURED";
    pub const LOGGING_ENABLE_CONSOLE: &str = "HYGIENE_LOGGING_ENABLE_CONSOLE";
    pub const LOGGING_MIN_LEVEL: &str = "HYGIENE_LOGGING_MIN_LEVEL";
    pub const LOGGING_INCLUDE_SOURCE_CONTEXT: &str = "HYGIENE_LOGGING_INCLUDE_SOURCE_CONTEXT";
}
