//! # Ingest Configuration

use super::errors::ProcessorError;
use crate::normalizer::NormalizeContext;
use chrono::{DateTime, Utc};
use hygiene_core::config::compile_time::batch::MAX_DOCUMENTS_PER_BATCH;
use hygiene_core::config::{
    LoggingPreferences, NormalizerPreferences, ResolverPreferences, RuntimeConfig,
};
use hygiene_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the ingest processor
///
/// Can be built in code or read from TOML; fields missing from the file
/// keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Owner for documents that carry none
    pub default_owner: Option<String>,

    /// Observation time for Nessus findings without a `time` field
    pub observed_at: Option<DateTime<Utc>>,

    /// Stop at the first failing document or file
    pub fail_fast: bool,

    /// Per-batch document cap, never above the compile-time limit
    pub max_documents: Option<usize>,

    /// Descend into subdirectories when ingesting a directory
    pub recursive: bool,

    pub normalizer: NormalizerPreferences,

    pub resolver: ResolverPreferences,

    /// Installed as the process-wide logging setup when the processor is built
    pub logging: Option<LoggingPreferences>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_owner: None,
            observed_at: None,
            fail_fast: false,
            max_documents: None,
            recursive: true,
            normalizer: NormalizerPreferences::default(),
            resolver: ResolverPreferences::default(),
            logging: None,
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take normalizer, resolver and logging preferences from a runtime config
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            normalizer: runtime.normalizer.clone(),
            resolver: runtime.resolver.clone(),
            logging: Some(runtime.logging.clone()),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_default_owner(mut self, owner: impl Into<String>) -> Self {
        self.default_owner = Some(owner.into());
        self
    }

    pub fn with_observed_at(mut self, time: DateTime<Utc>) -> Self {
        self.observed_at = Some(time);
        self
    }

    /// Enable or disable fail-fast mode (stop on first error)
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_documents(mut self, max_documents: Option<usize>) -> Self {
        self.max_documents = max_documents;
        self
    }

    /// Enable or disable recursive directory scanning
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_normalizer_preferences(mut self, preferences: NormalizerPreferences) -> Self {
        self.normalizer = preferences;
        self
    }

    pub fn with_resolver_preferences(mut self, preferences: ResolverPreferences) -> Self {
        self.resolver = preferences;
        self
    }

    pub fn with_logging_preferences(mut self, preferences: LoggingPreferences) -> Self {
        self.logging = Some(preferences);
        self
    }

    pub fn validate(&self) -> Result<(), ProcessorError> {
        match self.max_documents {
            Some(0) => Err(ProcessorError::InvalidConfig {
                reason: "max_documents must be at least 1".to_string(),
            }),
            Some(limit) if limit > MAX_DOCUMENTS_PER_BATCH => Err(ProcessorError::InvalidConfig {
                reason: format!(
                    "max_documents {} exceeds the build limit of {}",
                    limit, MAX_DOCUMENTS_PER_BATCH
                ),
            }),
            _ => {
                if matches!(&self.default_owner, Some(owner) if owner.trim().is_empty()) {
                    return Err(ProcessorError::InvalidConfig {
                        reason: "default_owner must not be blank".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Effective per-batch document limit
    pub fn document_limit(&self) -> usize {
        self.max_documents
            .unwrap_or(MAX_DOCUMENTS_PER_BATCH)
            .min(MAX_DOCUMENTS_PER_BATCH)
    }

    pub fn normalize_context(&self) -> NormalizeContext {
        NormalizeContext {
            default_owner: self.default_owner.clone(),
            observed_at: self.observed_at,
            kind_hint: None,
        }
    }
}
