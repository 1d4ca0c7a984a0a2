//! # Processor Errors

use crate::normalizer::NormalizeError;
use crate::resolution::ResolutionError;
use hygiene_core::logging::codes;
use hygiene_core::{Code, ConfigError};
use std::path::PathBuf;

/// Input and batch-level failures of the ingest processor
///
/// Per-document problems are normally reported in `DocumentOutcome`; they
/// surface here only in fail-fast mode.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("File not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("Not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {label}: {error}")]
    InvalidJson {
        label: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("File '{}' is {size} bytes, limit is {limit}", .path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Batch of {count} {unit} exceeds the limit of {limit}")]
    BatchLimitExceeded {
        count: usize,
        limit: usize,
        unit: &'static str,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Document {index} rejected: {error}")]
    Normalize {
        index: usize,
        #[source]
        error: NormalizeError,
    },

    #[error("Resolution failed: {error}")]
    Resolution {
        index: Option<usize>,
        #[source]
        error: ResolutionError,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl From<ResolutionError> for ProcessorError {
    fn from(error: ResolutionError) -> Self {
        ProcessorError::Resolution { index: None, error }
    }
}

impl ProcessorError {
    /// Check if the same input could succeed on another attempt or after a fix
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProcessorError::FileNotFound { .. }
            | ProcessorError::NotADirectory { .. }
            | ProcessorError::InvalidJson { .. }
            | ProcessorError::FileTooLarge { .. }
            | ProcessorError::BatchLimitExceeded { .. }
            | ProcessorError::Normalize { .. } => true,
            ProcessorError::Resolution { error, .. } => error.is_recoverable(),
            ProcessorError::Io { .. }
            | ProcessorError::Configuration(_)
            | ProcessorError::InvalidConfig { .. }
            | ProcessorError::Walk(_) => false,
        }
    }

    pub fn code(&self) -> Code {
        match self {
            ProcessorError::FileNotFound { .. } | ProcessorError::NotADirectory { .. } => {
                codes::input::FILE_NOT_FOUND
            }
            ProcessorError::Io { .. } | ProcessorError::Walk(_) => codes::input::IO_ERROR,
            ProcessorError::InvalidJson { .. } => codes::input::INVALID_JSON,
            ProcessorError::FileTooLarge { .. } => codes::input::FILE_TOO_LARGE,
            ProcessorError::BatchLimitExceeded { .. } => codes::input::BATCH_LIMIT_EXCEEDED,
            ProcessorError::Configuration(_) | ProcessorError::InvalidConfig { .. } => {
                codes::system::CONFIGURATION_ERROR
            }
            ProcessorError::Normalize { error, .. } => error.code(),
            ProcessorError::Resolution { error, .. } => error.code(),
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ProcessorError::FileNotFound { path } => format!("File not found: {}", path.display()),
            ProcessorError::NotADirectory { path } => {
                format!("Expected a directory of scan exports: {}", path.display())
            }
            ProcessorError::Io { path, source } => {
                format!("Could not read {}: {}", path.display(), source)
            }
            ProcessorError::InvalidJson { label, error } => {
                format!("{} is not valid JSON (line {}): {}", label, error.line(), error)
            }
            ProcessorError::FileTooLarge { path, size, limit } => format!(
                "{} is too large ({} bytes, maximum {})",
                path.display(),
                size,
                limit
            ),
            ProcessorError::BatchLimitExceeded { count, limit, unit } => {
                format!("Too many {} in one batch: {} (maximum {})", unit, count, limit)
            }
            ProcessorError::Configuration(e) => format!("Configuration error: {}", e),
            ProcessorError::InvalidConfig { reason } => format!("Configuration error: {}", reason),
            ProcessorError::Normalize { index, error } => {
                format!("Document {} could not be read: {}", index, error)
            }
            ProcessorError::Resolution { index: Some(index), error } => {
                format!("Document {} could not be stored: {}", index, error)
            }
            ProcessorError::Resolution { index: None, error } => {
                format!("Record store operation failed: {}", error)
            }
            ProcessorError::Walk(e) => format!("Could not walk directory: {}", e),
        }
    }
}
