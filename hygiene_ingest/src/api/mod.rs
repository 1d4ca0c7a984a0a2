//! # Public API for scanner ingestion
//!
//! [`IngestProcessor`] takes raw scanner documents from memory, strings,
//! files or directories and reports what happened to each one.

pub mod config;
pub mod errors;
pub mod processor;

pub use crate::results::{
    DirectoryReport, DocumentOutcome, FileFailure, IngestReport, IngestStatistics, OutcomeError,
};
pub use config::IngestConfig;
pub use errors::ProcessorError;
pub use processor::IngestProcessor;
