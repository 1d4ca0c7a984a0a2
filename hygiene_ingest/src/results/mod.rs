//! # Ingest Results Module
//!
//! - [`IngestReport`] - outcomes and statistics for one source
//! - [`DocumentOutcome`] - what happened to one document
//! - [`DirectoryReport`] - per-file reports for a directory walk

pub mod types;

pub use types::*;
