//! Consolidated log codes and classification system
//!
//! Single source of truth for every code the ingestion pipeline emits and the
//! metadata attached to it.

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// CODE WRAPPER TYPE
// ============================================================================

/// Universal code wrapper for both error and success codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(&'static str);

impl Code {
    pub const fn new(code: &'static str) -> Self {
        Self(code)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// CLASSIFICATION TYPES
// ============================================================================

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }
}

/// Complete metadata for a code
#[derive(Debug, Clone)]
pub struct CodeMetadata {
    pub code: &'static str,
    pub category: &'static str,
    pub severity: Severity,
    pub recoverable: bool,
    pub description: &'static str,
    pub recommended_action: &'static str,
}

impl CodeMetadata {
    pub fn new(
        code: &'static str,
        category: &'static str,
        severity: Severity,
        recoverable: bool,
        description: &'static str,
        recommended_action: &'static str,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            recoverable,
            description,
            recommended_action,
        }
    }
}

// ============================================================================
// CODE CONSTANTS
// ============================================================================

/// System error codes
pub mod system {
    use super::Code;

    pub const INTERNAL_ERROR: Code = Code::new("ERR001");
    pub const INITIALIZATION_FAILURE: Code = Code::new("ERR002");
    pub const CONFIGURATION_ERROR: Code = Code::new("ERR003");
}

/// Input (file and batch) error codes
pub mod input {
    use super::Code;

    pub const FILE_NOT_FOUND: Code = Code::new("E005");
    pub const IO_ERROR: Code = Code::new("E006");
    pub const FILE_TOO_LARGE: Code = Code::new("E007");
    pub const INVALID_JSON: Code = Code::new("E008");
    pub const BATCH_LIMIT_EXCEEDED: Code = Code::new("E009");
}

/// Document normalization error codes
pub mod normalization {
    use super::Code;

    pub const NOT_AN_OBJECT: Code = Code::new("E020");
    pub const MISSING_FIELD: Code = Code::new("E021");
    pub const INVALID_FIELD: Code = Code::new("E022");
    pub const UNKNOWN_SOURCE: Code = Code::new("E023");
    pub const KIND_MISMATCH: Code = Code::new("E024");
    pub const INVALID_ADDRESS: Code = Code::new("E025");
    pub const IP_INT_MISMATCH: Code = Code::new("E026");
    pub const DOCUMENT_TOO_LARGE: Code = Code::new("E027");
    pub const FIELD_TRUNCATED: Code = Code::new("W020");
    pub const IP_INT_CORRECTED: Code = Code::new("W021");
    pub const EXTRA_FIELDS_DROPPED: Code = Code::new("W022");
    pub const OBSERVATION_TIME_DEFAULTED: Code = Code::new("W023");
    pub const EXTRA_KEY_COLLISION: Code = Code::new("W024");
}

/// Latest-state resolution error codes
pub mod resolution {
    use super::Code;

    pub const COMMIT_CONFLICT: Code = Code::new("W040");
    pub const RETRIES_EXHAUSTED: Code = Code::new("E040");
    pub const STORE_FAILURE: Code = Code::new("E041");
    pub const STORE_POISONED: Code = Code::new("E042");
}

/// Success codes
pub mod success {
    use super::Code;

    pub const SYSTEM_INITIALIZATION_COMPLETED: Code = Code::new("I001");
    pub const DOCUMENT_NORMALIZED: Code = Code::new("I010");
    pub const RECORD_INSERTED: Code = Code::new("I020");
    pub const RECORD_SUPERSEDED: Code = Code::new("I021");
    pub const RECORD_HISTORICAL: Code = Code::new("I022");
    pub const LATEST_FLAGS_CLEARED: Code = Code::new("I023");
    pub const BATCH_COMPLETE: Code = Code::new("I030");
    pub const SNAPSHOT_TAGGED: Code = Code::new("I040");
    pub const HOST_STATE_CHANGED: Code = Code::new("I050");
    pub const TICKET_OPENED: Code = Code::new("I060");
    pub const TICKET_REOPENED: Code = Code::new("I061");
    pub const TICKET_CLOSED: Code = Code::new("I062");
}

// ============================================================================
// METADATA REGISTRY
// ============================================================================

static CODE_REGISTRY: OnceLock<HashMap<&'static str, CodeMetadata>> = OnceLock::new();

fn get_code_registry() -> &'static HashMap<&'static str, CodeMetadata> {
    CODE_REGISTRY.get_or_init(|| {
        let entries = [
            // System
            CodeMetadata::new(
                "ERR001",
                "System",
                Severity::Critical,
                false,
                "Critical internal error",
                "File a bug report with the failing input",
            ),
            CodeMetadata::new(
                "ERR002",
                "System",
                Severity::Critical,
                false,
                "Logging or configuration initialization failed",
                "Check configuration files and environment variables",
            ),
            CodeMetadata::new(
                "ERR003",
                "System",
                Severity::High,
                false,
                "Runtime configuration could not be loaded",
                "Fix the configuration file syntax or path",
            ),
            // Input
            CodeMetadata::new(
                "E005",
                "Input",
                Severity::Medium,
                true,
                "Input file not found at specified path",
                "Check the path and ensure the file exists",
            ),
            CodeMetadata::new(
                "E006",
                "Input",
                Severity::Medium,
                true,
                "I/O error while reading input",
                "Check permissions and file system health",
            ),
            CodeMetadata::new(
                "E007",
                "Input",
                Severity::Medium,
                true,
                "Input file exceeds maximum size limit",
                "Split the export into smaller files",
            ),
            CodeMetadata::new(
                "E008",
                "Input",
                Severity::Medium,
                true,
                "Input is not valid JSON",
                "Re-export the scanner documents as JSON",
            ),
            CodeMetadata::new(
                "E009",
                "Input",
                Severity::Medium,
                true,
                "Batch exceeds the configured document or file limit",
                "Ingest the input in smaller batches",
            ),
            // Normalization
            CodeMetadata::new(
                "E020",
                "Normalization",
                Severity::Low,
                true,
                "Scanner document is not a JSON object",
                "Remove non-object entries from the input",
            ),
            CodeMetadata::new(
                "E021",
                "Normalization",
                Severity::Low,
                true,
                "Required scanner field is missing",
                "Check the scanner export or supply a default owner/time",
            ),
            CodeMetadata::new(
                "E022",
                "Normalization",
                Severity::Low,
                true,
                "Scanner field has an invalid value",
                "Inspect the offending field in the source document",
            ),
            CodeMetadata::new(
                "E023",
                "Normalization",
                Severity::Low,
                true,
                "Document names an unsupported scanner source",
                "Only nmap and nessus documents are accepted",
            ),
            CodeMetadata::new(
                "E024",
                "Normalization",
                Severity::Low,
                true,
                "Document kind hint disagrees with the document",
                "Remove the hint or fix the document source",
            ),
            CodeMetadata::new(
                "E025",
                "Normalization",
                Severity::Low,
                true,
                "IP address is not a valid dotted-quad IPv4 address",
                "Fix the ip field",
            ),
            CodeMetadata::new(
                "E026",
                "Normalization",
                Severity::Medium,
                true,
                "Stored ip_int disagrees with the ip field",
                "Disable strict ip_int checking or repair the source data",
            ),
            CodeMetadata::new(
                "E027",
                "Normalization",
                Severity::Medium,
                true,
                "Document exceeds the maximum allowed size",
                "Reduce document size or raise the compile-time limit",
            ),
            CodeMetadata::new(
                "W020",
                "Normalization",
                Severity::Low,
                true,
                "Oversized field was truncated",
                "No action required",
            ),
            CodeMetadata::new(
                "W021",
                "Normalization",
                Severity::Low,
                true,
                "Stored ip_int was recomputed from the ip field",
                "Repair the source data if this repeats",
            ),
            CodeMetadata::new(
                "W022",
                "Normalization",
                Severity::Low,
                true,
                "Unmapped scanner fields beyond the retention limit were dropped",
                "Raise max_extra_fields if the dropped fields matter",
            ),
            CodeMetadata::new(
                "W023",
                "Normalization",
                Severity::Low,
                true,
                "Document had no observation time; ingest time was used",
                "Set observed_at for exports that carry no time",
            ),
            CodeMetadata::new(
                "W024",
                "Normalization",
                Severity::Low,
                true,
                "Two scanner fields mapped to the same stored name",
                "Rename the field in the export if both values matter",
            ),
            // Resolution
            CodeMetadata::new(
                "W040",
                "Resolution",
                Severity::Low,
                true,
                "Latest holder changed between read and commit",
                "No action required; the commit is retried",
            ),
            CodeMetadata::new(
                "E040",
                "Resolution",
                Severity::High,
                true,
                "Commit retries exhausted under contention",
                "Reduce concurrent writers for the same key",
            ),
            CodeMetadata::new(
                "E041",
                "Resolution",
                Severity::High,
                false,
                "Record store operation failed",
                "Check the record store backend",
            ),
            CodeMetadata::new(
                "E042",
                "Resolution",
                Severity::Critical,
                false,
                "Record store lock was poisoned by a panicking writer",
                "Restart the ingestion process",
            ),
        ];

        entries.into_iter().map(|meta| (meta.code, meta)).collect()
    })
}

/// Look up metadata for a code
pub fn get_metadata(code: &str) -> Option<&'static CodeMetadata> {
    get_code_registry().get(code)
}

pub fn get_description(code: &str) -> &'static str {
    get_metadata(code)
        .map(|m| m.description)
        .unwrap_or("Unknown error")
}

pub fn get_category(code: &str) -> &'static str {
    match get_metadata(code) {
        Some(m) => m.category,
        None if code.starts_with('I') => "Success",
        None => "General",
    }
}

pub fn get_severity(code: &str) -> Severity {
    get_metadata(code)
        .map(|m| m.severity)
        .unwrap_or(Severity::Low)
}

pub fn get_action(code: &str) -> &'static str {
    get_metadata(code)
        .map(|m| m.recommended_action)
        .unwrap_or("No specific action available")
}

pub fn is_recoverable(code: &str) -> bool {
    get_metadata(code).map(|m| m.recoverable).unwrap_or(true)
}
