//! # Ingest Result Types
//!
//! Per-document outcomes and batch reports. Everything here serializes to
//! JSON so a batch can be audited after the fact.

use crate::normalizer::{DocumentKind, NormalizeError, NormalizeWarning};
use crate::resolution::{ResolutionError, Resolution};
use crate::tickets::TicketChange;
use crate::types::RecordKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Why a document was not stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&NormalizeError> for OutcomeError {
    fn from(error: &NormalizeError) -> Self {
        Self {
            code: error.code().as_str().to_string(),
            message: error.to_string(),
            field: error.field().map(str::to_string),
        }
    }
}

impl From<&ResolutionError> for OutcomeError {
    fn from(error: &ResolutionError) -> Self {
        Self {
            code: error.code().as_str().to_string(),
            message: error.to_string(),
            field: None,
        }
    }
}

/// Result of ingesting one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    /// Position of the document in its batch
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<RecordKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<NormalizeWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketChange>,
}

impl DocumentOutcome {
    pub fn resolved(
        index: usize,
        kind: DocumentKind,
        key: RecordKey,
        resolution: Resolution,
        warnings: Vec<NormalizeWarning>,
    ) -> Self {
        Self {
            index,
            kind: Some(kind),
            key: Some(key),
            resolution: Some(resolution),
            error: None,
            warnings,
            ticket: None,
        }
    }

    pub fn failed(index: usize, kind: Option<DocumentKind>, error: OutcomeError) -> Self {
        Self {
            index,
            kind,
            key: None,
            resolution: None,
            error: Some(error),
            warnings: Vec::new(),
            ticket: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn summary(&self) -> String {
        match (&self.resolution, &self.error, &self.key) {
            (Some(resolution), _, Some(key)) => {
                format!("#{} {} {}", self.index, resolution.as_str(), key)
            }
            (_, Some(error), _) => {
                format!("#{} error[{}]: {}", self.index, error.code, error.message)
            }
            _ => format!("#{} no outcome", self.index),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatistics {
    pub total_documents: usize,
    pub inserted: usize,
    pub superseded: usize,
    pub historical: usize,
    pub discarded: usize,
    pub failed: usize,
    pub warnings: usize,
}

impl IngestStatistics {
    pub fn from_outcomes(outcomes: &[DocumentOutcome]) -> Self {
        let mut statistics = Self {
            total_documents: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            statistics.warnings += outcome.warnings.len();
            match (&outcome.resolution, &outcome.error) {
                (_, Some(_)) => statistics.failed += 1,
                (Some(Resolution::Inserted { .. }), None) => statistics.inserted += 1,
                (Some(Resolution::Superseded { .. }), None) => statistics.superseded += 1,
                (Some(Resolution::Historical { .. }), None) => statistics.historical += 1,
                (Some(Resolution::Discarded { .. }), None) => statistics.discarded += 1,
                (None, None) => {}
            }
        }

        statistics
    }

    /// Documents that were stored or deliberately dropped
    pub fn succeeded(&self) -> usize {
        self.inserted + self.superseded + self.historical + self.discarded
    }

    pub fn merge(&mut self, other: &IngestStatistics) {
        self.total_documents += other.total_documents;
        self.inserted += other.inserted;
        self.superseded += other.superseded;
        self.historical += other.historical;
        self.discarded += other.discarded;
        self.failed += other.failed;
        self.warnings += other.warnings;
    }
}

/// Report for one ingested source (a file, a JSON string, or an in-memory batch)
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub outcomes: Vec<DocumentOutcome>,
    pub statistics: IngestStatistics,
}

impl IngestReport {
    pub fn new(source: impl Into<String>, started: DateTime<Utc>, outcomes: Vec<DocumentOutcome>) -> Self {
        let statistics = IngestStatistics::from_outcomes(&outcomes);
        Self {
            source: source.into(),
            started,
            finished: Utc::now(),
            outcomes,
            statistics,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished - self.started).num_milliseconds()
    }

    pub fn is_clean(&self) -> bool {
        self.statistics.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn summary(&self) -> String {
        format!(
            "Ingest Summary:\n\
         Source: {}\n\
         Documents: {}\n\
         Inserted: {}\n\
         Superseded: {}\n\
         Historical: {}\n\
         Discarded: {}\n\
         Failed: {}\n\
         Warnings: {}",
            self.source,
            self.statistics.total_documents,
            self.statistics.inserted,
            self.statistics.superseded,
            self.statistics.historical,
            self.statistics.discarded,
            self.statistics.failed,
            self.statistics.warnings
        )
    }
}

/// A file that could not be ingested at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub directory: PathBuf,
    pub reports: Vec<IngestReport>,
    pub failed_files: Vec<FileFailure>,
    pub statistics: IngestStatistics,
}

impl DirectoryReport {
    pub fn new(directory: PathBuf, reports: Vec<IngestReport>, failed_files: Vec<FileFailure>) -> Self {
        let mut statistics = IngestStatistics::default();
        for report in &reports {
            statistics.merge(&report.statistics);
        }

        Self {
            directory,
            reports,
            failed_files,
            statistics,
        }
    }

    pub fn total_files(&self) -> usize {
        self.reports.len() + self.failed_files.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn summary(&self) -> String {
        format!(
            "Directory Ingest Summary:\n\
         Directory: {}\n\
         Files: {}\n\
         Failed Files: {}\n\
         Documents: {}\n\
         Stored: {}\n\
         Failed Documents: {}",
            self.directory.display(),
            self.total_files(),
            self.failed_files.len(),
            self.statistics.total_documents,
            self.statistics.succeeded(),
            self.statistics.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordId, ScanSource, Subject};
    use std::net::Ipv4Addr;

    fn key() -> RecordKey {
        RecordKey::new("TEST", Ipv4Addr::new(10, 0, 0, 1), ScanSource::Nessus, Subject::Host)
    }

    fn outcomes() -> Vec<DocumentOutcome> {
        vec![
            DocumentOutcome::resolved(
                0,
                DocumentKind::NessusHost,
                key(),
                Resolution::Inserted { id: RecordId::new() },
                vec![NormalizeWarning::IpIntCorrected {
                    stored: 1,
                    computed: 167772161,
                }],
            ),
            DocumentOutcome::resolved(
                1,
                DocumentKind::NessusHost,
                key(),
                Resolution::Discarded {
                    current: RecordId::new(),
                },
                Vec::new(),
            ),
            DocumentOutcome::failed(2, None, OutcomeError::from(&NormalizeError::NotAnObject)),
        ]
    }

    #[test]
    fn test_statistics_count_each_outcome() {
        let statistics = IngestStatistics::from_outcomes(&outcomes());
        assert_eq!(
            statistics,
            IngestStatistics {
                total_documents: 3,
                inserted: 1,
                superseded: 0,
                historical: 0,
                discarded: 1,
                failed: 1,
                warnings: 1,
            }
        );
        assert_eq!(statistics.succeeded(), 2);
    }

    #[test]
    fn test_report_serializes() {
        let report = IngestReport::new("fixture", Utc::now(), outcomes());
        assert!(!report.is_clean());
        assert_eq!(report.failures().count(), 1);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["statistics"]["inserted"], 1);
        assert_eq!(json["outcomes"][0]["resolution"]["resolution"], "inserted");
        assert_eq!(json["outcomes"][0]["warnings"][0]["warning"], "ip_int_corrected");
        assert_eq!(json["outcomes"][2]["error"]["code"], "E020");
        assert!(json["outcomes"][2].get("key").is_none());
    }

    #[test]
    fn test_directory_statistics_merge() {
        let report = IngestReport::new("a.json", Utc::now(), outcomes());
        let directory = DirectoryReport::new(
            PathBuf::from("scans"),
            vec![report.clone(), report],
            vec![FileFailure {
                path: PathBuf::from("scans/bad.json"),
                code: "E008".to_string(),
                message: "Invalid JSON".to_string(),
            }],
        );

        assert_eq!(directory.total_files(), 3);
        assert_eq!(directory.statistics.total_documents, 6);
        assert_eq!(directory.statistics.failed, 2);
        assert!(directory.summary().contains("Failed Files: 1"));
    }
}
