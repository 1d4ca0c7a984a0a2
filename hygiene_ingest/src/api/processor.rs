//! # Ingest Processor
//!
//! Main entry point: scanner exports in, resolved records out. A batch is
//! normalized document by document, then every record that normalized is
//! resolved as one batch against the store.

use super::config::IngestConfig;
use super::errors::ProcessorError;
use crate::normalizer::{DocumentKind, NormalizeWarning, Normalizer};
use crate::resolution::{LatestStateResolver, MemoryStore, RecordStore, SnapshotTagger};
use crate::results::{DirectoryReport, DocumentOutcome, FileFailure, IngestReport, OutcomeError};
use crate::state::{HostState, HostStateManager, TransitionOutcome, TransitionSignal};
use crate::tickets::{Sighting, TicketManager};
use crate::types::{RecordKey, RecordKind, ScanRecord};
use chrono::Utc;
use hygiene_core::config::compile_time::batch::{MAX_FILES_PER_BATCH, MAX_FILE_SIZE};
use hygiene_core::logging::{codes, init_global_logging_with_preferences, with_source_context};
use hygiene_core::utils::list_to_range_string;
use hygiene_core::{log_error, log_info, log_success, log_warning};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use walkdir::WalkDir;

/// A document that normalized and awaits resolution
struct Pending {
    index: usize,
    kind: DocumentKind,
    key: RecordKey,
    sighting: Sighting,
    warnings: Vec<NormalizeWarning>,
}

/// Normalization results of a batch, in document order
struct Prepared {
    /// Outcomes of documents that failed to normalize
    slots: Vec<Option<DocumentOutcome>>,
    pending: Vec<Pending>,
    records: Vec<ScanRecord>,
}

#[derive(Debug)]
pub struct IngestProcessor<S> {
    normalizer: Normalizer,
    resolver: LatestStateResolver<S>,
    state_manager: HostStateManager,
    tickets: TicketManager,
    config: IngestConfig,
    next_source_id: AtomicUsize,
}

impl IngestProcessor<MemoryStore> {
    /// Processor over a fresh in-memory store
    pub fn in_memory(config: IngestConfig) -> Result<Self, ProcessorError> {
        Self::with_config(MemoryStore::new(), config)
    }
}

impl<S: RecordStore> IngestProcessor<S> {
    /// Create a new processor with default configuration
    pub fn new(store: S) -> Result<Self, ProcessorError> {
        Self::with_config(store, IngestConfig::default())
    }

    /// Create a new processor with custom configuration
    pub fn with_config(store: S, config: IngestConfig) -> Result<Self, ProcessorError> {
        config.validate()?;

        if let Some(preferences) = &config.logging {
            if let Err(reason) = init_global_logging_with_preferences(preferences.clone()) {
                log_warning!(
                    codes::system::CONFIGURATION_ERROR,
                    "Logging preferences not applied",
                    "reason" => reason
                );
            }
        }

        log_info!(
            "Ingest processor initialized",
            "fail_fast" => config.fail_fast,
            "document_limit" => config.document_limit()
        );

        Ok(Self {
            normalizer: Normalizer::new(config.normalizer.clone()),
            resolver: LatestStateResolver::with_preferences(store, config.resolver.clone()),
            state_manager: HostStateManager::new(),
            tickets: TicketManager::new(config.resolver.ticket_reopen_days),
            config,
            next_source_id: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn resolver(&self) -> &LatestStateResolver<S> {
        &self.resolver
    }

    pub fn tickets(&self) -> &TicketManager {
        &self.tickets
    }

    pub fn tagger(&self) -> SnapshotTagger<'_, S> {
        SnapshotTagger::new(self.resolver.store())
    }

    /// Ingest one document; failures are reported in the outcome
    pub fn ingest_document(&self, document: &Value) -> DocumentOutcome {
        match self.run_batch(std::slice::from_ref(document), false) {
            Ok(mut outcomes) => outcomes.pop().unwrap_or_else(|| {
                DocumentOutcome::failed(
                    0,
                    None,
                    OutcomeError {
                        code: codes::system::INTERNAL_ERROR.as_str().to_string(),
                        message: "No outcome produced for document".to_string(),
                        field: None,
                    },
                )
            }),
            Err(error) => DocumentOutcome::failed(
                0,
                None,
                OutcomeError {
                    code: error.code().as_str().to_string(),
                    message: error.to_string(),
                    field: None,
                },
            ),
        }
    }

    /// Normalize every document, then resolve the survivors as one batch
    pub fn ingest_documents(&self, documents: &[Value]) -> Result<IngestReport, ProcessorError> {
        self.ingest_labeled("documents", documents)
    }

    /// Ingest a JSON string holding one document or an array of them
    pub fn ingest_json_str(&self, json: &str, source_label: &str) -> Result<IngestReport, ProcessorError> {
        let parsed: Value = serde_json::from_str(json).map_err(|error| ProcessorError::InvalidJson {
            label: source_label.to_string(),
            error,
        })?;

        match parsed {
            Value::Array(documents) => self.ingest_labeled(source_label, &documents),
            single => self.ingest_labeled(source_label, std::slice::from_ref(&single)),
        }
    }

    pub fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestReport, ProcessorError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProcessorError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let size = std::fs::metadata(path)
            .map_err(|source| ProcessorError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size > MAX_FILE_SIZE {
            return Err(ProcessorError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: MAX_FILE_SIZE,
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| ProcessorError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.ingest_json_str(&content, &path.display().to_string())
    }

    /// Ingest every `*.json` file under a directory, in file name order
    pub fn ingest_directory(&self, path: impl AsRef<Path>) -> Result<DirectoryReport, ProcessorError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProcessorError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_dir() {
            return Err(ProcessorError::NotADirectory {
                path: path.to_path_buf(),
            });
        }

        let files = self.collect_json_files(path)?;
        if files.len() > MAX_FILES_PER_BATCH {
            return Err(ProcessorError::BatchLimitExceeded {
                count: files.len(),
                limit: MAX_FILES_PER_BATCH,
                unit: "files",
            });
        }

        log_info!(
            "Ingesting directory",
            "path" => path.display(),
            "files" => files.len()
        );

        let mut reports = Vec::new();
        let mut failed_files = Vec::new();

        for file in files {
            match self.ingest_file(&file) {
                Ok(report) => reports.push(report),
                Err(error) if self.config.fail_fast => return Err(error),
                Err(error) => {
                    log_error!(
                        error.code(),
                        "File could not be ingested",
                        "path" => file.display(),
                        "error" => &error
                    );
                    failed_files.push(FileFailure {
                        code: error.code().as_str().to_string(),
                        message: error.user_message(),
                        path: file,
                    });
                }
            }
        }

        let report = DirectoryReport::new(path.to_path_buf(), reports, failed_files);
        log_success!(
            codes::success::BATCH_COMPLETE,
            "Directory ingest complete",
            "path" => path.display(),
            "files" => report.total_files(),
            "failed_files" => report.failed_files.len()
        );
        Ok(report)
    }

    /// Retire the addresses' latest records of `kind`, then ingest the replacements
    ///
    /// Used when a full rescan supersedes a host's previous result set, so
    /// ports or findings absent from the new scan stop being current and
    /// their tickets close. Every document must normalize before any flag is
    /// cleared; otherwise the store is left untouched and the first failure
    /// is returned.
    pub fn replace_observations(
        &self,
        kind: RecordKind,
        ips: &[Ipv4Addr],
        documents: &[Value],
    ) -> Result<IngestReport, ProcessorError> {
        self.with_report(kind.as_str(), || {
            let prepared = self.normalize_batch(documents, true)?;
            let closing_time = prepared
                .records
                .iter()
                .map(|record| record.time)
                .max()
                .unwrap_or_else(Utc::now);

            self.resolver.retire_addresses(kind, ips)?;
            let outcomes = self.resolve_prepared(prepared, self.config.fail_fast)?;
            self.tickets
                .close_unconfirmed(&self.resolver, kind, ips, closing_time)?;
            Ok(outcomes)
        })
    }

    /// Apply a scan result to a host's pipeline state
    ///
    /// Whether the host has open ports is read from the store.
    pub fn advance_host(&self, host: &mut HostState, up: Option<bool>) -> Result<TransitionOutcome, ProcessorError> {
        let has_open_ports = !self.resolver.open_ports(host.ip)?.is_empty();
        let signal = TransitionSignal {
            up,
            has_open_ports: Some(has_open_ports),
            was_failure: false,
        };
        Ok(self.state_manager.transition(host, &signal))
    }

    /// Put a host back to waiting after a failed scan
    pub fn fail_host(&self, host: &mut HostState) -> TransitionOutcome {
        self.state_manager
            .transition(host, &TransitionSignal::failure())
    }

    /// Latest open ports for an address as a range string, e.g. `22,80,443-445`
    pub fn open_ports_summary(&self, ip: Ipv4Addr) -> Result<String, ProcessorError> {
        let ports: Vec<u64> = self
            .resolver
            .open_ports(ip)?
            .into_iter()
            .map(u64::from)
            .collect();
        Ok(list_to_range_string(&ports))
    }

    fn ingest_labeled(&self, label: &str, documents: &[Value]) -> Result<IngestReport, ProcessorError> {
        self.with_report(label, || self.run_batch(documents, self.config.fail_fast))
    }

    /// Run `batch` under a fresh source context and wrap its outcomes in a report
    fn with_report<F>(&self, label: &str, batch: F) -> Result<IngestReport, ProcessorError>
    where
        F: FnOnce() -> Result<Vec<DocumentOutcome>, ProcessorError>,
    {
        let started = Utc::now();
        let source_id = self.next_source_id.fetch_add(1, Ordering::Relaxed);

        let outcomes = with_source_context(label, source_id, batch)?;

        let report = IngestReport::new(label, started, outcomes);
        log_success!(
            codes::success::BATCH_COMPLETE,
            "Batch ingest complete",
            "source" => label,
            "documents" => report.statistics.total_documents,
            "stored" => report.statistics.succeeded(),
            "failed" => report.statistics.failed
        );
        Ok(report)
    }

    fn run_batch(&self, documents: &[Value], fail_fast: bool) -> Result<Vec<DocumentOutcome>, ProcessorError> {
        let prepared = self.normalize_batch(documents, fail_fast)?;
        self.resolve_prepared(prepared, fail_fast)
    }

    fn normalize_batch(&self, documents: &[Value], fail_fast: bool) -> Result<Prepared, ProcessorError> {
        let limit = self.config.document_limit();
        if documents.len() > limit {
            return Err(ProcessorError::BatchLimitExceeded {
                count: documents.len(),
                limit,
                unit: "documents",
            });
        }

        let context = self.config.normalize_context();
        let mut slots: Vec<Option<DocumentOutcome>> = (0..documents.len()).map(|_| None).collect();
        let mut pending = Vec::new();
        let mut records: Vec<ScanRecord> = Vec::new();

        for (index, document) in documents.iter().enumerate() {
            match self.normalizer.normalize(document, &context) {
                Ok(normalized) => {
                    let sighting = Sighting::from_record(&normalized.record);
                    pending.push(Pending {
                        index,
                        kind: normalized.kind,
                        key: sighting.key.clone(),
                        sighting,
                        warnings: normalized.warnings,
                    });
                    records.push(normalized.record);
                }
                Err(error) if fail_fast => {
                    return Err(ProcessorError::Normalize { index, error });
                }
                Err(error) => {
                    log_error!(
                        error.code(),
                        &error.to_string(),
                        "document" => index,
                        "field" => error.field().unwrap_or("-")
                    );
                    slots[index] = Some(DocumentOutcome::failed(index, None, OutcomeError::from(&error)));
                }
            }
        }

        Ok(Prepared {
            slots,
            pending,
            records,
        })
    }

    fn resolve_prepared(&self, prepared: Prepared, fail_fast: bool) -> Result<Vec<DocumentOutcome>, ProcessorError> {
        let Prepared {
            mut slots,
            pending,
            records,
        } = prepared;
        let resolutions = self.resolver.resolve_batch(records);

        for (entry, result) in pending.into_iter().zip(resolutions) {
            let outcome = match result {
                Ok(resolution) => {
                    let ticket = self.tickets.observe(&entry.sighting, &resolution)?;
                    let mut resolved = DocumentOutcome::resolved(
                        entry.index,
                        entry.kind,
                        entry.key,
                        resolution,
                        entry.warnings,
                    );
                    resolved.ticket = ticket;
                    resolved
                }
                Err(error) if fail_fast => {
                    return Err(ProcessorError::Resolution {
                        index: Some(entry.index),
                        error,
                    });
                }
                Err(error) => {
                    log_error!(
                        error.code(),
                        &error.to_string(),
                        "document" => entry.index,
                        "key" => &entry.key
                    );
                    let mut failed =
                        DocumentOutcome::failed(entry.index, Some(entry.kind), OutcomeError::from(&error));
                    failed.key = Some(entry.key);
                    failed.warnings = entry.warnings;
                    failed
                }
            };
            let index = outcome.index;
            slots[index] = Some(outcome);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn collect_json_files(&self, directory: &Path) -> Result<Vec<PathBuf>, ProcessorError> {
        let max_depth = if self.config.recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(directory)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = entry?;
            let is_json = entry
                .path()
                .extension()
                .map_or(false, |extension| extension.eq_ignore_ascii_case("json"));
            if entry.file_type().is_file() && is_json {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::Resolution;
    use crate::state::{Stage, Status};
    use crate::tickets::TicketAction;
    use crate::types::{PortState, RecordBody};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use hygiene_core::config::{NormalizerPreferences, ResolverPreferences, TiePolicy};
    use serde_json::json;
    use std::fs;

    const FIXTURE: &str = include_str!("../../fixtures/sample-scanner-docs.json");

    fn config() -> IngestConfig {
        IngestConfig::new()
            .with_observed_at(Utc.with_ymd_and_hms(2012, 9, 26, 12, 48, 38).unwrap())
            .with_normalizer_preferences(NormalizerPreferences {
                strict_ip_int: false,
                keep_unknown_fields: true,
                truncate_plugin_output: true,
            })
            .with_resolver_preferences(ResolverPreferences {
                keep_history: true,
                tie_policy: TiePolicy::IncomingWins,
                log_flag_changes: false,
                ticket_reopen_days: 90,
            })
    }

    fn processor() -> IngestProcessor<MemoryStore> {
        IngestProcessor::in_memory(config()).unwrap()
    }

    fn nmap_port(port: u16, state: &str, time: &str) -> Value {
        json!({
            "source": "nmap",
            "owner": "TEST",
            "ip": "173.66.73.61",
            "protocol": "tcp",
            "port": port,
            "state": state,
            "service": {},
            "time": time
        })
    }

    #[test]
    fn test_ingest_fixture() {
        let processor = processor();
        let report = processor.ingest_json_str(FIXTURE, "sample-scanner-docs").unwrap();

        assert_eq!(report.statistics.total_documents, 4);
        assert_eq!(report.statistics.inserted, 4);
        assert!(report.is_clean());
        assert_eq!(processor.resolver().store().len().unwrap(), 4);
        assert_eq!(
            processor.open_ports_summary(Ipv4Addr::new(173, 66, 73, 61)).unwrap(),
            "25565"
        );

        // Re-ingesting the same export changes nothing but the holders
        let again = processor.ingest_json_str(FIXTURE, "sample-scanner-docs").unwrap();
        assert_eq!(again.statistics.superseded, 4);
    }

    #[test]
    fn test_failed_documents_do_not_abort_batch() {
        let processor = processor();
        let report = processor
            .ingest_documents(&[
                nmap_port(22, "open", "2012-09-14T16:22:00Z"),
                json!("not a document"),
                nmap_port(80, "ajar", "2012-09-14T16:22:00Z"),
                nmap_port(443, "open", "2012-09-14T16:22:00Z"),
            ])
            .unwrap();

        assert_eq!(report.statistics.inserted, 2);
        assert_eq!(report.statistics.failed, 2);
        let indexes: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(report.outcomes[1].error.as_ref().unwrap().code, "E020");
        assert_eq!(
            report.outcomes[2].error.as_ref().unwrap().field.as_deref(),
            Some("state")
        );
    }

    #[test]
    fn test_fail_fast_stops_at_first_error() {
        let processor = IngestProcessor::in_memory(config().with_fail_fast(true)).unwrap();
        let result = processor.ingest_documents(&[
            nmap_port(22, "open", "2012-09-14T16:22:00Z"),
            json!({"source": "nmap"}),
        ]);

        assert_matches!(result, Err(ProcessorError::Normalize { index: 1, .. }));
        assert_eq!(processor.resolver().store().len().unwrap(), 0);
    }

    #[test]
    fn test_batch_limit() {
        let processor = IngestProcessor::in_memory(config().with_max_documents(Some(1))).unwrap();
        let result = processor.ingest_documents(&[
            nmap_port(22, "open", "2012-09-14T16:22:00Z"),
            nmap_port(80, "open", "2012-09-14T16:22:00Z"),
        ]);
        assert_matches!(
            result,
            Err(ProcessorError::BatchLimitExceeded { count: 2, limit: 1, .. })
        );
    }

    #[test]
    fn test_ingest_document_reports_resolution() {
        let processor = processor();
        let first = processor.ingest_document(&nmap_port(22, "open", "2012-09-14T16:22:00Z"));
        let older = processor.ingest_document(&nmap_port(22, "closed", "2012-09-13T16:22:00Z"));

        assert_matches!(first.resolution, Some(Resolution::Inserted { .. }));
        assert_matches!(older.resolution, Some(Resolution::Historical { .. }));
        assert_eq!(older.kind, Some(DocumentKind::NmapPort));

        let invalid = processor.ingest_document(&json!([]));
        assert!(!invalid.is_success());
    }

    #[test]
    fn test_invalid_json_is_an_input_error() {
        let processor = processor();
        assert_matches!(
            processor.ingest_json_str("[{\"source\": ", "broken"),
            Err(ProcessorError::InvalidJson { .. })
        );
    }

    #[test]
    fn test_ingest_file_and_directory() {
        let processor = processor();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), FIXTURE).unwrap();
        fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested").join("c.json"),
            nmap_port(22, "open", "2012-09-14T16:22:00Z").to_string(),
        )
        .unwrap();

        let report = processor.ingest_file(dir.path().join("a.json")).unwrap();
        assert_eq!(report.statistics.total_documents, 4);

        let directory = processor.ingest_directory(dir.path()).unwrap();
        assert_eq!(directory.reports.len(), 2);
        assert_eq!(directory.failed_files.len(), 1);
        assert_eq!(directory.failed_files[0].code, "E008");
        assert_eq!(directory.statistics.total_documents, 5);

        let flat = IngestProcessor::in_memory(config().with_recursive(false)).unwrap();
        assert_eq!(flat.ingest_directory(dir.path()).unwrap().reports.len(), 1);

        assert_matches!(
            processor.ingest_file(dir.path().join("missing.json")),
            Err(ProcessorError::FileNotFound { .. })
        );
        assert_matches!(
            processor.ingest_directory(dir.path().join("a.json")),
            Err(ProcessorError::NotADirectory { .. })
        );
    }

    #[test]
    fn test_logging_preferences_are_installed_once() {
        let preferences = hygiene_core::config::LoggingPreferences::default();
        let first =
            IngestProcessor::in_memory(config().with_logging_preferences(preferences.clone()));
        let second = IngestProcessor::in_memory(config().with_logging_preferences(preferences));

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(hygiene_core::logging::is_initialized());
    }

    #[test]
    fn test_ingest_fixture_with_default_config() {
        let processor = IngestProcessor::in_memory(IngestConfig::default()).unwrap();
        let report = processor.ingest_json_str(FIXTURE, "sample-scanner-docs").unwrap();

        assert_eq!(report.statistics.inserted, 4);
        assert!(report.is_clean());
        let finding = &report.outcomes[3];
        assert_eq!(finding.kind, Some(DocumentKind::NessusVulnerability));
        assert_eq!(finding.warnings[0].code(), codes::normalization::OBSERVATION_TIME_DEFAULTED);
    }

    #[test]
    fn test_replace_observations_over_limit_keeps_state() {
        let processor = IngestProcessor::in_memory(config().with_max_documents(Some(1))).unwrap();
        let ip = Ipv4Addr::new(173, 66, 73, 61);
        processor
            .ingest_documents(&[nmap_port(22, "open", "2012-09-14T16:22:00Z")])
            .unwrap();

        let result = processor.replace_observations(
            RecordKind::PortScan,
            &[ip],
            &[
                nmap_port(22, "open", "2012-09-20T00:00:00Z"),
                nmap_port(80, "open", "2012-09-20T00:00:00Z"),
            ],
        );

        assert_matches!(result, Err(ProcessorError::BatchLimitExceeded { .. }));
        assert_eq!(processor.open_ports_summary(ip).unwrap(), "22");
    }

    #[test]
    fn test_replace_observations_with_bad_document_keeps_state() {
        let ip = Ipv4Addr::new(173, 66, 73, 61);
        for fail_fast in [true, false] {
            let processor = IngestProcessor::in_memory(config().with_fail_fast(fail_fast)).unwrap();
            processor
                .ingest_documents(&[nmap_port(22, "open", "2012-09-14T16:22:00Z")])
                .unwrap();

            let result = processor.replace_observations(
                RecordKind::PortScan,
                &[ip],
                &[
                    nmap_port(443, "open", "2012-09-20T00:00:00Z"),
                    json!({"source": "nmap"}),
                ],
            );

            assert_matches!(result, Err(ProcessorError::Normalize { index: 1, .. }));
            assert_eq!(processor.open_ports_summary(ip).unwrap(), "22");
            assert_eq!(processor.resolver().store().len().unwrap(), 1);
        }
    }

    #[test]
    fn test_replace_observations_retires_missing_ports() {
        let processor = processor();
        let ip = Ipv4Addr::new(173, 66, 73, 61);
        processor
            .ingest_documents(&[
                nmap_port(22, "open", "2012-09-14T16:22:00Z"),
                nmap_port(80, "open", "2012-09-14T16:22:00Z"),
                nmap_port(443, "open", "2012-09-14T16:22:00Z"),
                nmap_port(444, "open", "2012-09-14T16:22:00Z"),
            ])
            .unwrap();
        assert_eq!(processor.open_ports_summary(ip).unwrap(), "22,80,443-444");

        let report = processor
            .replace_observations(
                RecordKind::PortScan,
                &[ip],
                &[nmap_port(443, "open", "2012-09-20T00:00:00Z")],
            )
            .unwrap();
        assert_eq!(report.statistics.inserted, 1);
        assert_eq!(processor.open_ports_summary(ip).unwrap(), "443");

        let latest = processor
            .resolver()
            .latest(&report.outcomes[0].key.clone().unwrap())
            .unwrap()
            .unwrap();
        assert_matches!(latest.record.body, RecordBody::Port(ref port) if port.state == PortState::Open);
    }

    #[test]
    fn test_tickets_follow_rescans() {
        let processor = processor();
        let ip = Ipv4Addr::new(173, 66, 73, 61);
        let first = processor
            .ingest_documents(&[
                nmap_port(22, "open", "2012-09-14T16:22:00Z"),
                nmap_port(80, "open", "2012-09-14T16:22:00Z"),
                nmap_port(81, "closed", "2012-09-14T16:22:00Z"),
            ])
            .unwrap();
        let actions: Vec<_> = first
            .outcomes
            .iter()
            .map(|outcome| outcome.ticket.map(|change| change.action))
            .collect();
        assert_eq!(
            actions,
            vec![Some(TicketAction::Opened), Some(TicketAction::Opened), None]
        );

        let rescan = processor
            .replace_observations(
                RecordKind::PortScan,
                &[ip],
                &[nmap_port(80, "open", "2012-09-20T00:00:00Z")],
            )
            .unwrap();
        assert_eq!(
            rescan.outcomes[0].ticket.map(|change| change.action),
            Some(TicketAction::Verified)
        );

        let port_22 = first.outcomes[0].key.clone().unwrap();
        let closed = processor.tickets().tickets_for(&port_22).unwrap();
        assert_eq!(closed.len(), 1);
        assert!(!closed[0].open);
        assert_eq!(
            closed[0].time_closed,
            Some(Utc.with_ymd_and_hms(2012, 9, 20, 0, 0, 0).unwrap())
        );
        assert_eq!(processor.tickets().open_count().unwrap(), 1);
    }

    #[test]
    fn test_advance_host_uses_stored_ports() {
        let processor = processor();
        let ip = Ipv4Addr::new(173, 66, 73, 61);
        let mut host = HostState::new(ip, "TEST", Stage::PortScan, Status::Running);

        processor
            .ingest_document(&nmap_port(22, "open", "2012-09-14T16:22:00Z"));
        let outcome = processor.advance_host(&mut host, None).unwrap();

        assert!(outcome.changed);
        assert!(outcome.finished_stage);
        assert_eq!((host.stage, host.status), (Stage::VulnScan, Status::Waiting));

        let mut bare = HostState::new(Ipv4Addr::new(10, 0, 0, 9), "TEST", Stage::PortScan, Status::Running);
        processor.advance_host(&mut bare, None).unwrap();
        assert_eq!((bare.stage, bare.status), (Stage::PortScan, Status::Done));

        let outcome = processor.fail_host(&mut host);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_snapshot_through_processor() {
        let processor = processor();
        processor.ingest_json_str(FIXTURE, "fixture").unwrap();

        let tagged = processor.tagger().snapshot_owners(&["TEST"]).unwrap();
        // two hosts, one open port, one finding
        assert_eq!(tagged.records, 4);
    }
}
