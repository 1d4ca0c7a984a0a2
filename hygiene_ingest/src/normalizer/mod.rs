//! # Document Normalizer
//!
//! Turns raw scanner documents (Nmap port and host results, Nessus host
//! summaries and vulnerability findings) into typed [`ScanRecord`]s.
//!
//! Normalization is strict about identity (`owner`, `ip`, the subject
//! fields) and lenient about representation: numbers may arrive as
//! strings, timestamps in several layouts, and Mongo extended-JSON
//! wrappers are unwrapped. `_id`, `latest` and `snapshots` in the input
//! are ignored; the resolver owns those.

pub mod coerce;
mod error;
mod nessus;
mod nmap;

pub use error::{NormalizeError, NormalizeWarning};

use crate::types::{
    ip_to_int, parse_ipv4, Protocol, RecordKind, ScanRecord, ScanSource, ServiceDetails,
    ServiceInfo,
};
use chrono::{DateTime, Utc};
use coerce::{coerce_string, FieldReader};
use hygiene_core::config::compile_time::documents::MAX_DOCUMENT_BYTES;
use hygiene_core::config::NormalizerPreferences;
use hygiene_core::{log_debug, log_warning};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Envelope fields shared by every document; never copied into `extra`
pub(crate) const ENVELOPE_FIELDS: &[&str] = &[
    "_id",
    "owner",
    "ip",
    "ip_int",
    "source",
    "time",
    "latest",
    "snapshots",
];

/// The four document shapes the scanners produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    NmapPort,
    NmapHost,
    NessusHost,
    NessusVulnerability,
}

impl DocumentKind {
    pub fn source(&self) -> ScanSource {
        match self {
            DocumentKind::NmapPort | DocumentKind::NmapHost => ScanSource::Nmap,
            DocumentKind::NessusHost | DocumentKind::NessusVulnerability => ScanSource::Nessus,
        }
    }

    pub fn record_kind(&self) -> RecordKind {
        match self {
            DocumentKind::NmapPort => RecordKind::PortScan,
            DocumentKind::NmapHost | DocumentKind::NessusHost => RecordKind::HostScan,
            DocumentKind::NessusVulnerability => RecordKind::VulnScan,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::NmapPort => "nmap_port",
            DocumentKind::NmapHost => "nmap_host",
            DocumentKind::NessusHost => "nessus_host",
            DocumentKind::NessusVulnerability => "nessus_vulnerability",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied facts a document may lack
#[derive(Debug, Clone, Default)]
pub struct NormalizeContext {
    pub default_owner: Option<String>,
    /// Observation time for Nessus findings without a `time` field
    pub observed_at: Option<DateTime<Utc>>,
    /// Skip detection; the document's `source`, if present, must agree
    pub kind_hint: Option<DocumentKind>,
}

impl NormalizeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_owner(mut self, owner: impl Into<String>) -> Self {
        self.default_owner = Some(owner.into());
        self
    }

    pub fn with_observed_at(mut self, time: DateTime<Utc>) -> Self {
        self.observed_at = Some(time);
        self
    }

    pub fn with_kind_hint(mut self, kind: DocumentKind) -> Self {
        self.kind_hint = Some(kind);
        self
    }
}

/// A normalized record plus the adjustments made to produce it
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub kind: DocumentKind,
    pub record: ScanRecord,
    pub warnings: Vec<NormalizeWarning>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    preferences: NormalizerPreferences,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerPreferences::default())
    }
}

impl Normalizer {
    pub fn new(preferences: NormalizerPreferences) -> Self {
        Self { preferences }
    }

    pub fn preferences(&self) -> &NormalizerPreferences {
        &self.preferences
    }

    pub fn normalize(
        &self,
        document: &Value,
        context: &NormalizeContext,
    ) -> Result<Normalized, NormalizeError> {
        let map = document.as_object().ok_or(NormalizeError::NotAnObject)?;

        let size = serde_json::to_string(document).map_or(0, |text| text.len());
        if size > MAX_DOCUMENT_BYTES {
            return Err(NormalizeError::DocumentTooLarge {
                size,
                limit: MAX_DOCUMENT_BYTES,
            });
        }

        let fields = FieldReader::new(map);
        let kind = match context.kind_hint {
            Some(hint) => {
                if let Some(found) = read_source(&fields)? {
                    if found != hint.source() {
                        return Err(NormalizeError::KindMismatch {
                            requested: hint,
                            found,
                        });
                    }
                }
                hint
            }
            None => detect_kind(document)?,
        };

        let owner = fields
            .string("owner")?
            .filter(|owner| !owner.is_empty())
            .or_else(|| context.default_owner.clone())
            .ok_or_else(|| NormalizeError::missing("owner"))?;

        let ip_text = fields.required_string("ip")?;
        let ip = parse_ipv4(&ip_text).ok_or(NormalizeError::InvalidAddress { value: ip_text })?;

        let mut warnings = Vec::new();
        let computed = ip_to_int(ip);
        if let Some(stored) = fields.integer("ip_int", i64::MIN..=i64::MAX)? {
            if stored != i64::from(computed) {
                if self.preferences.strict_ip_int {
                    return Err(NormalizeError::IpIntMismatch {
                        ip,
                        stored,
                        expected: computed,
                    });
                }
                warnings.push(NormalizeWarning::IpIntCorrected { stored, computed });
            }
        }

        let time = match kind {
            DocumentKind::NmapPort | DocumentKind::NmapHost => fields
                .datetime("time")?
                .ok_or_else(|| NormalizeError::missing("time"))?,
            DocumentKind::NessusHost => nessus::host_time(&fields)?,
            DocumentKind::NessusVulnerability => {
                match fields.datetime("time")?.or(context.observed_at) {
                    Some(time) => time,
                    None => {
                        warnings.push(NormalizeWarning::ObservationTimeDefaulted {
                            field: "time".to_string(),
                        });
                        Utc::now()
                    }
                }
            }
        };

        let body = match kind {
            DocumentKind::NmapPort => nmap::port_body(&fields)?,
            DocumentKind::NmapHost => nmap::host_body(&fields, &mut warnings)?,
            DocumentKind::NessusHost => nessus::host_body(&fields)?,
            DocumentKind::NessusVulnerability => {
                nessus::vulnerability_body(&fields, &self.preferences, &mut warnings)?
            }
        };

        let record = ScanRecord::new(owner, ip, kind.source(), time, body);

        for warning in &warnings {
            log_warning!(
                warning.code(),
                &warning.to_string(),
                "kind" => kind,
                "key" => record.key()
            );
        }
        log_debug!("Normalized document", "kind" => kind, "key" => record.key());

        Ok(Normalized {
            kind,
            record,
            warnings,
        })
    }
}

/// Classify a document by its `source` and the fields it carries
pub fn detect_kind(document: &Value) -> Result<DocumentKind, NormalizeError> {
    let map = document.as_object().ok_or(NormalizeError::NotAnObject)?;
    let fields = FieldReader::new(map);

    let source = read_source(&fields)?.ok_or_else(|| NormalizeError::missing("source"))?;

    Ok(match source {
        ScanSource::Nmap if fields.has("port") => DocumentKind::NmapPort,
        ScanSource::Nmap => DocumentKind::NmapHost,
        ScanSource::Nessus if fields.has("port") || fields.has("plugin_id") => {
            DocumentKind::NessusVulnerability
        }
        ScanSource::Nessus => DocumentKind::NessusHost,
    })
}

fn read_source(fields: &FieldReader<'_>) -> Result<Option<ScanSource>, NormalizeError> {
    match fields.string("source")? {
        None => Ok(None),
        Some(name) => ScanSource::parse(&name)
            .map(Some)
            .ok_or(NormalizeError::UnknownSource { name }),
    }
}

pub(crate) fn read_protocol(fields: &FieldReader<'_>) -> Result<Protocol, NormalizeError> {
    let text = fields.required_string("protocol")?;
    Protocol::parse(&text)
        .ok_or_else(|| NormalizeError::invalid("protocol", format!("unknown protocol '{}'", text)))
}

/// Nmap dictionary, Nessus service name, or nothing
pub(crate) fn read_service(fields: &FieldReader<'_>) -> Result<ServiceInfo, NormalizeError> {
    match fields.get("service") {
        None => Ok(ServiceInfo::Unknown),
        Some(Value::String(name)) if name.is_empty() => Ok(ServiceInfo::Unknown),
        Some(Value::String(name)) => Ok(ServiceInfo::Named(name.clone())),
        Some(Value::Object(map)) if map.is_empty() => Ok(ServiceInfo::Unknown),
        Some(Value::Object(map)) => {
            let service = FieldReader::new(map);
            Ok(ServiceInfo::Detected(ServiceDetails {
                name: service.string("name")?,
                conf: service.integer("conf", 0..=10)?.map(|c| c as u8),
                method: service.string("method")?,
                product: service.string("product")?,
                version: service.string("version")?,
                extra_info: service.string("extrainfo")?,
            }))
        }
        Some(_) => Err(NormalizeError::invalid(
            "service",
            "expected a name or a dictionary",
        )),
    }
}

pub(crate) fn read_string_list(
    fields: &FieldReader<'_>,
    field: &str,
) -> Result<Vec<String>, NormalizeError> {
    match fields.get(field) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                coerce_string(item)
                    .ok_or_else(|| NormalizeError::invalid(field, "expected a list of strings"))
            })
            .collect(),
        Some(value) => coerce_string(value)
            .map(|single| vec![single])
            .ok_or_else(|| NormalizeError::invalid(field, "expected a string or a list")),
    }
}
