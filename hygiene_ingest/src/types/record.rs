//! # Scan Records
//!
//! The normalized form of every scanner document. A `ScanRecord` is the
//! common envelope (owner, address, source, observation time, latest flag,
//! snapshot tags) around one of three bodies.
//!
//! Records serialize back to the flat document shape the scanners produce,
//! with the body fields merged into the envelope.

use super::address::ip_to_int;
use super::key::{RecordKey, RecordKind, SnapshotId, Subject};
use super::source::{PortState, Protocol, ScanSource, Severity};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Normalized scanner observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRecord {
    pub owner: String,
    ip: Ipv4Addr,
    ip_int: u32,
    pub source: ScanSource,
    pub time: DateTime<Utc>,
    pub latest: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<SnapshotId>,
    #[serde(flatten)]
    pub body: RecordBody,
}

impl ScanRecord {
    /// New records start out as the latest observation for their key
    pub fn new(
        owner: impl Into<String>,
        ip: Ipv4Addr,
        source: ScanSource,
        time: DateTime<Utc>,
        body: RecordBody,
    ) -> Self {
        Self {
            owner: owner.into(),
            ip,
            ip_int: ip_to_int(ip),
            source,
            time,
            latest: true,
            snapshots: Vec::new(),
            body,
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn ip_int(&self) -> u32 {
        self.ip_int
    }

    /// Replace the address, keeping `ip_int` in step
    pub fn set_ip(&mut self, ip: Ipv4Addr) {
        self.ip = ip;
        self.ip_int = ip_to_int(ip);
    }

    pub fn subject(&self) -> Subject {
        self.body.subject()
    }

    pub fn kind(&self) -> RecordKind {
        self.subject().kind()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            owner: self.owner.clone(),
            ip_int: self.ip_int,
            source: self.source,
            subject: self.subject(),
        }
    }

    pub fn port_state(&self) -> Option<PortState> {
        match &self.body {
            RecordBody::Port(port) => Some(port.state),
            _ => None,
        }
    }

    pub fn is_open_port(&self) -> bool {
        self.port_state().map(|s| s.is_open()).unwrap_or(false)
    }

    pub fn has_snapshot(&self, snapshot: SnapshotId) -> bool {
        self.snapshots.contains(&snapshot)
    }
}

/// Kind-specific part of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordBody {
    Port(PortObservation),
    Host(HostObservation),
    Vulnerability(VulnerabilityFinding),
}

impl RecordBody {
    pub fn subject(&self) -> Subject {
        match self {
            RecordBody::Port(port) => Subject::Port {
                protocol: port.protocol,
                port: port.port,
            },
            RecordBody::Host(_) => Subject::Host,
            RecordBody::Vulnerability(finding) => Subject::Finding {
                protocol: finding.protocol,
                port: finding.port,
                plugin_id: finding.plugin_id,
            },
        }
    }
}

/// Nmap port observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortObservation {
    pub protocol: Protocol,
    pub port: u16,
    pub state: PortState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub service: ServiceInfo,
}

impl PortObservation {
    pub fn new(protocol: Protocol, port: u16, state: PortState) -> Self {
        Self {
            protocol,
            port,
            state,
            reason: None,
            service: ServiceInfo::Unknown,
        }
    }
}

/// Host-level observation (Nmap OS detection or Nessus host summary)
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HostObservation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<OsClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_fqdn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// One Nmap OS classification guess
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OsClass {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osfamily: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osgen: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cpe: Vec<String>,
}

/// Nessus plugin finding on one port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VulnerabilityFinding {
    pub protocol: Protocol,
    pub port: u16,
    pub service: ServiceInfo,
    pub plugin_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fname: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cve: Vec<String>,
    pub cvss_base_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_vector: Option<String>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_factor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_publication_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_modification_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vuln_publication_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_publication_date: Option<DateTime<Utc>>,
    /// Scanner fields with no typed counterpart, keys already cleaned
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl VulnerabilityFinding {
    pub fn new(protocol: Protocol, port: u16, plugin_id: u64, severity: Severity) -> Self {
        Self {
            protocol,
            port,
            service: ServiceInfo::Unknown,
            plugin_id,
            plugin_name: None,
            plugin_family: None,
            plugin_type: None,
            fname: None,
            cve: Vec::new(),
            cvss_base_score: 0.0,
            cvss_vector: None,
            severity,
            risk_factor: None,
            synopsis: None,
            description: None,
            solution: None,
            plugin_output: None,
            plugin_publication_date: None,
            plugin_modification_date: None,
            vuln_publication_date: None,
            patch_publication_date: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Service attached to a port
///
/// Nmap reports a dictionary (empty for closed ports); Nessus reports a
/// bare service name.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ServiceInfo {
    #[default]
    Unknown,
    Named(String),
    Detected(ServiceDetails),
}

impl ServiceInfo {
    pub fn name(&self) -> Option<&str> {
        match self {
            ServiceInfo::Unknown => None,
            ServiceInfo::Named(name) => Some(name),
            ServiceInfo::Detected(details) => details.name.as_deref(),
        }
    }
}

impl Serialize for ServiceInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServiceInfo::Unknown => serializer.serialize_map(Some(0))?.end(),
            ServiceInfo::Named(name) => serializer.serialize_str(name),
            ServiceInfo::Detected(details) => details.serialize(serializer),
        }
    }
}

/// Nmap service detection result
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ServiceDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "extrainfo", skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn port_record() -> ScanRecord {
        let mut port = PortObservation::new(Protocol::Tcp, 25565, PortState::Open);
        port.reason = Some("syn-ack".to_string());
        port.service = ServiceInfo::Detected(ServiceDetails {
            name: Some("minecraft".to_string()),
            conf: Some(3),
            method: Some("table".to_string()),
            ..Default::default()
        });

        ScanRecord::new(
            "TEST",
            Ipv4Addr::new(173, 66, 73, 61),
            ScanSource::Nmap,
            Utc.with_ymd_and_hms(2012, 9, 14, 16, 22, 0).unwrap(),
            RecordBody::Port(port),
        )
    }

    #[test]
    fn test_set_ip_keeps_ip_int_in_step() {
        let mut record = port_record();
        assert_eq!(record.ip_int(), 2906802493);

        record.set_ip(Ipv4Addr::new(66, 207, 132, 2));
        assert_eq!(record.ip_int(), 1120896002);
        assert_eq!(record.key().ip(), Ipv4Addr::new(66, 207, 132, 2));
    }

    #[test]
    fn test_serializes_to_document_shape() {
        let json = serde_json::to_value(port_record()).unwrap();

        assert_eq!(json["ip"], "173.66.73.61");
        assert_eq!(json["ip_int"], 2906802493u32);
        assert_eq!(json["source"], "nmap");
        assert_eq!(json["latest"], true);
        assert_eq!(json["port"], 25565);
        assert_eq!(json["state"], "open");
        assert_eq!(json["service"]["name"], "minecraft");
        assert_eq!(json["service"]["conf"], 3);
        assert!(json.get("snapshots").is_none());
    }

    #[test]
    fn test_service_variants_serialize() {
        assert_eq!(
            serde_json::to_string(&ServiceInfo::Unknown).unwrap(),
            "{}"
        );
        assert_eq!(
            serde_json::to_string(&ServiceInfo::Named("www".to_string())).unwrap(),
            "\"www\""
        );
    }

    #[test]
    fn test_finding_extra_fields_are_flattened() {
        let mut finding = VulnerabilityFinding::new(Protocol::Tcp, 443, 55976, Severity::High);
        finding
            .extra
            .insert("edb-id".to_string(), Value::String("18221".to_string()));

        let record = ScanRecord::new(
            "TEST",
            Ipv4Addr::new(66, 207, 132, 2),
            ScanSource::Nessus,
            Utc.with_ymd_and_hms(2012, 9, 26, 12, 48, 38).unwrap(),
            RecordBody::Vulnerability(finding),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["edb-id"], "18221");
        assert_eq!(json["severity"], 3);
        assert_eq!(record.kind(), RecordKind::VulnScan);
        assert!(!record.is_open_port());
    }
}
