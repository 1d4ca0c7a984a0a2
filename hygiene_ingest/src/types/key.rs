//! # Record Identity
//!
//! `RecordKey` names the logical asset or finding a record observes. All
//! observations sharing a key compete for the single latest flag.

use super::address::int_to_ip;
use super::source::{Protocol, ScanSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// What on the host a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum Subject {
    Host,
    Port {
        protocol: Protocol,
        port: u16,
    },
    Finding {
        protocol: Protocol,
        port: u16,
        plugin_id: u64,
    },
}

impl Subject {
    pub fn kind(&self) -> RecordKind {
        match self {
            Subject::Host => RecordKind::HostScan,
            Subject::Port { .. } => RecordKind::PortScan,
            Subject::Finding { .. } => RecordKind::VulnScan,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Host => f.write_str("host"),
            Subject::Port { protocol, port } => write!(f, "{}/{}", port, protocol),
            Subject::Finding {
                protocol,
                port,
                plugin_id,
            } => write!(f, "{}/{}#{}", port, protocol, plugin_id),
        }
    }
}

/// Record family; bulk operations are scoped to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    HostScan,
    PortScan,
    VulnScan,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::HostScan,
        RecordKind::PortScan,
        RecordKind::VulnScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::HostScan => "host_scan",
            RecordKind::PortScan => "port_scan",
            RecordKind::VulnScan => "vuln_scan",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity shared by every observation of the same asset or finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub owner: String,
    pub ip_int: u32,
    pub source: ScanSource,
    #[serde(flatten)]
    pub subject: Subject,
}

impl RecordKey {
    pub fn new(owner: impl Into<String>, ip: Ipv4Addr, source: ScanSource, subject: Subject) -> Self {
        Self {
            owner: owner.into(),
            ip_int: u32::from(ip),
            source,
            subject,
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        int_to_ip(self.ip_int)
    }

    pub fn kind(&self) -> RecordKind {
        self.subject.kind()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.owner,
            self.ip(),
            self.source,
            self.subject
        )
    }
}

/// Store-assigned identity of one stored observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time tag attached to a set of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_findings_on_one_port_have_distinct_keys() {
        let ip = Ipv4Addr::new(66, 207, 132, 2);
        let first = RecordKey::new(
            "TEST",
            ip,
            ScanSource::Nessus,
            Subject::Finding {
                protocol: Protocol::Tcp,
                port: 443,
                plugin_id: 55976,
            },
        );
        let second = RecordKey::new(
            "TEST",
            ip,
            ScanSource::Nessus,
            Subject::Finding {
                protocol: Protocol::Tcp,
                port: 443,
                plugin_id: 10863,
            },
        );

        assert_ne!(first, second);
        assert_eq!(first.kind(), RecordKind::VulnScan);
        assert_eq!(first.to_string(), "TEST/66.207.132.2/nessus/443/tcp#55976");
    }

    #[test]
    fn test_key_serializes_flat() {
        let key = RecordKey::new(
            "TEST",
            Ipv4Addr::new(10, 0, 0, 1),
            ScanSource::Nmap,
            Subject::Port {
                protocol: Protocol::Udp,
                port: 53,
            },
        );
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["subject"], "port");
        assert_eq!(json["port"], 53);
        assert_eq!(json["protocol"], "udp");
        assert_eq!(json["ip_int"], 167772161u32);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
        assert_ne!(SnapshotId::new(), SnapshotId::new());
    }
}
