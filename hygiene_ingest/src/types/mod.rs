pub mod address;
pub mod key;
pub mod record;
pub mod source;

pub use address::{int_to_ip, ip_to_int, parse_ipv4};
pub use key::{RecordId, RecordKey, RecordKind, SnapshotId, Subject};
pub use record::{
    HostObservation, OsClass, PortObservation, RecordBody, ScanRecord, ServiceDetails,
    ServiceInfo, VulnerabilityFinding,
};
pub use source::{PortState, Protocol, ScanSource, Severity};
