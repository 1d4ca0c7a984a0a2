//! # Scanner Enumerations
//!
//! Closed sets of values that scanner documents carry as free-form strings
//! or small integers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scanner that produced a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    Nmap,
    Nessus,
}

impl ScanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Nmap => "nmap",
            ScanSource::Nessus => "nessus",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "nmap" => Some(ScanSource::Nmap),
            "nessus" => Some(ScanSource::Nessus),
            _ => None,
        }
    }
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port state as reported by Nmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "filtered")]
    Filtered,
    #[serde(rename = "unfiltered")]
    Unfiltered,
    #[serde(rename = "open|filtered")]
    OpenFiltered,
    #[serde(rename = "closed|filtered")]
    ClosedFiltered,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
            PortState::Unfiltered => "unfiltered",
            PortState::OpenFiltered => "open|filtered",
            PortState::ClosedFiltered => "closed|filtered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "open" => Some(PortState::Open),
            "closed" => Some(PortState::Closed),
            "filtered" => Some(PortState::Filtered),
            "unfiltered" => Some(PortState::Unfiltered),
            "open|filtered" => Some(PortState::OpenFiltered),
            "closed|filtered" => Some(PortState::ClosedFiltered),
            _ => None,
        }
    }

    /// Only a definite `open` counts; `open|filtered` is ambiguous
    pub fn is_open(&self) -> bool {
        matches!(self, PortState::Open)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nessus finding severity, stored on the wire as 0-4
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    #[default]
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Severity::Info),
            1 => Some(Severity::Low),
            2 => Some(Severity::Medium),
            3 => Some(Severity::High),
            4 => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.level()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Severity::from_level(level).ok_or_else(|| format!("severity {} is outside 0-4", level))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_state_wire_names() {
        for state in [
            PortState::Open,
            PortState::Closed,
            PortState::Filtered,
            PortState::Unfiltered,
            PortState::OpenFiltered,
            PortState::ClosedFiltered,
        ] {
            assert_eq!(PortState::parse(state.as_str()), Some(state));
        }
        assert_eq!(
            serde_json::to_string(&PortState::OpenFiltered).unwrap(),
            "\"open|filtered\""
        );
        assert!(PortState::Open.is_open());
        assert!(!PortState::OpenFiltered.is_open());
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(Severity::from_level(3), Some(Severity::High));
        assert_eq!(Severity::from_level(5), None);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "4");
        assert_eq!(serde_json::from_str::<Severity>("1").unwrap(), Severity::Low);
        assert!(serde_json::from_str::<Severity>("9").is_err());
        assert!(Severity::Critical > Severity::Medium);
    }

    #[test]
    fn test_source_and_protocol_parsing() {
        assert_eq!(ScanSource::parse("NMAP"), Some(ScanSource::Nmap));
        assert_eq!(ScanSource::parse("qualys"), None);
        assert_eq!(Protocol::parse(" udp "), Some(Protocol::Udp));
        assert_eq!(Protocol::parse("sctp"), None);
    }
}
