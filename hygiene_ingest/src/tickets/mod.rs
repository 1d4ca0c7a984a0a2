//! # Remediation Tickets
//!
//! A ticket follows one open port or finding from the moment it becomes the
//! latest observation of its key until it stops being one. A key has at most
//! one open ticket, always its newest. When a key comes back within the
//! reopen window its last ticket is reopened instead of a new one opened.

use crate::resolution::{LatestStateResolver, RecordStore, Resolution, ResolutionError, StoreError};
use crate::types::{ip_to_int, RecordBody, RecordId, RecordKey, RecordKind, ScanRecord, Severity};
use chrono::{DateTime, Duration, Utc};
use hygiene_core::logging::codes;
use hygiene_core::{log_debug, log_success};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketAction {
    Opened,
    Verified,
    Changed,
    Reopened,
    Closed,
}

impl TicketAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketAction::Opened => "OPENED",
            TicketAction::Verified => "VERIFIED",
            TicketAction::Changed => "CHANGED",
            TicketAction::Reopened => "REOPENED",
            TicketAction::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TicketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketEvent {
    pub time: DateTime<Utc>,
    pub action: TicketAction,
    pub reason: &'static str,
    /// Record that caused the event; sweeps have none
    pub reference: Option<RecordId>,
}

/// Finding details carried on the ticket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketDetails {
    pub severity: Severity,
    pub name: Option<String>,
    pub cvss_base_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: TicketId,
    pub key: RecordKey,
    pub open: bool,
    pub time_opened: DateTime<Utc>,
    pub time_closed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TicketDetails>,
    pub events: Vec<TicketEvent>,
}

impl Ticket {
    fn opened(sighting: &Sighting, reference: Option<RecordId>, reason: &'static str) -> Self {
        Self {
            id: TicketId::new(),
            key: sighting.key.clone(),
            open: true,
            time_opened: sighting.time,
            time_closed: None,
            details: sighting.details.clone(),
            events: vec![TicketEvent {
                time: sighting.time,
                action: TicketAction::Opened,
                reason,
                reference,
            }],
        }
    }

    fn push(&mut self, time: DateTime<Utc>, action: TicketAction, reason: &'static str, reference: Option<RecordId>) {
        self.events.push(TicketEvent {
            time,
            action,
            reason,
            reference,
        });
    }
}

/// What one observation or sweep did to a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TicketChange {
    pub ticket: TicketId,
    pub action: TicketAction,
}

/// The parts of a record that drive its ticket
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub key: RecordKey,
    pub time: DateTime<Utc>,
    /// Open port, or finding above informational severity
    pub actionable: bool,
    pub details: Option<TicketDetails>,
}

impl Sighting {
    pub fn from_record(record: &ScanRecord) -> Self {
        let (actionable, details) = match &record.body {
            RecordBody::Port(port) => (port.state.is_open(), None),
            RecordBody::Host(_) => (false, None),
            RecordBody::Vulnerability(finding) => (
                finding.severity > Severity::Info,
                Some(TicketDetails {
                    severity: finding.severity,
                    name: finding.plugin_name.clone(),
                    cvss_base_score: finding.cvss_base_score,
                }),
            ),
        };

        Self {
            key: record.key(),
            time: record.time,
            actionable,
            details,
        }
    }
}

fn opening_reason(key: &RecordKey) -> &'static str {
    match key.kind() {
        RecordKind::PortScan => "port open",
        _ => "vulnerability detected",
    }
}

fn closing_reason(key: &RecordKey) -> &'static str {
    match key.kind() {
        RecordKind::PortScan => "port not open",
        _ => "vulnerability not detected",
    }
}

#[derive(Debug)]
pub struct TicketManager {
    reopen_window: Duration,
    tickets: RwLock<HashMap<RecordKey, Vec<Ticket>>>,
}

impl TicketManager {
    pub fn new(reopen_days: u32) -> Self {
        Self {
            reopen_window: Duration::days(i64::from(reopen_days)),
            tickets: RwLock::new(HashMap::new()),
        }
    }

    /// Apply one resolved observation to its key's tickets
    ///
    /// Historical and discarded observations never touch tickets.
    pub fn observe(
        &self,
        sighting: &Sighting,
        resolution: &Resolution,
    ) -> Result<Option<TicketChange>, ResolutionError> {
        if !resolution.is_latest() {
            return Ok(None);
        }
        let reference = resolution.id();
        let key = &sighting.key;

        let mut tickets = self.tickets.write().map_err(|_| StoreError::Poisoned)?;
        if !sighting.actionable && !tickets.contains_key(key) {
            return Ok(None);
        }
        let history = tickets.entry(key.clone()).or_default();

        let change = match history.last_mut() {
            Some(ticket) if ticket.open && sighting.actionable => Some(verify(ticket, sighting, reference)),
            Some(ticket) if ticket.open => Some(close(ticket, sighting.time, closing_reason(key))),
            Some(ticket) if sighting.actionable && self.can_reopen(ticket, sighting.time) => {
                Some(reopen(ticket, sighting, reference))
            }
            _ => None,
        };

        let change = match change {
            Some(change) => change,
            None if sighting.actionable => {
                let ticket = Ticket::opened(sighting, reference, opening_reason(key));
                let change = TicketChange {
                    ticket: ticket.id,
                    action: TicketAction::Opened,
                };
                history.push(ticket);
                change
            }
            None => return Ok(None),
        };

        log_change(key, change);
        Ok(Some(change))
    }

    /// Close open tickets of `kind` on the addresses whose key lost its latest record
    ///
    /// Run after the addresses were retired and rescanned.
    pub fn close_unconfirmed<S: RecordStore>(
        &self,
        resolver: &LatestStateResolver<S>,
        kind: RecordKind,
        ips: &[Ipv4Addr],
        time: DateTime<Utc>,
    ) -> Result<Vec<TicketChange>, ResolutionError> {
        let ips: BTreeSet<u32> = ips.iter().map(|ip| ip_to_int(*ip)).collect();
        let mut tickets = self.tickets.write().map_err(|_| StoreError::Poisoned)?;
        let mut changes = Vec::new();

        for (key, history) in tickets.iter_mut() {
            if key.kind() != kind || !ips.contains(&key.ip_int) {
                continue;
            }
            if let Some(ticket) = history.last_mut().filter(|ticket| ticket.open) {
                if resolver.latest(key)?.is_none() {
                    let change = close(ticket, time, closing_reason(key));
                    log_change(key, change);
                    changes.push(change);
                }
            }
        }

        Ok(changes)
    }

    pub fn open_ticket(&self, key: &RecordKey) -> Result<Option<Ticket>, ResolutionError> {
        let tickets = self.tickets.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tickets
            .get(key)
            .and_then(|history| history.last())
            .filter(|ticket| ticket.open)
            .cloned())
    }

    /// Every ticket ever raised for a key, oldest first
    pub fn tickets_for(&self, key: &RecordKey) -> Result<Vec<Ticket>, ResolutionError> {
        let tickets = self.tickets.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tickets.get(key).cloned().unwrap_or_default())
    }

    pub fn open_count(&self) -> Result<usize, ResolutionError> {
        let tickets = self.tickets.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tickets
            .values()
            .filter(|history| history.last().map_or(false, |ticket| ticket.open))
            .count())
    }

    fn can_reopen(&self, ticket: &Ticket, time: DateTime<Utc>) -> bool {
        ticket
            .time_closed
            .map_or(false, |closed| closed > time - self.reopen_window)
    }
}

fn verify(ticket: &mut Ticket, sighting: &Sighting, reference: Option<RecordId>) -> TicketChange {
    ticket.push(sighting.time, TicketAction::Verified, opening_reason(&sighting.key), reference);
    if sighting.details.is_some() && sighting.details != ticket.details {
        ticket.details = sighting.details.clone();
        ticket.push(sighting.time, TicketAction::Changed, "details changed", reference);
    }
    TicketChange {
        ticket: ticket.id,
        action: TicketAction::Verified,
    }
}

fn reopen(ticket: &mut Ticket, sighting: &Sighting, reference: Option<RecordId>) -> TicketChange {
    ticket.open = true;
    ticket.time_closed = None;
    if sighting.details.is_some() {
        ticket.details = sighting.details.clone();
    }
    ticket.push(sighting.time, TicketAction::Reopened, opening_reason(&sighting.key), reference);
    TicketChange {
        ticket: ticket.id,
        action: TicketAction::Reopened,
    }
}

fn close(ticket: &mut Ticket, time: DateTime<Utc>, reason: &'static str) -> TicketChange {
    ticket.open = false;
    ticket.time_closed = Some(time);
    ticket.push(time, TicketAction::Closed, reason, None);
    TicketChange {
        ticket: ticket.id,
        action: TicketAction::Closed,
    }
}

fn log_change(key: &RecordKey, change: TicketChange) {
    let code = match change.action {
        TicketAction::Opened => codes::success::TICKET_OPENED,
        TicketAction::Reopened => codes::success::TICKET_REOPENED,
        TicketAction::Closed => codes::success::TICKET_CLOSED,
        TicketAction::Verified | TicketAction::Changed => {
            log_debug!("Ticket verified", "ticket" => change.ticket, "key" => key);
            return;
        }
    };
    log_success!(
        code,
        "Ticket updated",
        "ticket" => change.ticket,
        "action" => change.action,
        "key" => key
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::MemoryStore;
    use crate::types::{PortObservation, PortState, Protocol, ScanSource, VulnerabilityFinding};
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at(days: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 9, 14, 0, 0, 0).unwrap() + Duration::days(days)
    }

    fn port(number: u16, state: PortState, days: i64) -> ScanRecord {
        ScanRecord::new(
            "TEST",
            Ipv4Addr::new(10, 0, 0, 1),
            ScanSource::Nmap,
            at(days),
            RecordBody::Port(PortObservation::new(Protocol::Tcp, number, state)),
        )
    }

    fn finding(severity: Severity, days: i64) -> ScanRecord {
        ScanRecord::new(
            "TEST",
            Ipv4Addr::new(10, 0, 0, 1),
            ScanSource::Nessus,
            at(days),
            RecordBody::Vulnerability(VulnerabilityFinding::new(Protocol::Tcp, 443, 10863, severity)),
        )
    }

    fn inserted() -> Resolution {
        Resolution::Inserted { id: RecordId::new() }
    }

    fn observe(manager: &TicketManager, record: &ScanRecord) -> Option<TicketAction> {
        manager
            .observe(&Sighting::from_record(record), &inserted())
            .unwrap()
            .map(|change| change.action)
    }

    #[test]
    fn test_ticket_follows_port_state() {
        let manager = TicketManager::new(90);
        let open = port(22, PortState::Open, 0);
        let key = open.key();

        assert_eq!(observe(&manager, &open), Some(TicketAction::Opened));
        assert_eq!(observe(&manager, &port(22, PortState::Open, 1)), Some(TicketAction::Verified));
        assert_eq!(observe(&manager, &port(22, PortState::Closed, 2)), Some(TicketAction::Closed));
        assert_eq!(observe(&manager, &port(22, PortState::Closed, 3)), None);

        let tickets = manager.tickets_for(&key).unwrap();
        assert_eq!(tickets.len(), 1);
        assert!(!tickets[0].open);
        assert_eq!(tickets[0].time_closed, Some(at(2)));
        let actions: Vec<_> = tickets[0].events.iter().map(|event| event.action).collect();
        assert_eq!(
            actions,
            vec![TicketAction::Opened, TicketAction::Verified, TicketAction::Closed]
        );
        assert_eq!(manager.open_count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_window() {
        let manager = TicketManager::new(30);
        let key = port(22, PortState::Open, 0).key();

        observe(&manager, &port(22, PortState::Open, 0));
        observe(&manager, &port(22, PortState::Closed, 1));
        assert_eq!(observe(&manager, &port(22, PortState::Open, 20)), Some(TicketAction::Reopened));
        assert_eq!(manager.tickets_for(&key).unwrap().len(), 1);

        observe(&manager, &port(22, PortState::Closed, 21));
        assert_eq!(observe(&manager, &port(22, PortState::Open, 60)), Some(TicketAction::Opened));

        let tickets = manager.tickets_for(&key).unwrap();
        assert_eq!(tickets.len(), 2);
        assert!(!tickets[0].open);
        assert_eq!(manager.open_ticket(&key).unwrap().map(|t| t.id), Some(tickets[1].id));
    }

    #[test]
    fn test_non_latest_and_informational_records_raise_nothing() {
        let manager = TicketManager::new(90);
        let open = Sighting::from_record(&port(22, PortState::Open, 0));
        let historical = Resolution::Historical {
            id: RecordId::new(),
            current: RecordId::new(),
        };

        assert_eq!(manager.observe(&open, &historical).unwrap(), None);
        assert_eq!(
            manager
                .observe(&open, &Resolution::Discarded { current: RecordId::new() })
                .unwrap(),
            None
        );
        assert_eq!(observe(&manager, &finding(Severity::Info, 0)), None);
        assert_eq!(observe(&manager, &finding(Severity::High, 0)), Some(TicketAction::Opened));
        assert_eq!(manager.open_count().unwrap(), 1);
    }

    #[test]
    fn test_finding_detail_change_is_recorded() {
        let manager = TicketManager::new(90);
        let key = finding(Severity::Medium, 0).key();

        observe(&manager, &finding(Severity::Medium, 0));
        observe(&manager, &finding(Severity::Critical, 1));

        let ticket = manager.open_ticket(&key).unwrap().unwrap();
        assert_eq!(ticket.details.as_ref().map(|d| d.severity), Some(Severity::Critical));
        assert_matches!(
            ticket.events.last(),
            Some(TicketEvent {
                action: TicketAction::Changed,
                reason: "details changed",
                ..
            })
        );

        // Dropping to informational means there is nothing left to fix
        assert_eq!(observe(&manager, &finding(Severity::Info, 2)), Some(TicketAction::Closed));
    }

    #[test]
    fn test_close_unconfirmed_after_retire() {
        let resolver = LatestStateResolver::new(MemoryStore::new());
        let manager = TicketManager::new(90);
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        for record in [port(22, PortState::Open, 0), port(80, PortState::Open, 0)] {
            let sighting = Sighting::from_record(&record);
            let resolution = resolver.resolve(record).unwrap();
            manager.observe(&sighting, &resolution).unwrap();
        }
        assert_eq!(manager.open_count().unwrap(), 2);

        resolver.retire_addresses(RecordKind::PortScan, &[ip]).unwrap();
        let rescan = port(80, PortState::Open, 5);
        let sighting = Sighting::from_record(&rescan);
        let resolution = resolver.resolve(rescan).unwrap();
        assert_eq!(
            manager.observe(&sighting, &resolution).unwrap().map(|c| c.action),
            Some(TicketAction::Verified)
        );

        let closed = manager
            .close_unconfirmed(&resolver, RecordKind::PortScan, &[ip], at(5))
            .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].action, TicketAction::Closed);
        assert!(manager.open_ticket(&port(22, PortState::Open, 0).key()).unwrap().is_none());
        assert!(manager.open_ticket(&sighting.key).unwrap().is_some());

        let other_kind = manager
            .close_unconfirmed(&resolver, RecordKind::VulnScan, &[ip], at(5))
            .unwrap();
        assert!(other_kind.is_empty());
    }
}
