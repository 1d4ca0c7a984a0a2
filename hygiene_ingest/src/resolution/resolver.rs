//! # Latest-State Resolution
//!
//! Every observation of a `RecordKey` is kept, but exactly one carries the
//! latest flag: the one with the greatest observation time. Arrival order
//! does not matter. An observation older than the current holder is stored
//! as history (or discarded), never promoted.
//!
//! The resolver reads the current holder, decides, and commits with the
//! holder it saw as the expectation. If another writer got there first the
//! store reports a conflict and the decision is made again against the new
//! holder.

use super::error::ResolutionError;
use super::store::{Commit, LatestFilter, RecordStore, StoreError, StoredRecord};
use crate::types::{ip_to_int, RecordBody, RecordId, RecordKey, RecordKind, ScanRecord};
use hygiene_core::config::compile_time::resolution::MAX_COMMIT_RETRIES;
use hygiene_core::config::{ResolverPreferences, TiePolicy};
use hygiene_core::logging::codes;
use hygiene_core::{log_debug, log_error, log_success, log_warning};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// What happened to one resolved observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    /// First observation of its key
    Inserted { id: RecordId },
    /// Took the latest flag from `previous`
    Superseded { id: RecordId, previous: RecordId },
    /// Stored without the latest flag; `current` is newer
    Historical { id: RecordId, current: RecordId },
    /// Dropped because `current` is newer and history is off
    Discarded { current: RecordId },
}

impl Resolution {
    /// Id of the stored record, if one was stored
    pub fn id(&self) -> Option<RecordId> {
        match self {
            Resolution::Inserted { id }
            | Resolution::Superseded { id, .. }
            | Resolution::Historical { id, .. } => Some(*id),
            Resolution::Discarded { .. } => None,
        }
    }

    pub fn is_latest(&self) -> bool {
        matches!(
            self,
            Resolution::Inserted { .. } | Resolution::Superseded { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Inserted { .. } => "inserted",
            Resolution::Superseded { .. } => "superseded",
            Resolution::Historical { .. } => "historical",
            Resolution::Discarded { .. } => "discarded",
        }
    }
}

#[derive(Debug)]
pub struct LatestStateResolver<S> {
    store: S,
    preferences: ResolverPreferences,
    max_retries: usize,
}

impl<S: RecordStore> LatestStateResolver<S> {
    pub fn new(store: S) -> Self {
        Self::with_preferences(store, ResolverPreferences::default())
    }

    pub fn with_preferences(store: S, preferences: ResolverPreferences) -> Self {
        Self {
            store,
            preferences,
            max_retries: MAX_COMMIT_RETRIES,
        }
    }

    /// Override the compile-time retry bound; at least one attempt is always made
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn preferences(&self) -> &ResolverPreferences {
        &self.preferences
    }

    /// Store one observation and settle which record holds the latest flag
    pub fn resolve(&self, record: ScanRecord) -> Result<Resolution, ResolutionError> {
        let key = record.key();

        for attempt in 1..=self.max_retries {
            let current = self.store.latest(&key)?;

            match self.attempt(record.clone(), current) {
                Ok(resolution) => {
                    if self.preferences.log_flag_changes {
                        log_debug!(
                            "Resolved observation",
                            "key" => &key,
                            "resolution" => resolution.as_str(),
                            "attempt" => attempt
                        );
                    }
                    return Ok(resolution);
                }
                Err(StoreError::Conflict { .. }) => {
                    log_warning!(
                        codes::resolution::COMMIT_CONFLICT,
                        "Latest holder changed during commit, retrying",
                        "key" => &key,
                        "attempt" => attempt
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        log_error!(
            codes::resolution::RETRIES_EXHAUSTED,
            "Could not commit observation",
            "key" => &key,
            "attempts" => self.max_retries
        );
        Err(ResolutionError::RetriesExhausted {
            key,
            attempts: self.max_retries,
        })
    }

    fn attempt(
        &self,
        mut record: ScanRecord,
        current: Option<StoredRecord>,
    ) -> Result<Resolution, StoreError> {
        let Some(current) = current else {
            record.latest = true;
            let id = self.commit_latest(Commit {
                record,
                expected_latest: None,
            })?;
            return Ok(Resolution::Inserted { id });
        };

        let incoming_wins = match record.time.cmp(&current.record.time) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.preferences.tie_policy == TiePolicy::IncomingWins,
        };

        if incoming_wins {
            record.latest = true;
            let id = self.commit_latest(Commit {
                record,
                expected_latest: Some(current.id),
            })?;
            Ok(Resolution::Superseded {
                id,
                previous: current.id,
            })
        } else if self.preferences.keep_history {
            record.latest = false;
            let stored = self.store.commit(Commit {
                record,
                expected_latest: Some(current.id),
            })?;
            Ok(match stored {
                Some(id) => Resolution::Historical {
                    id,
                    current: current.id,
                },
                None => Resolution::Discarded {
                    current: current.id,
                },
            })
        } else {
            Ok(Resolution::Discarded {
                current: current.id,
            })
        }
    }

    fn commit_latest(&self, commit: Commit) -> Result<RecordId, StoreError> {
        self.store.commit(commit)?.ok_or_else(|| {
            StoreError::Backend("store declined a latest record".to_string())
        })
    }

    /// Resolve many observations; results are in input order
    ///
    /// Records are committed newest first so each key's flag moves at most
    /// once per distinct timestamp. The sort is stable, so equal times keep
    /// their arrival order and the tie policy applies as it would one by one.
    pub fn resolve_batch(
        &self,
        records: Vec<ScanRecord>,
    ) -> Vec<Result<Resolution, ResolutionError>> {
        let times: Vec<_> = records.iter().map(|record| record.time).collect();
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|a, b| times[*b].cmp(&times[*a]));

        let mut pending: Vec<Option<ScanRecord>> = records.into_iter().map(Some).collect();
        let mut slots: Vec<Option<Result<Resolution, ResolutionError>>> =
            (0..pending.len()).map(|_| None).collect();

        for index in order {
            if let Some(record) = pending[index].take() {
                slots[index] = Some(self.resolve(record));
            }
        }

        slots.into_iter().flatten().collect()
    }

    pub fn latest(&self, key: &RecordKey) -> Result<Option<StoredRecord>, ResolutionError> {
        Ok(self.store.latest(key)?)
    }

    pub fn history(&self, key: &RecordKey) -> Result<Vec<StoredRecord>, ResolutionError> {
        Ok(self.store.history(key)?)
    }

    /// Clear every latest flag of one kind for an owner
    pub fn retire_owner(&self, kind: RecordKind, owner: &str) -> Result<usize, ResolutionError> {
        let cleared = self
            .store
            .clear_latest(&LatestFilter::for_kind(kind).with_owners([owner]))?;

        log_success!(
            codes::success::LATEST_FLAGS_CLEARED,
            "Cleared latest flags for owner",
            "kind" => kind,
            "owner" => owner,
            "cleared" => cleared
        );
        Ok(cleared)
    }

    /// Clear every latest flag of one kind for a set of addresses
    pub fn retire_addresses(
        &self,
        kind: RecordKind,
        ips: &[Ipv4Addr],
    ) -> Result<usize, ResolutionError> {
        let filter = LatestFilter::for_kind(kind).with_ips(ips.iter().map(|ip| ip_to_int(*ip)));
        let cleared = self.store.clear_latest(&filter)?;

        log_success!(
            codes::success::LATEST_FLAGS_CLEARED,
            "Cleared latest flags for addresses",
            "kind" => kind,
            "addresses" => ips.len(),
            "cleared" => cleared
        );
        Ok(cleared)
    }

    /// Ports whose latest observation for `ip` is open
    pub fn open_ports(&self, ip: Ipv4Addr) -> Result<BTreeSet<u16>, ResolutionError> {
        self.open_ports_for(&[ip])
    }

    /// Union of the latest open ports across several addresses
    pub fn open_ports_for(&self, ips: &[Ipv4Addr]) -> Result<BTreeSet<u16>, ResolutionError> {
        let filter = LatestFilter::for_kind(RecordKind::PortScan)
            .with_ips(ips.iter().map(|ip| ip_to_int(*ip)))
            .open_ports_only();

        Ok(self
            .store
            .find_latest(&filter)?
            .into_iter()
            .filter_map(|stored| match stored.record.body {
                RecordBody::Port(port) => Some(port.port),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::memory::MemoryStore;
    use crate::resolution::store::TagFilter;
    use crate::types::{PortObservation, PortState, Protocol, ScanSource, SnapshotId};
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::thread;

    fn preferences(keep_history: bool, tie_policy: TiePolicy) -> ResolverPreferences {
        ResolverPreferences {
            keep_history,
            tie_policy,
            log_flag_changes: false,
            ticket_reopen_days: 90,
        }
    }

    fn resolver() -> LatestStateResolver<MemoryStore> {
        LatestStateResolver::with_preferences(
            MemoryStore::new(),
            preferences(true, TiePolicy::IncomingWins),
        )
    }

    fn port_at(port: u16, hours: i64, state: PortState) -> ScanRecord {
        ScanRecord::new(
            "TEST",
            Ipv4Addr::new(10, 0, 0, 1),
            ScanSource::Nmap,
            Utc.with_ymd_and_hms(2012, 9, 14, 0, 0, 0).unwrap() + Duration::hours(hours),
            RecordBody::Port(PortObservation::new(Protocol::Tcp, port, state)),
        )
    }

    fn latest_holders<S: RecordStore>(resolver: &LatestStateResolver<S>, key: &RecordKey) -> usize {
        resolver
            .history(key)
            .unwrap()
            .iter()
            .filter(|stored| stored.record.latest)
            .count()
    }

    #[test]
    fn test_newer_observation_supersedes() {
        let resolver = resolver();
        let first = resolver.resolve(port_at(22, 0, PortState::Open)).unwrap();
        let second = resolver.resolve(port_at(22, 1, PortState::Closed)).unwrap();

        assert_matches!(first, Resolution::Inserted { .. });
        assert_eq!(
            second,
            Resolution::Superseded {
                id: second.id().unwrap(),
                previous: first.id().unwrap()
            }
        );

        let key = port_at(22, 0, PortState::Open).key();
        let latest = resolver.latest(&key).unwrap().unwrap();
        assert_eq!(latest.record.port_state(), Some(PortState::Closed));
        assert_eq!(latest_holders(&resolver, &key), 1);
    }

    #[test]
    fn test_older_observation_becomes_history() {
        let resolver = resolver();
        let newer = resolver.resolve(port_at(22, 5, PortState::Open)).unwrap();
        let older = resolver.resolve(port_at(22, 1, PortState::Closed)).unwrap();

        assert_eq!(
            older,
            Resolution::Historical {
                id: older.id().unwrap(),
                current: newer.id().unwrap()
            }
        );

        let key = port_at(22, 0, PortState::Open).key();
        let latest = resolver.latest(&key).unwrap().unwrap();
        assert_eq!(Some(latest.id), newer.id());
        assert_eq!(resolver.history(&key).unwrap().len(), 2);
    }

    #[test]
    fn test_older_observation_discarded_without_history() {
        let resolver = LatestStateResolver::with_preferences(
            MemoryStore::new(),
            preferences(false, TiePolicy::IncomingWins),
        );
        let newer = resolver.resolve(port_at(22, 5, PortState::Open)).unwrap();
        let older = resolver.resolve(port_at(22, 1, PortState::Open)).unwrap();

        assert_eq!(
            older,
            Resolution::Discarded {
                current: newer.id().unwrap()
            }
        );
        assert_eq!(resolver.store().len().unwrap(), 1);
    }

    #[test]
    fn test_observation_older_than_retained_history_is_discarded() {
        let resolver = LatestStateResolver::with_preferences(
            MemoryStore::with_history_limit(1),
            preferences(true, TiePolicy::IncomingWins),
        );
        resolver.resolve(port_at(22, 5, PortState::Open)).unwrap();
        let holder = resolver.resolve(port_at(22, 6, PortState::Open)).unwrap();
        let stale = resolver.resolve(port_at(22, 1, PortState::Closed)).unwrap();

        assert_eq!(
            stale,
            Resolution::Discarded {
                current: holder.id().unwrap()
            }
        );
        assert_eq!(resolver.store().len().unwrap(), 2);
    }

    #[test]
    fn test_tie_policies() {
        let incoming = resolver();
        incoming.resolve(port_at(22, 0, PortState::Open)).unwrap();
        let tie = incoming.resolve(port_at(22, 0, PortState::Closed)).unwrap();
        assert_matches!(tie, Resolution::Superseded { .. });

        let current = LatestStateResolver::with_preferences(
            MemoryStore::new(),
            preferences(true, TiePolicy::CurrentWins),
        );
        current.resolve(port_at(22, 0, PortState::Open)).unwrap();
        let tie = current.resolve(port_at(22, 0, PortState::Closed)).unwrap();
        assert_matches!(tie, Resolution::Historical { .. });

        let key = port_at(22, 0, PortState::Open).key();
        assert_eq!(
            current.latest(&key).unwrap().unwrap().record.port_state(),
            Some(PortState::Open)
        );
    }

    #[test]
    fn test_batch_results_follow_input_order() {
        let resolver = resolver();
        let results = resolver.resolve_batch(vec![
            port_at(22, 1, PortState::Open),
            port_at(22, 3, PortState::Closed),
            port_at(22, 2, PortState::Open),
            port_at(80, 0, PortState::Open),
        ]);

        assert_eq!(results.len(), 4);
        assert_matches!(results[0], Ok(Resolution::Historical { .. }));
        assert_matches!(results[1], Ok(Resolution::Inserted { .. }));
        assert_matches!(results[2], Ok(Resolution::Historical { .. }));
        assert_matches!(results[3], Ok(Resolution::Inserted { .. }));

        let key = port_at(22, 0, PortState::Open).key();
        let latest = resolver.latest(&key).unwrap().unwrap();
        assert_eq!(latest.record.time, port_at(22, 3, PortState::Open).time);
        assert_eq!(latest_holders(&resolver, &key), 1);
    }

    #[test]
    fn test_batch_ties_keep_arrival_order() {
        let resolver = resolver();
        let results = resolver.resolve_batch(vec![
            port_at(22, 0, PortState::Open),
            port_at(22, 0, PortState::Closed),
        ]);

        assert_matches!(results[0], Ok(Resolution::Inserted { .. }));
        assert_matches!(results[1], Ok(Resolution::Superseded { .. }));

        let key = port_at(22, 0, PortState::Open).key();
        assert_eq!(
            resolver.latest(&key).unwrap().unwrap().record.port_state(),
            Some(PortState::Closed)
        );
    }

    /// Fails the first `conflicts` commits as if another writer won the race
    #[derive(Debug)]
    struct ContendedStore {
        inner: MemoryStore,
        conflicts: AtomicUsize,
    }

    impl ContendedStore {
        fn new(conflicts: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                conflicts: AtomicUsize::new(conflicts),
            }
        }
    }

    impl RecordStore for ContendedStore {
        fn latest(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
            self.inner.latest(key)
        }

        fn history(&self, key: &RecordKey) -> Result<Vec<StoredRecord>, StoreError> {
            self.inner.history(key)
        }

        fn commit(&self, commit: Commit) -> Result<Option<RecordId>, StoreError> {
            let remaining = self.conflicts.load(AtomicOrdering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, AtomicOrdering::SeqCst);
                return Err(StoreError::Conflict {
                    key: commit.record.key(),
                    expected: commit.expected_latest,
                    actual: None,
                });
            }
            self.inner.commit(commit)
        }

        fn find_latest(&self, filter: &LatestFilter) -> Result<Vec<StoredRecord>, StoreError> {
            self.inner.find_latest(filter)
        }

        fn clear_latest(&self, filter: &LatestFilter) -> Result<usize, StoreError> {
            self.inner.clear_latest(filter)
        }

        fn tag(&self, filter: &TagFilter, snapshot: SnapshotId) -> Result<usize, StoreError> {
            self.inner.tag(filter, snapshot)
        }

        fn untag(&self, snapshot: SnapshotId) -> Result<usize, StoreError> {
            self.inner.untag(snapshot)
        }

        fn len(&self) -> Result<usize, StoreError> {
            self.inner.len()
        }
    }

    #[test]
    fn test_conflicts_are_retried() {
        let resolver = LatestStateResolver::with_preferences(
            ContendedStore::new(2),
            preferences(true, TiePolicy::IncomingWins),
        )
        .with_max_retries(3);

        assert_matches!(
            resolver.resolve(port_at(22, 0, PortState::Open)),
            Ok(Resolution::Inserted { .. })
        );
    }

    #[test]
    fn test_retries_are_bounded() {
        let resolver = LatestStateResolver::with_preferences(
            ContendedStore::new(5),
            preferences(true, TiePolicy::IncomingWins),
        )
        .with_max_retries(2);

        let error = resolver
            .resolve(port_at(22, 0, PortState::Open))
            .unwrap_err();
        assert_matches!(error, ResolutionError::RetriesExhausted { attempts: 2, .. });
        assert!(error.is_recoverable());
        assert_eq!(resolver.store().len().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_writers_leave_one_latest() {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(
            LatestStateResolver::with_preferences(
                Arc::clone(&store),
                preferences(true, TiePolicy::IncomingWins),
            )
            .with_max_retries(10_000),
        );

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let resolver = Arc::clone(&resolver);
                thread::spawn(move || {
                    for step in 0..20 {
                        let hours = step * 4 + worker;
                        resolver
                            .resolve(port_at(443, hours, PortState::Open))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let key = port_at(443, 0, PortState::Open).key();
        let latest = resolver.latest(&key).unwrap().unwrap();
        assert_eq!(latest.record.time, port_at(443, 79, PortState::Open).time);
        assert_eq!(latest_holders(&resolver, &key), 1);
    }

    #[test]
    fn test_open_ports_and_retirement() {
        let resolver = resolver();
        resolver.resolve_batch(vec![
            port_at(22, 0, PortState::Open),
            port_at(80, 0, PortState::Open),
            port_at(443, 0, PortState::Filtered),
            port_at(80, 1, PortState::Closed),
        ]);

        let ip = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(resolver.open_ports(ip).unwrap(), BTreeSet::from([22]));

        assert_eq!(resolver.retire_addresses(RecordKind::PortScan, &[ip]).unwrap(), 3);
        assert!(resolver.open_ports(ip).unwrap().is_empty());
        assert_eq!(resolver.retire_owner(RecordKind::PortScan, "TEST").unwrap(), 0);
    }
}
