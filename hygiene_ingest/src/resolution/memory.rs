//! In-memory `RecordStore` behind a single `RwLock`

use super::store::{Commit, LatestFilter, RecordStore, StoreError, StoredRecord, TagFilter};
use crate::types::{RecordId, RecordKey, ScanRecord, SnapshotId};
use hygiene_core::config::compile_time::resolution::MAX_HISTORY_PER_KEY;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<RecordId, ScanRecord>,
    /// Ids per key ordered newest observation first
    by_key: HashMap<RecordKey, Vec<RecordId>>,
    latest: HashMap<RecordKey, RecordId>,
}

impl Inner {
    fn stored(&self, id: RecordId) -> Option<StoredRecord> {
        self.records.get(&id).map(|record| StoredRecord {
            id,
            record: record.clone(),
        })
    }

    fn insert_ordered(&mut self, key: RecordKey, id: RecordId, record: &ScanRecord) {
        let ids = self.by_key.entry(key).or_default();
        let records = &self.records;
        let position = ids
            .iter()
            .position(|existing| {
                records
                    .get(existing)
                    .map_or(true, |stored| stored.time <= record.time)
            })
            .unwrap_or(ids.len());
        ids.insert(position, id);
    }

    /// Whether a non-latest record would land past the retained window
    fn outside_window(&self, key: &RecordKey, record: &ScanRecord, limit: usize) -> bool {
        let holder = self.latest.get(key).copied();
        let newer = self.by_key.get(key).map_or(0, |ids| {
            ids.iter()
                .filter(|id| Some(**id) != holder)
                .filter_map(|id| self.records.get(id))
                .filter(|stored| stored.snapshots.is_empty() && stored.time > record.time)
                .count()
        });
        newer >= limit
    }

    /// Drop the oldest untagged non-latest versions beyond `limit`
    ///
    /// Records carrying a snapshot belong to a frozen view and are kept.
    fn evict(&mut self, key: &RecordKey, limit: usize) -> usize {
        let holder = self.latest.get(key).copied();
        let Some(ids) = self.by_key.get_mut(key) else {
            return 0;
        };
        let records = &self.records;

        let mut retained = 0;
        let mut evicted = Vec::new();
        ids.retain(|id| {
            let tagged = records
                .get(id)
                .map_or(false, |stored| !stored.snapshots.is_empty());
            if Some(*id) == holder || tagged {
                return true;
            }
            retained += 1;
            if retained > limit {
                evicted.push(*id);
                false
            } else {
                true
            }
        });

        for id in &evicted {
            self.records.remove(id);
        }
        evicted.len()
    }
}

/// Reference store for tests and single-process use
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    history_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(MAX_HISTORY_PER_KEY)
    }

    /// Retain at most `limit` untagged non-latest versions per key
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_limit: limit,
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl RecordStore for MemoryStore {
    fn latest(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        let inner = self.read()?;
        Ok(inner.latest.get(key).and_then(|id| inner.stored(*id)))
    }

    fn history(&self, key: &RecordKey) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .by_key
            .get(key)
            .map(|ids| ids.iter().filter_map(|id| inner.stored(*id)).collect())
            .unwrap_or_default())
    }

    fn commit(&self, commit: Commit) -> Result<Option<RecordId>, StoreError> {
        let mut inner = self.write()?;
        let Commit {
            record,
            expected_latest,
        } = commit;

        let key = record.key();
        let actual = inner.latest.get(&key).copied();
        if actual != expected_latest {
            return Err(StoreError::Conflict {
                key,
                expected: expected_latest,
                actual,
            });
        }

        if !record.latest && inner.outside_window(&key, &record, self.history_limit) {
            return Ok(None);
        }

        let id = RecordId::new();
        if record.latest {
            if let Some(previous) = actual {
                if let Some(stored) = inner.records.get_mut(&previous) {
                    stored.latest = false;
                }
            }
            inner.latest.insert(key.clone(), id);
        }

        inner.insert_ordered(key.clone(), id, &record);
        inner.records.insert(id, record);
        inner.evict(&key, self.history_limit);

        Ok(Some(id))
    }

    fn find_latest(&self, filter: &LatestFilter) -> Result<Vec<StoredRecord>, StoreError> {
        let inner = self.read()?;
        let mut found: Vec<StoredRecord> = inner
            .latest
            .values()
            .filter_map(|id| inner.stored(*id))
            .filter(|stored| filter.matches(&stored.record))
            .collect();
        found.sort_by_key(|stored| stored.record.key());
        Ok(found)
    }

    fn clear_latest(&self, filter: &LatestFilter) -> Result<usize, StoreError> {
        let mut inner = self.write()?;

        let cleared: Vec<(RecordKey, RecordId)> = inner
            .latest
            .iter()
            .filter(|(_, id)| {
                inner
                    .records
                    .get(id)
                    .map_or(false, |record| filter.matches(record))
            })
            .map(|(key, id)| (key.clone(), *id))
            .collect();

        for (key, id) in &cleared {
            inner.latest.remove(key);
            if let Some(record) = inner.records.get_mut(id) {
                record.latest = false;
            }
        }

        for (key, _) in &cleared {
            inner.evict(key, self.history_limit);
        }

        Ok(cleared.len())
    }

    fn tag(&self, filter: &TagFilter, snapshot: SnapshotId) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let mut tagged = 0;

        for record in inner.records.values_mut() {
            if filter.matches(record) && !record.has_snapshot(snapshot) {
                record.snapshots.push(snapshot);
                tagged += 1;
            }
        }

        Ok(tagged)
    }

    fn untag(&self, snapshot: SnapshotId) -> Result<usize, StoreError> {
        let mut inner = self.write()?;
        let mut removed = 0;

        for record in inner.records.values_mut() {
            let before = record.snapshots.len();
            record.snapshots.retain(|tag| *tag != snapshot);
            removed += before - record.snapshots.len();
        }

        Ok(removed)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PortObservation, PortState, Protocol, RecordBody, RecordKind, ScanSource};
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};
    use std::net::Ipv4Addr;

    fn observation(hours: i64, state: PortState) -> ScanRecord {
        ScanRecord::new(
            "TEST",
            Ipv4Addr::new(10, 0, 0, 1),
            ScanSource::Nmap,
            Utc.with_ymd_and_hms(2012, 9, 14, 0, 0, 0).unwrap() + Duration::hours(hours),
            RecordBody::Port(PortObservation::new(Protocol::Tcp, 443, state)),
        )
    }

    fn latest_count(store: &MemoryStore, key: &RecordKey) -> usize {
        store
            .history(key)
            .unwrap()
            .iter()
            .filter(|stored| stored.record.latest)
            .count()
    }

    #[test]
    fn test_commit_flips_previous_holder() {
        let store = MemoryStore::new();
        let first = observation(0, PortState::Open);
        let key = first.key();

        let first_id = store
            .commit(Commit {
                record: first,
                expected_latest: None,
            })
            .unwrap()
            .unwrap();
        let second_id = store
            .commit(Commit {
                record: observation(1, PortState::Closed),
                expected_latest: Some(first_id),
            })
            .unwrap()
            .unwrap();

        assert_eq!(store.latest(&key).unwrap().unwrap().id, second_id);
        assert_eq!(latest_count(&store, &key), 1);

        let history = store.history(&key).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second_id);
        assert!(!history[1].record.latest);
    }

    #[test]
    fn test_commit_detects_stale_expectation() {
        let store = MemoryStore::new();
        let record = observation(0, PortState::Open);
        store
            .commit(Commit {
                record: record.clone(),
                expected_latest: None,
            })
            .unwrap()
            .unwrap();

        assert_matches!(
            store.commit(Commit {
                record,
                expected_latest: None,
            }),
            Err(StoreError::Conflict { expected: None, actual: Some(_), .. })
        );
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let store = MemoryStore::with_history_limit(2);
        let mut holder = None;
        for hour in 0..5 {
            holder = Some(
                store
                    .commit(Commit {
                        record: observation(hour, PortState::Open),
                        expected_latest: holder,
                    })
                    .unwrap()
                    .unwrap(),
            );
        }

        let key = observation(0, PortState::Open).key();
        let history = store.history(&key).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, holder.unwrap());
        // The two most recent non-latest versions survive
        assert_eq!(history[2].record.time, observation(2, PortState::Open).time);
    }

    #[test]
    fn test_clear_latest_and_find_latest() {
        let store = MemoryStore::new();
        store
            .commit(Commit {
                record: observation(0, PortState::Open),
                expected_latest: None,
            })
            .unwrap()
            .unwrap();

        let filter = LatestFilter::for_kind(RecordKind::PortScan).with_ips([167772161]);
        assert_eq!(store.find_latest(&filter).unwrap().len(), 1);
        assert_eq!(store.clear_latest(&filter).unwrap(), 1);
        assert!(store.find_latest(&filter).unwrap().is_empty());
        assert_eq!(store.clear_latest(&filter).unwrap(), 0);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_tag_and_untag() {
        let store = MemoryStore::new();
        let id = store
            .commit(Commit {
                record: observation(0, PortState::Open),
                expected_latest: None,
            })
            .unwrap()
            .unwrap();

        let snapshot = SnapshotId::new();
        let filter = TagFilter::Latest(LatestFilter::for_kind(RecordKind::PortScan));
        assert_eq!(store.tag(&filter, snapshot).unwrap(), 1);
        // Tagging twice does not duplicate
        assert_eq!(store.tag(&filter, snapshot).unwrap(), 0);

        let key = observation(0, PortState::Open).key();
        let stored = store.latest(&key).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.record.snapshots, vec![snapshot]);

        assert_eq!(store.untag(snapshot).unwrap(), 1);
        assert!(store.latest(&key).unwrap().unwrap().record.snapshots.is_empty());
    }

    #[test]
    fn test_eviction_keeps_tagged_records() {
        let store = MemoryStore::with_history_limit(1);
        let key = observation(0, PortState::Open).key();
        let mut holder = None;
        for hour in 0..2 {
            holder = store
                .commit(Commit {
                    record: observation(hour, PortState::Open),
                    expected_latest: holder,
                })
                .unwrap();
        }

        let snapshot = SnapshotId::new();
        let start = observation(0, PortState::Open).time;
        let end = observation(1, PortState::Open).time;
        let filter = TagFilter::Timespan {
            kind: RecordKind::PortScan,
            owner: "TEST".to_string(),
            start,
            end,
        };
        assert_eq!(store.tag(&filter, snapshot).unwrap(), 2);

        for hour in 2..4 {
            holder = store
                .commit(Commit {
                    record: observation(hour, PortState::Open),
                    expected_latest: holder,
                })
                .unwrap();
        }

        let history = store.history(&key).unwrap();
        let tagged = history
            .iter()
            .filter(|stored| stored.record.has_snapshot(snapshot))
            .count();
        assert_eq!(tagged, 2);
        // holder, one untagged historical, two tagged
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].record.time, observation(2, PortState::Open).time);
    }

    #[test]
    fn test_historical_past_window_is_not_stored() {
        let store = MemoryStore::with_history_limit(1);
        let mut holder = None;
        for hour in [5, 6] {
            holder = store
                .commit(Commit {
                    record: observation(hour, PortState::Open),
                    expected_latest: holder,
                })
                .unwrap();
        }

        let mut stale = observation(1, PortState::Closed);
        stale.latest = false;
        let outcome = store
            .commit(Commit {
                record: stale,
                expected_latest: holder,
            })
            .unwrap();

        assert_eq!(outcome, None);
        assert_eq!(store.len().unwrap(), 2);

        // Inside the window it is kept
        let roomy = MemoryStore::with_history_limit(4);
        let id = roomy
            .commit(Commit {
                record: observation(5, PortState::Open),
                expected_latest: None,
            })
            .unwrap();
        let mut older = observation(1, PortState::Closed);
        older.latest = false;
        let kept = roomy
            .commit(Commit {
                record: older,
                expected_latest: id,
            })
            .unwrap();
        assert!(kept.is_some());
        assert_eq!(roomy.len().unwrap(), 2);
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let store = MemoryStore::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.inner.write().unwrap();
            panic!("poison the lock");
        }));

        assert_eq!(store.len(), Err(StoreError::Poisoned));
    }
}
