//! # Record Store Seam
//!
//! The resolver only ever talks to storage through [`RecordStore`]. Any
//! backend must make `commit` atomic with respect to the latest flag of a
//! key: checking the expected holder, clearing its flag and inserting the
//! new record happen in one critical section.

use crate::types::{RecordId, RecordKey, RecordKind, ScanRecord, SnapshotId};
use chrono::{DateTime, Utc};
use hygiene_core::logging::codes;
use hygiene_core::Code;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A record together with its store-assigned id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: ScanRecord,
}

/// Compare-and-insert request
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub record: ScanRecord,
    /// Latest holder the caller observed for the record's key
    pub expected_latest: Option<RecordId>,
}

/// Selects latest records for bulk reads and flag resets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestFilter {
    pub kind: Option<RecordKind>,
    pub owners: Option<BTreeSet<String>>,
    pub ips: Option<BTreeSet<u32>>,
    pub open_ports_only: bool,
}

impl LatestFilter {
    pub fn for_kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_owners<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owners = Some(owners.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_ips<I: IntoIterator<Item = u32>>(mut self, ips: I) -> Self {
        self.ips = Some(ips.into_iter().collect());
        self
    }

    pub fn open_ports_only(mut self) -> Self {
        self.open_ports_only = true;
        self
    }

    pub fn matches(&self, record: &ScanRecord) -> bool {
        record.latest
            && self.kind.map_or(true, |kind| record.kind() == kind)
            && self
                .owners
                .as_ref()
                .map_or(true, |owners| owners.contains(&record.owner))
            && self
                .ips
                .as_ref()
                .map_or(true, |ips| ips.contains(&record.ip_int()))
            && (!self.open_ports_only || record.is_open_port())
    }
}

/// Selects records to receive a snapshot tag
#[derive(Debug, Clone, PartialEq)]
pub enum TagFilter {
    Latest(LatestFilter),
    /// Every record of the owner observed within `start..=end`
    Timespan {
        kind: RecordKind,
        owner: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Records already carrying any of the given snapshots
    Tagged {
        kind: RecordKind,
        snapshots: Vec<SnapshotId>,
    },
}

impl TagFilter {
    pub fn matches(&self, record: &ScanRecord) -> bool {
        match self {
            TagFilter::Latest(filter) => filter.matches(record),
            TagFilter::Timespan {
                kind,
                owner,
                start,
                end,
            } => {
                record.kind() == *kind
                    && record.owner == *owner
                    && record.time >= *start
                    && record.time <= *end
            }
            TagFilter::Tagged { kind, snapshots } => {
                record.kind() == *kind
                    && snapshots.iter().any(|snapshot| record.has_snapshot(*snapshot))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Latest holder for {key} changed (expected {expected:?}, found {actual:?})")]
    Conflict {
        key: RecordKey,
        expected: Option<RecordId>,
        actual: Option<RecordId>,
    },

    #[error("Record store lock poisoned")]
    Poisoned,

    #[error("Record store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> Code {
        match self {
            StoreError::Conflict { .. } => codes::resolution::COMMIT_CONFLICT,
            StoreError::Poisoned => codes::resolution::STORE_POISONED,
            StoreError::Backend(_) => codes::resolution::STORE_FAILURE,
        }
    }

    /// Conflicts go away on retry; the others do not
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Storage backend for scan records
///
/// Implementations must be safe to share between threads. Reads may be
/// stale by the time the caller acts on them; `commit` is where staleness
/// is detected.
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// Current latest holder for a key
    fn latest(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError>;

    /// Every retained observation of a key, newest first
    fn history(&self, key: &RecordKey) -> Result<Vec<StoredRecord>, StoreError>;

    /// Atomically insert a record if the key's latest holder is still `expected_latest`
    ///
    /// # Returns
    /// * `Ok(Some(id))` - record stored; if `record.latest` was set the previous holder's flag is cleared
    /// * `Ok(None)` - a non-latest record older than the retained history; nothing stored
    /// * `Err(StoreError::Conflict)` - the latest holder changed since it was read
    fn commit(&self, commit: Commit) -> Result<Option<RecordId>, StoreError>;

    /// Latest records matching a filter
    fn find_latest(&self, filter: &LatestFilter) -> Result<Vec<StoredRecord>, StoreError>;

    /// Clear the latest flag on every matching record, returning how many changed
    fn clear_latest(&self, filter: &LatestFilter) -> Result<usize, StoreError>;

    /// Attach a snapshot to every matching record not already carrying it
    fn tag(&self, filter: &TagFilter, snapshot: SnapshotId) -> Result<usize, StoreError>;

    /// Remove a snapshot from every record carrying it
    fn untag(&self, snapshot: SnapshotId) -> Result<usize, StoreError>;

    /// Number of stored records, latest or not
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn latest(&self, key: &RecordKey) -> Result<Option<StoredRecord>, StoreError> {
        (**self).latest(key)
    }

    fn history(&self, key: &RecordKey) -> Result<Vec<StoredRecord>, StoreError> {
        (**self).history(key)
    }

    fn commit(&self, commit: Commit) -> Result<Option<RecordId>, StoreError> {
        (**self).commit(commit)
    }

    fn find_latest(&self, filter: &LatestFilter) -> Result<Vec<StoredRecord>, StoreError> {
        (**self).find_latest(filter)
    }

    fn clear_latest(&self, filter: &LatestFilter) -> Result<usize, StoreError> {
        (**self).clear_latest(filter)
    }

    fn tag(&self, filter: &TagFilter, snapshot: SnapshotId) -> Result<usize, StoreError> {
        (**self).tag(filter, snapshot)
    }

    fn untag(&self, snapshot: SnapshotId) -> Result<usize, StoreError> {
        (**self).untag(snapshot)
    }

    fn len(&self) -> Result<usize, StoreError> {
        (**self).len()
    }
}
