//! Snapshot tagging: freezing a point-in-time view by attaching a
//! `SnapshotId` to the records that make it up.

use super::error::ResolutionError;
use super::store::{LatestFilter, RecordStore, TagFilter};
use crate::types::{RecordKind, SnapshotId};
use chrono::{DateTime, Utc};
use hygiene_core::log_success;
use hygiene_core::logging::codes;
use serde::Serialize;

/// A snapshot and how many records received it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tagged {
    pub snapshot: SnapshotId,
    pub records: usize,
}

#[derive(Debug)]
pub struct SnapshotTagger<'a, S> {
    store: &'a S,
}

impl<'a, S: RecordStore> SnapshotTagger<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Tag every latest record of `kind` belonging to the owners
    ///
    /// Port scans only contribute open ports.
    pub fn tag_latest(&self, kind: RecordKind, owners: &[&str]) -> Result<Tagged, ResolutionError> {
        self.tag_latest_with(kind, owners, SnapshotId::new())
    }

    /// Tag one owner's records of `kind` observed within `start..=end`, latest or not
    pub fn tag_timespan(
        &self,
        kind: RecordKind,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Tagged, ResolutionError> {
        let filter = TagFilter::Timespan {
            kind,
            owner: owner.to_string(),
            start,
            end,
        };
        self.apply(&filter, SnapshotId::new())
    }

    /// Tag records of `kind` that already carry any of `existing`
    pub fn tag_matching(
        &self,
        kind: RecordKind,
        existing: &[SnapshotId],
    ) -> Result<Tagged, ResolutionError> {
        let filter = TagFilter::Tagged {
            kind,
            snapshots: existing.to_vec(),
        };
        self.apply(&filter, SnapshotId::new())
    }

    /// Tag the latest state of every kind for the owners under one snapshot
    pub fn snapshot_owners(&self, owners: &[&str]) -> Result<Tagged, ResolutionError> {
        let snapshot = SnapshotId::new();
        let mut records = 0;

        for kind in RecordKind::ALL {
            records += self.tag_latest_with(kind, owners, snapshot)?.records;
        }

        Ok(Tagged { snapshot, records })
    }

    /// Detach a snapshot from every record
    pub fn remove_tag(&self, snapshot: SnapshotId) -> Result<usize, ResolutionError> {
        Ok(self.store.untag(snapshot)?)
    }

    fn tag_latest_with(
        &self,
        kind: RecordKind,
        owners: &[&str],
        snapshot: SnapshotId,
    ) -> Result<Tagged, ResolutionError> {
        let mut filter = LatestFilter::for_kind(kind).with_owners(owners.iter().copied());
        if kind == RecordKind::PortScan {
            filter = filter.open_ports_only();
        }
        self.apply(&TagFilter::Latest(filter), snapshot)
    }

    fn apply(&self, filter: &TagFilter, snapshot: SnapshotId) -> Result<Tagged, ResolutionError> {
        let records = self.store.tag(filter, snapshot)?;

        log_success!(
            codes::success::SNAPSHOT_TAGGED,
            "Tagged records with snapshot",
            "snapshot" => snapshot,
            "records" => records
        );
        Ok(Tagged { snapshot, records })
    }
}
