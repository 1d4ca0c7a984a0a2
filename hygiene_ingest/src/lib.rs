//! # Hygiene Ingest - Scanner Document Normalization
//!
//! Turns loosely-typed Nmap and Nessus export documents into typed scan
//! records, keeps exactly one latest record per key, tracks remediation
//! tickets for open ports and findings, and tags point-in-time snapshots over
//! the stored state.

pub mod api;
pub mod normalizer;
pub mod resolution;
pub mod results;
pub mod state;
pub mod tickets;
pub mod types;

// Convenience re-exports
pub use api::*;

pub mod prelude {
    pub use crate::api::{
        DirectoryReport, DocumentOutcome, IngestConfig, IngestProcessor, IngestReport,
        ProcessorError,
    };

    pub use crate::normalizer::{
        DocumentKind, NormalizeContext, NormalizeError, NormalizeWarning, Normalized, Normalizer,
    };

    pub use crate::resolution::{
        LatestFilter, LatestStateResolver, MemoryStore, RecordStore, Resolution, ResolutionError,
        SnapshotTagger, StoreError, StoredRecord, TagFilter,
    };

    pub use crate::state::{HostState, HostStateManager, Stage, Status, TransitionSignal};

    pub use crate::tickets::{Ticket, TicketAction, TicketChange, TicketManager};

    pub use crate::types::{
        PortState, Protocol, RecordBody, RecordId, RecordKey, RecordKind, ScanRecord, ScanSource,
        Severity, SnapshotId, Subject,
    };
}
