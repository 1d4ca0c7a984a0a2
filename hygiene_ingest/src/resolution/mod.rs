pub mod error;
pub mod memory;
pub mod resolver;
pub mod snapshot;
pub mod store;

pub use error::ResolutionError;
pub use memory::MemoryStore;
pub use resolver::{LatestStateResolver, Resolution};
pub use snapshot::{SnapshotTagger, Tagged};
pub use store::{Commit, LatestFilter, RecordStore, StoreError, StoredRecord, TagFilter};
