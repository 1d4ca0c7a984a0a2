use super::store::StoreError;
use crate::types::RecordKey;
use hygiene_core::logging::codes;
use hygiene_core::Code;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Gave up resolving {key} after {attempts} conflicting commits")]
    RetriesExhausted { key: RecordKey, attempts: usize },
}

impl ResolutionError {
    pub fn code(&self) -> Code {
        match self {
            ResolutionError::Store(error) => error.code(),
            ResolutionError::RetriesExhausted { .. } => codes::resolution::RETRIES_EXHAUSTED,
        }
    }

    /// Whether resubmitting the same record later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ResolutionError::Store(StoreError::Conflict { .. }) => true,
            ResolutionError::RetriesExhausted { .. } => true,
            ResolutionError::Store(StoreError::Poisoned) => false,
            ResolutionError::Store(StoreError::Backend(_)) => false,
        }
    }
}
