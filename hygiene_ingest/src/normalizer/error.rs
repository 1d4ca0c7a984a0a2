use super::DocumentKind;
use crate::types::ScanSource;
use hygiene_core::logging::codes;
use hygiene_core::Code;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// Reasons a scanner document cannot become a `ScanRecord`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("Document is not a JSON object")]
    NotAnObject,

    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unsupported scanner source '{name}'")]
    UnknownSource { name: String },

    #[error("Document from {found} cannot be read as {requested}")]
    KindMismatch {
        requested: DocumentKind,
        found: ScanSource,
    },

    #[error("Invalid IPv4 address '{value}'")]
    InvalidAddress { value: String },

    #[error("Stored ip_int {stored} does not match ip {ip} ({expected})")]
    IpIntMismatch {
        ip: Ipv4Addr,
        stored: i64,
        expected: u32,
    },

    #[error("Document is {size} bytes, limit is {limit}")]
    DocumentTooLarge { size: usize, limit: usize },
}

impl NormalizeError {
    pub(crate) fn missing(field: &str) -> Self {
        NormalizeError::MissingField {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        NormalizeError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> Code {
        match self {
            NormalizeError::NotAnObject => codes::normalization::NOT_AN_OBJECT,
            NormalizeError::MissingField { .. } => codes::normalization::MISSING_FIELD,
            NormalizeError::InvalidField { .. } => codes::normalization::INVALID_FIELD,
            NormalizeError::UnknownSource { .. } => codes::normalization::UNKNOWN_SOURCE,
            NormalizeError::KindMismatch { .. } => codes::normalization::KIND_MISMATCH,
            NormalizeError::InvalidAddress { .. } => codes::normalization::INVALID_ADDRESS,
            NormalizeError::IpIntMismatch { .. } => codes::normalization::IP_INT_MISMATCH,
            NormalizeError::DocumentTooLarge { .. } => codes::normalization::DOCUMENT_TOO_LARGE,
        }
    }

    /// Field the error is about, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            NormalizeError::MissingField { field } | NormalizeError::InvalidField { field, .. } => {
                Some(field.as_str())
            }
            NormalizeError::UnknownSource { .. } | NormalizeError::KindMismatch { .. } => {
                Some("source")
            }
            NormalizeError::InvalidAddress { .. } => Some("ip"),
            NormalizeError::IpIntMismatch { .. } => Some("ip_int"),
            NormalizeError::NotAnObject | NormalizeError::DocumentTooLarge { .. } => None,
        }
    }
}

/// Non-fatal adjustment made while normalizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum NormalizeWarning {
    FieldTruncated {
        field: String,
        original_len: usize,
        limit: usize,
    },
    IpIntCorrected {
        stored: i64,
        computed: u32,
    },
    ExtraFieldsDropped {
        dropped: usize,
        limit: usize,
    },
    /// No `time` and no configured observation time
    ObservationTimeDefaulted {
        field: String,
    },
    /// Several source keys cleaned to the same name; the first one was kept
    ExtraKeyCollision {
        key: String,
    },
}

impl NormalizeWarning {
    pub fn code(&self) -> Code {
        match self {
            NormalizeWarning::FieldTruncated { .. } => codes::normalization::FIELD_TRUNCATED,
            NormalizeWarning::IpIntCorrected { .. } => codes::normalization::IP_INT_CORRECTED,
            NormalizeWarning::ExtraFieldsDropped { .. } => {
                codes::normalization::EXTRA_FIELDS_DROPPED
            }
            NormalizeWarning::ObservationTimeDefaulted { .. } => {
                codes::normalization::OBSERVATION_TIME_DEFAULTED
            }
            NormalizeWarning::ExtraKeyCollision { .. } => codes::normalization::EXTRA_KEY_COLLISION,
        }
    }
}

impl fmt::Display for NormalizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeWarning::FieldTruncated {
                field,
                original_len,
                limit,
            } => write!(
                f,
                "Field '{}' truncated from {} to {}",
                field, original_len, limit
            ),
            NormalizeWarning::IpIntCorrected { stored, computed } => {
                write!(f, "ip_int {} replaced by {}", stored, computed)
            }
            NormalizeWarning::ExtraFieldsDropped { dropped, limit } => write!(
                f,
                "{} unmapped fields dropped (limit {})",
                dropped, limit
            ),
            NormalizeWarning::ObservationTimeDefaulted { field } => {
                write!(f, "No '{}' in document; ingest time used", field)
            }
            NormalizeWarning::ExtraKeyCollision { key } => {
                write!(f, "Several fields map to '{}'; only the first was kept", key)
            }
        }
    }
}
