//! Error taxonomy of the harvest pipeline.
//!
//! Record- and page-level failures are recovered locally and counted; only
//! [`HarvestError::is_fatal`] errors abort a job.

use thiserror::Error;

use armp_common::SourceSystem;
use armp_db::DbError;

/// Failures raised by a source adapter.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Timeout, connection failure, HTTP 5xx or 429. Retryable.
    #[error("{system} request failed transiently: {message}")]
    Transient { system: SourceSystem, message: String },

    /// The source refused the request outright (4xx other than 429).
    #[error("{system} rejected request with HTTP {status}: {message}")]
    Rejected { system: SourceSystem, status: u16, message: String },

    /// A single record could not be normalised. Skipped and counted.
    #[error("malformed {system} record {record_id}: {reason}")]
    Malformed { system: SourceSystem, record_id: String, reason: String },

    #[error("{system} client configuration error: {message}")]
    Config { system: SourceSystem, message: String },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }

    pub fn malformed(system: SourceSystem, record_id: &str, reason: impl Into<String>) -> Self {
        SourceError::Malformed {
            system,
            record_id: record_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("catalog error: {0}")]
    Store(#[from] DbError),

    /// Every re-resolve lost the race against another writer.
    #[error("write conflict on {key} persisted after {attempts} attempts")]
    ConflictRetriesExhausted { key: String, attempts: u32 },

    /// A draft or mention that cannot become a canonical record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unknown organization: {0}")]
    UnknownOrganization(String),

    #[error("no adapter registered for source {0}")]
    UnsupportedSource(SourceSystem),

    #[error("job fatal: {0}")]
    JobFatal(String),
}

impl HarvestError {
    /// Whether the error must abort the whole job.
    pub fn is_fatal(&self) -> bool {
        match self {
            HarvestError::Store(e) => e.is_unavailable(),
            HarvestError::JobFatal(_) => true,
            _ => false,
        }
    }
}
