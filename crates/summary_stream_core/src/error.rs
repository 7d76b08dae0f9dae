//! crates/summary_stream_core/src/error.rs
//!
//! The error type shared by the store, aggregator and pipeline.

use uuid::Uuid;

use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    /// Sections or events were requested for a document id the core does not know.
    #[error("Document {0} not found")]
    NotFound(Uuid),

    /// A durable write failed. In-memory state is kept; the caller retries via `flush`.
    #[error("Persistence failure: {0}")]
    Persistence(#[source] PortError),

    /// Out-of-range index, duplicate terminal transition and similar programming errors.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The backend could not summarize one section. Recorded on the section; the
    /// document carries on with the remaining ones.
    #[error("Section {index} failed in the summarization backend: {reason}")]
    SectionBackendFailure { index: usize, reason: String },
}

pub type SummaryResult<T> = Result<T, SummaryError>;
