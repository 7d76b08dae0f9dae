//! crates/summary_stream_core/src/ports.rs
//!
//! Defines the service contracts (traits) the core depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the generative-text backend and of the storage engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Document, Persona, Section, SectionResult};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Quota, timeout or malformed response from the summarization backend,
    /// reported after the backend's own retries are exhausted.
    #[error("Summarization backend failed: {reason}")]
    Backend { reason: String },
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait SummarizationService: Send + Sync {
    /// Summarizes one section of a document in the requested persona.
    /// Retry and backoff are the implementation's concern.
    async fn summarize_section(&self, text: &str, persona: Persona) -> PortResult<SectionResult>;
}

/// Durable storage for documents and their sections.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Inserts or replaces a document record.
    async fn save_document(&self, document: &Document) -> PortResult<()>;

    /// Inserts or replaces the section stored under `(document_id, section.index)`.
    async fn save_section(&self, document_id: Uuid, section: &Section) -> PortResult<()>;

    async fn load_document(&self, document_id: Uuid) -> PortResult<Document>;

    /// Returns the stored sections ordered by index.
    async fn load_sections(&self, document_id: Uuid) -> PortResult<Vec<Section>>;

    /// Deletes a document together with every section it owns.
    async fn delete_document(&self, document_id: Uuid) -> PortResult<()>;

    /// Ids of every stored document, used to resume work after a restart.
    async fn list_document_ids(&self) -> PortResult<Vec<Uuid>> {
        Ok(Vec::new())
    }
}
