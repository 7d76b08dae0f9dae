//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use summary_stream_core::{Aggregator, Document, SummaryError, SummaryPipeline, SummaryResult};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SummaryPipeline,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pipeline: SummaryPipeline, config: Arc<Config>) -> Self {
        Self { pipeline, config }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        self.pipeline.aggregator()
    }

    /// The live snapshot of a summary. A summary that is only known to the
    /// persistence layer (e.g. after a restart) is restored and its unfinished
    /// sections are driven again.
    pub async fn document(&self, document_id: Uuid) -> SummaryResult<Document> {
        match self.aggregator().get_document(document_id) {
            Err(SummaryError::NotFound(_)) => {
                let handle = self.pipeline.resume(document_id).await?;
                info!(%document_id, "Summary restored on first access.");
                // Workers run detached; their outcomes surface as events.
                drop(handle);
                self.aggregator().get_document(document_id)
            }
            other => other,
        }
    }
}
