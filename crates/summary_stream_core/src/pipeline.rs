//! crates/summary_stream_core/src/pipeline.rs
//!
//! Drives a document through the summarization backend, one worker task per
//! section. Workers finish in whatever order the backend answers; the
//! aggregator takes care of ordering the merged result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::chunking::split_into_sections;
use crate::domain::{Document, Persona, Section, StreamingEvent};
use crate::error::{SummaryError, SummaryResult};
use crate::ports::SummarizationService;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound on words per section handed to the backend.
    pub section_max_words: usize,
    /// Backend calls allowed in flight at once, across all documents.
    pub max_concurrent_sections: usize,
    /// Attempts made to persist a transition before giving up.
    pub persist_max_attempts: u32,
    pub persist_retry_delay: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            section_max_words: 800,
            max_concurrent_sections: 4,
            persist_max_attempts: 3,
            persist_retry_delay: Duration::from_millis(250),
        }
    }
}

/// How one section worker ended.
#[derive(Debug)]
pub enum SectionOutcome {
    Completed { index: usize },
    /// The backend failed; the section is recorded as `Failed`.
    Failed { index: usize, error: SummaryError },
    /// The document was deleted before the result could be applied.
    Discarded { index: usize },
    /// The worker could not record its result at all.
    Aborted { index: usize, error: SummaryError },
}

impl SectionOutcome {
    pub fn index(&self) -> usize {
        match self {
            SectionOutcome::Completed { index }
            | SectionOutcome::Failed { index, .. }
            | SectionOutcome::Discarded { index }
            | SectionOutcome::Aborted { index, .. } => *index,
        }
    }
}

/// Join handles for the workers of one document.
pub struct PipelineHandle {
    document_id: Uuid,
    workers: Vec<(usize, JoinHandle<SectionOutcome>)>,
}

impl PipelineHandle {
    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    /// Waits for every worker and returns their outcomes in index order.
    pub async fn wait(self) -> Vec<SectionOutcome> {
        let mut outcomes = Vec::with_capacity(self.workers.len());
        for (index, worker) in self.workers {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => SectionOutcome::Aborted {
                    index,
                    error: SummaryError::InvariantViolation(format!("section worker failed: {}", e)),
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[derive(Clone)]
pub struct SummaryPipeline {
    aggregator: Arc<Aggregator>,
    backend: Arc<dyn SummarizationService>,
    permits: Arc<Semaphore>,
    options: PipelineOptions,
}

impl SummaryPipeline {
    pub fn new(
        aggregator: Arc<Aggregator>,
        backend: Arc<dyn SummarizationService>,
        options: PipelineOptions,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_concurrent_sections.max(1)));
        Self {
            aggregator,
            backend,
            permits,
            options,
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Splits the text, creates the placeholder document and spawns the
    /// section workers. Returns as soon as the placeholder exists.
    pub async fn start(
        &self,
        original_text: String,
        persona: Persona,
    ) -> SummaryResult<(Document, PipelineHandle)> {
        let sections = split_into_sections(&original_text, self.options.section_max_words);
        if sections.is_empty() {
            return Err(SummaryError::InvariantViolation(
                "cannot summarize an empty document".to_string(),
            ));
        }
        let document = self
            .aggregator
            .create_partial_summary(original_text, persona, sections)
            .await?;
        let pending = self.aggregator.get_sections(document.id)?;
        let handle = self.spawn_workers(document.id, persona, pending);
        info!(document_id = %document.id, sections = document.total_sections, "Summary pipeline started.");
        Ok((document, handle))
    }

    /// Spawns workers for every section of a restored document that has not
    /// reached a terminal state. A document that is already live is being
    /// driven by its own workers and gets none.
    pub async fn resume(&self, document_id: Uuid) -> SummaryResult<PipelineHandle> {
        if self.aggregator.get_document(document_id).is_ok() {
            debug!(%document_id, "Summary already live, nothing to resume.");
            return Ok(PipelineHandle {
                document_id,
                workers: Vec::new(),
            });
        }
        let document = self.aggregator.restore(document_id).await?;
        let pending: Vec<Section> = self
            .aggregator
            .get_sections(document_id)?
            .into_iter()
            .filter(|section| !section.is_terminal())
            .collect();
        info!(%document_id, sections = pending.len(), "Resuming summary pipeline.");
        Ok(self.spawn_workers(document_id, document.persona, pending))
    }

    /// Resumes every persisted document that had not finished when the process
    /// stopped. Finished documents are left in storage until requested. A
    /// document that fails to resume is logged and skipped.
    pub async fn resume_unfinished(&self) -> SummaryResult<Vec<PipelineHandle>> {
        let mut handles = Vec::new();
        for document_id in self.aggregator.unfinished_document_ids().await? {
            match self.resume(document_id).await {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(%document_id, error = %e, "Failed to resume summary."),
            }
        }
        Ok(handles)
    }

    fn spawn_workers(&self, document_id: Uuid, persona: Persona, sections: Vec<Section>) -> PipelineHandle {
        let workers = sections
            .into_iter()
            .map(|section| {
                let index = section.index;
                let worker = self.clone();
                let task = tokio::spawn(async move {
                    worker
                        .run_section(document_id, persona, index, section.source_text)
                        .await
                });
                (index, task)
            })
            .collect();
        PipelineHandle {
            document_id,
            workers,
        }
    }

    async fn run_section(
        &self,
        document_id: Uuid,
        persona: Persona,
        index: usize,
        source_text: String,
    ) -> SectionOutcome {
        let permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return SectionOutcome::Aborted {
                    index,
                    error: SummaryError::InvariantViolation(format!("backend permits closed: {}", e)),
                }
            }
        };
        let started = self.aggregator.mark_section_started(document_id, index).await;
        match self.settle(document_id, started).await {
            Ok(true) => {}
            Ok(false) => return SectionOutcome::Discarded { index },
            Err(error) => return SectionOutcome::Aborted { index, error },
        }
        let result = self.backend.summarize_section(&source_text, persona).await;
        drop(permit);

        match result {
            Ok(summary) => {
                let applied = self
                    .aggregator
                    .mark_section_complete(document_id, index, summary)
                    .await;
                match self.settle(document_id, applied).await {
                    Ok(true) => SectionOutcome::Completed { index },
                    Ok(false) => SectionOutcome::Discarded { index },
                    Err(error) => SectionOutcome::Aborted { index, error },
                }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(%document_id, index, %reason, "Section failed in the summarization backend.");
                let applied = self
                    .aggregator
                    .mark_section_failed(document_id, index, reason.clone())
                    .await;
                match self.settle(document_id, applied).await {
                    Ok(true) => SectionOutcome::Failed {
                        index,
                        error: SummaryError::SectionBackendFailure { index, reason },
                    },
                    Ok(false) => SectionOutcome::Discarded { index },
                    Err(error) => SectionOutcome::Aborted { index, error },
                }
            }
        }
    }

    /// Retries the durable write of an already-applied transition. The event
    /// has been published at this point, so only `flush` is repeated.
    /// Returns whether the transition took effect.
    async fn settle(
        &self,
        document_id: Uuid,
        applied: SummaryResult<Option<StreamingEvent>>,
    ) -> SummaryResult<bool> {
        let mut last_error = match applied {
            Ok(event) => return Ok(event.is_some()),
            Err(SummaryError::Persistence(e)) => SummaryError::Persistence(e),
            Err(e) => return Err(e),
        };
        for attempt in 1..self.options.persist_max_attempts.max(1) {
            warn!(%document_id, attempt, error = %last_error, "Retrying persistence.");
            tokio::time::sleep(self.options.persist_retry_delay).await;
            match self.aggregator.flush(document_id).await {
                Ok(()) => return Ok(true),
                Err(SummaryError::NotFound(_)) => return Ok(false),
                Err(e) => last_error = e,
            }
        }
        error!(%document_id, error = %last_error, "Giving up on persisting section transition.");
        Err(last_error)
    }
}
