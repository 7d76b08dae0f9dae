//! crates/summary_stream_core/src/aggregator.rs
//!
//! The aggregator owns the authoritative document state. It is the only
//! component allowed to change a document's status, and it does so by scanning
//! the document's sections after every section transition.
//!
//! Locking: every document has its own state mutex. Transitions take it, apply
//! the change to the section store, recompute the document, publish exactly one
//! event and release it, all without touching I/O. Persistence happens after
//! the lock is released, serialized per document by a separate async gate so
//! that the durable copy always ends on the newest snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Document, Persona, ProcessingStatus, Section, SectionResult, StreamingEvent, SummaryMetrics};
use crate::error::{SummaryError, SummaryResult};
use crate::events::{EventPublisher, EventSubscription, ProgressStream};
use crate::metrics;
use crate::ports::{PersistenceService, PortError};
use crate::store::{SectionStore, UpsertOutcome, DEFAULT_TOMBSTONE_RETENTION};

/// Default number of merged words used for the brief overview.
pub const DEFAULT_OVERVIEW_WORDS: usize = 50;

/// Characters allowed per overview word, bounding overviews of text that has
/// little or no whitespace.
const OVERVIEW_CHARS_PER_WORD: usize = 12;

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Word budget of `Document::brief_overview`.
    pub brief_overview_words: usize,
    /// When set, invariant violations are returned as errors. Otherwise they are
    /// logged and the offending write is discarded.
    pub strict_invariants: bool,
    /// How long writes for a deleted document keep being recognized as late
    /// and dropped quietly.
    pub tombstone_retention: Duration,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            brief_overview_words: DEFAULT_OVERVIEW_WORDS,
            strict_invariants: cfg!(debug_assertions),
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
        }
    }
}

struct DocumentState {
    document: Document,
    deleted: bool,
    /// Left memory but still persisted; `restore` brings it back.
    evicted: bool,
}

impl DocumentState {
    fn is_gone(&self) -> bool {
        self.deleted || self.evicted
    }
}

struct DocumentHandle {
    state: Mutex<DocumentState>,
    persist_gate: tokio::sync::Mutex<()>,
}

impl DocumentHandle {
    fn new(document: Document) -> Self {
        Self {
            state: Mutex::new(DocumentState {
                document,
                deleted: false,
                evicted: false,
            }),
            persist_gate: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Aggregator {
    options: AggregatorOptions,
    store: SectionStore,
    publisher: EventPublisher,
    persistence: Arc<dyn PersistenceService>,
    documents: RwLock<HashMap<Uuid, Arc<DocumentHandle>>>,
}

impl Aggregator {
    pub fn new(persistence: Arc<dyn PersistenceService>, options: AggregatorOptions) -> Self {
        Self {
            store: SectionStore::with_tombstone_retention(options.tombstone_retention),
            options,
            publisher: EventPublisher::new(),
            persistence,
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &AggregatorOptions {
        &self.options
    }

    //=====================================================================================
    // Lifecycle
    //=====================================================================================

    /// Creates a placeholder document with one pending section per entry of
    /// `section_texts` and emits its creation event (sequence 0).
    ///
    /// If the placeholder cannot be persisted it is rolled back and the error is
    /// returned, so the caller can simply retry the whole call.
    pub async fn create_partial_summary(
        &self,
        original_text: String,
        persona: Persona,
        section_texts: Vec<String>,
    ) -> SummaryResult<Document> {
        if section_texts.is_empty() {
            return Err(SummaryError::InvariantViolation(
                "a document needs at least one section".to_string(),
            ));
        }
        let document = Document::placeholder(original_text, persona, section_texts.len());
        let sections: Vec<Section> = section_texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Section::pending(index, text))
            .collect();

        self.store.create_document(document.id, sections)?;
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.id, Arc::new(DocumentHandle::new(document.clone())));
        self.publisher.open(&document);
        info!(
            document_id = %document.id,
            sections = document.total_sections,
            persona = %persona,
            "Created placeholder summary."
        );

        let all_indices: Vec<usize> = (0..document.total_sections).collect();
        if let Err(e) = self.persist(document.id, &all_indices).await {
            warn!(document_id = %document.id, error = %e, "Rolling back unpersisted placeholder.");
            self.documents
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&document.id);
            self.store.delete_document(document.id);
            self.publisher.close(document.id);
            if let Err(cleanup) = self.persistence.delete_document(document.id).await {
                debug!(document_id = %document.id, error = %cleanup, "No partial rows to clean up.");
            }
            return Err(e);
        }
        Ok(document)
    }

    /// Deletes the document and all of its sections, durable copy included, and
    /// ends every outstanding subscription. Section work still in flight for the
    /// id is discarded when it arrives.
    pub async fn delete_summary(&self, document_id: Uuid) -> SummaryResult<()> {
        let handle = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document_id);
        if let Some(handle) = &handle {
            handle.lock().deleted = true;
            self.store.delete_document(document_id);
            self.publisher.close(document_id);
        }

        let _gate = match &handle {
            Some(handle) => Some(handle.persist_gate.lock().await),
            None => None,
        };
        match self.persistence.delete_document(document_id).await {
            Ok(()) if handle.is_none() => self.drop_restored(document_id),
            Ok(()) => {}
            Err(PortError::NotFound(_)) if handle.is_some() => {}
            Err(PortError::NotFound(_)) => return Err(SummaryError::NotFound(document_id)),
            Err(e) => return Err(SummaryError::Persistence(e)),
        }
        info!(%document_id, "Deleted summary.");
        Ok(())
    }

    /// Tombstones a document deleted from persistence while it was not in
    /// memory, and drops a copy a concurrent `restore` may have loaded.
    fn drop_restored(&self, document_id: Uuid) {
        self.store.mark_deleted(document_id);
        let restored = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document_id);
        if let Some(restored) = restored {
            restored.lock().deleted = true;
            self.store.delete_document(document_id);
            self.publisher.close(document_id);
        }
    }

    //=====================================================================================
    // Section Transitions
    //=====================================================================================

    /// Records that a worker has started on a pending section.
    pub async fn mark_section_started(
        &self,
        document_id: Uuid,
        index: usize,
    ) -> SummaryResult<Option<StreamingEvent>> {
        self.apply_transition(document_id, index, |current| match current.status {
            ProcessingStatus::Pending => Ok(current.started()),
            other => Err(format!(
                "section {} of document {} cannot start from {}",
                index, document_id, other
            )),
        })
        .await
    }

    /// Stores a section's summary as `Completed` and recomputes the document.
    /// When this is the last outstanding section the final merge runs as part of it.
    pub async fn mark_section_complete(
        &self,
        document_id: Uuid,
        index: usize,
        result: SectionResult,
    ) -> SummaryResult<Option<StreamingEvent>> {
        self.apply_transition(document_id, index, move |current| {
            if current.is_terminal() {
                return Err(format!(
                    "section {} of document {} is already {}",
                    index, document_id, current.status
                ));
            }
            Ok(current.completed(result))
        })
        .await
    }

    /// Stores a section as `Failed`. The aggregator never retries; that is the
    /// caller's decision before it reports the failure.
    pub async fn mark_section_failed(
        &self,
        document_id: Uuid,
        index: usize,
        error: impl Into<String>,
    ) -> SummaryResult<Option<StreamingEvent>> {
        let error = error.into();
        self.apply_transition(document_id, index, move |current| {
            if current.is_terminal() {
                return Err(format!(
                    "section {} of document {} is already {}",
                    index, document_id, current.status
                ));
            }
            Ok(current.failed(error))
        })
        .await
    }

    /// Rebuilds the merged summary from the completed sections, in index order,
    /// and returns the resulting snapshot. The aggregator runs this itself after
    /// every completion; calling it again is idempotent.
    pub async fn final_merge(&self, document_id: Uuid) -> SummaryResult<Document> {
        let handle = self.handle(document_id)?;
        let document = {
            let mut state = handle.lock();
            if state.is_gone() {
                return Err(SummaryError::NotFound(document_id));
            }
            let sections = self.store.get_sections(document_id)?;
            apply_merge(&mut state.document, &sections, self.options.brief_overview_words);
            self.publisher.refresh_snapshot(&state.document);
            state.document.clone()
        };
        self.persist(document_id, &[]).await?;
        Ok(document)
    }

    async fn apply_transition<F>(
        &self,
        document_id: Uuid,
        index: usize,
        next: F,
    ) -> SummaryResult<Option<StreamingEvent>>
    where
        F: FnOnce(&Section) -> Result<Section, String>,
    {
        let handle = match self.handle(document_id) {
            Ok(handle) => handle,
            Err(_) if self.store.is_deleted(document_id) => {
                debug!(%document_id, index, "Discarding transition for deleted document.");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let event = {
            let mut state = handle.lock();
            if state.deleted {
                debug!(%document_id, index, "Discarding transition for deleted document.");
                return Ok(None);
            }
            if state.evicted {
                return Err(SummaryError::NotFound(document_id));
            }
            let Some(current) = self.store.get_section(document_id, index)? else {
                return self.violation(format!(
                    "index {} out of range for document {} with {} sections",
                    index, document_id, state.document.total_sections
                ));
            };
            let updated = match next(&current) {
                Ok(section) => section,
                Err(reason) => return self.violation(reason),
            };
            let section_status = updated.status;
            if self.store.upsert_section(document_id, index, updated)? == UpsertOutcome::Discarded {
                return Ok(None);
            }

            let previous = state.document.status;
            let sections = self.store.get_sections(document_id)?;
            recompute_document(&mut state.document, &sections, self.options.brief_overview_words);
            if previous != ProcessingStatus::Completed
                && state.document.status == ProcessingStatus::Completed
            {
                info!(
                    %document_id,
                    failed_sections = state.document.failed_sections,
                    summary_words = state.document.metrics.summary_word_count,
                    reduction_percent = state.document.metrics.reduction_percent,
                    "Summary completed."
                );
            }
            self.publisher
                .publish(&state.document, Some(index), section_status)
        };

        self.persist(document_id, &[index]).await?;
        Ok(event)
    }

    fn violation(&self, reason: String) -> SummaryResult<Option<StreamingEvent>> {
        if self.options.strict_invariants {
            return Err(SummaryError::InvariantViolation(reason));
        }
        warn!(%reason, "Discarding write that violates a section invariant.");
        Ok(None)
    }

    //=====================================================================================
    // Other Mutations
    //=====================================================================================

    /// Sets the favorite flag. This is not a processing transition and emits no event.
    pub async fn set_favorite(&self, document_id: Uuid, favorite: bool) -> SummaryResult<Document> {
        let handle = self.handle(document_id)?;
        let document = {
            let mut state = handle.lock();
            if state.is_gone() {
                return Err(SummaryError::NotFound(document_id));
            }
            state.document.favorite = favorite;
            state.document.updated_at = Utc::now();
            self.publisher.refresh_snapshot(&state.document);
            state.document.clone()
        };
        self.persist(document_id, &[]).await?;
        Ok(document)
    }

    /// Re-saves the in-memory document and every section. This is how callers
    /// retry after a `Persistence` error.
    pub async fn flush(&self, document_id: Uuid) -> SummaryResult<()> {
        let total = self
            .store
            .section_count(document_id)
            .ok_or(SummaryError::NotFound(document_id))?;
        let all_indices: Vec<usize> = (0..total).collect();
        self.persist(document_id, &all_indices).await
    }

    /// Loads a document and its sections from persistence into memory, e.g.
    /// after a restart. Sections that were mid-flight come back as `Pending` so
    /// they can be driven again. Returns the in-memory snapshot if already loaded.
    pub async fn restore(&self, document_id: Uuid) -> SummaryResult<Document> {
        if let Ok(document) = self.get_document(document_id) {
            return Ok(document);
        }
        if self.store.is_deleted(document_id) {
            return Err(SummaryError::NotFound(document_id));
        }

        let document = self
            .persistence
            .load_document(document_id)
            .await
            .map_err(|e| not_found_or_persistence(document_id, e))?;
        let sections: Vec<Section> = self
            .persistence
            .load_sections(document_id)
            .await
            .map_err(|e| not_found_or_persistence(document_id, e))?
            .into_iter()
            .map(|section| {
                if section.is_terminal() {
                    section
                } else {
                    Section::pending(section.index, section.source_text)
                }
            })
            .collect();

        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        // Deleted while the loads were in flight.
        if self.store.is_deleted(document_id) {
            return Err(SummaryError::NotFound(document_id));
        }
        if let Some(existing) = documents.get(&document_id) {
            return Ok(existing.lock().document.clone());
        }
        if sections.len() != document.total_sections {
            return Err(SummaryError::InvariantViolation(format!(
                "document {} expects {} sections but {} were stored",
                document_id,
                document.total_sections,
                sections.len()
            )));
        }
        let mut document = document;
        recompute_document(&mut document, &sections, self.options.brief_overview_words);
        self.store.create_document(document_id, sections)?;
        documents.insert(document_id, Arc::new(DocumentHandle::new(document.clone())));
        self.publisher.open(&document);
        info!(%document_id, status = %document.status, "Restored summary from persistence.");
        Ok(document)
    }

    /// Drops finished documents that have been idle for `max_idle` and have no
    /// observers from memory. Their durable copy is brought up to date first;
    /// `restore` loads them again on demand. Returns the evicted ids.
    pub async fn evict_idle(&self, max_idle: chrono::Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - max_idle;
        let candidates: Vec<Uuid> = self
            .list_documents()
            .into_iter()
            .filter(|doc| doc.status.is_terminal() && doc.updated_at < cutoff)
            .map(|doc| doc.id)
            .collect();

        let mut evicted = Vec::new();
        for document_id in candidates {
            match self.evict(document_id).await {
                Ok(true) => evicted.push(document_id),
                Ok(false) => {}
                Err(e) => warn!(%document_id, error = %e, "Could not evict finished summary."),
            }
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle finished summaries from memory.");
        }
        evicted
    }

    async fn evict(&self, document_id: Uuid) -> SummaryResult<bool> {
        let handle = self.handle(document_id)?;
        let _gate = handle.persist_gate.lock().await;

        let (snapshot, sections) = {
            let state = handle.lock();
            if state.is_gone() || !state.document.status.is_terminal() {
                return Ok(false);
            }
            (state.document.clone(), self.store.get_sections(document_id)?)
        };
        self.persistence
            .save_document(&snapshot)
            .await
            .map_err(SummaryError::Persistence)?;
        for section in &sections {
            self.persistence
                .save_section(document_id, section)
                .await
                .map_err(SummaryError::Persistence)?;
        }

        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let mut state = handle.lock();
        // Changed or observed since the snapshot was written.
        if state.is_gone()
            || state.document.updated_at != snapshot.updated_at
            || self.publisher.has_observers(document_id)
        {
            return Ok(false);
        }
        state.evicted = true;
        documents.remove(&document_id);
        self.store.forget_document(document_id);
        self.publisher.close(document_id);
        debug!(%document_id, "Evicted finished summary from memory.");
        Ok(true)
    }

    //=====================================================================================
    // Read API
    //=====================================================================================

    /// The latest snapshot of a document. Always succeeds for a live document,
    /// even when some sections failed.
    pub fn get_document(&self, document_id: Uuid) -> SummaryResult<Document> {
        let handle = self.handle(document_id)?;
        let state = handle.lock();
        if state.is_gone() {
            return Err(SummaryError::NotFound(document_id));
        }
        Ok(state.document.clone())
    }

    /// Sections of a document ordered by index.
    pub fn get_sections(&self, document_id: Uuid) -> SummaryResult<Vec<Section>> {
        self.store.get_sections(document_id)
    }

    /// Snapshots of every live document, newest first.
    pub fn list_documents(&self) -> Vec<Document> {
        let handles: Vec<Arc<DocumentHandle>> = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut documents: Vec<Document> = handles
            .iter()
            .map(|handle| handle.lock().document.clone())
            .collect();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        documents
    }

    /// Every summary, in memory or only persisted, newest first. Persisted-only
    /// summaries are read without being restored.
    pub async fn list_summaries(&self) -> SummaryResult<Vec<Document>> {
        let mut documents = self.list_documents();
        let live: HashSet<Uuid> = documents.iter().map(|doc| doc.id).collect();
        let stored = self
            .persistence
            .list_document_ids()
            .await
            .map_err(SummaryError::Persistence)?;
        for document_id in stored {
            if live.contains(&document_id) || self.store.is_deleted(document_id) {
                continue;
            }
            match self.persistence.load_document(document_id).await {
                Ok(document) => documents.push(document),
                // Deleted since it was listed.
                Err(PortError::NotFound(_)) => {}
                Err(e) => return Err(SummaryError::Persistence(e)),
            }
        }
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(documents)
    }

    /// Ids of persisted documents that have not reached a terminal status,
    /// i.e. the ones a restart has to resume.
    pub async fn unfinished_document_ids(&self) -> SummaryResult<Vec<Uuid>> {
        let stored = self
            .persistence
            .list_document_ids()
            .await
            .map_err(SummaryError::Persistence)?;
        let mut unfinished = Vec::new();
        for document_id in stored {
            match self.persistence.load_document(document_id).await {
                Ok(document) if !document.status.is_terminal() => unfinished.push(document_id),
                Ok(_) | Err(PortError::NotFound(_)) => {}
                Err(e) => return Err(SummaryError::Persistence(e)),
            }
        }
        Ok(unfinished)
    }

    /// Ids of documents that are still unfinished after `max_age`. These are
    /// only reported; unfinished documents are never removed automatically.
    pub fn stale_documents(&self, max_age: chrono::Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - max_age;
        self.list_documents()
            .into_iter()
            .filter(|doc| doc.status != ProcessingStatus::Completed && doc.created_at < cutoff)
            .map(|doc| doc.id)
            .collect()
    }

    /// Live events for a document from this point forward.
    pub fn observe_events(&self, document_id: Uuid) -> SummaryResult<EventSubscription> {
        self.publisher
            .subscribe(document_id)
            .ok_or(SummaryError::NotFound(document_id))
    }

    /// Live document snapshots, starting with the current one.
    pub fn observe_progress(&self, document_id: Uuid) -> SummaryResult<ProgressStream> {
        self.publisher
            .watch_progress(document_id)
            .ok_or(SummaryError::NotFound(document_id))
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    fn handle(&self, document_id: Uuid) -> SummaryResult<Arc<DocumentHandle>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .cloned()
            .ok_or(SummaryError::NotFound(document_id))
    }

    /// Writes the newest snapshot of the document and of the given sections.
    async fn persist(&self, document_id: Uuid, indices: &[usize]) -> SummaryResult<()> {
        let Ok(handle) = self.handle(document_id) else {
            return Ok(());
        };
        let _gate = handle.persist_gate.lock().await;

        let document = {
            let state = handle.lock();
            if state.is_gone() {
                return Ok(());
            }
            state.document.clone()
        };
        let mut sections = Vec::with_capacity(indices.len());
        for &index in indices {
            match self.store.get_section(document_id, index) {
                Ok(Some(section)) => sections.push(section),
                Ok(None) => {}
                // Deleted while waiting for the gate.
                Err(SummaryError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        // Document first: section rows reference it.
        self.persistence
            .save_document(&document)
            .await
            .map_err(SummaryError::Persistence)?;
        for section in &sections {
            self.persistence
                .save_section(document_id, section)
                .await
                .map_err(SummaryError::Persistence)?;
        }
        Ok(())
    }
}

fn not_found_or_persistence(document_id: Uuid, error: PortError) -> SummaryError {
    match error {
        PortError::NotFound(_) => SummaryError::NotFound(document_id),
        other => SummaryError::Persistence(other),
    }
}

//=========================================================================================
// Status Derivation and Merging
//=========================================================================================

/// Derives the document status from its sections and refreshes merged content.
/// A `Completed` document never changes status again.
fn recompute_document(document: &mut Document, sections: &[Section], overview_words: usize) {
    let completed = sections
        .iter()
        .filter(|s| s.status == ProcessingStatus::Completed)
        .count();
    let failed = sections
        .iter()
        .filter(|s| s.status == ProcessingStatus::Failed)
        .count();
    let started = sections
        .iter()
        .filter(|s| s.status != ProcessingStatus::Pending)
        .count();

    let derived = if completed + failed == document.total_sections {
        // Failed sections count as terminal; any success yields best-effort output.
        if completed > 0 {
            ProcessingStatus::Completed
        } else {
            ProcessingStatus::Failed
        }
    } else if completed + failed > 0 {
        ProcessingStatus::Partial
    } else if started > 0 {
        ProcessingStatus::Processing
    } else {
        ProcessingStatus::Pending
    };

    if document.status != ProcessingStatus::Completed {
        document.status = derived;
    }
    document.failed_sections = failed;
    apply_merge(document, sections, overview_words);
}

/// Merges completed section output into the document, strictly in index order.
fn apply_merge(document: &mut Document, sections: &[Section], overview_words: usize) {
    let mut ordered: Vec<&Section> = sections
        .iter()
        .filter(|s| s.status == ProcessingStatus::Completed)
        .collect();
    ordered.sort_by_key(|s| s.index);

    let texts: Vec<&str> = ordered
        .iter()
        .filter_map(|s| s.summary_text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    let detailed = texts.join("\n\n");

    document.brief_summary = texts
        .iter()
        .map(|t| first_sentence(t))
        .collect::<Vec<_>>()
        .join(" ");
    document.brief_overview = lead_in(&detailed, overview_words);
    document.key_insights = union_case_insensitive(ordered.iter().map(|s| s.bullets.as_slice()));
    document.action_items = union_case_insensitive(ordered.iter().map(|s| s.action_items.as_slice()));
    document.keywords = union_case_insensitive(ordered.iter().map(|s| s.keywords.as_slice()));

    let confidences: Vec<Option<f32>> = ordered.iter().map(|s| s.confidence).collect();
    let original_words = metrics::word_count(&document.original_text);
    let summary_words = metrics::word_count(&detailed);
    document.metrics = if summary_words == 0 {
        SummaryMetrics::placeholder(original_words)
    } else {
        SummaryMetrics {
            original_word_count: original_words,
            summary_word_count: summary_words,
            original_reading_minutes: metrics::reading_time_minutes(original_words),
            summary_reading_minutes: metrics::reading_time_minutes(summary_words),
            reduction_percent: metrics::reduction_percent(original_words, summary_words),
            confidence: metrics::aggregate_confidence(&confidences),
        }
    };
    document.detailed_summary = detailed;
    document.updated_at = Utc::now();
}

/// The first `max_words` words of `text`, with an ellipsis when truncated.
/// Text with few word breaks is also cut after a proportional number of chars.
fn lead_in(text: &str, max_words: usize) -> String {
    let max_chars = max_words.saturating_mul(OVERVIEW_CHARS_PER_WORD);
    let mut words = text.split_whitespace();
    let lead: Vec<&str> = words.by_ref().take(max_words).collect();
    let joined = lead.join(" ");
    let mut truncated = words.next().is_some();

    let mut out = match joined.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            truncated = true;
            joined[..cut].to_string()
        }
        None => joined,
    };
    if truncated {
        out.push_str("...");
    }
    out
}

fn first_sentence(text: &str) -> &str {
    match text.find(['.', '?', '!']) {
        Some(end) => &text[..=end],
        None => text,
    }
}

/// Concatenates lists keeping the first spelling of each entry and dropping
/// later entries that differ only in case or surrounding whitespace.
fn union_case_insensitive<'a>(lists: impl Iterator<Item = &'a [String]>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in lists.flatten() {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(index: usize, text: &str, bullets: &[&str]) -> Section {
        Section::pending(index, "src").completed(
            SectionResult::new(text).with_bullets(bullets.iter().map(|b| b.to_string()).collect()),
        )
    }

    #[test]
    fn merge_uses_index_order_and_dedupes_bullets() {
        let mut doc = Document::placeholder("w ".repeat(100), Persona::Neutral, 3);
        let sections = vec![
            completed(2, "Third part.", &["Gamma", "alpha"]),
            completed(0, "First part. More.", &["Alpha", "Beta"]),
            Section::pending(1, "src").failed("quota"),
        ];
        apply_merge(&mut doc, &sections, 50);
        assert_eq!(doc.detailed_summary, "First part. More.\n\nThird part.");
        assert_eq!(doc.brief_summary, "First part. Third part.");
        assert_eq!(doc.key_insights, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(doc.metrics.summary_word_count, 5);
        assert_eq!(doc.metrics.reduction_percent, 95);
    }

    #[test]
    fn lead_in_is_bounded() {
        assert_eq!(lead_in("a b c", 5), "a b c");
        assert_eq!(lead_in("a b c d", 2), "a b...");
        assert_eq!(lead_in("", 2), "");
    }

    #[test]
    fn lead_in_caps_text_without_word_breaks() {
        let unbroken = "摘".repeat(10_000);
        let overview = lead_in(&unbroken, 50);
        assert!(overview.ends_with("..."));
        assert_eq!(overview.chars().count(), 50 * OVERVIEW_CHARS_PER_WORD + 3);

        let url = format!("https://example.com/{}", "a".repeat(5_000));
        assert_eq!(lead_in(&url, 2).chars().count(), 2 * OVERVIEW_CHARS_PER_WORD + 3);
        assert_eq!(lead_in("short words stay whole", 50), "short words stay whole");
    }

    #[test]
    fn status_derivation_covers_every_stage() {
        let mut doc = Document::placeholder("x".to_string(), Persona::Neutral, 2);
        let pending = vec![Section::pending(0, "a"), Section::pending(1, "b")];
        recompute_document(&mut doc, &pending, 50);
        assert_eq!(doc.status, ProcessingStatus::Pending);

        let started = vec![Section::pending(0, "a").started(), Section::pending(1, "b")];
        recompute_document(&mut doc, &started, 50);
        assert_eq!(doc.status, ProcessingStatus::Processing);

        let partial = vec![completed(0, "done", &[]), Section::pending(1, "b")];
        recompute_document(&mut doc, &partial, 50);
        assert_eq!(doc.status, ProcessingStatus::Partial);

        let all_failed = vec![
            Section::pending(0, "a").failed("x"),
            Section::pending(1, "b").failed("y"),
        ];
        let mut failed_doc = Document::placeholder("x".to_string(), Persona::Neutral, 2);
        recompute_document(&mut failed_doc, &all_failed, 50);
        assert_eq!(failed_doc.status, ProcessingStatus::Failed);

        let done = vec![completed(0, "done", &[]), Section::pending(1, "b").failed("y")];
        recompute_document(&mut doc, &done, 50);
        assert_eq!(doc.status, ProcessingStatus::Completed);
        assert!(doc.has_partial_content());

        recompute_document(&mut doc, &pending, 50);
        assert_eq!(doc.status, ProcessingStatus::Completed);
    }
}
