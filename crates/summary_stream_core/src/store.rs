//! crates/summary_stream_core/src/store.rs
//!
//! In-memory ownership of every section of every live document.
//!
//! Each `(document id, index)` pair has its own mutex, so writes to the same
//! section are serialized while different sections of one document proceed in
//! parallel. The outer map lock is only held long enough to look up or replace
//! a document's slot table.
//!
//! Deleted documents leave a tombstone so that work still in flight for them is
//! dropped instead of failing. Tombstones only exist for documents that were
//! actually deleted and expire after the configured retention.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::domain::Section;
use crate::error::{SummaryError, SummaryResult};

/// What happened to an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written,
    /// The document was deleted; late writes are dropped silently.
    Discarded,
}

struct SectionSlots {
    slots: Vec<Mutex<Section>>,
    deleted: AtomicBool,
}

/// How long a tombstone outlives its document by default.
pub const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::from_secs(600);

pub struct SectionStore {
    documents: RwLock<HashMap<Uuid, Arc<SectionSlots>>>,
    deleted: RwLock<HashMap<Uuid, Instant>>,
    tombstone_retention: Duration,
}

impl Default for SectionStore {
    fn default() -> Self {
        Self::with_tombstone_retention(DEFAULT_TOMBSTONE_RETENTION)
    }
}

impl SectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tombstone_retention(tombstone_retention: Duration) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            deleted: RwLock::new(HashMap::new()),
            tombstone_retention,
        }
    }

    /// Registers a document with its full, index-ordered list of sections.
    pub fn create_document(&self, document_id: Uuid, sections: Vec<Section>) -> SummaryResult<()> {
        if let Some(position) = sections.iter().enumerate().position(|(i, s)| s.index != i) {
            return Err(SummaryError::InvariantViolation(format!(
                "section at position {} carries index {}",
                position, sections[position].index
            )));
        }
        if self.is_deleted(document_id) {
            return Err(SummaryError::InvariantViolation(format!(
                "document {} was deleted and cannot be recreated",
                document_id
            )));
        }

        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if documents.contains_key(&document_id) {
            return Err(SummaryError::InvariantViolation(format!(
                "document {} already exists",
                document_id
            )));
        }
        let slots = SectionSlots {
            slots: sections.into_iter().map(Mutex::new).collect(),
            deleted: AtomicBool::new(false),
        };
        documents.insert(document_id, Arc::new(slots));
        Ok(())
    }

    /// Writes one section. The last writer for a given `(document_id, index)` wins.
    pub fn upsert_section(
        &self,
        document_id: Uuid,
        index: usize,
        section: Section,
    ) -> SummaryResult<UpsertOutcome> {
        if section.index != index {
            return Err(SummaryError::InvariantViolation(format!(
                "section carries index {} but was written to index {}",
                section.index, index
            )));
        }
        let Some(slots) = self.slots(document_id) else {
            if self.is_deleted(document_id) {
                debug!(%document_id, index, "Discarding section write for deleted document.");
                return Ok(UpsertOutcome::Discarded);
            }
            return Err(SummaryError::NotFound(document_id));
        };
        let slot = slots.slots.get(index).ok_or_else(|| {
            SummaryError::InvariantViolation(format!(
                "index {} out of range for document {} with {} sections",
                index,
                document_id,
                slots.slots.len()
            ))
        })?;

        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.deleted.load(Ordering::Acquire) {
            debug!(%document_id, index, "Discarding section write for deleted document.");
            return Ok(UpsertOutcome::Discarded);
        }
        *current = section;
        Ok(UpsertOutcome::Written)
    }

    /// All sections of a document, sorted by index.
    pub fn get_sections(&self, document_id: Uuid) -> SummaryResult<Vec<Section>> {
        let slots = self
            .slots(document_id)
            .ok_or(SummaryError::NotFound(document_id))?;
        Ok(slots
            .slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect())
    }

    /// One section, or `None` when the index is out of range.
    pub fn get_section(&self, document_id: Uuid, index: usize) -> SummaryResult<Option<Section>> {
        let slots = self
            .slots(document_id)
            .ok_or(SummaryError::NotFound(document_id))?;
        Ok(slots
            .slots
            .get(index)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone()))
    }

    pub fn section_count(&self, document_id: Uuid) -> Option<usize> {
        self.slots(document_id).map(|slots| slots.slots.len())
    }

    /// Drops every section of the document. A document that existed leaves a
    /// tombstone so that later writes become no-ops; unknown ids leave nothing.
    /// Returns whether the document existed.
    pub fn delete_document(&self, document_id: Uuid) -> bool {
        let removed = self
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document_id);
        match removed {
            Some(slots) => {
                self.mark_deleted(document_id);
                slots.deleted.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Leaves a tombstone for a document whose durable copy was deleted while
    /// it was not held in memory.
    pub fn mark_deleted(&self, document_id: Uuid) {
        let now = Instant::now();
        let retention = self.tombstone_retention;
        let mut deleted = self.deleted.write().unwrap_or_else(PoisonError::into_inner);
        deleted.retain(|_, at| now.duration_since(*at) < retention);
        deleted.insert(document_id, now);
    }

    /// Drops a document's sections without a tombstone. Used when a finished
    /// document leaves memory but stays in persistence.
    pub fn forget_document(&self, document_id: Uuid) -> bool {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document_id)
            .is_some()
    }

    pub fn is_deleted(&self, document_id: Uuid) -> bool {
        self.deleted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .is_some_and(|at| at.elapsed() < self.tombstone_retention)
    }

    /// Number of unexpired tombstones.
    pub fn tombstone_count(&self) -> usize {
        self.deleted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|at| at.elapsed() < self.tombstone_retention)
            .count()
    }

    fn slots(&self, document_id: Uuid) -> Option<Arc<SectionSlots>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProcessingStatus, SectionResult};

    fn store_with(sections: usize) -> (SectionStore, Uuid) {
        let store = SectionStore::new();
        let id = Uuid::new_v4();
        let pending = (0..sections)
            .map(|i| Section::pending(i, format!("source {i}")))
            .collect();
        store.create_document(id, pending).expect("create");
        (store, id)
    }

    #[test]
    fn sections_come_back_in_index_order() {
        let (store, id) = store_with(3);
        for index in [2, 0, 1] {
            let done = Section::pending(index, "src").completed(SectionResult::new(format!("s{index}")));
            assert_eq!(
                store.upsert_section(id, index, done).expect("upsert"),
                UpsertOutcome::Written
            );
        }
        let indices: Vec<usize> = store.get_sections(id).expect("sections").iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn last_writer_wins() {
        let (store, id) = store_with(1);
        store
            .upsert_section(id, 0, Section::pending(0, "a").failed("first"))
            .expect("first write");
        store
            .upsert_section(id, 0, Section::pending(0, "a").failed("second"))
            .expect("second write");
        let section = store.get_section(id, 0).expect("lookup").expect("present");
        assert_eq!(section.error.as_deref(), Some("second"));
        assert_eq!(section.status, ProcessingStatus::Failed);
    }

    #[test]
    fn rejects_out_of_range_and_mismatched_indices() {
        let (store, id) = store_with(2);
        assert!(matches!(
            store.upsert_section(id, 2, Section::pending(2, "x")),
            Err(SummaryError::InvariantViolation(_))
        ));
        assert!(matches!(
            store.upsert_section(id, 0, Section::pending(1, "x")),
            Err(SummaryError::InvariantViolation(_))
        ));
        assert_eq!(store.get_section(id, 5).expect("lookup"), None);
    }

    #[test]
    fn unknown_document_is_not_found() {
        let store = SectionStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.get_sections(id), Err(SummaryError::NotFound(found)) if found == id));
        assert!(matches!(
            store.upsert_section(id, 0, Section::pending(0, "x")),
            Err(SummaryError::NotFound(_))
        ));
    }

    #[test]
    fn writes_after_delete_are_discarded() {
        let (store, id) = store_with(2);
        assert!(store.delete_document(id));
        assert!(store.is_deleted(id));
        assert_eq!(
            store.upsert_section(id, 0, Section::pending(0, "late")).expect("upsert"),
            UpsertOutcome::Discarded
        );
        assert!(matches!(store.get_sections(id), Err(SummaryError::NotFound(_))));
        assert!(store.create_document(id, vec![Section::pending(0, "again")]).is_err());
    }

    #[test]
    fn deleting_an_unknown_document_leaves_no_tombstone() {
        let store = SectionStore::new();
        for _ in 0..1000 {
            let id = Uuid::new_v4();
            assert!(!store.delete_document(id));
            assert!(!store.is_deleted(id));
        }
        assert_eq!(store.tombstone_count(), 0);
    }

    #[test]
    fn tombstones_expire_after_the_retention() {
        let store = SectionStore::with_tombstone_retention(Duration::from_millis(20));
        let id = Uuid::new_v4();
        store
            .create_document(id, vec![Section::pending(0, "a")])
            .expect("create");
        assert!(store.delete_document(id));
        assert!(store.is_deleted(id));

        std::thread::sleep(Duration::from_millis(40));
        assert!(!store.is_deleted(id));
        // Expired entries are pruned on the next insert.
        store.mark_deleted(Uuid::new_v4());
        assert_eq!(store.deleted.read().unwrap().len(), 1);
    }

    #[test]
    fn forgetting_keeps_no_tombstone() {
        let (store, id) = store_with(1);
        assert!(store.forget_document(id));
        assert!(!store.is_deleted(id));
        assert!(matches!(store.get_sections(id), Err(SummaryError::NotFound(_))));
        store
            .create_document(id, vec![Section::pending(0, "restored")])
            .expect("recreate after forget");
    }

    #[test]
    fn create_rejects_gaps_in_indices() {
        let store = SectionStore::new();
        let sections = vec![Section::pending(0, "a"), Section::pending(2, "b")];
        assert!(matches!(
            store.create_document(Uuid::new_v4(), sections),
            Err(SummaryError::InvariantViolation(_))
        ));
    }

    #[test]
    fn different_indices_write_in_parallel() {
        let (store, id) = store_with(8);
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|index| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let section = Section::pending(index, "src").failed(format!("round {round}"));
                        store.upsert_section(id, index, section).expect("upsert");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        for section in store.get_sections(id).expect("sections") {
            assert_eq!(section.error.as_deref(), Some("round 49"));
        }
    }
}
