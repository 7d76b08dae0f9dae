//! crates/summary_stream_core/src/memory.rs
//!
//! A process-local implementation of `PersistenceService`. Used when no
//! database is configured and as the persistence collaborator in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Document, Section};
use crate::ports::{PersistenceService, PortError, PortResult};

#[derive(Default)]
pub struct InMemoryPersistence {
    documents: RwLock<HashMap<Uuid, Document>>,
    sections: RwLock<HashMap<Uuid, BTreeMap<usize, Section>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistence {
    async fn save_document(&self, document: &Document) -> PortResult<()> {
        self.documents
            .write()
            .await
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn save_section(&self, document_id: Uuid, section: &Section) -> PortResult<()> {
        self.sections
            .write()
            .await
            .entry(document_id)
            .or_default()
            .insert(section.index, section.clone());
        Ok(())
    }

    async fn load_document(&self, document_id: Uuid) -> PortResult<Document> {
        self.documents
            .read()
            .await
            .get(&document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn load_sections(&self, document_id: Uuid) -> PortResult<Vec<Section>> {
        Ok(self
            .sections
            .read()
            .await
            .get(&document_id)
            .map(|sections| sections.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_document(&self, document_id: Uuid) -> PortResult<()> {
        let removed = self.documents.write().await.remove(&document_id);
        let removed_sections = self.sections.write().await.remove(&document_id);
        if removed.is_none() && removed_sections.is_none() {
            return Err(PortError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        Ok(())
    }

    async fn list_document_ids(&self) -> PortResult<Vec<Uuid>> {
        Ok(self.documents.read().await.keys().copied().collect())
    }
}
