//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `PersistenceService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use summary_stream_core::{
    ports::{PersistenceService, PortError, PortResult},
    Document, Persona, ProcessingStatus, Section, SummaryMetrics,
};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `PersistenceService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn to_i32(value: usize, field: &str) -> PortResult<i32> {
    i32::try_from(value)
        .map_err(|_| PortError::Unexpected(format!("{} {} does not fit the column", field, value)))
}

fn to_usize(value: i32, field: &str) -> PortResult<usize> {
    usize::try_from(value)
        .map_err(|_| PortError::Unexpected(format!("stored {} {} is negative", field, value)))
}

fn parse_status(raw: &str) -> PortResult<ProcessingStatus> {
    raw.parse::<ProcessingStatus>()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SummaryRecord {
    id: Uuid,
    original_text: String,
    persona: String,
    total_sections: i32,
    status: String,
    brief_summary: String,
    detailed_summary: String,
    brief_overview: String,
    key_insights: Json<Vec<String>>,
    action_items: Json<Vec<String>>,
    keywords: Json<Vec<String>>,
    metrics: Json<SummaryMetrics>,
    failed_sections: i32,
    favorite: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl SummaryRecord {
    fn to_domain(self) -> PortResult<Document> {
        Ok(Document {
            id: self.id,
            original_text: self.original_text,
            persona: self
                .persona
                .parse::<Persona>()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            total_sections: to_usize(self.total_sections, "total_sections")?,
            status: parse_status(&self.status)?,
            brief_summary: self.brief_summary,
            detailed_summary: self.detailed_summary,
            brief_overview: self.brief_overview,
            key_insights: self.key_insights.0,
            action_items: self.action_items.0,
            keywords: self.keywords.0,
            metrics: self.metrics.0,
            failed_sections: to_usize(self.failed_sections, "failed_sections")?,
            favorite: self.favorite,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SectionRecord {
    section_index: i32,
    source_text: String,
    summary_text: Option<String>,
    status: String,
    error: Option<String>,
    bullets: Json<Vec<String>>,
    action_items: Json<Vec<String>>,
    keywords: Json<Vec<String>>,
    confidence: Option<f32>,
    updated_at: DateTime<Utc>,
}
impl SectionRecord {
    fn to_domain(self) -> PortResult<Section> {
        Ok(Section {
            index: to_usize(self.section_index, "section_index")?,
            source_text: self.source_text,
            summary_text: self.summary_text,
            status: parse_status(&self.status)?,
            error: self.error,
            bullets: self.bullets.0,
            action_items: self.action_items.0,
            keywords: self.keywords.0,
            confidence: self.confidence,
            updated_at: self.updated_at,
        })
    }
}

//=========================================================================================
// `PersistenceService` Trait Implementation
//=========================================================================================

#[async_trait]
impl PersistenceService for DbAdapter {
    async fn save_document(&self, document: &Document) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO summaries (id, original_text, persona, total_sections, status, brief_summary, \
             detailed_summary, brief_overview, key_insights, action_items, keywords, metrics, \
             failed_sections, favorite, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (id) DO UPDATE SET \
             status = EXCLUDED.status, brief_summary = EXCLUDED.brief_summary, \
             detailed_summary = EXCLUDED.detailed_summary, brief_overview = EXCLUDED.brief_overview, \
             key_insights = EXCLUDED.key_insights, action_items = EXCLUDED.action_items, \
             keywords = EXCLUDED.keywords, metrics = EXCLUDED.metrics, \
             failed_sections = EXCLUDED.failed_sections, favorite = EXCLUDED.favorite, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(document.id)
        .bind(&document.original_text)
        .bind(document.persona.as_str())
        .bind(to_i32(document.total_sections, "total_sections")?)
        .bind(document.status.as_str())
        .bind(&document.brief_summary)
        .bind(&document.detailed_summary)
        .bind(&document.brief_overview)
        .bind(Json(&document.key_insights))
        .bind(Json(&document.action_items))
        .bind(Json(&document.keywords))
        .bind(Json(&document.metrics))
        .bind(to_i32(document.failed_sections, "failed_sections")?)
        .bind(document.favorite)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn save_section(&self, document_id: Uuid, section: &Section) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO summary_sections (summary_id, section_index, source_text, summary_text, \
             status, error, bullets, action_items, keywords, confidence, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (summary_id, section_index) DO UPDATE SET \
             summary_text = EXCLUDED.summary_text, status = EXCLUDED.status, \
             error = EXCLUDED.error, bullets = EXCLUDED.bullets, \
             action_items = EXCLUDED.action_items, keywords = EXCLUDED.keywords, \
             confidence = EXCLUDED.confidence, updated_at = EXCLUDED.updated_at",
        )
        .bind(document_id)
        .bind(to_i32(section.index, "section_index")?)
        .bind(&section.source_text)
        .bind(&section.summary_text)
        .bind(section.status.as_str())
        .bind(&section.error)
        .bind(Json(&section.bullets))
        .bind(Json(&section.action_items))
        .bind(Json(&section.keywords))
        .bind(section.confidence)
        .bind(section.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                PortError::NotFound(format!("Document {} not found", document_id))
            }
            _ => unexpected(e),
        })?;
        Ok(())
    }

    async fn load_document(&self, document_id: Uuid) -> PortResult<Document> {
        let record = sqlx::query_as::<_, SummaryRecord>(
            "SELECT id, original_text, persona, total_sections, status, brief_summary, \
             detailed_summary, brief_overview, key_insights, action_items, keywords, metrics, \
             failed_sections, favorite, created_at, updated_at FROM summaries WHERE id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Document {} not found", document_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn load_sections(&self, document_id: Uuid) -> PortResult<Vec<Section>> {
        let records = sqlx::query_as::<_, SectionRecord>(
            "SELECT section_index, source_text, summary_text, status, error, bullets, \
             action_items, keywords, confidence, updated_at FROM summary_sections \
             WHERE summary_id = $1 ORDER BY section_index ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(SectionRecord::to_domain).collect()
    }

    async fn delete_document(&self, document_id: Uuid) -> PortResult<()> {
        // Sections go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM summaries WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        Ok(())
    }

    async fn list_document_ids(&self) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM summaries ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_text_is_rejected() {
        assert!(matches!(parse_status("PAUSED"), Err(PortError::Unexpected(_))));
        assert_eq!(parse_status("COMPLETED").unwrap(), ProcessingStatus::Completed);
    }

    #[test]
    fn negative_columns_are_rejected() {
        assert!(to_usize(-1, "section_index").is_err());
        assert_eq!(to_usize(3, "section_index").unwrap(), 3);
    }

    #[test]
    fn section_records_map_to_domain_sections() {
        let record = SectionRecord {
            section_index: 2,
            source_text: "source".to_string(),
            summary_text: Some("short".to_string()),
            status: "COMPLETED".to_string(),
            error: None,
            bullets: Json(vec!["a".to_string()]),
            action_items: Json(Vec::new()),
            keywords: Json(vec!["k".to_string()]),
            confidence: Some(0.8),
            updated_at: Utc::now(),
        };
        let section = record.to_domain().unwrap();
        assert_eq!(section.index, 2);
        assert_eq!(section.status, ProcessingStatus::Completed);
        assert_eq!(section.summary_text.as_deref(), Some("short"));
        assert_eq!(section.bullets, vec!["a".to_string()]);
    }
}
