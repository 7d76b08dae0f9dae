//! crates/summary_stream_core/src/domain.rs
//!
//! Defines the pure, core data structures for section-based summarization.
//! These structs are independent of any database or transport format; serde
//! derives exist only so adapters can put them on the wire unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Status and Persona Enumerations
//=========================================================================================

/// Processing state shared by documents and sections.
///
/// Sections move `Pending -> Processing -> {Completed | Failed}`. Documents never
/// have their status set directly; it is derived from their sections by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Partial,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// `Completed` and `Failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Partial => "PARTIAL",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when persisted status text does not name a known status.
/// Unknown values are always rejected, never mapped to a default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized processing status: '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ProcessingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "PARTIAL" => Ok(ProcessingStatus::Partial),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// The summarization style requested for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    #[default]
    Neutral,
    Student,
    Professional,
    Casual,
}

impl Persona {
    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Neutral => "neutral",
            Persona::Student => "student",
            Persona::Professional => "professional",
            Persona::Casual => "casual",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized persona: '{0}'")]
pub struct UnknownPersona(pub String);

impl FromStr for Persona {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Persona::Neutral),
            "student" => Ok(Persona::Student),
            "professional" => Ok(Persona::Professional),
            "casual" => Ok(Persona::Casual),
            _ => Err(UnknownPersona(s.to_string())),
        }
    }
}

//=========================================================================================
// Section Types
//=========================================================================================

/// What the summarization backend returns for one section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    pub text: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Backend-reported confidence in [0, 1]; `None` counts as 1.0.
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl SectionResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_bullets(mut self, bullets: Vec<String>) -> Self {
        self.bullets = bullets;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// One chunk of the source document and its summarization state.
/// Addressed by `(document id, index)`; `index` defines merge order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub index: usize,
    pub source_text: String,
    pub summary_text: Option<String>,
    pub status: ProcessingStatus,
    pub error: Option<String>,
    pub bullets: Vec<String>,
    pub action_items: Vec<String>,
    pub keywords: Vec<String>,
    pub confidence: Option<f32>,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    pub fn pending(index: usize, source_text: impl Into<String>) -> Self {
        Self {
            index,
            source_text: source_text.into(),
            summary_text: None,
            status: ProcessingStatus::Pending,
            error: None,
            bullets: Vec::new(),
            action_items: Vec::new(),
            keywords: Vec::new(),
            confidence: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn started(&self) -> Self {
        Self {
            status: ProcessingStatus::Processing,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub(crate) fn completed(&self, result: SectionResult) -> Self {
        Self {
            index: self.index,
            source_text: self.source_text.clone(),
            summary_text: Some(result.text),
            status: ProcessingStatus::Completed,
            error: None,
            bullets: result.bullets,
            action_items: result.action_items,
            keywords: result.keywords,
            confidence: result.confidence,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn failed(&self, error: impl Into<String>) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            error: Some(error.into()),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

//=========================================================================================
// Document Types
//=========================================================================================

/// Derived figures, recomputed every time the merged text changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub original_word_count: usize,
    pub summary_word_count: usize,
    pub original_reading_minutes: u32,
    pub summary_reading_minutes: u32,
    pub reduction_percent: u8,
    pub confidence: f32,
}

impl SummaryMetrics {
    /// Metrics for a document that has no summary text yet.
    pub fn placeholder(original_word_count: usize) -> Self {
        Self {
            original_word_count,
            summary_word_count: 0,
            original_reading_minutes: crate::metrics::reading_time_minutes(original_word_count),
            summary_reading_minutes: 0,
            reduction_percent: 0,
            confidence: 1.0,
        }
    }
}

/// The aggregate summarization job spanning all sections of one source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub original_text: String,
    pub persona: Persona,
    pub total_sections: usize,
    pub status: ProcessingStatus,
    pub brief_summary: String,
    pub detailed_summary: String,
    pub brief_overview: String,
    pub key_insights: Vec<String>,
    pub action_items: Vec<String>,
    pub keywords: Vec<String>,
    pub metrics: SummaryMetrics,
    /// Sections that ended `Failed`. Non-zero on a `Completed` document means
    /// the summary carries partial content.
    pub failed_sections: usize,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn placeholder(original_text: String, persona: Persona, total_sections: usize) -> Self {
        let now = Utc::now();
        let original_words = crate::metrics::word_count(&original_text);
        Self {
            id: Uuid::new_v4(),
            original_text,
            persona,
            total_sections,
            status: ProcessingStatus::Pending,
            brief_summary: String::new(),
            detailed_summary: String::new(),
            brief_overview: String::new(),
            key_insights: Vec::new(),
            action_items: Vec::new(),
            keywords: Vec::new(),
            metrics: SummaryMetrics::placeholder(original_words),
            failed_sections: 0,
            favorite: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_partial_content(&self) -> bool {
        self.status == ProcessingStatus::Completed && self.failed_sections > 0
    }
}

//=========================================================================================
// Streaming Events
//=========================================================================================

/// An immutable record of one state transition, delivered to live subscribers.
///
/// `sequence` starts at 0 with the placeholder event and grows by exactly one per
/// event for the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingEvent {
    pub document_id: Uuid,
    /// Absent for whole-document events.
    pub section_index: Option<usize>,
    /// New status of the affected section, or of the document when `section_index` is absent.
    pub status: ProcessingStatus,
    pub document_status: ProcessingStatus,
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_rejects_unknown_values() {
        assert_eq!("completed".parse::<ProcessingStatus>(), Ok(ProcessingStatus::Completed));
        assert_eq!(" PARTIAL ".parse::<ProcessingStatus>(), Ok(ProcessingStatus::Partial));
        assert_eq!(
            "DONE".parse::<ProcessingStatus>(),
            Err(UnknownStatus("DONE".to_string()))
        );
        assert!("".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn status_display_round_trips() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Partial,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<ProcessingStatus>(), Ok(status));
        }
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
        assert!(!ProcessingStatus::Partial.is_terminal());
    }

    #[test]
    fn persona_parses_case_insensitively() {
        assert_eq!("Student".parse::<Persona>(), Ok(Persona::Student));
        assert!("pirate".parse::<Persona>().is_err());
        assert_eq!(Persona::default(), Persona::Neutral);
    }

    #[test]
    fn placeholder_document_starts_pending() {
        let doc = Document::placeholder("one two three".to_string(), Persona::Casual, 2);
        assert_eq!(doc.status, ProcessingStatus::Pending);
        assert_eq!(doc.metrics.original_word_count, 3);
        assert_eq!(doc.metrics.reduction_percent, 0);
        assert!(!doc.has_partial_content());
    }

    #[test]
    fn completed_section_drops_previous_error() {
        let section = Section::pending(1, "source").failed("timeout");
        let done = section.completed(SectionResult::new("short").with_confidence(0.5));
        assert_eq!(done.status, ProcessingStatus::Completed);
        assert_eq!(done.error, None);
        assert_eq!(done.summary_text.as_deref(), Some("short"));
        assert_eq!(done.source_text, "source");
    }
}
