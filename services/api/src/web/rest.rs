//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use summary_stream_core::{Document, Persona, Section, SummaryMetrics};
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::{error::ApiError, web::state::AppState};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_summary_handler,
        list_summaries_handler,
        get_summary_handler,
        list_sections_handler,
        set_favorite_handler,
        delete_summary_handler,
        crate::web::progress::progress_handler,
        crate::web::ws_handler::ws_handler,
    ),
    components(
        schemas(CreateSummaryRequest, FavoriteRequest, SummaryView, SectionView, MetricsView)
    ),
    tags(
        (name = "Summary Stream API", description = "Section-based streaming summaries.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The payload for starting a new summary.
#[derive(Deserialize, ToSchema)]
pub struct CreateSummaryRequest {
    pub text: String,
    /// One of `neutral`, `student`, `professional`, `casual`. Defaults to `neutral`.
    #[serde(default)]
    pub persona: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct FavoriteRequest {
    pub favorite: bool,
}

#[derive(Serialize, ToSchema)]
pub struct MetricsView {
    original_word_count: usize,
    summary_word_count: usize,
    original_reading_minutes: u32,
    summary_reading_minutes: u32,
    reduction_percent: u8,
    confidence: f32,
}

impl From<&SummaryMetrics> for MetricsView {
    fn from(metrics: &SummaryMetrics) -> Self {
        Self {
            original_word_count: metrics.original_word_count,
            summary_word_count: metrics.summary_word_count,
            original_reading_minutes: metrics.original_reading_minutes,
            summary_reading_minutes: metrics.summary_reading_minutes,
            reduction_percent: metrics.reduction_percent,
            confidence: metrics.confidence,
        }
    }
}

/// A summary as shown to API consumers. The source text is left out.
#[derive(Serialize, ToSchema)]
pub struct SummaryView {
    id: Uuid,
    status: String,
    persona: String,
    total_sections: usize,
    failed_sections: usize,
    /// True when some sections failed but the merged text is still usable.
    has_partial_content: bool,
    brief_summary: String,
    detailed_summary: String,
    brief_overview: String,
    key_insights: Vec<String>,
    action_items: Vec<String>,
    keywords: Vec<String>,
    metrics: MetricsView,
    favorite: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Document> for SummaryView {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id,
            status: document.status.to_string(),
            persona: document.persona.to_string(),
            total_sections: document.total_sections,
            failed_sections: document.failed_sections,
            has_partial_content: document.has_partial_content(),
            brief_summary: document.brief_summary.clone(),
            detailed_summary: document.detailed_summary.clone(),
            brief_overview: document.brief_overview.clone(),
            key_insights: document.key_insights.clone(),
            action_items: document.action_items.clone(),
            keywords: document.keywords.clone(),
            metrics: MetricsView::from(&document.metrics),
            favorite: document.favorite,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SectionView {
    index: usize,
    status: String,
    summary_text: Option<String>,
    error: Option<String>,
    bullets: Vec<String>,
    action_items: Vec<String>,
    keywords: Vec<String>,
    confidence: Option<f32>,
    updated_at: DateTime<Utc>,
}

impl From<Section> for SectionView {
    fn from(section: Section) -> Self {
        Self {
            index: section.index,
            status: section.status.to_string(),
            summary_text: section.summary_text,
            error: section.error,
            bullets: section.bullets,
            action_items: section.action_items,
            keywords: section.keywords,
            confidence: section.confidence,
            updated_at: section.updated_at,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Start summarizing a text.
///
/// Returns the placeholder immediately; sections are summarized in the
/// background and reported through the events and progress streams.
#[utoipa::path(
    post,
    path = "/summaries",
    request_body = CreateSummaryRequest,
    responses(
        (status = 202, description = "Summary accepted", body = SummaryView),
        (status = 400, description = "Empty text or unknown persona"),
        (status = 503, description = "The placeholder could not be persisted")
    )
)]
pub async fn create_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<CreateSummaryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let persona = match request.persona.as_deref() {
        Some(raw) => raw
            .parse::<Persona>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => Persona::default(),
    };

    let (document, handle) = app_state.pipeline.start(request.text, persona).await?;
    info!(
        document_id = %handle.document_id(),
        sections = document.total_sections,
        "Accepted summary request."
    );
    // Workers run detached; their outcomes surface as events.
    drop(handle);
    Ok((StatusCode::ACCEPTED, Json(SummaryView::from(&document))))
}

/// List all summaries, newest first, including finished ones that are only
/// held in storage.
#[utoipa::path(
    get,
    path = "/summaries",
    responses(
        (status = 200, description = "All summaries", body = [SummaryView]),
        (status = 503, description = "Stored summaries could not be read")
    )
)]
pub async fn list_summaries_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<SummaryView>>, ApiError> {
    let summaries = app_state
        .aggregator()
        .list_summaries()
        .await?
        .iter()
        .map(SummaryView::from)
        .collect();
    Ok(Json(summaries))
}

/// Get the latest snapshot of a summary.
#[utoipa::path(
    get,
    path = "/summaries/{id}",
    params(("id" = Uuid, Path, description = "The summary id.")),
    responses(
        (status = 200, description = "Summary snapshot", body = SummaryView),
        (status = 404, description = "Unknown summary")
    )
)]
pub async fn get_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SummaryView>, ApiError> {
    let document = app_state.document(id).await?;
    Ok(Json(SummaryView::from(&document)))
}

/// Get the sections of a summary in index order.
#[utoipa::path(
    get,
    path = "/summaries/{id}/sections",
    params(("id" = Uuid, Path, description = "The summary id.")),
    responses(
        (status = 200, description = "Sections ordered by index", body = [SectionView]),
        (status = 404, description = "Unknown summary")
    )
)]
pub async fn list_sections_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<SectionView>>, ApiError> {
    app_state.document(id).await?;
    let sections = app_state.aggregator().get_sections(id)?;
    Ok(Json(sections.into_iter().map(SectionView::from).collect()))
}

/// Mark or unmark a summary as favorite.
#[utoipa::path(
    put,
    path = "/summaries/{id}/favorite",
    params(("id" = Uuid, Path, description = "The summary id.")),
    request_body = FavoriteRequest,
    responses(
        (status = 200, description = "Updated summary", body = SummaryView),
        (status = 404, description = "Unknown summary")
    )
)]
pub async fn set_favorite_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<FavoriteRequest>,
) -> Result<Json<SummaryView>, ApiError> {
    app_state.document(id).await?;
    let document = app_state.aggregator().set_favorite(id, request.favorite).await?;
    Ok(Json(SummaryView::from(&document)))
}

/// Delete a summary with all of its sections. Open event and progress
/// streams for it are closed.
#[utoipa::path(
    delete,
    path = "/summaries/{id}",
    params(("id" = Uuid, Path, description = "The summary id.")),
    responses(
        (status = 204, description = "Summary deleted"),
        (status = 404, description = "Unknown summary")
    )
)]
pub async fn delete_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app_state.aggregator().delete_summary(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
