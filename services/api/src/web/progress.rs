//! services/api/src/web/progress.rs
//!
//! Server-sent events carrying document snapshots while a summary is being
//! built. The first event is the current snapshot; the stream ends once every
//! section has finished or the summary is deleted.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::ApiError,
    web::{rest::SummaryView, state::AppState},
};

/// Stream progress snapshots of a summary.
#[utoipa::path(
    get,
    path = "/summaries/{id}/progress",
    params(("id" = Uuid, Path, description = "The summary id.")),
    responses(
        (status = 200, description = "text/event-stream of `progress` events carrying a SummaryView"),
        (status = 404, description = "Unknown summary")
    )
)]
pub async fn progress_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    app_state.document(id).await?;
    let mut progress = app_state.aggregator().observe_progress(id)?;

    let stream = async_stream::stream! {
        while let Some(document) = progress.next_snapshot().await {
            let finished = document.status.is_terminal();
            yield Event::default()
                .event("progress")
                .json_data(SummaryView::from(&document));
            if finished {
                break;
            }
        }
        debug!(document_id = %id, "Progress stream ended.");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
