//! services/api/src/web/router.rs
//!
//! Assembles the HTTP router: REST endpoints, the event and progress streams,
//! and the Swagger UI.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        Method,
    },
    routing::{get, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::web::{
    progress_handler,
    rest::{
        create_summary_handler, delete_summary_handler, get_summary_handler, list_sections_handler,
        list_summaries_handler, set_favorite_handler, ApiDoc,
    },
    state::AppState,
    ws_handler,
};

/// Upper bound on request bodies; source texts arrive as JSON.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    let api_router = Router::new()
        .route(
            "/summaries",
            get(list_summaries_handler).post(create_summary_handler),
        )
        .route(
            "/summaries/{id}",
            get(get_summary_handler).delete(delete_summary_handler),
        )
        .route("/summaries/{id}/sections", get(list_sections_handler))
        .route("/summaries/{id}/favorite", put(set_favorite_handler))
        .route("/summaries/{id}/events", get(ws_handler))
        .route("/summaries/{id}/progress", get(progress_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
