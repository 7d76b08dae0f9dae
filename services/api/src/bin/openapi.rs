//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the summaries API: creating a summary,
//! listing and reading summaries with their sections, favoriting, deleting,
//! and the per-summary event WebSocket and progress SSE streams. The output
//! path is the first argument and defaults to `openapi.json`.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

/// The summaries API document, titled for this service.
fn summaries_api() -> utoipa::openapi::OpenApi {
    let mut api_doc = ApiDoc::openapi();
    api_doc.info.title = "Summary Stream API".to_string();
    api_doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    api_doc.info.description = Some(
        "Section-based streaming summaries: submit a text, follow its sections \
         through the events WebSocket or the progress stream, read the merged summary."
            .to_string(),
    );
    api_doc
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    let api_doc = summaries_api();
    let routes = api_doc.paths.paths.len();
    std::fs::write(&path, api_doc.to_pretty_json()?)?;
    println!("Wrote {} summary API routes to {}", routes, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_every_summary_route() {
        let api_doc = summaries_api();
        assert_eq!(api_doc.info.title, "Summary Stream API");
        for route in [
            "/summaries",
            "/summaries/{id}",
            "/summaries/{id}/sections",
            "/summaries/{id}/favorite",
            "/summaries/{id}/events",
            "/summaries/{id}/progress",
        ] {
            assert!(api_doc.paths.paths.contains_key(route), "missing {route}");
        }
    }
}
