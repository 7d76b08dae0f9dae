//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{db::DbAdapter, summary_llm::OpenAiSummaryAdapter},
    config::{Config, ConfigError},
    error::ApiError,
    sweeper::sweep_summaries,
    web::{build_router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use summary_stream_core::{
    Aggregator, InMemoryPersistence, PersistenceService, SummarizationService, SummaryPipeline,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    let persistence: Arc<dyn PersistenceService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; summaries are kept in memory only.");
            Arc::new(InMemoryPersistence::new())
        }
    };

    // --- 3. Initialize the Summarization Backend ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?,
    );
    let backend: Arc<dyn SummarizationService> = Arc::new(OpenAiSummaryAdapter::new(
        Client::with_config(openai_config),
        config.summary_model.clone(),
        config.backend_max_attempts,
    ));

    // --- 4. Build the Aggregator, Pipeline and Shared AppState ---
    let aggregator = Arc::new(Aggregator::new(persistence, config.aggregator_options()));
    let pipeline = SummaryPipeline::new(aggregator.clone(), backend, config.pipeline_options());
    let app_state = Arc::new(AppState::new(pipeline.clone(), config.clone()));

    // --- 5. Resume Summaries Interrupted by a Restart ---
    // Finished summaries stay in storage until requested.
    match pipeline.resume_unfinished().await {
        // Workers run detached; their outcomes surface as events.
        Ok(handles) => info!(count = handles.len(), "Resumed unfinished summaries."),
        Err(e) => error!(error = %e, "Failed to list stored summaries; nothing resumed."),
    }

    // --- 6. Start Background Tasks ---
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_summaries(
        aggregator,
        config.stale_after,
        config.evict_after,
        shutdown.clone(),
    ));

    // --- 7. Start the Server ---
    let app = build_router(app_state);
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for the shutdown signal.");
            }
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "Summary sweeper failed.");
    }
    info!("Server stopped.");
    Ok(())
}
