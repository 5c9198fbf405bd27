//! K-entertainment news intelligence backend
//!
//! Scrapes Korean entertainment news through a database-backed job queue,
//! structures articles into a bilingual knowledge base keyed by a
//! normalized artist/group registry, and serves the processed corpus over
//! a public read-only API.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, Environment, PipelineThresholds};
pub use database::{create_pool, run_migrations};
pub use error::{AppError, LlmError, Result, ScrapeError};
pub use models::*;
pub use services::{
    ArticleStore, DomainThrottle, EntityStore, FeedConfig, IntelligenceEngine, JobQueueService,
    LlmClient, PoliteFetcher, ProfileEnricher, ScrapeEngine, SelfHealingResolver,
    SimpleProcessor, SystemLogger, Worker,
};

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub queue: JobQueueService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Arc<AppConfig>) -> Self {
        let queue = JobQueueService::new(pool.clone());
        Self {
            pool,
            config,
            queue,
        }
    }
}

/// Build the HTTP router: public projection plus the internal job API.
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/articles", get(handlers::public::list_articles))
        .route("/articles/:id", get(handlers::public::get_article))
        .route("/artists", get(handlers::public::list_artists))
        .route("/artists/:id", get(handlers::public::get_artist))
        .route(
            "/artists/:id/articles",
            get(handlers::public::get_artist_articles),
        )
        .route("/groups", get(handlers::public::list_groups))
        .route("/groups/:id", get(handlers::public::get_group))
        .route(
            "/groups/:id/articles",
            get(handlers::public::get_group_articles),
        )
        .route("/search", get(handlers::public::search));

    let jobs = Router::new()
        .route("/", post(handlers::jobs::create_job).get(handlers::jobs::list_jobs))
        .route("/stats", get(handlers::jobs::queue_stats))
        .route("/:id", get(handlers::jobs::get_job))
        .route("/:id/cancel", post(handlers::jobs::cancel_job));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/public", public)
        .nest("/api/jobs", jobs)
        .layer(TraceLayer::new_for_http())
        .layer(crate::cors_layer())
        .with_state(state)
}

/// Wire the rate-limited LLM client: SSM-backed kill switch in production,
/// in-memory no-op store in development.
pub async fn build_llm_client(config: &AppConfig) -> Arc<LlmClient> {
    let params: Arc<dyn services::ParamStore> = if config.environment.is_production() {
        Arc::new(services::SsmParamStore::new(&config.aws.region).await)
    } else {
        Arc::new(services::MemoryParamStore::new())
    };
    let provider = Arc::new(services::GeminiProvider::new(config.gemini.api_key.clone()));
    Arc::new(LlmClient::new(
        provider,
        params,
        config.gemini.rpm_limit,
        config.gemini.kill_switch_path.clone(),
        config.gemini.monthly_tokens_path.clone(),
        config.gemini.monthly_token_limit,
        config.environment.is_production(),
    ))
}

fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};
    CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_origin(Any)
        .allow_headers(Any)
}
