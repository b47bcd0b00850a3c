pub mod analysis;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod extraction;
pub mod jobs;
pub mod models;
pub mod server;
pub mod storage;
pub mod time;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analysis::synthesis::{LlmClient, NotConfiguredLlmClient};
use crate::cache::{CacheStore, InMemoryCacheStore};
use crate::config::Config;
use crate::jobs::broker::{InMemoryTaskBroker, TaskBroker};
use crate::storage::Repositories;

/// Shared application state passed to all Axum handlers. Services
/// (`JobService`, `ProgressService`, `BatchService`, `Pipeline`) are thin
/// wrappers over these handles and are constructed on demand by the route
/// handlers that need them, rather than stored here.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repos: Repositories,
    pub cache: Arc<dyn CacheStore>,
    pub broker: Arc<dyn TaskBroker>,
    pub llm: Arc<dyn LlmClient>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        AppState {
            config,
            repos: Repositories::in_memory(),
            cache: Arc::new(InMemoryCacheStore::new()),
            broker: Arc::new(InMemoryTaskBroker::new()),
            llm: Arc::new(NotConfiguredLlmClient),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let authenticated_routes = Router::new()
        .route("/companies", post(server::routes::create_company).get(server::routes::list_companies))
        .route("/companies/{id}", get(server::routes::get_company).delete(server::routes::delete_company))
        .route("/companies/{id}/pause", post(server::routes::pause_company))
        .route("/companies/{id}/resume", post(server::routes::resume_company))
        .route("/companies/{id}/rescan", post(server::routes::rescan_company))
        .route("/companies/{id}/progress", get(server::routes::company_progress))
        .route("/companies/{id}/entities", get(server::routes::company_entities))
        .route("/companies/{id}/pages", get(server::routes::company_pages))
        .route("/companies/{id}/tokens", get(server::routes::company_tokens))
        .route("/companies/{id}/versions", get(server::routes::company_versions))
        .route("/companies/{id}/compare", get(server::routes::company_compare))
        .route("/companies/{id}/export", get(server::routes::export_company))
        .route("/batches", post(server::routes::create_batch).get(server::routes::list_batches))
        .route("/batches/schedule", post(server::routes::schedule_batches))
        .route("/batches/{id}", get(server::routes::get_batch))
        .route("/batches/{id}/start", post(server::routes::start_batch))
        .route("/batches/{id}/pause", post(server::routes::pause_batch))
        .route("/batches/{id}/resume", post(server::routes::resume_batch))
        .route("/batches/{id}/cancel", post(server::routes::cancel_batch))
        .layer(middleware::from_fn_with_state(state.clone(), server::auth::verify_hmac));

    let public_routes = Router::new().route("/health", get(server::routes::health));

    Router::new()
        .merge(authenticated_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
