//! Collaborative notes backend
//!
//! REST backend for hierarchical documents shared with collaborators, with
//! SQLite persistence and Tantivy full-text search.

mod access;
mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod search;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::IdentityVerifier;
use config::Config;
use db::Repository;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub verifier: Arc<IdentityVerifier>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting notes backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_key.is_none() {
        tracing::warn!("No gateway key configured (NOTES_API_KEY). API key check is disabled!");
    }
    if config.jwt_secret.is_none() {
        tracing::warn!(
            "No token secret configured (NOTES_JWT_SECRET). Trusting x-user-id headers; do not expose this server!"
        );
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Initialize search index from the database
    let search = Arc::new(SearchIndex::open(&config.index_path)?);
    tracing::info!("Building search index...");
    let documents = repo.list_all_documents().await?;
    search.rebuild(&documents).await?;

    let state = AppState {
        repo,
        search,
        verifier: Arc::new(IdentityVerifier::new(config.jwt_secret.as_deref())),
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_key = state.config.api_key.clone();

    let api_routes = Router::new()
        // Revision
        .route("/revision", get(api::get_revision))
        // Documents
        .route(
            "/documents",
            get(api::list_documents).post(api::create_document),
        )
        .route("/documents/search", get(api::search_documents))
        .route("/documents/sidebar", get(api::sidebar_documents))
        .route("/documents/trash", get(api::trash_documents))
        .route(
            "/documents/{id}",
            get(api::get_document)
                .patch(api::update_document)
                .delete(api::delete_document),
        )
        .route("/documents/{id}/archive", post(api::archive_document))
        .route("/documents/{id}/restore", post(api::restore_document))
        .route("/documents/{id}/cover-image", delete(api::remove_cover_image))
        .route("/documents/{id}/icon", delete(api::remove_icon))
        // Collaborators
        .route(
            "/documents/{id}/collaborators",
            get(api::list_collaborators).post(api::join_document),
        )
        .route(
            "/documents/{id}/collaborators/{user_id}",
            patch(api::update_collaborator).delete(api::remove_collaborator),
        )
        .layer(middleware::from_fn(move |req, next| {
            auth::api_key_layer(api_key.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
