//! gitpress backend
//!
//! Keeps documents authoritative in a git repository while serving reads and offline edits from
//! a tenant-partitioned SQLite cache. Commits are compare-and-swap on the file's blob sha.

mod api;
mod auth;
mod collab;
mod config;
mod db;
mod errors;
mod frontmatter;
mod models;
mod publish;
mod remote;
mod schema;
mod sync;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use collab::CollaborationResolver;
use config::Config;
use db::Repository;
use publish::Publisher;
use remote::{ContentStore, GitHubContentStore};
use schema::SchemaRegistry;
use sync::SyncOrchestrator;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub collab: CollaborationResolver,
    pub sync: SyncOrchestrator,
    pub publisher: Publisher,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the engine components around one cache and one remote store.
    pub fn new(repo: Repository, store: Arc<dyn ContentStore>, config: Config) -> Self {
        let collab = CollaborationResolver::new(repo.clone());
        let registry = SchemaRegistry::new(store.clone(), config.schema_config_path.clone());
        let sync = SyncOrchestrator::new(
            repo.clone(),
            store.clone(),
            registry,
            config.sync_concurrency,
        );
        let publisher = Publisher::new(repo.clone(), store, collab.clone());

        Self {
            repo,
            collab,
            sync,
            publisher,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting gitpress backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Remote API: {}", config.remote_api_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (GITPRESS_API_PSK). Authentication is disabled!");
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Repository::new(pool);

    let store = Arc::new(GitHubContentStore::new(
        &config.remote_api_url,
        config.remote_timeout,
        config.remote_max_retries,
        config.remote_retry_base,
    )?);

    let bind_addr = config.bind_addr;
    let state = AppState::new(repo, store, config);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Projects
        .route("/projects", get(api::list_projects).post(api::create_project))
        .route("/projects/{owner}/{repo}", get(api::get_project))
        .route("/projects/{owner}/{repo}/sync", post(api::sync_project))
        .route(
            "/projects/{owner}/{repo}/deletions",
            post(api::delete_project_files),
        )
        .route("/projects/{owner}/{repo}/posts", get(api::list_project_posts))
        .route(
            "/projects/{owner}/{repo}/schemas",
            get(api::list_project_schemas),
        )
        .route(
            "/projects/{owner}/{repo}/collaborators",
            post(api::add_collaborator),
        )
        .route(
            "/projects/{owner}/{repo}/collaborators/{tenant}",
            delete(api::remove_collaborator),
        )
        // Posts
        .route("/posts", post(api::create_post))
        .route(
            "/posts/{id}",
            get(api::get_post)
                .put(api::update_post)
                .delete(api::delete_post),
        )
        // Settings
        .route("/settings", get(api::get_settings).put(api::put_settings))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
