//! # Pitch Lake WebSocket Server
//!
//! The event distribution core: topic-scoped publish/subscribe over
//! persistent WebSocket connections. Clients subscribe to one of four topic
//! kinds (home, vault, gas, fossil); a single change-event listener fans
//! database notifications out to matching sessions; a job tracker drives
//! Fossil pricing jobs on demand.
//!
//! The one hard rule throughout: a slow or stalled consumer is evicted,
//! never waited on. Delivery to everyone else must not care.

use axum::{routing::get, Router};
use database::DbRepository;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod registry;
pub mod session;

pub use dispatcher::Dispatcher;
pub use error::AppError;
pub use jobs::{JobError, JobTracker};
pub use registry::SubscriptionRegistry;

/// The shared application state that all handlers can access.
pub struct AppState {
    pub db_repo: DbRepository,
    pub registry: Arc<SubscriptionRegistry>,
    pub jobs: Arc<JobTracker>,
    /// Root token: cancelling it drains every session and the listener.
    pub shutdown: CancellationToken,
    /// The frontend origin allowed to open sessions; `None` allows any.
    pub allowed_origin: Option<String>,
}

/// Builds the application router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = match state
        .allowed_origin
        .as_deref()
        .and_then(|origin| origin.parse::<axum::http::HeaderValue>().ok())
    {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_methods(Any)
            .allow_headers(AllowHeaders::any()),
        None => CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(Any)
            .allow_headers(AllowHeaders::any()),
    };

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/subscribeHome", get(handlers::subscribe_home))
        .route("/subscribeVault", get(handlers::subscribe_vault))
        .route("/subscribeGas", get(handlers::subscribe_gas))
        .route("/subscribeFossil", get(handlers::subscribe_fossil))
        .with_state(state)
        .layer(cors)
        // This middleware logs information about every incoming request.
        .layer(TraceLayer::new_for_http())
}

/// Binds and serves until the shutdown token fires.
pub async fn run_server(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    tracing::info!("Web server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
