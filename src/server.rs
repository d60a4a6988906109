//! HTTP server assembly: shared state, router and the serve loop.

use crate::analytics::AnalyticsRepository;
use crate::click_recorder::ClickSink;
use crate::dispatch::DispatchEngine;
use crate::handlers;
use crate::link_store::LinkStore;
use crate::ranking::RankingCache;
use crate::redis_manager::SharedCache;
use crate::refresher::RankingRefresher;
use crate::settings::Settings;
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use mongodb::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Everything the handlers need once the stores are connected.
pub struct Services {
    pub engine: DispatchEngine,
    pub refresher: Arc<RankingRefresher>,
    pub rankings: Arc<RankingCache>,
    pub cache: Arc<dyn SharedCache>,
    pub analytics: Arc<dyn AnalyticsRepository>,
    pub links: Arc<dyn LinkStore>,
    pub clicks: Arc<dyn ClickSink>,
    /// Absent when the store contract is satisfied by a test double.
    pub db: Option<Database>,
}

/// Router state. `services` is `None` in degraded mode (missing store
/// configuration): health endpoints keep answering, everything else 503s.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub services: Option<Arc<Services>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, services: Option<Arc<Services>>) -> Self {
        Self {
            settings,
            services,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origin);

    Router::new()
        .route("/", get(handlers::dispatch))
        // Browsers ask for this on every redirect chain; same short-circuit
        .route("/favicon.ico", get(handlers::dispatch))
        .route("/api/process", get(handlers::process))
        .route("/api/stats", get(handlers::stats))
        .route("/api/distinct/{field}", get(handlers::distinct))
        .route("/api/links", get(handlers::links))
        .route("/health", get(handlers::health))
        .route("/health/detailed", get(handlers::health_detailed))
        .route("/health/ready", get(handlers::health_ready))
        .route("/ping", get(handlers::ping))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        CorsLayer::new().allow_origin(Any)
    } else {
        match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new().allow_origin(AllowOrigin::exact(value)),
            Err(_) => {
                log::warn!("⚠️ Invalid CORS_ORIGIN '{}', falling back to any", origin);
                CorsLayer::new().allow_origin(Any)
            }
        }
    }
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("🚀 Dispatcher listening on {}", addr);

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
