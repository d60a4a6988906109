//! # Redirect Dispatcher Service
//!
//! Process entry point: loads settings, connects the shared cache and the
//! document store, wires the dispatch engine, and (on the primary
//! replica) registers the hourly ranking refresh.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin dispatcher
//! ```
//!
//! Press Ctrl+C to stop gracefully.

use anyhow::Result;
use redron_dispatcher::{
    analytics::{AnalyticsRepository, MongoAnalyticsRepository},
    click_recorder::{ClickSink, MongoClickSink},
    database,
    dispatch::DispatchEngine,
    domains::DomainRegistry,
    error,
    link_store::{LinkStore, MongoLinkStore},
    ranking::RankingCache,
    redis_manager::{RedisConfig, RedisManager, SharedCache},
    refresher::RankingRefresher,
    server::{self, AppState, Services},
    settings::Settings,
};
use std::sync::Arc;

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    env_logger::init();

    println!("🚀 Starting Redirect Dispatcher");
    println!("═══════════════════════════════════════════════════════════════════\n");

    // 1. Load settings
    let settings = Settings::new()?;
    println!("✅ Settings loaded");

    error::set_development_mode(settings.is_development());

    // WORKER_COUNT maps to tokio worker threads; a disabled cluster runs
    // on a single worker
    let workers = if settings.cluster.enabled {
        settings.cluster.worker_count.max(1)
    } else {
        1
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?;

    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);

    // 2. Build the domain registry
    let registry = Arc::new(DomainRegistry::new(&settings.domains));
    println!("✅ Domain registry loaded ({} domains)", registry.len());

    // 3. Connect stores; missing configuration degrades instead of failing
    let services = match (&settings.stores.redis_url, &settings.stores.mongodb_url) {
        (Some(redis_url), Some(mongodb_url)) => {
            let cache: Arc<dyn SharedCache> = Arc::new(
                RedisManager::new(RedisConfig {
                    url: redis_url.clone(),
                })
                .await?,
            );

            let db = database::connect(mongodb_url, &settings.stores.database).await?;
            database::ensure_indexes(&db).await?;
            println!("✅ Stores connected");

            let analytics: Arc<dyn AnalyticsRepository> =
                Arc::new(MongoAnalyticsRepository::new(&db));
            let links: Arc<dyn LinkStore> = Arc::new(MongoLinkStore::new(&db));
            let clicks: Arc<dyn ClickSink> = Arc::new(MongoClickSink::new(&db));

            let rankings = Arc::new(RankingCache::new(
                cache.clone(),
                settings.refresher.local_freshness_seconds,
            ));

            let engine = DispatchEngine::new(
                cache.clone(),
                rankings.clone(),
                registry.clone(),
                clicks.clone(),
            );

            let refresher = Arc::new(RankingRefresher::new(
                analytics.clone(),
                links.clone(),
                cache.clone(),
                rankings.clone(),
                registry.clone(),
                &settings.refresher,
            ));

            Some(Arc::new(Services {
                engine,
                refresher,
                rankings,
                cache,
                analytics,
                links,
                clicks,
                db: Some(db),
            }))
        }
        _ => {
            log::warn!(
                "⚠️ MONGODB_URL / REDIS_URL not configured; starting degraded (health endpoints only)"
            );
            None
        }
    };

    // 4. Primary replica owns the ranking refresh schedule
    let refresher_handle = match &services {
        Some(services) if settings.cluster.primary => {
            println!("✅ Primary replica: ranking refresher scheduled ({})", settings.refresher.cron);
            Some(tokio::spawn(services.refresher.clone().run_scheduled()))
        }
        Some(_) => {
            println!("ℹ️ Replica mode: reading rankings published by the primary");
            None
        }
        None => None,
    };

    // 5. Serve until ctrl-c
    let state = AppState::new(settings.clone(), services);
    let result = server::serve(state).await;

    if let Some(handle) = refresher_handle {
        handle.abort();
    }

    result
}
