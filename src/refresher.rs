//! Ranking refresher.
//!
//! Scheduled job computing the highest-eCPM post per publisher domain for
//! the current UTC date and publishing the result to the shared cache,
//! then reconciling the persisted link records. Runs on the primary
//! replica only: once at startup and at minute 30 of every hour.

use crate::analytics::{AnalyticsRepository, BestPostQuery};
use crate::domains::DomainRegistry;
use crate::link_store::LinkStore;
use crate::ranking::{
    compute_best_by_domain, serialize_rankings, sort_by_ecpm, BestLinkMap, RankingCache,
    BEST_LINKS_MAP_KEY, SORTED_DOMAINS_KEY,
};
use crate::redis_manager::SharedCache;
use crate::settings;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct RankingRefresher {
    analytics: Arc<dyn AnalyticsRepository>,
    links: Arc<dyn LinkStore>,
    cache: Arc<dyn SharedCache>,
    rankings: Arc<RankingCache>,
    registry: Arc<DomainRegistry>,
    cron: String,
    ranking_ttl_seconds: u64,
    custom_key: String,
}

impl RankingRefresher {
    pub fn new(
        analytics: Arc<dyn AnalyticsRepository>,
        links: Arc<dyn LinkStore>,
        cache: Arc<dyn SharedCache>,
        rankings: Arc<RankingCache>,
        registry: Arc<DomainRegistry>,
        config: &settings::Refresher,
    ) -> Self {
        Self {
            analytics,
            links,
            cache,
            rankings,
            registry,
            cron: config.cron.clone(),
            ranking_ttl_seconds: config.ranking_ttl_seconds,
            custom_key: config.custom_key.clone(),
        }
    }

    /// One full refresh pass.
    ///
    /// Returns the published map, or `None` when the aggregation came back
    /// empty (previous cache state is left intact). A cache write error
    /// propagates: the replica keeps its previous in-memory copies and the
    /// next schedule retries.
    pub async fn refresh(&self) -> Result<Option<BestLinkMap>> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let query = BestPostQuery {
            date: today.clone(),
            domains: self.registry.hostnames(),
            custom_key: self.custom_key.clone(),
        };

        let rows = self
            .analytics
            .best_post_rows(&query)
            .await
            .context("Analytics read failed")?;

        if rows.is_empty() {
            info!("ℹ️ No analytics rows for {}, keeping previous rankings", today);
            return Ok(None);
        }

        let best = compute_best_by_domain(&rows);
        let sorted = sort_by_ecpm(&best);
        let (map_json, sorted_json) = serialize_rankings(&best, &sorted)?;

        // Both writes must land before the in-memory copy advances; a
        // partial failure leaves the previous snapshot serving.
        self.cache
            .set_ex(BEST_LINKS_MAP_KEY, &map_json, self.ranking_ttl_seconds)
            .await
            .context("Failed to publish best links map")?;
        self.cache
            .set_ex(SORTED_DOMAINS_KEY, &sorted_json, self.ranking_ttl_seconds)
            .await
            .context("Failed to publish sorted domains")?;

        self.rankings.publish(best.clone(), sorted);

        // Link store reconciliation is best-effort: the cache is the
        // source of truth for dispatch.
        self.reconcile_links(&best).await;

        info!(
            "✅ Ranking refresh published: {} domains ranked for {}",
            best.len(),
            today
        );
        Ok(Some(best))
    }

    async fn reconcile_links(&self, best: &BestLinkMap) {
        match self.links.deactivate_all().await {
            Ok(retired) => debug!("Retired {} active link records", retired),
            Err(e) => warn!("⚠️ Failed to retire link records: {}", e),
        }

        for entry in best.values() {
            if let Err(e) = self.links.upsert_active(&entry.domain, &entry.url).await {
                warn!("⚠️ Failed to upsert link record for {}: {}", entry.domain, e);
            }
        }
    }

    /// Scheduled loop: one refresh immediately, then one at every cron
    /// occurrence (local time). A missed firing is dropped, not queued.
    pub async fn run_scheduled(self: Arc<Self>) {
        self.log_refresh_outcome().await;

        let cron = match croner::Cron::from_str(&self.cron) {
            Ok(cron) => cron,
            Err(e) => {
                error!("❌ Invalid refresher cron '{}': {}", self.cron, e);
                return;
            }
        };

        loop {
            let now = chrono::Local::now();
            let next = match cron.find_next_occurrence(&now, false) {
                Ok(next) => next,
                Err(e) => {
                    warn!("⚠️ Could not compute next refresh occurrence: {}", e);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    continue;
                }
            };

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("Next ranking refresh at {}", next);
            tokio::time::sleep(wait).await;

            self.log_refresh_outcome().await;
        }
    }

    async fn log_refresh_outcome(&self) {
        if let Err(e) = self.refresh().await {
            warn!("⚠️ Ranking refresh failed: {:#}", e);
        }
    }
}
