//! Dispatch engine.
//!
//! Turns one inbound visitor request into a `(finalUrl, linkId)` pair for
//! the 302 response. Selection is visitor-scoped and sequential: the first
//! visit of the hour gets the highest-eCPM domain, the second the next one
//! down, and once the ranked list is exhausted the request spills to a
//! global round-robin over the static registry.
//!
//! Click recording and the anti-replay memo are detached from the response
//! path: spawned tasks with an error-logging sink, never awaited here.

use crate::click_recorder::ClickSink;
use crate::domains::DomainRegistry;
use crate::ranking::RankingCache;
use crate::redis_manager::SharedCache;
use crate::url_decorator::{decorate_url, TrackingParams};
use anyhow::{anyhow, ensure, Result};
use chrono::Timelike;
use log::warn;
use std::sync::Arc;

/// Global round-robin counter for the spill path. No TTL.
pub const DOMAIN_COUNTER_KEY: &str = "redirect:domain:counter";
/// The spill counter is reset to 1 once it passes this bound.
pub const DOMAIN_COUNTER_MAX: i64 = 1_000_000;
/// Per-visitor cursor lifetime, set only on the first visit of the hour.
pub const VISITOR_TTL_SECONDS: i64 = 3600;
/// Anti-replay memo lifetime.
pub const RECENT_TTL_SECONDS: u64 = 5;
/// Destination of last resort, reached only via caught errors.
pub const EMERGENCY_FALLBACK_URL: &str = "https://useuapp.com/random";

pub fn visitor_key(ip: &str, hour_of_day: u32) -> String {
    format!("visitor_count:{}:{}", ip, hour_of_day)
}

pub fn recent_key(ip: &str) -> String {
    format!("recent:{}", ip)
}

/// Parsed dispatch request: the visitor identity plus the query inputs.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub ip: String,
    pub language: Option<String>,
    pub tracking: TrackingParams,
}

/// Outcome handed to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub final_url: String,
    pub link_id: String,
    /// The visitor's sequence number within the current hour.
    pub visit: i64,
}

pub struct DispatchEngine {
    cache: Arc<dyn SharedCache>,
    rankings: Arc<RankingCache>,
    registry: Arc<DomainRegistry>,
    clicks: Arc<dyn ClickSink>,
}

impl DispatchEngine {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        rankings: Arc<RankingCache>,
        registry: Arc<DomainRegistry>,
        clicks: Arc<dyn ClickSink>,
    ) -> Self {
        Self {
            cache,
            rankings,
            registry,
            clicks,
        }
    }

    /// Serve one request. Any error here makes the HTTP layer fall back to
    /// the emergency redirect.
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<Dispatch> {
        let hour = chrono::Utc::now().hour();
        self.dispatch_at_hour(request, hour).await
    }

    /// Hour-explicit variant; the public entry point pins the current UTC
    /// hour. Kept separate so tests can cross hour boundaries.
    pub async fn dispatch_at_hour(&self, request: &DispatchRequest, hour: u32) -> Result<Dispatch> {
        ensure!(!self.registry.is_empty(), "Domain registry is empty");

        // Visitor cursor: atomic increment, TTL armed only on first visit
        let cursor_key = visitor_key(&request.ip, hour);
        let visit = self.cache.incr(&cursor_key).await?;
        if visit == 1 {
            self.cache.expire(&cursor_key, VISITOR_TTL_SECONDS).await?;
        }

        let snapshot = self.rankings.snapshot().await;
        let ranked = snapshot.sorted.len() as i64;

        let (target_url, domain, link_id) = if ranked > 0 && visit <= ranked {
            // Ranked path: Nth visit gets the Nth-best domain
            let entry = &snapshot.sorted[(visit - 1) as usize];
            (
                entry.url.clone(),
                entry.domain.clone(),
                format!("best_{}_{}", entry.domain, entry.post_id),
            )
        } else if ranked == 0 && visit <= self.registry.len() as i64 {
            // No rankings published: walk the registry in declaration
            // order, still preferring a cached best link when one exists
            let domain = self
                .registry
                .get((visit - 1) as usize)
                .ok_or_else(|| anyhow!("registry index {} out of bounds", visit - 1))?;
            match snapshot.best_links.get(&domain.hostname) {
                Some(entry) => (
                    entry.url.clone(),
                    entry.domain.clone(),
                    format!("best_{}_{}", entry.domain, entry.post_id),
                ),
                None => (
                    format!("https://{}/random", domain.hostname),
                    domain.hostname.clone(),
                    format!("fallback_{}", domain.hostname),
                ),
            }
        } else {
            // Spill path: the visitor has seen every ranked domain this
            // hour. Global round-robin over the registry.
            let counter = self.next_spill_counter().await?;
            let index = ((counter - 1) as usize) % self.registry.len();
            let domain = self
                .registry
                .get(index)
                .ok_or_else(|| anyhow!("registry index {} out of bounds", index))?;
            (
                format!("https://{}/random", domain.hostname),
                domain.hostname.clone(),
                format!("random_{}", domain.hostname),
            )
        };

        let inverted = self.registry.is_inverted(&domain);
        let final_url = decorate_url(
            &target_url,
            request.language.as_deref(),
            inverted,
            &request.tracking,
            &link_id,
        )?;

        self.record_click(&link_id);
        self.memo_recent(&request.ip, &final_url);

        Ok(Dispatch {
            final_url,
            link_id,
            visit,
        })
    }

    /// Atomic increment with the 1,000,000 wrap-around.
    async fn next_spill_counter(&self) -> Result<i64> {
        let counter = self.cache.incr(DOMAIN_COUNTER_KEY).await?;
        if counter > DOMAIN_COUNTER_MAX {
            self.cache.set(DOMAIN_COUNTER_KEY, "1").await?;
            return Ok(1);
        }
        Ok(counter)
    }

    /// Fire-and-forget click upsert.
    fn record_click(&self, link_id: &str) {
        let clicks = self.clicks.clone();
        let link_id = link_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = clicks.increment(&link_id).await {
                warn!("⚠️ Click record failed for {}: {}", link_id, e);
            }
        });
    }

    /// Fire-and-forget anti-replay memo (`recent:<ip>`, 5s).
    fn memo_recent(&self, ip: &str, final_url: &str) {
        let cache = self.cache.clone();
        let key = recent_key(ip);
        let url = final_url.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.set_ex(&key, &url, RECENT_TTL_SECONDS).await {
                warn!("⚠️ Anti-replay memo failed for {}: {}", key, e);
            }
        });
    }
}

/// Client IP resolution: first `X-Forwarded-For` token, then the socket
/// peer, then the `unknown` literal.
pub fn client_ip(forwarded_for: Option<&str>, peer: Option<std::net::SocketAddr>) -> String {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}
