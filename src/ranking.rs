//! Ranking model and the in-process fronting cache.
//!
//! The refresher publishes two keys to the shared cache: the best link per
//! domain and the eCPM-descending domain list. Dispatch consults them on
//! every request, so a process-local copy with a short freshness window
//! fronts the shared cache. The two keys are independently versioned;
//! readers never assume their sizes match.

use crate::redis_manager::SharedCache;
use anyhow::Result;
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// JSON of `domain -> {url, postId, ecpm}`, TTL one hour.
pub const BEST_LINKS_MAP_KEY: &str = "redirect:best_links_map";
/// JSON array sorted descending by ecpm, TTL one hour.
pub const SORTED_DOMAINS_KEY: &str = "redirect:sorted_domains";

/// The highest-eCPM post of one publisher domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestLink {
    pub domain: String,
    #[serde(rename = "postId")]
    pub post_id: String,
    pub url: String,
    pub ecpm: f64,
}

/// Insertion-ordered so that eCPM ties stay stable within one refresh.
pub type BestLinkMap = IndexMap<String, BestLink>;

/// Compose the destination URL for a winning post.
pub fn compose_best_url(domain: &str, post_id: &str) -> String {
    format!("https://{}/?p={}", domain, urlencoding::encode(post_id))
}

/// Reduce aggregation rows to the best post per domain.
///
/// Rows with an empty domain or post id are skipped; a missing ecpm reads
/// as 0. A strictly greater ecpm replaces the current winner, so ties keep
/// the first-seen row.
pub fn compute_best_by_domain(rows: &[crate::analytics::AnalyticsRow]) -> BestLinkMap {
    let mut best: BestLinkMap = IndexMap::new();

    for row in rows {
        if row.domain.is_empty() || row.custom_value.is_empty() {
            continue;
        }
        let ecpm = row.ecpm.unwrap_or(0.0);

        let replace = match best.get(&row.domain) {
            None => true,
            Some(current) => ecpm > current.ecpm,
        };
        if replace {
            best.insert(
                row.domain.clone(),
                BestLink {
                    domain: row.domain.clone(),
                    post_id: row.custom_value.clone(),
                    url: compose_best_url(&row.domain, &row.custom_value),
                    ecpm,
                },
            );
        }
    }

    best
}

/// Sort map entries by ecpm descending. The sort is stable, so equal ecpm
/// values keep the map's iteration order.
pub fn sort_by_ecpm(best: &BestLinkMap) -> Vec<BestLink> {
    let mut sorted: Vec<BestLink> = best.values().cloned().collect();
    sorted.sort_by(|a, b| b.ecpm.partial_cmp(&a.ecpm).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Process-local copy of the two ranking keys.
#[derive(Debug, Default)]
pub struct RankingSnapshot {
    pub best_links: BestLinkMap,
    pub sorted: Vec<BestLink>,
    fetched_at: Option<Instant>,
}

impl RankingSnapshot {
    fn is_fresh(&self, window: Duration) -> bool {
        self.fetched_at.map_or(false, |t| t.elapsed() < window)
    }
}

/// Read-through front over the shared cache.
///
/// A snapshot younger than the freshness window is served as-is. On expiry
/// both keys are fetched; a failed or empty fetch keeps the last known copy
/// of that key, which may be arbitrarily stale until a refresh succeeds.
pub struct RankingCache {
    cache: Arc<dyn SharedCache>,
    current: ArcSwap<RankingSnapshot>,
    freshness: Duration,
}

impl RankingCache {
    pub fn new(cache: Arc<dyn SharedCache>, freshness_seconds: u64) -> Self {
        Self {
            cache,
            current: ArcSwap::from_pointee(RankingSnapshot::default()),
            freshness: Duration::from_secs(freshness_seconds),
        }
    }

    /// Current snapshot, refreshed from the shared cache when stale.
    pub async fn snapshot(&self) -> Arc<RankingSnapshot> {
        let current = self.current.load_full();
        if current.is_fresh(self.freshness) {
            return current;
        }

        let map_fetch = self.cache.get(BEST_LINKS_MAP_KEY).await;
        let sorted_fetch = self.cache.get(SORTED_DOMAINS_KEY).await;

        if map_fetch.is_err() && sorted_fetch.is_err() {
            // Cache tier unreachable. Serve the stale copy; the next
            // request retries.
            warn!("⚠️ Ranking fetch failed, serving stale local copy");
            return current;
        }

        let best_links = match map_fetch {
            Ok(Some(raw)) => match serde_json::from_str::<BestLinkMap>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!("⚠️ Corrupt {}: {}", BEST_LINKS_MAP_KEY, e);
                    current.best_links.clone()
                }
            },
            Ok(None) => current.best_links.clone(),
            Err(e) => {
                warn!("⚠️ GET {} failed: {}", BEST_LINKS_MAP_KEY, e);
                current.best_links.clone()
            }
        };

        let sorted = match sorted_fetch {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<BestLink>>(&raw) {
                Ok(list) => list,
                Err(e) => {
                    warn!("⚠️ Corrupt {}: {}", SORTED_DOMAINS_KEY, e);
                    current.sorted.clone()
                }
            },
            Ok(None) => current.sorted.clone(),
            Err(e) => {
                warn!("⚠️ GET {} failed: {}", SORTED_DOMAINS_KEY, e);
                current.sorted.clone()
            }
        };

        let snapshot = Arc::new(RankingSnapshot {
            best_links,
            sorted,
            fetched_at: Some(Instant::now()),
        });
        self.current.store(snapshot.clone());
        debug!(
            "Ranking snapshot refreshed ({} domains ranked)",
            snapshot.sorted.len()
        );
        snapshot
    }

    /// Direct publication by the refresher after a successful cache write.
    pub fn publish(&self, best_links: BestLinkMap, sorted: Vec<BestLink>) {
        self.current.store(Arc::new(RankingSnapshot {
            best_links,
            sorted,
            fetched_at: Some(Instant::now()),
        }));
    }

    /// Last known copy without touching the shared cache.
    pub fn peek(&self) -> Arc<RankingSnapshot> {
        self.current.load_full()
    }
}

/// Serialize both keys for publication.
pub fn serialize_rankings(
    best: &BestLinkMap,
    sorted: &[BestLink],
) -> Result<(String, String)> {
    let map_json = serde_json::to_string(best)?;
    let sorted_json = serde_json::to_string(sorted)?;
    Ok((map_json, sorted_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsRow;

    fn row(domain: &str, post: &str, ecpm: Option<f64>) -> AnalyticsRow {
        AnalyticsRow {
            domain: domain.to_string(),
            custom_value: post.to_string(),
            ecpm,
            ..Default::default()
        }
    }

    #[test]
    fn best_by_domain_keeps_highest_ecpm() {
        let rows = vec![
            row("a.com", "1", Some(5.0)),
            row("a.com", "2", Some(8.0)),
            row("a.com", "3", Some(8.0)), // tie: first-seen wins
            row("b.com", "9", Some(2.0)),
        ];
        let best = compute_best_by_domain(&rows);

        assert_eq!(best.len(), 2);
        assert_eq!(best["a.com"].post_id, "2");
        assert_eq!(best["b.com"].post_id, "9");
        assert_eq!(best["a.com"].url, "https://a.com/?p=2");
    }

    #[test]
    fn best_by_domain_skips_incomplete_rows() {
        let rows = vec![
            row("", "1", Some(5.0)),
            row("a.com", "", Some(5.0)),
            row("a.com", "7", None), // missing ecpm reads as 0
        ];
        let best = compute_best_by_domain(&rows);

        assert_eq!(best.len(), 1);
        assert_eq!(best["a.com"].post_id, "7");
        assert_eq!(best["a.com"].ecpm, 0.0);
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let rows = vec![
            row("a.com", "1", Some(5.0)),
            row("b.com", "2", Some(10.0)),
            row("c.com", "3", Some(5.0)),
        ];
        let best = compute_best_by_domain(&rows);
        let sorted = sort_by_ecpm(&best);

        assert_eq!(sorted[0].domain, "b.com");
        // a.com and c.com tie at 5.0: map insertion order preserved
        assert_eq!(sorted[1].domain, "a.com");
        assert_eq!(sorted[2].domain, "c.com");
    }

    #[test]
    fn post_id_encoding_round_trips_utf8() {
        let post_id = "caça níveis/100%";
        let url = compose_best_url("a.com", post_id);
        let encoded = url.split("?p=").nth(1).unwrap();
        assert_eq!(urlencoding::decode(encoded).unwrap(), post_id);
    }

    #[test]
    fn rankings_serialize_with_post_id_key() {
        let rows = vec![row("a.com", "42", Some(1.5))];
        let best = compute_best_by_domain(&rows);
        let (map_json, sorted_json) = serialize_rankings(&best, &sort_by_ecpm(&best)).unwrap();

        assert!(map_json.contains("\"postId\":\"42\""));
        assert!(sorted_json.starts_with('['));

        let back: BestLinkMap = serde_json::from_str(&map_json).unwrap();
        assert_eq!(back["a.com"].post_id, "42");
    }
}
