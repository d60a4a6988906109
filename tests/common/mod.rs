//! In-memory implementations of the cache and store contracts, with
//! switchable fault injection. These stand in for Redis and MongoDB so the
//! dispatch and refresher flows can be exercised end-to-end in-process.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use mongodb::bson::DateTime;
use redron_dispatcher::analytics::{
    AnalyticsRepository, AnalyticsRow, BestPostQuery, GamTotals,
};
use redron_dispatcher::click_recorder::{ClickCounter, ClickSink};
use redron_dispatcher::dispatch::DispatchEngine;
use redron_dispatcher::domains::{DomainRegistry, DomainsConfig};
use redron_dispatcher::link_store::{LinkRecord, LinkStore};
use redron_dispatcher::ranking::RankingCache;
use redron_dispatcher::redis_manager::SharedCache;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------- cache

#[derive(Default)]
pub struct MemoryCache {
    data: Mutex<HashMap<String, String>>,
    /// TTLs recorded by set_ex / expire, keyed like the data.
    pub ttls: Mutex<HashMap<String, i64>>,
    pub fail_gets: AtomicBool,
    pub fail_incrs: AtomicBool,
    /// set_ex fails for exactly these keys (partial-write injection).
    pub fail_set_ex_keys: Mutex<HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn ttl_of(&self, key: &str) -> Option<i64> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    pub fn fail_set_ex_for(&self, key: &str) {
        self.fail_set_ex_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            bail!("injected GET failure");
        }
        Ok(self.value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        if self.fail_set_ex_keys.lock().unwrap().contains(key) {
            bail!("injected SETEX failure for {}", key);
        }
        self.insert(key, value);
        self.ttls
            .lock()
            .unwrap()
            .insert(key.to_string(), ttl_seconds as i64);
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        if self.fail_incrs.load(Ordering::SeqCst) {
            bail!("injected INCR failure");
        }
        let mut data = self.data.lock().unwrap();
        let next = data
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        data.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<()> {
        self.ttls
            .lock()
            .unwrap()
            .insert(key.to_string(), ttl_seconds);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ------------------------------------------------------------ analytics

#[derive(Default)]
pub struct MemoryAnalytics {
    pub rows: Mutex<Vec<AnalyticsRow>>,
    pub fail: AtomicBool,
}

impl MemoryAnalytics {
    pub fn with_rows(rows: Vec<AnalyticsRow>) -> Arc<Self> {
        let repo = Self::default();
        *repo.rows.lock().unwrap() = rows;
        Arc::new(repo)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryAnalytics {
    async fn best_post_rows(&self, query: &BestPostQuery) -> Result<Vec<AnalyticsRow>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected analytics failure");
        }
        // Pre-aggregated fixture rows, scoped to the queried domains
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| query.domains.contains(&r.domain))
            .cloned()
            .collect())
    }

    async fn distinct_values(&self, field: &str) -> Result<Vec<String>> {
        let rows = self.rows.lock().unwrap();
        let mut values: Vec<String> = rows
            .iter()
            .map(|r| match field {
                "date" => r.date.clone(),
                "domain" => r.domain.clone(),
                "custom_key" => r.custom_key.clone(),
                _ => r.custom_value.clone(),
            })
            .filter(|v| !v.is_empty())
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    async fn daily_totals(&self, date: &str) -> Result<GamTotals> {
        let rows = self.rows.lock().unwrap();
        let matching: Vec<_> = rows.iter().filter(|r| r.date == date).collect();
        let sum = |f: fn(&AnalyticsRow) -> Option<f64>| -> f64 {
            matching.iter().map(|r| f(r).unwrap_or(0.0)).sum()
        };
        Ok(GamTotals::from_sums(
            sum(|r| r.impressions),
            sum(|r| r.clicks),
            sum(|r| r.revenue),
        ))
    }
}

// ------------------------------------------------------------ link store

#[derive(Default)]
pub struct MemoryLinkStore {
    pub records: Mutex<Vec<LinkRecord>>,
    pub fail: AtomicBool,
}

impl MemoryLinkStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active(&self) -> Vec<LinkRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<LinkRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn deactivate_all(&self) -> Result<u64> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected link store failure");
        }
        let mut records = self.records.lock().unwrap();
        let mut retired = 0;
        for record in records.iter_mut().filter(|r| r.status) {
            record.status = false;
            record.updated_at = DateTime::now();
            retired += 1;
        }
        Ok(retired)
    }

    async fn upsert_active(&self, domain: &str, url: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected link store failure");
        }
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.domain == domain && r.url == url)
        {
            record.status = true;
            record.updated_at = DateTime::now();
        } else {
            records.push(LinkRecord {
                id: None,
                domain: domain.to_string(),
                url: url.to_string(),
                status: true,
                created_at: DateTime::now(),
                updated_at: DateTime::now(),
            });
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LinkRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
}

// ------------------------------------------------------------ click sink

#[derive(Default)]
pub struct MemoryClickSink {
    pub counts: Mutex<HashMap<String, i64>>,
    pub fail: AtomicBool,
}

impl MemoryClickSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, link_id: &str) -> i64 {
        self.counts.lock().unwrap().get(link_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ClickSink for MemoryClickSink {
    async fn increment(&self, link_id: &str) -> Result<ClickCounter> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("injected click sink failure");
        }
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(link_id.to_string()).or_insert(0);
        *count += 1;
        Ok(ClickCounter {
            id: None,
            link_id: link_id.to_string(),
            count: *count,
            created_at: DateTime::now(),
        })
    }

    async fn list_counters(&self) -> Result<Vec<ClickCounter>> {
        let counts = self.counts.lock().unwrap();
        let mut counters: Vec<ClickCounter> = counts
            .iter()
            .map(|(link_id, count)| ClickCounter {
                id: None,
                link_id: link_id.clone(),
                count: *count,
                created_at: DateTime::now(),
            })
            .collect();
        counters.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(counters)
    }
}

// --------------------------------------------------------------- wiring

pub fn registry_of(hosts: &[&str], inverted: &[&str]) -> Arc<DomainRegistry> {
    Arc::new(DomainRegistry::new(&DomainsConfig {
        registry: hosts.iter().map(|s| s.to_string()).collect(),
        inverted: inverted.iter().map(|s| s.to_string()).collect(),
    }))
}

pub struct TestRig {
    pub cache: Arc<MemoryCache>,
    pub rankings: Arc<RankingCache>,
    pub registry: Arc<DomainRegistry>,
    pub clicks: Arc<MemoryClickSink>,
    pub engine: DispatchEngine,
}

/// Engine over in-memory stores, with a zero-second freshness window so
/// every dispatch reads through to the (in-memory) shared cache.
pub fn engine_rig(hosts: &[&str], inverted: &[&str]) -> TestRig {
    let cache = MemoryCache::new();
    let registry = registry_of(hosts, inverted);
    let clicks = MemoryClickSink::new();
    let rankings = Arc::new(RankingCache::new(cache.clone(), 0));
    let engine = DispatchEngine::new(
        cache.clone(),
        rankings.clone(),
        registry.clone(),
        clicks.clone(),
    );
    TestRig {
        cache,
        rankings,
        registry,
        clicks,
        engine,
    }
}

/// Give spawned fire-and-forget tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
