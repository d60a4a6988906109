use crate::domains::DomainsConfig;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub port: u16,
    pub cors_origin: String,
    /// Runtime environment label ("production", "development", ...).
    /// Development mode adds error detail to JSON error bodies.
    pub run_env: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_origin: default_cors_origin(),
            run_env: default_run_env(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_cors_origin() -> String {
    "*".to_string()
}
fn default_run_env() -> String {
    "production".to_string()
}

/// Backing store endpoints. Both are optional: when either is missing the
/// service starts in degraded mode (health endpoints only).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Stores {
    pub mongodb_url: Option<String>,
    pub redis_url: Option<String>,
    pub database: String,
}

impl Default for Stores {
    fn default() -> Self {
        Self {
            mongodb_url: None,
            redis_url: None,
            database: default_database(),
        }
    }
}

fn default_database() -> String {
    "redron".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Cluster {
    pub enabled: bool,
    pub worker_count: usize,
    /// Only the primary replica runs the ranking refresher. A multi-replica
    /// deployment sets this to false on all but one process.
    pub primary: bool,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            worker_count: num_cpus::get(),
            primary: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Refresher {
    /// Local-time cron schedule. One firing at minute 30 of every hour.
    pub cron: String,
    /// TTL for both ranking keys in the shared cache.
    pub ranking_ttl_seconds: u64,
    /// Freshness window of the in-process ranking copy.
    pub local_freshness_seconds: u64,
    /// Analytics grouping key identifying publisher posts.
    pub custom_key: String,
}

impl Default for Refresher {
    fn default() -> Self {
        Self {
            cron: default_refresher_cron(),
            ranking_ttl_seconds: default_ranking_ttl_seconds(),
            local_freshness_seconds: default_local_freshness_seconds(),
            custom_key: default_custom_key(),
        }
    }
}

fn default_refresher_cron() -> String {
    "30 * * * *".to_string()
}
fn default_ranking_ttl_seconds() -> u64 {
    3600
}
fn default_local_freshness_seconds() -> u64 {
    60
}
fn default_custom_key() -> String {
    "id_post_wp".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: Server,
    pub stores: Stores,
    pub cluster: Cluster,
    pub refresher: Refresher,
    pub domains: DomainsConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides (the deployment contract)
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.trim().parse() {
                settings.server.port = port;
            }
        }
        if let Ok(run_env) = env::var("NODE_ENV") {
            if !run_env.trim().is_empty() {
                settings.server.run_env = run_env.trim().to_string();
            }
        }
        if let Ok(origin) = env::var("CORS_ORIGIN") {
            if !origin.trim().is_empty() {
                settings.server.cors_origin = origin.trim().to_string();
            }
        }
        if let Ok(url) = env::var("MONGODB_URL") {
            if !url.trim().is_empty() {
                settings.stores.mongodb_url = Some(url.trim().to_string());
            }
        }
        if let Ok(url) = env::var("REDIS_URL") {
            if !url.trim().is_empty() {
                settings.stores.redis_url = Some(url.trim().to_string());
            }
        }
        if let Ok(raw) = env::var("CLUSTER_ENABLED") {
            settings.cluster.enabled = parse_bool(&raw, settings.cluster.enabled);
        }
        if let Ok(raw) = env::var("WORKER_COUNT") {
            if let Ok(count) = raw.trim().parse::<usize>() {
                if count > 0 {
                    settings.cluster.worker_count = count;
                }
            }
        }

        Ok(settings)
    }

    pub fn is_development(&self) -> bool {
        self.server.run_env == "development"
    }
}

fn parse_bool(raw: &str, fallback: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}
