// Redis Manager - shared cache & coordination layer for the dispatcher.
// Holds the ranking keys, visitor cursors and the round-robin spill counter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use log::info;

/// Contract over the remote key-value store.
///
/// The dispatcher only ever needs this narrow slice: GET, SET with expiry,
/// plain SET, atomic INCR, EXPIRE and PING. Tests substitute an in-memory
/// implementation.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

/// Configuration for the Redis connection.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Shared cache backed by a multiplexed Redis connection.
pub struct RedisManager {
    conn: ConnectionManager,
    config: RedisConfig,
}

impl RedisManager {
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("✅ Redis connected to {}", config.url);

        Ok(Self { conn, config })
    }

    pub async fn new_default() -> Result<Self> {
        Self::new(RedisConfig::default()).await
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl SharedCache for RedisManager {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("GET {} failed", key))?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .with_context(|| format!("SETEX {} failed", key))?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .with_context(|| format!("SET {} failed", key))?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn
            .incr(key, 1i64)
            .await
            .with_context(|| format!("INCR {} failed", key))?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_seconds)
            .await
            .with_context(|| format!("EXPIRE {} failed", key))?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;

        if pong == "PONG" {
            Ok(())
        } else {
            anyhow::bail!("Unexpected Redis response: {}", pong)
        }
    }
}
