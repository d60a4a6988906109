//! Persisted best-link records.
//!
//! The refresher is the only writer: every refresh first retires all active
//! records, then re-activates one record per (domain, url) winner. The
//! collection is reporting-facing only; the shared cache is what dispatch
//! actually reads.

use crate::database::LINKS_COLLECTION;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub domain: String,
    pub url: String,
    pub status: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Retire every currently-active record. Returns the number touched.
    async fn deactivate_all(&self) -> Result<u64>;

    /// Activate (or create) the record for this (domain, url) pair.
    async fn upsert_active(&self, domain: &str, url: &str) -> Result<()>;

    /// All records, most recently updated first.
    async fn list(&self) -> Result<Vec<LinkRecord>>;
}

pub struct MongoLinkStore {
    collection: Collection<LinkRecord>,
}

impl MongoLinkStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(LINKS_COLLECTION),
        }
    }
}

#[async_trait]
impl LinkStore for MongoLinkStore {
    async fn deactivate_all(&self) -> Result<u64> {
        let result = self
            .collection
            .update_many(
                doc! { "status": true },
                doc! { "$set": { "status": false, "updated_at": DateTime::now() } },
            )
            .await
            .context("Failed to deactivate link records")?;
        Ok(result.modified_count)
    }

    async fn upsert_active(&self, domain: &str, url: &str) -> Result<()> {
        self.collection
            .update_one(
                doc! { "domain": domain, "url": url },
                doc! {
                    "$set": { "status": true, "updated_at": DateTime::now() },
                    "$setOnInsert": { "created_at": DateTime::now() },
                },
            )
            .upsert(true)
            .await
            .with_context(|| format!("Failed to upsert link record for {}", domain))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LinkRecord>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "updated_at": -1 })
            .await
            .context("Failed to list link records")?;

        let records = cursor
            .try_collect()
            .await
            .context("Failed to read link records cursor")?;
        Ok(records)
    }
}
