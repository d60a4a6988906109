//! Click accounting.
//!
//! One counter document per link id, upserted atomically on every dispatch.
//! The unique index on `link_id` (created at startup) guarantees concurrent
//! first-time writes collapse into a single document.

use crate::database::CLICKS_COLLECTION;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickCounter {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub link_id: String,
    pub count: i64,
    pub created_at: DateTime,
}

#[async_trait]
pub trait ClickSink: Send + Sync {
    /// Atomically increment the counter for `link_id`, creating it at 1 on
    /// first sight. Returns the post-increment document.
    async fn increment(&self, link_id: &str) -> Result<ClickCounter>;

    /// All counters, highest count first. Used by the stats endpoint; the
    /// collection holds one document per link id ever dispatched, so it
    /// stays small.
    async fn list_counters(&self) -> Result<Vec<ClickCounter>>;
}

pub struct MongoClickSink {
    collection: Collection<ClickCounter>,
}

impl MongoClickSink {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(CLICKS_COLLECTION),
        }
    }
}

#[async_trait]
impl ClickSink for MongoClickSink {
    async fn increment(&self, link_id: &str) -> Result<ClickCounter> {
        let counter = self
            .collection
            .find_one_and_update(
                doc! { "link_id": link_id },
                doc! {
                    "$inc": { "count": 1i64 },
                    "$setOnInsert": { "created_at": DateTime::now() },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .with_context(|| format!("Failed to record click for {}", link_id))?
            .context("Upsert returned no document")?;

        Ok(counter)
    }

    async fn list_counters(&self) -> Result<Vec<ClickCounter>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "count": -1 })
            .await
            .context("Failed to list click counters")?;

        let counters = cursor
            .try_collect()
            .await
            .context("Failed to read click counters cursor")?;
        Ok(counters)
    }
}
