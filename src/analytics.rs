//! Analytics repository.
//!
//! Read-only access to the analytics collection. The upstream ETL writes
//! loose records whose numeric fields arrive either as numbers or as
//! string-encoded numbers; everything is converted to `Option<f64>` once,
//! at ingest, so the rest of the system never sees a stringly-typed value.

use crate::database::ANALYTICS_COLLECTION;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Collection, Database};
use serde::{Deserialize, Deserializer, Serialize};

/// One aggregated analytics row: a (domain, post) pair for a given day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsRow {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub custom_key: String,
    /// Post id under the `id_post_wp` grouping key.
    #[serde(default)]
    pub custom_value: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub impressions: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub clicks: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub revenue: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub ecpm: Option<f64>,
}

/// Query shape for the best-post aggregation. One day, one grouping key,
/// scoped to the registry domains.
#[derive(Debug, Clone)]
pub struct BestPostQuery {
    /// YYYY-MM-DD, start = end = this date.
    pub date: String,
    pub domains: Vec<String>,
    pub custom_key: String,
}

/// Daily totals for the stats endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GamTotals {
    pub impressions: f64,
    pub clicks: f64,
    pub revenue: f64,
    pub ecpm: f64,
    pub ctr: f64,
}

impl GamTotals {
    pub fn from_sums(impressions: f64, clicks: f64, revenue: f64) -> Self {
        let ecpm = if impressions > 0.0 {
            revenue / impressions * 1000.0
        } else {
            0.0
        };
        let ctr = if impressions > 0.0 {
            clicks / impressions * 100.0
        } else {
            0.0
        };
        Self {
            impressions,
            clicks,
            revenue,
            ecpm,
            ctr,
        }
    }
}

/// Fields accepted by the distinct-values reporting endpoint.
pub const DISTINCT_FIELDS: &[&str] = &["date", "domain", "custom_key", "custom_value"];

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Grouped (domain, custom_key, custom_value) rows with summed metrics
    /// and a computed ecpm, for the query's single day.
    async fn best_post_rows(&self, query: &BestPostQuery) -> Result<Vec<AnalyticsRow>>;

    /// Distinct values of a whitelisted field across the collection.
    async fn distinct_values(&self, field: &str) -> Result<Vec<String>>;

    /// Summed metrics for one day across all domains.
    async fn daily_totals(&self, date: &str) -> Result<GamTotals>;
}

pub struct MongoAnalyticsRepository {
    collection: Collection<Document>,
}

impl MongoAnalyticsRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(ANALYTICS_COLLECTION),
        }
    }
}

#[async_trait]
impl AnalyticsRepository for MongoAnalyticsRepository {
    async fn best_post_rows(&self, query: &BestPostQuery) -> Result<Vec<AnalyticsRow>> {
        // $toDouble tolerates string-encoded numbers written by the ETL;
        // rows without impressions sum as 0.
        let pipeline = vec![
            doc! { "$match": {
                "date": { "$gte": &query.date, "$lte": &query.date },
                "domain": { "$in": &query.domains },
                "custom_key": &query.custom_key,
            }},
            doc! { "$group": {
                "_id": {
                    "domain": "$domain",
                    "custom_key": "$custom_key",
                    "custom_value": "$custom_value",
                },
                "impressions": { "$sum": { "$toDouble": { "$ifNull": ["$impressions", 0] } } },
                "clicks": { "$sum": { "$toDouble": { "$ifNull": ["$clicks", 0] } } },
                "revenue": { "$sum": { "$toDouble": { "$ifNull": ["$revenue", 0] } } },
            }},
            doc! { "$project": {
                "_id": 0,
                "domain": "$_id.domain",
                "custom_key": "$_id.custom_key",
                "custom_value": "$_id.custom_value",
                "impressions": 1,
                "clicks": 1,
                "revenue": 1,
                "ecpm": { "$cond": [
                    { "$gt": ["$impressions", 0] },
                    { "$multiply": [{ "$divide": ["$revenue", "$impressions"] }, 1000] },
                    0,
                ]},
            }},
        ];

        let mut cursor = self
            .collection
            .aggregate(pipeline)
            .await
            .context("Analytics aggregation failed")?;

        let mut rows = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .context("Failed to read analytics cursor")?
        {
            match mongodb::bson::from_document::<AnalyticsRow>(document) {
                Ok(row) => rows.push(row),
                Err(e) => log::warn!("⚠️ Skipping malformed analytics row: {}", e),
            }
        }

        Ok(rows)
    }

    async fn distinct_values(&self, field: &str) -> Result<Vec<String>> {
        let values = self
            .collection
            .distinct(field, doc! {})
            .await
            .with_context(|| format!("distinct({}) failed", field))?;

        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                Bson::Int32(n) => Some(n.to_string()),
                Bson::Int64(n) => Some(n.to_string()),
                Bson::Double(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    async fn daily_totals(&self, date: &str) -> Result<GamTotals> {
        let pipeline = vec![
            doc! { "$match": { "date": date } },
            doc! { "$group": {
                "_id": Bson::Null,
                "impressions": { "$sum": { "$toDouble": { "$ifNull": ["$impressions", 0] } } },
                "clicks": { "$sum": { "$toDouble": { "$ifNull": ["$clicks", 0] } } },
                "revenue": { "$sum": { "$toDouble": { "$ifNull": ["$revenue", 0] } } },
            }},
        ];

        let mut cursor = self
            .collection
            .aggregate(pipeline)
            .await
            .context("Daily totals aggregation failed")?;

        if let Some(document) = cursor
            .try_next()
            .await
            .context("Failed to read totals cursor")?
        {
            let get = |field: &str| {
                document
                    .get(field)
                    .and_then(|v| match v {
                        Bson::Double(n) => Some(*n),
                        Bson::Int32(n) => Some(*n as f64),
                        Bson::Int64(n) => Some(*n as f64),
                        _ => None,
                    })
                    .unwrap_or(0.0)
            };
            Ok(GamTotals::from_sums(
                get("impressions"),
                get("clicks"),
                get("revenue"),
            ))
        } else {
            Ok(GamTotals::default())
        }
    }
}

/// Accepts a number, a string-encoded number, or nothing.
fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Float(f64),
        Int(i64),
        Text(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(Raw::Float(n)) => Some(n),
        Some(Raw::Int(n)) => Some(n as f64),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
    })
}
