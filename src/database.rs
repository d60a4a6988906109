//! Document store wiring.
//!
//! Connects the Mongo client, exposes the collection names used by the
//! dispatcher and creates the indexes the click accounting relies on.

use anyhow::{Context, Result};
use log::info;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};

/// Analytics rows produced by the upstream ETL. Read-only to this system.
pub const ANALYTICS_COLLECTION: &str = "analytics";
/// Currently-active best links, reconciled by the refresher.
pub const LINKS_COLLECTION: &str = "redirects_links";
/// Aggregated click counters, upserted by every replica.
pub const CLICKS_COLLECTION: &str = "redirects_clicks";

/// Connect to the document store and return a database handle.
pub async fn connect(url: &str, database: &str) -> Result<Database> {
    let client = Client::with_uri_str(url)
        .await
        .context("Failed to create MongoDB client")?;

    let db = client.database(database);

    // Fail fast on an unreachable store
    db.run_command(doc! { "ping": 1 })
        .await
        .context("MongoDB ping failed")?;

    info!("✅ MongoDB connected ({})", database);

    Ok(db)
}

/// Create the unique index on `redirects_clicks.link_id`.
///
/// The index is what makes concurrent first-time upserts for the same
/// link id collapse into a single document instead of creating duplicates.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let clicks = db.collection::<mongodb::bson::Document>(CLICKS_COLLECTION);

    let model = IndexModel::builder()
        .keys(doc! { "link_id": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();

    clicks
        .create_index(model)
        .await
        .context("Failed to create unique index on redirects_clicks.link_id")?;

    let links = db.collection::<mongodb::bson::Document>(LINKS_COLLECTION);
    let model = IndexModel::builder()
        .keys(doc! { "domain": 1, "url": 1 })
        .build();
    links
        .create_index(model)
        .await
        .context("Failed to create index on redirects_links")?;

    Ok(())
}

/// Liveness probe used by the detailed health endpoint.
pub async fn ping(db: &Database) -> Result<()> {
    db.run_command(doc! { "ping": 1 })
        .await
        .context("MongoDB ping failed")?;
    Ok(())
}
