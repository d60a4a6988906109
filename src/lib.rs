//! # Redron Dispatcher
//!
//! An ad-traffic redirect dispatcher for the edge of a publisher network.
//! Every inbound visitor is routed to one of several publisher domains,
//! preferring the post currently producing the highest effective CPM.
//!
//! ## Overview
//!
//! Three decoupled pieces make the system work:
//!
//! - **Ranking refresher**: a scheduled aggregation over the analytics
//!   collection computing the best post per domain and the eCPM-descending
//!   domain list, published to the shared cache with a one-hour TTL.
//! - **Dispatch engine**: visitor-scoped sequential assignment across the
//!   ranked domains, with a `/random` spill once a visitor has traversed
//!   every ranked domain in the current hour.
//! - **Click accounting**: monotonic per-link counters and per-visitor
//!   cursors with hourly expiry, all coordination flowing through the
//!   shared cache.
//!
//! Thin adapters wrap the cache and document-store clients; the process
//! entry point wires everything together and decides whether this replica
//! is the primary (the only one that runs the refresher).

// Core dispatch path
/// Per-request selection algorithm
pub mod dispatch;
/// Publisher domain registry
pub mod domains;
/// Ranking model and in-process fronting cache
pub mod ranking;
/// Language prefix and UTM decoration
pub mod url_decorator;

// Background work
/// Scheduled ranking refresher
pub mod refresher;

// Data adapters
/// Analytics repository (read-only aggregation access)
pub mod analytics;
/// Click counter upserts
pub mod click_recorder;
/// Document store wiring and indexes
pub mod database;
/// Persisted best-link records
pub mod link_store;
/// Shared cache contract and Redis implementation
pub mod redis_manager;

// HTTP surface
/// Error mapping for the reporting endpoints
pub mod error;
/// Request handlers
pub mod handlers;
/// Router and serve loop
pub mod server;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use dispatch::DispatchEngine;
pub use domains::DomainRegistry;
pub use ranking::RankingCache;
pub use redis_manager::{RedisManager, SharedCache};
pub use refresher::RankingRefresher;
pub use settings::Settings;
