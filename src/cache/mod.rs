//! Offline caching for the dashboard client.
//!
//! This module intercepts outbound requests and:
//! - Classifies each by URL into API data, static assets, or navigations
//! - Serves API data stale-while-revalidate behind a 24-hour freshness gate
//! - Serves static assets cache-first, refreshing them in the background
//! - Falls back to the cached app shell when a navigation fails offline
//! - Drops partitions from older versions on activation

mod layer;
mod policy;
mod storage;
mod traits;

#[cfg(test)]
pub(crate) use layer::testing;
pub use layer::{Interceptor, Lifecycle, PartitionNames, ASSET_OFFLINE_BODY, OFFLINE_BODY};
pub use policy::{Classifier, Freshness, RequestClass};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{Request, Response, CACHED_AT_HEADER};
