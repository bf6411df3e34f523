//! Market data cache module
//!
//! A freshness-aware cache in front of the brokerage gateway. Trading
//! decisions read through [`MarketData`] with a [`CacheContext`]; critical
//! contexts never act on anything older than a second.

mod service;
mod store;
mod types;

pub use service::MarketData;
pub use store::MarketDataCache;
pub use types::{CacheContext, CacheEntry, CacheKey, CachedData, Namespace, Priority};
