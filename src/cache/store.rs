//! Freshness-aware market data cache

use super::{CacheContext, CacheEntry, CacheKey, CachedData, Namespace, Priority};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// TTL and priority-aware cache of quotes, bars and account state
///
/// Entries expire strictly by TTL. Critical contexts only see entries written
/// with [`Priority::Critical`] that are younger than `critical_max_age`. Any
/// lock that cannot be taken within `lock_timeout` is reported as a miss.
pub struct MarketDataCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl MarketDataCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Default TTL for a data class
    pub fn ttl_for(&self, namespace: Namespace) -> Duration {
        let ms = match namespace {
            Namespace::Quote => self.config.quote_ttl_ms,
            Namespace::Bars => self.config.bars_ttl_ms,
            Namespace::Position | Namespace::Positions | Namespace::Account => {
                self.config.snapshot_ttl_ms
            }
            Namespace::AccountSummary => self.config.account_summary_ttl_ms,
            Namespace::OrderAvailability => self.config.order_availability_ttl_ms,
        };
        Duration::from_millis(ms)
    }

    /// Current time on the cache clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Oldest source timestamp accepted for a quote
    pub fn max_quote_age(&self) -> Duration {
        Duration::from_millis(self.config.max_quote_age_ms)
    }

    /// Oldest source timestamp accepted for the final bar of a series
    pub fn max_bar_age(&self) -> Duration {
        Duration::from_millis(self.config.max_bar_age_ms)
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lock_timeout_ms)
    }

    /// Look up a fresh entry for the given read context
    pub fn get(&self, key: &CacheKey, context: CacheContext) -> Option<CachedData> {
        let Some(entries) = self.entries.try_read_for(self.lock_timeout()) else {
            telemetry::increment(CounterMetric::CacheLockTimeout);
            tracing::debug!(key = %key, "Cache read lock timed out, treating as miss");
            return None;
        };

        let now = self.clock.now();
        let hit = entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                return None;
            }
            if context.is_critical() {
                let critical_max_age = Duration::from_millis(self.config.critical_max_age_ms);
                if entry.priority != Priority::Critical || entry.age(now) >= critical_max_age {
                    return None;
                }
            }
            Some(entry.data.clone())
        });

        let metric = if hit.is_some() {
            CounterMetric::CacheHit
        } else {
            CounterMetric::CacheMiss
        };
        telemetry::increment_with(metric, "namespace", key.namespace.as_str());
        hit
    }

    /// Store an entry; `ttl` of `None` uses the namespace default
    pub fn set(
        &self,
        key: CacheKey,
        data: CachedData,
        ttl: Option<Duration>,
        priority: Priority,
        source: &str,
    ) {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(key.namespace));
        let entry = CacheEntry {
            key: key.clone(),
            data,
            written_at: self.clock.now(),
            ttl,
            priority,
            source: source.to_string(),
        };

        match self.entries.try_write_for(self.lock_timeout()) {
            Some(mut entries) => {
                entries.insert(key, entry);
            }
            None => {
                telemetry::increment(CounterMetric::CacheLockTimeout);
                tracing::debug!(key = %key, "Cache write lock timed out, entry dropped");
            }
        }
    }

    /// Remove a single key
    pub fn invalidate(&self, key: &CacheKey, reason: &str) -> bool {
        let removed = self.remove_where(|k| k == key);
        if removed > 0 {
            tracing::info!(key = %key, reason, "Cache invalidated");
        }
        removed > 0
    }

    /// Remove every key matching `pattern` (trailing `*` glob)
    pub fn invalidate_pattern(&self, pattern: &str, reason: &str) -> usize {
        let removed = self.remove_where(|k| k.matches(pattern));
        tracing::info!(pattern, reason, removed, "Cache invalidated by pattern");
        removed
    }

    /// Remove everything cached for `symbol`, plus the account-wide snapshots
    /// a position change makes stale
    pub fn invalidate_symbol(&self, symbol: &str, reason: &str) -> usize {
        let symbol = symbol.to_ascii_uppercase();
        let removed = self.remove_where(|k| {
            (k.symbol == symbol && Namespace::PER_SYMBOL.contains(&k.namespace))
                || matches!(k.namespace, Namespace::Positions | Namespace::Account)
        });
        tracing::info!(symbol = %symbol, reason, removed, "Cache invalidated for symbol");
        removed
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let Some(mut entries) = self.entries.try_write_for(self.lock_timeout()) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .try_read_for(self.lock_timeout())
            .map(|e| e.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let Some(mut entries) = self.entries.try_write_for(self.lock_timeout()) else {
            telemetry::increment(CounterMetric::CacheLockTimeout);
            tracing::warn!("Cache invalidation lock timed out");
            return 0;
        };
        let before = entries.len();
        entries.retain(|k, _| !predicate(k));
        let removed = before - entries.len();
        for _ in 0..removed {
            telemetry::increment(CounterMetric::CacheInvalidation);
        }
        removed
    }
}
