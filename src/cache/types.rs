//! Cache types

use crate::gateway::{Account, Bar, BrokerPosition, Quote};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Class of cached data, each with its own default TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Quote,
    Bars,
    /// Single-symbol position snapshot
    Position,
    /// Full position list
    Positions,
    /// Account snapshot used for risk and sizing
    Account,
    /// Account summary for display
    AccountSummary,
    /// Shares available to close
    OrderAvailability,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Quote => "quote",
            Namespace::Bars => "bars",
            Namespace::Position => "position",
            Namespace::Positions => "positions",
            Namespace::Account => "account",
            Namespace::AccountSummary => "account_summary",
            Namespace::OrderAvailability => "order_availability",
        }
    }

    /// Namespaces keyed by symbol
    pub const PER_SYMBOL: [Namespace; 4] = [
        Namespace::Quote,
        Namespace::Bars,
        Namespace::Position,
        Namespace::OrderAvailability,
    ];
}

/// Typed cache key, rendered as `namespace:SYMBOL`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: Namespace,
    /// Upper-cased symbol; empty for account-wide entries
    pub symbol: String,
}

impl CacheKey {
    pub fn new(namespace: Namespace, symbol: &str) -> Self {
        Self {
            namespace,
            symbol: symbol.to_ascii_uppercase(),
        }
    }

    /// Key for an account-wide entry
    pub fn global(namespace: Namespace) -> Self {
        Self {
            namespace,
            symbol: String::new(),
        }
    }

    pub fn quote(symbol: &str) -> Self {
        Self::new(Namespace::Quote, symbol)
    }

    pub fn bars(symbol: &str) -> Self {
        Self::new(Namespace::Bars, symbol)
    }

    pub fn position(symbol: &str) -> Self {
        Self::new(Namespace::Position, symbol)
    }

    pub fn order_availability(symbol: &str) -> Self {
        Self::new(Namespace::OrderAvailability, symbol)
    }

    /// Whether this key matches `pattern`, which may end in `*`
    pub fn matches(&self, pattern: &str) -> bool {
        let rendered = self.to_string();
        match pattern.strip_suffix('*') {
            Some(prefix) => rendered.starts_with(prefix),
            None => rendered == pattern,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.symbol.is_empty() {
            f.write_str(self.namespace.as_str())
        } else {
            write!(f, "{}:{}", self.namespace.as_str(), self.symbol)
        }
    }
}

/// Entry priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    /// Eligible for critical contexts while sub-second fresh
    Critical,
}

/// Why the caller is reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheContext {
    SignalGeneration,
    Monitoring,
    OrderExecution,
    PositionClose,
    RiskCheck,
    StopLossCheck,
}

impl CacheContext {
    /// Contexts that must act on live data
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            CacheContext::OrderExecution
                | CacheContext::PositionClose
                | CacheContext::RiskCheck
                | CacheContext::StopLossCheck
        )
    }
}

/// Cached payload
#[derive(Debug, Clone)]
pub enum CachedData {
    Quote(Quote),
    Bars(Vec<Bar>),
    Position(Option<BrokerPosition>),
    Positions(Vec<BrokerPosition>),
    Account(Account),
    Shares(Decimal),
}

/// A cache slot
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: CachedData,
    pub written_at: DateTime<Utc>,
    pub ttl: Duration,
    pub priority: Priority,
    /// Where the data came from, e.g. "rest" or "paper"
    pub source: String,
}

impl CacheEntry {
    /// Age at `now`, zero if the clock moved backwards
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.ttl
    }
}
