//! Signal filtering

use super::Signal;
use crate::config::SignalConfig;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of applying filters to a signal
#[derive(Debug, Clone)]
pub enum FilterResult {
    /// Signal passed all filters
    Pass,
    /// Signal rejected
    Reject(RejectReason),
}

impl FilterResult {
    /// Whether the signal passed
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }
}

/// Reason for signal rejection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Confidence below the configured minimum
    ConfidenceTooLow(Decimal),
    /// Signal older than the maximum allowed age
    Stale(i64),
    /// Entry price not positive
    InvalidPrice(Decimal),
    /// Proposed stop on the wrong side of entry
    InvalidStop(Decimal),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::ConfidenceTooLow(c) => write!(f, "confidence {c} below minimum"),
            RejectReason::Stale(age) => write!(f, "signal stale ({age}ms old)"),
            RejectReason::InvalidPrice(p) => write!(f, "invalid entry price {p}"),
            RejectReason::InvalidStop(s) => write!(f, "stop {s} on wrong side of entry"),
        }
    }
}

/// Configuration for signal filters
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum confidence required to act
    pub min_confidence: Decimal,
    /// Maximum age of a signal at evaluation time
    pub max_signal_age: Duration,
}

impl From<&SignalConfig> for FilterConfig {
    fn from(config: &SignalConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            max_signal_age: Duration::milliseconds(config.max_signal_age_ms),
        }
    }
}

/// Signal filter chain applied before risk admission
pub struct SignalFilter {
    config: FilterConfig,
}

impl SignalFilter {
    /// Create a new signal filter with given configuration
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Apply all filters to a signal
    pub fn apply(&self, signal: &Signal, now: DateTime<Utc>) -> FilterResult {
        if signal.confidence < self.config.min_confidence {
            return FilterResult::Reject(RejectReason::ConfidenceTooLow(signal.confidence));
        }

        let age = now - signal.timestamp;
        if age > self.config.max_signal_age {
            return FilterResult::Reject(RejectReason::Stale(age.num_milliseconds()));
        }

        if signal.entry_price <= Decimal::ZERO {
            return FilterResult::Reject(RejectReason::InvalidPrice(signal.entry_price));
        }

        if let Some(stop) = signal.stop_price {
            let risk = (signal.entry_price - stop) * signal.side.sign();
            if risk <= Decimal::ZERO {
                return FilterResult::Reject(RejectReason::InvalidStop(stop));
            }
        }

        FilterResult::Pass
    }
}
