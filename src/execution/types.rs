//! Execution types

use crate::config::ExecutionConfig;
use crate::gateway::{OrderSide, OrderStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;

/// Timing and retry parameters for the execution client
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub request_timeout: Duration,
    pub fill_timeout: Duration,
    pub poll_interval: Duration,
    pub cancel_settle: Duration,
    /// Submissions per call, including the first
    pub max_attempts: u32,
}

impl From<&ExecutionConfig> for ExecutionSettings {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            fill_timeout: Duration::from_millis(config.fill_timeout_ms),
            poll_interval: Duration::from_millis(config.fill_poll_interval_ms),
            cancel_settle: Duration::from_millis(config.cancel_settle_ms),
            max_attempts: 2,
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

/// A submitted order awaiting verification
#[derive(Debug, Clone, Serialize)]
pub struct OrderHandle {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    /// Quantity actually submitted, possibly reduced by a retry
    pub qty: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub attempts: u32,
    /// Signed broker position before submission
    pub baseline_qty: Decimal,
    /// Fill reported synchronously by the broker
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
}

/// Result of waiting for a fill
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// Shares confirmed filled (possibly fewer than requested)
    Verified {
        filled_qty: Decimal,
        avg_price: Option<Decimal>,
    },
    /// Nothing confirmed before the deadline
    Unverified,
    /// Order died without filling
    Failed { status: OrderStatus },
}

/// A completed entry or exit
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub qty: Decimal,
    pub price: Decimal,
}
