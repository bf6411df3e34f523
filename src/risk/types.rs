//! Risk management types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason a position may not be opened
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RiskViolation {
    /// Trading paused after a loss streak
    #[error("global pause active until {until}")]
    GlobalPause { until: DateTime<Utc> },
    /// Maximum concurrent positions reached
    #[error("maximum positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },
    /// Daily realized loss limit hit
    #[error("daily loss limit reached (pnl {pnl}, limit -{limit})")]
    DailyLossLimit { pnl: Decimal, limit: Decimal },
    /// Opening this short would exceed the short exposure cap
    #[error("short exposure {projected} would exceed {max}")]
    ShortExposure { projected: Decimal, max: Decimal },
    /// Not enough buying power
    #[error("requires {required} buying power, {allowed} allowed")]
    BuyingPower { required: Decimal, allowed: Decimal },
    /// Position notional too large
    #[error("position notional {notional} exceeds {max}")]
    PositionTooLarge { notional: Decimal, max: Decimal },
    /// Nothing to buy
    #[error("quantity {0} is not positive")]
    InvalidQuantity(Decimal),
}

/// Outcome of a non-fatal admission check
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Approved,
    Denied(RiskViolation),
}

impl Admission {
    pub fn is_approved(&self) -> bool {
        matches!(self, Admission::Approved)
    }
}
