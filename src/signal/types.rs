//! Signal types

use crate::gateway::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Profit when price rises
    Long,
    /// Profit when price falls
    Short,
}

impl Side {
    /// The other direction
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Order side that opens a position in this direction
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens a position in this direction
    pub fn exit_order_side(self) -> OrderSide {
        self.entry_order_side().opposite()
    }

    /// Lowercase label for logs and records
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directional trade signal emitted by a strategy
///
/// Immutable once created. The engine consumes or rejects each signal exactly
/// once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal identifier
    pub id: Uuid,
    /// Instrument symbol
    pub symbol: String,
    /// Trade direction
    pub side: Side,
    /// Producing strategy
    pub strategy_id: String,
    /// Confidence in [0, 1]
    pub confidence: Decimal,
    /// Proposed entry price
    pub entry_price: Decimal,
    /// Strategy-proposed stop price, if any
    pub stop_price: Option<Decimal>,
    /// Strategy-proposed profit target, if any
    pub target_price: Option<Decimal>,
    /// Signal generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal stamped with the current time
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        strategy_id: impl Into<String>,
        confidence: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            strategy_id: strategy_id.into(),
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            entry_price,
            stop_price: None,
            target_price: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a proposed stop price
    pub fn with_stop(mut self, stop_price: Decimal) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    /// Attach a proposed profit target
    pub fn with_target(mut self, target_price: Decimal) -> Self {
        self.target_price = Some(target_price);
        self
    }

    /// Override the generation timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
