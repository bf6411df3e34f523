//! Risk-based position sizing
//!
//! Shares are sized so that a stop-out loses `account_risk_pct` of equity,
//! then clamped to notional and share limits.

use crate::config::SizingConfig;
use crate::gateway::OrderSide;
use rust_decimal::{Decimal, RoundingStrategy};

/// Fixed-fractional risk sizer
#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: SizingConfig,
}

impl RiskSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Whole shares to trade
    ///
    /// `available_shares` caps an order that closes a position at what the
    /// broker will release; opening orders, short sells included, ignore it.
    /// Zero risk distance or a non-positive price yields zero.
    pub fn size(
        &self,
        entry: Decimal,
        stop: Decimal,
        side: OrderSide,
        equity: Decimal,
        is_closing: bool,
        available_shares: Option<Decimal>,
    ) -> Decimal {
        let distance = (entry - stop).abs();
        if distance.is_zero() || entry <= Decimal::ZERO || equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let raw = (equity * self.config.account_risk_pct / distance).floor();
        let min_qty = (self.config.min_position_value / entry)
            .round_dp_with_strategy(0, RoundingStrategy::AwayFromZero);
        let max_qty = (self.config.max_position_value / entry).floor();

        let mut qty = raw.max(min_qty).min(max_qty).min(self.config.max_shares);

        if is_closing {
            if let Some(available) = available_shares {
                qty = qty.min(available.floor());
            }
        }

        tracing::trace!(%side, %raw, %qty, is_closing, "Sized");
        qty.max(Decimal::ZERO)
    }
}
