//! Admission control

use super::{Admission, RiskSizer, RiskState, RiskViolation};
use crate::config::{RiskConfig, SizingConfig};
use crate::gateway::{Account, OrderSide};
use crate::signal::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Decides whether a new position may be opened and how large it is
#[derive(Debug, Clone)]
pub struct RiskGate {
    config: RiskConfig,
    sizer: RiskSizer,
}

impl RiskGate {
    pub fn new(config: RiskConfig, sizing: SizingConfig) -> Self {
        Self {
            config,
            sizer: RiskSizer::new(sizing),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Per-trade dollar risk budget for `equity`
    pub fn risk_budget(&self, equity: Decimal) -> Decimal {
        equity * self.sizer.config().account_risk_pct
    }

    /// Run the admission checks in order
    ///
    /// Limit breaches come back as `Ok(Admission::Denied)`. Only a short open
    /// that would exceed the exposure cap is an `Err`.
    #[allow(clippy::too_many_arguments)]
    pub fn can_open(
        &self,
        state: &mut RiskState,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Admission, RiskViolation> {
        if quantity <= Decimal::ZERO {
            return Ok(deny(symbol, RiskViolation::InvalidQuantity(quantity)));
        }

        if let Some(until) = state.global_pause_until.filter(|until| *until > now) {
            return Ok(deny(symbol, RiskViolation::GlobalPause { until }));
        }

        if state.open_positions >= self.config.max_positions {
            return Ok(deny(
                symbol,
                RiskViolation::MaxPositions {
                    open: state.open_positions,
                    max: self.config.max_positions,
                },
            ));
        }

        let loss_limit = account.equity * self.config.max_daily_loss_pct;
        if state.daily_realized_pnl <= -loss_limit {
            return Ok(deny(
                symbol,
                RiskViolation::DailyLossLimit {
                    pnl: state.daily_realized_pnl,
                    limit: loss_limit,
                },
            ));
        }

        let notional = price * quantity;

        if side == Side::Short {
            state.heal_exposure_drift();
            let projected = state.short_exposure + notional;
            if projected > self.config.max_short_exposure {
                tracing::warn!(
                    symbol,
                    projected = %projected,
                    max = %self.config.max_short_exposure,
                    "Short exposure limit exceeded"
                );
                return Err(RiskViolation::ShortExposure {
                    projected,
                    max: self.config.max_short_exposure,
                });
            }
        }

        let allowed = account.buying_power * self.config.max_buying_power_pct;
        if notional > allowed {
            return Ok(deny(
                symbol,
                RiskViolation::BuyingPower {
                    required: notional,
                    allowed,
                },
            ));
        }

        let max_notional =
            (account.equity * self.config.max_position_pct).min(self.sizer.config().max_position_value);
        if notional > max_notional {
            return Ok(deny(
                symbol,
                RiskViolation::PositionTooLarge {
                    notional,
                    max: max_notional,
                },
            ));
        }

        tracing::debug!(symbol, %side, %quantity, %notional, "Admission approved");
        Ok(Admission::Approved)
    }

    /// Shares to trade for an entry at `entry` with protective stop `stop`
    pub fn size_position(
        &self,
        entry: Decimal,
        stop: Decimal,
        symbol: &str,
        side: OrderSide,
        account: &Account,
        is_closing: bool,
        available_shares: Option<Decimal>,
    ) -> Decimal {
        let mut qty = self.sizer.size(
            entry,
            stop,
            side,
            account.equity,
            is_closing,
            available_shares,
        );
        if entry > Decimal::ZERO {
            let cap = (account.equity * self.config.max_position_pct / entry).floor();
            qty = qty.min(cap);
        }
        tracing::debug!(symbol, %side, %entry, %stop, %qty, "Position sized");
        qty
    }
}

fn deny(symbol: &str, violation: RiskViolation) -> Admission {
    tracing::info!(symbol, reason = %violation, "Admission denied");
    Admission::Denied(violation)
}
