//! Stop evaluation state machine

use super::{EntryPlan, ExitReason, StopDecision, StopState};
use crate::config::StopsConfig;
use crate::gateway::Bar;
use crate::position::Position;
use crate::signal::Side;
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Plans entry stops and evaluates open positions every tick
#[derive(Debug, Clone)]
pub struct StopEngine {
    config: StopsConfig,
}

impl StopEngine {
    pub fn new(config: StopsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StopsConfig {
        &self.config
    }

    /// Stop distance as a fraction of price
    ///
    /// `clamp(max(base, atr_multiplier * atr_pct), min, max)`
    pub fn adaptive_stop_pct(&self, atr_pct: Option<Decimal>) -> Decimal {
        let base = self.config.base_stop_pct;
        let from_atr = atr_pct
            .map(|a| a * self.config.atr_multiplier)
            .unwrap_or(Decimal::ZERO);
        base.max(from_atr)
            .clamp(self.config.min_stop_pct, self.config.max_stop_pct)
    }

    /// Stop, target and grace deadline for a fresh entry
    ///
    /// A strategy-proposed stop is honored when it sits on the protective
    /// side of entry, with its distance clamped to the configured bounds.
    pub fn plan_entry(
        &self,
        side: Side,
        entry_price: Decimal,
        atr_pct: Option<Decimal>,
        proposed_stop: Option<Decimal>,
        proposed_target: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> EntryPlan {
        let sign = side.sign();
        let stop_pct = match proposed_stop {
            Some(stop) if entry_price > Decimal::ZERO && (entry_price - stop) * sign > Decimal::ZERO => {
                ((entry_price - stop).abs() / entry_price)
                    .clamp(self.config.min_stop_pct, self.config.max_stop_pct)
            }
            _ => self.adaptive_stop_pct(atr_pct),
        };

        let risk = entry_price * stop_pct;
        let stop_price = entry_price - sign * risk;
        let target_price = match proposed_target {
            Some(target) if (target - entry_price) * sign > Decimal::ZERO => target,
            _ => entry_price + sign * risk * self.config.target_r,
        };

        EntryPlan {
            stop_price,
            target_price,
            stop_pct,
            grace_deadline: now + Duration::seconds(self.config.grace_secs as i64),
        }
    }

    /// Plan for a broker position the engine did not open; grace already over
    pub fn plan_adopted(&self, side: Side, entry_price: Decimal, now: DateTime<Utc>) -> EntryPlan {
        let mut plan = self.plan_entry(side, entry_price, None, None, None, now);
        plan.grace_deadline = now;
        plan
    }

    /// Loss fraction that forces an exit in every state
    pub fn catastrophic_pct(&self, position: &Position) -> Decimal {
        position.stop_pct * self.config.catastrophic_multiplier
    }

    /// Evaluate a position at `price`, advancing its stop state
    ///
    /// `bars` feed the trailing extreme and ATR; an empty slice falls back to
    /// a percentage trail.
    pub fn evaluate(
        &self,
        position: &mut Position,
        price: Decimal,
        bars: &[Bar],
        now: DateTime<Utc>,
    ) -> StopDecision {
        if position.stop_state == StopState::Closing {
            return StopDecision::Hold;
        }

        let loss_pct = -position.pnl_pct(price);
        if loss_pct >= self.catastrophic_pct(position) {
            tracing::warn!(
                symbol = %position.symbol,
                side = %position.side,
                %price,
                loss_pct = %loss_pct,
                threshold = %self.catastrophic_pct(position),
                state = ?position.stop_state,
                "Catastrophic stop triggered"
            );
            return self.exit(position, ExitReason::Catastrophic, price);
        }

        if position.stop_state == StopState::Grace {
            if now < position.grace_deadline {
                return StopDecision::Hold;
            }
            position.stop_state = StopState::Active;
            tracing::debug!(symbol = %position.symbol, "Grace period over");
        }

        let r = position.r_multiple(price);

        if !position.breakeven_set && r >= self.config.breakeven_trigger_r {
            position.breakeven_set = true;
            if self.is_favorable(position.side, position.entry_price, position.stop_price) {
                position.stop_price = position.entry_price;
            }
            if !position.trailing_active {
                position.stop_state = StopState::Breakeven;
            }
            tracing::info!(
                symbol = %position.symbol,
                stop = %position.stop_price,
                r = %r,
                "Stop moved to breakeven"
            );
        }

        if !position.trailing_active && r >= self.config.trail_trigger_r {
            position.trailing_active = true;
            position.stop_state = StopState::Trailing;
            tracing::info!(symbol = %position.symbol, r = %r, "Trailing stop activated");
        }

        if position.trailing_active {
            let candidate = self.trail_candidate(position.side, price, bars);
            if self.is_favorable(position.side, candidate, position.stop_price) {
                tracing::debug!(
                    symbol = %position.symbol,
                    from = %position.stop_price,
                    to = %candidate,
                    "Trailing stop raised"
                );
                position.stop_price = candidate;
            }
        }

        let stop_hit = match position.side {
            Side::Long => price <= position.stop_price,
            Side::Short => price >= position.stop_price,
        };
        if stop_hit {
            let reason = if position.trailing_active {
                ExitReason::TrailingStop
            } else if position.breakeven_set {
                ExitReason::Breakeven
            } else {
                ExitReason::StopLoss
            };
            if reason == ExitReason::StopLoss {
                self.check_overrun(position, loss_pct);
            }
            return self.exit(position, reason, price);
        }

        if !position.trailing_active {
            let target_hit = match position.side {
                Side::Long => price >= position.target_price,
                Side::Short => price <= position.target_price,
            };
            if target_hit {
                return self.exit(position, ExitReason::ProfitTarget, price);
            }
        }

        if now - position.entry_time >= Duration::seconds(self.config.max_hold_secs as i64) {
            return self.exit(position, ExitReason::MaxHoldTime, price);
        }

        StopDecision::Hold
    }

    /// Undo a [`StopState::Closing`] after the exit could not be completed
    pub fn resume(&self, position: &mut Position) {
        if position.stop_state != StopState::Closing {
            return;
        }
        position.stop_state = if position.trailing_active {
            StopState::Trailing
        } else if position.breakeven_set {
            StopState::Breakeven
        } else {
            StopState::Active
        };
        tracing::debug!(symbol = %position.symbol, state = ?position.stop_state, "Exit abandoned, monitoring resumed");
    }

    /// `candidate` is a tighter stop than `current` for `side`
    fn is_favorable(&self, side: Side, candidate: Decimal, current: Decimal) -> bool {
        match side {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }

    fn trail_candidate(&self, side: Side, price: Decimal, bars: &[Bar]) -> Decimal {
        let start = bars.len().saturating_sub(self.config.trail_lookback);
        let recent = &bars[start..];
        let atr = super::average_true_range(bars, self.config.atr_period);

        match side {
            Side::Long => {
                let extreme = recent.iter().map(|b| b.high).fold(price, Decimal::max);
                match atr {
                    Some(atr) => extreme - atr * self.config.trail_atr_multiplier,
                    None => extreme * (Decimal::ONE - self.config.trail_pct),
                }
            }
            Side::Short => {
                let extreme = recent.iter().map(|b| b.low).fold(price, Decimal::min);
                match atr {
                    Some(atr) => extreme + atr * self.config.trail_atr_multiplier,
                    None => extreme * (Decimal::ONE + self.config.trail_pct),
                }
            }
        }
    }

    fn check_overrun(&self, position: &Position, loss_pct: Decimal) {
        let allowed = position.stop_pct * (Decimal::ONE + self.config.stop_overrun_tolerance);
        if loss_pct > allowed {
            tracing::warn!(
                symbol = %position.symbol,
                planned_pct = %position.stop_pct,
                actual_pct = %loss_pct,
                "stop overrun"
            );
            telemetry::increment(CounterMetric::StopOverruns);
        }
    }

    fn exit(&self, position: &mut Position, reason: ExitReason, price: Decimal) -> StopDecision {
        position.stop_state = StopState::Closing;
        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            %reason,
            %price,
            stop = %position.stop_price,
            "Exit triggered"
        );
        StopDecision::Exit { reason, price }
    }
}
