//! Per-symbol cooldowns and the adaptive multiplier

use crate::config::CooldownConfig;
use crate::risk::RiskState;
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Decides when a symbol may be evaluated again
///
/// The adaptive multiplier and global pause live on [`RiskState`] so they
/// reset with the session; per-symbol deadlines live here.
#[derive(Debug)]
pub struct CooldownScheduler {
    config: CooldownConfig,
    until: HashMap<String, DateTime<Utc>>,
}

impl CooldownScheduler {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            until: HashMap::new(),
        }
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    /// Whether `symbol` may produce a new signal at `now`
    pub fn can_generate(&self, symbol: &str, state: &RiskState, now: DateTime<Utc>) -> bool {
        if state.pause_remaining(now).is_some() {
            return false;
        }
        self.until.get(symbol).map_or(true, |until| now >= *until)
    }

    /// Cooldown deadline for `symbol`, if one is pending
    pub fn cooldown_until(&self, symbol: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.until.get(symbol).copied().filter(|until| *until > now)
    }

    /// Base cooldown after an accepted signal, scaled by the multiplier
    pub fn record_signal(&mut self, symbol: &str, state: &RiskState, now: DateTime<Utc>) {
        let base = Decimal::from(self.config.base_secs) * state.cooldown_multiplier;
        let secs = base.round().to_i64().unwrap_or(self.config.base_secs as i64);
        self.extend(symbol, now + Duration::seconds(secs));
    }

    /// Failure cooldown after a rejected or failed signal
    pub fn record_failure(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.extend(symbol, now + Duration::seconds(self.config.failure_secs as i64));
    }

    /// Extended cooldown after an unverified fill or timeout
    pub fn record_extended(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.extend(symbol, now + Duration::seconds(self.config.extended_secs as i64));
    }

    /// Update streaks, multiplier and pause after a close
    ///
    /// `risk_budget` is the per-trade dollar risk used to judge a large loss.
    pub fn on_trade_closed(
        &mut self,
        symbol: &str,
        pnl: Decimal,
        trailing_active: bool,
        risk_budget: Decimal,
        state: &mut RiskState,
        now: DateTime<Utc>,
    ) {
        let mut multiplier = state.cooldown_multiplier;

        if pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
            if -pnl > risk_budget * self.config.large_loss_fraction {
                multiplier *= self.config.loss_step;
            }
            if state.consecutive_losses >= self.config.loss_streak {
                multiplier *= self.config.loss_step;
                let until = now + Duration::seconds(self.config.global_pause_secs as i64);
                state.global_pause_until = Some(until);
                tracing::warn!(
                    losses = state.consecutive_losses,
                    until = %until,
                    "Loss streak, pausing all signal generation"
                );
                telemetry::increment(CounterMetric::GlobalPauses);
                state.consecutive_losses = 0;
            }
        } else if pnl > Decimal::ZERO {
            state.consecutive_losses = 0;
            multiplier *= self.config.win_decay;
            if trailing_active {
                self.stack(
                    symbol,
                    Duration::seconds(self.config.trailing_reentry_secs as i64),
                    now,
                );
            }
        } else {
            state.consecutive_losses = 0;
        }

        state.cooldown_multiplier = multiplier.clamp(Decimal::ONE, self.config.max_multiplier);
        telemetry::set_gauge(
            GaugeMetric::CooldownMultiplier,
            state.cooldown_multiplier.to_f64().unwrap_or(1.0),
        );
        tracing::debug!(
            symbol,
            %pnl,
            multiplier = %state.cooldown_multiplier,
            losses = state.consecutive_losses,
            "Cooldown updated after close"
        );
    }

    /// Add `extra` on top of whatever cooldown is still running
    fn stack(&mut self, symbol: &str, extra: Duration, now: DateTime<Utc>) {
        let base = self.cooldown_until(symbol, now).unwrap_or(now);
        self.until.insert(symbol.to_string(), base + extra);
    }

    /// Only ever lengthen an existing cooldown
    fn extend(&mut self, symbol: &str, until: DateTime<Utc>) {
        let entry = self.until.entry(symbol.to_string()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
    }
}
