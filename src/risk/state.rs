//! Session risk state

use crate::signal::Side;
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Counters that gate admission and cooldowns for one trading session
#[derive(Debug, Clone, Serialize)]
pub struct RiskState {
    pub open_positions: usize,
    /// Tracked short notional
    pub short_exposure: Decimal,
    /// Short notional per symbol
    pub short_lots: HashMap<String, Decimal>,
    pub daily_realized_pnl: Decimal,
    pub consecutive_losses: u32,
    pub cooldown_multiplier: Decimal,
    pub global_pause_until: Option<DateTime<Utc>>,
    pub session_date: NaiveDate,
}

impl RiskState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            open_positions: 0,
            short_exposure: Decimal::ZERO,
            short_lots: HashMap::new(),
            daily_realized_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            cooldown_multiplier: Decimal::ONE,
            global_pause_until: None,
            session_date: now.date_naive(),
        }
    }

    /// Account for a newly opened position of `notional` dollars
    pub fn record_open(&mut self, symbol: &str, side: Side, notional: Decimal) {
        self.open_positions += 1;
        if side == Side::Short {
            *self.short_lots.entry(symbol.to_string()).or_default() += notional;
            self.short_exposure += notional;
        }
        self.publish();
    }

    /// Account for a closed position
    pub fn record_close(&mut self, symbol: &str, side: Side, pnl: Decimal) {
        self.open_positions = self.open_positions.saturating_sub(1);
        if side == Side::Short {
            if let Some(lot) = self.short_lots.remove(symbol) {
                self.short_exposure -= lot;
            }
        }
        self.daily_realized_pnl += pnl;
        self.publish();
    }

    /// Account for part of a position closing while the rest stays open
    ///
    /// `released` is the notional of the closed shares at entry price.
    pub fn record_partial(&mut self, symbol: &str, side: Side, released: Decimal, pnl: Decimal) {
        if side == Side::Short {
            if let Some(lot) = self.short_lots.get_mut(symbol) {
                let cut = released.min(*lot);
                *lot -= cut;
                self.short_exposure -= cut;
            }
        }
        self.daily_realized_pnl += pnl;
        self.publish();
    }

    /// Start a new session if the UTC date has changed
    pub fn roll_session(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today == self.session_date {
            return false;
        }
        self.reset_session(today);
        true
    }

    /// Clear per-session counters; open positions and exposure carry over
    pub fn reset_session(&mut self, date: NaiveDate) {
        tracing::info!(
            previous = %self.session_date,
            next = %date,
            realized_pnl = %self.daily_realized_pnl,
            "Risk session reset"
        );
        self.session_date = date;
        self.daily_realized_pnl = Decimal::ZERO;
        self.consecutive_losses = 0;
        self.cooldown_multiplier = Decimal::ONE;
        self.global_pause_until = None;
        self.publish();
    }

    /// Reset short exposure that has no lots behind it
    ///
    /// This is a recovery heuristic, not a reconciliation: the discarded
    /// amount is logged and counted so real accounting bugs stay visible.
    /// Returns the discarded exposure.
    pub fn heal_exposure_drift(&mut self) -> Option<Decimal> {
        if !self.short_lots.is_empty() || self.short_exposure.is_zero() {
            return None;
        }
        let discarded = self.short_exposure;
        tracing::warn!(
            discarded = %discarded,
            open_positions = self.open_positions,
            session = %self.session_date,
            "Short exposure without tracked lots, resetting to zero"
        );
        telemetry::increment(CounterMetric::ExposureDriftResets);
        self.short_exposure = Decimal::ZERO;
        self.publish();
        Some(discarded)
    }

    /// Remaining pause at `now`, if any
    pub fn pause_remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.global_pause_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    fn publish(&self) {
        telemetry::set_gauge(GaugeMetric::OpenPositions, self.open_positions as f64);
        telemetry::set_gauge(
            GaugeMetric::ShortExposure,
            self.short_exposure.to_f64().unwrap_or_default(),
        );
        telemetry::set_gauge(
            GaugeMetric::DailyPnl,
            self.daily_realized_pnl.to_f64().unwrap_or_default(),
        );
    }
}
