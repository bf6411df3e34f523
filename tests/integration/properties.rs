//! Invariants checked across many generated inputs

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalp_engine::cache::{CacheContext, CacheKey, CachedData, MarketDataCache, Priority};
use scalp_engine::clock::ManualClock;
use scalp_engine::config::{CacheConfig, CooldownConfig, StopsConfig};
use scalp_engine::position::{LedgerError, Position, PositionLedger};
use scalp_engine::risk::RiskState;
use scalp_engine::scheduler::CooldownScheduler;
use scalp_engine::signal::{Side, Signal};
use scalp_engine::stops::{StopDecision, StopEngine, StopState};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()
}

/// Small deterministic generator
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    /// Uniform integer in `[lo, hi]`
    fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next() % (hi - lo + 1) as u64) as i64
    }
}

#[test]
fn test_cache_entry_expires_exactly_at_ttl() {
    for ttl_ms in [1i64, 10, 250, 1500, 5000] {
        for age_ms in [0, ttl_ms - 1, ttl_ms, ttl_ms + 1, ttl_ms * 2] {
            let clock = Arc::new(ManualClock::new(t0()));
            let cache = MarketDataCache::new(CacheConfig::default(), clock.clone());
            let key = CacheKey::order_availability("AAPL");
            cache.set(
                key.clone(),
                CachedData::Shares(dec!(7)),
                Some(std::time::Duration::from_millis(ttl_ms as u64)),
                Priority::Normal,
                "test",
            );

            clock.set(t0() + Duration::milliseconds(age_ms));
            let hit = cache.get(&key, CacheContext::Monitoring).is_some();
            assert_eq!(hit, age_ms < ttl_ms, "ttl {ttl_ms}ms age {age_ms}ms");
        }
    }
}

#[test]
fn test_critical_reads_need_fresh_critical_entries() {
    let critical = [
        CacheContext::OrderExecution,
        CacheContext::PositionClose,
        CacheContext::RiskCheck,
        CacheContext::StopLossCheck,
    ];
    let clock = Arc::new(ManualClock::new(t0()));
    let cache = MarketDataCache::new(CacheConfig::default(), clock.clone());
    let normal = CacheKey::order_availability("AAPL");
    let fresh = CacheKey::order_availability("MSFT");
    let long_ttl = Some(std::time::Duration::from_secs(60));
    cache.set(normal.clone(), CachedData::Shares(dec!(1)), long_ttl, Priority::High, "test");
    cache.set(fresh.clone(), CachedData::Shares(dec!(1)), long_ttl, Priority::Critical, "test");

    for context in critical {
        assert!(cache.get(&normal, context).is_none(), "{context:?}");
        assert!(cache.get(&fresh, context).is_some(), "{context:?}");
    }
    assert!(cache.get(&normal, CacheContext::SignalGeneration).is_some());

    clock.advance(Duration::milliseconds(1000));
    for context in critical {
        assert!(cache.get(&fresh, context).is_none(), "{context:?}");
    }
    assert!(cache.get(&fresh, CacheContext::Monitoring).is_some());
}

#[test]
fn test_cooldown_multiplier_stays_bounded_and_moves_the_right_way() {
    let config = CooldownConfig::default();
    let max = config.max_multiplier;
    let mut scheduler = CooldownScheduler::new(config);
    let mut state = RiskState::new(t0());
    let mut rng = Lcg(42);
    let budget = dec!(500);
    let mut now = t0();

    for _ in 0..1000 {
        let pnl = Decimal::from(rng.range(-600, 400));
        let before = state.cooldown_multiplier;
        scheduler.on_trade_closed("AAPL", pnl, false, budget, &mut state, now);
        let after = state.cooldown_multiplier;

        assert!(after >= Decimal::ONE && after <= max, "multiplier {after}");
        if pnl > Decimal::ZERO {
            assert!(after <= before);
        } else {
            assert!(after >= before);
        }
        assert!(state.consecutive_losses < 3);
        now += Duration::seconds(rng.range(1, 120));
    }
}

#[test]
fn test_grace_period_only_exits_at_catastrophic_loss() {
    let stops = StopEngine::new(StopsConfig::default());
    let plan = stops.plan_entry(Side::Long, dec!(100), None, None, None, t0());
    let threshold_bps = 60;

    for loss_bps in 0..=100i64 {
        for secs in [0i64, 10, 29] {
            let mut position =
                Position::from_plan("AAPL", Side::Long, "test", None, dec!(100), dec!(10), &plan, t0());
            let price = dec!(100) - Decimal::new(loss_bps, 2);
            let decision = stops.evaluate(&mut position, price, &[], t0() + Duration::seconds(secs));
            assert_eq!(
                decision.is_exit(),
                loss_bps >= threshold_bps,
                "loss {loss_bps}bps at {secs}s"
            );
            if !decision.is_exit() {
                assert_eq!(position.stop_state, StopState::Grace);
            }
        }
    }
}

#[test]
fn test_stop_never_loosens() {
    let stops = StopEngine::new(StopsConfig::default());
    let mut rng = Lcg(7);

    for side in [Side::Long, Side::Short] {
        let plan = stops.plan_entry(side, dec!(100), None, None, None, t0());
        let mut position =
            Position::from_plan("AAPL", side, "test", None, dec!(100), dec!(10), &plan, t0());
        let now = t0() + Duration::seconds(45);
        // drift in the position's favor with noise
        let mut price = dec!(100);
        for _ in 0..400 {
            let step = Decimal::new(rng.range(-6, 10), 2) * side.sign();
            price += step;
            let before = position.stop_price;
            if let StopDecision::Exit { .. } = stops.evaluate(&mut position, price, &[], now) {
                break;
            }
            match side {
                Side::Long => assert!(position.stop_price >= before),
                Side::Short => assert!(position.stop_price <= before),
            }
        }
    }
}

#[test]
fn test_one_position_per_symbol() {
    let stops = StopEngine::new(StopsConfig::default());
    let mut ledger = PositionLedger::new();
    let mut rng = Lcg(99);
    let symbols = ["AAPL", "MSFT", "NVDA", "TSLA"];

    for _ in 0..200 {
        let symbol = symbols[rng.range(0, 3) as usize];
        let side = if rng.range(0, 1) == 0 { Side::Long } else { Side::Short };
        let signal = Signal::new(symbol, side, "test", dec!(0.9), dec!(100)).at(t0());
        let plan = stops.plan_entry(side, dec!(100), None, None, None, t0());
        let held = ledger.get(symbol).is_some();

        match ledger.open(&signal, dec!(100), dec!(5), &plan, t0()) {
            Ok(_) => assert!(!held),
            Err(LedgerError::DuplicatePosition(s)) => {
                assert!(held);
                assert_eq!(s, symbol);
            }
            Err(other) => panic!("unexpected {other}"),
        }
        assert!(ledger.len() <= symbols.len());
    }
    assert_eq!(ledger.len(), symbols.len());
}
