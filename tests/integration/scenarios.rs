//! End-to-end lifecycle scenarios through the engine

use crate::common::{Harness, SYMBOLS};
use chrono::Duration;
use rust_decimal_macros::dec;
use scalp_engine::stops::{ExitReason, StopState};

#[tokio::test(start_paused = true)]
async fn test_catastrophic_exit_during_grace() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;

    let position = h.engine.position("AAPL").unwrap();
    assert_eq!(position.entry_price, dec!(100));
    assert_eq!(position.stop_pct, dec!(0.005));
    assert_eq!(position.stop_state, StopState::Grace);

    // 0.3% loss, under the 0.6% catastrophic threshold
    h.set_price("AAPL", dec!(99.70)).await;
    let report = h.engine.fast_tick().await;
    assert!(report.closed.is_empty());
    assert!(h.engine.position("AAPL").is_some());

    h.set_price("AAPL", dec!(99.40)).await;
    let report = h.engine.fast_tick().await;
    assert_eq!(report.closed.len(), 1);
    let record = &report.closed[0];
    assert_eq!(record.exit_reason, ExitReason::Catastrophic);
    assert!(record.exit_reason.to_string().contains("Catastrophic"));
    assert_eq!(record.exit_price, dec!(99.40));
    assert!(h.engine.position("AAPL").is_none());
    assert_eq!(h.engine.risk_state().open_positions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_three_losses_pause_everything() {
    let h = Harness::new();
    for symbol in SYMBOLS {
        h.open_long(symbol, dec!(100)).await;
    }
    assert_eq!(h.engine.risk_state().open_positions, 3);

    h.advance_secs(31);
    for symbol in SYMBOLS {
        h.set_price(symbol, dec!(99.50)).await;
    }
    let report = h.engine.fast_tick().await;
    assert_eq!(report.closed.len(), 3);
    assert!(report
        .closed
        .iter()
        .all(|r| r.exit_reason == ExitReason::StopLoss && r.realized_pnl < dec!(0)));

    let risk = h.engine.risk_state();
    assert_eq!(risk.consecutive_losses, 0);
    assert_eq!(
        risk.global_pause_until,
        Some(h.now() + Duration::seconds(900))
    );
    assert_eq!(risk.cooldown_multiplier, dec!(1.25));

    let now = h.now();
    h.engine.inspect(|s| {
        for symbol in SYMBOLS {
            assert!(!s.scheduler.can_generate(symbol, &s.risk, now));
        }
        assert!(!s.scheduler.can_generate("TSLA", &s.risk, now));
    });

    h.advance_secs(2);
    let report = h.engine.slow_tick().await;
    assert_eq!(report.filtered.len(), 3);
    assert!(report.opened.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_breakeven_moves_stop_once() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.advance_secs(31);

    // 1R: initial risk is $0.50
    h.set_price("AAPL", dec!(100.50)).await;
    h.engine.fast_tick().await;
    let position = h.engine.position("AAPL").unwrap();
    assert!(position.breakeven_set);
    assert_eq!(position.stop_price, dec!(100));
    assert_eq!(position.stop_state, StopState::Breakeven);

    h.set_price("AAPL", dec!(100.40)).await;
    h.engine.fast_tick().await;
    h.set_price("AAPL", dec!(100.50)).await;
    let report = h.engine.fast_tick().await;
    assert!(report.closed.is_empty());

    let again = h.engine.position("AAPL").unwrap();
    assert_eq!(again.stop_price, dec!(100));
    assert_eq!(again.stop_state, StopState::Breakeven);
    assert!(!again.trailing_active);
}

#[tokio::test(start_paused = true)]
async fn test_breakeven_stop_exit() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.advance_secs(31);

    h.set_price("AAPL", dec!(100.60)).await;
    h.engine.fast_tick().await;
    h.set_price("AAPL", dec!(100)).await;
    let report = h.engine.fast_tick().await;

    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].exit_reason, ExitReason::Breakeven);
    assert_eq!(report.closed[0].realized_pnl, dec!(0));
}

#[tokio::test(start_paused = true)]
async fn test_trailing_stop_follows_price_up() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.advance_secs(31);

    h.set_price("AAPL", dec!(100.80)).await;
    h.engine.fast_tick().await;
    let first = h.engine.position("AAPL").unwrap();
    assert!(first.trailing_active);
    assert_eq!(first.stop_state, StopState::Trailing);
    assert!(first.stop_price > dec!(100));

    h.set_price("AAPL", dec!(101.20)).await;
    h.engine.fast_tick().await;
    let second = h.engine.position("AAPL").unwrap();
    assert!(second.stop_price > first.stop_price);

    h.set_price("AAPL", dec!(100.90)).await;
    let report = h.engine.fast_tick().await;
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].exit_reason, ExitReason::TrailingStop);
    assert!(report.closed[0].realized_pnl > dec!(0));
}
