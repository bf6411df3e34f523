//! Ledger reconciliation against broker positions

use crate::common::{test_config, Harness};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalp_engine::gateway::BrokerPosition;
use scalp_engine::signal::Side;
use scalp_engine::stops::ExitReason;

fn broker_long(symbol: &str, qty: Decimal, entry: Decimal) -> BrokerPosition {
    BrokerPosition {
        symbol: symbol.to_string(),
        side: Side::Long,
        qty,
        qty_available: qty,
        avg_entry_price: entry,
        current_price: Some(entry),
    }
}

#[tokio::test(start_paused = true)]
async fn test_untracked_position_adopted_and_managed() {
    let h = Harness::new();
    h.set_price("MSFT", dec!(50)).await;
    h.gateway.seed_position(broker_long("MSFT", dec!(10), dec!(50))).await;

    let report = h.engine.slow_tick().await;
    let reconcile = report.reconcile.unwrap();
    assert_eq!(reconcile.adopted.len(), 1);

    let position = h.engine.position("MSFT").unwrap();
    assert!(position.adopted);
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.stop_price, dec!(49.75));
    assert_eq!(h.engine.risk_state().open_positions, 1);

    // adopted positions skip the grace period
    h.set_price("MSFT", dec!(49.74)).await;
    let report = h.engine.fast_tick().await;
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].exit_reason, ExitReason::StopLoss);
    assert!(report.closed[0].adopted);
    assert_eq!(h.engine.risk_state().open_positions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_untracked_position_excluded_until_gone() {
    let mut config = test_config();
    config.reconcile.adopt_untracked = false;
    let h = Harness::with_config(config, Vec::new());
    h.set_price("MSFT", dec!(50)).await;
    h.gateway.seed_position(broker_long("MSFT", dec!(10), dec!(50))).await;

    let report = h.engine.slow_tick().await;
    assert_eq!(report.reconcile.unwrap().excluded, vec!["MSFT".to_string()]);
    assert!(h.engine.position("MSFT").is_none());

    let signal = h.signal("MSFT", Side::Long, dec!(50));
    assert!(h.engine.handle_signal(signal, &[]).await.unwrap().is_none());
    assert!(h.gateway.submitted().await.is_empty());

    h.gateway.remove_position("MSFT").await;
    h.advance_secs(2);
    let report = h.engine.slow_tick().await;
    assert_eq!(report.reconcile.unwrap().released, vec!["MSFT".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_phantom_removed_and_never_readopted() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.gateway.remove_position("AAPL").await;

    h.advance_secs(2);
    let report = h.engine.slow_tick().await;
    assert_eq!(report.reconcile.unwrap().phantoms.len(), 1);
    assert!(h.engine.position("AAPL").is_none());
    assert_eq!(h.engine.risk_state().open_positions, 0);
    assert!(h.engine.closed_trades().is_empty());

    h.gateway.seed_position(broker_long("AAPL", dec!(100), dec!(100))).await;
    h.advance_secs(2);
    let report = h.engine.slow_tick().await;
    let reconcile = report.reconcile.unwrap();
    assert!(reconcile.adopted.is_empty());
    assert_eq!(reconcile.excluded, vec!["AAPL".to_string()]);
    assert!(h.engine.position("AAPL").is_none());

    let signal = h.signal("AAPL", Side::Long, dec!(100));
    assert!(h.engine.handle_signal(signal, &[]).await.unwrap().is_none());
    assert_eq!(h.gateway.submitted().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_quantity_drift_takes_broker_quantity() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.gateway.seed_position(broker_long("AAPL", dec!(60), dec!(100))).await;

    h.advance_secs(2);
    let report = h.engine.slow_tick().await;
    assert_eq!(report.reconcile.unwrap().resized, vec!["AAPL".to_string()]);
    assert_eq!(h.engine.position("AAPL").unwrap().quantity, dec!(60));
}

#[tokio::test(start_paused = true)]
async fn test_exit_without_broker_position_drops_phantom() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.gateway.remove_position("AAPL").await;

    h.set_price("AAPL", dec!(99.40)).await;
    let report = h.engine.fast_tick().await;
    assert!(report.closed.is_empty());
    assert_eq!(report.errors, vec![("AAPL".to_string(), "ledger".to_string())]);
    assert!(report.data_healthy);
    assert!(h.engine.position("AAPL").is_none());
    assert_eq!(h.engine.risk_state().open_positions, 0);
}
