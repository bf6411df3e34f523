//! Order submission recovery against the paper broker's own checks

use crate::common::execution_client;
use rust_decimal_macros::dec;
use scalp_engine::error::EngineError;
use scalp_engine::execution::FillOutcome;
use scalp_engine::gateway::{
    classify_rejection, BrokerGateway, BrokerPosition, ExecutionErrorKind, OrderSide,
};
use scalp_engine::signal::Side;
use std::time::Duration;

fn wash_rejection() -> scalp_engine::gateway::ExecutionError {
    classify_rejection(
        r#"{"code":40310000,"message":"potential wash trade detected. use complex orders","reject_reason":"opposite side market/stop order exists"}"#,
        dec!(10),
    )
}

fn long(symbol: &str, qty: rust_decimal::Decimal) -> BrokerPosition {
    BrokerPosition {
        symbol: symbol.to_string(),
        side: Side::Long,
        qty,
        qty_available: qty,
        avg_entry_price: dec!(100),
        current_price: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_wash_trade_recovery_cancels_resting_orders() {
    let (gateway, client) = execution_client();
    gateway.set_quote("AAPL", dec!(99.99), dec!(100.01)).await;
    let resting = gateway.seed_open_order("AAPL", OrderSide::Sell, dec!(2)).await;
    gateway.push_rejection(wash_rejection()).await;

    let started = tokio::time::Instant::now();
    let handle = client.submit("AAPL", OrderSide::Sell, dec!(10)).await.unwrap();

    assert_eq!(handle.attempts, 2);
    assert!(gateway.cancelled().await.contains(&resting.id));
    assert!(started.elapsed() >= client.settings().cancel_settle);

    let submitted = gateway.submitted().await;
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].qty, dec!(10));
    assert_ne!(submitted[0].client_order_id, submitted[1].client_order_id);
}

#[tokio::test(start_paused = true)]
async fn test_second_wash_rejection_is_final() {
    let (gateway, client) = execution_client();
    gateway.set_quote("AAPL", dec!(99.99), dec!(100.01)).await;
    gateway.push_rejection(wash_rejection()).await;
    gateway.push_rejection(wash_rejection()).await;

    let err = client.submit("AAPL", OrderSide::Buy, dec!(10)).await.unwrap_err();
    assert_eq!(err.kind, ExecutionErrorKind::WashTrade);
    assert_eq!(err.symbol.as_deref(), Some("AAPL"));
    assert_eq!(gateway.submitted().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_qty_retries_with_broker_available() {
    let (gateway, client) = execution_client();
    gateway.set_quote("AAPL", dec!(99.99), dec!(100.01)).await;
    gateway.seed_position(long("AAPL", dec!(17))).await;
    gateway.seed_open_order("AAPL", OrderSide::Sell, dec!(4)).await;

    let handle = client.submit("AAPL", OrderSide::Sell, dec!(17)).await.unwrap();
    assert_eq!(handle.qty, dec!(13));
    assert_eq!(handle.baseline_qty, dec!(17));

    let submitted = gateway.submitted().await;
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].qty, dec!(17));
    assert_eq!(submitted[1].qty, dec!(13));

    let outcome = client.verify_filled(&handle, Duration::from_secs(5)).await;
    assert_eq!(
        outcome,
        FillOutcome::Verified {
            filled_qty: dec!(13),
            avg_price: Some(dec!(99.99))
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_shares_held_aborts_after_one_submission() {
    let (gateway, client) = execution_client();
    gateway.set_quote("AAPL", dec!(99.99), dec!(100.01)).await;
    gateway.seed_position(long("AAPL", dec!(17))).await;
    gateway.seed_open_order("AAPL", OrderSide::Sell, dec!(17)).await;

    let err = client.submit("AAPL", OrderSide::Sell, dec!(17)).await.unwrap_err();
    assert_eq!(err.kind, ExecutionErrorKind::HeldForOrders);
    assert_eq!(gateway.submitted().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_entry_and_exit_round_trip() {
    let (gateway, client) = execution_client();
    gateway.set_quote("MSFT", dec!(399.90), dec!(400.10)).await;

    let fill = client.enter("MSFT", Side::Short, dec!(5)).await.unwrap();
    assert_eq!(fill.qty, dec!(5));
    assert_eq!(fill.price, dec!(399.90));

    let broker = gateway.positions().await.unwrap();
    assert_eq!(broker.len(), 1);
    assert_eq!(broker[0].side, Side::Short);
    assert_eq!(broker[0].qty, dec!(5));
}

#[tokio::test(start_paused = true)]
async fn test_entry_timeout_is_unverified() {
    use scalp_engine::gateway::FillMode;

    let (gateway, client) = execution_client();
    gateway.set_quote("NVDA", dec!(899.5), dec!(900.5)).await;
    gateway.set_fill_mode(FillMode::Manual).await;

    let err = client.enter("NVDA", Side::Long, dec!(3)).await.unwrap_err();
    assert!(matches!(err, EngineError::FillUnverified { ref symbol, .. } if symbol == "NVDA"));
    // the unfilled order was cancelled at the deadline
    assert_eq!(gateway.cancelled().await.len(), 1);
    assert!(gateway.positions().await.unwrap().is_empty());
}
