//! Signal admission, failure handling and the tick loop

use crate::common::{
    test_config, FailingStrategy, Harness, PanickingStrategy, ScriptedStrategy, SYMBOLS,
};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use scalp_engine::clock::ManualClock;
use scalp_engine::data::TradeLog;
use scalp_engine::engine::{DiagnosticsHandle, Engine};
use scalp_engine::error::EngineError;
use scalp_engine::gateway::{BrokerPosition, FillMode, PaperGateway};
use scalp_engine::signal::{Side, Signal, Strategy};
use scalp_engine::stops::ExitReason;
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_low_confidence_signal_never_reaches_broker() {
    let h = Harness::new();
    h.set_price("AAPL", dec!(100)).await;
    let signal = Signal::new("AAPL", Side::Long, "test", dec!(0.3), dec!(100)).at(h.now());

    let opened = h.engine.handle_signal(signal, &[]).await.unwrap();
    assert!(opened.is_none());
    assert!(h.gateway.submitted().await.is_empty());
    // filtered signals do not start a cooldown
    h.engine
        .inspect(|s| assert!(s.scheduler.cooldown_until("AAPL", h.now()).is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_stale_signal_dropped() {
    let h = Harness::new();
    h.set_price("AAPL", dec!(100)).await;
    let signal = h.signal("AAPL", Side::Long, dec!(100));
    h.advance_secs(11);

    assert!(h.engine.handle_signal(signal, &[]).await.unwrap().is_none());
    assert!(h.gateway.submitted().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_opened_position_starts_cooldown() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;

    let position = h.engine.position("AAPL").unwrap();
    assert_eq!(position.quantity, dec!(100));
    assert_eq!(position.stop_price, dec!(99.5));
    assert_eq!(position.target_price, dec!(101));
    h.engine.inspect(|s| {
        assert_eq!(
            s.scheduler.cooldown_until("AAPL", h.now()),
            Some(h.now() + Duration::seconds(60))
        );
    });
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_signal_ignored() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;

    let again = h.signal("AAPL", Side::Long, dec!(100));
    assert!(h.engine.handle_signal(again, &[]).await.unwrap().is_none());
    assert_eq!(h.gateway.submitted().await.len(), 1);
    assert_eq!(h.engine.positions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reverse_signal_closes_without_flipping() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;

    let reverse = h.signal("AAPL", Side::Short, dec!(100));
    assert!(h.engine.handle_signal(reverse, &[]).await.unwrap().is_none());

    assert!(h.engine.position("AAPL").is_none());
    let closed = h.engine.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_reason, ExitReason::SignalReversal);
    assert_eq!(h.engine.risk_state().open_positions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unverified_entry_leaves_no_position() {
    let h = Harness::new();
    h.set_price("AAPL", dec!(100)).await;
    h.gateway.set_fill_mode(FillMode::Manual).await;

    let signal = h.signal("AAPL", Side::Long, dec!(100));
    let err = h.engine.handle_signal(signal, &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::FillUnverified { .. }));

    assert!(h.engine.position("AAPL").is_none());
    assert_eq!(h.engine.risk_state().open_positions, 0);
    h.engine.inspect(|s| {
        assert_eq!(
            s.scheduler.cooldown_until("AAPL", h.now()),
            Some(h.now() + Duration::seconds(600))
        );
    });
}

#[tokio::test(start_paused = true)]
async fn test_risk_denial_applies_failure_cooldown() {
    let mut config = test_config();
    config.risk.max_positions = 1;
    let h = Harness::with_config(config, Vec::new());
    h.open_long("AAPL", dec!(100)).await;
    h.set_price("MSFT", dec!(50)).await;

    let signal = h.signal("MSFT", Side::Long, dec!(50));
    let err = h.engine.handle_signal(signal, &[]).await.unwrap_err();
    assert!(matches!(err, EngineError::Risk(_)));
    assert_eq!(h.gateway.submitted().await.len(), 1);
    h.engine.inspect(|s| {
        assert_eq!(
            s.scheduler.cooldown_until("MSFT", h.now()),
            Some(h.now() + Duration::seconds(180))
        );
    });
}

#[tokio::test(start_paused = true)]
async fn test_misbehaving_strategies_are_contained() {
    let scripted = Arc::new(ScriptedStrategy::new("scripted"));
    let strategies: Vec<Arc<dyn Strategy>> = vec![
        Arc::new(PanickingStrategy),
        Arc::new(FailingStrategy),
        scripted.clone(),
    ];
    let h = Harness::with_config(test_config(), strategies);
    for symbol in SYMBOLS {
        h.set_price(symbol, dec!(100)).await;
    }
    scripted.push(h.signal("MSFT", Side::Long, dec!(100)));

    let report = h.engine.slow_tick().await;
    assert!(report.data_healthy);
    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.opened[0].symbol, "MSFT");
    assert_eq!(report.opened[0].strategy_id, "test");
}

#[tokio::test(start_paused = true)]
async fn test_symbol_exited_this_tick_is_not_reentered() {
    let scripted = Arc::new(ScriptedStrategy::new("scripted"));
    let h = Harness::with_config(test_config(), vec![scripted.clone()]);
    for symbol in SYMBOLS {
        h.set_price(symbol, dec!(100)).await;
    }
    h.open_long("AAPL", dec!(100)).await;

    h.advance_secs(61);
    h.set_price("AAPL", dec!(99.50)).await;
    scripted.push(h.signal("AAPL", Side::Long, dec!(99.50)));

    let report = h.engine.slow_tick().await;
    assert_eq!(report.closed.len(), 1);
    assert!(report.opened.is_empty());
    assert!(report.filtered.contains(&"AAPL".to_string()));
    assert!(h.engine.position("AAPL").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_quote_outage_marks_data_unhealthy() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.gateway.set_quotes_unavailable(true).await;
    h.engine.data().invalidate_symbol("AAPL", "test outage");

    let report = h.engine.fast_tick().await;
    assert!(!report.data_healthy);
    assert_eq!(
        report.errors,
        vec![("AAPL".to_string(), "data_unavailable".to_string())]
    );
    assert!(h.engine.position("AAPL").is_some());

    assert!(report.unhealthy_symbols.is_empty());

    let diagnostics = h.engine.diagnostics().snapshot();
    assert!(!diagnostics.data_healthy);
    assert!(diagnostics.last_errors_by_symbol.contains_key("AAPL"));
}

#[tokio::test(start_paused = true)]
async fn test_symbol_without_quote_does_not_block_other_stops() {
    let h = Harness::new();
    h.open_long("MSFT", dec!(100)).await;
    h.gateway
        .seed_position(BrokerPosition {
            symbol: "AAPL".to_string(),
            side: Side::Long,
            qty: dec!(10),
            qty_available: dec!(10),
            avg_entry_price: dec!(100),
            current_price: Some(dec!(100)),
        })
        .await;
    let report = h.engine.slow_tick().await;
    assert_eq!(report.reconcile.unwrap().adopted.len(), 1);
    assert!(report.data_healthy);

    // AAPL sorts first and has no quote at all
    h.set_price("MSFT", dec!(90)).await;
    let report = h.engine.fast_tick().await;
    assert!(report.data_healthy);
    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.closed[0].symbol, "MSFT");
    assert_eq!(report.closed[0].exit_reason, ExitReason::Catastrophic);
    assert_eq!(
        report.errors,
        vec![("AAPL".to_string(), "data_unavailable".to_string())]
    );
    assert_eq!(report.unhealthy_symbols, vec!["AAPL".to_string()]);
    assert!(h.engine.position("AAPL").is_some());
    assert!(h.engine.position("MSFT").is_none());

    let diagnostics = h.engine.diagnostics().snapshot();
    assert!(diagnostics.data_healthy);
    assert_eq!(diagnostics.unhealthy_symbols, vec!["AAPL".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_quote_is_not_acted_on() {
    let h = Harness::new();
    h.open_long("AAPL", dec!(100)).await;
    h.gateway
        .set_quote_at("AAPL", dec!(90), dec!(90), h.now() - Duration::days(3))
        .await;
    h.engine.data().invalidate_symbol("AAPL", "test stale quote");

    let report = h.engine.fast_tick().await;
    assert!(report.closed.is_empty());
    assert!(report.data_healthy);
    assert_eq!(report.unhealthy_symbols, vec!["AAPL".to_string()]);
    assert!(h.engine.position("AAPL").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_closed_trades_logged_and_diagnostics_written() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("trades.jsonl");
    let diag_path = dir.path().join("diagnostics.json");

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
    ));
    let gateway = Arc::new(PaperGateway::default());
    let engine = Engine::new(&test_config(), gateway.clone(), clock.clone())
        .with_trade_log(TradeLog::open(&log_path).unwrap())
        .with_diagnostics_file(&diag_path);

    gateway.set_quote("AAPL", dec!(100), dec!(100)).await;
    let signal = Signal::new("AAPL", Side::Long, "test", dec!(0.9), dec!(100)).at(engine.now());
    engine.handle_signal(signal, &[]).await.unwrap().unwrap();

    clock.advance(Duration::seconds(31));
    gateway.set_quote("AAPL", dec!(99.4), dec!(99.4)).await;
    engine.data().invalidate_symbol("AAPL", "test price change");
    let report = engine.slow_tick().await;
    assert_eq!(report.closed.len(), 1);

    let logged = TradeLog::read_all(&log_path).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0], report.closed[0]);

    let diagnostics = DiagnosticsHandle::read_from(&diag_path).unwrap();
    assert!(diagnostics.active_positions.is_empty());
    assert_eq!(diagnostics.daily_realized_pnl, logged[0].realized_pnl);
    assert_eq!(diagnostics.updated_at, Some(engine.now()));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_shutdown() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
    ));
    let engine = Arc::new(Engine::new(
        &test_config(),
        Arc::new(PaperGateway::default()),
        clock,
    ));
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(engine.clone().run(rx));
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    assert!(engine.diagnostics().snapshot().running);

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let diagnostics = engine.diagnostics().snapshot();
    assert!(!diagnostics.running);
    assert!(diagnostics.updated_at.is_some());
    assert!(diagnostics.data_healthy);
}
