//! Order submission, recovery and fill verification

use super::{ExecutionSettings, Fill, FillOutcome, OrderHandle};
use crate::cache::{CacheContext, MarketData};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::gateway::{
    BrokerGateway, ExecutionError, ExecutionErrorKind, GatewayError, OrderRequest, OrderSide,
    OrderStatus,
};
use crate::position::{LedgerError, Position};
use crate::signal::Side;
use crate::telemetry::{self, CounterMetric, LatencyMetric};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Submits market orders and confirms their fills
pub struct ExecutionClient {
    data: MarketData,
    settings: ExecutionSettings,
    clock: Arc<dyn Clock>,
}

impl ExecutionClient {
    pub fn new(data: MarketData, settings: ExecutionSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            data,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    fn gateway(&self) -> &Arc<dyn BrokerGateway> {
        self.data.gateway()
    }

    /// Run a gateway call under the request deadline
    async fn call<T, F>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.settings.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.settings.request_timeout)),
        }
    }

    /// Cancel open orders for `symbol`, only those on `side` when given
    ///
    /// Returns how many cancellations were accepted.
    async fn cancel_open(&self, symbol: &str, side: Option<OrderSide>) -> usize {
        let orders = match self.call(self.gateway().open_orders(symbol)).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Could not list open orders");
                return 0;
            }
        };

        let mut cancelled = 0;
        for order in orders.iter().filter(|o| side.map_or(true, |s| o.side == s)) {
            match self.call(self.gateway().cancel_order(&order.id)).await {
                Ok(()) => {
                    cancelled += 1;
                    tracing::info!(symbol, order_id = %order.id, side = %order.side, "Cancelled open order");
                }
                Err(e) => {
                    tracing::warn!(symbol, order_id = %order.id, error = %e, "Cancel failed");
                }
            }
        }
        if cancelled > 0 {
            self.data.invalidate_symbol(symbol, "orders cancelled");
        }
        cancelled
    }

    async fn settle(&self) {
        tokio::time::sleep(self.settings.cancel_settle).await;
    }

    /// Submit a market order with wash-trade and partial-quantity recovery
    ///
    /// Opposite-side open orders are cancelled first. A wash-trade rejection
    /// cancels everything pending for the symbol and retries; an
    /// insufficient-quantity rejection retries with the available shares.
    /// Each chain retries at most once.
    pub async fn submit(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<OrderHandle, ExecutionError> {
        if qty <= Decimal::ZERO || !qty.fract().is_zero() {
            return Err(ExecutionError::new(
                ExecutionErrorKind::InvalidQuantity,
                "quantity must be a positive whole number",
            )
            .with_context(symbol, side, qty));
        }

        let baseline_qty = self
            .call(self.gateway().position(symbol))
            .await
            .map_err(|e| ExecutionError::from_gateway(e).with_context(symbol, side, qty))?
            .map(|p| p.signed_qty())
            .unwrap_or_default();

        if self.cancel_open(symbol, Some(side.opposite())).await > 0 {
            self.settle().await;
        }

        let mut qty = qty;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = OrderRequest {
                symbol: symbol.to_string(),
                side,
                qty,
                client_order_id: Uuid::new_v4().to_string(),
            };

            let started = Instant::now();
            telemetry::increment(CounterMetric::OrdersSubmitted);
            let result = self.call(self.gateway().submit_order(&request)).await;
            telemetry::record_latency(LatencyMetric::OrderSubmission, started.elapsed());

            let err = match result {
                Ok(order) => {
                    tracing::info!(
                        symbol,
                        side = %side,
                        qty = %qty,
                        order_id = %order.id,
                        client_order_id = %request.client_order_id,
                        attempt,
                        "Order submitted"
                    );
                    self.data.invalidate_symbol(symbol, "order submitted");
                    return Ok(OrderHandle {
                        order_id: order.id,
                        client_order_id: request.client_order_id,
                        symbol: symbol.to_string(),
                        side,
                        qty,
                        submitted_at: self.clock.now(),
                        attempts: attempt,
                        baseline_qty,
                        filled_qty: order.filled_qty,
                        filled_avg_price: order.filled_avg_price,
                    });
                }
                Err(e) => ExecutionError::from_gateway(e).with_context(symbol, side, qty),
            };

            telemetry::increment_with(CounterMetric::OrderRejections, "kind", err.kind.tag());
            tracing::warn!(
                symbol,
                side = %side,
                qty = %qty,
                attempt,
                kind = err.kind.tag(),
                payload = %err.detail,
                "Order rejected"
            );

            if attempt >= self.settings.max_attempts {
                return Err(err);
            }

            match &err.kind {
                ExecutionErrorKind::WashTrade => {
                    self.cancel_open(symbol, None).await;
                    self.settle().await;
                }
                ExecutionErrorKind::InsufficientQty {
                    available,
                    requested,
                } if *available > Decimal::ZERO && available < requested => {
                    let reduced = available.floor();
                    if reduced.is_zero() {
                        return Err(err);
                    }
                    tracing::info!(symbol, from = %qty, to = %reduced, "Retrying with available quantity");
                    qty = reduced;
                }
                _ => return Err(err),
            }
            telemetry::increment(CounterMetric::OrderRetries);
        }
    }

    /// Poll the order and the broker position until the fill is confirmed
    ///
    /// A partial fill that is still partial at the deadline is verified with
    /// the filled quantity and its remainder cancelled. Nothing filled by the
    /// deadline is [`FillOutcome::Unverified`].
    pub async fn verify_filled(&self, handle: &OrderHandle, timeout: Duration) -> FillOutcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut filled_qty = handle.filled_qty;
        let mut avg_price = handle.filled_avg_price;

        let outcome = loop {
            match self.call(self.gateway().order(&handle.order_id)).await {
                Ok(order) => {
                    if order.filled_qty > filled_qty {
                        filled_qty = order.filled_qty;
                    }
                    avg_price = order.filled_avg_price.or(avg_price);
                    if order.status == OrderStatus::Filled {
                        break Some(FillOutcome::Verified {
                            filled_qty: order.filled_qty,
                            avg_price,
                        });
                    }
                    if order.status.is_dead() {
                        break Some(if filled_qty > Decimal::ZERO {
                            FillOutcome::Verified {
                                filled_qty,
                                avg_price,
                            }
                        } else {
                            FillOutcome::Failed {
                                status: order.status,
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::debug!(order_id = %handle.order_id, error = %e, "Order status poll failed");
                }
            }

            if let Ok(position) = self.call(self.gateway().position(&handle.symbol)).await {
                let current = position.map(|p| p.signed_qty()).unwrap_or_default();
                let moved = match handle.side {
                    OrderSide::Buy => current - handle.baseline_qty,
                    OrderSide::Sell => handle.baseline_qty - current,
                };
                if moved >= handle.qty {
                    break Some(FillOutcome::Verified {
                        filled_qty: handle.qty,
                        avg_price,
                    });
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                break None;
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        };

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                if let Err(e) = self.call(self.gateway().cancel_order(&handle.order_id)).await {
                    tracing::warn!(order_id = %handle.order_id, error = %e, "Could not cancel unfilled remainder");
                }
                if filled_qty > Decimal::ZERO {
                    tracing::warn!(
                        symbol = %handle.symbol,
                        order_id = %handle.order_id,
                        filled = %filled_qty,
                        requested = %handle.qty,
                        "Partial fill at deadline, remainder cancelled"
                    );
                    FillOutcome::Verified {
                        filled_qty,
                        avg_price,
                    }
                } else {
                    telemetry::increment(CounterMetric::FillsUnverified);
                    tracing::warn!(
                        symbol = %handle.symbol,
                        order_id = %handle.order_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Fill not verified before deadline"
                    );
                    FillOutcome::Unverified
                }
            }
        };

        telemetry::record_latency(LatencyMetric::FillVerification, started.elapsed());
        self.data.invalidate_symbol(&handle.symbol, "fill verified");
        outcome
    }

    /// Broker fill price, or the live mid from a fresh quote
    pub async fn resolve_exit_price(
        &self,
        symbol: &str,
        fill_price: Option<Decimal>,
    ) -> Result<Decimal, EngineError> {
        if let Some(price) = fill_price.filter(|p| *p > Decimal::ZERO) {
            return Ok(price);
        }
        tracing::debug!(symbol, "No broker fill price, using live mid");
        self.data
            .mid(symbol, CacheContext::PositionClose)
            .await
            .map_err(|e| EngineError::from_gateway(symbol, e))
    }

    /// Submit, verify and price an order
    async fn execute(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<Fill, EngineError> {
        let handle = self.submit(symbol, side, qty).await?;
        match self.verify_filled(&handle, self.settings.fill_timeout).await {
            FillOutcome::Verified {
                filled_qty,
                avg_price,
            } => {
                let price = self.resolve_exit_price(symbol, avg_price).await?;
                Ok(Fill {
                    qty: filled_qty,
                    price,
                })
            }
            FillOutcome::Unverified => Err(EngineError::FillUnverified {
                symbol: symbol.to_string(),
                order_id: handle.order_id,
            }),
            FillOutcome::Failed { status } => Err(EngineError::Execution(
                ExecutionError::api(format!("order {} ended {status:?}", handle.order_id))
                    .with_context(symbol, side, qty),
            )),
        }
    }

    /// Open `qty` shares in direction `side`
    pub async fn enter(&self, symbol: &str, side: Side, qty: Decimal) -> Result<Fill, EngineError> {
        self.execute(symbol, side.entry_order_side(), qty).await
    }

    /// Close a tracked position against what the broker actually holds
    ///
    /// The closing quantity is clamped to the broker's available shares. A
    /// missing or opposite broker position is reported as a phantom.
    pub async fn flatten(&self, position: &Position) -> Result<Fill, EngineError> {
        let symbol = position.symbol.as_str();
        let exit_side = position.side.exit_order_side();

        if self.cancel_open(symbol, None).await > 0 {
            self.settle().await;
        }

        let broker = self
            .call(self.gateway().position(symbol))
            .await
            .map_err(|e| EngineError::from_gateway(symbol, e))?;
        let broker = match broker {
            Some(b) if b.side == position.side => b,
            _ => {
                return Err(EngineError::Ledger(LedgerError::PhantomPositionDetected(
                    symbol.to_string(),
                )))
            }
        };

        let qty = position.quantity.min(broker.qty_available).floor();
        if qty.is_zero() {
            return Err(EngineError::Execution(
                ExecutionError::new(
                    ExecutionErrorKind::HeldForOrders,
                    format!("no shares available, broker holds {}", broker.qty),
                )
                .with_context(symbol, exit_side, position.quantity),
            ));
        }

        self.execute(symbol, exit_side, qty).await
    }
}
