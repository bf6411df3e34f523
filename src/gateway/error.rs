//! Gateway errors and broker rejection classification
//!
//! Broker rejections arrive as JSON bodies or free text. They are parsed
//! exactly once, here, into [`ExecutionErrorKind`]; nothing downstream looks
//! at the raw strings again.

use super::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Classified broker rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// An opposite-side order for the same symbol is open at the broker
    WashTrade,
    /// Fewer shares available than requested
    InsufficientQty {
        available: Decimal,
        requested: Decimal,
    },
    /// Nothing available because pending orders hold the shares
    HeldForOrders,
    /// Quantity rejected as malformed (zero, fractional, ...)
    InvalidQuantity,
    /// No broker response within the request deadline
    Timeout,
    /// Anything unclassified
    ApiError,
}

impl ExecutionErrorKind {
    /// Short tag used in logs and metrics
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionErrorKind::WashTrade => "wash_trade",
            ExecutionErrorKind::InsufficientQty { .. } => "insufficient_qty",
            ExecutionErrorKind::HeldForOrders => "held_for_orders",
            ExecutionErrorKind::InvalidQuantity => "invalid_quantity",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::ApiError => "api_error",
        }
    }
}

/// Order submission failure with enough context to diagnose it
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{} for {}: {detail}", .kind.tag(), order_label(.symbol, .side, .quantity))]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    /// Raw broker payload or local description
    pub detail: String,
    pub symbol: Option<String>,
    pub side: Option<OrderSide>,
    pub quantity: Option<Decimal>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            symbol: None,
            side: None,
            quantity: None,
        }
    }

    /// Unclassified failure
    pub fn api(detail: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::ApiError, detail)
    }

    /// Map a non-rejection gateway failure
    pub fn from_gateway(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(e) => e,
            GatewayError::Timeout(after) => Self::new(
                ExecutionErrorKind::Timeout,
                format!("no response after {after:?}"),
            ),
            other => Self::api(other.to_string()),
        }
    }

    /// Attach order context
    pub fn with_context(mut self, symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        self.symbol = Some(symbol.to_string());
        self.side = Some(side);
        self.quantity = Some(quantity);
        self
    }
}

/// Errors returned by a [`super::BrokerGateway`]
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network or client failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP response that is not an order rejection
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// Broker rejected an order
    #[error("order rejected: {0}")]
    Rejected(ExecutionError),
    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// No live data for one symbol
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    /// The whole feed is down; no symbol can be priced
    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),
    /// Call exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(Duration::ZERO)
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Rejection body fields brokers commonly return
#[derive(Debug, Default, Deserialize)]
struct RejectionBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reject_reason: Option<String>,
    #[serde(default)]
    available: Option<serde_json::Value>,
    #[serde(default)]
    held_for_orders: Option<serde_json::Value>,
}

/// Classify a broker rejection body for an order of `requested` shares
pub fn classify_rejection(body: &str, requested: Decimal) -> ExecutionError {
    let parsed: RejectionBody = serde_json::from_str(body).unwrap_or_default();

    let message = parsed.message.clone().unwrap_or_else(|| body.to_string());
    let text = format!(
        "{} {}",
        message.to_ascii_lowercase(),
        parsed
            .reject_reason
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase()
    );

    if text.contains("wash trade") || text.contains("opposite side") {
        return ExecutionError::new(ExecutionErrorKind::WashTrade, body);
    }

    let available = parsed
        .available
        .as_ref()
        .and_then(json_decimal)
        .or_else(|| number_after(&text, "available"));
    let held = parsed
        .held_for_orders
        .as_ref()
        .and_then(json_decimal)
        .or_else(|| number_after(&text, "held_for_orders"));

    if text.contains("insufficient qty")
        || text.contains("insufficient quantity")
        || text.contains("held_for_orders")
        || available.is_some()
    {
        let available = available.unwrap_or(Decimal::ZERO);
        let held = held.unwrap_or(Decimal::ZERO);
        if available.is_zero() && (held > Decimal::ZERO || text.contains("held_for_orders")) {
            return ExecutionError::new(ExecutionErrorKind::HeldForOrders, body);
        }
        return ExecutionError::new(
            ExecutionErrorKind::InsufficientQty {
                available,
                requested,
            },
            body,
        );
    }

    if text.contains("qty must be")
        || text.contains("quantity must be")
        || text.contains("invalid qty")
        || text.contains("invalid quantity")
        || text.contains("fractional")
    {
        return ExecutionError::new(ExecutionErrorKind::InvalidQuantity, body);
    }

    ExecutionError::new(ExecutionErrorKind::ApiError, body)
}

fn order_label(
    symbol: &Option<String>,
    side: &Option<OrderSide>,
    quantity: &Option<Decimal>,
) -> String {
    format!(
        "{} {} x{}",
        side.map(|s| s.as_str()).unwrap_or("?"),
        symbol.as_deref().unwrap_or("?"),
        quantity.map(|q| q.to_string()).unwrap_or_else(|| "?".to_string())
    )
}

fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// First number following `label` in free text, e.g. "available: 13"
fn number_after(text: &str, label: &str) -> Option<Decimal> {
    let start = text.find(label)? + label.len();
    let rest = &text[start..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(digits.trim_end_matches('.')).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_wash_trade_json() {
        let body = r#"{"code":40310000,"message":"potential wash trade detected. use complex orders","reject_reason":"opposite side market/stop order exists"}"#;
        let err = classify_rejection(body, dec!(10));
        assert_eq!(err.kind, ExecutionErrorKind::WashTrade);
    }

    #[test]
    fn test_classify_insufficient_qty_json() {
        let body = r#"{"code":40310000,"message":"insufficient qty available for order (requested: 17, available: 13)","available":"13","existing_qty":"17","held_for_orders":"4","symbol":"AAPL"}"#;
        let err = classify_rejection(body, dec!(17));
        assert_eq!(
            err.kind,
            ExecutionErrorKind::InsufficientQty {
                available: dec!(13),
                requested: dec!(17)
            }
        );
    }

    #[test]
    fn test_classify_held_for_orders() {
        let body = r#"{"code":40310000,"message":"insufficient qty available for order","available":"0","held_for_orders":"17"}"#;
        let err = classify_rejection(body, dec!(17));
        assert_eq!(err.kind, ExecutionErrorKind::HeldForOrders);
    }

    #[test]
    fn test_classify_free_text_insufficient() {
        let err = classify_rejection("Insufficient quantity: available: 8", dec!(10));
        assert_eq!(
            err.kind,
            ExecutionErrorKind::InsufficientQty {
                available: dec!(8),
                requested: dec!(10)
            }
        );
    }

    #[test]
    fn test_classify_numeric_available() {
        let body = r#"{"message":"insufficient qty","available":5}"#;
        let err = classify_rejection(body, dec!(9));
        assert_eq!(
            err.kind,
            ExecutionErrorKind::InsufficientQty {
                available: dec!(5),
                requested: dec!(9)
            }
        );
    }

    #[test]
    fn test_classify_invalid_quantity() {
        let body = r#"{"code":42210000,"message":"qty must be > 0"}"#;
        let err = classify_rejection(body, dec!(0));
        assert_eq!(err.kind, ExecutionErrorKind::InvalidQuantity);
    }

    #[test]
    fn test_classify_unknown() {
        let err = classify_rejection("internal server error", dec!(1));
        assert_eq!(err.kind, ExecutionErrorKind::ApiError);
        assert_eq!(err.detail, "internal server error");
    }

    #[test]
    fn test_execution_error_display_has_context() {
        let err = ExecutionError::new(ExecutionErrorKind::WashTrade, "boom").with_context(
            "AAPL",
            OrderSide::Sell,
            dec!(17),
        );
        let text = err.to_string();
        assert!(text.contains("wash_trade"));
        assert!(text.contains("AAPL"));
        assert!(text.contains("17"));
    }
}
