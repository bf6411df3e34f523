//! Engine error taxonomy

use crate::gateway::{ExecutionError, GatewayError};
use crate::position::LedgerError;
use crate::risk::RiskViolation;
use thiserror::Error;

/// How much of the market a data failure covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataScope {
    /// One symbol has no usable quote or bars
    Symbol,
    /// The feed itself is down
    Feed,
}

/// Errors surfaced by the engine's open/close flows
#[derive(Debug, Error)]
pub enum EngineError {
    /// No live price or bars; the engine refuses to act on this symbol
    #[error("data unavailable for {symbol}: {detail}")]
    DataUnavailable {
        symbol: String,
        detail: String,
        scope: DataScope,
    },
    /// Admission rejected
    #[error("risk violation: {0}")]
    Risk(#[from] RiskViolation),
    /// Order submission failed after the retry policy
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
    /// Fill not confirmed before the deadline
    #[error("fill unverified for {symbol} (order {order_id})")]
    FillUnverified { symbol: String, order_id: String },
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("gateway: {0}")]
    Gateway(GatewayError),
}

impl EngineError {
    /// Map a gateway read failure for `symbol`
    pub fn from_gateway(symbol: &str, err: GatewayError) -> Self {
        match err {
            GatewayError::DataUnavailable(detail) => EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                detail,
                scope: DataScope::Symbol,
            },
            GatewayError::FeedUnavailable(detail) => EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                detail,
                scope: DataScope::Feed,
            },
            GatewayError::Rejected(e) => EngineError::Execution(e),
            other => EngineError::Gateway(other),
        }
    }

    /// Whether the failure says nothing about this symbol in particular
    pub fn is_feed_level(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable {
                scope: DataScope::Feed,
                ..
            }
        )
    }

    /// Whether only this symbol's data is missing or stale
    pub fn is_symbol_data(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable {
                scope: DataScope::Symbol,
                ..
            }
        )
    }

    /// Short tag for diagnostics and metrics
    pub fn tag(&self) -> &'static str {
        match self {
            EngineError::DataUnavailable { .. } => "data_unavailable",
            EngineError::Risk(_) => "risk_violation",
            EngineError::Execution(e) => e.kind.tag(),
            EngineError::FillUnverified { .. } => "fill_unverified",
            EngineError::Ledger(_) => "ledger",
            EngineError::Gateway(_) => "gateway",
        }
    }
}
