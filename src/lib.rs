//! scalp-engine: risk-gated position lifecycle engine
//!
//! This library provides the core components for:
//! - Freshness-aware market data caching
//! - Admission control, position sizing and session risk state
//! - Order submission with classified broker errors and bounded retry
//! - Position ledger with broker reconciliation
//! - Adaptive stop, breakeven and trailing exits
//! - Cooldown scheduling with an adaptive multiplier
//! - A tick-driven engine loop with diagnostics
//! - Trade logging and the observability stack

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod position;
pub mod risk;
pub mod scheduler;
pub mod signal;
pub mod stops;
pub mod telemetry;
