//! Engine diagnostics snapshot
//!
//! Readers always get a clone; the driver is the only writer. The snapshot
//! is also written to disk each slow tick for the `status` command.

use crate::position::Position;
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Point-in-time view of the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub running: bool,
    pub data_healthy: bool,
    /// Symbols whose quote or bars were missing or stale on the last tick
    #[serde(default)]
    pub unhealthy_symbols: Vec<String>,
    pub active_positions: Vec<Position>,
    /// Symbols skipped by cooldown, pause or exclusion on the last slow tick
    pub last_filtered_symbols: Vec<String>,
    pub cooldown_multiplier: Decimal,
    pub global_pause_remaining_secs: Option<i64>,
    pub last_execution_error: Option<String>,
    pub last_errors_by_symbol: BTreeMap<String, String>,
    pub equity: Option<Decimal>,
    pub daily_realized_pnl: Decimal,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Shared handle to the current [`Diagnostics`]
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsHandle {
    inner: Arc<RwLock<Diagnostics>>,
}

impl DiagnosticsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloned snapshot
    pub fn snapshot(&self) -> Diagnostics {
        self.inner.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Diagnostics)) {
        f(&mut self.inner.write());
    }

    /// Write the snapshot as pretty JSON, replacing the file atomically
    pub fn write_to(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    /// Load a snapshot previously written by [`Self::write_to`]
    pub fn read_from(path: impl AsRef<Path>) -> anyhow::Result<Diagnostics> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading diagnostics {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_is_a_copy() {
        let handle = DiagnosticsHandle::new();
        let before = handle.snapshot();
        handle.update(|d| {
            d.running = true;
            d.cooldown_multiplier = dec!(1.25);
        });
        assert!(!before.running);
        assert!(handle.snapshot().running);
        assert_eq!(handle.snapshot().cooldown_multiplier, dec!(1.25));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagnostics.json");
        let handle = DiagnosticsHandle::new();
        handle.update(|d| {
            d.data_healthy = true;
            d.last_errors_by_symbol
                .insert("AAPL".to_string(), "wash_trade".to_string());
        });

        handle.write_to(&path).unwrap();
        let loaded = DiagnosticsHandle::read_from(&path).unwrap();
        assert!(loaded.data_healthy);
        assert_eq!(loaded.last_errors_by_symbol["AAPL"], "wash_trade");
    }
}
