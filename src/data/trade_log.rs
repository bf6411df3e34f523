//! Append-only trade log
//!
//! One finalized [`TradeRecord`] per line as JSON. Each append is flushed
//! before returning so a crash never loses a closed trade.

use crate::position::TradeRecord;
use anyhow::Context;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// JSON-lines writer for finalized trades
pub struct TradeLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TradeLog {
    /// Open `path` for appending, creating it and its directory if missing
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating trade log directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening trade log {}", path.display()))?;
        tracing::info!(path = %path.display(), "Trade log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it
    pub fn append(&self, record: &TradeRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .with_context(|| format!("writing trade log {}", self.path.display()))?;
        file.flush()?;
        tracing::debug!(trade_id = %record.id, symbol = %record.symbol, "Trade logged");
        Ok(())
    }

    /// Read every record in a trade log
    ///
    /// A missing file is an empty log. Unparseable lines are skipped with a
    /// warning.
    pub fn read_all(path: impl AsRef<Path>) -> anyhow::Result<Vec<TradeRecord>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("opening trade log {}", path.display()))
            }
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(line = idx + 1, error = %e, "Skipping malformed trade log line")
                }
            }
        }
        Ok(records)
    }
}

/// Aggregate figures over a set of trades
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeSummary {
    pub trades: usize,
    pub wins: usize,
    pub realized_pnl: Decimal,
    pub average_r: Decimal,
}

impl TradeSummary {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total_r: Decimal = records.iter().map(|r| r.r_multiple).sum();
        Self {
            trades: records.len(),
            wins: records.iter().filter(|r| r.is_win()).count(),
            realized_pnl: records.iter().map(|r| r.realized_pnl).sum(),
            average_r: total_r / Decimal::from(records.len()),
        }
    }

    /// Winning fraction, zero with no trades
    pub fn win_rate(&self) -> Decimal {
        if self.trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.trades)
    }
}
