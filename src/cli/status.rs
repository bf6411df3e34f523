//! Status command implementation

use crate::config::Config;
use crate::data::{TradeLog, TradeSummary};
use crate::engine::DiagnosticsHandle;
use clap::Args;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print the raw diagnostics JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let path = &config.engine.diagnostics_path;
        let diagnostics = match DiagnosticsHandle::read_from(path) {
            Ok(d) => d,
            Err(e) => {
                println!("scalp-engine status");
                println!("  No diagnostics at {} ({e})", path.display());
                println!("  Status: Not running");
                return Ok(());
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            return Ok(());
        }

        let trades = TradeLog::read_all(&config.data.trade_log_path)?;
        let summary = TradeSummary::from_records(&trades);

        println!("scalp-engine status");
        println!(
            "  Status: {}",
            if diagnostics.running { "Running" } else { "Stopped" }
        );
        println!(
            "  Data: {}",
            if diagnostics.data_healthy { "healthy" } else { "UNHEALTHY" }
        );
        if !diagnostics.unhealthy_symbols.is_empty() {
            println!("  No data: {}", diagnostics.unhealthy_symbols.join(", "));
        }
        if let Some(at) = diagnostics.updated_at {
            println!("  Updated: {at}");
        }
        if let Some(equity) = diagnostics.equity {
            println!("  Equity: {equity}");
        }
        println!("  Daily P&L: {}", diagnostics.daily_realized_pnl);
        println!("  Cooldown multiplier: {}", diagnostics.cooldown_multiplier);
        if let Some(secs) = diagnostics.global_pause_remaining_secs {
            println!("  Global pause: {secs}s remaining");
        }

        println!("  Positions ({}):", diagnostics.active_positions.len());
        for p in &diagnostics.active_positions {
            println!(
                "    {} {} x{} @ {} stop {} [{:?}]",
                p.symbol, p.side, p.quantity, p.entry_price, p.stop_price, p.stop_state
            );
        }
        if !diagnostics.last_filtered_symbols.is_empty() {
            println!("  Filtered: {}", diagnostics.last_filtered_symbols.join(", "));
        }
        for (symbol, error) in &diagnostics.last_errors_by_symbol {
            println!("  Last error {symbol}: {error}");
        }

        println!(
            "  Trades: {} ({} wins, {:.1}% win rate), P&L {}, avg R {}",
            summary.trades,
            summary.wins,
            summary.win_rate() * rust_decimal_macros::dec!(100),
            summary.realized_pnl,
            summary.average_r.round_dp(2)
        );
        Ok(())
    }
}
