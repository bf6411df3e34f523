//! Run command implementation

use crate::clock::SystemClock;
use crate::config::{Config, ExecutionMode};
use crate::data::TradeLog;
use crate::engine::Engine;
use crate::gateway::{BrokerGateway, PaperGateway, RestGateway, RestGatewayConfig};
use clap::Args;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Simulate fills locally instead of sending orders to the broker
    #[arg(long)]
    pub paper: bool,

    /// Override the configured symbol list (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

impl RunArgs {
    /// Execution mode after applying command-line overrides
    pub fn mode(&self, config: &Config) -> ExecutionMode {
        if self.paper {
            ExecutionMode::Simulated
        } else {
            config.execution.mode
        }
    }

    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if !self.symbols.is_empty() {
            config.engine.symbols = self.symbols.iter().map(|s| s.to_uppercase()).collect();
        }

        let mode = self.mode(&config);
        let rest: Arc<dyn BrokerGateway> = Arc::new(RestGateway::new(
            RestGatewayConfig::from_config(&config.gateway)?,
        )?);
        let gateway: Arc<dyn BrokerGateway> = match mode {
            ExecutionMode::Simulated => Arc::new(PaperGateway::default().with_market_data(rest)),
            ExecutionMode::Paper => rest,
            ExecutionMode::Live => {
                tracing::warn!(base_url = %config.gateway.base_url, "Live trading enabled");
                rest
            }
        };
        tracing::info!(?mode, symbols = ?config.engine.symbols, "Starting engine");

        let trade_log = TradeLog::open(&config.data.trade_log_path)?;
        let engine = Arc::new(
            Engine::new(&config, gateway, Arc::new(SystemClock))
                .with_trade_log(trade_log)
                .with_diagnostics_file(config.engine.diagnostics_path.clone()),
        );
        tracing::info!("No strategies registered, managing existing positions only");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Ctrl-C received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for ctrl-c"),
            }
            let _ = shutdown_tx.send(true);
        });

        engine.run(shutdown_rx).await
    }
}
