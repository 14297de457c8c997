//! Run command implementation

use crate::config::{Config, Environment};
use crate::engine::Orchestrator;
use crate::execution::{DryRunVenue, OrderManager};
use crate::feed::BinanceIngest;
use crate::notify::TracingSink;
use crate::state::MemoryKv;
use anyhow::Result;
use clap::Args;
use tokio::sync::oneshot;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Force dry-run regardless of ENVIRONMENT
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> Result<()> {
        if self.dry_run {
            config.environment = Environment::DryRun;
        }
        if config.environment != Environment::DryRun {
            // The live/testnet venue adapter is deployed alongside the
            // engine; this binary wires only the synthetic venue.
            anyhow::bail!(
                "{:?} requires a venue adapter; run with --dry-run",
                config.environment
            );
        }

        if config.instruments.is_empty() {
            // "ALL perpetual USDT pairs" discovery runs against the real
            // venue adapter; the synthetic venue needs an explicit universe.
            anyhow::bail!("instrument discovery is unavailable in dry run; set INSTRUMENTS");
        }

        tracing::info!(
            instruments = config.instruments.len(),
            interval = %config.interval,
            "Starting engine (dry run)"
        );

        let venue = DryRunVenue::new(&config.instruments);
        let mut orders = OrderManager::initialize(venue, config.max_slippage_pct).await?;
        orders
            .apply_leverage(&config.instruments, config.leverage)
            .await?;
        let mut orchestrator =
            Orchestrator::new(config.clone(), orders, MemoryKv::new(), TracingSink);
        orchestrator.init().await?;

        let mut ingest = BinanceIngest::new(config.feed.clone(), true);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received");
                let _ = shutdown_tx.send(());
            }
        });

        orchestrator.run(&mut ingest, shutdown_rx).await
    }
}
