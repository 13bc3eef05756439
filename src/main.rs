use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use market_dashboard::config::Config;
use market_dashboard::dashboard::{self, Dashboard, Scheduler, input};
use market_dashboard::market_data::ExchangeClient;
use market_dashboard::state::MarketCache;

/// Logs go to stderr; stdout carries the rendered frames.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level);

    if let Some(port) = config.metrics_port {
        market_dashboard::metrics::init_metrics_server(port)?;
        info!(port, "metrics exporter listening");
    }

    info!(
        api = %config.exchange.base_url,
        symbols = ?config.dashboard.symbols,
        "market-dashboard starting"
    );

    let client = ExchangeClient::new(&config.exchange).context("failed to build exchange client")?;

    // One cache for the whole process, cheap to clone (just Arc bumps)
    let market = MarketCache::new(Arc::new(client), &config.cache);

    let ui = Dashboard::new(market.clone(), &config.dashboard)?;
    let scheduler = Scheduler::new(market.clone(), config.dashboard.clone());

    let (update_tx, update_rx) = mpsc::channel(dashboard::UPDATE_CHANNEL_BUFFER);
    let (command_tx, command_rx) = mpsc::channel(dashboard::COMMAND_CHANNEL_BUFFER);

    let widget_handles = scheduler.spawn(update_tx);
    input::spawn_stdin_reader(command_tx).context("failed to start stdin reader")?;
    let ui_handle = tokio::spawn(ui.run(update_rx, command_rx));

    tokio::select! {
        res = ui_handle => {
            match res {
                Ok(Ok(())) => info!("dashboard exited"),
                Ok(Err(err)) => warn!(error = %err, "dashboard returned error"),
                Err(err) => warn!(error = %err, "dashboard task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
    }

    for handle in widget_handles {
        handle.abort();
    }
    market.shutdown();

    Ok(())
}
