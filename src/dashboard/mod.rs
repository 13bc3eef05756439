pub mod chart;
pub mod format;
pub mod input;
pub mod portfolio;
pub mod ranking;
pub mod render;
pub mod scheduler;

use std::collections::HashMap;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::market_data::symbols::to_pair;
use crate::market_data::types::{Candle, CandleKey, PriceSnapshot};
use crate::metrics;
use crate::state::market_cache::{CacheKey, MarketCache};
use crate::state::reading::{CacheState, Freshness, Reading};

pub use input::Command;
pub use portfolio::{Portfolio, PortfolioValuation, value_portfolio};
pub use ranking::{RankingEntry, RankingView, rank_by_volume};
pub use scheduler::{DashboardUpdate, Scheduler, Widget};

/// Scheduler-to-dashboard channel buffer. Widgets are few and updates
/// small; a full buffer just delays a widget task.
pub const UPDATE_CHANNEL_BUFFER: usize = 256;

pub const COMMAND_CHANNEL_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Latest reading of every widget plus the user's portfolio.
pub struct Dashboard {
    market: MarketCache,
    symbols: Vec<String>,
    charts: Vec<CandleKey>,
    prices: HashMap<String, Reading<PriceSnapshot>>,
    ranking: Option<RankingView>,
    candles: HashMap<CandleKey, Reading<Vec<Candle>>>,
    chart_symbols: Option<(Vec<String>, Freshness)>,
    portfolio: Portfolio,
}

impl Dashboard {
    pub fn new(market: MarketCache, config: &DashboardConfig) -> anyhow::Result<Self> {
        let portfolio = Portfolio::with_holdings(&config.quote_asset, config.portfolio.iter().cloned())
            .context("invalid portfolio holdings")?;

        Ok(Self {
            market,
            symbols: config.symbols.clone(),
            charts: config.charts.clone(),
            prices: HashMap::new(),
            ranking: None,
            candles: HashMap::new(),
            chart_symbols: None,
            portfolio,
        })
    }

    pub fn apply(&mut self, update: DashboardUpdate) {
        match update {
            DashboardUpdate::Price { symbol, reading } => {
                self.prices.insert(symbol, reading);
            }
            DashboardUpdate::Ranking(view) => self.ranking = Some(view),
            DashboardUpdate::Chart { key, reading } => {
                self.candles.insert(key, reading);
            }
            DashboardUpdate::SymbolList { symbols, freshness } => {
                self.chart_symbols = Some((symbols, freshness));
            }
        }
    }

    pub fn handle(&mut self, command: Command) -> Control {
        match command {
            Command::Add { symbol, quantity } => match self.portfolio.set(&symbol, quantity) {
                Ok(()) => info!(%symbol, %quantity, "holding updated"),
                Err(e) => warn!(error = %e, "holding rejected"),
            },
            Command::Remove(symbol) => {
                let pair = to_pair(&symbol, self.portfolio.quote());
                if self.portfolio.remove(&pair) {
                    self.release_ticker(&pair);
                } else {
                    warn!(%symbol, "no such holding");
                }
            }
            Command::Clear => {
                let held: Vec<String> = self.portfolio.symbols().map(str::to_string).collect();
                self.portfolio.clear();
                for pair in &held {
                    self.release_ticker(pair);
                }
                info!("portfolio cleared");
            }
            Command::Refresh => self.market.invalidate_all(),
            Command::Quit => return Control::Quit,
        }
        Control::Continue
    }

    /// Drop the cached ticker of a symbol nothing on screen shows any more.
    fn release_ticker(&self, pair: &str) {
        if self.symbols.iter().any(|s| s == pair) {
            return;
        }
        if self.market.evict(&CacheKey::Ticker(pair.to_string())) {
            debug!(symbol = pair, "ticker evicted");
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Valued from what the ticker cache holds right now; never waits.
    pub fn valuation(&self) -> PortfolioValuation {
        let prices: HashMap<String, Reading<PriceSnapshot>> = self
            .portfolio
            .symbols()
            .map(|symbol| (symbol.to_string(), self.market.peek_ticker(symbol)))
            .collect();
        value_portfolio(&self.portfolio, &prices)
    }

    /// Start a background fetch for held symbols that have no usable price.
    fn request_portfolio_prices(&self) {
        for symbol in self.portfolio.symbols() {
            if matches!(
                self.market.peek_ticker(symbol).state,
                CacheState::Empty | CacheState::Stale
            ) {
                let market = self.market.clone();
                let symbol = symbol.to_string();
                tokio::spawn(async move {
                    market.ticker(&symbol).await;
                });
            }
        }
    }

    pub fn widget_count(&self) -> usize {
        self.symbols.len() + self.charts.len() + 3
    }

    pub fn frame(&self) -> String {
        let mut out = render::section("Crypto Dashboard");
        for symbol in &self.symbols {
            out.push_str(&render::price_card(symbol, self.prices.get(symbol)));
        }
        out.push('\n');
        out.push_str(&render::ranking(self.ranking.as_ref()));
        for key in &self.charts {
            out.push('\n');
            out.push_str(&render::chart(key, self.candles.get(key)));
        }
        out.push('\n');
        out.push_str(&render::portfolio(&self.valuation()));
        out.push_str(&render::symbol_list(self.chart_symbols.as_ref()));
        out
    }

    fn draw(&self) {
        println!("{}", self.frame());
        metrics::record_frame(self.widget_count());
    }

    /// Redraw on every widget update, command, or held-symbol price change.
    /// Returns when the scheduler stops or a quit command arrives.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<DashboardUpdate>,
        mut commands: mpsc::Receiver<Command>,
    ) -> anyhow::Result<()> {
        let mut price_changes = self.market.ticker_cache().subscribe();
        let mut commands_open = true;
        let mut prices_open = true;

        info!(widgets = self.widget_count(), holdings = self.portfolio.len(), "dashboard started");
        self.request_portfolio_prices();
        self.draw();

        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(update) => self.apply(update),
                    None => {
                        info!("update channel closed, dashboard shutting down");
                        break;
                    }
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if self.handle(command) == Control::Quit {
                            info!("quit requested");
                            break;
                        }
                    }
                    None => {
                        debug!("command input closed");
                        commands_open = false;
                        continue;
                    }
                },
                changed = price_changes.recv(), if prices_open => match changed {
                    Ok(symbol) if self.portfolio.symbols().any(|s| s == symbol) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        prices_open = false;
                        continue;
                    }
                },
            }

            self.request_portfolio_prices();
            self.draw();
        }

        Ok(())
    }
}
