use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::DashboardConfig;
use crate::dashboard::ranking::RankingView;
use crate::market_data::symbols::{MAX_CHART_SYMBOLS, chart_symbols};
use crate::market_data::types::{Candle, CandleKey, PriceSnapshot};
use crate::state::market_cache::MarketCache;
use crate::state::reading::{Freshness, Reading};

/// One element of the dashboard, polled on its own period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Widget {
    PriceCard(String),
    Ranking,
    Chart(CandleKey),
    SymbolList,
}

impl fmt::Display for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Widget::PriceCard(symbol) => write!(f, "price {symbol}"),
            Widget::Ranking => f.write_str("ranking"),
            Widget::Chart(key) => write!(f, "chart {key}"),
            Widget::SymbolList => f.write_str("symbol list"),
        }
    }
}

/// What a widget task hands to the dashboard.
#[derive(Debug, Clone)]
pub enum DashboardUpdate {
    Price {
        symbol: String,
        reading: Reading<PriceSnapshot>,
    },
    Ranking(RankingView),
    Chart {
        key: CandleKey,
        reading: Reading<Vec<Candle>>,
    },
    SymbolList {
        symbols: Vec<String>,
        freshness: Freshness,
    },
}

/// Cache notifications a widget listens to between ticks.
enum Changes {
    Ticker(String, broadcast::Receiver<String>),
    Candles(CandleKey, broadcast::Receiver<CandleKey>),
    Any(broadcast::Receiver<()>),
}

/// `None` once the cache is gone. `Some(None)` when notifications were
/// dropped, which counts as a change.
async fn next_key<K: Clone>(rx: &mut broadcast::Receiver<K>) -> Option<Option<K>> {
    match rx.recv().await {
        Ok(key) => Some(Some(key)),
        Err(RecvError::Lagged(skipped)) => {
            debug!(skipped, "cache notifications lagged");
            Some(None)
        }
        Err(RecvError::Closed) => None,
    }
}

impl Changes {
    async fn changed(&mut self) -> Option<()> {
        loop {
            let hit = match self {
                Changes::Ticker(symbol, rx) => next_key(rx).await?.is_none_or(|k| k == *symbol),
                Changes::Candles(key, rx) => next_key(rx).await?.is_none_or(|k| k == *key),
                Changes::Any(rx) => {
                    next_key(rx).await?;
                    true
                }
            };
            if hit {
                return Some(());
            }
        }
    }
}

/// Drives every widget: a fixed refresh period per widget, plus an early
/// poll whenever the cache replaces the value the widget shows.
pub struct Scheduler {
    market: MarketCache,
    config: Arc<DashboardConfig>,
}

impl Scheduler {
    pub fn new(market: MarketCache, config: DashboardConfig) -> Self {
        Self {
            market,
            config: Arc::new(config),
        }
    }

    pub fn plan(&self) -> Vec<(Widget, Duration)> {
        let config = &self.config;
        let mut plan: Vec<(Widget, Duration)> = config
            .symbols
            .iter()
            .map(|symbol| (Widget::PriceCard(symbol.clone()), config.primary_refresh))
            .collect();
        plan.push((Widget::Ranking, config.ranking_refresh));
        plan.extend(
            config
                .charts
                .iter()
                .map(|key| (Widget::Chart(key.clone()), config.chart_refresh)),
        );
        plan.push((Widget::SymbolList, config.symbols_refresh));
        plan
    }

    /// One task per widget. Tasks stop once `tx` has no receiver.
    pub fn spawn(&self, tx: mpsc::Sender<DashboardUpdate>) -> Vec<JoinHandle<()>> {
        let plan = self.plan();
        info!(widgets = plan.len(), "scheduler starting");

        plan.into_iter()
            .map(|(widget, period)| {
                // Subscribe before the first poll so its own refresh is seen.
                let changes = self.changes(&widget);
                tokio::spawn(run_widget(
                    widget,
                    period,
                    changes,
                    self.market.clone(),
                    Arc::clone(&self.config),
                    tx.clone(),
                ))
            })
            .collect()
    }

    fn changes(&self, widget: &Widget) -> Changes {
        match widget {
            Widget::PriceCard(symbol) => Changes::Ticker(symbol.clone(), self.market.ticker_cache().subscribe()),
            Widget::Ranking => Changes::Any(self.market.all_tickers_cache().subscribe()),
            Widget::Chart(key) => Changes::Candles(key.clone(), self.market.candles_cache().subscribe()),
            Widget::SymbolList => Changes::Any(self.market.symbols_cache().subscribe()),
        }
    }
}

async fn run_widget(
    widget: Widget,
    period: Duration,
    mut changes: Changes,
    market: MarketCache,
    config: Arc<DashboardConfig>,
    tx: mpsc::Sender<DashboardUpdate>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(%widget, ?period, "widget started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = changes.changed() => {
                if changed.is_none() {
                    debug!(%widget, "cache closed, stopping widget");
                    return;
                }
            }
        }

        let update = poll(&widget, &market, &config).await;
        if tx.send(update).await.is_err() {
            debug!(%widget, "dashboard closed, stopping widget");
            return;
        }
    }
}

/// Read the widget's data from the cache. Only a never-fetched key waits on
/// the network here; anything else returns the cached value at once.
pub async fn poll(widget: &Widget, market: &MarketCache, config: &DashboardConfig) -> DashboardUpdate {
    match widget {
        Widget::PriceCard(symbol) => DashboardUpdate::Price {
            symbol: symbol.clone(),
            reading: market.ticker(symbol).await,
        },
        Widget::Ranking => {
            let reading = market.all_tickers().await;
            DashboardUpdate::Ranking(RankingView::from_reading(&reading, &config.quote_asset, config.top_n))
        }
        Widget::Chart(key) => DashboardUpdate::Chart {
            key: key.clone(),
            reading: market.candles(key).await,
        },
        Widget::SymbolList => {
            let reading = market.symbols().await;
            let metas = reading.value().map(Vec::as_slice).unwrap_or_default();
            DashboardUpdate::SymbolList {
                symbols: chart_symbols(metas, &config.quote_asset, MAX_CHART_SYMBOLS),
                freshness: reading.freshness(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::ExchangeError;
    use crate::market_data::client::ExchangeApi;
    use crate::market_data::types::{Interval, SymbolMeta};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::time::SystemTime;

    struct StaticApi;

    fn snapshot(symbol: &str, volume: i64) -> PriceSnapshot {
        PriceSnapshot {
            symbol: symbol.to_string(),
            last_price: Decimal::from(100),
            price_change_percent_24h: Decimal::ONE,
            volume_24h: Decimal::from(volume),
            quote_volume_24h: Decimal::from(volume * 100),
            high_24h: None,
            low_24h: None,
            captured_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[async_trait]
    impl ExchangeApi for StaticApi {
        async fn fetch_ticker(&self, symbol: &str) -> Result<PriceSnapshot, ExchangeError> {
            Ok(snapshot(symbol, 1))
        }

        async fn fetch_tickers(&self) -> Result<Vec<PriceSnapshot>, ExchangeError> {
            Ok(vec![snapshot("BTCUSDT", 10), snapshot("ETHUSDT", 20)])
        }

        async fn fetch_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
            Ok(vec![SymbolMeta {
                symbol: "SOLUSDT".to_string(),
                base_asset: "SOL".to_string(),
                quote_asset: "USDT".to_string(),
                status: "TRADING".to_string(),
            }])
        }

        async fn fetch_candles(
            &self,
            _symbol: &str,
            _interval: Interval,
            _limit: u16,
        ) -> Result<Vec<Candle>, ExchangeError> {
            Ok(Vec::new())
        }
    }

    fn scheduler() -> Scheduler {
        let market = MarketCache::new(Arc::new(StaticApi), &CacheConfig::default());
        Scheduler::new(market, DashboardConfig::default())
    }

    #[test]
    fn plan_covers_every_widget_with_its_period() {
        let plan = scheduler().plan();
        let config = DashboardConfig::default();

        assert_eq!(plan.len(), config.symbols.len() + config.charts.len() + 2);
        assert_eq!(plan[0], (Widget::PriceCard("BTCUSDT".to_string()), config.primary_refresh));
        assert!(plan.contains(&(Widget::Ranking, config.ranking_refresh)));
        assert!(plan.contains(&(Widget::SymbolList, config.symbols_refresh)));
        assert!(plan.contains(&(Widget::Chart(CandleKey::new("BTCUSDT", Interval::OneHour)), config.chart_refresh)));
    }

    #[tokio::test]
    async fn poll_builds_updates_from_cache() {
        let scheduler = scheduler();
        let config = DashboardConfig::default();

        match poll(&Widget::Ranking, &scheduler.market, &config).await {
            DashboardUpdate::Ranking(view) => {
                assert_eq!(view.entries[0].symbol, "ETHUSDT");
                assert_eq!(view.freshness, Freshness::Live);
            }
            other => panic!("unexpected update {other:?}"),
        }

        match poll(&Widget::SymbolList, &scheduler.market, &config).await {
            DashboardUpdate::SymbolList { symbols, .. } => assert_eq!(symbols, ["SOL"]),
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_widget_reports_then_stops_with_the_dashboard() {
        let scheduler = scheduler();
        let (tx, mut rx) = mpsc::channel(64);
        let handles = scheduler.spawn(tx);
        let widgets = handles.len();

        let mut seen = 0;
        while seen < widgets {
            rx.recv().await.unwrap();
            seen += 1;
        }

        drop(rx);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
