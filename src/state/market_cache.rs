use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::CacheConfig;
use crate::error::ExchangeError;
use crate::market_data::client::ExchangeApi;
use crate::market_data::types::{Candle, CandleKey, PriceSnapshot, SymbolMeta};
use crate::state::reading::{CacheState, Reading};
use crate::state::refresh_cache::{RefreshCache, Source};

/// One cache entry per endpoint and parameters.
#[derive(Eq, Hash, PartialEq, Clone, Debug)]
pub enum CacheKey {
    Ticker(String),
    AllTickers,
    Symbols,
    Candles(CandleKey),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Ticker(symbol) => write!(f, "ticker {symbol}"),
            CacheKey::AllTickers => f.write_str("tickers"),
            CacheKey::Symbols => f.write_str("symbols"),
            CacheKey::Candles(key) => write!(f, "candles {key}"),
        }
    }
}

struct TickerSource {
    api: Arc<dyn ExchangeApi>,
    ttl: Duration,
}

#[async_trait]
impl Source<String, PriceSnapshot> for TickerSource {
    fn ttl(&self, _symbol: &String) -> Duration {
        self.ttl
    }

    async fn fetch(&self, symbol: &String) -> Result<PriceSnapshot, ExchangeError> {
        self.api.fetch_ticker(symbol).await
    }
}

struct AllTickersSource {
    api: Arc<dyn ExchangeApi>,
    ttl: Duration,
}

#[async_trait]
impl Source<(), Vec<PriceSnapshot>> for AllTickersSource {
    fn ttl(&self, _key: &()) -> Duration {
        self.ttl
    }

    async fn fetch(&self, _key: &()) -> Result<Vec<PriceSnapshot>, ExchangeError> {
        self.api.fetch_tickers().await
    }
}

struct SymbolsSource {
    api: Arc<dyn ExchangeApi>,
    ttl: Duration,
}

#[async_trait]
impl Source<(), Vec<SymbolMeta>> for SymbolsSource {
    fn ttl(&self, _key: &()) -> Duration {
        self.ttl
    }

    async fn fetch(&self, _key: &()) -> Result<Vec<SymbolMeta>, ExchangeError> {
        self.api.fetch_symbols().await
    }
}

struct CandleSource {
    api: Arc<dyn ExchangeApi>,
}

#[async_trait]
impl Source<CandleKey, Vec<Candle>> for CandleSource {
    /// Coarser candles change less often, so they stay fresh longer.
    fn ttl(&self, key: &CandleKey) -> Duration {
        key.interval.default_ttl()
    }

    async fn fetch(&self, key: &CandleKey) -> Result<Vec<Candle>, ExchangeError> {
        self.api.fetch_candles(&key.symbol, key.interval, key.limit).await
    }
}

/// All market data the dashboard reads, one refresh cache per endpoint.
///
/// Built once at startup and handed to whoever needs it; cheap to clone
/// (just Arc bumps).
#[derive(Clone)]
pub struct MarketCache {
    tickers: RefreshCache<String, PriceSnapshot>,
    all_tickers: RefreshCache<(), Vec<PriceSnapshot>>,
    symbols: RefreshCache<(), Vec<SymbolMeta>>,
    candles: RefreshCache<CandleKey, Vec<Candle>>,
}

impl MarketCache {
    pub fn new(api: Arc<dyn ExchangeApi>, config: &CacheConfig) -> Self {
        Self {
            tickers: RefreshCache::new(
                "ticker",
                Arc::new(TickerSource {
                    api: Arc::clone(&api),
                    ttl: config.ticker_ttl,
                }),
            ),
            all_tickers: RefreshCache::new(
                "tickers",
                Arc::new(AllTickersSource {
                    api: Arc::clone(&api),
                    ttl: config.tickers_ttl,
                }),
            ),
            symbols: RefreshCache::new(
                "symbols",
                Arc::new(SymbolsSource {
                    api: Arc::clone(&api),
                    ttl: config.symbols_ttl,
                }),
            ),
            candles: RefreshCache::new("candles", Arc::new(CandleSource { api })),
        }
    }

    pub async fn ticker(&self, symbol: &str) -> Reading<PriceSnapshot> {
        self.tickers.get(&symbol.to_string()).await
    }

    pub fn peek_ticker(&self, symbol: &str) -> Reading<PriceSnapshot> {
        self.tickers.peek(&symbol.to_string())
    }

    pub async fn all_tickers(&self) -> Reading<Vec<PriceSnapshot>> {
        self.all_tickers.get(&()).await
    }

    pub async fn symbols(&self) -> Reading<Vec<SymbolMeta>> {
        self.symbols.get(&()).await
    }

    pub async fn candles(&self, key: &CandleKey) -> Reading<Vec<Candle>> {
        self.candles.get(key).await
    }

    pub fn ticker_cache(&self) -> &RefreshCache<String, PriceSnapshot> {
        &self.tickers
    }

    pub fn all_tickers_cache(&self) -> &RefreshCache<(), Vec<PriceSnapshot>> {
        &self.all_tickers
    }

    pub fn symbols_cache(&self) -> &RefreshCache<(), Vec<SymbolMeta>> {
        &self.symbols
    }

    pub fn candles_cache(&self) -> &RefreshCache<CandleKey, Vec<Candle>> {
        &self.candles
    }

    pub fn state(&self, key: &CacheKey) -> CacheState {
        match key {
            CacheKey::Ticker(symbol) => self.tickers.state(symbol),
            CacheKey::AllTickers => self.all_tickers.state(&()),
            CacheKey::Symbols => self.symbols.state(&()),
            CacheKey::Candles(candle_key) => self.candles.state(candle_key),
        }
    }

    pub fn evict(&self, key: &CacheKey) -> bool {
        match key {
            CacheKey::Ticker(symbol) => self.tickers.evict(symbol),
            CacheKey::AllTickers => self.all_tickers.evict(&()),
            CacheKey::Symbols => self.symbols.evict(&()),
            CacheKey::Candles(candle_key) => self.candles.evict(candle_key),
        }
    }

    /// Next read of every key refreshes; current values stay visible meanwhile.
    pub fn invalidate_all(&self) {
        self.tickers.invalidate_all();
        self.all_tickers.invalidate_all();
        self.symbols.invalidate_all();
        self.candles.invalidate_all();
        info!("all market data marked for refresh");
    }

    pub fn shutdown(&self) {
        self.tickers.clear();
        self.all_tickers.clear();
        self.symbols.clear();
        self.candles.clear();
    }
}
