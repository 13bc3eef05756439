use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use rust_decimal::Decimal;

use crate::market_data::symbols::to_pair;
use crate::market_data::types::{CandleKey, Interval};

const PREFIX: &str = "DASHBOARD_";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub exchange: ExchangeConfig,
    pub cache: CacheConfig,
    pub dashboard: DashboardConfig,
    /// `None` disables the Prometheus exporter.
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub rate_limit_per_minute: u32,
    pub rate_limit_max_wait: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com/api/v3".to_string(),
            request_timeout: Duration::from_secs(5),
            rate_limit_per_minute: 1200,
            rate_limit_max_wait: Duration::from_secs(1),
        }
    }
}

/// Time-to-live per data kind. Candle series use `Interval::default_ttl`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ticker_ttl: Duration,
    pub tickers_ttl: Duration,
    pub symbols_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ticker_ttl: Duration::from_secs(30),
            tickers_ttl: Duration::from_secs(60),
            symbols_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Pairs shown as price cards.
    pub symbols: Vec<String>,
    pub charts: Vec<CandleKey>,
    pub top_n: usize,
    pub quote_asset: String,
    pub primary_refresh: Duration,
    pub ranking_refresh: Duration,
    pub chart_refresh: Duration,
    pub symbols_refresh: Duration,
    /// Initial holdings as (pair, quantity).
    pub portfolio: Vec<(String, Decimal)>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            charts: vec![CandleKey::new("BTCUSDT", Interval::OneHour)],
            top_n: 10,
            quote_asset: "USDT".to_string(),
            primary_refresh: Duration::from_secs(30),
            ranking_refresh: Duration::from_secs(60),
            chart_refresh: Duration::from_secs(300),
            symbols_refresh: Duration::from_secs(3600),
            portfolio: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // dotenvy loads .env, but doesn't override already-set env vars
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let log_level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let exchange_defaults = ExchangeConfig::default();
        let exchange = ExchangeConfig {
            base_url: var("API_BASE_URL").unwrap_or(exchange_defaults.base_url),
            request_timeout: positive_millis(&var, "REQUEST_TIMEOUT_MS", exchange_defaults.request_timeout)?,
            rate_limit_per_minute: parse_or(&var, "RATE_LIMIT_PER_MINUTE", exchange_defaults.rate_limit_per_minute)?,
            rate_limit_max_wait: millis(&var, "RATE_LIMIT_MAX_WAIT_MS", exchange_defaults.rate_limit_max_wait)?,
        };
        if exchange.rate_limit_per_minute == 0 {
            bail!("{PREFIX}RATE_LIMIT_PER_MINUTE must be positive");
        }

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            ticker_ttl: secs(&var, "TICKER_TTL_SECS", cache_defaults.ticker_ttl)?,
            tickers_ttl: secs(&var, "RANKING_TTL_SECS", cache_defaults.tickers_ttl)?,
            symbols_ttl: secs(&var, "SYMBOLS_TTL_SECS", cache_defaults.symbols_ttl)?,
        };

        let defaults = DashboardConfig::default();
        let quote_asset = var("QUOTE_ASSET")
            .map(|q| q.to_uppercase())
            .unwrap_or(defaults.quote_asset);

        let symbols = match var("SYMBOLS") {
            Some(raw) => parse_symbols(&raw, &quote_asset),
            None => defaults.symbols,
        };
        let charts = match var("CHARTS") {
            Some(raw) => parse_charts(&raw, &quote_asset)?,
            None => defaults.charts,
        };
        let portfolio = match var("PORTFOLIO") {
            Some(raw) => parse_portfolio(&raw, &quote_asset)?,
            None => defaults.portfolio,
        };

        let dashboard = DashboardConfig {
            symbols,
            charts,
            top_n: parse_or(&var, "TOP_N", defaults.top_n)?,
            quote_asset,
            primary_refresh: secs(&var, "PRIMARY_REFRESH_SECS", defaults.primary_refresh)?,
            ranking_refresh: secs(&var, "RANKING_REFRESH_SECS", defaults.ranking_refresh)?,
            chart_refresh: secs(&var, "CHART_REFRESH_SECS", defaults.chart_refresh)?,
            symbols_refresh: secs(&var, "SYMBOLS_REFRESH_SECS", defaults.symbols_refresh)?,
            portfolio,
        };

        let metrics_port = match parse_or(&var, "METRICS_PORT", 9000u16)? {
            0 => None,
            port => Some(port),
        };

        Ok(Self {
            log_level,
            exchange,
            cache,
            dashboard,
            metrics_port,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid {PREFIX}{name}: {raw:?}")),
        None => Ok(default),
    }
}

fn secs<F>(var: &F, name: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_or(var, name, default.as_secs())?;
    if secs == 0 {
        bail!("{PREFIX}{name} must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

fn millis<F>(var: &F, name: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(var, name, default.as_millis() as u64).map(Duration::from_millis)
}

fn positive_millis<F>(var: &F, name: &str, default: Duration) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let duration = millis(var, name, default)?;
    if duration.is_zero() {
        bail!("{PREFIX}{name} must be at least one millisecond");
    }
    Ok(duration)
}

fn parse_symbols(raw: &str, quote: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let pair = to_pair(pair, quote);
        if !symbols.contains(&pair) {
            symbols.push(pair);
        }
    }
    symbols
}

/// `BTC:1h,ETHUSDT:1d`
fn parse_charts(raw: &str, quote: &str) -> anyhow::Result<Vec<CandleKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (symbol, interval) = item
                .split_once(':')
                .with_context(|| format!("chart {item:?}: expected SYMBOL:INTERVAL"))?;
            let interval: Interval = interval
                .parse()
                .with_context(|| format!("chart {item:?}"))?;
            Ok(CandleKey::new(to_pair(symbol, quote), interval))
        })
        .collect()
}

/// `BTC:0.5,ETH:2`
fn parse_portfolio(raw: &str, quote: &str) -> anyhow::Result<Vec<(String, Decimal)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (symbol, quantity) = item
                .split_once(':')
                .with_context(|| format!("holding {item:?}: expected SYMBOL:QUANTITY"))?;
            let quantity = Decimal::from_str(quantity.trim())
                .with_context(|| format!("holding {item:?}: invalid quantity"))?;
            if quantity.is_sign_negative() && !quantity.is_zero() {
                bail!("holding {item:?}: quantity must not be negative");
            }
            Ok((to_pair(symbol, quote), quantity))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.exchange.rate_limit_per_minute, 1200);
        assert_eq!(config.exchange.request_timeout, Duration::from_secs(5));
        assert_eq!(config.cache.ticker_ttl, Duration::from_secs(30));
        assert_eq!(config.dashboard.symbols, ["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.dashboard.top_n, 10);
        assert_eq!(config.dashboard.primary_refresh, Duration::from_secs(30));
        assert_eq!(config.dashboard.ranking_refresh, Duration::from_secs(60));
        assert_eq!(config.metrics_port, Some(9000));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("DASHBOARD_SYMBOLS", "btc, SOLUSDT,btc"),
            ("DASHBOARD_CHARTS", "ETH:1d,BTCUSDT:1w"),
            ("DASHBOARD_PORTFOLIO", "BTC:0.5, ETH:2"),
            ("DASHBOARD_TOP_N", "5"),
            ("DASHBOARD_METRICS_PORT", "0"),
            ("DASHBOARD_REQUEST_TIMEOUT_MS", "2500"),
        ])
        .unwrap();

        assert_eq!(config.dashboard.symbols, ["BTCUSDT", "SOLUSDT"]);
        assert_eq!(config.dashboard.charts[0], CandleKey::new("ETHUSDT", Interval::OneDay));
        assert_eq!(config.dashboard.charts[1].limit, 52);
        assert_eq!(
            config.dashboard.portfolio,
            [
                ("BTCUSDT".to_string(), Decimal::new(5, 1)),
                ("ETHUSDT".to_string(), Decimal::TWO)
            ]
        );
        assert_eq!(config.dashboard.top_n, 5);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.exchange.request_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(config(&[("DASHBOARD_TOP_N", "ten")]).is_err());
        assert!(config(&[("DASHBOARD_CHARTS", "BTC:2h")]).is_err());
        assert!(config(&[("DASHBOARD_CHARTS", "BTC")]).is_err());
        assert!(config(&[("DASHBOARD_PORTFOLIO", "BTC:-1")]).is_err());
        assert!(config(&[("DASHBOARD_TICKER_TTL_SECS", "0")]).is_err());
        assert!(config(&[("DASHBOARD_RATE_LIMIT_PER_MINUTE", "0")]).is_err());
        assert!(config(&[("DASHBOARD_REQUEST_TIMEOUT_MS", "0")]).is_err());
    }

    #[test]
    fn zero_max_wait_means_reject_at_once() {
        let config = config(&[("DASHBOARD_RATE_LIMIT_MAX_WAIT_MS", "0")]).unwrap();
        assert_eq!(config.exchange.rate_limit_max_wait, Duration::ZERO);
    }
}
