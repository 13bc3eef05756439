use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, NetworkError};
use crate::market_data::normalize;
use crate::market_data::rate_limit::{MAX_RETRY_AFTER, RateLimiter};
use crate::market_data::types::{Candle, Interval, PriceSnapshot, SymbolMeta};
use crate::metrics;

/// Largest kline page the exchange serves.
pub const MAX_CANDLE_LIMIT: u16 = 1000;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Read-only market data from the exchange.
///
/// Implementations never retry; the refresh cache decides when to call again.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn fetch_ticker(&self, symbol: &str) -> Result<PriceSnapshot, ExchangeError>;

    /// 24h statistics for every listed pair.
    async fn fetch_tickers(&self) -> Result<Vec<PriceSnapshot>, ExchangeError>;

    async fn fetch_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError>;

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u16,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Ticker,
    Tickers,
    ExchangeInfo,
    Klines,
}

impl Endpoint {
    fn path(&self) -> &'static str {
        match self {
            Endpoint::Ticker | Endpoint::Tickers => "/ticker/24hr",
            Endpoint::ExchangeInfo => "/exchangeInfo",
            Endpoint::Klines => "/klines",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Endpoint::Ticker => "ticker",
            Endpoint::Tickers => "tickers",
            Endpoint::ExchangeInfo => "exchange_info",
            Endpoint::Klines => "klines",
        }
    }

    /// Request weight charged by the exchange.
    fn weight(&self) -> u32 {
        match self {
            Endpoint::Ticker | Endpoint::Klines => 2,
            Endpoint::ExchangeInfo => 20,
            Endpoint::Tickers => 80,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// reqwest-backed client for the public spot REST API.
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    limiter: RateLimiter,
}

impl ExchangeClient {
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("CryptoDashboard/1.0")
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(config.rate_limit_per_minute, config.rate_limit_max_wait),
        })
    }

    async fn get_json(
        &self,
        endpoint: Endpoint,
        subject: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ExchangeError> {
        self.limiter.acquire(endpoint.weight(), endpoint.label()).await?;

        let url = format!("{}{}", self.base_url, endpoint.path());
        let started = Instant::now();

        let result = self.send(&url, endpoint, subject, query).await;

        metrics::record_request(endpoint.label(), outcome(&result));
        metrics::record_request_latency(endpoint.label(), started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn send(
        &self,
        url: &str,
        endpoint: Endpoint,
        subject: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ExchangeError> {
        debug!(url, ?query, "GET");

        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(ExchangeError::from_transport)?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response.text().await.map_err(ExchangeError::from_transport)?;

        if !status.is_success() {
            let err = classify_status(status, &body, subject, retry_after);
            if let ExchangeError::RateLimited { retry_after } = &err {
                self.limiter.block_for(*retry_after).await;
            }
            warn!(endpoint = endpoint.label(), %status, error = %err, "request failed");
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Malformed(format!("{}: invalid JSON: {e}", endpoint.label())))
    }
}

fn outcome(result: &Result<Value, ExchangeError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Map a non-2xx response onto the error taxonomy.
///
/// The exchange reports request errors as HTTP 400 with a JSON body carrying
/// a numeric code: -1121 is an unknown symbol, -1120 an invalid interval.
fn classify_status(
    status: StatusCode,
    body: &str,
    subject: &str,
    retry_after: Option<Duration>,
) -> ExchangeError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ExchangeError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        };
    }
    if status == StatusCode::NOT_FOUND {
        return ExchangeError::NotFound(subject.to_string());
    }

    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody { code: -1121, .. }) => ExchangeError::NotFound(subject.to_string()),
        Ok(ApiErrorBody { code: -1120, msg }) => ExchangeError::InvalidInterval(msg),
        _ => NetworkError::Http(status.as_u16()).into(),
    }
}

#[async_trait]
impl ExchangeApi for ExchangeClient {
    async fn fetch_ticker(&self, symbol: &str) -> Result<PriceSnapshot, ExchangeError> {
        let raw = self
            .get_json(Endpoint::Ticker, symbol, &[("symbol", symbol.to_string())])
            .await?;
        normalize::to_price_snapshot(&raw, SystemTime::now())
    }

    async fn fetch_tickers(&self) -> Result<Vec<PriceSnapshot>, ExchangeError> {
        let raw = self.get_json(Endpoint::Tickers, "*", &[]).await?;
        normalize::to_price_snapshots(&raw, SystemTime::now())
    }

    async fn fetch_symbols(&self) -> Result<Vec<SymbolMeta>, ExchangeError> {
        let raw = self.get_json(Endpoint::ExchangeInfo, "*", &[]).await?;
        normalize::to_symbols(&raw)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u16,
    ) -> Result<Vec<Candle>, ExchangeError> {
        if limit == 0 || limit > MAX_CANDLE_LIMIT {
            return Err(ExchangeError::InvalidInterval(format!(
                "limit {limit} outside 1..={MAX_CANDLE_LIMIT}"
            )));
        }

        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let raw = self.get_json(Endpoint::Klines, symbol, &query).await?;
        let candles = normalize::to_candles(&raw, interval)?;
        Ok(keep_latest(candles, limit as usize))
    }
}

fn keep_latest(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}
