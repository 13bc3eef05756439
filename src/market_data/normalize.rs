//! Raw exchange JSON into typed records.
//!
//! Every function here is pure: no I/O, capture time is passed in, and the
//! same input always yields the same output. Numbers arrive string-encoded and
//! are parsed straight into `Decimal`, keeping the scale the exchange sent.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::ExchangeError;
use crate::market_data::types::{Candle, Interval, PriceSnapshot, SymbolMeta};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Number(serde_json::Number),
}

impl RawNumber {
    fn as_text(&self) -> Cow<'_, str> {
        match self {
            RawNumber::Text(s) => Cow::Borrowed(s.trim()),
            RawNumber::Number(n) => Cow::Owned(n.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: Option<String>,
    last_price: Option<RawNumber>,
    price_change_percent: Option<RawNumber>,
    volume: Option<RawNumber>,
    quote_volume: Option<RawNumber>,
    high_price: Option<RawNumber>,
    low_price: Option<RawNumber>,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbol {
    symbol: Option<String>,
    status: Option<String>,
    base_asset: Option<String>,
    quote_asset: Option<String>,
}

fn malformed(msg: impl Into<String>) -> ExchangeError {
    ExchangeError::Malformed(msg.into())
}

fn parse_decimal(field: &str, raw: &RawNumber) -> Result<Decimal, ExchangeError> {
    let text = raw.as_text();
    let unsigned = text.strip_prefix('+').unwrap_or(&text);
    Decimal::from_str(unsigned)
        .or_else(|_| Decimal::from_scientific(unsigned))
        .map_err(|_| malformed(format!("{field}: not a decimal: {text:?}")))
}

fn required(field: &str, raw: Option<&RawNumber>) -> Result<Decimal, ExchangeError> {
    match raw {
        Some(raw) => parse_decimal(field, raw),
        None => Err(malformed(format!("missing required field {field}"))),
    }
}

/// Missing or null defaults to zero; present but unparseable is still an error.
fn optional(field: &str, raw: Option<&RawNumber>) -> Result<Decimal, ExchangeError> {
    Ok(maybe(field, raw)?.unwrap_or(Decimal::ZERO))
}

fn maybe(field: &str, raw: Option<&RawNumber>) -> Result<Option<Decimal>, ExchangeError> {
    raw.map(|raw| parse_decimal(field, raw)).transpose()
}

pub fn to_price_snapshot(raw: &Value, captured_at: SystemTime) -> Result<PriceSnapshot, ExchangeError> {
    let ticker = RawTicker::deserialize(raw).map_err(|e| malformed(format!("ticker: {e}")))?;

    let symbol = match ticker.symbol {
        Some(s) if !s.trim().is_empty() => s.trim().to_uppercase(),
        _ => return Err(malformed("missing required field symbol")),
    };

    let last_price = required("lastPrice", ticker.last_price.as_ref())?;
    if last_price.is_sign_negative() && !last_price.is_zero() {
        return Err(malformed(format!("{symbol}: negative lastPrice {last_price}")));
    }

    Ok(PriceSnapshot {
        symbol,
        last_price,
        price_change_percent_24h: optional("priceChangePercent", ticker.price_change_percent.as_ref())?,
        volume_24h: optional("volume", ticker.volume.as_ref())?,
        quote_volume_24h: optional("quoteVolume", ticker.quote_volume.as_ref())?,
        high_24h: maybe("highPrice", ticker.high_price.as_ref())?,
        low_24h: maybe("lowPrice", ticker.low_price.as_ref())?,
        captured_at,
    })
}

/// All-symbols ticker. Rows that fail to normalize are skipped; the body
/// itself must be an array.
pub fn to_price_snapshots(raw: &Value, captured_at: SystemTime) -> Result<Vec<PriceSnapshot>, ExchangeError> {
    let rows = raw
        .as_array()
        .ok_or_else(|| malformed("ticker list: expected an array"))?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for row in rows {
        match to_price_snapshot(row, captured_at) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(err) => warn!(error = %err, "skipping ticker row"),
        }
    }
    Ok(snapshots)
}

fn open_time(row: &[Value]) -> Result<SystemTime, ExchangeError> {
    let ms = match row.first() {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| malformed("kline: open time missing or not an integer"))?;

    UNIX_EPOCH
        .checked_add(Duration::from_millis(ms))
        .ok_or_else(|| malformed(format!("kline: open time {ms} out of range")))
}

fn kline_field(row: &[Value], idx: usize, field: &str) -> Result<Option<RawNumber>, ExchangeError> {
    match row.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => RawNumber::deserialize(v)
            .map(Some)
            .map_err(|_| malformed(format!("kline: {field} is not a number"))),
    }
}

fn to_candle(row: &Value, interval: Interval) -> Result<Candle, ExchangeError> {
    let row = row
        .as_array()
        .ok_or_else(|| malformed("kline: expected an array row"))?;

    let open_time = open_time(row)?;
    let open = required("open", kline_field(row, 1, "open")?.as_ref())?;
    let high = required("high", kline_field(row, 2, "high")?.as_ref())?;
    let low = required("low", kline_field(row, 3, "low")?.as_ref())?;
    let close = required("close", kline_field(row, 4, "close")?.as_ref())?;
    let volume = optional("volume", kline_field(row, 5, "volume")?.as_ref())?;

    let candle = Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume,
        interval,
    };

    if !candle.is_consistent() {
        return Err(malformed(format!(
            "kline: inconsistent OHLC o={open} h={high} l={low} c={close}"
        )));
    }
    Ok(candle)
}

/// Kline rows into a series ascending by open time. A repeated open time
/// keeps the row delivered last.
pub fn to_candles(raw: &Value, interval: Interval) -> Result<Vec<Candle>, ExchangeError> {
    let rows = raw
        .as_array()
        .ok_or_else(|| malformed("klines: expected an array"))?;

    let mut by_open_time = BTreeMap::new();
    for row in rows {
        let candle = to_candle(row, interval)?;
        by_open_time.insert(candle.open_time, candle);
    }
    Ok(by_open_time.into_values().collect())
}

/// exchangeInfo into a symbol list sorted by symbol, without duplicates.
pub fn to_symbols(raw: &Value) -> Result<Vec<SymbolMeta>, ExchangeError> {
    let info = RawExchangeInfo::deserialize(raw).map_err(|e| malformed(format!("exchangeInfo: {e}")))?;
    let entries = info
        .symbols
        .ok_or_else(|| malformed("exchangeInfo: missing symbols"))?;

    let mut metas: BTreeMap<String, SymbolMeta> = BTreeMap::new();
    for entry in &entries {
        let parsed = match RawSymbol::deserialize(entry) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "skipping exchangeInfo entry");
                continue;
            }
        };
        let Some(symbol) = parsed.symbol.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()) else {
            warn!("skipping exchangeInfo entry without symbol");
            continue;
        };
        metas.insert(
            symbol.clone(),
            SymbolMeta {
                symbol,
                base_asset: parsed.base_asset.unwrap_or_default(),
                quote_asset: parsed.quote_asset.unwrap_or_default(),
                status: parsed.status.unwrap_or_else(|| "TRADING".to_string()),
            },
        );
    }
    Ok(metas.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn ticker_keeps_source_precision() {
        let raw = json!({
            "symbol": "BTCUSDT",
            "lastPrice": "65000.12",
            "priceChangePercent": "+2.5",
            "volume": "1000.50000000",
            "highPrice": "66000.00",
            "lowPrice": "64000.00"
        });

        let snapshot = to_price_snapshot(&raw, UNIX_EPOCH).unwrap();
        assert_eq!(snapshot.symbol, "BTCUSDT");
        assert_eq!(snapshot.last_price, dec("65000.12"));
        assert_eq!(snapshot.last_price.scale(), 2);
        assert_eq!(snapshot.price_change_percent_24h, dec("2.5"));
        assert_eq!(snapshot.volume_24h.scale(), 8);
        assert_eq!(snapshot.high_24h, Some(dec("66000.00")));
        assert_eq!(snapshot.quote_volume_24h, Decimal::ZERO);
    }

    #[test]
    fn large_volume_is_not_truncated() {
        let raw = json!({"symbol": "SHIBUSDT", "lastPrice": "0.00001234", "volume": "123456789012345678.12345678"});
        let snapshot = to_price_snapshot(&raw, UNIX_EPOCH).unwrap();
        assert_eq!(snapshot.volume_24h.to_string(), "123456789012345678.12345678");
        assert_eq!(snapshot.last_price.to_string(), "0.00001234");
    }

    #[test]
    fn optional_fields_default_to_zero() {
        let raw = json!({"symbol": "ETHUSDT", "lastPrice": "3000.1", "volume": null});
        let snapshot = to_price_snapshot(&raw, UNIX_EPOCH).unwrap();
        assert_eq!(snapshot.volume_24h, Decimal::ZERO);
        assert_eq!(snapshot.price_change_percent_24h, Decimal::ZERO);
        assert_eq!(snapshot.high_24h, None);
    }

    #[test]
    fn unparseable_numbers_are_rejected_not_zeroed() {
        let bad_price = json!({"symbol": "ETHUSDT", "lastPrice": "abc"});
        assert!(matches!(
            to_price_snapshot(&bad_price, UNIX_EPOCH),
            Err(ExchangeError::Malformed(_))
        ));

        let bad_volume = json!({"symbol": "ETHUSDT", "lastPrice": "1", "volume": "n/a"});
        assert!(matches!(
            to_price_snapshot(&bad_volume, UNIX_EPOCH),
            Err(ExchangeError::Malformed(_))
        ));

        let missing_price = json!({"symbol": "ETHUSDT"});
        assert!(to_price_snapshot(&missing_price, UNIX_EPOCH).is_err());

        let negative = json!({"symbol": "ETHUSDT", "lastPrice": "-1"});
        assert!(to_price_snapshot(&negative, UNIX_EPOCH).is_err());
    }

    #[test]
    fn numeric_json_values_are_accepted() {
        let raw = json!({"symbol": "bnbusdt", "lastPrice": 612.5, "volume": 10});
        let snapshot = to_price_snapshot(&raw, UNIX_EPOCH).unwrap();
        assert_eq!(snapshot.symbol, "BNBUSDT");
        assert_eq!(snapshot.last_price, dec("612.5"));
        assert_eq!(snapshot.volume_24h, dec("10"));
    }

    #[test]
    fn ticker_list_skips_bad_rows() {
        let raw = json!([
            {"symbol": "BTCUSDT", "lastPrice": "1"},
            {"symbol": "BROKEN", "lastPrice": "x"},
            {"symbol": "ETHUSDT", "lastPrice": "2"}
        ]);
        let snapshots = to_price_snapshots(&raw, UNIX_EPOCH).unwrap();
        assert_eq!(snapshots.len(), 2);

        assert!(to_price_snapshots(&json!({"code": 0}), UNIX_EPOCH).is_err());
    }

    fn kline(open_ms: u64, o: &str, h: &str, l: &str, c: &str, v: &str) -> Value {
        json!([open_ms, o, h, l, c, v, open_ms + 3_599_999, "0", 10, "0", "0", "0"])
    }

    #[test]
    fn candles_are_sorted_and_deduplicated() {
        let raw = json!([
            kline(7_200_000, "3", "4", "2", "3.5", "1"),
            kline(0, "1", "2", "0.5", "1.5", "1"),
            kline(3_600_000, "2", "3", "1", "2.5", "1"),
            kline(3_600_000, "2", "3.1", "1", "2.6", "2"),
        ]);

        let candles = to_candles(&raw, Interval::OneHour).unwrap();
        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
        assert_eq!(candles[1].close, dec("2.6"));
        assert!(candles.iter().all(|c| c.interval == Interval::OneHour));
    }

    #[test]
    fn candle_invariant_violation_is_malformed() {
        let raw = json!([kline(0, "10", "9", "8", "9", "1")]);
        assert!(matches!(
            to_candles(&raw, Interval::OneDay),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[test]
    fn candle_without_volume_defaults_to_zero() {
        let raw = json!([[0, "1", "2", "0.5", "1.5"]]);
        let candles = to_candles(&raw, Interval::OneWeek).unwrap();
        assert_eq!(candles[0].volume, Decimal::ZERO);

        let short = json!([[0, "1", "2", "0.5"]]);
        assert!(to_candles(&short, Interval::OneWeek).is_err());
    }

    #[test]
    fn symbols_sorted_unique_with_default_status() {
        let raw = json!({
            "timezone": "UTC",
            "symbols": [
                {"symbol": "ETHUSDT", "status": "TRADING", "baseAsset": "ETH", "quoteAsset": "USDT"},
                {"symbol": "BTCUSDT", "baseAsset": "BTC", "quoteAsset": "USDT"},
                {"symbol": "ETHUSDT", "status": "BREAK", "baseAsset": "ETH", "quoteAsset": "USDT"},
                {"status": "TRADING"}
            ]
        });

        let metas = to_symbols(&raw).unwrap();
        let names: Vec<_> = metas.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(names, ["BTCUSDT", "ETHUSDT"]);
        assert!(metas[0].is_trading());
        assert_eq!(metas[1].status, "BREAK");

        assert!(to_symbols(&json!({"timezone": "UTC"})).is_err());
    }
}
