use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use rust_decimal::Decimal;

use crate::error::ExchangeError;

/// Chart interval supported by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
}

impl Interval {
    pub const ALL: [Interval; 4] = [
        Interval::OneHour,
        Interval::FourHours,
        Interval::OneDay,
        Interval::OneWeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
        }
    }

    /// Candles requested per chart: a week of hours, four weeks of 4h,
    /// three months of days, a year of weeks.
    pub fn default_limit(&self) -> u16 {
        match self {
            Interval::OneHour | Interval::FourHours => 168,
            Interval::OneDay => 90,
            Interval::OneWeek => 52,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            Interval::OneHour => Duration::from_secs(60),
            Interval::FourHours => Duration::from_secs(120),
            Interval::OneDay => Duration::from_secs(300),
            Interval::OneWeek => Duration::from_secs(900),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            "1w" => Ok(Interval::OneWeek),
            other => Err(ExchangeError::InvalidInterval(other.to_string())),
        }
    }
}

/// Latest 24h statistics for one trading pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent_24h: Decimal,
    pub volume_24h: Decimal,
    pub quote_volume_24h: Decimal,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub captured_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: SystemTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub interval: Interval,
}

impl Candle {
    /// low <= min(open, close) and high >= max(open, close)
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.low <= self.high
    }
}

/// Exchange metadata for one listed pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolMeta {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: String,
}

impl SymbolMeta {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }
}

/// Parameters of one kline request; one cache entry per distinct key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Interval,
    pub limit: u16,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            limit: interval.default_limit(),
        }
    }
}

impl fmt::Display for CandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} x{}", self.symbol, self.interval, self.limit)
    }
}
