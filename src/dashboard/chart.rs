use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::market_data::types::Candle;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Closes shown per sparkline.
pub const SPARK_WIDTH: usize = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSummary {
    pub candles: usize,
    pub first_open: Decimal,
    pub last_close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    /// Last close against first open, percent.
    pub change_pct: Option<Decimal>,
}

impl ChartSummary {
    /// `None` for an empty series.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let first = candles.first()?;
        let last = candles.last()?;

        let mut high = first.high;
        let mut low = first.low;
        let mut volume = Decimal::ZERO;
        for candle in candles {
            high = high.max(candle.high);
            low = low.min(candle.low);
            volume = volume.saturating_add(candle.volume);
        }

        let change_pct = (last.close - first.open)
            .checked_div(first.open)
            .map(|ratio| (ratio * Decimal::ONE_HUNDRED).round_dp(2));

        Some(Self {
            candles: candles.len(),
            first_open: first.open,
            last_close: last.close,
            high,
            low,
            volume,
            change_pct,
        })
    }
}

/// One block character per close, scaled between the lowest and highest
/// close of the last `width` candles.
pub fn sparkline(candles: &[Candle], width: usize) -> String {
    let tail = &candles[candles.len().saturating_sub(width)..];
    let Some(min) = tail.iter().map(|c| c.close).min() else {
        return String::new();
    };
    let max = tail.iter().map(|c| c.close).max().unwrap_or(min);
    let span = max - min;
    let top = Decimal::from(SPARK_LEVELS.len() - 1);

    tail.iter()
        .map(|c| {
            if span.is_zero() {
                return SPARK_LEVELS[0];
            }
            let level = ((c.close - min) / span * top).round();
            let idx = level.to_usize().unwrap_or(0).min(SPARK_LEVELS.len() - 1);
            SPARK_LEVELS[idx]
        })
        .collect()
}
