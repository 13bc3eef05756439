use std::time::Duration;

use rust_decimal::Decimal;

use crate::market_data::symbols::is_listed_pair;
use crate::market_data::types::PriceSnapshot;
use crate::state::reading::{Freshness, Reading};

#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    /// 1-based.
    pub rank: usize,
    pub symbol: String,
    pub volume_24h: Decimal,
    pub last_price: Decimal,
    pub price_change_percent_24h: Decimal,
}

/// Top `n` by 24h base volume, highest first. Equal volumes order by symbol.
pub fn rank_by_volume<'a, I>(snapshots: I, n: usize) -> Vec<RankingEntry>
where
    I: IntoIterator<Item = &'a PriceSnapshot>,
{
    let mut sorted: Vec<&PriceSnapshot> = snapshots.into_iter().collect();
    sorted.sort_by(|a, b| {
        b.volume_24h
            .cmp(&a.volume_24h)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    sorted
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, s)| RankingEntry {
            rank: i + 1,
            symbol: s.symbol.clone(),
            volume_24h: s.volume_24h,
            last_price: s.last_price,
            price_change_percent_24h: s.price_change_percent_24h,
        })
        .collect()
}

/// The volume table as the dashboard shows it.
#[derive(Debug, Clone)]
pub struct RankingView {
    pub quote: String,
    pub entries: Vec<RankingEntry>,
    pub freshness: Freshness,
    pub age: Option<Duration>,
    pub error: Option<String>,
}

impl RankingView {
    /// Ranks the pairs quoted in `quote`, stablecoin pegs left out.
    pub fn from_reading(reading: &Reading<Vec<PriceSnapshot>>, quote: &str, n: usize) -> Self {
        let entries = match reading.value() {
            Some(all) => rank_by_volume(all.iter().filter(|s| is_listed_pair(&s.symbol, quote)), n),
            None => Vec::new(),
        };
        Self {
            quote: quote.to_string(),
            entries,
            freshness: reading.freshness(),
            age: reading.age,
            error: reading.last_failure.as_ref().map(|f| f.error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::reading::CacheState;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn snapshot(symbol: &str, volume: i64) -> PriceSnapshot {
        PriceSnapshot {
            symbol: symbol.to_string(),
            last_price: Decimal::ONE,
            price_change_percent_24h: Decimal::ZERO,
            volume_24h: Decimal::from(volume),
            quote_volume_24h: Decimal::from(volume),
            high_24h: None,
            low_24h: None,
            captured_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn sorts_descending_and_breaks_ties_by_symbol() {
        let snapshots = vec![
            snapshot("ETHUSDT", 50),
            snapshot("BTCUSDT", 100),
            snapshot("SOLUSDT", 50),
            snapshot("ADAUSDT", 50),
        ];
        let ranked = rank_by_volume(&snapshots, 10);

        let symbols: Vec<&str> = ranked.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, ["BTCUSDT", "ADAUSDT", "ETHUSDT", "SOLUSDT"]);
        assert_eq!(ranked.iter().map(|e| e.rank).collect::<Vec<_>>(), [1, 2, 3, 4]);
    }

    #[test]
    fn truncates_to_n() {
        let snapshots: Vec<PriceSnapshot> = (0..15).map(|i| snapshot(&format!("C{i:02}USDT"), i)).collect();
        let ranked = rank_by_volume(&snapshots, 10);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0].symbol, "C14USDT");
        assert_eq!(ranked[9].symbol, "C05USDT");

        assert!(rank_by_volume(&snapshots, 0).is_empty());
        assert!(rank_by_volume(std::iter::empty(), 5).is_empty());
    }

    #[test]
    fn view_filters_quote_and_stablecoins() {
        let reading = Reading {
            value: Some(Arc::new(vec![
                snapshot("BTCUSDT", 10),
                snapshot("USDCUSDT", 1_000),
                snapshot("ETHBTC", 500),
                snapshot("ETHUSDT", 20),
            ])),
            state: CacheState::Fresh,
            expired: false,
            age: Some(Duration::from_secs(3)),
            last_failure: None,
        };

        let view = RankingView::from_reading(&reading, "USDT", 10);
        let symbols: Vec<&str> = view.entries.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, ["ETHUSDT", "BTCUSDT"]);
        assert_eq!(view.freshness, Freshness::Live);
        assert!(view.error.is_none());
    }

    #[test]
    fn view_of_empty_reading_is_unavailable() {
        let view = RankingView::from_reading(&Reading::empty(), "USDT", 10);
        assert!(view.entries.is_empty());
        assert_eq!(view.freshness, Freshness::Unavailable);
    }
}
