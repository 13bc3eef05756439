use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::market_data::types::SymbolMeta;

/// Pegged pairs that would otherwise crowd the volume table and chart picker.
static STABLECOIN_PAIRS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["USDCUSDT", "BUSDUSDT", "TUSDUSDT", "DAIUSDT", "USDPUSDT", "FDUSDUSDT"]
        .into_iter()
        .collect()
});

/// Listed first in the chart picker, in this order.
pub const MAJOR_ASSETS: [&str; 10] = [
    "BTC", "ETH", "BNB", "ADA", "XRP", "SOL", "DOT", "AVAX", "MATIC", "LINK",
];

pub const MAX_CHART_SYMBOLS: usize = 50;

pub fn is_stablecoin_pair(symbol: &str) -> bool {
    STABLECOIN_PAIRS.contains(symbol)
}

/// A pair quoted in `quote` (by suffix) that is not a stablecoin peg.
pub fn is_listed_pair(symbol: &str, quote: &str) -> bool {
    symbol.len() > quote.len() && symbol.ends_with(quote) && !is_stablecoin_pair(symbol)
}

/// `BTC` + `USDT` -> `BTCUSDT`; a symbol already carrying the quote is kept.
pub fn to_pair(symbol: &str, quote: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.len() > quote.len() && symbol.ends_with(quote) {
        symbol
    } else {
        format!("{symbol}{quote}")
    }
}

/// Base assets offered by the chart picker: trading pairs on `quote`,
/// majors first, the rest alphabetical, capped at `limit`.
pub fn chart_symbols(metas: &[SymbolMeta], quote: &str, limit: usize) -> Vec<String> {
    let mut bases: Vec<String> = metas
        .iter()
        .filter(|m| m.is_trading() && is_listed_pair(&m.symbol, quote))
        .map(|m| {
            if m.base_asset.is_empty() {
                m.symbol[..m.symbol.len() - quote.len()].to_string()
            } else {
                m.base_asset.clone()
            }
        })
        .collect();

    if bases.is_empty() {
        return MAJOR_ASSETS.iter().map(|s| s.to_string()).collect();
    }

    bases.sort();
    bases.dedup();

    let mut ordered: Vec<String> = MAJOR_ASSETS
        .iter()
        .filter(|major| bases.iter().any(|b| b == *major))
        .map(|s| s.to_string())
        .collect();
    ordered.extend(bases.into_iter().filter(|b| !MAJOR_ASSETS.contains(&b.as_str())));
    ordered.truncate(limit);
    ordered
}
