//! Plain-text rendering of dashboard widgets. Every function here is pure;
//! the caller decides where the text goes.

use crate::dashboard::chart::{ChartSummary, SPARK_WIDTH, sparkline};
use crate::dashboard::format::{format_age, format_change, format_price, format_volume};
use crate::dashboard::portfolio::PortfolioValuation;
use crate::dashboard::ranking::RankingView;
use crate::market_data::types::{Candle, CandleKey, PriceSnapshot};
use crate::state::reading::{Freshness, Reading};

pub const STALE_MARKER: &str = "[STALE]";
pub const UNAVAILABLE: &str = "unavailable";

fn marker(freshness: Freshness) -> String {
    match freshness {
        Freshness::Stale => format!(" {STALE_MARKER}"),
        Freshness::Live | Freshness::Unavailable => String::new(),
    }
}

fn unavailable<V>(reading: Option<&Reading<V>>) -> String {
    match reading {
        Some(r) if r.is_not_found() => format!("{UNAVAILABLE} (unknown symbol)"),
        Some(r) => match &r.last_failure {
            Some(failure) => format!("{UNAVAILABLE} ({})", failure.error),
            None => format!("{UNAVAILABLE} (loading)"),
        },
        None => format!("{UNAVAILABLE} (loading)"),
    }
}

pub fn section(title: &str) -> String {
    format!("── {title} {}\n", "─".repeat(60usize.saturating_sub(title.chars().count())))
}

pub fn price_card(symbol: &str, reading: Option<&Reading<PriceSnapshot>>) -> String {
    let Some((snapshot, reading)) = reading.and_then(|r| r.value().map(|s| (s, r))) else {
        return format!("{symbol:<12} {}\n", unavailable(reading));
    };

    let (change, trend) = format_change(snapshot.price_change_percent_24h);
    let mut line = format!(
        "{symbol:<12} {:>16}  {} {:>8}  vol {:>9}",
        format_price(snapshot.last_price),
        trend.arrow(),
        change,
        format_volume(snapshot.volume_24h),
    );
    if let (Some(high), Some(low)) = (snapshot.high_24h, snapshot.low_24h) {
        line.push_str(&format!("  H {}  L {}", format_price(high), format_price(low)));
    }
    line.push_str(&format!("  {}{}\n", format_age(reading.age), marker(reading.freshness())));
    line
}

pub fn ranking(view: Option<&RankingView>) -> String {
    let mut out = match view {
        Some(view) => section(&format!("Top {} by 24h volume{}", view.entries.len(), marker(view.freshness))),
        None => section("Top by 24h volume"),
    };

    let Some(view) = view.filter(|v| !v.entries.is_empty()) else {
        match view {
            Some(v) if v.freshness != Freshness::Unavailable => {
                out.push_str(&format!("  no pairs on {}\n", v.quote));
            }
            _ => {
                let reason = view.and_then(|v| v.error.as_deref()).unwrap_or("loading");
                out.push_str(&format!("  {UNAVAILABLE} ({reason})\n"));
            }
        }
        return out;
    };

    out.push_str(&format!(
        "{:>3}  {:<12} {:>16} {:>9} {:>10}\n",
        "#", "SYMBOL", "PRICE", "24H", "VOLUME"
    ));
    for entry in &view.entries {
        let (change, _) = format_change(entry.price_change_percent_24h);
        out.push_str(&format!(
            "{:>3}  {:<12} {:>16} {:>9} {:>10}\n",
            entry.rank,
            entry.symbol,
            format_price(entry.last_price),
            change,
            format_volume(entry.volume_24h),
        ));
    }
    out
}

pub fn chart(key: &CandleKey, reading: Option<&Reading<Vec<Candle>>>) -> String {
    let title = format!("{} {}", key.symbol, key.interval);
    let Some((candles, reading)) = reading.and_then(|r| r.value().map(|c| (c, r))) else {
        return format!("{}  {}\n", section(&title).trim_end(), unavailable(reading));
    };

    let mut out = section(&format!("{title} ({} candles){}", candles.len(), marker(reading.freshness())));
    match ChartSummary::from_candles(candles) {
        Some(summary) => {
            let change = summary
                .change_pct
                .map(|c| format_change(c).0)
                .unwrap_or_else(|| "n/a".to_string());
            out.push_str(&format!(
                "  {} -> {} ({change})  H {}  L {}  vol {}\n",
                format_price(summary.first_open),
                format_price(summary.last_close),
                format_price(summary.high),
                format_price(summary.low),
                format_volume(summary.volume),
            ));
            out.push_str(&format!("  {}\n", sparkline(candles, SPARK_WIDTH)));
        }
        None => out.push_str("  no candles\n"),
    }
    out
}

pub fn portfolio(valuation: &PortfolioValuation) -> String {
    let stale = marker(if valuation.stale { Freshness::Stale } else { Freshness::Live });
    let mut out = section(&format!("Portfolio  total {}{stale}", format_price(valuation.total)));

    if valuation.rows.is_empty() {
        out.push_str("  empty (add SYMBOL QUANTITY)\n");
        return out;
    }

    for row in &valuation.rows {
        match (row.price, row.value) {
            (Some(price), Some(value)) => out.push_str(&format!(
                "  {:<12} {:>14} x {:>16} = {:>18} {:>7}%{}\n",
                row.symbol,
                row.quantity.normalize(),
                format_price(price),
                format_price(value),
                row.allocation_pct.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                marker(row.freshness),
            )),
            _ => out.push_str(&format!(
                "  {:<12} {:>14}   {UNAVAILABLE}\n",
                row.symbol,
                row.quantity.normalize(),
            )),
        }
    }
    if valuation.unpriced() > 0 {
        out.push_str(&format!("  {} holding(s) not valued\n", valuation.unpriced()));
    }
    out
}

pub fn symbol_list(symbols: Option<&(Vec<String>, Freshness)>) -> String {
    match symbols {
        Some((symbols, freshness)) if !symbols.is_empty() => {
            format!("Chart symbols{}: {}\n", marker(*freshness), symbols.join(" "))
        }
        _ => format!("Chart symbols: {UNAVAILABLE}\n"),
    }
}
