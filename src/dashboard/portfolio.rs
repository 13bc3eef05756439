use std::collections::HashMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::market_data::symbols::to_pair;
use crate::market_data::types::PriceSnapshot;
use crate::state::reading::{Freshness, Reading};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortfolioError {
    #[error("symbol is empty")]
    EmptySymbol,
    #[error("negative quantity {quantity} for {symbol}")]
    NegativeQuantity { symbol: String, quantity: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioHolding {
    pub symbol: String,
    pub quantity: Decimal,
}

/// User holdings, owned by the dashboard. Symbols are stored as pairs on
/// the quote asset, in insertion order.
#[derive(Debug, Clone)]
pub struct Portfolio {
    quote: String,
    holdings: Vec<PortfolioHolding>,
}

impl Portfolio {
    pub fn new(quote: impl Into<String>) -> Self {
        Self {
            quote: quote.into(),
            holdings: Vec::new(),
        }
    }

    pub fn with_holdings<I>(quote: impl Into<String>, holdings: I) -> Result<Self, PortfolioError>
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        let mut portfolio = Self::new(quote);
        for (symbol, quantity) in holdings {
            portfolio.set(&symbol, quantity)?;
        }
        Ok(portfolio)
    }

    /// Add or replace a holding. Zero removes it.
    pub fn set(&mut self, symbol: &str, quantity: Decimal) -> Result<(), PortfolioError> {
        if symbol.trim().is_empty() {
            return Err(PortfolioError::EmptySymbol);
        }
        let symbol = to_pair(symbol, &self.quote);
        if quantity < Decimal::ZERO {
            return Err(PortfolioError::NegativeQuantity { symbol, quantity });
        }
        if quantity.is_zero() {
            self.remove(&symbol);
            return Ok(());
        }

        match self.holdings.iter_mut().find(|h| h.symbol == symbol) {
            Some(holding) => holding.quantity = quantity,
            None => self.holdings.push(PortfolioHolding { symbol, quantity }),
        }
        Ok(())
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    pub fn remove(&mut self, symbol: &str) -> bool {
        let symbol = to_pair(symbol, &self.quote);
        let before = self.holdings.len();
        self.holdings.retain(|h| h.symbol != symbol);
        self.holdings.len() != before
    }

    pub fn clear(&mut self) {
        self.holdings.clear();
    }

    pub fn holdings(&self) -> &[PortfolioHolding] {
        &self.holdings
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.holdings.iter().map(|h| h.symbol.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuationRow {
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub value: Option<Decimal>,
    /// Share of the priced total, two decimals.
    pub allocation_pct: Option<Decimal>,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioValuation {
    pub rows: Vec<ValuationRow>,
    /// Sum over rows that have a price.
    pub total: Decimal,
    /// Some priced row comes from a stale reading.
    pub stale: bool,
}

impl PortfolioValuation {
    pub fn unpriced(&self) -> usize {
        self.rows.iter().filter(|r| r.value.is_none()).count()
    }
}

/// Values every holding at its current ticker price. Holdings without a
/// price are kept as unavailable rows and left out of the total.
pub fn value_portfolio(
    portfolio: &Portfolio,
    prices: &HashMap<String, Reading<PriceSnapshot>>,
) -> PortfolioValuation {
    let mut rows: Vec<ValuationRow> = portfolio
        .holdings()
        .iter()
        .map(|holding| {
            let reading = prices.get(&holding.symbol);
            let price = reading.and_then(|r| r.value()).map(|s| s.last_price);
            let value = price.and_then(|p| holding.quantity.checked_mul(p));
            ValuationRow {
                symbol: holding.symbol.clone(),
                quantity: holding.quantity,
                price,
                value,
                allocation_pct: None,
                freshness: match (reading, value) {
                    (Some(r), Some(_)) => r.freshness(),
                    _ => Freshness::Unavailable,
                },
            }
        })
        .collect();

    let total = rows
        .iter()
        .filter_map(|r| r.value)
        .fold(Decimal::ZERO, |acc, v| acc.saturating_add(v));

    if !total.is_zero() {
        for row in rows.iter_mut() {
            row.allocation_pct = row
                .value
                .and_then(|v| v.checked_div(total))
                .map(|share| (share * Decimal::ONE_HUNDRED).round_dp(2));
        }
    }

    let stale = rows.iter().any(|r| r.freshness == Freshness::Stale);
    PortfolioValuation { rows, total, stale }
}
