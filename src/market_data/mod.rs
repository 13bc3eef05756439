pub mod client;
pub mod normalize;
pub mod rate_limit;
pub mod symbols;
pub mod types;

pub use client::{ExchangeApi, ExchangeClient};
pub use types::{Candle, CandleKey, Interval, PriceSnapshot, SymbolMeta};
