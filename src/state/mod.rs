pub mod market_cache;
pub mod reading;
pub mod refresh_cache;

pub use market_cache::{CacheKey, MarketCache};
pub use reading::{CacheState, FetchFailure, Freshness, Reading};
pub use refresh_cache::{RefreshCache, Source};
