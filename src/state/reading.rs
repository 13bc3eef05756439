use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ExchangeError;

/// Per-key lifecycle inside the refresh cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fetching,
    Fresh,
    Stale,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Fetching => "fetching",
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
        }
    }
}

/// What a widget should show next to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Live,
    Stale,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub error: ExchangeError,
    pub at: Instant,
    pub consecutive: u32,
}

/// Result of a cache read. Never an error: a failed fetch shows up as
/// `last_failure` next to whatever value was last fetched successfully.
#[derive(Debug)]
pub struct Reading<V> {
    pub value: Option<Arc<V>>,
    pub state: CacheState,
    /// Entry age has reached its ttl.
    pub expired: bool,
    pub age: Option<Duration>,
    pub last_failure: Option<FetchFailure>,
}

impl<V> Clone for Reading<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            state: self.state,
            expired: self.expired,
            age: self.age,
            last_failure: self.last_failure.clone(),
        }
    }
}

impl<V> Reading<V> {
    pub fn empty() -> Self {
        Self {
            value: None,
            state: CacheState::Empty,
            expired: false,
            age: None,
            last_failure: None,
        }
    }

    pub fn freshness(&self) -> Freshness {
        match self.value {
            None => Freshness::Unavailable,
            Some(_) if self.expired || self.last_failure.is_some() => Freshness::Stale,
            Some(_) => Freshness::Live,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.last_failure,
            Some(FetchFailure {
                error: ExchangeError::NotFound(_),
                ..
            })
        )
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_deref()
    }
}
