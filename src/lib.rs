pub mod config;
pub mod dashboard;
pub mod error;
pub mod market_data;
pub mod metrics;
pub mod state;
