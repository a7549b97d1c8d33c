//! Upbit exchange gateway
//!
//! REST client, JWT authentication envelope, rate limiting and wire types.
//! This is the only module that talks to the venue; everything above it
//! consumes typed snapshots.

pub mod auth;
pub mod client;
pub mod ratelimit;
pub mod types;

pub use client::{UpbitClient, UpbitError};
pub use types::{Account, MarketInfo, OrderInfo, OrderbookSnapshot, OrderbookUnit, RawCandle, TickerData};
