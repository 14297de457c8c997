//! Market data ingest
//!
//! Maintains sharded WebSocket connections to the venue, fans typed events
//! out to bounded subscriber channels, tracks per-connection health, and
//! publishes latency statistics on demand.

mod binance;
mod conn;
mod types;

pub use binance::BinanceIngest;
pub use conn::{connection_loop, ConnSettings};
pub use types::{EventPayload, FeedHealth, LatencyMetrics, LatencyTracker, MarketEvent};
