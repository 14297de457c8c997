//! Typed market events and latency tracking

use crate::data::Bar;
use std::collections::VecDeque;

/// Payload of one market event
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// Candlestick update; `bar.is_closed` marks the bar-close edge
    Kline(Bar),
    /// Best bid/ask update
    BookTicker { bid: f64, ask: f64 },
    /// Aggregated trade print
    AggTrade { price: f64, quantity: f64 },
}

/// A timestamped event from the venue stream
#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub instrument: String,
    /// Venue event timestamp
    pub event_time_ms: u64,
    /// Local receipt timestamp
    pub received_ms: u64,
    pub payload: EventPayload,
}

impl MarketEvent {
    pub fn latency_ms(&self) -> f64 {
        self.received_ms.saturating_sub(self.event_time_ms) as f64
    }
}

/// Feed health events surfaced to the orchestrator
#[derive(Debug, Clone)]
pub enum FeedHealth {
    /// One shard dropped and is reconnecting
    Reconnecting { shard: usize, attempt: u32 },
    /// A shard exhausted its reconnect budget
    ReconnectExhausted { shard: usize },
    /// A subscribed instrument has produced no events past the threshold
    InstrumentSilent {
        instrument: String,
        elapsed_secs: u64,
    },
    /// Transport-level error
    ConnectionError { shard: usize, message: String },
}

/// Point-in-time latency statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencyMetrics {
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub sample_count: usize,
}

/// Rolling latency sample window
#[derive(Debug)]
pub struct LatencyTracker {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, latency_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    pub fn metrics(&self) -> LatencyMetrics {
        if self.samples.is_empty() {
            return LatencyMetrics::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let count = sorted.len();
        let pick = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        LatencyMetrics {
            avg_ms: sorted.iter().sum::<f64>() / count as f64,
            p95_ms: pick(0.95),
            p99_ms: pick(0.99),
            max_ms: sorted[count - 1],
            sample_count: count,
        }
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}
