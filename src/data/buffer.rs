//! Per-instrument bounded OHLCV ring buffer

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Closed bars required before any downstream computation starts
pub const MIN_BARS_FOR_FEATURES: usize = 50;

/// Default buffer capacity per instrument
const DEFAULT_CAPACITY: usize = 1000;

/// A fixed-interval OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    /// Bar open time, milliseconds since epoch (UTC)
    pub open_time_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Bounded FIFO of closed bars for one instrument.
///
/// Oldest entries are evicted on overflow. Only closed bars with a strictly
/// increasing open time are appended; the caller validates everything else.
#[derive(Debug, Clone)]
pub struct OhlcvBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl OhlcvBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a closed bar. Returns false (without mutating) for bars that
    /// are not closed or do not advance the open time.
    pub fn push(&mut self, bar: Bar) -> bool {
        if !bar.is_closed {
            return false;
        }
        if let Some(last) = self.bars.back() {
            if bar.open_time_ms <= last.open_time_ms {
                return false;
            }
        }
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        true
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Whether enough history is buffered for feature computation
    pub fn is_warm(&self) -> bool {
        self.bars.len() >= MIN_BARS_FOR_FEATURES
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn last_open_time_ms(&self) -> Option<u64> {
        self.bars.back().map(|b| b.open_time_ms)
    }

    /// Contiguous snapshot of the buffered bars, oldest first
    pub fn snapshot(&self) -> Vec<Bar> {
        self.bars.iter().cloned().collect()
    }
}

impl Default for OhlcvBuffer {
    fn default() -> Self {
        Self::new()
    }
}
