//! Sanity checks on incoming bars before any stateful component sees them

use super::Bar;
use std::collections::HashMap;

/// Result of validating one bar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(String),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }
}

/// Filters malformed or out-of-order bars.
///
/// Tracks the last accepted closed open-time per instrument so replayed or
/// reordered bars never reach the buffer.
#[derive(Debug, Default)]
pub struct DataValidator {
    last_closed_open_ms: HashMap<String, u64>,
    accepted: u64,
    rejected: u64,
}

impl DataValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a bar. Rejections are logged at debug and counted.
    pub fn validate(&mut self, bar: &Bar) -> ValidationOutcome {
        if let Some(reason) = self.check(bar) {
            self.rejected += 1;
            tracing::debug!(
                instrument = %bar.instrument,
                open_time_ms = bar.open_time_ms,
                reason = %reason,
                "Bar rejected"
            );
            return ValidationOutcome::Rejected(reason);
        }

        if bar.is_closed {
            self.last_closed_open_ms
                .insert(bar.instrument.clone(), bar.open_time_ms);
        }
        self.accepted += 1;
        ValidationOutcome::Accepted
    }

    fn check(&self, bar: &Bar) -> Option<String> {
        let fields = [
            ("open", bar.open),
            ("high", bar.high),
            ("low", bar.low),
            ("close", bar.close),
            ("volume", bar.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Some(format!("non-finite {name}: {value}"));
            }
        }
        if bar.high < bar.low {
            return Some(format!("high {} below low {}", bar.high, bar.low));
        }
        if bar.close < bar.low || bar.close > bar.high {
            return Some(format!(
                "close {} outside [{}, {}]",
                bar.close, bar.low, bar.high
            ));
        }
        if bar.volume < 0.0 {
            return Some(format!("negative volume: {}", bar.volume));
        }
        if bar.is_closed {
            if let Some(&last) = self.last_closed_open_ms.get(&bar.instrument) {
                if bar.open_time_ms <= last {
                    return Some(format!(
                        "open time {} not after last accepted {}",
                        bar.open_time_ms, last
                    ));
                }
            }
        }
        None
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn rejection_rate(&self) -> f64 {
        let total = self.accepted + self.rejected;
        if total == 0 {
            0.0
        } else {
            self.rejected as f64 / total as f64
        }
    }
}
