//! Pure technical feature computation over a buffer snapshot
//!
//! Each indicator is a pure function from a bar window to its latest value.
//! Fields with insufficient samples or non-finite results are simply absent
//! from the returned [`FeatureMap`]; nothing here panics or errors.

mod adx;
mod atr;
mod bollinger;
mod ema;
mod rolling;
mod rsi;
mod stochastic;

pub use adx::adx;
pub use atr::{atr, true_range};
pub use bollinger::bollinger;
pub use ema::{ema, sma};
pub use rolling::{rolling_max_high, rolling_min_low};
pub use rsi::rsi;
pub use stochastic::stochastic;

use crate::data::Bar;
use std::collections::BTreeMap;

/// Named scalar features and boolean flags for one instrument at one bar
#[derive(Debug, Clone, Default)]
pub struct FeatureMap {
    pub instrument: String,
    values: BTreeMap<&'static str, f64>,
    flags: BTreeMap<&'static str, bool>,
}

impl FeatureMap {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            values: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    /// Insert a scalar, dropping non-finite values
    pub fn insert(&mut self, name: &'static str, value: f64) {
        if value.is_finite() {
            self.values.insert(name, value);
        }
    }

    pub fn set_flag(&mut self, name: &'static str, value: bool) {
        self.flags.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Boolean flag; absent flags read as false
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Boolean flag, distinguishing absent from false
    pub fn flag_opt(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len() + self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.flags.is_empty()
    }
}

/// Compute the full feature map from a snapshot of closed bars.
///
/// The snapshot must be ordered oldest first. Windowed fields that cannot be
/// computed from the available history are omitted.
pub fn compute_features(instrument: &str, bars: &[Bar]) -> FeatureMap {
    let mut features = FeatureMap::new(instrument);
    let Some(last) = bars.last() else {
        return features;
    };
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let close = last.close;
    features.insert("close", close);

    if let Some(value) = rsi(&closes, 14) {
        features.insert("rsi_14", value);
    }
    if let Some(value) = adx(bars, 14) {
        features.insert("adx_14", value);
    }
    if let Some(ema_20) = ema(&closes, 20) {
        features.insert("ema_20", ema_20);
        if let Some(ema_50) = ema(&closes, 50) {
            features.insert("ema_50", ema_50);
            features.set_flag("ema_20_above_ema_50", ema_20 > ema_50);
        }
    }
    if let Some(value) = atr(bars, 14) {
        features.insert("atr_14", value);
        if close != 0.0 {
            features.insert("atr_pct", value / close * 100.0);
        }
    }
    if let Some((upper, middle, lower)) = bollinger(&closes, 20, 2.0) {
        features.insert("bb_upper", upper);
        features.insert("bb_middle", middle);
        features.insert("bb_lower", lower);
    }
    if let Some((k, d)) = stochastic(bars, 14, 3) {
        features.insert("stoch_k", k);
        features.insert("stoch_d", d);
    }
    for &window in &[20usize, 55] {
        let (high_key, low_key, long_key, short_key) = match window {
            20 => ("high_20", "low_20", "breakout_20_long", "breakout_20_short"),
            _ => ("high_55", "low_55", "breakout_55_long", "breakout_55_short"),
        };
        if let Some(high) = rolling_max_high(bars, window) {
            features.insert(high_key, high);
            features.set_flag(long_key, close > high);
        }
        if let Some(low) = rolling_min_low(bars, window) {
            features.insert(low_key, low);
            features.set_flag(short_key, close < low);
        }
    }
    if bars.len() >= 20 {
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        if let Some(value) = sma(&volumes, 20) {
            features.insert("volume_sma_20", value);
        }
    }

    features
}
