//! Market regime classification with per-instrument hysteresis
//!
//! Directional regime flips only after the trigger condition has held for a
//! number of consecutive bars; otherwise the prior value is kept. Volatility
//! banding has no hysteresis. Counter state lives inside the classifier and
//! resets on restart.

use crate::indicator::FeatureMap;
use crate::state::{MarketRegime, VolatilityRegime};
use std::collections::HashMap;

const TREND_ADX_THRESHOLD: f64 = 25.0;
const TREND_CONFIRM_BARS: u32 = 3;
const RANGE_ADX_THRESHOLD: f64 = 20.0;
const RANGE_CONFIRM_BARS: u32 = 5;
const HIGH_VOL_ATR_PCT: f64 = 1.5;
const LOW_VOL_ATR_PCT: f64 = 0.5;

/// Consecutive-bar counters for one instrument
#[derive(Debug, Clone, Copy, Default)]
struct Hysteresis {
    bull_bars: u32,
    bear_bars: u32,
    low_adx_bars: u32,
    regime: Option<MarketRegime>,
}

/// Classifies direction and volatility per instrument, one update per
/// bar close.
#[derive(Debug, Default)]
pub struct RegimeClassifier {
    counters: HashMap<String, Hysteresis>,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update and return the directional regime for one instrument
    pub fn classify(&mut self, features: &FeatureMap) -> MarketRegime {
        let entry = self
            .counters
            .entry(features.instrument.clone())
            .or_default();

        let adx = features.get("adx_14");
        let ema_above = match (features.get("ema_20"), features.get("ema_50")) {
            (Some(short), Some(long)) => Some(short > long),
            _ => None,
        };

        match (adx, ema_above) {
            (Some(adx), Some(above)) if adx > TREND_ADX_THRESHOLD && above => {
                entry.bull_bars += 1;
                entry.bear_bars = 0;
            }
            (Some(adx), Some(above)) if adx > TREND_ADX_THRESHOLD && !above => {
                entry.bear_bars += 1;
                entry.bull_bars = 0;
            }
            _ => {
                entry.bull_bars = 0;
                entry.bear_bars = 0;
            }
        }
        match adx {
            Some(adx) if adx < RANGE_ADX_THRESHOLD => entry.low_adx_bars += 1,
            _ => entry.low_adx_bars = 0,
        }

        let next = if entry.bull_bars >= TREND_CONFIRM_BARS {
            Some(MarketRegime::Bull)
        } else if entry.bear_bars >= TREND_CONFIRM_BARS {
            Some(MarketRegime::Bear)
        } else if entry.low_adx_bars >= RANGE_CONFIRM_BARS {
            Some(MarketRegime::Range)
        } else {
            None
        };

        if let Some(regime) = next {
            if entry.regime != Some(regime) {
                tracing::info!(
                    instrument = %features.instrument,
                    regime = ?regime,
                    "Regime transition"
                );
            }
            entry.regime = Some(regime);
        }
        entry.regime.unwrap_or(MarketRegime::Unknown)
    }

    /// Volatility band from ATR%; no hysteresis
    pub fn classify_volatility(&self, features: &FeatureMap) -> VolatilityRegime {
        match features.get("atr_pct") {
            Some(atr_pct) if atr_pct > HIGH_VOL_ATR_PCT => VolatilityRegime::High,
            Some(atr_pct) if atr_pct < LOW_VOL_ATR_PCT => VolatilityRegime::Low,
            _ => VolatilityRegime::Normal,
        }
    }

    /// Current regime without updating counters
    pub fn current(&self, instrument: &str) -> MarketRegime {
        self.counters
            .get(instrument)
            .and_then(|h| h.regime)
            .unwrap_or(MarketRegime::Unknown)
    }
}
