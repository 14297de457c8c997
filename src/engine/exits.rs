//! Donchian + ADX momentum exit rules for open positions
//!
//! Checked once per closed bar for every instrument with an open position,
//! in fixed priority order: stop loss, regime change, momentum loss,
//! Donchian break. The first hit wins. Positions younger than one minute
//! are left alone so an entry and its venue acknowledgement cannot race.

use crate::indicator::FeatureMap;
use crate::state::{MarketRegime, Position, PositionSide};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

const ADX_EXIT_THRESHOLD: f64 = 20.0;
const MIN_R_PROFIT: f64 = 1.0;
const MIN_POSITION_AGE_SECS: i64 = 60;
const ADX_TREND_WINDOW: usize = 3;

/// What fired the exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    StopLoss,
    RegimeChange,
    MomentumLoss,
    DonchianBreak,
}

impl ExitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitKind::StopLoss => "STOP_LOSS",
            ExitKind::RegimeChange => "REGIME_CHANGE",
            ExitKind::MomentumLoss => "MOMENTUM_LOSS",
            ExitKind::DonchianBreak => "DONCHIAN_BREAK",
        }
    }
}

/// How fast the close must go out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitUrgency {
    Immediate,
    NextBar,
}

/// A triggered exit with its human-readable reason
#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub kind: ExitKind,
    pub urgency: ExitUrgency,
    pub reason: String,
}

/// Evaluates exit rules against open positions.
///
/// Keeps a short per-instrument ADX history so momentum loss requires the
/// ADX to actually be falling, not merely low, and dedups to one check per
/// bar per instrument.
#[derive(Debug, Default)]
pub struct ExitManager {
    adx_history: HashMap<String, VecDeque<f64>>,
    last_checked_bar: HashMap<String, u64>,
}

impl ExitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest ADX reading for an instrument; called every bar
    /// close so the trend is warm before a position needs it.
    pub fn record_adx(&mut self, instrument: &str, adx: f64) {
        let history = self.adx_history.entry(instrument.to_string()).or_default();
        if history.len() == ADX_TREND_WINDOW {
            history.pop_front();
        }
        history.push_back(adx);
    }

    /// Strictly decreasing across the recorded window (needs >= 2 samples)
    fn adx_falling(&self, instrument: &str) -> bool {
        let Some(history) = self.adx_history.get(instrument) else {
            return false;
        };
        if history.len() < 2 {
            return false;
        }
        history
            .iter()
            .zip(history.iter().skip(1))
            .all(|(prev, next)| prev > next)
    }

    /// Run the exit chain for one position on one closed bar.
    ///
    /// `regime` is the instrument's current directional regime and
    /// `bar_open_ms` the bar's open time, used to dedup repeat checks.
    pub fn check(
        &mut self,
        position: &Position,
        features: &FeatureMap,
        regime: MarketRegime,
        bar_open_ms: u64,
    ) -> Option<ExitSignal> {
        let age = Utc::now() - position.entry_time;
        if age < ChronoDuration::seconds(MIN_POSITION_AGE_SECS) {
            tracing::debug!(
                instrument = %position.instrument,
                age_secs = age.num_seconds(),
                "Position too young for exit checks"
            );
            return None;
        }

        if let Some(&last) = self.last_checked_bar.get(&position.instrument) {
            if bar_open_ms <= last {
                return None;
            }
        }
        self.last_checked_bar
            .insert(position.instrument.clone(), bar_open_ms);

        let close = features.get("close")?;

        if let Some(exit) = self.check_stop_loss(position, close) {
            return Some(exit);
        }
        if let Some(exit) = self.check_regime_change(position, regime) {
            return Some(exit);
        }
        if let Some(exit) = self.check_momentum_loss(position, features, close) {
            return Some(exit);
        }
        self.check_donchian_break(position, features, close)
    }

    fn check_stop_loss(&self, position: &Position, close: f64) -> Option<ExitSignal> {
        let stop = position.stop_price?;
        let close_dec = Decimal::from_f64_retain(close)?;
        let hit = match position.side {
            PositionSide::Long => close_dec <= stop,
            PositionSide::Short => close_dec >= stop,
        };
        if !hit {
            return None;
        }
        Some(ExitSignal {
            kind: ExitKind::StopLoss,
            urgency: ExitUrgency::Immediate,
            reason: format!("stop loss hit: close {close} against stop {stop}"),
        })
    }

    /// A trend position only survives while its trend regime holds: longs
    /// exit when the regime leaves BULL, shorts when it leaves BEAR.
    fn check_regime_change(
        &self,
        position: &Position,
        regime: MarketRegime,
    ) -> Option<ExitSignal> {
        let expected = match position.side {
            PositionSide::Long => MarketRegime::Bull,
            PositionSide::Short => MarketRegime::Bear,
        };
        if regime == expected {
            return None;
        }
        Some(ExitSignal {
            kind: ExitKind::RegimeChange,
            urgency: ExitUrgency::Immediate,
            reason: format!(
                "regime changed: expected {expected:?}, now {regime:?}"
            ),
        })
    }

    /// Falling ADX under the threshold with at least 1R of profit while
    /// price sits back inside the 20-bar channel: the move is spent, bank
    /// it rather than ride the giveback.
    fn check_momentum_loss(
        &self,
        position: &Position,
        features: &FeatureMap,
        close: f64,
    ) -> Option<ExitSignal> {
        let adx = features.get("adx_14")?;
        if !self.adx_falling(&position.instrument) || adx >= ADX_EXIT_THRESHOLD {
            return None;
        }

        let atr = features.get("atr_14").unwrap_or(0.0);
        let r_profit = r_multiple(position, close, atr);
        if r_profit < MIN_R_PROFIT {
            return None;
        }

        let inside_channel = match position.side {
            PositionSide::Long => close < features.get("high_20")?,
            PositionSide::Short => close > features.get("low_20")?,
        };
        if !inside_channel {
            return None;
        }
        Some(ExitSignal {
            kind: ExitKind::MomentumLoss,
            urgency: ExitUrgency::NextBar,
            reason: format!(
                "momentum loss: ADX {adx:.1} falling under {ADX_EXIT_THRESHOLD} with {r_profit:.2}R banked"
            ),
        })
    }

    /// Classic Turtle exit: close beyond the opposite 20-bar extreme
    fn check_donchian_break(
        &self,
        position: &Position,
        features: &FeatureMap,
        close: f64,
    ) -> Option<ExitSignal> {
        let (broken, level) = match position.side {
            PositionSide::Long => {
                let low_20 = features.get("low_20")?;
                (close < low_20, low_20)
            }
            PositionSide::Short => {
                let high_20 = features.get("high_20")?;
                (close > high_20, high_20)
            }
        };
        if !broken {
            return None;
        }
        Some(ExitSignal {
            kind: ExitKind::DonchianBreak,
            urgency: ExitUrgency::NextBar,
            reason: format!("20-bar channel break: close {close} through {level}"),
        })
    }
}

/// Profit in stop-distance units; percent fallback when ATR is unusable
fn r_multiple(position: &Position, close: f64, atr: f64) -> f64 {
    let entry = position.entry_price.to_f64().unwrap_or(0.0);
    let gain = match position.side {
        PositionSide::Long => close - entry,
        PositionSide::Short => entry - close,
    };
    if atr <= 0.0 {
        if entry == 0.0 {
            return 0.0;
        }
        return gain / entry * 100.0;
    }
    gain / atr
}
