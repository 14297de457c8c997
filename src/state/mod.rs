//! System state: status, regimes, positions, equity bookkeeping

mod store;

pub use store::{KvStore, MemoryKv, StateStore, STATE_KEY};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// System operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Running,
    Degraded,
    SafeMode,
    Halted,
}

/// Directional market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketRegime {
    Bull,
    Bear,
    Range,
    Unknown,
}

/// Volatility band, orthogonal to direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

/// Position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

/// An open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit_price: Option<Decimal>,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub strategy_name: String,
    pub regime_at_entry: MarketRegime,
}

impl Position {
    /// Re-mark the position at a new price and refresh unrealized P&L
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
        };
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.current_price
    }
}

/// Adaptive parameters tuned at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParams {
    #[serde(default)]
    pub strategy_weights: HashMap<String, f64>,
    pub stop_atr_multiplier: Decimal,
    pub activation_threshold: f64,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            strategy_weights: HashMap::new(),
            stop_atr_multiplier: rust_decimal_macros::dec!(2.0),
            activation_threshold: 0.7,
        }
    }
}

/// Hard risk limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_drawdown_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_drawdown_pct: rust_decimal_macros::dec!(15),
            daily_loss_limit_pct: rust_decimal_macros::dec!(3),
        }
    }
}

/// Complete system state, persisted after every trade and status transition.
///
/// Owned exclusively by the orchestrator; every other component receives an
/// immutable snapshot for the duration of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub status: SystemStatus,
    pub last_update: DateTime<Utc>,
    pub current_regime: MarketRegime,
    pub volatility_regime: VolatilityRegime,
    #[serde(default)]
    pub instrument_regimes: HashMap<String, MarketRegime>,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub current_drawdown_pct: Decimal,
    pub daily_start_equity: Decimal,
    pub daily_pnl: Decimal,
    pub daily_pnl_pct: Decimal,
    #[serde(default)]
    pub open_positions: HashMap<String, Position>,
    #[serde(default)]
    pub adaptive: AdaptiveParams,
    #[serde(default)]
    pub risk_limits: RiskLimits,
    #[serde(default)]
    pub total_trades: u64,
    #[serde(default)]
    pub winning_trades: u64,
    #[serde(default)]
    pub losing_trades: u64,
}

impl SystemState {
    pub fn new(starting_equity: Decimal, risk_limits: RiskLimits) -> Self {
        Self {
            status: SystemStatus::Running,
            last_update: Utc::now(),
            current_regime: MarketRegime::Unknown,
            volatility_regime: VolatilityRegime::Normal,
            instrument_regimes: HashMap::new(),
            equity: starting_equity,
            peak_equity: starting_equity,
            current_drawdown_pct: Decimal::ZERO,
            daily_start_equity: starting_equity,
            daily_pnl: Decimal::ZERO,
            daily_pnl_pct: Decimal::ZERO,
            open_positions: HashMap::new(),
            adaptive: AdaptiveParams::default(),
            risk_limits,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
        }
    }

    /// Update equity and derived drawdown / daily P&L figures
    pub fn update_equity(&mut self, equity: Decimal) {
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown_pct = if self.peak_equity > Decimal::ZERO {
            (self.peak_equity - equity) / self.peak_equity * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        self.daily_pnl = equity - self.daily_start_equity;
        self.daily_pnl_pct = if self.daily_start_equity > Decimal::ZERO {
            self.daily_pnl / self.daily_start_equity * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        self.last_update = Utc::now();
    }

    /// Record a realized trade outcome against equity and the counters
    pub fn record_trade_close(&mut self, realized_pnl: Decimal) {
        self.total_trades += 1;
        if realized_pnl > Decimal::ZERO {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
        self.update_equity(self.equity + realized_pnl);
    }

    /// Reset the daily P&L anchor (new trading day)
    pub fn reset_daily(&mut self) {
        self.daily_start_equity = self.equity;
        self.daily_pnl = Decimal::ZERO;
        self.daily_pnl_pct = Decimal::ZERO;
    }

    pub fn drawdown_breached(&self) -> bool {
        self.current_drawdown_pct >= self.risk_limits.max_drawdown_pct
    }

    pub fn daily_loss_breached(&self) -> bool {
        self.daily_pnl_pct <= -self.risk_limits.daily_loss_limit_pct
    }

    pub fn regime_for(&self, instrument: &str) -> MarketRegime {
        self.instrument_regimes
            .get(instrument)
            .copied()
            .unwrap_or(MarketRegime::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state() -> SystemState {
        SystemState::new(dec!(10000), RiskLimits::default())
    }

    #[test]
    fn test_new_state_defaults() {
        let s = state();
        assert_eq!(s.status, SystemStatus::Running);
        assert_eq!(s.current_regime, MarketRegime::Unknown);
        assert_eq!(s.equity, dec!(10000));
        assert_eq!(s.peak_equity, dec!(10000));
        assert_eq!(s.current_drawdown_pct, Decimal::ZERO);
    }

    #[test]
    fn test_update_equity_tracks_peak_and_drawdown() {
        let mut s = state();
        s.update_equity(dec!(11000));
        assert_eq!(s.peak_equity, dec!(11000));
        assert_eq!(s.current_drawdown_pct, Decimal::ZERO);

        s.update_equity(dec!(9900));
        assert_eq!(s.peak_equity, dec!(11000));
        assert_eq!(s.current_drawdown_pct, dec!(10));
    }

    #[test]
    fn test_daily_pnl_pct() {
        let mut s = state();
        s.update_equity(dec!(9700));
        assert_eq!(s.daily_pnl, dec!(-300));
        assert_eq!(s.daily_pnl_pct, dec!(-3));
        assert!(s.daily_loss_breached());
    }

    #[test]
    fn test_drawdown_breach_at_limit() {
        let mut s = state();
        s.update_equity(dec!(8450));
        assert_eq!(s.current_drawdown_pct, dec!(15.5));
        assert!(s.drawdown_breached());
    }

    #[test]
    fn test_reset_daily() {
        let mut s = state();
        s.update_equity(dec!(9700));
        s.reset_daily();
        assert_eq!(s.daily_pnl, Decimal::ZERO);
        s.update_equity(dec!(9700));
        assert_eq!(s.daily_pnl_pct, Decimal::ZERO);
    }

    #[test]
    fn test_record_trade_close() {
        let mut s = state();
        s.record_trade_close(dec!(150));
        s.record_trade_close(dec!(-50));
        assert_eq!(s.total_trades, 2);
        assert_eq!(s.winning_trades, 1);
        assert_eq!(s.losing_trades, 1);
        assert_eq!(s.equity, dec!(10100));
    }

    #[test]
    fn test_position_mark_long_and_short() {
        let mut long = Position {
            instrument: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            quantity: dec!(2),
            entry_price: dec!(100),
            current_price: dec!(100),
            unrealized_pnl: Decimal::ZERO,
            stop_price: None,
            take_profit_price: None,
            entry_time: Utc::now(),
            strategy_name: "default".to_string(),
            regime_at_entry: MarketRegime::Bull,
        };
        long.mark(dec!(105));
        assert_eq!(long.unrealized_pnl, dec!(10));

        let mut short = long.clone();
        short.side = PositionSide::Short;
        short.mark(dec!(95));
        assert_eq!(short.unrealized_pnl, dec!(10));
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&SystemStatus::SafeMode).unwrap(),
            "\"SAFE_MODE\""
        );
        assert_eq!(
            serde_json::to_string(&MarketRegime::Bull).unwrap(),
            "\"BULL\""
        );
        assert_eq!(
            serde_json::to_string(&VolatilityRegime::Normal).unwrap(),
            "\"NORMAL\""
        );
        assert_eq!(
            serde_json::to_string(&PositionSide::Long).unwrap(),
            "\"LONG\""
        );
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut s = state();
        s.open_positions.insert(
            "BTCUSDT".to_string(),
            Position {
                instrument: "BTCUSDT".to_string(),
                side: PositionSide::Long,
                quantity: dec!(0.5),
                entry_price: dec!(100),
                current_price: dec!(101),
                unrealized_pnl: dec!(0.5),
                stop_price: Some(dec!(99)),
                take_profit_price: None,
                entry_time: Utc::now(),
                strategy_name: "default".to_string(),
                regime_at_entry: MarketRegime::Bull,
            },
        );
        s.instrument_regimes
            .insert("BTCUSDT".to_string(), MarketRegime::Bull);

        let json = serde_json::to_string(&s).unwrap();
        let loaded: SystemState = serde_json::from_str(&json).unwrap();
        assert_eq!(s, loaded);
    }

    #[test]
    fn test_unknown_fields_ignored_on_load() {
        let mut value = serde_json::to_value(state()).unwrap();
        value["some_future_field"] = serde_json::json!(42);
        let loaded: SystemState = serde_json::from_value(value).unwrap();
        assert_eq!(loaded.equity, dec!(10000));
    }
}
