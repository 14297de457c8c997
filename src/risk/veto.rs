//! Hierarchical pre-trade veto chain
//!
//! Ordered and short-circuiting: the first failing stage terminates
//! evaluation with its stage id and reason. A stage may alternatively return
//! an adjusted quantity/price; callers must use the adjustment or abort.

use crate::rules::Signal;
use crate::state::SystemState;
use rust_decimal::Decimal;

/// Identifies the stage that produced a veto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoStage {
    PositionSize,
    MaxPositions,
    Correlation,
    Drawdown,
    DailyLoss,
}

impl VetoStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            VetoStage::PositionSize => "position_size",
            VetoStage::MaxPositions => "max_positions",
            VetoStage::Correlation => "correlation",
            VetoStage::Drawdown => "drawdown",
            VetoStage::DailyLoss => "daily_loss",
        }
    }
}

/// Outcome of one evaluation through the chain
#[derive(Debug, Clone)]
pub struct VetoResult {
    pub approved: bool,
    pub stage: Option<VetoStage>,
    pub reason: Option<String>,
    pub adjusted_quantity: Option<Decimal>,
    pub adjusted_price: Option<Decimal>,
}

impl VetoResult {
    fn approved() -> Self {
        Self {
            approved: true,
            stage: None,
            reason: None,
            adjusted_quantity: None,
            adjusted_price: None,
        }
    }

    fn vetoed(stage: VetoStage, reason: String) -> Self {
        Self {
            approved: false,
            stage: Some(stage),
            reason: Some(reason),
            adjusted_quantity: None,
            adjusted_price: None,
        }
    }
}

/// Veto thresholds
#[derive(Debug, Clone)]
pub struct VetoConfig {
    pub max_position_size: Decimal,
    pub max_positions: usize,
    pub max_correlation_exposure: Decimal,
}

/// The ordered risk predicate chain
pub struct VetoChain {
    config: VetoConfig,
}

impl VetoChain {
    pub fn new(config: VetoConfig) -> Self {
        Self { config }
    }

    /// Run the signal through every stage in order
    pub fn evaluate(
        &self,
        signal: &Signal,
        state: &SystemState,
        quantity: Decimal,
        price: Decimal,
    ) -> VetoResult {
        if !signal.is_entry() {
            return VetoResult::approved();
        }

        let stages: [(VetoStage, fn(&Self, &Signal, &SystemState, Decimal, Decimal) -> Option<String>);
            5] = [
            (VetoStage::PositionSize, Self::check_position_size),
            (VetoStage::MaxPositions, Self::check_max_positions),
            (VetoStage::Correlation, Self::check_correlation),
            (VetoStage::Drawdown, Self::check_drawdown),
            (VetoStage::DailyLoss, Self::check_daily_loss),
        ];

        for (stage, check) in stages {
            if let Some(reason) = check(self, signal, state, quantity, price) {
                tracing::warn!(
                    instrument = %signal.instrument,
                    stage = stage.as_str(),
                    reason = %reason,
                    "Signal vetoed"
                );
                return VetoResult::vetoed(stage, reason);
            }
        }

        tracing::debug!(instrument = %signal.instrument, "Veto chain passed");
        VetoResult::approved()
    }

    fn check_position_size(
        &self,
        _signal: &Signal,
        _state: &SystemState,
        quantity: Decimal,
        price: Decimal,
    ) -> Option<String> {
        let notional = quantity * price;
        if notional > self.config.max_position_size {
            return Some(format!(
                "notional {notional} exceeds limit {}",
                self.config.max_position_size
            ));
        }
        None
    }

    fn check_max_positions(
        &self,
        signal: &Signal,
        state: &SystemState,
        _quantity: Decimal,
        _price: Decimal,
    ) -> Option<String> {
        // Adding to an existing position does not count as a new slot
        if state.open_positions.contains_key(&signal.instrument) {
            return None;
        }
        if state.open_positions.len() >= self.config.max_positions {
            return Some(format!(
                "{} positions already open (limit {})",
                state.open_positions.len(),
                self.config.max_positions
            ));
        }
        None
    }

    fn check_correlation(
        &self,
        signal: &Signal,
        state: &SystemState,
        _quantity: Decimal,
        _price: Decimal,
    ) -> Option<String> {
        // Placeholder predicate: a real correlation matrix is a future
        // extension, but the stage must exist and run in order.
        if !state.open_positions.is_empty() {
            tracing::debug!(
                instrument = %signal.instrument,
                existing = state.open_positions.len(),
                "Correlation check"
            );
        }
        None
    }

    fn check_drawdown(
        &self,
        _signal: &Signal,
        state: &SystemState,
        _quantity: Decimal,
        _price: Decimal,
    ) -> Option<String> {
        if state.drawdown_breached() {
            return Some(format!(
                "drawdown {}% at or above limit {}%",
                state.current_drawdown_pct, state.risk_limits.max_drawdown_pct
            ));
        }
        None
    }

    fn check_daily_loss(
        &self,
        _signal: &Signal,
        state: &SystemState,
        _quantity: Decimal,
        _price: Decimal,
    ) -> Option<String> {
        if state.daily_loss_breached() {
            return Some(format!(
                "daily P&L {}% at or below limit -{}%",
                state.daily_pnl_pct, state.risk_limits.daily_loss_limit_pct
            ));
        }
        None
    }
}
