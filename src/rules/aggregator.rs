//! Bias aggregation: triggered rules -> one Signal
//!
//! bias = sum(rule.bias * w_rule) / sum(w_rule), confidence is the majority
//! vote share. Commutative sums keep the result independent of rule
//! registration order.

use super::{Action, Signal, TriggeredRule};
use crate::state::MarketRegime;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Aggregates triggered rules into a single directional signal
#[derive(Debug, Clone)]
pub struct BiasAggregator {
    activation_threshold: f64,
}

impl BiasAggregator {
    pub fn new(activation_threshold: f64) -> Self {
        Self {
            activation_threshold,
        }
    }

    /// Combine the triggered rules for one instrument into a Signal.
    ///
    /// `weights` maps rule name to its configured weight (default 1).
    #[allow(clippy::too_many_arguments)]
    pub fn aggregate(
        &self,
        instrument: &str,
        triggered: &[TriggeredRule],
        weights: &HashMap<String, f64>,
        regime: MarketRegime,
        atr: f64,
        suggested_price: Decimal,
    ) -> Signal {
        if triggered.is_empty() {
            let mut signal = Signal::neutral(instrument, regime);
            signal.atr = atr;
            signal.suggested_price = suggested_price;
            return signal;
        }

        let mut weighted_bias = 0.0;
        let mut total_weight = 0.0;
        let mut long_votes = 0u32;
        let mut short_votes = 0u32;
        for rule in triggered {
            let weight = weights.get(rule.name).copied().unwrap_or(1.0);
            weighted_bias += rule.bias * weight;
            total_weight += weight;
            if rule.bias > 0.0 {
                long_votes += 1;
            } else if rule.bias < 0.0 {
                short_votes += 1;
            }
        }

        let bias = if total_weight > 0.0 {
            (weighted_bias / total_weight).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let total_votes = long_votes + short_votes;
        let confidence = if total_votes > 0 {
            long_votes.max(short_votes) as f64 / total_votes as f64
        } else {
            0.0
        };

        let action = if bias.abs() >= self.activation_threshold {
            if bias > 0.0 {
                Action::ProposeLong
            } else {
                Action::ProposeShort
            }
        } else {
            Action::Neutral
        };

        let mut rule_names: Vec<&'static str> = triggered.iter().map(|t| t.name).collect();
        rule_names.sort_unstable();

        Signal {
            instrument: instrument.to_string(),
            action,
            bias,
            confidence,
            rule_names,
            regime,
            atr,
            suggested_price,
        }
    }
}
