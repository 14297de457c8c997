//! Rule catalog, evaluation, and bias aggregation

mod aggregator;
mod catalog;

pub use aggregator::BiasAggregator;
pub use catalog::register_all_rules;

use crate::indicator::FeatureMap;
use crate::state::MarketRegime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading action proposed by the decision pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ProposeLong,
    ProposeShort,
    Neutral,
    Close,
}

/// Coarse classification of a rule's style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleClass {
    Trend,
    MeanReversion,
    Breakout,
    Combo,
}

/// A single trading rule; immutable after registration
pub struct Rule {
    pub name: &'static str,
    pub predicate: fn(&FeatureMap) -> bool,
    /// Contribution in [-1, +1]; positive is long-biased
    pub bias: f64,
    pub allowed_regimes: &'static [MarketRegime],
    pub class: RuleClass,
    pub min_confidence: f64,
}

/// A rule that fired on the current feature map
#[derive(Debug, Clone)]
pub struct TriggeredRule {
    pub name: &'static str,
    pub bias: f64,
}

/// The aggregated decision for one instrument at one bar close
#[derive(Debug, Clone)]
pub struct Signal {
    pub instrument: String,
    pub action: Action,
    pub bias: f64,
    pub confidence: f64,
    /// Contributing rule names, sorted
    pub rule_names: Vec<&'static str>,
    pub regime: MarketRegime,
    /// ATR at emission, for stop placement and sizing
    pub atr: f64,
    /// Most recent close
    pub suggested_price: Decimal,
}

impl Signal {
    pub fn neutral(instrument: impl Into<String>, regime: MarketRegime) -> Self {
        Self {
            instrument: instrument.into(),
            action: Action::Neutral,
            bias: 0.0,
            confidence: 0.0,
            rule_names: vec![],
            regime,
            atr: 0.0,
            suggested_price: Decimal::ZERO,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.action, Action::ProposeLong | Action::ProposeShort)
    }
}

/// Evaluates the registered rules against a feature map.
///
/// The catalog is registered once at startup and immutable thereafter.
#[derive(Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_rule(&mut self, rule: Rule) {
        tracing::debug!(rule = rule.name, "Rule registered");
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Rules applicable in the given regime. In RANGE, trend and breakout
    /// classes are dropped entirely (sideways veto); only mean-reversion
    /// styles survive.
    fn applicable(&self, regime: MarketRegime) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |rule| {
            if !rule.allowed_regimes.contains(&regime) {
                return false;
            }
            if regime == MarketRegime::Range
                && matches!(rule.class, RuleClass::Trend | RuleClass::Breakout)
            {
                return false;
            }
            true
        })
    }

    /// Evaluate every applicable rule's predicate, returning those that fired
    pub fn evaluate(&self, features: &FeatureMap, regime: MarketRegime) -> Vec<TriggeredRule> {
        let mut triggered: Vec<TriggeredRule> = self
            .applicable(regime)
            .filter(|rule| (rule.predicate)(features))
            .map(|rule| TriggeredRule {
                name: rule.name,
                bias: rule.bias,
            })
            .collect();
        // Registration order must not leak into downstream aggregation
        triggered.sort_by(|a, b| a.name.cmp(b.name));
        triggered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[MarketRegime] = &[
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Range,
        MarketRegime::Unknown,
    ];

    fn always(_: &FeatureMap) -> bool {
        true
    }

    fn never(_: &FeatureMap) -> bool {
        false
    }

    fn rule(name: &'static str, class: RuleClass, bias: f64) -> Rule {
        Rule {
            name,
            predicate: always,
            bias,
            allowed_regimes: ALL,
            class,
            min_confidence: 0.5,
        }
    }

    #[test]
    fn test_regime_filter() {
        let mut engine = RuleEngine::new();
        engine.register_rule(Rule {
            allowed_regimes: &[MarketRegime::Bull],
            ..rule("BULL_ONLY", RuleClass::Trend, 0.5)
        });
        let features = FeatureMap::new("BTCUSDT");
        assert_eq!(engine.evaluate(&features, MarketRegime::Bull).len(), 1);
        assert!(engine.evaluate(&features, MarketRegime::Bear).is_empty());
    }

    #[test]
    fn test_sideways_veto_drops_trend_and_breakout() {
        let mut engine = RuleEngine::new();
        engine.register_rule(rule("A_TREND", RuleClass::Trend, 0.5));
        engine.register_rule(rule("B_BREAKOUT", RuleClass::Breakout, 0.5));
        engine.register_rule(rule("C_MEANREV", RuleClass::MeanReversion, 0.5));
        engine.register_rule(rule("D_COMBO", RuleClass::Combo, 0.5));

        let features = FeatureMap::new("BTCUSDT");
        let fired = engine.evaluate(&features, MarketRegime::Range);
        let names: Vec<&str> = fired.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["C_MEANREV", "D_COMBO"]);
    }

    #[test]
    fn test_predicate_gates_firing() {
        let mut engine = RuleEngine::new();
        engine.register_rule(Rule {
            predicate: never,
            ..rule("NEVER", RuleClass::Trend, 0.5)
        });
        let features = FeatureMap::new("BTCUSDT");
        assert!(engine.evaluate(&features, MarketRegime::Bull).is_empty());
    }

    #[test]
    fn test_triggered_rules_sorted_by_name() {
        let mut engine = RuleEngine::new();
        engine.register_rule(rule("ZULU", RuleClass::Combo, 0.5));
        engine.register_rule(rule("ALPHA", RuleClass::Combo, 0.5));
        let features = FeatureMap::new("BTCUSDT");
        let fired = engine.evaluate(&features, MarketRegime::Bull);
        assert_eq!(fired[0].name, "ALPHA");
        assert_eq!(fired[1].name, "ZULU");
    }

    #[test]
    fn test_neutral_signal() {
        let signal = Signal::neutral("BTCUSDT", MarketRegime::Unknown);
        assert_eq!(signal.action, Action::Neutral);
        assert_eq!(signal.bias, 0.0);
        assert!(!signal.is_entry());
    }
}
