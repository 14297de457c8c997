//! The built-in rule catalog
//!
//! Registered once at startup. Predicates read only the feature map; a rule
//! whose inputs are absent simply does not fire.

use super::{Rule, RuleClass, RuleEngine};
use crate::indicator::FeatureMap;
use crate::state::MarketRegime;

const BULL: &[MarketRegime] = &[MarketRegime::Bull];
const BEAR: &[MarketRegime] = &[MarketRegime::Bear];
const BULL_RANGE: &[MarketRegime] = &[MarketRegime::Bull, MarketRegime::Range];
const BEAR_RANGE: &[MarketRegime] = &[MarketRegime::Bear, MarketRegime::Range];

fn ema_cross_up(f: &FeatureMap) -> bool {
    f.flag_opt("ema_20_above_ema_50") == Some(true)
}

fn ema_cross_down(f: &FeatureMap) -> bool {
    f.flag_opt("ema_20_above_ema_50") == Some(false)
}

fn turtle_20_long(f: &FeatureMap) -> bool {
    f.flag("breakout_20_long")
}

fn turtle_20_short(f: &FeatureMap) -> bool {
    f.flag("breakout_20_short")
}

fn turtle_55_long(f: &FeatureMap) -> bool {
    f.flag("breakout_55_long")
}

fn turtle_55_short(f: &FeatureMap) -> bool {
    f.flag("breakout_55_short")
}

// Non-extreme RSI bands are exclusive of the extreme bands so a single
// reading never double-counts.
fn rsi_oversold(f: &FeatureMap) -> bool {
    f.get("rsi_14").is_some_and(|rsi| (20.0..30.0).contains(&rsi))
}

fn rsi_overbought(f: &FeatureMap) -> bool {
    f.get("rsi_14").is_some_and(|rsi| rsi > 70.0 && rsi <= 80.0)
}

fn rsi_extreme_oversold(f: &FeatureMap) -> bool {
    f.get("rsi_14").is_some_and(|rsi| rsi < 20.0)
}

fn rsi_extreme_overbought(f: &FeatureMap) -> bool {
    f.get("rsi_14").is_some_and(|rsi| rsi > 80.0)
}

fn golden_cross(f: &FeatureMap) -> bool {
    ema_cross_up(f) && f.get("adx_14").is_some_and(|adx| adx > 25.0)
}

fn death_cross(f: &FeatureMap) -> bool {
    ema_cross_down(f) && f.get("adx_14").is_some_and(|adx| adx > 25.0)
}

fn bb_oversold(f: &FeatureMap) -> bool {
    match (f.get("close"), f.get("bb_lower"), f.get("rsi_14")) {
        (Some(close), Some(lower), Some(rsi)) => close < lower && rsi < 40.0,
        _ => false,
    }
}

fn bb_overbought(f: &FeatureMap) -> bool {
    match (f.get("close"), f.get("bb_upper"), f.get("rsi_14")) {
        (Some(close), Some(upper), Some(rsi)) => close > upper && rsi > 60.0,
        _ => false,
    }
}

fn stoch_oversold(f: &FeatureMap) -> bool {
    match (f.get("stoch_k"), f.get("stoch_d")) {
        (Some(k), Some(d)) => k < 20.0 && d < 20.0,
        _ => false,
    }
}

fn stoch_overbought(f: &FeatureMap) -> bool {
    match (f.get("stoch_k"), f.get("stoch_d")) {
        (Some(k), Some(d)) => k > 80.0 && d > 80.0,
        _ => false,
    }
}

fn stoch_bullish_cross(f: &FeatureMap) -> bool {
    match (f.get("stoch_k"), f.get("stoch_d")) {
        (Some(k), Some(d)) => k > d && k < 80.0,
        _ => false,
    }
}

fn strong_uptrend(f: &FeatureMap) -> bool {
    ema_cross_up(f)
        && f.get("adx_14").is_some_and(|adx| adx > 25.0)
        && f.get("rsi_14").is_some_and(|rsi| rsi > 50.0)
}

fn strong_downtrend(f: &FeatureMap) -> bool {
    ema_cross_down(f)
        && f.get("adx_14").is_some_and(|adx| adx > 25.0)
        && f.get("rsi_14").is_some_and(|rsi| rsi < 50.0)
}

fn super_bullish(f: &FeatureMap) -> bool {
    ema_cross_up(f)
        && f.get("rsi_14").is_some_and(|rsi| rsi < 35.0)
        && f.get("adx_14").is_some_and(|adx| adx > 20.0)
        && match (f.get("close"), f.get("bb_middle")) {
            (Some(close), Some(middle)) => close < middle,
            _ => false,
        }
}

fn super_bearish(f: &FeatureMap) -> bool {
    ema_cross_down(f)
        && f.get("rsi_14").is_some_and(|rsi| rsi > 65.0)
        && f.get("adx_14").is_some_and(|adx| adx > 20.0)
        && match (f.get("close"), f.get("bb_middle")) {
            (Some(close), Some(middle)) => close > middle,
            _ => false,
        }
}

fn momentum_breakout_long(f: &FeatureMap) -> bool {
    ema_cross_up(f)
        && f.get("adx_14").is_some_and(|adx| adx > 30.0)
        && f.get("rsi_14").is_some_and(|rsi| rsi > 50.0 && rsi < 70.0)
}

/// Register the full catalog
pub fn register_all_rules(engine: &mut RuleEngine) {
    let rules = [
        Rule {
            name: "TURTLE_20DAY_BREAKOUT_LONG",
            predicate: turtle_20_long,
            bias: 0.7,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::Breakout,
            min_confidence: 0.6,
        },
        Rule {
            name: "TURTLE_20DAY_BREAKOUT_SHORT",
            predicate: turtle_20_short,
            bias: -0.7,
            allowed_regimes: BEAR_RANGE,
            class: RuleClass::Breakout,
            min_confidence: 0.6,
        },
        Rule {
            name: "TURTLE_55DAY_BREAKOUT_LONG",
            predicate: turtle_55_long,
            bias: 0.9,
            allowed_regimes: BULL,
            class: RuleClass::Breakout,
            min_confidence: 0.7,
        },
        Rule {
            name: "TURTLE_55DAY_BREAKOUT_SHORT",
            predicate: turtle_55_short,
            bias: -0.9,
            allowed_regimes: BEAR,
            class: RuleClass::Breakout,
            min_confidence: 0.7,
        },
        Rule {
            name: "RSI_OVERSOLD_LONG",
            predicate: rsi_oversold,
            bias: 0.6,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.5,
        },
        Rule {
            name: "RSI_OVERBOUGHT_SHORT",
            predicate: rsi_overbought,
            bias: -0.6,
            allowed_regimes: BEAR_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.5,
        },
        Rule {
            name: "RSI_EXTREME_OVERSOLD",
            predicate: rsi_extreme_oversold,
            bias: 0.8,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.6,
        },
        Rule {
            name: "RSI_EXTREME_OVERBOUGHT",
            predicate: rsi_extreme_overbought,
            bias: -0.8,
            allowed_regimes: BEAR_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.6,
        },
        Rule {
            name: "GOLDEN_CROSS",
            predicate: golden_cross,
            bias: 0.5,
            allowed_regimes: BULL,
            class: RuleClass::Trend,
            min_confidence: 0.4,
        },
        Rule {
            name: "DEATH_CROSS",
            predicate: death_cross,
            bias: -0.5,
            allowed_regimes: BEAR,
            class: RuleClass::Trend,
            min_confidence: 0.4,
        },
        Rule {
            name: "BB_OVERSOLD",
            predicate: bb_oversold,
            bias: 0.6,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.5,
        },
        Rule {
            name: "BB_OVERBOUGHT",
            predicate: bb_overbought,
            bias: -0.6,
            allowed_regimes: BEAR_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.5,
        },
        Rule {
            name: "STOCH_OVERSOLD",
            predicate: stoch_oversold,
            bias: 0.5,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.4,
        },
        Rule {
            name: "STOCH_OVERBOUGHT",
            predicate: stoch_overbought,
            bias: -0.5,
            allowed_regimes: BEAR_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.4,
        },
        Rule {
            name: "STOCH_BULLISH_CROSS",
            predicate: stoch_bullish_cross,
            bias: 0.4,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::MeanReversion,
            min_confidence: 0.3,
        },
        Rule {
            name: "STRONG_UPTREND",
            predicate: strong_uptrend,
            bias: 0.7,
            allowed_regimes: BULL,
            class: RuleClass::Trend,
            min_confidence: 0.6,
        },
        Rule {
            name: "STRONG_DOWNTREND",
            predicate: strong_downtrend,
            bias: -0.7,
            allowed_regimes: BEAR,
            class: RuleClass::Trend,
            min_confidence: 0.6,
        },
        Rule {
            name: "SUPER_BULLISH",
            predicate: super_bullish,
            bias: 0.9,
            allowed_regimes: BULL_RANGE,
            class: RuleClass::Combo,
            min_confidence: 0.7,
        },
        Rule {
            name: "SUPER_BEARISH",
            predicate: super_bearish,
            bias: -0.9,
            allowed_regimes: BEAR_RANGE,
            class: RuleClass::Combo,
            min_confidence: 0.7,
        },
        Rule {
            name: "MOMENTUM_BREAKOUT_LONG",
            predicate: momentum_breakout_long,
            bias: 0.6,
            allowed_regimes: BULL,
            class: RuleClass::Trend,
            min_confidence: 0.5,
        },
    ];

    for rule in rules {
        engine.register_rule(rule);
    }
    tracing::info!(count = engine.rule_count(), "Trading rules registered");
}
