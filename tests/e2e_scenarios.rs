//! End-to-end decision scenarios

use async_trait::async_trait;
use chrono::Utc;
use perpbot::config::Config;
use perpbot::data::Bar;
use perpbot::engine::Orchestrator;
use perpbot::execution::{DryRunVenue, InstrumentFilters, OrderManager, OrderSide, VenuePosition};
use perpbot::feed::FeedHealth;
use perpbot::indicator::FeatureMap;
use perpbot::notify::{Notification, NotificationSink, Priority};
use perpbot::risk::{PositionSizer, VetoChain, VetoConfig};
use perpbot::rules::{register_all_rules, Action, BiasAggregator, RuleEngine};
use perpbot::state::{
    MarketRegime, MemoryKv, Position, PositionSide, RiskLimits, StateStore, SystemState,
    SystemStatus,
};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct CollectingSink {
    delivered: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn deliver(&self, notification: &Notification) {
        self.delivered.lock().unwrap().push(notification.clone());
    }
}

fn default_filters() -> InstrumentFilters {
    InstrumentFilters {
        instrument: "BTCUSDT".to_string(),
        lot_step: dec!(0.001),
        tick_size: dec!(0.01),
        min_quantity: dec!(0.001),
        min_notional: dec!(5),
    }
}

fn trend_bar(instrument: &str, i: u64) -> Bar {
    let close = 100.0 + 2.0 * i as f64;
    Bar {
        instrument: instrument.to_string(),
        open_time_ms: (i + 1) * 60_000,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.5,
        close,
        volume: 100.0,
        is_closed: true,
    }
}

async fn build_orchestrator(
    config: Config,
    kv: MemoryKv,
) -> Orchestrator<DryRunVenue, MemoryKv, CollectingSink> {
    let venue = DryRunVenue::new(&config.instruments);
    let orders = OrderManager::initialize(venue, config.max_slippage_pct)
        .await
        .unwrap()
        .with_fast_retries();
    Orchestrator::new(config, orders, kv, CollectingSink::default())
}

/// Bull breakout: 55-day channel break sizes a one-unit long, component
/// by component.
#[tokio::test]
async fn bull_breakout_sizes_and_submits_one_unit() {
    let mut features = FeatureMap::new("BTCUSDT");
    features.insert("close", 100.0);
    features.insert("rsi_14", 60.0);
    features.insert("adx_14", 30.0);
    features.insert("ema_20", 95.0);
    features.insert("ema_50", 90.0);
    features.set_flag("ema_20_above_ema_50", true);
    features.insert("high_20", 99.5);
    features.insert("high_55", 99.0);
    features.insert("atr_14", 0.50);
    features.set_flag("breakout_20_long", true);
    features.set_flag("breakout_55_long", true);

    let mut engine = RuleEngine::new();
    register_all_rules(&mut engine);
    let triggered = engine.evaluate(&features, MarketRegime::Bull);
    let names: Vec<&str> = triggered.iter().map(|t| t.name).collect();
    assert!(names.contains(&"TURTLE_55DAY_BREAKOUT_LONG"));
    assert!(names.contains(&"STRONG_UPTREND"));

    let signal = BiasAggregator::new(0.7).aggregate(
        "BTCUSDT",
        &triggered,
        &HashMap::new(),
        MarketRegime::Bull,
        0.50,
        dec!(100),
    );
    assert!(signal.bias >= 0.7, "bias {} below threshold", signal.bias);
    assert_eq!(signal.action, Action::ProposeLong);

    // N-unit sizing: risk 100, stop distance 0.5 * 2 = 1.0, notional 100
    let sizer = PositionSizer::new(dec!(0.01), dec!(2.0), dec!(5), dec!(1000));
    let sized = sizer
        .size(dec!(10000), dec!(100), dec!(0.50), &default_filters())
        .unwrap();
    assert_eq!(sized.risk_amount, dec!(100));
    assert_eq!(sized.stop_distance, dec!(1.0));
    assert_eq!(sized.quantity, dec!(1.000));
    assert_eq!(sized.notional, dec!(100.00));

    // Veto chain approves with default limits and no open positions
    let state = SystemState::new(dec!(10000), RiskLimits::default());
    let chain = VetoChain::new(VetoConfig {
        max_position_size: dec!(1000),
        max_positions: 5,
        max_correlation_exposure: dec!(3),
    });
    let veto = chain.evaluate(&signal, &state, sized.quantity, sized.price);
    assert!(veto.approved);

    // Submission fills the entry and attaches the protective stop at 99
    let venue = DryRunVenue::new(&["BTCUSDT".to_string()]);
    let mut orders = OrderManager::initialize(venue, dec!(0.1))
        .await
        .unwrap()
        .with_fast_retries();
    let outcome = orders.submit_entry(&signal, &sized, dec!(2.0)).await.unwrap();
    assert_eq!(outcome.entry.price, dec!(100));
    assert_eq!(outcome.stop_price, dec!(99.00));
    let fills = orders.venue().fills().await;
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].side, OrderSide::Buy);

    // State with the open long survives a persistence round trip
    let mut state = state;
    state.open_positions.insert(
        "BTCUSDT".to_string(),
        Position {
            instrument: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            quantity: sized.quantity,
            entry_price: outcome.entry.price,
            current_price: outcome.entry.price,
            unrealized_pnl: dec!(0),
            stop_price: Some(outcome.stop_price),
            take_profit_price: None,
            entry_time: Utc::now(),
            strategy_name: "default".to_string(),
            regime_at_entry: MarketRegime::Bull,
        },
    );
    let store = StateStore::new(MemoryKv::new(), Duration::from_secs(86_400));
    store.save(&state).await.unwrap();
    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded.open_positions.len(), 1);
    assert_eq!(loaded.open_positions["BTCUSDT"].side, PositionSide::Long);
}

/// Range regime drops trend/breakout rules; mean reversion longs fire.
#[tokio::test]
async fn range_regime_mean_reversion_long() {
    let mut features = FeatureMap::new("BTCUSDT");
    features.insert("adx_14", 15.0);
    features.insert("rsi_14", 18.0);
    features.insert("close", 95.0);
    features.insert("bb_lower", 96.0);
    // A breakout flag that must be suppressed by the sideways filter
    features.set_flag("breakout_20_long", true);

    let mut engine = RuleEngine::new();
    register_all_rules(&mut engine);
    let triggered = engine.evaluate(&features, MarketRegime::Range);
    let names: Vec<&str> = triggered.iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["BB_OVERSOLD", "RSI_EXTREME_OVERSOLD"]);

    let signal = BiasAggregator::new(0.7).aggregate(
        "BTCUSDT",
        &triggered,
        &HashMap::new(),
        MarketRegime::Range,
        0.2,
        dec!(95),
    );
    // (0.8 + 0.6) / 2 = 0.7
    assert_eq!(signal.action, Action::ProposeLong);
}

/// The full orchestrator path: warm buffer, three bull bars, order + stop
/// submitted, state persisted with one open long.
#[tokio::test(start_paused = true)]
async fn bull_trend_entry_through_orchestrator() {
    let kv = MemoryKv::new();
    let mut orch = build_orchestrator(Config::default(), kv.clone()).await;
    orch.init().await.unwrap();

    let bars: Vec<Bar> = (0..57).map(|i| trend_bar("BTCUSDT", i)).collect();
    orch.seed_bars("BTCUSDT", bars);

    for i in 57..60 {
        tokio::time::advance(Duration::from_millis(1100)).await;
        orch.handle_bar_close(trend_bar("BTCUSDT", i)).await;
    }
    assert_eq!(orch.decisions_made(), 3);

    let fills = orch.orders().venue().fills().await;
    assert_eq!(fills.len(), 2, "entry + protective stop expected");
    assert_eq!(fills[0].side, OrderSide::Buy);
    assert_eq!(fills[1].side, OrderSide::Sell);

    let position = &orch.state().open_positions["BTCUSDT"];
    assert_eq!(position.side, PositionSide::Long);
    assert!(position.quantity > dec!(0));
    assert!(position.stop_price.is_some());
    assert_eq!(position.regime_at_entry, MarketRegime::Bull);

    // Persisted document reflects the open position
    let store = StateStore::new(kv, Duration::from_secs(60));
    let persisted = store.load().await.unwrap().unwrap();
    assert_eq!(persisted.open_positions.len(), 1);
}

/// Drawdown at 15.5% vetoes the entry at stage `drawdown`, halts the
/// system, and closes every open position.
#[tokio::test(start_paused = true)]
async fn drawdown_breach_vetoes_then_halts() {
    let mut config = Config::default();
    config.instruments = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    let kv = MemoryKv::new();

    // Persisted state: equity 8450 against a 10000 peak, one ETH long open
    let mut stale = SystemState::new(dec!(10000), RiskLimits::default());
    stale.open_positions.insert(
        "ETHUSDT".to_string(),
        Position {
            instrument: "ETHUSDT".to_string(),
            side: PositionSide::Long,
            quantity: dec!(1),
            entry_price: dec!(2000),
            current_price: dec!(2000),
            unrealized_pnl: dec!(0),
            stop_price: None,
            take_profit_price: None,
            entry_time: Utc::now(),
            strategy_name: "default".to_string(),
            regime_at_entry: MarketRegime::Bull,
        },
    );
    stale.update_equity(dec!(8450));
    assert_eq!(stale.current_drawdown_pct, dec!(15.5));
    StateStore::new(kv.clone(), Duration::from_secs(60))
        .save(&stale)
        .await
        .unwrap();

    let mut orch = build_orchestrator(config, kv).await;
    // Venue agrees about the ETH long so reconciliation keeps it
    orch.orders()
        .venue()
        .set_positions(vec![VenuePosition {
            instrument: "ETHUSDT".to_string(),
            quantity: dec!(1),
            entry_price: dec!(2000),
            mark_price: dec!(2000),
        }])
        .await;
    orch.init().await.unwrap();
    assert_eq!(orch.state().open_positions.len(), 1);

    let bars: Vec<Bar> = (0..57).map(|i| trend_bar("BTCUSDT", i)).collect();
    orch.seed_bars("BTCUSDT", bars);
    for i in 57..60 {
        tokio::time::advance(Duration::from_millis(1100)).await;
        orch.handle_bar_close(trend_bar("BTCUSDT", i)).await;
    }

    assert_eq!(orch.status(), SystemStatus::Halted);
    assert!(orch.state().open_positions.is_empty());

    {
        let delivered = orch.notifier().sink().delivered.lock().unwrap();
        let veto = delivered
            .iter()
            .find(|n| n.title == "Trade vetoed")
            .expect("veto warning expected");
        assert_eq!(veto.priority, Priority::Warning);
        assert_eq!(veto.details.get("stage").unwrap(), "drawdown");
    }

    // The only venue order is the ETH close; no entry was submitted
    let fills = orch.orders().venue().fills().await;
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].instrument, "ETHUSDT");
    assert_eq!(fills[0].side, OrderSide::Sell);

    // Halted rejects subsequent bar events outright
    tokio::time::advance(Duration::from_secs(2)).await;
    orch.handle_bar_close(trend_bar("BTCUSDT", 60)).await;
    assert_eq!(orch.orders().venue().fills().await.len(), 1);
}

/// Feed loss forces SAFE_MODE, pages once, and holds decisions until an
/// operator reset.
#[tokio::test(start_paused = true)]
async fn feed_loss_enters_safe_mode_until_reset() {
    let kv = MemoryKv::new();
    let mut orch = build_orchestrator(Config::default(), kv).await;
    orch.init().await.unwrap();

    let bars: Vec<Bar> = (0..57).map(|i| trend_bar("BTCUSDT", i)).collect();
    orch.seed_bars("BTCUSDT", bars);

    for _ in 0..3 {
        orch.handle_health(FeedHealth::InstrumentSilent {
            instrument: "BTCUSDT".to_string(),
            elapsed_secs: 31,
        })
        .await;
    }
    assert_eq!(orch.status(), SystemStatus::SafeMode);

    {
        let delivered = orch.notifier().sink().delivered.lock().unwrap();
        let pages: Vec<_> = delivered
            .iter()
            .filter(|n| n.priority == Priority::Critical && n.title == "Feed loss")
            .collect();
        assert_eq!(pages.len(), 1, "repeat feed-loss pages must latch");
    }

    // Events are held while in SAFE_MODE
    tokio::time::advance(Duration::from_secs(2)).await;
    orch.handle_bar_close(trend_bar("BTCUSDT", 57)).await;
    assert_eq!(orch.decisions_made(), 0);

    // Operator reset resumes decisions
    orch.operator_reset().await;
    assert_eq!(orch.status(), SystemStatus::Running);
    tokio::time::advance(Duration::from_secs(2)).await;
    orch.handle_bar_close(trend_bar("BTCUSDT", 58)).await;
    assert_eq!(orch.decisions_made(), 1);
}

/// A 100-equity account sizing against ATR 10 is rejected as too small;
/// nothing reaches the venue.
#[tokio::test]
async fn tiny_account_sizing_rejected() {
    let sizer = PositionSizer::new(dec!(0.01), dec!(2.0), dec!(5), dec!(1000));
    let mut filters = default_filters();
    filters.tick_size = dec!(0.0001);
    let err = sizer
        .size(dec!(100), dec!(1.00), dec!(10), &filters)
        .unwrap_err();
    assert_eq!(err.code(), "QUANTITY_TOO_SMALL");
}

/// Restart with a persisted long the venue does not know about adopts
/// the venue view, re-persists, and pages.
#[tokio::test]
async fn restart_reconciliation_adopts_venue_view() {
    let kv = MemoryKv::new();
    let mut stale = SystemState::new(dec!(10000), RiskLimits::default());
    stale.open_positions.insert(
        "BTCUSDT".to_string(),
        Position {
            instrument: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            quantity: dec!(0.5),
            entry_price: dec!(40000),
            current_price: dec!(40000),
            unrealized_pnl: dec!(0),
            stop_price: Some(dec!(39000)),
            take_profit_price: None,
            entry_time: Utc::now(),
            strategy_name: "default".to_string(),
            regime_at_entry: MarketRegime::Bull,
        },
    );
    StateStore::new(kv.clone(), Duration::from_secs(60))
        .save(&stale)
        .await
        .unwrap();

    let mut orch = build_orchestrator(Config::default(), kv.clone()).await;
    orch.init().await.unwrap();

    // Venue reported no positions: local long dropped and state re-persisted
    assert!(orch.state().open_positions.is_empty());
    let persisted = StateStore::new(kv, Duration::from_secs(60))
        .load()
        .await
        .unwrap()
        .unwrap();
    assert!(persisted.open_positions.is_empty());

    let delivered = orch.notifier().sink().delivered.lock().unwrap();
    assert!(delivered
        .iter()
        .any(|n| n.priority == Priority::Critical && n.title == "Reconciliation mismatch"));
}

/// At most one accepted decision per instrument per second.
#[tokio::test(start_paused = true)]
async fn per_instrument_throttle() {
    let kv = MemoryKv::new();
    let mut orch = build_orchestrator(Config::default(), kv).await;
    orch.init().await.unwrap();

    let bars: Vec<Bar> = (0..57).map(|i| trend_bar("BTCUSDT", i)).collect();
    orch.seed_bars("BTCUSDT", bars);

    tokio::time::advance(Duration::from_secs(2)).await;
    orch.handle_bar_close(trend_bar("BTCUSDT", 57)).await;
    assert_eq!(orch.decisions_made(), 1);

    // 500 ms later: inside the window, ignored
    tokio::time::advance(Duration::from_millis(500)).await;
    orch.handle_bar_close(trend_bar("BTCUSDT", 58)).await;
    assert_eq!(orch.decisions_made(), 1);

    // Past the window: accepted
    tokio::time::advance(Duration::from_millis(600)).await;
    orch.handle_bar_close(trend_bar("BTCUSDT", 59)).await;
    assert_eq!(orch.decisions_made(), 2);
}
