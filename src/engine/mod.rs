//! Event orchestrator: drives the decision pipeline on bar close
//!
//! Owns the system state exclusively. Components are leaves exposing pure
//! operations; the orchestrator composes them, enforces per-instrument
//! throttling and the decision time budget, runs the status machine, and
//! persists state after every mutation.

mod exits;

pub use exits::{ExitKind, ExitManager, ExitSignal, ExitUrgency};

use crate::config::Config;
use crate::data::{Bar, DataValidator, OhlcvBuffer};
use crate::execution::{OrderManager, VenueClient, VenueError};
use crate::feed::{BinanceIngest, EventPayload, FeedHealth, LatencyMetrics};
use crate::indicator::compute_features;
use crate::notify::{Notification, NotificationSink, Notifier, Priority};
use crate::regime::RegimeClassifier;
use crate::risk::{PositionSizer, SizeRejection, VetoChain, VetoConfig, VetoStage};
use crate::rules::{register_all_rules, Action, BiasAggregator, RuleEngine, Signal};
use crate::state::{KvStore, Position, RiskLimits, StateStore, SystemState, SystemStatus};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, timeout, Instant};

/// Minimum gap between accepted decisions for one instrument
const DECISION_THROTTLE: Duration = Duration::from_secs(1);
/// Overall budget for one decision
const DECISION_BUDGET: Duration = Duration::from_secs(1);
/// Degradation predicates must stay clear this long before recovery
const DEGRADED_RECOVERY: Duration = Duration::from_secs(60);
/// Consecutive venue aborts before SAFE_MODE
const MAX_VENUE_FAILURES: u32 = 5;
/// Latency samples required before the baseline locks in
const BASELINE_MIN_SAMPLES: usize = 100;

/// The event orchestrator
pub struct Orchestrator<V: VenueClient, K: KvStore, S: NotificationSink> {
    config: Config,
    state: SystemState,
    validator: DataValidator,
    buffers: HashMap<String, OhlcvBuffer>,
    classifier: RegimeClassifier,
    rule_engine: RuleEngine,
    aggregator: BiasAggregator,
    veto_chain: VetoChain,
    sizer: PositionSizer,
    exits: ExitManager,
    orders: OrderManager<V>,
    store: StateStore<K>,
    notifier: Notifier<S>,
    last_decision: HashMap<String, Instant>,
    last_degradation: Option<Instant>,
    baseline_p95: Option<f64>,
    decisions_made: u64,
}

impl<V: VenueClient, K: KvStore, S: NotificationSink> Orchestrator<V, K, S> {
    pub fn new(config: Config, orders: OrderManager<V>, kv: K, sink: S) -> Self {
        let mut rule_engine = RuleEngine::new();
        register_all_rules(&mut rule_engine);

        let risk_limits = RiskLimits {
            max_drawdown_pct: config.risk.max_drawdown_pct,
            daily_loss_limit_pct: config.risk.daily_loss_limit_pct,
        };
        let veto_chain = VetoChain::new(VetoConfig {
            max_position_size: config.risk.max_position_size,
            max_positions: config.risk.max_positions,
            max_correlation_exposure: Decimal::ZERO,
        });
        let sizer = PositionSizer::new(
            config.risk.risk_per_trade_pct,
            config.risk.stop_atr_multiplier,
            config.risk.min_position_notional,
            config.risk.max_position_notional,
        );
        let aggregator = BiasAggregator::new(config.activation_threshold);
        let store = StateStore::new(kv, Duration::from_secs(config.state_ttl_secs));
        let state = SystemState::new(config.starting_equity, risk_limits);

        Self {
            config,
            state,
            validator: DataValidator::new(),
            buffers: HashMap::new(),
            classifier: RegimeClassifier::new(),
            rule_engine,
            aggregator,
            veto_chain,
            sizer,
            exits: ExitManager::new(),
            orders,
            store,
            notifier: Notifier::new(sink),
            last_decision: HashMap::new(),
            last_degradation: None,
            baseline_p95: None,
            decisions_made: 0,
        }
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn status(&self) -> SystemStatus {
        self.state.status
    }

    pub fn decisions_made(&self) -> u64 {
        self.decisions_made
    }

    pub fn orders(&self) -> &OrderManager<V> {
        &self.orders
    }

    /// Load persisted state (or start fresh) and reconcile with the venue
    pub async fn init(&mut self) -> anyhow::Result<()> {
        match self.store.load().await {
            Ok(Some(loaded)) => {
                tracing::info!(
                    positions = loaded.open_positions.len(),
                    status = ?loaded.status,
                    "State restored"
                );
                self.state = loaded;
            }
            Ok(None) => {
                tracing::info!("No persisted state; starting fresh");
            }
            Err(e) => {
                tracing::warn!(error = %e, "State load failed; starting fresh");
            }
        }

        self.reconcile("startup").await;
        self.persist().await;
        Ok(())
    }

    /// Warm an instrument's buffer with historical closed bars
    pub fn seed_bars(&mut self, instrument: &str, bars: Vec<Bar>) {
        let buffer = self
            .buffers
            .entry(instrument.to_string())
            .or_default();
        for bar in bars {
            if self.validator.validate(&bar).is_accepted() {
                buffer.push(bar);
            }
        }
        tracing::info!(
            instrument,
            bars = buffer.len(),
            "Buffer seeded"
        );
    }

    /// Entry point for one kline event from ingest
    pub async fn handle_bar_close(&mut self, bar: Bar) {
        if self.state.status == SystemStatus::Halted {
            tracing::debug!(instrument = %bar.instrument, "Halted; bar event dropped");
            return;
        }

        if !self.validator.validate(&bar).is_accepted() {
            return;
        }
        let instrument = bar.instrument.clone();
        let is_closed = bar.is_closed;
        self.buffers.entry(instrument.clone()).or_default().push(bar);

        if !is_closed {
            return;
        }
        if self.state.status == SystemStatus::SafeMode {
            tracing::debug!(instrument = %instrument, "Safe mode; decision held");
            return;
        }

        // Replayed/duplicate bar defense
        if let Some(&last) = self.last_decision.get(&instrument) {
            if last.elapsed() < DECISION_THROTTLE {
                tracing::debug!(instrument = %instrument, "Decision throttled");
                return;
            }
        }

        let warm = self
            .buffers
            .get(&instrument)
            .map(|b| b.is_warm())
            .unwrap_or(false);
        if !warm {
            // Under-populated buffer short-circuits with no error
            return;
        }

        self.last_decision.insert(instrument.clone(), Instant::now());
        self.decisions_made += 1;

        match timeout(DECISION_BUDGET, self.decide(&instrument)).await {
            Ok(()) => {}
            Err(_) => {
                tracing::warn!(instrument = %instrument, "Decision exceeded budget; aborted");
            }
        }
    }

    /// The bar-close -> feature -> regime -> rule -> veto -> size -> submit
    /// sequence for one instrument.
    async fn decide(&mut self, instrument: &str) {
        let Some(buffer) = self.buffers.get(instrument) else {
            return;
        };
        let snapshot = buffer.snapshot();
        let features = compute_features(instrument, &snapshot);

        let regime = self.classifier.classify(&features);
        let volatility = self.classifier.classify_volatility(&features);
        self.state.current_regime = regime;
        self.state.volatility_regime = volatility;
        self.state
            .instrument_regimes
            .insert(instrument.to_string(), regime);
        self.state.last_update = Utc::now();

        let close = features.get("close").unwrap_or(0.0);
        let price = Decimal::from_f64_retain(close).unwrap_or(Decimal::ZERO);
        if let Some(position) = self.state.open_positions.get_mut(instrument) {
            position.mark(price);
        }

        let triggered = self.rule_engine.evaluate(&features, regime);
        let atr = features.get("atr_14").unwrap_or(0.0);
        let signal = self.aggregator.aggregate(
            instrument,
            &triggered,
            &self.state.adaptive.strategy_weights,
            regime,
            atr,
            price,
        );

        tracing::info!(
            instrument,
            action = ?signal.action,
            bias = signal.bias,
            confidence = signal.confidence,
            rules = ?signal.rule_names,
            regime = ?regime,
            "Signal"
        );

        self.dispatch_signal(&signal, "close requested").await;

        // Exit rules run for any surviving position on every closed bar,
        // independently of what the entry side of the pipeline decided.
        if let Some(adx) = features.get("adx_14") {
            self.exits.record_adx(instrument, adx);
        }
        if let Some(position) = self.state.open_positions.get(instrument).cloned() {
            let bar_open_ms = snapshot.last().map(|b| b.open_time_ms).unwrap_or(0);
            if let Some(exit) = self.exits.check(&position, &features, regime, bar_open_ms) {
                tracing::warn!(
                    instrument,
                    kind = exit.kind.as_str(),
                    urgency = ?exit.urgency,
                    reason = %exit.reason,
                    "Exit triggered"
                );
                let close_signal = Signal {
                    instrument: instrument.to_string(),
                    action: Action::Close,
                    bias: 0.0,
                    confidence: 1.0,
                    rule_names: vec![exit.kind.as_str()],
                    regime,
                    atr,
                    suggested_price: price,
                };
                self.dispatch_signal(&close_signal, &exit.reason).await;
            }
        }
    }

    /// Route one signal through the action arms
    async fn dispatch_signal(&mut self, signal: &Signal, close_reason: &str) {
        match signal.action {
            Action::ProposeLong | Action::ProposeShort => {
                self.try_entry(signal).await;
            }
            Action::Close => {
                if self.state.open_positions.contains_key(&signal.instrument) {
                    self.close_position(&signal.instrument, close_reason).await;
                    self.halt_if_risk_breached().await;
                }
            }
            Action::Neutral => {}
        }
    }

    async fn try_entry(&mut self, signal: &Signal) {
        if self.state.open_positions.contains_key(&signal.instrument) {
            tracing::debug!(instrument = %signal.instrument, "Position already open; skipping entry");
            return;
        }

        let Some(filters) = self.orders.filters_for(&signal.instrument).cloned() else {
            tracing::warn!(instrument = %signal.instrument, "No exchange filters; entry aborted");
            return;
        };

        let atr = Decimal::from_f64_retain(signal.atr).unwrap_or(Decimal::ZERO);
        let sized = match self
            .sizer
            .size(self.state.equity, signal.suggested_price, atr, &filters)
        {
            Ok(sized) => sized,
            Err(SizeRejection::QuantityTooSmall(detail)) => {
                tracing::info!(
                    instrument = %signal.instrument,
                    reason = "QUANTITY_TOO_SMALL",
                    detail = %detail,
                    "Entry skipped"
                );
                return;
            }
            Err(SizeRejection::InvalidInput(detail)) => {
                tracing::debug!(instrument = %signal.instrument, detail = %detail, "Sizing input invalid");
                return;
            }
        };

        let veto = self
            .veto_chain
            .evaluate(signal, &self.state, sized.quantity, sized.price);
        if !veto.approved {
            let stage = veto.stage.map(|s| s.as_str()).unwrap_or("unknown");
            let reason = veto.reason.clone().unwrap_or_default();
            self.notify(
                Notification::new(Priority::Warning, "Trade vetoed", reason)
                    .detail("instrument", signal.instrument.clone())
                    .detail("stage", stage),
            )
            .await;
            if matches!(veto.stage, Some(VetoStage::Drawdown | VetoStage::DailyLoss)) {
                self.halt_if_risk_breached().await;
            }
            return;
        }

        // A stage that adjusts supersedes the original values
        let mut sized = sized;
        if let Some(quantity) = veto.adjusted_quantity {
            sized.quantity = quantity;
            sized.notional = quantity * sized.price;
        }
        if let Some(price) = veto.adjusted_price {
            sized.price = price;
        }

        let stop_multiplier = self.state.adaptive.stop_atr_multiplier;
        match self.orders.submit_entry(signal, &sized, stop_multiplier).await {
            Ok(outcome) => {
                if outcome.slippage_exceeded {
                    self.mark_degraded("fill slippage above limit").await;
                }
                let side = match signal.action {
                    Action::ProposeShort => crate::state::PositionSide::Short,
                    _ => crate::state::PositionSide::Long,
                };
                let mut position = Position {
                    instrument: signal.instrument.clone(),
                    side,
                    quantity: outcome.entry.quantity,
                    entry_price: outcome.entry.price,
                    current_price: outcome.entry.price,
                    unrealized_pnl: Decimal::ZERO,
                    stop_price: Some(outcome.stop_price),
                    take_profit_price: None,
                    entry_time: outcome.entry.timestamp,
                    strategy_name: "default".to_string(),
                    regime_at_entry: signal.regime,
                };
                position.mark(outcome.entry.price);
                self.state
                    .open_positions
                    .insert(signal.instrument.clone(), position);

                self.notify(
                    Notification::new(
                        Priority::Info,
                        "Trade executed",
                        format!("{} {:?}", signal.instrument, signal.action),
                    )
                    .detail("quantity", sized.quantity.to_string())
                    .detail("price", outcome.entry.price.to_string())
                    .detail("stop", outcome.stop_price.to_string()),
                )
                .await;
                if outcome.stop.is_none() {
                    self.notify(
                        Notification::new(
                            Priority::Error,
                            "Protective stop failed",
                            "position is open without venue-side protection",
                        )
                        .detail("instrument", signal.instrument.clone()),
                    )
                    .await;
                }
                self.persist().await;
            }
            Err(err) => self.handle_venue_error(&signal.instrument, err).await,
        }
    }

    async fn close_position(&mut self, instrument: &str, reason: &str) {
        let Some(position) = self.state.open_positions.get(instrument).cloned() else {
            return;
        };
        match self.orders.close_position(&position).await {
            Ok(fill) => {
                let mut closed = position;
                closed.mark(fill.price);
                let realized = closed.unrealized_pnl;
                self.state.open_positions.remove(instrument);
                self.state.record_trade_close(realized);

                self.notify(
                    Notification::new(
                        Priority::Info,
                        "Position closed",
                        format!("{instrument}: {reason}"),
                    )
                    .detail("pnl", realized.to_string())
                    .detail("exit_price", fill.price.to_string()),
                )
                .await;
                self.persist().await;
            }
            Err(err) => self.handle_venue_error(instrument, err).await,
        }
    }

    async fn handle_venue_error(&mut self, instrument: &str, err: VenueError) {
        match err {
            VenueError::Authentication { message, .. } => {
                self.notify(
                    Notification::new(Priority::Critical, "Venue authentication failed", message)
                        .detail("instrument", instrument),
                )
                .await;
                self.transition(SystemStatus::SafeMode, "authentication failure")
                    .await;
            }
            VenueError::Rejected { message, .. } => {
                self.notify(
                    Notification::new(Priority::Error, "Order rejected", message)
                        .detail("instrument", instrument),
                )
                .await;
            }
            VenueError::Transient { message, .. } => {
                tracing::error!(instrument, error = %message, "Venue call aborted");
                if self.orders.consecutive_failures() >= MAX_VENUE_FAILURES {
                    self.notify(
                        Notification::new(
                            Priority::Critical,
                            "Venue unreachable",
                            format!("{MAX_VENUE_FAILURES} consecutive failures"),
                        ),
                    )
                    .await;
                    self.transition(SystemStatus::SafeMode, "consecutive venue failures")
                        .await;
                }
            }
        }
    }

    /// Feed health events from ingest
    pub async fn handle_health(&mut self, event: FeedHealth) {
        match event {
            FeedHealth::InstrumentSilent {
                instrument,
                elapsed_secs,
            } => {
                self.notify(
                    Notification::new(
                        Priority::Critical,
                        "Feed loss",
                        format!("no events for {elapsed_secs}s"),
                    )
                    .detail("instrument", instrument),
                )
                .await;
                self.transition(SystemStatus::SafeMode, "feed loss").await;
            }
            FeedHealth::ReconnectExhausted { shard } => {
                self.notify(
                    Notification::new(
                        Priority::Critical,
                        "Feed reconnect exhausted",
                        format!("shard {shard} gave up"),
                    )
                    .detail("shard", shard.to_string()),
                )
                .await;
                self.transition(SystemStatus::SafeMode, "reconnect exhausted")
                    .await;
            }
            FeedHealth::Reconnecting { shard, attempt } => {
                tracing::warn!(shard, attempt, "Feed reconnecting");
                self.mark_degraded("feed connection lost").await;
            }
            FeedHealth::ConnectionError { shard, message } => {
                tracing::warn!(shard, error = %message, "Feed connection error");
                self.mark_degraded("feed connection error").await;
            }
        }
    }

    /// Periodic housekeeping: latency baseline, degradation recovery
    pub async fn periodic(&mut self, latency: LatencyMetrics) {
        if self.baseline_p95.is_none() && latency.sample_count >= BASELINE_MIN_SAMPLES {
            tracing::info!(p95_ms = latency.p95_ms, "Latency baseline locked");
            self.baseline_p95 = Some(latency.p95_ms.max(1.0));
        }
        if let Some(baseline) = self.baseline_p95 {
            if latency.sample_count >= BASELINE_MIN_SAMPLES && latency.p95_ms > 2.0 * baseline {
                self.mark_degraded("latency p95 above 2x baseline").await;
            }
        }

        if self.state.status == SystemStatus::Degraded {
            let clear = self
                .last_degradation
                .map(|at| at.elapsed() >= DEGRADED_RECOVERY)
                .unwrap_or(true);
            if clear {
                self.transition(SystemStatus::Running, "degradation cleared")
                    .await;
            }
        }
    }

    async fn mark_degraded(&mut self, reason: &str) {
        self.last_degradation = Some(Instant::now());
        if self.state.status == SystemStatus::Running {
            self.transition(SystemStatus::Degraded, reason).await;
        }
    }

    async fn halt_if_risk_breached(&mut self) {
        if self.state.status == SystemStatus::Halted {
            return;
        }
        let reason = if self.state.drawdown_breached() {
            Some(format!(
                "drawdown {}% breached limit",
                self.state.current_drawdown_pct
            ))
        } else if self.state.daily_loss_breached() {
            Some(format!(
                "daily loss {}% breached limit",
                self.state.daily_pnl_pct
            ))
        } else {
            None
        };
        if let Some(reason) = reason {
            self.halt(&reason).await;
        }
    }

    /// Kill switch: close everything and stop accepting bar events
    pub async fn halt(&mut self, reason: &str) {
        if self.state.status == SystemStatus::Halted {
            return;
        }
        self.notify(Notification::new(Priority::Critical, "Trading halted", reason))
            .await;

        let instruments: Vec<String> = self.state.open_positions.keys().cloned().collect();
        for instrument in instruments {
            self.close_position(&instrument, "halt").await;
        }
        self.transition(SystemStatus::Halted, reason).await;
    }

    /// Operator-triggered recovery from SAFE_MODE or HALTED
    pub async fn operator_reset(&mut self) {
        if !matches!(
            self.state.status,
            SystemStatus::SafeMode | SystemStatus::Halted
        ) {
            return;
        }
        self.transition(SystemStatus::Running, "operator reset").await;
    }

    async fn transition(&mut self, next: SystemStatus, reason: &str) {
        if self.state.status == next {
            return;
        }
        let prev = self.state.status;
        self.state.status = next;
        self.state.last_update = Utc::now();
        tracing::warn!(from = ?prev, to = ?next, reason, "Status transition");

        // Reconciliation preempts pending decisions on every transition.
        // Entering HALTED is the exception: everything was just closed and
        // a halted engine must not adopt new exposure.
        if next != SystemStatus::Halted {
            self.reconcile(reason).await;
        }
        self.persist().await;
    }

    async fn reconcile(&mut self, context: &str) {
        match self.orders.reconcile(&mut self.state).await {
            Ok(outcome) if outcome.consistent() => {
                tracing::info!(context, "Reconciliation consistent");
            }
            Ok(outcome) => {
                self.notify(
                    Notification::new(
                        Priority::Critical,
                        "Reconciliation mismatch",
                        "venue view adopted",
                    )
                    .detail("adopted", outcome.adopted.join(","))
                    .detail("dropped", outcome.dropped.join(","))
                    .detail("context", context),
                )
                .await;
                self.persist().await;
            }
            Err(err) => {
                self.notify(
                    Notification::new(Priority::Critical, "Reconciliation failed", err.to_string())
                        .detail("context", context),
                )
                .await;
                if self.state.status != SystemStatus::SafeMode {
                    self.state.status = SystemStatus::SafeMode;
                    self.persist().await;
                }
            }
        }
    }

    async fn persist(&mut self) {
        if let Err(err) = self.store.save(&self.state).await {
            self.notify(
                Notification::new(Priority::Critical, "State persistence failed", err.to_string()),
            )
            .await;
            if self.state.status == SystemStatus::Running {
                self.state.status = SystemStatus::Degraded;
                self.last_degradation = Some(Instant::now());
            }
        }
    }

    async fn notify(&mut self, notification: Notification) {
        self.notifier.send(notification).await;
    }

    pub fn notifier(&self) -> &Notifier<S> {
        &self.notifier
    }

    /// Main event loop: subscribe, start ingest, drain events until shutdown
    pub async fn run(
        &mut self,
        ingest: &mut BinanceIngest,
        mut shutdown: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        ingest.subscribe_klines(&self.config.instruments, &self.config.interval);
        ingest.subscribe_book_ticker(&self.config.instruments);

        let mut kline_rx = ingest.on_kline();
        let mut book_rx = ingest.on_book_ticker();
        let mut health_rx = ingest.on_health();
        let handles = ingest.start();

        let mut housekeeping = interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested; draining");
                    break;
                }
                event = kline_rx.recv() => match event {
                    Ok(event) => {
                        if let EventPayload::Kline(bar) = event.payload {
                            self.handle_bar_close(bar).await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped = n, "Kline sink lagged; oldest events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                event = book_rx.recv() => match event {
                    Ok(event) => {
                        if let EventPayload::BookTicker { bid, ask } = event.payload {
                            let mid = (bid + ask) / 2.0;
                            if let Some(price) = Decimal::from_f64_retain(mid) {
                                if let Some(position) =
                                    self.state.open_positions.get_mut(&event.instrument)
                                {
                                    position.mark(price);
                                }
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped = n, "Book sink lagged; oldest events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                health = health_rx.recv() => {
                    if let Ok(event) = health {
                        self.handle_health(event).await;
                    }
                }
                _ = housekeeping.tick() => {
                    let metrics = ingest.latency_metrics();
                    self.periodic(metrics).await;
                }
            }
        }

        // Drain: persist state, then cancel ingest tasks
        self.persist().await;
        for handle in handles {
            handle.abort();
        }
        tracing::info!("Orchestrator stopped");
        Ok(())
    }
}
