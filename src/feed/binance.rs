//! Binance futures stream ingest with subscription sharding

use super::conn::{connection_loop, ConnSettings};
use super::types::{EventPayload, FeedHealth, LatencyMetrics, LatencyTracker, MarketEvent};
use crate::config::FeedConfig;
use crate::data::Bar;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};

const LIVE_WS_URL: &str = "wss://fstream.binance.com/stream";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com/stream";

/// Capacity of each typed fan-out channel. Slow subscribers lag and lose the
/// oldest entries with a counted warning; they never block ingest.
const CHANNEL_CAPACITY: usize = 1024;

/// Combined-stream envelope
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct KlineMessage {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: u64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct BookTickerMessage {
    #[serde(rename = "E", default)]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
}

#[derive(Debug, Deserialize)]
struct AggTradeMessage {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
}

/// Sharded Binance ingest.
///
/// Subscriptions are split across connections once the instrument count
/// exceeds the per-connection cap, keeping each stream URL under the
/// venue's subscription limits. Subscribing twice is a no-op.
pub struct BinanceIngest {
    config: FeedConfig,
    base_url: String,
    /// instrument -> kline interval
    kline_subs: BTreeMap<String, String>,
    book_subs: BTreeSet<String>,
    kline_tx: broadcast::Sender<MarketEvent>,
    book_tx: broadcast::Sender<MarketEvent>,
    trade_tx: broadcast::Sender<MarketEvent>,
    health_tx: broadcast::Sender<FeedHealth>,
    latency: Arc<Mutex<LatencyTracker>>,
    last_event: Arc<Mutex<HashMap<String, Instant>>>,
}

impl BinanceIngest {
    pub fn new(config: FeedConfig, testnet: bool) -> Self {
        let base_url = if testnet { TESTNET_WS_URL } else { LIVE_WS_URL };
        Self::with_base_url(config, base_url)
    }

    pub fn with_base_url(config: FeedConfig, base_url: impl Into<String>) -> Self {
        let (kline_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (book_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (trade_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (health_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            config,
            base_url: base_url.into(),
            kline_subs: BTreeMap::new(),
            book_subs: BTreeSet::new(),
            kline_tx,
            book_tx,
            trade_tx,
            health_tx,
            latency: Arc::new(Mutex::new(LatencyTracker::new())),
            last_event: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe instruments to kline streams; idempotent
    pub fn subscribe_klines(&mut self, instruments: &[String], interval: &str) {
        for instrument in instruments {
            self.kline_subs
                .insert(instrument.to_ascii_uppercase(), interval.to_string());
        }
        tracing::info!(count = instruments.len(), interval, "Kline subscriptions added");
    }

    /// Subscribe instruments to best bid/ask streams; idempotent
    pub fn subscribe_book_ticker(&mut self, instruments: &[String]) {
        for instrument in instruments {
            self.book_subs.insert(instrument.to_ascii_uppercase());
        }
        tracing::info!(count = instruments.len(), "Book ticker subscriptions added");
    }

    pub fn on_kline(&self) -> broadcast::Receiver<MarketEvent> {
        self.kline_tx.subscribe()
    }

    pub fn on_book_ticker(&self) -> broadcast::Receiver<MarketEvent> {
        self.book_tx.subscribe()
    }

    pub fn on_trade(&self) -> broadcast::Receiver<MarketEvent> {
        self.trade_tx.subscribe()
    }

    pub fn on_health(&self) -> broadcast::Receiver<FeedHealth> {
        self.health_tx.subscribe()
    }

    /// Latency statistics over the rolling sample window
    pub fn latency_metrics(&self) -> LatencyMetrics {
        self.latency
            .lock()
            .map(|tracker| tracker.metrics())
            .unwrap_or_default()
    }

    /// Stream names grouped into shards of at most the per-connection cap,
    /// keyed by instrument so one instrument's streams share a connection.
    fn shard_streams(&self) -> Vec<Vec<String>> {
        let mut instruments: BTreeSet<String> = self.kline_subs.keys().cloned().collect();
        instruments.extend(self.book_subs.iter().cloned());

        let cap = self.config.instruments_per_connection.max(1);
        let mut shards: Vec<Vec<String>> = vec![];
        for chunk in instruments
            .into_iter()
            .collect::<Vec<_>>()
            .chunks(cap)
        {
            let mut streams = vec![];
            for instrument in chunk {
                let lower = instrument.to_ascii_lowercase();
                if let Some(interval) = self.kline_subs.get(instrument) {
                    streams.push(format!("{lower}@kline_{interval}"));
                }
                if self.book_subs.contains(instrument) {
                    streams.push(format!("{lower}@bookTicker"));
                }
            }
            if !streams.is_empty() {
                shards.push(streams);
            }
        }
        shards
    }

    fn shard_url(&self, streams: &[String]) -> String {
        format!("{}?streams={}", self.base_url, streams.join("/"))
    }

    /// Spawn one connection task per shard plus the silence watchdog.
    ///
    /// Returns the task handles; dropping them does not stop the tasks, the
    /// orchestrator aborts them on shutdown.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let shards = self.shard_streams();
        tracing::info!(
            shards = shards.len(),
            instruments = self.kline_subs.len().max(self.book_subs.len()),
            "Starting ingest"
        );

        let mut handles = vec![];
        for (shard_id, streams) in shards.iter().enumerate() {
            let settings = ConnSettings {
                url: self.shard_url(streams),
                shard: shard_id,
                ping_interval: Duration::from_secs(self.config.ping_interval_secs),
                pong_timeout: Duration::from_secs(self.config.pong_timeout_secs),
                reconnect_base: Duration::from_secs(self.config.reconnect_base_secs),
                reconnect_cap: Duration::from_secs(self.config.reconnect_cap_secs),
                max_reconnect_attempts: self.config.max_reconnect_attempts,
            };
            let health_tx = self.health_tx.clone();
            let kline_tx = self.kline_tx.clone();
            let book_tx = self.book_tx.clone();
            let trade_tx = self.trade_tx.clone();
            let latency = Arc::clone(&self.latency);
            let last_event = Arc::clone(&self.last_event);

            handles.push(tokio::spawn(async move {
                connection_loop(settings, health_tx, move |text| {
                    if let Some(event) = parse_message(text) {
                        if let Ok(mut tracker) = latency.lock() {
                            tracker.record(event.latency_ms());
                        }
                        if let Ok(mut map) = last_event.lock() {
                            map.insert(event.instrument.clone(), Instant::now());
                        }
                        let tx = match event.payload {
                            EventPayload::Kline(_) => &kline_tx,
                            EventPayload::BookTicker { .. } => &book_tx,
                            EventPayload::AggTrade { .. } => &trade_tx,
                        };
                        // No receivers is fine; lagged receivers drop oldest
                        let _ = tx.send(event);
                    }
                })
                .await;
            }));
        }

        handles.push(self.spawn_watchdog());
        handles
    }

    /// Periodically flag instruments that have gone silent
    fn spawn_watchdog(&self) -> JoinHandle<()> {
        let threshold = Duration::from_secs(self.config.data_loss_timeout_secs);
        let last_event = Arc::clone(&self.last_event);
        let health_tx = self.health_tx.clone();

        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(5));
            loop {
                timer.tick().await;
                let silent: Vec<(String, u64)> = match last_event.lock() {
                    Ok(map) => map
                        .iter()
                        .filter(|(_, &at)| at.elapsed() > threshold)
                        .map(|(instrument, at)| (instrument.clone(), at.elapsed().as_secs()))
                        .collect(),
                    Err(_) => continue,
                };
                for (instrument, elapsed_secs) in silent {
                    tracing::error!(%instrument, elapsed_secs, "No data from instrument");
                    let _ = health_tx.send(FeedHealth::InstrumentSilent {
                        instrument,
                        elapsed_secs,
                    });
                }
            }
        })
    }
}

/// Parse one combined-stream message into a typed event
pub fn parse_message(text: &str) -> Option<MarketEvent> {
    let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;
    let received_ms = Utc::now().timestamp_millis() as u64;

    if envelope.stream.contains("@kline") {
        let msg: KlineMessage = serde_json::from_value(envelope.data).ok()?;
        if msg.event_type != "kline" {
            return None;
        }
        let bar = Bar {
            instrument: msg.symbol.clone(),
            open_time_ms: msg.kline.open_time,
            open: msg.kline.open.parse().ok()?,
            high: msg.kline.high.parse().ok()?,
            low: msg.kline.low.parse().ok()?,
            close: msg.kline.close.parse().ok()?,
            volume: msg.kline.volume.parse().ok()?,
            is_closed: msg.kline.is_closed,
        };
        return Some(MarketEvent {
            instrument: msg.symbol,
            event_time_ms: msg.event_time,
            received_ms,
            payload: EventPayload::Kline(bar),
        });
    }
    if envelope.stream.contains("@bookTicker") {
        let msg: BookTickerMessage = serde_json::from_value(envelope.data).ok()?;
        return Some(MarketEvent {
            instrument: msg.symbol,
            event_time_ms: msg.event_time,
            received_ms,
            payload: EventPayload::BookTicker {
                bid: msg.bid.parse().ok()?,
                ask: msg.ask.parse().ok()?,
            },
        });
    }
    if envelope.stream.contains("@aggTrade") {
        let msg: AggTradeMessage = serde_json::from_value(envelope.data).ok()?;
        return Some(MarketEvent {
            instrument: msg.symbol,
            event_time_ms: msg.event_time,
            received_ms,
            payload: EventPayload::AggTrade {
                price: msg.price.parse().ok()?,
                quantity: msg.quantity.parse().ok()?,
            },
        });
    }
    tracing::debug!(stream = %envelope.stream, "Unhandled stream type");
    None
}
