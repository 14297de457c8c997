//! Reconnecting WebSocket connection loop with keep-alive
//!
//! Each shard owns one connection. Pings go out on a fixed cadence; a
//! missing pong past the timeout tears the connection down and enters the
//! exponential-backoff reconnect path. Exhausting the reconnect budget is
//! reported so the orchestrator can escalate.

use super::types::FeedHealth;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Keep-alive and reconnect parameters for one connection
#[derive(Debug, Clone)]
pub struct ConnSettings {
    pub url: String,
    pub shard: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
}

/// Run the connection until it closes cleanly or the reconnect budget runs
/// out. Every received text frame is handed to `on_text`.
pub async fn connection_loop<F>(
    settings: ConnSettings,
    health_tx: broadcast::Sender<FeedHealth>,
    mut on_text: F,
) where
    F: FnMut(&str) + Send,
{
    let mut attempts: u32 = 0;
    let mut delay = settings.reconnect_base;

    loop {
        match connect_and_stream(&settings, &mut on_text).await {
            Ok(()) => {
                tracing::info!(shard = settings.shard, "WebSocket closed cleanly");
                return;
            }
            Err(e) => {
                attempts += 1;
                tracing::warn!(
                    shard = settings.shard,
                    attempt = attempts,
                    error = %e,
                    "WebSocket connection error, reconnecting..."
                );
                let _ = health_tx.send(FeedHealth::ConnectionError {
                    shard: settings.shard,
                    message: e.to_string(),
                });

                if attempts >= settings.max_reconnect_attempts {
                    tracing::error!(shard = settings.shard, "Reconnect budget exhausted");
                    let _ = health_tx.send(FeedHealth::ReconnectExhausted {
                        shard: settings.shard,
                    });
                    return;
                }
                let _ = health_tx.send(FeedHealth::Reconnecting {
                    shard: settings.shard,
                    attempt: attempts,
                });

                sleep(delay).await;
                delay = (delay * 2).min(settings.reconnect_cap);
            }
        }
    }
}

async fn connect_and_stream<F>(settings: &ConnSettings, on_text: &mut F) -> anyhow::Result<()>
where
    F: FnMut(&str) + Send,
{
    tracing::info!(shard = settings.shard, url = %settings.url, "Connecting to venue stream");
    let (ws_stream, _response) = connect_async(settings.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();
    tracing::info!(shard = settings.shard, "Connected");

    let mut ping_timer = interval(settings.ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => on_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(shard = settings.shard, "Received close frame");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(anyhow::anyhow!("WebSocket error: {e}"));
                    }
                    None => {
                        return Err(anyhow::anyhow!("WebSocket stream ended unexpectedly"));
                    }
                    _ => {}
                }
            }

            _ = ping_timer.tick() => {
                if last_pong.elapsed() > settings.ping_interval + settings.pong_timeout {
                    return Err(anyhow::anyhow!(
                        "no pong within {:?}",
                        settings.pong_timeout
                    ));
                }
                write.send(Message::Ping(vec![])).await?;
            }
        }
    }
}
