//! Structured notifications with per-priority rate caps
//!
//! CRITICAL messages additionally carry a per-message-key 24 h dedup latch
//! so a stuck fault pages once, not continuously.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Notification priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Critical,
    Error,
    Warning,
    Info,
    Heartbeat,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::Error => "ERROR",
            Priority::Warning => "WARNING",
            Priority::Info => "INFO",
            Priority::Heartbeat => "HEARTBEAT",
        }
    }

    /// (max messages, window) rate cap
    fn rate_cap(&self) -> (usize, ChronoDuration) {
        match self {
            Priority::Critical => (6, ChronoDuration::hours(1)),
            Priority::Error => (5, ChronoDuration::minutes(1)),
            Priority::Warning => (10, ChronoDuration::minutes(1)),
            Priority::Info => (60, ChronoDuration::minutes(1)),
            Priority::Heartbeat => (24, ChronoDuration::days(1)),
        }
    }
}

/// A structured notification
#[derive(Debug, Clone)]
pub struct Notification {
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(priority: Priority, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            priority,
            title: title.into(),
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Stable key used for CRITICAL deduplication
    pub fn event_key(&self) -> String {
        let mut parts = vec![self.title.clone()];
        for (key, value) in &self.details {
            parts.push(format!("{key}={value}"));
        }
        parts.join(":")
    }
}

/// Delivery target (chat bot, pager, log)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification);
}

/// Sink that writes to the log stream
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, notification: &Notification) {
        match notification.priority {
            Priority::Critical | Priority::Error => tracing::error!(
                priority = notification.priority.as_str(),
                title = %notification.title,
                details = ?notification.details,
                "{}",
                notification.message
            ),
            Priority::Warning => tracing::warn!(
                title = %notification.title,
                details = ?notification.details,
                "{}",
                notification.message
            ),
            Priority::Info | Priority::Heartbeat => tracing::info!(
                title = %notification.title,
                details = ?notification.details,
                "{}",
                notification.message
            ),
        }
    }
}

/// Rate-capped notification dispatcher
pub struct Notifier<S: NotificationSink> {
    sink: S,
    history: HashMap<Priority, VecDeque<DateTime<Utc>>>,
    critical_latch: HashMap<String, DateTime<Utc>>,
    latch_window: ChronoDuration,
    suppressed: u64,
}

impl<S: NotificationSink> Notifier<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            history: HashMap::new(),
            critical_latch: HashMap::new(),
            latch_window: ChronoDuration::hours(24),
            suppressed: 0,
        }
    }

    /// Send if the rate cap and latch allow; returns whether it went out
    pub async fn send(&mut self, notification: Notification) -> bool {
        let now = notification.timestamp;

        if notification.priority == Priority::Critical {
            let key = notification.event_key();
            if let Some(&last) = self.critical_latch.get(&key) {
                if now - last < self.latch_window {
                    self.suppressed += 1;
                    tracing::debug!(key = %key, "Critical notification latched");
                    return false;
                }
            }
            self.critical_latch.insert(key, now);
        }

        let (max, window) = notification.priority.rate_cap();
        let history = self.history.entry(notification.priority).or_default();
        while let Some(&front) = history.front() {
            if now - front >= window {
                history.pop_front();
            } else {
                break;
            }
        }
        if history.len() >= max {
            self.suppressed += 1;
            tracing::debug!(
                priority = notification.priority.as_str(),
                "Notification rate cap hit"
            );
            return false;
        }
        history.push_back(now);

        self.sink.deliver(&notification).await;
        true
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collects delivered notifications for assertions
    #[derive(Default)]
    pub struct CollectingSink {
        pub delivered: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn deliver(&self, notification: &Notification) {
            self.delivered.lock().unwrap().push(notification.clone());
        }
    }

    fn notifier() -> Notifier<CollectingSink> {
        Notifier::new(CollectingSink::default())
    }

    #[tokio::test]
    async fn test_delivers_within_cap() {
        let mut n = notifier();
        assert!(
            n.send(Notification::new(Priority::Info, "Trade", "opened"))
                .await
        );
        assert_eq!(n.sink().delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_rate_cap_five_per_minute() {
        let mut n = notifier();
        for i in 0..5 {
            assert!(
                n.send(Notification::new(Priority::Error, format!("E{i}"), "boom"))
                    .await
            );
        }
        assert!(
            !n.send(Notification::new(Priority::Error, "E5", "boom"))
                .await
        );
        assert_eq!(n.suppressed_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_window_slides() {
        let mut n = notifier();
        let old = Utc::now() - ChronoDuration::minutes(2);
        for i in 0..5 {
            let mut msg = Notification::new(Priority::Error, format!("E{i}"), "boom");
            msg.timestamp = old;
            assert!(n.send(msg).await);
        }
        // Old entries have aged out of the window
        assert!(
            n.send(Notification::new(Priority::Error, "fresh", "boom"))
                .await
        );
    }

    #[tokio::test]
    async fn test_critical_latch_dedups_same_key() {
        let mut n = notifier();
        let first = Notification::new(Priority::Critical, "Feed loss", "BTCUSDT silent")
            .detail("instrument", "BTCUSDT");
        let repeat = Notification::new(Priority::Critical, "Feed loss", "BTCUSDT silent")
            .detail("instrument", "BTCUSDT");
        assert!(n.send(first).await);
        assert!(!n.send(repeat).await);
        assert_eq!(n.sink().delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_critical_latch_distinguishes_keys() {
        let mut n = notifier();
        let btc = Notification::new(Priority::Critical, "Feed loss", "silent")
            .detail("instrument", "BTCUSDT");
        let eth = Notification::new(Priority::Critical, "Feed loss", "silent")
            .detail("instrument", "ETHUSDT");
        assert!(n.send(btc).await);
        assert!(n.send(eth).await);
    }

    #[tokio::test]
    async fn test_critical_latch_expires() {
        let mut n = notifier();
        let mut stale = Notification::new(Priority::Critical, "Feed loss", "silent");
        stale.timestamp = Utc::now() - ChronoDuration::hours(25);
        assert!(n.send(stale).await);
        assert!(
            n.send(Notification::new(Priority::Critical, "Feed loss", "silent"))
                .await
        );
    }

    #[test]
    fn test_event_key_includes_details() {
        let msg = Notification::new(Priority::Critical, "Mismatch", "x")
            .detail("instrument", "BTCUSDT")
            .detail("stage", "reconcile");
        assert_eq!(msg.event_key(), "Mismatch:instrument=BTCUSDT:stage=reconcile");
    }

    #[test]
    fn test_priority_caps() {
        assert_eq!(Priority::Critical.rate_cap().0, 6);
        assert_eq!(Priority::Error.rate_cap().0, 5);
        assert_eq!(Priority::Warning.rate_cap().0, 10);
        assert_eq!(Priority::Info.rate_cap().0, 60);
        assert_eq!(Priority::Heartbeat.rate_cap().0, 24);
    }
}
