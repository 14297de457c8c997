//! Atomic state persistence over a key-value store

use super::SystemState;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Key for the single logical state document
pub const STATE_KEY: &str = "perpbot:system_state";

/// Minimal key-value contract: atomic set with TTL, get, ping
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError>;
    async fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    async fn ping(&self) -> Result<(), EngineError>;
}

/// In-memory store for dry runs and tests. Clones share the same backing
/// map.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), EngineError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::Persistence("store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::Persistence("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Serializes and restores the full system state as one JSON document.
///
/// Writes are retried once; a second failure surfaces to the orchestrator,
/// which degrades the system and alerts.
pub struct StateStore<K: KvStore> {
    kv: K,
    ttl: Duration,
}

impl<K: KvStore> StateStore<K> {
    pub fn new(kv: K, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Persist the state atomically (single set with TTL)
    pub async fn save(&self, state: &SystemState) -> Result<(), EngineError> {
        let json = serde_json::to_string(state)
            .map_err(|e| EngineError::Persistence(format!("serialize: {e}")))?;

        match self.kv.set(STATE_KEY, json.clone(), self.ttl).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(error = %first, "State write failed, retrying once");
                self.kv.set(STATE_KEY, json, self.ttl).await
            }
        }
    }

    /// Load the persisted state, if any.
    ///
    /// A load failure is reported so the caller can fall back to a fresh
    /// state; it is never fatal.
    pub async fn load(&self) -> Result<Option<SystemState>, EngineError> {
        let Some(json) = self.kv.get(STATE_KEY).await? else {
            return Ok(None);
        };
        let state = serde_json::from_str(&json)
            .map_err(|e| EngineError::Persistence(format!("deserialize: {e}")))?;
        Ok(Some(state))
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.kv.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RiskLimits;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn state() -> SystemState {
        SystemState::new(dec!(10000), RiskLimits::default())
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = StateStore::new(MemoryKv::new(), Duration::from_secs(86_400));
        let mut s = state();
        s.update_equity(dec!(10500));

        store.save(&s).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(s, loaded);
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let store = StateStore::new(MemoryKv::new(), Duration::from_secs(60));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_document_errors() {
        let kv = MemoryKv::new();
        kv.set(STATE_KEY, "not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let store = StateStore::new(kv, Duration::from_secs(60));
        assert!(store.load().await.is_err());
    }

    struct FlakyKv {
        inner: MemoryKv,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl KvStore for FlakyKv {
        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError> {
            let budget_left = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if budget_left.is_ok() {
                return Err(EngineError::Persistence("simulated outage".to_string()));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
            self.inner.get(key).await
        }

        async fn ping(&self) -> Result<(), EngineError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_save_retries_once() {
        let kv = FlakyKv {
            inner: MemoryKv::new(),
            failures_left: AtomicU32::new(1),
        };
        let store = StateStore::new(kv, Duration::from_secs(60));
        store.save(&state()).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_save_fails_after_second_failure() {
        let kv = FlakyKv {
            inner: MemoryKv::new(),
            failures_left: AtomicU32::new(2),
        };
        let store = StateStore::new(kv, Duration::from_secs(60));
        assert!(store.save(&state()).await.is_err());
    }
}
