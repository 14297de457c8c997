//! Error taxonomy for the decision pipeline

use thiserror::Error;

/// Errors surfaced by pipeline components.
///
/// Recoverable faults are handled by the component that owns them; only
/// status transitions propagate past the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Validator rejected an incoming bar
    #[error("invalid market data: {0}")]
    DataInvalid(String),
    /// Fewer than the minimum closed bars are buffered
    #[error("insufficient history: {have} bars, need {need}")]
    InsufficientHistory { have: usize, need: usize },
    /// An indicator produced a non-finite value
    #[error("computation error in {field}")]
    Computation { field: String },
    /// Signal rejected by a veto stage
    #[error("vetoed at {stage}: {reason}")]
    Vetoed { stage: String, reason: String },
    /// Transient venue fault (5xx, timeout, rate limit); retried with backoff
    #[error("venue transient error: {0}")]
    VenueTransient(String),
    /// Authentication failure; escalates to SAFE_MODE immediately
    #[error("venue authentication failed: {0}")]
    VenueAuthentication(String),
    /// Venue rejected the order (filter violation, insufficient margin)
    #[error("venue rejected order: {0}")]
    VenueReject(String),
    /// State store write failed
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// No events from a subscribed instrument past the loss threshold
    #[error("feed loss on {instrument}: {elapsed_secs}s without data")]
    FeedLoss {
        instrument: String,
        elapsed_secs: u64,
    },
    /// Manual or threshold-triggered kill switch
    #[error("kill switch engaged: {0}")]
    KillSwitch(String),
    /// Decision exceeded its time budget
    #[error("decision timed out for {0}")]
    DecisionTimeout(String),
}

impl EngineError {
    /// Whether this error should be retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::VenueTransient(_))
    }
}
