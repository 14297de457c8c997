//! Order submission and venue reconciliation

mod dry_run;
mod manager;
mod types;

pub use dry_run::DryRunVenue;
pub use manager::{OrderManager, ReconcileOutcome, SubmitOutcome};
pub use types::{
    Fill, InstrumentFilters, OrderId, OrderRequest, OrderSide, OrderType, VenueError,
    VenuePosition,
};

use async_trait::async_trait;
use std::collections::HashMap;

/// Contract with the trading venue.
///
/// The concrete REST/stream adapter lives outside this crate; the engine
/// only depends on this trait so tests and dry runs can inject doubles.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Set leverage for an instrument
    async fn set_leverage(&self, instrument: &str, leverage: u32) -> Result<(), VenueError>;
    /// Fetch per-instrument order filters
    async fn exchange_info(&self) -> Result<HashMap<String, InstrumentFilters>, VenueError>;
    /// Submit an order; market orders fill synchronously
    async fn new_order(&self, request: OrderRequest) -> Result<Fill, VenueError>;
    /// Cancel an open order
    async fn cancel_order(&self, instrument: &str, order_id: OrderId) -> Result<(), VenueError>;
    /// List open orders for an instrument
    async fn open_orders(&self, instrument: &str) -> Result<Vec<OrderRequest>, VenueError>;
    /// Current venue positions
    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError>;
}
