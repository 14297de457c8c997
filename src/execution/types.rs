//! Execution types and the venue client contract

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-side order identifier
pub type OrderId = Uuid;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Immediate execution at market
    Market,
    /// Protective stop triggered at stop_price
    StopMarket,
}

/// An order to be submitted to the venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Reference price for market orders (fill simulation, slippage check)
    pub price: Option<Decimal>,
    /// Trigger price for stop orders
    pub stop_price: Option<Decimal>,
}

/// A fill returned by the venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub instrument: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Venue-reported position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub instrument: String,
    /// Signed quantity: positive long, negative short
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
}

/// Per-instrument order filters, fetched once at startup and cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFilters {
    pub instrument: String,
    pub lot_step: Decimal,
    pub tick_size: Decimal,
    pub min_quantity: Decimal,
    pub min_notional: Decimal,
}

impl InstrumentFilters {
    /// Round a quantity down to the lot step
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        if self.lot_step <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.lot_step).floor() * self.lot_step
    }

    /// Round a price to the nearest tick
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        (price / self.tick_size).round() * self.tick_size
    }
}

/// Venue faults, classified by kind; the venue's own error code travels as
/// opaque metadata.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VenueError {
    /// 5xx, timeout, rate limit; retried with backoff
    #[error("transient venue error: {message}")]
    Transient { message: String, code: Option<i64> },
    /// Bad or expired credentials
    #[error("venue authentication failed: {message}")]
    Authentication { message: String, code: Option<i64> },
    /// Filter violation, insufficient margin
    #[error("venue rejected order: {message}")]
    Rejected { message: String, code: Option<i64> },
}
