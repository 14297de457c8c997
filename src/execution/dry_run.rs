//! Dry-run venue with synthetic fills

use super::types::{
    Fill, InstrumentFilters, OrderId, OrderRequest, OrderType, VenueError, VenuePosition,
};
use super::VenueClient;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Simulated venue: orders fill immediately at the submission price and no
/// network call is made.
pub struct DryRunVenue {
    filters: HashMap<String, InstrumentFilters>,
    fills: Arc<RwLock<Vec<Fill>>>,
    positions: Arc<RwLock<Vec<VenuePosition>>>,
}

impl DryRunVenue {
    pub fn new(instruments: &[String]) -> Self {
        let filters = instruments
            .iter()
            .map(|instrument| {
                (
                    instrument.clone(),
                    InstrumentFilters {
                        instrument: instrument.clone(),
                        lot_step: dec!(0.001),
                        tick_size: dec!(0.01),
                        min_quantity: dec!(0.001),
                        min_notional: dec!(5),
                    },
                )
            })
            .collect();
        Self {
            filters,
            fills: Arc::new(RwLock::new(vec![])),
            positions: Arc::new(RwLock::new(vec![])),
        }
    }

    /// All synthetic fills so far
    pub async fn fills(&self) -> Vec<Fill> {
        self.fills.read().await.clone()
    }

    /// Seed venue-side positions for reconciliation tests
    pub async fn set_positions(&self, positions: Vec<VenuePosition>) {
        *self.positions.write().await = positions;
    }

    async fn apply_fill(&self, fill: &Fill) {
        let signed = match fill.side {
            crate::execution::OrderSide::Buy => fill.quantity,
            crate::execution::OrderSide::Sell => -fill.quantity,
        };
        let mut positions = self.positions.write().await;
        match positions
            .iter_mut()
            .find(|p| p.instrument == fill.instrument)
        {
            Some(existing) => {
                existing.quantity += signed;
                existing.mark_price = fill.price;
            }
            None => positions.push(VenuePosition {
                instrument: fill.instrument.clone(),
                quantity: signed,
                entry_price: fill.price,
                mark_price: fill.price,
            }),
        }
        positions.retain(|p| p.quantity != Decimal::ZERO);
    }
}

#[async_trait]
impl VenueClient for DryRunVenue {
    async fn set_leverage(&self, instrument: &str, leverage: u32) -> Result<(), VenueError> {
        tracing::debug!(instrument, leverage, "Dry run: leverage set");
        Ok(())
    }

    async fn exchange_info(&self) -> Result<HashMap<String, InstrumentFilters>, VenueError> {
        Ok(self.filters.clone())
    }

    async fn new_order(&self, request: OrderRequest) -> Result<Fill, VenueError> {
        let price = match request.order_type {
            OrderType::Market => request.price,
            OrderType::StopMarket => request.stop_price,
        }
        .unwrap_or(Decimal::ZERO);

        let fill = Fill {
            order_id: Uuid::new_v4(),
            instrument: request.instrument.clone(),
            side: request.side,
            price,
            quantity: request.quantity,
            timestamp: Utc::now(),
        };
        tracing::info!(
            instrument = %request.instrument,
            side = ?request.side,
            quantity = %request.quantity,
            price = %price,
            "Dry run order filled"
        );
        // Market fills move the simulated net position; resting stops do not
        if request.order_type == OrderType::Market {
            self.apply_fill(&fill).await;
        }
        self.fills.write().await.push(fill.clone());
        Ok(fill)
    }

    async fn cancel_order(&self, instrument: &str, order_id: OrderId) -> Result<(), VenueError> {
        tracing::debug!(instrument, %order_id, "Dry run: order cancelled");
        Ok(())
    }

    async fn open_orders(&self, _instrument: &str) -> Result<Vec<OrderRequest>, VenueError> {
        Ok(vec![])
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        Ok(self.positions.read().await.clone())
    }
}
