//! Order lifecycle: submission, protective stops, slippage, reconciliation

use super::types::{
    Fill, InstrumentFilters, OrderRequest, OrderSide, OrderType, VenueError, VenuePosition,
};
use super::VenueClient;
use crate::rules::{Action, Signal};
use crate::risk::SizedOrder;
use crate::state::{MarketRegime, Position, PositionSide, SystemState};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

/// Result of submitting an approved entry
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub entry: Fill,
    /// Protective stop fill acknowledgement, if the stop order went through
    pub stop: Option<Fill>,
    pub stop_price: Decimal,
    pub slippage_exceeded: bool,
}

/// Result of reconciling local state against the venue
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Instruments the venue reported that local state lacked
    pub adopted: Vec<String>,
    /// Instruments local state held that the venue did not report
    pub dropped: Vec<String>,
}

impl ReconcileOutcome {
    pub fn consistent(&self) -> bool {
        self.adopted.is_empty() && self.dropped.is_empty()
    }
}

/// Submits orders, attaches protective stops, and reconciles positions.
///
/// Instrument filters are fetched once at startup and cached. Transient
/// venue faults are retried with exponential backoff; every venue call has
/// a hard timeout that counts as one transient failure.
pub struct OrderManager<V: VenueClient> {
    venue: V,
    filters: HashMap<String, InstrumentFilters>,
    max_slippage_pct: Decimal,
    call_timeout: Duration,
    retry_delays: Vec<Duration>,
    consecutive_failures: u32,
}

impl<V: VenueClient> OrderManager<V> {
    /// Fetch and cache exchange filters, then construct the manager
    pub async fn initialize(venue: V, max_slippage_pct: Decimal) -> Result<Self, VenueError> {
        let filters = venue.exchange_info().await?;
        tracing::info!(instruments = filters.len(), "Exchange filters cached");
        Ok(Self {
            venue,
            filters,
            max_slippage_pct,
            call_timeout: Duration::from_secs(10),
            retry_delays: [1, 2, 4, 8, 16]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            consecutive_failures: 0,
        })
    }

    /// Shrink timeouts and backoff for tests
    pub fn with_fast_retries(mut self) -> Self {
        self.call_timeout = Duration::from_millis(100);
        self.retry_delays = vec![Duration::from_millis(1); 5];
        self
    }

    pub fn filters_for(&self, instrument: &str) -> Option<&InstrumentFilters> {
        self.filters.get(instrument)
    }

    /// Apply the configured leverage to every traded instrument
    pub async fn apply_leverage(
        &mut self,
        instruments: &[String],
        leverage: u32,
    ) -> Result<(), VenueError> {
        for instrument in instruments {
            self.venue.set_leverage(instrument, leverage).await?;
        }
        tracing::info!(leverage, count = instruments.len(), "Leverage applied");
        Ok(())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn venue(&self) -> &V {
        &self.venue
    }

    async fn call_with_retry(
        &mut self,
        request: OrderRequest,
    ) -> Result<Fill, VenueError> {
        let mut attempt = 0usize;
        loop {
            let result = tokio::time::timeout(self.call_timeout, self.venue.new_order(request.clone()))
                .await
                .unwrap_or_else(|_| {
                    Err(VenueError::Transient {
                        message: "venue call timed out".to_string(),
                        code: None,
                    })
                });

            match result {
                Ok(fill) => {
                    self.consecutive_failures = 0;
                    return Ok(fill);
                }
                Err(VenueError::Transient { message, code }) if attempt < self.retry_delays.len() => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %message,
                        "Transient venue error, backing off"
                    );
                    tokio::time::sleep(self.retry_delays[attempt]).await;
                    attempt += 1;
                    let _ = code;
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    return Err(err);
                }
            }
        }
    }

    /// Submit a market entry and attach the protective stop.
    ///
    /// The stop sits at entry -/+ ATR x multiplier for long/short. A failed
    /// stop placement is reported in the outcome, never silently dropped.
    pub async fn submit_entry(
        &mut self,
        signal: &Signal,
        sized: &SizedOrder,
        stop_atr_multiplier: Decimal,
    ) -> Result<SubmitOutcome, VenueError> {
        let (entry_side, stop_side, position_side) = match signal.action {
            Action::ProposeShort => (OrderSide::Sell, OrderSide::Buy, PositionSide::Short),
            _ => (OrderSide::Buy, OrderSide::Sell, PositionSide::Long),
        };

        let entry = self
            .call_with_retry(OrderRequest {
                instrument: signal.instrument.clone(),
                side: entry_side,
                order_type: OrderType::Market,
                quantity: sized.quantity,
                price: Some(sized.price),
                stop_price: None,
            })
            .await?;

        let slippage_exceeded = self.slippage_exceeded(sized.price, entry.price, position_side);
        if slippage_exceeded {
            tracing::warn!(
                instrument = %signal.instrument,
                expected = %sized.price,
                filled = %entry.price,
                "Fill slippage above limit"
            );
        }

        let atr = Decimal::from_f64_retain(signal.atr).unwrap_or(Decimal::ZERO);
        let offset = atr * stop_atr_multiplier;
        let raw_stop = match position_side {
            PositionSide::Long => entry.price - offset,
            PositionSide::Short => entry.price + offset,
        };
        let stop_price = self
            .filters_for(&signal.instrument)
            .map(|f| f.round_price(raw_stop))
            .unwrap_or(raw_stop);

        let stop = match self
            .call_with_retry(OrderRequest {
                instrument: signal.instrument.clone(),
                side: stop_side,
                order_type: OrderType::StopMarket,
                quantity: sized.quantity,
                price: None,
                stop_price: Some(stop_price),
            })
            .await
        {
            Ok(fill) => Some(fill),
            Err(err) => {
                tracing::error!(
                    instrument = %signal.instrument,
                    error = %err,
                    "Protective stop placement failed; position is unprotected"
                );
                None
            }
        };

        Ok(SubmitOutcome {
            entry,
            stop,
            stop_price,
            slippage_exceeded,
        })
    }

    /// Close an open position with a market order on the opposite side
    pub async fn close_position(&mut self, position: &Position) -> Result<Fill, VenueError> {
        let side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        self.call_with_retry(OrderRequest {
            instrument: position.instrument.clone(),
            side,
            order_type: OrderType::Market,
            quantity: position.quantity,
            price: Some(position.current_price),
            stop_price: None,
        })
        .await
    }

    fn slippage_exceeded(
        &self,
        expected: Decimal,
        filled: Decimal,
        side: PositionSide,
    ) -> bool {
        if expected <= Decimal::ZERO {
            return false;
        }
        // Only adverse deviation counts
        let adverse = match side {
            PositionSide::Long => filled - expected,
            PositionSide::Short => expected - filled,
        };
        adverse / expected * Decimal::ONE_HUNDRED > self.max_slippage_pct
    }

    /// Merge the venue's view of positions into local state.
    ///
    /// The venue is authoritative: local-only positions are dropped and
    /// venue-only positions adopted. The caller alerts on any mismatch.
    pub async fn reconcile(
        &mut self,
        state: &mut SystemState,
    ) -> Result<ReconcileOutcome, VenueError> {
        let venue_positions = tokio::time::timeout(self.call_timeout, self.venue.positions())
            .await
            .unwrap_or_else(|_| {
                Err(VenueError::Transient {
                    message: "positions call timed out".to_string(),
                    code: None,
                })
            })?;
        self.consecutive_failures = 0;

        let mut outcome = ReconcileOutcome::default();
        let venue_map: HashMap<String, &VenuePosition> = venue_positions
            .iter()
            .filter(|p| p.quantity != Decimal::ZERO)
            .map(|p| (p.instrument.clone(), p))
            .collect();

        let local: Vec<String> = state.open_positions.keys().cloned().collect();
        for instrument in local {
            if !venue_map.contains_key(&instrument) {
                tracing::warn!(%instrument, "Local position missing on venue; dropping");
                state.open_positions.remove(&instrument);
                outcome.dropped.push(instrument);
            }
        }

        for (instrument, venue_pos) in venue_map {
            let venue_side = if venue_pos.quantity > Decimal::ZERO {
                PositionSide::Long
            } else {
                PositionSide::Short
            };
            let venue_quantity = venue_pos.quantity.abs();

            let matches = state
                .open_positions
                .get(&instrument)
                .map(|local| local.side == venue_side && local.quantity == venue_quantity)
                .unwrap_or(false);
            if matches {
                continue;
            }

            tracing::warn!(%instrument, "Venue position differs from local; adopting");
            let mut position = Position {
                instrument: instrument.clone(),
                side: venue_side,
                quantity: venue_quantity,
                entry_price: venue_pos.entry_price,
                current_price: venue_pos.mark_price,
                unrealized_pnl: Decimal::ZERO,
                stop_price: None,
                take_profit_price: None,
                entry_time: Utc::now(),
                strategy_name: "reconciled".to_string(),
                regime_at_entry: MarketRegime::Unknown,
            };
            position.mark(venue_pos.mark_price);
            state.open_positions.insert(instrument.clone(), position);
            outcome.adopted.push(instrument);
        }

        Ok(outcome)
    }

    /// Record a venue failure observed outside submit/reconcile paths
    pub fn note_failure(&mut self) {
        self.consecutive_failures += 1;
    }
}
