//! Volatility-scaled N-unit position sizing
//!
//! A move of one stop distance (ATR x multiplier) against the position loses
//! a fixed fraction of equity. Quantity is rounded down to the instrument
//! lot step; prices are rounded to the tick.

use crate::execution::InstrumentFilters;
use rust_decimal::Decimal;
use thiserror::Error;

/// A sized, venue-roundable order proposal
#[derive(Debug, Clone, PartialEq)]
pub struct SizedOrder {
    pub quantity: Decimal,
    pub notional: Decimal,
    pub risk_amount: Decimal,
    pub stop_distance: Decimal,
    /// Entry price rounded to the instrument tick
    pub price: Decimal,
}

/// Why sizing refused the trade
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeRejection {
    #[error("QUANTITY_TOO_SMALL: {0}")]
    QuantityTooSmall(String),
    #[error("invalid sizing input: {0}")]
    InvalidInput(String),
}

impl SizeRejection {
    pub fn code(&self) -> &'static str {
        match self {
            SizeRejection::QuantityTooSmall(_) => "QUANTITY_TOO_SMALL",
            SizeRejection::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

/// N-unit sizer with notional clamps
#[derive(Debug, Clone)]
pub struct PositionSizer {
    risk_per_trade_pct: Decimal,
    stop_atr_multiplier: Decimal,
    min_notional: Decimal,
    max_notional: Decimal,
}

impl PositionSizer {
    pub fn new(
        risk_per_trade_pct: Decimal,
        stop_atr_multiplier: Decimal,
        min_notional: Decimal,
        max_notional: Decimal,
    ) -> Self {
        Self {
            risk_per_trade_pct,
            stop_atr_multiplier,
            min_notional,
            max_notional,
        }
    }

    pub fn stop_atr_multiplier(&self) -> Decimal {
        self.stop_atr_multiplier
    }

    /// Size an entry. Pure: identical inputs always yield identical output.
    pub fn size(
        &self,
        equity: Decimal,
        price: Decimal,
        atr: Decimal,
        filters: &InstrumentFilters,
    ) -> Result<SizedOrder, SizeRejection> {
        if equity <= Decimal::ZERO {
            return Err(SizeRejection::InvalidInput(format!("equity {equity}")));
        }
        if price <= Decimal::ZERO {
            return Err(SizeRejection::InvalidInput(format!("price {price}")));
        }
        if atr <= Decimal::ZERO {
            return Err(SizeRejection::InvalidInput(format!("atr {atr}")));
        }

        let risk_amount = equity * self.risk_per_trade_pct;
        let stop_distance = atr * self.stop_atr_multiplier;
        if stop_distance <= Decimal::ZERO {
            return Err(SizeRejection::InvalidInput(format!(
                "stop distance {stop_distance}"
            )));
        }

        let position_value = risk_amount / stop_distance;
        if position_value < self.min_notional {
            return Err(SizeRejection::QuantityTooSmall(format!(
                "notional {position_value} below minimum {}",
                self.min_notional
            )));
        }
        let position_value = position_value.min(self.max_notional);

        let quantity = filters.round_quantity(position_value / price);
        if quantity < filters.min_quantity {
            return Err(SizeRejection::QuantityTooSmall(format!(
                "quantity {quantity} below instrument minimum {}",
                filters.min_quantity
            )));
        }

        let price = filters.round_price(price);
        Ok(SizedOrder {
            quantity,
            notional: quantity * price,
            risk_amount,
            stop_distance,
            price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters() -> InstrumentFilters {
        InstrumentFilters {
            instrument: "BTCUSDT".to_string(),
            lot_step: dec!(0.001),
            tick_size: dec!(0.01),
            min_quantity: dec!(0.001),
            min_notional: dec!(5),
        }
    }

    fn sizer() -> PositionSizer {
        PositionSizer::new(dec!(0.01), dec!(2.0), dec!(5), dec!(1000))
    }

    #[test]
    fn test_turtle_unit_example() {
        // 10k equity, 1% risk, ATR 0.50 at price 100
        let sized = sizer()
            .size(dec!(10000), dec!(100), dec!(0.50), &filters())
            .unwrap();
        assert_eq!(sized.risk_amount, dec!(100));
        assert_eq!(sized.stop_distance, dec!(1.0));
        assert_eq!(sized.quantity, dec!(1.000));
        assert_eq!(sized.notional, dec!(100.00));
    }

    #[test]
    fn test_small_account_rejected() {
        // 100 equity, 1% risk, ATR 10: notional far below the 5 minimum
        let err = sizer()
            .size(dec!(100), dec!(1), dec!(10), &filters())
            .unwrap_err();
        assert_eq!(err.code(), "QUANTITY_TOO_SMALL");
    }

    #[test]
    fn test_max_notional_cap() {
        // Tiny ATR would size a huge position; cap at 1000
        let sized = sizer()
            .size(dec!(100000), dec!(100), dec!(0.25), &filters())
            .unwrap();
        assert_eq!(sized.notional, dec!(1000.00));
        assert_eq!(sized.quantity, dec!(10.000));
    }

    #[test]
    fn test_quantity_rounds_down_to_lot() {
        let sized = sizer()
            .size(dec!(10000), dec!(97), dec!(0.50), &filters())
            .unwrap();
        // 100 / 1.0 / 97 = 1.0309... -> 1.030
        assert_eq!(sized.quantity, dec!(1.030));
    }

    #[test]
    fn test_rounded_quantity_below_minimum_rejected() {
        let mut f = filters();
        f.lot_step = dec!(1);
        f.min_quantity = dec!(1);
        // Position value 100 at price 150 -> 0.66 raw, rounds to 0
        let err = sizer()
            .size(dec!(10000), dec!(150), dec!(0.50), &f)
            .unwrap_err();
        assert_eq!(err.code(), "QUANTITY_TOO_SMALL");
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let s = sizer();
        assert!(s.size(dec!(0), dec!(100), dec!(1), &filters()).is_err());
        assert!(s.size(dec!(10000), dec!(0), dec!(1), &filters()).is_err());
        assert!(s.size(dec!(10000), dec!(100), dec!(0), &filters()).is_err());
    }

    #[test]
    fn test_idempotence() {
        let s = sizer();
        let first = s.size(dec!(10000), dec!(97), dec!(0.37), &filters()).unwrap();
        for _ in 0..20 {
            let again = s.size(dec!(10000), dec!(97), dec!(0.37), &filters()).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_price_rounded_to_tick() {
        let sized = sizer()
            .size(dec!(10000), dec!(100.123), dec!(0.50), &filters())
            .unwrap();
        assert_eq!(sized.price, dec!(100.12));
    }
}
