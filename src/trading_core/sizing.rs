//! Entry sizing and exchange increment rounding

use thiserror::Error;

use crate::types::Direction;

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("account balance {0} is not positive")]
    NoBalance(f64),
    #[error("entry price {0} is not positive")]
    InvalidPrice(f64),
    #[error("computed quantity {0} is not tradable")]
    InvalidQuantity(f64),
}

/// Exchange increments for an instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentSpec {
    pub step_size: f64,
    pub min_quantity: f64,
    pub tick_size: f64,
}

/// `balance × leverage × max_position_fraction / entry_price`
pub fn compute_quantity(
    balance: f64,
    leverage: f64,
    max_position_fraction: f64,
    entry_price: f64,
) -> Result<f64, SizingError> {
    if !balance.is_finite() || balance <= 0.0 {
        return Err(SizingError::NoBalance(balance));
    }
    if !entry_price.is_finite() || entry_price <= 0.0 {
        return Err(SizingError::InvalidPrice(entry_price));
    }

    let quantity = balance * leverage * max_position_fraction / entry_price;
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(SizingError::InvalidQuantity(quantity));
    }
    Ok(quantity)
}

/// Stop-loss and take-profit from percentage offsets (0.25 = 0.25%)
pub fn protective_levels(
    direction: Direction,
    entry_price: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
) -> (f64, f64) {
    let sl = stop_loss_pct / 100.0;
    let tp = take_profit_pct / 100.0;
    match direction {
        Direction::Long => (entry_price * (1.0 - sl), entry_price * (1.0 + tp)),
        Direction::Short => (entry_price * (1.0 + sl), entry_price * (1.0 - tp)),
    }
}

/// Floor `quantity` to a multiple of `step`, never below `min_quantity`
pub fn floor_to_step(quantity: f64, step: f64, min_quantity: f64) -> f64 {
    let floored = if step > 0.0 {
        // nudge so 0.3 / 0.1 doesn't floor to 2
        ((quantity / step) + 1e-9).floor() * step
    } else {
        quantity
    };
    floored.max(min_quantity)
}

/// Floor `price` to a multiple of `tick`
pub fn floor_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    ((price / tick) + 1e-9).floor() * tick
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_quantity() {
        // 1000 * 1 * 0.02 / 100 = 0.2
        let qty = compute_quantity(1000.0, 1.0, 0.02, 100.0).unwrap();
        assert!(close_enough(qty, 0.2));
        let qty = compute_quantity(1000.0, 5.0, 0.02, 100.0).unwrap();
        assert!(close_enough(qty, 1.0));
    }

    #[test]
    fn test_quantity_errors() {
        assert_eq!(compute_quantity(0.0, 1.0, 0.02, 100.0), Err(SizingError::NoBalance(0.0)));
        assert_eq!(compute_quantity(100.0, 1.0, 0.02, 0.0), Err(SizingError::InvalidPrice(0.0)));
        assert!(matches!(
            compute_quantity(100.0, 0.0, 0.02, 10.0),
            Err(SizingError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_protective_levels() {
        let (sl, tp) = protective_levels(Direction::Long, 100.0, 0.25, 0.6);
        assert!(close_enough(sl, 99.75));
        assert!(close_enough(tp, 100.6));

        let (sl, tp) = protective_levels(Direction::Short, 100.0, 0.25, 0.6);
        assert!(close_enough(sl, 100.25));
        assert!(close_enough(tp, 99.4));
    }

    #[test]
    fn test_rounding() {
        assert!(close_enough(floor_to_step(1.2345, 0.01, 0.01), 1.23));
        assert!(close_enough(floor_to_step(0.3, 0.1, 0.1), 0.3));
        assert!(close_enough(floor_to_step(0.004, 0.01, 0.01), 0.01));
        assert!(close_enough(floor_to_tick(0.123456, 0.0001), 0.1234));
        assert_eq!(floor_to_tick(5.5, 0.0), 5.5);
    }
}
