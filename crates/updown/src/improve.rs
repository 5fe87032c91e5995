//! PAIR_IMPROVEMENT mode: bilateral below-average bids.
//!
//! After a forced balancing exit the realized pair cost can sit at or
//! above $1.00. Buying both sides 2c below their current averages
//! dilutes both averages downward until the pair costs less than a
//! dollar again.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use splitflip_core::types::{cents, clamp_to_book, round_to_tick};

use crate::normal::Quote;
use crate::sizing::improvement_size;

/// Cents below the side's average the improvement bid rests at.
const IMPROVE_OFFSET_CENTS: i64 = 2;

/// Builds the improvement bid for one side, or `None` when the side
/// has no average to improve against.
#[must_use]
pub fn improvement_quote(avg_side: Decimal, base_size: Decimal, tick: Decimal) -> Option<Quote> {
    if avg_side <= Decimal::ZERO || base_size <= Decimal::ZERO {
        return None;
    }
    let price = clamp_to_book(
        round_to_tick(avg_side - cents(IMPROVE_OFFSET_CENTS), tick),
        tick,
    );
    if price >= avg_side {
        // Average so low the clamp floor is not below it; a fill here
        // would not improve anything.
        return None;
    }
    let cents_below = ((avg_side - price) * Decimal::from(100u32))
        .floor()
        .to_u32()
        .unwrap_or(0);
    Some(Quote { price, size: improvement_size(base_size, cents_below) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bids_two_cents_below_average() {
        let quote = improvement_quote(dec!(0.55), dec!(10), dec!(0.01)).unwrap();
        assert_eq!(quote.price, dec!(0.53));
        // 1.3^2 scaling
        assert!((quote.size - dec!(16.9)).abs() < dec!(0.001));
    }

    #[test]
    fn none_without_inventory() {
        assert!(improvement_quote(Decimal::ZERO, dec!(10), dec!(0.01)).is_none());
    }

    #[test]
    fn none_when_average_at_the_floor() {
        // avg 0.01: the clamp floor equals it, no improvement possible.
        assert!(improvement_quote(dec!(0.01), dec!(10), dec!(0.01)).is_none());
    }
}
