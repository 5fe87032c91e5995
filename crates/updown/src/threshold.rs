//! Dynamic imbalance threshold.
//!
//! Small positions tolerate large relative imbalance (rebalancing 30
//! shares is not worth the spread); large positions must stay tight.
//! The threshold is a piecewise-linear function of total shares held,
//! floored at 5%:
//!
//! | shares      | threshold        |
//! |-------------|------------------|
//! | 0 - 100     | 100% -> 86%      |
//! | 100 - 500   | 86% -> 30%       |
//! | 500 - 2000  | 30% -> 5%        |
//! | > 2000      | 5% (floor)       |

use rust_decimal::Decimal;

/// Absolute imbalance (shares) that triggers balancing regardless of
/// the relative threshold.
pub const ABSOLUTE_IMBALANCE_TRIGGER: Decimal = Decimal::from_parts(110, 0, 0, false, 0);

const FLOOR: (u32, u32) = (2000, 5);
const SEGMENTS: [((u32, u32), (u32, u32)); 3] = [
    ((0, 100), (100, 86)),
    ((100, 86), (500, 30)),
    ((500, 30), (2000, 5)),
];

/// Imbalance-ratio threshold (0..1) for the given total position size.
#[must_use]
pub fn dynamic_imbalance_threshold(total_shares: Decimal) -> Decimal {
    let pct = Decimal::from(100u32);
    if total_shares >= Decimal::from(FLOOR.0) {
        return Decimal::from(FLOOR.1) / pct;
    }
    for ((x0, y0), (x1, y1)) in SEGMENTS {
        let (x0, y0, x1, y1) = (
            Decimal::from(x0),
            Decimal::from(y0),
            Decimal::from(x1),
            Decimal::from(y1),
        );
        if total_shares >= x0 && total_shares < x1 {
            let t = (total_shares - x0) / (x1 - x0);
            return (y0 + (y1 - y0) * t) / pct;
        }
    }
    Decimal::from(FLOOR.1) / pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn table_endpoints() {
        assert_eq!(dynamic_imbalance_threshold(dec!(0)), dec!(1.00));
        assert_eq!(dynamic_imbalance_threshold(dec!(100)), dec!(0.86));
        assert_eq!(dynamic_imbalance_threshold(dec!(500)), dec!(0.30));
        assert_eq!(dynamic_imbalance_threshold(dec!(2000)), dec!(0.05));
        assert_eq!(dynamic_imbalance_threshold(dec!(50000)), dec!(0.05));
    }

    #[test]
    fn interpolates_within_segments() {
        // Midpoint of 100..500: (86 + 30) / 2 = 58%
        assert_eq!(dynamic_imbalance_threshold(dec!(300)), dec!(0.58));
        // Midpoint of 0..100: 93%
        assert_eq!(dynamic_imbalance_threshold(dec!(50)), dec!(0.93));
        // Midpoint of 500..2000: 17.5%
        assert_eq!(dynamic_imbalance_threshold(dec!(1250)), dec!(0.175));
    }

    #[test]
    fn monotonically_non_increasing_and_floored() {
        let mut prev = dec!(2);
        let mut shares = dec!(0);
        while shares <= dec!(3000) {
            let t = dynamic_imbalance_threshold(shares);
            assert!(t <= prev, "threshold rose at {shares}: {t} > {prev}");
            assert!(t >= dec!(0.05), "threshold fell under the floor at {shares}");
            prev = t;
            shares += dec!(10);
        }
    }
}
