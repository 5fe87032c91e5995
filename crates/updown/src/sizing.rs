//! Order sizing.
//!
//! The base order size is derived from AUM and the per-window budget,
//! spread over a target trade count. Two decays shrink it as the
//! window ages and as profit locks land; the platform's $1 minimum
//! order value is the hard floor (enforced at placement, not here).

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use splitflip_core::types::cents;

/// Minute of the window after which the size decay starts.
const DECAY_START_MINUTE: u32 = 6;

/// Per-minute decay factor after [`DECAY_START_MINUTE`].
const MINUTE_DECAY: f64 = 0.8;

/// Per-profit-lock decay factor.
const LOCK_DECAY: f64 = 0.7;

/// Level-size growth per cent below the side's average entry.
const LEVEL_GROWTH: f64 = 1.1;

/// Pair-improvement growth per cent below average.
const IMPROVE_GROWTH: f64 = 1.3;

/// Cap on the level-size multiplier.
const LEVEL_MULT_CAP: f64 = 4.0;

/// Base order size in USDC from AUM, budget fraction, and the target
/// number of trades per window.
#[must_use]
pub fn base_order_usdc(aum: Decimal, budget_pct: Decimal, target_trades: u32) -> Decimal {
    if target_trades == 0 {
        return Decimal::ZERO;
    }
    (aum * budget_pct / Decimal::from(target_trades)).max(Decimal::ZERO)
}

/// Applies the time and profit-lock decays to a base size.
///
/// After minute 6 the size shrinks by 0.8 per elapsed minute; each
/// successful profit lock shrinks it by a further 0.7.
#[must_use]
pub fn decayed_size(base: Decimal, minute: u32, lock_count: u32) -> Decimal {
    let minute_factor = if minute > DECAY_START_MINUTE {
        MINUTE_DECAY.powi((minute - DECAY_START_MINUTE) as i32)
    } else {
        1.0
    };
    let lock_factor = LOCK_DECAY.powi(lock_count as i32);
    base * Decimal::from_f64(minute_factor * lock_factor).unwrap_or(Decimal::ONE)
}

/// Size for an accumulation level `cents_below_avg` cents below the
/// side's current average: `base * 1.1^cents`, capped at 4x base.
#[must_use]
pub fn level_size(base: Decimal, cents_below_avg: u32) -> Decimal {
    let mult = LEVEL_GROWTH.powi(cents_below_avg as i32).min(LEVEL_MULT_CAP);
    base * Decimal::from_f64(mult).unwrap_or(Decimal::ONE)
}

/// Size for a pair-improvement level: `base * 1.3^cents`, uncapped
/// growth but bounded by the caller's budget check.
#[must_use]
pub fn improvement_size(base: Decimal, cents_below_avg: u32) -> Decimal {
    base * Decimal::from_f64(IMPROVE_GROWTH.powi(cents_below_avg as i32)).unwrap_or(Decimal::ONE)
}

/// Highest price allowed for a bid on one side so a fill cannot push
/// the pair cost to $0.99 or beyond: `0.99 - avg_other - 0.01`.
///
/// With no inventory on the other side there is no constraint yet and
/// the cap is the venue band.
#[must_use]
pub fn max_price_for_side(avg_other: Decimal) -> Decimal {
    if avg_other <= Decimal::ZERO {
        return cents(99);
    }
    cents(99) - avg_other - cents(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn base_size_from_budget() {
        // $1000 AUM, 25% budget, 25 trades -> $10 per trade
        assert_eq!(base_order_usdc(dec!(1000), dec!(0.25), 25), dec!(10));
        assert_eq!(base_order_usdc(dec!(1000), dec!(0.25), 0), Decimal::ZERO);
    }

    #[test]
    fn no_decay_before_minute_seven() {
        assert_eq!(decayed_size(dec!(10), 0, 0), dec!(10));
        assert_eq!(decayed_size(dec!(10), 6, 0), dec!(10));
    }

    #[test]
    fn minute_decay_compounds() {
        let at7 = decayed_size(dec!(10), 7, 0);
        let at9 = decayed_size(dec!(10), 9, 0);
        assert!(at7 < dec!(10));
        // 0.8^3 vs 0.8^1
        assert!(at9 < at7);
        assert!((at9 / at7 - dec!(0.64)).abs() < dec!(0.0001));
    }

    #[test]
    fn lock_decay_compounds_with_minute_decay() {
        let no_locks = decayed_size(dec!(10), 8, 0);
        let one_lock = decayed_size(dec!(10), 8, 1);
        assert!((one_lock / no_locks - dec!(0.7)).abs() < dec!(0.0001));
    }

    #[test]
    fn level_size_grows_and_caps() {
        assert_eq!(level_size(dec!(10), 0), dec!(10));
        assert!(level_size(dec!(10), 3) > level_size(dec!(10), 1));
        // 1.1^20 would be ~6.7x; the cap holds it at 4x.
        assert_eq!(level_size(dec!(10), 20), dec!(40));
    }

    #[test]
    fn improvement_size_grows_faster() {
        assert!(improvement_size(dec!(10), 2) > level_size(dec!(10), 2));
    }

    #[test]
    fn price_filter_keeps_pair_under_99() {
        // avg_other = 0.60 -> cap at 0.38
        assert_eq!(max_price_for_side(dec!(0.60)), dec!(0.38));
        // Empty other side: venue band only.
        assert_eq!(max_price_for_side(Decimal::ZERO), dec!(0.99));
    }
}
