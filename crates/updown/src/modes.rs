//! Mode arbitration.
//!
//! Every tick (price update, fill, or heartbeat) re-evaluates the mode
//! with strict priority:
//!
//! `PROFIT_LOCK > BALANCING > PAIR_IMPROVEMENT > NORMAL`
//!
//! The decision is a pure function of the position snapshot, the
//! books, the saved baseline, and the last locked profit. Keeping it
//! pure keeps the non-commutative transition order testable.

use rust_decimal::Decimal;
use splitflip_core::types::{cents, MarketSide};
use splitflip_ledger::{Baseline, Snapshot};

use crate::threshold::{dynamic_imbalance_threshold, ABSOLUTE_IMBALANCE_TRIGGER};

/// Strategy mode for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Multi-level bilateral accumulation.
    Normal,
    /// Micro trigger-hedge balancing.
    Balancing,
    /// Bilateral below-average bids to pull pair cost under $1.00.
    PairImprovement,
    /// Take the deficit side and merge for an immediate locked profit.
    ProfitLock,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "NORMAL",
            Self::Balancing => "BALANCING",
            Self::PairImprovement => "PAIR_IMPROVEMENT",
            Self::ProfitLock => "PROFIT_LOCK",
        };
        write!(f, "{s}")
    }
}

/// Everything arbitration looks at on one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickView {
    pub up_bid: Decimal,
    pub up_ask: Decimal,
    pub down_bid: Decimal,
    pub down_ask: Decimal,
    pub baseline: Option<Baseline>,
    /// Locked profit of the last accepted PROFIT_LOCK, zero initially.
    pub last_locked_pnl: Decimal,
}

impl TickView {
    /// Ask on the deficit (smaller-quantity) side; `None` when the
    /// book has no ask there or the position is balanced.
    #[must_use]
    pub fn deficit_ask(&self, snap: &Snapshot) -> Option<Decimal> {
        let side = deficit_side(snap)?;
        let ask = match side {
            MarketSide::Up => self.up_ask,
            MarketSide::Down => self.down_ask,
        };
        (ask > Decimal::ZERO).then_some(ask)
    }
}

/// The smaller-quantity side, `None` when balanced.
#[must_use]
pub fn deficit_side(snap: &Snapshot) -> Option<MarketSide> {
    if snap.imbalance < Decimal::ZERO {
        Some(MarketSide::Up)
    } else if snap.imbalance > Decimal::ZERO {
        Some(MarketSide::Down)
    } else {
        None
    }
}

/// Locked profit if the deficit were bought right now at ask + 1c and
/// the position merged. `None` when the required ask is missing.
#[must_use]
pub fn lockable_profit(snap: &Snapshot, view: &TickView) -> Option<Decimal> {
    let deficit = snap.imbalance.abs();
    let new_pairs = snap.up.qty.max(snap.down.qty);
    if new_pairs == Decimal::ZERO {
        return None;
    }
    let buy_cost = if deficit > Decimal::ZERO {
        let ask = view.deficit_ask(snap)?;
        deficit * (ask + cents(1))
    } else {
        Decimal::ZERO
    };
    Some(new_pairs - (snap.total_cost + buy_cost))
}

/// Computes the mode for this tick.
#[must_use]
pub fn arbitrate(snap: &Snapshot, view: &TickView) -> Mode {
    if profit_lock_fires(snap, view) {
        return Mode::ProfitLock;
    }
    if balancing_fires(snap, view) {
        return Mode::Balancing;
    }
    if pair_improvement_fires(snap) {
        return Mode::PairImprovement;
    }
    Mode::Normal
}

/// PROFIT_LOCK: completing the position at ask + 1c locks strictly
/// more than the last lock, and strictly more than zero.
fn profit_lock_fires(snap: &Snapshot, view: &TickView) -> bool {
    match lockable_profit(snap, view) {
        Some(pnl) => pnl > view.last_locked_pnl && pnl > Decimal::ZERO,
        None => false,
    }
}

/// BALANCING: imbalance beyond the dynamic threshold (or 110 shares
/// absolute), deficit ask above $0.50, and, when a baseline exists,
/// at least 110 shares of movement since that baseline.
fn balancing_fires(snap: &Snapshot, view: &TickView) -> bool {
    let imbalance = snap.imbalance.abs();
    if imbalance == Decimal::ZERO || snap.total_qty == Decimal::ZERO {
        return false;
    }

    let ratio = imbalance / snap.total_qty;
    let beyond_threshold = ratio >= dynamic_imbalance_threshold(snap.total_qty)
        || imbalance >= ABSOLUTE_IMBALANCE_TRIGGER;
    if !beyond_threshold {
        return false;
    }

    // A deficit ask at or under $0.50 means the market has already
    // moved against the surplus; balancing there is chasing a loser.
    match view.deficit_ask(snap) {
        Some(ask) if ask > Decimal::new(50, 2) => {}
        _ => return false,
    }

    // Baselines block re-entry on the same imbalance.
    if let Some(baseline) = view.baseline {
        if (snap.imbalance - baseline.imbalance).abs() < ABSOLUTE_IMBALANCE_TRIGGER {
            return false;
        }
    }

    true
}

/// PAIR_IMPROVEMENT: both sides held but the realized pair cost is at
/// or above $1.00 (recoverable by buying both sides below their
/// averages).
fn pair_improvement_fires(snap: &Snapshot) -> bool {
    snap.up.qty > Decimal::ZERO
        && snap.down.qty > Decimal::ZERO
        && snap.pair_cost >= Decimal::ONE
        && snap.pair_cost < Decimal::MAX
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use splitflip_ledger::PositionLedger;

    fn snapshot(up: (Decimal, Decimal), down: (Decimal, Decimal)) -> Snapshot {
        let mut ledger = PositionLedger::new();
        if up.0 > Decimal::ZERO {
            ledger.apply_fill("m", MarketSide::Up, up.0, up.1 / up.0).unwrap();
        }
        if down.0 > Decimal::ZERO {
            ledger.apply_fill("m", MarketSide::Down, down.0, down.1 / down.0).unwrap();
        }
        ledger.snapshot("m")
    }

    fn view() -> TickView {
        TickView {
            up_bid: dec!(0.54),
            up_ask: dec!(0.56),
            down_bid: dec!(0.43),
            down_ask: dec!(0.45),
            baseline: None,
            last_locked_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn empty_position_is_normal() {
        let snap = snapshot((dec!(0), dec!(0)), (dec!(0), dec!(0)));
        assert_eq!(arbitrate(&snap, &view()), Mode::Normal);
    }

    #[test]
    fn balanced_cheap_position_is_normal() {
        // Balanced at 0.92 pair cost: nothing to do but accumulate.
        let snap = snapshot((dec!(200), dec!(92)), (dec!(200), dec!(92)));
        let v = TickView { up_ask: dec!(0.56), ..view() };
        // lockable = 200 - 184 = 16 > 0 would fire PROFIT_LOCK; set the
        // bar so only a strictly better lock fires.
        let v = TickView { last_locked_pnl: dec!(16), ..v };
        assert_eq!(arbitrate(&snap, &v), Mode::Normal);
    }

    #[test]
    fn profit_lock_beats_balancing() {
        // Heavy imbalance but locking is profitable and better than
        // last time: PROFIT_LOCK wins the priority race.
        let snap = snapshot((dec!(100), dec!(30)), (dec!(300), dec!(90)));
        let v = TickView { up_ask: dec!(0.55), ..view() };
        let lock = lockable_profit(&snap, &v).unwrap();
        assert!(lock > Decimal::ZERO);
        assert_eq!(arbitrate(&snap, &v), Mode::ProfitLock);
    }

    #[test]
    fn balancing_fires_on_large_imbalance() {
        // 100 vs 300: ratio 0.5, threshold at 400 shares = 0.44, and
        // locking at this cost is not better than last.
        let snap = snapshot((dec!(100), dec!(50)), (dec!(300), dec!(120)));
        let v = TickView {
            up_ask: dec!(0.72),
            last_locked_pnl: dec!(100),
            ..view()
        };
        assert_eq!(arbitrate(&snap, &v), Mode::Balancing);
    }

    #[test]
    fn balancing_needs_deficit_ask_above_half() {
        let snap = snapshot((dec!(100), dec!(50)), (dec!(300), dec!(120)));
        let v = TickView {
            up_ask: dec!(0.50),
            last_locked_pnl: dec!(100),
            ..view()
        };
        // ask exactly 0.50 is not "> 0.50".
        assert_ne!(arbitrate(&snap, &v), Mode::Balancing);
    }

    #[test]
    fn baseline_blocks_reentry_on_same_imbalance() {
        let snap = snapshot((dec!(100), dec!(50)), (dec!(300), dec!(120)));
        let baseline = Baseline {
            imbalance: dec!(-180),
            up_qty: dec!(120),
            down_qty: dec!(300),
            saved_at: Utc::now(),
        };
        let v = TickView {
            up_ask: dec!(0.72),
            baseline: Some(baseline),
            last_locked_pnl: dec!(100),
            ..view()
        };
        // |(-200) - (-180)| = 20 < 110: blocked.
        assert_ne!(arbitrate(&snap, &v), Mode::Balancing);

        let moved = Baseline { imbalance: dec!(-60), ..baseline };
        let v = TickView { baseline: Some(moved), ..v };
        // |(-200) - (-60)| = 140 >= 110: allowed again.
        assert_eq!(arbitrate(&snap, &v), Mode::Balancing);
    }

    #[test]
    fn absolute_trigger_fires_below_ratio_threshold() {
        // 1000 vs 1115: ratio ~5.4%, above the 5% floor? threshold at
        // 2115 shares is the 5% floor, ratio qualifies anyway; shrink
        // the gap to dodge the ratio and still trip the absolute 110.
        let snap = snapshot((dec!(2000), dec!(900)), (dec!(2115), dec!(950)));
        let ratio = dec!(115) / dec!(4115);
        assert!(ratio < dec!(0.05));
        let v = TickView { up_ask: dec!(0.55), last_locked_pnl: dec!(1000), ..view() };
        assert_eq!(arbitrate(&snap, &v), Mode::Balancing);
    }

    #[test]
    fn pair_improvement_after_expensive_balance() {
        // Both sides held, pair cost over $1: improvement mode.
        let snap = snapshot((dec!(200), dec!(110)), (dec!(200), dec!(95)));
        assert!(snap.pair_cost > Decimal::ONE);
        let v = TickView { last_locked_pnl: dec!(1000), ..view() };
        assert_eq!(arbitrate(&snap, &v), Mode::PairImprovement);
    }

    #[test]
    fn one_sided_position_is_not_pair_improvement() {
        let snap = snapshot((dec!(200), dec!(110)), (dec!(0), dec!(0)));
        let v = TickView { last_locked_pnl: dec!(1000), down_ask: dec!(0.45), ..view() };
        // One-sided with a huge imbalance heads to balancing instead.
        assert_ne!(arbitrate(&snap, &v), Mode::PairImprovement);
    }

    #[test]
    fn lockable_profit_uses_ask_plus_one_cent() {
        let snap = snapshot((dec!(100), dec!(50)), (dec!(300), dec!(120)));
        let v = TickView { up_ask: dec!(0.55), ..view() };
        // 300 - (170 + 200 * 0.56) = 300 - 282 = 18
        assert_eq!(lockable_profit(&snap, &v).unwrap(), dec!(18));
    }
}
