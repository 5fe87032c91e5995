//! BALANCING mode: the micro trigger-hedge engine.
//!
//! Balancing buys the deficit side ("triggers") passively and spawns
//! proportional bids on the surplus side ("hedges") as the triggers
//! fill, diluting the pair cost toward the target instead of paying
//! the ask for the whole deficit at once.
//!
//! The plan is computed once on entry; the dilution share count X
//! solves
//!
//! ```text
//! X = ceil((target * base_pairs - cost_after_filling_deficit)
//!          / (trigger_ask + hedge_price - target))
//! ```
//!
//! where `base_pairs` is the surplus-side quantity and the denominator
//! must be strictly negative (buying a diluting pair must cost less
//! than the target, otherwise dilution cannot help and balancing
//! aborts to pair improvement).

use rust_decimal::Decimal;
use splitflip_core::types::{cents, MarketSide};
use splitflip_ledger::Snapshot;
use thiserror::Error;

/// Fixed pair-cost target while balancing.
pub const BALANCING_TARGET: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

/// Trigger ask above which the hedge-price buffer tightens.
const TIGHT_BUFFER_ASK: Decimal = Decimal::from_parts(90, 0, 0, false, 2);

/// Hedge price discount below the running trigger average.
const HEDGE_DISCOUNT: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Why a balancing plan could not be computed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanAbort {
    /// No deficit to balance.
    #[error("position already balanced")]
    AlreadyBalanced,
    /// `target - trigger_ask - buffer` left no room for a hedge bid.
    #[error("no positive hedge price at trigger ask {trigger_ask}")]
    NoHedgeRoom { trigger_ask: Decimal },
    /// Dilution denominator was non-negative; buying pairs at these
    /// prices cannot pull the pair cost down.
    #[error("dilution cannot improve pair cost (denominator {denominator})")]
    DilutionUnprofitable { denominator: Decimal },
}

/// The one-time balancing plan.
#[derive(Debug, Clone)]
pub struct BalancingPlan {
    pub trigger_side: MarketSide,
    pub hedge_side: MarketSide,
    /// Raw share deficit between the sides.
    pub deficit: Decimal,
    /// Dilution shares X (zero when the deficit alone suffices).
    pub dilution: Decimal,
    pub total_trigger_size: Decimal,
    pub total_hedge_size: Decimal,
    /// Hard cap on hedge growth for the lifetime of this plan.
    pub initial_hedge_target: Decimal,
    /// Hedge bid price computed at plan time.
    pub hedge_price: Decimal,
    pub target_pair_cost: Decimal,
}

impl BalancingPlan {
    /// Computes the plan against the default $0.99 target.
    pub fn compute(snap: &Snapshot, trigger_ask: Decimal) -> Result<Self, PlanAbort> {
        Self::compute_with_target(snap, trigger_ask, BALANCING_TARGET)
    }

    /// Computes the plan from the current position and the deficit
    /// side's ask. Returns an abort reason if balancing cannot help.
    pub fn compute_with_target(
        snap: &Snapshot,
        trigger_ask: Decimal,
        target: Decimal,
    ) -> Result<Self, PlanAbort> {
        let deficit = snap.imbalance.abs();
        if deficit == Decimal::ZERO {
            return Err(PlanAbort::AlreadyBalanced);
        }
        let (trigger_side, hedge_side, surplus_qty) = if snap.imbalance < Decimal::ZERO {
            (MarketSide::Up, MarketSide::Down, snap.down.qty)
        } else {
            (MarketSide::Down, MarketSide::Up, snap.up.qty)
        };

        let max_hedge_price = target - trigger_ask;
        let buffer = if trigger_ask > TIGHT_BUFFER_ASK { cents(2) } else { cents(5) };
        let hedge_price = max_hedge_price - buffer;
        if hedge_price <= Decimal::ZERO {
            return Err(PlanAbort::NoHedgeRoom { trigger_ask });
        }

        let base_pairs = surplus_qty;
        let cost_after_filling_deficit = snap.total_cost + deficit * trigger_ask;
        let numerator = target * base_pairs - cost_after_filling_deficit;
        let denominator = trigger_ask + hedge_price - target;
        if denominator >= Decimal::ZERO {
            return Err(PlanAbort::DilutionUnprofitable { denominator });
        }

        // Both negative => positive X; positive numerator => already
        // under target, no dilution needed.
        let dilution = (numerator / denominator).ceil().max(Decimal::ZERO);

        let total_trigger_size = deficit + dilution;
        let total_hedge_size = dilution;

        Ok(Self {
            trigger_side,
            hedge_side,
            deficit,
            dilution,
            total_trigger_size,
            total_hedge_size,
            initial_hedge_target: total_hedge_size,
            hedge_price,
            target_pair_cost: target,
        })
    }
}

/// One resting trigger tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTier {
    pub price: Decimal,
    pub size: Decimal,
}

/// The tiered trigger ladder for a bid level: one core-sized bid one
/// cent above the bid plus deeper percentage tiers. Only updated on
/// upward bid breakouts; on the way down the resting orders stay and
/// fill at better prices.
#[must_use]
pub fn trigger_tiers(bid: Decimal, core_size: Decimal, total_trigger_size: Decimal) -> Vec<TriggerTier> {
    let pct = |n: i64| total_trigger_size * Decimal::new(n, 2);
    [
        (bid + cents(1), core_size),
        (bid, pct(2)),
        (bid - cents(5), pct(5)),
        (bid - cents(15), pct(8)),
    ]
    .into_iter()
    .filter(|(price, size)| *price > Decimal::ZERO && *size > Decimal::ZERO)
    .map(|(price, size)| TriggerTier { price, size })
    .collect()
}

/// Running trigger-hedge state: the fractional accumulator plus the
/// freeze bookkeeping.
#[derive(Debug)]
pub struct ProportionalHedger {
    /// `total_hedge_size / total_trigger_size` at plan time.
    hedge_ratio: Decimal,
    /// Fractional hedge shares carried between trigger fills.
    accumulator: Decimal,
    /// Trigger shares filled so far.
    pub trigger_filled: Decimal,
    /// Cost of trigger fills so far.
    pub trigger_cost: Decimal,
    /// Hedge shares ordered so far.
    pub hedge_ordered: Decimal,
    /// Hedge shares confirmed filled so far.
    pub hedge_filled: Decimal,
    /// Remaining hedge budget; shrinks under freeze, never grows.
    pub total_hedge_size: Decimal,
    /// Plan-time hard cap.
    initial_hedge_target: Decimal,
    total_trigger_size: Decimal,
    target: Decimal,
}

impl ProportionalHedger {
    #[must_use]
    pub fn new(plan: &BalancingPlan) -> Self {
        let hedge_ratio = if plan.total_trigger_size > Decimal::ZERO {
            plan.total_hedge_size / plan.total_trigger_size
        } else {
            Decimal::ZERO
        };
        Self {
            hedge_ratio,
            accumulator: Decimal::ZERO,
            trigger_filled: Decimal::ZERO,
            trigger_cost: Decimal::ZERO,
            hedge_ordered: Decimal::ZERO,
            hedge_filled: Decimal::ZERO,
            total_hedge_size: plan.total_hedge_size,
            initial_hedge_target: plan.initial_hedge_target,
            total_trigger_size: plan.total_trigger_size,
            target: plan.target_pair_cost,
        }
    }

    /// Average trigger fill price so far.
    #[must_use]
    pub fn avg_trigger_price(&self) -> Decimal {
        if self.trigger_filled > Decimal::ZERO {
            self.trigger_cost / self.trigger_filled
        } else {
            Decimal::ZERO
        }
    }

    /// True once every planned trigger share has filled.
    #[must_use]
    pub fn triggers_complete(&self) -> bool {
        self.trigger_filled >= self.total_trigger_size
    }

    /// Records a trigger fill and returns the whole hedge shares to
    /// order now (the fractional remainder stays in the accumulator).
    pub fn on_trigger_fill(&mut self, size: Decimal, price: Decimal) -> Decimal {
        self.trigger_filled += size;
        self.trigger_cost += size * price;

        self.accumulator += size * self.hedge_ratio;
        let mut order = self.accumulator.floor();
        self.accumulator -= order;

        // Respect the remaining hedge budget.
        let remaining = (self.total_hedge_size - self.hedge_ordered).max(Decimal::ZERO);
        if order > remaining {
            order = remaining;
            self.accumulator = Decimal::ZERO;
        }
        self.hedge_ordered += order;
        order
    }

    /// Records a hedge fill.
    pub fn on_hedge_fill(&mut self, size: Decimal) {
        self.hedge_filled += size;
    }

    /// Price for a hedge order placed now:
    /// `target - avg_trigger_price - 5c`.
    #[must_use]
    pub fn hedge_price_now(&self) -> Decimal {
        (self.target - self.avg_trigger_price() - HEDGE_DISCOUNT).max(Decimal::ZERO)
    }

    /// Anti-spiral freeze. Once triggers are complete the hedge target
    /// can only shrink toward what balance still needs:
    /// `hedges_filled + max(0, trigger_qty - hedge_qty)`, and never
    /// beyond the plan-time cap. An over-committed `hedge_ordered` is
    /// resynced down and the accumulator cleared.
    pub fn freeze(&mut self, trigger_side_qty: Decimal, hedge_side_qty: Decimal) {
        if !self.triggers_complete() {
            return;
        }
        let need = (trigger_side_qty - hedge_side_qty).max(Decimal::ZERO);
        let max_hedge_target = self.hedge_filled + need;
        self.total_hedge_size = self
            .total_hedge_size
            .min(max_hedge_target)
            .min(self.initial_hedge_target);
        if self.hedge_ordered > self.total_hedge_size {
            self.hedge_ordered = self.total_hedge_size;
            self.accumulator = Decimal::ZERO;
        }
    }
}

/// Final balance-completing hedge once triggers are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalHedge {
    pub size: Decimal,
    pub price: Decimal,
    /// False when no profitable price existed and the ask was taken to
    /// balance anyway.
    pub profitable: bool,
}

/// Computes the final hedge. `need` is what balance still requires
/// after pending hedges; `max_p` is the highest price at which the
/// finished position still locks a profit. If profit is impossible the
/// ask is accepted: balanced at a small loss beats carrying one-sided
/// risk into settlement.
#[must_use]
pub fn final_hedge(
    trigger_qty: Decimal,
    hedge_qty: Decimal,
    pending_hedge_qty: Decimal,
    total_cost: Decimal,
    pending_cost: Decimal,
    hedge_ask: Decimal,
) -> Option<FinalHedge> {
    let need = trigger_qty - hedge_qty - pending_hedge_qty;
    if need <= Decimal::ZERO {
        return None;
    }
    let max_p = (trigger_qty - total_cost - pending_cost) / need;
    if max_p > Decimal::ZERO {
        Some(FinalHedge { size: need, price: max_p.min(hedge_ask), profitable: true })
    } else {
        Some(FinalHedge { size: need, price: hedge_ask, profitable: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use splitflip_ledger::{PositionLedger, Snapshot};

    fn snapshot(up_qty: Decimal, up_cost: Decimal, down_qty: Decimal, down_cost: Decimal) -> Snapshot {
        let mut ledger = PositionLedger::new();
        if up_qty > Decimal::ZERO {
            ledger.apply_fill("m", MarketSide::Up, up_qty, up_cost / up_qty).unwrap();
        }
        if down_qty > Decimal::ZERO {
            ledger.apply_fill("m", MarketSide::Down, down_qty, down_cost / down_qty).unwrap();
        }
        ledger.snapshot("m")
    }

    /// The worked example: 100 UP @ $50 vs 300 DOWN @ $120, UP ask
    /// 0.72. X solves to 340 and the whole plan follows.
    #[test]
    fn plan_micro_balance_positive_dilution() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.72)).unwrap();

        assert_eq!(plan.trigger_side, MarketSide::Up);
        assert_eq!(plan.hedge_side, MarketSide::Down);
        assert_eq!(plan.deficit, dec!(200));
        // max_hedge_price = 0.27, buffer 0.05 -> hedge at 0.22
        assert_eq!(plan.hedge_price, dec!(0.22));
        // numerator = 0.99*300 - (50 + 200*0.72 + 120) = -17
        // denominator = 0.72 + 0.22 - 0.99 = -0.05 -> X = 340
        assert_eq!(plan.dilution, dec!(340));
        assert_eq!(plan.total_trigger_size, dec!(540));
        assert_eq!(plan.total_hedge_size, dec!(340));
        assert_eq!(plan.initial_hedge_target, dec!(340));
    }

    /// Filling the worked example at plan prices lands near-balanced
    /// with a small guaranteed profit.
    #[test]
    fn plan_fills_lock_profit() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.72)).unwrap();

        let mut ledger = PositionLedger::new();
        ledger.apply_fill("m", MarketSide::Up, dec!(100), dec!(0.50)).unwrap();
        ledger.apply_fill("m", MarketSide::Down, dec!(300), dec!(0.40)).unwrap();
        ledger
            .apply_fill("m", plan.trigger_side, plan.total_trigger_size, dec!(0.72))
            .unwrap();
        ledger
            .apply_fill("m", plan.hedge_side, plan.total_hedge_size, plan.hedge_price)
            .unwrap();

        let end = ledger.snapshot("m");
        assert_eq!(end.up.qty, dec!(640));
        assert_eq!(end.down.qty, dec!(640));
        // 50 + 120 + 540*0.72 + 340*0.22 = 633.60
        assert_eq!(end.total_cost, dec!(633.60));
        assert!(end.guaranteed_profit > Decimal::ZERO);
        assert!(end.pair_cost < Decimal::ONE);
    }

    #[test]
    fn plan_balanced_position_aborts() {
        let snap = snapshot(dec!(200), dec!(92), dec!(200), dec!(92));
        assert_eq!(
            BalancingPlan::compute(&snap, dec!(0.55)).unwrap_err(),
            PlanAbort::AlreadyBalanced
        );
    }

    #[test]
    fn plan_aborts_without_hedge_room() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        // ask 0.96: max_hedge 0.03, tight buffer 0.02 -> 0.01 ok;
        // ask 0.98: max_hedge 0.01, buffer 0.02 -> no room.
        assert!(BalancingPlan::compute(&snap, dec!(0.96)).is_ok());
        assert_eq!(
            BalancingPlan::compute(&snap, dec!(0.98)).unwrap_err(),
            PlanAbort::NoHedgeRoom { trigger_ask: dec!(0.98) }
        );
    }

    #[test]
    fn plan_tight_buffer_above_ninety_cents() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.92)).unwrap();
        // max_hedge = 0.07, buffer 0.02 -> 0.05
        assert_eq!(plan.hedge_price, dec!(0.05));
    }

    #[test]
    fn plan_cheap_position_needs_no_dilution() {
        // Deep surplus bought cheap: deficit alone lands under target.
        let snap = snapshot(dec!(100), dec!(20), dec!(300), dec!(60));
        let plan = BalancingPlan::compute(&snap, dec!(0.30)).unwrap();
        assert_eq!(plan.dilution, Decimal::ZERO);
        assert_eq!(plan.total_trigger_size, plan.deficit);
        assert_eq!(plan.total_hedge_size, Decimal::ZERO);
    }

    #[test]
    fn tiers_follow_the_table() {
        let tiers = trigger_tiers(dec!(0.50), dec!(12), dec!(540));
        assert_eq!(
            tiers,
            vec![
                TriggerTier { price: dec!(0.51), size: dec!(12) },
                TriggerTier { price: dec!(0.50), size: dec!(10.80) },
                TriggerTier { price: dec!(0.45), size: dec!(27.00) },
                TriggerTier { price: dec!(0.35), size: dec!(43.20) },
            ]
        );
    }

    #[test]
    fn tiers_drop_nonpositive_prices() {
        let tiers = trigger_tiers(dec!(0.04), dec!(10), dec!(100));
        // bid-5c and bid-15c are gone.
        assert_eq!(tiers.len(), 2);
    }

    /// The fractional-accumulator walkthrough: ratio 340/540, fills of
    /// 10, 11, 10 shares produce hedge orders of 6, 7, 6.
    #[test]
    fn proportional_hedger_accumulator() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.72)).unwrap();
        let mut hedger = ProportionalHedger::new(&plan);

        assert_eq!(hedger.on_trigger_fill(dec!(10), dec!(0.72)), dec!(6));
        assert_eq!(hedger.on_trigger_fill(dec!(11), dec!(0.72)), dec!(7));
        assert_eq!(hedger.on_trigger_fill(dec!(10), dec!(0.72)), dec!(6));
        assert_eq!(hedger.hedge_ordered, dec!(19));

        // Total stays within 1 share of the exact ratio.
        let exact = dec!(31) * dec!(340) / dec!(540);
        assert!((hedger.hedge_ordered - exact).abs() < Decimal::ONE);
    }

    #[test]
    fn hedge_price_tracks_running_average() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.72)).unwrap();
        let mut hedger = ProportionalHedger::new(&plan);
        hedger.on_trigger_fill(dec!(10), dec!(0.70));
        // 0.99 - 0.70 - 0.05
        assert_eq!(hedger.hedge_price_now(), dec!(0.24));
    }

    #[test]
    fn freeze_only_shrinks_hedge_target() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.72)).unwrap();
        let mut hedger = ProportionalHedger::new(&plan);

        // Not complete yet: freeze is a no-op.
        hedger.on_trigger_fill(dec!(100), dec!(0.72));
        hedger.freeze(dec!(200), dec!(100));
        assert_eq!(hedger.total_hedge_size, dec!(340));

        // Complete the triggers, then freeze with most hedges filled.
        hedger.on_trigger_fill(dec!(440), dec!(0.72));
        hedger.on_hedge_fill(dec!(300));
        hedger.freeze(dec!(640), dec!(620));
        // 300 filled + 20 still needed.
        assert_eq!(hedger.total_hedge_size, dec!(320));

        // A later freeze can only shrink further, never grow back.
        hedger.on_hedge_fill(dec!(20));
        hedger.freeze(dec!(640), dec!(640));
        assert_eq!(hedger.total_hedge_size, dec!(320));
        assert!(hedger.total_hedge_size <= dec!(340));
    }

    #[test]
    fn freeze_resyncs_overcommitted_orders() {
        let snap = snapshot(dec!(100), dec!(50), dec!(300), dec!(120));
        let plan = BalancingPlan::compute(&snap, dec!(0.72)).unwrap();
        let mut hedger = ProportionalHedger::new(&plan);
        hedger.on_trigger_fill(dec!(540), dec!(0.72));
        // Ordered the full 340 but balance needs almost nothing.
        hedger.on_hedge_fill(dec!(10));
        hedger.freeze(dec!(640), dec!(630));
        assert_eq!(hedger.total_hedge_size, dec!(20));
        assert_eq!(hedger.hedge_ordered, dec!(20));
    }

    #[test]
    fn final_hedge_profitable_price() {
        // 640 triggers vs 600 hedges, costs allow up to (640-600-10)/40
        let hedge = final_hedge(dec!(640), dec!(590), dec!(10), dec!(600), dec!(10), dec!(0.40))
            .unwrap();
        assert_eq!(hedge.size, dec!(40));
        // max_p = (640 - 600 - 10) / 40 = 0.75 -> capped by ask 0.40
        assert_eq!(hedge.price, dec!(0.40));
        assert!(hedge.profitable);
    }

    #[test]
    fn final_hedge_accepts_loss_when_no_profitable_price() {
        let hedge = final_hedge(dec!(100), dec!(60), dec!(0), dec!(110), dec!(0), dec!(0.35))
            .unwrap();
        // max_p negative: take the ask and balance at a loss.
        assert_eq!(hedge.price, dec!(0.35));
        assert!(!hedge.profitable);
    }

    #[test]
    fn final_hedge_none_when_balanced() {
        assert!(final_hedge(dec!(100), dec!(100), dec!(0), dec!(90), dec!(0), dec!(0.4)).is_none());
        assert!(final_hedge(dec!(100), dec!(90), dec!(10), dec!(90), dec!(3), dec!(0.4)).is_none());
    }
}
