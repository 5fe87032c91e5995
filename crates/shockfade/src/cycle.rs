//! Cycle lifecycle: one self-contained shock-fade trade.
//!
//! A cycle is born at the pre-split, lives through the ladder and the
//! event-driven exits, and dies at the merge (or settlement). Cycles
//! hold only opaque keys (market, game, order IDs); everything else
//! resolves through the engine's maps.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use splitflip_core::types::{cents, clamp_to_book, round_to_tick, MarketSide};
use uuid::Uuid;

/// Terminal result of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Ladder (fully or partially) reverted for a profit.
    Won,
    /// Adverse exit or settlement against the held side.
    Lost,
    /// Held through settlement without an exit signal.
    Held,
    /// Cancelled before any exposure (classification failed, breaker
    /// tripped mid-flight).
    Cancelled,
}

/// Where a cycle is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Ladder sells are resting.
    LadderOpen,
    /// Adverse event seen; complement sell placed, ladder cancelled.
    ExitingAdverse,
    /// Fade window expired or favorable event; holding to resolution.
    Holding,
    /// Finished, outcome recorded.
    Closed(CycleOutcome),
}

/// One shock-fade trade lifecycle.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub id: Uuid,
    pub condition_id: String,
    pub game_id: String,
    /// The side whose token spiked (the side we sell into reversion).
    pub shocked_side: MarketSide,
    pub shocked_token: String,
    pub complement_token: String,
    /// USDC split at entry; equals the per-outcome share count.
    pub presplit: Decimal,
    pub split_tx: Option<String>,
    /// Mid at shock time; the ladder prices step up from here.
    pub entry_mid: Decimal,
    /// Ladder order IDs (lowercased), in level order.
    pub ladder_order_ids: Vec<String>,
    /// Complement-sell order ID during an adverse exit.
    pub exit_order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub state: CycleState,
    /// Realized USDC from ladder/exit fills so far.
    pub realized: Decimal,
    pub merge_tx: Option<String>,
}

impl Cycle {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        condition_id: &str,
        game_id: &str,
        shocked_side: MarketSide,
        shocked_token: &str,
        complement_token: &str,
        presplit: Decimal,
        split_tx: Option<String>,
        entry_mid: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            condition_id: condition_id.to_string(),
            game_id: game_id.to_string(),
            shocked_side,
            shocked_token: shocked_token.to_string(),
            complement_token: complement_token.to_string(),
            presplit,
            split_tx,
            entry_mid,
            ladder_order_ids: Vec::new(),
            exit_order_id: None,
            opened_at: Utc::now(),
            state: CycleState::LadderOpen,
            realized: Decimal::ZERO,
            merge_tx: None,
        }
    }

    /// True while the cycle occupies a concurrency slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self.state, CycleState::Closed(_))
    }

    /// True once the fade window has expired.
    #[must_use]
    pub fn fade_expired(&self, now: DateTime<Utc>, fade_window_ms: u64) -> bool {
        (now - self.opened_at).num_milliseconds() >= fade_window_ms as i64
    }

    pub fn close(&mut self, outcome: CycleOutcome) {
        self.state = CycleState::Closed(outcome);
    }
}

/// Ladder prices: `shock_mid + k * spacing` for `k = 1..=levels`,
/// rounded to tick and clamped into `[tick, ceiling]`. Levels that
/// collapse onto an earlier price after clamping are dropped.
#[must_use]
pub fn ladder_prices(
    shock_mid: Decimal,
    levels: u32,
    spacing_cents: i64,
    ceiling: Decimal,
    tick: Decimal,
) -> Vec<Decimal> {
    let mut prices = Vec::new();
    for k in 1..=levels {
        let raw = shock_mid + cents(spacing_cents * i64::from(k));
        let price = clamp_to_book(round_to_tick(raw, tick), tick).min(ceiling);
        if prices.last() == Some(&price) {
            continue;
        }
        prices.push(price);
    }
    prices
}

/// Shares per ladder level: `ceil(presplit / levels)`; the last level
/// is trimmed by the caller if the total would exceed the pre-split.
#[must_use]
pub fn ladder_level_size(presplit: Decimal, levels: u32) -> Decimal {
    if levels == 0 {
        return Decimal::ZERO;
    }
    (presplit / Decimal::from(levels)).ceil()
}
