//! The Up/Down strategy engine: one market window, one event loop.
//!
//! The engine is a single logical task draining one FIFO queue fed by
//! the market feed, the user feed, and a heartbeat timer. Every state
//! mutation (ledger, pending orders, mode, balancing state) happens on
//! this task; the feeds only ever post events. Mode transitions are
//! not commutative, so the queue is drained strictly in arrival order
//! and nothing is ever dropped under back-pressure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use splitflip_clob::{OrderBookFeed, OrderExecutor, RelayerClient};
use splitflip_core::config::UpdownConfig;
use splitflip_data::{FillRow, Store, TradeRow};
use splitflip_core::events::{EngineEvent, UserEvent, UserEventKind};
use splitflip_core::types::{
    cents, Market, MarketSide, OrderRole, OrderSide, OrderType, PendingOrder,
};
use splitflip_ledger::{Baseline, PositionLedger, Snapshot};

use crate::balancing::{
    final_hedge, trigger_tiers, BalancingPlan, PlanAbort, ProportionalHedger,
};
use crate::improve::improvement_quote;
use crate::modes::{arbitrate, deficit_side, Mode, TickView};
use crate::normal::accumulation_quotes;
use crate::sizing::{base_order_usdc, decayed_size};
use crate::vol::{inventory_skew, reservation_price, VolTracker};

/// Bids at or beyond these mark the market as decided.
const DECIDED_LOW: Decimal = Decimal::from_parts(2, 0, 0, false, 2);
const DECIDED_HIGH: Decimal = Decimal::from_parts(98, 0, 0, false, 2);

/// Heartbeats between REST open-order reconciliations.
const RECONCILE_EVERY: u32 = 30;

/// Length of one market window.
const WINDOW: Duration = Duration::from_secs(900);

/// Live balancing state, created on mode entry and dropped on exit.
struct BalancingState {
    plan: BalancingPlan,
    hedger: ProportionalHedger,
    /// Highest bid the trigger tiers were built against; tiers chase
    /// upward breakouts only.
    chase_bid: Decimal,
}

/// The strategy engine for one 15-minute market.
pub struct UpdownEngine {
    cfg: UpdownConfig,
    market: Market,
    feed: OrderBookFeed,
    executor: Arc<OrderExecutor>,
    relayer: Arc<RelayerClient>,
    ledger: PositionLedger,
    pending: HashMap<String, PendingOrder>,
    mode: Mode,
    balancing: Option<BalancingState>,
    last_locked_pnl: Decimal,
    aum: Decimal,
    window_start: DateTime<Utc>,
    vol: VolTracker,
    halted: bool,
    stale: bool,
    heartbeats: u32,
    /// Recovery/reporting store; never read for decisions. Write
    /// failures are logged and swallowed.
    store: Option<Arc<Store>>,
}

impl UpdownEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: UpdownConfig,
        market: Market,
        feed: OrderBookFeed,
        executor: Arc<OrderExecutor>,
        relayer: Arc<RelayerClient>,
        aum: Decimal,
        window_start: DateTime<Utc>,
    ) -> Self {
        let vol_window = cfg.vol_window_ticks;
        Self {
            cfg,
            market,
            feed,
            executor,
            relayer,
            ledger: PositionLedger::new(),
            pending: HashMap::new(),
            mode: Mode::Normal,
            balancing: None,
            last_locked_pnl: Decimal::ZERO,
            aum,
            window_start,
            vol: VolTracker::new(vol_window),
            halted: false,
            stale: false,
            heartbeats: 0,
            store: None,
        }
    }

    /// Attaches the persistence store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Drains the event queue until it closes or the market exits.
    pub async fn run(&mut self, mut events: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        info!(
            market = %self.market.slug,
            condition_id = %self.market.condition_id,
            "up/down engine started"
        );

        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
            if self.halted {
                break;
            }
        }

        info!(market = %self.market.slug, "up/down engine stopped");
        Ok(())
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PriceUpdate { token_id } => {
                self.stale = false;
                if self.market.side_of(&token_id) == Some(MarketSide::Up) {
                    if let Some(book) = self.feed.book(&token_id) {
                        if let Some(mid) = book.mid_price() {
                            self.vol.record(mid);
                        }
                    }
                }
                self.tick().await;
            }
            EngineEvent::MarketTrade { token_id, price, size } => {
                if let Some(store) = &self.store {
                    if let Err(e) = store
                        .record_monitor_trade(&self.market.condition_id, &token_id, price, size)
                        .await
                    {
                        debug!(error = %e, "monitor-trade persistence failed");
                    }
                }
            }
            EngineEvent::User(user_event) => {
                self.apply_user_event(&user_event).await;
                self.tick().await;
            }
            EngineEvent::BookStale { token_id, silent_secs } => {
                warn!(%token_id, silent_secs, "book stale, pausing placement");
                self.stale = true;
            }
            EngineEvent::FeedDown { reason } => {
                warn!(%reason, "feed down, waiting for reconnect");
            }
            EngineEvent::Heartbeat { .. } => {
                self.heartbeats += 1;
                if self.heartbeats % RECONCILE_EVERY == 0 {
                    self.reconcile_open_orders().await;
                }
                self.tick().await;
            }
        }
    }

    // =========================================================================
    // Fill routing
    // =========================================================================

    /// Applies one normalized user-channel event. Only trade events
    /// mutate the ledger; order events can only evict pending entries.
    async fn apply_user_event(&mut self, event: &UserEvent) {
        let Some(pending) = self.pending.get_mut(&event.order_id) else {
            debug!(order_id = %event.order_id, "event for unknown order, skipping");
            return;
        };

        if event.kind == UserEventKind::Order {
            if event.status.is_terminal() {
                debug!(order_id = %event.order_id, status = ?event.status, "order terminal");
                self.pending.remove(&event.order_id);
            }
            return;
        }

        // Trade event: authoritative fill.
        let Some(side) = self.market.side_of(&event.token_id) else {
            warn!(token_id = %event.token_id, "fill for unknown token, skipping");
            return;
        };

        let role = pending.role;
        pending.filled += event.size;
        let done = pending.is_substantially_filled();
        let order_side = pending.side;
        if done {
            self.pending.remove(&event.order_id);
        }

        let market_id = self.market.condition_id.clone();
        let result = match order_side {
            OrderSide::Buy => self
                .ledger
                .apply_fill(&market_id, side, event.size, event.price)
                .map(|()| Decimal::ZERO),
            OrderSide::Sell => self.ledger.apply_sell(&market_id, side, event.size, event.price),
        };
        if let Err(e) = result {
            warn!(error = %e, order_id = %event.order_id, "fill refused by ledger, skipping");
            return;
        }

        info!(
            order_id = %event.order_id,
            %side,
            role = %role,
            size = %event.size,
            price = %event.price,
            "fill applied"
        );

        if let Some(store) = &self.store {
            let row = FillRow {
                market: market_id.clone(),
                order_id: event.order_id.clone(),
                side: event.side.to_string(),
                size: event.size,
                price: event.price,
                at: event.timestamp,
            };
            if let Err(e) = store.record_fill(&row).await {
                debug!(error = %e, "fill persistence failed");
            }
            let snap = self.ledger.snapshot(&market_id);
            let pos = match side {
                MarketSide::Up => snap.up,
                MarketSide::Down => snap.down,
            };
            if let Err(e) = store
                .record_position(&market_id, &side.to_string(), pos.qty, pos.cost)
                .await
            {
                debug!(error = %e, "position persistence failed");
            }
        }

        match role {
            OrderRole::Trigger => self.on_trigger_fill(event.size, event.price).await,
            OrderRole::Hedge | OrderRole::FinalHedge => {
                if let Some(state) = self.balancing.as_mut() {
                    state.hedger.on_hedge_fill(event.size);
                }
            }
            OrderRole::Lock => self.settle_profit_lock().await,
            _ => {}
        }
    }

    /// A trigger fill spawns a proportional hedge order.
    async fn on_trigger_fill(&mut self, size: Decimal, price: Decimal) {
        let Some(state) = self.balancing.as_mut() else { return };
        let hedge_shares = state.hedger.on_trigger_fill(size, price);
        let hedge_price = state.hedger.hedge_price_now();
        let hedge_side = state.plan.hedge_side;

        let snap = self.ledger.snapshot(&self.market.condition_id);
        let (trigger_qty, hedge_qty) = side_quantities(&snap, state.plan.trigger_side);
        state.hedger.freeze(trigger_qty, hedge_qty);

        if hedge_shares > Decimal::ZERO {
            self.place_order(
                hedge_side,
                OrderSide::Buy,
                hedge_price,
                hedge_shares,
                OrderType::Gtc,
                OrderRole::Hedge,
            )
            .await;
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    async fn tick(&mut self) {
        if self.halted || self.stale {
            return;
        }

        let snap = self.ledger.snapshot(&self.market.condition_id);
        let view = self.view();

        if self.should_exit(&snap, &view) {
            info!(market = %self.market.slug, "market exit conditions met");
            let _ = self.executor.cancel_all(Some(&self.market.condition_id)).await;
            self.pending.clear();
            self.halted = true;
            return;
        }

        let next_mode = arbitrate(&snap, &view);
        if next_mode != self.mode {
            info!(from = %self.mode, to = %next_mode, "mode transition");
            self.leave_mode(next_mode, &snap).await;
            self.mode = next_mode;
        }

        match self.mode {
            Mode::Normal => self.tick_normal(&snap, &view).await,
            Mode::Balancing => self.tick_balancing(&snap, &view).await,
            Mode::PairImprovement => self.tick_improvement(&snap).await,
            Mode::ProfitLock => self.tick_profit_lock(&snap, &view).await,
        }
    }

    async fn leave_mode(&mut self, next: Mode, snap: &Snapshot) {
        match self.mode {
            Mode::Balancing => {
                // SUCCESS or hop: save the baseline either way so the
                // same imbalance cannot re-trigger.
                self.save_baseline(snap).await;
                self.balancing = None;
                let _ = self.executor.cancel_all(Some(&self.market.condition_id)).await;
                self.pending.clear();
                self.ledger.record_flip(&self.market.condition_id);
            }
            Mode::Normal | Mode::PairImprovement if next == Mode::Balancing => {
                let _ = self.executor.cancel_all(Some(&self.market.condition_id)).await;
                self.pending.clear();
            }
            _ => {}
        }
    }

    async fn save_baseline(&mut self, snap: &Snapshot) {
        self.ledger.save_baseline(
            &self.market.condition_id,
            Baseline {
                imbalance: snap.imbalance,
                up_qty: snap.up.qty,
                down_qty: snap.down.qty,
                saved_at: Utc::now(),
            },
        );
        if let Some(store) = &self.store {
            if let Err(e) = store
                .save_baseline(&self.market.condition_id, snap.imbalance, snap.up.qty, snap.down.qty)
                .await
            {
                debug!(error = %e, "baseline persistence failed");
            }
        }
    }

    // =========================================================================
    // NORMAL
    // =========================================================================

    async fn tick_normal(&mut self, snap: &Snapshot, view: &TickView) {
        if self.has_pending_role(OrderRole::Accumulation) {
            return;
        }
        let base = self.core_size();
        if base <= Decimal::ZERO {
            return;
        }

        let sigma = self.vol.sigma();
        let t_remaining = self.window_fraction_remaining();

        for side in MarketSide::both() {
            let (bid, qty_side, qty_other, avg_side, avg_other) = match side {
                MarketSide::Up => (
                    view.up_bid,
                    snap.up.qty,
                    snap.down.qty,
                    snap.up.avg_price(),
                    snap.down.avg_price(),
                ),
                MarketSide::Down => (
                    view.down_bid,
                    snap.down.qty,
                    snap.up.qty,
                    snap.down.avg_price(),
                    snap.up.avg_price(),
                ),
            };
            if bid <= Decimal::ZERO {
                continue;
            }
            let q = inventory_skew(qty_side, qty_other);
            let r = reservation_price(bid, q, self.cfg.risk_aversion, sigma, t_remaining);
            let quotes =
                accumulation_quotes(r, avg_side, avg_other, base, self.market.tick_size);
            for quote in quotes {
                // Level sizes are USDC; the book wants shares.
                let shares = (quote.size / quote.price).floor();
                self.place_order(
                    side,
                    OrderSide::Buy,
                    quote.price,
                    shares,
                    OrderType::Gtc,
                    OrderRole::Accumulation,
                )
                .await;
            }
        }
    }

    // =========================================================================
    // BALANCING
    // =========================================================================

    async fn tick_balancing(&mut self, snap: &Snapshot, view: &TickView) {
        // Entry: compute the plan once.
        if self.balancing.is_none() {
            let Some(trigger_ask) = view.deficit_ask(snap) else { return };
            match BalancingPlan::compute_with_target(snap, trigger_ask, self.cfg.pair_cost_target) {
                Ok(plan) => {
                    info!(
                        trigger = %plan.trigger_side,
                        deficit = %plan.deficit,
                        dilution = %plan.dilution,
                        total_trigger = %plan.total_trigger_size,
                        total_hedge = %plan.total_hedge_size,
                        hedge_price = %plan.hedge_price,
                        "balancing plan computed"
                    );
                    let hedger = ProportionalHedger::new(&plan);
                    self.balancing = Some(BalancingState {
                        plan,
                        hedger,
                        chase_bid: Decimal::ZERO,
                    });
                }
                Err(PlanAbort::AlreadyBalanced) => {
                    self.mode = Mode::Normal;
                    return;
                }
                Err(e) => {
                    // No room to balance profitably: improve instead.
                    debug!(reason = %e, "balancing aborted to pair improvement");
                    self.mode = Mode::PairImprovement;
                    return;
                }
            }
        }

        let (trigger_side, triggers_complete, trigger_bid) = {
            let state = self.balancing.as_ref().expect("balancing state present");
            let bid = match state.plan.trigger_side {
                MarketSide::Up => view.up_bid,
                MarketSide::Down => view.down_bid,
            };
            (state.plan.trigger_side, state.hedger.triggers_complete(), bid)
        };

        if triggers_complete {
            self.place_final_hedge(snap, view).await;
            self.maybe_exit_balancing(snap, view).await;
            return;
        }

        // Chase upward breakouts only; falling bids leave the resting
        // tiers to fill at better prices.
        let should_requote = {
            let state = self.balancing.as_ref().expect("balancing state present");
            trigger_bid > state.chase_bid
        };
        if should_requote && trigger_bid > Decimal::ZERO {
            self.cancel_role(OrderRole::Trigger).await;
            let core_shares = self.core_size_shares(trigger_bid);
            let (tiers, remaining) = {
                let state = self.balancing.as_mut().expect("balancing state present");
                state.chase_bid = trigger_bid;
                let remaining =
                    (state.plan.total_trigger_size - state.hedger.trigger_filled).max(Decimal::ZERO);
                (
                    trigger_tiers(trigger_bid, core_shares, state.plan.total_trigger_size),
                    remaining,
                )
            };
            let mut left = remaining;
            for tier in tiers {
                if left <= Decimal::ZERO {
                    break;
                }
                let size = tier.size.min(left);
                left -= size;
                self.place_order(
                    trigger_side,
                    OrderSide::Buy,
                    tier.price,
                    size,
                    OrderType::Gtc,
                    OrderRole::Trigger,
                )
                .await;
            }
        }

        self.maybe_exit_balancing(snap, view).await;
    }

    async fn place_final_hedge(&mut self, snap: &Snapshot, view: &TickView) {
        if self.has_pending_role(OrderRole::FinalHedge) {
            return;
        }
        let Some(state) = self.balancing.as_ref() else { return };
        let (trigger_qty, hedge_qty) = side_quantities(snap, state.plan.trigger_side);
        let hedge_ask = match state.plan.hedge_side {
            MarketSide::Up => view.up_ask,
            MarketSide::Down => view.down_ask,
        };
        if hedge_ask <= Decimal::ZERO {
            return;
        }
        let (pending_qty, pending_cost) = self.pending_exposure(OrderRole::Hedge);
        let hedge_side = state.plan.hedge_side;

        if let Some(hedge) = final_hedge(
            trigger_qty,
            hedge_qty,
            pending_qty,
            snap.total_cost,
            pending_cost,
            hedge_ask,
        ) {
            if !hedge.profitable {
                warn!(price = %hedge.price, "no profitable final hedge, balancing at a loss");
            }
            self.place_order(
                hedge_side,
                OrderSide::Buy,
                hedge.price,
                hedge.size,
                OrderType::Gtc,
                OrderRole::FinalHedge,
            )
            .await;
        }
    }

    async fn maybe_exit_balancing(&mut self, snap: &Snapshot, view: &TickView) {
        let Some(state) = self.balancing.as_ref() else { return };

        // SUCCESS: balanced under $1.00.
        if snap.imbalance == Decimal::ZERO && snap.pair_cost < Decimal::ONE {
            info!(pair_cost = %snap.pair_cost, "balancing complete");
            self.save_baseline(snap).await;
            self.balancing = None;
            self.cancel_role(OrderRole::Trigger).await;
            self.cancel_role(OrderRole::Hedge).await;
            self.mode = Mode::Normal;
            return;
        }

        // FORCED: the deficit side went cheap; stop and improve.
        let trigger_ask = match state.plan.trigger_side {
            MarketSide::Up => view.up_ask,
            MarketSide::Down => view.down_ask,
        };
        if trigger_ask > Decimal::ZERO && trigger_ask <= Decimal::new(50, 2) {
            info!(%trigger_ask, "forced balancing exit");
            self.save_baseline(snap).await;
            self.balancing = None;
            let _ = self.executor.cancel_all(Some(&self.market.condition_id)).await;
            self.pending.clear();
            self.mode = Mode::PairImprovement;
        }
    }

    // =========================================================================
    // PAIR_IMPROVEMENT
    // =========================================================================

    async fn tick_improvement(&mut self, snap: &Snapshot) {
        if self.has_pending_role(OrderRole::Accumulation) {
            return;
        }
        let base = self.core_size();
        for side in MarketSide::both() {
            let avg = match side {
                MarketSide::Up => snap.up.avg_price(),
                MarketSide::Down => snap.down.avg_price(),
            };
            if let Some(quote) = improvement_quote(avg, base, self.market.tick_size) {
                let shares = (quote.size / quote.price).floor();
                self.place_order(
                    side,
                    OrderSide::Buy,
                    quote.price,
                    shares,
                    OrderType::Gtc,
                    OrderRole::Accumulation,
                )
                .await;
            }
        }
    }

    // =========================================================================
    // PROFIT_LOCK
    // =========================================================================

    async fn tick_profit_lock(&mut self, snap: &Snapshot, view: &TickView) {
        if self.has_pending_role(OrderRole::Lock) {
            return;
        }
        let _ = self.executor.cancel_all(Some(&self.market.condition_id)).await;
        self.pending.clear();

        let deficit = snap.imbalance.abs();
        if deficit == Decimal::ZERO {
            // Already balanced: straight to the merge.
            self.settle_profit_lock().await;
            return;
        }
        let Some(side) = deficit_side(snap) else { return };
        let Some(ask) = view.deficit_ask(snap) else { return };
        let price = ask + cents(1);
        let amount = deficit * price;

        let token = match self.market.token_id(side) {
            Some(t) => t.to_string(),
            None => return,
        };
        match self
            .executor
            .buy_fak(&token, amount, price, 0, self.market.neg_risk, self.market.tick_size)
            .await
        {
            Ok(placed) => {
                self.pending.insert(
                    placed.order_id.clone(),
                    PendingOrder::new(
                        &placed.order_id,
                        &token,
                        OrderSide::Buy,
                        placed.price,
                        placed.size,
                        OrderType::Fak,
                        OrderRole::Lock,
                    ),
                );
            }
            Err(e) => {
                // A failed place is never a placed order; next tick
                // decides again.
                warn!(error = %e, "profit-lock buy failed");
            }
        }
    }

    /// Merges every hedged pair and books the locked profit.
    async fn settle_profit_lock(&mut self) {
        let snap = self.ledger.snapshot(&self.market.condition_id);
        let pairs = snap.hedged_pairs.floor();
        if pairs <= Decimal::ZERO {
            return;
        }
        if !self.ledger.try_begin_merge(&self.market.condition_id, Utc::now(), 300) {
            debug!("merge still cooling down");
            return;
        }
        match self
            .relayer
            .merge(&self.market.condition_id, pairs, self.market.neg_risk)
            .await
        {
            Ok(receipt) => {
                // No ledger deduction happens until the merge succeeds.
                match self.ledger.record_merge(&self.market.condition_id, pairs) {
                    Ok(outcome) => {
                        self.last_locked_pnl = outcome.profit.max(self.last_locked_pnl);
                        self.ledger.record_profit_lock(&self.market.condition_id);
                        self.ledger.clear_baseline(&self.market.condition_id);
                        info!(
                            pairs = %outcome.pairs,
                            profit = %outcome.profit,
                            tx = ?receipt.tx_hash,
                            "profit locked"
                        );
                        if let Some(store) = &self.store {
                            let row = TradeRow {
                                market: self.market.condition_id.clone(),
                                strategy: "updown".to_string(),
                                kind: "profit_lock".to_string(),
                                pnl: outcome.profit,
                                detail: format!("{} pairs merged", outcome.pairs),
                                at: Utc::now(),
                            };
                            if let Err(e) = store.record_trade(&row).await {
                                debug!(error = %e, "trade persistence failed");
                            }
                            let post = self.ledger.snapshot(&self.market.condition_id);
                            for (side, pos) in
                                [(MarketSide::Up, post.up), (MarketSide::Down, post.down)]
                            {
                                if let Err(e) = store
                                    .record_position(
                                        &self.market.condition_id,
                                        &side.to_string(),
                                        pos.qty,
                                        pos.cost,
                                    )
                                    .await
                                {
                                    debug!(error = %e, "position persistence failed");
                                }
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "merge bookkeeping refused"),
                }
            }
            Err(e) => {
                warn!(error = %e, "merge failed, shares queued for next attempt");
            }
        }
    }

    // =========================================================================
    // Exit conditions and helpers
    // =========================================================================

    /// Cease-trading test: market decided, stop-minute passed while
    /// profitable, or capital cap reached while profitable.
    fn should_exit(&self, snap: &Snapshot, view: &TickView) -> bool {
        let decided = [view.up_bid, view.down_bid].into_iter().any(|bid| {
            bid > Decimal::ZERO && (bid <= DECIDED_LOW || bid >= DECIDED_HIGH)
        });
        if decided {
            return true;
        }

        let profitable = snap.hedged_pairs >= snap.total_cost && snap.total_cost > Decimal::ZERO;
        if profitable && self.elapsed_minute() >= self.cfg.stop_minute {
            return true;
        }
        profitable && snap.total_cost >= self.aum * self.cfg.max_capital_pct
    }

    fn view(&self) -> TickView {
        let up = self.market.token_id(MarketSide::Up).unwrap_or_default();
        let down = self.market.token_id(MarketSide::Down).unwrap_or_default();
        TickView {
            up_bid: self.feed.best_bid(up),
            up_ask: self.feed.best_ask(up),
            down_bid: self.feed.best_bid(down),
            down_ask: self.feed.best_ask(down),
            baseline: self.ledger.baseline(&self.market.condition_id),
            last_locked_pnl: self.last_locked_pnl,
        }
    }

    fn elapsed_minute(&self) -> u32 {
        let elapsed = (Utc::now() - self.window_start).num_seconds().max(0) as u64;
        (elapsed / 60) as u32
    }

    fn window_fraction_remaining(&self) -> f64 {
        let elapsed = (Utc::now() - self.window_start).num_seconds().max(0) as f64;
        (1.0 - elapsed / WINDOW.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Decayed base order size in USDC, floored at the platform's $1
    /// minimum order value.
    fn core_size(&self) -> Decimal {
        let counters = self.ledger.counters(&self.market.condition_id);
        let base = base_order_usdc(self.aum, self.cfg.budget_pct, self.cfg.target_trades);
        if base <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        decayed_size(base, self.elapsed_minute(), counters.profit_locks).max(Decimal::ONE)
    }

    /// Core size expressed in shares at the given price.
    fn core_size_shares(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.core_size() / price).floor()
    }

    fn has_pending_role(&self, role: OrderRole) -> bool {
        self.pending.values().any(|o| o.role == role)
    }

    /// Unfilled quantity and cost still resting for a role.
    fn pending_exposure(&self, role: OrderRole) -> (Decimal, Decimal) {
        self.pending
            .values()
            .filter(|o| o.role == role)
            .fold((Decimal::ZERO, Decimal::ZERO), |(qty, cost), o| {
                (qty + o.remaining(), cost + o.remaining() * o.price)
            })
    }

    async fn cancel_role(&mut self, role: OrderRole) {
        let ids: Vec<String> = self
            .pending
            .values()
            .filter(|o| o.role == role)
            .map(|o| o.order_id.clone())
            .collect();
        for id in ids {
            if self.executor.cancel_order(&id).await.is_ok() {
                self.pending.remove(&id);
            }
        }
    }

    async fn place_order(
        &mut self,
        side: MarketSide,
        order_side: OrderSide,
        price: Decimal,
        size: Decimal,
        order_type: OrderType,
        role: OrderRole,
    ) {
        let Some(token) = self.market.token_id(side).map(str::to_string) else { return };
        if size <= Decimal::ZERO || price <= Decimal::ZERO {
            return;
        }
        let result = match (order_side, order_type) {
            (OrderSide::Buy, OrderType::Gtc) => {
                self.executor
                    .buy_gtc(&token, size, price, self.market.neg_risk, self.market.tick_size)
                    .await
            }
            (OrderSide::Sell, _) => {
                self.executor
                    .sell_gtc(&token, size, price, self.market.neg_risk, self.market.tick_size)
                    .await
            }
            _ => {
                self.executor
                    .buy_gtc(&token, size, price, self.market.neg_risk, self.market.tick_size)
                    .await
            }
        };
        match result {
            Ok(placed) => {
                debug!(order_id = %placed.order_id, %side, role = %role, price = %placed.price, %size, "order resting");
                self.pending.insert(
                    placed.order_id.clone(),
                    PendingOrder::new(
                        &placed.order_id,
                        &token,
                        order_side,
                        placed.price,
                        size,
                        order_type,
                        role,
                    ),
                );
            }
            Err(e) => {
                // Typed permanent errors (min value, bad price) mean
                // "try something else next tick", never a resting order.
                warn!(error = %e, %side, role = %role, "order placement failed");
            }
        }
    }

    /// Reconciles the pending map against REST open-order state; fills
    /// missed during a user-channel gap surface here as vanished
    /// orders.
    async fn reconcile_open_orders(&mut self) {
        let open = match self.executor.get_open_orders(Some(&self.market.condition_id)).await {
            Ok(orders) => orders,
            Err(e) => {
                debug!(error = %e, "open-order reconcile failed");
                return;
            }
        };
        let open_ids: std::collections::HashSet<&str> =
            open.iter().map(|o| o.id.as_str()).collect();
        let grace = chrono::Duration::seconds(10);
        let now = Utc::now();
        self.pending.retain(|id, order| {
            let keep = open_ids.contains(id.as_str())
                || order.order_type != OrderType::Gtc
                || now - order.created_at < grace;
            if !keep {
                warn!(order_id = %id, "pending order vanished from the book, dropping");
            }
            keep
        });
    }

    /// Read-only view of the ledger for reporting.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.ledger.snapshot(&self.market.condition_id)
    }
}

fn side_quantities(snap: &Snapshot, trigger_side: MarketSide) -> (Decimal, Decimal) {
    match trigger_side {
        MarketSide::Up => (snap.up.qty, snap.down.qty),
        MarketSide::Down => (snap.down.qty, snap.up.qty),
    }
}

/// Spawns the heartbeat producer for an engine queue.
pub fn spawn_heartbeat(tx: mpsc::Sender<EngineEvent>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.send(EngineEvent::Heartbeat { at: Utc::now() }).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use splitflip_core::events::UserEventKind;

    fn pending(role: OrderRole, size: Decimal) -> PendingOrder {
        PendingOrder::new("0xabc", "111", OrderSide::Buy, dec!(0.48), size, OrderType::Gtc, role)
    }

    #[test]
    fn pending_exposure_sums_remaining() {
        let mut map = HashMap::new();
        let mut a = pending(OrderRole::Hedge, dec!(100));
        a.filled = dec!(40);
        map.insert("a".to_string(), a);
        let b = pending(OrderRole::Hedge, dec!(50));
        map.insert("b".to_string(), b);
        map.insert("c".to_string(), pending(OrderRole::Trigger, dec!(10)));

        let exposure: (Decimal, Decimal) = map
            .values()
            .filter(|o| o.role == OrderRole::Hedge)
            .fold((Decimal::ZERO, Decimal::ZERO), |(qty, cost), o| {
                (qty + o.remaining(), cost + o.remaining() * o.price)
            });
        assert_eq!(exposure.0, dec!(110));
        assert_eq!(exposure.1, dec!(110) * dec!(0.48));
    }

    #[test]
    fn decided_bounds() {
        assert!(DECIDED_LOW == dec!(0.02));
        assert!(DECIDED_HIGH == dec!(0.98));
    }

    #[test]
    fn user_event_for_unknown_order_is_skippable() {
        // The routing predicate the engine applies before any ledger
        // mutation: unknown ids never mutate state.
        let map: HashMap<String, PendingOrder> = HashMap::new();
        let event = UserEvent {
            kind: UserEventKind::Trade,
            order_id: "0xghost".to_string(),
            token_id: "111".to_string(),
            side: OrderSide::Buy,
            size: dec!(10),
            price: dec!(0.5),
            status: splitflip_core::events::OrderStatus::Matched,
            timestamp: Utc::now(),
        };
        assert!(map.get(&event.order_id).is_none());
    }
}
