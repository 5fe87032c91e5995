//! The shock-fade strategy engine.
//!
//! Same scheduling model as the arbitrage engine: one logical task,
//! one FIFO queue, producers never mutate. The extra wrinkle here is
//! SIGHUP config reload: limits and thresholds re-read from disk apply
//! to NEW cycles only; open cycles run to completion under the
//! parameters they were born with.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use splitflip_clob::{OrderBookFeed, OrderExecutor, RelayerClient};
use splitflip_core::config::{ConfigLoader, ShockFadeConfig};
use splitflip_data::{FillRow, Store, TradeRow};
use splitflip_core::events::{EngineEvent, UserEvent, UserEventKind};
use splitflip_core::types::{
    cents, Market, MarketSide, OrderRole, OrderSide, OrderType, PendingOrder,
};
use splitflip_ledger::PositionLedger;
use splitflip_sports::{GameState, LeagueClient, ScoringEvent};

use crate::breakers::CircuitBreakers;
use crate::classifier::{burst_classify, ShockClass};
use crate::cycle::{ladder_level_size, ladder_prices, Cycle, CycleOutcome, CycleState};
use crate::detector::{Shock, ShockDetector};

/// Heartbeats between league polls per game.
const GAME_POLL_EVERY: u32 = 5;

/// Heartbeats between REST open-order reconciliations.
const RECONCILE_EVERY: u32 = 30;

/// A sports market bound to its live game.
///
/// The league feed and the market catalog use different team
/// vocabularies ("BOS" vs "Bruins"), so the home/away to side mapping
/// is resolved once at bind time and in-game events are matched
/// against the league's own team strings.
#[derive(Clone)]
pub struct MarketBinding {
    pub market: Market,
    pub game_id: String,
    pub league: String,
    /// Side whose outcome is the home team.
    pub home_side: MarketSide,
    /// Home team in the league feed's vocabulary.
    pub home_team: String,
    /// Away team in the league feed's vocabulary.
    pub away_team: String,
}

impl MarketBinding {
    /// Side credited with an event by the league feed.
    #[must_use]
    pub fn event_side(&self, team: &str) -> Option<MarketSide> {
        if teams_equal(team, &self.home_team) {
            Some(self.home_side)
        } else if teams_equal(team, &self.away_team) {
            Some(self.home_side.opposite())
        } else {
            None
        }
    }

    /// Side that is winning the given game state.
    #[must_use]
    pub fn leading_side(&self, game: &GameState) -> MarketSide {
        if game.home_score >= game.away_score {
            self.home_side
        } else {
            self.home_side.opposite()
        }
    }
}

/// Case-insensitive containment either way; the league is consistent
/// with itself, this only has to survive padding differences.
fn teams_equal(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a == b || a.contains(&b) || b.contains(&a)
}

/// The shock-fade engine across all bound markets.
pub struct ShockFadeEngine {
    cfg: ShockFadeConfig,
    config_path: String,
    bindings: HashMap<String, MarketBinding>,
    feed: OrderBookFeed,
    executor: Arc<OrderExecutor>,
    relayer: Arc<RelayerClient>,
    ledger: PositionLedger,
    detector: ShockDetector,
    breakers: CircuitBreakers,
    cycles: HashMap<Uuid, Cycle>,
    pending: HashMap<String, PendingOrder>,
    leagues: HashMap<String, Arc<dyn LeagueClient>>,
    /// Scoring events already accounted for per game, so the same goal
    /// is not an "adverse event" twice.
    consumed_events: HashMap<String, usize>,
    heartbeats: u32,
    /// Recovery/reporting store; never read for decisions.
    store: Option<Arc<Store>>,
}

impl ShockFadeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ShockFadeConfig,
        config_path: &str,
        bindings: Vec<MarketBinding>,
        feed: OrderBookFeed,
        executor: Arc<OrderExecutor>,
        relayer: Arc<RelayerClient>,
        leagues: HashMap<String, Arc<dyn LeagueClient>>,
    ) -> Self {
        let detector = ShockDetector::new(&cfg);
        let breakers = CircuitBreakers::new(&cfg);
        Self {
            cfg,
            config_path: config_path.to_string(),
            bindings: bindings
                .into_iter()
                .map(|b| (b.market.condition_id.clone(), b))
                .collect(),
            feed,
            executor,
            relayer,
            ledger: PositionLedger::new(),
            detector,
            breakers,
            cycles: HashMap::new(),
            pending: HashMap::new(),
            leagues,
            consumed_events: HashMap::new(),
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

    /// Drains the event queue; on unix a SIGHUP re-reads the config
    /// for new cycles without touching open ones.
    pub async fn run(&mut self, mut events: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        info!(markets = self.bindings.len(), "shock-fade engine started");

        #[cfg(unix)]
        let mut hup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    },
                    _ = hup.recv() => self.reload_config(),
                }
            }
            #[cfg(not(unix))]
            {
                match events.recv().await {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                }
            }
        }

        info!("shock-fade engine stopped");
        Ok(())
    }

    fn reload_config(&mut self) {
        match ConfigLoader::load_from(&self.config_path) {
            Ok(app) => {
                info!("config reloaded; new settings apply to new cycles only");
                self.cfg = app.shockfade;
                self.detector.reconfigure(&self.cfg);
                self.breakers.reconfigure(&self.cfg);
            }
            Err(e) => warn!(error = %e, "config reload failed, keeping current settings"),
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PriceUpdate { token_id } => {
                let Some(book) = self.feed.book(&token_id) else { return };
                let Some(mid) = book.mid_price() else { return };
                if let Some(shock) = self.detector.observe(&token_id, mid, Utc::now()) {
                    // Only upward spikes are sold into; the complement
                    // token's own spike fires separately.
                    if shock.is_spike_up() {
                        self.on_shock(shock).await;
                    }
                }
            }
            EngineEvent::MarketTrade { token_id, price, size } => {
                let Some((condition_id, _)) = self.market_side_for_token(&token_id) else {
                    return;
                };
                if let Some(store) = &self.store {
                    if let Err(e) = store
                        .record_monitor_trade(&condition_id, &token_id, price, size)
                        .await
                    {
                        debug!(error = %e, "monitor-trade persistence failed");
                    }
                }
            }
            EngineEvent::User(user_event) => self.apply_user_event(&user_event).await,
            EngineEvent::BookStale { token_id, silent_secs } => {
                debug!(%token_id, silent_secs, "book stale");
            }
            EngineEvent::FeedDown { reason } => {
                warn!(%reason, "feed down, waiting for reconnect");
            }
            EngineEvent::Heartbeat { .. } => {
                self.heartbeats += 1;
                if self.heartbeats % GAME_POLL_EVERY == 0 {
                    self.poll_games().await;
                }
                if self.heartbeats % RECONCILE_EVERY == 0 {
                    self.reconcile_open_orders().await;
                }
                self.check_fade_windows();
            }
        }
    }

    // =========================================================================
    // Shock entry
    // =========================================================================

    async fn on_shock(&mut self, shock: Shock) {
        let Some(binding) = self.binding_for_token(&shock.token_id).cloned() else {
            return;
        };
        let Some(shocked_side) = binding.market.side_of(&shock.token_id) else { return };

        let active_games = self.active_game_count();
        let cycles_in_game = self.active_cycles_in_game(&binding.game_id);
        if let Err(tripped) = self.breakers.can_open(active_games, cycles_in_game) {
            info!(reason = %tripped, game = %binding.game_id, "shock skipped, breaker tripped");
            return;
        }

        let Some(league) = self.leagues.get(&binding.league).cloned() else {
            warn!(league = %binding.league, "no client for league");
            return;
        };

        info!(
            token = %shock.token_id,
            game = %binding.game_id,
            mid = %shock.mid,
            delta = %shock.delta,
            z = shock.z,
            "shock detected, classifying"
        );

        let (class, events_seen) = burst_classify(
            league.as_ref(),
            &binding.game_id,
            shock.at,
            self.cfg.burst_cutoff_ms,
        )
        .await;

        let cause = match class {
            ShockClass::SingleEvent(event) => event,
            other => {
                info!(class = ?other, "shock not tradeable");
                self.detector.mark_shock(&shock.token_id, shock.at);
                return;
            }
        };

        // The spiking side should be the team that scored; a mismatch
        // means the books and the feed disagree about the cause.
        if binding.event_side(&cause.team) != Some(shocked_side) {
            info!(team = %cause.team, "cause does not match the spiked side, skipping");
            self.detector.mark_shock(&shock.token_id, shock.at);
            return;
        }

        self.detector.mark_shock(&shock.token_id, shock.at);
        self.open_cycle(&binding, shocked_side, &shock, events_seen).await;
    }

    async fn open_cycle(
        &mut self,
        binding: &MarketBinding,
        shocked_side: MarketSide,
        shock: &Shock,
        events_seen: usize,
    ) {
        let market = &binding.market;
        let Some(shocked_token) = market.token_id(shocked_side).map(str::to_string) else { return };
        let Some(complement_token) =
            market.token_id(shocked_side.opposite()).map(str::to_string)
        else {
            return;
        };

        let prices = ladder_prices(
            shock.mid,
            self.cfg.ladder_levels,
            self.cfg.ladder_spacing_cents,
            self.cfg.price_ceiling,
            market.tick_size,
        );
        // The top of the ladder must clear the take-profit target; a
        // ceiling-squashed ladder with no room above is not worth a
        // cycle slot, and this check runs before any USDC moves.
        let clears_target = prices
            .last()
            .is_some_and(|top| *top - shock.mid >= cents(self.cfg.fade_target_cents));
        if !clears_target {
            info!(mid = %shock.mid, "ladder cannot clear the take-profit target, cycle skipped");
            return;
        }

        // Pre-split so every later exit is a sell (sells carry no fee).
        let presplit = self.cfg.presplit_usdc;
        let split_tx = match self
            .relayer
            .split(&market.condition_id, presplit, market.neg_risk)
            .await
        {
            Ok(receipt) => receipt.tx_hash,
            Err(e) => {
                warn!(error = %e, "pre-split failed, cycle abandoned");
                return;
            }
        };

        // A split books both sides at $0.50 apiece.
        let half = Decimal::new(50, 2);
        for side in MarketSide::both() {
            if let Err(e) = self.ledger.apply_fill(&market.condition_id, side, presplit, half) {
                warn!(error = %e, "split bookkeeping refused");
            }
        }
        if let Some(store) = &self.store {
            let snap = self.ledger.snapshot(&market.condition_id);
            for (side, pos) in [(MarketSide::Up, snap.up), (MarketSide::Down, snap.down)] {
                if let Err(e) = store
                    .record_position(&market.condition_id, &side.to_string(), pos.qty, pos.cost)
                    .await
                {
                    debug!(error = %e, "position persistence failed");
                }
            }
        }

        let mut cycle = Cycle::open(
            &market.condition_id,
            &binding.game_id,
            shocked_side,
            &shocked_token,
            &complement_token,
            presplit,
            split_tx,
            shock.mid,
        );

        // Snapshot the game's cumulative event count at open time so
        // only events AFTER this shock drive the exit logic; the feed
        // replays the full goal history on every poll and a stale goal
        // by the shocked side must not read as a fresh adverse event.
        let consumed = self
            .consumed_events
            .entry(binding.game_id.clone())
            .or_insert(0);
        *consumed = (*consumed).max(events_seen);

        let level_size = ladder_level_size(presplit, self.cfg.ladder_levels);
        let mut remaining = presplit;

        for price in prices {
            if remaining <= Decimal::ZERO {
                break;
            }
            let size = level_size.min(remaining);
            match self
                .executor
                .sell_gtc(&shocked_token, size, price, market.neg_risk, market.tick_size)
                .await
            {
                Ok(placed) => {
                    remaining -= size;
                    cycle.ladder_order_ids.push(placed.order_id.clone());
                    self.pending.insert(
                        placed.order_id.clone(),
                        PendingOrder::new(
                            &placed.order_id,
                            &shocked_token,
                            OrderSide::Sell,
                            placed.price,
                            size,
                            OrderType::Gtc,
                            OrderRole::Ladder,
                        ),
                    );
                }
                Err(e) => warn!(error = %e, %price, "ladder level placement failed"),
            }
        }

        info!(
            cycle = %cycle.id,
            game = %cycle.game_id,
            side = %shocked_side,
            levels = cycle.ladder_order_ids.len(),
            %presplit,
            "cycle opened"
        );
        self.cycles.insert(cycle.id, cycle);
    }

    // =========================================================================
    // Event-driven exits
    // =========================================================================

    async fn poll_games(&mut self) {
        let game_ids: Vec<(String, String)> = self
            .cycles
            .values()
            .filter(|c| c.is_active())
            .map(|c| (c.game_id.clone(), c.condition_id.clone()))
            .collect();

        for (game_id, condition_id) in dedup(game_ids) {
            let Some(binding) = self.bindings.get(&condition_id).cloned() else { continue };
            let Some(league) = self.leagues.get(&binding.league).cloned() else { continue };

            let events = match league.recent_events(&game_id).await {
                Ok(events) => events,
                Err(e) => {
                    debug!(error = %e, %game_id, "game poll failed");
                    continue;
                }
            };
            let games = league.live_games().await.unwrap_or_default();
            let state = games.into_iter().find(|g| g.game_id == game_id);

            self.drive_cycles_for_game(&game_id, &binding, &events, state.as_ref())
                .await;
        }
    }

    async fn drive_cycles_for_game(
        &mut self,
        game_id: &str,
        binding: &MarketBinding,
        events: &[ScoringEvent],
        game: Option<&GameState>,
    ) {
        let consumed = self.consumed_events.entry(game_id.to_string()).or_insert(0);
        let new_events: Vec<ScoringEvent> = events.iter().skip(*consumed).cloned().collect();
        *consumed = events.len();

        let cycle_ids: Vec<Uuid> = self
            .cycles
            .values()
            .filter(|c| c.is_active() && c.game_id == game_id)
            .map(|c| c.id)
            .collect();

        for id in cycle_ids {
            if let Some(game) = game {
                if game.decided {
                    self.settle_cycle(id, binding, game).await;
                    continue;
                }
            }

            let Some(cycle) = self.cycles.get(&id) else { continue };
            if !matches!(cycle.state, CycleState::LadderOpen) {
                continue;
            }

            let shocked_side = cycle.shocked_side;
            let adverse = new_events
                .iter()
                .any(|e| binding.event_side(&e.team) == Some(shocked_side));
            let favorable = new_events
                .iter()
                .any(|e| binding.event_side(&e.team) == Some(shocked_side.opposite()));

            if adverse {
                self.exit_adverse(id, binding).await;
            } else if favorable {
                // Reversion strengthened; the ladder stays.
                info!(cycle = %id, "favorable event, holding ladder");
            }
        }
    }

    /// Adverse event: the team behind the shock scored again. Cancel
    /// the ladder and sell the COMPLEMENT token at bid + 1 tick. The
    /// complement sell is used because the sports wire runs ~3 s
    /// behind the venue's price adjustment: the shocked token's book
    /// has already moved, the complement's bid has not fully.
    async fn exit_adverse(&mut self, cycle_id: Uuid, binding: &MarketBinding) {
        let Some(cycle) = self.cycles.get(&cycle_id) else { return };
        let ladder_ids = cycle.ladder_order_ids.clone();
        let complement_token = cycle.complement_token.clone();
        let presplit = cycle.presplit;

        for order_id in &ladder_ids {
            if self.executor.cancel_order(order_id).await.is_ok() {
                self.pending.remove(order_id);
            }
        }

        let bid = self.feed.best_bid(&complement_token);
        let tick = binding.market.tick_size;
        let price = if bid > Decimal::ZERO { bid + tick } else { cents(1) };

        match self
            .executor
            .sell_gtc(&complement_token, presplit, price, binding.market.neg_risk, tick)
            .await
        {
            Ok(placed) => {
                info!(cycle = %cycle_id, %price, "adverse exit: complement sell placed");
                self.pending.insert(
                    placed.order_id.clone(),
                    PendingOrder::new(
                        &placed.order_id,
                        &complement_token,
                        OrderSide::Sell,
                        placed.price,
                        presplit,
                        OrderType::Gtc,
                        OrderRole::CancelReplace,
                    ),
                );
                if let Some(cycle) = self.cycles.get_mut(&cycle_id) {
                    cycle.exit_order_id = Some(placed.order_id);
                    cycle.state = CycleState::ExitingAdverse;
                }
            }
            Err(e) => warn!(error = %e, "adverse exit sell failed"),
        }
    }

    /// Settlement: winning-side shares are worth $1.00, losing side $0.
    async fn settle_cycle(&mut self, cycle_id: Uuid, binding: &MarketBinding, game: &GameState) {
        let Some(cycle) = self.cycles.get(&cycle_id) else { return };
        let market = &binding.market;

        let winner_side = binding.leading_side(game);

        let outcome_index = winner_side.index();
        let snap = self.ledger.snapshot(&market.condition_id);
        let winning_qty = match winner_side {
            MarketSide::Up => snap.up.qty,
            MarketSide::Down => snap.down.qty,
        };

        // Redeem at most once per (condition, outcome) for the process
        // lifetime; a repeat on restart maps to ALREADY_REDEEMED.
        if winning_qty > Decimal::ZERO
            && self.ledger.try_begin_redeem(&market.condition_id, outcome_index)
        {
            if let Some(store) = &self.store {
                if let Err(e) = store
                    .record_redemption_attempt(&market.condition_id, outcome_index)
                    .await
                {
                    debug!(error = %e, "redemption-attempt persistence failed");
                }
            }
            match self
                .relayer
                .redeem(&market.condition_id, outcome_index, market.neg_risk, Some(winning_qty))
                .await
            {
                Ok(_) => {
                    match self.ledger.record_redeem(
                        &market.condition_id,
                        winner_side,
                        winning_qty,
                        winning_qty,
                    ) {
                        Ok(pnl) => info!(cycle = %cycle_id, %pnl, "settlement redeemed"),
                        Err(e) => warn!(error = %e, "redeem bookkeeping refused"),
                    }
                }
                Err(e) => warn!(error = %e, "redeem failed"),
            }
        }

        let held_won = cycle.shocked_side != winner_side;
        let outcome = match cycle.state {
            CycleState::ExitingAdverse => CycleOutcome::Lost,
            _ if held_won => CycleOutcome::Won,
            _ => CycleOutcome::Held,
        };
        self.close_cycle(cycle_id, outcome).await;
    }

    fn check_fade_windows(&mut self) {
        let now = Utc::now();
        let fade_window = self.cfg.fade_window_ms;
        for cycle in self.cycles.values_mut() {
            if matches!(cycle.state, CycleState::LadderOpen) && cycle.fade_expired(now, fade_window)
            {
                info!(cycle = %cycle.id, "fade window expired, holding to resolution");
                cycle.state = CycleState::Holding;
            }
        }
    }

    /// Closes a cycle: merge remaining pair inventory back to USDC
    /// (with the per-market cooldown) and free the game slot.
    async fn close_cycle(&mut self, cycle_id: Uuid, outcome: CycleOutcome) {
        let Some(cycle) = self.cycles.get(&cycle_id) else { return };
        let condition_id = cycle.condition_id.clone();
        let neg_risk = self
            .bindings
            .get(&condition_id)
            .map(|b| b.market.neg_risk)
            .unwrap_or(true);

        let snap = self.ledger.snapshot(&condition_id);
        let pairs = snap.hedged_pairs.floor();
        let mut merge_tx = None;
        if pairs > Decimal::ZERO
            && self
                .ledger
                .try_begin_merge(&condition_id, Utc::now(), self.cfg.merge_cooldown_secs)
        {
            match self.relayer.merge(&condition_id, pairs, neg_risk).await {
                Ok(receipt) => {
                    merge_tx = receipt.tx_hash.clone();
                    if let Err(e) = self.ledger.record_merge(&condition_id, pairs) {
                        warn!(error = %e, "merge bookkeeping refused");
                    }
                }
                // No ledger deduction until a merge succeeds; the
                // shares stay queued for the next attempt.
                Err(e) => warn!(error = %e, "post-cycle merge failed, queued for retry"),
            }
        }

        let Some(cycle) = self.cycles.get_mut(&cycle_id) else { return };
        cycle.merge_tx = merge_tx;
        let pnl = cycle.realized - cycle.presplit
            + self.ledger.counters(&condition_id).profit_locked;
        cycle.close(outcome);
        self.breakers.record_cycle(pnl);

        info!(
            cycle = %cycle_id,
            ?outcome,
            %pnl,
            session_pnl = %self.breakers.session_pnl(),
            "cycle closed"
        );

        if let Some(store) = &self.store {
            let row = TradeRow {
                market: condition_id.clone(),
                strategy: "shockfade".to_string(),
                kind: "cycle".to_string(),
                pnl,
                detail: format!("{outcome:?}"),
                at: Utc::now(),
            };
            if let Err(e) = store.record_trade(&row).await {
                debug!(error = %e, "trade persistence failed");
            }
            let post = self.ledger.snapshot(&condition_id);
            for (side, pos) in [(MarketSide::Up, post.up), (MarketSide::Down, post.down)] {
                if let Err(e) = store
                    .record_position(&condition_id, &side.to_string(), pos.qty, pos.cost)
                    .await
                {
                    debug!(error = %e, "position persistence failed");
                }
            }
        }
    }

    /// Reconciles the pending map against REST open-order state; fills
    /// missed during a user-channel gap surface here as vanished
    /// orders.
    async fn reconcile_open_orders(&mut self) {
        let open = match self.executor.get_open_orders(None).await {
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
            let keep =
                open_ids.contains(id.as_str()) || now - order.created_at < grace;
            if !keep {
                warn!(order_id = %id, "pending order vanished from the book, dropping");
            }
            keep
        });
    }

    // =========================================================================
    // Fill routing
    // =========================================================================

    async fn apply_user_event(&mut self, event: &UserEvent) {
        let Some(pending) = self.pending.get_mut(&event.order_id) else {
            debug!(order_id = %event.order_id, "event for unknown order, skipping");
            return;
        };

        if event.kind == UserEventKind::Order {
            if event.status.is_terminal() {
                self.pending.remove(&event.order_id);
            }
            return;
        }

        pending.filled += event.size;
        let done = pending.is_substantially_filled();
        let role = pending.role;
        let token = pending.token_id.clone();
        if done {
            self.pending.remove(&event.order_id);
        }

        let Some((condition_id, side)) = self.market_side_for_token(&token) else { return };
        match self.ledger.apply_sell(&condition_id, side, event.size, event.price) {
            Ok(pnl) => debug!(order_id = %event.order_id, %pnl, "sell fill applied"),
            Err(e) => {
                warn!(error = %e, order_id = %event.order_id, "fill refused by ledger, skipping");
                return;
            }
        }

        if let Some(store) = &self.store {
            let row = FillRow {
                market: condition_id.clone(),
                order_id: event.order_id.clone(),
                side: event.side.to_string(),
                size: event.size,
                price: event.price,
                at: event.timestamp,
            };
            if let Err(e) = store.record_fill(&row).await {
                debug!(error = %e, "fill persistence failed");
            }
            let snap = self.ledger.snapshot(&condition_id);
            let pos = match side {
                MarketSide::Up => snap.up,
                MarketSide::Down => snap.down,
            };
            if let Err(e) = store
                .record_position(&condition_id, &side.to_string(), pos.qty, pos.cost)
                .await
            {
                debug!(error = %e, "position persistence failed");
            }
        }

        // Credit the owning cycle.
        let proceeds = event.size * event.price;
        for cycle in self.cycles.values_mut() {
            let owns = cycle.ladder_order_ids.contains(&event.order_id)
                || cycle.exit_order_id.as_deref() == Some(event.order_id.as_str());
            if owns {
                cycle.realized += proceeds;
                if role == OrderRole::CancelReplace && done {
                    // The exposure is flat once the complement sell
                    // completes; settlement will confirm the loss.
                    info!(cycle = %cycle.id, "adverse exit filled");
                }
                break;
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn binding_for_token(&self, token_id: &str) -> Option<&MarketBinding> {
        self.bindings
            .values()
            .find(|b| b.market.side_of(token_id).is_some())
    }

    fn market_side_for_token(&self, token_id: &str) -> Option<(String, MarketSide)> {
        self.bindings.values().find_map(|b| {
            b.market
                .side_of(token_id)
                .map(|side| (b.market.condition_id.clone(), side))
        })
    }

    fn active_game_count(&self) -> usize {
        let mut games: Vec<&str> = self
            .cycles
            .values()
            .filter(|c| c.is_active())
            .map(|c| c.game_id.as_str())
            .collect();
        games.sort_unstable();
        games.dedup();
        games.len()
    }

    fn active_cycles_in_game(&self, game_id: &str) -> usize {
        self.cycles
            .values()
            .filter(|c| c.is_active() && c.game_id == game_id)
            .count()
    }
}

/// Maps a scoring team to the market side whose outcome names it.
/// Outcome names are team names (or abbreviations); match is
/// case-insensitive containment either way.
#[must_use]
pub fn side_for_team(market: &Market, team: &str) -> Option<MarketSide> {
    let team_lower = team.to_lowercase();
    for side in MarketSide::both() {
        if let Some(outcome) = market.outcomes.get(side.index()) {
            let name = outcome.name.to_lowercase();
            if name == team_lower || name.contains(&team_lower) || team_lower.contains(&name) {
                return Some(side);
            }
        }
    }
    None
}

fn dedup(mut pairs: Vec<(String, String)>) -> Vec<(String, String)> {
    pairs.sort();
    pairs.dedup();
    pairs
}
