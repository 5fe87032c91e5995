//! The two strategy processes.
//!
//! Each `run-*` verb is an independent process owning one event queue
//! and one ledger; the two strategies never share state at runtime.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use splitflip_clob::market_ws::MarketWsConfig;
use splitflip_clob::user_ws::UserWsConfig;
use splitflip_clob::{OrderBookFeed, UserFillFeed};
use splitflip_core::events::EngineEvent;
use splitflip_data::Store;
use splitflip_shockfade::{side_for_team, MarketBinding, ShockFadeEngine};
use splitflip_updown::{spawn_heartbeat, UpdownEngine};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::context::Context;

/// Queue depth for the strategy FIFO. Deep enough that multi-maker
/// bursts never block the feeds.
const QUEUE_DEPTH: usize = 4096;

/// Seconds per 15-minute window.
const WINDOW_SECS: u64 = 900;

/// Runs the Up/Down arbitrage strategy: one engine per coin per
/// window, forever.
pub async fn updown(config_path: &str) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    info!(funder = %ctx.wallet.funder(), "up/down strategy starting");

    let aum = match ctx.executor.get_balance().await {
        Ok(balance) => balance,
        Err(e) => {
            warn!(error = %e, "balance fetch failed, using zero AUM");
            rust_decimal::Decimal::ZERO
        }
    };

    let store = Arc::new(Store::open(&ctx.config.database.url).await?);

    let coins = ctx.config.updown.coins.clone();
    let mut handles = Vec::new();
    for coin in coins {
        let ctx_cfg = ctx.config.clone();
        let gamma = splitflip_clob::GammaClient::new()
            .with_base_url(ctx.config.clob.gamma_url.clone());
        let executor = ctx.executor.clone();
        let relayer = ctx.relayer.clone();
        let creds = ctx.creds.clone();
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            loop {
                let window = current_window();
                let market = match gamma.find_updown_market(&coin, window).await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(%coin, error = %e, "no market this window");
                        sleep_until_next_window().await;
                        continue;
                    }
                };
                info!(%coin, market = %market.slug, "window market found");

                let tokens: Vec<String> =
                    market.outcomes.iter().map(|o| o.token_id.clone()).collect();
                let (tx, rx) = mpsc::channel::<EngineEvent>(QUEUE_DEPTH);

                let feed = OrderBookFeed::connect(
                    tokens,
                    MarketWsConfig {
                        url: ctx_cfg.clob.ws_market_url.clone(),
                        stale_after: Duration::from_secs(ctx_cfg.clob.stale_book_secs),
                        ..MarketWsConfig::default()
                    },
                    tx.clone(),
                )
                .await;
                let user_feed = UserFillFeed::connect(
                    creds.clone(),
                    vec![market.condition_id.clone()],
                    UserWsConfig {
                        url: ctx_cfg.clob.ws_user_url.clone(),
                        ..UserWsConfig::default()
                    },
                    tx.clone(),
                );
                spawn_heartbeat(tx.clone(), Duration::from_secs(1));

                let window_start = chrono::DateTime::from_timestamp(window as i64, 0)
                    .unwrap_or_else(chrono::Utc::now);
                let mut engine = UpdownEngine::new(
                    ctx_cfg.updown.clone(),
                    market,
                    feed.clone(),
                    executor.clone(),
                    relayer.clone(),
                    aum,
                    window_start,
                )
                .with_store(Arc::clone(&store));

                let run = engine.run(rx);
                let window_end = sleep_until_next_window();
                tokio::select! {
                    result = run => {
                        if let Err(e) = result {
                            warn!(%coin, error = %e, "engine error");
                        }
                        // Halted early (market decided or exit rule);
                        // wait out the rest of the window.
                        sleep_until_next_window().await;
                    }
                    () = window_end => {}
                }

                let snap = engine.snapshot();
                info!(
                    %coin,
                    qty_up = %snap.up.qty,
                    qty_down = %snap.down.qty,
                    cost = %snap.total_cost,
                    locked = %snap.guaranteed_profit,
                    "window complete"
                );
                feed.shutdown().await;
                user_feed.shutdown().await;
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Runs the sports shock-fade strategy across the configured leagues.
pub async fn shockfade(config_path: &str) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    info!(funder = %ctx.wallet.funder(), "shock-fade strategy starting");

    let leagues = ctx.league_clients();

    // Bind sports markets to live games by matching outcome names
    // against the scoreboard.
    let mut bindings = Vec::new();
    for (league_name, client) in &leagues {
        let markets = match ctx.gamma.find_sports_markets(league_name).await {
            Ok(m) => m,
            Err(e) => {
                warn!(league = %league_name, error = %e, "market discovery failed");
                continue;
            }
        };
        let games = match client.live_games().await {
            Ok(g) => g,
            Err(e) => {
                warn!(league = %league_name, error = %e, "scoreboard fetch failed");
                continue;
            }
        };
        for market in markets {
            let bound = games.iter().find_map(|g| {
                let home_side = side_for_team(&market, &g.home_team)?;
                let away_side = side_for_team(&market, &g.away_team)?;
                (home_side != away_side).then_some((g, home_side))
            });
            if let Some((game, home_side)) = bound {
                info!(
                    market = %market.slug,
                    game = %game.game_id,
                    league = %league_name,
                    "market bound to live game"
                );
                bindings.push(MarketBinding {
                    market,
                    game_id: game.game_id.clone(),
                    league: league_name.clone(),
                    home_side,
                    home_team: game.home_team.clone(),
                    away_team: game.away_team.clone(),
                });
            }
        }
    }

    if bindings.is_empty() {
        warn!("no live games matched any market; exiting");
        return Ok(());
    }

    let tokens: Vec<String> = bindings
        .iter()
        .flat_map(|b| b.market.outcomes.iter().map(|o| o.token_id.clone()))
        .collect();
    let condition_ids: Vec<String> = bindings
        .iter()
        .map(|b| b.market.condition_id.clone())
        .collect();

    let (tx, rx) = mpsc::channel::<EngineEvent>(QUEUE_DEPTH);
    let feed = OrderBookFeed::connect(
        tokens,
        MarketWsConfig {
            url: ctx.config.clob.ws_market_url.clone(),
            stale_after: Duration::from_secs(ctx.config.clob.stale_book_secs),
            ..MarketWsConfig::default()
        },
        tx.clone(),
    )
    .await;
    let _user_feed = UserFillFeed::connect(
        ctx.creds.clone(),
        condition_ids,
        UserWsConfig {
            url: ctx.config.clob.ws_user_url.clone(),
            ..UserWsConfig::default()
        },
        tx.clone(),
    );
    spawn_heartbeat(tx, Duration::from_secs(1));

    let store = Arc::new(Store::open(&ctx.config.database.url).await?);
    let mut engine = ShockFadeEngine::new(
        ctx.config.shockfade.clone(),
        config_path,
        bindings,
        feed,
        ctx.executor.clone(),
        ctx.relayer.clone(),
        leagues,
    )
    .with_store(store);
    engine.run(rx).await
}

fn current_window() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (now / WINDOW_SECS) * WINDOW_SECS
}

async fn sleep_until_next_window() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let next = (now / WINDOW_SECS + 1) * WINDOW_SECS;
    tokio::time::sleep(Duration::from_secs(next.saturating_sub(now).max(1))).await;
}
