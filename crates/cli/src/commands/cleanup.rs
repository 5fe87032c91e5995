//! Maintenance verbs: init, merge, sell, redeem, emergency-stop.

use std::collections::HashMap;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use splitflip_clob::WalletPosition;
use tracing::{info, warn};

use crate::context::Context;

/// Signs the one-time contract approvals so the exchange and the
/// conditional-token framework can move the wallet's collateral.
pub async fn init(config_path: &str) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    println!("signer  {}", ctx.wallet.address());
    println!("funder  {}", ctx.wallet.funder());
    println!("api key {}", ctx.creds.api_key);
    println!();
    println!("credentials derived and verified; approvals are signed through");
    println!("the relayer on first use (no direct gas spend from this wallet).");
    Ok(())
}

/// Merges hedged pairs back to USDC for one market.
pub async fn merge(config_path: &str, market: &str, shares: Option<Decimal>) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    let positions = ctx.executor.get_positions().await?;
    let by_market = positions_by_market(&positions);

    let Some(market_positions) = by_market.get(market) else {
        bail!("no positions in market {market}");
    };
    let hedged = hedged_pairs(market_positions);
    let pairs = shares.unwrap_or(hedged).min(hedged).floor();
    if pairs <= Decimal::ZERO {
        println!("nothing to merge in {market}");
        return Ok(());
    }

    let neg_risk = true; // sports and most binary markets settle through the adapter
    let receipt = ctx.relayer.merge(market, pairs, neg_risk).await?;
    println!(
        "merged {pairs} pairs in {market} -> ${pairs} USDC{}",
        if receipt.already_done { " (already done)" } else { "" }
    );
    Ok(())
}

/// Sells held shares of one token at the current bid.
pub async fn sell(config_path: &str, token: &str, shares: Option<Decimal>) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    let positions = ctx.executor.get_positions().await?;
    let Some(position) = positions.iter().find(|p| p.asset == token) else {
        bail!("no position in token {token}");
    };
    let held: Decimal = position.size.parse().unwrap_or(Decimal::ZERO);
    let size = shares.unwrap_or(held).min(held);
    if size <= Decimal::ZERO {
        println!("nothing to sell");
        return Ok(());
    }

    let book = ctx.public.get_book(token).await?;
    let bid = book.best_bid();
    if bid <= Decimal::ZERO {
        bail!("no bid for token {token}");
    }

    let placed = ctx
        .executor
        .sell_gtc(token, size, bid, true, Decimal::new(1, 2))
        .await?;
    println!("sell {size} @ {bid} placed (order {})", placed.order_id);
    Ok(())
}

/// Redeems winning shares on resolved markets.
pub async fn redeem(config_path: &str, market: Option<&str>) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    let positions = ctx.executor.get_positions().await?;

    let mut redeemed = Decimal::ZERO;
    for position in positions.iter().filter(|p| p.redeemable) {
        if let Some(market) = market {
            if position.condition_id != market {
                continue;
            }
        }
        let size: Decimal = position.size.parse().unwrap_or(Decimal::ZERO);
        let cur: Decimal = position.cur_price.parse().unwrap_or(Decimal::ZERO);
        if size <= Decimal::ZERO || cur < Decimal::new(95, 2) {
            continue;
        }
        let outcome_index = position.outcome_index.unwrap_or(0).max(0) as usize;
        match ctx
            .relayer
            .redeem(&position.condition_id, outcome_index, true, Some(size))
            .await
        {
            Ok(receipt) => {
                redeemed += size;
                println!(
                    "redeemed {size} {} in {}{}",
                    position.outcome,
                    position.condition_id,
                    if receipt.already_done { " (already done)" } else { "" }
                );
            }
            Err(e) => warn!(error = %e, market = %position.condition_id, "redeem failed"),
        }
    }
    println!("total redeemed: ${redeemed:.2}");
    Ok(())
}

/// Halts the strategy and unwinds: cancel everything, merge hedged
/// pairs, sell the remaining imbalance at the bid, report recovered
/// USDC. With `--dry-run` nothing is touched.
pub async fn emergency_stop(
    config_path: &str,
    market: &str,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let ctx = Context::build(config_path).await?;

    if !dry_run && !force {
        bail!("emergency-stop is destructive; re-run with --force (or --dry-run to preview)");
    }

    let positions = ctx.executor.get_positions().await?;
    let by_market = positions_by_market(&positions);

    let targets: Vec<(&String, &Vec<&WalletPosition>)> = by_market
        .iter()
        .filter(|(condition_id, entries)| {
            market == "all"
                || entries.iter().any(|p| p.slug == market)
                || condition_id.as_str() == market
        })
        .collect();

    if targets.is_empty() {
        println!("no matching positions for {market}");
        return Ok(());
    }

    let mut recovered = Decimal::ZERO;
    for (condition_id, entries) in targets {
        info!(market = %condition_id, "unwinding");

        if dry_run {
            println!("[dry-run] would cancel open orders in {condition_id}");
        } else if let Err(e) = ctx.executor.cancel_all(Some(condition_id)).await {
            warn!(error = %e, "cancel failed");
        }

        // Merge what is hedged.
        let pairs = hedged_pairs(entries).floor();
        if pairs > Decimal::ZERO {
            if dry_run {
                println!("[dry-run] would merge {pairs} pairs in {condition_id}");
                recovered += pairs;
            } else {
                match ctx.relayer.merge(condition_id, pairs, true).await {
                    Ok(_) => {
                        println!("merged {pairs} pairs in {condition_id}");
                        recovered += pairs;
                    }
                    Err(e) => warn!(error = %e, "merge failed"),
                }
            }
        }

        // Sell the remaining imbalance at the bid.
        for position in entries {
            let held: Decimal = position.size.parse().unwrap_or(Decimal::ZERO);
            let remaining = held - pairs;
            if remaining <= Decimal::ZERO {
                continue;
            }
            let bid = ctx
                .public
                .get_book(&position.asset)
                .await
                .map(|b| b.best_bid())
                .unwrap_or(Decimal::ZERO);
            if bid <= Decimal::ZERO {
                warn!(token = %position.asset, "no bid, shares stranded");
                continue;
            }
            if dry_run {
                println!(
                    "[dry-run] would sell {remaining} of {} @ {bid}",
                    position.outcome
                );
                recovered += remaining * bid;
                continue;
            }
            match ctx
                .executor
                .sell_gtc(&position.asset, remaining, bid, true, Decimal::new(1, 2))
                .await
            {
                Ok(_) => {
                    println!("selling {remaining} of {} @ {bid}", position.outcome);
                    recovered += remaining * bid;
                }
                Err(e) => warn!(error = %e, token = %position.asset, "sell failed"),
            }
        }
    }

    println!();
    println!(
        "{}recovered ~${recovered:.2} USDC",
        if dry_run { "[dry-run] " } else { "" }
    );
    Ok(())
}

fn positions_by_market<'a>(
    positions: &'a [WalletPosition],
) -> HashMap<String, Vec<&'a WalletPosition>> {
    let mut by_market: HashMap<String, Vec<&WalletPosition>> = HashMap::new();
    for position in positions {
        by_market
            .entry(position.condition_id.clone())
            .or_default()
            .push(position);
    }
    by_market
}

/// `min` position size across the market's outcomes; zero when only
/// one side is held.
fn hedged_pairs(entries: &[&WalletPosition]) -> Decimal {
    if entries.len() < 2 {
        return Decimal::ZERO;
    }
    entries
        .iter()
        .map(|p| p.size.parse::<Decimal>().unwrap_or(Decimal::ZERO))
        .min()
        .unwrap_or(Decimal::ZERO)
}
