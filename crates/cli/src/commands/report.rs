//! Reporting verbs: aum, status, openorders.

use anyhow::Result;
use rust_decimal::Decimal;
use splitflip_data::Store;

use crate::context::Context;

/// Shows USDC balance plus the position breakdown from the Data API.
pub async fn aum(config_path: &str) -> Result<()> {
    let ctx = Context::build(config_path).await?;

    let balance = ctx.executor.get_balance().await?;
    let positions = ctx.executor.get_positions().await?;

    println!("wallet    {}", ctx.wallet.funder());
    println!("balance   ${balance:.2}");
    println!();

    let mut position_value = Decimal::ZERO;
    if positions.is_empty() {
        println!("no open positions");
    } else {
        println!("{:<44} {:>10} {:>8} {:>8}  outcome", "market", "size", "avg", "cur");
        for p in &positions {
            let size: Decimal = p.size.parse().unwrap_or(Decimal::ZERO);
            let cur: Decimal = p.cur_price.parse().unwrap_or(Decimal::ZERO);
            position_value += size * cur;
            println!(
                "{:<44} {:>10} {:>8} {:>8}  {}{}",
                truncate(&p.slug, 44),
                p.size,
                p.avg_price,
                p.cur_price,
                p.outcome,
                if p.redeemable { " (redeemable)" } else { "" },
            );
        }
    }
    println!();
    println!("positions ${position_value:.2}");
    println!("total     ${:.2}", balance + position_value);
    Ok(())
}

/// Shows recent trades and cumulative realized PnL from the store.
pub async fn status(config_path: &str) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    let store = Store::open(&ctx.config.database.url).await?;

    let total = store.total_pnl().await?;
    let recent = store.recent_trades(20).await?;

    println!("realized pnl  ${total:.2}");
    println!();
    if recent.is_empty() {
        println!("no recorded trades");
        return Ok(());
    }
    println!("{:<20} {:<10} {:<14} {:>10}  market", "time", "strategy", "kind", "pnl");
    for trade in recent {
        println!(
            "{:<20} {:<10} {:<14} {:>10}  {}",
            trade.at.format("%Y-%m-%d %H:%M:%S"),
            trade.strategy,
            trade.kind,
            format!("${:.2}", trade.pnl),
            truncate(&trade.market, 20),
        );
    }
    Ok(())
}

/// Lists open orders, optionally scoped to one market.
pub async fn open_orders(config_path: &str, market: Option<&str>) -> Result<()> {
    let ctx = Context::build(config_path).await?;
    let orders = ctx.executor.get_open_orders(market).await?;

    if orders.is_empty() {
        println!("no open orders");
        return Ok(());
    }
    println!("{:<20} {:<6} {:>8} {:>10} {:>10}  token", "order", "side", "price", "size", "matched");
    for order in orders {
        println!(
            "{:<20} {:<6} {:>8} {:>10} {:>10}  {}",
            truncate(&order.id, 20),
            order.side,
            order.price,
            order.original_size,
            order.size_matched,
            truncate(&order.asset_id, 20),
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
