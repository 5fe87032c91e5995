mod commands;
mod context;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "splitflip")]
#[command(about = "Binary-market trading engine for Polymarket", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "Config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the 15-minute Up/Down arbitrage strategy
    RunUpdown,
    /// Run the sports shock-fade strategy
    RunShockfade,
    /// Sign contract approvals so the exchange can move collateral
    Init,
    /// Show balance and position breakdown
    Aum,
    /// Show strategy status and recent trades
    Status,
    /// List open orders
    Openorders {
        /// Restrict to one market condition ID
        #[arg(long)]
        market: Option<String>,
    },
    /// Merge hedged pairs back to USDC
    Merge {
        /// Market condition ID
        #[arg(long)]
        market: String,
        /// Pairs to merge (defaults to every hedged pair)
        #[arg(long)]
        shares: Option<rust_decimal::Decimal>,
    },
    /// Sell held shares of a token at the bid
    Sell {
        /// Token ID to sell
        #[arg(long)]
        token: String,
        /// Shares to sell (defaults to the full position)
        #[arg(long)]
        shares: Option<rust_decimal::Decimal>,
    },
    /// Redeem winning shares on resolved markets
    Redeem {
        /// Market condition ID (defaults to every redeemable position)
        #[arg(long)]
        market: Option<String>,
    },
    /// Halt the strategy, merge pairs, sell remainders, report USDC
    EmergencyStop {
        /// Market slug, or "all"
        #[arg(long)]
        market: String,
        /// Report what would happen without touching anything
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunUpdown => commands::run::updown(&cli.config).await,
        Commands::RunShockfade => commands::run::shockfade(&cli.config).await,
        Commands::Init => commands::cleanup::init(&cli.config).await,
        Commands::Aum => commands::report::aum(&cli.config).await,
        Commands::Status => commands::report::status(&cli.config).await,
        Commands::Openorders { market } => {
            commands::report::open_orders(&cli.config, market.as_deref()).await
        }
        Commands::Merge { market, shares } => {
            commands::cleanup::merge(&cli.config, &market, shares).await
        }
        Commands::Sell { token, shares } => {
            commands::cleanup::sell(&cli.config, &token, shares).await
        }
        Commands::Redeem { market } => {
            commands::cleanup::redeem(&cli.config, market.as_deref()).await
        }
        Commands::EmergencyStop { market, dry_run, force } => {
            commands::cleanup::emergency_stop(&cli.config, &market, dry_run, force).await
        }
    }
}
