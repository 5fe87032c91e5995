//! Application configuration.
//!
//! Layered with figment: `Config.toml` first, then `SPLITFLIP_*`
//! environment variables on top. Secrets (private key, relayer
//! credentials) are only ever read from the environment.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wallet authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The signer address is also the funder.
    Eoa,
    /// The signer signs for a Gnosis-Safe funder address.
    Proxy,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::Eoa
    }
}

/// Signer identity and venue credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalletSettings {
    /// Hex private key of the signer. Environment only.
    #[serde(default)]
    pub private_key: String,
    /// Safe funder address; required in proxy mode.
    #[serde(default)]
    pub funder: Option<String>,
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Builder API credentials for the relayer, derived once via the
    /// L1 auth flow if absent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Venue endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClobConfig {
    pub base_url: String,
    pub gamma_url: String,
    pub ws_market_url: String,
    pub ws_user_url: String,
    pub relayer_url: String,
    pub chain_id: u64,
    /// Seconds without any book message before a token is reported stale.
    pub stale_book_secs: u64,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            base_url: "https://clob.polymarket.com".to_string(),
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            ws_market_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            ws_user_url: "wss://ws-subscriptions-clob.polymarket.com/ws/user".to_string(),
            relayer_url: "https://relayer-v2.polymarket.com".to_string(),
            chain_id: 137,
            stale_book_secs: 30,
        }
    }
}

/// Parameters of the 15-minute Up/Down arbitrage strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdownConfig {
    /// Coins whose 15-minute series are traded.
    pub coins: Vec<String>,
    /// Fraction of AUM committed per market window.
    pub budget_pct: Decimal,
    /// Trade count the base order size is derived from.
    pub target_trades: u32,
    /// Pair cost targeted while balancing.
    pub pair_cost_target: Decimal,
    /// Minute of the window after which no new orders are placed when
    /// the position is profitable.
    pub stop_minute: u32,
    /// Capital-used fraction past which no new orders are placed when
    /// the position is profitable.
    pub max_capital_pct: Decimal,
    /// Avellaneda risk aversion for the reservation price.
    pub risk_aversion: f64,
    /// Rolling tick-volatility window length.
    pub vol_window_ticks: usize,
}

impl Default for UpdownConfig {
    fn default() -> Self {
        Self {
            coins: vec!["btc".into(), "eth".into(), "sol".into(), "xrp".into()],
            budget_pct: Decimal::new(25, 2),
            target_trades: 25,
            pair_cost_target: Decimal::new(99, 2),
            stop_minute: 12,
            max_capital_pct: Decimal::new(80, 2),
            risk_aversion: 0.1,
            vol_window_ticks: 60,
        }
    }
}

/// Parameters of the sports shock-fade strategy.
///
/// Spacing and take-profit are integer cents; a single unit avoids the
/// decimal-vs-cents mismatch that bit an earlier iteration of the
/// ladder math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShockFadeConfig {
    /// USDC split per cycle entry.
    pub presplit_usdc: Decimal,
    /// Z-score a mid move must exceed within the window.
    pub z_threshold: f64,
    /// Minimum absolute mid move, in cents.
    pub abs_move_cents: i64,
    /// Rolling window for mid history.
    pub window_ms: u64,
    /// Minimum spacing between shocks on the same token.
    pub cooldown_ms: u64,
    /// No shock entries below this mid.
    pub price_floor: Decimal,
    /// No shock entries above this mid; thin books above it fill badly.
    pub price_ceiling: Decimal,
    /// Number of laddered exit sells.
    pub ladder_levels: u32,
    /// Spacing between ladder levels, in cents.
    pub ladder_spacing_cents: i64,
    /// Take-profit offset, in cents.
    pub fade_target_cents: i64,
    /// How long a cycle waits for reversion before holding to resolution.
    pub fade_window_ms: u64,
    /// Burst-poll budget for classifying a shock against league events.
    pub burst_cutoff_ms: u64,
    /// Leagues polled for classification.
    pub leagues: Vec<String>,
    pub max_games: usize,
    /// Concurrent ACTIVE cycles per game, not total cycles.
    pub max_active_cycles_per_game: usize,
    pub max_consecutive_losses: u32,
    pub session_loss_limit_usdc: Decimal,
    /// Cooldown between merge attempts per market.
    pub merge_cooldown_secs: u64,
}

impl Default for ShockFadeConfig {
    fn default() -> Self {
        Self {
            presplit_usdc: Decimal::from(85),
            z_threshold: 2.5,
            abs_move_cents: 4,
            window_ms: 60_000,
            cooldown_ms: 45_000,
            price_floor: Decimal::new(7, 2),
            price_ceiling: Decimal::new(85, 2),
            ladder_levels: 3,
            ladder_spacing_cents: 3,
            fade_target_cents: 4,
            fade_window_ms: 600_000,
            burst_cutoff_ms: 10_000,
            leagues: vec!["nhl".into(), "nba".into(), "mlb".into(), "nfl".into()],
            max_games: 2,
            max_active_cycles_per_game: 2,
            max_consecutive_losses: 3,
            session_loss_limit_usdc: Decimal::from(30),
            merge_cooldown_secs: 300,
        }
    }
}

/// Embedded store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://splitflip.db".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub wallet: WalletSettings,
    #[serde(default)]
    pub clob: ClobConfig,
    #[serde(default)]
    pub updown: UpdownConfig,
    #[serde(default)]
    pub shockfade: ShockFadeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `Config.toml` merged with `SPLITFLIP_*`
    /// environment variables (env wins).
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("Config.toml")
    }

    /// Loads configuration from an explicit TOML path. Used by the
    /// shock-fade SIGHUP reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or environment cannot be parsed.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SPLITFLIP_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_are_complete() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.clob.chain_id, 137);
        assert_eq!(cfg.updown.pair_cost_target, dec!(0.99));
        assert_eq!(cfg.shockfade.ladder_levels, 3);
        assert_eq!(cfg.shockfade.ladder_spacing_cents, 3);
        assert_eq!(cfg.shockfade.max_active_cycles_per_game, 2);
        assert_eq!(cfg.wallet.auth_mode, AuthMode::Eoa);
    }

    #[test]
    fn shock_fade_units_are_cents() {
        let cfg = ShockFadeConfig::default();
        // Integer cents, not decimals; the detector converts once.
        assert_eq!(cfg.abs_move_cents, 4);
        assert_eq!(cfg.fade_target_cents, 4);
        assert!(cfg.price_ceiling < Decimal::ONE);
    }

    #[test]
    fn auth_mode_deserializes_lowercase() {
        let m: AuthMode = serde_json::from_str("\"proxy\"").unwrap();
        assert_eq!(m, AuthMode::Proxy);
        let m: AuthMode = serde_json::from_str("\"eoa\"").unwrap();
        assert_eq!(m, AuthMode::Eoa);
    }
}
