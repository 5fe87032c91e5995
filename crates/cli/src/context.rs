//! Shared process context: config, wallet, venue clients.
//!
//! Built once at startup and passed by reference; there is no other
//! global state in the process.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use splitflip_clob::auth::derive_api_creds;
use splitflip_clob::{
    ApiCreds, GammaClient, OrderExecutor, PublicClient, RelayerClient, Wallet,
};
use splitflip_core::config::{AppConfig, ConfigLoader};
use splitflip_sports::{EspnClient, LeagueClient, MlbClient, NbaClient, NhlClient};

/// Everything a command needs to talk to the venue.
pub struct Context {
    pub config: AppConfig,
    pub wallet: Arc<Wallet>,
    pub creds: ApiCreds,
    pub executor: Arc<OrderExecutor>,
    pub relayer: Arc<RelayerClient>,
    pub public: PublicClient,
    pub gamma: GammaClient,
}

impl Context {
    /// Loads config, derives credentials if none are configured, and
    /// builds the authenticated clients.
    pub async fn build(config_path: &str) -> Result<Self> {
        let config = ConfigLoader::load_from(config_path)
            .with_context(|| format!("loading {config_path}"))?;

        let wallet = Arc::new(
            Wallet::from_settings(&config.wallet, config.clob.chain_id)
                .context("building wallet")?,
        );

        // Credentials from the environment win; otherwise derive once
        // via the L1 flow and reuse for the process lifetime.
        let creds = match (
            config.wallet.api_key.clone(),
            config.wallet.api_secret.clone(),
            config.wallet.passphrase.clone(),
        ) {
            (Some(api_key), Some(api_secret), Some(passphrase)) => ApiCreds {
                api_key,
                api_secret,
                passphrase,
            },
            _ => {
                let http = reqwest::Client::new();
                derive_api_creds(&http, &config.clob.base_url, &wallet)
                    .await
                    .context("deriving API credentials")?
            }
        };

        let executor = Arc::new(OrderExecutor::new(
            &config.clob.base_url,
            Arc::clone(&wallet),
            creds.clone(),
        )?);
        let relayer = Arc::new(RelayerClient::new(
            &config.clob.relayer_url,
            Arc::clone(&wallet),
            creds.clone(),
        )?);
        let public = PublicClient::new().with_base_url(config.clob.base_url.clone());
        let gamma = GammaClient::new().with_base_url(config.clob.gamma_url.clone());

        Ok(Self {
            config,
            wallet,
            creds,
            executor,
            relayer,
            public,
            gamma,
        })
    }

    /// League clients for the configured leagues.
    #[must_use]
    pub fn league_clients(&self) -> HashMap<String, Arc<dyn LeagueClient>> {
        let mut clients: HashMap<String, Arc<dyn LeagueClient>> = HashMap::new();
        for league in &self.config.shockfade.leagues {
            let client: Arc<dyn LeagueClient> = match league.as_str() {
                "nhl" => Arc::new(NhlClient::new()),
                "nba" => Arc::new(NbaClient::new()),
                "mlb" => Arc::new(MlbClient::new()),
                "nfl" => Arc::new(EspnClient::new("football", "nfl")),
                other => Arc::new(EspnClient::new("soccer", other)),
            };
            clients.insert(league.clone(), client);
        }
        clients
    }
}
