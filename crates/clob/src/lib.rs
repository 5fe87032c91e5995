//! Polymarket CLOB integration.
//!
//! Everything that touches the venue lives here:
//!
//! - [`book`]: L2 order book with snapshot + delta application
//! - [`market_ws`]: public market-channel WebSocket feed
//! - [`user_ws`]: authenticated user-channel fill feed
//! - [`wallet`]: signer identity (EOA or Gnosis-Safe proxy)
//! - [`eip712`]: CTF Exchange order signing
//! - [`auth`]: L1 credential derivation + L2 HMAC request headers
//! - [`client`]: public REST endpoints (book, midpoint, fee rate)
//! - [`gamma`]: market discovery against the catalog API
//! - [`executor`]: signed order placement, cancellation, rate limits
//! - [`relayer`]: gas-free split / merge / redeem

pub mod auth;
pub mod book;
pub mod client;
pub mod eip712;
pub mod executor;
pub mod gamma;
pub mod market_ws;
pub mod relayer;
pub mod user_ws;
pub mod wallet;

pub use auth::ApiCreds;
pub use book::L2OrderBook;
pub use client::PublicClient;
pub use executor::{ClobError, OrderExecutor, PlacedOrder, WalletPosition};
pub use gamma::GammaClient;
pub use market_ws::{MarketWsConfig, OrderBookFeed};
pub use relayer::{RelayerClient, RelayerError, TxReceipt};
pub use user_ws::{UserFillFeed, UserWsConfig};
pub use wallet::{SignatureKind, Wallet, WalletError};
