pub mod config;
pub mod events;
pub mod types;

pub use config::{
    AppConfig, AuthMode, ClobConfig, ConfigLoader, DatabaseConfig, ShockFadeConfig, UpdownConfig,
    WalletSettings,
};
pub use events::{EngineEvent, OrderStatus, UserEvent, UserEventKind};
pub use types::{
    cents, clamp_to_book, round_to_tick, Market, MarketSide, OrderRole, OrderSide, OrderType,
    Outcome, PendingOrder,
};
