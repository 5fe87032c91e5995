//! 15-minute Up/Down binary arbitrage strategy.
//!
//! Acquire matched Up+Down share pairs at a combined realized cost
//! below $1.00; the $1.00 settlement (or an early merge) locks the
//! difference. Four modes with strict priority do the work:
//!
//! - [`modes::Mode::ProfitLock`]: take the deficit side and merge now
//! - [`modes::Mode::Balancing`]: micro trigger-hedge rebalancing
//! - [`modes::Mode::PairImprovement`]: dilute an over-$1 pair cost
//! - [`modes::Mode::Normal`]: bilateral multi-level accumulation

pub mod balancing;
pub mod engine;
pub mod improve;
pub mod modes;
pub mod normal;
pub mod sizing;
pub mod threshold;
pub mod vol;

pub use balancing::{BalancingPlan, PlanAbort, ProportionalHedger};
pub use engine::{spawn_heartbeat, UpdownEngine};
pub use modes::{arbitrate, Mode, TickView};
pub use threshold::dynamic_imbalance_threshold;
