//! Circuit breakers for cycle entry.
//!
//! New cycles pause when losses stack up or concurrency fills; open
//! cycles are never interrupted by a breaker.

use rust_decimal::Decimal;
use splitflip_core::config::ShockFadeConfig;
use thiserror::Error;

/// Why a new cycle was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerTripped {
    #[error("{0} consecutive losses")]
    ConsecutiveLosses(u32),

    #[error("session loss ${0} at limit")]
    SessionLoss(Decimal),

    #[error("{0} concurrent games at limit")]
    ConcurrentGames(usize),

    #[error("{0} active cycles in game at limit")]
    CyclesPerGame(usize),
}

/// Session-wide loss and concurrency tracking.
#[derive(Debug)]
pub struct CircuitBreakers {
    max_consecutive_losses: u32,
    session_loss_limit: Decimal,
    max_games: usize,
    /// CONCURRENT active cycles per game, not total.
    max_active_cycles_per_game: usize,
    consecutive_losses: u32,
    session_pnl: Decimal,
}

impl CircuitBreakers {
    #[must_use]
    pub fn new(cfg: &ShockFadeConfig) -> Self {
        Self {
            max_consecutive_losses: cfg.max_consecutive_losses,
            session_loss_limit: cfg.session_loss_limit_usdc,
            max_games: cfg.max_games,
            max_active_cycles_per_game: cfg.max_active_cycles_per_game,
            consecutive_losses: 0,
            session_pnl: Decimal::ZERO,
        }
    }

    /// Applies a reloaded config to the limits. Running tallies are
    /// kept; limits apply to new cycles only.
    pub fn reconfigure(&mut self, cfg: &ShockFadeConfig) {
        self.max_consecutive_losses = cfg.max_consecutive_losses;
        self.session_loss_limit = cfg.session_loss_limit_usdc;
        self.max_games = cfg.max_games;
        self.max_active_cycles_per_game = cfg.max_active_cycles_per_game;
    }

    /// Checks whether a new cycle may open.
    ///
    /// # Errors
    ///
    /// Returns the first tripped breaker.
    pub fn can_open(
        &self,
        active_games: usize,
        active_cycles_in_game: usize,
    ) -> Result<(), BreakerTripped> {
        if self.consecutive_losses >= self.max_consecutive_losses {
            return Err(BreakerTripped::ConsecutiveLosses(self.consecutive_losses));
        }
        if self.session_pnl <= -self.session_loss_limit {
            return Err(BreakerTripped::SessionLoss(-self.session_pnl));
        }
        if active_games >= self.max_games {
            return Err(BreakerTripped::ConcurrentGames(active_games));
        }
        if active_cycles_in_game >= self.max_active_cycles_per_game {
            return Err(BreakerTripped::CyclesPerGame(active_cycles_in_game));
        }
        Ok(())
    }

    /// Records a closed cycle's PnL.
    pub fn record_cycle(&mut self, pnl: Decimal) {
        self.session_pnl += pnl;
        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }

    #[must_use]
    pub fn session_pnl(&self) -> Decimal {
        self.session_pnl
    }

    #[must_use]
    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }
}
