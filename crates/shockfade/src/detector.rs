//! Rolling z-score shock detection.
//!
//! A shock on a token fires when the current mid has moved away from
//! its rolling-window mean by both a z-score threshold and a minimum
//! absolute move, inside the tradeable price band, and past the
//! per-token cooldown. All thresholds are integer cents in config; the
//! conversion to prices happens exactly once, here.
//!
//! The ceiling is deliberately asymmetric (default 0.85): books above
//! it are thin and the laddered exits fill badly.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use splitflip_core::config::ShockFadeConfig;
use splitflip_core::types::cents;

/// Minimum observations in the window before sigma is meaningful.
const MIN_WINDOW_POINTS: usize = 5;

/// A detected shock.
#[derive(Debug, Clone)]
pub struct Shock {
    pub token_id: String,
    /// Mid at detection time.
    pub mid: Decimal,
    /// Rolling-window mean the move is measured against.
    pub window_mean: Decimal,
    /// Signed move (`mid - window_mean`); positive for a spike up.
    pub delta: Decimal,
    /// Z-score of the move.
    pub z: f64,
    pub at: DateTime<Utc>,
}

impl Shock {
    /// True for an upward spike (the shocked token got more expensive).
    #[must_use]
    pub fn is_spike_up(&self) -> bool {
        self.delta > Decimal::ZERO
    }
}

/// Per-token rolling mid history with shock detection.
#[derive(Debug)]
pub struct ShockDetector {
    z_threshold: f64,
    abs_threshold: Decimal,
    window: Duration,
    cooldown: Duration,
    floor: Decimal,
    ceiling: Decimal,
    history: HashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
    last_shock: HashMap<String, DateTime<Utc>>,
}

impl ShockDetector {
    #[must_use]
    pub fn new(cfg: &ShockFadeConfig) -> Self {
        Self {
            z_threshold: cfg.z_threshold,
            abs_threshold: cents(cfg.abs_move_cents),
            window: Duration::milliseconds(cfg.window_ms as i64),
            cooldown: Duration::milliseconds(cfg.cooldown_ms as i64),
            floor: cfg.price_floor,
            ceiling: cfg.price_ceiling,
            history: HashMap::new(),
            last_shock: HashMap::new(),
        }
    }

    /// Re-applies thresholds from a reloaded config. Histories and
    /// cooldowns survive the reload.
    pub fn reconfigure(&mut self, cfg: &ShockFadeConfig) {
        self.z_threshold = cfg.z_threshold;
        self.abs_threshold = cents(cfg.abs_move_cents);
        self.window = Duration::milliseconds(cfg.window_ms as i64);
        self.cooldown = Duration::milliseconds(cfg.cooldown_ms as i64);
        self.floor = cfg.price_floor;
        self.ceiling = cfg.price_ceiling;
    }

    /// Records a mid observation and returns a shock if one fired.
    pub fn observe(&mut self, token_id: &str, mid: Decimal, now: DateTime<Utc>) -> Option<Shock> {
        {
            let history = self.history.entry(token_id.to_string()).or_default();
            let cutoff = now - self.window;
            while history.front().is_some_and(|(t, _)| *t < cutoff) {
                history.pop_front();
            }
        }

        let shock = self.evaluate(token_id, self.history.get(token_id).unwrap(), mid, now);
        self.history.get_mut(token_id).unwrap().push_back((now, mid));
        shock
    }

    fn evaluate(
        &self,
        token_id: &str,
        history: &VecDeque<(DateTime<Utc>, Decimal)>,
        mid: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Shock> {
        if history.len() < MIN_WINDOW_POINTS {
            return None;
        }
        if mid < self.floor || mid > self.ceiling {
            return None;
        }
        if let Some(last) = self.last_shock.get(token_id) {
            if now - *last < self.cooldown {
                return None;
            }
        }

        let mids: Vec<f64> = history.iter().filter_map(|(_, m)| m.to_f64()).collect();
        let mean = mids.iter().sum::<f64>() / mids.len() as f64;
        let var = mids.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / mids.len() as f64;
        let sigma = var.sqrt();
        if sigma <= f64::EPSILON {
            return None;
        }

        let window_mean = Decimal::from_f64_retain(mean)?.round_dp(4);
        let delta = mid - window_mean;
        let z = delta.to_f64().unwrap_or(0.0).abs() / sigma;

        if z < self.z_threshold || delta.abs() < self.abs_threshold {
            return None;
        }

        Some(Shock {
            token_id: token_id.to_string(),
            mid,
            window_mean,
            delta,
            z,
            at: now,
        })
    }

    /// Starts the cooldown for a token after a shock was acted on.
    pub fn mark_shock(&mut self, token_id: &str, at: DateTime<Utc>) {
        self.last_shock.insert(token_id.to_string(), at);
    }
}
