//! Six-dimensional fun scores with per-key diminishing returns.
//!
//! Repeating the same rewarded activity inside one decay window pays
//! `base * decay_base^(n-1)` for the n-th repetition, rounded, so the
//! third trade in a window earns about half of the first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use voxelcraft_types::FunDim;

/// Default decay window when the configured one is zero.
pub const DEFAULT_DECAY_WINDOW_TICKS: u64 = 3000;

/// Default decay base when the configured one is outside `(0, 1]`.
pub const DEFAULT_DECAY_BASE: f64 = 0.70;

/// Accumulated fun per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunScore {
    /// First visits and first crafts.
    pub novelty: i64,
    /// Finished structures.
    pub creation: i64,
    /// Trades and contracts.
    pub social: i64,
    /// Laws and used infrastructure.
    pub influence: i64,
    /// World-event participation.
    pub narrative: i64,
    /// Success under hazardous weather.
    pub risk_rescue: i64,
}

impl FunScore {
    /// Add `delta` to `dim` and return the new total for that dimension.
    pub fn add(&mut self, dim: FunDim, delta: i64) -> i64 {
        let slot = match dim {
            FunDim::Novelty => &mut self.novelty,
            FunDim::Creation => &mut self.creation,
            FunDim::Social => &mut self.social,
            FunDim::Influence => &mut self.influence,
            FunDim::Narrative => &mut self.narrative,
            FunDim::RiskRescue => &mut self.risk_rescue,
        };
        *slot = slot.saturating_add(delta);
        *slot
    }

    /// Scores keyed by wire dimension name.
    pub fn to_map(&self) -> BTreeMap<String, i64> {
        [
            (FunDim::Novelty, self.novelty),
            (FunDim::Creation, self.creation),
            (FunDim::Social, self.social),
            (FunDim::Influence, self.influence),
            (FunDim::Narrative, self.narrative),
            (FunDim::RiskRescue, self.risk_rescue),
        ]
        .into_iter()
        .map(|(d, v)| (d.as_str().to_owned(), v))
        .collect()
    }

    /// Sum over all dimensions.
    pub fn total(&self) -> i64 {
        self.novelty
            .saturating_add(self.creation)
            .saturating_add(self.social)
            .saturating_add(self.influence)
            .saturating_add(self.narrative)
            .saturating_add(self.risk_rescue)
    }
}

/// Repetition counter for one reward key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecayWindow {
    /// Tick the window opened.
    pub start_tick: u64,
    /// Rewards counted in the window.
    pub count: u32,
}

/// Decay windows keyed by reward key (`social:trade`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunDecay {
    windows: BTreeMap<String, DecayWindow>,
}

impl FunDecay {
    /// Count one reward for `key` and return the decayed amount.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn delta(&mut self, key: &str, base: i64, now: u64, window_ticks: u64, decay_base: f64) -> i64 {
        if key.is_empty() || base <= 0 {
            return 0;
        }
        let window = if window_ticks == 0 { DEFAULT_DECAY_WINDOW_TICKS } else { window_ticks };
        let mult_base = if decay_base > 0.0 && decay_base <= 1.0 { decay_base } else { DEFAULT_DECAY_BASE };
        let w = self
            .windows
            .entry(key.to_owned())
            .or_insert(DecayWindow { start_tick: now, count: 0 });
        if now.saturating_sub(w.start_tick) >= window {
            w.start_tick = now;
            w.count = 0;
        }
        w.count = w.count.saturating_add(1);
        let exp = i32::try_from(w.count.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = (base as f64 * mult_base.powi(exp)).round();
        if scaled <= 0.0 { 0 } else { scaled as i64 }
    }

    /// Windows for snapshot export.
    pub fn windows(&self) -> &BTreeMap<String, DecayWindow> {
        &self.windows
    }

    /// Restore from a snapshot, dropping empty windows.
    pub fn load(windows: BTreeMap<String, DecayWindow>) -> Self {
        Self {
            windows: windows
                .into_iter()
                .filter(|(k, w)| !k.is_empty() && w.count > 0)
                .collect(),
        }
    }
}

/// Social reward multiplier; agents with poor trade reputation earn less.
#[allow(clippy::cast_precision_loss)]
pub fn social_factor(rep_trade: i32) -> f64 {
    if rep_trade >= 500 {
        1.0
    } else if rep_trade <= 0 {
        0.5
    } else {
        0.5 + 0.5 * (f64::from(rep_trade) / 500.0)
    }
}

/// Scale `base` by the social factor, rounding.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn social_scaled(base: i64, rep_trade: i32) -> i64 {
    (base as f64 * social_factor(rep_trade)).round() as i64
}

/// Novelty points for the first craft of a recipe of `tier`.
pub const fn recipe_novelty_points(tier: u32) -> i64 {
    match tier {
        0 | 1 => 3,
        2 => 5,
        _ => 8,
    }
}
