//! Rolling world statistics and the director's feedback metrics.
//!
//! Counts land in fixed-width tick buckets arranged as a ring covering
//! the stats window; summaries add up every bucket in the ring.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use voxelcraft_agents::Inventory;
use voxelcraft_world::{CHUNK_SIZE, ChunkKey};

/// Counts for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsBucket {
    /// Trades settled.
    pub trades: u64,
    /// Permission denials.
    pub denied: u64,
    /// Chunks first entered by any agent.
    pub chunks_discovered: u64,
    /// Blueprints finished.
    pub blueprints_complete: u64,
}

impl StatsBucket {
    fn accumulate(&mut self, other: &Self) {
        self.trades = self.trades.saturating_add(other.trades);
        self.denied = self.denied.saturating_add(other.denied);
        self.chunks_discovered = self.chunks_discovered.saturating_add(other.chunks_discovered);
        self.blueprints_complete = self.blueprints_complete.saturating_add(other.blueprints_complete);
    }
}

/// Ring of stats buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStats {
    /// Ticks per bucket.
    pub bucket_ticks: u64,
    /// Ticks covered by the ring.
    pub window_ticks: u64,
    /// The ring.
    pub buckets: Vec<StatsBucket>,
    /// Index of the current bucket.
    pub cur_idx: usize,
    /// First tick of the current bucket.
    pub cur_base: u64,
    /// Chunks any agent has stood in.
    #[serde(default)]
    pub seen_chunks: BTreeSet<ChunkKey>,
}

impl WorldStats {
    /// A ring of `window_ticks / bucket_ticks` buckets.
    pub fn new(bucket_ticks: u64, window_ticks: u64) -> Self {
        let bucket_ticks = if bucket_ticks == 0 { 300 } else { bucket_ticks };
        let window_ticks = window_ticks.max(bucket_ticks);
        let n = window_ticks.checked_div(bucket_ticks).unwrap_or(1).max(1);
        Self {
            bucket_ticks,
            window_ticks: n.saturating_mul(bucket_ticks),
            buckets: vec![StatsBucket::default(); usize::try_from(n).unwrap_or(1)],
            cur_idx: 0,
            cur_base: 0,
            seen_chunks: BTreeSet::new(),
        }
    }

    fn rotate(&mut self, now: u64) {
        if self.buckets.is_empty() {
            self.buckets.push(StatsBucket::default());
        }
        let len = self.buckets.len();
        // Skip whole revolutions in one go.
        let behind = now.saturating_sub(self.cur_base) / self.bucket_ticks.max(1);
        if behind >= len as u64 {
            self.buckets.iter_mut().for_each(|b| *b = StatsBucket::default());
            self.cur_base = self.cur_base.saturating_add(behind.saturating_mul(self.bucket_ticks));
            return;
        }
        while now >= self.cur_base.saturating_add(self.bucket_ticks) {
            self.cur_idx = self.cur_idx.saturating_add(1) % len;
            if let Some(b) = self.buckets.get_mut(self.cur_idx) {
                *b = StatsBucket::default();
            }
            self.cur_base = self.cur_base.saturating_add(self.bucket_ticks);
        }
    }

    fn current(&mut self, now: u64) -> Option<&mut StatsBucket> {
        self.rotate(now);
        self.buckets.get_mut(self.cur_idx)
    }

    /// Count a settled trade.
    pub fn record_trade(&mut self, now: u64) {
        if let Some(b) = self.current(now) {
            b.trades = b.trades.saturating_add(1);
        }
    }

    /// Count a permission denial.
    pub fn record_denied(&mut self, now: u64) {
        if let Some(b) = self.current(now) {
            b.denied = b.denied.saturating_add(1);
        }
    }

    /// Count a finished blueprint.
    pub fn record_blueprint(&mut self, now: u64) {
        if let Some(b) = self.current(now) {
            b.blueprints_complete = b.blueprints_complete.saturating_add(1);
        }
    }

    /// Mark the chunks agents stand in, counting first visits.
    pub fn observe_positions(&mut self, now: u64, positions: impl IntoIterator<Item = (i32, i32)>) {
        self.rotate(now);
        let mut fresh = 0_u64;
        for (x, z) in positions {
            let key = (x.div_euclid(CHUNK_SIZE), z.div_euclid(CHUNK_SIZE));
            if self.seen_chunks.insert(key) {
                fresh = fresh.saturating_add(1);
            }
        }
        if let Some(b) = self.buckets.get_mut(self.cur_idx) {
            b.chunks_discovered = b.chunks_discovered.saturating_add(fresh);
        }
    }

    /// Totals over the window ending at `now`.
    pub fn summarize(&mut self, now: u64) -> StatsBucket {
        self.rotate(now);
        let mut out = StatsBucket::default();
        for b in &self.buckets {
            out.accumulate(b);
        }
        out
    }
}

/// Normalized signals the director weighs events with.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DirectorMetrics {
    /// Trades per agent, scaled to `[0, 1]`.
    pub trade: f64,
    /// Denials per agent per tick, scaled to `[0, 1]`.
    pub conflict: f64,
    /// Chunks discovered per agent, scaled to `[0, 1]`.
    pub exploration: f64,
    /// Gini coefficient of inventory wealth.
    pub inequality: f64,
    /// Blueprints finished per agent, scaled to `[0, 1]`.
    pub public_infra: f64,
}

fn unit(x: f64) -> f64 {
    if x.is_nan() || x > 1.0 {
        1.0
    } else if x < 0.0 {
        0.0
    } else {
        x
    }
}

#[allow(clippy::cast_precision_loss)]
impl DirectorMetrics {
    /// Compute metrics from a window summary and agent inventories.
    pub fn compute<'a>(sum: StatsBucket, window_ticks: u64, inventories: impl Iterator<Item = &'a Inventory>) -> Self {
        let wealth: Vec<f64> = inventories.map(wealth_value).collect();
        let agents = wealth.len() as f64;
        if wealth.is_empty() {
            return Self::default();
        }
        let window = if window_ticks == 0 { 72_000.0 } else { window_ticks as f64 };
        Self {
            trade: unit(sum.trades as f64 / agents / 5.0),
            conflict: unit(sum.denied as f64 / (agents * window) * 100.0),
            exploration: unit(sum.chunks_discovered as f64 / agents / 20.0),
            inequality: gini(wealth),
            public_infra: unit(sum.blueprints_complete as f64 / agents / 5.0),
        }
    }
}

/// Director weight of one unit of `item`.
pub fn item_unit_value(item: &str) -> f64 {
    match item {
        "CRYSTAL_SHARD" => 50.0,
        "IRON_INGOT" => 10.0,
        "COPPER_INGOT" => 6.0,
        "COAL" | "PLANK" => 1.0,
        _ => 0.5,
    }
}

fn wealth_value(inv: &Inventory) -> f64 {
    inv.iter().map(|(item, n)| f64::from(*n) * item_unit_value(item)).sum()
}

/// Gini coefficient of non-negative values, clamped to `[0, 1]`.
#[allow(clippy::cast_precision_loss)]
pub fn gini(mut values: Vec<f64>) -> f64 {
    let total: f64 = values.iter().sum();
    if values.len() <= 1 || total <= 0.0 {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    let weighted: f64 = values
        .iter()
        .enumerate()
        .map(|(i, x)| (i as f64 + 1.0) * x)
        .sum();
    unit((2.0 * weighted) / (n * total) - (n + 1.0) / n)
}
