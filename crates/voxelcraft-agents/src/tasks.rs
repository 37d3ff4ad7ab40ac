//! Movement and work task slots.
//!
//! An agent holds at most one [`MoveTask`] and one [`WorkTask`]. Tasks are
//! plain data; the engine's systems advance them.

use serde::{Deserialize, Serialize};
use voxelcraft_types::{MoveKind, TaskId, Vec3i, WorkKind};

/// Default FOLLOW distance.
pub const DEFAULT_FOLLOW_DISTANCE: f64 = 2.0;

/// Largest FOLLOW distance.
pub const MAX_FOLLOW_DISTANCE: f64 = 32.0;

/// Clamp a requested FOLLOW distance into `[1, 32]`, defaulting to 2.
pub fn clamp_follow_distance(d: f64) -> f64 {
    if !d.is_finite() || d <= 0.0 {
        DEFAULT_FOLLOW_DISTANCE
    } else {
        d.clamp(1.0, MAX_FOLLOW_DISTANCE)
    }
}

/// MOVE_TO tolerance; non-positive values mean "arrive exactly".
pub fn clamp_tolerance(t: f64) -> f64 {
    if !t.is_finite() || t < 0.0 { 0.0 } else { t }
}

/// A walking task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveTask {
    /// Task id.
    pub task_id: TaskId,
    /// MOVE_TO or FOLLOW.
    pub kind: MoveKind,
    /// Current destination. FOLLOW refreshes it every tick.
    pub target: Vec3i,
    /// MOVE_TO completion distance.
    #[serde(default)]
    pub tolerance: f64,
    /// FOLLOW target id.
    #[serde(default)]
    pub target_id: String,
    /// FOLLOW distance.
    #[serde(default)]
    pub distance: f64,
    /// Position when the task started, for progress reporting.
    pub start_pos: Vec3i,
    /// Tick the task started.
    pub started_tick: u64,
}

impl MoveTask {
    /// Fraction of the initial distance covered, in `[0, 1]`.
    pub fn progress(&self, pos: Vec3i) -> f64 {
        let total = self.start_pos.dist_xz(self.target);
        if total <= f64::EPSILON {
            return 1.0;
        }
        (1.0 - pos.dist_xz(self.target) / total).clamp(0.0, 1.0)
    }
}

/// A work task. Only the fields its kind needs are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkTask {
    /// Task id.
    pub task_id: TaskId,
    /// What kind of work.
    pub kind: WorkKind,
    /// MINE and PLACE cell.
    #[serde(default)]
    pub block_pos: Vec3i,
    /// CRAFT or SMELT recipe.
    #[serde(default)]
    pub recipe_id: String,
    /// PLACE, SMELT, or TRANSFER item.
    #[serde(default)]
    pub item_id: String,
    /// Repetitions or transfer count.
    #[serde(default)]
    pub count: u32,
    /// Blueprint for BUILD_BLUEPRINT.
    #[serde(default)]
    pub blueprint_id: String,
    /// Blueprint anchor.
    #[serde(default)]
    pub anchor: Vec3i,
    /// Blueprint rotation in quarter turns.
    #[serde(default)]
    pub rotation: u8,
    /// Next blueprint block to consider.
    #[serde(default)]
    pub build_index: u32,
    /// GATHER or OPEN target id.
    #[serde(default)]
    pub target_id: String,
    /// TRANSFER source.
    #[serde(default)]
    pub src: String,
    /// TRANSFER destination.
    #[serde(default)]
    pub dst: String,
    /// Tick the task started.
    pub started_tick: u64,
    /// Work accumulated so far.
    #[serde(default)]
    pub work_ticks: u32,
}

impl WorkTask {
    /// A task of `kind` with every optional field empty.
    pub fn new(task_id: TaskId, kind: WorkKind, now: u64) -> Self {
        Self {
            task_id,
            kind,
            block_pos: Vec3i::ZERO,
            recipe_id: String::new(),
            item_id: String::new(),
            count: 0,
            blueprint_id: String::new(),
            anchor: Vec3i::ZERO,
            rotation: 0,
            build_index: 0,
            target_id: String::new(),
            src: String::new(),
            dst: String::new(),
            started_tick: now,
            work_ticks: 0,
        }
    }
}

/// Normalize a blueprint rotation to `0..4` quarter turns.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const fn normalize_rotation(r: i32) -> u8 {
    r.rem_euclid(4) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_distance_is_clamped() {
        assert!((clamp_follow_distance(0.0) - 2.0).abs() < f64::EPSILON);
        assert!((clamp_follow_distance(100.0) - 32.0).abs() < f64::EPSILON);
        assert!((clamp_follow_distance(0.5) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn move_progress_tracks_distance() {
        let t = MoveTask {
            task_id: TaskId::from_counter(1),
            kind: MoveKind::MoveTo,
            target: Vec3i::flat(10, 0),
            tolerance: 0.0,
            target_id: String::new(),
            distance: 0.0,
            start_pos: Vec3i::ZERO,
            started_tick: 0,
        };
        assert!(t.progress(Vec3i::ZERO).abs() < f64::EPSILON);
        assert!((t.progress(Vec3i::flat(5, 0)) - 0.5).abs() < 1e-9);
        assert!((t.progress(Vec3i::flat(10, 0)) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rotation_wraps() {
        assert_eq!(normalize_rotation(5), 1);
        assert_eq!(normalize_rotation(-1), 3);
    }
}
