//! Integer grid coordinates.
//!
//! The world is a 2D tilemap on the `y = 0` plane, but `y` is carried in
//! every position for forward compatibility. [`Vec3i`] orders by
//! `(x, y, z)` so that maps keyed by position iterate deterministically.

use serde::{Deserialize, Serialize};

/// A cell position on the voxel grid.
///
/// Serializes as a `[x, y, z]` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct Vec3i {
    /// East-west axis.
    pub x: i32,
    /// Vertical axis (always 0 in the current world shape).
    pub y: i32,
    /// North-south axis.
    pub z: i32,
}

impl Vec3i {
    /// The origin cell.
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    /// Build a position from components.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Build a position on the surface plane.
    pub const fn flat(x: i32, z: i32) -> Self {
        Self { x, y: 0, z }
    }

    /// Component-wise addition, saturating at the `i32` range.
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            z: self.z.saturating_add(dz),
        }
    }

    /// Manhattan distance over all three axes.
    pub const fn manhattan(self, other: Self) -> u32 {
        self.x.abs_diff(other.x)
            .saturating_add(self.y.abs_diff(other.y))
            .saturating_add(self.z.abs_diff(other.z))
    }

    /// Euclidean distance on the surface plane.
    pub fn dist_xz(self, other: Self) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dz = f64::from(self.z) - f64::from(other.z);
        dx.hypot(dz)
    }

    /// Squared Euclidean distance on the surface plane.
    pub fn dist2_xz(self, other: Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx * dx + dz * dz
    }

    /// The four surface neighbours in the fixed order `-Z, +Z, -X, +X`.
    pub const fn neighbors4(self) -> [Self; 4] {
        [
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
        ]
    }

    /// Array form `[x, y, z]`.
    pub const fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[i32; 3]> for Vec3i {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3i> for [i32; 3] {
    fn from(v: Vec3i) -> Self {
        v.to_array()
    }
}

impl core::fmt::Display for Vec3i {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// Rotate a blueprint offset around the vertical axis by `rot` quarter
/// turns (clockwise when viewed from above). Rotations outside `0..4`
/// wrap.
pub const fn rotate_offset(v: Vec3i, rot: u8) -> Vec3i {
    match rot % 4 {
        1 => Vec3i { x: -v.z, y: v.y, z: v.x },
        2 => Vec3i { x: -v.x, y: v.y, z: -v.z },
        3 => Vec3i { x: v.z, y: v.y, z: -v.x },
        _ => v,
    }
}

/// Quantize a yaw angle in degrees to a cardinal direction `(dx, dz)`.
///
/// `0` faces `+Z`, `90` faces `-X`, `180` faces `-Z`, `270` faces `+X`.
pub fn yaw_to_dir(yaw: i32) -> (i32, i32) {
    let norm = yaw.rem_euclid(360);
    match ((norm + 45) / 90) % 4 {
        1 => (-1, 0),
        2 => (0, -1),
        3 => (1, 0),
        _ => (0, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_counts_all_axes() {
        let a = Vec3i::new(1, 0, -2);
        let b = Vec3i::new(-1, 0, 3);
        assert_eq!(a.manhattan(b), 7);
    }

    #[test]
    fn rotation_cycles_back() {
        let v = Vec3i::new(2, 0, 1);
        assert_eq!(rotate_offset(v, 1), Vec3i::new(-1, 0, 2));
        assert_eq!(rotate_offset(v, 2), Vec3i::new(-2, 0, -1));
        assert_eq!(rotate_offset(v, 4), v);
    }

    #[test]
    fn yaw_quantizes_to_cardinals() {
        assert_eq!(yaw_to_dir(0), (0, 1));
        assert_eq!(yaw_to_dir(89), (-1, 0));
        assert_eq!(yaw_to_dir(180), (0, -1));
        assert_eq!(yaw_to_dir(-90), (1, 0));
    }

    #[test]
    fn serializes_as_array() {
        let json = serde_json::to_string(&Vec3i::new(1, 0, -4)).unwrap_or_default();
        assert_eq!(json, "[1,0,-4]");
    }
}
