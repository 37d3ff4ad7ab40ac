//! Deterministic integer hashing for world generation and sampling.
//!
//! Every random-looking decision in the engine is derived from these pure
//! functions of the world seed and coordinates, so two processes with the
//! same seed agree bit for bit.

/// SplitMix64 finalizer.
#[must_use]
pub const fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Hash of a seed and two signed coordinates.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn hash2(seed: i64, a: i64, b: i64) -> u64 {
    let x = (seed as u64)
        ^ (a as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (b as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    mix64(x)
}

/// Hash of a seed and three signed coordinates.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn hash3(seed: i64, a: i64, b: i64, c: i64) -> u64 {
    let x = (seed as u64)
        ^ (a as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (b as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f)
        ^ (c as u64).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    mix64(x)
}

/// 32-bit FNV-1a over a byte string.
#[must_use]
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in bytes {
        h ^= u32::from(*b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Whether `(x, z)` falls inside a procedural cluster.
///
/// The plane is cut into `grid`-sized cells. Each cell hosts a cluster with
/// probability `prob_permille / 1000`, centred at a hashed point inside the
/// cell. A position is inside when it lies within `radius` (Euclidean) of
/// the centre of any cluster in its own or the eight neighbouring cells.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn in_cluster(seed: i64, x: i32, z: i32, grid: i32, radius: i32, prob_permille: u32) -> bool {
    if grid <= 0 || radius <= 0 || prob_permille == 0 {
        return false;
    }
    let g = i64::from(grid);
    let (x, z) = (i64::from(x), i64::from(z));
    let (cx, cz) = (x.div_euclid(g), z.div_euclid(g));
    let r2 = i64::from(radius) * i64::from(radius);
    for dz in -1..=1_i64 {
        for dx in -1..=1_i64 {
            let (gx, gz) = (cx + dx, cz + dz);
            let h = hash2(seed, gx, gz);
            if h % 1000 >= u64::from(prob_permille) {
                continue;
            }
            let ox = ((h >> 10) % (g as u64)) as i64;
            let oz = ((h >> 20) % (g as u64)) as i64;
            let (px, pz) = (gx * g + ox, gz * g + oz);
            let (ddx, ddz) = (x - px, z - pz);
            if ddx * ddx + ddz * ddz <= r2 {
                return true;
            }
        }
    }
    false
}

/// Scale a cluster probability by a permille factor, rounding to nearest
/// and capping at 1000. A non-positive factor leaves `base` unchanged.
#[must_use]
pub fn scale_prob(base: u32, factor_permille: i32) -> u32 {
    let factor = u64::try_from(factor_permille).ok().filter(|f| *f > 0).unwrap_or(1000);
    let scaled = (u64::from(base) * factor + 500) / 1000;
    u32::try_from(scaled.min(1000)).unwrap_or(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix64_zero_is_zero() {
        assert_eq!(mix64(0), 0);
        assert_ne!(mix64(1), 1);
    }

    #[test]
    fn hash2_is_order_sensitive() {
        assert_ne!(hash2(7, 1, 2), hash2(7, 2, 1));
        assert_eq!(hash2(7, -3, 9), hash2(7, -3, 9));
    }

    #[test]
    fn hash3_differs_from_hash2() {
        assert_ne!(hash3(7, 1, 2, 3), hash2(7, 1, 2));
    }

    #[test]
    fn fnv_known_vector() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
    }

    #[test]
    fn cluster_with_zero_probability_is_empty() {
        for x in -50..50 {
            assert!(!in_cluster(1, x, x * 3, 16, 4, 0));
        }
    }

    #[test]
    fn cluster_with_full_probability_hits_its_centre_cell() {
        // Every cell hosts a cluster; a radius covering the whole cell
        // diagonal must include every position.
        for x in -40..40 {
            assert!(in_cluster(9, x, -x, 8, 12, 1000));
        }
    }

    #[test]
    fn scale_prob_rounds_and_caps() {
        assert_eq!(scale_prob(450, 1000), 450);
        assert_eq!(scale_prob(450, 0), 450);
        assert_eq!(scale_prob(3, 500), 2);
        assert_eq!(scale_prob(650, 5000), 1000);
    }
}
