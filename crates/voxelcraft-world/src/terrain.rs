//! Deterministic terrain: biomes, ore clusters, and surface clutter.
//!
//! The world is a single surface plane (`y == 0`). Each cell is a pure
//! function of the seed and its `(x, z)` coordinate:
//!
//! | Layer      | Rule                                                    |
//! |------------|---------------------------------------------------------|
//! | Spawn      | Cells with `x^2 + z^2 <= r^2` around the origin are AIR |
//! | Ores       | Crystal, iron, copper, then coal clusters               |
//! | Biome      | Forest, desert, or plains cluster table                 |
//! | Sprinkle   | A per-cell roll adds stray stone, dirt/sand, and logs   |

use serde::{Deserialize, Serialize};
use voxelcraft_types::Biome;

use crate::catalogs::Catalogs;
use crate::error::WorldError;
use crate::noise::{hash2, in_cluster, scale_prob};

/// Worldgen tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldGenParams {
    /// Side length of a biome region.
    pub biome_region_size: i32,
    /// Radius of the guaranteed-open clearing around the origin.
    pub spawn_clear_radius: i32,
    /// Scale applied to ore cluster probabilities.
    pub ore_cluster_prob_scale_permille: i32,
    /// Scale applied to biome cluster probabilities.
    pub terrain_cluster_prob_scale_permille: i32,
    /// Stray stone per thousand empty cells.
    pub sprinkle_stone_permille: u32,
    /// Stray dirt (sand in deserts) per thousand empty cells.
    pub sprinkle_dirt_permille: u32,
    /// Stray logs per thousand empty forest cells.
    pub sprinkle_log_permille: u32,
}

impl Default for WorldGenParams {
    fn default() -> Self {
        Self {
            biome_region_size: 64,
            spawn_clear_radius: 6,
            ore_cluster_prob_scale_permille: 1000,
            terrain_cluster_prob_scale_permille: 1000,
            sprinkle_stone_permille: 12,
            sprinkle_dirt_permille: 4,
            sprinkle_log_permille: 2,
        }
    }
}

/// Which probability scale a cluster rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Ore,
    Terrain,
}

/// A cluster rule: seed offset, grid size, radius, and base probability.
#[derive(Debug, Clone, Copy)]
struct ClusterRule {
    block: &'static str,
    seed_offset: i64,
    grid: i32,
    radius: i32,
    prob_permille: u32,
    layer: Layer,
}

const fn ore(block: &'static str, seed_offset: i64, grid: i32, radius: i32, p: u32) -> ClusterRule {
    ClusterRule { block, seed_offset, grid, radius, prob_permille: p, layer: Layer::Ore }
}

const fn clutter(
    block: &'static str,
    seed_offset: i64,
    grid: i32,
    radius: i32,
    p: u32,
) -> ClusterRule {
    ClusterRule { block, seed_offset, grid, radius, prob_permille: p, layer: Layer::Terrain }
}

/// Rare ores take precedence over common ones.
const ORE_RULES: [ClusterRule; 4] = [
    ore("CRYSTAL_ORE", 101, 192, 2, 200),
    ore("IRON_ORE", 102, 128, 3, 450),
    ore("COPPER_ORE", 103, 128, 3, 450),
    ore("COAL_ORE", 104, 64, 4, 650),
];

const FOREST_RULES: [ClusterRule; 4] = [
    clutter("LOG", 201, 48, 4, 450),
    clutter("STONE", 202, 32, 4, 500),
    clutter("DIRT", 203, 48, 3, 350),
    clutter("GRAVEL", 204, 96, 2, 180),
];

const DESERT_RULES: [ClusterRule; 3] = [
    clutter("SAND", 301, 48, 3, 550),
    clutter("STONE", 302, 32, 4, 450),
    clutter("GRAVEL", 303, 96, 2, 200),
];

const PLAINS_RULES: [ClusterRule; 3] = [
    clutter("DIRT", 401, 48, 3, 400),
    clutter("STONE", 402, 32, 4, 500),
    clutter("GRAVEL", 403, 96, 2, 180),
];

const SPRINKLE_SEED_OFFSET: i64 = 999;

/// Palette indices of the blocks worldgen emits.
#[derive(Debug, Clone, Copy)]
struct GenPalette {
    air: u16,
    stone: u16,
    dirt: u16,
    sand: u16,
    gravel: u16,
    log: u16,
    coal_ore: u16,
    iron_ore: u16,
    copper_ore: u16,
    crystal_ore: u16,
}

impl GenPalette {
    fn resolve(catalogs: &Catalogs) -> Result<Self, WorldError> {
        let id = |name: &str| {
            catalogs
                .block_id(name)
                .ok_or_else(|| WorldError::MissingBlock(name.to_owned()))
        };
        Ok(Self {
            air: id("AIR")?,
            stone: id("STONE")?,
            dirt: id("DIRT")?,
            sand: id("SAND")?,
            gravel: id("GRAVEL")?,
            log: id("LOG")?,
            coal_ore: id("COAL_ORE")?,
            iron_ore: id("IRON_ORE")?,
            copper_ore: id("COPPER_ORE")?,
            crystal_ore: id("CRYSTAL_ORE")?,
        })
    }

    fn by_name(&self, name: &str) -> u16 {
        match name {
            "STONE" => self.stone,
            "DIRT" => self.dirt,
            "SAND" => self.sand,
            "GRAVEL" => self.gravel,
            "LOG" => self.log,
            "COAL_ORE" => self.coal_ore,
            "IRON_ORE" => self.iron_ore,
            "COPPER_ORE" => self.copper_ore,
            "CRYSTAL_ORE" => self.crystal_ore,
            _ => self.air,
        }
    }
}

/// Seeded terrain generator.
#[derive(Debug, Clone)]
pub struct TerrainGen {
    seed: i64,
    params: WorldGenParams,
    palette: GenPalette,
}

impl TerrainGen {
    /// Build a generator, resolving the worldgen blocks in the catalog.
    pub fn new(seed: i64, params: WorldGenParams, catalogs: &Catalogs) -> Result<Self, WorldError> {
        Ok(Self {
            seed,
            params,
            palette: GenPalette::resolve(catalogs)?,
        })
    }

    /// World seed.
    pub const fn seed(&self) -> i64 {
        self.seed
    }

    /// Worldgen tuning.
    pub const fn params(&self) -> &WorldGenParams {
        &self.params
    }

    /// Palette index of AIR.
    pub const fn air(&self) -> u16 {
        self.palette.air
    }

    /// Biome of the region containing `(x, z)`.
    pub fn biome_at(&self, x: i32, z: i32) -> Biome {
        let size = i64::from(self.params.biome_region_size.max(1));
        let rx = i64::from(x).div_euclid(size);
        let rz = i64::from(z).div_euclid(size);
        match hash2(self.seed, rx, rz) % 3 {
            0 => Biome::Plains,
            1 => Biome::Forest,
            _ => Biome::Desert,
        }
    }

    fn within_spawn_clear(&self, x: i32, z: i32) -> bool {
        let r = i64::from(self.params.spawn_clear_radius);
        if r <= 0 {
            return false;
        }
        let (dx, dz) = (i64::from(x), i64::from(z));
        dx * dx + dz * dz <= r * r
    }

    fn first_match(&self, rules: &[ClusterRule], x: i32, z: i32) -> Option<u16> {
        rules.iter().find_map(|rule| {
            let scale = match rule.layer {
                Layer::Ore => self.params.ore_cluster_prob_scale_permille,
                Layer::Terrain => self.params.terrain_cluster_prob_scale_permille,
            };
            let p = scale_prob(rule.prob_permille, scale);
            let seed = self.seed.wrapping_add(rule.seed_offset);
            in_cluster(seed, x, z, rule.grid, rule.radius, p).then(|| self.palette.by_name(rule.block))
        })
    }

    /// Generated block at surface cell `(x, z)`.
    pub fn block_at(&self, x: i32, z: i32) -> u16 {
        if self.within_spawn_clear(x, z) {
            return self.palette.air;
        }
        if let Some(b) = self.first_match(&ORE_RULES, x, z) {
            return b;
        }
        let biome = self.biome_at(x, z);
        let rules: &[ClusterRule] = match biome {
            Biome::Forest => &FOREST_RULES,
            Biome::Desert => &DESERT_RULES,
            Biome::Plains => &PLAINS_RULES,
        };
        if let Some(b) = self.first_match(rules, x, z) {
            return b;
        }
        self.sprinkle(biome, x, z)
    }

    fn sprinkle(&self, biome: Biome, x: i32, z: i32) -> u16 {
        let seed = self.seed.wrapping_add(SPRINKLE_SEED_OFFSET);
        let roll = hash2(seed, i64::from(x), i64::from(z)) % 1000;
        let stone = u64::from(self.params.sprinkle_stone_permille.min(1000));
        let dirt = stone + u64::from(self.params.sprinkle_dirt_permille.min(1000));
        let log = dirt + u64::from(self.params.sprinkle_log_permille.min(1000));
        if roll < stone {
            self.palette.stone
        } else if roll < dirt {
            if biome == Biome::Desert { self.palette.sand } else { self.palette.dirt }
        } else if roll < log && biome == Biome::Forest {
            self.palette.log
        } else {
            self.palette.air
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn generator(seed: i64) -> (Catalogs, TerrainGen) {
        let cats = Catalogs::builtin().unwrap();
        let tg = TerrainGen::new(seed, WorldGenParams::default(), &cats).unwrap();
        (cats, tg)
    }

    #[test]
    fn spawn_clearing_is_air() {
        let (_, tg) = generator(42);
        for x in -6..=6 {
            for z in -6..=6 {
                if x * x + z * z <= 36 {
                    assert_eq!(tg.block_at(x, z), tg.air(), "({x},{z})");
                }
            }
        }
    }

    #[test]
    fn same_seed_same_terrain() {
        let (_, a) = generator(7);
        let (_, b) = generator(7);
        for x in -100..100 {
            assert_eq!(a.block_at(x, x / 2 - 30), b.block_at(x, x / 2 - 30));
        }
    }

    #[test]
    fn terrain_is_not_empty() {
        let (cats, tg) = generator(1);
        let mut solid = 0;
        for x in -128..128 {
            for z in -128..128 {
                if cats.is_solid(tg.block_at(x, z)) {
                    solid += 1;
                }
            }
        }
        assert!(solid > 0);
    }

    #[test]
    fn biome_regions_are_uniform() {
        let (_, tg) = generator(3);
        assert_eq!(tg.biome_at(0, 0), tg.biome_at(63, 63));
        assert_eq!(tg.biome_at(-1, -1), tg.biome_at(-64, -64));
    }

    #[test]
    fn missing_worldgen_block_is_an_error() {
        let yaml = "blocks: [{ id: AIR }]\nitems: []\nmining: { base_work_ticks: 1, tiers: [] }\n";
        let cats = Catalogs::parse(yaml).unwrap();
        let err = TerrainGen::new(1, WorldGenParams::default(), &cats).unwrap_err();
        assert!(matches!(err, WorldError::MissingBlock(_)));
    }
}
