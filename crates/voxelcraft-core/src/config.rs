//! World configuration.
//!
//! A [`WorldConfig`] is deserialized from YAML (usually as one entry of the
//! server's `worlds:` list) and then passed through
//! [`WorldConfig::normalized`], which replaces every zero or invalid value
//! with its default. All tuning parameters are carried in snapshots so a
//! resumed world replays identically.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use voxelcraft_agents::RateLimitSpec;
use voxelcraft_agents::inventory::Inventory;
use voxelcraft_world::WorldGenParams;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value that cannot be defaulted is wrong.
    #[error("invalid world config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Rate-limit action kinds.
pub const RATE_SAY: &str = "SAY";
/// Market channel chat.
pub const RATE_MARKET_SAY: &str = "MARKET_SAY";
/// Whispers.
pub const RATE_WHISPER: &str = "WHISPER";
/// Trade offers.
pub const RATE_OFFER_TRADE: &str = "OFFER_TRADE";
/// Board posts.
pub const RATE_POST_BOARD: &str = "POST_BOARD";

/// Per-action rate limits: `max` actions per `window_ticks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// SAY window.
    pub say_window_ticks: u64,
    /// SAY allowance.
    pub say_max: u32,
    /// MARKET channel window.
    pub market_say_window_ticks: u64,
    /// MARKET channel allowance.
    pub market_say_max: u32,
    /// WHISPER window.
    pub whisper_window_ticks: u64,
    /// WHISPER allowance.
    pub whisper_max: u32,
    /// OFFER_TRADE window.
    pub offer_trade_window_ticks: u64,
    /// OFFER_TRADE allowance.
    pub offer_trade_max: u32,
    /// POST_BOARD window.
    pub post_board_window_ticks: u64,
    /// POST_BOARD allowance.
    pub post_board_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            say_window_ticks: 50,
            say_max: 5,
            market_say_window_ticks: 50,
            market_say_max: 2,
            whisper_window_ticks: 50,
            whisper_max: 5,
            offer_trade_window_ticks: 50,
            offer_trade_max: 3,
            post_board_window_ticks: 600,
            post_board_max: 1,
        }
    }
}

impl RateLimitConfig {
    fn normalize(&mut self) {
        let d = Self::default();
        fix_zero(&mut self.say_window_ticks, d.say_window_ticks);
        fix_zero(&mut self.say_max, d.say_max);
        fix_zero(&mut self.market_say_window_ticks, d.market_say_window_ticks);
        fix_zero(&mut self.market_say_max, d.market_say_max);
        fix_zero(&mut self.whisper_window_ticks, d.whisper_window_ticks);
        fix_zero(&mut self.whisper_max, d.whisper_max);
        fix_zero(&mut self.offer_trade_window_ticks, d.offer_trade_window_ticks);
        fix_zero(&mut self.offer_trade_max, d.offer_trade_max);
        fix_zero(&mut self.post_board_window_ticks, d.post_board_window_ticks);
        fix_zero(&mut self.post_board_max, d.post_board_max);
    }

    /// Limit for an action kind. Unknown kinds are unlimited.
    pub const fn spec(&self, kind: &str) -> RateLimitSpec {
        match kind.as_bytes() {
            b"SAY" => RateLimitSpec::new(self.say_max, self.say_window_ticks),
            b"MARKET_SAY" => RateLimitSpec::new(self.market_say_max, self.market_say_window_ticks),
            b"WHISPER" => RateLimitSpec::new(self.whisper_max, self.whisper_window_ticks),
            b"OFFER_TRADE" => RateLimitSpec::new(self.offer_trade_max, self.offer_trade_window_ticks),
            b"POST_BOARD" => RateLimitSpec::new(self.post_board_max, self.post_board_window_ticks),
            _ => RateLimitSpec::new(0, 0),
        }
    }
}

/// Configuration of one world instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// World id, e.g. `OVERWORLD_1`.
    #[serde(default = "default_world_id")]
    pub id: String,
    /// World type (`OVERWORLD`, `CITY_HUB`, ...); selects the claim type.
    #[serde(default)]
    pub world_type: String,
    /// Ticks per second.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
    /// Ticks per in-game day.
    #[serde(default = "default_day_ticks")]
    pub day_ticks: u64,
    /// Ticks per season; zero means seven days.
    #[serde(default)]
    pub season_length_ticks: u64,
    /// Observation radius in cells.
    #[serde(default = "default_obs_radius")]
    pub obs_radius: u32,
    /// Vertical size; only 1 is supported.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Worldgen seed.
    #[serde(default)]
    pub seed: i64,
    /// Half-width of the playable square.
    #[serde(default = "default_boundary_r")]
    pub boundary_r: i32,
    /// Cooldown after arriving from another world.
    #[serde(default = "default_switch_cooldown_ticks")]
    pub switch_cooldown_ticks: u64,

    /// Land claims may be created.
    #[serde(default)]
    pub allow_claims: bool,
    /// Blocks may be mined.
    #[serde(default)]
    pub allow_mine: bool,
    /// Blocks may be placed.
    #[serde(default)]
    pub allow_place: bool,
    /// Laws may be proposed and voted on.
    #[serde(default)]
    pub allow_laws: bool,
    /// Agents may trade.
    #[serde(default)]
    pub allow_trade: bool,
    /// Blueprints may be built.
    #[serde(default)]
    pub allow_build: bool,

    /// Worldgen tuning.
    #[serde(default)]
    pub worldgen: WorldGenParams,

    /// Items granted on join. Absent means the default kit; an empty map
    /// means nothing.
    #[serde(default)]
    pub starter_items: Option<Inventory>,

    /// Periodic snapshot interval.
    #[serde(default = "default_snapshot_every_ticks")]
    pub snapshot_every_ticks: u64,
    /// Director evaluation interval.
    #[serde(default = "default_director_every_ticks")]
    pub director_every_ticks: u64,
    /// Per-action rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Ticks a proposed law stays in NOTICE.
    #[serde(default = "default_law_ticks")]
    pub law_notice_ticks: u64,
    /// Ticks a law stays in VOTING.
    #[serde(default = "default_law_ticks")]
    pub law_vote_ticks: u64,

    /// Range within which blueprint builds pull from containers.
    #[serde(default = "default_blueprint_auto_pull_range")]
    pub blueprint_auto_pull_range: i32,
    /// Blueprint blocks placed per tick.
    #[serde(default = "default_blueprint_blocks_per_tick")]
    pub blueprint_blocks_per_tick: u32,

    /// Core radius for access passes and the wanted rule.
    #[serde(default = "default_access_pass_core_radius")]
    pub access_pass_core_radius: i32,
    /// Daily claim upkeep.
    #[serde(default = "default_maintenance_cost")]
    pub maintenance_cost: Inventory,

    /// Fun decay window.
    #[serde(default = "default_fun_decay_window_ticks")]
    pub fun_decay_window_ticks: u64,
    /// Fun decay base in `(0, 1]`.
    #[serde(default = "default_fun_decay_base")]
    pub fun_decay_base: f64,
    /// Ticks a structure must survive before its creation award.
    #[serde(default = "default_structure_survival_ticks")]
    pub structure_survival_ticks: u64,

    /// Hunger drain interval.
    #[serde(default = "default_env_every_ticks")]
    pub env_every_ticks: u64,
    /// Stats bucket width.
    #[serde(default = "default_stats_bucket_ticks")]
    pub stats_bucket_ticks: u64,
    /// Stats window length.
    #[serde(default = "default_stats_window_ticks")]
    pub stats_window_ticks: u64,
}

fn default_world_id() -> String {
    "OVERWORLD".to_owned()
}

const fn default_tick_rate_hz() -> u32 {
    5
}

const fn default_day_ticks() -> u64 {
    6000
}

const fn default_obs_radius() -> u32 {
    7
}

const fn default_height() -> u32 {
    1
}

const fn default_boundary_r() -> i32 {
    4000
}

const fn default_switch_cooldown_ticks() -> u64 {
    150
}

const fn default_snapshot_every_ticks() -> u64 {
    3000
}

const fn default_director_every_ticks() -> u64 {
    3000
}

const fn default_law_ticks() -> u64 {
    3000
}

const fn default_blueprint_auto_pull_range() -> i32 {
    32
}

const fn default_blueprint_blocks_per_tick() -> u32 {
    2
}

const fn default_access_pass_core_radius() -> i32 {
    16
}

fn default_maintenance_cost() -> Inventory {
    BTreeMap::from([("IRON_INGOT".to_owned(), 1), ("COAL".to_owned(), 1)])
}

const fn default_fun_decay_window_ticks() -> u64 {
    3000
}

const fn default_fun_decay_base() -> f64 {
    0.70
}

const fn default_structure_survival_ticks() -> u64 {
    3000
}

const fn default_env_every_ticks() -> u64 {
    60
}

const fn default_stats_bucket_ticks() -> u64 {
    300
}

const fn default_stats_window_ticks() -> u64 {
    72_000
}

/// The default starter kit.
pub fn default_starter_items() -> Inventory {
    BTreeMap::from([
        ("PLANK".to_owned(), 20),
        ("COAL".to_owned(), 10),
        ("STONE".to_owned(), 20),
        ("BERRIES".to_owned(), 10),
    ])
}

fn fix_zero<T: Default + PartialEq>(slot: &mut T, default: T) {
    if *slot == T::default() {
        *slot = default;
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            id: default_world_id(),
            world_type: String::new(),
            tick_rate_hz: default_tick_rate_hz(),
            day_ticks: default_day_ticks(),
            season_length_ticks: 0,
            obs_radius: default_obs_radius(),
            height: default_height(),
            seed: 0,
            boundary_r: default_boundary_r(),
            switch_cooldown_ticks: default_switch_cooldown_ticks(),
            allow_claims: false,
            allow_mine: false,
            allow_place: false,
            allow_laws: false,
            allow_trade: false,
            allow_build: false,
            worldgen: WorldGenParams::default(),
            starter_items: None,
            snapshot_every_ticks: default_snapshot_every_ticks(),
            director_every_ticks: default_director_every_ticks(),
            rate_limits: RateLimitConfig::default(),
            law_notice_ticks: default_law_ticks(),
            law_vote_ticks: default_law_ticks(),
            blueprint_auto_pull_range: default_blueprint_auto_pull_range(),
            blueprint_blocks_per_tick: default_blueprint_blocks_per_tick(),
            access_pass_core_radius: default_access_pass_core_radius(),
            maintenance_cost: default_maintenance_cost(),
            fun_decay_window_ticks: default_fun_decay_window_ticks(),
            fun_decay_base: default_fun_decay_base(),
            structure_survival_ticks: default_structure_survival_ticks(),
            env_every_ticks: default_env_every_ticks(),
            stats_bucket_ticks: default_stats_bucket_ticks(),
            stats_window_ticks: default_stats_window_ticks(),
        }
    }
}

impl WorldConfig {
    /// Load a single world configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse a single world configuration from YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Apply defaults to every zero or invalid field.
    ///
    /// If no capability flag is set, all of them are turned on.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.id.trim().is_empty() {
            self.id = default_world_id();
        }
        fix_zero(&mut self.tick_rate_hz, default_tick_rate_hz());
        fix_zero(&mut self.day_ticks, default_day_ticks());
        if self.season_length_ticks == 0 {
            self.season_length_ticks = self.day_ticks.saturating_mul(7);
        }
        fix_zero(&mut self.obs_radius, default_obs_radius());
        fix_zero(&mut self.height, default_height());
        if self.boundary_r <= 0 {
            self.boundary_r = default_boundary_r();
        }
        fix_zero(&mut self.switch_cooldown_ticks, default_switch_cooldown_ticks());

        let d = WorldGenParams::default();
        if self.worldgen.biome_region_size <= 0 {
            self.worldgen.biome_region_size = d.biome_region_size;
        }
        if self.worldgen.spawn_clear_radius <= 0 {
            self.worldgen.spawn_clear_radius = d.spawn_clear_radius;
        }
        if self.worldgen.ore_cluster_prob_scale_permille <= 0 {
            self.worldgen.ore_cluster_prob_scale_permille = d.ore_cluster_prob_scale_permille;
        }
        if self.worldgen.terrain_cluster_prob_scale_permille <= 0 {
            self.worldgen.terrain_cluster_prob_scale_permille = d.terrain_cluster_prob_scale_permille;
        }
        fix_zero(&mut self.worldgen.sprinkle_stone_permille, d.sprinkle_stone_permille);
        fix_zero(&mut self.worldgen.sprinkle_dirt_permille, d.sprinkle_dirt_permille);
        fix_zero(&mut self.worldgen.sprinkle_log_permille, d.sprinkle_log_permille);

        if self.starter_items.is_none() {
            self.starter_items = Some(default_starter_items());
        }
        fix_zero(&mut self.snapshot_every_ticks, default_snapshot_every_ticks());
        fix_zero(&mut self.director_every_ticks, default_director_every_ticks());
        self.rate_limits.normalize();
        fix_zero(&mut self.law_notice_ticks, default_law_ticks());
        fix_zero(&mut self.law_vote_ticks, default_law_ticks());
        if self.blueprint_auto_pull_range <= 0 {
            self.blueprint_auto_pull_range = default_blueprint_auto_pull_range();
        }
        fix_zero(&mut self.blueprint_blocks_per_tick, default_blueprint_blocks_per_tick());
        if self.access_pass_core_radius <= 0 {
            self.access_pass_core_radius = default_access_pass_core_radius();
        }
        self.maintenance_cost.retain(|_, n| *n > 0);
        if self.maintenance_cost.is_empty() {
            self.maintenance_cost = default_maintenance_cost();
        }
        fix_zero(&mut self.fun_decay_window_ticks, default_fun_decay_window_ticks());
        if !(self.fun_decay_base > 0.0 && self.fun_decay_base <= 1.0) {
            self.fun_decay_base = default_fun_decay_base();
        }
        fix_zero(&mut self.structure_survival_ticks, default_structure_survival_ticks());
        fix_zero(&mut self.env_every_ticks, default_env_every_ticks());
        fix_zero(&mut self.stats_bucket_ticks, default_stats_bucket_ticks());
        fix_zero(&mut self.stats_window_ticks, default_stats_window_ticks());

        if !(self.allow_claims
            || self.allow_mine
            || self.allow_place
            || self.allow_laws
            || self.allow_trade
            || self.allow_build)
        {
            self.allow_claims = true;
            self.allow_mine = true;
            self.allow_place = true;
            self.allow_laws = true;
            self.allow_trade = true;
            self.allow_build = true;
        }
        self
    }

    /// Reject values that cannot be defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.height != 1 {
            return Err(ConfigError::Invalid {
                reason: format!("height must be 1, got {}", self.height),
            });
        }
        Ok(())
    }

    /// Starter kit for new agents.
    pub fn starter(&self) -> Inventory {
        self.starter_items.clone().unwrap_or_default()
    }

    /// Rate limit for an action kind.
    pub const fn rate_limit(&self, kind: &str) -> RateLimitSpec {
        self.rate_limits.spec(kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gets_every_default() {
        let cfg = WorldConfig::parse("id: W1").unwrap().normalized();
        assert_eq!(cfg.id, "W1");
        assert_eq!(cfg.tick_rate_hz, 5);
        assert_eq!(cfg.season_length_ticks, 6000 * 7);
        assert_eq!(cfg.starter(), default_starter_items());
        assert!(cfg.allow_claims && cfg.allow_trade && cfg.allow_build);
        assert_eq!(cfg.rate_limit(RATE_POST_BOARD), RateLimitSpec::new(1, 600));
    }

    #[test]
    fn zeros_are_replaced() {
        let yaml = "
id: W2
day_ticks: 0
obs_radius: 0
fun_decay_base: 3.5
maintenance_cost: { COAL: 0 }
rate_limits: { say_max: 0, say_window_ticks: 10 }
";
        let cfg = WorldConfig::parse(yaml).unwrap().normalized();
        assert_eq!(cfg.day_ticks, 6000);
        assert_eq!(cfg.obs_radius, 7);
        assert!((cfg.fun_decay_base - 0.70).abs() < f64::EPSILON);
        assert_eq!(cfg.maintenance_cost, default_maintenance_cost());
        assert_eq!(cfg.rate_limit(RATE_SAY), RateLimitSpec::new(5, 10));
    }

    #[test]
    fn explicit_capabilities_are_kept() {
        let cfg = WorldConfig::parse("allow_trade: true").unwrap().normalized();
        assert!(cfg.allow_trade);
        assert!(!cfg.allow_claims);
    }

    #[test]
    fn empty_starter_kit_is_respected() {
        let cfg = WorldConfig::parse("starter_items: {}").unwrap().normalized();
        assert!(cfg.starter().is_empty());
    }

    #[test]
    fn height_must_be_one() {
        let cfg = WorldConfig {
            height: 2,
            ..WorldConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(WorldConfig::default().normalized().validate().is_ok());
    }
}
