//! Content catalogs: blocks, items, recipes, blueprints, law and event
//! templates, and the mining tool table.
//!
//! Catalogs are loaded from a YAML document, validated for duplicate ids
//! and dangling references, and indexed for the lookups the engine does
//! every tick. A built-in catalog ships with the crate and is used when no
//! path is configured.
//!
//! # Block palette
//!
//! Blocks are stored in chunks as `u16` palette indices. `AIR` is always
//! index 0; every other block follows in lexicographic id order, so two
//! processes loading the same catalog agree on every index.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use voxelcraft_types::Vec3i;

use crate::error::CatalogError;

/// The catalog bundled with the crate.
pub const BUILTIN_CATALOG_YAML: &str = include_str!("../data/catalogs.yaml");

/// Station id for recipes crafted by hand.
pub const STATION_HAND: &str = "HAND";

/// Item burned as smelting fuel; never used as a smelt key.
pub const FUEL_ITEM: &str = "COAL";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A block type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDef {
    /// Block id, e.g. `STONE`.
    pub id: String,
    /// Whether agents and items are stopped by this block.
    #[serde(default)]
    pub solid: bool,
    /// Whether MINE may remove it.
    #[serde(default)]
    pub breakable: bool,
    /// Item dropped when mined.
    #[serde(default)]
    pub drops: Option<String>,
    /// Tool family that speeds up mining.
    #[serde(default)]
    pub tool: Option<String>,
    /// Whether the block carries a container inventory.
    #[serde(default)]
    pub container: bool,
}

/// Item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    /// Placeable block item.
    Block,
    /// Crafting material.
    Material,
    /// Edible item.
    Food,
    /// Mining tool.
    Tool,
}

/// Tool attributes of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool family, matched against [`BlockDef::tool`].
    pub family: String,
    /// Tier index into the mining table.
    pub tier: u32,
}

/// An item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDef {
    /// Item id.
    pub id: String,
    /// Category.
    pub kind: ItemKind,
    /// Block placed by PLACE.
    #[serde(default)]
    pub place_as: Option<String>,
    /// HP restored per unit eaten.
    #[serde(default)]
    pub edible_hp: i32,
    /// Tool attributes.
    #[serde(default)]
    pub tool: Option<ToolDef>,
}

/// An item and a count inside a recipe or blueprint cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCount {
    /// Item id.
    pub item: String,
    /// Units.
    pub count: u32,
}

/// A crafting or smelting recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeDef {
    /// Recipe id.
    pub recipe_id: String,
    /// Station block id, or `HAND`.
    pub station: String,
    /// Consumed items.
    pub inputs: Vec<ItemCount>,
    /// Produced items.
    pub outputs: Vec<ItemCount>,
    /// Difficulty tier; scales the first-craft novelty award.
    #[serde(default)]
    pub tier: u32,
    /// Work ticks per repetition.
    pub time_ticks: u32,
}

/// One block of a blueprint, relative to the anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintBlock {
    /// Offset from the anchor before rotation.
    pub pos: Vec3i,
    /// Block id.
    pub block: String,
}

/// A multi-block building plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintDef {
    /// Blueprint id.
    pub id: String,
    /// Author.
    #[serde(default)]
    pub author: String,
    /// Revision.
    #[serde(default)]
    pub version: u32,
    /// Ordered block list.
    pub blocks: Vec<BlueprintBlock>,
    /// Total item cost, derived from the blocks at load time.
    #[serde(default)]
    pub cost: Vec<ItemCount>,
}

/// A law template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawTemplate {
    /// Template id.
    pub id: String,
    /// Default law title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Required parameter names.
    #[serde(default)]
    pub params: Vec<String>,
}

/// A director world-event template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTemplate {
    /// Event id.
    pub id: String,
    /// Category.
    #[serde(default)]
    pub category: String,
    /// Title shown to agents.
    pub title: String,
    /// Summary shown to agents.
    #[serde(default)]
    pub description: String,
    /// Base sampling weight; zero excludes the event from sampling.
    #[serde(default)]
    pub base_weight: f64,
    /// Duration override; zero means one day.
    #[serde(default)]
    pub duration_ticks: u64,
    /// Radius of the event disk.
    #[serde(default)]
    pub radius: i32,
}

/// One row of the mining tool table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningTier {
    /// Tool tier; 0 is bare hands.
    pub tier: u32,
    /// Work multiplier in permille of the base work ticks.
    pub work_permille: u32,
    /// Stamina consumed per work tick, in milli-units.
    pub stamina_milli: i32,
}

/// The mining tool table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningTable {
    /// Work ticks to break a block by hand.
    pub base_work_ticks: u32,
    /// Per-tier multipliers.
    pub tiers: Vec<MiningTier>,
}

impl MiningTable {
    /// The row for `tier`, falling back to the best row at or below it.
    pub fn tier(&self, tier: u32) -> MiningTier {
        self.tiers
            .iter()
            .filter(|t| t.tier <= tier)
            .max_by_key(|t| t.tier)
            .copied()
            .unwrap_or(MiningTier {
                tier: 0,
                work_permille: 1000,
                stamina_milli: 15,
            })
    }

    /// Work ticks needed to break a block with a tool of `tier`.
    pub fn work_ticks(&self, tier: u32) -> u32 {
        let row = self.tier(tier);
        let scaled = u64::from(self.base_work_ticks)
            .saturating_mul(u64::from(row.work_permille))
            .div_ceil(1000);
        u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
    }
}

/// Raw catalog document layout.
#[derive(Debug, Clone, Deserialize)]
struct CatalogDoc {
    blocks: Vec<BlockDef>,
    items: Vec<ItemDef>,
    #[serde(default)]
    recipes: Vec<RecipeDef>,
    #[serde(default)]
    blueprints: Vec<BlueprintDef>,
    #[serde(default)]
    law_templates: Vec<LawTemplate>,
    #[serde(default)]
    event_templates: Vec<EventTemplate>,
    mining: MiningTable,
}

// ---------------------------------------------------------------------------
// Indexed catalogs
// ---------------------------------------------------------------------------

/// Fully parsed and indexed content catalogs.
#[derive(Debug, Clone)]
pub struct Catalogs {
    /// Block definitions in palette order (index = block id).
    pub palette: Vec<BlockDef>,
    /// Block id string to palette index.
    pub block_index: BTreeMap<String, u16>,
    /// Item definitions by id.
    pub items: BTreeMap<String, ItemDef>,
    /// Recipes by id.
    pub recipes: BTreeMap<String, RecipeDef>,
    /// Furnace recipe id by primary (non-fuel) input item.
    pub smelt_by_input: BTreeMap<String, String>,
    /// Blueprints by id.
    pub blueprints: BTreeMap<String, BlueprintDef>,
    /// Law templates by id.
    pub law_templates: BTreeMap<String, LawTemplate>,
    /// Event templates by id.
    pub event_templates: BTreeMap<String, EventTemplate>,
    /// Item that places each block, for blueprint costs.
    pub block_item: BTreeMap<String, String>,
    /// Mining tool table.
    pub mining: MiningTable,
}

impl Catalogs {
    /// Load the built-in catalog.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::parse(BUILTIN_CATALOG_YAML)
    }

    /// Load a catalog from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate a catalog from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDoc = serde_yml::from_str(yaml)?;
        Self::from_doc(doc)
    }

    fn from_doc(doc: CatalogDoc) -> Result<Self, CatalogError> {
        let mut air: Option<BlockDef> = None;
        let mut rest: BTreeMap<String, BlockDef> = BTreeMap::new();
        for b in doc.blocks {
            if b.id == "AIR" {
                if air.is_some() {
                    return Err(CatalogError::Duplicate { section: "blocks", id: b.id });
                }
                air = Some(b);
                continue;
            }
            if rest.contains_key(&b.id) {
                return Err(CatalogError::Duplicate { section: "blocks", id: b.id });
            }
            rest.insert(b.id.clone(), b);
        }
        let air = air.ok_or(CatalogError::MissingAir)?;
        let mut palette = Vec::with_capacity(rest.len().saturating_add(1));
        palette.push(air);
        palette.extend(rest.into_values());
        if palette.len() > usize::from(u16::MAX) {
            return Err(CatalogError::PaletteOverflow(palette.len()));
        }
        let mut block_index = BTreeMap::new();
        for (i, b) in palette.iter().enumerate() {
            let idx = u16::try_from(i).map_err(|_overflow| CatalogError::PaletteOverflow(i))?;
            block_index.insert(b.id.clone(), idx);
        }

        let mut items = BTreeMap::new();
        for it in doc.items {
            if items.contains_key(&it.id) {
                return Err(CatalogError::Duplicate { section: "items", id: it.id });
            }
            items.insert(it.id.clone(), it);
        }

        for b in &palette {
            if let Some(drop) = &b.drops {
                if !items.contains_key(drop) {
                    return Err(CatalogError::UnknownReference {
                        section: "blocks",
                        id: b.id.clone(),
                        reference: drop.clone(),
                    });
                }
            }
        }

        let mut block_item = BTreeMap::new();
        for it in items.values() {
            if let Some(block) = &it.place_as {
                if !block_index.contains_key(block) {
                    return Err(CatalogError::UnknownReference {
                        section: "items",
                        id: it.id.clone(),
                        reference: block.clone(),
                    });
                }
                block_item.entry(block.clone()).or_insert_with(|| it.id.clone());
            }
        }

        let mut recipes = BTreeMap::new();
        let mut smelt_by_input = BTreeMap::new();
        for r in doc.recipes {
            if recipes.contains_key(&r.recipe_id) {
                return Err(CatalogError::Duplicate { section: "recipes", id: r.recipe_id });
            }
            for ic in r.inputs.iter().chain(r.outputs.iter()) {
                if !items.contains_key(&ic.item) {
                    return Err(CatalogError::UnknownReference {
                        section: "recipes",
                        id: r.recipe_id.clone(),
                        reference: ic.item.clone(),
                    });
                }
            }
            if r.station != STATION_HAND && !block_index.contains_key(&r.station) {
                return Err(CatalogError::UnknownReference {
                    section: "recipes",
                    id: r.recipe_id.clone(),
                    reference: r.station.clone(),
                });
            }
            if r.station == "FURNACE" {
                if let Some(primary) = r.inputs.iter().find(|ic| ic.item != FUEL_ITEM) {
                    smelt_by_input
                        .entry(primary.item.clone())
                        .or_insert_with(|| r.recipe_id.clone());
                }
            }
            recipes.insert(r.recipe_id.clone(), r);
        }

        let mut blueprints = BTreeMap::new();
        for mut bp in doc.blueprints {
            if blueprints.contains_key(&bp.id) {
                return Err(CatalogError::Duplicate { section: "blueprints", id: bp.id });
            }
            let mut cost: BTreeMap<String, u32> = BTreeMap::new();
            for blk in &bp.blocks {
                let item = block_item.get(&blk.block).ok_or_else(|| {
                    CatalogError::UnknownReference {
                        section: "blueprints",
                        id: bp.id.clone(),
                        reference: blk.block.clone(),
                    }
                })?;
                let n = cost.entry(item.clone()).or_insert(0);
                *n = n.saturating_add(1);
            }
            bp.cost = cost
                .into_iter()
                .map(|(item, count)| ItemCount { item, count })
                .collect();
            blueprints.insert(bp.id.clone(), bp);
        }

        let mut law_templates = BTreeMap::new();
        for t in doc.law_templates {
            if law_templates.contains_key(&t.id) {
                return Err(CatalogError::Duplicate { section: "law_templates", id: t.id });
            }
            law_templates.insert(t.id.clone(), t);
        }

        let mut event_templates = BTreeMap::new();
        for t in doc.event_templates {
            if event_templates.contains_key(&t.id) {
                return Err(CatalogError::Duplicate { section: "event_templates", id: t.id });
            }
            event_templates.insert(t.id.clone(), t);
        }

        Ok(Self {
            palette,
            block_index,
            items,
            recipes,
            smelt_by_input,
            blueprints,
            law_templates,
            event_templates,
            block_item,
            mining: doc.mining,
        })
    }

    /// Palette index of a block id.
    pub fn block_id(&self, name: &str) -> Option<u16> {
        self.block_index.get(name).copied()
    }

    /// Block definition for a palette index.
    pub fn block_def(&self, id: u16) -> Option<&BlockDef> {
        self.palette.get(usize::from(id))
    }

    /// Block id string for a palette index; unknown ids read as `AIR`.
    pub fn block_name(&self, id: u16) -> &str {
        self.block_def(id).map_or("AIR", |b| b.id.as_str())
    }

    /// Whether a palette index is solid.
    pub fn is_solid(&self, id: u16) -> bool {
        self.block_def(id).is_some_and(|b| b.solid)
    }

    /// Palette names in index order.
    pub fn palette_names(&self) -> Vec<String> {
        self.palette.iter().map(|b| b.id.clone()).collect()
    }

    /// Highest tool tier of `family` present in an inventory.
    pub fn best_tool_tier(&self, family: &str, inventory: &BTreeMap<String, u32>) -> u32 {
        inventory
            .iter()
            .filter(|(_, n)| **n > 0)
            .filter_map(|(id, _)| self.items.get(id))
            .filter_map(|it| it.tool.as_ref())
            .filter(|t| t.family == family)
            .map(|t| t.tier)
            .max()
            .unwrap_or(0)
    }

    /// Highest-tier tool item of any family in an inventory, for display.
    pub fn main_hand(&self, inventory: &BTreeMap<String, u32>) -> Option<String> {
        inventory
            .iter()
            .filter(|(_, n)| **n > 0)
            .filter_map(|(id, _)| self.items.get(id))
            .filter_map(|it| it.tool.as_ref().map(|t| (t.tier, it.id.clone())))
            .max()
            .map(|(_, id)| id)
    }

    /// Event ids with a positive base weight, sorted.
    pub fn weighted_event_ids(&self) -> BTreeSet<String> {
        self.event_templates
            .values()
            .filter(|t| t.base_weight > 0.0)
            .map(|t| t.id.clone())
            .collect()
    }
}
