//! Spell catalog: combat, status, teleport and inventory spells.

use serde::{Deserialize, Serialize};

use crate::items::{ItemId, ItemStack};
use crate::skills::SkillKind;
use crate::tile::TilePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SpellId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpellEffect {
    /// Direct damage with a projectile animation.
    Combat { max_hit: u8, projectile_id: u32 },
    /// Drains a target's skill by a flat amount (floored at 1 boosted).
    Status { drains: SkillKind, amount: u8, projectile_id: u32 },
    /// Moves the caster; map-level changes discard any movement plan.
    Teleport { destination: TilePos },
    /// Transforms an inventory item (e.g. ore to bars, item to IOU).
    Inventory { from_item: ItemId, to_item: ItemId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellDefinition {
    pub id: SpellId,
    pub name: String,
    pub required_magic: u8,
    pub xp: u32,
    /// Runes consumed per cast.
    pub runes: Vec<ItemStack>,
    pub effect: SpellEffect,
    /// Eligible for auto-cast in magic combat.
    pub auto_castable: bool,
}

#[derive(Debug, Default, Clone)]
pub struct SpellCatalog {
    defs: std::collections::HashMap<u32, SpellDefinition>,
}

impl SpellCatalog {
    pub fn from_defs(defs: Vec<SpellDefinition>) -> Result<Self, String> {
        let mut map = std::collections::HashMap::new();
        for def in defs {
            let id = def.id.0;
            if map.insert(id, def).is_some() {
                return Err(format!("Duplicate spell definition id {}", id));
            }
        }
        Ok(Self { defs: map })
    }

    pub fn load_ron(text: &str) -> Result<Self, String> {
        let defs: Vec<SpellDefinition> =
            ron::from_str(text).map_err(|e| format!("Spell catalog parse error: {}", e))?;
        Self::from_defs(defs)
    }

    pub fn get(&self, id: SpellId) -> Option<&SpellDefinition> {
        self.defs.get(&id.0)
    }
}
