//! NPC content definitions and spawn tables.

use serde::{Deserialize, Serialize};

use crate::components::EntityOrientation;
use crate::loot::LootTableId;
use crate::spells::SpellId;
use crate::tile::TilePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct NpcDefinitionId(pub u32);

/// Interactions a player can request on an NPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NpcInteraction {
    Attack,
    TalkTo,
    Shop,
    Pickpocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NpcAttackStyle {
    #[default]
    Melee,
    Ranged,
    Magic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickpocketInfo {
    pub required_thieving: u8,
    pub xp: u32,
    pub loot: LootTableId,
    /// Base failure chance in percent at the required level.
    pub fail_percent: u8,
    /// Blocking stun on failure, in ticks.
    pub stun_ticks: u32,
}

/// Immutable content metadata for one NPC kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcDefinition {
    pub id: NpcDefinitionId,
    pub name: String,
    pub examine: String,
    pub interactions: Vec<NpcInteraction>,

    // Combat
    pub hitpoints: u32,
    pub combat_level: u8,
    pub attack_level: u8,
    pub strength_level: u8,
    pub defence_level: u8,
    pub max_hit: u8,
    pub attack_speed_ticks: u32,
    pub attack_style: NpcAttackStyle,
    /// Spell cast instead of a regular attack, for caster NPCs.
    pub auto_cast_spell: Option<SpellId>,

    // Aggression & movement
    /// Zero means passive.
    pub aggro_radius: u32,
    /// Half-extent of the movement-area box around the spawn tile.
    pub wander_radius: u32,
    /// Tiles advanced per tick.
    pub speed: u8,
    /// Wander pacing bounds in wall-clock ms.
    pub wander_interval_ms: (u64, u64),

    // Lifecycle
    pub despawn_ticks: u32,
    pub respawn_ticks: u32,
    pub drop_table: Option<LootTableId>,
    pub shop_id: Option<u32>,
    pub pickpocket: Option<PickpocketInfo>,
    pub dialogue: Vec<String>,
}

impl NpcDefinition {
    /// Minimal definition for tests.
    pub fn simple(id: u32, name: &str) -> Self {
        Self {
            id: NpcDefinitionId(id),
            name: name.to_string(),
            examine: String::new(),
            interactions: vec![NpcInteraction::Attack, NpcInteraction::TalkTo],
            hitpoints: 10,
            combat_level: 3,
            attack_level: 1,
            strength_level: 1,
            defence_level: 1,
            max_hit: 1,
            attack_speed_ticks: 4,
            attack_style: NpcAttackStyle::Melee,
            auto_cast_spell: None,
            aggro_radius: 0,
            wander_radius: 4,
            speed: 1,
            wander_interval_ms: (4_000, 12_000),
            despawn_ticks: 3,
            respawn_ticks: 50,
            drop_table: None,
            shop_id: None,
            pickpocket: None,
            dialogue: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct NpcCatalog {
    defs: std::collections::HashMap<u32, NpcDefinition>,
}

impl NpcCatalog {
    pub fn from_defs(defs: Vec<NpcDefinition>) -> Result<Self, String> {
        let mut map = std::collections::HashMap::new();
        for def in defs {
            let id = def.id.0;
            if map.insert(id, def).is_some() {
                return Err(format!("Duplicate NPC definition id {}", id));
            }
        }
        Ok(Self { defs: map })
    }

    pub fn load_ron(text: &str) -> Result<Self, String> {
        let defs: Vec<NpcDefinition> =
            ron::from_str(text).map_err(|e| format!("NPC catalog parse error: {}", e))?;
        Self::from_defs(defs)
    }

    pub fn get(&self, id: NpcDefinitionId) -> Option<&NpcDefinition> {
        self.defs.get(&id.0)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// One NPC placement in the world spawn table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSpawn {
    pub definition: NpcDefinitionId,
    pub pos: TilePos,
    pub facing: EntityOrientation,
}

pub fn load_spawns_ron(text: &str) -> Result<Vec<NpcSpawn>, String> {
    ron::from_str(text).map_err(|e| format!("NPC spawn table parse error: {}", e))
}

/// Axis-aligned wander/aggro box. `min`/`max` are inclusive tile bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementArea {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl MovementArea {
    pub fn around(pos: (i32, i32), radius: u32) -> Self {
        let r = radius as i32;
        Self {
            min_x: pos.0 - r,
            min_y: pos.1 - r,
            max_x: pos.0 + r,
            max_y: pos.1 + r,
        }
    }

    pub fn contains(&self, pos: (i32, i32)) -> bool {
        pos.0 >= self.min_x && pos.0 <= self.max_x && pos.1 >= self.min_y && pos.1 <= self.max_y
    }

    /// Strictly inside: on none of the boundary tiles. Aggro initiation uses
    /// this; a player straddling the edge is not acquired.
    pub fn contains_interior(&self, pos: (i32, i32)) -> bool {
        pos.0 > self.min_x && pos.0 < self.max_x && pos.1 > self.min_y && pos.1 < self.max_y
    }

    /// Inside or within one tile of the box. Aggro maintenance uses this, so
    /// a chased player can be followed one step past the edge.
    pub fn contains_or_adjacent(&self, pos: (i32, i32)) -> bool {
        pos.0 >= self.min_x - 1
            && pos.0 <= self.max_x + 1
            && pos.1 >= self.min_y - 1
            && pos.1 <= self.max_y + 1
    }

    pub fn clamp(&self, pos: (i32, i32)) -> (i32, i32) {
        (pos.0.clamp(self.min_x, self.max_x), pos.1.clamp(self.min_y, self.max_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_area_boundary_rules() {
        let area = MovementArea::around((10, 10), 3);
        // Boundary tile: contained but not interior.
        assert!(area.contains((13, 10)));
        assert!(!area.contains_interior((13, 10)));
        assert!(area.contains_interior((12, 10)));
        // One past the edge: tolerated for maintenance only.
        assert!(!area.contains((14, 10)));
        assert!(area.contains_or_adjacent((14, 10)));
        assert!(!area.contains_or_adjacent((15, 10)));
    }

    #[test]
    fn clamp_pulls_back_into_box() {
        let area = MovementArea::around((0, 0), 2);
        assert_eq!(area.clamp((5, -7)), (2, -2));
        assert_eq!(area.clamp((1, 1)), (1, 1));
    }
}
