//! World entities: immovable scenery the player can act on (doors,
//! ladders, resource nodes, chests). Definitions and the scripted action
//! overrides both come from ron content validated at startup.

use serde::{Deserialize, Serialize};

use crate::components::EntityOrientation;
use crate::items::{ItemId, ItemStack};
use crate::loot::LootTableId;
use crate::npc::NpcDefinitionId;
use crate::skills::SkillKind;
use crate::tile::TilePos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct WorldEntityDefinitionId(pub u32);

/// Content-driven verbs a world entity can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityVerb {
    Open,
    Chop,
    Mine,
    Fish,
    Search,
    Picklock,
    Unlock,
    Climb,
    Enter,
    Exit,
}

/// Resource-node behaviour: which skill harvests it and how it replenishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub skill: SkillKind,
    pub required_level: u8,
    pub xp: u32,
    pub loot: LootTableId,
    /// Percent chance per harvest that the node exhausts.
    pub exhaust_percent: u8,
    pub replenish_ticks: u32,
}

/// Immutable content metadata for one world-entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEntityDefinition {
    pub id: WorldEntityDefinitionId,
    pub name: String,
    pub examine: String,
    /// Tile footprint (width, length) before orientation.
    pub footprint: (u8, u8),
    pub supported_actions: Vec<EntityVerb>,
    /// Footprint tiles are impassable.
    pub is_solid: bool,
    pub blocks_projectiles: bool,
    /// Door-like: blocks a single tile edge instead of its footprint.
    pub is_door: bool,
    pub resource: Option<ResourceInfo>,
    /// Loot granted by Search, when any.
    pub search_loot: Option<LootTableId>,
}

impl WorldEntityDefinition {
    /// Minimal definition for tests.
    pub fn simple(id: u32, name: &str, actions: Vec<EntityVerb>) -> Self {
        Self {
            id: WorldEntityDefinitionId(id),
            name: name.to_string(),
            examine: String::new(),
            footprint: (1, 1),
            supported_actions: actions,
            is_solid: true,
            blocks_projectiles: false,
            is_door: false,
            resource: None,
            search_loot: None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorldEntityCatalog {
    defs: std::collections::HashMap<u32, WorldEntityDefinition>,
}

impl WorldEntityCatalog {
    pub fn from_defs(defs: Vec<WorldEntityDefinition>) -> Result<Self, String> {
        let mut map = std::collections::HashMap::new();
        for def in defs {
            let id = def.id.0;
            if map.insert(id, def).is_some() {
                return Err(format!("Duplicate world entity definition id {}", id));
            }
        }
        Ok(Self { defs: map })
    }

    pub fn load_ron(text: &str) -> Result<Self, String> {
        let defs: Vec<WorldEntityDefinition> =
            ron::from_str(text).map_err(|e| format!("World entity catalog parse error: {}", e))?;
        Self::from_defs(defs)
    }

    pub fn get(&self, id: WorldEntityDefinitionId) -> Option<&WorldEntityDefinition> {
        self.defs.get(&id.0)
    }
}

/// One world-entity placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEntityPlacement {
    pub definition: WorldEntityDefinitionId,
    pub pos: TilePos,
    pub orientation: EntityOrientation,
    /// Per-placement loot override (e.g. a specific chest's contents).
    pub loot_override: Option<LootTableId>,
}

pub fn load_placements_ron(text: &str) -> Result<Vec<WorldEntityPlacement>, String> {
    ron::from_str(text).map_err(|e| format!("World entity placement parse error: {}", e))
}

// =============================================================================
// SCRIPTED ACTION OVERRIDES
// =============================================================================

/// A requirement gated before a scripted action runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionRequirement {
    Skill { kind: SkillKind, level: u8 },
    Item { item: ItemStack, consumed: bool },
}

/// One step of a scripted override action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionScriptStep {
    TeleportTo { destination: TilePos },
    GoThroughDoor { outside: TilePos, inside: TilePos },
    MineThroughRocks { from: TilePos, to: TilePos },
    ClimbSameMapLevel { destination: TilePos },
    PlayerGiveItems { items: Vec<ItemStack> },
    StartBanking,
    SpawnInstancedNpc { definition: NpcDefinitionId, offset: (i32, i32) },
}

/// A scripted action registered for a (definition, verb) pair, replacing the
/// default behaviour of that verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOverride {
    pub entity_definition: WorldEntityDefinitionId,
    pub action: EntityVerb,
    pub requirements: Vec<ActionRequirement>,
    /// Requirements normally apply only when crossing outside-to-inside;
    /// this opts into checking both directions.
    pub check_requirements_from_both_sides: bool,
    /// With bidirectional checks, the inside face of the door stays locked
    /// after passing through.
    pub does_lock_after_entering: bool,
    pub failure_message: String,
    pub steps: Vec<ActionScriptStep>,
}

#[derive(Debug, Default, Clone)]
pub struct ActionOverrides {
    by_key: std::collections::HashMap<(u32, EntityVerb), ActionOverride>,
}

impl ActionOverrides {
    /// Builds the registry, validating shape: every override needs at least
    /// one step, and door steps need distinct sides.
    pub fn from_overrides(overrides: Vec<ActionOverride>) -> Result<Self, String> {
        let mut by_key = std::collections::HashMap::new();
        for ov in overrides {
            if ov.steps.is_empty() {
                return Err(format!(
                    "Override for entity {} has no steps",
                    ov.entity_definition.0
                ));
            }
            for step in &ov.steps {
                if let ActionScriptStep::GoThroughDoor { outside, inside } = step {
                    if outside == inside {
                        return Err(format!(
                            "GoThroughDoor for entity {} has identical sides",
                            ov.entity_definition.0
                        ));
                    }
                }
            }
            let key = (ov.entity_definition.0, ov.action);
            if by_key.insert(key, ov).is_some() {
                return Err(format!(
                    "Duplicate override for entity {} action {:?}",
                    key.0, key.1
                ));
            }
        }
        Ok(Self { by_key })
    }

    pub fn load_ron(text: &str) -> Result<Self, String> {
        let overrides: Vec<ActionOverride> =
            ron::from_str(text).map_err(|e| format!("Action override parse error: {}", e))?;
        Self::from_overrides(overrides)
    }

    pub fn get(&self, definition: WorldEntityDefinitionId, action: EntityVerb) -> Option<&ActionOverride> {
        self.by_key.get(&(definition.0, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::MapLevel;

    #[test]
    fn override_validation_rejects_empty_steps() {
        let ov = ActionOverride {
            entity_definition: WorldEntityDefinitionId(1),
            action: EntityVerb::Open,
            requirements: Vec::new(),
            check_requirements_from_both_sides: false,
            does_lock_after_entering: false,
            failure_message: String::new(),
            steps: Vec::new(),
        };
        assert!(ActionOverrides::from_overrides(vec![ov]).is_err());
    }

    #[test]
    fn override_validation_rejects_degenerate_door() {
        let pos = TilePos::new(MapLevel::Overworld, 4, 4);
        let ov = ActionOverride {
            entity_definition: WorldEntityDefinitionId(1),
            action: EntityVerb::Open,
            requirements: Vec::new(),
            check_requirements_from_both_sides: false,
            does_lock_after_entering: false,
            failure_message: String::new(),
            steps: vec![ActionScriptStep::GoThroughDoor { outside: pos, inside: pos }],
        };
        assert!(ActionOverrides::from_overrides(vec![ov]).is_err());
    }

    #[test]
    fn lookup_is_keyed_by_definition_and_verb() {
        let pos_a = TilePos::new(MapLevel::Overworld, 4, 4);
        let pos_b = TilePos::new(MapLevel::Overworld, 4, 5);
        let ov = ActionOverride {
            entity_definition: WorldEntityDefinitionId(2),
            action: EntityVerb::Open,
            requirements: Vec::new(),
            check_requirements_from_both_sides: false,
            does_lock_after_entering: false,
            failure_message: String::new(),
            steps: vec![ActionScriptStep::GoThroughDoor { outside: pos_a, inside: pos_b }],
        };
        let reg = ActionOverrides::from_overrides(vec![ov]).unwrap();
        assert!(reg.get(WorldEntityDefinitionId(2), EntityVerb::Open).is_some());
        assert!(reg.get(WorldEntityDefinitionId(2), EntityVerb::Search).is_none());
        assert!(reg.get(WorldEntityDefinitionId(3), EntityVerb::Open).is_none());
    }
}
