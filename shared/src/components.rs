//! Entity identity and state types shared between the wire protocol and the
//! simulation.

use serde::{Deserialize, Serialize};

use crate::tile::TilePos;

/// The closed set of simulated entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Npc,
    GroundItem,
    WorldEntity,
}

/// A (kind, id) reference. Ids are dense 32-bit integers per kind; holding a
/// ref never implies the entity still exists; lookup failure is a normal
/// control-flow signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u32,
}

impl EntityRef {
    pub fn player(id: u32) -> Self {
        Self { kind: EntityKind::Player, id }
    }

    pub fn npc(id: u32) -> Self {
        Self { kind: EntityKind::Npc, id }
    }

    pub fn ground_item(id: u32) -> Self {
        Self { kind: EntityKind::GroundItem, id }
    }

    pub fn world_entity(id: u32) -> Self {
        Self { kind: EntityKind::WorldEntity, id }
    }
}

/// Privilege tier of a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayerType {
    #[default]
    Normal,
    Moderator,
    Admin,
}

/// Player state machine. Movement plans only exist for the moving-class
/// states (`Moving` and the three combat-pursuit states).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayerStateKind {
    #[default]
    Idle,
    Moving,
    MeleeCombat,
    RangeCombat,
    MagicCombat,
    Stunned,
    Dead,
    Trading,
    Banking,
    Shopping,
    Skilling,
    InDialogue,
}

impl PlayerStateKind {
    pub fn is_moving_class(self) -> bool {
        matches!(
            self,
            PlayerStateKind::Moving
                | PlayerStateKind::MeleeCombat
                | PlayerStateKind::RangeCombat
                | PlayerStateKind::MagicCombat
        )
    }

    pub fn is_combat(self) -> bool {
        matches!(
            self,
            PlayerStateKind::MeleeCombat | PlayerStateKind::RangeCombat | PlayerStateKind::MagicCombat
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NpcStateKind {
    #[default]
    Idle,
    Wandering,
    Combat,
    Dead,
}

/// Sparse per-player toggles and small numeric options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerSetting {
    IsSprinting,
    AutoRetaliate,
    AttackStyle,
    ChatEffects,
}

/// Visual identity replicated in the entered-chunk snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerAppearance {
    pub gender: u8,
    pub hair: u8,
    pub hair_color: u8,
    pub skin_tone: u8,
}

/// Where a ground item came from. Spawned items replenish at their spawn
/// point; dropped items do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroundItemSource {
    Spawn,
    Drop,
}

/// Facing of door-like world entities; decides which tile edge the entity
/// blocks and which neighbour counts as "in front".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EntityOrientation {
    #[default]
    North,
    East,
    South,
    West,
}

impl EntityOrientation {
    pub fn delta(self) -> (i32, i32) {
        match self {
            EntityOrientation::North => (0, 1),
            EntityOrientation::East => (1, 0),
            EntityOrientation::South => (0, -1),
            EntityOrientation::West => (-1, 0),
        }
    }
}

/// Full initial state sent to a viewer when a player enters their view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: u32,
    pub display_name: String,
    pub pos: TilePos,
    pub state: PlayerStateKind,
    pub combat_level: u8,
    pub appearance: PlayerAppearance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcSnapshot {
    pub npc_id: u32,
    pub definition_id: u32,
    pub pos: TilePos,
    pub state: NpcStateKind,
    pub hitpoints_current: u32,
    pub hitpoints_max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundItemSnapshot {
    pub ground_item_id: u32,
    pub item_id: u32,
    pub amount: u32,
    pub is_iou: bool,
    pub pos: TilePos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEntitySnapshot {
    pub world_entity_id: u32,
    pub definition_id: u32,
    pub pos: TilePos,
    pub orientation: EntityOrientation,
    pub exhausted: bool,
}
