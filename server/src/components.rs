//! Server-side ECS components for players, NPCs, ground items and world
//! entities, plus the movement-plan, pending-action and delay records that
//! hang off them.
//!
//! Players and NPCs carry distinct position component types so systems can
//! hold mutable queries over both kinds at once.

use bevy::prelude::*;
use lightyear::prelude::PeerId;
use std::collections::HashMap;

use shared::components::{NpcStateKind, PlayerAppearance, PlayerSetting, PlayerStateKind, PlayerType};
use shared::items::{Bank, Equipment, Inventory, ItemStack};
use shared::loot::LootTableId;
use shared::npc::{MovementArea, NpcDefinitionId};
use shared::player_profile::Abilities;
use shared::protocol::TargetAction;
use shared::skills::SkillSheet;
use shared::spells::SpellId;
use shared::tile::{MapLevel, TilePos};
use shared::world_entity::{EntityVerb, WorldEntityDefinitionId};
use shared::components::{EntityOrientation, GroundItemSource};

// =============================================================================
// PLAYERS
// =============================================================================

/// Identity of a connected player and its network link.
#[derive(Component, Debug, Clone)]
pub struct PlayerHandle {
    pub user_id: u32,
    pub username: String,
    pub display_name: String,
    pub player_type: PlayerType,
    /// The connection entity carrying this player's message sender/receiver.
    pub link: Entity,
    pub peer: PeerId,
}

/// Authoritative player tile position. Kept in lockstep with the spatial
/// index: both change inside the same relocation helper.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerPos(pub TilePos);

/// Volatile per-session player fields.
#[derive(Component, Debug, Clone)]
pub struct PlayerStatus {
    pub state: PlayerStateKind,
    pub appearance: PlayerAppearance,
    pub muted: bool,
    pub current_shop: Option<u32>,
    pub single_cast_spell: Option<SpellId>,
    pub auto_cast_spell: Option<SpellId>,
    pub dialogue_npc: Option<u32>,
    pub last_local_message_tick: u64,
    pub last_edible_action_tick: u64,
    pub last_hit_tick: u64,
    pub last_trade_request_tick: u64,
    pub next_attack_tick: u64,
    pub respawn_at_tick: Option<u64>,
}

impl PlayerStatus {
    pub fn new(appearance: PlayerAppearance, muted: bool) -> Self {
        Self {
            state: PlayerStateKind::Idle,
            appearance,
            muted,
            current_shop: None,
            single_cast_spell: None,
            auto_cast_spell: None,
            dialogue_npc: None,
            last_local_message_tick: 0,
            last_edible_action_tick: 0,
            last_hit_tick: 0,
            last_trade_request_tick: 0,
            next_attack_tick: 0,
            respawn_at_tick: None,
        }
    }
}

/// Carried containers plus the dirty flag that drives autosave.
#[derive(Component, Debug, Clone)]
pub struct Belongings {
    pub inventory: Inventory,
    pub equipment: Equipment,
    pub bank: Bank,
    pub dirty: bool,
}

/// Skill sheet and derived scalars.
#[derive(Component, Debug, Clone)]
pub struct Progress {
    pub skills: SkillSheet,
    pub abilities: Abilities,
    pub combat_level: u8,
    pub weight: f32,
}

/// Sparse settings map.
#[derive(Component, Debug, Clone, Default)]
pub struct Settings(pub HashMap<PlayerSetting, i32>);

impl Settings {
    pub fn get(&self, setting: PlayerSetting) -> i32 {
        self.0.get(&setting).copied().unwrap_or(0)
    }

    pub fn is_sprinting(&self) -> bool {
        self.get(PlayerSetting::IsSprinting) == 1
    }
}

// =============================================================================
// PENDING ACTIONS
// =============================================================================

/// A deferred intent waiting for the player to reach a position or finish a
/// wait countdown. One sum type; per-variant fields only.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    Grab {
        ground_item_id: u32,
    },
    Npc {
        action: TargetAction,
        npc_id: u32,
        retry_count: u32,
        last_known: (i32, i32),
    },
    Player {
        action: TargetAction,
        target_user_id: u32,
        retry_count: u32,
        last_known: (i32, i32),
    },
    Environment {
        action: EntityVerb,
        world_entity_id: u32,
        /// `None` while walking; set to 0 or 1 once in position.
        wait_ticks: Option<u32>,
    },
}

/// Always-present wrapper so one query reaches every player's slot.
#[derive(Component, Debug, Clone, Default)]
pub struct Pending(pub Option<PendingAction>);

// =============================================================================
// MOVEMENT PLANS
// =============================================================================

/// An installed path. Exists only while its owner is in a moving-class
/// state; a plan whose level no longer matches its owner's is stale and gets
/// discarded on the next advance.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementPlan {
    pub level: MapLevel,
    /// Tile sequence starting with the position the plan was made at.
    pub path: Vec<(i32, i32)>,
    pub next_index: usize,
    /// Tiles per tick; recomputed from the sprint setting for players.
    pub speed: u8,
    /// Queue the owner for arrival handling when the plan completes.
    pub notify_arrival: bool,
    /// Skip the automatic transition into `Moving` when scheduling.
    pub preserve_state_on_start: bool,
    /// Skip the automatic transition back to `Idle` on completion.
    pub preserve_state_on_complete: bool,
}

impl MovementPlan {
    pub fn new(level: MapLevel, path: Vec<(i32, i32)>) -> Self {
        Self {
            level,
            path,
            next_index: 1,
            speed: 1,
            notify_arrival: false,
            preserve_state_on_start: false,
            preserve_state_on_complete: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_index >= self.path.len()
    }

    pub fn destination(&self) -> Option<(i32, i32)> {
        self.path.last().copied()
    }
}

#[derive(Component, Debug, Clone, Default)]
pub struct Plan(pub Option<MovementPlan>);

// =============================================================================
// DELAYS
// =============================================================================

/// What fires when a delay reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayCompletion {
    /// Plain expiry (stun wearing off).
    None,
    Search { world_entity_id: u32 },
    Picklock { world_entity_id: u32 },
    Unlock { world_entity_id: u32 },
    Harvest { world_entity_id: u32 },
}

/// A tick countdown attached to a player. Blocking delays stun-lock the
/// dispatcher; non-blocking ones are interrupted by any new action other
/// than chat and logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveDelay {
    pub remaining: u32,
    pub blocking: bool,
    pub completion: DelayCompletion,
}

#[derive(Component, Debug, Clone, Default)]
pub struct Delay(pub Option<ActiveDelay>);

// =============================================================================
// NPCS
// =============================================================================

#[derive(Component, Debug, Clone)]
pub struct NpcHandle {
    pub npc_id: u32,
    pub definition: NpcDefinitionId,
    /// Instanced NPCs belong to one player and only ever aggro them.
    pub owner: Option<u32>,
}

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpcPos(pub TilePos);

#[derive(Component, Debug, Clone)]
pub struct NpcStatus {
    pub state: NpcStateKind,
    pub hitpoints: u32,
    pub hitpoints_max: u32,
    pub next_attack_tick: u64,
    pub spawn_pos: TilePos,
    pub despawn_at_tick: Option<u64>,
    pub respawn_at_tick: Option<u64>,
}

/// Wander pacing and the box the NPC lives in.
#[derive(Component, Debug, Clone)]
pub struct NpcMotion {
    pub area: MovementArea,
    pub next_wander_at_ms: u64,
    pub speed: u8,
}

// =============================================================================
// GROUND ITEMS
// =============================================================================

#[derive(Component, Debug, Clone)]
pub struct GroundItemState {
    pub ground_item_id: u32,
    pub stack: ItemStack,
    pub pos: TilePos,
    pub source: GroundItemSource,
    /// Private drops are only visible to this player until they go public.
    pub visible_to: Option<u32>,
    pub public_at_tick: Option<u64>,
    pub despawn_at_tick: u64,
}

impl GroundItemState {
    /// Whether `user_id` may currently see (and take) this item.
    pub fn visible_to_user(&self, user_id: u32) -> bool {
        match self.visible_to {
            Some(owner) => owner == user_id,
            None => true,
        }
    }
}

// =============================================================================
// WORLD ENTITIES
// =============================================================================

#[derive(Component, Debug, Clone)]
pub struct WorldEntityState {
    pub world_entity_id: u32,
    pub definition: WorldEntityDefinitionId,
    pub pos: TilePos,
    pub orientation: EntityOrientation,
    pub loot_override: Option<LootTableId>,
    /// Set while exhausted; the tick the node replenishes at.
    pub replenish_at_tick: Option<u64>,
    /// Picklockable entities start locked.
    pub locked: bool,
}

impl WorldEntityState {
    pub fn is_exhausted(&self) -> bool {
        self.replenish_at_tick.is_some()
    }
}
