//! The in-process event bus.
//!
//! Subsystems never call the visibility layer directly: they write
//! [`GameEvent`] values through a `MessageWriter` and the visibility system
//! reads them all at the end of the tick, in emission order. One enum (not
//! one message type per event) is what preserves ordering across event
//! kinds for any given viewer.

use bevy::prelude::*;

use shared::components::{EntityRef, PlayerStateKind};
use shared::tile::TilePos;

#[derive(Message, Debug, Clone)]
pub enum GameEvent {
    // Players
    PlayerJoined { user_id: u32 },
    PlayerLeft { user_id: u32, at: TilePos },
    PlayerMoved { user_id: u32, from: TilePos, to: TilePos, running: bool },
    PlayerTeleported { user_id: u32, from: TilePos, to: TilePos },
    PlayerWentThroughDoor { user_id: u32, from: TilePos, to: TilePos },
    PlayerStateChanged { user_id: u32, state: PlayerStateKind },
    PlayerEquipmentChanged { user_id: u32 },
    PlayerDied { user_id: u32, at: TilePos },

    // NPCs
    NpcSpawned { npc_id: u32 },
    NpcDespawned { npc_id: u32, at: TilePos },
    NpcMoved { npc_id: u32, from: TilePos, to: TilePos },
    NpcDied { npc_id: u32, at: TilePos },

    // Ground items
    ItemSpawned { ground_item_id: u32 },
    ItemRemoved { ground_item_id: u32, at: TilePos },
    ItemBecameVisibleToAll { ground_item_id: u32 },

    // Combat & interaction
    EntityDamaged { target: EntityRef, amount: u32, hp_current: u32, hp_max: u32 },
    ProjectileFired { from: EntityRef, target: EntityRef, projectile_id: u32 },
    TargetingStarted { source: EntityRef, target: EntityRef },
    TargetingStopped { source: EntityRef },

    // Chat
    PublicChat { user_id: u32, message: String, style: u8 },
    ForcedSpeech { entity: EntityRef, message: String },

    // World entities
    ResourcesExhausted { world_entity_id: u32 },
    ResourcesReplenished { world_entity_id: u32 },
}
