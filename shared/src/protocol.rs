//! Network protocol definition.
//!
//! All traffic between client and server travels as two message enums:
//! [`ClientIntent`] (client to server) and [`ServerPacket`] (server to
//! client), each on its own ordered-reliable channel. A single ordered
//! channel per direction is what gives the simulation its two ordering
//! guarantees: per-session intents are processed in arrival order, and each
//! viewer receives packets in the order the server emitted them.

use std::sync::OnceLock;
use std::time::Duration;

use bevy::prelude::*;
use lightyear::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::{
    EntityKind, GroundItemSnapshot, NpcSnapshot, PlayerAppearance, PlayerSetting,
    PlayerSnapshot, PlayerStateKind, WorldEntitySnapshot,
};
use crate::items::ItemId;
use crate::skills::SkillKind;
use crate::spells::SpellId;
use crate::tile::TilePos;
use crate::world_entity::EntityVerb;

// --- Actions ---

/// What a `PerformActionOnEntity` intent asks for. The environment verbs are
/// content-driven; the rest are fixed per target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetAction {
    Grab,
    Attack,
    TalkTo,
    Shop,
    Pickpocket,
    Follow,
    TradeWith,
    Moderate,
    Environment(EntityVerb),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryItemAction {
    Eat,
    Drink,
    Equip,
    Unequip,
    Drop,
    Examine,
    /// Bank menu only.
    Deposit,
    /// Bank menu (to inventory) or trade menu (retract an offer).
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MenuKind {
    Inventory,
    Bank,
    Shop,
    Trade,
}

/// Trade cancellation reasons, by wire code.
pub const TRADE_CANCEL_NO_SPACE: u8 = 0;
pub const TRADE_CANCEL_CANCELLED: u8 = 1;
pub const TRADE_CANCEL_OTHER_NO_SPACE: u8 = 2;
pub const TRADE_CANCEL_OTHER_CANCELLED: u8 = 3;

// --- Client -> Server ---

/// Everything a client can ask the simulation to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientIntent {
    /// Login handshake; must arrive before any other intent is honoured.
    SubmitPlayerName { name: String },
    SendMovementPath { x: i32, y: i32 },
    PerformActionOnEntity {
        action: TargetAction,
        entity_kind: EntityKind,
        entity_id: u32,
    },
    InvokeInventoryItemAction {
        action: InventoryItemAction,
        menu: MenuKind,
        slot: u8,
        item_id: ItemId,
        amount: u32,
        is_iou: bool,
    },
    SwitchToIdleState,
    UseItemOnEntity { slot: u8, entity_kind: EntityKind, entity_id: u32 },
    UseItemOnItem { from_slot: u8, to_slot: u8 },
    CastSingleCombatOrStatusSpell {
        spell_id: SpellId,
        target_kind: EntityKind,
        target_id: u32,
    },
    CastInventorySpell { spell_id: SpellId, slot: u8 },
    CastTeleportSpell { spell_id: SpellId },
    ToggleAutoCast { spell_id: Option<SpellId> },
    /// 0 = decline, 1 = accept.
    UpdateTradeStatus { status: u8 },
    PublicMessage { message: String, style: u8 },
    ChangePlayerSetting { setting: PlayerSetting, value: i32 },
    ReorganizeInventorySlots { from: u8, to: u8 },
    CreateItem { item_id: ItemId, amount: u32 },
    ChangeAppearance { appearance: PlayerAppearance },
    Logout,
    SelectNpcConversationOption { option: u8 },
}

// --- Server -> Client ---

/// Everything the server tells a client. One enum so a single ordered
/// channel preserves intra-viewer causality across packet kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerPacket {
    // Login
    LoginAccepted { user_id: u32, pos: TilePos },
    LoginRejected { reason: String },

    // Per-viewer chunk entry/exit
    PlayerEnteredChunk(PlayerSnapshot),
    PlayerExitedChunk { user_id: u32 },
    NpcEnteredChunk(NpcSnapshot),
    NpcExitedChunk { npc_id: u32 },
    GroundItemEnteredChunk(GroundItemSnapshot),
    GroundItemExitedChunk { ground_item_id: u32 },
    WorldEntityEnteredChunk(WorldEntitySnapshot),
    WorldEntityExitedChunk { world_entity_id: u32 },

    // Movement & state
    EntityMoveTo { kind: EntityKind, id: u32, x: i32, y: i32, running: bool },
    TeleportTo { kind: EntityKind, id: u32, pos: TilePos },
    WentThroughDoor { kind: EntityKind, id: u32, pos: TilePos },
    EnteredIdleState { kind: EntityKind, id: u32 },
    EntityStateChanged { kind: EntityKind, id: u32, state: PlayerStateKind },
    StartedTargeting { kind: EntityKind, id: u32, target_kind: EntityKind, target_id: u32 },
    StoppedTargeting { kind: EntityKind, id: u32 },
    StartedSkilling { user_id: u32, skill: SkillKind },
    StartedShopping { shop_id: u32 },
    StartedBanking,
    PathfindingFailed,

    // Combat
    ShowDamage { kind: EntityKind, id: u32, amount: u32 },
    FiredProjectile {
        from_kind: EntityKind,
        from_id: u32,
        target_kind: EntityKind,
        target_id: u32,
        projectile_id: u32,
    },
    HitpointsCurrentLevelChanged { kind: EntityKind, id: u32, current: u32, max: u32 },
    PlayerDied { user_id: u32 },

    // Chat
    PlayerMessage { user_id: u32, message: String, style: u8 },
    ForcePublicMessage { kind: EntityKind, id: u32, message: String },
    /// Short server-to-player info line ("Can't reach that.").
    GameMessage { message: String },

    // Player data
    PlayerSettingChanged { setting: PlayerSetting, value: i32 },
    PlayerSkillLevelIncreased { skill: SkillKind, level: u8 },
    PlayerCombatLevelIncreased { level: u8 },
    SkillCurrentLevelChanged { skill: SkillKind, boosted: u8, base: u8 },
    ShowSkillCurrentLevelIncreasedOrDecreasedMessage { skill: SkillKind, increased: bool },
    GainedExp { skill: SkillKind, xp: u32 },
    EquippedItem { slot_index: u8, item_id: ItemId, amount: u32 },
    UnequippedItem { slot_index: u8 },
    AddedItemAtInventorySlot { slot: u8, item_id: ItemId, amount: u32, is_iou: bool },
    RemovedItemFromInventoryAtSlot { slot: u8 },
    InvokedInventoryItemAction { action: InventoryItemAction, success: bool },
    CastedInventorySpell { spell_id: SpellId, slot: u8 },

    // Trade
    TradeRequested { from_user_id: u32 },
    TradeStarted { other_user_id: u32 },
    TradePlayerAccepted { user_id: u32 },
    TradeStatusReset,
    TradeGoToFinalStep,
    TradeOfferChanged { user_id: u32, slot: u8, item_id: ItemId, amount: u32, is_iou: bool },
    TradeCompleted,
    TradeCancelled { reason: u8 },

    // World
    EntityExhaustedResources { world_entity_id: u32 },
    EntityReplenishedResources { world_entity_id: u32 },
    ShowLootMenu { world_entity_id: u32, items: Vec<(ItemId, u32)> },
    NpcConversation { npc_id: u32, text: String, options: Vec<String> },

    LoggedOut,
}

// --- Channels ---
// The Channel trait is auto-implemented for all Send + Sync + 'static types.

/// Ordered-reliable channel for client intents.
pub struct IntentChannel;

/// Ordered-reliable channel for server packets; ordering here is a protocol
/// guarantee, not an optimization.
pub struct PacketChannel;

// --- Protocol Plugin ---

pub struct ProtocolPlugin;

impl Plugin for ProtocolPlugin {
    fn build(&self, app: &mut App) {
        // No replicated components: all world state reaches clients through
        // explicit per-viewer packets emitted by the visibility system.
        app.register_message::<ClientIntent>()
            .add_direction(NetworkDirection::ClientToServer);
        app.register_message::<ServerPacket>()
            .add_direction(NetworkDirection::ServerToClient);

        app.add_channel::<IntentChannel>(ChannelSettings {
            mode: ChannelMode::OrderedReliable(ReliableSettings::default()),
            ..default()
        })
        .add_direction(NetworkDirection::ClientToServer);

        app.add_channel::<PacketChannel>(ChannelSettings {
            mode: ChannelMode::OrderedReliable(ReliableSettings::default()),
            ..default()
        })
        .add_direction(NetworkDirection::ServerToClient);
    }
}

// --- Network / tick configuration ---

pub const SERVER_PORT: u16 = 5000;
pub const PROTOCOL_ID: u64 = 0x53504C4C_u64;

/// Server bind address; 0.0.0.0 works for local and containerized deploys.
pub fn get_server_bind_addr() -> &'static str {
    "0.0.0.0"
}

/// Shared private key for local development (use proper key management in
/// production!)
pub const PRIVATE_KEY: [u8; 32] = [
    0x21, 0x03, 0x05, 0x07, 0x0b, 0x0d, 0x11, 0x13,
    0x17, 0x1d, 0x1f, 0x25, 0x29, 0x2b, 0x2f, 0x35,
    0x3b, 0x3d, 0x43, 0x47, 0x49, 0x4f, 0x53, 0x59,
    0x61, 0x65, 0x67, 0x6b, 0x6d, 0x71, 0x7f, 0x83,
];

pub const DEFAULT_TICK_MS: u64 = 600;

/// Tick length in milliseconds. `TICK_MS` is read from the environment once
/// at startup; later changes to the variable have no effect.
pub fn tick_ms() -> u64 {
    static TICK_MS: OnceLock<u64> = OnceLock::new();
    *TICK_MS.get_or_init(|| {
        std::env::var("TICK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TICK_MS)
    })
}

/// Tick duration for the schedule runner and the netcode plugins.
pub fn tick_duration() -> Duration {
    Duration::from_millis(tick_ms())
}
