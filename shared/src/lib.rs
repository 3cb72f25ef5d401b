//! Shared definitions: protocol, tile math, pathing grid, catalogs and
//! player containers. Used by the server and the grid baker.

pub mod components;
pub mod items;
pub mod loot;
pub mod npc;
pub mod pathing;
pub mod player_profile;
pub mod protocol;
pub mod skills;
pub mod spells;
pub mod tile;
pub mod world_entity;

pub use components::{
    EntityKind, EntityOrientation, EntityRef, GroundItemSnapshot, GroundItemSource, NpcSnapshot,
    NpcStateKind, PlayerAppearance, PlayerSetting, PlayerSnapshot, PlayerStateKind, PlayerType,
    WorldEntitySnapshot,
};
pub use items::{
    total_weight, Bank, CombatBonuses, EdibleInfo, Equipment, EquipmentSlot, Inventory,
    ItemCatalog, ItemDefinition, ItemId, ItemStack, PotionInfo, WeaponClass, EQUIPMENT_SLOTS,
    INVENTORY_SLOTS,
};
pub use loot::{LootEntry, LootTable, LootTableId, LootTables};
pub use npc::{
    load_spawns_ron, MovementArea, NpcAttackStyle, NpcCatalog, NpcDefinition, NpcDefinitionId,
    NpcInteraction, NpcSpawn, PickpocketInfo,
};
pub use pathing::{BakedGrid, PathingGrid, FULLY_BLOCKED};
pub use player_profile::{Abilities, PlayerProfile, DEFAULT_BANK_CAPACITY, PROFILE_VERSION};
pub use protocol::{
    get_server_bind_addr, tick_duration, tick_ms, ClientIntent, IntentChannel,
    InventoryItemAction, MenuKind, PacketChannel, ProtocolPlugin, ServerPacket, TargetAction,
    DEFAULT_TICK_MS, PRIVATE_KEY, PROTOCOL_ID, SERVER_PORT, TRADE_CANCEL_CANCELLED,
    TRADE_CANCEL_NO_SPACE, TRADE_CANCEL_OTHER_CANCELLED, TRADE_CANCEL_OTHER_NO_SPACE,
};
pub use skills::{
    level_for_xp, xp_for_level, SkillKind, SkillSheet, SkillState, MAX_LEVEL, SKILL_COUNT,
    STAMINA_MAX,
};
pub use spells::{SpellCatalog, SpellDefinition, SpellEffect, SpellId};
pub use tile::{
    cardinally_adjacent, chebyshev, euclidean_sq, MapLevel, PathingDirection, TilePos,
};
pub use world_entity::{
    load_placements_ron, ActionOverride, ActionOverrides, ActionRequirement, ActionScriptStep,
    EntityVerb, ResourceInfo, WorldEntityCatalog, WorldEntityDefinition, WorldEntityDefinitionId,
    WorldEntityPlacement,
};
