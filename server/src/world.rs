//! World assembly: pathing grids, content catalogs, the id registry, and
//! the startup systems that populate the world from content.
//!
//! Content (items, NPCs, world entities, spells, loot) is read from ron
//! files under `STATIC_ASSETS_PATH/content/`; when a file is missing the
//! built-in development set below is used instead so the server still
//! boots, with a warning. Invariant-breaking content (duplicate ids,
//! malformed overrides) fails startup loudly.

use std::collections::HashMap;

use bevy::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use shared::components::EntityOrientation;
use shared::items::{
    CombatBonuses, EdibleInfo, EquipmentSlot, ItemCatalog, ItemDefinition, ItemId, ItemStack,
    PotionInfo, WeaponClass,
};
use shared::loot::{LootEntry, LootTable, LootTableId, LootTables};
use shared::npc::{NpcCatalog, NpcDefinition, NpcDefinitionId, NpcInteraction, NpcSpawn, PickpocketInfo};
use shared::pathing::{BakedGrid, PathingGrid};
use shared::skills::SkillKind;
use shared::spells::{SpellCatalog, SpellDefinition, SpellEffect, SpellId};
use shared::tile::{MapLevel, TilePos};
use shared::world_entity::{
    ActionOverride, ActionOverrides, ActionScriptStep, EntityVerb, ResourceInfo,
    WorldEntityCatalog, WorldEntityDefinition, WorldEntityDefinitionId, WorldEntityPlacement,
};

use crate::components::{NpcHandle, NpcMotion, NpcPos, NpcStatus, Plan, WorldEntityState};
use crate::config::ServerConfig;
use crate::spatial::{SpatialIndex, StaticEntityIndex};
use crate::targeting::NpcAggro;
use shared::components::NpcStateKind;
use shared::npc::MovementArea;

/// Dense id allocation and id-to-entity lookup per entity kind. A failed
/// lookup is normal control flow: the entity was removed.
#[derive(Resource, Debug, Default)]
pub struct Registry {
    pub players: HashMap<u32, Entity>,
    pub npcs: HashMap<u32, Entity>,
    pub ground_items: HashMap<u32, Entity>,
    pub world_entities: HashMap<u32, Entity>,
    next_user_id: u32,
    next_npc_id: u32,
    next_ground_item_id: u32,
    next_world_entity_id: u32,
}

impl Registry {
    pub fn alloc_user_id(&mut self) -> u32 {
        self.next_user_id += 1;
        self.next_user_id
    }

    pub fn alloc_npc_id(&mut self) -> u32 {
        self.next_npc_id += 1;
        self.next_npc_id
    }

    pub fn alloc_ground_item_id(&mut self) -> u32 {
        self.next_ground_item_id += 1;
        self.next_ground_item_id
    }

    pub fn alloc_world_entity_id(&mut self) -> u32 {
        self.next_world_entity_id += 1;
        self.next_world_entity_id
    }
}

/// All content catalogs behind one resource handle.
#[derive(Resource, Default)]
pub struct Catalogs {
    pub items: ItemCatalog,
    pub npcs: NpcCatalog,
    pub world_entities: WorldEntityCatalog,
    pub spells: SpellCatalog,
    pub loot: LootTables,
    pub overrides: ActionOverrides,
}

/// Per-level pathing grids, loaded from baked assets.
#[derive(Resource, Default)]
pub struct PathingGrids {
    grids: [Option<PathingGrid>; 3],
}

impl PathingGrids {
    pub fn insert(&mut self, grid: PathingGrid) {
        let index = grid.level().index();
        self.grids[index] = Some(grid);
    }

    /// `None` when the level has no grid; pathfinding treats that as a
    /// transient failure, not a fatal error.
    pub fn get(&self, level: MapLevel) -> Option<&PathingGrid> {
        self.grids[level.index()].as_ref()
    }

    pub fn get_mut(&mut self, level: MapLevel) -> Option<&mut PathingGrid> {
        self.grids[level.index()].as_mut()
    }
}

/// World randomness (loot rolls, wander pacing, damage rolls).
#[derive(Resource)]
pub struct WorldRng(pub SmallRng);

impl Default for WorldRng {
    fn default() -> Self {
        Self(SmallRng::seed_from_u64(0x5EED))
    }
}

/// A ground-item spawn point that replenishes after pickup.
#[derive(Debug, Clone)]
pub struct ItemSpawnPoint {
    pub stack: ItemStack,
    pub pos: TilePos,
    pub respawn_ticks: u64,
    /// Set while the item is absent; the tick it reappears.
    pub respawn_at: Option<u64>,
    pub live_item: Option<u32>,
}

#[derive(Resource, Debug, Default)]
pub struct ItemSpawns(pub Vec<ItemSpawnPoint>);

// =============================================================================
// STARTUP
// =============================================================================

fn read_content_file(config: &ServerConfig, name: &str) -> Option<String> {
    let path = config.static_assets_path.join("content").join(name);
    std::fs::read_to_string(&path).ok()
}

pub fn load_catalogs(config: Res<ServerConfig>, mut commands: Commands) {
    let items = match read_content_file(&config, "items.ron") {
        Some(text) => ItemCatalog::load_ron(&text).unwrap_or_else(|e| {
            error!("items.ron invalid ({}), using built-in content", e);
            default_items()
        }),
        None => {
            warn!("items.ron not found, using built-in content");
            default_items()
        }
    };
    let npcs = match read_content_file(&config, "npcs.ron") {
        Some(text) => NpcCatalog::load_ron(&text).unwrap_or_else(|e| {
            error!("npcs.ron invalid ({}), using built-in content", e);
            default_npcs()
        }),
        None => default_npcs(),
    };
    let world_entities = match read_content_file(&config, "world_entities.ron") {
        Some(text) => WorldEntityCatalog::load_ron(&text).unwrap_or_else(|e| {
            error!("world_entities.ron invalid ({}), using built-in content", e);
            default_world_entities()
        }),
        None => default_world_entities(),
    };
    let spells = match read_content_file(&config, "spells.ron") {
        Some(text) => SpellCatalog::load_ron(&text).unwrap_or_else(|e| {
            error!("spells.ron invalid ({}), using built-in content", e);
            default_spells()
        }),
        None => default_spells(),
    };
    let loot = match read_content_file(&config, "loot.ron") {
        Some(text) => LootTables::load_ron(&text).unwrap_or_else(|e| {
            error!("loot.ron invalid ({}), using built-in content", e);
            default_loot()
        }),
        None => default_loot(),
    };
    let overrides = match read_content_file(&config, "overrides.ron") {
        Some(text) => ActionOverrides::load_ron(&text).unwrap_or_else(|e| {
            error!("overrides.ron invalid ({}), using built-in content", e);
            default_overrides()
        }),
        None => default_overrides(),
    };

    info!(
        "Loaded content: {} items, {} NPC kinds",
        items.len(),
        npcs.len()
    );
    commands.insert_resource(Catalogs {
        items,
        npcs,
        world_entities,
        spells,
        loot,
        overrides,
    });
}

pub fn load_pathing_grids(config: Res<ServerConfig>, mut commands: Commands) {
    let mut grids = PathingGrids::default();
    for level in MapLevel::ALL {
        let path = config
            .static_assets_path
            .join("grids")
            .join(format!("{}.grid", level.asset_stem()));
        match std::fs::read(&path) {
            Ok(bytes) => match BakedGrid::from_bytes(&bytes) {
                Ok(baked) => {
                    info!(
                        "Loaded {:?} grid {}x{}",
                        level,
                        baked.grid.width(),
                        baked.grid.height()
                    );
                    grids.insert(baked.grid);
                }
                Err(e) => error!("Baked grid {:?} unreadable: {}", path, e),
            },
            Err(_) => {
                warn!("No baked grid for {:?}, using open 256x256 fallback", level);
                grids.insert(PathingGrid::new(level, 256, 256));
            }
        }
    }
    commands.insert_resource(grids);
}

/// Spawns NPCs, world entities and item spawn points from content, and
/// overlays world-entity blockers onto the pathing grids.
pub fn populate_world(
    config: Res<ServerConfig>,
    catalogs: Res<Catalogs>,
    mut registry: ResMut<Registry>,
    mut index: ResMut<SpatialIndex>,
    mut statics: ResMut<StaticEntityIndex>,
    mut grids: ResMut<PathingGrids>,
    mut item_spawns: ResMut<ItemSpawns>,
    mut commands: Commands,
) {
    let npc_spawns = match read_content_file(&config, "npc_spawns.ron") {
        Some(text) => shared::npc::load_spawns_ron(&text).unwrap_or_else(|e| {
            error!("npc_spawns.ron invalid ({}), using built-in spawns", e);
            default_npc_spawns()
        }),
        None => default_npc_spawns(),
    };
    for spawn in &npc_spawns {
        let Some(def) = catalogs.npcs.get(spawn.definition) else {
            error!("NPC spawn references unknown definition {:?}", spawn.definition);
            continue;
        };
        spawn_npc(&mut commands, &mut registry, &mut index, def, spawn.pos, None);
    }
    info!("Spawned {} NPCs", npc_spawns.len());

    let placements = match read_content_file(&config, "world_entity_placements.ron") {
        Some(text) => shared::world_entity::load_placements_ron(&text).unwrap_or_else(|e| {
            error!("world_entity_placements.ron invalid ({}), using built-in placements", e);
            default_placements()
        }),
        None => default_placements(),
    };
    for placement in &placements {
        let Some(def) = catalogs.world_entities.get(placement.definition) else {
            error!(
                "World entity placement references unknown definition {:?}",
                placement.definition
            );
            continue;
        };
        let id = registry.alloc_world_entity_id();
        let entity = commands
            .spawn(WorldEntityState {
                world_entity_id: id,
                definition: placement.definition,
                pos: placement.pos,
                orientation: placement.orientation,
                loot_override: placement.loot_override,
                replenish_at_tick: None,
                locked: def.supported_actions.contains(&EntityVerb::Picklock)
                    || def.supported_actions.contains(&EntityVerb::Unlock),
            })
            .id();
        registry.world_entities.insert(id, entity);
        statics.insert(id, placement.pos);
        if let Some(grid) = grids.get_mut(placement.pos.level) {
            apply_entity_blockers(grid, def, placement);
        }
    }
    info!("Placed {} world entities", placements.len());

    item_spawns.0 = default_item_spawns();
}

/// Overlays a placed entity's blocking onto the grid: doors block one edge,
/// solid footprints block their tiles (and projectiles when the definition
/// says so).
pub fn apply_entity_blockers(
    grid: &mut PathingGrid,
    def: &WorldEntityDefinition,
    placement: &WorldEntityPlacement,
) {
    let (x, y) = placement.pos.xy();
    if def.is_door {
        let (dx, dy) = placement.orientation.delta();
        if let Some(dir) = shared::tile::PathingDirection::from_delta(dx, dy) {
            grid.block_edge(x, y, dir);
        }
        return;
    }
    if def.is_solid {
        for fx in 0..def.footprint.0 as i32 {
            for fy in 0..def.footprint.1 as i32 {
                grid.set_fully_blocked(x + fx, y + fy);
                if def.blocks_projectiles {
                    grid.set_projectile_blocked(x + fx, y + fy, true);
                }
            }
        }
    }
}

/// Spawn one NPC entity at `pos` and register it everywhere.
pub fn spawn_npc(
    commands: &mut Commands,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    def: &NpcDefinition,
    pos: TilePos,
    owner: Option<u32>,
) -> u32 {
    let npc_id = registry.alloc_npc_id();
    let entity = commands
        .spawn((
            NpcHandle {
                npc_id,
                definition: def.id,
                owner,
            },
            NpcPos(pos),
            NpcStatus {
                state: NpcStateKind::Idle,
                hitpoints: def.hitpoints,
                hitpoints_max: def.hitpoints,
                next_attack_tick: 0,
                spawn_pos: pos,
                despawn_at_tick: None,
                respawn_at_tick: None,
            },
            NpcAggro::default(),
            NpcMotion {
                area: MovementArea::around(pos.xy(), def.wander_radius),
                next_wander_at_ms: 0,
                speed: def.speed.max(1),
            },
            Plan::default(),
        ))
        .id();
    registry.npcs.insert(npc_id, entity);
    index.insert_npc(npc_id, pos);
    npc_id
}

// =============================================================================
// BUILT-IN DEVELOPMENT CONTENT
// =============================================================================

pub fn default_items() -> ItemCatalog {
    let mut coins = ItemDefinition::simple(1, "Coins", true);
    coins.examine = "Lovely money.".into();

    let mut sword = ItemDefinition::simple(2, "Bronze sword", false);
    sword.equip_slot = Some(EquipmentSlot::Weapon);
    sword.bonuses = CombatBonuses { attack: 4, strength: 3, ..Default::default() };
    sword.weight = 2.0;

    let mut bow = ItemDefinition::simple(3, "Shortbow", false);
    bow.equip_slot = Some(EquipmentSlot::Weapon);
    bow.weapon_class = WeaponClass::Ranged;
    bow.bonuses = CombatBonuses { ranged: 6, ..Default::default() };
    bow.attack_speed_ticks = 5;
    bow.weight = 1.0;

    let air_rune = ItemDefinition::simple(4, "Air rune", true);
    let mind_rune = ItemDefinition::simple(5, "Mind rune", true);
    let law_rune = ItemDefinition::simple(6, "Law rune", true);

    let mut shrimp = ItemDefinition::simple(7, "Shrimp", false);
    shrimp.edible = Some(EdibleInfo { heals: 3 });

    let mut bread = ItemDefinition::simple(8, "Bread", false);
    bread.edible = Some(EdibleInfo { heals: 5 });

    let mut strength_potion = ItemDefinition::simple(9, "Strength potion", false);
    strength_potion.drinkable = Some(PotionInfo { skill: SkillKind::Strength, boost: 3, cap: 4 });

    let logs = ItemDefinition::simple(10, "Logs", false);
    let ore = ItemDefinition::simple(11, "Copper ore", false);
    let raw_shrimp = ItemDefinition::simple(12, "Raw shrimp", false);
    let key = ItemDefinition::simple(13, "Brass key", false);
    let bones = ItemDefinition::simple(14, "Bones", false);

    let mut cap = ItemDefinition::simple(15, "Leather cap", false);
    cap.equip_slot = Some(EquipmentSlot::Helmet);
    cap.bonuses = CombatBonuses { defence: 2, ..Default::default() };

    ItemCatalog::from_defs(vec![
        coins, sword, bow, air_rune, mind_rune, law_rune, shrimp, bread, strength_potion, logs,
        ore, raw_shrimp, key, bones, cap,
    ])
    .expect("built-in item content is valid")
}

pub fn default_npcs() -> NpcCatalog {
    let mut rat = NpcDefinition::simple(1, "Giant rat");
    rat.aggro_radius = 3;
    rat.hitpoints = 8;
    rat.max_hit = 1;
    rat.drop_table = Some(LootTableId(10));
    rat.wander_radius = 5;

    let mut goblin = NpcDefinition::simple(2, "Goblin");
    goblin.aggro_radius = 2;
    goblin.hitpoints = 12;
    goblin.attack_level = 3;
    goblin.strength_level = 3;
    goblin.max_hit = 2;
    goblin.combat_level = 5;
    goblin.drop_table = Some(LootTableId(10));

    let mut man = NpcDefinition::simple(3, "Man");
    man.interactions = vec![NpcInteraction::Attack, NpcInteraction::TalkTo, NpcInteraction::Pickpocket];
    man.hitpoints = 7;
    man.pickpocket = Some(PickpocketInfo {
        required_thieving: 1,
        xp: 8,
        loot: LootTableId(11),
        fail_percent: 30,
        stun_ticks: 5,
    });
    man.dialogue = vec!["Nice weather we're having.".into()];

    let mut shopkeeper = NpcDefinition::simple(4, "Shopkeeper");
    shopkeeper.interactions = vec![NpcInteraction::TalkTo, NpcInteraction::Shop];
    shopkeeper.shop_id = Some(1);
    shopkeeper.dialogue = vec!["Come see my wares!".into()];

    let mut guard = NpcDefinition::simple(5, "Guard");
    guard.hitpoints = 22;
    guard.attack_level = 15;
    guard.strength_level = 15;
    guard.defence_level = 15;
    guard.combat_level = 19;
    guard.max_hit = 3;

    NpcCatalog::from_defs(vec![rat, goblin, man, shopkeeper, guard])
        .expect("built-in NPC content is valid")
}

pub fn default_world_entities() -> WorldEntityCatalog {
    let mut tree = WorldEntityDefinition::simple(1, "Tree", vec![EntityVerb::Chop]);
    tree.blocks_projectiles = true;
    tree.resource = Some(ResourceInfo {
        skill: SkillKind::Woodcutting,
        required_level: 1,
        xp: 25,
        loot: LootTableId(1),
        exhaust_percent: 25,
        replenish_ticks: 20,
    });

    let mut rocks = WorldEntityDefinition::simple(2, "Copper rocks", vec![EntityVerb::Mine]);
    rocks.resource = Some(ResourceInfo {
        skill: SkillKind::Mining,
        required_level: 1,
        xp: 17,
        loot: LootTableId(2),
        exhaust_percent: 50,
        replenish_ticks: 8,
    });

    let mut fishing_spot = WorldEntityDefinition::simple(3, "Fishing spot", vec![EntityVerb::Fish]);
    fishing_spot.is_solid = false;
    fishing_spot.resource = Some(ResourceInfo {
        skill: SkillKind::Fishing,
        required_level: 1,
        xp: 10,
        loot: LootTableId(3),
        exhaust_percent: 0,
        replenish_ticks: 0,
    });

    let mut door = WorldEntityDefinition::simple(4, "Wooden door", vec![EntityVerb::Open]);
    door.is_door = true;
    door.is_solid = false;

    let mut chest = WorldEntityDefinition::simple(
        5,
        "Closed chest",
        vec![EntityVerb::Search, EntityVerb::Picklock],
    );
    chest.search_loot = Some(LootTableId(4));

    let ladder = WorldEntityDefinition::simple(6, "Ladder", vec![EntityVerb::Climb]);

    let mut booth = WorldEntityDefinition::simple(7, "Bank booth", vec![EntityVerb::Open]);
    booth.footprint = (2, 1);

    let mut cell_door = WorldEntityDefinition::simple(8, "Cell door", vec![EntityVerb::Open]);
    cell_door.is_door = true;
    cell_door.is_solid = false;

    WorldEntityCatalog::from_defs(vec![
        tree, rocks, fishing_spot, door, chest, ladder, booth, cell_door,
    ])
    .expect("built-in world entity content is valid")
}

pub fn default_spells() -> SpellCatalog {
    SpellCatalog::from_defs(vec![
        SpellDefinition {
            id: SpellId(1),
            name: "Wind Strike".into(),
            required_magic: 1,
            xp: 6,
            runes: vec![ItemStack::new(ItemId(4), 1), ItemStack::new(ItemId(5), 1)],
            effect: SpellEffect::Combat { max_hit: 2, projectile_id: 90 },
            auto_castable: true,
        },
        SpellDefinition {
            id: SpellId(2),
            name: "Confuse".into(),
            required_magic: 3,
            xp: 13,
            runes: vec![ItemStack::new(ItemId(4), 2), ItemStack::new(ItemId(5), 1)],
            effect: SpellEffect::Status { drains: SkillKind::Attack, amount: 2, projectile_id: 95 },
            auto_castable: false,
        },
        SpellDefinition {
            id: SpellId(3),
            name: "Home Teleport".into(),
            required_magic: 1,
            xp: 0,
            runes: vec![ItemStack::new(ItemId(6), 1)],
            effect: SpellEffect::Teleport {
                destination: TilePos::new(MapLevel::Overworld, 32, 32),
            },
            auto_castable: false,
        },
        SpellDefinition {
            id: SpellId(4),
            name: "Sear Shrimp".into(),
            required_magic: 5,
            xp: 20,
            runes: vec![ItemStack::new(ItemId(4), 1)],
            effect: SpellEffect::Inventory { from_item: ItemId(12), to_item: ItemId(7) },
            auto_castable: false,
        },
    ])
    .expect("built-in spell content is valid")
}

pub fn default_loot() -> LootTables {
    let certain = |id: u32, item: u32, min: u32, max: u32| LootTable {
        id: LootTableId(id),
        rolls: 1,
        entries: vec![LootEntry {
            item_id: ItemId(item),
            min_amount: min,
            max_amount: max,
            weight: 1,
            as_iou: false,
        }],
    };
    LootTables::from_tables(vec![
        certain(1, 10, 1, 1), // tree -> logs
        certain(2, 11, 1, 1), // rocks -> copper ore
        certain(3, 12, 1, 1), // fishing spot -> raw shrimp
        LootTable {
            id: LootTableId(4), // chest
            rolls: 2,
            entries: vec![
                LootEntry { item_id: ItemId(1), min_amount: 5, max_amount: 40, weight: 6, as_iou: false },
                LootEntry { item_id: ItemId(13), min_amount: 1, max_amount: 1, weight: 1, as_iou: false },
                LootEntry { item_id: ItemId(0), min_amount: 0, max_amount: 0, weight: 3, as_iou: false },
            ],
        },
        LootTable {
            id: LootTableId(10), // small monster drops
            rolls: 1,
            entries: vec![
                LootEntry { item_id: ItemId(14), min_amount: 1, max_amount: 1, weight: 5, as_iou: false },
                LootEntry { item_id: ItemId(1), min_amount: 1, max_amount: 12, weight: 3, as_iou: false },
                LootEntry { item_id: ItemId(0), min_amount: 0, max_amount: 0, weight: 2, as_iou: false },
            ],
        },
        LootTable {
            id: LootTableId(11), // pickpocket
            rolls: 1,
            entries: vec![LootEntry {
                item_id: ItemId(1),
                min_amount: 1,
                max_amount: 5,
                weight: 1,
                as_iou: false,
            }],
        },
    ])
    .expect("built-in loot content is valid")
}

pub fn default_overrides() -> ActionOverrides {
    ActionOverrides::from_overrides(vec![
        // Bank booth opens the bank.
        ActionOverride {
            entity_definition: WorldEntityDefinitionId(7),
            action: EntityVerb::Open,
            requirements: Vec::new(),
            check_requirements_from_both_sides: false,
            does_lock_after_entering: false,
            failure_message: String::new(),
            steps: vec![ActionScriptStep::StartBanking],
        },
        // Ladder drops into the underground.
        ActionOverride {
            entity_definition: WorldEntityDefinitionId(6),
            action: EntityVerb::Climb,
            requirements: Vec::new(),
            check_requirements_from_both_sides: false,
            does_lock_after_entering: false,
            failure_message: String::new(),
            steps: vec![ActionScriptStep::TeleportTo {
                destination: TilePos::new(MapLevel::Underground, 40, 40),
            }],
        },
        // Cell door: key required from the outside only.
        ActionOverride {
            entity_definition: WorldEntityDefinitionId(8),
            action: EntityVerb::Open,
            requirements: vec![shared::world_entity::ActionRequirement::Item {
                item: ItemStack::new(ItemId(13), 1),
                consumed: false,
            }],
            check_requirements_from_both_sides: false,
            does_lock_after_entering: false,
            failure_message: "It's locked.".into(),
            steps: vec![ActionScriptStep::GoThroughDoor {
                outside: TilePos::new(MapLevel::Overworld, 50, 20),
                inside: TilePos::new(MapLevel::Overworld, 50, 21),
            }],
        },
    ])
    .expect("built-in override content is valid")
}

pub fn default_npc_spawns() -> Vec<NpcSpawn> {
    let at = |x, y| TilePos::new(MapLevel::Overworld, x, y);
    vec![
        NpcSpawn { definition: NpcDefinitionId(1), pos: at(40, 40), facing: EntityOrientation::South },
        NpcSpawn { definition: NpcDefinitionId(1), pos: at(44, 38), facing: EntityOrientation::South },
        NpcSpawn { definition: NpcDefinitionId(2), pos: at(52, 44), facing: EntityOrientation::West },
        NpcSpawn { definition: NpcDefinitionId(3), pos: at(30, 28), facing: EntityOrientation::North },
        NpcSpawn { definition: NpcDefinitionId(4), pos: at(26, 30), facing: EntityOrientation::East },
        NpcSpawn { definition: NpcDefinitionId(5), pos: at(34, 34), facing: EntityOrientation::South },
    ]
}

pub fn default_placements() -> Vec<WorldEntityPlacement> {
    let at = |x, y| TilePos::new(MapLevel::Overworld, x, y);
    let place = |definition: u32, pos: TilePos| WorldEntityPlacement {
        definition: WorldEntityDefinitionId(definition),
        pos,
        orientation: EntityOrientation::North,
        loot_override: None,
    };
    vec![
        place(1, at(20, 40)),
        place(1, at(22, 44)),
        place(2, at(60, 30)),
        place(3, at(12, 12)),
        place(4, at(36, 24)),
        place(5, at(58, 58)),
        place(6, at(48, 48)),
        place(7, at(28, 32)),
        place(8, at(50, 20)),
    ]
}

pub fn default_item_spawns() -> Vec<ItemSpawnPoint> {
    vec![ItemSpawnPoint {
        stack: ItemStack::new(ItemId(8), 1),
        pos: TilePos::new(MapLevel::Overworld, 33, 30),
        respawn_ticks: 50,
        respawn_at: None,
        live_item: None,
    }]
}
