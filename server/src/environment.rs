//! Environment actions: the content-driven verbs on world entities, the
//! scripted override machinery (doors, ladders, bank booths), the delayed
//! search/picklock/unlock/harvest loops, and resource replenishment.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use rand::Rng;

use shared::components::{NpcStateKind, PlayerStateKind};
use shared::protocol::ServerPacket;
use shared::skills::SkillKind;
use shared::tile::{chebyshev, TilePos};
use shared::world_entity::{
    ActionOverride, ActionRequirement, ActionScriptStep, EntityVerb, WorldEntityDefinition,
};

use crate::components::{
    Belongings, Delay, DelayCompletion, Pending, Plan, PlayerPos, PlayerStatus, Progress,
    WorldEntityState,
};
use crate::config::{ServerConfig, WorldClock, PICKLOCK_DELAY_TICKS, SEARCH_DELAY_TICKS};
use crate::delay::{start_delay, CompletedDelays};
use crate::events::GameEvent;
use crate::inventory::{give_stack, grant_xp};
use crate::sessions::{send_to, Sessions};
use crate::spatial::SpatialIndex;
use crate::world::{Catalogs, Registry, WorldRng};

/// Wait ticks once in position: doors, teleports, mine-throughs and climbs
/// take one tick; everything else fires immediately.
pub fn required_wait(def: &WorldEntityDefinition, verb: EntityVerb, ov: Option<&ActionOverride>) -> u32 {
    if def.is_door
        || matches!(verb, EntityVerb::Climb | EntityVerb::Enter | EntityVerb::Exit)
    {
        return 1;
    }
    if let Some(ov) = ov {
        let scripted_move = ov.steps.iter().any(|s| {
            matches!(
                s,
                ActionScriptStep::TeleportTo { .. }
                    | ActionScriptStep::GoThroughDoor { .. }
                    | ActionScriptStep::MineThroughRocks { .. }
                    | ActionScriptStep::ClimbSameMapLevel { .. }
            )
        });
        if scripted_move {
            return 1;
        }
    }
    0
}

/// Whether the player stands where this verb can run: doors accept either
/// side tile, 1x1 entities cardinal adjacency (or the tile itself for
/// non-solid ones), larger footprints any surrounding tile.
pub fn is_positioned(player: TilePos, entity: &WorldEntityState, def: &WorldEntityDefinition) -> bool {
    if player.level != entity.pos.level {
        return false;
    }
    let p = player.xy();
    let e = entity.pos.xy();
    if def.is_door {
        let (dx, dy) = entity.orientation.delta();
        return p == e || p == (e.0 + dx, e.1 + dy);
    }
    if def.footprint == (1, 1) {
        if !def.is_solid && p == e {
            return true;
        }
        return shared::tile::cardinally_adjacent(p, e);
    }
    for fx in 0..def.footprint.0 as i32 {
        for fy in 0..def.footprint.1 as i32 {
            if chebyshev(p, (e.0 + fx, e.1 + fy)) <= 1 {
                return true;
            }
        }
    }
    false
}

/// Goal tiles for the approach path, per the footprint's adjacency rule.
pub fn approach_goals(
    grid: &shared::pathing::PathingGrid,
    entity: &WorldEntityState,
    def: &WorldEntityDefinition,
) -> Vec<(i32, i32)> {
    let e = entity.pos.xy();
    if def.is_door {
        let (dx, dy) = entity.orientation.delta();
        return [e, (e.0 + dx, e.1 + dy)]
            .into_iter()
            .filter(|(x, y)| grid.in_bounds(*x, *y) && !grid.is_fully_blocked(*x, *y))
            .collect();
    }
    let mut goals = Vec::new();
    if def.footprint == (1, 1) {
        if !def.is_solid && !grid.is_fully_blocked(e.0, e.1) {
            goals.push(e);
        }
        for dir in shared::tile::PathingDirection::CARDINALS {
            let (dx, dy) = dir.delta();
            let tile = (e.0 + dx, e.1 + dy);
            if grid.in_bounds(tile.0, tile.1) && !grid.is_fully_blocked(tile.0, tile.1) {
                goals.push(tile);
            }
        }
        return goals;
    }
    // 2x2 and larger footprints allow diagonal corners.
    let (w, l) = (def.footprint.0 as i32, def.footprint.1 as i32);
    for x in (e.0 - 1)..=(e.0 + w) {
        for y in (e.1 - 1)..=(e.1 + l) {
            let inside = x >= e.0 && x < e.0 + w && y >= e.1 && y < e.1 + l;
            if !inside && grid.in_bounds(x, y) && !grid.is_fully_blocked(x, y) {
                goals.push((x, y));
            }
        }
    }
    goals
}

/// Everything the executors need besides the acting player.
pub struct EnvCtx<'a, 'cw, 'cs, 'ew, 'sw, 'ss> {
    pub commands: &'a mut Commands<'cw, 'cs>,
    pub clock: &'a WorldClock,
    pub config: &'a ServerConfig,
    pub catalogs: &'a Catalogs,
    pub registry: &'a mut Registry,
    pub index: &'a mut SpatialIndex,
    pub sessions: &'a Sessions,
    pub rng: &'a mut WorldRng,
    pub events: &'a mut MessageWriter<'ew, GameEvent>,
    pub senders: &'a mut Query<'sw, 'ss, &'sw mut MessageSender<ServerPacket>>,
}

/// One acting player's mutable parts.
pub struct EnvPlayer<'a> {
    pub user_id: u32,
    pub pos: &'a mut PlayerPos,
    pub status: &'a mut PlayerStatus,
    pub pending: &'a mut Pending,
    pub plan: &'a mut Plan,
    pub delay: &'a mut Delay,
    pub belongings: &'a mut Belongings,
    pub progress: &'a mut Progress,
}

fn message(ctx: &mut EnvCtx, user_id: u32, text: &str) {
    send_to(
        ctx.sessions,
        ctx.senders,
        user_id,
        ServerPacket::GameMessage { message: text.to_string() },
    );
}

fn check_requirements(
    requirements: &[ActionRequirement],
    belongings: &Belongings,
    progress: &Progress,
) -> bool {
    requirements.iter().all(|req| match req {
        ActionRequirement::Skill { kind, level } => progress.skills.base(*kind) >= *level,
        ActionRequirement::Item { item, consumed: _ } => {
            belongings.inventory.count(item.item_id, item.is_iou) >= item.amount as u64
        }
    })
}

fn consume_required_items(
    requirements: &[ActionRequirement],
    belongings: &mut Belongings,
) {
    for req in requirements {
        if let ActionRequirement::Item { item, consumed: true } = req {
            belongings.inventory.remove_items(item.item_id, item.is_iou, item.amount);
            belongings.dirty = true;
        }
    }
}

/// Move a player through a door edge or teleport: position, index, stale
/// plan, and the right event.
fn relocate_player(ctx: &mut EnvCtx, player: &mut EnvPlayer, to: TilePos, through_door: bool) {
    let from = player.pos.0;
    player.pos.0 = to;
    ctx.index.relocate_player(player.user_id, to);
    // Any plan is now stale (and is discarded on next advance anyway).
    player.plan.0 = None;
    if through_door {
        ctx.events.write(GameEvent::PlayerWentThroughDoor { user_id: player.user_id, from, to });
    } else {
        ctx.events.write(GameEvent::PlayerTeleported { user_id: player.user_id, from, to });
    }
}

/// Execute an environment action the pending processor has verified the
/// player to be positioned for. Scripted overrides run their step list
/// after a single requirements check; otherwise the verb's default
/// behaviour runs.
pub fn execute_environment_action(
    ctx: &mut EnvCtx,
    player: &mut EnvPlayer,
    entity: &mut WorldEntityState,
    verb: EntityVerb,
) {
    let Some(def) = ctx.catalogs.world_entities.get(entity.definition).cloned() else {
        return;
    };
    if let Some(ov) = ctx.catalogs.overrides.get(entity.definition, verb).cloned() {
        execute_override(ctx, player, entity, &ov);
        return;
    }
    match verb {
        EntityVerb::Open => {
            if def.is_door {
                if entity.locked {
                    message(ctx, player.user_id, "It's locked.");
                    return;
                }
                // Step through to the far side of the door edge.
                let (dx, dy) = entity.orientation.delta();
                let e = entity.pos.xy();
                let front = (e.0 + dx, e.1 + dy);
                let to = if player.pos.0.xy() == e { front } else { e };
                let to = TilePos::new(entity.pos.level, to.0, to.1);
                relocate_player(ctx, player, to, true);
            } else {
                message(ctx, player.user_id, "It won't open.");
            }
        }
        EntityVerb::Chop | EntityVerb::Mine | EntityVerb::Fish => {
            start_harvest(ctx, player, entity, &def);
        }
        EntityVerb::Search => {
            player.status.state = PlayerStateKind::Skilling;
            start_delay(
                player.delay,
                SEARCH_DELAY_TICKS,
                false,
                DelayCompletion::Search { world_entity_id: entity.world_entity_id },
            );
            message(ctx, player.user_id, "You search it...");
        }
        EntityVerb::Picklock => {
            if !entity.locked {
                message(ctx, player.user_id, "It isn't locked.");
                return;
            }
            start_delay(
                player.delay,
                PICKLOCK_DELAY_TICKS,
                false,
                DelayCompletion::Picklock { world_entity_id: entity.world_entity_id },
            );
            message(ctx, player.user_id, "You fiddle with the lock...");
        }
        EntityVerb::Unlock => {
            if !entity.locked {
                message(ctx, player.user_id, "It isn't locked.");
                return;
            }
            start_delay(
                player.delay,
                PICKLOCK_DELAY_TICKS,
                false,
                DelayCompletion::Unlock { world_entity_id: entity.world_entity_id },
            );
        }
        EntityVerb::Climb | EntityVerb::Enter | EntityVerb::Exit => {
            message(ctx, player.user_id, "Nothing interesting happens.");
        }
    }
}

/// The one-way requirements rule: crossing outside-to-inside checks, the
/// way back is free unless the override opts into both sides, in which
/// case a lock-after-entering door refuses from the inside outright.
fn door_requirements_apply(ov: &ActionOverride, player_pos: TilePos) -> Result<bool, ()> {
    let Some(ActionScriptStep::GoThroughDoor { inside, .. }) = ov
        .steps
        .iter()
        .find(|s| matches!(s, ActionScriptStep::GoThroughDoor { .. }))
    else {
        return Ok(true);
    };
    let at_inside = player_pos == *inside;
    if !at_inside {
        return Ok(true);
    }
    if !ov.check_requirements_from_both_sides {
        // Inside-to-outside is free.
        return Ok(false);
    }
    if ov.does_lock_after_entering {
        // The inside face stays locked.
        return Err(());
    }
    Ok(true)
}

fn execute_override(
    ctx: &mut EnvCtx,
    player: &mut EnvPlayer,
    entity: &mut WorldEntityState,
    ov: &ActionOverride,
) {
    match door_requirements_apply(ov, player.pos.0) {
        Err(()) => {
            message(ctx, player.user_id, &ov.failure_message);
            return;
        }
        Ok(true) => {
            if !check_requirements(&ov.requirements, player.belongings, player.progress) {
                message(ctx, player.user_id, &ov.failure_message);
                return;
            }
            consume_required_items(&ov.requirements, player.belongings);
        }
        Ok(false) => {}
    }

    for step in &ov.steps {
        match step {
            ActionScriptStep::TeleportTo { destination } => {
                relocate_player(ctx, player, *destination, false);
            }
            ActionScriptStep::GoThroughDoor { outside, inside } => {
                let to = if player.pos.0 == *inside { *outside } else { *inside };
                relocate_player(ctx, player, to, true);
            }
            ActionScriptStep::MineThroughRocks { from, to } => {
                let dest = if player.pos.0 == *to { *from } else { *to };
                relocate_player(ctx, player, dest, true);
            }
            ActionScriptStep::ClimbSameMapLevel { destination } => {
                relocate_player(ctx, player, *destination, false);
            }
            ActionScriptStep::PlayerGiveItems { items } => {
                for stack in items {
                    let leftover = give_stack(
                        player.belongings,
                        player.progress,
                        ctx.catalogs,
                        ctx.sessions,
                        ctx.senders,
                        player.user_id,
                        *stack,
                    );
                    if leftover.is_some() {
                        message(ctx, player.user_id, "You don't have enough inventory space.");
                        return;
                    }
                }
            }
            ActionScriptStep::StartBanking => {
                player.status.state = PlayerStateKind::Banking;
                send_to(ctx.sessions, ctx.senders, player.user_id, ServerPacket::StartedBanking);
            }
            ActionScriptStep::SpawnInstancedNpc { definition, offset } => {
                if let Some(def) = ctx.catalogs.npcs.get(*definition) {
                    let pos = TilePos::new(
                        player.pos.0.level,
                        player.pos.0.x + offset.0,
                        player.pos.0.y + offset.1,
                    );
                    let npc_id = crate::world::spawn_npc(
                        ctx.commands,
                        ctx.registry,
                        ctx.index,
                        def,
                        pos,
                        Some(player.user_id),
                    );
                    ctx.events.write(GameEvent::NpcSpawned { npc_id });
                }
            }
        }
    }
}

fn start_harvest(
    ctx: &mut EnvCtx,
    player: &mut EnvPlayer,
    entity: &WorldEntityState,
    def: &WorldEntityDefinition,
) {
    let Some(resource) = def.resource.as_ref() else {
        message(ctx, player.user_id, "Nothing interesting happens.");
        return;
    };
    if entity.is_exhausted() {
        message(ctx, player.user_id, "It has nothing left right now.");
        return;
    }
    if player.progress.skills.base(resource.skill) < resource.required_level {
        message(
            ctx,
            player.user_id,
            &format!(
                "You are not skilled enough: this needs {} level {}.",
                resource.skill.slug(),
                resource.required_level
            ),
        );
        return;
    }
    player.status.state = PlayerStateKind::Skilling;
    ctx.events.write(GameEvent::PlayerStateChanged {
        user_id: player.user_id,
        state: PlayerStateKind::Skilling,
    });
    send_to(
        ctx.sessions,
        ctx.senders,
        player.user_id,
        ServerPacket::StartedSkilling { user_id: player.user_id, skill: resource.skill },
    );
    start_delay(
        player.delay,
        SEARCH_DELAY_TICKS,
        false,
        DelayCompletion::Harvest { world_entity_id: entity.world_entity_id },
    );
}

// =============================================================================
// DELAY COMPLETIONS
// =============================================================================

/// Runs right after the delay tick: resolves search, picklock, unlock and
/// harvest completions. A vanished entity simply ends the loop.
#[allow(clippy::too_many_arguments)]
pub fn resolve_completed_delays<'a>(
    mut commands: Commands,
    clock: Res<WorldClock>,
    config: Res<ServerConfig>,
    catalogs: Res<Catalogs>,
    mut registry: ResMut<Registry>,
    mut index: ResMut<SpatialIndex>,
    sessions: Res<Sessions>,
    mut rng: ResMut<WorldRng>,
    mut completed: ResMut<CompletedDelays>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    mut world_entities: Query<&mut WorldEntityState>,
    mut players: crate::movement::PlayerMoveQuery,
    mut delays: Query<&mut Delay>,
) {
    let completions = std::mem::take(&mut completed.0);
    for (entity, completion) in completions {
        let Ok((_, handle, mut pos, mut status, mut pending, mut plan, mut belongings, mut progress, _)) =
            players.get_mut(entity)
        else {
            continue;
        };
        let Ok(mut delay) = delays.get_mut(entity) else {
            continue;
        };
        let mut ctx = EnvCtx {
            commands: &mut commands,
            clock: &clock,
            config: &config,
            catalogs: &catalogs,
            registry: &mut registry,
            index: &mut index,
            sessions: &sessions,
            rng: &mut rng,
            events: &mut events,
            senders: &mut senders,
        };
        let mut player = EnvPlayer {
            user_id: handle.user_id,
            pos: &mut pos,
            status: &mut status,
            pending: &mut pending,
            plan: &mut plan,
            delay: &mut delay,
            belongings: &mut belongings,
            progress: &mut progress,
        };
        let world_entity_id = match completion {
            DelayCompletion::Search { world_entity_id }
            | DelayCompletion::Picklock { world_entity_id }
            | DelayCompletion::Unlock { world_entity_id }
            | DelayCompletion::Harvest { world_entity_id } => world_entity_id,
            DelayCompletion::None => continue,
        };
        // Concurrently removed entity: the retry loop ends cleanly.
        let Some(we) = ctx.registry.world_entities.get(&world_entity_id).copied() else {
            if player.status.state == PlayerStateKind::Skilling {
                player.status.state = PlayerStateKind::Idle;
            }
            continue;
        };
        let Ok(mut entity_state) = world_entities.get_mut(we) else {
            continue;
        };
        match completion {
            DelayCompletion::Search { .. } => {
                resolve_search(&mut ctx, &mut player, &mut entity_state);
            }
            DelayCompletion::Picklock { .. } => {
                resolve_picklock(&mut ctx, &mut player, &mut entity_state);
            }
            DelayCompletion::Unlock { .. } => {
                resolve_unlock(&mut ctx, &mut player, &mut entity_state);
            }
            DelayCompletion::Harvest { .. } => {
                resolve_harvest(&mut ctx, &mut player, &mut entity_state);
            }
            DelayCompletion::None => {}
        }
    }
}

fn resolve_search(ctx: &mut EnvCtx, player: &mut EnvPlayer, entity: &mut WorldEntityState) {
    if player.status.state == PlayerStateKind::Skilling {
        player.status.state = PlayerStateKind::Idle;
    }
    let Some(def) = ctx.catalogs.world_entities.get(entity.definition) else {
        return;
    };
    if entity.locked {
        message(ctx, player.user_id, "It's locked.");
        return;
    }
    let table = entity.loot_override.or(def.search_loot);
    let Some(table) = table.and_then(|t| ctx.catalogs.loot.get(t)).cloned() else {
        message(ctx, player.user_id, "You find nothing of interest.");
        return;
    };
    let rolled = table.roll(&mut ctx.rng.0);
    if rolled.is_empty() {
        message(ctx, player.user_id, "You find nothing of interest.");
        return;
    }
    send_to(
        ctx.sessions,
        ctx.senders,
        player.user_id,
        ServerPacket::ShowLootMenu {
            world_entity_id: entity.world_entity_id,
            items: rolled.iter().map(|s| (s.item_id, s.amount)).collect(),
        },
    );
    for stack in rolled {
        let leftover = give_stack(
            player.belongings,
            player.progress,
            ctx.catalogs,
            ctx.sessions,
            ctx.senders,
            player.user_id,
            stack,
        );
        if leftover.is_some() {
            message(ctx, player.user_id, "You don't have enough inventory space.");
            break;
        }
    }
}

fn resolve_picklock(ctx: &mut EnvCtx, player: &mut EnvPlayer, entity: &mut WorldEntityState) {
    if !entity.locked {
        return;
    }
    let thieving = player.progress.skills.boosted(SkillKind::Thieving) as u32;
    let success = ctx.rng.0.gen_range(0..100) < (40 + thieving * 2).min(95);
    if success {
        entity.locked = false;
        grant_xp(
            player.progress,
            ctx.sessions,
            ctx.senders,
            player.user_id,
            SkillKind::Thieving,
            15,
        );
        message(ctx, player.user_id, "You pick the lock.");
    } else {
        message(ctx, player.user_id, "You fail to pick the lock.");
        // Keep trying until it opens or the player does something else.
        start_delay(
            player.delay,
            PICKLOCK_DELAY_TICKS,
            false,
            DelayCompletion::Picklock { world_entity_id: entity.world_entity_id },
        );
    }
}

fn resolve_unlock(ctx: &mut EnvCtx, player: &mut EnvPlayer, entity: &mut WorldEntityState) {
    if !entity.locked {
        return;
    }
    // Unlocking needs the brass key.
    let key = shared::items::ItemId(13);
    if player.belongings.inventory.has(key, 1) {
        entity.locked = false;
        message(ctx, player.user_id, "You unlock it.");
    } else {
        message(ctx, player.user_id, "You need a key for this.");
    }
}

fn resolve_harvest(ctx: &mut EnvCtx, player: &mut EnvPlayer, entity: &mut WorldEntityState) {
    let Some(def) = ctx.catalogs.world_entities.get(entity.definition).cloned() else {
        return;
    };
    let Some(resource) = def.resource.as_ref() else {
        return;
    };
    if player.status.state != PlayerStateKind::Skilling {
        return;
    }
    if entity.is_exhausted() {
        player.status.state = PlayerStateKind::Idle;
        return;
    }
    // Still in reach? Harvesting while walking away is not a thing.
    if !is_positioned(player.pos.0, entity, &def) {
        player.status.state = PlayerStateKind::Idle;
        message(ctx, player.user_id, "You moved away.");
        return;
    }

    let table = entity.loot_override.or(Some(resource.loot));
    if let Some(table) = table.and_then(|t| ctx.catalogs.loot.get(t)).cloned() {
        for stack in table.roll(&mut ctx.rng.0) {
            let leftover = give_stack(
                player.belongings,
                player.progress,
                ctx.catalogs,
                ctx.sessions,
                ctx.senders,
                player.user_id,
                stack,
            );
            if leftover.is_some() {
                message(ctx, player.user_id, "Your inventory is too full to carry more.");
                player.status.state = PlayerStateKind::Idle;
                return;
            }
        }
    }
    grant_xp(
        player.progress,
        ctx.sessions,
        ctx.senders,
        player.user_id,
        resource.skill,
        resource.xp,
    );

    // Exhaustion roll; otherwise keep harvesting.
    if resource.exhaust_percent > 0
        && ctx.rng.0.gen_range(0..100) < resource.exhaust_percent as u32
    {
        entity.replenish_at_tick = Some(ctx.clock.tick + resource.replenish_ticks as u64);
        ctx.events.write(GameEvent::ResourcesExhausted {
            world_entity_id: entity.world_entity_id,
        });
        player.status.state = PlayerStateKind::Idle;
        ctx.events.write(GameEvent::PlayerStateChanged {
            user_id: player.user_id,
            state: PlayerStateKind::Idle,
        });
    } else {
        start_delay(
            player.delay,
            SEARCH_DELAY_TICKS,
            false,
            DelayCompletion::Harvest { world_entity_id: entity.world_entity_id },
        );
    }
}

/// P8: exhausted nodes replenish when their timer runs out.
pub fn replenish_resources(
    clock: Res<WorldClock>,
    mut events: MessageWriter<GameEvent>,
    mut world_entities: Query<&mut WorldEntityState>,
) {
    for mut entity in world_entities.iter_mut() {
        let Some(at) = entity.replenish_at_tick else {
            continue;
        };
        if clock.tick >= at {
            entity.replenish_at_tick = None;
            events.write(GameEvent::ResourcesReplenished {
                world_entity_id: entity.world_entity_id,
            });
        }
    }
}

/// P8: instanced NPCs despawn with their owner.
pub fn despawn_orphaned_instances(
    mut commands: Commands,
    mut registry: ResMut<Registry>,
    mut index: ResMut<SpatialIndex>,
    mut events: MessageWriter<GameEvent>,
    npcs: Query<(Entity, &crate::components::NpcHandle, &crate::components::NpcPos, &crate::components::NpcStatus)>,
) {
    for (entity, handle, pos, status) in npcs.iter() {
        let Some(owner) = handle.owner else {
            continue;
        };
        if registry.players.contains_key(&owner) || status.state == NpcStateKind::Dead {
            continue;
        }
        registry.npcs.remove(&handle.npc_id);
        index.remove_npc(handle.npc_id);
        events.write(GameEvent::NpcDespawned { npc_id: handle.npc_id, at: pos.0 });
        commands.entity(entity).despawn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::components::EntityOrientation;
    use shared::tile::MapLevel;
    use shared::world_entity::WorldEntityDefinitionId;

    fn door_override(check_both: bool, locks: bool) -> ActionOverride {
        ActionOverride {
            entity_definition: WorldEntityDefinitionId(1),
            action: EntityVerb::Open,
            requirements: Vec::new(),
            check_requirements_from_both_sides: check_both,
            does_lock_after_entering: locks,
            failure_message: "It's locked.".into(),
            steps: vec![ActionScriptStep::GoThroughDoor {
                outside: TilePos::new(MapLevel::Overworld, 5, 5),
                inside: TilePos::new(MapLevel::Overworld, 5, 6),
            }],
        }
    }

    #[test]
    fn one_way_door_skips_requirements_from_inside() {
        let ov = door_override(false, false);
        let inside = TilePos::new(MapLevel::Overworld, 5, 6);
        let outside = TilePos::new(MapLevel::Overworld, 5, 5);
        assert_eq!(door_requirements_apply(&ov, inside), Ok(false));
        assert_eq!(door_requirements_apply(&ov, outside), Ok(true));
    }

    #[test]
    fn lock_after_entering_needs_both_sides_enabled() {
        let inside = TilePos::new(MapLevel::Overworld, 5, 6);
        // Lock flag alone does nothing with one-way checks.
        assert_eq!(door_requirements_apply(&door_override(false, true), inside), Ok(false));
        // With bidirectional checks it refuses from the inside.
        assert_eq!(door_requirements_apply(&door_override(true, true), inside), Err(()));
        // Bidirectional without the lock flag just checks normally.
        assert_eq!(door_requirements_apply(&door_override(true, false), inside), Ok(true));
    }

    #[test]
    fn positioning_rules_by_footprint() {
        let mut def = WorldEntityDefinition::simple(1, "Chest", vec![EntityVerb::Search]);
        let entity = WorldEntityState {
            world_entity_id: 1,
            definition: WorldEntityDefinitionId(1),
            pos: TilePos::new(MapLevel::Overworld, 10, 10),
            orientation: EntityOrientation::North,
            loot_override: None,
            replenish_at_tick: None,
            locked: false,
        };
        let cardinal = TilePos::new(MapLevel::Overworld, 10, 9);
        let diagonal = TilePos::new(MapLevel::Overworld, 9, 9);
        assert!(is_positioned(cardinal, &entity, &def));
        assert!(!is_positioned(diagonal, &entity, &def));
        // A 2x2 footprint accepts the diagonal corner.
        def.footprint = (2, 2);
        assert!(is_positioned(diagonal, &entity, &def));
    }
}
