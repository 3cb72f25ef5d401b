//! Movement execution: advancing installed plans one step per tick (two for
//! sprinters and speed-2 NPCs), sprint stamina, the seamless re-path that
//! keeps a player walking toward a moving NPC, and NPC wander/chase paths.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;

use shared::components::{NpcStateKind, PlayerSetting, PlayerStateKind};
use shared::protocol::ServerPacket;
use shared::skills::SkillKind;
use shared::tile::{cardinally_adjacent, chebyshev, TilePos};

use crate::components::{
    Belongings, MovementPlan, NpcHandle, NpcMotion, NpcPos, NpcStatus, Pending, PendingAction,
    Plan, PlayerHandle, PlayerPos, PlayerStatus, Progress, Settings,
};
use crate::config::{ServerConfig, WorldClock, REPATH_GIVE_UP_DISTANCE, REPATH_RADII};
use crate::events::GameEvent;
use crate::pathfinding::{greedy_path_toward_adjacent, Pathfinder};
use crate::sessions::{send_to, Sessions};
use crate::spatial::SpatialIndex;
use crate::targeting::NpcAggro;
use crate::world::{PathingGrids, WorldRng};
use rand::Rng;

/// Players whose plan completed this tick with arrival handling requested.
#[derive(Resource, Debug, Default)]
pub struct ArrivalQueue(pub Vec<Entity>);

/// Followers to advance a second time this tick (the follow-system trick
/// that lets pursuer and fleeing target both move on the same tick).
#[derive(Resource, Debug, Default)]
pub struct FollowAdvanceQueue(pub Vec<Entity>);

pub type PlayerMoveQuery<'w, 's> = Query<
    'w,
    's,
    (
        Entity,
        &'static PlayerHandle,
        &'static mut PlayerPos,
        &'static mut PlayerStatus,
        &'static mut Pending,
        &'static mut Plan,
        &'static mut Belongings,
        &'static mut Progress,
        &'static mut Settings,
    ),
    (With<PlayerHandle>, Without<NpcHandle>),
>;

/// Everything plan advancement touches besides the entity itself.
pub struct MoveCtx<'a, 'ew, 'sw, 'ss> {
    pub clock: &'a WorldClock,
    pub config: &'a ServerConfig,
    pub grids: &'a PathingGrids,
    pub pathfinder: &'a mut Pathfinder,
    pub index: &'a mut SpatialIndex,
    pub sessions: &'a Sessions,
    pub events: &'a mut MessageWriter<'ew, GameEvent>,
    pub senders: &'a mut Query<'sw, 'ss, &'sw mut MessageSender<ServerPacket>>,
    pub arrivals: &'a mut ArrivalQueue,
}

/// Install a plan on a player, transitioning into `Moving` unless the plan
/// asks to preserve the current state.
pub fn schedule_player_plan(plan_slot: &mut Plan, status: &mut PlayerStatus, plan: MovementPlan) {
    if !plan.preserve_state_on_start {
        status.state = PlayerStateKind::Moving;
    }
    plan_slot.0 = Some(plan);
}

/// Advance one player's plan by its speed. Emits moved events, debits
/// stamina, handles completion and the seamless re-path.
#[allow(clippy::too_many_arguments)]
pub(crate) fn advance_one_player(
    ctx: &mut MoveCtx,
    entity: Entity,
    handle: &PlayerHandle,
    pos: &mut PlayerPos,
    status: &mut PlayerStatus,
    pending: &mut Pending,
    plan_slot: &mut Plan,
    settings: &mut Settings,
    progress: &mut Progress,
) {
    let Some(plan) = plan_slot.0.as_mut() else {
        return;
    };

    // A plan made on another map level is stale: discard and proceed.
    if plan.level != pos.0.level {
        plan_slot.0 = None;
        return;
    }

    if plan.is_finished() {
        complete_player_plan(ctx, entity, handle.user_id, status, plan_slot);
        return;
    }

    // Sprint can be toggled mid-plan.
    plan.speed = if settings.is_sprinting() { 2 } else { 1 };

    if let Some(PendingAction::Npc { npc_id, last_known, .. }) = pending.0.as_mut() {
        seamless_repath(ctx, pos.0, plan, *npc_id, last_known);
    }

    let from = pos.0;
    let mut last = from.xy();
    let mut stepped = 0u32;
    while stepped < plan.speed as u32 && plan.next_index < plan.path.len() {
        last = plan.path[plan.next_index];
        plan.next_index += 1;
        stepped += 1;
    }
    if stepped == 0 {
        complete_player_plan(ctx, entity, handle.user_id, status, plan_slot);
        return;
    }

    let to = TilePos::new(from.level, last.0, last.1);
    pos.0 = to;
    ctx.index.relocate_player(handle.user_id, to);
    let running = plan.speed > 1;
    ctx.events.write(GameEvent::PlayerMoved { user_id: handle.user_id, from, to, running });

    if running && !ctx.config.disable_stamina {
        debit_sprint_stamina(ctx, handle.user_id, progress, settings, stepped);
    }

    if plan_slot.0.as_ref().map(|p| p.is_finished()).unwrap_or(false) {
        complete_player_plan(ctx, entity, handle.user_id, status, plan_slot);
    }
}

fn complete_player_plan(
    ctx: &mut MoveCtx,
    entity: Entity,
    user_id: u32,
    status: &mut PlayerStatus,
    plan_slot: &mut Plan,
) {
    let Some(plan) = plan_slot.0.take() else {
        return;
    };
    if !plan.preserve_state_on_complete && status.state.is_moving_class() {
        status.state = PlayerStateKind::Idle;
        ctx.events.write(GameEvent::PlayerStateChanged {
            user_id,
            state: PlayerStateKind::Idle,
        });
    }
    if plan.notify_arrival {
        ctx.arrivals.0.push(entity);
    }
}

/// Per-step sprint cost:
/// `floor(60 + 67 * min(weight, 64) / 64) * (1 - athletics / 300)`.
pub fn sprint_step_cost(weight: f32, athletics: u8) -> i32 {
    let clamped = weight.clamp(0.0, 64.0) as f64;
    let base = (60.0 + 67.0 * clamped / 64.0).floor();
    (base * (1.0 - athletics as f64 / 300.0)) as i32
}

fn debit_sprint_stamina(
    ctx: &mut MoveCtx,
    user_id: u32,
    progress: &mut Progress,
    settings: &mut Settings,
    steps: u32,
) {
    let cost = sprint_step_cost(progress.weight, progress.skills.boosted(SkillKind::Athletics));
    progress.abilities.stamina -= cost * steps as i32;
    if progress.abilities.stamina <= 0 {
        progress.abilities.stamina = 0;
        settings.0.insert(PlayerSetting::IsSprinting, 0);
        send_to(
            ctx.sessions,
            ctx.senders,
            user_id,
            ServerPacket::PlayerSettingChanged {
                setting: PlayerSetting::IsSprinting,
                value: 0,
            },
        );
    }
}

/// While a player walks toward an NPC, the NPC may move. Keep the plan
/// honest: update the remembered position when the old destination still
/// works, splice in a bounded re-path when it does not, and otherwise let
/// the arrival handler reconcile.
fn seamless_repath(
    ctx: &mut MoveCtx,
    pos: TilePos,
    plan: &mut MovementPlan,
    npc_id: u32,
    last_known: &mut (i32, i32),
) {
    let Some(npc_pos) = ctx.index.npc_pos(npc_id) else {
        return;
    };
    if npc_pos.level != pos.level || npc_pos.xy() == *last_known {
        return;
    }
    let Some(grid) = ctx.grids.get(pos.level) else {
        return;
    };
    if let Some(dest) = plan.destination() {
        if cardinally_adjacent(dest, npc_pos.xy()) && grid.has_line_of_sight(dest, npc_pos.xy()) {
            *last_known = npc_pos.xy();
            return;
        }
    }
    let dist = chebyshev(pos.xy(), npc_pos.xy());
    if dist > REPATH_GIVE_UP_DISTANCE {
        // Keep walking the old plan; arrival does the final reconciliation.
        return;
    }
    let radius = if dist < 6 {
        REPATH_RADII[0]
    } else if dist <= 12 {
        REPATH_RADII[1]
    } else {
        REPATH_RADII[2]
    };
    if let Some(path) = ctx.pathfinder.path_adjacent(grid, pos.xy(), npc_pos.xy(), Some(radius)) {
        plan.path = path;
        // Index 0 is the tile we already stand on.
        plan.next_index = 1;
        *last_known = npc_pos.xy();
    }
}

// =============================================================================
// SYSTEMS
// =============================================================================

/// P4/P5 player advancement. Advances every player carrying a plan.
#[allow(clippy::too_many_arguments)]
pub fn advance_player_plans<'a>(
    clock: Res<WorldClock>,
    config: Res<ServerConfig>,
    grids: Res<PathingGrids>,
    mut pathfinder: ResMut<Pathfinder>,
    mut index: ResMut<SpatialIndex>,
    sessions: Res<Sessions>,
    mut arrivals: ResMut<ArrivalQueue>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    mut players: PlayerMoveQuery,
) {
    let mut ctx = MoveCtx {
        clock: &clock,
        config: &config,
        grids: &grids,
        pathfinder: &mut pathfinder,
        index: &mut index,
        sessions: &sessions,
        events: &mut events,
        senders: &mut senders,
        arrivals: &mut arrivals,
    };
    for (entity, handle, mut pos, mut status, mut pending, mut plan, _belongings, mut progress, mut settings) in
        players.iter_mut()
    {
        advance_one_player(
            &mut ctx,
            entity,
            handle,
            &mut pos,
            &mut status,
            &mut pending,
            &mut plan,
            &mut settings,
            &mut progress,
        );
    }
}

/// P6 first half: install NPC paths: greedy chase for aggro'd NPCs,
/// wander paths for idle ones whose pacing timer elapsed.
#[allow(clippy::too_many_arguments)]
pub fn update_npc_paths(
    clock: Res<WorldClock>,
    grids: Res<PathingGrids>,
    mut pathfinder: ResMut<Pathfinder>,
    index: Res<SpatialIndex>,
    catalogs: Res<crate::world::Catalogs>,
    mut rng: ResMut<WorldRng>,
    mut npcs: Query<
        (&NpcHandle, &NpcPos, &mut NpcStatus, &NpcAggro, &mut NpcMotion, &mut Plan),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
) {
    for (handle, pos, mut status, aggro, mut motion, mut plan) in npcs.iter_mut() {
        if status.state == NpcStateKind::Dead {
            plan.0 = None;
            continue;
        }
        let Some(grid) = grids.get(pos.0.level) else {
            continue;
        };

        if let Some(target) = aggro.target() {
            // Dumb chase: one greedy segment per tick toward the target.
            let Some(target_pos) = (match target.kind {
                shared::components::EntityKind::Player => index.player_pos(target.id),
                _ => None,
            }) else {
                continue;
            };
            if target_pos.level != pos.0.level {
                continue;
            }
            if cardinally_adjacent(pos.0.xy(), target_pos.xy()) {
                plan.0 = None;
                continue;
            }
            let path =
                greedy_path_toward_adjacent(grid, pos.0.xy(), target_pos.xy(), motion.speed as u32);
            if path.len() > 1 {
                let mut chase = MovementPlan::new(pos.0.level, path);
                chase.speed = motion.speed;
                chase.preserve_state_on_start = true;
                chase.preserve_state_on_complete = true;
                plan.0 = Some(chase);
            } else {
                plan.0 = None;
            }
            continue;
        }

        // Wander pacing.
        if plan.0.is_some() || status.state == NpcStateKind::Combat {
            continue;
        }
        let Some(def) = catalogs.npcs.get(handle.definition) else {
            continue;
        };
        if def.wander_radius == 0 {
            continue;
        }
        let now = clock.now_ms();
        if now < motion.next_wander_at_ms {
            continue;
        }
        let (min_ms, max_ms) = def.wander_interval_ms;
        motion.next_wander_at_ms = now + rng.0.gen_range(min_ms..=max_ms.max(min_ms));

        // A few tries to find a walkable target inside the box.
        for _ in 0..8 {
            let tx = rng.0.gen_range(motion.area.min_x..=motion.area.max_x);
            let ty = rng.0.gen_range(motion.area.min_y..=motion.area.max_y);
            if grid.is_fully_blocked(tx, ty) || (tx, ty) == pos.0.xy() {
                continue;
            }
            if let Some(path) =
                pathfinder.path_to(grid, pos.0.xy(), (tx, ty), Some(def.wander_radius * 2))
            {
                if path.len() > 1 {
                    let mut wander = MovementPlan::new(pos.0.level, path);
                    wander.speed = 1;
                    wander.preserve_state_on_start = true;
                    wander.preserve_state_on_complete = true;
                    plan.0 = Some(wander);
                    status.state = NpcStateKind::Wandering;
                }
                break;
            }
        }
    }
}

/// P6 second half: advance NPC plans.
pub fn advance_npc_plans(
    mut index: ResMut<SpatialIndex>,
    mut events: MessageWriter<GameEvent>,
    mut npcs: Query<
        (&NpcHandle, &mut NpcPos, &mut NpcStatus, &mut Plan),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
) {
    for (handle, mut pos, mut status, mut plan_slot) in npcs.iter_mut() {
        let Some(plan) = plan_slot.0.as_mut() else {
            continue;
        };
        if plan.level != pos.0.level {
            plan_slot.0 = None;
            continue;
        }
        let from = pos.0;
        let mut last = from.xy();
        let mut stepped = 0u32;
        while stepped < plan.speed as u32 && plan.next_index < plan.path.len() {
            last = plan.path[plan.next_index];
            plan.next_index += 1;
            stepped += 1;
        }
        if stepped > 0 {
            let to = TilePos::new(from.level, last.0, last.1);
            pos.0 = to;
            index.relocate_npc(handle.npc_id, to);
            events.write(GameEvent::NpcMoved { npc_id: handle.npc_id, from, to });
        }
        if plan_slot.0.as_ref().map(|p| p.is_finished()).unwrap_or(true) {
            plan_slot.0 = None;
            if status.state == NpcStateKind::Wandering {
                status.state = NpcStateKind::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprint_cost_matches_formula() {
        // Weightless, level-1 athletics: floor(60) * (1 - 1/300)
        assert_eq!(sprint_step_cost(0.0, 1), 59);
        // Full weight: floor(60 + 67) = 127
        assert_eq!(sprint_step_cost(64.0, 1), (127.0 * (1.0 - 1.0 / 300.0)) as i32);
        // Weight clamps at 64.
        assert_eq!(sprint_step_cost(200.0, 1), sprint_step_cost(64.0, 1));
        // Athletics reduces the cost.
        assert!(sprint_step_cost(30.0, 99) < sprint_step_cost(30.0, 1));
    }
}
