//! Pending-action reconciliation: arrival handlers for scheduled
//! interactions, and the per-tick environment pending processor with its
//! wait-tick countdown.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use std::collections::HashMap;

use shared::components::PlayerStateKind;
use shared::protocol::{ServerPacket, TargetAction};
use shared::tile::{cardinally_adjacent, chebyshev, TilePos};

use crate::components::{
    GroundItemState, MovementPlan, NpcHandle, NpcPos, NpcStatus, PendingAction, WorldEntityState,
};
use crate::config::{REPATH_GIVE_UP_DISTANCE, REPATH_RADII};
use crate::environment::{self, EnvCtx, EnvPlayer};
use crate::events::GameEvent;
use crate::interactions::{
    self, interact_ctx, ActingPlayer, CoreRes, TradeRequestOutcome,
};
use crate::movement::{ArrivalQueue, PlayerMoveQuery};
use crate::targeting;

pub type ActionPlayerQuery<'w, 's> = crate::combat::CombatPlayerQuery<'w, 's>;

/// Snapshot of the other players, taken before any mutable borrow, for
/// arrival checks against player targets.
fn player_snapshots(players: &ActionPlayerQuery) -> HashMap<u32, (TilePos, u8, bool)> {
    players
        .iter()
        .map(|(_, handle, pos, status, _, _, _, _, progress, _)| {
            (
                handle.user_id,
                (pos.0, progress.combat_level, status.state == PlayerStateKind::Dead),
            )
        })
        .collect()
}

/// P7 first half: players whose scheduled movement completed this tick.
/// Re-validates range/LOS/wilderness and either executes, re-arms, or
/// fails with a short message.
#[allow(clippy::too_many_arguments)]
pub fn process_arrivals(
    mut commands: Commands,
    mut core: CoreRes,
    mut arrivals: ResMut<ArrivalQueue>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<&mut MessageSender<ServerPacket>>,
    mut players: ActionPlayerQuery,
    npcs: Query<(&NpcHandle, &NpcPos, &NpcStatus)>,
    ground_items: Query<&GroundItemState>,
) {
    let queue = std::mem::take(&mut arrivals.0);
    if queue.is_empty() {
        return;
    }
    let snapshots = player_snapshots(&players);

    for entity in queue {
        let mut started_trade_with: Option<u32> = None;
        {
            let Ok((e, handle, mut pos, mut status, mut pending, mut plan, mut delay, mut belongings, mut progress, mut settings)) =
                players.get_mut(entity)
            else {
                continue;
            };
            let Some(action) = pending.0.clone() else {
                continue;
            };
            let mut ctx = interact_ctx(&mut commands, &mut core, &mut events, &mut senders);
            let mut player = ActingPlayer {
                entity: e,
                user_id: handle.user_id,
                player_type: handle.player_type,
                pos: &mut pos,
                status: &mut status,
                pending: &mut pending,
                plan: &mut plan,
                delay: &mut delay,
                belongings: &mut belongings,
                progress: &mut progress,
                settings: &mut settings,
            };

            match action {
                PendingAction::Grab { ground_item_id } => {
                    player.pending.0 = None;
                    let item = ctx
                        .registry
                        .ground_items
                        .get(&ground_item_id)
                        .and_then(|e| ground_items.get(*e).ok())
                        .cloned();
                    match item {
                        None => interactions::message(&mut ctx, player.user_id, "Too late - it's gone."),
                        Some(item_state) => {
                            if interactions::in_pickup_range(&ctx, player.pos.0, item_state.pos) {
                                interactions::grab_ground_item(&mut ctx, &mut player, &item_state);
                            } else {
                                interactions::message(&mut ctx, player.user_id, "Can't reach that.");
                            }
                        }
                    }
                }
                PendingAction::Npc { action, npc_id, retry_count, .. } => {
                    arrival_npc(&mut ctx, &mut player, &npcs, action, npc_id, retry_count);
                }
                PendingAction::Player { action, target_user_id, retry_count, .. } => {
                    let Some((target_pos, target_combat, dead)) =
                        snapshots.get(&target_user_id).copied()
                    else {
                        player.pending.0 = None;
                        targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
                        continue;
                    };
                    if dead || target_pos.level != player.pos.0.level {
                        player.pending.0 = None;
                        targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
                        continue;
                    }
                    let adjacent = cardinally_adjacent(player.pos.0.xy(), target_pos.xy())
                        && ctx
                            .grids
                            .get(player.pos.0.level)
                            .map(|g| g.has_line_of_sight(player.pos.0.xy(), target_pos.xy()))
                            .unwrap_or(false);
                    if adjacent {
                        if let Some(TradeRequestOutcome::Started { other_user_id }) =
                            interactions::execute_player_action(
                                &mut ctx,
                                &mut player,
                                target_user_id,
                                target_pos,
                                target_combat,
                                action,
                            )
                        {
                            started_trade_with = Some(other_user_id);
                        }
                    } else {
                        // Target moved: re-arm so the follow system resumes
                        // with greedy pursuit next tick.
                        player.pending.0 = Some(PendingAction::Player {
                            action,
                            target_user_id,
                            retry_count,
                            last_known: target_pos.xy(),
                        });
                    }
                }
                PendingAction::Environment { .. } => {
                    // Environment actions never schedule arrival callbacks;
                    // the processor below owns them.
                }
            }
        }

        if let Some(other) = started_trade_with {
            set_player_trading(&core, &mut players, other);
        }
    }
}

/// Re-check an NPC interaction at arrival; re-path toward a drifted NPC or
/// give up with a message.
fn arrival_npc(
    ctx: &mut crate::interactions::InteractCtx,
    player: &mut ActingPlayer,
    npcs: &Query<(&NpcHandle, &NpcPos, &NpcStatus)>,
    action: TargetAction,
    npc_id: u32,
    retry_count: u32,
) {
    let npc = ctx
        .registry
        .npcs
        .get(&npc_id)
        .and_then(|e| npcs.get(*e).ok());
    let Some((npc_handle, npc_pos, npc_status)) = npc else {
        player.pending.0 = None;
        targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
        interactions::message(ctx, player.user_id, "They're gone.");
        return;
    };
    if npc_pos.0.level != player.pos.0.level {
        player.pending.0 = None;
        targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
        return;
    }

    let grid = ctx.grids.get(player.pos.0.level);
    let in_range = if action == TargetAction::Attack {
        let state = crate::combat::combat_state_for(player.belongings, player.status, ctx.catalogs);
        crate::combat::in_attack_range(grid, state, player.pos.0, npc_pos.0)
    } else {
        cardinally_adjacent(player.pos.0.xy(), npc_pos.0.xy())
            && grid
                .map(|g| g.has_line_of_sight(player.pos.0.xy(), npc_pos.0.xy()))
                .unwrap_or(false)
    };

    if in_range {
        player.pending.0 = None;
        if action != TargetAction::Attack {
            targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
        }
        interactions::execute_npc_action(ctx, player, npc_handle, npc_status, action);
        return;
    }

    // The NPC walked off while we approached: one bounded re-path, then the
    // next arrival reconciles again.
    let dist = chebyshev(player.pos.0.xy(), npc_pos.0.xy());
    if dist <= REPATH_GIVE_UP_DISTANCE {
        let radius = if dist < 6 {
            REPATH_RADII[0]
        } else if dist <= 12 {
            REPATH_RADII[1]
        } else {
            REPATH_RADII[2]
        };
        if let Some(grid) = grid {
            if let Some(path) = ctx.pathfinder.path_adjacent_with_los_preference(
                grid,
                player.pos.0.xy(),
                npc_pos.0.xy(),
                false,
                Some(radius),
            ) {
                let mut plan = MovementPlan::new(player.pos.0.level, path);
                plan.notify_arrival = true;
                crate::movement::schedule_player_plan(player.plan, player.status, plan);
                player.pending.0 = Some(PendingAction::Npc {
                    action,
                    npc_id,
                    retry_count: retry_count + 1,
                    last_known: npc_pos.0.xy(),
                });
                return;
            }
        }
    }
    player.pending.0 = None;
    targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
    interactions::message(ctx, player.user_id, "Can't reach them.");
}

fn set_player_trading(core: &CoreRes, players: &mut ActionPlayerQuery, user_id: u32) {
    let Some(entity) = core.registry.players.get(&user_id) else {
        return;
    };
    if let Ok((_, _, _, mut status, _, mut plan, _, _, _, _)) = players.get_mut(*entity) {
        status.state = PlayerStateKind::Trading;
        plan.0 = None;
    }
}

/// P7 second half: the environment pending processor. One pass per player
/// per tick: walk, then wait, then re-verify and execute.
pub fn process_pending_environment<'a>(
    mut commands: Commands,
    mut core: CoreRes,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    mut players: PlayerMoveQuery,
    mut delays: Query<&mut crate::components::Delay>,
    mut world_entities: Query<&mut WorldEntityState>,
) {
    for (entity, handle, mut pos, mut status, mut pending, mut plan, mut belongings, mut progress, _settings) in
        players.iter_mut()
    {
        let Some(PendingAction::Environment { action, world_entity_id, wait_ticks }) =
            pending.0.clone()
        else {
            continue;
        };
        let Ok(mut delay) = delays.get_mut(entity) else {
            continue;
        };

        let user_id = handle.user_id;
        let entity_entry = core
            .registry
            .world_entities
            .get(&world_entity_id)
            .copied()
            .and_then(|e| world_entities.get_mut(e).ok());
        let Some(mut entity_state) = entity_entry else {
            pending.0 = None;
            continue;
        };
        let Some(def) = core.catalogs.world_entities.get(entity_state.definition).cloned() else {
            pending.0 = None;
            continue;
        };
        let ov = core.catalogs.overrides.get(entity_state.definition, action).cloned();

        match wait_ticks {
            None => {
                if plan.0.is_some() {
                    // Still walking.
                    continue;
                }
                if environment::is_positioned(pos.0, &entity_state, &def) {
                    let wait = environment::required_wait(&def, action, ov.as_ref());
                    pending.0 = Some(PendingAction::Environment {
                        action,
                        world_entity_id,
                        wait_ticks: Some(wait),
                    });
                } else {
                    pending.0 = None;
                    crate::sessions::send_to(
                        &core.sessions,
                        &mut senders,
                        user_id,
                        ServerPacket::GameMessage { message: "Can't reach that.".to_string() },
                    );
                }
            }
            Some(wait) if wait > 0 => {
                pending.0 = Some(PendingAction::Environment {
                    action,
                    world_entity_id,
                    wait_ticks: Some(wait - 1),
                });
            }
            Some(_) => {
                pending.0 = None;
                if !environment::is_positioned(pos.0, &entity_state, &def) {
                    crate::sessions::send_to(
                        &core.sessions,
                        &mut senders,
                        user_id,
                        ServerPacket::GameMessage { message: "You moved away.".to_string() },
                    );
                    continue;
                }
                targeting::clear_player_target(&mut core.targets, &mut events, user_id);
                let mut ctx = EnvCtx {
                    commands: &mut commands,
                    clock: &core.clock,
                    config: &core.config,
                    catalogs: &core.catalogs,
                    registry: &mut core.registry,
                    index: &mut core.index,
                    sessions: &core.sessions,
                    rng: &mut core.rng,
                    events: &mut events,
                    senders: &mut senders,
                };
                let mut player = EnvPlayer {
                    user_id,
                    pos: &mut pos,
                    status: &mut status,
                    pending: &mut pending,
                    plan: &mut plan,
                    delay: &mut delay,
                    belongings: &mut belongings,
                    progress: &mut progress,
                };
                environment::execute_environment_action(&mut ctx, &mut player, &mut entity_state, action);
            }
        }
    }
}
