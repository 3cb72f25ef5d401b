//! Player-to-player pursuit: Follow, TradeWith and Attack, plus the PvP
//! chase pass for attackers already in combat.
//!
//! Follow is a dumb chase: any A* plan is cancelled up front and every tick
//! takes a greedy step. TradeWith and Attack keep their initial A* plan
//! (wall routing) and only fall back to greedy once it completes. Followers
//! scheduled here are advanced again within the same tick through
//! [`FollowAdvanceQueue`], which is what lets pursuer and fleeing target
//! both move on the tick they act.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use std::collections::HashMap;

use shared::components::{EntityKind, PlayerStateKind};
use shared::protocol::{ServerPacket, TargetAction};
use shared::tile::{cardinally_adjacent, TilePos};

use crate::components::{MovementPlan, PendingAction, PlayerHandle};
use crate::events::GameEvent;
use crate::interactions::{self, interact_ctx, ActingPlayer, CoreRes, TradeRequestOutcome};
use crate::movement::{self, ArrivalQueue, FollowAdvanceQueue, MoveCtx};
use crate::pathfinding::greedy_path_toward_adjacent;
use crate::pending::ActionPlayerQuery;
use crate::targeting;

/// Before normal movement: Follow pursuits drop any A* plan so the tick
/// uses a greedy step instead; TradeWith and Attack keep theirs.
pub fn prepare_for_tick(mut players: ActionPlayerQuery) {
    for (_, _, _, _, pending, mut plan, _, _, _, _) in players.iter_mut() {
        if let Some(PendingAction::Player { action: TargetAction::Follow, .. }) = pending.0 {
            plan.0 = None;
        }
    }
}

/// After normal player movement: rebuild pursuits, resolve arrivals, and
/// schedule the greedy catch-up step for everyone still chasing.
pub fn update<'a>(
    mut commands: Commands,
    mut core: CoreRes,
    mut follow_queue: ResMut<FollowAdvanceQueue>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    mut players: ActionPlayerQuery,
) {
    let snapshots: HashMap<u32, (TilePos, u8, bool)> = players
        .iter()
        .map(|(_, handle, pos, status, _, _, _, _, progress, _)| {
            (
                handle.user_id,
                (pos.0, progress.combat_level, status.state == PlayerStateKind::Dead),
            )
        })
        .collect();

    // Pursuers: entity, target, action, via pending or PvP combat chase.
    let mut pursuits: Vec<(Entity, u32, TargetAction, bool)> = Vec::new();
    for (entity, handle, _, status, pending, _, _, _, _, _) in players.iter() {
        match pending.0 {
            Some(PendingAction::Player { action, target_user_id, .. })
                if matches!(
                    action,
                    TargetAction::Follow | TargetAction::TradeWith | TargetAction::Attack
                ) =>
            {
                pursuits.push((entity, target_user_id, action, false));
            }
            _ => {
                // PvP chase: already fighting a player, no pending needed.
                if status.state.is_combat() {
                    if let Some(target) = core.targets.get(handle.user_id) {
                        if target.kind == EntityKind::Player {
                            pursuits.push((entity, target.id, TargetAction::Attack, true));
                        }
                    }
                }
            }
        }
    }

    let mut trades_started: Vec<u32> = Vec::new();
    for (entity, target_user_id, action, in_combat) in pursuits {
        let Ok((e, handle, mut pos, mut status, mut pending, mut plan, mut delay, mut belongings, mut progress, mut settings)) =
            players.get_mut(entity)
        else {
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

        let drop_pursuit = |ctx: &mut interactions::InteractCtx, player: &mut ActingPlayer| {
            player.pending.0 = None;
            if in_combat && player.status.state.is_combat() {
                player.status.state = PlayerStateKind::Idle;
            }
            targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
        };

        let Some((target_pos, target_combat, dead)) = snapshots.get(&target_user_id).copied()
        else {
            drop_pursuit(&mut ctx, &mut player);
            continue;
        };
        if dead || target_pos.level != player.pos.0.level {
            drop_pursuit(&mut ctx, &mut player);
            continue;
        }
        if action == TargetAction::Attack
            && !ctx.wilderness.can_attack(
                player.pos.0,
                player.progress.combat_level,
                target_pos,
                target_combat,
            )
        {
            interactions::message(&mut ctx, player.user_id, "You can't attack them here.");
            drop_pursuit(&mut ctx, &mut player);
            continue;
        }

        let adjacent = cardinally_adjacent(player.pos.0.xy(), target_pos.xy())
            && ctx
                .grids
                .get(player.pos.0.level)
                .map(|g| g.has_line_of_sight(player.pos.0.xy(), target_pos.xy()))
                .unwrap_or(false);
        if adjacent {
            match action {
                TargetAction::Follow => {
                    // Caught up: stand still this tick.
                }
                TargetAction::TradeWith => {
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
                        trades_started.push(other_user_id);
                    }
                }
                TargetAction::Attack if !in_combat => {
                    interactions::execute_player_action(
                        &mut ctx,
                        &mut player,
                        target_user_id,
                        target_pos,
                        target_combat,
                        action,
                    );
                }
                _ => {}
            }
            continue;
        }

        // Not there yet: a one-tick greedy path (two tiles sprinting),
        // advanced again this same tick via the follow queue.
        let Some(grid) = ctx.grids.get(player.pos.0.level) else {
            continue;
        };
        if player.plan.0.is_some() && !matches!(action, TargetAction::Follow) && !in_combat {
            // Initial A* plan still running for TradeWith/Attack.
            continue;
        }
        let max_steps = if player.settings.is_sprinting() { 2 } else { 1 };
        let path = greedy_path_toward_adjacent(grid, player.pos.0.xy(), target_pos.xy(), max_steps);
        if path.len() > 1 {
            let mut chase = MovementPlan::new(player.pos.0.level, path);
            chase.preserve_state_on_start = true;
            chase.preserve_state_on_complete = true;
            player.plan.0 = Some(chase);
            follow_queue.0.push(entity);
        }
    }

    for other in trades_started {
        let Some(entity) = core.registry.players.get(&other).copied() else {
            continue;
        };
        if let Ok((_, _, _, mut status, _, mut plan, _, _, _, _)) = players.get_mut(entity) {
            status.state = PlayerStateKind::Trading;
            plan.0 = None;
        }
    }
}

/// Advance the followers scheduled this tick a second time, so pursuer and
/// target both actually move.
pub fn advance_follow_queue<'a>(
    mut core: CoreRes,
    mut follow_queue: ResMut<FollowAdvanceQueue>,
    mut arrivals: ResMut<ArrivalQueue>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    mut players: ActionPlayerQuery,
) {
    let queue = std::mem::take(&mut follow_queue.0);
    for entity in queue {
        let Ok((e, handle, mut pos, mut status, mut pending, mut plan, _delay, _belongings, mut progress, mut settings)) =
            players.get_mut(entity)
        else {
            continue;
        };
        let mut ctx = MoveCtx {
            clock: &core.clock,
            config: &core.config,
            grids: &core.grids,
            pathfinder: &mut core.pathfinder,
            index: &mut core.index,
            sessions: &core.sessions,
            events: &mut events,
            senders: &mut senders,
            arrivals: &mut arrivals,
        };
        movement::advance_one_player(
            &mut ctx,
            e,
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
