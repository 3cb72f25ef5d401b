//! Interaction executors shared by the dispatcher, the arrival handlers and
//! the follow system: ground-item pickup, NPC verbs, and player-target
//! verbs. Each runs only after its caller verified position and sight.

use bevy::ecs::system::SystemParam;
use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use rand::Rng;

use shared::components::{EntityRef, NpcStateKind, PlayerStateKind};
use shared::npc::NpcInteraction;
use shared::protocol::{ServerPacket, TargetAction};
use shared::skills::SkillKind;
use shared::tile::TilePos;

use crate::components::{
    ActiveDelay, Belongings, Delay, DelayCompletion, GroundItemState, NpcHandle, NpcStatus,
    Pending, Plan, PlayerPos, PlayerStatus, Progress, Settings,
};
use crate::config::{ServerConfig, WorldClock, TRADE_REQUEST_DELAY_TICKS};
use crate::events::GameEvent;
use crate::inventory::{give_stack, grant_xp};
use crate::pathfinding::Pathfinder;
use crate::sessions::{send_to, Sessions};
use crate::spatial::SpatialIndex;
use crate::targeting::{self, PlayerTargets};
use crate::trade::Trades;
use crate::wilderness::WildernessMap;
use crate::world::{Catalogs, ItemSpawns, PathingGrids, Registry, WorldRng};

/// The core-resource bundle most gameplay systems touch, grouped so system
/// signatures stay within reason.
#[derive(SystemParam)]
pub struct CoreRes<'w> {
    pub clock: Res<'w, WorldClock>,
    pub config: Res<'w, ServerConfig>,
    pub catalogs: Res<'w, Catalogs>,
    pub registry: ResMut<'w, Registry>,
    pub index: ResMut<'w, SpatialIndex>,
    pub sessions: ResMut<'w, Sessions>,
    pub rng: ResMut<'w, WorldRng>,
    pub targets: ResMut<'w, PlayerTargets>,
    pub trades: ResMut<'w, Trades>,
    pub grids: ResMut<'w, PathingGrids>,
    pub pathfinder: ResMut<'w, Pathfinder>,
    pub wilderness: Res<'w, WildernessMap>,
    pub spawns: ResMut<'w, ItemSpawns>,
}

/// Borrow an [`InteractCtx`] out of the bundle for one interaction.
pub fn interact_ctx<'a, 'w, 'cw, 'cs, 'ew, 'sw, 'ss>(
    commands: &'a mut Commands<'cw, 'cs>,
    core: &'a mut CoreRes<'w>,
    events: &'a mut MessageWriter<'ew, GameEvent>,
    senders: &'a mut Query<'sw, 'ss, &'sw mut MessageSender<ServerPacket>>,
) -> InteractCtx<'a, 'cw, 'cs, 'ew, 'sw, 'ss> {
    InteractCtx {
        commands,
        clock: &*core.clock,
        config: &*core.config,
        catalogs: &*core.catalogs,
        registry: &mut *core.registry,
        index: &mut *core.index,
        sessions: &*core.sessions,
        rng: &mut *core.rng,
        targets: &mut *core.targets,
        trades: &mut *core.trades,
        grids: &*core.grids,
        pathfinder: &mut *core.pathfinder,
        wilderness: &*core.wilderness,
        spawns: &mut *core.spawns,
        events,
        senders,
    }
}

/// Shared context for interaction executors. The bevy-side handles keep
/// their own world/state lifetimes; everything else borrows plainly.
pub struct InteractCtx<'a, 'cw, 'cs, 'ew, 'sw, 'ss> {
    pub commands: &'a mut Commands<'cw, 'cs>,
    pub clock: &'a WorldClock,
    pub config: &'a ServerConfig,
    pub catalogs: &'a Catalogs,
    pub registry: &'a mut Registry,
    pub index: &'a mut SpatialIndex,
    pub sessions: &'a Sessions,
    pub rng: &'a mut WorldRng,
    pub targets: &'a mut PlayerTargets,
    pub trades: &'a mut Trades,
    pub grids: &'a PathingGrids,
    pub pathfinder: &'a mut Pathfinder,
    pub wilderness: &'a WildernessMap,
    pub spawns: &'a mut ItemSpawns,
    pub events: &'a mut MessageWriter<'ew, GameEvent>,
    pub senders: &'a mut Query<'sw, 'ss, &'sw mut MessageSender<ServerPacket>>,
}

/// The acting player's mutable parts.
pub struct ActingPlayer<'a> {
    pub entity: Entity,
    pub user_id: u32,
    pub player_type: shared::components::PlayerType,
    pub pos: &'a mut PlayerPos,
    pub status: &'a mut PlayerStatus,
    pub pending: &'a mut Pending,
    pub plan: &'a mut Plan,
    pub delay: &'a mut Delay,
    pub belongings: &'a mut Belongings,
    pub progress: &'a mut Progress,
    pub settings: &'a mut Settings,
}

pub fn message(ctx: &mut InteractCtx, user_id: u32, text: &str) {
    send_to(
        ctx.sessions,
        ctx.senders,
        user_id,
        ServerPacket::GameMessage { message: text.to_string() },
    );
}

/// Whether the player may reach the tile for a pickup: same tile, or
/// cardinal adjacency with line of sight.
pub fn in_pickup_range(ctx: &InteractCtx, player: TilePos, item: TilePos) -> bool {
    if player.level != item.level {
        return false;
    }
    if player.xy() == item.xy() {
        return true;
    }
    if !shared::tile::cardinally_adjacent(player.xy(), item.xy()) {
        return false;
    }
    ctx.grids
        .get(player.level)
        .map(|g| g.has_line_of_sight(player.xy(), item.xy()))
        .unwrap_or(false)
}

/// Pick up a ground item the caller verified to be in range. Ownership and
/// space are re-checked here.
pub fn grab_ground_item(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    item_state: &GroundItemState,
) -> bool {
    if !item_state.visible_to_user(player.user_id) {
        // Someone else's private drop; pretend it isn't there.
        return false;
    }
    if ctx.catalogs.items.get(item_state.stack.item_id).is_none() {
        return false;
    }
    if !player
        .belongings
        .inventory
        .can_accept(&[item_state.stack], &ctx.catalogs.items)
    {
        message(ctx, player.user_id, "You don't have enough inventory space.");
        return false;
    }
    let leftover = give_stack(
        player.belongings,
        player.progress,
        ctx.catalogs,
        ctx.sessions,
        ctx.senders,
        player.user_id,
        item_state.stack,
    );
    if leftover.is_some() {
        message(ctx, player.user_id, "You don't have enough inventory space.");
        return false;
    }
    crate::ground_items::remove_ground_item(
        ctx.commands,
        ctx.registry,
        ctx.index,
        ctx.events,
        ctx.spawns,
        ctx.clock,
        item_state.ground_item_id,
        item_state.pos,
    );
    true
}

/// NPC interaction, executed at adjacency (or range, for ranged attacks).
pub fn execute_npc_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    npc_handle: &NpcHandle,
    npc_status: &NpcStatus,
    action: TargetAction,
) {
    let Some(def) = ctx.catalogs.npcs.get(npc_handle.definition) else {
        return;
    };
    if npc_status.state == NpcStateKind::Dead {
        message(ctx, player.user_id, "They're beyond help now.");
        return;
    }
    match action {
        TargetAction::Attack => {
            if !def.interactions.contains(&NpcInteraction::Attack) {
                message(ctx, player.user_id, "You can't attack that.");
                return;
            }
            let state = crate::combat::combat_state_for(player.belongings, player.status, ctx.catalogs);
            player.status.state = state;
            targeting::set_player_target(
                ctx.targets,
                ctx.events,
                player.user_id,
                EntityRef::npc(npc_handle.npc_id),
            );
        }
        TargetAction::TalkTo => {
            if !def.interactions.contains(&NpcInteraction::TalkTo) {
                message(ctx, player.user_id, "They don't seem interested.");
                return;
            }
            player.status.state = PlayerStateKind::InDialogue;
            player.status.dialogue_npc = Some(npc_handle.npc_id);
            let line = def.dialogue.first().cloned().unwrap_or_else(|| "...".to_string());
            ctx.events.write(GameEvent::ForcedSpeech {
                entity: EntityRef::npc(npc_handle.npc_id),
                message: line.clone(),
            });
            send_to(
                ctx.sessions,
                ctx.senders,
                player.user_id,
                ServerPacket::NpcConversation {
                    npc_id: npc_handle.npc_id,
                    text: line,
                    options: vec!["Goodbye.".to_string()],
                },
            );
        }
        TargetAction::Shop => {
            let Some(shop_id) = def.shop_id.filter(|_| def.interactions.contains(&NpcInteraction::Shop)) else {
                message(ctx, player.user_id, "They have nothing to sell.");
                return;
            };
            player.status.state = PlayerStateKind::Shopping;
            player.status.current_shop = Some(shop_id);
            send_to(
                ctx.sessions,
                ctx.senders,
                player.user_id,
                ServerPacket::StartedShopping { shop_id },
            );
        }
        TargetAction::Pickpocket => {
            let Some(info) = def
                .pickpocket
                .as_ref()
                .filter(|_| def.interactions.contains(&NpcInteraction::Pickpocket))
            else {
                message(ctx, player.user_id, "You can't pick their pocket.");
                return;
            };
            if player.progress.skills.base(SkillKind::Thieving) < info.required_thieving {
                message(
                    ctx,
                    player.user_id,
                    &format!("You need thieving level {} for that.", info.required_thieving),
                );
                return;
            }
            let thieving = player.progress.skills.boosted(SkillKind::Thieving) as i32;
            let fail_chance =
                (info.fail_percent as i32 - (thieving - info.required_thieving as i32)).clamp(5, 95);
            if ctx.rng.0.gen_range(0..100) < fail_chance {
                // Caught: stunned behind a blocking delay.
                player.status.state = PlayerStateKind::Stunned;
                player.delay.0 = Some(ActiveDelay {
                    remaining: info.stun_ticks,
                    blocking: true,
                    completion: DelayCompletion::None,
                });
                ctx.events.write(GameEvent::ForcedSpeech {
                    entity: EntityRef::npc(npc_handle.npc_id),
                    message: "What do you think you're doing?".to_string(),
                });
                ctx.events.write(GameEvent::PlayerStateChanged {
                    user_id: player.user_id,
                    state: PlayerStateKind::Stunned,
                });
                message(ctx, player.user_id, "You've been caught!");
                return;
            }
            if let Some(table) = ctx.catalogs.loot.get(info.loot).cloned() {
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
                        message(ctx, player.user_id, "You don't have enough inventory space.");
                        return;
                    }
                }
            }
            grant_xp(
                player.progress,
                ctx.sessions,
                ctx.senders,
                player.user_id,
                SkillKind::Thieving,
                info.xp,
            );
            message(ctx, player.user_id, "You pick their pocket.");
        }
        _ => {}
    }
}

/// Outcome the caller applies to the *other* player after its own borrow
/// ends.
pub enum TradeRequestOutcome {
    /// A session started: put both players into the trading state and send
    /// the started packets.
    Started { other_user_id: u32 },
    /// A request was sent to the other player.
    Requested,
    Refused,
}

/// Trade request on arrival next to the target. Request matching starts the
/// session; expiry GC happens here, on the interaction, not on a timer.
pub fn request_trade(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    other_user_id: u32,
) -> TradeRequestOutcome {
    let now = ctx.clock.now_ms();
    ctx.trades.gc_expired(now);
    if ctx.trades.session_of(player.user_id).is_some() {
        return TradeRequestOutcome::Refused;
    }
    if ctx.clock.tick
        < player.status.last_trade_request_tick + TRADE_REQUEST_DELAY_TICKS
    {
        return TradeRequestOutcome::Refused;
    }
    player.status.last_trade_request_tick = ctx.clock.tick;

    if ctx.trades.take_matching_request(other_user_id, player.user_id).is_some() {
        ctx.trades.start_session(player.user_id, other_user_id);
        player.status.state = PlayerStateKind::Trading;
        send_to(
            ctx.sessions,
            ctx.senders,
            player.user_id,
            ServerPacket::TradeStarted { other_user_id },
        );
        send_to(
            ctx.sessions,
            ctx.senders,
            other_user_id,
            ServerPacket::TradeStarted { other_user_id: player.user_id },
        );
        TradeRequestOutcome::Started { other_user_id }
    } else {
        ctx.trades.push_request(player.user_id, other_user_id, now);
        send_to(
            ctx.sessions,
            ctx.senders,
            other_user_id,
            ServerPacket::TradeRequested { from_user_id: player.user_id },
        );
        message(ctx, player.user_id, "Sending trade request...");
        TradeRequestOutcome::Requested
    }
}

/// Player-target action executed on arrival (or immediately when already
/// adjacent): attack enters combat, trade sends the request. Follow has no
/// arrival action; the follow system keeps it alive.
pub fn execute_player_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    target_user_id: u32,
    target_pos: TilePos,
    target_combat: u8,
    action: TargetAction,
) -> Option<TradeRequestOutcome> {
    match action {
        TargetAction::Attack => {
            if !ctx.wilderness.can_attack(
                player.pos.0,
                player.progress.combat_level,
                target_pos,
                target_combat,
            ) {
                message(ctx, player.user_id, "You can't attack them here.");
                player.pending.0 = None;
                targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
                return None;
            }
            let state = crate::combat::combat_state_for(player.belongings, player.status, ctx.catalogs);
            player.status.state = state;
            targeting::set_player_target(
                ctx.targets,
                ctx.events,
                player.user_id,
                EntityRef::player(target_user_id),
            );
            player.pending.0 = None;
            None
        }
        TargetAction::TradeWith => {
            let outcome = request_trade(ctx, player, target_user_id);
            player.pending.0 = None;
            Some(outcome)
        }
        TargetAction::Moderate => {
            message(ctx, player.user_id, "Nothing to moderate right now.");
            player.pending.0 = None;
            None
        }
        _ => None,
    }
}
