//! The action dispatcher: drains the tick's client intents and routes each
//! through the universal gates (auth, dead, stun, delay interruption) to
//! its handler.
//!
//! Gate order is fixed: unauthenticated intents are dropped (except the
//! login handshake); dead players may only log out or chat; a stun-lock
//! (blocking delay or stunned state) passes chat, logout, eat/drink and
//! in-range pickup only; and any surviving intent other than chat or logout
//! interrupts a non-blocking delay.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use std::collections::HashMap;

use shared::components::{EntityKind, EntityRef, PlayerStateKind};
use shared::items::{EquipmentSlot, ItemStack};
use shared::protocol::{
    ClientIntent, InventoryItemAction, MenuKind, ServerPacket, TargetAction,
};
use shared::spells::{SpellEffect, SpellId};
use shared::skills::SkillKind;
use shared::tile::{cardinally_adjacent, TilePos};
use shared::world_entity::EntityVerb;

use crate::components::{
    GroundItemState, MovementPlan, NpcHandle, NpcPos, NpcStatus, PendingAction, PlayerHandle,
    WorldEntityState,
};
use crate::config::{CLICK_PATH_RADIUS, INTERACTION_PATH_RADIUS, RANGED_ATTACK_RANGE};
use crate::delay;
use crate::environment;
use crate::events::GameEvent;
use crate::interactions::{
    self, interact_ctx, ActingPlayer, CoreRes, InteractCtx, TradeRequestOutcome,
};
use crate::inventory;
use crate::movement::schedule_player_plan;
use crate::pending::ActionPlayerQuery;
use crate::persistence::{build_profile, PlayerProfiles};
use crate::sessions::{self, send_to, IntentQueue};
use crate::targeting::{self, NpcAggro};
use crate::trade::{self, TradeStage};

/// What the gate chain decided for one intent.
enum Gate {
    Pass,
    PassStunPickupOnly,
    Drop,
    DropWithInvokeFailure(InventoryItemAction),
}

fn gate_intent(
    intent: &ClientIntent,
    state: PlayerStateKind,
    stun_locked: bool,
) -> Gate {
    if state == PlayerStateKind::Dead {
        return match intent {
            ClientIntent::Logout | ClientIntent::PublicMessage { .. } => Gate::Pass,
            _ => Gate::Drop,
        };
    }
    if stun_locked {
        return match intent {
            ClientIntent::PublicMessage { .. } | ClientIntent::Logout => Gate::Pass,
            ClientIntent::InvokeInventoryItemAction {
                action: InventoryItemAction::Eat | InventoryItemAction::Drink,
                ..
            } => Gate::Pass,
            ClientIntent::InvokeInventoryItemAction { action, .. } => {
                Gate::DropWithInvokeFailure(*action)
            }
            ClientIntent::PerformActionOnEntity {
                action: TargetAction::Grab,
                entity_kind: EntityKind::GroundItem,
                ..
            } => Gate::PassStunPickupOnly,
            _ => Gate::Drop,
        };
    }
    Gate::Pass
}

/// P1: process this tick's drained intents in arrival order.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_client_intents<'a>(
    mut commands: Commands,
    mut core: CoreRes,
    mut profiles: ResMut<PlayerProfiles>,
    mut queue: ResMut<IntentQueue>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    mut players: ActionPlayerQuery,
    npcs: Query<(&NpcHandle, &NpcPos, &NpcStatus)>,
    mut npc_aggro: Query<(&NpcHandle, &mut NpcAggro)>,
    ground_items: Query<&GroundItemState>,
    world_entities: Query<&WorldEntityState>,
) {
    let intents = std::mem::take(&mut queue.0);
    if intents.is_empty() {
        return;
    }
    // Combat levels and liveness of everyone online, for player-target
    // gates. Positions are always read from the index, which is current.
    let combat_snapshot: HashMap<u32, (u8, bool)> = players
        .iter()
        .map(|(_, handle, _, status, _, _, _, _, progress, _)| {
            (
                handle.user_id,
                (progress.combat_level, status.state == PlayerStateKind::Dead),
            )
        })
        .collect();

    for (link, peer, intent) in intents {
        if let ClientIntent::SubmitPlayerName { name } = &intent {
            sessions::login_player(
                &mut commands,
                &mut core.registry,
                &mut core.sessions,
                &mut profiles,
                &mut core.index,
                &core.catalogs,
                &mut events,
                &mut senders,
                &core.config,
                link,
                peer,
                name,
            );
            continue;
        }
        // Auth gate: everything else needs a logged-in player.
        let Some(user_id) = core.sessions.user_by_peer.get(&peer).copied() else {
            continue;
        };
        let Some(entity) = core.registry.players.get(&user_id).copied() else {
            continue;
        };

        // Dead/stun gates from a short read-only borrow.
        let gate = {
            let Ok((_, _, _, status, _, _, delay, _, _, _)) = players.get(entity) else {
                continue;
            };
            gate_intent(&intent, status.state, delay::is_stun_locked(delay, status))
        };
        let stun_pickup_only = match gate {
            Gate::Drop => continue,
            Gate::DropWithInvokeFailure(action) => {
                send_to(
                    &core.sessions,
                    &mut senders,
                    user_id,
                    ServerPacket::InvokedInventoryItemAction { action, success: false },
                );
                continue;
            }
            Gate::PassStunPickupOnly => true,
            Gate::Pass => false,
        };

        // Any surviving action other than chat and logout interrupts a
        // non-blocking delay.
        if !matches!(intent, ClientIntent::PublicMessage { .. } | ClientIntent::Logout) {
            if let Ok((_, _, _, _, _, _, mut delay, _, _, _)) = players.get_mut(entity) {
                delay::interrupt_delay(&mut delay);
            }
        }

        match intent {
            ClientIntent::Logout => {
                handle_logout(
                    &mut commands,
                    &mut core,
                    &mut profiles,
                    &mut events,
                    &mut senders,
                    &mut players,
                    &mut npc_aggro,
                    user_id,
                    entity,
                );
            }
            ClientIntent::UpdateTradeStatus { status } => {
                handle_trade_status(&mut core, &mut senders, &mut players, user_id, status);
            }
            other => {
                let trade_started = {
                    let Ok((e, handle, mut pos, mut status, mut pending, mut plan, mut delay_c, mut belongings, mut progress, mut settings)) =
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
                        delay: &mut delay_c,
                        belongings: &mut belongings,
                        progress: &mut progress,
                        settings: &mut settings,
                    };
                    handle_player_intent(
                        &mut ctx,
                        &mut player,
                        &combat_snapshot,
                        &npcs,
                        &ground_items,
                        &world_entities,
                        other,
                        stun_pickup_only,
                    )
                };
                if let Some(other_user) = trade_started {
                    let Some(other_entity) = core.registry.players.get(&other_user).copied() else {
                        continue;
                    };
                    if let Ok((_, _, _, mut status, _, mut plan, _, _, _, _)) =
                        players.get_mut(other_entity)
                    {
                        status.state = PlayerStateKind::Trading;
                        plan.0 = None;
                    }
                }
            }
        }
    }
}

/// Route one gated intent for one player. Returns the other user id when a
/// trade session just started (their state is set by the caller).
#[allow(clippy::too_many_arguments)]
fn handle_player_intent(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    combat_snapshot: &HashMap<u32, (u8, bool)>,
    npcs: &Query<(&NpcHandle, &NpcPos, &NpcStatus)>,
    ground_items: &Query<&GroundItemState>,
    world_entities: &Query<&WorldEntityState>,
    intent: ClientIntent,
    stun_pickup_only: bool,
) -> Option<u32> {
    match intent {
        ClientIntent::SendMovementPath { x, y } => {
            handle_movement_path(ctx, player, x, y);
            None
        }
        ClientIntent::PerformActionOnEntity { action, entity_kind, entity_id } => {
            handle_perform_action(
                ctx,
                player,
                combat_snapshot,
                npcs,
                ground_items,
                world_entities,
                action,
                entity_kind,
                entity_id,
                stun_pickup_only,
            )
        }
        ClientIntent::InvokeInventoryItemAction { action, menu, slot, item_id, amount, is_iou } => {
            handle_invoke_item(ctx, player, action, menu, slot as usize, item_id, amount, is_iou);
            None
        }
        ClientIntent::SwitchToIdleState => {
            handle_switch_to_idle(ctx, player);
            None
        }
        ClientIntent::UseItemOnEntity { .. } | ClientIntent::UseItemOnItem { .. } => {
            interactions::message(ctx, player.user_id, "Nothing interesting happens.");
            None
        }
        ClientIntent::CastSingleCombatOrStatusSpell { spell_id, target_kind, target_id } => {
            handle_cast_combat_spell(ctx, player, combat_snapshot, spell_id, target_kind, target_id);
            None
        }
        ClientIntent::CastInventorySpell { spell_id, slot } => {
            handle_cast_inventory_spell(ctx, player, spell_id, slot as usize);
            None
        }
        ClientIntent::CastTeleportSpell { spell_id } => {
            handle_cast_teleport_spell(ctx, player, spell_id);
            None
        }
        ClientIntent::ToggleAutoCast { spell_id } => {
            handle_toggle_autocast(ctx, player, spell_id);
            None
        }
        ClientIntent::PublicMessage { message, style } => {
            if player.status.muted {
                return None;
            }
            // One local message per tick is the rate signal.
            if player.status.last_local_message_tick == ctx.clock.tick && ctx.clock.tick > 0 {
                return None;
            }
            player.status.last_local_message_tick = ctx.clock.tick;
            ctx.events.write(GameEvent::PublicChat { user_id: player.user_id, message, style });
            None
        }
        ClientIntent::ChangePlayerSetting { setting, value } => {
            player.settings.0.insert(setting, value);
            player.belongings.dirty = true;
            send_to(
                ctx.sessions,
                ctx.senders,
                player.user_id,
                ServerPacket::PlayerSettingChanged { setting, value },
            );
            None
        }
        ClientIntent::ReorganizeInventorySlots { from, to } => {
            if player.belongings.inventory.swap(from as usize, to as usize) {
                player.belongings.dirty = true;
            }
            None
        }
        ClientIntent::CreateItem { .. } => {
            interactions::message(ctx, player.user_id, "You can't make that here.");
            None
        }
        ClientIntent::ChangeAppearance { appearance } => {
            player.status.appearance = appearance;
            player.belongings.dirty = true;
            None
        }
        ClientIntent::SelectNpcConversationOption { .. } => {
            if player.status.state == PlayerStateKind::InDialogue {
                player.status.state = PlayerStateKind::Idle;
                player.status.dialogue_npc = None;
            }
            None
        }
        // Handled by the caller before this point.
        ClientIntent::SubmitPlayerName { .. }
        | ClientIntent::Logout
        | ClientIntent::UpdateTradeStatus { .. } => None,
    }
}

// =============================================================================
// MOVEMENT & ENTITY ACTIONS
// =============================================================================

/// Manual movement always breaks pursuit: pending and target are cleared
/// before the click path is computed.
fn handle_movement_path(ctx: &mut InteractCtx, player: &mut ActingPlayer, x: i32, y: i32) {
    player.pending.0 = None;
    targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
    if player.status.state == PlayerStateKind::Trading {
        // The other side's cancel packet closes their window; their state
        // resets on their next intent.
        trade::cancel_trades_for(
            ctx.trades,
            player.user_id,
            ctx.sessions,
            ctx.senders,
            shared::protocol::TRADE_CANCEL_OTHER_CANCELLED,
        );
        player.status.state = PlayerStateKind::Idle;
    }
    let Some(grid) = ctx.grids.get(player.pos.0.level) else {
        send_to(ctx.sessions, ctx.senders, player.user_id, ServerPacket::PathfindingFailed);
        return;
    };
    match ctx.pathfinder.path_to(grid, player.pos.0.xy(), (x, y), Some(CLICK_PATH_RADIUS)) {
        Some(path) if path.len() > 1 => {
            let plan = MovementPlan::new(player.pos.0.level, path);
            schedule_player_plan(player.plan, player.status, plan);
        }
        Some(_) => {
            // Clicked the tile we already stand on.
            player.plan.0 = None;
        }
        None => {
            send_to(ctx.sessions, ctx.senders, player.user_id, ServerPacket::PathfindingFailed);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_perform_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    combat_snapshot: &HashMap<u32, (u8, bool)>,
    npcs: &Query<(&NpcHandle, &NpcPos, &NpcStatus)>,
    ground_items: &Query<&GroundItemState>,
    world_entities: &Query<&WorldEntityState>,
    action: TargetAction,
    entity_kind: EntityKind,
    entity_id: u32,
    stun_pickup_only: bool,
) -> Option<u32> {
    match (entity_kind, action) {
        (EntityKind::GroundItem, TargetAction::Grab) => {
            let item = ctx
                .registry
                .ground_items
                .get(&entity_id)
                .and_then(|e| ground_items.get(*e).ok())
                .cloned();
            let Some(item_state) = item else {
                return None;
            };
            if !item_state.visible_to_user(player.user_id) {
                return None;
            }
            if interactions::in_pickup_range(ctx, player.pos.0, item_state.pos) {
                interactions::grab_ground_item(ctx, player, &item_state);
                return None;
            }
            // Stunned players may only do the in-range pickup.
            if stun_pickup_only {
                return None;
            }
            let Some(grid) = ctx.grids.get(player.pos.0.level) else {
                return None;
            };
            player.pending.0 = Some(PendingAction::Grab { ground_item_id: entity_id });
            match ctx.pathfinder.path_adjacent(
                grid,
                player.pos.0.xy(),
                item_state.pos.xy(),
                Some(INTERACTION_PATH_RADIUS),
            ) {
                Some(path) => {
                    let mut plan = MovementPlan::new(player.pos.0.level, path);
                    plan.notify_arrival = true;
                    schedule_player_plan(player.plan, player.status, plan);
                }
                None => {
                    player.pending.0 = None;
                    interactions::message(ctx, player.user_id, "Can't reach that.");
                }
            }
            None
        }
        (EntityKind::Npc, TargetAction::Attack | TargetAction::TalkTo | TargetAction::Shop | TargetAction::Pickpocket) => {
            handle_npc_action(ctx, player, npcs, action, entity_id);
            None
        }
        (EntityKind::Player, TargetAction::Attack | TargetAction::Follow | TargetAction::TradeWith | TargetAction::Moderate) => {
            handle_player_target_action(ctx, player, combat_snapshot, action, entity_id)
        }
        (EntityKind::WorldEntity, TargetAction::Environment(verb)) => {
            handle_environment_setup(ctx, player, world_entities, verb, entity_id);
            None
        }
        _ => None,
    }
}

fn handle_npc_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    npcs: &Query<(&NpcHandle, &NpcPos, &NpcStatus)>,
    action: TargetAction,
    npc_id: u32,
) {
    let npc = ctx.registry.npcs.get(&npc_id).and_then(|e| npcs.get(*e).ok());
    let Some((npc_handle, npc_pos, npc_status)) = npc else {
        return;
    };
    if npc_pos.0.level != player.pos.0.level {
        return;
    }
    targeting::set_player_target(ctx.targets, ctx.events, player.user_id, EntityRef::npc(npc_id));
    player.pending.0 = Some(PendingAction::Npc {
        action,
        npc_id,
        retry_count: 0,
        last_known: npc_pos.0.xy(),
    });

    let grid = ctx.grids.get(player.pos.0.level);
    let ranged_attack = action == TargetAction::Attack
        && crate::combat::combat_state_for(player.belongings, player.status, ctx.catalogs)
            != PlayerStateKind::MeleeCombat;
    let in_range = if ranged_attack {
        crate::combat::in_attack_range(grid, PlayerStateKind::RangeCombat, player.pos.0, npc_pos.0)
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

    let Some(grid) = grid else {
        interactions::message(ctx, player.user_id, "Can't reach them.");
        player.pending.0 = None;
        targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
        return;
    };
    let path = if ranged_attack {
        ctx.pathfinder.path_within_range(
            grid,
            player.pos.0.xy(),
            npc_pos.0.xy(),
            RANGED_ATTACK_RANGE,
            true,
            Some(INTERACTION_PATH_RADIUS),
        )
    } else {
        ctx.pathfinder.path_adjacent_with_los_preference(
            grid,
            player.pos.0.xy(),
            npc_pos.0.xy(),
            false,
            Some(INTERACTION_PATH_RADIUS),
        )
    };
    match path {
        Some(path) => {
            let mut plan = MovementPlan::new(player.pos.0.level, path);
            plan.notify_arrival = true;
            schedule_player_plan(player.plan, player.status, plan);
        }
        None => {
            player.pending.0 = None;
            targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
            interactions::message(ctx, player.user_id, "Can't reach them.");
        }
    }
}

fn handle_player_target_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    combat_snapshot: &HashMap<u32, (u8, bool)>,
    action: TargetAction,
    target_user_id: u32,
) -> Option<u32> {
    if target_user_id == player.user_id {
        return None;
    }
    if action == TargetAction::Moderate
        && player.player_type == shared::components::PlayerType::Normal
    {
        interactions::message(ctx, player.user_id, "You can't do that.");
        return None;
    }
    let Some(target_pos) = ctx.index.player_pos(target_user_id) else {
        return None;
    };
    let Some((target_combat, dead)) = combat_snapshot.get(&target_user_id).copied() else {
        return None;
    };
    if dead || target_pos.level != player.pos.0.level {
        return None;
    }
    // Attack gating runs at schedule time and again at arrival.
    if action == TargetAction::Attack
        && !ctx.wilderness.can_attack(
            player.pos.0,
            player.progress.combat_level,
            target_pos,
            target_combat,
        )
    {
        interactions::message(ctx, player.user_id, "You can't attack them here.");
        return None;
    }

    targeting::set_player_target(
        ctx.targets,
        ctx.events,
        player.user_id,
        EntityRef::player(target_user_id),
    );
    player.pending.0 = Some(PendingAction::Player {
        action,
        target_user_id,
        retry_count: 0,
        last_known: target_pos.xy(),
    });

    let adjacent = cardinally_adjacent(player.pos.0.xy(), target_pos.xy())
        && ctx
            .grids
            .get(player.pos.0.level)
            .map(|g| g.has_line_of_sight(player.pos.0.xy(), target_pos.xy()))
            .unwrap_or(false);
    if adjacent {
        return match interactions::execute_player_action(
            ctx,
            player,
            target_user_id,
            target_pos,
            target_combat,
            action,
        ) {
            Some(TradeRequestOutcome::Started { other_user_id }) => Some(other_user_id),
            _ => None,
        };
    }

    // Follow is pure greedy; the others walk their initial A* plan first.
    if action != TargetAction::Follow {
        if let Some(grid) = ctx.grids.get(player.pos.0.level) {
            if let Some(path) = ctx.pathfinder.path_adjacent_with_los_preference(
                grid,
                player.pos.0.xy(),
                target_pos.xy(),
                false,
                Some(INTERACTION_PATH_RADIUS),
            ) {
                let mut plan = MovementPlan::new(player.pos.0.level, path);
                plan.notify_arrival = true;
                schedule_player_plan(player.plan, player.status, plan);
                return None;
            }
        }
        interactions::message(ctx, player.user_id, "Can't reach them.");
    } else {
        player.plan.0 = None;
        player.status.state = PlayerStateKind::Moving;
    }
    None
}

/// Environment verbs are setup-only: validate, set the pending action, and
/// either arm the wait counter or start walking. Completion belongs to the
/// pending processor; there is no callback.
fn handle_environment_setup(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    world_entities: &Query<&WorldEntityState>,
    verb: EntityVerb,
    world_entity_id: u32,
) {
    let state = ctx
        .registry
        .world_entities
        .get(&world_entity_id)
        .and_then(|e| world_entities.get(*e).ok());
    let Some(entity_state) = state else {
        return;
    };
    if entity_state.pos.level != player.pos.0.level {
        return;
    }
    let Some(def) = ctx.catalogs.world_entities.get(entity_state.definition) else {
        return;
    };
    let ov = ctx.catalogs.overrides.get(entity_state.definition, verb);
    if !def.supported_actions.contains(&verb) && ov.is_none() {
        return;
    }

    if environment::is_positioned(player.pos.0, entity_state, def) {
        let wait = environment::required_wait(def, verb, ov);
        player.pending.0 = Some(PendingAction::Environment {
            action: verb,
            world_entity_id,
            wait_ticks: Some(wait),
        });
        return;
    }

    let Some(grid) = ctx.grids.get(player.pos.0.level) else {
        interactions::message(ctx, player.user_id, "Can't reach that.");
        return;
    };
    let goals = environment::approach_goals(grid, entity_state, def);
    match ctx.pathfinder.astar(grid, player.pos.0.xy(), &goals, Some(INTERACTION_PATH_RADIUS)) {
        Some(path) => {
            player.pending.0 = Some(PendingAction::Environment {
                action: verb,
                world_entity_id,
                wait_ticks: None,
            });
            let plan = MovementPlan::new(player.pos.0.level, path);
            schedule_player_plan(player.plan, player.status, plan);
        }
        None => {
            interactions::message(ctx, player.user_id, "Can't reach that.");
        }
    }
}

// =============================================================================
// INVENTORY & SPELLS
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn handle_invoke_item(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    action: InventoryItemAction,
    menu: MenuKind,
    slot: usize,
    item_id: shared::items::ItemId,
    amount: u32,
    is_iou: bool,
) {
    let result: Result<(), String> = match menu {
        MenuKind::Inventory => match action {
            InventoryItemAction::Eat => {
                // A short cadence between bites.
                if ctx.clock.tick < player.status.last_edible_action_tick + 3 {
                    Err(String::new())
                } else {
                    player.status.last_edible_action_tick = ctx.clock.tick;
                    inventory::eat_from_slot(
                        player.belongings,
                        player.progress,
                        ctx.catalogs,
                        ctx.sessions,
                        ctx.senders,
                        player.user_id,
                        slot,
                    )
                }
            }
            InventoryItemAction::Drink => {
                if ctx.clock.tick < player.status.last_edible_action_tick + 3 {
                    Err(String::new())
                } else {
                    player.status.last_edible_action_tick = ctx.clock.tick;
                    inventory::drink_from_slot(
                        player.belongings,
                        player.progress,
                        ctx.catalogs,
                        ctx.sessions,
                        ctx.senders,
                        player.user_id,
                        slot,
                    )
                }
            }
            InventoryItemAction::Equip => inventory::equip_from_slot(
                player.belongings,
                player.progress,
                ctx.catalogs,
                ctx.sessions,
                ctx.senders,
                ctx.events,
                player.user_id,
                slot,
            ),
            InventoryItemAction::Unequip => {
                let equip_slot = EquipmentSlot::ALL.get(slot).copied();
                match equip_slot {
                    Some(equip_slot) => inventory::unequip_slot(
                        player.belongings,
                        player.progress,
                        ctx.catalogs,
                        ctx.sessions,
                        ctx.senders,
                        ctx.events,
                        player.user_id,
                        equip_slot,
                    ),
                    None => Err("Nothing to remove.".to_string()),
                }
            }
            InventoryItemAction::Drop => {
                match inventory::take_slot(
                    player.belongings,
                    player.progress,
                    ctx.catalogs,
                    ctx.sessions,
                    ctx.senders,
                    player.user_id,
                    slot,
                ) {
                    Some(stack) => {
                        crate::ground_items::spawn_ground_item(
                            ctx.commands,
                            ctx.registry,
                            ctx.index,
                            ctx.events,
                            ctx.clock,
                            stack,
                            player.pos.0,
                            Some(player.user_id),
                            shared::components::GroundItemSource::Drop,
                        );
                        Ok(())
                    }
                    None => Err(String::new()),
                }
            }
            InventoryItemAction::Examine => {
                let text = ctx
                    .catalogs
                    .items
                    .get(item_id)
                    .map(|d| {
                        if d.examine.is_empty() {
                            format!("It's a {}.", d.name)
                        } else {
                            d.examine.clone()
                        }
                    })
                    .unwrap_or_else(|| "Nothing interesting happens.".to_string());
                interactions::message(ctx, player.user_id, &text);
                Ok(())
            }
            InventoryItemAction::Deposit | InventoryItemAction::Withdraw => {
                Err(String::new())
            }
        },
        MenuKind::Bank => handle_bank_action(ctx, player, action, slot, item_id, amount, is_iou),
        MenuKind::Trade => handle_trade_offer_action(ctx, player, action, item_id, amount, is_iou),
        MenuKind::Shop => Err("The shop isn't interested.".to_string()),
    };

    let success = result.is_ok();
    if let Err(text) = result {
        if !text.is_empty() {
            interactions::message(ctx, player.user_id, &text);
        }
    }
    send_to(
        ctx.sessions,
        ctx.senders,
        player.user_id,
        ServerPacket::InvokedInventoryItemAction { action, success },
    );
}

fn handle_bank_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    action: InventoryItemAction,
    slot: usize,
    item_id: shared::items::ItemId,
    amount: u32,
    is_iou: bool,
) -> Result<(), String> {
    if player.status.state != PlayerStateKind::Banking {
        return Err(String::new());
    }
    match action {
        InventoryItemAction::Deposit => {
            let removed = player.belongings.inventory.remove_at(slot, amount);
            if removed == 0 {
                return Err(String::new());
            }
            send_to(
                ctx.sessions,
                ctx.senders,
                player.user_id,
                ServerPacket::RemovedItemFromInventoryAtSlot { slot: slot as u8 },
            );
            if !player.belongings.bank.deposit(ItemStack { item_id, amount: removed, is_iou }) {
                // Bank full: the stack goes straight back.
                let def = ctx.catalogs.items.get(item_id).cloned();
                if let Some(def) = def {
                    player
                        .belongings
                        .inventory
                        .add_stack(ItemStack { item_id, amount: removed, is_iou }, &def);
                }
                return Err("Your bank is full.".to_string());
            }
            player.belongings.dirty = true;
            Ok(())
        }
        InventoryItemAction::Withdraw => {
            let banked = player.belongings.bank.count(item_id).min(amount as u64) as u32;
            if banked == 0 {
                return Err(String::new());
            }
            let stack = ItemStack { item_id, amount: banked, is_iou };
            if !player.belongings.inventory.can_accept(&[stack], &ctx.catalogs.items) {
                return Err("You don't have enough inventory space.".to_string());
            }
            player.belongings.bank.withdraw(item_id, banked);
            let leftover = inventory::give_stack(
                player.belongings,
                player.progress,
                ctx.catalogs,
                ctx.sessions,
                ctx.senders,
                player.user_id,
                stack,
            );
            debug_assert!(leftover.is_none());
            player.belongings.dirty = true;
            Ok(())
        }
        _ => Err(String::new()),
    }
}

fn handle_trade_offer_action(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    action: InventoryItemAction,
    item_id: shared::items::ItemId,
    amount: u32,
    is_iou: bool,
) -> Result<(), String> {
    if player.status.state != PlayerStateKind::Trading {
        return Err(String::new());
    }
    let Some(session_idx) = ctx.trades.session_of(player.user_id) else {
        return Err(String::new());
    };
    let stack = ItemStack { item_id, amount, is_iou };
    let session = &mut ctx.trades.sessions[session_idx];
    let result = match action {
        InventoryItemAction::Drop => {
            trade::add_to_offer(session, player.user_id, &player.belongings.inventory, stack)
        }
        InventoryItemAction::Withdraw => trade::remove_from_offer(session, player.user_id, stack),
        _ => return Err(String::new()),
    };
    if result.is_ok() {
        let users = session.users;
        for user in users {
            send_to(
                ctx.sessions,
                ctx.senders,
                user,
                ServerPacket::TradeOfferChanged {
                    user_id: player.user_id,
                    slot: 0,
                    item_id,
                    amount,
                    is_iou,
                },
            );
            send_to(ctx.sessions, ctx.senders, user, ServerPacket::TradeStatusReset);
        }
    }
    result
}

fn handle_switch_to_idle(ctx: &mut InteractCtx, player: &mut ActingPlayer) {
    player.pending.0 = None;
    player.plan.0 = None;
    delay::interrupt_delay(player.delay);
    targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);
    if player.status.state == PlayerStateKind::Trading {
        trade::cancel_trades_for(
            ctx.trades,
            player.user_id,
            ctx.sessions,
            ctx.senders,
            shared::protocol::TRADE_CANCEL_OTHER_CANCELLED,
        );
    }
    if !matches!(player.status.state, PlayerStateKind::Dead | PlayerStateKind::Stunned) {
        player.status.state = PlayerStateKind::Idle;
        player.status.current_shop = None;
        player.status.dialogue_npc = None;
        ctx.events.write(GameEvent::PlayerStateChanged {
            user_id: player.user_id,
            state: PlayerStateKind::Idle,
        });
    }
}

fn handle_cast_combat_spell(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    combat_snapshot: &HashMap<u32, (u8, bool)>,
    spell_id: SpellId,
    target_kind: EntityKind,
    target_id: u32,
) {
    let Some(spell) = ctx.catalogs.spells.get(spell_id) else {
        return;
    };
    if !matches!(spell.effect, SpellEffect::Combat { .. } | SpellEffect::Status { .. }) {
        return;
    }
    if player.progress.skills.base(SkillKind::Magic) < spell.required_magic {
        interactions::message(ctx, player.user_id, "Your magic level is too low for that.");
        return;
    }
    if !spell.runes.iter().all(|r| player.belongings.inventory.has(r.item_id, r.amount)) {
        interactions::message(ctx, player.user_id, "You do not have enough runes to cast that.");
        return;
    }
    player.status.single_cast_spell = Some(spell_id);
    match target_kind {
        EntityKind::Npc => {
            let Some(npc_pos) = ctx.index.npc_pos(target_id) else {
                return;
            };
            player.status.state = PlayerStateKind::MagicCombat;
            targeting::set_player_target(
                ctx.targets,
                ctx.events,
                player.user_id,
                EntityRef::npc(target_id),
            );
            player.pending.0 = Some(PendingAction::Npc {
                action: TargetAction::Attack,
                npc_id: target_id,
                retry_count: 0,
                last_known: npc_pos.xy(),
            });
            schedule_spell_approach(ctx, player, npc_pos);
        }
        EntityKind::Player => {
            let Some(target_pos) = ctx.index.player_pos(target_id) else {
                return;
            };
            let Some((target_combat, dead)) = combat_snapshot.get(&target_id).copied() else {
                return;
            };
            if dead {
                return;
            }
            if !ctx.wilderness.can_attack(
                player.pos.0,
                player.progress.combat_level,
                target_pos,
                target_combat,
            ) {
                interactions::message(ctx, player.user_id, "You can't attack them here.");
                player.status.single_cast_spell = None;
                return;
            }
            player.status.state = PlayerStateKind::MagicCombat;
            targeting::set_player_target(
                ctx.targets,
                ctx.events,
                player.user_id,
                EntityRef::player(target_id),
            );
            player.pending.0 = Some(PendingAction::Player {
                action: TargetAction::Attack,
                target_user_id: target_id,
                retry_count: 0,
                last_known: target_pos.xy(),
            });
            schedule_spell_approach(ctx, player, target_pos);
        }
        _ => {}
    }
}

fn schedule_spell_approach(ctx: &mut InteractCtx, player: &mut ActingPlayer, target_pos: TilePos) {
    let Some(grid) = ctx.grids.get(player.pos.0.level) else {
        return;
    };
    if crate::combat::in_attack_range(Some(grid), PlayerStateKind::MagicCombat, player.pos.0, target_pos)
    {
        return;
    }
    if let Some(path) = ctx.pathfinder.path_within_range(
        grid,
        player.pos.0.xy(),
        target_pos.xy(),
        RANGED_ATTACK_RANGE,
        true,
        Some(INTERACTION_PATH_RADIUS),
    ) {
        let mut plan = MovementPlan::new(player.pos.0.level, path);
        plan.preserve_state_on_start = true;
        plan.preserve_state_on_complete = true;
        player.plan.0 = Some(plan);
    }
}

fn handle_cast_inventory_spell(
    ctx: &mut InteractCtx,
    player: &mut ActingPlayer,
    spell_id: SpellId,
    slot: usize,
) {
    let Some(spell) = ctx.catalogs.spells.get(spell_id).cloned() else {
        return;
    };
    let SpellEffect::Inventory { from_item, to_item } = spell.effect else {
        return;
    };
    if player.progress.skills.base(SkillKind::Magic) < spell.required_magic {
        interactions::message(ctx, player.user_id, "Your magic level is too low for that.");
        return;
    }
    let Some(stack) = player.belongings.inventory.get(slot).copied() else {
        return;
    };
    if stack.item_id != from_item || stack.is_iou {
        interactions::message(ctx, player.user_id, "Nothing interesting happens.");
        return;
    }
    if !spell.runes.iter().all(|r| player.belongings.inventory.has(r.item_id, r.amount)) {
        interactions::message(ctx, player.user_id, "You do not have enough runes to cast that.");
        return;
    }
    for rune in &spell.runes {
        player.belongings.inventory.remove_items(rune.item_id, false, rune.amount);
    }
    player.belongings.inventory.remove_at(slot, 1);
    send_to(
        ctx.sessions,
        ctx.senders,
        player.user_id,
        ServerPacket::RemovedItemFromInventoryAtSlot { slot: slot as u8 },
    );
    let leftover = inventory::give_stack(
        player.belongings,
        player.progress,
        ctx.catalogs,
        ctx.sessions,
        ctx.senders,
        player.user_id,
        ItemStack::new(to_item, 1),
    );
    if leftover.is_some() {
        // No room for the product: the reagent is already gone, drop the
        // product at their feet instead.
        crate::ground_items::spawn_ground_item(
            ctx.commands,
            ctx.registry,
            ctx.index,
            ctx.events,
            ctx.clock,
            ItemStack::new(to_item, 1),
            player.pos.0,
            Some(player.user_id),
            shared::components::GroundItemSource::Drop,
        );
    }
    inventory::grant_xp(
        player.progress,
        ctx.sessions,
        ctx.senders,
        player.user_id,
        SkillKind::Magic,
        spell.xp,
    );
    send_to(
        ctx.sessions,
        ctx.senders,
        player.user_id,
        ServerPacket::CastedInventorySpell { spell_id, slot: slot as u8 },
    );
    player.belongings.dirty = true;
}

fn handle_cast_teleport_spell(ctx: &mut InteractCtx, player: &mut ActingPlayer, spell_id: SpellId) {
    let Some(spell) = ctx.catalogs.spells.get(spell_id).cloned() else {
        return;
    };
    let SpellEffect::Teleport { destination } = spell.effect else {
        return;
    };
    if player.progress.skills.base(SkillKind::Magic) < spell.required_magic {
        interactions::message(ctx, player.user_id, "Your magic level is too low for that.");
        return;
    }
    if !spell.runes.iter().all(|r| player.belongings.inventory.has(r.item_id, r.amount)) {
        interactions::message(ctx, player.user_id, "You do not have enough runes to cast that.");
        return;
    }
    for rune in &spell.runes {
        player.belongings.inventory.remove_items(rune.item_id, false, rune.amount);
    }
    player.belongings.dirty = true;
    player.pending.0 = None;
    targeting::clear_player_target(ctx.targets, ctx.events, player.user_id);

    let from = player.pos.0;
    player.pos.0 = destination;
    ctx.index.relocate_player(player.user_id, destination);
    // A map-level change makes any plan stale; drop it now.
    player.plan.0 = None;
    player.status.state = PlayerStateKind::Idle;
    ctx.events.write(GameEvent::PlayerTeleported {
        user_id: player.user_id,
        from,
        to: destination,
    });
    inventory::grant_xp(
        player.progress,
        ctx.sessions,
        ctx.senders,
        player.user_id,
        SkillKind::Magic,
        spell.xp,
    );
}

fn handle_toggle_autocast(ctx: &mut InteractCtx, player: &mut ActingPlayer, spell_id: Option<SpellId>) {
    match spell_id {
        None => player.status.auto_cast_spell = None,
        Some(spell_id) => {
            let Some(spell) = ctx.catalogs.spells.get(spell_id) else {
                return;
            };
            if !spell.auto_castable {
                return;
            }
            if player.progress.skills.base(SkillKind::Magic) < spell.required_magic {
                interactions::message(ctx, player.user_id, "Your magic level is too low for that.");
                return;
            }
            player.status.auto_cast_spell = Some(spell_id);
        }
    }
}

// =============================================================================
// TRADE STATUS & LOGOUT
// =============================================================================

fn handle_trade_status(
    core: &mut CoreRes,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    players: &mut ActionPlayerQuery,
    user_id: u32,
    status_code: u8,
) {
    core.trades.gc_expired(core.clock.now_ms());
    let Some(session_idx) = core.trades.session_of(user_id) else {
        return;
    };

    if status_code == 0 {
        // Decline: both sides reset to idle with the right reason codes.
        let session = core.trades.sessions.remove(session_idx);
        let decliner_side = session.users.iter().position(|u| *u == user_id).unwrap_or(0);
        for (side, user) in session.users.iter().enumerate() {
            send_to(
                &core.sessions,
                senders,
                *user,
                ServerPacket::TradeCancelled {
                    reason: trade::decline_reasons(decliner_side, side),
                },
            );
            if let Some(entity) = core.registry.players.get(user) {
                if let Ok((_, _, _, mut status, _, _, _, _, _, _)) = players.get_mut(*entity) {
                    if status.state == PlayerStateKind::Trading {
                        status.state = PlayerStateKind::Idle;
                    }
                }
            }
        }
        return;
    }
    if status_code != 1 {
        return;
    }

    // Accept.
    let (both_accepted, stage, users) = {
        let session = &mut core.trades.sessions[session_idx];
        let Some(side) = session.users.iter().position(|u| *u == user_id) else {
            return;
        };
        session.accepted[side] = true;
        for user in session.users {
            send_to(
                &core.sessions,
                senders,
                user,
                ServerPacket::TradePlayerAccepted { user_id },
            );
        }
        (session.accepted == [true, true], session.stage, session.users)
    };
    if !both_accepted {
        return;
    }

    match stage {
        TradeStage::Offer => {
            let session = &mut core.trades.sessions[session_idx];
            session.stage = TradeStage::FinalStep;
            session.accepted = [false, false];
            for user in users {
                send_to(&core.sessions, senders, user, ServerPacket::TradeGoToFinalStep);
            }
        }
        TradeStage::FinalStep => {
            settle_trade(core, senders, players, session_idx);
        }
    }
}

fn settle_trade(
    core: &mut CoreRes,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    players: &mut ActionPlayerQuery,
    session_idx: usize,
) {
    let session = core.trades.sessions.remove(session_idx);
    let [user_a, user_b] = session.users;
    let (Some(entity_a), Some(entity_b)) = (
        core.registry.players.get(&user_a).copied(),
        core.registry.players.get(&user_b).copied(),
    ) else {
        return;
    };
    let Ok([mut a, mut b]) = players.get_many_mut([entity_a, entity_b]) else {
        return;
    };

    let outcome = trade::settle(
        &mut a.7.inventory,
        &mut b.7.inventory,
        &session.offers,
        &core.catalogs.items,
    );
    match outcome {
        trade::SettleOutcome::Completed => {
            for user in session.users {
                send_to(&core.sessions, senders, user, ServerPacket::TradeCompleted);
            }
            a.7.dirty = true;
            b.7.dirty = true;
            a.3.state = PlayerStateKind::Idle;
            b.3.state = PlayerStateKind::Idle;
        }
        trade::SettleOutcome::NoSpace { full_side } => {
            for (side, user) in session.users.iter().enumerate() {
                send_to(
                    &core.sessions,
                    senders,
                    *user,
                    ServerPacket::TradeCancelled {
                        reason: trade::no_space_reasons(full_side, side),
                    },
                );
            }
            a.3.state = PlayerStateKind::Idle;
            b.3.state = PlayerStateKind::Idle;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_logout(
    commands: &mut Commands,
    core: &mut CoreRes,
    profiles: &mut PlayerProfiles,
    events: &mut MessageWriter<GameEvent>,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    players: &mut ActionPlayerQuery,
    npc_aggro: &mut Query<(&NpcHandle, &mut NpcAggro)>,
    user_id: u32,
    entity: Entity,
) {
    {
        let Ok((_, handle, pos, status, _, _, _, belongings, progress, settings)) =
            players.get(entity)
        else {
            return;
        };
        let profile = build_profile(handle, pos, status, belongings, progress, settings);
        if let Err(e) = profiles.save_profile(&profile) {
            error!("Failed to save profile on logout: {}", e);
        }
        core.sessions.names_online.remove(&handle.username);
        profiles.unbind_online(&handle.username);
        core.sessions.user_by_peer.remove(&handle.peer);
        events.write(GameEvent::PlayerLeft { user_id, at: pos.0 });
    }

    trade::cancel_trades_for(
        &mut core.trades,
        user_id,
        &core.sessions,
        senders,
        shared::protocol::TRADE_CANCEL_OTHER_CANCELLED,
    );
    targeting::clear_player_target_on_disconnect(&mut core.targets, user_id);
    targeting::clear_targets_on_entity(
        &mut core.targets,
        npc_aggro,
        events,
        EntityRef::player(user_id),
    );
    send_to(&core.sessions, senders, user_id, ServerPacket::LoggedOut);

    core.registry.players.remove(&user_id);
    core.sessions.link_by_user.remove(&user_id);
    core.index.remove_player(user_id);
    commands.entity(entity).despawn();
    info!("Player {} logged out", user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::items::ItemId;

    fn eat_intent() -> ClientIntent {
        ClientIntent::InvokeInventoryItemAction {
            action: InventoryItemAction::Eat,
            menu: MenuKind::Inventory,
            slot: 0,
            item_id: ItemId(7),
            amount: 1,
            is_iou: false,
        }
    }

    fn attack_npc_intent() -> ClientIntent {
        ClientIntent::PerformActionOnEntity {
            action: TargetAction::Attack,
            entity_kind: EntityKind::Npc,
            entity_id: 7,
        }
    }

    #[test]
    fn dead_players_may_only_chat_and_log_out() {
        let dead = PlayerStateKind::Dead;
        assert!(matches!(gate_intent(&ClientIntent::Logout, dead, false), Gate::Pass));
        assert!(matches!(
            gate_intent(
                &ClientIntent::PublicMessage { message: "gf".into(), style: 0 },
                dead,
                false
            ),
            Gate::Pass
        ));
        assert!(matches!(gate_intent(&attack_npc_intent(), dead, false), Gate::Drop));
        assert!(matches!(gate_intent(&eat_intent(), dead, false), Gate::Drop));
    }

    #[test]
    fn stun_lock_whitelists_eat_and_drops_attacks() {
        let idle = PlayerStateKind::Idle;
        // Eating passes the stun gate; attacking is dropped without a
        // packet; any other inventory invoke fails loudly.
        assert!(matches!(gate_intent(&eat_intent(), idle, true), Gate::Pass));
        assert!(matches!(gate_intent(&attack_npc_intent(), idle, true), Gate::Drop));
        let equip = ClientIntent::InvokeInventoryItemAction {
            action: InventoryItemAction::Equip,
            menu: MenuKind::Inventory,
            slot: 0,
            item_id: ItemId(2),
            amount: 1,
            is_iou: false,
        };
        assert!(matches!(
            gate_intent(&equip, idle, true),
            Gate::DropWithInvokeFailure(InventoryItemAction::Equip)
        ));
    }

    #[test]
    fn stun_lock_permits_only_in_range_pickup() {
        let grab = ClientIntent::PerformActionOnEntity {
            action: TargetAction::Grab,
            entity_kind: EntityKind::GroundItem,
            entity_id: 3,
        };
        assert!(matches!(
            gate_intent(&grab, PlayerStateKind::Idle, true),
            Gate::PassStunPickupOnly
        ));
        let walk = ClientIntent::SendMovementPath { x: 1, y: 1 };
        assert!(matches!(gate_intent(&walk, PlayerStateKind::Idle, true), Gate::Drop));
    }

    #[test]
    fn unstunned_intents_pass() {
        assert!(matches!(
            gate_intent(&attack_npc_intent(), PlayerStateKind::Idle, false),
            Gate::Pass
        ));
    }
}
