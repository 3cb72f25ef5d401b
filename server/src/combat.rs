//! Combat: pursuit paths for players in combat states, per-tick attack
//! resolution for players and NPCs, deaths, loot drops and respawns.
//!
//! Attack resolution runs in three phases per strike (attacker mutation,
//! defender mutation, attacker follow-up) so the player query is only ever
//! borrowed for one side at a time.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use rand::Rng;

use shared::components::{EntityKind, EntityRef, NpcStateKind, PlayerSetting, PlayerStateKind};
use shared::items::WeaponClass;
use shared::protocol::ServerPacket;
use shared::skills::SkillKind;
use shared::spells::SpellEffect;
use shared::tile::{cardinally_adjacent, chebyshev, TilePos};

use crate::components::{
    Belongings, Delay, MovementPlan, NpcHandle, NpcMotion, NpcPos, NpcStatus, Pending, Plan,
    PlayerHandle, PlayerPos, PlayerStatus, Progress, Settings,
};
use crate::config::{ServerConfig, WorldClock, PLAYER_RESPAWN_TICKS, RANGED_ATTACK_RANGE};
use crate::events::GameEvent;
use crate::inventory::grant_xp;
use crate::pathfinding::Pathfinder;
use crate::sessions::{send_to, Sessions};
use crate::spatial::SpatialIndex;
use crate::targeting::{self, NpcAggro, PlayerTargets};
use crate::world::{Catalogs, PathingGrids, Registry, WorldRng};

pub type CombatPlayerQuery<'w, 's> = Query<
    'w,
    's,
    (
        Entity,
        &'static PlayerHandle,
        &'static mut PlayerPos,
        &'static mut PlayerStatus,
        &'static mut Pending,
        &'static mut Plan,
        &'static mut Delay,
        &'static mut Belongings,
        &'static mut Progress,
        &'static mut Settings,
    ),
    (With<PlayerHandle>, Without<NpcHandle>),
>;

/// Which combat state an attack request puts the attacker into.
pub fn combat_state_for(belongings: &Belongings, status: &PlayerStatus, catalogs: &Catalogs) -> PlayerStateKind {
    if status.single_cast_spell.is_some() || status.auto_cast_spell.is_some() {
        return PlayerStateKind::MagicCombat;
    }
    let class = belongings
        .equipment
        .get(shared::items::EquipmentSlot::Weapon)
        .and_then(|stack| catalogs.items.get(stack.item_id))
        .map(|def| def.weapon_class)
        .unwrap_or(WeaponClass::Melee);
    match class {
        WeaponClass::Melee => PlayerStateKind::MeleeCombat,
        WeaponClass::Ranged => PlayerStateKind::RangeCombat,
        WeaponClass::Magic => PlayerStateKind::MagicCombat,
    }
}

/// Whether `from` can strike `to` in the given combat state.
pub fn in_attack_range(
    grid: Option<&shared::pathing::PathingGrid>,
    state: PlayerStateKind,
    from: TilePos,
    to: TilePos,
) -> bool {
    if from.level != to.level {
        return false;
    }
    match state {
        PlayerStateKind::MeleeCombat => cardinally_adjacent(from.xy(), to.xy()),
        PlayerStateKind::RangeCombat | PlayerStateKind::MagicCombat => {
            chebyshev(from.xy(), to.xy()) <= RANGED_ATTACK_RANGE
                && grid.map(|g| g.has_line_of_sight(from.xy(), to.xy())).unwrap_or(false)
        }
        _ => false,
    }
}

fn attack_speed_ticks(belongings: &Belongings, catalogs: &Catalogs) -> u64 {
    belongings
        .equipment
        .get(shared::items::EquipmentSlot::Weapon)
        .and_then(|stack| catalogs.items.get(stack.item_id))
        .map(|def| def.attack_speed_ticks as u64)
        .unwrap_or(4)
}

fn melee_max_hit(strength: u8, strength_bonus: i16) -> u32 {
    1 + (strength as i32 + strength_bonus as i32 / 4).max(0) as u32 / 8
}

fn ranged_max_hit(ranged: u8, ranged_bonus: i16) -> u32 {
    1 + (ranged as i32 + ranged_bonus as i32 / 4).max(0) as u32 / 8
}

/// Accuracy roll: attack-style level + bonus against the defender's
/// defence. Returns true on a hit.
fn accuracy_roll(rng: &mut WorldRng, attack: i32, defence: i32) -> bool {
    let attack_roll = (attack.max(1) * 2 + 8) as u32;
    let defence_roll = (defence.max(1) + 8) as u32;
    rng.0.gen_range(0..attack_roll + defence_roll) < attack_roll
}

// =============================================================================
// PURSUIT PATHS (P4)
// =============================================================================

/// P4 first half: players in combat states pursuing NPC targets re-path
/// with A* when the target has drifted. PvP pursuit is the follow system's
/// job.
pub fn update_player_combat_paths(
    grids: Res<PathingGrids>,
    mut pathfinder: ResMut<Pathfinder>,
    index: Res<SpatialIndex>,
    targets: Res<PlayerTargets>,
    mut players: Query<
        (&PlayerHandle, &PlayerPos, &PlayerStatus, &mut Plan),
        (With<PlayerHandle>, Without<NpcHandle>),
    >,
) {
    for (handle, pos, status, mut plan) in players.iter_mut() {
        if !status.state.is_combat() {
            continue;
        }
        let Some(target) = targets.get(handle.user_id) else {
            continue;
        };
        if target.kind != EntityKind::Npc {
            continue;
        }
        let Some(target_pos) = index.npc_pos(target.id) else {
            continue;
        };
        if target_pos.level != pos.0.level {
            continue;
        }
        let Some(grid) = grids.get(pos.0.level) else {
            continue;
        };
        if in_attack_range(Some(grid), status.state, pos.0, target_pos) {
            plan.0 = None;
            continue;
        }
        // Keep an existing plan that still ends in range.
        if let Some(existing) = plan.0.as_ref() {
            if let Some(dest) = existing.destination() {
                let dest_pos = TilePos::new(pos.0.level, dest.0, dest.1);
                if in_attack_range(Some(grid), status.state, dest_pos, target_pos) {
                    continue;
                }
            }
        }
        let path = match status.state {
            PlayerStateKind::MeleeCombat => pathfinder.path_adjacent_with_los_preference(
                grid,
                pos.0.xy(),
                target_pos.xy(),
                false,
                Some(crate::config::INTERACTION_PATH_RADIUS),
            ),
            _ => pathfinder.path_within_range(
                grid,
                pos.0.xy(),
                target_pos.xy(),
                RANGED_ATTACK_RANGE,
                true,
                Some(crate::config::INTERACTION_PATH_RADIUS),
            ),
        };
        if let Some(path) = path {
            let mut pursuit = MovementPlan::new(pos.0.level, path);
            pursuit.preserve_state_on_start = true;
            pursuit.preserve_state_on_complete = true;
            plan.0 = Some(pursuit);
        }
    }
}

// =============================================================================
// ATTACK RESOLUTION
// =============================================================================

struct Strike {
    attacker: Entity,
    target: EntityRef,
}

struct PreparedShot {
    user_id: u32,
    pos: TilePos,
    combat_level: u8,
    state: PlayerStateKind,
    max_hit: u32,
    attack_stat: i32,
    projectile: Option<u32>,
    /// Spell effect plus its cast xp, for magic strikes.
    spell: Option<(SpellEffect, u32)>,
}

/// Phase 1: mutate the attacker (cooldown, rune costs, single-cast
/// consumption) and extract everything the later phases need.
fn prepare_shot(
    clock: &WorldClock,
    catalogs: &Catalogs,
    targets: &mut PlayerTargets,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    events: &mut MessageWriter<GameEvent>,
    players: &mut CombatPlayerQuery,
    attacker: Entity,
) -> Option<PreparedShot> {
    let Ok((_, handle, pos, mut status, _, _, _, mut belongings, progress, _)) =
        players.get_mut(attacker)
    else {
        return None;
    };
    let user_id = handle.user_id;
    let bonuses = belongings.equipment.total_bonuses(&catalogs.items);
    let state = status.state;

    let mut projectile = None;
    let mut spell = None;
    let (max_hit, attack_stat) = match state {
        PlayerStateKind::MeleeCombat => (
            melee_max_hit(progress.skills.boosted(SkillKind::Strength), bonuses.strength),
            progress.skills.boosted(SkillKind::Attack) as i32 + bonuses.attack as i32,
        ),
        PlayerStateKind::RangeCombat => {
            projectile = Some(10);
            (
                ranged_max_hit(progress.skills.boosted(SkillKind::Ranged), bonuses.ranged),
                progress.skills.boosted(SkillKind::Ranged) as i32 + bonuses.ranged as i32,
            )
        }
        PlayerStateKind::MagicCombat => {
            let Some(spell_id) = status.single_cast_spell.or(status.auto_cast_spell) else {
                status.state = PlayerStateKind::Idle;
                targeting::clear_player_target(targets, events, user_id);
                return None;
            };
            let Some(def) = catalogs.spells.get(spell_id) else {
                status.single_cast_spell = None;
                return None;
            };
            let affordable = def.runes.iter().all(|r| belongings.inventory.has(r.item_id, r.amount));
            if !affordable {
                send_to(
                    sessions,
                    senders,
                    user_id,
                    ServerPacket::GameMessage {
                        message: "You do not have enough runes to cast that.".to_string(),
                    },
                );
                status.state = PlayerStateKind::Idle;
                status.single_cast_spell = None;
                targeting::clear_player_target(targets, events, user_id);
                return None;
            }
            for rune in &def.runes {
                belongings.inventory.remove_items(rune.item_id, false, rune.amount);
            }
            belongings.dirty = true;
            let (hit, proj) = match def.effect {
                SpellEffect::Combat { max_hit, projectile_id } => (max_hit as u32, projectile_id),
                SpellEffect::Status { projectile_id, .. } => (0, projectile_id),
                _ => (0, 0),
            };
            projectile = Some(proj);
            spell = Some((def.effect.clone(), def.xp));
            (hit, progress.skills.boosted(SkillKind::Magic) as i32 + bonuses.magic as i32)
        }
        _ => return None,
    };

    status.next_attack_tick = clock.tick + attack_speed_ticks(&belongings, catalogs);
    // A single-cast spell fires once; the next strike falls back to the
    // weapon (or ends combat if the weapon isn't magic).
    if status.single_cast_spell.take().is_some() && status.auto_cast_spell.is_none() {
        let fallback = combat_state_for(&belongings, &status, catalogs);
        status.state = fallback;
    }

    Some(PreparedShot {
        user_id,
        pos: pos.0,
        combat_level: progress.combat_level,
        state,
        max_hit,
        attack_stat,
        projectile,
        spell,
    })
}

/// Resolve player attacks: range/LOS/cooldown gate, damage roll, spell
/// handling, retaliation, deaths.
#[allow(clippy::too_many_arguments)]
pub fn resolve_player_attacks(
    mut commands: Commands,
    clock: Res<WorldClock>,
    grids: Res<PathingGrids>,
    mut registry: ResMut<Registry>,
    mut index: ResMut<SpatialIndex>,
    catalogs: Res<Catalogs>,
    mut targets: ResMut<PlayerTargets>,
    wilderness: Res<crate::wilderness::WildernessMap>,
    sessions: Res<Sessions>,
    mut rng: ResMut<WorldRng>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<&mut MessageSender<ServerPacket>>,
    mut players: CombatPlayerQuery,
    mut npcs: Query<
        (&NpcHandle, &NpcPos, &mut NpcStatus, &mut NpcAggro),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
) {
    // Collect ready strikes first; resolution re-borrows per entity.
    let mut strikes: Vec<Strike> = Vec::new();
    for (entity, handle, pos, status, _, _, _, _, _, _) in players.iter() {
        if !status.state.is_combat() || clock.tick < status.next_attack_tick {
            continue;
        }
        let Some(target) = targets.get(handle.user_id) else {
            continue;
        };
        let target_pos = match target.kind {
            EntityKind::Npc => index.npc_pos(target.id),
            EntityKind::Player => index.player_pos(target.id),
            _ => None,
        };
        let Some(target_pos) = target_pos else {
            continue;
        };
        if !in_attack_range(grids.get(pos.0.level), status.state, pos.0, target_pos) {
            continue;
        }
        strikes.push(Strike { attacker: entity, target });
    }

    for strike in strikes {
        let Some(shot) = prepare_shot(
            &clock,
            &catalogs,
            &mut targets,
            &sessions,
            &mut senders,
            &mut events,
            &mut players,
            strike.attacker,
        ) else {
            continue;
        };

        if let Some(projectile_id) = shot.projectile {
            events.write(GameEvent::ProjectileFired {
                from: EntityRef::player(shot.user_id),
                target: strike.target,
                projectile_id,
            });
        }

        match strike.target.kind {
            EntityKind::Npc => {
                let target_died = strike_npc(
                    &mut commands,
                    &clock,
                    &catalogs,
                    &mut registry,
                    &mut index,
                    &mut rng,
                    &mut events,
                    &mut npcs,
                    &shot,
                    strike.target.id,
                );
                let Some(damage) = target_died.damage else {
                    continue;
                };
                // Attacker follow-up: xp, and cleanup when the target died.
                let Ok((_, _, _, mut status, _, mut plan, _, _, mut progress, _)) =
                    players.get_mut(strike.attacker)
                else {
                    continue;
                };
                grant_combat_xp(&mut progress, &sessions, &mut senders, shot.user_id, shot.state, damage);
                if let Some((_, xp)) = &shot.spell {
                    grant_xp(&mut progress, &sessions, &mut senders, shot.user_id, SkillKind::Magic, *xp);
                }
                if target_died.died {
                    targeting::clear_player_target(&mut targets, &mut events, shot.user_id);
                    if status.state.is_combat() {
                        status.state = PlayerStateKind::Idle;
                        events.write(GameEvent::PlayerStateChanged {
                            user_id: shot.user_id,
                            state: PlayerStateKind::Idle,
                        });
                    }
                    plan.0 = None;
                }
            }
            EntityKind::Player => {
                strike_player(
                    &mut commands,
                    &clock,
                    &catalogs,
                    &mut registry,
                    &mut index,
                    &mut targets,
                    &wilderness,
                    &sessions,
                    &mut rng,
                    &mut events,
                    &mut senders,
                    &mut players,
                    &shot,
                    strike.target.id,
                );
            }
            _ => {}
        }
    }
}

struct NpcStrikeOutcome {
    damage: Option<u32>,
    died: bool,
}

#[allow(clippy::too_many_arguments)]
fn strike_npc(
    commands: &mut Commands,
    clock: &WorldClock,
    catalogs: &Catalogs,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    rng: &mut WorldRng,
    events: &mut MessageWriter<GameEvent>,
    npcs: &mut Query<
        (&NpcHandle, &NpcPos, &mut NpcStatus, &mut NpcAggro),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
    shot: &PreparedShot,
    npc_id: u32,
) -> NpcStrikeOutcome {
    let missing = NpcStrikeOutcome { damage: None, died: false };
    let Some(npc_entity) = registry.npcs.get(&npc_id).copied() else {
        return missing;
    };
    let Ok((handle, pos, mut status, mut aggro)) = npcs.get_mut(npc_entity) else {
        return missing;
    };
    if status.state == NpcStateKind::Dead {
        return missing;
    }
    let Some(def) = catalogs.npcs.get(handle.definition) else {
        return missing;
    };

    let hit = accuracy_roll(rng, shot.attack_stat, def.defence_level as i32);
    let damage = if hit && shot.max_hit > 0 {
        rng.0.gen_range(0..=shot.max_hit)
    } else {
        0
    };
    status.hitpoints = status.hitpoints.saturating_sub(damage);
    events.write(GameEvent::EntityDamaged {
        target: EntityRef::npc(npc_id),
        amount: damage,
        hp_current: status.hitpoints,
        hp_max: status.hitpoints_max,
    });

    if status.hitpoints == 0 {
        npc_die(
            commands, clock, catalogs, registry, index, rng, events, handle, pos.0,
            &mut status, &mut aggro, Some(shot.user_id),
        );
        return NpcStrikeOutcome { damage: Some(damage), died: true };
    }

    // NPCs fight back when struck.
    if aggro.target().is_none() {
        targeting::set_npc_target(
            &mut aggro,
            events,
            handle.npc_id,
            EntityRef::player(shot.user_id),
            true,
        );
        status.state = NpcStateKind::Combat;
    }
    NpcStrikeOutcome { damage: Some(damage), died: false }
}

#[allow(clippy::too_many_arguments)]
fn strike_player(
    commands: &mut Commands,
    clock: &WorldClock,
    catalogs: &Catalogs,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    targets: &mut PlayerTargets,
    wilderness: &crate::wilderness::WildernessMap,
    sessions: &Sessions,
    rng: &mut WorldRng,
    events: &mut MessageWriter<GameEvent>,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    players: &mut CombatPlayerQuery,
    shot: &PreparedShot,
    defender_id: u32,
) {
    let Some(defender_entity) = registry.players.get(&defender_id).copied() else {
        return;
    };

    // Wilderness rules re-checked on every strike.
    let allowed = players
        .get(defender_entity)
        .map(|(_, _, p, _, _, _, _, _, pr, _)| {
            wilderness.can_attack(shot.pos, shot.combat_level, p.0, pr.combat_level)
        })
        .unwrap_or(false);
    if !allowed {
        send_to(
            sessions,
            senders,
            shot.user_id,
            ServerPacket::GameMessage { message: "You can't attack them here.".to_string() },
        );
        if let Ok((_, _, _, mut status, _, mut plan, _, _, _, _)) = players.get_mut(
            *registry.players.get(&shot.user_id).unwrap_or(&defender_entity),
        ) {
            if status.state.is_combat() {
                status.state = PlayerStateKind::Idle;
            }
            plan.0 = None;
        }
        targeting::clear_player_target(targets, events, shot.user_id);
        return;
    }

    let mut damage_dealt = 0;
    {
        let Ok((_, d_handle, d_pos, mut d_status, mut d_pending, mut d_plan, mut d_delay, mut d_belongings, mut d_progress, d_settings)) =
            players.get_mut(defender_entity)
        else {
            return;
        };
        if d_status.state == PlayerStateKind::Dead {
            return;
        }
        let defence = d_progress.skills.boosted(SkillKind::Defence) as i32
            + d_belongings.equipment.total_bonuses(&catalogs.items).defence as i32;
        let hit = accuracy_roll(rng, shot.attack_stat, defence);
        let damage = if hit && shot.max_hit > 0 {
            rng.0.gen_range(0..=shot.max_hit)
        } else {
            0
        };
        damage_dealt = damage;
        if let Some((SpellEffect::Status { drains, amount, .. }, _)) = &shot.spell {
            d_progress.skills.drain(*drains, *amount, 1);
            send_to(
                sessions,
                senders,
                defender_id,
                ServerPacket::ShowSkillCurrentLevelIncreasedOrDecreasedMessage {
                    skill: *drains,
                    increased: false,
                },
            );
        }
        let current = d_progress.skills.boosted(SkillKind::Hitpoints);
        let after = current.saturating_sub(damage.min(u32::from(u8::MAX)) as u8);
        d_progress.skills.set_boosted(SkillKind::Hitpoints, after);
        d_status.last_hit_tick = clock.tick;
        events.write(GameEvent::EntityDamaged {
            target: EntityRef::player(defender_id),
            amount: damage,
            hp_current: after as u32,
            hp_max: d_progress.skills.hitpoints_max(),
        });
        send_to(
            sessions,
            senders,
            defender_id,
            ServerPacket::SkillCurrentLevelChanged {
                skill: SkillKind::Hitpoints,
                boosted: after,
                base: d_progress.skills.base(SkillKind::Hitpoints),
            },
        );

        if after == 0 {
            player_die(
                commands, clock, registry, index, events, d_handle.user_id, d_pos.0,
                &mut d_status, &mut d_pending, &mut d_plan, &mut d_delay, &mut d_belongings,
            );
        } else if d_settings.get(PlayerSetting::AutoRetaliate) == 1
            && !d_status.state.is_combat()
            && d_status.state != PlayerStateKind::Stunned
        {
            let fallback = combat_state_for(&d_belongings, &d_status, catalogs);
            d_status.state = fallback;
            targeting::set_player_target(
                targets,
                events,
                defender_id,
                EntityRef::player(shot.user_id),
            );
        }
    }

    // Attacker follow-up: xp.
    if let Some(attacker_entity) = registry.players.get(&shot.user_id).copied() {
        if let Ok((_, _, _, _, _, _, _, _, mut progress, _)) = players.get_mut(attacker_entity) {
            grant_combat_xp(&mut progress, sessions, senders, shot.user_id, shot.state, damage_dealt);
            if let Some((_, xp)) = &shot.spell {
                grant_xp(&mut progress, sessions, senders, shot.user_id, SkillKind::Magic, *xp);
            }
        }
    }
}

fn grant_combat_xp(
    progress: &mut Progress,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    state: PlayerStateKind,
    damage: u32,
) {
    if damage == 0 {
        return;
    }
    let skill = match state {
        PlayerStateKind::MeleeCombat => SkillKind::Strength,
        PlayerStateKind::RangeCombat => SkillKind::Ranged,
        PlayerStateKind::MagicCombat => SkillKind::Magic,
        _ => return,
    };
    grant_xp(progress, sessions, senders, user_id, skill, damage * 4);
    grant_xp(progress, sessions, senders, user_id, SkillKind::Hitpoints, damage);
}

/// Resolve NPC attacks on their aggro targets.
#[allow(clippy::too_many_arguments)]
pub fn resolve_npc_attacks(
    mut commands: Commands,
    clock: Res<WorldClock>,
    mut registry: ResMut<Registry>,
    mut index: ResMut<SpatialIndex>,
    catalogs: Res<Catalogs>,
    mut targets: ResMut<PlayerTargets>,
    sessions: Res<Sessions>,
    mut rng: ResMut<WorldRng>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<&mut MessageSender<ServerPacket>>,
    mut npcs: Query<
        (&NpcHandle, &NpcPos, &mut NpcStatus, &NpcAggro, &NpcMotion),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
    mut players: CombatPlayerQuery,
) {
    for (handle, pos, mut status, aggro, _motion) in npcs.iter_mut() {
        if status.state != NpcStateKind::Combat || clock.tick < status.next_attack_tick {
            continue;
        }
        let Some(target) = aggro.target() else {
            continue;
        };
        if target.kind != EntityKind::Player {
            continue;
        }
        let Some(def) = catalogs.npcs.get(handle.definition) else {
            continue;
        };
        let Some(player_entity) = registry.players.get(&target.id).copied() else {
            continue;
        };
        let Ok((_, p_handle, p_pos, mut p_status, mut p_pending, mut p_plan, mut p_delay, mut p_belongings, mut p_progress, p_settings)) =
            players.get_mut(player_entity)
        else {
            continue;
        };
        if p_status.state == PlayerStateKind::Dead {
            continue;
        }
        if pos.0.level != p_pos.0.level || !cardinally_adjacent(pos.0.xy(), p_pos.0.xy()) {
            continue;
        }
        status.next_attack_tick = clock.tick + def.attack_speed_ticks as u64;

        let defence = p_progress.skills.boosted(SkillKind::Defence) as i32
            + p_belongings.equipment.total_bonuses(&catalogs.items).defence as i32;
        let hit = accuracy_roll(&mut rng, def.attack_level as i32, defence);
        let damage = if hit && def.max_hit > 0 {
            rng.0.gen_range(0..=def.max_hit as u32)
        } else {
            0
        };
        let current = p_progress.skills.boosted(SkillKind::Hitpoints);
        let after = current.saturating_sub(damage.min(u32::from(u8::MAX)) as u8);
        p_progress.skills.set_boosted(SkillKind::Hitpoints, after);
        p_status.last_hit_tick = clock.tick;
        events.write(GameEvent::EntityDamaged {
            target,
            amount: damage,
            hp_current: after as u32,
            hp_max: p_progress.skills.hitpoints_max(),
        });
        send_to(
            &sessions,
            &mut senders,
            p_handle.user_id,
            ServerPacket::SkillCurrentLevelChanged {
                skill: SkillKind::Hitpoints,
                boosted: after,
                base: p_progress.skills.base(SkillKind::Hitpoints),
            },
        );

        if after == 0 {
            player_die(
                &mut commands,
                &clock,
                &mut registry,
                &mut index,
                &mut events,
                p_handle.user_id,
                p_pos.0,
                &mut p_status,
                &mut p_pending,
                &mut p_plan,
                &mut p_delay,
                &mut p_belongings,
            );
        } else if p_settings.get(PlayerSetting::AutoRetaliate) == 1
            && !p_status.state.is_combat()
            && p_status.state != PlayerStateKind::Stunned
        {
            let fallback = combat_state_for(&p_belongings, &p_status, &catalogs);
            p_status.state = fallback;
            targeting::set_player_target(
                &mut targets,
                &mut events,
                p_handle.user_id,
                EntityRef::npc(handle.npc_id),
            );
        }
    }
}

// =============================================================================
// DEATHS & RESPAWNS
// =============================================================================

/// NPC death: dead state, loot drop private to the killer, despawn timer.
#[allow(clippy::too_many_arguments)]
pub fn npc_die(
    commands: &mut Commands,
    clock: &WorldClock,
    catalogs: &Catalogs,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    rng: &mut WorldRng,
    events: &mut MessageWriter<GameEvent>,
    handle: &NpcHandle,
    at: TilePos,
    status: &mut NpcStatus,
    aggro: &mut NpcAggro,
    killer: Option<u32>,
) {
    status.state = NpcStateKind::Dead;
    status.hitpoints = 0;
    targeting::clear_npc_target(aggro, events, handle.npc_id, false);
    aggro.clear_dropped();
    events.write(GameEvent::NpcDied { npc_id: handle.npc_id, at });

    let Some(def) = catalogs.npcs.get(handle.definition) else {
        return;
    };
    status.despawn_at_tick = Some(clock.tick + def.despawn_ticks as u64);
    if let Some(table_id) = def.drop_table {
        if let Some(table) = catalogs.loot.get(table_id) {
            for stack in table.roll(&mut rng.0) {
                crate::ground_items::spawn_ground_item(
                    commands,
                    registry,
                    index,
                    events,
                    clock,
                    stack,
                    at,
                    killer,
                    shared::components::GroundItemSource::Drop,
                );
            }
        }
    }
}

/// Player death: drop carried items, clear volatile state, schedule the
/// respawn.
#[allow(clippy::too_many_arguments)]
pub fn player_die(
    commands: &mut Commands,
    clock: &WorldClock,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    events: &mut MessageWriter<GameEvent>,
    user_id: u32,
    at: TilePos,
    status: &mut PlayerStatus,
    pending: &mut Pending,
    plan: &mut Plan,
    delay: &mut Delay,
    belongings: &mut Belongings,
) {
    status.state = PlayerStateKind::Dead;
    status.respawn_at_tick = Some(clock.tick + PLAYER_RESPAWN_TICKS);
    pending.0 = None;
    plan.0 = None;
    crate::delay::cancel_delay_on_death(delay);
    events.write(GameEvent::PlayerDied { user_id, at });

    // Everything carried drops where they fell, visible to anyone.
    let slots: Vec<usize> = belongings.inventory.iter().map(|(i, _)| i).collect();
    for slot in slots {
        if let Some(stack) = belongings.inventory.take_at(slot) {
            crate::ground_items::spawn_ground_item(
                commands,
                registry,
                index,
                events,
                clock,
                stack,
                at,
                None,
                shared::components::GroundItemSource::Drop,
            );
        }
    }
    belongings.dirty = true;
}

/// P8: drop player targets whose referent no longer holds: removed
/// entities, dead NPCs, dead players. Combat states without a target fall
/// back to idle on the next strike attempt.
pub fn validate_player_targets(
    registry: Res<Registry>,
    mut targets: ResMut<PlayerTargets>,
    mut events: MessageWriter<GameEvent>,
    npcs: Query<&NpcStatus>,
    players: Query<&PlayerStatus>,
) {
    let stale: Vec<u32> = targets
        .iter()
        .filter(|(_, target)| match target.kind {
            EntityKind::Npc => registry
                .npcs
                .get(&target.id)
                .and_then(|e| npcs.get(*e).ok())
                .map(|s| s.state == NpcStateKind::Dead)
                .unwrap_or(true),
            EntityKind::Player => registry
                .players
                .get(&target.id)
                .and_then(|e| players.get(*e).ok())
                .map(|s| s.state == PlayerStateKind::Dead)
                .unwrap_or(true),
            _ => true,
        })
        .map(|(user_id, _)| user_id)
        .collect();
    for user_id in stale {
        targeting::clear_player_target(&mut targets, &mut events, user_id);
    }
}

/// P8: respawn dead players at the spawn point with restored health.
pub fn respawn_players(
    clock: Res<WorldClock>,
    config: Res<ServerConfig>,
    mut index: ResMut<SpatialIndex>,
    sessions: Res<Sessions>,
    mut events: MessageWriter<GameEvent>,
    mut senders: Query<&mut MessageSender<ServerPacket>>,
    mut players: Query<
        (&PlayerHandle, &mut PlayerPos, &mut PlayerStatus, &mut Progress),
        (With<PlayerHandle>, Without<NpcHandle>),
    >,
) {
    for (handle, mut pos, mut status, mut progress) in players.iter_mut() {
        let Some(respawn_at) = status.respawn_at_tick else {
            continue;
        };
        if clock.tick < respawn_at {
            continue;
        }
        status.respawn_at_tick = None;
        status.state = PlayerStateKind::Idle;
        let base = progress.skills.base(SkillKind::Hitpoints);
        progress.skills.set_boosted(SkillKind::Hitpoints, base);
        let from = pos.0;
        pos.0 = config.spawn_position;
        index.relocate_player(handle.user_id, pos.0);
        events.write(GameEvent::PlayerTeleported { user_id: handle.user_id, from, to: pos.0 });
        events.write(GameEvent::PlayerStateChanged {
            user_id: handle.user_id,
            state: PlayerStateKind::Idle,
        });
        send_to(
            &sessions,
            &mut senders,
            handle.user_id,
            ServerPacket::SkillCurrentLevelChanged {
                skill: SkillKind::Hitpoints,
                boosted: base,
                base,
            },
        );
    }
}

/// P8: despawn dead NPCs when their timer runs out, and bring them back at
/// their spawn point when the respawn timer does.
pub fn npc_lifecycle(
    clock: Res<WorldClock>,
    catalogs: Res<Catalogs>,
    mut index: ResMut<SpatialIndex>,
    mut events: MessageWriter<GameEvent>,
    mut npcs: Query<
        (&NpcHandle, &mut NpcPos, &mut NpcStatus, &mut Plan),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
) {
    for (handle, mut pos, mut status, mut plan) in npcs.iter_mut() {
        if let Some(despawn_at) = status.despawn_at_tick {
            if clock.tick >= despawn_at {
                status.despawn_at_tick = None;
                let respawn_ticks = catalogs
                    .npcs
                    .get(handle.definition)
                    .map(|d| d.respawn_ticks as u64)
                    .unwrap_or(50);
                status.respawn_at_tick = Some(clock.tick + respawn_ticks);
                index.remove_npc(handle.npc_id);
                plan.0 = None;
                events.write(GameEvent::NpcDespawned { npc_id: handle.npc_id, at: pos.0 });
            }
            continue;
        }
        if let Some(respawn_at) = status.respawn_at_tick {
            if clock.tick >= respawn_at {
                status.respawn_at_tick = None;
                status.state = NpcStateKind::Idle;
                status.hitpoints = status.hitpoints_max;
                pos.0 = status.spawn_pos;
                index.insert_npc(handle.npc_id, pos.0);
                events.write(GameEvent::NpcSpawned { npc_id: handle.npc_id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn melee_range_is_cardinal_adjacency() {
        let a = TilePos::new(shared::tile::MapLevel::Overworld, 5, 5);
        let b = TilePos::new(shared::tile::MapLevel::Overworld, 5, 6);
        let diag = TilePos::new(shared::tile::MapLevel::Overworld, 6, 6);
        assert!(in_attack_range(None, PlayerStateKind::MeleeCombat, a, b));
        assert!(!in_attack_range(None, PlayerStateKind::MeleeCombat, a, diag));
    }

    #[test]
    fn ranged_range_needs_a_grid_for_los() {
        let a = TilePos::new(shared::tile::MapLevel::Overworld, 5, 5);
        let b = TilePos::new(shared::tile::MapLevel::Overworld, 9, 5);
        // Without a grid there is no LOS information: refuse.
        assert!(!in_attack_range(None, PlayerStateKind::RangeCombat, a, b));
        let grid = shared::pathing::PathingGrid::new(shared::tile::MapLevel::Overworld, 16, 16);
        assert!(in_attack_range(Some(&grid), PlayerStateKind::RangeCombat, a, b));
    }

    #[test]
    fn max_hits_scale_with_level() {
        assert!(melee_max_hit(99, 50) > melee_max_hit(1, 0));
        assert!(ranged_max_hit(80, 0) > ranged_max_hit(10, 0));
    }
}
