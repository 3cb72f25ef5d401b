//! NPC aggro: per-tick target validation and acquisition.
//!
//! The asymmetric area rule is load-bearing: acquiring a target requires
//! the player strictly inside the movement area, while keeping one only
//! requires inside-or-adjacent. An aggro'd player can therefore be chased
//! one tile past the box, but a bystander straddling the boundary is never
//! acquired.

use bevy::prelude::*;

use shared::components::{EntityKind, EntityRef, NpcStateKind, PlayerStateKind};
use shared::tile::euclidean_sq;

use crate::components::{NpcHandle, NpcMotion, NpcPos, NpcStatus, PlayerHandle, PlayerPos, PlayerStatus, Progress};
use crate::events::GameEvent;
use crate::spatial::SpatialIndex;
use crate::targeting::{self, NpcAggro};
use crate::world::{Catalogs, Registry};

/// P3: validate every NPC's current target, tick the dropped-target memory,
/// then acquire new targets for hostile NPCs without one.
#[allow(clippy::too_many_arguments)]
pub fn update_npc_aggro(
    registry: Res<Registry>,
    index: Res<SpatialIndex>,
    catalogs: Res<Catalogs>,
    mut events: MessageWriter<GameEvent>,
    mut npcs: Query<
        (&NpcHandle, &NpcPos, &mut NpcStatus, &mut NpcAggro, &NpcMotion),
        (With<NpcHandle>, Without<PlayerHandle>),
    >,
    players: Query<(&PlayerHandle, &PlayerPos, &PlayerStatus, &Progress), Without<NpcHandle>>,
) {
    for (handle, pos, mut status, mut aggro, motion) in npcs.iter_mut() {
        if status.state == NpcStateKind::Dead {
            continue;
        }

        // 1. Validate the current target.
        if let Some(target) = aggro.target() {
            if !target_still_valid(&registry, &players, handle, pos, motion, target) {
                targeting::clear_npc_target(&mut aggro, &mut events, handle.npc_id, true);
                if status.state == NpcStateKind::Combat {
                    status.state = NpcStateKind::Idle;
                }
            }
        }

        // 2. Tick the dropped-target memory lifecycle.
        if let Some(memory) = aggro.dropped() {
            match registry.players.get(&memory.target_id).and_then(|e| players.get(*e).ok()) {
                None => aggro.clear_dropped(),
                Some((_, player_pos, _, _)) => {
                    let inside = player_pos.0.level == pos.0.level
                        && motion.area.contains(player_pos.0.xy());
                    match targeting::dropped_phase_step(memory.phase, inside) {
                        Some(phase) => aggro.set_dropped_phase(phase),
                        None => aggro.clear_dropped(),
                    }
                }
            }
        }

        // 3. Acquire.
        if aggro.target().is_some() {
            continue;
        }
        let Some(def) = catalogs.npcs.get(handle.definition) else {
            continue;
        };
        if def.aggro_radius == 0 {
            continue;
        }

        let mut best: Option<(u32, i64)> = None;
        for user_id in index.players_within(pos.0, def.aggro_radius) {
            if let Some(memory) = aggro.dropped() {
                if memory.target_id == user_id {
                    continue;
                }
            }
            if let Some(owner) = handle.owner {
                if owner != user_id {
                    continue;
                }
            }
            let Some(player_entity) = registry.players.get(&user_id) else {
                continue;
            };
            let Ok((_, player_pos, player_status, _)) = players.get(*player_entity) else {
                continue;
            };
            if player_status.state == PlayerStateKind::Dead {
                continue;
            }
            // Strict interior: boundary tiles do not trigger aggro.
            if player_pos.0.level != pos.0.level
                || !motion.area.contains_interior(player_pos.0.xy())
            {
                continue;
            }
            let dist = euclidean_sq(pos.0.xy(), player_pos.0.xy());
            if best.map(|(_, d)| dist < d).unwrap_or(true) {
                best = Some((user_id, dist));
            }
        }
        if let Some((user_id, _)) = best {
            targeting::set_npc_target(
                &mut aggro,
                &mut events,
                handle.npc_id,
                EntityRef::player(user_id),
                true,
            );
            status.state = NpcStateKind::Combat;
            trace!("NPC {} aggroed player {}", handle.npc_id, user_id);
        }
    }
}

fn target_still_valid(
    registry: &Registry,
    players: &Query<(&PlayerHandle, &PlayerPos, &PlayerStatus, &Progress), Without<NpcHandle>>,
    handle: &NpcHandle,
    pos: &NpcPos,
    motion: &NpcMotion,
    target: EntityRef,
) -> bool {
    if target.kind != EntityKind::Player {
        return false;
    }
    let Some(player_entity) = registry.players.get(&target.id) else {
        return false;
    };
    let Ok((_, player_pos, player_status, _)) = players.get(*player_entity) else {
        return false;
    };
    if player_status.state == PlayerStateKind::Dead {
        return false;
    }
    if player_pos.0.level != pos.0.level {
        return false;
    }
    // Maintenance tolerates one tile outside the box.
    if !motion.area.contains_or_adjacent(player_pos.0.xy()) {
        return false;
    }
    if let Some(owner) = handle.owner {
        if owner != target.id {
            return false;
        }
    }
    true
}
