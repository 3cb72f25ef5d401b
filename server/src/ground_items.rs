//! Ground items: drops, spawn points, privacy timers and despawn.

use bevy::prelude::*;

use shared::components::GroundItemSource;
use shared::items::ItemStack;
use shared::tile::TilePos;

use crate::components::GroundItemState;
use crate::config::{WorldClock, GROUND_ITEM_DESPAWN_TICKS, GROUND_ITEM_PUBLIC_TICKS};
use crate::events::GameEvent;
use crate::spatial::SpatialIndex;
use crate::world::{ItemSpawns, Registry};

/// Spawn a ground item and announce it. Drops from players start private to
/// the dropper and become public after a timer; world spawns are public.
#[allow(clippy::too_many_arguments)]
pub fn spawn_ground_item(
    commands: &mut Commands,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    events: &mut MessageWriter<GameEvent>,
    clock: &WorldClock,
    stack: ItemStack,
    pos: TilePos,
    visible_to: Option<u32>,
    source: GroundItemSource,
) -> u32 {
    let ground_item_id = registry.alloc_ground_item_id();
    let public_at_tick = visible_to.map(|_| clock.tick + GROUND_ITEM_PUBLIC_TICKS);
    let entity = commands
        .spawn(GroundItemState {
            ground_item_id,
            stack,
            pos,
            source,
            visible_to,
            public_at_tick,
            despawn_at_tick: clock.tick + GROUND_ITEM_DESPAWN_TICKS,
        })
        .id();
    registry.ground_items.insert(ground_item_id, entity);
    index.insert_item(ground_item_id, pos);
    events.write(GameEvent::ItemSpawned { ground_item_id });
    ground_item_id
}

/// Remove a ground item (picked up or timed out).
pub fn remove_ground_item(
    commands: &mut Commands,
    registry: &mut Registry,
    index: &mut SpatialIndex,
    events: &mut MessageWriter<GameEvent>,
    spawns: &mut ItemSpawns,
    clock: &WorldClock,
    ground_item_id: u32,
    at: TilePos,
) {
    if let Some(entity) = registry.ground_items.remove(&ground_item_id) {
        commands.entity(entity).despawn();
    }
    index.remove_item(ground_item_id);
    events.write(GameEvent::ItemRemoved { ground_item_id, at });
    // A consumed spawn-point item schedules its replenish.
    for point in spawns.0.iter_mut() {
        if point.live_item == Some(ground_item_id) {
            point.live_item = None;
            point.respawn_at = Some(clock.tick + point.respawn_ticks);
        }
    }
}

/// P8: privacy expiry, despawn deadlines, and spawn-point replenish.
pub fn tick_ground_items(
    mut commands: Commands,
    clock: Res<WorldClock>,
    mut registry: ResMut<Registry>,
    mut index: ResMut<SpatialIndex>,
    mut spawns: ResMut<ItemSpawns>,
    mut events: MessageWriter<GameEvent>,
    mut items: Query<(&mut GroundItemState,)>,
) {
    let mut expired: Vec<(u32, TilePos)> = Vec::new();
    for (mut item,) in items.iter_mut() {
        if let Some(public_at) = item.public_at_tick {
            if clock.tick >= public_at && item.visible_to.is_some() {
                item.visible_to = None;
                item.public_at_tick = None;
                events.write(GameEvent::ItemBecameVisibleToAll {
                    ground_item_id: item.ground_item_id,
                });
            }
        }
        if clock.tick >= item.despawn_at_tick {
            expired.push((item.ground_item_id, item.pos));
        }
    }
    for (ground_item_id, at) in expired {
        remove_ground_item(
            &mut commands,
            &mut registry,
            &mut index,
            &mut events,
            &mut spawns,
            &clock,
            ground_item_id,
            at,
        );
    }

    // Replenish consumed spawn points.
    let due: Vec<usize> = spawns
        .0
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            p.live_item.is_none() && p.respawn_at.map(|t| clock.tick >= t).unwrap_or(true)
        })
        .map(|(i, _)| i)
        .collect();
    for i in due {
        let (stack, pos, _) = {
            let p = &spawns.0[i];
            (p.stack, p.pos, p.respawn_ticks)
        };
        let id = spawn_ground_item(
            &mut commands,
            &mut registry,
            &mut index,
            &mut events,
            &clock,
            stack,
            pos,
            None,
            GroundItemSource::Spawn,
        );
        let p = &mut spawns.0[i];
        p.live_item = Some(id);
        p.respawn_at = None;
    }
}
