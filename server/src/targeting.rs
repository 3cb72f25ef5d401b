//! The targeting service: the single writer of player targets and NPC aggro
//! targets, and the single emitter of started/stopped targeting events.
//!
//! Other systems read targets and *request* changes through these
//! functions; nothing else writes the target maps or [`NpcAggro`] fields.

use bevy::prelude::*;
use std::collections::HashMap;

use shared::components::EntityRef;

use crate::events::GameEvent;

/// Player target map, keyed by user id.
#[derive(Resource, Debug, Default)]
pub struct PlayerTargets {
    targets: HashMap<u32, EntityRef>,
}

impl PlayerTargets {
    pub fn get(&self, user_id: u32) -> Option<EntityRef> {
        self.targets.get(&user_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, EntityRef)> + '_ {
        self.targets.iter().map(|(k, v)| (*k, *v))
    }
}

/// Lifecycle of the dropped-target memory that stops an NPC from instantly
/// re-acquiring a player it just gave up on. The memory survives the
/// player's first return to the area; only a later full exit and re-entry
/// clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroppedPhase {
    /// Player has been outside the area since the drop.
    Outside,
    /// Player came back in; memory still holds.
    Inside,
    /// Player left again after returning; next entry clears the memory.
    OutsideAgain,
}

#[derive(Debug, Clone, Copy)]
pub struct DroppedMemory {
    pub target_id: u32,
    pub phase: DroppedPhase,
}

/// One tick of the memory lifecycle given whether the remembered player is
/// currently inside the movement area. `None` clears the memory, making
/// the player eligible for re-acquisition.
pub fn dropped_phase_step(phase: DroppedPhase, inside_area: bool) -> Option<DroppedPhase> {
    match (phase, inside_area) {
        (DroppedPhase::Outside, true) => Some(DroppedPhase::Inside),
        (DroppedPhase::Inside, false) => Some(DroppedPhase::OutsideAgain),
        (DroppedPhase::OutsideAgain, true) => None,
        (phase, _) => Some(phase),
    }
}

/// NPC aggro slot. Fields are private: all writes go through the service
/// functions below.
#[derive(Component, Debug, Default)]
pub struct NpcAggro {
    target: Option<EntityRef>,
    dropped: Option<DroppedMemory>,
}

impl NpcAggro {
    pub fn target(&self) -> Option<EntityRef> {
        self.target
    }

    pub fn dropped(&self) -> Option<DroppedMemory> {
        self.dropped
    }

    pub(crate) fn set_dropped_phase(&mut self, phase: DroppedPhase) {
        if let Some(mem) = self.dropped.as_mut() {
            mem.phase = phase;
        }
    }

    pub(crate) fn clear_dropped(&mut self) {
        self.dropped = None;
    }
}

// =============================================================================
// PLAYER TARGETS
// =============================================================================

pub fn set_player_target(
    targets: &mut PlayerTargets,
    events: &mut MessageWriter<GameEvent>,
    user_id: u32,
    target: EntityRef,
) {
    let source = EntityRef::player(user_id);
    if targets.targets.get(&user_id) == Some(&target) {
        return;
    }
    if targets.targets.remove(&user_id).is_some() {
        events.write(GameEvent::TargetingStopped { source });
    }
    targets.targets.insert(user_id, target);
    events.write(GameEvent::TargetingStarted { source, target });
}

pub fn clear_player_target(
    targets: &mut PlayerTargets,
    events: &mut MessageWriter<GameEvent>,
    user_id: u32,
) {
    if targets.targets.remove(&user_id).is_some() {
        events.write(GameEvent::TargetingStopped { source: EntityRef::player(user_id) });
    }
}

/// Disconnect variant: clears without emitting for the departing player.
/// Whoever was targeting them is handled by [`clear_targets_on_entity`].
pub fn clear_player_target_on_disconnect(targets: &mut PlayerTargets, user_id: u32) {
    targets.targets.remove(&user_id);
}

/// Drops the target when the referenced entity no longer exists.
pub fn validate_player_target(
    targets: &mut PlayerTargets,
    events: &mut MessageWriter<GameEvent>,
    registry: &crate::world::Registry,
    user_id: u32,
) {
    let Some(target) = targets.get(user_id) else {
        return;
    };
    if !entity_exists(registry, target) {
        clear_player_target(targets, events, user_id);
    }
}

pub fn entity_exists(registry: &crate::world::Registry, target: EntityRef) -> bool {
    use shared::components::EntityKind;
    match target.kind {
        EntityKind::Player => registry.players.contains_key(&target.id),
        EntityKind::Npc => registry.npcs.contains_key(&target.id),
        EntityKind::GroundItem => registry.ground_items.contains_key(&target.id),
        EntityKind::WorldEntity => registry.world_entities.contains_key(&target.id),
    }
}

// =============================================================================
// NPC AGGRO
// =============================================================================

pub fn set_npc_target(
    aggro: &mut NpcAggro,
    events: &mut MessageWriter<GameEvent>,
    npc_id: u32,
    target: EntityRef,
    clear_dropped_memory: bool,
) {
    let source = EntityRef::npc(npc_id);
    if aggro.target == Some(target) {
        return;
    }
    if aggro.target.take().is_some() {
        events.write(GameEvent::TargetingStopped { source });
    }
    aggro.target = Some(target);
    if clear_dropped_memory {
        aggro.dropped = None;
    }
    events.write(GameEvent::TargetingStarted { source, target });
}

pub fn clear_npc_target(
    aggro: &mut NpcAggro,
    events: &mut MessageWriter<GameEvent>,
    npc_id: u32,
    remember_dropped: bool,
) {
    let Some(target) = aggro.target.take() else {
        return;
    };
    if remember_dropped {
        aggro.dropped = Some(DroppedMemory {
            target_id: target.id,
            phase: DroppedPhase::Outside,
        });
    }
    events.write(GameEvent::TargetingStopped { source: EntityRef::npc(npc_id) });
}

/// Sweep called when an entity becomes invalid (logout, death, despawn):
/// clears every player target and NPC aggro slot pointing at it.
pub fn clear_targets_on_entity(
    targets: &mut PlayerTargets,
    npc_aggro: &mut Query<(&crate::components::NpcHandle, &mut NpcAggro)>,
    events: &mut MessageWriter<GameEvent>,
    target: EntityRef,
) {
    let holders: Vec<u32> = targets
        .targets
        .iter()
        .filter(|(_, t)| **t == target)
        .map(|(user_id, _)| *user_id)
        .collect();
    for user_id in holders {
        clear_player_target(targets, events, user_id);
    }
    for (handle, mut aggro) in npc_aggro.iter_mut() {
        if aggro.target() == Some(target) {
            clear_npc_target(&mut aggro, events, handle.npc_id, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_memory_survives_the_first_return() {
        // Drop happened while the player was outside the area.
        let mut phase = DroppedPhase::Outside;
        // They walk back in: still remembered, no re-aggro.
        phase = dropped_phase_step(phase, true).unwrap();
        assert_eq!(phase, DroppedPhase::Inside);
        // Loitering inside keeps the memory.
        phase = dropped_phase_step(phase, true).unwrap();
        assert_eq!(phase, DroppedPhase::Inside);
        // They leave again...
        phase = dropped_phase_step(phase, false).unwrap();
        assert_eq!(phase, DroppedPhase::OutsideAgain);
        // ...and the next re-entry clears the memory entirely.
        assert_eq!(dropped_phase_step(phase, true), None);
    }

    #[test]
    fn staying_outside_keeps_the_initial_phase() {
        assert_eq!(
            dropped_phase_step(DroppedPhase::Outside, false),
            Some(DroppedPhase::Outside)
        );
        assert_eq!(
            dropped_phase_step(DroppedPhase::OutsideAgain, false),
            Some(DroppedPhase::OutsideAgain)
        );
    }
}
