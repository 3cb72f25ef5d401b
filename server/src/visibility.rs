//! The visibility system: consumes the tick's game events in emission
//! order and turns them into per-viewer packets.
//!
//! [`ViewerState`] keeps two reciprocal maps (what each viewer sees and
//! who watches each entity); every mutation goes through paired
//! operations so the maps stay symmetric at every phase boundary. For any
//! entered-chunk packet a viewer receives about an entity, an exited-chunk
//! for that entity always precedes the next unrelated entered-chunk: an
//! entity only enters a viewer's set when absent from it.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;
use std::collections::{HashMap, HashSet};

use shared::components::{EntityKind, EntityRef, PlayerStateKind};
use shared::protocol::ServerPacket;
use shared::tile::TilePos;

use crate::components::{
    GroundItemState, NpcHandle, NpcPos, NpcStatus, PlayerHandle, PlayerPos, PlayerStatus,
    Progress, WorldEntityState,
};
use crate::config::{ENTITY_VIEW_RADIUS, ITEM_VIEW_RADIUS};
use crate::events::GameEvent;
use crate::sessions::Sessions;
use crate::spatial::{SpatialIndex, StaticEntityIndex};
use crate::world::Registry;

/// Reciprocal visibility maps: a viewer is in `watchers[e]` exactly when
/// `e` is in that viewer's `visible` set.
#[derive(Resource, Debug, Default)]
pub struct ViewerState {
    visible: HashMap<u32, HashSet<EntityRef>>,
    watchers: HashMap<EntityRef, HashSet<u32>>,
}

impl ViewerState {
    pub fn sees(&self, viewer: u32, entity: EntityRef) -> bool {
        self.visible.get(&viewer).map(|s| s.contains(&entity)).unwrap_or(false)
    }

    /// Watchers of an entity, sorted for deterministic iteration.
    pub fn watchers_of(&self, entity: EntityRef) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .watchers
            .get(&entity)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    pub fn visible_of(&self, viewer: u32) -> Vec<EntityRef> {
        self.visible
            .get(&viewer)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn add_pair(&mut self, viewer: u32, entity: EntityRef) {
        self.visible.entry(viewer).or_default().insert(entity);
        self.watchers.entry(entity).or_default().insert(viewer);
    }

    pub fn remove_pair(&mut self, viewer: u32, entity: EntityRef) {
        if let Some(set) = self.visible.get_mut(&viewer) {
            set.remove(&entity);
            if set.is_empty() {
                self.visible.remove(&viewer);
            }
        }
        if let Some(set) = self.watchers.get_mut(&entity) {
            set.remove(&viewer);
            if set.is_empty() {
                self.watchers.remove(&entity);
            }
        }
    }

    /// Drop an entity entirely; returns its former watchers, sorted.
    pub fn remove_entity(&mut self, entity: EntityRef) -> Vec<u32> {
        let watchers = self.watchers_of(entity);
        for viewer in &watchers {
            if let Some(set) = self.visible.get_mut(viewer) {
                set.remove(&entity);
                if set.is_empty() {
                    self.visible.remove(viewer);
                }
            }
        }
        self.watchers.remove(&entity);
        watchers
    }

    /// Drop a viewer entirely (logout); returns what they saw.
    pub fn remove_viewer(&mut self, viewer: u32) -> Vec<EntityRef> {
        let seen: Vec<EntityRef> = self.visible.remove(&viewer).map(|s| s.into_iter().collect()).unwrap_or_default();
        for entity in &seen {
            if let Some(set) = self.watchers.get_mut(entity) {
                set.remove(&viewer);
                if set.is_empty() {
                    self.watchers.remove(entity);
                }
            }
        }
        seen
    }

    #[cfg(test)]
    fn is_symmetric(&self) -> bool {
        self.visible.iter().all(|(v, set)| {
            set.iter().all(|e| {
                self.watchers.get(e).map(|w| w.contains(v)).unwrap_or(false)
            })
        }) && self.watchers.iter().all(|(e, set)| {
            set.iter().all(|v| {
                self.visible.get(v).map(|s| s.contains(e)).unwrap_or(false)
            })
        })
    }
}

/// Partition a watcher transition into entered / persisting / exited.
pub fn partition_watchers(
    new_watchers: &[u32],
    old_watchers: &[u32],
) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
    let new_set: HashSet<u32> = new_watchers.iter().copied().collect();
    let old_set: HashSet<u32> = old_watchers.iter().copied().collect();
    let mut entered: Vec<u32> = new_set.difference(&old_set).copied().collect();
    let mut persisting: Vec<u32> = new_set.intersection(&old_set).copied().collect();
    let mut exited: Vec<u32> = old_set.difference(&new_set).copied().collect();
    entered.sort_unstable();
    persisting.sort_unstable();
    exited.sort_unstable();
    (entered, persisting, exited)
}

type VisPlayers<'w, 's> = Query<
    'w,
    's,
    (&'static PlayerHandle, &'static PlayerPos, &'static PlayerStatus, &'static Progress),
    With<PlayerHandle>,
>;
type VisNpcs<'w, 's> = Query<'w, 's, (&'static NpcHandle, &'static NpcPos, &'static NpcStatus)>;

struct Vis<'a, 'sw, 'ss, 'pw, 'ps, 'nw, 'ns, 'iw, 'is, 'ww, 'ws> {
    registry: &'a Registry,
    index: &'a SpatialIndex,
    statics: &'a StaticEntityIndex,
    sessions: &'a Sessions,
    viewer: &'a mut ViewerState,
    senders: &'a mut Query<'sw, 'ss, &'sw mut MessageSender<ServerPacket>>,
    players: &'a VisPlayers<'pw, 'ps>,
    npcs: &'a VisNpcs<'nw, 'ns>,
    items: &'a Query<'iw, 'is, &'iw GroundItemState>,
    world_entities: &'a Query<'ww, 'ws, &'ww WorldEntityState>,
}

impl Vis<'_, '_, '_, '_, '_, '_, '_, '_, '_, '_, '_> {
    fn send(&mut self, viewer_id: u32, packet: ServerPacket) {
        crate::sessions::send_to(self.sessions, self.senders, viewer_id, packet);
    }

    /// Players who can see a position. Items use the wider radius.
    fn viewers_around(&self, pos: TilePos, radius: u32, exclude: Option<u32>) -> Vec<u32> {
        let mut out = self.index.players_within(pos, radius);
        if let Some(exclude) = exclude {
            out.retain(|id| *id != exclude);
        }
        out.sort_unstable();
        out
    }

    /// The full initial-state packet for an entity entering a viewer's
    /// sight. `None` when the entity vanished mid-tick (the event is then
    /// skipped silently) or when the viewer may not see it.
    fn entered_packet(&self, viewer_id: u32, entity: EntityRef) -> Option<ServerPacket> {
        match entity.kind {
            EntityKind::Player => {
                let e = self.registry.players.get(&entity.id)?;
                let (handle, pos, status, progress) = self.players.get(*e).ok()?;
                Some(ServerPacket::PlayerEnteredChunk(shared::components::PlayerSnapshot {
                    user_id: handle.user_id,
                    display_name: handle.display_name.clone(),
                    pos: pos.0,
                    state: status.state,
                    combat_level: progress.combat_level,
                    appearance: status.appearance,
                }))
            }
            EntityKind::Npc => {
                let e = self.registry.npcs.get(&entity.id)?;
                let (handle, pos, status) = self.npcs.get(*e).ok()?;
                Some(ServerPacket::NpcEnteredChunk(shared::components::NpcSnapshot {
                    npc_id: handle.npc_id,
                    definition_id: handle.definition.0,
                    pos: pos.0,
                    state: status.state,
                    hitpoints_current: status.hitpoints,
                    hitpoints_max: status.hitpoints_max,
                }))
            }
            EntityKind::GroundItem => {
                let e = self.registry.ground_items.get(&entity.id)?;
                let item = self.items.get(*e).ok()?;
                if !item.visible_to_user(viewer_id) {
                    return None;
                }
                Some(ServerPacket::GroundItemEnteredChunk(
                    shared::components::GroundItemSnapshot {
                        ground_item_id: item.ground_item_id,
                        item_id: item.stack.item_id.0,
                        amount: item.stack.amount,
                        is_iou: item.stack.is_iou,
                        pos: item.pos,
                    },
                ))
            }
            EntityKind::WorldEntity => {
                let e = self.registry.world_entities.get(&entity.id)?;
                let state = self.world_entities.get(*e).ok()?;
                Some(ServerPacket::WorldEntityEnteredChunk(
                    shared::components::WorldEntitySnapshot {
                        world_entity_id: state.world_entity_id,
                        definition_id: state.definition.0,
                        pos: state.pos,
                        orientation: state.orientation,
                        exhausted: state.is_exhausted(),
                    },
                ))
            }
        }
    }

    fn exited_packet(entity: EntityRef) -> ServerPacket {
        match entity.kind {
            EntityKind::Player => ServerPacket::PlayerExitedChunk { user_id: entity.id },
            EntityKind::Npc => ServerPacket::NpcExitedChunk { npc_id: entity.id },
            EntityKind::GroundItem => {
                ServerPacket::GroundItemExitedChunk { ground_item_id: entity.id }
            }
            EntityKind::WorldEntity => {
                ServerPacket::WorldEntityExitedChunk { world_entity_id: entity.id }
            }
        }
    }

    fn show_entity_to(&mut self, viewer_id: u32, entity: EntityRef) {
        if self.viewer.sees(viewer_id, entity) {
            return;
        }
        if let Some(packet) = self.entered_packet(viewer_id, entity) {
            self.send(viewer_id, packet);
            self.viewer.add_pair(viewer_id, entity);
        }
    }

    fn hide_entity_from(&mut self, viewer_id: u32, entity: EntityRef) {
        if !self.viewer.sees(viewer_id, entity) {
            return;
        }
        self.send(viewer_id, Self::exited_packet(entity));
        self.viewer.remove_pair(viewer_id, entity);
    }

    /// An entity moved (or teleported, or crossed a door): diff its
    /// watchers, send the right packet to each partition, update the maps.
    fn entity_repositioned(
        &mut self,
        entity: EntityRef,
        to: TilePos,
        persisting_packet: ServerPacket,
    ) {
        let new_watchers = self.viewers_around(to, ENTITY_VIEW_RADIUS, Some(entity.id).filter(|_| entity.kind == EntityKind::Player));
        let old_watchers = self.viewer.watchers_of(entity);
        let (entered, persisting, exited) = partition_watchers(&new_watchers, &old_watchers);
        for viewer_id in entered {
            self.show_entity_to(viewer_id, entity);
        }
        for viewer_id in persisting {
            self.send(viewer_id, persisting_packet.clone());
        }
        for viewer_id in exited {
            self.hide_entity_from(viewer_id, entity);
        }
    }

    /// Mirror pass for a player whose own position changed: recompute what
    /// they see and send entered/exited packets for the delta.
    fn refresh_viewer(&mut self, viewer_id: u32, pos: TilePos) {
        let mut now_visible: HashSet<EntityRef> = HashSet::new();
        for id in self.index.players_within(pos, ENTITY_VIEW_RADIUS) {
            if id != viewer_id {
                now_visible.insert(EntityRef::player(id));
            }
        }
        for id in self.index.npcs_within(pos, ENTITY_VIEW_RADIUS) {
            now_visible.insert(EntityRef::npc(id));
        }
        for id in self.index.items_within(pos, ITEM_VIEW_RADIUS) {
            now_visible.insert(EntityRef::ground_item(id));
        }
        for id in self.statics.within(pos, ENTITY_VIEW_RADIUS) {
            now_visible.insert(EntityRef::world_entity(id));
        }

        let before = self.viewer.visible_of(viewer_id);
        for entity in &before {
            if !now_visible.contains(entity) {
                self.hide_entity_from(viewer_id, *entity);
            }
        }
        let mut ordered: Vec<EntityRef> = now_visible.into_iter().collect();
        ordered.sort_unstable_by_key(|e| (e.kind as u8, e.id));
        for entity in ordered {
            self.show_entity_to(viewer_id, entity);
        }
    }

    /// Send to current watchers, and to the entity itself when it is a
    /// player.
    fn broadcast(&mut self, entity: EntityRef, packet: ServerPacket, include_self: bool) {
        for viewer_id in self.viewer.watchers_of(entity) {
            self.send(viewer_id, packet.clone());
        }
        if include_self && entity.kind == EntityKind::Player {
            self.send(entity.id, packet);
        }
    }
}

/// P9: drain the event bus in emission order and flush packets.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_game_events<'a>(
    registry: Res<Registry>,
    index: Res<SpatialIndex>,
    statics: Res<StaticEntityIndex>,
    sessions: Res<Sessions>,
    mut viewer: ResMut<ViewerState>,
    mut events: MessageReader<GameEvent>,
    mut senders: Query<'a, '_, &'a mut MessageSender<ServerPacket>>,
    players: VisPlayers,
    npcs: VisNpcs,
    items: Query<'a, '_, &'a GroundItemState>,
    world_entities: Query<'a, '_, &'a WorldEntityState>,
) {
    let mut vis = Vis {
        registry: &registry,
        index: &index,
        statics: &statics,
        sessions: &sessions,
        viewer: &mut viewer,
        senders: &mut senders,
        players: &players,
        npcs: &npcs,
        items: &items,
        world_entities: &world_entities,
    };

    for event in events.read() {
        match event.clone() {
            GameEvent::PlayerJoined { user_id } => {
                let Some(pos) = vis.index.player_pos(user_id) else {
                    continue;
                };
                let entity = EntityRef::player(user_id);
                for viewer_id in vis.viewers_around(pos, ENTITY_VIEW_RADIUS, Some(user_id)) {
                    vis.show_entity_to(viewer_id, entity);
                }
                vis.refresh_viewer(user_id, pos);
            }
            GameEvent::PlayerLeft { user_id, .. } => {
                let entity = EntityRef::player(user_id);
                let watchers = vis.viewer.remove_entity(entity);
                for viewer_id in watchers {
                    vis.send(viewer_id, Vis::exited_packet(entity));
                }
                vis.viewer.remove_viewer(user_id);
            }
            GameEvent::PlayerMoved { user_id, to, running, .. } => {
                let entity = EntityRef::player(user_id);
                vis.entity_repositioned(
                    entity,
                    to,
                    ServerPacket::EntityMoveTo {
                        kind: EntityKind::Player,
                        id: user_id,
                        x: to.x,
                        y: to.y,
                        running,
                    },
                );
                vis.send(
                    user_id,
                    ServerPacket::EntityMoveTo {
                        kind: EntityKind::Player,
                        id: user_id,
                        x: to.x,
                        y: to.y,
                        running,
                    },
                );
                vis.refresh_viewer(user_id, to);
            }
            GameEvent::PlayerTeleported { user_id, to, .. } => {
                let entity = EntityRef::player(user_id);
                vis.entity_repositioned(
                    entity,
                    to,
                    ServerPacket::TeleportTo { kind: EntityKind::Player, id: user_id, pos: to },
                );
                vis.send(
                    user_id,
                    ServerPacket::TeleportTo { kind: EntityKind::Player, id: user_id, pos: to },
                );
                vis.refresh_viewer(user_id, to);
            }
            GameEvent::PlayerWentThroughDoor { user_id, to, .. } => {
                let entity = EntityRef::player(user_id);
                let door_packet =
                    ServerPacket::WentThroughDoor { kind: EntityKind::Player, id: user_id, pos: to };
                let new_watchers = vis.viewers_around(to, ENTITY_VIEW_RADIUS, Some(user_id));
                let old_watchers = vis.viewer.watchers_of(entity);
                let (entered, persisting, exited) = partition_watchers(&new_watchers, &old_watchers);
                for viewer_id in entered {
                    vis.show_entity_to(viewer_id, entity);
                    vis.send(viewer_id, door_packet.clone());
                }
                for viewer_id in persisting {
                    vis.send(viewer_id, door_packet.clone());
                }
                for viewer_id in exited {
                    vis.hide_entity_from(viewer_id, entity);
                }
                vis.send(
                    user_id,
                    ServerPacket::EntityMoveTo {
                        kind: EntityKind::Player,
                        id: user_id,
                        x: to.x,
                        y: to.y,
                        running: false,
                    },
                );
                vis.send(user_id, door_packet);
                vis.refresh_viewer(user_id, to);
            }
            GameEvent::PlayerStateChanged { user_id, state } => {
                let entity = EntityRef::player(user_id);
                let packet = if state == PlayerStateKind::Idle {
                    ServerPacket::EnteredIdleState { kind: EntityKind::Player, id: user_id }
                } else {
                    ServerPacket::EntityStateChanged { kind: EntityKind::Player, id: user_id, state }
                };
                vis.broadcast(entity, packet, true);
            }
            GameEvent::PlayerEquipmentChanged { .. } => {
                // The wearer already got the per-slot packets; watchers pick
                // up appearance on their next entered-chunk snapshot.
            }
            GameEvent::PlayerDied { user_id, .. } => {
                vis.broadcast(EntityRef::player(user_id), ServerPacket::PlayerDied { user_id }, true);
            }
            GameEvent::NpcSpawned { npc_id } => {
                let Some(pos) = vis.index.npc_pos(npc_id) else {
                    continue;
                };
                let entity = EntityRef::npc(npc_id);
                for viewer_id in vis.viewers_around(pos, ENTITY_VIEW_RADIUS, None) {
                    vis.show_entity_to(viewer_id, entity);
                }
            }
            GameEvent::NpcDespawned { npc_id, .. } => {
                let entity = EntityRef::npc(npc_id);
                let watchers = vis.viewer.remove_entity(entity);
                for viewer_id in watchers {
                    vis.send(viewer_id, Vis::exited_packet(entity));
                }
            }
            GameEvent::NpcMoved { npc_id, to, .. } => {
                vis.entity_repositioned(
                    EntityRef::npc(npc_id),
                    to,
                    ServerPacket::EntityMoveTo {
                        kind: EntityKind::Npc,
                        id: npc_id,
                        x: to.x,
                        y: to.y,
                        running: false,
                    },
                );
            }
            GameEvent::NpcDied { .. } => {
                // Watchers saw the killing blow through EntityDamaged; the
                // despawn timer sends the exit.
            }
            GameEvent::ItemSpawned { ground_item_id } => {
                let entity = EntityRef::ground_item(ground_item_id);
                let Some(pos) = vis
                    .registry
                    .ground_items
                    .get(&ground_item_id)
                    .and_then(|e| vis.items.get(*e).ok())
                    .map(|i| i.pos)
                else {
                    continue;
                };
                for viewer_id in vis.viewers_around(pos, ITEM_VIEW_RADIUS, None) {
                    vis.show_entity_to(viewer_id, entity);
                }
            }
            GameEvent::ItemRemoved { ground_item_id, .. } => {
                let entity = EntityRef::ground_item(ground_item_id);
                let watchers = vis.viewer.remove_entity(entity);
                for viewer_id in watchers {
                    vis.send(viewer_id, Vis::exited_packet(entity));
                }
            }
            GameEvent::ItemBecameVisibleToAll { ground_item_id } => {
                let entity = EntityRef::ground_item(ground_item_id);
                let Some(pos) = vis
                    .registry
                    .ground_items
                    .get(&ground_item_id)
                    .and_then(|e| vis.items.get(*e).ok())
                    .map(|i| i.pos)
                else {
                    continue;
                };
                for viewer_id in vis.viewers_around(pos, ITEM_VIEW_RADIUS, None) {
                    vis.show_entity_to(viewer_id, entity);
                }
            }
            GameEvent::EntityDamaged { target, amount, hp_current, hp_max } => {
                vis.broadcast(
                    target,
                    ServerPacket::ShowDamage { kind: target.kind, id: target.id, amount },
                    true,
                );
                vis.broadcast(
                    target,
                    ServerPacket::HitpointsCurrentLevelChanged {
                        kind: target.kind,
                        id: target.id,
                        current: hp_current,
                        max: hp_max,
                    },
                    false,
                );
            }
            GameEvent::ProjectileFired { from, target, projectile_id } => {
                let packet = ServerPacket::FiredProjectile {
                    from_kind: from.kind,
                    from_id: from.id,
                    target_kind: target.kind,
                    target_id: target.id,
                    projectile_id,
                };
                let mut audience: Vec<u32> = vis.viewer.watchers_of(from);
                audience.extend(vis.viewer.watchers_of(target));
                if from.kind == EntityKind::Player {
                    audience.push(from.id);
                }
                if target.kind == EntityKind::Player {
                    audience.push(target.id);
                }
                audience.sort_unstable();
                audience.dedup();
                for viewer_id in audience {
                    vis.send(viewer_id, packet.clone());
                }
            }
            GameEvent::TargetingStarted { source, target } => {
                vis.broadcast(
                    source,
                    ServerPacket::StartedTargeting {
                        kind: source.kind,
                        id: source.id,
                        target_kind: target.kind,
                        target_id: target.id,
                    },
                    true,
                );
            }
            GameEvent::TargetingStopped { source } => {
                vis.broadcast(
                    source,
                    ServerPacket::StoppedTargeting { kind: source.kind, id: source.id },
                    true,
                );
            }
            GameEvent::PublicChat { user_id, message, style } => {
                vis.broadcast(
                    EntityRef::player(user_id),
                    ServerPacket::PlayerMessage { user_id, message, style },
                    true,
                );
            }
            GameEvent::ForcedSpeech { entity, message } => {
                vis.broadcast(
                    entity,
                    ServerPacket::ForcePublicMessage { kind: entity.kind, id: entity.id, message },
                    true,
                );
            }
            GameEvent::ResourcesExhausted { world_entity_id } => {
                vis.broadcast(
                    EntityRef::world_entity(world_entity_id),
                    ServerPacket::EntityExhaustedResources { world_entity_id },
                    false,
                );
            }
            GameEvent::ResourcesReplenished { world_entity_id } => {
                vis.broadcast(
                    EntityRef::world_entity(world_entity_id),
                    ServerPacket::EntityReplenishedResources { world_entity_id },
                    false,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_state_stays_symmetric() {
        let mut state = ViewerState::default();
        let npc = EntityRef::npc(7);
        let item = EntityRef::ground_item(3);
        state.add_pair(1, npc);
        state.add_pair(1, item);
        state.add_pair(2, npc);
        assert!(state.is_symmetric());
        assert_eq!(state.watchers_of(npc), vec![1, 2]);

        state.remove_pair(1, npc);
        assert!(state.is_symmetric());
        assert!(!state.sees(1, npc));
        assert!(state.sees(1, item));

        let watchers = state.remove_entity(npc);
        assert_eq!(watchers, vec![2]);
        assert!(state.is_symmetric());

        let seen = state.remove_viewer(1);
        assert_eq!(seen, vec![item]);
        assert!(state.is_symmetric());
        assert!(state.watchers_of(item).is_empty());
    }

    #[test]
    fn partition_splits_correctly() {
        let (entered, persisting, exited) = partition_watchers(&[2, 3, 4], &[1, 2, 3]);
        assert_eq!(entered, vec![4]);
        assert_eq!(persisting, vec![2, 3]);
        assert_eq!(exited, vec![1]);
    }

    #[test]
    fn partition_handles_disjoint_sets() {
        let (entered, persisting, exited) = partition_watchers(&[5], &[9]);
        assert_eq!(entered, vec![5]);
        assert!(persisting.is_empty());
        assert_eq!(exited, vec![9]);
    }

    #[test]
    fn no_duplicate_entered_without_exit() {
        // The entered path is guarded by `sees`, so a second enter for the
        // same (viewer, entity) pair is a no-op until an exit happens.
        let mut state = ViewerState::default();
        let npc = EntityRef::npc(1);
        state.add_pair(1, npc);
        assert!(state.sees(1, npc));
        state.remove_pair(1, npc);
        assert!(!state.sees(1, npc));
        state.add_pair(1, npc);
        assert!(state.sees(1, npc));
        assert!(state.is_symmetric());
    }
}
