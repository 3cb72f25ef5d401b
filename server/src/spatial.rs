//! Chunked spatial index over players, NPCs and ground items.
//!
//! A grid of coarse chunks per map level; each chunk keeps hashed id sets
//! per entity kind. Moves that stay inside a chunk are set-membership
//! no-ops; chunk crossings are one removal plus one insertion. The index
//! also owns the authoritative position of every indexed id, so radius
//! queries can filter candidates exactly.

use bevy::prelude::*;
use std::collections::{HashMap, HashSet};

use shared::tile::{chebyshev, MapLevel, TilePos};

/// Chunk edge length in tiles.
pub const CHUNK_SIZE: i32 = 8;

pub fn chunk_of(x: i32, y: i32) -> (i32, i32) {
    (x.div_euclid(CHUNK_SIZE), y.div_euclid(CHUNK_SIZE))
}

#[derive(Debug, Default)]
struct LevelIndex {
    players: HashMap<(i32, i32), HashSet<u32>>,
    npcs: HashMap<(i32, i32), HashSet<u32>>,
    items: HashMap<(i32, i32), HashSet<u32>>,
}

impl LevelIndex {
    fn sets(&mut self, kind: IndexKind) -> &mut HashMap<(i32, i32), HashSet<u32>> {
        match kind {
            IndexKind::Player => &mut self.players,
            IndexKind::Npc => &mut self.npcs,
            IndexKind::Item => &mut self.items,
        }
    }

    fn sets_ref(&self, kind: IndexKind) -> &HashMap<(i32, i32), HashSet<u32>> {
        match kind {
            IndexKind::Player => &self.players,
            IndexKind::Npc => &self.npcs,
            IndexKind::Item => &self.items,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Player,
    Npc,
    Item,
}

#[derive(Resource, Debug, Default)]
pub struct SpatialIndex {
    levels: [LevelIndex; 3],
    player_pos: HashMap<u32, TilePos>,
    npc_pos: HashMap<u32, TilePos>,
    item_pos: HashMap<u32, TilePos>,
}

impl SpatialIndex {
    fn insert(&mut self, kind: IndexKind, id: u32, pos: TilePos) {
        self.levels[pos.level.index()]
            .sets(kind)
            .entry(chunk_of(pos.x, pos.y))
            .or_default()
            .insert(id);
        match kind {
            IndexKind::Player => self.player_pos.insert(id, pos),
            IndexKind::Npc => self.npc_pos.insert(id, pos),
            IndexKind::Item => self.item_pos.insert(id, pos),
        };
    }

    fn remove(&mut self, kind: IndexKind, id: u32) -> Option<TilePos> {
        let pos = match kind {
            IndexKind::Player => self.player_pos.remove(&id),
            IndexKind::Npc => self.npc_pos.remove(&id),
            IndexKind::Item => self.item_pos.remove(&id),
        }?;
        let chunk = chunk_of(pos.x, pos.y);
        if let Some(set) = self.levels[pos.level.index()].sets(kind).get_mut(&chunk) {
            set.remove(&id);
            if set.is_empty() {
                self.levels[pos.level.index()].sets(kind).remove(&chunk);
            }
        }
        Some(pos)
    }

    fn relocate(&mut self, kind: IndexKind, id: u32, to: TilePos) {
        let old = match kind {
            IndexKind::Player => self.player_pos.get(&id).copied(),
            IndexKind::Npc => self.npc_pos.get(&id).copied(),
            IndexKind::Item => self.item_pos.get(&id).copied(),
        };
        if let Some(old) = old {
            if old.level == to.level && chunk_of(old.x, old.y) == chunk_of(to.x, to.y) {
                // Same chunk: only the position changes.
                match kind {
                    IndexKind::Player => self.player_pos.insert(id, to),
                    IndexKind::Npc => self.npc_pos.insert(id, to),
                    IndexKind::Item => self.item_pos.insert(id, to),
                };
                return;
            }
            self.remove(kind, id);
        }
        self.insert(kind, id, to);
    }

    fn within(
        &self,
        kind: IndexKind,
        center: TilePos,
        radius: u32,
        positions: &HashMap<u32, TilePos>,
    ) -> Vec<u32> {
        let r = radius as i32;
        let (min_cx, min_cy) = chunk_of(center.x - r, center.y - r);
        let (max_cx, max_cy) = chunk_of(center.x + r, center.y + r);
        let level = &self.levels[center.level.index()];
        let sets = level.sets_ref(kind);
        let mut out = Vec::new();
        for cx in min_cx..=max_cx {
            for cy in min_cy..=max_cy {
                let Some(ids) = sets.get(&(cx, cy)) else {
                    continue;
                };
                for id in ids {
                    if let Some(pos) = positions.get(id) {
                        if chebyshev(pos.xy(), center.xy()) <= radius {
                            out.push(*id);
                        }
                    }
                }
            }
        }
        out
    }

    // --- players ---

    pub fn insert_player(&mut self, user_id: u32, pos: TilePos) {
        self.insert(IndexKind::Player, user_id, pos);
    }

    pub fn remove_player(&mut self, user_id: u32) {
        self.remove(IndexKind::Player, user_id);
    }

    pub fn relocate_player(&mut self, user_id: u32, to: TilePos) {
        self.relocate(IndexKind::Player, user_id, to);
    }

    pub fn player_pos(&self, user_id: u32) -> Option<TilePos> {
        self.player_pos.get(&user_id).copied()
    }

    pub fn players_within(&self, center: TilePos, radius: u32) -> Vec<u32> {
        self.within(IndexKind::Player, center, radius, &self.player_pos)
    }

    // --- NPCs ---

    pub fn insert_npc(&mut self, npc_id: u32, pos: TilePos) {
        self.insert(IndexKind::Npc, npc_id, pos);
    }

    pub fn remove_npc(&mut self, npc_id: u32) {
        self.remove(IndexKind::Npc, npc_id);
    }

    pub fn relocate_npc(&mut self, npc_id: u32, to: TilePos) {
        self.relocate(IndexKind::Npc, npc_id, to);
    }

    pub fn npc_pos(&self, npc_id: u32) -> Option<TilePos> {
        self.npc_pos.get(&npc_id).copied()
    }

    pub fn npcs_within(&self, center: TilePos, radius: u32) -> Vec<u32> {
        self.within(IndexKind::Npc, center, radius, &self.npc_pos)
    }

    // --- ground items ---

    pub fn insert_item(&mut self, ground_item_id: u32, pos: TilePos) {
        self.insert(IndexKind::Item, ground_item_id, pos);
    }

    pub fn remove_item(&mut self, ground_item_id: u32) {
        self.remove(IndexKind::Item, ground_item_id);
    }

    pub fn items_within(&self, center: TilePos, radius: u32) -> Vec<u32> {
        self.within(IndexKind::Item, center, radius, &self.item_pos)
    }
}

/// Static world entities never move, so they live in a separate chunk map
/// built once at world load.
#[derive(Resource, Debug, Default)]
pub struct StaticEntityIndex {
    by_chunk: [HashMap<(i32, i32), Vec<u32>>; 3],
    pos: HashMap<u32, TilePos>,
}

impl StaticEntityIndex {
    pub fn insert(&mut self, world_entity_id: u32, pos: TilePos) {
        self.by_chunk[pos.level.index()]
            .entry(chunk_of(pos.x, pos.y))
            .or_default()
            .push(world_entity_id);
        self.pos.insert(world_entity_id, pos);
    }

    pub fn within(&self, center: TilePos, radius: u32) -> Vec<u32> {
        let r = radius as i32;
        let (min_cx, min_cy) = chunk_of(center.x - r, center.y - r);
        let (max_cx, max_cy) = chunk_of(center.x + r, center.y + r);
        let mut out = Vec::new();
        for cx in min_cx..=max_cx {
            for cy in min_cy..=max_cy {
                let Some(ids) = self.by_chunk[center.level.index()].get(&(cx, cy)) else {
                    continue;
                };
                for id in ids {
                    if let Some(pos) = self.pos.get(id) {
                        if chebyshev(pos.xy(), center.xy()) <= radius {
                            out.push(*id);
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: i32, y: i32) -> TilePos {
        TilePos::new(MapLevel::Overworld, x, y)
    }

    #[test]
    fn radius_query_filters_exactly() {
        let mut index = SpatialIndex::default();
        index.insert_player(1, at(0, 0));
        index.insert_player(2, at(10, 0));
        index.insert_player(3, at(16, 0));
        let mut near = index.players_within(at(0, 0), 10);
        near.sort_unstable();
        assert_eq!(near, vec![1, 2]);
    }

    #[test]
    fn relocate_across_chunks_and_levels() {
        let mut index = SpatialIndex::default();
        index.insert_npc(7, at(0, 0));
        index.relocate_npc(7, at(100, 100));
        assert!(index.npcs_within(at(0, 0), 15).is_empty());
        assert_eq!(index.npcs_within(at(100, 100), 0), vec![7]);

        index.relocate_npc(7, TilePos::new(MapLevel::Underground, 100, 100));
        assert!(index.npcs_within(at(100, 100), 15).is_empty());
        assert_eq!(
            index.npcs_within(TilePos::new(MapLevel::Underground, 100, 100), 0),
            vec![7]
        );
    }

    #[test]
    fn same_chunk_move_keeps_membership() {
        let mut index = SpatialIndex::default();
        index.insert_player(1, at(0, 0));
        index.relocate_player(1, at(1, 1));
        assert_eq!(index.player_pos(1), Some(at(1, 1)));
        assert_eq!(index.players_within(at(1, 1), 0), vec![1]);
    }

    #[test]
    fn removal_clears_queries() {
        let mut index = SpatialIndex::default();
        index.insert_item(5, at(3, 3));
        assert_eq!(index.items_within(at(3, 3), 1), vec![5]);
        index.remove_item(5);
        assert!(index.items_within(at(3, 3), 1).is_empty());
    }
}
