//! The wilderness: region tags where PvP is permitted, with a depth-scaled
//! level that bounds the combat-level gap of a legal attack.

use bevy::prelude::*;

use shared::tile::{MapLevel, TilePos};

#[derive(Debug, Clone)]
pub struct WildernessArea {
    pub level: MapLevel,
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    /// Depth grows northward: one wilderness level per this many tiles.
    pub tiles_per_level: i32,
}

#[derive(Resource, Debug, Clone)]
pub struct WildernessMap {
    areas: Vec<WildernessArea>,
}

impl Default for WildernessMap {
    fn default() -> Self {
        Self {
            areas: vec![WildernessArea {
                level: MapLevel::Overworld,
                min_x: 0,
                max_x: 255,
                min_y: 80,
                tiles_per_level: 6,
            }],
        }
    }
}

impl WildernessMap {
    /// Wilderness level at a tile; `None` outside the wilderness.
    pub fn level_at(&self, pos: TilePos) -> Option<u32> {
        for area in &self.areas {
            if area.level == pos.level
                && pos.x >= area.min_x
                && pos.x <= area.max_x
                && pos.y >= area.min_y
            {
                let depth = (pos.y - area.min_y) / area.tiles_per_level.max(1);
                return Some(1 + depth as u32);
            }
        }
        None
    }

    /// Whether `attacker` may attack `defender` here: both in the
    /// wilderness, and the combat-level gap within the shallower side's
    /// wilderness level.
    pub fn can_attack(
        &self,
        attacker_pos: TilePos,
        attacker_combat: u8,
        defender_pos: TilePos,
        defender_combat: u8,
    ) -> bool {
        let (Some(a), Some(d)) = (self.level_at(attacker_pos), self.level_at(defender_pos)) else {
            return false;
        };
        let allowance = a.min(d);
        let gap = (attacker_combat as i32 - defender_combat as i32).unsigned_abs();
        gap <= allowance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32) -> TilePos {
        TilePos::new(MapLevel::Overworld, 10, y)
    }

    #[test]
    fn outside_the_boundary_is_safe() {
        let map = WildernessMap::default();
        assert_eq!(map.level_at(at(79)), None);
        assert_eq!(map.level_at(at(80)), Some(1));
        assert_eq!(map.level_at(at(92)), Some(3));
    }

    #[test]
    fn combat_gap_scales_with_depth() {
        let map = WildernessMap::default();
        // Level 1 wilderness: gap of 1 allowed, 2 not.
        assert!(map.can_attack(at(80), 10, at(80), 11));
        assert!(!map.can_attack(at(80), 10, at(80), 12));
        // Deeper in, the same gap is fine.
        assert!(map.can_attack(at(92), 10, at(92), 13));
        // One side out of the wilderness: never.
        assert!(!map.can_attack(at(79), 10, at(80), 10));
    }
}
