//! Directional-blocking pathing grid and line-of-sight queries.
//!
//! One grid per map level. Every tile carries a byte of edge-blocking flags
//! (bit `i` = the edge toward `PathingDirection::ALL[i]` is blocked) plus a
//! parallel projectile-blocking bitset used for line-of-sight checks. The
//! special value [`FULLY_BLOCKED`] marks an impassable tile that also blocks
//! projectiles.
//!
//! Grids are baked offline by `tools/grid_baker` from a heightmap PNG plus
//! world-entity placements, and loaded by the server at startup as a small
//! bincode file per level.

use serde::{Deserialize, Serialize};

use crate::tile::{MapLevel, PathingDirection};

/// All edges blocked, tile impassable, line of sight blocked.
pub const FULLY_BLOCKED: u8 = 0xFF;

/// Per-level tile grid of directional blocking flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathingGrid {
    level: MapLevel,
    width: u32,
    height: u32,
    /// Row-major edge-blocking flags, one byte per tile.
    tiles: Vec<u8>,
    /// Row-major projectile-blocking bitset, one bit per tile.
    projectile: Vec<u8>,
}

impl PathingGrid {
    pub fn new(level: MapLevel, width: u32, height: u32) -> Self {
        let len = (width as usize) * (height as usize);
        Self {
            level,
            width,
            height,
            tiles: vec![0; len],
            projectile: vec![0; len.div_ceil(8)],
        }
    }

    pub fn level(&self) -> MapLevel {
        self.level
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn idx(&self, x: i32, y: i32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Edge flags at a tile. Out-of-bounds reads as fully blocked, so border
    /// handling needs no special cases in callers.
    pub fn flags_at(&self, x: i32, y: i32) -> u8 {
        if !self.in_bounds(x, y) {
            return FULLY_BLOCKED;
        }
        self.tiles[self.idx(x, y)]
    }

    pub fn is_fully_blocked(&self, x: i32, y: i32) -> bool {
        self.flags_at(x, y) == FULLY_BLOCKED
    }

    pub fn set_flags(&mut self, x: i32, y: i32, flags: u8) {
        if self.in_bounds(x, y) {
            let i = self.idx(x, y);
            self.tiles[i] = flags;
        }
    }

    /// Block the edge leaving `(x, y)` toward `dir` and the reciprocal edge
    /// of the neighbour, so walkability stays symmetric.
    pub fn block_edge(&mut self, x: i32, y: i32, dir: PathingDirection) {
        if self.in_bounds(x, y) {
            let i = self.idx(x, y);
            self.tiles[i] |= dir.bit();
        }
        let (dx, dy) = dir.delta();
        let (nx, ny) = (x + dx, y + dy);
        if self.in_bounds(nx, ny) {
            let i = self.idx(nx, ny);
            self.tiles[i] |= dir.opposite().bit();
        }
    }

    pub fn unblock_edge(&mut self, x: i32, y: i32, dir: PathingDirection) {
        if self.in_bounds(x, y) {
            let i = self.idx(x, y);
            self.tiles[i] &= !dir.bit();
        }
        let (dx, dy) = dir.delta();
        let (nx, ny) = (x + dx, y + dy);
        if self.in_bounds(nx, ny) {
            let i = self.idx(nx, ny);
            self.tiles[i] &= !dir.opposite().bit();
        }
    }

    pub fn set_fully_blocked(&mut self, x: i32, y: i32) {
        self.set_flags(x, y, FULLY_BLOCKED);
        // Neighbours cannot step onto this tile either.
        for dir in PathingDirection::ALL {
            let (dx, dy) = dir.delta();
            let (nx, ny) = (x + dx, y + dy);
            if self.in_bounds(nx, ny) {
                let i = self.idx(nx, ny);
                self.tiles[i] |= dir.opposite().bit();
            }
        }
    }

    pub fn blocks_projectiles(&self, x: i32, y: i32) -> bool {
        if !self.in_bounds(x, y) {
            return true;
        }
        if self.is_fully_blocked(x, y) {
            return true;
        }
        let i = self.idx(x, y);
        self.projectile[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn set_projectile_blocked(&mut self, x: i32, y: i32, blocked: bool) {
        if !self.in_bounds(x, y) {
            return;
        }
        let i = self.idx(x, y);
        if blocked {
            self.projectile[i / 8] |= 1 << (i % 8);
        } else {
            self.projectile[i / 8] &= !(1 << (i % 8));
        }
    }

    /// The edge leaving `(x, y)` toward `dir` is blocked, or the destination
    /// tile is impassable.
    pub fn is_edge_blocked(&self, x: i32, y: i32, dir: PathingDirection) -> bool {
        if self.flags_at(x, y) & dir.bit() != 0 {
            return true;
        }
        let (dx, dy) = dir.delta();
        self.is_fully_blocked(x + dx, y + dy)
    }

    /// Full step rule used by A*: the edge must be open, and a diagonal step
    /// additionally requires both cardinal components open and both
    /// intermediate tiles passable (no corner cutting).
    pub fn can_step(&self, x: i32, y: i32, dir: PathingDirection) -> bool {
        if self.is_edge_blocked(x, y, dir) {
            return false;
        }
        if dir.is_diagonal() {
            for card in dir.components() {
                if self.is_edge_blocked(x, y, card) {
                    return false;
                }
            }
        }
        true
    }

    /// Relaxed step rule used by greedy pursuit: edge open, destination
    /// passable, no corner-cut check.
    pub fn can_step_relaxed(&self, x: i32, y: i32, dir: PathingDirection) -> bool {
        !self.is_edge_blocked(x, y, dir)
    }

    /// Line of sight along the projectile layer between two tiles. Walks a
    /// Bresenham line; intermediate tiles must not block projectiles. The
    /// endpoints themselves are not tested.
    pub fn has_line_of_sight(&self, from: (i32, i32), to: (i32, i32)) -> bool {
        let (mut x, mut y) = from;
        let (tx, ty) = to;
        let dx = (tx - x).abs();
        let dy = (ty - y).abs();
        let sx = (tx - x).signum();
        let sy = (ty - y).signum();
        let mut err = dx - dy;
        loop {
            if (x, y) != from && (x, y) != to && self.blocks_projectiles(x, y) {
                return false;
            }
            if (x, y) == (tx, ty) {
                return true;
            }
            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
    }
}

/// On-disk form of one level's baked grid.
#[derive(Serialize, Deserialize)]
pub struct BakedGrid {
    pub grid: PathingGrid,
}

impl BakedGrid {
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(self).map_err(|e| format!("Serialize error: {}", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        bincode::deserialize(bytes).map_err(|e| format!("Deserialize error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_grid() -> PathingGrid {
        PathingGrid::new(MapLevel::Overworld, 16, 16)
    }

    #[test]
    fn out_of_bounds_is_fully_blocked() {
        let grid = open_grid();
        assert_eq!(grid.flags_at(-1, 0), FULLY_BLOCKED);
        assert_eq!(grid.flags_at(0, 16), FULLY_BLOCKED);
        assert!(grid.blocks_projectiles(99, 99));
    }

    #[test]
    fn edge_blocking_is_reciprocal() {
        let mut grid = open_grid();
        grid.block_edge(5, 5, PathingDirection::East);
        assert!(grid.is_edge_blocked(5, 5, PathingDirection::East));
        assert!(grid.is_edge_blocked(6, 5, PathingDirection::West));
        assert!(!grid.is_edge_blocked(5, 5, PathingDirection::West));
        grid.unblock_edge(5, 5, PathingDirection::East);
        assert!(!grid.is_edge_blocked(6, 5, PathingDirection::West));
    }

    #[test]
    fn diagonal_step_refused_when_cardinal_blocked() {
        let mut grid = open_grid();
        grid.block_edge(5, 5, PathingDirection::North);
        assert!(!grid.can_step(5, 5, PathingDirection::NorthEast));
        assert!(grid.can_step(5, 5, PathingDirection::East));
        // The relaxed rule ignores the corner.
        assert!(grid.can_step_relaxed(5, 5, PathingDirection::NorthEast));
    }

    #[test]
    fn diagonal_step_refused_when_intermediate_tile_solid() {
        let mut grid = open_grid();
        grid.set_fully_blocked(6, 5);
        assert!(!grid.can_step(5, 5, PathingDirection::NorthEast));
    }

    #[test]
    fn fully_blocked_tile_blocks_entry_from_all_sides() {
        let mut grid = open_grid();
        grid.set_fully_blocked(5, 5);
        for dir in PathingDirection::ALL {
            let (dx, dy) = dir.delta();
            assert!(grid.is_edge_blocked(5 + dx, 5 + dy, dir.opposite()));
        }
    }

    #[test]
    fn line_of_sight_stops_at_projectile_blocker() {
        let mut grid = open_grid();
        assert!(grid.has_line_of_sight((0, 0), (8, 0)));
        grid.set_projectile_blocked(4, 0, true);
        assert!(!grid.has_line_of_sight((0, 0), (8, 0)));
        // Endpoints are exempt.
        assert!(grid.has_line_of_sight((4, 0), (5, 0)));
    }

    #[test]
    fn baked_round_trip() {
        let mut grid = open_grid();
        grid.set_fully_blocked(3, 3);
        grid.set_projectile_blocked(2, 2, true);
        let baked = BakedGrid { grid };
        let bytes = baked.to_bytes().unwrap();
        let loaded = BakedGrid::from_bytes(&bytes).unwrap();
        assert!(loaded.grid.is_fully_blocked(3, 3));
        assert!(loaded.grid.blocks_projectiles(2, 2));
    }
}
