//! Tile-grid math shared by the server and the grid baker.
//!
//! All simulation positions are integer tiles on one of a small set of map
//! levels. Distances between tiles are Chebyshev unless a function says
//! otherwise.

use serde::{Deserialize, Serialize};

/// Vertical layer of the world. Each level has its own bounded tile extent
/// and its own pathing grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MapLevel {
    #[default]
    Overworld,
    Sky,
    Underground,
}

impl MapLevel {
    pub const ALL: [MapLevel; 3] = [MapLevel::Overworld, MapLevel::Sky, MapLevel::Underground];

    /// Dense index, usable as an array key.
    pub fn index(self) -> usize {
        match self {
            MapLevel::Overworld => 0,
            MapLevel::Sky => 1,
            MapLevel::Underground => 2,
        }
    }

    /// File stem of this level's baked grid asset.
    pub fn asset_stem(self) -> &'static str {
        match self {
            MapLevel::Overworld => "overworld",
            MapLevel::Sky => "sky",
            MapLevel::Underground => "underground",
        }
    }
}

/// A tile position: map level plus integer grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TilePos {
    pub level: MapLevel,
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(level: MapLevel, x: i32, y: i32) -> Self {
        Self { level, x, y }
    }

    pub fn xy(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Chebyshev distance; `u32::MAX` when the levels differ so callers can
    /// compare against radii without a separate level check.
    pub fn chebyshev_distance(&self, other: &TilePos) -> u32 {
        if self.level != other.level {
            return u32::MAX;
        }
        chebyshev(self.xy(), other.xy())
    }

    pub fn euclidean_sq(&self, other: &TilePos) -> i64 {
        euclidean_sq(self.xy(), other.xy())
    }

    /// Shares an edge with `other` (same level, distance exactly one cardinal
    /// step).
    pub fn is_cardinally_adjacent(&self, other: &TilePos) -> bool {
        self.level == other.level && cardinally_adjacent(self.xy(), other.xy())
    }

    pub fn offset(&self, dx: i32, dy: i32) -> TilePos {
        TilePos::new(self.level, self.x + dx, self.y + dy)
    }

    pub fn step(&self, dir: PathingDirection) -> TilePos {
        let (dx, dy) = dir.delta();
        self.offset(dx, dy)
    }
}

pub fn chebyshev(a: (i32, i32), b: (i32, i32)) -> u32 {
    (a.0 - b.0).unsigned_abs().max((a.1 - b.1).unsigned_abs())
}

pub fn euclidean_sq(a: (i32, i32), b: (i32, i32)) -> i64 {
    let dx = (a.0 - b.0) as i64;
    let dy = (a.1 - b.1) as i64;
    dx * dx + dy * dy
}

pub fn cardinally_adjacent(a: (i32, i32), b: (i32, i32)) -> bool {
    (a.0 - b.0).abs() + (a.1 - b.1).abs() == 1
}

/// The eight step directions. The discriminant order is the bit order of the
/// per-tile edge-blocking flags: bit `i` set means the edge toward
/// `PathingDirection::ALL[i]` is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PathingDirection {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

impl PathingDirection {
    pub const ALL: [PathingDirection; 8] = [
        PathingDirection::North,
        PathingDirection::NorthEast,
        PathingDirection::East,
        PathingDirection::SouthEast,
        PathingDirection::South,
        PathingDirection::SouthWest,
        PathingDirection::West,
        PathingDirection::NorthWest,
    ];

    pub const CARDINALS: [PathingDirection; 4] = [
        PathingDirection::North,
        PathingDirection::East,
        PathingDirection::South,
        PathingDirection::West,
    ];

    /// North is +y.
    pub fn delta(self) -> (i32, i32) {
        match self {
            PathingDirection::North => (0, 1),
            PathingDirection::NorthEast => (1, 1),
            PathingDirection::East => (1, 0),
            PathingDirection::SouthEast => (1, -1),
            PathingDirection::South => (0, -1),
            PathingDirection::SouthWest => (-1, -1),
            PathingDirection::West => (-1, 0),
            PathingDirection::NorthWest => (-1, 1),
        }
    }

    pub fn from_delta(dx: i32, dy: i32) -> Option<PathingDirection> {
        Some(match (dx.signum(), dy.signum()) {
            (0, 1) => PathingDirection::North,
            (1, 1) => PathingDirection::NorthEast,
            (1, 0) => PathingDirection::East,
            (1, -1) => PathingDirection::SouthEast,
            (0, -1) => PathingDirection::South,
            (-1, -1) => PathingDirection::SouthWest,
            (-1, 0) => PathingDirection::West,
            (-1, 1) => PathingDirection::NorthWest,
            _ => return None,
        })
    }

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn opposite(self) -> PathingDirection {
        match self {
            PathingDirection::North => PathingDirection::South,
            PathingDirection::NorthEast => PathingDirection::SouthWest,
            PathingDirection::East => PathingDirection::West,
            PathingDirection::SouthEast => PathingDirection::NorthWest,
            PathingDirection::South => PathingDirection::North,
            PathingDirection::SouthWest => PathingDirection::NorthEast,
            PathingDirection::West => PathingDirection::East,
            PathingDirection::NorthWest => PathingDirection::SouthEast,
        }
    }

    pub fn is_diagonal(self) -> bool {
        let (dx, dy) = self.delta();
        dx != 0 && dy != 0
    }

    /// The two cardinal components of a diagonal step, used by the
    /// corner-cut check. Cardinals return themselves twice.
    pub fn components(self) -> [PathingDirection; 2] {
        match self {
            PathingDirection::NorthEast => [PathingDirection::North, PathingDirection::East],
            PathingDirection::SouthEast => [PathingDirection::South, PathingDirection::East],
            PathingDirection::SouthWest => [PathingDirection::South, PathingDirection::West],
            PathingDirection::NorthWest => [PathingDirection::North, PathingDirection::West],
            other => [other, other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chebyshev_is_max_of_axes() {
        assert_eq!(chebyshev((0, 0), (3, -5)), 5);
        assert_eq!(chebyshev((2, 2), (2, 2)), 0);
    }

    #[test]
    fn cross_level_distance_is_max() {
        let a = TilePos::new(MapLevel::Overworld, 0, 0);
        let b = TilePos::new(MapLevel::Underground, 0, 0);
        assert_eq!(a.chebyshev_distance(&b), u32::MAX);
    }

    #[test]
    fn direction_bits_are_distinct() {
        let mut seen = 0u8;
        for dir in PathingDirection::ALL {
            assert_eq!(seen & dir.bit(), 0);
            seen |= dir.bit();
        }
        assert_eq!(seen, 0xFF);
    }

    #[test]
    fn diagonal_components_are_its_cardinals() {
        let [a, b] = PathingDirection::NorthEast.components();
        assert_eq!(a, PathingDirection::North);
        assert_eq!(b, PathingDirection::East);
        let [c, d] = PathingDirection::South.components();
        assert_eq!(c, PathingDirection::South);
        assert_eq!(d, PathingDirection::South);
    }

    #[test]
    fn opposite_round_trips() {
        for dir in PathingDirection::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
            let (dx, dy) = dir.delta();
            let (ox, oy) = dir.opposite().delta();
            assert_eq!((dx, dy), (-ox, -oy));
        }
    }
}
