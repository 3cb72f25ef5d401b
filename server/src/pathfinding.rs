//! A* search over the pathing grids, the adjacency/range goal variants, and
//! the one-tile greedy pursuit step.
//!
//! The searcher keeps reusable scratch buffers (g/f/parent arrays plus a
//! touched-index list) sized to the largest grid, so repeated searches never
//! reallocate. The binary heap may hold stale duplicates; entries whose g
//! score no longer matches are skipped when popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy::prelude::*;

use shared::pathing::PathingGrid;
use shared::tile::{cardinally_adjacent, chebyshev, euclidean_sq, PathingDirection};

/// Cardinal step cost; the heuristic is Euclidean distance scaled by this.
pub const CARDINAL_COST: u32 = 2;
pub const DIAGONAL_COST: u32 = 3;

/// Safety cap per search. Radius limits bound most searches well below it.
const MAX_EXPANDED_NODES: usize = 20_000;

#[derive(Clone, Copy, Debug)]
struct OpenNode {
    f: u32,
    g: u32,
    idx: u32,
}

impl Eq for OpenNode {}
impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.idx == other.idx
    }
}
impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior; index tiebreak keeps pops stable.
        other.f.cmp(&self.f).then_with(|| other.idx.cmp(&self.idx))
    }
}
impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct PathScratch {
    g: Vec<u32>,
    parent: Vec<u32>,
    closed: Vec<bool>,
    touched: Vec<u32>,
    heap: BinaryHeap<OpenNode>,
}

impl PathScratch {
    fn prepare(&mut self, len: usize) {
        if self.g.len() < len {
            self.g.resize(len, u32::MAX);
            self.parent.resize(len, u32::MAX);
            self.closed.resize(len, false);
        }
        for idx in self.touched.drain(..) {
            let i = idx as usize;
            self.g[i] = u32::MAX;
            self.parent[i] = u32::MAX;
            self.closed[i] = false;
        }
        self.heap.clear();
    }
}

/// The shared searcher. One per world; all searches in a tick borrow it in
/// turn, which is fine because the core is single-threaded.
#[derive(Resource, Debug, Default)]
pub struct Pathfinder {
    scratch: PathScratch,
}

/// Result of a greedy pursuit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreedyStep {
    /// Already cardinally adjacent; no step wanted.
    Stay,
    Step((i32, i32)),
    /// No acceptable step this tick.
    Blocked,
}

fn heuristic(from: (i32, i32), goals: &[(i32, i32)]) -> u32 {
    goals
        .iter()
        .map(|g| ((euclidean_sq(from, *g) as f64).sqrt() * CARDINAL_COST as f64) as u32)
        .min()
        .unwrap_or(0)
}

impl Pathfinder {
    /// Multi-goal A*. Returns the tile path starting at `start`, or `None`
    /// when no goal is reachable. `max_radius` discards any tile farther
    /// than that Chebyshev distance from `start`.
    pub fn astar(
        &mut self,
        grid: &PathingGrid,
        start: (i32, i32),
        goals: &[(i32, i32)],
        max_radius: Option<u32>,
    ) -> Option<Vec<(i32, i32)>> {
        if goals.is_empty() || !grid.in_bounds(start.0, start.1) {
            return None;
        }
        if goals.contains(&start) {
            return Some(vec![start]);
        }
        if let Some(r) = max_radius {
            if goals.iter().all(|g| chebyshev(start, *g) > r) {
                return None;
            }
        }

        let width = grid.width() as i32;
        let len = (grid.width() * grid.height()) as usize;
        let to_idx = |x: i32, y: i32| (y * width + x) as u32;
        let to_xy = |idx: u32| ((idx as i32) % width, (idx as i32) / width);

        let scratch = &mut self.scratch;
        scratch.prepare(len);

        let start_idx = to_idx(start.0, start.1);
        scratch.g[start_idx as usize] = 0;
        scratch.touched.push(start_idx);
        scratch.heap.push(OpenNode {
            f: heuristic(start, goals),
            g: 0,
            idx: start_idx,
        });

        let mut expanded = 0usize;
        while let Some(node) = scratch.heap.pop() {
            let idx = node.idx as usize;
            // Stale duplicate: a cheaper route to this tile was found after
            // this entry was pushed.
            if node.g != scratch.g[idx] || scratch.closed[idx] {
                continue;
            }
            scratch.closed[idx] = true;
            expanded += 1;
            if expanded > MAX_EXPANDED_NODES {
                return None;
            }

            let (x, y) = to_xy(node.idx);
            if goals.contains(&(x, y)) {
                return Some(Self::reconstruct(scratch, start_idx, node.idx, to_xy));
            }

            for dir in PathingDirection::ALL {
                if !grid.can_step(x, y, dir) {
                    continue;
                }
                let (dx, dy) = dir.delta();
                let (nx, ny) = (x + dx, y + dy);
                if let Some(r) = max_radius {
                    if chebyshev(start, (nx, ny)) > r {
                        continue;
                    }
                }
                let step_cost = if dir.is_diagonal() { DIAGONAL_COST } else { CARDINAL_COST };
                let tentative = node.g.saturating_add(step_cost);
                let nidx = to_idx(nx, ny) as usize;
                if tentative < scratch.g[nidx] {
                    if scratch.g[nidx] == u32::MAX {
                        scratch.touched.push(nidx as u32);
                    }
                    scratch.g[nidx] = tentative;
                    scratch.parent[nidx] = node.idx;
                    scratch.heap.push(OpenNode {
                        f: tentative.saturating_add(heuristic((nx, ny), goals)),
                        g: tentative,
                        idx: nidx as u32,
                    });
                }
            }
        }
        None
    }

    fn reconstruct(
        scratch: &PathScratch,
        start_idx: u32,
        goal_idx: u32,
        to_xy: impl Fn(u32) -> (i32, i32),
    ) -> Vec<(i32, i32)> {
        let mut path = Vec::new();
        let mut cur = goal_idx;
        loop {
            path.push(to_xy(cur));
            if cur == start_idx {
                break;
            }
            cur = scratch.parent[cur as usize];
        }
        path.reverse();
        path
    }

    pub fn path_to(
        &mut self,
        grid: &PathingGrid,
        start: (i32, i32),
        goal: (i32, i32),
        max_radius: Option<u32>,
    ) -> Option<Vec<(i32, i32)>> {
        self.astar(grid, start, &[goal], max_radius)
    }

    /// A* accepting any cardinally-adjacent walkable tile of `target` as the
    /// goal, for entities that cannot be stood on.
    pub fn path_adjacent(
        &mut self,
        grid: &PathingGrid,
        start: (i32, i32),
        target: (i32, i32),
        max_radius: Option<u32>,
    ) -> Option<Vec<(i32, i32)>> {
        let goals = adjacent_walkable(grid, target, true);
        self.astar(grid, start, &goals, max_radius)
    }

    /// Enumerates the neighbours of `target` (4 cardinal-only for door-like
    /// entities, 8 otherwise), partitions them into has-LOS / no-LOS toward
    /// the target, sorts each partition by Euclidean distance from `start`,
    /// and returns the first successful A* among them.
    pub fn path_adjacent_with_los_preference(
        &mut self,
        grid: &PathingGrid,
        start: (i32, i32),
        target: (i32, i32),
        cardinal_only: bool,
        max_radius: Option<u32>,
    ) -> Option<Vec<(i32, i32)>> {
        let neighbours = adjacent_walkable(grid, target, cardinal_only);
        let (mut with_los, mut without_los): (Vec<_>, Vec<_>) = neighbours
            .into_iter()
            .partition(|n| grid.has_line_of_sight(*n, target));
        with_los.sort_by_key(|n| euclidean_sq(start, *n));
        without_los.sort_by_key(|n| euclidean_sq(start, *n));
        for goal in with_los.into_iter().chain(without_los) {
            if let Some(path) = self.path_to(grid, start, goal, max_radius) {
                return Some(path);
            }
        }
        None
    }

    /// Path to any walkable tile within Chebyshev `range` of `target`, LOS
    /// tiles preferred, used for the ranged-combat approach.
    pub fn path_within_range(
        &mut self,
        grid: &PathingGrid,
        start: (i32, i32),
        target: (i32, i32),
        range: u32,
        require_los: bool,
        max_radius: Option<u32>,
    ) -> Option<Vec<(i32, i32)>> {
        let r = range as i32;
        let mut with_los = Vec::new();
        let mut without_los = Vec::new();
        for dx in -r..=r {
            for dy in -r..=r {
                let tile = (target.0 + dx, target.1 + dy);
                if tile == target || grid.is_fully_blocked(tile.0, tile.1) {
                    continue;
                }
                if grid.has_line_of_sight(tile, target) {
                    with_los.push(tile);
                } else if !require_los {
                    without_los.push(tile);
                }
            }
        }
        with_los.sort_by_key(|n| euclidean_sq(start, *n));
        without_los.sort_by_key(|n| euclidean_sq(start, *n));
        if let Some(path) = self.astar(grid, start, &with_los, max_radius) {
            return Some(path);
        }
        if without_los.is_empty() {
            return None;
        }
        self.astar(grid, start, &without_los, max_radius)
    }
}

/// Walkable neighbours of a tile, cardinal-only or all eight.
fn adjacent_walkable(grid: &PathingGrid, target: (i32, i32), cardinal_only: bool) -> Vec<(i32, i32)> {
    let dirs: &[PathingDirection] = if cardinal_only {
        &PathingDirection::CARDINALS
    } else {
        &PathingDirection::ALL
    };
    dirs.iter()
        .map(|d| {
            let (dx, dy) = d.delta();
            (target.0 + dx, target.1 + dy)
        })
        .filter(|(x, y)| grid.in_bounds(*x, *y) && !grid.is_fully_blocked(*x, *y))
        .collect()
}

/// One pursuit step toward cardinal adjacency with `target`, under the
/// relaxed rules (no corner-cut check): the classic dumb chase.
pub fn greedy_step_toward_adjacent(
    grid: &PathingGrid,
    from: (i32, i32),
    target: (i32, i32),
) -> GreedyStep {
    if cardinally_adjacent(from, target) {
        return GreedyStep::Stay;
    }
    let dx = target.0 - from.0;
    let dy = target.1 - from.1;
    let sx = dx.signum();
    let sy = dy.signum();

    let mut candidates: Vec<(i32, i32)> = Vec::with_capacity(3);
    if sx != 0 && sy != 0 {
        // Diagonal first, then the dominant axis.
        candidates.push((sx, sy));
        if dx.abs() >= dy.abs() {
            candidates.push((sx, 0));
            candidates.push((0, sy));
        } else {
            candidates.push((0, sy));
            candidates.push((sx, 0));
        }
    } else if sx != 0 {
        candidates.push((sx, 0));
        candidates.push((sx, 1));
        candidates.push((sx, -1));
    } else {
        candidates.push((0, sy));
        candidates.push((1, sy));
        candidates.push((-1, sy));
    }

    // A diagonal that lands cardinally adjacent to the target wins outright.
    candidates.sort_by_key(|(cx, cy)| {
        let lands_adjacent = cardinally_adjacent((from.0 + cx, from.1 + cy), target);
        let diagonal = *cx != 0 && *cy != 0;
        match (lands_adjacent, diagonal) {
            (true, true) => 0,
            (true, false) => 1,
            _ => 2,
        }
    });

    for (cx, cy) in candidates {
        let Some(dir) = PathingDirection::from_delta(cx, cy) else {
            continue;
        };
        if grid.can_step_relaxed(from.0, from.1, dir) {
            return GreedyStep::Step((from.0 + cx, from.1 + cy));
        }
    }
    GreedyStep::Blocked
}

/// Up to `max_steps` greedy steps toward `target`, for the per-tick follow
/// path (one step walking, two sprinting).
pub fn greedy_path_toward_adjacent(
    grid: &PathingGrid,
    from: (i32, i32),
    target: (i32, i32),
    max_steps: u32,
) -> Vec<(i32, i32)> {
    let mut path = vec![from];
    let mut cur = from;
    for _ in 0..max_steps {
        match greedy_step_toward_adjacent(grid, cur, target) {
            GreedyStep::Step(next) => {
                path.push(next);
                cur = next;
            }
            GreedyStep::Stay | GreedyStep::Blocked => break,
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::tile::MapLevel;

    fn open_grid() -> PathingGrid {
        PathingGrid::new(MapLevel::Overworld, 32, 32)
    }

    fn path_cost(path: &[(i32, i32)]) -> u32 {
        path.windows(2)
            .map(|w| {
                let diag = w[0].0 != w[1].0 && w[0].1 != w[1].1;
                if diag { DIAGONAL_COST } else { CARDINAL_COST }
            })
            .sum()
    }

    #[test]
    fn straight_line_path() {
        let grid = open_grid();
        let mut pf = Pathfinder::default();
        let path = pf.path_to(&grid, (0, 0), (5, 0), None).unwrap();
        assert_eq!(path.first(), Some(&(0, 0)));
        assert_eq!(path.last(), Some(&(5, 0)));
        assert_eq!(path_cost(&path), 5 * CARDINAL_COST);
    }

    #[test]
    fn diagonal_is_cheaper_than_staircase() {
        let grid = open_grid();
        let mut pf = Pathfinder::default();
        let path = pf.path_to(&grid, (0, 0), (4, 4), None).unwrap();
        assert_eq!(path_cost(&path), 4 * DIAGONAL_COST);
    }

    #[test]
    fn zero_radius_only_reaches_start() {
        let grid = open_grid();
        let mut pf = Pathfinder::default();
        assert!(pf.path_to(&grid, (3, 3), (4, 3), Some(0)).is_none());
        let path = pf.path_to(&grid, (3, 3), (3, 3), Some(0)).unwrap();
        assert_eq!(path, vec![(3, 3)]);
    }

    #[test]
    fn walls_force_a_detour() {
        let mut grid = open_grid();
        // Vertical wall at x = 5, y in 0..=10, with a gap at y = 10.
        for y in 0..10 {
            grid.set_fully_blocked(5, y);
        }
        let mut pf = Pathfinder::default();
        let path = pf.path_to(&grid, (0, 0), (10, 0), None).unwrap();
        assert!(path.iter().any(|(_, y)| *y >= 10));
    }

    #[test]
    fn no_corner_cutting_past_a_blocked_tile() {
        let mut grid = open_grid();
        grid.set_fully_blocked(1, 0);
        grid.set_fully_blocked(0, 1);
        let mut pf = Pathfinder::default();
        // The only way out of the corner is fully sealed for diagonals.
        let path = pf.path_to(&grid, (0, 0), (2, 2), None);
        assert!(path.is_none());
    }

    #[test]
    fn unreachable_goal_returns_none() {
        let mut grid = open_grid();
        for dir in PathingDirection::ALL {
            let (dx, dy) = dir.delta();
            grid.set_fully_blocked(10 + dx, 10 + dy);
        }
        let mut pf = Pathfinder::default();
        assert!(pf.path_to(&grid, (0, 0), (10, 10), None).is_none());
    }

    #[test]
    fn adjacent_goal_stops_next_to_target() {
        let grid = open_grid();
        let mut pf = Pathfinder::default();
        let path = pf.path_adjacent(&grid, (0, 0), (6, 6), None).unwrap();
        let end = *path.last().unwrap();
        assert!(cardinally_adjacent(end, (6, 6)));
    }

    #[test]
    fn los_preference_ends_adjacent_with_sight() {
        let grid = open_grid();
        let mut pf = Pathfinder::default();
        let path = pf
            .path_adjacent_with_los_preference(&grid, (0, 6), (6, 6), true, None)
            .unwrap();
        let end = *path.last().unwrap();
        assert!(cardinally_adjacent(end, (6, 6)));
        assert!(grid.has_line_of_sight(end, (6, 6)));
        // Closest eligible neighbour to the start wins.
        assert_eq!(end, (5, 6));
    }

    #[test]
    fn within_range_respects_range() {
        let grid = open_grid();
        let mut pf = Pathfinder::default();
        let path = pf
            .path_within_range(&grid, (0, 0), (20, 0), 7, true, None)
            .unwrap();
        let end = *path.last().unwrap();
        assert!(chebyshev(end, (20, 0)) <= 7);
    }

    #[test]
    fn greedy_stays_when_adjacent() {
        let grid = open_grid();
        assert_eq!(greedy_step_toward_adjacent(&grid, (5, 5), (5, 6)), GreedyStep::Stay);
    }

    #[test]
    fn greedy_prefers_adjacency_achieving_diagonal() {
        let grid = open_grid();
        // From (4,4) to target (6,5): the diagonal (5,5) is cardinally
        // adjacent to nothing, but (5,5) -> actually check (5,5) vs (6,5):
        // adjacent. So the diagonal wins immediately.
        match greedy_step_toward_adjacent(&grid, (4, 4), (6, 5)) {
            GreedyStep::Step(next) => assert_eq!(next, (5, 5)),
            other => panic!("expected step, got {:?}", other),
        }
    }

    #[test]
    fn greedy_routes_around_blocked_edge() {
        let mut grid = open_grid();
        grid.block_edge(5, 5, PathingDirection::East);
        match greedy_step_toward_adjacent(&grid, (5, 5), (9, 5)) {
            GreedyStep::Step(next) => assert_ne!(next, (6, 5)),
            other => panic!("expected step, got {:?}", other),
        }
    }

    #[test]
    fn greedy_two_step_path_closes_distance() {
        let grid = open_grid();
        let path = greedy_path_toward_adjacent(&grid, (0, 0), (5, 0), 2);
        assert_eq!(path, vec![(0, 0), (1, 0), (2, 0)]);
        // Stops early once adjacent.
        let short = greedy_path_toward_adjacent(&grid, (3, 0), (5, 0), 2);
        assert_eq!(short, vec![(3, 0), (4, 0)]);
    }
}
