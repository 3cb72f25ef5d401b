//! Server configuration: environment-derived settings read once at startup,
//! plus the tuning constants of the simulation core.

use std::path::PathBuf;

use bevy::prelude::*;

use shared::tile::{MapLevel, TilePos};

/// View radius for players and NPCs, Chebyshev tiles.
pub const ENTITY_VIEW_RADIUS: u32 = 15;
/// View radius for ground items; larger so drops stay visible on approach.
pub const ITEM_VIEW_RADIUS: u32 = 22;

/// Search radius for a plain click-to-walk path.
pub const CLICK_PATH_RADIUS: u32 = 64;
/// Search radius for the initial path toward an NPC or player interaction.
pub const INTERACTION_PATH_RADIUS: u32 = 128;

/// Seamless re-path radii by Chebyshev distance bracket {<6, 6..=12, >12}.
pub const REPATH_RADII: [u32; 3] = [8, 12, 16];
/// Past this distance the old plan keeps running and the arrival handler
/// reconciles.
pub const REPATH_GIVE_UP_DISTANCE: u32 = 20;

pub const TRADE_REQUEST_DELAY_TICKS: u64 = 2;
pub const TRADE_REQUEST_TIMEOUT_MS: u64 = 10_000;

pub const SEARCH_DELAY_TICKS: u32 = 4;
pub const PICKLOCK_DELAY_TICKS: u32 = 4;

/// Ticks a private drop stays private before anyone may take it.
pub const GROUND_ITEM_PUBLIC_TICKS: u64 = 100;
/// Ticks before a dropped item despawns.
pub const GROUND_ITEM_DESPAWN_TICKS: u64 = 300;

/// Ticks between autosave sweeps of dirty player profiles.
pub const AUTOSAVE_INTERVAL_TICKS: u64 = 100;

/// Ticks a dead player waits before respawning.
pub const PLAYER_RESPAWN_TICKS: u64 = 5;

/// Ranged and magic combat engage distance, Chebyshev tiles.
pub const RANGED_ATTACK_RANGE: u32 = 7;

#[derive(Resource, Debug, Clone)]
pub struct ServerConfig {
    /// Root of baked grids and ron content.
    pub static_assets_path: PathBuf,
    /// Dev flag: skip the per-step sprint stamina debit.
    pub disable_stamina: bool,
    /// Where new and respawning players appear.
    pub spawn_position: TilePos,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let static_assets_path = std::env::var("STATIC_ASSETS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("assets"));
        let disable_stamina = std::env::var("DISABLE_STAMINA")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            static_assets_path,
            disable_stamina,
            spawn_position: TilePos::new(MapLevel::Overworld, 32, 32),
        }
    }
}

/// Monotonic simulation clock. Advanced once at the top of every tick;
/// wall-clock milliseconds are derived, so pacing fields (wander, trade
/// timeout) stay deterministic with respect to tick ordering.
#[derive(Resource, Debug)]
pub struct WorldClock {
    pub tick: u64,
    pub tick_ms: u64,
}

impl WorldClock {
    pub fn new(tick_ms: u64) -> Self {
        Self { tick: 0, tick_ms }
    }

    pub fn now_ms(&self) -> u64 {
        self.tick * self.tick_ms
    }
}

pub fn advance_clock(mut clock: ResMut<WorldClock>) {
    clock.tick += 1;
}
