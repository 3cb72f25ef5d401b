//! The persisted shape of a player: everything that survives a session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::components::{PlayerAppearance, PlayerSetting, PlayerType};
use crate::items::{Bank, Equipment, Inventory};
use crate::skills::{SkillSheet, STAMINA_MAX};
use crate::tile::TilePos;

/// Bump when the serialized layout changes; mismatched files are backed up
/// and rejected at load.
pub const PROFILE_VERSION: u32 = 2;

pub const DEFAULT_BANK_CAPACITY: usize = 200;

/// Integer-valued abilities (stamina today, more later).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abilities {
    pub stamina: i32,
}

impl Default for Abilities {
    fn default() -> Self {
        Self { stamina: STAMINA_MAX }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub version: u32,
    pub username: String,
    pub display_name: String,
    pub player_type: PlayerType,
    pub position: TilePos,
    pub settings: HashMap<PlayerSetting, i32>,
    pub inventory: Inventory,
    pub equipment: Equipment,
    pub bank: Bank,
    pub skills: SkillSheet,
    pub abilities: Abilities,
    pub appearance: PlayerAppearance,
    pub muted: bool,
}

impl PlayerProfile {
    /// A fresh profile spawning at `spawn`.
    pub fn new(username: &str, spawn: TilePos) -> Self {
        Self {
            version: PROFILE_VERSION,
            username: username.to_lowercase(),
            display_name: username.to_string(),
            player_type: PlayerType::Normal,
            position: spawn,
            settings: HashMap::new(),
            inventory: Inventory::new(),
            equipment: Equipment::default(),
            bank: Bank::with_capacity(DEFAULT_BANK_CAPACITY),
            skills: SkillSheet::new(),
            abilities: Abilities::default(),
            appearance: PlayerAppearance::default(),
            muted: false,
        }
    }
}
