//! Player profile persistence: disk I/O for the player-state store.
//!
//! Profiles are bincode files, written atomically (temp file + rename) so a
//! crash mid-write never corrupts a character. A version field guards the
//! layout; mismatched files are backed up and rejected.

use std::collections::HashMap;
use std::path::PathBuf;

use bevy::prelude::*;
use lightyear::prelude::PeerId;

use shared::player_profile::{PlayerProfile, PROFILE_VERSION};

use crate::components::{Belongings, PlayerHandle, PlayerPos, PlayerStatus, Progress, Settings};
use crate::config::{WorldClock, AUTOSAVE_INTERVAL_TICKS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRejectionReason {
    TooShort,
    TooLong,
    InvalidCharacters,
    Reserved,
}

/// Resource managing the profile store.
#[derive(Resource)]
pub struct PlayerProfiles {
    pub storage_dir: PathBuf,
    /// Lowercase name -> peer, for quick online lookups.
    pub peer_by_name: HashMap<String, PeerId>,
}

impl PlayerProfiles {
    pub fn new(storage_dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&storage_dir) {
            error!("Failed to create player storage directory: {}", e);
        }
        info!("Player profiles will be saved to: {:?}", storage_dir);
        Self {
            storage_dir,
            peer_by_name: HashMap::new(),
        }
    }

    pub fn bind_online(&mut self, name_lower: &str, peer: PeerId) {
        self.peer_by_name.insert(name_lower.to_string(), peer);
    }

    pub fn unbind_online(&mut self, name_lower: &str) {
        self.peer_by_name.remove(name_lower);
    }

    /// Load a profile from disk; errors cover missing files, corruption and
    /// version mismatch (which also writes a backup).
    pub fn load_profile(&self, name: &str) -> Result<PlayerProfile, String> {
        let name_lower = name.trim().to_lowercase();
        let path = self.storage_dir.join(format!("{}.bin", name_lower));
        if !path.exists() {
            return Err(format!("Profile '{}' not found", name));
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let profile: PlayerProfile = bincode::deserialize(&bytes)
            .map_err(|e| format!("Failed to deserialize {}: {}", path.display(), e))?;
        if profile.version != PROFILE_VERSION {
            let backup_path = self
                .storage_dir
                .join(format!("{}.v{}.backup", name_lower, profile.version));
            if let Err(e) = std::fs::copy(&path, &backup_path) {
                warn!("Failed to backup old profile version: {}", e);
            }
            return Err(format!(
                "Profile version mismatch: found v{}, expected v{}. Backed up to {:?}",
                profile.version, PROFILE_VERSION, backup_path
            ));
        }
        Ok(profile)
    }

    /// Save a profile atomically via temp file + rename.
    pub fn save_profile(&self, profile: &PlayerProfile) -> Result<(), String> {
        let name_lower = profile.username.to_lowercase();
        let final_path = self.storage_dir.join(format!("{}.bin", name_lower));
        let temp_path = self.storage_dir.join(format!("{}.tmp", name_lower));
        let bytes =
            bincode::serialize(profile).map_err(|e| format!("Serialize error: {}", e))?;
        std::fs::write(&temp_path, &bytes)
            .map_err(|e| format!("Write temp file error: {}", e))?;
        std::fs::rename(&temp_path, &final_path).map_err(|e| format!("Rename error: {}", e))?;
        trace!("Saved profile: {} ({} bytes)", profile.display_name, bytes.len());
        Ok(())
    }

    /// Validate a submitted character name.
    pub fn validate_name(name: &str) -> Result<(), NameRejectionReason> {
        let trimmed = name.trim();
        if trimmed.len() < 3 {
            return Err(NameRejectionReason::TooShort);
        }
        if trimmed.len() > 16 {
            return Err(NameRejectionReason::TooLong);
        }
        if !trimmed.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(NameRejectionReason::InvalidCharacters);
        }
        let lower = trimmed.to_lowercase();
        const RESERVED: &[&str] = &["server", "admin", "system", "moderator", "mod", "console"];
        if RESERVED.contains(&lower.as_str()) {
            return Err(NameRejectionReason::Reserved);
        }
        Ok(())
    }
}

/// Assemble the persisted shape from a live player's components.
pub fn build_profile(
    handle: &PlayerHandle,
    pos: &PlayerPos,
    status: &PlayerStatus,
    belongings: &Belongings,
    progress: &Progress,
    settings: &Settings,
) -> PlayerProfile {
    PlayerProfile {
        version: PROFILE_VERSION,
        username: handle.username.clone(),
        display_name: handle.display_name.clone(),
        player_type: handle.player_type,
        position: pos.0,
        settings: settings.0.clone(),
        inventory: belongings.inventory.clone(),
        equipment: belongings.equipment.clone(),
        bank: belongings.bank.clone(),
        skills: progress.skills.clone(),
        abilities: progress.abilities,
        appearance: status.appearance,
        muted: status.muted,
    }
}

/// Periodic autosave: only players whose dirty flag is set are written.
pub fn periodic_player_save(
    clock: Res<WorldClock>,
    profiles: Res<PlayerProfiles>,
    mut players: Query<(
        &PlayerHandle,
        &PlayerPos,
        &PlayerStatus,
        &mut Belongings,
        &Progress,
        &Settings,
    )>,
) {
    if clock.tick == 0 || clock.tick % AUTOSAVE_INTERVAL_TICKS != 0 {
        return;
    }
    let mut saved = 0usize;
    for (handle, pos, status, mut belongings, progress, settings) in players.iter_mut() {
        if !belongings.dirty {
            continue;
        }
        let profile = build_profile(handle, pos, status, &belongings, progress, settings);
        match profiles.save_profile(&profile) {
            Ok(()) => {
                belongings.dirty = false;
                saved += 1;
            }
            Err(e) => error!("Autosave failed for {}: {}", handle.display_name, e),
        }
    }
    if saved > 0 {
        trace!("Autosaved {} dirty profiles", saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_rules() {
        assert!(PlayerProfiles::validate_name("Zezima").is_ok());
        assert!(PlayerProfiles::validate_name("ab").is_err());
        assert!(PlayerProfiles::validate_name("a_very_long_name_indeed").is_err());
        assert!(PlayerProfiles::validate_name("bad name!").is_err());
        assert!(matches!(
            PlayerProfiles::validate_name("Admin"),
            Err(NameRejectionReason::Reserved)
        ));
    }
}
