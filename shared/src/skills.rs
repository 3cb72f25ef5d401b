//! Skill sheet: base levels, temporary boosts/drains, experience.

use serde::{Deserialize, Serialize};

pub const SKILL_COUNT: usize = 11;
pub const MAX_LEVEL: u8 = 99;

/// Stamina and other integer-valued abilities.
pub const STAMINA_MAX: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkillKind {
    Attack,
    Strength,
    Defence,
    Hitpoints,
    Ranged,
    Magic,
    Athletics,
    Thieving,
    Woodcutting,
    Fishing,
    Mining,
}

impl SkillKind {
    pub const ALL: [SkillKind; SKILL_COUNT] = [
        SkillKind::Attack,
        SkillKind::Strength,
        SkillKind::Defence,
        SkillKind::Hitpoints,
        SkillKind::Ranged,
        SkillKind::Magic,
        SkillKind::Athletics,
        SkillKind::Thieving,
        SkillKind::Woodcutting,
        SkillKind::Fishing,
        SkillKind::Mining,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn slug(self) -> &'static str {
        match self {
            SkillKind::Attack => "attack",
            SkillKind::Strength => "strength",
            SkillKind::Defence => "defence",
            SkillKind::Hitpoints => "hitpoints",
            SkillKind::Ranged => "ranged",
            SkillKind::Magic => "magic",
            SkillKind::Athletics => "athletics",
            SkillKind::Thieving => "thieving",
            SkillKind::Woodcutting => "woodcutting",
            SkillKind::Fishing => "fishing",
            SkillKind::Mining => "mining",
        }
    }
}

/// One skill: permanent base level, current (possibly boosted or drained)
/// level, and accumulated experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillState {
    pub base_level: u8,
    pub boosted_level: u8,
    pub xp: u32,
}

impl SkillState {
    fn at_level(level: u8) -> Self {
        Self {
            base_level: level,
            boosted_level: level,
            xp: xp_for_level(level),
        }
    }
}

/// Experience required for a level. Cumulative quarter-sum curve; level 1 is
/// zero experience.
pub fn xp_for_level(level: u8) -> u32 {
    let mut points: u64 = 0;
    let mut total: u64 = 0;
    for l in 1..level as u64 {
        points += l + (300.0 * 2f64.powf(l as f64 / 7.0)) as u64;
        total = points / 4;
    }
    total as u32
}

pub fn level_for_xp(xp: u32) -> u8 {
    let mut level = 1;
    while level < MAX_LEVEL && xp_for_level(level + 1) <= xp {
        level += 1;
    }
    level
}

/// All skills of one player. Hitpoints is special: its boosted level is the
/// player's current health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSheet {
    skills: [SkillState; SKILL_COUNT],
}

impl Default for SkillSheet {
    fn default() -> Self {
        Self::new()
    }
}

impl SkillSheet {
    pub fn new() -> Self {
        let mut skills = [SkillState::at_level(1); SKILL_COUNT];
        skills[SkillKind::Hitpoints.index()] = SkillState::at_level(10);
        Self { skills }
    }

    pub fn get(&self, kind: SkillKind) -> &SkillState {
        &self.skills[kind.index()]
    }

    pub fn base(&self, kind: SkillKind) -> u8 {
        self.skills[kind.index()].base_level
    }

    pub fn boosted(&self, kind: SkillKind) -> u8 {
        self.skills[kind.index()].boosted_level
    }

    pub fn xp(&self, kind: SkillKind) -> u32 {
        self.skills[kind.index()].xp
    }

    /// Add experience; returns the number of base levels gained. Boosted
    /// level rises with the base so an un-boosted skill stays in sync.
    pub fn add_xp(&mut self, kind: SkillKind, xp: u32) -> u8 {
        let state = &mut self.skills[kind.index()];
        state.xp = state.xp.saturating_add(xp);
        let new_level = level_for_xp(state.xp);
        let gained = new_level.saturating_sub(state.base_level);
        if gained > 0 {
            state.boosted_level = state.boosted_level.saturating_add(gained).min(MAX_LEVEL);
            state.base_level = new_level;
        }
        gained
    }

    /// Temporary boost above base, capped at `base + cap`.
    pub fn boost(&mut self, kind: SkillKind, amount: u8, cap: u8) {
        let state = &mut self.skills[kind.index()];
        let max = state.base_level.saturating_add(cap);
        state.boosted_level = state.boosted_level.saturating_add(amount).min(max);
    }

    /// Temporary drain below base, never below `floor`.
    pub fn drain(&mut self, kind: SkillKind, amount: u8, floor: u8) {
        let state = &mut self.skills[kind.index()];
        state.boosted_level = state.boosted_level.saturating_sub(amount).max(floor);
    }

    pub fn set_boosted(&mut self, kind: SkillKind, level: u8) {
        self.skills[kind.index()].boosted_level = level;
    }

    /// Current health, as the boosted hitpoints level.
    pub fn hitpoints_current(&self) -> u32 {
        self.boosted(SkillKind::Hitpoints) as u32
    }

    pub fn hitpoints_max(&self) -> u32 {
        self.base(SkillKind::Hitpoints) as u32
    }

    pub fn is_dead(&self) -> bool {
        self.hitpoints_current() == 0
    }

    /// Derived combat level from base levels.
    pub fn combat_level(&self) -> u8 {
        let attack = self.base(SkillKind::Attack) as u32;
        let strength = self.base(SkillKind::Strength) as u32;
        let defence = self.base(SkillKind::Defence) as u32;
        let hitpoints = self.base(SkillKind::Hitpoints) as u32;
        let ranged = self.base(SkillKind::Ranged) as u32;
        let magic = self.base(SkillKind::Magic) as u32;

        let offence = (attack + strength).max(ranged * 3 / 2).max(magic * 3 / 2);
        let level = (defence + hitpoints) / 4 + offence * 13 / 40;
        level.clamp(3, 126) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xp_curve_is_monotonic() {
        assert_eq!(xp_for_level(1), 0);
        for level in 2..=MAX_LEVEL {
            assert!(xp_for_level(level) > xp_for_level(level - 1));
        }
    }

    #[test]
    fn level_for_xp_inverts_the_curve() {
        for level in [1u8, 2, 10, 42, 70, 99] {
            assert_eq!(level_for_xp(xp_for_level(level)), level);
            if level > 1 {
                assert_eq!(level_for_xp(xp_for_level(level) - 1), level - 1);
            }
        }
    }

    #[test]
    fn add_xp_levels_up_and_reports_gains() {
        let mut sheet = SkillSheet::new();
        let gained = sheet.add_xp(SkillKind::Woodcutting, xp_for_level(5));
        assert_eq!(gained, 4);
        assert_eq!(sheet.base(SkillKind::Woodcutting), 5);
        assert_eq!(sheet.boosted(SkillKind::Woodcutting), 5);
    }

    #[test]
    fn drain_respects_floor_and_boost_respects_cap() {
        let mut sheet = SkillSheet::new();
        sheet.add_xp(SkillKind::Attack, xp_for_level(40));
        sheet.drain(SkillKind::Attack, 10, 35);
        assert_eq!(sheet.boosted(SkillKind::Attack), 35);
        sheet.boost(SkillKind::Attack, 20, 5);
        assert_eq!(sheet.boosted(SkillKind::Attack), 45);
    }

    #[test]
    fn fresh_sheet_combat_level() {
        let sheet = SkillSheet::new();
        // Level-1 combat skills with 10 hitpoints.
        assert_eq!(sheet.combat_level(), 3);
        assert_eq!(sheet.hitpoints_current(), 10);
        assert!(!sheet.is_dead());
    }
}
