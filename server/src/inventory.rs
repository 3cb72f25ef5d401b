//! Inventory service: the single place that mutates player containers,
//! keeps the derived scalars (weight, combat level) current, marks profiles
//! dirty, and emits the per-slot packets clients key their UI off.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;

use shared::items::{total_weight, EquipmentSlot, ItemStack};
use shared::protocol::ServerPacket;
use shared::skills::SkillKind;

use crate::components::{Belongings, Progress};
use crate::events::GameEvent;
use crate::sessions::{send_to, Sessions};
use crate::world::Catalogs;

/// Recompute weight and combat level after any container or skill change.
pub fn recompute_derived(belongings: &Belongings, progress: &mut Progress, catalogs: &Catalogs) {
    progress.weight = total_weight(&belongings.inventory, &belongings.equipment, &catalogs.items);
    progress.combat_level = progress.skills.combat_level();
}

/// Try to add a stack to the inventory. On success sends the per-slot
/// packets and marks the profile dirty; on failure returns the leftover.
pub fn give_stack(
    belongings: &mut Belongings,
    progress: &mut Progress,
    catalogs: &Catalogs,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    stack: ItemStack,
) -> Option<ItemStack> {
    let def = catalogs.items.get(stack.item_id)?;
    match belongings.inventory.add_stack_tracked(stack, def) {
        Ok(slots) => {
            for slot in slots {
                if let Some(written) = belongings.inventory.get(slot) {
                    send_to(
                        sessions,
                        senders,
                        user_id,
                        ServerPacket::AddedItemAtInventorySlot {
                            slot: slot as u8,
                            item_id: written.item_id,
                            amount: written.amount,
                            is_iou: written.is_iou,
                        },
                    );
                }
            }
            belongings.dirty = true;
            recompute_derived(belongings, progress, catalogs);
            None
        }
        Err(leftover) => Some(leftover),
    }
}

/// Remove the whole stack at a slot, with the removal packet.
pub fn take_slot(
    belongings: &mut Belongings,
    progress: &mut Progress,
    catalogs: &Catalogs,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    slot: usize,
) -> Option<ItemStack> {
    let stack = belongings.inventory.take_at(slot)?;
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::RemovedItemFromInventoryAtSlot { slot: slot as u8 },
    );
    belongings.dirty = true;
    recompute_derived(belongings, progress, catalogs);
    Some(stack)
}

/// Equip the item at an inventory slot. Enforces slot assignment, skill
/// requirements and the no-IOU rule; whatever was worn in that slot swaps
/// back into the inventory, so equip-then-unequip is loss-free.
#[allow(clippy::too_many_arguments)]
pub fn equip_from_slot(
    belongings: &mut Belongings,
    progress: &mut Progress,
    catalogs: &Catalogs,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    events: &mut MessageWriter<GameEvent>,
    user_id: u32,
    slot: usize,
) -> Result<(), String> {
    let Some(stack) = belongings.inventory.get(slot).copied() else {
        return Err("Nothing to equip.".to_string());
    };
    if stack.is_iou {
        return Err("You can't wield a certificate.".to_string());
    }
    let Some(def) = catalogs.items.get(stack.item_id) else {
        return Err("Nothing interesting happens.".to_string());
    };
    let Some(equip_slot) = def.equip_slot else {
        return Err("You can't wear that.".to_string());
    };
    for (skill, level) in &def.equip_requirements {
        if progress.skills.base(*skill) < *level {
            return Err(format!(
                "You need {} level {} to equip that.",
                skill.slug(),
                level
            ));
        }
    }

    // Non-stackable equipment goes on one at a time.
    let worn = if def.stackable {
        belongings.inventory.take_at(slot)
    } else {
        belongings.inventory.remove_at(slot, 1);
        Some(ItemStack { amount: 1, ..stack })
    };
    let Some(worn) = worn else {
        return Err("Nothing to equip.".to_string());
    };
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::RemovedItemFromInventoryAtSlot { slot: slot as u8 },
    );

    if let Some(previous) = belongings.equipment.take(equip_slot) {
        // Swap the displaced piece back into the freed space.
        let def_prev = catalogs.items.get(previous.item_id);
        if let Some(def_prev) = def_prev {
            if belongings.inventory.add_stack(previous, def_prev).is_some() {
                // No room for the swap: put everything back as it was.
                belongings.equipment.put(equip_slot, previous);
                if let Some(def_new) = catalogs.items.get(worn.item_id) {
                    belongings.inventory.add_stack(worn, def_new);
                }
                return Err("You don't have enough inventory space.".to_string());
            }
        }
        send_to(
            sessions,
            senders,
            user_id,
            ServerPacket::UnequippedItem { slot_index: equip_slot.index() as u8 },
        );
    }

    belongings.equipment.put(equip_slot, worn);
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::EquippedItem {
            slot_index: equip_slot.index() as u8,
            item_id: worn.item_id,
            amount: worn.amount,
        },
    );
    belongings.dirty = true;
    recompute_derived(belongings, progress, catalogs);
    events.write(GameEvent::PlayerEquipmentChanged { user_id });
    Ok(())
}

/// Unequip a worn slot back into the inventory.
#[allow(clippy::too_many_arguments)]
pub fn unequip_slot(
    belongings: &mut Belongings,
    progress: &mut Progress,
    catalogs: &Catalogs,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    events: &mut MessageWriter<GameEvent>,
    user_id: u32,
    equip_slot: EquipmentSlot,
) -> Result<(), String> {
    let Some(worn) = belongings.equipment.get(equip_slot).copied() else {
        return Err("Nothing to remove.".to_string());
    };
    let Some(def) = catalogs.items.get(worn.item_id) else {
        return Err("Nothing interesting happens.".to_string());
    };
    if belongings.inventory.can_accept(&[worn], &catalogs.items) {
        belongings.equipment.take(equip_slot);
        belongings.inventory.add_stack(worn, def);
        send_to(
            sessions,
            senders,
            user_id,
            ServerPacket::UnequippedItem { slot_index: equip_slot.index() as u8 },
        );
        belongings.dirty = true;
        recompute_derived(belongings, progress, catalogs);
        events.write(GameEvent::PlayerEquipmentChanged { user_id });
        Ok(())
    } else {
        Err("You don't have enough inventory space.".to_string())
    }
}

/// Eat the edible at a slot: heals boosted hitpoints up to the base level.
pub fn eat_from_slot(
    belongings: &mut Belongings,
    progress: &mut Progress,
    catalogs: &Catalogs,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    slot: usize,
) -> Result<(), String> {
    let Some(stack) = belongings.inventory.get(slot).copied() else {
        return Err("Nothing to eat.".to_string());
    };
    let Some(def) = catalogs.items.get(stack.item_id) else {
        return Err("Nothing to eat.".to_string());
    };
    let Some(edible) = def.edible.clone() else {
        return Err("You can't eat that.".to_string());
    };
    belongings.inventory.remove_at(slot, 1);
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::RemovedItemFromInventoryAtSlot { slot: slot as u8 },
    );
    let base = progress.skills.base(SkillKind::Hitpoints);
    let healed = progress
        .skills
        .boosted(SkillKind::Hitpoints)
        .saturating_add(edible.heals)
        .min(base);
    progress.skills.set_boosted(SkillKind::Hitpoints, healed);
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::SkillCurrentLevelChanged {
            skill: SkillKind::Hitpoints,
            boosted: healed,
            base,
        },
    );
    belongings.dirty = true;
    recompute_derived(belongings, progress, catalogs);
    Ok(())
}

/// Drink the potion at a slot: applies its boost or drain.
pub fn drink_from_slot(
    belongings: &mut Belongings,
    progress: &mut Progress,
    catalogs: &Catalogs,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    slot: usize,
) -> Result<(), String> {
    let Some(stack) = belongings.inventory.get(slot).copied() else {
        return Err("Nothing to drink.".to_string());
    };
    let Some(def) = catalogs.items.get(stack.item_id) else {
        return Err("Nothing to drink.".to_string());
    };
    let Some(potion) = def.drinkable.clone() else {
        return Err("You can't drink that.".to_string());
    };
    belongings.inventory.remove_at(slot, 1);
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::RemovedItemFromInventoryAtSlot { slot: slot as u8 },
    );
    let increased = potion.boost >= 0;
    if increased {
        progress.skills.boost(potion.skill, potion.boost as u8, potion.cap);
    } else {
        progress.skills.drain(potion.skill, potion.boost.unsigned_abs(), 0);
    }
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::SkillCurrentLevelChanged {
            skill: potion.skill,
            boosted: progress.skills.boosted(potion.skill),
            base: progress.skills.base(potion.skill),
        },
    );
    send_to(
        sessions,
        senders,
        user_id,
        ServerPacket::ShowSkillCurrentLevelIncreasedOrDecreasedMessage {
            skill: potion.skill,
            increased,
        },
    );
    belongings.dirty = true;
    recompute_derived(belongings, progress, catalogs);
    Ok(())
}

/// Grant experience with the level-up packet fan-out, including combat
/// level recomputation.
pub fn grant_xp(
    progress: &mut Progress,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    skill: SkillKind,
    xp: u32,
) {
    if xp == 0 {
        return;
    }
    let before_combat = progress.combat_level;
    let gained = progress.skills.add_xp(skill, xp);
    send_to(sessions, senders, user_id, ServerPacket::GainedExp { skill, xp });
    if gained > 0 {
        send_to(
            sessions,
            senders,
            user_id,
            ServerPacket::PlayerSkillLevelIncreased {
                skill,
                level: progress.skills.base(skill),
            },
        );
        progress.combat_level = progress.skills.combat_level();
        if progress.combat_level != before_combat {
            send_to(
                sessions,
                senders,
                user_id,
                ServerPacket::PlayerCombatLevelIncreased { level: progress.combat_level },
            );
        }
    }
}
