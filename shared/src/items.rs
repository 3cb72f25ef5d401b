//! Items, the item catalog, and the three player-side containers
//! (inventory, equipment, bank).
//!
//! An IOU is the certificate form of a non-stackable item: it stacks like
//! any stackable item and is tracked as a flag on the stack, not as a
//! separate item id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::skills::SkillKind;

/// Content-defined item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ItemId(pub u32);

pub const INVENTORY_SLOTS: usize = 28;
pub const EQUIPMENT_SLOTS: usize = 10;

/// The ten fixed equipment slot tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentSlot {
    Helmet,
    Chest,
    Legs,
    Shield,
    Weapon,
    Back,
    Neck,
    Gloves,
    Boots,
    Projectile,
}

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; EQUIPMENT_SLOTS] = [
        EquipmentSlot::Helmet,
        EquipmentSlot::Chest,
        EquipmentSlot::Legs,
        EquipmentSlot::Shield,
        EquipmentSlot::Weapon,
        EquipmentSlot::Back,
        EquipmentSlot::Neck,
        EquipmentSlot::Gloves,
        EquipmentSlot::Boots,
        EquipmentSlot::Projectile,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CombatBonuses {
    pub attack: i16,
    pub strength: i16,
    pub defence: i16,
    pub ranged: i16,
    pub magic: i16,
}

impl CombatBonuses {
    pub fn add(&mut self, other: &CombatBonuses) {
        self.attack += other.attack;
        self.strength += other.strength;
        self.defence += other.defence;
        self.ranged += other.ranged;
        self.magic += other.magic;
    }
}

/// Which combat state an equipped weapon puts its wielder into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeaponClass {
    #[default]
    Melee,
    Ranged,
    Magic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdibleInfo {
    /// Hitpoints restored when eaten.
    pub heals: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotionInfo {
    pub skill: SkillKind,
    /// Positive boosts, negative drains (floored at 0 boosted).
    pub boost: i8,
    /// Max boost above base level.
    pub cap: u8,
}

/// Immutable content metadata for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: ItemId,
    pub name: String,
    pub examine: String,
    pub stackable: bool,
    /// Kilogram-ish weight; IOUs weigh nothing.
    pub weight: f32,
    pub equip_slot: Option<EquipmentSlot>,
    pub equip_requirements: Vec<(SkillKind, u8)>,
    pub bonuses: CombatBonuses,
    /// For weapon-slot items: attack cadence in ticks and combat class.
    pub attack_speed_ticks: u32,
    pub weapon_class: WeaponClass,
    pub edible: Option<EdibleInfo>,
    pub drinkable: Option<PotionInfo>,
}

impl ItemDefinition {
    /// Minimal definition for tests and fallback content.
    pub fn simple(id: u32, name: &str, stackable: bool) -> Self {
        Self {
            id: ItemId(id),
            name: name.to_string(),
            examine: String::new(),
            stackable,
            weight: if stackable { 0.0 } else { 1.0 },
            equip_slot: None,
            equip_requirements: Vec::new(),
            bonuses: CombatBonuses::default(),
            attack_speed_ticks: 4,
            weapon_class: WeaponClass::Melee,
            edible: None,
            drinkable: None,
        }
    }
}

/// All item definitions, loaded from ron content at startup.
#[derive(Debug, Default, Clone)]
pub struct ItemCatalog {
    defs: HashMap<u32, ItemDefinition>,
}

impl ItemCatalog {
    pub fn from_defs(defs: Vec<ItemDefinition>) -> Result<Self, String> {
        let mut map = HashMap::new();
        for def in defs {
            let id = def.id.0;
            if map.insert(id, def).is_some() {
                return Err(format!("Duplicate item definition id {}", id));
            }
        }
        Ok(Self { defs: map })
    }

    pub fn load_ron(text: &str) -> Result<Self, String> {
        let defs: Vec<ItemDefinition> =
            ron::from_str(text).map_err(|e| format!("Item catalog parse error: {}", e))?;
        Self::from_defs(defs)
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemDefinition> {
        self.defs.get(&id.0)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// A stack of one item. `amount >= 1` always; zero-amount stacks are
/// removed at the container layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_id: ItemId,
    pub amount: u32,
    pub is_iou: bool,
}

impl ItemStack {
    pub fn new(item_id: ItemId, amount: u32) -> Self {
        Self { item_id, amount, is_iou: false }
    }

    pub fn iou(item_id: ItemId, amount: u32) -> Self {
        Self { item_id, amount, is_iou: true }
    }

    /// IOUs always stack; otherwise stacking follows the definition.
    pub fn merges_with(&self, other: &ItemStack, def: &ItemDefinition) -> bool {
        self.item_id == other.item_id
            && self.is_iou == other.is_iou
            && (self.is_iou || def.stackable)
    }
}

// =============================================================================
// INVENTORY
// =============================================================================

/// The 28-slot carried inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    slots: [Option<ItemStack>; INVENTORY_SLOTS],
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self { slots: [None; INVENTORY_SLOTS] }
    }

    pub fn slots(&self) -> &[Option<ItemStack>; INVENTORY_SLOTS] {
        &self.slots
    }

    pub fn get(&self, slot: usize) -> Option<&ItemStack> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ItemStack)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|stack| (i, stack)))
    }

    fn find_merge_slot(&self, stack: &ItemStack, def: &ItemDefinition) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref()
                .map(|existing| existing.merges_with(stack, def))
                .unwrap_or(false)
        })
    }

    fn find_empty_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Add a stack, merging where the stacking rules allow. Returns `None`
    /// on success or `Some(leftover)` with whatever did not fit; on success
    /// the slot that changed last is reported through `added_at`.
    pub fn add_stack(&mut self, stack: ItemStack, def: &ItemDefinition) -> Option<ItemStack> {
        self.add_stack_tracked(stack, def).err()
    }

    /// Like [`Inventory::add_stack`] but reports the slots written on
    /// success, so callers can emit per-slot packets.
    pub fn add_stack_tracked(
        &mut self,
        stack: ItemStack,
        def: &ItemDefinition,
    ) -> Result<Vec<usize>, ItemStack> {
        if stack.amount == 0 {
            return Ok(Vec::new());
        }
        if stack.is_iou || def.stackable {
            if let Some(i) = self.find_merge_slot(&stack, def) {
                if let Some(existing) = self.slots[i].as_mut() {
                    existing.amount = existing.amount.saturating_add(stack.amount);
                }
                return Ok(vec![i]);
            }
            if let Some(i) = self.find_empty_slot() {
                self.slots[i] = Some(stack);
                return Ok(vec![i]);
            }
            return Err(stack);
        }
        // Non-stackable: one slot per unit.
        let mut remaining = stack.amount;
        let mut written = Vec::new();
        while remaining > 0 {
            match self.find_empty_slot() {
                Some(i) => {
                    self.slots[i] = Some(ItemStack { amount: 1, ..stack });
                    written.push(i);
                    remaining -= 1;
                }
                None => return Err(ItemStack { amount: remaining, ..stack }),
            }
        }
        Ok(written)
    }

    /// Whether all of `incoming` would fit, taking merge slots into account.
    /// Used by trade settlement before any item moves.
    pub fn can_accept(&self, incoming: &[ItemStack], catalog: &ItemCatalog) -> bool {
        let mut probe = self.clone();
        for stack in incoming {
            let Some(def) = catalog.get(stack.item_id) else {
                return false;
            };
            if probe.add_stack(*stack, def).is_some() {
                return false;
            }
        }
        true
    }

    pub fn take_at(&mut self, slot: usize) -> Option<ItemStack> {
        self.slots.get_mut(slot).and_then(|s| s.take())
    }

    /// Remove up to `amount` from one slot; clears the slot when it hits
    /// zero. Returns the amount actually removed.
    pub fn remove_at(&mut self, slot: usize, amount: u32) -> u32 {
        let Some(entry) = self.slots.get_mut(slot) else {
            return 0;
        };
        let Some(stack) = entry.as_mut() else {
            return 0;
        };
        let removed = stack.amount.min(amount);
        stack.amount -= removed;
        if stack.amount == 0 {
            *entry = None;
        }
        removed
    }

    /// Remove up to `amount` of an item across slots, preferring earlier
    /// slots. Returns the amount actually removed.
    pub fn remove_items(&mut self, item_id: ItemId, is_iou: bool, amount: u32) -> u32 {
        let mut remaining = amount;
        for entry in self.slots.iter_mut() {
            if remaining == 0 {
                break;
            }
            let Some(stack) = entry.as_mut() else {
                continue;
            };
            if stack.item_id != item_id || stack.is_iou != is_iou {
                continue;
            }
            let removed = stack.amount.min(remaining);
            stack.amount -= removed;
            remaining -= removed;
            if stack.amount == 0 {
                *entry = None;
            }
        }
        amount - remaining
    }

    pub fn count(&self, item_id: ItemId, is_iou: bool) -> u64 {
        self.iter()
            .filter(|(_, s)| s.item_id == item_id && s.is_iou == is_iou)
            .map(|(_, s)| s.amount as u64)
            .sum()
    }

    pub fn has(&self, item_id: ItemId, amount: u32) -> bool {
        self.count(item_id, false) >= amount as u64
    }

    /// Client slot reorganization: plain swap of two slots.
    pub fn swap(&mut self, from: usize, to: usize) -> bool {
        if from >= INVENTORY_SLOTS || to >= INVENTORY_SLOTS || from == to {
            return false;
        }
        self.slots.swap(from, to);
        true
    }

    pub fn set_slot(&mut self, slot: usize, stack: Option<ItemStack>) {
        if slot < INVENTORY_SLOTS {
            self.slots[slot] = stack;
        }
    }
}

// =============================================================================
// EQUIPMENT
// =============================================================================

/// The ten worn-equipment slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Equipment {
    slots: [Option<ItemStack>; EQUIPMENT_SLOTS],
}

impl Equipment {
    pub fn get(&self, slot: EquipmentSlot) -> Option<&ItemStack> {
        self.slots[slot.index()].as_ref()
    }

    pub fn take(&mut self, slot: EquipmentSlot) -> Option<ItemStack> {
        self.slots[slot.index()].take()
    }

    pub fn put(&mut self, slot: EquipmentSlot, stack: ItemStack) -> Option<ItemStack> {
        self.slots[slot.index()].replace(stack)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipmentSlot, &ItemStack)> {
        EquipmentSlot::ALL
            .iter()
            .filter_map(move |slot| self.get(*slot).map(|s| (*slot, s)))
    }

    pub fn total_bonuses(&self, catalog: &ItemCatalog) -> CombatBonuses {
        let mut total = CombatBonuses::default();
        for (_, stack) in self.iter() {
            if let Some(def) = catalog.get(stack.item_id) {
                total.add(&def.bonuses);
            }
        }
        total
    }
}

// =============================================================================
// BANK
// =============================================================================

/// The bank: a larger container with externally configured capacity. Bank
/// entries are always stored un-noted, one stack per item id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bank {
    slots: Vec<Option<ItemStack>>,
}

impl Bank {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { slots: vec![None; capacity] }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ItemStack)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|stack| (i, stack)))
    }

    pub fn count(&self, item_id: ItemId) -> u64 {
        self.iter()
            .filter(|(_, s)| s.item_id == item_id)
            .map(|(_, s)| s.amount as u64)
            .sum()
    }

    /// Deposit always un-notes; everything stacks in the bank. Returns false
    /// only when the bank has no slot left for a new item id.
    pub fn deposit(&mut self, stack: ItemStack) -> bool {
        if stack.amount == 0 {
            return true;
        }
        if let Some(existing) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.item_id == stack.item_id)
        {
            existing.amount = existing.amount.saturating_add(stack.amount);
            return true;
        }
        if let Some(entry) = self.slots.iter_mut().find(|s| s.is_none()) {
            *entry = Some(ItemStack::new(stack.item_id, stack.amount));
            return true;
        }
        false
    }

    /// Withdraw up to `amount`; returns the withdrawn amount. The caller
    /// decides whether the withdrawal leaves as IOU.
    pub fn withdraw(&mut self, item_id: ItemId, amount: u32) -> u32 {
        for entry in self.slots.iter_mut() {
            let Some(stack) = entry.as_mut() else {
                continue;
            };
            if stack.item_id != item_id {
                continue;
            }
            let removed = stack.amount.min(amount);
            stack.amount -= removed;
            if stack.amount == 0 {
                *entry = None;
            }
            return removed;
        }
        0
    }
}

/// Total carried weight. IOUs and stackables weigh nothing beyond their
/// definition weight once (a stack weighs like a single item would if
/// stackable).
pub fn total_weight(inventory: &Inventory, equipment: &Equipment, catalog: &ItemCatalog) -> f32 {
    let stack_weight = |stack: &ItemStack| -> f32 {
        if stack.is_iou {
            return 0.0;
        }
        match catalog.get(stack.item_id) {
            Some(def) if def.stackable => def.weight,
            Some(def) => def.weight * stack.amount as f32,
            None => 0.0,
        }
    };
    inventory.iter().map(|(_, s)| stack_weight(s)).sum::<f32>()
        + equipment.iter().map(|(_, s)| stack_weight(s)).sum::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ItemCatalog {
        ItemCatalog::from_defs(vec![
            ItemDefinition::simple(1, "Coins", true),
            ItemDefinition::simple(2, "Bronze sword", false),
            ItemDefinition::simple(3, "Shrimp", false),
        ])
        .unwrap()
    }

    #[test]
    fn stackable_items_merge_into_one_slot() {
        let cat = catalog();
        let def = cat.get(ItemId(1)).unwrap();
        let mut inv = Inventory::new();
        assert!(inv.add_stack(ItemStack::new(ItemId(1), 100), def).is_none());
        assert!(inv.add_stack(ItemStack::new(ItemId(1), 50), def).is_none());
        assert_eq!(inv.count(ItemId(1), false), 150);
        assert_eq!(inv.free_slots(), INVENTORY_SLOTS - 1);
    }

    #[test]
    fn non_stackable_items_take_a_slot_each() {
        let cat = catalog();
        let def = cat.get(ItemId(2)).unwrap();
        let mut inv = Inventory::new();
        assert!(inv.add_stack(ItemStack::new(ItemId(2), 3), def).is_none());
        assert_eq!(inv.free_slots(), INVENTORY_SLOTS - 3);
    }

    #[test]
    fn ious_of_non_stackables_stack() {
        let cat = catalog();
        let def = cat.get(ItemId(2)).unwrap();
        let mut inv = Inventory::new();
        assert!(inv.add_stack(ItemStack::iou(ItemId(2), 500), def).is_none());
        assert_eq!(inv.free_slots(), INVENTORY_SLOTS - 1);
        // The noted and un-noted forms never merge.
        assert!(inv.add_stack(ItemStack::new(ItemId(2), 1), def).is_none());
        assert_eq!(inv.count(ItemId(2), true), 500);
        assert_eq!(inv.count(ItemId(2), false), 1);
    }

    #[test]
    fn full_inventory_returns_leftover() {
        let cat = catalog();
        let def = cat.get(ItemId(2)).unwrap();
        let mut inv = Inventory::new();
        assert!(inv
            .add_stack(ItemStack::new(ItemId(2), INVENTORY_SLOTS as u32), def)
            .is_none());
        let leftover = inv.add_stack(ItemStack::new(ItemId(2), 2), def);
        assert_eq!(leftover.unwrap().amount, 2);
    }

    #[test]
    fn can_accept_accounts_for_merges() {
        let cat = catalog();
        let coins = cat.get(ItemId(1)).unwrap();
        let sword = cat.get(ItemId(2)).unwrap();
        let mut inv = Inventory::new();
        inv.add_stack(ItemStack::new(ItemId(1), 10), coins);
        for _ in 0..(INVENTORY_SLOTS - 1) {
            inv.add_stack(ItemStack::new(ItemId(2), 1), sword);
        }
        assert_eq!(inv.free_slots(), 0);
        // More coins merge into the existing stack even with zero free slots.
        assert!(inv.can_accept(&[ItemStack::new(ItemId(1), 99)], &cat));
        assert!(!inv.can_accept(&[ItemStack::new(ItemId(2), 1)], &cat));
    }

    #[test]
    fn remove_items_spans_slots() {
        let cat = catalog();
        let def = cat.get(ItemId(3)).unwrap();
        let mut inv = Inventory::new();
        inv.add_stack(ItemStack::new(ItemId(3), 4), def);
        assert_eq!(inv.remove_items(ItemId(3), false, 3), 3);
        assert_eq!(inv.count(ItemId(3), false), 1);
    }

    #[test]
    fn bank_deposit_unnotes_and_merges() {
        let mut bank = Bank::with_capacity(4);
        assert!(bank.deposit(ItemStack::iou(ItemId(2), 5)));
        assert!(bank.deposit(ItemStack::new(ItemId(2), 1)));
        assert_eq!(bank.count(ItemId(2)), 6);
        assert_eq!(bank.withdraw(ItemId(2), 4), 4);
        assert_eq!(bank.count(ItemId(2)), 2);
    }

    #[test]
    fn weight_counts_stackables_once() {
        let mut defs = vec![
            ItemDefinition::simple(1, "Coins", true),
            ItemDefinition::simple(2, "Bronze sword", false),
        ];
        defs[0].weight = 0.5;
        defs[1].weight = 2.0;
        let cat = ItemCatalog::from_defs(defs).unwrap();
        let mut inv = Inventory::new();
        inv.add_stack(ItemStack::new(ItemId(1), 1000), cat.get(ItemId(1)).unwrap());
        inv.add_stack(ItemStack::new(ItemId(2), 2), cat.get(ItemId(2)).unwrap());
        let eq = Equipment::default();
        let weight = total_weight(&inv, &eq, &cat);
        assert!((weight - 4.5).abs() < f32::EPSILON);
    }
}
