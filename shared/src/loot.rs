//! Weighted loot tables, rolled by the server's loot service.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::items::{ItemId, ItemStack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct LootTableId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootEntry {
    pub item_id: ItemId,
    pub min_amount: u32,
    pub max_amount: u32,
    /// Relative weight inside the table; zero entries never roll.
    pub weight: u32,
    pub as_iou: bool,
}

/// One weighted table. `rolls` independent draws per invocation; an entry
/// with item id 0 is the conventional "nothing" slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootTable {
    pub id: LootTableId,
    pub rolls: u32,
    pub entries: Vec<LootEntry>,
}

impl LootTable {
    pub fn roll(&self, rng: &mut impl Rng) -> Vec<ItemStack> {
        let total: u32 = self.entries.iter().map(|e| e.weight).sum();
        if total == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        for _ in 0..self.rolls {
            let mut pick = rng.gen_range(0..total);
            for entry in &self.entries {
                if pick < entry.weight {
                    if entry.item_id.0 != 0 {
                        let amount = rng.gen_range(entry.min_amount..=entry.max_amount.max(entry.min_amount));
                        if amount > 0 {
                            out.push(ItemStack {
                                item_id: entry.item_id,
                                amount,
                                is_iou: entry.as_iou,
                            });
                        }
                    }
                    break;
                }
                pick -= entry.weight;
            }
        }
        out
    }
}

#[derive(Debug, Default, Clone)]
pub struct LootTables {
    tables: std::collections::HashMap<u32, LootTable>,
}

impl LootTables {
    pub fn from_tables(tables: Vec<LootTable>) -> Result<Self, String> {
        let mut map = std::collections::HashMap::new();
        for table in tables {
            let id = table.id.0;
            if map.insert(id, table).is_some() {
                return Err(format!("Duplicate loot table id {}", id));
            }
        }
        Ok(Self { tables: map })
    }

    pub fn load_ron(text: &str) -> Result<Self, String> {
        let tables: Vec<LootTable> =
            ron::from_str(text).map_err(|e| format!("Loot table parse error: {}", e))?;
        Self::from_tables(tables)
    }

    pub fn get(&self, id: LootTableId) -> Option<&LootTable> {
        self.tables.get(&id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn single_certain_entry_always_rolls() {
        let table = LootTable {
            id: LootTableId(1),
            rolls: 1,
            entries: vec![LootEntry {
                item_id: ItemId(7),
                min_amount: 2,
                max_amount: 2,
                weight: 1,
                as_iou: false,
            }],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..20 {
            let rolled = table.roll(&mut rng);
            assert_eq!(rolled.len(), 1);
            assert_eq!(rolled[0].amount, 2);
        }
    }

    #[test]
    fn nothing_entry_yields_empty() {
        let table = LootTable {
            id: LootTableId(2),
            rolls: 1,
            entries: vec![LootEntry {
                item_id: ItemId(0),
                min_amount: 0,
                max_amount: 0,
                weight: 1,
                as_iou: false,
            }],
        };
        let mut rng = SmallRng::seed_from_u64(2);
        assert!(table.roll(&mut rng).is_empty());
    }
}
