//! Trading: requests with expiry, the two-stage accept flow, offer
//! management, and settlement.
//!
//! Offered items stay in their owner's inventory until settlement; an offer
//! is a declaration, so aborting a trade never has anything to roll back.
//! Settlement snapshots both inventories first and restores them on any
//! failure, and the space check runs against the inventories as they stand
//! when both players confirm.

use bevy::prelude::*;
use lightyear::prelude::MessageSender;

use shared::items::{Inventory, ItemCatalog, ItemStack};
use shared::protocol::{
    ServerPacket, TRADE_CANCEL_CANCELLED, TRADE_CANCEL_NO_SPACE, TRADE_CANCEL_OTHER_CANCELLED,
    TRADE_CANCEL_OTHER_NO_SPACE,
};

use crate::config::TRADE_REQUEST_TIMEOUT_MS;
use crate::sessions::{send_to, Sessions};

#[derive(Debug, Clone, Copy)]
pub struct TradeRequest {
    pub from: u32,
    pub to: u32,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStage {
    Offer,
    FinalStep,
}

#[derive(Debug, Clone)]
pub struct TradeSession {
    pub users: [u32; 2],
    pub offers: [Vec<ItemStack>; 2],
    pub accepted: [bool; 2],
    pub stage: TradeStage,
}

impl TradeSession {
    fn side_of(&self, user_id: u32) -> Option<usize> {
        self.users.iter().position(|u| *u == user_id)
    }
}

#[derive(Resource, Debug, Default)]
pub struct Trades {
    pub requests: Vec<TradeRequest>,
    pub sessions: Vec<TradeSession>,
}

impl Trades {
    /// Expired requests are garbage-collected on the next trade
    /// interaction, not on a timer.
    pub fn gc_expired(&mut self, now_ms: u64) {
        self.requests.retain(|r| r.expires_at_ms > now_ms);
    }

    pub fn session_of(&self, user_id: u32) -> Option<usize> {
        self.sessions.iter().position(|s| s.side_of(user_id).is_some())
    }

    pub fn take_matching_request(&mut self, from: u32, to: u32) -> Option<TradeRequest> {
        let idx = self.requests.iter().position(|r| r.from == from && r.to == to)?;
        Some(self.requests.remove(idx))
    }

    pub fn push_request(&mut self, from: u32, to: u32, now_ms: u64) {
        // One outstanding request per pair; a re-request refreshes expiry.
        self.requests.retain(|r| !(r.from == from && r.to == to));
        self.requests.push(TradeRequest {
            from,
            to,
            expires_at_ms: now_ms + TRADE_REQUEST_TIMEOUT_MS,
        });
    }

    pub fn start_session(&mut self, a: u32, b: u32) {
        self.sessions.push(TradeSession {
            users: [a, b],
            offers: [Vec::new(), Vec::new()],
            accepted: [false, false],
            stage: TradeStage::Offer,
        });
    }
}

/// Total amount of one item form already offered by a side.
fn offered_amount(offer: &[ItemStack], item: ItemStack) -> u64 {
    offer
        .iter()
        .filter(|s| s.item_id == item.item_id && s.is_iou == item.is_iou)
        .map(|s| s.amount as u64)
        .sum()
}

/// Add to an offer, bounded by what the inventory actually holds beyond
/// what is already offered. Resets both accept flags.
pub fn add_to_offer(
    session: &mut TradeSession,
    user_id: u32,
    inventory: &Inventory,
    stack: ItemStack,
) -> Result<(), String> {
    let side = session.side_of(user_id).ok_or("Not in this trade")?;
    if session.stage != TradeStage::Offer {
        return Err("The trade has moved to confirmation.".to_string());
    }
    let held = inventory.count(stack.item_id, stack.is_iou);
    let already = offered_amount(&session.offers[side], stack);
    if already + stack.amount as u64 > held {
        return Err("You don't have that many.".to_string());
    }
    if let Some(existing) = session.offers[side]
        .iter_mut()
        .find(|s| s.item_id == stack.item_id && s.is_iou == stack.is_iou)
    {
        existing.amount = existing.amount.saturating_add(stack.amount);
    } else {
        session.offers[side].push(stack);
    }
    session.accepted = [false, false];
    Ok(())
}

/// Remove from an offer. Resets both accept flags.
pub fn remove_from_offer(
    session: &mut TradeSession,
    user_id: u32,
    stack: ItemStack,
) -> Result<(), String> {
    let side = session.side_of(user_id).ok_or("Not in this trade")?;
    if session.stage != TradeStage::Offer {
        return Err("The trade has moved to confirmation.".to_string());
    }
    let Some(existing) = session.offers[side]
        .iter_mut()
        .find(|s| s.item_id == stack.item_id && s.is_iou == stack.is_iou)
    else {
        return Err("That isn't offered.".to_string());
    };
    existing.amount = existing.amount.saturating_sub(stack.amount);
    session.offers[side].retain(|s| s.amount > 0);
    session.accepted = [false, false];
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Completed,
    /// The named side lacked the space to receive.
    NoSpace { full_side: usize },
}

/// Settle a confirmed trade between two inventories. The space check runs
/// against the inventories as they stand (offers still inside), then the
/// removals and additions happen against snapshots that are restored
/// wholesale if anything unexpected fails.
pub fn settle(
    a_inv: &mut Inventory,
    b_inv: &mut Inventory,
    offers: &[Vec<ItemStack>; 2],
    catalog: &ItemCatalog,
) -> SettleOutcome {
    if !a_inv.can_accept(&offers[1], catalog) {
        return SettleOutcome::NoSpace { full_side: 0 };
    }
    if !b_inv.can_accept(&offers[0], catalog) {
        return SettleOutcome::NoSpace { full_side: 1 };
    }

    let snapshot_a = a_inv.clone();
    let snapshot_b = b_inv.clone();

    let mut ok = true;
    for stack in &offers[0] {
        if a_inv.remove_items(stack.item_id, stack.is_iou, stack.amount) != stack.amount {
            ok = false;
        }
    }
    for stack in &offers[1] {
        if b_inv.remove_items(stack.item_id, stack.is_iou, stack.amount) != stack.amount {
            ok = false;
        }
    }
    if ok {
        for stack in &offers[1] {
            let Some(def) = catalog.get(stack.item_id) else {
                ok = false;
                break;
            };
            if a_inv.add_stack(*stack, def).is_some() {
                ok = false;
                break;
            }
        }
    }
    if ok {
        for stack in &offers[0] {
            let Some(def) = catalog.get(stack.item_id) else {
                ok = false;
                break;
            };
            if b_inv.add_stack(*stack, def).is_some() {
                ok = false;
                break;
            }
        }
    }
    if !ok {
        *a_inv = snapshot_a;
        *b_inv = snapshot_b;
        return SettleOutcome::NoSpace { full_side: 0 };
    }
    SettleOutcome::Completed
}

/// Cancel any trade involving `user_id` (disconnect, death, movement away).
/// Sends the cancellation packets; returns the other user ids whose state
/// should drop back to idle.
pub fn cancel_trades_for(
    trades: &mut Trades,
    user_id: u32,
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    reason_for_other: u8,
) -> Vec<u32> {
    let mut others = Vec::new();
    let mut i = 0;
    while i < trades.sessions.len() {
        if trades.sessions[i].side_of(user_id).is_some() {
            let session = trades.sessions.remove(i);
            for other in session.users.iter().filter(|u| **u != user_id) {
                send_to(
                    sessions,
                    senders,
                    *other,
                    ServerPacket::TradeCancelled { reason: reason_for_other },
                );
                others.push(*other);
            }
            send_to(
                sessions,
                senders,
                user_id,
                ServerPacket::TradeCancelled { reason: TRADE_CANCEL_CANCELLED },
            );
        } else {
            i += 1;
        }
    }
    trades.requests.retain(|r| r.from != user_id && r.to != user_id);
    others
}

/// Map a settlement failure to the two per-viewer reason codes.
pub fn no_space_reasons(full_side: usize, side: usize) -> u8 {
    if side == full_side {
        TRADE_CANCEL_NO_SPACE
    } else {
        TRADE_CANCEL_OTHER_NO_SPACE
    }
}

/// Reason codes for a voluntary decline.
pub fn decline_reasons(decliner_side: usize, side: usize) -> u8 {
    if side == decliner_side {
        TRADE_CANCEL_CANCELLED
    } else {
        TRADE_CANCEL_OTHER_CANCELLED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::items::{ItemDefinition, ItemId, INVENTORY_SLOTS};

    fn catalog() -> ItemCatalog {
        ItemCatalog::from_defs(vec![
            ItemDefinition::simple(1, "Coins", true),
            ItemDefinition::simple(2, "Sword", false),
        ])
        .unwrap()
    }

    fn multiset(inv: &Inventory) -> Vec<(u32, bool, u64)> {
        let mut items: Vec<(u32, bool)> = inv.iter().map(|(_, s)| (s.item_id.0, s.is_iou)).collect();
        items.sort_unstable();
        items.dedup();
        items
            .into_iter()
            .map(|(id, iou)| (id, iou, inv.count(ItemId(id), iou)))
            .collect()
    }

    #[test]
    fn settlement_preserves_the_union() {
        let cat = catalog();
        let coins = cat.get(ItemId(1)).unwrap();
        let sword = cat.get(ItemId(2)).unwrap();
        let mut a = Inventory::new();
        let mut b = Inventory::new();
        a.add_stack(ItemStack::new(ItemId(2), 3), sword);
        b.add_stack(ItemStack::new(ItemId(1), 500), coins);

        let offers = [
            vec![ItemStack::new(ItemId(2), 2)],
            vec![ItemStack::new(ItemId(1), 100)],
        ];
        let before: u64 = a.count(ItemId(1), false)
            + b.count(ItemId(1), false)
            + a.count(ItemId(2), false)
            + b.count(ItemId(2), false);
        assert_eq!(settle(&mut a, &mut b, &offers, &cat), SettleOutcome::Completed);
        let after: u64 = a.count(ItemId(1), false)
            + b.count(ItemId(1), false)
            + a.count(ItemId(2), false)
            + b.count(ItemId(2), false);
        assert_eq!(before, after);
        assert_eq!(a.count(ItemId(1), false), 100);
        assert_eq!(a.count(ItemId(2), false), 1);
        assert_eq!(b.count(ItemId(2), false), 2);
    }

    #[test]
    fn full_inventory_aborts_and_restores() {
        let cat = catalog();
        let coins = cat.get(ItemId(1)).unwrap();
        let sword = cat.get(ItemId(2)).unwrap();
        let mut a = Inventory::new();
        let mut b = Inventory::new();
        // A: 27 swords offered plus one more item filling slot 28.
        a.add_stack(ItemStack::new(ItemId(2), (INVENTORY_SLOTS - 1) as u32), sword);
        a.add_stack(ItemStack::new(ItemId(2), 1), sword);
        b.add_stack(ItemStack::new(ItemId(1), 50), coins);

        let offers = [
            vec![ItemStack::new(ItemId(2), (INVENTORY_SLOTS - 1) as u32)],
            vec![ItemStack::new(ItemId(1), 50)],
        ];
        // The space check runs with offers still in place: A is full, so the
        // incoming coin stack has nowhere to go.
        let a_before = multiset(&a);
        let b_before = multiset(&b);
        assert_eq!(
            settle(&mut a, &mut b, &offers, &cat),
            SettleOutcome::NoSpace { full_side: 0 }
        );
        assert_eq!(multiset(&a), a_before);
        assert_eq!(multiset(&b), b_before);
    }

    #[test]
    fn offer_cannot_exceed_holdings() {
        let cat = catalog();
        let sword = cat.get(ItemId(2)).unwrap();
        let mut inv = Inventory::new();
        inv.add_stack(ItemStack::new(ItemId(2), 2), sword);
        let mut session = TradeSession {
            users: [1, 2],
            offers: [Vec::new(), Vec::new()],
            accepted: [true, true],
            stage: TradeStage::Offer,
        };
        assert!(add_to_offer(&mut session, 1, &inv, ItemStack::new(ItemId(2), 2)).is_ok());
        assert!(add_to_offer(&mut session, 1, &inv, ItemStack::new(ItemId(2), 1)).is_err());
        // Any offer change resets the accept flags.
        assert_eq!(session.accepted, [false, false]);
    }

    #[test]
    fn request_gc_drops_expired_only() {
        let mut trades = Trades::default();
        trades.push_request(1, 2, 0);
        trades.push_request(3, 4, 20_000);
        trades.gc_expired(15_000);
        assert_eq!(trades.requests.len(), 1);
        assert_eq!(trades.requests[0].from, 3);
    }
}
