//! The delay system: per-player tick countdowns.
//!
//! Blocking delays stun-lock the dispatcher (only chat, logout, eat/drink
//! and in-range pickup pass); non-blocking delays are interrupted by any
//! new action other than chat and logout. Completions are collected into a
//! queue the environment system resolves immediately afterwards, so the
//! delay layer stays free of content logic.

use bevy::prelude::*;

use shared::components::PlayerStateKind;

use crate::components::{ActiveDelay, Delay, DelayCompletion, PlayerStatus};
use crate::events::GameEvent;

/// Delays that hit zero this tick.
#[derive(Resource, Debug, Default)]
pub struct CompletedDelays(pub Vec<(Entity, DelayCompletion)>);

/// Install a delay, replacing any current one.
pub fn start_delay(slot: &mut Delay, remaining: u32, blocking: bool, completion: DelayCompletion) {
    slot.0 = Some(ActiveDelay { remaining, blocking, completion });
}

/// Interrupt a non-blocking delay; blocking delays cannot be interrupted by
/// the player.
pub fn interrupt_delay(slot: &mut Delay) {
    if let Some(delay) = slot.0 {
        if !delay.blocking {
            slot.0 = None;
        }
    }
}

/// True while the player is stun-locked: an active blocking delay or the
/// stunned state itself.
pub fn is_stun_locked(delay: &Delay, status: &PlayerStatus) -> bool {
    status.state == PlayerStateKind::Stunned
        || delay.0.map(|d| d.blocking).unwrap_or(false)
}

/// P2: count down every active delay and collect completions.
pub fn tick_delays(
    mut completed: ResMut<CompletedDelays>,
    mut events: MessageWriter<GameEvent>,
    mut players: Query<(Entity, &crate::components::PlayerHandle, &mut Delay, &mut PlayerStatus)>,
) {
    for (entity, handle, mut slot, mut status) in players.iter_mut() {
        let Some(mut delay) = slot.0 else {
            continue;
        };
        delay.remaining = delay.remaining.saturating_sub(1);
        if delay.remaining > 0 {
            slot.0 = Some(delay);
            continue;
        }
        slot.0 = None;
        let finished = delay;
        if status.state == PlayerStateKind::Stunned {
            status.state = PlayerStateKind::Idle;
            events.write(GameEvent::PlayerStateChanged {
                user_id: handle.user_id,
                state: PlayerStateKind::Idle,
            });
        }
        if finished.completion != DelayCompletion::None {
            completed.0.push((entity, finished.completion));
        }
    }
}

/// Delays are dropped outright on death; completions never fire for a dead
/// player.
pub fn cancel_delay_on_death(slot: &mut Delay) {
    slot.0 = None;
}
