//! Session lifecycle: connections, the login handshake, intent draining,
//! disconnections, and the per-viewer packet send helper.

use bevy::prelude::*;
use lightyear::prelude::server::*;
use lightyear::prelude::*;
use std::collections::HashMap;

use shared::components::EntityRef;
use shared::items::total_weight;
use shared::protocol::{ClientIntent, PacketChannel, ServerPacket};

use crate::components::{
    Belongings, Delay, Pending, Plan, PlayerHandle, PlayerPos, PlayerStatus, Progress, Settings,
};
use crate::events::GameEvent;
use crate::persistence::PlayerProfiles;
use crate::spatial::SpatialIndex;
use crate::targeting::{self, NpcAggro, PlayerTargets};
use crate::world::{Catalogs, Registry};

/// Who is connected: peer to user id, user id to connection entity.
#[derive(Resource, Debug, Default)]
pub struct Sessions {
    pub user_by_peer: HashMap<PeerId, u32>,
    pub link_by_user: HashMap<u32, Entity>,
    /// Lowercase names of everyone online, for duplicate-login rejection.
    pub names_online: HashMap<String, u32>,
}

/// Inbound intents drained this tick, in arrival order per session.
#[derive(Resource, Debug, Default)]
pub struct IntentQueue(pub Vec<(Entity, PeerId, ClientIntent)>);

/// Send one packet to one player. A missing or dead link is skipped
/// silently; sink errors must not disturb other viewers.
pub fn send_to(
    sessions: &Sessions,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    user_id: u32,
    packet: ServerPacket,
) {
    let Some(link) = sessions.link_by_user.get(&user_id) else {
        return;
    };
    match senders.get_mut(*link) {
        Ok(mut sender) => sender.send::<PacketChannel>(packet),
        Err(_) => trace!("Dropped packet for user {}: link gone", user_id),
    }
}

/// Handle new client connections: enable message I/O on the link entity.
/// No player exists until the name handshake completes.
pub fn handle_connections(
    mut commands: Commands,
    new_clients: Query<(Entity, &RemoteId), Added<Connected>>,
    client_filter: Query<(), With<ClientOf>>,
) {
    for (client_entity, remote_id) in new_clients.iter() {
        if client_filter.get(client_entity).is_err() {
            continue;
        }
        info!("Client connected: {:?}", remote_id.0);
        // These must be added explicitly to the connection entity; without
        // them message traffic fails silently.
        commands.entity(client_entity).insert((
            MessageReceiver::<ClientIntent>::default(),
            MessageSender::<ServerPacket>::default(),
        ));
    }
}

/// Drain every link's inbound messages into the tick's intent queue. Per
/// link the receive order is the arrival order; that is the ordering the
/// dispatcher preserves.
pub fn receive_client_intents(
    mut queue: ResMut<IntentQueue>,
    mut links: Query<(Entity, &RemoteId, &mut MessageReceiver<ClientIntent>), With<ClientOf>>,
) {
    for (link, remote_id, mut receiver) in links.iter_mut() {
        for intent in receiver.receive() {
            queue.0.push((link, remote_id.0, intent));
        }
    }
}

/// Login handshake. Validates the name, loads or creates the profile, and
/// spawns the player entity with its state.
#[allow(clippy::too_many_arguments)]
pub fn login_player(
    commands: &mut Commands,
    registry: &mut Registry,
    sessions: &mut Sessions,
    profiles: &mut PlayerProfiles,
    index: &mut SpatialIndex,
    catalogs: &Catalogs,
    events: &mut MessageWriter<GameEvent>,
    senders: &mut Query<&mut MessageSender<ServerPacket>>,
    config: &crate::config::ServerConfig,
    link: Entity,
    peer: PeerId,
    name: &str,
) {
    let reject = |senders: &mut Query<&mut MessageSender<ServerPacket>>, reason: String| {
        if let Ok(mut sender) = senders.get_mut(link) {
            sender.send::<PacketChannel>(ServerPacket::LoginRejected { reason });
        }
    };

    if sessions.user_by_peer.contains_key(&peer) {
        // Already logged in on this connection.
        return;
    }
    if let Err(reason) = PlayerProfiles::validate_name(name) {
        reject(senders, format!("Invalid name: {:?}", reason));
        return;
    }
    let name_lower = name.trim().to_lowercase();
    if sessions.names_online.contains_key(&name_lower) {
        reject(senders, "That character is already online.".to_string());
        return;
    }

    let profile = match profiles.load_profile(name) {
        Ok(profile) => profile,
        Err(_) => {
            info!("Creating fresh profile for '{}'", name);
            shared::player_profile::PlayerProfile::new(name, config.spawn_position)
        }
    };

    let user_id = registry.alloc_user_id();
    let pos = profile.position;
    let weight = total_weight(&profile.inventory, &profile.equipment, &catalogs.items);
    let combat_level = profile.skills.combat_level();

    let player = commands
        .spawn((
            PlayerHandle {
                user_id,
                username: profile.username.clone(),
                display_name: profile.display_name.clone(),
                player_type: profile.player_type,
                link,
                peer,
            },
            PlayerPos(pos),
            PlayerStatus::new(profile.appearance, profile.muted),
            Pending::default(),
            Plan::default(),
            Delay::default(),
            Belongings {
                inventory: profile.inventory.clone(),
                equipment: profile.equipment.clone(),
                bank: profile.bank.clone(),
                dirty: false,
            },
            Progress {
                skills: profile.skills.clone(),
                abilities: profile.abilities,
                combat_level,
                weight,
            },
            Settings(profile.settings.clone()),
        ))
        .id();

    registry.players.insert(user_id, player);
    sessions.user_by_peer.insert(peer, user_id);
    sessions.link_by_user.insert(user_id, link);
    sessions.names_online.insert(name_lower.clone(), user_id);
    profiles.bind_online(&name_lower, peer);
    index.insert_player(user_id, pos);

    if let Ok(mut sender) = senders.get_mut(link) {
        sender.send::<PacketChannel>(ServerPacket::LoginAccepted { user_id, pos });
    }
    events.write(GameEvent::PlayerJoined { user_id });
    info!("Player '{}' logged in as user {}", profile.display_name, user_id);
}

/// Handle client disconnections: flush state, clear targets, tell viewers,
/// tear the session down.
#[allow(clippy::too_many_arguments)]
pub fn handle_disconnections(
    mut commands: Commands,
    disconnected: Query<(Entity, &RemoteId), Added<Disconnected>>,
    client_filter: Query<(), With<ClientOf>>,
    mut registry: ResMut<Registry>,
    mut sessions: ResMut<Sessions>,
    mut profiles: ResMut<PlayerProfiles>,
    mut index: ResMut<SpatialIndex>,
    mut targets: ResMut<PlayerTargets>,
    mut trades: ResMut<crate::trade::Trades>,
    mut events: MessageWriter<GameEvent>,
    mut npc_aggro: Query<(&crate::components::NpcHandle, &mut NpcAggro)>,
    players: Query<(&PlayerHandle, &PlayerPos, &PlayerStatus, &Belongings, &Progress, &Settings)>,
    mut senders: Query<&mut MessageSender<ServerPacket>>,
) {
    for (link_entity, remote_id) in disconnected.iter() {
        if client_filter.get(link_entity).is_err() {
            continue;
        }
        let peer = remote_id.0;
        info!("Client disconnected: {:?}", peer);

        if let Some(user_id) = sessions.user_by_peer.remove(&peer) {
            if let Some(player_entity) = registry.players.remove(&user_id) {
                if let Ok((handle, pos, status, belongings, progress, settings)) =
                    players.get(player_entity)
                {
                    let profile = crate::persistence::build_profile(
                        handle, pos, status, belongings, progress, settings,
                    );
                    if let Err(e) = profiles.save_profile(&profile) {
                        error!("Failed to save profile on disconnect: {}", e);
                    }
                    sessions.names_online.remove(&handle.username);
                    profiles.unbind_online(&handle.username);
                    events.write(GameEvent::PlayerLeft { user_id, at: pos.0 });
                }
                commands.entity(player_entity).despawn();
            }
            sessions.link_by_user.remove(&user_id);
            index.remove_player(user_id);
            // The leaver's own stopped-targeting event is suppressed; anyone
            // targeting them is cleared with events.
            targeting::clear_player_target_on_disconnect(&mut targets, user_id);
            targeting::clear_targets_on_entity(
                &mut targets,
                &mut npc_aggro,
                &mut events,
                EntityRef::player(user_id),
            );
            crate::trade::cancel_trades_for(
                &mut trades,
                user_id,
                &sessions,
                &mut senders,
                shared::protocol::TRADE_CANCEL_OTHER_CANCELLED,
            );
        }

        // Despawn the link entity itself to stop message-io errors.
        commands.entity(link_entity).despawn();
    }
}
