//! Game server: a headless bevy app driving the authoritative tile-world
//! simulation on a fixed tick.

mod aggro;
mod combat;
mod components;
mod config;
mod delay;
mod dispatch;
mod environment;
mod events;
mod follow;
mod ground_items;
mod interactions;
mod inventory;
mod movement;
mod pathfinding;
mod pending;
mod persistence;
mod sessions;
mod spatial;
mod targeting;
mod trade;
mod visibility;
mod wilderness;
mod world;

use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use lightyear::prelude::server::*;
use lightyear::prelude::*;
use std::net::{SocketAddr, ToSocketAddrs};

use shared::protocol::{tick_duration, tick_ms, ProtocolPlugin, PRIVATE_KEY, PROTOCOL_ID, SERVER_PORT};
use shared::get_server_bind_addr;

use crate::events::GameEvent;

/// Marker for our server entity.
#[derive(Component)]
struct GameServer;

/// The per-tick pipeline. Phases run strictly in this order; everything
/// within a tick is single-threaded and cooperative.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TickPhase {
    /// Clock advance and session churn.
    Tick,
    /// P1: drain inbound intents into the dispatcher.
    Intents,
    /// P2: delay countdowns and completions.
    Delays,
    /// P3: NPC target acquisition/validation.
    Aggro,
    /// P4: player pathfinding + movement (combat-state pursuit included).
    PlayerMovement,
    /// P5: follow pursuit and the same-tick catch-up advance.
    Follow,
    /// P6: NPC pathfinding + movement.
    NpcMovement,
    /// P7: pending-action reconciliation.
    Pending,
    /// P8: per-tick services (combat strikes, respawns, resources, saves).
    Services,
    /// P9: visibility event dispatch and packet flush.
    Visibility,
}

/// Spawn the server entity with all required networking components.
fn spawn_server(mut commands: Commands) {
    let bind_addr = get_server_bind_addr();
    let server_addr: SocketAddr = (bind_addr, SERVER_PORT)
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .expect("Invalid server bind address");

    info!("Spawning server entity, binding to {:?}", server_addr);
    commands.spawn((
        GameServer,
        Server::default(),
        ServerUdpIo::default(),
        LocalAddr(server_addr),
        NetcodeServer::new(NetcodeConfig {
            protocol_id: PROTOCOL_ID,
            private_key: PRIVATE_KEY,
            ..default()
        }),
    ));
}

/// Start the server once it exists.
fn start_server(
    mut commands: Commands,
    server_query: Query<Entity, (With<GameServer>, Without<Started>, Without<Starting>)>,
) {
    for server_entity in server_query.iter() {
        info!("Starting server...");
        commands.trigger(Start { entity: server_entity });
    }
}

fn server_is_started(server_query: Query<(), (With<GameServer>, With<Started>)>) -> bool {
    !server_query.is_empty()
}

fn main() {
    let mut app = App::new();

    // Headless: run the main loop at exactly the simulation tick rate so
    // message buffers drained in FixedUpdate never get cleared between
    // gameplay reads.
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick_duration())));
    app.add_plugins(bevy::log::LogPlugin::default());
    app.add_plugins(bevy::state::app::StatesPlugin);

    let config = config::ServerConfig::from_env();
    info!(
        "Tick {} ms, assets at {:?}, stamina {}",
        tick_ms(),
        config.static_assets_path,
        if config.disable_stamina { "disabled" } else { "enabled" }
    );
    app.insert_resource(config);
    app.insert_resource(config::WorldClock::new(tick_ms()));
    app.insert_resource(persistence::PlayerProfiles::new(std::path::PathBuf::from(
        "server_data/players",
    )));

    app.init_resource::<world::Registry>();
    app.init_resource::<world::WorldRng>();
    app.init_resource::<world::ItemSpawns>();
    app.init_resource::<sessions::Sessions>();
    app.init_resource::<sessions::IntentQueue>();
    app.init_resource::<spatial::SpatialIndex>();
    app.init_resource::<spatial::StaticEntityIndex>();
    app.init_resource::<visibility::ViewerState>();
    app.init_resource::<targeting::PlayerTargets>();
    app.init_resource::<trade::Trades>();
    app.init_resource::<pathfinding::Pathfinder>();
    app.init_resource::<movement::ArrivalQueue>();
    app.init_resource::<movement::FollowAdvanceQueue>();
    app.init_resource::<delay::CompletedDelays>();
    app.init_resource::<wilderness::WildernessMap>();

    app.add_message::<GameEvent>();

    // Lightyear server plugins share the simulation tick length.
    app.add_plugins(ServerPlugins { tick_duration: tick_duration() });
    app.add_plugins(ProtocolPlugin);

    app.add_systems(
        Startup,
        (world::load_catalogs, world::load_pathing_grids, spawn_server).chain(),
    );
    // World population needs the catalogs inserted by startup commands.
    app.add_systems(PostStartup, world::populate_world);
    app.add_systems(Update, start_server);

    app.configure_sets(
        FixedUpdate,
        (
            TickPhase::Tick,
            TickPhase::Intents,
            TickPhase::Delays,
            TickPhase::Aggro,
            TickPhase::PlayerMovement,
            TickPhase::Follow,
            TickPhase::NpcMovement,
            TickPhase::Pending,
            TickPhase::Services,
            TickPhase::Visibility,
        )
            .chain()
            .run_if(server_is_started),
    );

    app.add_systems(
        FixedUpdate,
        (
            config::advance_clock,
            sessions::handle_connections,
            sessions::handle_disconnections,
        )
            .chain()
            .in_set(TickPhase::Tick),
    );
    app.add_systems(
        FixedUpdate,
        (sessions::receive_client_intents, dispatch::dispatch_client_intents)
            .chain()
            .in_set(TickPhase::Intents),
    );
    app.add_systems(
        FixedUpdate,
        (delay::tick_delays, environment::resolve_completed_delays)
            .chain()
            .in_set(TickPhase::Delays),
    );
    app.add_systems(FixedUpdate, aggro::update_npc_aggro.in_set(TickPhase::Aggro));
    app.add_systems(
        FixedUpdate,
        (
            follow::prepare_for_tick,
            combat::update_player_combat_paths,
            movement::advance_player_plans,
        )
            .chain()
            .in_set(TickPhase::PlayerMovement),
    );
    app.add_systems(
        FixedUpdate,
        (follow::update, follow::advance_follow_queue)
            .chain()
            .in_set(TickPhase::Follow),
    );
    app.add_systems(
        FixedUpdate,
        (movement::update_npc_paths, movement::advance_npc_plans)
            .chain()
            .in_set(TickPhase::NpcMovement),
    );
    app.add_systems(
        FixedUpdate,
        (pending::process_arrivals, pending::process_pending_environment)
            .chain()
            .in_set(TickPhase::Pending),
    );
    app.add_systems(
        FixedUpdate,
        (
            combat::resolve_player_attacks,
            combat::resolve_npc_attacks,
            combat::validate_player_targets,
            combat::respawn_players,
            combat::npc_lifecycle,
            environment::replenish_resources,
            environment::despawn_orphaned_instances,
            ground_items::tick_ground_items,
            persistence::periodic_player_save,
        )
            .chain()
            .in_set(TickPhase::Services),
    );
    app.add_systems(
        FixedUpdate,
        visibility::dispatch_game_events.in_set(TickPhase::Visibility),
    );

    info!("Starting server on port {}", SERVER_PORT);
    app.run();
}
