use clap::Parser;
use log::{debug, info, warn};
use rand::Rng;
use session::{HeadlessHost, LobbyState, Presence, PresenceConfig};
use shared::{
    EnemyState, EntityId, EntityState, LoopbackHub, LoopbackRelay, PlayerState, SessionSettings,
};
use tokio::time::{interval, MissedTickBehavior};

type Peer = Presence<LoopbackRelay, HeadlessHost>;

/// Runs an owner and a handful of simulated members over an in-process
/// relay, then has the owner leave so the members' teardown can be observed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Number of simulated members joining the lobby
        #[clap(short, long, default_value = "3")]
        members: usize,
        /// Ticks to run before the owner leaves
        #[clap(short = 'n', long, default_value = "300")]
        ticks: u64,
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "30")]
        tick_rate: u32,
        /// Allow players to damage each other
        #[clap(long)]
        pvp: bool,
        /// Enable cheats for everyone in the lobby
        #[clap(long)]
        cheats: bool,
        /// Name published in the lobby metadata
        #[clap(short, long, default_value = "Presence Lobby")]
        lobby_name: String,
    }

    // Set RUST_LOG=debug to see per-packet traffic
    env_logger::init();
    let args = Args::parse();

    let config = PresenceConfig {
        max_members: args.members + 1,
        lobby_name: args.lobby_name.clone(),
        tick_rate: args.tick_rate,
        settings: SessionSettings {
            pvp: args.pvp,
            cheats: args.cheats,
            ..SessionSettings::default()
        },
    };

    let hub = LoopbackHub::new();
    let mut owner: Peer = Presence::new(hub.connect(), HeadlessHost::new("arena"), config.clone());
    owner.create()?;
    owner.tick();
    let lobby = owner.session_id().ok_or("lobby creation did not complete")?;
    info!("Owner {} hosting {}", owner.local_peer(), lobby);

    let enemies: Vec<EntityId> = (0..3u8)
        .filter_map(|species| {
            owner.spawn_entity(EntityState::Enemy(EnemyState {
                position: [species as f32 * 4.0, 0.0, 8.0],
                rotation: 0.0,
                health: 100.0,
                species,
            }))
        })
        .collect();

    let mut members: Vec<Peer> = (0..args.members)
        .map(|_| Presence::new(hub.connect(), HeadlessHost::new("arena"), config.clone()))
        .collect();
    for member in &mut members {
        member.join(lobby)?;
    }

    let mut rng = rand::thread_rng();
    let mut positions = vec![[0.0f32; 3]; members.len()];

    let mut interval_timer = interval(config.tick_duration());
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    interval_timer.tick().await;

    for tick in 1..=args.ticks {
        interval_timer.tick().await;

        for (member, position) in members.iter_mut().zip(positions.iter_mut()) {
            position[0] += rng.gen_range(-0.5f32..0.5);
            position[2] += rng.gen_range(-0.5f32..0.5);
            member.set_local_player(PlayerState::at(*position));

            if !enemies.is_empty() && rng.gen_bool(0.05) {
                let target = enemies[rng.gen_range(0..enemies.len())];
                if let Err(e) = member.emit_damage(target, rng.gen_range(1.0f32..10.0), 0) {
                    warn!("{} failed to emit damage: {}", member.local_peer(), e);
                }
            }
            member.tick();
        }
        owner.tick();

        if tick % 60 == 0 {
            let live = owner.server().map_or(0, |server| server.registry().len());
            debug!("Tick {}: {} live entities on the owner", tick, live);
        }
    }

    if let Some(server) = owner.server() {
        for id in &enemies {
            if let Some(health) = server.registry().get(*id).and_then(|e| e.state().health()) {
                info!("{} ends with {:.1} health", id, health);
            }
        }
    }

    info!("Owner leaving after {} ticks", args.ticks);
    owner.leave();
    for member in &mut members {
        member.tick();
    }

    let offline = members
        .iter()
        .filter(|member| member.state() == LobbyState::Offline)
        .count();
    info!(
        "{} of {} members left with the owner ({} relay messages total)",
        offline,
        members.len(),
        hub.stats().messages
    );

    Ok(())
}
