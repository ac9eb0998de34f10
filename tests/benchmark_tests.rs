//! Performance benchmarks for the hot paths of a presence session

use server::snapshot::{register_routes, SnapshotServer};
use server::EntityRegistry;
use session::{HeadlessHost, Presence, PresenceConfig};
use shared::{
    DamageEntity, DispatchStats, EnemyState, EntityId, EntityRecord, EntityState, LoopbackHub,
    Outbox, Packet, PacketDispatcher, PeerId, PlayerState,
};
use std::time::Instant;

fn enemy(species: u8) -> EntityState {
    EntityState::Enemy(EnemyState {
        position: [species as f32, 0.0, 0.0],
        rotation: 0.0,
        health: 100.0,
        species,
    })
}

/// Benchmarks snapshot record encoding and decoding
#[test]
fn benchmark_record_codec() {
    let record = EntityRecord {
        id: EntityId(42),
        state: EntityState::Player(PlayerState::at([1.0, 2.0, 3.0])),
    };

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = record.encode().unwrap();
        let decoded = EntityRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.id, record.id);
    }

    let duration = start.elapsed();
    println!(
        "Record codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the owner's per-tick broadcast with a crowded registry
#[test]
fn benchmark_broadcast_large_registry() {
    let mut server = SnapshotServer::new(PeerId(1));
    for species in 0..1_000u32 {
        server.spawn(enemy((species % 200) as u8));
    }

    let ticks = 100;
    let start = Instant::now();
    let mut queued = 0;

    for _ in 0..ticks {
        let mut outbox = Outbox::new();
        queued += server.broadcast(&mut outbox);
    }

    let duration = start.elapsed();
    println!("Broadcast: {} packets queued in {:?}", queued, duration);

    assert_eq!(queued, ticks * 1_001);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks dispatching effect packets through the owner's routes
#[test]
fn benchmark_dispatch_throughput() {
    let mut dispatcher = PacketDispatcher::new();
    register_routes(&mut dispatcher);
    let mut server = SnapshotServer::new(PeerId(1));
    let target = server.spawn(enemy(1));

    let packets: Vec<Packet> = (0..10_000)
        .map(|i| {
            Packet::encode(
                PeerId(2 + i % 8),
                &DamageEntity {
                    target,
                    amount: 0.001,
                    source: 0,
                },
            )
            .unwrap()
        })
        .collect();

    let start = Instant::now();
    let mut outbox = Outbox::new();
    let mut stats = DispatchStats::default();
    for packet in &packets {
        dispatcher.dispatch(&mut server, packet, &mut outbox, &mut stats);
    }
    let duration = start.elapsed();

    println!("Dispatch: {} packets in {:?}", packets.len(), duration);

    assert_eq!(stats.handled, packets.len());
    assert_eq!(stats.redirected, packets.len());
    assert_eq!(outbox.len(), packets.len());
    assert!(duration.as_millis() < 2000);
}

/// Stress test: many snapshots for the same few peers never duplicate entities
#[test]
fn stress_test_registry_churn() {
    let mut registry = EntityRegistry::new();
    let start = Instant::now();

    for round in 0..100_000u64 {
        let peer = PeerId(1 + round % 16);
        if round % 7 == 0 {
            registry.invalidate(EntityId::from(peer));
        }
        let (_, entity) = registry.ensure_player(peer);
        entity
            .apply_state(EntityState::Player(PlayerState::at([round as f32, 0.0, 0.0])))
            .unwrap();
    }

    let duration = start.elapsed();
    println!("Registry churn: 100k snapshots in {:?}", duration);

    for peer in 1..=16 {
        assert_eq!(registry.live_count_for(PeerId(peer)), 1);
    }
    assert_eq!(registry.len(), 16);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks a full session of sixteen members ticking over the loopback relay
#[test]
fn benchmark_full_session_ticks() {
    let hub = LoopbackHub::new();
    let config = PresenceConfig {
        max_members: 17,
        ..PresenceConfig::default()
    };
    let mut owner = Presence::new(hub.connect(), HeadlessHost::new("arena"), config.clone());
    owner.create().unwrap();
    owner.tick();
    let lobby = owner.session_id().unwrap();

    let mut members: Vec<_> = (0..16)
        .map(|_| {
            let mut member = Presence::new(hub.connect(), HeadlessHost::new("arena"), config.clone());
            member.join(lobby).unwrap();
            member
        })
        .collect();

    let ticks = 100;
    let start = Instant::now();

    for tick in 0..ticks {
        for member in &mut members {
            member.set_local_player(PlayerState::at([tick as f32, 0.0, 0.0]));
            member.tick();
        }
        owner.tick();
    }

    let duration = start.elapsed();
    println!(
        "Session: {} ticks x {} members in {:?} ({} relay messages)",
        ticks,
        members.len(),
        duration,
        hub.stats().messages
    );

    assert_eq!(owner.server().unwrap().registry().len(), 17);
    assert!(duration.as_millis() < 10_000);
}
