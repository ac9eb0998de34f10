//! Owner side of the snapshot protocol
//!
//! Members stream their own player state up as `Snapshot` packets; the owner
//! folds those into the registry and, once per tick, sends every live entity
//! back out. Effect packets are applied here and forwarded unmodified to the
//! other members by the redirect routes installed in [`register_routes`].

use crate::registry::EntityRegistry;
use log::{debug, warn};
use shared::{
    DamageEntity, Despawn, EffectEvent, Entity, EntityId, EntityKind, EntityRecord, EntityState,
    HandlerError, Interact, Outbox, Packet, PacketDispatcher, PacketType, PeerId, PlayerState,
    ProtocolError, SpawnEffect,
};

pub struct SnapshotServer {
    local: PeerId,
    registry: EntityRegistry,
}

impl SnapshotServer {
    /// The owner's own player lives in the registry from the start.
    pub fn new(local: PeerId) -> Self {
        let mut registry = EntityRegistry::new();
        registry.ensure_player(local);
        Self { local, registry }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn set_local_player(&mut self, state: PlayerState) {
        let (_, entity) = self.registry.ensure_player(self.local);
        if let Err(e) = entity.apply_state(EntityState::Player(state)) {
            warn!("Could not update local player: {}", e);
        }
    }

    pub fn spawn(&mut self, state: EntityState) -> EntityId {
        self.registry.spawn(state)
    }

    /// Player state from a member, keyed by the header sender.
    pub fn on_snapshot(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let sender = packet.sender();
        let record = EntityRecord::decode(packet.payload())?;
        if record.state.kind() != EntityKind::Player {
            return Err(HandlerError::Rejected(format!(
                "{} sent a {:?} snapshot",
                sender,
                record.state.kind()
            )));
        }
        if record.id != EntityId::from(sender) {
            debug!("{} sent a snapshot for {}, keying by sender", sender, record.id);
        }

        let (_, entity) = self.registry.ensure_player(sender);
        entity.apply_state(record.state)?;
        Ok(())
    }

    pub fn on_spawn_effect(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let effect: SpawnEffect = packet.read()?;
        match self.registry.get_mut(effect.target) {
            Some(entity) => entity.push_effect(EffectEvent {
                effect: effect.effect,
                position: effect.position,
                source: packet.sender(),
            }),
            None => debug!("Effect {} for unknown {}", effect.effect, effect.target),
        }
        Ok(())
    }

    pub fn on_damage(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let damage: DamageEntity = packet.read()?;
        let Some(entity) = self.registry.get_mut(damage.target) else {
            debug!("Damage from {} for unknown {}", packet.sender(), damage.target);
            return Ok(());
        };
        if entity.apply_damage(damage.amount).is_some() && entity.is_dead() {
            debug!("{} was killed by {}", damage.target, packet.sender());
        }
        Ok(())
    }

    pub fn on_interact(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let interact: Interact = packet.read()?;
        match self.registry.get_mut(interact.target) {
            Some(entity) => {
                if !entity.interact(packet.sender(), interact.action) {
                    debug!(
                        "{:?} on {} by {} had no effect",
                        interact.action,
                        interact.target,
                        packet.sender()
                    );
                }
            }
            None => debug!("Interact from {} for unknown {}", packet.sender(), interact.target),
        }
        Ok(())
    }

    pub fn on_despawn(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let despawn: Despawn = packet.read()?;
        if self.registry.despawn(despawn.target).is_none() {
            debug!("Despawn from {} for unknown {}", packet.sender(), despawn.target);
        }
        Ok(())
    }

    /// Drains every entity's queued effects for the game to play.
    pub fn take_effects(&mut self) -> Vec<(EntityId, EffectEvent)> {
        let mut drained = Vec::new();
        for entity in self.registry.live_mut() {
            let id = entity.id();
            drained.extend(entity.take_effects().into_iter().map(|effect| (id, effect)));
        }
        drained
    }

    pub fn on_member_left(&mut self, peer: PeerId) {
        self.registry.remove_peer(peer);
    }

    /// Queues one snapshot per live entity, skipping the entity's own peer.
    /// Returns how many packets were queued.
    pub fn broadcast(&self, outbox: &mut Outbox) -> usize {
        let mut queued = 0;
        for entity in self.registry.live() {
            match snapshot_packet(self.local, entity) {
                Ok(packet) => {
                    outbox.broadcast(packet.into_bytes(), entity.owner());
                    queued += 1;
                }
                Err(e) => warn!("Failed to encode snapshot for {}: {}", entity.id(), e),
            }
        }
        queued
    }

    /// Drops every entity; used when leaving the session.
    pub fn clear(&mut self) {
        self.registry.clear();
    }
}

pub fn snapshot_packet(sender: PeerId, entity: &Entity) -> Result<Packet, ProtocolError> {
    Packet::from_parts(sender, PacketType::Snapshot, &entity.record().encode()?)
}

/// Owner routes: snapshots are consumed here, effects are applied and then
/// relayed to the rest of the session.
pub fn register_routes(dispatcher: &mut PacketDispatcher<SnapshotServer>) {
    dispatcher.listen(PacketType::Snapshot, SnapshotServer::on_snapshot);
    dispatcher.listen_and_redirect(PacketType::SpawnEffect, SnapshotServer::on_spawn_effect);
    dispatcher.listen_and_redirect(PacketType::DamageEntity, SnapshotServer::on_damage);
    dispatcher.listen_and_redirect(PacketType::Interact, SnapshotServer::on_interact);
    dispatcher.listen_and_redirect(PacketType::Despawn, SnapshotServer::on_despawn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{DispatchStats, EnemyState, Outbound};

    const OWNER: PeerId = PeerId(1);

    fn snapshot_from(peer: PeerId, position: [f32; 3]) -> Packet {
        let record = EntityRecord {
            id: EntityId::from(peer),
            state: EntityState::Player(PlayerState::at(position)),
        };
        Packet::from_parts(peer, PacketType::Snapshot, &record.encode().unwrap()).unwrap()
    }

    fn routed() -> (PacketDispatcher<SnapshotServer>, SnapshotServer) {
        let mut dispatcher = PacketDispatcher::new();
        register_routes(&mut dispatcher);
        (dispatcher, SnapshotServer::new(OWNER))
    }

    #[test]
    fn test_snapshot_creates_player_lazily() {
        let mut server = SnapshotServer::new(OWNER);
        assert_eq!(server.registry().len(), 1);

        server.on_snapshot(&snapshot_from(PeerId(42), [1.0, 2.0, 3.0])).unwrap();
        server.on_snapshot(&snapshot_from(PeerId(42), [4.0, 5.0, 6.0])).unwrap();

        assert_eq!(server.registry().live_count_for(PeerId(42)), 1);
        let entity = server.registry().get(EntityId(42)).unwrap();
        assert_eq!(entity.state().position(), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_broadcast_excludes_entity_owner() {
        let mut server = SnapshotServer::new(OWNER);
        server.on_snapshot(&snapshot_from(PeerId(42), [1.0, 2.0, 3.0])).unwrap();

        let mut outbox = Outbox::new();
        assert_eq!(server.broadcast(&mut outbox), 2);

        let packets: Vec<(Packet, Option<PeerId>)> = outbox
            .iter()
            .map(|message| match message {
                Outbound::BroadcastPacket { data, exclude } => {
                    (Packet::decode(data.clone()).unwrap(), *exclude)
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();

        let (packet, exclude) = &packets[1];
        assert_eq!(packet.sender(), OWNER);
        assert_eq!(*exclude, Some(PeerId(42)));
        let record = EntityRecord::decode(packet.payload()).unwrap();
        assert_eq!(record.id, EntityId(42));
        assert_eq!(record.state.kind(), EntityKind::Player);
        assert_eq!(record.state.position(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_broadcast_is_stable_without_changes() {
        let mut server = SnapshotServer::new(OWNER);
        server.on_snapshot(&snapshot_from(PeerId(5), [1.0, 0.0, 0.0])).unwrap();
        server.spawn(EntityState::Enemy(EnemyState {
            position: [3.0, 0.0, 3.0],
            rotation: 1.0,
            health: 20.0,
            species: 4,
        }));

        let mut first = Outbox::new();
        let mut second = Outbox::new();
        server.broadcast(&mut first);
        server.broadcast(&mut second);
        assert_eq!(
            first.iter().collect::<Vec<_>>(),
            second.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_non_player_snapshot_rejected() {
        let mut server = SnapshotServer::new(OWNER);
        let record = EntityRecord {
            id: EntityId(6),
            state: EntityState::Enemy(EnemyState {
                position: [0.0; 3],
                rotation: 0.0,
                health: 1.0,
                species: 0,
            }),
        };
        let packet =
            Packet::from_parts(PeerId(6), PacketType::Snapshot, &record.encode().unwrap()).unwrap();

        assert!(matches!(
            server.on_snapshot(&packet),
            Err(HandlerError::Rejected(_))
        ));
        assert!(!server.registry().contains(EntityId(6)));
    }

    #[test]
    fn test_damage_to_unknown_target_still_redirects() {
        let (mut dispatcher, mut server) = routed();
        let packet = Packet::encode(
            PeerId(2),
            &DamageEntity {
                target: EntityId(999),
                amount: 10.0,
                source: 0,
            },
        )
        .unwrap();

        let mut outbox = Outbox::new();
        let mut stats = DispatchStats::default();
        dispatcher.dispatch(&mut server, &packet, &mut outbox, &mut stats);

        assert_eq!(stats.handled, 1);
        assert_eq!(server.registry().len(), 1);
        assert_eq!(
            outbox.iter().next(),
            Some(&Outbound::BroadcastPacket {
                data: packet.as_bytes().to_vec(),
                exclude: Some(PeerId(2)),
            })
        );
    }

    #[test]
    fn test_damage_applies_to_known_target() {
        let (mut dispatcher, mut server) = routed();
        server.on_snapshot(&snapshot_from(PeerId(3), [0.0; 3])).unwrap();
        let packet = Packet::encode(
            PeerId(2),
            &DamageEntity {
                target: EntityId(3),
                amount: 25.0,
                source: 1,
            },
        )
        .unwrap();

        let mut outbox = Outbox::new();
        let mut stats = DispatchStats::default();
        dispatcher.dispatch(&mut server, &packet, &mut outbox, &mut stats);

        let health = server.registry().get(EntityId(3)).unwrap().state().health();
        assert_approx_eq!(health.unwrap(), 75.0);
    }

    #[test]
    fn test_effects_queue_on_target() {
        let mut server = SnapshotServer::new(OWNER);
        let packet = Packet::encode(
            PeerId(2),
            &SpawnEffect {
                target: EntityId::from(OWNER),
                effect: 7,
                position: [1.0, 1.0, 1.0],
            },
        )
        .unwrap();
        server.on_spawn_effect(&packet).unwrap();

        let effects = server.registry().get(EntityId::from(OWNER)).unwrap().pending_effects();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].source, PeerId(2));

        let drained = server.take_effects();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, EntityId::from(OWNER));
        assert!(server.take_effects().is_empty());
    }

    #[test]
    fn test_despawn_and_member_left() {
        let mut server = SnapshotServer::new(OWNER);
        server.on_snapshot(&snapshot_from(PeerId(8), [0.0; 3])).unwrap();
        server.on_snapshot(&snapshot_from(PeerId(9), [0.0; 3])).unwrap();

        let despawn = Packet::encode(PeerId(8), &Despawn { target: EntityId(8) }).unwrap();
        server.on_despawn(&despawn).unwrap();
        server.on_despawn(&despawn).unwrap();
        server.on_member_left(PeerId(9));

        assert_eq!(server.registry().len(), 1);
        assert!(server.registry().contains(EntityId::from(OWNER)));
    }

    #[test]
    fn test_owner_routes() {
        let (dispatcher, _) = routed();
        assert!(!dispatcher.redirects(PacketType::Snapshot));
        for kind in [
            PacketType::SpawnEffect,
            PacketType::DamageEntity,
            PacketType::Interact,
            PacketType::Despawn,
        ] {
            assert!(dispatcher.redirects(kind));
        }
    }
}
