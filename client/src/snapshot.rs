//! Member side of the snapshot protocol
//!
//! Members author exactly one entity, their own player, and send it to the
//! owner every tick. Everything else arrives from the owner and lands in the
//! shadow state. Routes are plain `listen` bindings; a member never forwards.

use crate::shadow::ShadowState;
use log::{debug, warn};
use shared::{
    DamageEntity, Despawn, EffectEvent, Entity, EntityId, EntityRecord, EntityState, HandlerError,
    Interact, Outbox, Packet, PacketDispatcher, PacketType, PeerId, PlayerState, ProtocolError,
    SpawnEffect,
};

pub struct SnapshotClient {
    local: PeerId,
    owner: PeerId,
    shadow: ShadowState,
    local_player: Entity,
}

impl SnapshotClient {
    pub fn new(local: PeerId, owner: PeerId) -> Self {
        Self {
            local,
            owner,
            shadow: ShadowState::new(local),
            local_player: Entity::player(local),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn shadow(&self) -> &ShadowState {
        &self.shadow
    }

    pub fn shadow_mut(&mut self) -> &mut ShadowState {
        &mut self.shadow
    }

    pub fn local_player(&self) -> &Entity {
        &self.local_player
    }

    pub fn local_player_mut(&mut self) -> &mut Entity {
        &mut self.local_player
    }

    pub fn set_local_player(&mut self, state: PlayerState) {
        if let Err(e) = self.local_player.apply_state(EntityState::Player(state)) {
            warn!("Could not update local player: {}", e);
        }
    }

    /// Effects aimed at our own id land on the local player.
    fn target_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if id == self.local_player.id() {
            Some(&mut self.local_player)
        } else {
            self.shadow.get_mut(id)
        }
    }

    pub fn on_snapshot(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        if packet.sender() != self.owner {
            return Err(HandlerError::Rejected(format!(
                "snapshot from {} who does not own the session",
                packet.sender()
            )));
        }
        let record = EntityRecord::decode(packet.payload())?;
        self.shadow.apply(record)?;
        Ok(())
    }

    pub fn on_spawn_effect(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let effect: SpawnEffect = packet.read()?;
        match self.target_mut(effect.target) {
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
        match self.target_mut(damage.target) {
            Some(entity) => {
                entity.apply_damage(damage.amount);
            }
            None => debug!("Damage for unknown {}", damage.target),
        }
        Ok(())
    }

    pub fn on_interact(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let interact: Interact = packet.read()?;
        let sender = packet.sender();
        match self.target_mut(interact.target) {
            Some(entity) => {
                entity.interact(sender, interact.action);
            }
            None => debug!("Interact for unknown {}", interact.target),
        }
        Ok(())
    }

    pub fn on_despawn(&mut self, packet: &Packet) -> Result<(), HandlerError> {
        let despawn: Despawn = packet.read()?;
        if self.shadow.remove(despawn.target).is_none() {
            debug!("Despawn for unknown {}", despawn.target);
        }
        Ok(())
    }

    /// Drains queued effects from the local player and every shadow.
    pub fn take_effects(&mut self) -> Vec<(EntityId, EffectEvent)> {
        let local = self.local_player.id();
        let mut drained: Vec<(EntityId, EffectEvent)> = self
            .local_player
            .take_effects()
            .into_iter()
            .map(|effect| (local, effect))
            .collect();
        for entity in self.shadow.iter_mut() {
            let id = entity.id();
            drained.extend(entity.take_effects().into_iter().map(|effect| (id, effect)));
        }
        drained
    }

    pub fn on_member_left(&mut self, peer: PeerId) {
        self.shadow.remove_peer(peer);
    }

    /// Queues the local player's snapshot for the owner.
    pub fn upstream(&self, outbox: &mut Outbox) -> Result<(), ProtocolError> {
        let record = self.local_player.record().encode()?;
        let packet = Packet::from_parts(self.local, PacketType::Snapshot, &record)?;
        outbox.send(self.owner, packet.into_bytes());
        Ok(())
    }

    pub fn clear(&mut self) {
        self.shadow.clear();
        self.local_player = Entity::player(self.local);
    }
}

pub fn register_routes(dispatcher: &mut PacketDispatcher<SnapshotClient>) {
    dispatcher.listen(PacketType::Snapshot, SnapshotClient::on_snapshot);
    dispatcher.listen(PacketType::SpawnEffect, SnapshotClient::on_spawn_effect);
    dispatcher.listen(PacketType::DamageEntity, SnapshotClient::on_damage);
    dispatcher.listen(PacketType::Interact, SnapshotClient::on_interact);
    dispatcher.listen(PacketType::Despawn, SnapshotClient::on_despawn);
}
