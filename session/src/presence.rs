//! Tick driver tying the lobby lifecycle to the active role
//!
//! One call to [`Presence::tick`] does, in order:
//!
//! 1. relay membership events (owner departure tears the session down here)
//! 2. completed lobby requests (entering a session sets up the role)
//! 3. one dispatch pass over everything the relay has buffered, then
//!    departed players are pruned and queued effects go to the host
//! 4. owner broadcast or member upstream snapshot
//! 5. one outbox flush

use crate::config::PresenceConfig;
use crate::context::{Authority, SessionContext};
use crate::host::Host;
use crate::lobby::{LobbyError, LobbyEvent, LobbyLifecycle, LobbyState};
use client::snapshot::{self as member, SnapshotClient};
use log::{debug, info, warn};
use server::snapshot::{self as owner, SnapshotServer};
use shared::{
    DamageEntity, Despawn, DispatchStats, EffectEvent, EntityId, EntityState, Interact,
    InteractAction, Outbox, Packet, PacketDispatcher, Payload, PeerId, PlayerState, ProtocolError,
    Relay, RelayEvent, SessionId, SessionInfo, SessionSettings, SpawnEffect,
};

enum Role {
    Idle,
    Owner {
        dispatcher: PacketDispatcher<SnapshotServer>,
        server: SnapshotServer,
    },
    Member {
        dispatcher: PacketDispatcher<SnapshotClient>,
        client: SnapshotClient,
    },
}

impl Role {
    fn on_member_left(&mut self, peer: PeerId) {
        match self {
            Role::Owner { server, .. } => server.on_member_left(peer),
            Role::Member { client, .. } => client.on_member_left(peer),
            Role::Idle => {}
        }
    }

    /// Player state only exists for current members. Traffic that was
    /// queued before a leave event can bring a departed player back.
    fn retain_members(&mut self, members: &[PeerId]) -> usize {
        match self {
            Role::Owner { server, .. } => server.registry_mut().retain_members(members),
            Role::Member { client, .. } => client.shadow_mut().retain_members(members),
            Role::Idle => 0,
        }
    }

    fn take_effects(&mut self) -> Vec<(EntityId, EffectEvent)> {
        match self {
            Role::Owner { server, .. } => server.take_effects(),
            Role::Member { client, .. } => client.take_effects(),
            Role::Idle => Vec::new(),
        }
    }
}

/// Presence in a relay session for one local peer.
pub struct Presence<R: Relay, H: Host> {
    relay: R,
    host: H,
    lobby: LobbyLifecycle,
    role: Role,
    outbox: Outbox,
    local_player: PlayerState,
    tick: u64,
    last_stats: DispatchStats,
}

impl<R: Relay, H: Host> Presence<R, H> {
    pub fn new(relay: R, host: H, config: PresenceConfig) -> Self {
        Self {
            relay,
            host,
            lobby: LobbyLifecycle::new(config),
            role: Role::Idle,
            outbox: Outbox::new(),
            local_player: PlayerState::default(),
            tick: 0,
            last_stats: DispatchStats::default(),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.relay.local_peer()
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn relay_mut(&mut self) -> &mut R {
        &mut self.relay
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn lobby(&self) -> &LobbyLifecycle {
        &self.lobby
    }

    pub fn state(&self) -> LobbyState {
        self.lobby.state()
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.lobby.context()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lobby.context().map(|context| context.session)
    }

    pub fn is_owner(&self) -> bool {
        self.lobby.is_owner()
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn last_stats(&self) -> DispatchStats {
        self.last_stats
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Owner state, present only while this peer owns the session.
    pub fn server(&self) -> Option<&SnapshotServer> {
        match &self.role {
            Role::Owner { server, .. } => Some(server),
            _ => None,
        }
    }

    pub fn server_mut(&mut self) -> Option<&mut SnapshotServer> {
        match &mut self.role {
            Role::Owner { server, .. } => Some(server),
            _ => None,
        }
    }

    /// Member state, present only while in someone else's session.
    pub fn client(&self) -> Option<&SnapshotClient> {
        match &self.role {
            Role::Member { client, .. } => Some(client),
            _ => None,
        }
    }

    pub fn client_mut(&mut self) -> Option<&mut SnapshotClient> {
        match &mut self.role {
            Role::Member { client, .. } => Some(client),
            _ => None,
        }
    }

    /// Owner routes, for overriding a handler. Rebuilt on every session entry.
    pub fn owner_dispatcher_mut(&mut self) -> Option<&mut PacketDispatcher<SnapshotServer>> {
        match &mut self.role {
            Role::Owner { dispatcher, .. } => Some(dispatcher),
            _ => None,
        }
    }

    /// Member routes, for overriding a handler. Rebuilt on every session entry.
    pub fn member_dispatcher_mut(&mut self) -> Option<&mut PacketDispatcher<SnapshotClient>> {
        match &mut self.role {
            Role::Member { dispatcher, .. } => Some(dispatcher),
            _ => None,
        }
    }

    pub fn create(&mut self) -> Result<(), LobbyError> {
        self.lobby.create_lobby(&mut self.relay)
    }

    pub fn join(&mut self, target: SessionId) -> Result<(), LobbyError> {
        if let Err(e) = self.lobby.check_join(&self.relay, target) {
            self.host.notify(&e.to_string());
            return Err(e);
        }
        if self.lobby.is_online() {
            self.release_role();
        }
        self.lobby.join_lobby(&mut self.relay, &mut self.host, target)
    }

    pub fn leave(&mut self) {
        self.teardown(true);
    }

    pub fn fetch_public_lobbies(&mut self) {
        self.lobby.fetch_public_lobbies(&mut self.relay);
    }

    pub fn public_lobbies(&self) -> &[SessionInfo] {
        self.lobby.public_lobbies()
    }

    pub fn settings(&self) -> SessionSettings {
        self.lobby.settings(&self.relay)
    }

    pub fn update_settings(&mut self, settings: SessionSettings) -> Result<(), LobbyError> {
        self.lobby.update_settings(&mut self.relay, settings)
    }

    /// The game loaded another level. The owner republishes it and drops
    /// entities that belonged to the old one.
    pub fn on_level_changed(&mut self, level: &str) {
        match &mut self.role {
            Role::Owner { server, .. } => {
                if let Err(e) = self.lobby.update_level(&mut self.relay, level) {
                    warn!("Failed to publish level {}: {}", level, e);
                }
                let local = server.local_peer();
                server.registry_mut().reset_for_level(local);
            }
            Role::Member { client, .. } => client.shadow_mut().reset_for_level(),
            Role::Idle => {}
        }
    }

    pub fn set_local_player(&mut self, state: PlayerState) {
        self.local_player = state;
        match &mut self.role {
            Role::Owner { server, .. } => server.set_local_player(state),
            Role::Member { client, .. } => client.set_local_player(state),
            Role::Idle => {}
        }
    }

    /// Owner only: adds an entity to the registry.
    pub fn spawn_entity(&mut self, state: EntityState) -> Option<EntityId> {
        match &mut self.role {
            Role::Owner { server, .. } => Some(server.spawn(state)),
            _ => None,
        }
    }

    pub fn emit_spawn_effect(
        &mut self,
        target: EntityId,
        effect: u8,
        position: [f32; 3],
    ) -> Result<bool, ProtocolError> {
        self.emit(&SpawnEffect {
            target,
            effect,
            position,
        })
    }

    pub fn emit_damage(
        &mut self,
        target: EntityId,
        amount: f32,
        source: u8,
    ) -> Result<bool, ProtocolError> {
        self.emit(&DamageEntity {
            target,
            amount,
            source,
        })
    }

    pub fn emit_interact(
        &mut self,
        target: EntityId,
        action: InteractAction,
    ) -> Result<bool, ProtocolError> {
        self.emit(&Interact { target, action })
    }

    pub fn emit_despawn(&mut self, target: EntityId) -> Result<bool, ProtocolError> {
        self.emit(&Despawn { target })
    }

    /// Applies a locally raised effect through this peer's own routes and
    /// queues it for the session. The owner's redirect route fans it out;
    /// a member also sends it to the owner. Returns false while idle.
    pub fn emit<P: Payload>(&mut self, payload: &P) -> Result<bool, ProtocolError> {
        let packet = Packet::encode(self.relay.local_peer(), payload)?;
        let mut stats = DispatchStats::default();
        match &mut self.role {
            Role::Owner { dispatcher, server } => {
                dispatcher.dispatch(server, &packet, &mut self.outbox, &mut stats);
            }
            Role::Member { dispatcher, client } => {
                dispatcher.dispatch(client, &packet, &mut self.outbox, &mut stats);
                self.outbox.send(client.owner(), packet.into_bytes());
            }
            Role::Idle => {
                debug!("Not in a session, dropping {:?}", P::KIND);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs one tick. See the module docs for the order of work.
    pub fn tick(&mut self) -> DispatchStats {
        self.tick += 1;

        for event in self.relay.poll_events() {
            self.on_relay_event(event);
        }

        for event in self.lobby.poll(&mut self.relay, &mut self.host) {
            self.on_lobby_event(event);
        }

        let stats = self.dispatch_pending();
        if !matches!(self.role, Role::Idle) {
            let members = self.relay.list_members();
            let pruned = self.role.retain_members(&members);
            if pruned > 0 {
                debug!("Pruned {} players of departed peers", pruned);
            }
        }
        for (entity, effect) in self.role.take_effects() {
            self.host.play_effect(entity, &effect);
        }

        match &self.role {
            Role::Owner { server, .. } => {
                server.broadcast(&mut self.outbox);
            }
            Role::Member { client, .. } => {
                if let Err(e) = client.upstream(&mut self.outbox) {
                    warn!("Failed to encode local snapshot: {}", e);
                }
            }
            Role::Idle => {}
        }

        let sent = self.outbox.flush(&mut self.relay);

        if self.tick % 60 == 0 {
            debug!(
                "Tick {} for {}: {:?}, {} received, {} handled, {} redirected, {} sent",
                self.tick,
                self.relay.local_peer(),
                self.lobby.state(),
                stats.received,
                stats.handled,
                stats.redirected,
                sent
            );
        }

        self.last_stats = stats;
        stats
    }

    fn dispatch_pending(&mut self) -> DispatchStats {
        match &mut self.role {
            Role::Owner { dispatcher, server } => {
                dispatcher.dispatch_pending(&mut self.relay, server, &mut self.outbox)
            }
            Role::Member { dispatcher, client } => {
                dispatcher.dispatch_pending(&mut self.relay, client, &mut self.outbox)
            }
            Role::Idle => {
                let mut stats = DispatchStats::default();
                while let Some((from, _)) = self.relay.receive() {
                    debug!("Dropping message from {} outside a session", from);
                    stats.received += 1;
                    stats.dropped += 1;
                }
                stats
            }
        }
    }

    fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::MemberJoined(peer) => info!("{} joined the session", peer),
            RelayEvent::MemberLeft(peer) if self.lobby.is_owner_departure(peer) => {
                info!("Session owner {} left, leaving the session", peer);
                self.host.notify("The lobby owner left the session");
                self.teardown(true);
            }
            RelayEvent::MemberLeft(peer) => {
                info!("{} left the session", peer);
                self.role.on_member_left(peer);
            }
        }
    }

    fn on_lobby_event(&mut self, event: LobbyEvent) {
        let LobbyEvent::Entered(context) = event else {
            return;
        };
        self.outbox.clear();
        self.role = match context.authority {
            Authority::Owner => {
                let mut dispatcher = PacketDispatcher::new();
                owner::register_routes(&mut dispatcher);
                let mut server = SnapshotServer::new(context.local);
                server.set_local_player(self.local_player);
                Role::Owner { dispatcher, server }
            }
            Authority::Member => {
                let mut dispatcher = PacketDispatcher::new();
                member::register_routes(&mut dispatcher);
                let mut client = SnapshotClient::new(context.local, context.owner);
                client.set_local_player(self.local_player);
                Role::Member { dispatcher, client }
            }
        };
    }

    /// Drops queued traffic and role state. Always runs before the relay leave.
    fn release_role(&mut self) {
        self.outbox.clear();
        match &mut self.role {
            Role::Owner { server, .. } => server.clear(),
            Role::Member { client, .. } => client.clear(),
            Role::Idle => {}
        }
        self.role = Role::Idle;
    }

    fn teardown(&mut self, navigate_home: bool) {
        self.release_role();
        self.lobby
            .leave_lobby(&mut self.relay, &mut self.host, navigate_home);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use shared::{EnemyState, LoopbackHub, LoopbackRelay};

    type Peer = Presence<LoopbackRelay, HeadlessHost>;

    fn peer(hub: &LoopbackHub) -> Peer {
        Presence::new(
            hub.connect(),
            HeadlessHost::new("forest"),
            PresenceConfig::default(),
        )
    }

    fn owned_session(hub: &LoopbackHub) -> (Peer, SessionId) {
        let mut owner = peer(hub);
        owner.create().unwrap();
        owner.tick();
        let id = owner.session_id().unwrap();
        (owner, id)
    }

    #[test]
    fn test_create_sets_up_owner_role() {
        let hub = LoopbackHub::new();
        let (owner, _) = owned_session(&hub);

        assert!(owner.is_owner());
        assert!(owner.server().is_some());
        assert!(owner.client().is_none());
        assert_eq!(owner.server().unwrap().registry().len(), 1);
    }

    #[test]
    fn test_idle_drops_buffered_messages() {
        let hub = LoopbackHub::new();
        let mut idle = peer(&hub);
        let stats = idle.tick();
        assert_eq!(stats, DispatchStats::default());
        assert!(!idle.emit_damage(EntityId(1), 1.0, 0).unwrap());
    }

    #[test]
    fn test_effects_are_played_once() {
        let hub = LoopbackHub::new();
        let (mut owner, _) = owned_session(&hub);
        let target = owner
            .spawn_entity(EntityState::Enemy(EnemyState {
                position: [0.0; 3],
                rotation: 0.0,
                health: 20.0,
                species: 2,
            }))
            .unwrap();

        assert!(owner.emit_spawn_effect(target, 4, [1.0, 0.0, 0.0]).unwrap());
        owner.tick();
        owner.tick();

        assert_eq!(owner.host().effects.len(), 1);
        assert_eq!(owner.host().effects[0].0, target);
        assert_eq!(owner.host().effects[0].1.effect, 4);
        let enemy = owner.server().unwrap().registry().get(target).unwrap();
        assert!(enemy.pending_effects().is_empty());
    }

    #[test]
    fn test_member_snapshot_reaches_owner() {
        let hub = LoopbackHub::new();
        let (mut owner, id) = owned_session(&hub);
        let mut member = peer(&hub);
        member.set_local_player(PlayerState::at([1.0, 2.0, 3.0]));
        member.join(id).unwrap();

        member.tick();
        owner.tick();

        let member_entity = EntityId::from(member.local_peer());
        let registry = owner.server().unwrap().registry();
        assert_eq!(registry.live_count_for(member.local_peer()), 1);
        assert_eq!(
            registry.get(member_entity).unwrap().state().position(),
            [1.0, 2.0, 3.0]
        );

        member.tick();
        let shadow = member.client().unwrap().shadow();
        assert!(shadow.get(EntityId::from(owner.local_peer())).is_some());
        assert!(shadow.get(member_entity).is_none());
    }

    #[test]
    fn test_owner_departure_forces_member_offline() {
        let hub = LoopbackHub::new();
        let (mut owner, id) = owned_session(&hub);
        let mut member = peer(&hub);
        member.join(id).unwrap();
        member.tick();
        owner.tick();

        owner.leave();
        member.tick();

        assert_eq!(member.state(), LobbyState::Offline);
        assert!(member.client().is_none());
        assert_eq!(member.host().idle_screen_loads, 1);
        assert_eq!(member.relay().current_session(), None);
        assert_eq!(owner.host().idle_screen_loads, 0);
    }

    #[test]
    fn test_level_change_republishes_and_resets() {
        let hub = LoopbackHub::new();
        let (mut owner, _) = owned_session(&hub);
        let spawned = owner
            .spawn_entity(EntityState::Enemy(EnemyState {
                position: [0.0; 3],
                rotation: 0.0,
                health: 30.0,
                species: 1,
            }))
            .unwrap();

        owner.on_level_changed("caves");

        assert_eq!(
            owner.relay().get_data(shared::metadata::LEVEL_KEY).as_deref(),
            Some("caves")
        );
        assert!(!owner.server().unwrap().registry().contains(spawned));
        assert!(owner
            .server()
            .unwrap()
            .registry()
            .contains(EntityId::from(owner.local_peer())));
    }

    #[test]
    fn test_leave_releases_outbox_and_state() {
        let hub = LoopbackHub::new();
        let (mut owner, _) = owned_session(&hub);
        owner.emit_despawn(EntityId(5)).unwrap();
        assert!(!owner.outbox().is_empty());

        owner.leave();

        assert!(owner.outbox().is_empty());
        assert!(owner.server().is_none());
        assert_eq!(owner.state(), LobbyState::Offline);
        assert!(hub.sessions().is_empty());
    }
}
