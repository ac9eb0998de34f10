//! Lobby lifecycle: create, join, leave and public listing
//!
//! Relay requests complete asynchronously. Each request is tagged with the
//! generation that issued it; any create, join or leave bumps the generation,
//! so completions from an abandoned request are recognised as stale when
//! they finally arrive. A stale request that nevertheless put us into a
//! session is backed out of at the relay.
//!
//! Only a repeat of the request already in flight is ignored. A join issued
//! while a create is pending (or the other way round) supersedes it.
//!
//! A pending join is not a state of its own: the lobby stays `Offline` until
//! the join completes, and [`LobbyLifecycle::pending_join`] reports the target.

use crate::config::PresenceConfig;
use crate::context::{Authority, SessionContext};
use crate::host::Host;
use log::{debug, info, warn};
use shared::metadata::{self, LEVEL_KEY, MARKER_KEY, NAME_KEY, PROTOCOL_VERSION};
use shared::{
    JoinResult, Pending, PeerId, Relay, RelayError, RoomEnter, SessionId, SessionInfo,
    SessionSettings,
};
use thiserror::Error;
use tokio::sync::oneshot::error::TryRecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    Offline,
    Creating,
    Online(Authority),
}

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("you are already in that lobby")]
    SelfJoinRejected,
    #[error("could not join lobby: {0}")]
    JoinFailed(RoomEnter),
    #[error("relay request failed: {0}")]
    Relay(#[from] RelayError),
    #[error("only the lobby owner can change lobby settings")]
    NotOwner,
}

/// Outcome of a completed request, reported by [`LobbyLifecycle::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    Entered(SessionContext),
    CreateFailed,
    JoinFailed(RoomEnter),
    Listed(usize),
}

enum Request {
    Create(Pending<Result<SessionInfo, RelayError>>),
    Join(SessionId, Pending<JoinResult>),
}

enum Outcome {
    Waiting,
    Dropped,
    Created(Result<SessionInfo, RelayError>),
    Joined(JoinResult),
}

impl Request {
    fn poll(&mut self) -> Outcome {
        match self {
            Request::Create(reply) => match reply.try_recv() {
                Ok(result) => Outcome::Created(result),
                Err(TryRecvError::Empty) => Outcome::Waiting,
                Err(TryRecvError::Closed) => Outcome::Dropped,
            },
            Request::Join(_, reply) => match reply.try_recv() {
                Ok(result) => Outcome::Joined(result),
                Err(TryRecvError::Empty) => Outcome::Waiting,
                Err(TryRecvError::Closed) => Outcome::Dropped,
            },
        }
    }
}

struct PendingRequest {
    generation: u64,
    request: Request,
}

pub struct LobbyLifecycle {
    config: PresenceConfig,
    state: LobbyState,
    generation: u64,
    requests: Vec<PendingRequest>,
    joining: Option<SessionId>,
    listing: Option<Pending<Result<Vec<SessionInfo>, RelayError>>>,
    context: Option<SessionContext>,
    public_lobbies: Vec<SessionInfo>,
}

impl LobbyLifecycle {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            config,
            state: LobbyState::Offline,
            generation: 0,
            requests: Vec::new(),
            joining: None,
            listing: None,
            context: None,
            public_lobbies: Vec::new(),
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Target of the join in flight, if any.
    pub fn pending_join(&self) -> Option<SessionId> {
        self.joining
    }

    pub fn is_online(&self) -> bool {
        matches!(self.state, LobbyState::Online(_))
    }

    pub fn is_owner(&self) -> bool {
        self.state == LobbyState::Online(Authority::Owner)
    }

    pub fn is_fetching(&self) -> bool {
        self.listing.is_some()
    }

    /// Compatible lobbies from the last completed listing.
    pub fn public_lobbies(&self) -> &[SessionInfo] {
        &self.public_lobbies
    }

    pub fn create_lobby(&mut self, relay: &mut dyn Relay) -> Result<(), LobbyError> {
        if self.state != LobbyState::Offline {
            debug!("Ignoring create while {:?}", self.state);
            return Ok(());
        }
        if let Some(target) = self.joining.take() {
            info!("Create supersedes the pending join of {}", target);
        }

        self.generation += 1;
        let reply = relay.create_session(self.config.max_members);
        self.requests.push(PendingRequest {
            generation: self.generation,
            request: Request::Create(reply),
        });
        self.state = LobbyState::Creating;
        info!("Creating lobby (generation {})", self.generation);
        Ok(())
    }

    /// Rejects joining the session we are already in.
    pub fn check_join(&self, relay: &dyn Relay, target: SessionId) -> Result<(), LobbyError> {
        let current = self
            .context
            .map(|context| context.session)
            .or_else(|| relay.current_session());
        if current == Some(target) {
            return Err(LobbyError::SelfJoinRejected);
        }
        Ok(())
    }

    pub fn join_lobby(
        &mut self,
        relay: &mut dyn Relay,
        host: &mut dyn Host,
        target: SessionId,
    ) -> Result<(), LobbyError> {
        if let Err(e) = self.check_join(relay, target) {
            warn!("Join of {} rejected: {}", target, e);
            host.notify(&e.to_string());
            return Err(e);
        }
        if self.joining == Some(target) {
            debug!("Join of {} already in flight", target);
            return Ok(());
        }
        match self.state {
            LobbyState::Online(_) => self.leave_lobby(relay, host, false),
            LobbyState::Creating => info!("Join of {} supersedes the pending create", target),
            LobbyState::Offline => {}
        }

        self.generation += 1;
        let reply = relay.join_session(target);
        self.requests.push(PendingRequest {
            generation: self.generation,
            request: Request::Join(target, reply),
        });
        self.state = LobbyState::Offline;
        self.joining = Some(target);
        info!("Joining {} (generation {})", target, self.generation);
        Ok(())
    }

    /// Leaves whatever session we are in or entering. Never fails.
    pub fn leave_lobby(&mut self, relay: &mut dyn Relay, host: &mut dyn Host, navigate_home: bool) {
        let was_owner = self.is_owner();
        self.generation += 1;
        self.context = None;
        self.joining = None;
        if relay.current_session().is_some() {
            relay.leave_session();
        }
        if self.state != LobbyState::Offline {
            info!("Left lobby (generation {})", self.generation);
        }
        self.state = LobbyState::Offline;

        if navigate_home && !was_owner {
            host.load_idle_screen();
        }
        host.session_changed(None);
    }

    /// Whether a departing peer is the owner we recorded on entry.
    pub fn is_owner_departure(&self, peer: PeerId) -> bool {
        self.context.map_or(false, |context| {
            context.authority == Authority::Member && context.owner == peer
        })
    }

    pub fn fetch_public_lobbies(&mut self, relay: &mut dyn Relay) {
        if self.listing.is_some() {
            debug!("Lobby listing already in flight");
            return;
        }
        self.listing = Some(relay.list_public_sessions());
    }

    pub fn update_settings(
        &mut self,
        relay: &mut dyn Relay,
        settings: SessionSettings,
    ) -> Result<(), LobbyError> {
        if !self.is_owner() {
            return Err(LobbyError::NotOwner);
        }
        for (key, value) in settings.entries() {
            relay.set_data(key, value)?;
        }
        self.config.settings = settings;
        Ok(())
    }

    pub fn update_level(&mut self, relay: &mut dyn Relay, level: &str) -> Result<(), LobbyError> {
        if !self.is_owner() {
            return Err(LobbyError::NotOwner);
        }
        relay.set_data(LEVEL_KEY, level)?;
        Ok(())
    }

    /// Toggles as published on the relay, or the configured ones when offline.
    pub fn settings(&self, relay: &dyn Relay) -> SessionSettings {
        if self.is_online() {
            SessionSettings::from_lookup(|key| relay.get_data(key))
        } else {
            self.config.settings
        }
    }

    fn write_default_metadata(
        &self,
        relay: &mut dyn Relay,
        host: &dyn Host,
    ) -> Result<(), RelayError> {
        relay.set_data(MARKER_KEY, PROTOCOL_VERSION)?;
        relay.set_data(NAME_KEY, &self.config.lobby_name)?;
        relay.set_data(LEVEL_KEY, &host.current_level())?;
        for (key, value) in self.config.settings.entries() {
            relay.set_data(key, value)?;
        }
        Ok(())
    }

    /// Collects finished relay requests. Call once at the start of a tick.
    pub fn poll(&mut self, relay: &mut dyn Relay, host: &mut dyn Host) -> Vec<LobbyEvent> {
        let mut events = Vec::new();

        for mut pending in std::mem::take(&mut self.requests) {
            let current = pending.generation == self.generation;
            match pending.request.poll() {
                Outcome::Waiting => self.requests.push(pending),
                Outcome::Dropped => {
                    warn!("Relay dropped a lobby request");
                    if current {
                        self.state = LobbyState::Offline;
                        self.joining = None;
                    }
                }
                Outcome::Created(Ok(info)) | Outcome::Joined(Ok(info)) if !current => {
                    self.back_out(relay, &info)
                }
                Outcome::Created(Ok(info)) => {
                    events.push(self.enter(relay, host, info, pending.generation));
                }
                Outcome::Joined(Ok(info)) => {
                    events.push(self.enter(relay, host, info, pending.generation));
                }
                Outcome::Created(Err(e)) => {
                    if current {
                        warn!("Lobby creation failed: {}", e);
                        self.state = LobbyState::Offline;
                        host.notify(&format!("Could not create lobby: {}", e));
                        events.push(LobbyEvent::CreateFailed);
                    } else {
                        debug!("Stale create failed: {}", e);
                    }
                }
                Outcome::Joined(Err(reason)) => {
                    if current {
                        let error = LobbyError::JoinFailed(reason);
                        warn!("{}", error);
                        self.state = LobbyState::Offline;
                        self.joining = None;
                        host.notify(&error.to_string());
                        events.push(LobbyEvent::JoinFailed(reason));
                    } else if let Request::Join(target, _) = pending.request {
                        debug!("Stale join of {} failed: {}", target, reason);
                    }
                }
            }
        }

        let listed = match self.listing.as_mut() {
            Some(reply) => reply.try_recv(),
            None => return events,
        };
        match listed {
            Ok(Ok(sessions)) => {
                self.public_lobbies = sessions
                    .into_iter()
                    .filter(|session| metadata::is_compatible(&session.metadata))
                    .collect();
                debug!("{} compatible public lobbies", self.public_lobbies.len());
                events.push(LobbyEvent::Listed(self.public_lobbies.len()));
                self.listing = None;
            }
            Ok(Err(e)) => {
                warn!("Lobby listing failed: {}", e);
                self.listing = None;
            }
            Err(TryRecvError::Closed) => self.listing = None,
            Err(TryRecvError::Empty) => {}
        }

        events
    }

    fn enter(
        &mut self,
        relay: &mut dyn Relay,
        host: &mut dyn Host,
        info: SessionInfo,
        generation: u64,
    ) -> LobbyEvent {
        let context = SessionContext::from_info(&info, relay.local_peer(), generation);
        if context.is_owner() {
            if let Err(e) = self.write_default_metadata(relay, host) {
                warn!("Failed to publish lobby metadata: {}", e);
            }
        }
        info!(
            "Entered {} as {:?}, owner {}",
            info.id, context.authority, context.owner
        );
        self.context = Some(context);
        self.joining = None;
        self.state = LobbyState::Online(context.authority);
        host.session_changed(Some(&info));
        LobbyEvent::Entered(context)
    }

    fn back_out(&mut self, relay: &mut dyn Relay, info: &SessionInfo) {
        let ours = self.context.map(|context| context.session);
        if relay.current_session() == Some(info.id) && ours != Some(info.id) {
            info!("Backing out of {} entered by an abandoned request", info.id);
            relay.leave_session();
        } else {
            debug!("Discarding stale completion for {}", info.id);
        }
    }
}
