//! In-process relay for local sessions and tests
//!
//! Every [`LoopbackRelay`] handed out by a [`LoopbackHub`] is one peer on a
//! shared in-memory relay. Requests that a real relay answers asynchronously
//! (create, join, list) are queued and resolved on that peer's next
//! `poll_events`, so their completion is observed on a later tick.
//!
//! Like real lobby services, the hub promotes the next member when a
//! session's owner leaves. The session layer never follows that promotion.

use crate::relay::{
    JoinResult, Pending, Relay, RelayError, RelayEvent, RoomEnter, SessionId, SessionInfo,
};
use crate::PeerId;
use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Request counters, mainly for asserting how often the relay was asked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub create_requests: usize,
    pub join_requests: usize,
    pub leave_requests: usize,
    pub list_requests: usize,
    pub messages: usize,
}

enum PendingOp {
    Create {
        max_members: usize,
        reply: oneshot::Sender<Result<SessionInfo, RelayError>>,
    },
    Join {
        id: SessionId,
        reply: oneshot::Sender<JoinResult>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<SessionInfo>, RelayError>>,
    },
}

#[derive(Default)]
struct PeerSlot {
    session: Option<SessionId>,
    inbox: VecDeque<(PeerId, Vec<u8>)>,
    events: VecDeque<RelayEvent>,
    pending: Vec<PendingOp>,
}

struct HubSession {
    owner: PeerId,
    members: Vec<PeerId>,
    max_members: usize,
    metadata: BTreeMap<String, String>,
}

#[derive(Default)]
struct HubState {
    next_peer: u64,
    next_session: u64,
    peers: BTreeMap<PeerId, PeerSlot>,
    sessions: BTreeMap<SessionId, HubSession>,
    stats: HubStats,
}

impl HubState {
    fn info(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|session| SessionInfo {
            id,
            owner: session.owner,
            members: session.members.clone(),
            max_members: session.max_members,
            metadata: session.metadata.clone(),
        })
    }

    fn session_of(&self, peer: PeerId) -> Option<SessionId> {
        self.peers.get(&peer).and_then(|slot| slot.session)
    }

    fn leave(&mut self, peer: PeerId) {
        let Some(slot) = self.peers.get_mut(&peer) else {
            return;
        };
        let Some(id) = slot.session.take() else {
            return;
        };
        slot.inbox.clear();
        slot.events.clear();

        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        session.members.retain(|member| *member != peer);
        if session.members.is_empty() {
            self.sessions.remove(&id);
            debug!("Loopback {} closed", id);
            return;
        }
        if session.owner == peer {
            session.owner = session.members[0];
        }
        let remaining = session.members.clone();
        for member in remaining {
            if let Some(slot) = self.peers.get_mut(&member) {
                slot.events.push_back(RelayEvent::MemberLeft(peer));
            }
        }
    }

    fn resolve_pending(&mut self, peer: PeerId) {
        let pending = match self.peers.get_mut(&peer) {
            Some(slot) => std::mem::take(&mut slot.pending),
            None => return,
        };

        for op in pending {
            match op {
                PendingOp::Create { max_members, reply } => {
                    self.leave(peer);
                    self.next_session += 1;
                    let id = SessionId(self.next_session);
                    self.sessions.insert(
                        id,
                        HubSession {
                            owner: peer,
                            members: vec![peer],
                            max_members,
                            metadata: BTreeMap::new(),
                        },
                    );
                    if let Some(slot) = self.peers.get_mut(&peer) {
                        slot.session = Some(id);
                    }
                    let _ = reply.send(self.info(id).ok_or(RelayError::Closed));
                }
                PendingOp::Join { id, reply } => {
                    let _ = reply.send(self.join(peer, id));
                }
                PendingOp::List { reply } => {
                    let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
                    let infos = ids.into_iter().filter_map(|id| self.info(id)).collect();
                    let _ = reply.send(Ok(infos));
                }
            }
        }
    }

    fn join(&mut self, peer: PeerId, id: SessionId) -> JoinResult {
        let session = self.sessions.get(&id).ok_or(RoomEnter::DoesNotExist)?;
        if session.members.contains(&peer) {
            return self.info(id).ok_or(RoomEnter::Error);
        }
        if session.members.len() >= session.max_members {
            return Err(RoomEnter::Full);
        }

        self.leave(peer);
        let session = self.sessions.get_mut(&id).ok_or(RoomEnter::DoesNotExist)?;
        let existing = session.members.clone();
        session.members.push(peer);
        for member in existing {
            if let Some(slot) = self.peers.get_mut(&member) {
                slot.events.push_back(RelayEvent::MemberJoined(peer));
            }
        }
        if let Some(slot) = self.peers.get_mut(&peer) {
            slot.session = Some(id);
        }
        self.info(id).ok_or(RoomEnter::Error)
    }
}

/// Shared in-memory relay. Clone it to hand the same hub to several peers.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new peer with the next free id.
    pub fn connect(&self) -> LoopbackRelay {
        let peer = {
            let mut state = self.lock();
            state.next_peer += 1;
            while state.peers.contains_key(&PeerId(state.next_peer)) {
                state.next_peer += 1;
            }
            PeerId(state.next_peer)
        };
        self.connect_as(peer)
    }

    /// Registers a peer with a caller-chosen id, replacing any previous one.
    pub fn connect_as(&self, peer: PeerId) -> LoopbackRelay {
        let mut state = self.lock();
        state.leave(peer);
        state.peers.insert(peer, PeerSlot::default());
        LoopbackRelay {
            peer,
            hub: self.clone(),
        }
    }

    /// Drops a peer as if its process went away.
    pub fn disconnect(&self, peer: PeerId) {
        let mut state = self.lock();
        state.leave(peer);
        state.peers.remove(&peer);
    }

    pub fn stats(&self) -> HubStats {
        self.lock().stats
    }

    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.lock().info(id)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.lock();
        state
            .sessions
            .keys()
            .filter_map(|id| state.info(*id))
            .collect()
    }

    /// Messages waiting in a peer's inbox.
    pub fn queued_for(&self, peer: PeerId) -> usize {
        self.lock()
            .peers
            .get(&peer)
            .map_or(0, |slot| slot.inbox.len())
    }
}

/// One peer's handle on a [`LoopbackHub`].
pub struct LoopbackRelay {
    peer: PeerId,
    hub: LoopbackHub,
}

impl LoopbackRelay {
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }

    fn queue(&self, op: PendingOp) {
        if let Some(slot) = self.hub.lock().peers.get_mut(&self.peer) {
            slot.pending.push(op);
        }
    }
}

impl Relay for LoopbackRelay {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn create_session(&mut self, max_members: usize) -> Pending<Result<SessionInfo, RelayError>> {
        let (reply, pending) = oneshot::channel();
        self.hub.lock().stats.create_requests += 1;
        self.queue(PendingOp::Create { max_members, reply });
        pending
    }

    fn join_session(&mut self, id: SessionId) -> Pending<JoinResult> {
        let (reply, pending) = oneshot::channel();
        self.hub.lock().stats.join_requests += 1;
        self.queue(PendingOp::Join { id, reply });
        pending
    }

    fn leave_session(&mut self) {
        let mut state = self.hub.lock();
        state.stats.leave_requests += 1;
        state.leave(self.peer);
    }

    fn current_session(&self) -> Option<SessionId> {
        self.hub.lock().session_of(self.peer)
    }

    fn session_owner(&self) -> Option<PeerId> {
        let state = self.hub.lock();
        let id = state.session_of(self.peer)?;
        state.sessions.get(&id).map(|session| session.owner)
    }

    fn list_members(&self) -> Vec<PeerId> {
        let state = self.hub.lock();
        state
            .session_of(self.peer)
            .and_then(|id| state.sessions.get(&id))
            .map(|session| session.members.clone())
            .unwrap_or_default()
    }

    fn get_data(&self, key: &str) -> Option<String> {
        let state = self.hub.lock();
        let id = state.session_of(self.peer)?;
        state.sessions.get(&id)?.metadata.get(key).cloned()
    }

    fn set_data(&mut self, key: &str, value: &str) -> Result<(), RelayError> {
        let mut state = self.hub.lock();
        let id = state
            .session_of(self.peer)
            .ok_or(RelayError::NotInSession)?;
        let session = state.sessions.get_mut(&id).ok_or(RelayError::NotInSession)?;
        if session.owner != self.peer {
            return Err(RelayError::NotOwner);
        }
        session.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn list_public_sessions(&mut self) -> Pending<Result<Vec<SessionInfo>, RelayError>> {
        let (reply, pending) = oneshot::channel();
        self.hub.lock().stats.list_requests += 1;
        self.queue(PendingOp::List { reply });
        pending
    }

    fn send(&mut self, to: PeerId, data: &[u8]) -> Result<(), RelayError> {
        let mut state = self.hub.lock();
        let id = state
            .session_of(self.peer)
            .ok_or(RelayError::NotInSession)?;
        if state.session_of(to) != Some(id) {
            return Err(RelayError::UnknownPeer(to));
        }
        state.stats.messages += 1;
        let slot = state.peers.get_mut(&to).ok_or(RelayError::UnknownPeer(to))?;
        slot.inbox.push_back((self.peer, data.to_vec()));
        Ok(())
    }

    fn receive(&mut self) -> Option<(PeerId, Vec<u8>)> {
        self.hub
            .lock()
            .peers
            .get_mut(&self.peer)
            .and_then(|slot| slot.inbox.pop_front())
    }

    fn poll_events(&mut self) -> Vec<RelayEvent> {
        let mut state = self.hub.lock();
        state.resolve_pending(self.peer);
        state
            .peers
            .get_mut(&self.peer)
            .map(|slot| slot.events.drain(..).collect())
            .unwrap_or_default()
    }
}
