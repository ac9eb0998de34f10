//! Contract of the third-party relay the session layer runs on
//!
//! The relay provides session membership, a string-keyed metadata store per
//! session, and member-to-member messages (reliable and ordered per sender).
//! Slow operations hand back a [`Pending`] receiver that the caller polls
//! with `try_recv` on a later tick instead of awaiting it.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;

/// Completion of an asynchronous relay request.
pub type Pending<T> = oneshot::Receiver<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lobby#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner: PeerId,
    pub members: Vec<PeerId>,
    pub max_members: usize,
    pub metadata: BTreeMap<String, String>,
}

impl SessionInfo {
    pub fn data(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Non-success outcome of entering a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEnter {
    DoesNotExist,
    NotAllowed,
    Full,
    Error,
}

impl fmt::Display for RoomEnter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RoomEnter::DoesNotExist => "lobby does not exist",
            RoomEnter::NotAllowed => "not allowed to join",
            RoomEnter::Full => "lobby is full",
            RoomEnter::Error => "relay error",
        };
        f.write_str(reason)
    }
}

pub type JoinResult = Result<SessionInfo, RoomEnter>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    MemberJoined(PeerId),
    MemberLeft(PeerId),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("not in a session")]
    NotInSession,
    #[error("{0} is not a member of this session")]
    UnknownPeer(PeerId),
    #[error("only the session owner may change session data")]
    NotOwner,
    #[error("relay request was dropped before completing")]
    Closed,
}

pub trait Relay {
    fn local_peer(&self) -> PeerId;

    fn create_session(&mut self, max_members: usize) -> Pending<Result<SessionInfo, RelayError>>;

    fn join_session(&mut self, id: SessionId) -> Pending<JoinResult>;

    fn leave_session(&mut self);

    fn current_session(&self) -> Option<SessionId>;

    /// Owner as the relay currently reports it.
    fn session_owner(&self) -> Option<PeerId>;

    fn list_members(&self) -> Vec<PeerId>;

    fn get_data(&self, key: &str) -> Option<String>;

    fn set_data(&mut self, key: &str, value: &str) -> Result<(), RelayError>;

    fn list_public_sessions(&mut self) -> Pending<Result<Vec<SessionInfo>, RelayError>>;

    fn send(&mut self, to: PeerId, data: &[u8]) -> Result<(), RelayError>;

    fn broadcast_except_self(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let local = self.local_peer();
        for member in self.list_members() {
            if member != local {
                self.send(member, data)?;
            }
        }
        Ok(())
    }

    /// Next buffered message, if any. Never blocks.
    fn receive(&mut self) -> Option<(PeerId, Vec<u8>)>;

    /// Membership events for the current session since the last call.
    fn poll_events(&mut self) -> Vec<RelayEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_data_lookup() {
        let mut metadata = BTreeMap::new();
        metadata.insert("name".to_string(), "cave".to_string());
        let info = SessionInfo {
            id: SessionId(3),
            owner: PeerId(1),
            members: vec![PeerId(1)],
            max_members: 4,
            metadata,
        };

        assert_eq!(info.data("name"), Some("cave"));
        assert_eq!(info.data("level"), None);
    }

    #[test]
    fn test_room_enter_messages() {
        assert_eq!(RoomEnter::Full.to_string(), "lobby is full");
        assert_eq!(SessionId(8).to_string(), "lobby#8");
    }
}
