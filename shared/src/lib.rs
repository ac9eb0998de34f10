//! # Shared Session Protocol
//!
//! Everything both session roles agree on: peer and entity identifiers, the
//! tagged wire format, the fixed-shape entity codec, session metadata keys,
//! the relay contract, and the dispatch/outbox plumbing that turns a
//! star-shaped relay into a broadcast medium.
//!
//! ## Module Organization
//!
//! - `protocol`: packet header, type tags and the effect payloads
//! - `entity`: entity kinds, per-kind state and the snapshot record codec
//! - `metadata`: session metadata keys and gameplay toggles
//! - `relay`: the relay contract consumed by the session layer
//! - `loopback`: in-process relay used for local sessions and tests
//! - `outbox`: per-tick outbound queue flushed once at the end of a tick
//! - `dispatcher`: tag-based packet routing with optional redirect

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod dispatcher;
pub mod entity;
pub mod loopback;
pub mod metadata;
pub mod outbox;
pub mod protocol;
pub mod relay;

pub use dispatcher::{DispatchStats, HandlerError, PacketDispatcher};
pub use entity::{
    EffectEvent, EnemyState, Entity, EntityKind, EntityRecord, EntityState, InteractAction,
    ItemState, PlayerState,
};
pub use loopback::{LoopbackHub, LoopbackRelay};
pub use metadata::SessionSettings;
pub use outbox::{Outbound, Outbox};
pub use protocol::{
    DamageEntity, Despawn, Interact, Packet, PacketType, Payload, ProtocolError, SpawnEffect,
    HEADER_LEN,
};
pub use relay::{
    JoinResult, Pending, Relay, RelayError, RelayEvent, RoomEnter, SessionId, SessionInfo,
};

/// Identity of one participant as reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Placeholder for "nobody", e.g. an item that is not held.
    pub const NONE: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Identifier of a replicated entity.
///
/// Player entities reuse their peer's id. Entities spawned by the session
/// owner live in the upper half of the id space (see [`EntityId::SPAWNED_BASE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const SPAWNED_BASE: u64 = 1 << 63;

    pub fn is_spawned(self) -> bool {
        self.0 >= Self::SPAWNED_BASE
    }
}

impl From<PeerId> for EntityId {
    fn from(peer: PeerId) -> Self {
        EntityId(peer.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}
