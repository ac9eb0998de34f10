//! # Session Owner Role
//!
//! This library holds the authoritative side of a presence session. Exactly one
//! peer, the one that created the lobby, runs it. Authority is never handed
//! over: if that peer goes away the session ends for everyone.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Registry
//! The owner keeps the only complete view of the session's entities. Member
//! players are created lazily from their first snapshot and removed when the
//! relay reports that the member left. Entities the owner spawns itself draw
//! ids from a reserved range so they never collide with a peer's player.
//!
//! ### Hub Forwarding
//! The relay is star-shaped from the game's point of view: members only talk
//! to the owner. Effect packets (`SpawnEffect`, `DamageEntity`, `Interact`,
//! `Despawn`) are applied by the owner and then forwarded byte-for-byte to
//! every other member, preserving the original sender in the header.
//!
//! ### State Broadcasting
//! Once per tick every live entity is serialised into its own `Snapshot`
//! packet and queued for all members except the entity's own peer. With no
//! state change the queued bytes are identical from tick to tick.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! - Slot map keyed by entity id, iterated in id order
//! - Recreate-on-miss for player slots, invalidation, level resets
//!
//! ### Snapshot Module (`snapshot`)
//! - Packet handlers operating on the registry
//! - Per-tick broadcast into the outbox
//! - Route table for the owner's dispatcher
//!
//! ## Usage Example
//!
//! ```rust
//! use server::snapshot::{register_routes, SnapshotServer};
//! use shared::{Outbox, PacketDispatcher, PeerId};
//!
//! let mut dispatcher = PacketDispatcher::new();
//! register_routes(&mut dispatcher);
//! let server = SnapshotServer::new(PeerId(1));
//!
//! let mut outbox = Outbox::new();
//! assert_eq!(server.broadcast(&mut outbox), 1);
//! # let _ = dispatcher;
//! ```

pub mod registry;
pub mod snapshot;

pub use registry::EntityRegistry;
pub use snapshot::SnapshotServer;
