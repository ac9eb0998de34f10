//! # Session Member Role
//!
//! Everything a non-owning member runs while it is in a session. A member
//! never holds authority over anything but its own player: it streams that
//! player's state to the owner once per tick and mirrors the rest of the
//! session from the owner's snapshot stream.
//!
//! ## Module Organization
//!
//! - `shadow`: the member's copy of the owner's entities
//! - `snapshot`: packet handlers, the upstream snapshot and the member routes
//!
//! Effects raised by other members reach this peer through the owner, which
//! forwards them with the original sender intact. Damage aimed at the local
//! player is applied to the local copy and reported back to the owner with
//! the next upstream snapshot.

pub mod shadow;
pub mod snapshot;

pub use shadow::ShadowState;
pub use snapshot::SnapshotClient;
