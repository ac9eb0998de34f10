//! # Presence Session Layer
//!
//! Composes the owner and member roles into one participant that can create,
//! join and leave lobbies on a relay and keep entity state in sync while it
//! is in one.
//!
//! ## Authority
//!
//! The peer that creates a lobby owns it for the lobby's whole lifetime.
//! Members record the owner reported by the relay when they join and never
//! update it. When that peer leaves, every member leaves too, within the
//! handling of that single membership event. Relays that promote another
//! member to owner are ignored on purpose: nothing the old owner held can be
//! reconstructed on the new one.
//!
//! ## Module Organization
//!
//! - `config`: lobby capacity, name, tick rate and default toggles
//! - `host`: the game-side collaborator trait and a headless implementation
//! - `context`: per-session identity handed to the role components
//! - `lobby`: create/join/leave, metadata and public listing
//! - `presence`: the per-tick driver
//!
//! ## Usage Example
//!
//! ```rust
//! use session::{HeadlessHost, Presence, PresenceConfig};
//! use shared::LoopbackHub;
//!
//! let hub = LoopbackHub::new();
//! let mut owner = Presence::new(hub.connect(), HeadlessHost::new("forest"), PresenceConfig::default());
//! owner.create().unwrap();
//! owner.tick();
//! let lobby = owner.session_id().unwrap();
//!
//! let mut member = Presence::new(hub.connect(), HeadlessHost::new("forest"), PresenceConfig::default());
//! member.join(lobby).unwrap();
//! member.tick();
//! assert!(member.client().is_some());
//! ```

pub mod config;
pub mod context;
pub mod host;
pub mod lobby;
pub mod presence;

pub use config::PresenceConfig;
pub use context::{Authority, SessionContext};
pub use host::{HeadlessHost, Host};
pub use lobby::{LobbyError, LobbyEvent, LobbyLifecycle, LobbyState};
pub use presence::Presence;
