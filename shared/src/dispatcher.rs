//! Tag-based packet routing
//!
//! Each packet tag is bound to at most one handler. A route registered with
//! [`PacketDispatcher::listen_and_redirect`] also forwards the original bytes
//! to every other session member, which is how the session owner acts as a
//! hub for traffic between members that cannot reach each other directly.

use crate::outbox::Outbox;
use crate::protocol::{Packet, PacketType, ProtocolError};
use crate::relay::Relay;
use log::{debug, warn};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("rejected: {0}")]
    Rejected(String),
}

pub type Handler<C> = Box<dyn FnMut(&mut C, &Packet) -> Result<(), HandlerError>>;

struct Route<C> {
    handler: Handler<C>,
    redirect: bool,
}

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: usize,
    pub handled: usize,
    pub redirected: usize,
    pub dropped: usize,
    pub failed: usize,
}

/// Routes packets to handlers operating on a context of type `C`.
pub struct PacketDispatcher<C> {
    routes: HashMap<PacketType, Route<C>>,
}

impl<C> Default for PacketDispatcher<C> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<C> PacketDispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles `kind` locally. Replaces any earlier binding for the tag.
    pub fn listen<F>(&mut self, kind: PacketType, handler: F)
    where
        F: FnMut(&mut C, &Packet) -> Result<(), HandlerError> + 'static,
    {
        self.bind(kind, Box::new(handler), false);
    }

    /// Handles `kind` locally and forwards the raw bytes to every member
    /// except the original sender and the local peer.
    pub fn listen_and_redirect<F>(&mut self, kind: PacketType, handler: F)
    where
        F: FnMut(&mut C, &Packet) -> Result<(), HandlerError> + 'static,
    {
        self.bind(kind, Box::new(handler), true);
    }

    fn bind(&mut self, kind: PacketType, handler: Handler<C>, redirect: bool) {
        if self.routes.insert(kind, Route { handler, redirect }).is_some() {
            debug!("Replaced handler for {:?}", kind);
        }
    }

    pub fn is_bound(&self, kind: PacketType) -> bool {
        self.routes.contains_key(&kind)
    }

    pub fn redirects(&self, kind: PacketType) -> bool {
        self.routes.get(&kind).map_or(false, |route| route.redirect)
    }

    /// Runs one packet through its route. Never fails: unknown tags are
    /// dropped and handler errors are logged.
    pub fn dispatch(
        &mut self,
        ctx: &mut C,
        packet: &Packet,
        outbox: &mut Outbox,
        stats: &mut DispatchStats,
    ) {
        let Some(kind) = packet.packet_type() else {
            debug!(
                "Dropping packet with unknown tag {} from {}",
                packet.tag(),
                packet.sender()
            );
            stats.dropped += 1;
            return;
        };
        let Some(route) = self.routes.get_mut(&kind) else {
            debug!("No handler bound for {:?} from {}", kind, packet.sender());
            stats.dropped += 1;
            return;
        };

        match (route.handler)(ctx, packet) {
            Ok(()) => stats.handled += 1,
            Err(e) => {
                warn!("{:?} handler failed for {}: {}", kind, packet.sender(), e);
                stats.failed += 1;
            }
        }

        if route.redirect {
            outbox.broadcast(packet.as_bytes().to_vec(), Some(packet.sender()));
            stats.redirected += 1;
        }
    }

    /// Drains every message the relay has buffered right now, exactly once.
    pub fn dispatch_pending(
        &mut self,
        relay: &mut dyn Relay,
        ctx: &mut C,
        outbox: &mut Outbox,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();

        while let Some((from, data)) = relay.receive() {
            stats.received += 1;
            match Packet::decode(data) {
                Ok(packet) => self.dispatch(ctx, &packet, outbox, &mut stats),
                Err(e) => {
                    warn!("Dropping malformed packet from {}: {}", from, e);
                    stats.dropped += 1;
                }
            }
        }

        stats
    }
}
