//! Outbound packet queue flushed once per tick

use crate::relay::Relay;
use crate::PeerId;
use log::{debug, error};

/// Traffic produced during a tick, waiting for the end-of-tick flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    SendPacket {
        to: PeerId,
        data: Vec<u8>,
    },
    /// To every session member except the local peer and `exclude`.
    BroadcastPacket {
        data: Vec<u8>,
        exclude: Option<PeerId>,
    },
}

#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, to: PeerId, data: Vec<u8>) {
        self.queue.push(Outbound::SendPacket { to, data });
    }

    pub fn broadcast(&mut self, data: Vec<u8>, exclude: Option<PeerId>) {
        self.queue.push(Outbound::BroadcastPacket { data, exclude });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outbound> {
        self.queue.iter()
    }

    /// Drops everything queued without sending it.
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            debug!("Releasing {} queued outbound packets", self.queue.len());
        }
        self.queue.clear();
    }

    /// Sends every queued packet in order and returns how many messages went
    /// out. Per-recipient failures are logged and skipped.
    pub fn flush(&mut self, relay: &mut dyn Relay) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let local = relay.local_peer();
        let members = relay.list_members();
        let mut sent = 0;

        for message in self.queue.drain(..) {
            match message {
                Outbound::SendPacket { to, data } => {
                    if to == local {
                        continue;
                    }
                    match relay.send(to, &data) {
                        Ok(()) => sent += 1,
                        Err(e) => error!("Failed to send packet to {}: {}", to, e),
                    }
                }
                Outbound::BroadcastPacket { data, exclude } => {
                    for member in &members {
                        if *member == local || Some(*member) == exclude {
                            continue;
                        }
                        match relay.send(*member, &data) {
                            Ok(()) => sent += 1,
                            Err(e) => error!("Failed to send to {}: {}", member, e),
                        }
                    }
                }
            }
        }

        sent
    }
}
