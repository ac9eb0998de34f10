//! Wire format: a fixed header followed by a tag-specific payload
//!
//! ```text
//! +----------------+--------+----------------------+
//! | sender: u64 LE | tag: u8| payload (tag-shaped) |
//! +----------------+--------+----------------------+
//! ```
//!
//! Payloads are bincode encoded with the default (fixed-width integer,
//! little endian) options, so every payload type has a length fully
//! determined by its tag. The header tag is read as a raw byte; tags this
//! build does not know about survive decoding and are left for the
//! dispatcher to drop.

use crate::entity::InteractAction;
use crate::{EntityId, PeerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the encoded header in bytes.
pub const HEADER_LEN: usize = 9;

/// Closed set of packet tags understood by this protocol version.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketType {
    Snapshot = 0,
    SpawnEffect = 1,
    DamageEntity = 2,
    Interact = 3,
    Despawn = 4,
}

impl PacketType {
    pub const ALL: [PacketType; 5] = [
        PacketType::Snapshot,
        PacketType::SpawnEffect,
        PacketType::DamageEntity,
        PacketType::Interact,
        PacketType::Despawn,
    ];

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PacketType::Snapshot),
            1 => Some(PacketType::SpawnEffect),
            2 => Some(PacketType::DamageEntity),
            3 => Some(PacketType::Interact),
            4 => Some(PacketType::Despawn),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet of {len} bytes is shorter than the header")]
    ShortHeader { len: usize },
    #[error("unknown entity kind tag {0}")]
    UnknownKind(u8),
    #[error("{kind:?} state must be {expected} bytes, got {actual}")]
    BadLength {
        kind: crate::EntityKind,
        expected: usize,
        actual: usize,
    },
    #[error("expected {expected:?} state, got {actual:?}")]
    KindMismatch {
        expected: crate::EntityKind,
        actual: crate::EntityKind,
    },
    #[error("bincode: {0}")]
    Encoding(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PacketHeader {
    sender: PeerId,
    tag: u8,
}

/// A typed payload bound to exactly one packet tag.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: PacketType;
}

/// A received or outgoing packet.
///
/// The original bytes are kept intact so a handler can forward them
/// unmodified. Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    sender: PeerId,
    tag: u8,
    raw: Vec<u8>,
}

impl Packet {
    /// Parses the header of a raw message, keeping the bytes as-is.
    pub fn decode(raw: Vec<u8>) -> Result<Self, ProtocolError> {
        if raw.len() < HEADER_LEN {
            return Err(ProtocolError::ShortHeader { len: raw.len() });
        }
        let header: PacketHeader = bincode::deserialize(&raw[..HEADER_LEN])?;
        Ok(Packet {
            sender: header.sender,
            tag: header.tag,
            raw,
        })
    }

    /// Builds a packet from already-encoded payload bytes.
    pub fn from_parts(
        sender: PeerId,
        kind: PacketType,
        payload: &[u8],
    ) -> Result<Self, ProtocolError> {
        let header = PacketHeader {
            sender,
            tag: kind.tag(),
        };
        let mut raw = bincode::serialize(&header)?;
        raw.extend_from_slice(payload);
        Ok(Packet {
            sender,
            tag: header.tag,
            raw,
        })
    }

    pub fn encode<P: Payload>(sender: PeerId, payload: &P) -> Result<Self, ProtocolError> {
        let body = bincode::serialize(payload)?;
        Self::from_parts(sender, P::KIND, &body)
    }

    pub fn read<P: Payload>(&self) -> Result<P, ProtocolError> {
        Ok(bincode::deserialize(self.payload())?)
    }

    /// Original sender as stamped in the header (not the relay hop).
    pub fn sender(&self) -> PeerId {
        self.sender
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_tag(self.tag)
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }
}

/// Visual/gameplay effect anchored on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnEffect {
    pub target: EntityId,
    pub effect: u8,
    pub position: [f32; 3],
}

impl Payload for SpawnEffect {
    const KIND: PacketType = PacketType::SpawnEffect;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageEntity {
    pub target: EntityId,
    pub amount: f32,
    pub source: u8,
}

impl Payload for DamageEntity {
    const KIND: PacketType = PacketType::DamageEntity;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interact {
    pub target: EntityId,
    pub action: InteractAction,
}

impl Payload for Interact {
    const KIND: PacketType = PacketType::Interact;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Despawn {
    pub target: EntityId,
}

impl Payload for Despawn {
    const KIND: PacketType = PacketType::Despawn;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_table_is_closed() {
        for kind in PacketType::ALL {
            assert_eq!(PacketType::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(PacketType::from_tag(5), None);
        assert_eq!(PacketType::from_tag(255), None);
    }

    #[test]
    fn test_header_layout() {
        let packet = Packet::from_parts(PeerId(0x0102), PacketType::DamageEntity, &[9, 9]).unwrap();
        let bytes = packet.as_bytes();

        assert_eq!(bytes.len(), HEADER_LEN + 2);
        assert_eq!(&bytes[..8], &0x0102u64.to_le_bytes());
        assert_eq!(bytes[8], PacketType::DamageEntity.tag());
        assert_eq!(packet.payload(), &[9, 9]);
    }

    #[test]
    fn test_decode_keeps_original_bytes() {
        let damage = DamageEntity {
            target: EntityId(999),
            amount: 12.5,
            source: 3,
        };
        let sent = Packet::encode(PeerId(5), &damage).unwrap();
        let received = Packet::decode(sent.as_bytes().to_vec()).unwrap();

        assert_eq!(received, sent);
        assert_eq!(received.sender(), PeerId(5));
        assert_eq!(received.packet_type(), Some(PacketType::DamageEntity));
        assert_eq!(received.read::<DamageEntity>().unwrap(), damage);
    }

    #[test]
    fn test_unknown_tag_still_decodes_header() {
        let mut raw = bincode::serialize(&PeerId(3)).unwrap();
        raw.push(200);
        raw.extend_from_slice(&[1, 2, 3]);

        let packet = Packet::decode(raw).unwrap();
        assert_eq!(packet.tag(), 200);
        assert_eq!(packet.packet_type(), None);
    }

    #[test]
    fn test_short_packet_rejected() {
        match Packet::decode(vec![1, 2, 3]) {
            Err(ProtocolError::ShortHeader { len }) => assert_eq!(len, 3),
            other => panic!("expected short header error, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_lengths_are_fixed() {
        let effect = Packet::encode(
            PeerId(1),
            &SpawnEffect {
                target: EntityId(1),
                effect: 4,
                position: [0.0; 3],
            },
        )
        .unwrap();
        assert_eq!(effect.payload().len(), 8 + 1 + 12);

        let despawn = Packet::encode(PeerId(1), &Despawn { target: EntityId(1) }).unwrap();
        assert_eq!(despawn.payload().len(), 8);
    }

    #[test]
    fn test_truncated_payload_fails_to_read() {
        let packet = Packet::from_parts(PeerId(1), PacketType::DamageEntity, &[1, 2]).unwrap();
        assert!(packet.read::<DamageEntity>().is_err());
    }
}
