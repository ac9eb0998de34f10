//! Replicated entities and the snapshot record codec
//!
//! A snapshot record is `{entity id: u64 LE, kind: u8, state}` with no length
//! field: the kind byte selects a decoder of known, fixed size from
//! [`CODECS`]. Adding a kind means adding a variant, a state struct and a
//! table row together.

use crate::protocol::ProtocolError;
use crate::{EntityId, PeerId};
use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Player = 0,
    Enemy = 1,
    Item = 2,
}

impl EntityKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        CODECS.iter().find(|codec| codec.kind as u8 == tag).map(|codec| codec.kind)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encoded size of this kind's state.
    pub fn state_len(self) -> usize {
        self.codec().len
    }

    fn codec(self) -> &'static Codec {
        &CODECS[self as usize]
    }
}

type Decoder = fn(&[u8]) -> Result<EntityState, ProtocolError>;

struct Codec {
    kind: EntityKind,
    len: usize,
    decode: Decoder,
}

/// Indexed by `EntityKind as usize`.
static CODECS: [Codec; 3] = [
    Codec {
        kind: EntityKind::Player,
        len: PlayerState::ENCODED_LEN,
        decode: decode_player,
    },
    Codec {
        kind: EntityKind::Enemy,
        len: EnemyState::ENCODED_LEN,
        decode: decode_enemy,
    },
    Codec {
        kind: EntityKind::Item,
        len: ItemState::ENCODED_LEN,
        decode: decode_item,
    },
];

fn decode_player(bytes: &[u8]) -> Result<EntityState, ProtocolError> {
    Ok(EntityState::Player(bincode::deserialize(bytes)?))
}

fn decode_enemy(bytes: &[u8]) -> Result<EntityState, ProtocolError> {
    Ok(EntityState::Enemy(bincode::deserialize(bytes)?))
}

fn decode_item(bytes: &[u8]) -> Result<EntityState, ProtocolError> {
    Ok(EntityState::Item(bincode::deserialize(bytes)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: [f32; 3],
    pub rotation: f32,
    pub health: f32,
    pub weapon: u8,
    pub flags: u8,
}

impl PlayerState {
    pub const ENCODED_LEN: usize = 12 + 4 + 4 + 1 + 1;
    pub const MAX_HEALTH: f32 = 100.0;

    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: 0.0,
            health: Self::MAX_HEALTH,
            weapon: 0,
            flags: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnemyState {
    pub position: [f32; 3],
    pub rotation: f32,
    pub health: f32,
    pub species: u8,
}

impl EnemyState {
    pub const ENCODED_LEN: usize = 12 + 4 + 4 + 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub position: [f32; 3],
    pub holder: PeerId,
    pub item: u8,
}

impl ItemState {
    pub const ENCODED_LEN: usize = 12 + 8 + 1;

    pub fn is_held(&self) -> bool {
        self.holder != PeerId::NONE
    }
}

/// Closed tagged union over every replicated kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityState {
    Player(PlayerState),
    Enemy(EnemyState),
    Item(ItemState),
}

impl EntityState {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityState::Player(_) => EntityKind::Player,
            EntityState::Enemy(_) => EntityKind::Enemy,
            EntityState::Item(_) => EntityKind::Item,
        }
    }

    pub fn position(&self) -> [f32; 3] {
        match self {
            EntityState::Player(state) => state.position,
            EntityState::Enemy(state) => state.position,
            EntityState::Item(state) => state.position,
        }
    }

    pub fn health(&self) -> Option<f32> {
        match self {
            EntityState::Player(state) => Some(state.health),
            EntityState::Enemy(state) => Some(state.health),
            EntityState::Item(_) => None,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let bytes = match self {
            EntityState::Player(state) => bincode::serialize(state)?,
            EntityState::Enemy(state) => bincode::serialize(state)?,
            EntityState::Item(state) => bincode::serialize(state)?,
        };
        debug_assert_eq!(bytes.len(), self.kind().state_len());
        out.extend_from_slice(&bytes);
        Ok(())
    }
}

/// One entity as carried by a `Snapshot` packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub state: EntityState,
}

impl EntityRecord {
    const PREFIX_LEN: usize = 8 + 1;

    pub fn encoded_len(&self) -> usize {
        Self::PREFIX_LEN + self.state.kind().state_len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = bincode::serialize(&self.id)?;
        out.push(self.state.kind().tag());
        self.state.encode_into(&mut out)?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < Self::PREFIX_LEN {
            return Err(ProtocolError::ShortHeader { len: bytes.len() });
        }
        let id: EntityId = bincode::deserialize(&bytes[..8])?;
        let tag = bytes[8];
        let kind = EntityKind::from_tag(tag).ok_or(ProtocolError::UnknownKind(tag))?;
        let codec = kind.codec();
        let body = &bytes[Self::PREFIX_LEN..];
        if body.len() != codec.len {
            return Err(ProtocolError::BadLength {
                kind,
                expected: codec.len,
                actual: body.len(),
            });
        }
        let state = (codec.decode)(body)?;
        Ok(EntityRecord { id, state })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractAction {
    PickUp,
    Drop,
    Use,
}

/// An effect waiting for the game's behaviour code to play it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectEvent {
    pub effect: u8,
    pub position: [f32; 3],
    pub source: PeerId,
}

/// Live entity state held by the owner's registry or a member's shadow copy.
///
/// Owner and members apply effects through the same methods so every
/// simulation reacts identically to the same packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    owner: Option<PeerId>,
    state: EntityState,
    effects: Vec<EffectEvent>,
}

impl Entity {
    pub fn new(id: EntityId, owner: Option<PeerId>, state: EntityState) -> Self {
        Self {
            id,
            owner,
            state,
            effects: Vec::new(),
        }
    }

    /// Fresh player entity for `peer`, keyed by the peer's id.
    pub fn player(peer: PeerId) -> Self {
        Self::new(
            EntityId::from(peer),
            Some(peer),
            EntityState::Player(PlayerState::default()),
        )
    }

    pub fn from_record(record: EntityRecord) -> Self {
        let owner = match record.state {
            EntityState::Player(_) => Some(PeerId(record.id.0)),
            _ => None,
        };
        Self::new(record.id, owner, record.state)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Peer that authors this entity's state, if it is not the session owner.
    pub fn owner(&self) -> Option<PeerId> {
        self.owner
    }

    pub fn kind(&self) -> EntityKind {
        self.state.kind()
    }

    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub fn record(&self) -> EntityRecord {
        EntityRecord {
            id: self.id,
            state: self.state,
        }
    }

    /// Replaces the state wholesale; the kind cannot change.
    pub fn apply_state(&mut self, state: EntityState) -> Result<(), ProtocolError> {
        if state.kind() != self.kind() {
            return Err(ProtocolError::KindMismatch {
                expected: self.kind(),
                actual: state.kind(),
            });
        }
        self.state = state;
        Ok(())
    }

    /// Returns remaining health, or `None` for kinds without health.
    pub fn apply_damage(&mut self, amount: f32) -> Option<f32> {
        let amount = amount.max(0.0);
        let health = match &mut self.state {
            EntityState::Player(state) => &mut state.health,
            EntityState::Enemy(state) => &mut state.health,
            EntityState::Item(_) => return None,
        };
        *health = (*health - amount).max(0.0);
        Some(*health)
    }

    pub fn is_dead(&self) -> bool {
        self.state.health().map_or(false, |health| health <= 0.0)
    }

    /// Returns whether the action changed anything.
    pub fn interact(&mut self, actor: PeerId, action: InteractAction) -> bool {
        let EntityState::Item(item) = &mut self.state else {
            return false;
        };
        match action {
            InteractAction::PickUp if !item.is_held() => {
                item.holder = actor;
                true
            }
            InteractAction::Drop if item.holder == actor => {
                item.holder = PeerId::NONE;
                true
            }
            InteractAction::Use => {
                self.effects.push(EffectEvent {
                    effect: item.item,
                    position: item.position,
                    source: actor,
                });
                true
            }
            _ => false,
        }
    }

    /// Releases an item held by `peer`; used when that peer leaves.
    pub fn release_from(&mut self, peer: PeerId) -> bool {
        match &mut self.state {
            EntityState::Item(item) if item.holder == peer => {
                item.holder = PeerId::NONE;
                true
            }
            _ => false,
        }
    }

    pub fn push_effect(&mut self, effect: EffectEvent) {
        self.effects.push(effect);
    }

    pub fn pending_effects(&self) -> &[EffectEvent] {
        &self.effects
    }

    pub fn take_effects(&mut self) -> Vec<EffectEvent> {
        std::mem::take(&mut self.effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn player_record(id: u64, position: [f32; 3]) -> EntityRecord {
        EntityRecord {
            id: EntityId(id),
            state: EntityState::Player(PlayerState::at(position)),
        }
    }

    #[test]
    fn test_state_lengths_match_codec_table() {
        let player = bincode::serialize(&PlayerState::default()).unwrap();
        assert_eq!(player.len(), EntityKind::Player.state_len());

        let enemy = bincode::serialize(&EnemyState {
            position: [1.0, 2.0, 3.0],
            rotation: 0.5,
            health: 40.0,
            species: 2,
        })
        .unwrap();
        assert_eq!(enemy.len(), EntityKind::Enemy.state_len());

        let item = bincode::serialize(&ItemState {
            position: [0.0; 3],
            holder: PeerId(9),
            item: 1,
        })
        .unwrap();
        assert_eq!(item.len(), EntityKind::Item.state_len());
    }

    #[test]
    fn test_codec_table_is_indexed_by_tag() {
        for (index, codec) in CODECS.iter().enumerate() {
            assert_eq!(codec.kind as usize, index);
        }
        assert_eq!(EntityKind::from_tag(1), Some(EntityKind::Enemy));
        assert_eq!(EntityKind::from_tag(3), None);
    }

    #[test]
    fn test_record_layout() {
        let record = player_record(42, [1.0, 2.0, 3.0]);
        let bytes = record.encode().unwrap();

        assert_eq!(bytes.len(), record.encoded_len());
        assert_eq!(&bytes[..8], &42u64.to_le_bytes());
        assert_eq!(bytes[8], EntityKind::Player.tag());
        assert_eq!(EntityRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_record_with_unknown_kind_rejected() {
        let mut bytes = player_record(1, [0.0; 3]).encode().unwrap();
        bytes[8] = 77;
        match EntityRecord::decode(&bytes) {
            Err(ProtocolError::UnknownKind(77)) => {}
            other => panic!("expected unknown kind, got {:?}", other),
        }
    }

    #[test]
    fn test_record_length_must_match_kind() {
        let mut bytes = player_record(1, [0.0; 3]).encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            EntityRecord::decode(&bytes),
            Err(ProtocolError::BadLength { expected: 22, actual: 23, .. })
        ));

        // An item header in front of a player body is caught by the length check.
        let mut bytes = player_record(1, [0.0; 3]).encode().unwrap();
        bytes[8] = EntityKind::Enemy.tag();
        assert!(EntityRecord::decode(&bytes).is_err());
    }

    #[test]
    fn test_damage_clamps_at_zero() {
        let mut entity = Entity::player(PeerId(3));
        assert_approx_eq!(entity.apply_damage(30.0).unwrap(), 70.0);
        assert_approx_eq!(entity.apply_damage(-5.0).unwrap(), 70.0);
        assert_approx_eq!(entity.apply_damage(500.0).unwrap(), 0.0);
        assert!(entity.is_dead());
    }

    #[test]
    fn test_items_have_no_health() {
        let mut item = Entity::new(
            EntityId(EntityId::SPAWNED_BASE),
            None,
            EntityState::Item(ItemState {
                position: [0.0; 3],
                holder: PeerId::NONE,
                item: 3,
            }),
        );
        assert_eq!(item.apply_damage(10.0), None);
        assert!(!item.is_dead());
    }

    #[test]
    fn test_item_pick_up_and_drop() {
        let mut item = Entity::new(
            EntityId(EntityId::SPAWNED_BASE),
            None,
            EntityState::Item(ItemState {
                position: [0.0; 3],
                holder: PeerId::NONE,
                item: 3,
            }),
        );

        assert!(item.interact(PeerId(5), InteractAction::PickUp));
        assert!(!item.interact(PeerId(6), InteractAction::PickUp));
        assert!(!item.interact(PeerId(6), InteractAction::Drop));
        assert!(item.interact(PeerId(5), InteractAction::Drop));
        assert!(item.interact(PeerId(6), InteractAction::Use));
        assert_eq!(item.take_effects().len(), 1);
        assert!(item.pending_effects().is_empty());
    }

    #[test]
    fn test_apply_state_keeps_kind() {
        let mut entity = Entity::player(PeerId(1));
        let enemy = EntityState::Enemy(EnemyState {
            position: [0.0; 3],
            rotation: 0.0,
            health: 1.0,
            species: 0,
        });
        assert!(entity.apply_state(enemy).is_err());
        assert!(entity
            .apply_state(EntityState::Player(PlayerState::at([4.0, 5.0, 6.0])))
            .is_ok());
        assert_eq!(entity.state().position(), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_record_assigns_player_owner() {
        let entity = Entity::from_record(player_record(12, [0.0; 3]));
        assert_eq!(entity.owner(), Some(PeerId(12)));
        assert_eq!(entity.kind(), EntityKind::Player);
    }
}
