//! Member-side copy of the owner's entities

use log::debug;
use shared::{Entity, EntityId, EntityKind, EntityRecord, PeerId, ProtocolError};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Remote entities as last reported by the session owner.
///
/// The local player is never shadowed: the member is the author of that
/// state, so records about it coming back from the owner are ignored.
#[derive(Debug)]
pub struct ShadowState {
    local: PeerId,
    entities: BTreeMap<EntityId, Entity>,
}

impl ShadowState {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            entities: BTreeMap::new(),
        }
    }

    /// Applies one snapshot record. Returns whether a shadow was created.
    pub fn apply(&mut self, record: EntityRecord) -> Result<bool, ProtocolError> {
        if record.id == EntityId::from(self.local) {
            return Ok(false);
        }
        match self.entities.entry(record.id) {
            Entry::Occupied(mut slot) => {
                if slot.get().kind() == record.state.kind() {
                    slot.get_mut().apply_state(record.state)?;
                } else {
                    debug!("{} changed kind, replacing shadow", record.id);
                    slot.insert(Entity::from_record(record));
                }
                Ok(false)
            }
            Entry::Vacant(slot) => {
                debug!("New shadow for {}", record.id);
                slot.insert(Entity::from_record(record));
                Ok(true)
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn remove_peer(&mut self, peer: PeerId) -> bool {
        for entity in self.entities.values_mut() {
            entity.release_from(peer);
        }
        self.entities.remove(&EntityId::from(peer)).is_some()
    }

    /// Drops player shadows of peers missing from `members`. The owner's
    /// last broadcast can still carry a player after its leave event.
    pub fn retain_members(&mut self, members: &[PeerId]) -> usize {
        let departed: Vec<PeerId> = self
            .entities
            .values()
            .filter(|entity| entity.kind() == EntityKind::Player)
            .filter_map(Entity::owner)
            .filter(|peer| !members.contains(peer))
            .collect();
        departed
            .into_iter()
            .filter(|peer| {
                let removed = self.remove_peer(*peer);
                if removed {
                    debug!("Dropped shadow of departed {}", peer);
                }
                removed
            })
            .count()
    }

    /// Drops shadows of owner-spawned entities; players stay until the
    /// owner's next snapshot refreshes them.
    pub fn reset_for_level(&mut self) {
        self.entities.retain(|id, _| !id.is_spawned());
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }
}
