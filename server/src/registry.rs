//! Authoritative entity registry held by the session owner
//!
//! Slots are keyed by entity id in a `BTreeMap`, so iteration order (and with
//! it the per-tick broadcast stream) is deterministic. A slot can be
//! invalidated, leaving the id known but empty; the next snapshot from that
//! peer recreates the player through [`EntityRegistry::ensure_player`].

use log::{debug, info};
use shared::{Entity, EntityId, EntityKind, EntityState, PeerId};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct EntityRegistry {
    slots: BTreeMap<EntityId, Option<Entity>>,
    next_spawned: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(&id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(&id).and_then(Option::as_mut)
    }

    /// Whether `id` refers to a live entity. Invalidated slots do not count.
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the player entity for `peer`, creating it when the slot is
    /// missing or invalidated. The flag reports whether it was created.
    pub fn ensure_player(&mut self, peer: PeerId) -> (bool, &mut Entity) {
        let slot = self.slots.entry(EntityId::from(peer)).or_insert(None);
        let created = slot.is_none();
        if created {
            info!("Creating player entity for {}", peer);
        }
        (created, slot.get_or_insert_with(|| Entity::player(peer)))
    }

    /// Adds an owner-authored entity with a fresh id from the spawned range.
    pub fn spawn(&mut self, state: EntityState) -> EntityId {
        let id = EntityId(EntityId::SPAWNED_BASE + self.next_spawned);
        self.next_spawned += 1;
        self.slots.insert(id, Some(Entity::new(id, None, state)));
        debug!("Spawned {:?} as {}", state.kind(), id);
        id
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.slots.remove(&id).flatten()
    }

    /// Drops the peer's player slot and releases anything it was holding.
    pub fn remove_peer(&mut self, peer: PeerId) -> bool {
        let removed = self.slots.remove(&EntityId::from(peer)).flatten().is_some();
        for entity in self.slots.values_mut().flatten() {
            if entity.release_from(peer) {
                debug!("{} released {} on leave", peer, entity.id());
            }
        }
        if removed {
            info!("Removed player entity for {}", peer);
        }
        removed
    }

    /// Removes the player of every peer missing from `members`, such as one
    /// recreated by a snapshot that was still queued when its peer left.
    /// Returns how many players were removed.
    pub fn retain_members(&mut self, members: &[PeerId]) -> usize {
        let departed: Vec<PeerId> = self
            .live()
            .filter(|entity| entity.kind() == EntityKind::Player)
            .filter_map(Entity::owner)
            .filter(|peer| !members.contains(peer))
            .collect();
        departed
            .into_iter()
            .filter(|peer| self.remove_peer(*peer))
            .count()
    }

    /// Empties a slot without forgetting the id.
    pub fn invalidate(&mut self, id: EntityId) -> bool {
        match self.slots.get_mut(&id) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    /// Level change: spawned entities belong to the old level and go away,
    /// remote players are invalidated until their next snapshot arrives.
    pub fn reset_for_level(&mut self, keep: PeerId) {
        let keep = EntityId::from(keep);
        self.slots.retain(|id, _| !id.is_spawned());
        for (id, slot) in self.slots.iter_mut() {
            if *id != keep {
                *slot = None;
            }
        }
        debug!("Registry reset for level change, {} slots kept", self.slots.len());
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Live entities in id order.
    pub fn live(&self) -> impl Iterator<Item = &Entity> {
        self.slots.values().flatten()
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.slots.values_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    /// Number of slots including invalidated ones.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count_for(&self, peer: PeerId) -> usize {
        self.live()
            .filter(|entity| entity.kind() == EntityKind::Player && entity.owner() == Some(peer))
            .count()
    }
}
