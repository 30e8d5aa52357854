//! The identity map of tracked entities.
//!
//! The map lock covers lookups and structural changes to the map only. It
//! does not serialize flushes: two `save_changes` calls over overlapping
//! entities must not run concurrently.

use crate::entry::EntityEntry;
use crate::identity::{EntityRef, IdentityKey};
use keel_core::{Entity, EntityState, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type EntryMap = HashMap<IdentityKey, Arc<EntityEntry>>;

/// Tracks entity entries by identity.
#[derive(Debug)]
pub struct ChangeTracker {
    entries: RwLock<EntryMap>,
    next_sequence: AtomicU64,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(1),
        }
    }

    fn read_map(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Map key of the entry tracking exactly this instance.
    fn key_of_instance<E: Entity>(map: &EntryMap, entity: &EntityRef<E>) -> Option<IdentityKey> {
        map.iter()
            .find(|(_, entry)| entry.is_instance(entity))
            .map(|(key, _)| key.clone())
    }

    /// Start tracking `entity` in `state`, replacing any entry with the same identity.
    ///
    /// Re-tracking an instance that is already tracked keeps its sequence
    /// number, so its local identity is stable until a key is assigned.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(shape = E::descriptor().name()))]
    pub fn track<E: Entity>(&self, entity: &EntityRef<E>, state: EntityState) -> Arc<EntityEntry> {
        let previous = {
            let map = self.read_map();
            Self::key_of_instance(&map, entity).and_then(|key| map.get(&key).map(|e| (key, e.sequence())))
        };
        let sequence = previous
            .as_ref()
            .map_or_else(|| self.next_sequence.fetch_add(1, Ordering::Relaxed), |(_, seq)| *seq);

        let entry = Arc::new(EntityEntry::new(entity, state, sequence));
        let key = entry.identity_key();
        tracing::debug!(key = %key, state = state.as_str(), "Tracking entity");

        let mut map = self.write_map();
        if let Some((old_key, _)) = previous {
            map.remove(&old_key);
        }
        if map.insert(key.clone(), Arc::clone(&entry)).is_some() {
            tracing::debug!(key = %key, "Replaced entry with the same identity");
        }
        entry
    }

    /// Track every entity in `entities` in `state`.
    pub fn track_range<'a, E, I>(&self, entities: I, state: EntityState) -> Vec<Arc<EntityEntry>>
    where
        E: Entity,
        I: IntoIterator<Item = &'a EntityRef<E>>,
    {
        entities.into_iter().map(|e| self.track(e, state)).collect()
    }

    /// The entry for `entity`: by instance first, then by stored primary key.
    pub fn entry<E: Entity>(&self, entity: &EntityRef<E>) -> Option<Arc<EntityEntry>> {
        let map = self.read_map();
        if let Some(entry) = map.values().find(|entry| entry.is_instance(entity)) {
            return Some(Arc::clone(entry));
        }
        let pk = crate::identity::read(entity).primary_key_value();
        IdentityKey::stored(E::descriptor().name(), &pk).and_then(|key| map.get(&key).cloned())
    }

    /// The entry tracking an `E` with primary key `pk`, if any.
    pub fn entry_by_key<E: Entity>(&self, pk: &Value) -> Option<Arc<EntityEntry>> {
        let key = IdentityKey::stored(E::descriptor().name(), pk)?;
        let map = self.read_map();
        if let Some(entry) = map.get(&key) {
            return Some(Arc::clone(entry));
        }
        // Keys assigned since the last acceptance are not re-keyed yet.
        map.values()
            .find(|entry| entry.identity_key() == key)
            .cloned()
    }

    /// The tracked instance of `E` with primary key `pk`, if any.
    pub fn find_tracked<E: Entity>(&self, pk: &Value) -> Option<EntityRef<E>> {
        self.entry_by_key::<E>(pk).and_then(|entry| entry.entity::<E>())
    }

    /// The existing entry for `entity`, or a new one in `state`.
    pub fn get_or_track<E: Entity>(&self, entity: &EntityRef<E>, state: EntityState) -> Arc<EntityEntry> {
        self.entry(entity).unwrap_or_else(|| self.track(entity, state))
    }

    /// All entries, in tracking order.
    pub fn entries(&self) -> Vec<Arc<EntityEntry>> {
        let mut entries: Vec<_> = self.read_map().values().cloned().collect();
        entries.sort_by_key(|e| e.sequence());
        entries
    }

    /// Entries currently in `state`, in tracking order.
    pub fn entries_by_state(&self, state: EntityState) -> Vec<Arc<EntityEntry>> {
        let mut entries: Vec<_> = self
            .read_map()
            .values()
            .filter(|e| e.state() == state)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence());
        entries
    }

    /// Whether any entry would write on flush.
    pub fn has_changes(&self) -> bool {
        self.read_map().values().any(|e| e.has_changes())
    }

    /// Promote every dirty Unchanged entry to Modified. Returns how many moved.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn detect_changes(&self) -> usize {
        let promoted = self
            .entries()
            .iter()
            .filter(|entry| entry.detect_change())
            .count();
        tracing::debug!(promoted, "Change detection complete");
        promoted
    }

    /// Post-flush cleanup.
    ///
    /// Deleted entries leave the map; every other entry is re-baselined to
    /// Unchanged and filed under its current identity, so an entity whose
    /// key was assigned by an insert becomes reachable by that key.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn accept_all_changes(&self) {
        let mut map = self.write_map();
        let drained: Vec<_> = map.drain().map(|(_, entry)| entry).collect();
        let mut removed = 0usize;
        for entry in drained {
            if entry.state() == EntityState::Deleted {
                removed += 1;
                continue;
            }
            entry.accept_changes();
            map.insert(entry.identity_key(), entry);
        }
        tracing::debug!(removed, remaining = map.len(), "Accepted all changes");
    }

    /// Stop tracking `entity`. Returns whether it was tracked.
    pub fn untrack<E: Entity>(&self, entity: &EntityRef<E>) -> bool {
        let mut map = self.write_map();
        let key = Self::key_of_instance(&map, entity).or_else(|| {
            let pk = crate::identity::read(entity).primary_key_value();
            IdentityKey::stored(E::descriptor().name(), &pk).filter(|k| map.contains_key(k))
        });
        match key {
            Some(key) => {
                tracing::debug!(key = %key, "Untracking entity");
                map.remove(&key).is_some()
            }
            None => false,
        }
    }

    /// Forget every entry.
    pub fn clear(&self) {
        let mut map = self.write_map();
        tracing::debug!(count = map.len(), "Clearing change tracker");
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }
}
