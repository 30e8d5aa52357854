//! Per-entity tracking records.
//!
//! An [`EntityEntry`] holds the tracked instance, its lifecycle state and
//! the snapshot of field values last known to match storage. Dirtiness is
//! decided by comparing current values against that snapshot field by
//! field, using value equality.

use crate::identity::{ErasedEntity, EntityRef, IdentityKey, address};
use keel_core::{Entity, EntityDescriptor, EntityState, Result, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Field values keyed by field name.
pub type OriginalValues = HashMap<&'static str, Value>;

/// Changed fields in descriptor order, each with its current value.
pub type ChangedFields = Vec<(&'static str, Value)>;

#[derive(Debug)]
struct EntryInner {
    state: EntityState,
    original: Option<OriginalValues>,
    /// Primary key at the time the snapshot was captured.
    captured_key: Value,
}

/// Tracking record for one entity instance.
pub struct EntityEntry {
    entity: Arc<dyn ErasedEntity>,
    descriptor: &'static EntityDescriptor,
    sequence: u64,
    inner: Mutex<EntryInner>,
}

impl std::fmt::Debug for EntityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("EntityEntry")
            .field("shape", &self.descriptor.name())
            .field("sequence", &self.sequence)
            .field("state", &inner.state)
            .field("captured_key", &inner.captured_key)
            .finish_non_exhaustive()
    }
}

impl EntityEntry {
    pub(crate) fn new<E: Entity>(entity: &EntityRef<E>, state: EntityState, sequence: u64) -> Self {
        let erased: Arc<dyn ErasedEntity> = entity.clone();
        let entry = Self {
            entity: erased,
            descriptor: E::descriptor(),
            sequence,
            inner: Mutex::new(EntryInner {
                state,
                original: None,
                captured_key: Value::Null,
            }),
        };
        if state.needs_snapshot() {
            entry.capture_snapshot();
        }
        entry
    }

    fn lock(&self) -> MutexGuard<'_, EntryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> EntityState {
        self.lock().state
    }

    /// Move to `state`, capturing a snapshot if the new state needs one
    /// and none exists yet.
    pub fn set_state(&self, state: EntityState) {
        let needs_capture = {
            let mut inner = self.lock();
            inner.state = state;
            state.needs_snapshot() && inner.original.is_none()
        };
        if needs_capture {
            self.capture_snapshot();
        }
    }

    /// Shape name of the tracked entity.
    pub fn shape(&self) -> &'static str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    /// Tracking sequence number, assigned when the instance was first tracked.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Record every field's current value as the persisted baseline.
    pub fn capture_snapshot(&self) {
        let values = self.entity.values();
        let key = self.entity.primary_key();
        let original: OriginalValues = self
            .descriptor
            .columns()
            .iter()
            .map(|c| c.name())
            .zip(values)
            .collect();
        tracing::trace!(
            shape = self.shape(),
            sequence = self.sequence,
            fields = original.len(),
            "Capturing snapshot"
        );
        let mut inner = self.lock();
        inner.original = Some(original);
        inner.captured_key = key;
    }

    /// The snapshot, if one has been captured.
    pub fn original_values(&self) -> Option<OriginalValues> {
        self.lock().original.clone()
    }

    /// Fields whose current value differs from the snapshot.
    ///
    /// Only Unchanged and Modified entries are diffed; every other state,
    /// and an entry without a snapshot, reports no changes.
    pub fn changed_fields(&self) -> ChangedFields {
        let original = {
            let inner = self.lock();
            if !inner.state.needs_snapshot() {
                return Vec::new();
            }
            match &inner.original {
                Some(original) => original.clone(),
                None => return Vec::new(),
            }
        };
        self.descriptor
            .columns()
            .iter()
            .map(|c| c.name())
            .zip(self.entity.values())
            .filter(|(name, current)| original.get(name) != Some(current))
            .collect()
    }

    /// Whether flushing this entry would write anything.
    pub fn has_changes(&self) -> bool {
        match self.state() {
            EntityState::Added | EntityState::Deleted => true,
            EntityState::Modified | EntityState::Unchanged => !self.changed_fields().is_empty(),
            EntityState::Detached => false,
        }
    }

    /// Promote Unchanged to Modified if any field differs from the snapshot.
    ///
    /// Returns whether the entry was promoted.
    pub fn detect_change(&self) -> bool {
        if self.state() != EntityState::Unchanged || self.changed_fields().is_empty() {
            return false;
        }
        // Re-check under the lock; another caller may have moved the entry.
        let mut inner = self.lock();
        if inner.state != EntityState::Unchanged {
            return false;
        }
        inner.state = EntityState::Modified;
        tracing::debug!(
            shape = self.descriptor.name(),
            sequence = self.sequence,
            "Detected change, entry now Modified"
        );
        true
    }

    /// Current value of the primary-key field.
    pub fn primary_key(&self) -> Value {
        self.entity.primary_key()
    }

    /// Primary key as of the last snapshot, falling back to the current one.
    ///
    /// UPDATE and DELETE target this so a key edited in memory still
    /// addresses the stored row.
    pub fn persisted_key(&self) -> Value {
        let captured = self.lock().captured_key.clone();
        if captured.is_zero() {
            self.primary_key()
        } else {
            captured
        }
    }

    /// Re-baseline after a successful flush: Unchanged with a fresh snapshot.
    pub fn accept_changes(&self) {
        self.lock().state = EntityState::Unchanged;
        self.capture_snapshot();
    }

    /// Identity under which the tracker files this entry.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.shape(), &self.primary_key(), self.sequence)
    }

    /// The tracked instance, if it is an `E`.
    pub fn entity<E: Entity>(&self) -> Option<EntityRef<E>> {
        Arc::clone(&self.entity)
            .into_any()
            .downcast::<RwLock<E>>()
            .ok()
    }

    /// Whether this entry tracks exactly the instance behind `entity`.
    pub fn is_instance<E: Entity>(&self, entity: &EntityRef<E>) -> bool {
        address(&self.entity) == address(entity)
    }

    /// Current field values in descriptor order.
    pub(crate) fn values(&self) -> Vec<Value> {
        self.entity.values()
    }

    pub(crate) fn set_primary_key(&self, value: Value) -> Result<()> {
        self.entity.set_primary_key(value)
    }

    /// A JSON rendering of this entry for logs and diagnostics.
    pub fn describe(&self) -> serde_json::Value {
        let (state, original) = {
            let inner = self.lock();
            (inner.state, inner.original.clone())
        };
        let current: serde_json::Map<_, _> = self
            .descriptor
            .columns()
            .iter()
            .zip(self.values())
            .map(|(c, v)| (c.name().to_string(), serde_json::to_value(v).unwrap_or_default()))
            .collect();
        serde_json::json!({
            "shape": self.shape(),
            "key": self.identity_key().to_string(),
            "state": state,
            "current": current,
            "has_snapshot": original.is_some(),
        })
    }
}
