//! Entity handles and identity keys.
//!
//! Tracked entities are shared as [`EntityRef<E>`] (`Arc<RwLock<E>>`), so the
//! tracker and the caller observe the same instance: a mutation made
//! through the caller's handle is what the next diff sees, and a key
//! generated by an insert is written into the caller's instance.
//!
//! # Identity
//!
//! An entity whose primary key holds a non-zero value is identified by
//! `(shape, key)`. Until then it is identified by `(shape, sequence)`,
//! where the sequence number is handed out once per tracked instance.
//! Two unsaved instances of one shape therefore never collide.

use keel_core::{Entity, EntityDescriptor, Result, Value};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared handle to a tracked entity.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Read guard for a tracked entity.
pub type EntityReadGuard<'a, E> = RwLockReadGuard<'a, E>;

/// Write guard for a tracked entity.
pub type EntityWriteGuard<'a, E> = RwLockWriteGuard<'a, E>;

/// Wrap an entity in a shareable handle.
pub fn entity_ref<E: Entity>(entity: E) -> EntityRef<E> {
    Arc::new(RwLock::new(entity))
}

/// Read an entity, recovering the guard if a writer panicked.
pub fn read<E>(entity: &EntityRef<E>) -> EntityReadGuard<'_, E> {
    entity.read().unwrap_or_else(|e| e.into_inner())
}

/// Write an entity, recovering the guard if a writer panicked.
pub fn write<E>(entity: &EntityRef<E>) -> EntityWriteGuard<'_, E> {
    entity.write().unwrap_or_else(|e| e.into_inner())
}

/// Address of the value behind an `Arc`, used for instance identity.
pub(crate) fn address<T: ?Sized>(arc: &Arc<T>) -> *const () {
    Arc::as_ptr(arc).cast::<()>()
}

/// Type-erased view of a tracked entity.
pub(crate) trait ErasedEntity: Send + Sync {
    fn descriptor(&self) -> &'static EntityDescriptor;

    /// Field values in descriptor order.
    fn values(&self) -> Vec<Value>;

    fn primary_key(&self) -> Value;

    fn set_primary_key(&self, value: Value) -> Result<()>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: Entity> ErasedEntity for RwLock<E> {
    fn descriptor(&self) -> &'static EntityDescriptor {
        E::descriptor()
    }

    fn values(&self) -> Vec<Value> {
        self.read().unwrap_or_else(|e| e.into_inner()).to_values()
    }

    fn primary_key(&self) -> Value {
        self.read()
            .unwrap_or_else(|e| e.into_inner())
            .primary_key_value()
    }

    fn set_primary_key(&self, value: Value) -> Result<()> {
        self.write()
            .unwrap_or_else(|e| e.into_inner())
            .set_primary_key(value)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Primary-key material normalized for hashing.
///
/// Integer widths collapse to one variant so `find(7_i32)` and a stored
/// `BIGINT` key of 7 resolve to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
    /// Bit pattern of a floating-point key.
    Float(u64),
    Timestamp(i64),
}

impl KeyValue {
    /// Key material for `value`, or `None` when the key is unset.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_zero() {
            return None;
        }
        Some(match value {
            Value::Null => return None,
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Int(i) => KeyValue::Integer(i64::from(*i)),
            Value::BigInt(i) => KeyValue::Integer(*i),
            Value::Double(f) => KeyValue::Float(f.to_bits()),
            Value::Text(s) => KeyValue::Text(s.clone()),
            Value::Bytes(b) => KeyValue::Bytes(b.clone()),
            Value::Timestamp(t) => KeyValue::Timestamp(*t),
        })
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Integer(i) | KeyValue::Timestamp(i) => write!(f, "{}", i),
            KeyValue::Text(s) => write!(f, "{}", s),
            KeyValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            KeyValue::Bool(b) => write!(f, "{}", b),
            KeyValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
        }
    }
}

/// Key of one entry in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum IdentityKey {
    /// Entity with an assigned primary key.
    Stored { shape: &'static str, key: KeyValue },
    /// Entity without a key yet, identified by its tracking sequence number.
    Local { shape: &'static str, sequence: u64 },
}

impl IdentityKey {
    /// Identity for an entity of `shape` holding `key`, falling back to `sequence`.
    pub fn new(shape: &'static str, key: &Value, sequence: u64) -> Self {
        match KeyValue::from_value(key) {
            Some(key) => IdentityKey::Stored { shape, key },
            None => IdentityKey::Local { shape, sequence },
        }
    }

    /// Identity of a stored entity, or `None` when `key` is unset.
    pub fn stored(shape: &'static str, key: &Value) -> Option<Self> {
        KeyValue::from_value(key).map(|key| IdentityKey::Stored { shape, key })
    }

    pub fn shape(&self) -> &'static str {
        match self {
            IdentityKey::Stored { shape, .. } | IdentityKey::Local { shape, .. } => shape,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, IdentityKey::Local { .. })
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Stored { shape, key } => write!(f, "{}:{}", shape, key),
            IdentityKey::Local { shape, sequence } => write!(f, "{}#{}", shape, sequence),
        }
    }
}
