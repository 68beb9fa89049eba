//! Value deduplication.
//!
//! Every struct field and array element declares an [`Embedding`]. Inline values are written in
//! full at every occurrence. Referenced values go through a cache:
//!
//! - `null` is written as index `0`
//! - a value not seen before is written as index `1`, followed by its inline payload, and is
//!   then appended to the cache
//! - a value already in the cache at slot `s` is written as `s + 2`
//!
//! [`Embedding::Reference`] keeps one cache per value type for the whole stream.
//! [`Embedding::ReferencePerType`] keys the cache by value type and declaring type, so equal
//! values used by unrelated fields are not pooled together.
//!
//! Caches only grow; nothing is evicted while the stream is open.

use crate::codec::{read_unsigned_varint, write_unsigned_varint};
use crate::types::{CondensedType, ReadContext, WriteContext};
use crate::value::{Entry, Value};
use crate::{CondensedError, Result};
use ahash::{AHashMap, RandomState};
use bytes::{Bytes, BytesMut};
use log::trace;
use std::rc::Rc;

/// Index written for a null reference.
pub const NULL_INDEX: u64 = 0;
/// Index written before the payload of a value seen for the first time.
pub const NEW_VALUE_INDEX: u64 = 1;
/// Offset added to a cache slot when writing a back-reference.
pub const SLOT_OFFSET: u64 = 2;

/// How a field or array element is embedded into its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Embedding {
    #[default]
    Inline,
    Reference,
    ReferencePerType,
}

impl Embedding {
    pub fn to_byte(self) -> u8 {
        match self {
            Embedding::Inline => 0,
            Embedding::Reference => 1,
            Embedding::ReferencePerType => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Embedding::Inline),
            1 => Ok(Embedding::Reference),
            2 => Ok(Embedding::ReferencePerType),
            other => Err(CondensedError::InvalidEmbedding(other)),
        }
    }

    pub fn is_reference(self) -> bool {
        self != Embedding::Inline
    }
}

/// Identifies one reference cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub value_type: usize,
    /// The declaring struct or array type, for `ReferencePerType` only.
    pub context: Option<usize>,
}

impl CacheKey {
    pub fn new(embedding: Embedding, value_type: usize, declaring_type: usize) -> Self {
        CacheKey {
            value_type,
            context: (embedding == Embedding::ReferencePerType).then_some(declaring_type),
        }
    }
}

/// Hash and equality used to find a value in a write cache.
///
/// Register one per value type with [`WriteCaches::set_adapter`] when the structural equality
/// of [`Value`] is not the identity that should be deduplicated.
pub trait KeyAdapter {
    fn hash(&self, value: &Value) -> u64;
    fn equals(&self, a: &Value, b: &Value) -> bool;
}

/// The default adapter: structural `Hash` and `Eq` of [`Value`].
#[derive(Default)]
pub struct StructuralKeys {
    state: RandomState,
}

impl KeyAdapter for StructuralKeys {
    fn hash(&self, value: &Value) -> u64 {
        self.state.hash_one(value)
    }

    fn equals(&self, a: &Value, b: &Value) -> bool {
        a == b
    }
}

#[derive(Default)]
struct WriteCache {
    values: Vec<(u64, Value)>,
    slots: AHashMap<u64, Vec<usize>>,
}

/// Write-side caches: value to slot lookup for every cache key.
///
/// Appends made while writing one message are journaled so that a failed message can be
/// rolled back, keeping the writer in step with what a reader will see.
pub struct WriteCaches {
    caches: AHashMap<CacheKey, WriteCache>,
    adapters: AHashMap<usize, Rc<dyn KeyAdapter>>,
    default_adapter: Rc<dyn KeyAdapter>,
    journal: Vec<CacheKey>,
}

impl Default for WriteCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteCaches {
    pub fn new() -> Self {
        WriteCaches {
            caches: AHashMap::new(),
            adapters: AHashMap::new(),
            default_adapter: Rc::new(StructuralKeys::default()),
            journal: Vec::new(),
        }
    }

    /// Uses `adapter` for all caches holding values of `value_type`.
    pub fn set_adapter(&mut self, value_type: usize, adapter: Rc<dyn KeyAdapter>) {
        self.adapters.insert(value_type, adapter);
    }

    fn adapter(&self, value_type: usize) -> &Rc<dyn KeyAdapter> {
        self.adapters
            .get(&value_type)
            .unwrap_or(&self.default_adapter)
    }

    /// Number of values in the cache for `key`.
    pub fn len(&self, key: CacheKey) -> usize {
        self.caches.get(&key).map_or(0, |cache| cache.values.len())
    }

    pub fn lookup(&self, key: CacheKey, value: &Value) -> Option<usize> {
        let cache = self.caches.get(&key)?;
        let adapter = self.adapter(key.value_type);
        let hash = adapter.hash(value);
        cache
            .slots
            .get(&hash)?
            .iter()
            .copied()
            .find(|&slot| adapter.equals(&cache.values[slot].1, value))
    }

    /// Appends `value` and returns its slot.
    pub fn insert(&mut self, key: CacheKey, value: Value) -> usize {
        let hash = self.adapter(key.value_type).hash(&value);
        let cache = self.caches.entry(key).or_default();
        let slot = cache.values.len();
        cache.values.push((hash, value));
        cache.slots.entry(hash).or_default().push(slot);
        self.journal.push(key);
        trace!("cache {:?} grew to {} values", key, slot + 1);
        slot
    }

    /// Marks the current state; pass the result to [`rollback`](Self::rollback).
    pub fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    /// Removes every value appended since `checkpoint`, newest first.
    pub fn rollback(&mut self, checkpoint: usize) {
        while self.journal.len() > checkpoint {
            let Some(key) = self.journal.pop() else {
                break;
            };
            let Some(cache) = self.caches.get_mut(&key) else {
                continue;
            };
            if let Some((hash, _)) = cache.values.pop() {
                let slot = cache.values.len();
                if let Some(slots) = cache.slots.get_mut(&hash) {
                    slots.retain(|&s| s != slot);
                    if slots.is_empty() {
                        cache.slots.remove(&hash);
                    }
                }
            }
        }
    }

    /// Forgets the journal; appended values become permanent.
    pub fn commit(&mut self) {
        self.journal.clear();
    }
}

/// Read-side caches: slot to value for every cache key.
#[derive(Default)]
pub struct ReadCaches {
    caches: AHashMap<CacheKey, Vec<Value>>,
}

impl ReadCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, key: CacheKey) -> usize {
        self.caches.get(&key).map_or(0, Vec::len)
    }

    pub fn push(&mut self, key: CacheKey, value: Value) -> usize {
        let cache = self.caches.entry(key).or_default();
        cache.push(value);
        trace!("cache {:?} grew to {} values", key, cache.len());
        cache.len() - 1
    }

    pub fn get(&self, key: CacheKey, slot: usize) -> Option<Value> {
        self.caches.get(&key)?.get(slot).cloned()
    }
}

/// Writes `value` of type `ty` into a container declared by `declaring_type`.
pub fn write_embedded(
    cx: &mut WriteContext<'_>,
    ty: &CondensedType,
    embedding: Embedding,
    declaring_type: usize,
    value: &Value,
    writer: &mut BytesMut,
) -> Result<()> {
    if embedding == Embedding::Inline {
        if value.is_null() {
            return Err(CondensedError::NullNotAllowed {
                ty: ty.name().to_string(),
            });
        }
        return ty.write_value(cx, value, writer);
    }
    if value.is_null() {
        write_unsigned_varint(writer, NULL_INDEX);
        return Ok(());
    }
    let key = CacheKey::new(embedding, ty.id(), declaring_type);
    if let Some(slot) = cx.caches.lookup(key, value) {
        write_unsigned_varint(writer, slot as u64 + SLOT_OFFSET);
        return Ok(());
    }
    write_unsigned_varint(writer, NEW_VALUE_INDEX);
    ty.write_value(cx, value, writer)?;
    cx.caches.insert(key, value.clone());
    Ok(())
}

/// Reads a value written by [`write_embedded`].
///
/// Inline values come back realized. Referenced values come back as [`Entry::Deferred`] cache
/// slots (or a realized null); the payload of a first occurrence is still decoded eagerly since
/// it sits in the stream.
pub fn read_embedded(
    cx: &ReadContext<'_>,
    ty: &CondensedType,
    embedding: Embedding,
    declaring_type: usize,
    reader: &mut Bytes,
) -> Result<Entry> {
    if embedding == Embedding::Inline {
        return Ok(Entry::Resolved(ty.read_value(cx, reader)?));
    }
    let key = CacheKey::new(embedding, ty.id(), declaring_type);
    match read_unsigned_varint(reader)? {
        NULL_INDEX => Ok(Entry::Resolved(Value::Null)),
        NEW_VALUE_INDEX => {
            let value = ty.read_value(cx, reader)?;
            Ok(Entry::Deferred(cx.caches().borrow_mut().push(key, value)))
        }
        index => {
            let slot = usize::try_from(index - SLOT_OFFSET).map_err(|_| {
                CondensedError::Decode(format!("reference index {} too large", index))
            })?;
            let cached = cx.caches().borrow().len(key);
            if slot >= cached {
                return Err(CondensedError::Decode(format!(
                    "reference to slot {} of {} but only {} values are cached",
                    slot,
                    ty.name(),
                    cached
                )));
            }
            Ok(Entry::Deferred(slot))
        }
    }
}
