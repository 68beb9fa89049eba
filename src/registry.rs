//! The per-stream type table and the forward-reference builder.

use crate::category::{self, CATEGORY_SLOTS};
use crate::types::{CondensedType, LazyTypeRef, TypeRef};
use crate::{CondensedError, Result};
use ahash::AHashMap;
use log::debug;
use std::hash::Hash;
use std::rc::Rc;

/// Append-only table of the types of one stream, indexed by id.
///
/// Slots `0..16` hold the default types of the primitive categories; the slots of structural
/// and unassigned categories stay empty. Registered types take the following ids in order.
/// A slot may also be reserved but not yet filled while its type is being built.
pub struct TypeRegistry {
    types: Vec<Option<Rc<CondensedType>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry holding only the bootstrap default types.
    pub fn new() -> Self {
        let types = (0..CATEGORY_SLOTS as u8)
            .map(|id| {
                category::category(id)
                    .and_then(|category| category.default_type())
                    .ok()
                    .map(Rc::new)
            })
            .collect();
        TypeRegistry { types }
    }

    /// Number of slots, which is also the id the next registered type gets.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type beyond the bootstrap slots was registered.
    pub fn is_empty(&self) -> bool {
        self.types.len() <= CATEGORY_SLOTS
    }

    /// # Errors
    /// `NoSuchType` if the slot is past the end, empty or only reserved.
    pub fn get(&self, id: usize) -> Result<&Rc<CondensedType>> {
        self.types
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(CondensedError::NoSuchType { id })
    }

    pub fn contains(&self, id: usize) -> bool {
        self.get(id).is_ok()
    }

    /// The default type of a category.
    ///
    /// # Errors
    /// `UnknownCategory` for unassigned ids, `NoDefaultType` for array and struct.
    pub fn default_type(&self, category_id: u8) -> Result<&Rc<CondensedType>> {
        category::category(category_id)?;
        self.get(category_id as usize)
            .map_err(|_| CondensedError::NoDefaultType { category: category_id })
    }

    /// Registers the type built by `factory`, which receives the id the type will get.
    ///
    /// If the factory fails, nothing is registered.
    pub fn register<F>(&mut self, factory: F) -> Result<Rc<CondensedType>>
    where
        F: FnOnce(usize) -> Result<CondensedType>,
    {
        let id = self.reserve();
        match factory(id).and_then(|ty| self.fill(ty)) {
            Ok(ty) => Ok(ty),
            Err(e) => {
                self.release(id);
                Err(e)
            }
        }
    }

    /// Reserves the next id without a type, for types that need their own id (or the ids of
    /// types referring back to them) before they can be built.
    pub fn reserve(&mut self) -> usize {
        self.types.push(None);
        self.types.len() - 1
    }

    /// Drops a reservation that will not be filled. Only the last slot is actually removed;
    /// an earlier one stays empty since later ids are already handed out.
    pub fn release(&mut self, id: usize) {
        if id + 1 == self.types.len() && id >= CATEGORY_SLOTS && self.types[id].is_none() {
            self.types.pop();
        }
    }

    /// Fills a reserved slot with its type.
    ///
    /// # Errors
    /// - `ReservedTypeId` for ids below 16
    /// - `NoSuchType` if the id was not reserved, if the type refers to an id never handed out,
    ///   or if it refers to a type registered somewhere else
    /// - `DuplicateType` if the slot is already filled
    pub fn fill(&mut self, ty: CondensedType) -> Result<Rc<CondensedType>> {
        let id = ty.id();
        if id < CATEGORY_SLOTS {
            return Err(CondensedError::ReservedTypeId { id });
        }
        match self.types.get(id) {
            None => return Err(CondensedError::NoSuchType { id }),
            Some(Some(_)) => return Err(CondensedError::DuplicateType { id }),
            Some(None) => {}
        }
        ty.validate()?;
        for reference in ty.kind().references() {
            self.check_reference(reference)?;
        }
        debug!(
            "registered type {} ({}) as #{}",
            ty.name(),
            ty.category().name(),
            id
        );
        let ty = Rc::new(ty);
        self.types[id] = Some(Rc::clone(&ty));
        Ok(ty)
    }

    /// A resolved reference must be the very type this registry holds at its id; a lazy one
    /// only needs an id that was handed out.
    fn check_reference(&self, reference: &TypeRef) -> Result<()> {
        let id = reference.id();
        match reference {
            TypeRef::Resolved(ty) => match self.get(id) {
                Ok(own) if Rc::ptr_eq(own, ty) => Ok(()),
                _ => Err(CondensedError::NoSuchType { id }),
            },
            TypeRef::Lazy(_) if id < self.types.len() => Ok(()),
            TypeRef::Lazy(_) => Err(CondensedError::NoSuchType { id }),
        }
    }

    /// Registers a type read from a stream at the id its definition names.
    ///
    /// Definitions may arrive out of id order when a type was reserved before the types it
    /// refers to; slots in between are left empty until their definitions arrive. Ids above
    /// `max_id` are taken for corruption.
    pub(crate) fn insert_at(&mut self, ty: CondensedType, max_id: usize) -> Result<Rc<CondensedType>> {
        let id = ty.id();
        if id < CATEGORY_SLOTS {
            return Err(CondensedError::ReservedTypeId { id });
        }
        if id > max_id {
            return Err(CondensedError::Decode(format!(
                "type id {} exceeds the limit of {}",
                id, max_id
            )));
        }
        if id >= self.types.len() {
            self.types.resize(id + 1, None);
        }
        if self.types[id].is_some() {
            return Err(CondensedError::DuplicateType { id });
        }
        debug!(
            "read definition of type {} ({}) as #{}",
            ty.name(),
            ty.category().name(),
            id
        );
        let ty = Rc::new(ty);
        self.types[id] = Some(Rc::clone(&ty));
        Ok(ty)
    }

    /// All registered types in id order, default types included.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<CondensedType>> {
        self.types.iter().flatten()
    }

    /// Registered types past the bootstrap slots, in id order.
    pub fn custom_types(&self) -> impl Iterator<Item = &Rc<CondensedType>> {
        self.types.iter().skip(CATEGORY_SLOTS).flatten()
    }
}

/// Where types get registered: a bare [`TypeRegistry`], or an output stream that also emits
/// each definition as it is completed.
pub trait TypeSink {
    fn registry(&self) -> &TypeRegistry;

    /// See [`TypeRegistry::reserve`].
    fn reserve_type(&mut self) -> usize;

    /// See [`TypeRegistry::fill`].
    fn complete_type(&mut self, ty: CondensedType) -> Result<Rc<CondensedType>>;

    /// See [`TypeRegistry::release`].
    fn release_type(&mut self, id: usize);
}

impl TypeSink for TypeRegistry {
    fn registry(&self) -> &TypeRegistry {
        self
    }

    fn reserve_type(&mut self) -> usize {
        self.reserve()
    }

    fn complete_type(&mut self, ty: CondensedType) -> Result<Rc<CondensedType>> {
        self.fill(ty)
    }

    fn release_type(&mut self, id: usize) {
        self.release(id)
    }
}

/// Builds possibly cyclic type graphs, keyed by a caller-chosen identity `K` for each type.
///
/// While a type is being built its key maps to a lazy reference to its reserved id, so a
/// nested reference back to it (directly or through siblings) does not recurse. Once built,
/// the key maps to the registered type and later requests reuse it.
pub struct TypeGraph<K> {
    in_progress: AHashMap<K, LazyTypeRef>,
    completed: AHashMap<K, Rc<CondensedType>>,
}

impl<K> Default for TypeGraph<K> {
    fn default() -> Self {
        TypeGraph {
            in_progress: AHashMap::new(),
            completed: AHashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone> TypeGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The type already defined for `key`, lazily if it is still being built.
    pub fn get(&self, key: &K) -> Option<TypeRef> {
        if let Some(ty) = self.completed.get(key) {
            return Some(TypeRef::from(ty));
        }
        self.in_progress.get(key).cloned().map(TypeRef::Lazy)
    }

    pub fn is_in_progress(&self, key: &K) -> bool {
        self.in_progress.contains_key(key)
    }

    /// Returns the type for `key`, building and registering it first if needed.
    ///
    /// `build` receives the reserved id. Types it defines through the graph may refer back to
    /// `key`; they get a [`TypeRef::Lazy`] that resolves once this type is registered.
    pub fn define<F>(
        &mut self,
        sink: &mut dyn TypeSink,
        key: K,
        name: &str,
        build: F,
    ) -> Result<TypeRef>
    where
        F: FnOnce(&mut dyn TypeSink, &mut Self, usize) -> Result<CondensedType>,
    {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let id = sink.reserve_type();
        self.in_progress
            .insert(key.clone(), LazyTypeRef::new(id, name));
        let built = build(&mut *sink, self, id);
        self.in_progress.remove(&key);
        match built.and_then(|ty| sink.complete_type(ty)) {
            Ok(ty) => {
                self.completed.insert(key, Rc::clone(&ty));
                Ok(TypeRef::from(ty))
            }
            Err(e) => {
                sink.release_type(id);
                Err(e)
            }
        }
    }
}
