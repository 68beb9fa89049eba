//! Types: a registered id, a name, a description and a [`TypeKind`] carrying the
//! category-specific parameters.
//!
//! Types know how to write and read their values. Writing and reading type *definitions* is the
//! job of the category descriptors in [`crate::category`].

use crate::category::{self, Category};
use crate::codec::{self, Overflow, TextEncoding};
use crate::embedding::{read_embedded, write_embedded, CacheKey, Embedding, ReadCaches, WriteCaches};
use crate::registry::TypeRegistry;
use crate::stream::ReaderOptions;
use crate::value::{Accessor, Entry, ReadList, ReadStruct, Value};
use crate::{CondensedError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::IndexSet;
use std::cell::RefCell;
use std::rc::Rc;

/// State a value write needs besides the output buffer.
pub struct WriteContext<'a> {
    pub(crate) registry: &'a TypeRegistry,
    pub(crate) caches: &'a mut WriteCaches,
}

impl<'a> WriteContext<'a> {
    pub fn new(registry: &'a TypeRegistry, caches: &'a mut WriteCaches) -> Self {
        WriteContext { registry, caches }
    }
}

/// State a value read needs besides the input buffer.
pub struct ReadContext<'a> {
    registry: &'a TypeRegistry,
    caches: &'a Rc<RefCell<ReadCaches>>,
    options: &'a ReaderOptions,
}

impl<'a> ReadContext<'a> {
    pub fn new(
        registry: &'a TypeRegistry,
        caches: &'a Rc<RefCell<ReadCaches>>,
        options: &'a ReaderOptions,
    ) -> Self {
        ReadContext {
            registry,
            caches,
            options,
        }
    }

    pub(crate) fn caches(&self) -> &Rc<RefCell<ReadCaches>> {
        self.caches
    }
}

/// A placeholder for a type whose id is known but which may not be registered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyTypeRef {
    id: usize,
    name: String,
}

impl LazyTypeRef {
    pub fn new(id: usize, name: impl Into<String>) -> Self {
        LazyTypeRef {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reference from a field or array to its value type.
///
/// Self-referential and mutually recursive types use [`TypeRef::Lazy`], which is looked up in
/// the registry at the time a value is written or read.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Resolved(Rc<CondensedType>),
    Lazy(LazyTypeRef),
}

impl TypeRef {
    pub fn lazy(id: usize, name: impl Into<String>) -> Self {
        TypeRef::Lazy(LazyTypeRef::new(id, name))
    }

    pub fn id(&self) -> usize {
        match self {
            TypeRef::Resolved(ty) => ty.id(),
            TypeRef::Lazy(lazy) => lazy.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeRef::Resolved(ty) => ty.name(),
            TypeRef::Lazy(lazy) => lazy.name(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, TypeRef::Lazy(_))
    }

    /// # Errors
    /// A lazy reference fails with `NoSuchType` until its type is registered.
    pub fn resolve<'a>(&'a self, registry: &'a TypeRegistry) -> Result<&'a CondensedType> {
        match self {
            TypeRef::Resolved(ty) => Ok(&**ty),
            TypeRef::Lazy(lazy) => registry.get(lazy.id()).map(|ty| &**ty),
        }
    }
}

impl From<Rc<CondensedType>> for TypeRef {
    fn from(ty: Rc<CondensedType>) -> Self {
        TypeRef::Resolved(ty)
    }
}

impl From<&Rc<CondensedType>> for TypeRef {
    fn from(ty: &Rc<CondensedType>) -> Self {
        TypeRef::Resolved(Rc::clone(ty))
    }
}

/// Zig-zag or plain varint, with values divided by `multiplier` before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarIntSpec {
    pub signed: bool,
    pub multiplier: i64,
}

impl VarIntSpec {
    pub fn signed() -> Self {
        VarIntSpec {
            signed: true,
            multiplier: 1,
        }
    }

    pub fn unsigned() -> Self {
        VarIntSpec {
            signed: false,
            multiplier: 1,
        }
    }

    /// Values are written as `value / multiplier` (truncating) and read back multiplied.
    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = multiplier;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.multiplier < 1 {
            return Err(CondensedError::Encode(format!(
                "varint multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    fn write(&self, writer: &mut BytesMut, value: i64) -> Result<()> {
        let reduced = value / self.multiplier;
        if self.signed {
            codec::write_signed_varint(writer, reduced);
        } else if reduced < 0 {
            return Err(CondensedError::Range {
                value,
                bytes: 8,
                signed: false,
            });
        } else {
            codec::write_unsigned_varint(writer, reduced as u64);
        }
        Ok(())
    }

    fn read(&self, reader: &mut Bytes) -> Result<i64> {
        let reduced = if self.signed {
            codec::read_signed_varint(reader)?
        } else {
            let raw = codec::read_unsigned_varint(reader)?;
            i64::try_from(raw).map_err(|_| {
                CondensedError::Decode(format!("unsigned varint {} exceeds the i64 range", raw))
            })?
        };
        reduced.checked_mul(self.multiplier).ok_or_else(|| {
            CondensedError::Decode(format!(
                "{} * {} overflows i64",
                reduced, self.multiplier
            ))
        })
    }
}

/// Fixed-width little-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntSpec {
    pub bytes: u8,
    pub signed: bool,
    pub overflow: Overflow,
}

impl IntSpec {
    pub fn new(bytes: u8, signed: bool, overflow: Overflow) -> Self {
        IntSpec {
            bytes,
            signed,
            overflow,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(1..=8).contains(&self.bytes) {
            return Err(CondensedError::Encode(format!(
                "integer width must be between 1 and 8 bytes, got {}",
                self.bytes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringSpec {
    pub encoding: TextEncoding,
}

impl StringSpec {
    pub fn new(encoding: TextEncoding) -> Self {
        StringSpec { encoding }
    }
}

/// Homogeneous sequence of one element type under one embedding.
#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub element: TypeRef,
    pub embedding: Embedding,
}

impl ArraySpec {
    pub fn new(element: impl Into<TypeRef>, embedding: Embedding) -> Self {
        ArraySpec {
            element: element.into(),
            embedding,
        }
    }
}

/// A struct field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub description: String,
    pub ty: TypeRef,
    pub embedding: Embedding,
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        ty: impl Into<TypeRef>,
        embedding: Embedding,
    ) -> Self {
        Field {
            name: name.into(),
            description: description.into(),
            ty: ty.into(),
            embedding,
        }
    }
}

/// Ordered list of uniquely named fields.
#[derive(Debug, Clone)]
pub struct StructSpec {
    fields: Vec<Field>,
    names: Rc<IndexSet<String>>,
}

impl StructSpec {
    /// # Errors
    /// Fails if two fields share a name.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut names = IndexSet::with_capacity(fields.len());
        for field in &fields {
            if !names.insert(field.name.clone()) {
                return Err(CondensedError::Encode(format!(
                    "duplicate struct field name: {}",
                    field.name
                )));
            }
        }
        Ok(StructSpec {
            fields,
            names: Rc::new(names),
        })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.names.get_index_of(name).map(|i| &self.fields[i])
    }
}

/// Category-specific parameters of a type.
#[derive(Debug, Clone)]
pub enum TypeKind {
    VarInt(VarIntSpec),
    Int(IntSpec),
    Boolean,
    Float,
    BFloat16,
    String(StringSpec),
    Array(ArraySpec),
    Struct(StructSpec),
}

impl TypeKind {
    pub fn category_id(&self) -> u8 {
        match self {
            TypeKind::VarInt(_) => category::VARINT,
            TypeKind::Int(_) => category::INT,
            TypeKind::Boolean => category::BOOLEAN,
            TypeKind::Float => category::FLOAT,
            TypeKind::BFloat16 => category::BFLOAT16,
            TypeKind::String(_) => category::STRING,
            TypeKind::Array(_) => category::ARRAY,
            TypeKind::Struct(_) => category::STRUCT,
        }
    }

    /// The descriptor of this kind's category.
    pub fn category(&self) -> &'static dyn Category {
        match self {
            TypeKind::VarInt(_) => &category::VarIntCategory,
            TypeKind::Int(_) => &category::IntCategory,
            TypeKind::Boolean => &category::BooleanCategory,
            TypeKind::Float => &category::FloatCategory,
            TypeKind::BFloat16 => &category::BFloat16Category,
            TypeKind::String(_) => &category::StringCategory,
            TypeKind::Array(_) => &category::ArrayCategory,
            TypeKind::Struct(_) => &category::StructCategory,
        }
    }

    /// Every type this kind refers to.
    pub fn references(&self) -> Vec<&TypeRef> {
        match self {
            TypeKind::Array(spec) => vec![&spec.element],
            TypeKind::Struct(spec) => spec.fields.iter().map(|f| &f.ty).collect(),
            _ => Vec::new(),
        }
    }
}

/// A type registered in one stream.
#[derive(Debug, Clone)]
pub struct CondensedType {
    id: usize,
    name: String,
    description: String,
    kind: TypeKind,
}

impl CondensedType {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: TypeKind,
    ) -> Self {
        CondensedType {
            id,
            name: name.into(),
            description: description.into(),
            kind,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn category(&self) -> &'static dyn Category {
        self.kind.category()
    }

    pub fn is_primitive(&self) -> bool {
        self.category().is_primitive()
    }

    /// Checks the kind's parameters.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            TypeKind::VarInt(spec) => spec.validate(),
            TypeKind::Int(spec) => spec.validate(),
            _ => Ok(()),
        }
    }

    fn mismatch(&self, value: &Value) -> CondensedError {
        CondensedError::TypeMismatch {
            expected: format!("{} ({})", self.name, self.category().name()),
            found: value.kind_name(),
        }
    }

    /// Writes one value of this type, inline.
    pub fn write_value(
        &self,
        cx: &mut WriteContext<'_>,
        value: &Value,
        writer: &mut BytesMut,
    ) -> Result<()> {
        match (&self.kind, value) {
            (TypeKind::VarInt(spec), Value::Int(v)) => spec.write(writer, *v),
            (TypeKind::Int(spec), Value::Int(v)) => {
                codec::write_int(writer, *v, spec.bytes, spec.signed, spec.overflow)
            }
            (TypeKind::Boolean, Value::Bool(b)) => {
                writer.put_u8(u8::from(*b));
                Ok(())
            }
            (TypeKind::Float, Value::Float(f)) => {
                codec::write_f32(writer, *f);
                Ok(())
            }
            (TypeKind::BFloat16, Value::Float(f)) => {
                codec::write_bfloat16(writer, *f);
                Ok(())
            }
            (TypeKind::String(spec), Value::Str(s)) => {
                codec::write_string(writer, s, spec.encoding);
                Ok(())
            }
            (TypeKind::Array(spec), Value::List(list)) => {
                let registry = cx.registry;
                let element = spec.element.resolve(registry)?;
                codec::write_len(writer, list.len());
                for item in list.iter() {
                    write_embedded(cx, element, spec.embedding, self.id, &item, writer)?;
                }
                Ok(())
            }
            (TypeKind::Struct(spec), Value::Struct(record)) => {
                let registry = cx.registry;
                for field in &spec.fields {
                    let ty = field.ty.resolve(registry)?;
                    let value = record.get(&field.name).unwrap_or(Value::Null);
                    write_embedded(cx, ty, field.embedding, self.id, &value, writer)?;
                }
                Ok(())
            }
            (_, value) => Err(self.mismatch(value)),
        }
    }

    /// Reads one value of this type.
    pub fn read_value(&self, cx: &ReadContext<'_>, reader: &mut Bytes) -> Result<Value> {
        match &self.kind {
            TypeKind::VarInt(spec) => Ok(Value::Int(spec.read(reader)?)),
            TypeKind::Int(spec) => Ok(Value::Int(codec::read_int(
                reader,
                spec.bytes,
                spec.signed,
            )?)),
            TypeKind::Boolean => match codec::read_u8(reader)? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(CondensedError::Decode(format!(
                    "expected boolean byte (0 or 1), got {}",
                    other
                ))),
            },
            TypeKind::Float => Ok(Value::Float(codec::read_f32(reader)?)),
            TypeKind::BFloat16 => Ok(Value::Float(codec::read_bfloat16(reader)?)),
            TypeKind::String(spec) => {
                let mut peek = reader.clone();
                let len = codec::read_len(&mut peek)?;
                if len > cx.options.max_string_len {
                    return Err(CondensedError::Decode(format!(
                        "string of {} bytes exceeds the limit of {}",
                        len, cx.options.max_string_len
                    )));
                }
                Ok(Value::from(codec::read_string(reader, spec.encoding)?))
            }
            TypeKind::Array(spec) => self.read_array(cx, spec, reader),
            TypeKind::Struct(spec) => self.read_struct(cx, spec, reader),
        }
    }

    fn read_array(&self, cx: &ReadContext<'_>, spec: &ArraySpec, reader: &mut Bytes) -> Result<Value> {
        let count = codec::read_len(reader)?;
        if count > cx.options.max_array_len {
            return Err(CondensedError::Decode(format!(
                "array of {} elements exceeds the limit of {}",
                count, cx.options.max_array_len
            )));
        }
        let element = spec.element.resolve(cx.registry)?;
        let mut entries = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            entries.push(read_embedded(cx, element, spec.embedding, self.id, reader)?);
        }
        if !spec.embedding.is_reference() {
            let values = entries.into_iter().filter_map(|entry| match entry {
                Entry::Resolved(value) => Some(value),
                Entry::Deferred(_) => None,
            });
            return Ok(Value::list(values));
        }
        let key = CacheKey::new(spec.embedding, element.id(), self.id);
        let caches = Rc::clone(cx.caches());
        let accessor: Accessor = Rc::new(move |_, slot| {
            caches.borrow().get(key, slot).unwrap_or(Value::Null)
        });
        Ok(Value::List(Rc::new(ReadList::lazy(entries, accessor))))
    }

    fn read_struct(
        &self,
        cx: &ReadContext<'_>,
        spec: &StructSpec,
        reader: &mut Bytes,
    ) -> Result<Value> {
        let mut entries = Vec::with_capacity(spec.fields.len());
        let mut keys = Vec::with_capacity(spec.fields.len());
        for field in &spec.fields {
            let ty = field.ty.resolve(cx.registry)?;
            entries.push(read_embedded(cx, ty, field.embedding, self.id, reader)?);
            keys.push(CacheKey::new(field.embedding, ty.id(), self.id));
        }
        let deferred = entries.iter().any(|e| matches!(e, Entry::Deferred(_)));
        let accessor: Option<Accessor> = if deferred {
            let caches = Rc::clone(cx.caches());
            Some(Rc::new(move |index, slot| {
                caches.borrow().get(keys[index], slot).unwrap_or(Value::Null)
            }))
        } else {
            None
        };
        Ok(Value::Struct(Rc::new(ReadStruct::from_parts(
            Rc::from(self.name.as_str()),
            Rc::clone(&spec.names),
            entries,
            accessor,
        ))))
    }
}
