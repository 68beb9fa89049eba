//! Mapping host Rust types onto stream types.
//!
//! [`Condensed`] is implemented for the primitive host types, `String`, `Option`, `Box` and
//! `Vec`, and derived for structs with `#[derive(Condensed)]`. [`StructMapping`] maps a host
//! type by hand with one typed getter per field.

use crate::category::{BOOLEAN, FLOAT, STRING, VARINT};
use crate::embedding::Embedding;
use crate::registry::{TypeGraph, TypeSink};
use crate::types::{ArraySpec, CondensedType, Field, StructSpec, TypeKind, TypeRef};
use crate::value::{ReadStruct, Value};
use crate::{CondensedError, Result};
use std::any::TypeId;
use std::rc::Rc;

/// A host type with a stream representation.
pub trait Condensed: Sized + 'static {
    /// Name of the stream type, used for defined types and in errors.
    fn type_name() -> String;

    /// Defines the stream type (and every type it uses) if needed and returns it.
    ///
    /// Composite types go through `graph` keyed by their [`TypeId`], so recursive host types
    /// produce lazy references instead of recursing forever.
    fn define(sink: &mut dyn TypeSink, graph: &mut TypeGraph<TypeId>) -> Result<TypeRef>;

    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T: Condensed>(value: &Value) -> CondensedError {
    CondensedError::TypeMismatch {
        expected: T::type_name(),
        found: value.kind_name(),
    }
}

fn default_type(sink: &dyn TypeSink, category: u8) -> Result<TypeRef> {
    sink.registry().default_type(category).map(TypeRef::from)
}

impl Condensed for bool {
    fn type_name() -> String {
        "boolean".to_string()
    }

    fn define(sink: &mut dyn TypeSink, _graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
        default_type(sink, BOOLEAN)
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch::<Self>(value))
    }
}

macro_rules! impl_condensed_int {
    ($($t:ty),*) => {
        $(
            impl Condensed for $t {
                fn type_name() -> String {
                    stringify!($t).to_string()
                }

                fn define(sink: &mut dyn TypeSink, _graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
                    default_type(sink, VARINT)
                }

                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: &Value) -> Result<Self> {
                    let raw = value.as_int().ok_or_else(|| mismatch::<Self>(value))?;
                    <$t>::try_from(raw).map_err(|_| {
                        CondensedError::Decode(format!(
                            "{} out of range for {}",
                            raw,
                            stringify!($t)
                        ))
                    })
                }
            }
        )*
    };
}

impl_condensed_int!(i8, i16, i32, i64, u8, u16, u32);

impl Condensed for f32 {
    fn type_name() -> String {
        "float".to_string()
    }

    fn define(sink: &mut dyn TypeSink, _graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
        default_type(sink, FLOAT)
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_float().ok_or_else(|| mismatch::<Self>(value))
    }
}

impl Condensed for String {
    fn type_name() -> String {
        "string".to_string()
    }

    fn define(sink: &mut dyn TypeSink, _graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
        default_type(sink, STRING)
    }

    fn to_value(&self) -> Value {
        Value::from(self.as_str())
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch::<Self>(value))
    }
}

/// `None` is written as null, which only reference-embedded fields accept.
impl<T: Condensed> Condensed for Option<T> {
    fn type_name() -> String {
        T::type_name()
    }

    fn define(sink: &mut dyn TypeSink, graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
        T::define(sink, graph)
    }

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, T::to_value)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: Condensed> Condensed for Box<T> {
    fn type_name() -> String {
        T::type_name()
    }

    fn define(sink: &mut dyn TypeSink, graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
        T::define(sink, graph)
    }

    fn to_value(&self) -> Value {
        T::to_value(self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        T::from_value(value).map(Box::new)
    }
}

/// An inline array of the element type, named `"{element}[]"`.
impl<T: Condensed> Condensed for Vec<T> {
    fn type_name() -> String {
        format!("{}[]", T::type_name())
    }

    fn define(sink: &mut dyn TypeSink, graph: &mut TypeGraph<TypeId>) -> Result<TypeRef> {
        let name = Self::type_name();
        graph.define(sink, TypeId::of::<Self>(), &name, |sink, graph, id| {
            let element = T::define(sink, graph)?;
            Ok(CondensedType::new(
                id,
                name.as_str(),
                "",
                TypeKind::Array(ArraySpec::new(element, Embedding::Inline)),
            ))
        })
    }

    fn to_value(&self) -> Value {
        Value::list(self.iter().map(T::to_value))
    }

    fn from_value(value: &Value) -> Result<Self> {
        let list = value.as_list().ok_or_else(|| mismatch::<Self>(value))?;
        list.iter().map(|item| T::from_value(&item)).collect()
    }
}

/// Reads a field of a decoded struct for [`Condensed::from_value`]. Missing fields read as
/// null.
pub fn field_value(record: &ReadStruct, name: &str) -> Value {
    record.get(name).unwrap_or(Value::Null)
}

struct MappedField<T> {
    field: Field,
    getter: Box<dyn Fn(&T) -> Value>,
}

/// A hand-written mapping of host type `T` onto a struct type.
///
/// ```rust
/// use condensed_encoder::{Embedding, OutputStream, StructMapping, WriterOptions};
///
/// struct Thread {
///     id: i64,
///     name: String,
/// }
///
/// let mut stream = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
/// let varint = stream.registry().get(0).unwrap().clone();
/// let string = stream.registry().get(5).unwrap().clone();
/// let mapping = StructMapping::new("Thread", "a thread")
///     .field("id", "", varint, Embedding::Inline, |t: &Thread| t.id)
///     .field("name", "", string, Embedding::Reference, |t: &Thread| t.name.clone());
/// let ty = mapping.define(&mut stream).unwrap();
/// let main = Thread { id: 1, name: "main".to_string() };
/// stream.write_instance(&ty, &mapping.to_value(&main)).unwrap();
/// ```
pub struct StructMapping<T> {
    name: String,
    description: String,
    fields: Vec<MappedField<T>>,
}

impl<T> StructMapping<T> {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        StructMapping {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field read from the host record by `getter`.
    pub fn field<V, G>(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        ty: impl Into<TypeRef>,
        embedding: Embedding,
        getter: G,
    ) -> Self
    where
        V: Into<Value>,
        G: Fn(&T) -> V + 'static,
    {
        self.fields.push(MappedField {
            field: Field::new(name, description, ty, embedding),
            getter: Box::new(move |record| getter(record).into()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the struct type and returns it.
    pub fn define(&self, sink: &mut dyn TypeSink) -> Result<Rc<CondensedType>> {
        let id = sink.reserve_type();
        let built = StructSpec::new(self.fields.iter().map(|f| f.field.clone()).collect())
            .map(|spec| {
                CondensedType::new(
                    id,
                    self.name.as_str(),
                    self.description.as_str(),
                    TypeKind::Struct(spec),
                )
            })
            .and_then(|ty| sink.complete_type(ty));
        if built.is_err() {
            sink.release_type(id);
        }
        built
    }

    /// Extracts every field of `record`.
    pub fn to_value(&self, record: &T) -> Value {
        Value::record(
            &self.name,
            self.fields
                .iter()
                .map(|f| (f.field.name.as_str(), (f.getter)(record))),
        )
    }
}
