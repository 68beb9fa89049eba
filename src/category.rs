//! Category descriptors.
//!
//! Ids `0..16` are reserved for categories. Each category has one descriptor that writes and
//! reads the definitions of its types and, for primitive categories, builds the canonical default
//! type that occupies the category's own id in every registry.
//!
//! | id | category | default type |
//! |----|----------|--------------|
//! | 0  | varint   | `varint` (signed, multiplier 1) |
//! | 1  | int      | `int32` (4 bytes, signed, error on overflow) |
//! | 2  | boolean  | `boolean` |
//! | 3  | float    | `float` |
//! | 4  | bfloat16 | `bfloat16` |
//! | 5  | string   | `string` (UTF-8) |
//! | 6  | array    | none |
//! | 7  | struct   | none |
//!
//! Ids 8 to 15 are unassigned.

use crate::codec::{self, Overflow, TextEncoding};
use crate::embedding::Embedding;
use crate::registry::TypeRegistry;
use crate::types::{
    ArraySpec, CondensedType, Field, IntSpec, StringSpec, StructSpec, TypeKind, TypeRef,
    VarIntSpec,
};
use crate::{CondensedError, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const VARINT: u8 = 0;
pub const INT: u8 = 1;
pub const BOOLEAN: u8 = 2;
pub const FLOAT: u8 = 3;
pub const BFLOAT16: u8 = 4;
pub const STRING: u8 = 5;
pub const ARRAY: u8 = 6;
pub const STRUCT: u8 = 7;

/// Number of ids reserved for categories. Registered types start at this id.
pub const CATEGORY_SLOTS: usize = 16;

/// A kind of type, with its own definition wire format.
pub trait Category: Sync {
    fn id(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Primitive categories are leaves: their types refer to no other types.
    fn is_primitive(&self) -> bool {
        true
    }

    /// The canonical default type, registered at the category's own id.
    ///
    /// # Errors
    /// Structural categories have no default and fail with `NoDefaultType`.
    fn default_type(&self) -> Result<CondensedType> {
        Err(CondensedError::NoDefaultType { category: self.id() })
    }

    /// Writes the category-specific part of a type definition.
    fn write_parameters(&self, kind: &TypeKind, writer: &mut BytesMut) -> Result<()>;

    /// Reads what [`write_parameters`](Self::write_parameters) wrote.
    fn read_parameters(&self, cx: &DefinitionContext<'_>, reader: &mut Bytes) -> Result<TypeKind>;
}

/// What a definition being read may refer to: the registry so far, and its own id and name.
pub struct DefinitionContext<'a> {
    registry: &'a TypeRegistry,
    id: usize,
    name: &'a str,
}

impl<'a> DefinitionContext<'a> {
    pub fn new(registry: &'a TypeRegistry, id: usize, name: &'a str) -> Self {
        DefinitionContext { registry, id, name }
    }

    /// Resolves a type id found in a definition.
    ///
    /// Ids not registered yet (the type itself, or types defined later in the stream) become
    /// lazy references. A category id must have a default type.
    pub fn type_ref(&self, id: usize) -> Result<TypeRef> {
        if id < CATEGORY_SLOTS {
            return self
                .registry
                .get(id)
                .map(TypeRef::from)
                .map_err(|_| CondensedError::NoDefaultType { category: id as u8 });
        }
        match self.registry.get(id) {
            Ok(ty) => Ok(TypeRef::from(ty)),
            Err(_) if id == self.id => Ok(TypeRef::lazy(id, self.name)),
            Err(_) => Ok(TypeRef::lazy(id, format!("#{}", id))),
        }
    }
}

fn unexpected_kind(category: &dyn Category, kind: &TypeKind) -> CondensedError {
    CondensedError::Encode(format!(
        "category {} cannot write parameters of a {} type",
        category.name(),
        kind.category().name()
    ))
}

pub struct VarIntCategory;

impl Category for VarIntCategory {
    fn id(&self) -> u8 {
        VARINT
    }

    fn name(&self) -> &'static str {
        "varint"
    }

    fn default_type(&self) -> Result<CondensedType> {
        Ok(CondensedType::new(
            VARINT as usize,
            "varint",
            "signed variable-length integer",
            TypeKind::VarInt(VarIntSpec::signed()),
        ))
    }

    fn write_parameters(&self, kind: &TypeKind, writer: &mut BytesMut) -> Result<()> {
        let TypeKind::VarInt(spec) = kind else {
            return Err(unexpected_kind(self, kind));
        };
        codec::write_flags(writer, &[spec.signed])?;
        codec::write_unsigned_varint(writer, spec.multiplier as u64);
        Ok(())
    }

    fn read_parameters(&self, _cx: &DefinitionContext<'_>, reader: &mut Bytes) -> Result<TypeKind> {
        let flags = codec::read_flags(reader)?;
        let multiplier = codec::read_unsigned_varint(reader)?;
        let multiplier = i64::try_from(multiplier).map_err(|_| {
            CondensedError::Decode(format!("varint multiplier {} too large", multiplier))
        })?;
        let spec = if flags[0] {
            VarIntSpec::signed()
        } else {
            VarIntSpec::unsigned()
        };
        Ok(TypeKind::VarInt(spec.with_multiplier(multiplier)))
    }
}

pub struct IntCategory;

impl Category for IntCategory {
    fn id(&self) -> u8 {
        INT
    }

    fn name(&self) -> &'static str {
        "int"
    }

    fn default_type(&self) -> Result<CondensedType> {
        Ok(CondensedType::new(
            INT as usize,
            "int32",
            "4-byte signed integer",
            TypeKind::Int(IntSpec::new(4, true, Overflow::Error)),
        ))
    }

    fn write_parameters(&self, kind: &TypeKind, writer: &mut BytesMut) -> Result<()> {
        let TypeKind::Int(spec) = kind else {
            return Err(unexpected_kind(self, kind));
        };
        writer.put_u8(spec.bytes);
        codec::write_flags(writer, &[spec.signed, spec.overflow == Overflow::Saturate])
    }

    fn read_parameters(&self, _cx: &DefinitionContext<'_>, reader: &mut Bytes) -> Result<TypeKind> {
        let bytes = codec::read_u8(reader)?;
        let flags = codec::read_flags(reader)?;
        let overflow = if flags[1] {
            Overflow::Saturate
        } else {
            Overflow::Error
        };
        Ok(TypeKind::Int(IntSpec::new(bytes, flags[0], overflow)))
    }
}

/// Categories whose types carry no parameters.
macro_rules! plain_category {
    ($ty:ident, $id:expr, $name:expr, $variant:ident, $default_name:expr, $description:expr) => {
        pub struct $ty;

        impl Category for $ty {
            fn id(&self) -> u8 {
                $id
            }

            fn name(&self) -> &'static str {
                $name
            }

            fn default_type(&self) -> Result<CondensedType> {
                Ok(CondensedType::new(
                    $id as usize,
                    $default_name,
                    $description,
                    TypeKind::$variant,
                ))
            }

            fn write_parameters(&self, kind: &TypeKind, _writer: &mut BytesMut) -> Result<()> {
                match kind {
                    TypeKind::$variant => Ok(()),
                    other => Err(unexpected_kind(self, other)),
                }
            }

            fn read_parameters(
                &self,
                _cx: &DefinitionContext<'_>,
                _reader: &mut Bytes,
            ) -> Result<TypeKind> {
                Ok(TypeKind::$variant)
            }
        }
    };
}

plain_category!(BooleanCategory, BOOLEAN, "boolean", Boolean, "boolean", "true or false");
plain_category!(FloatCategory, FLOAT, "float", Float, "float", "IEEE-754 binary32");
plain_category!(
    BFloat16Category,
    BFLOAT16,
    "bfloat16",
    BFloat16,
    "bfloat16",
    "16-bit float with the exponent range of binary32"
);

pub struct StringCategory;

impl Category for StringCategory {
    fn id(&self) -> u8 {
        STRING
    }

    fn name(&self) -> &'static str {
        "string"
    }

    fn default_type(&self) -> Result<CondensedType> {
        Ok(CondensedType::new(
            STRING as usize,
            "string",
            "UTF-8 string",
            TypeKind::String(StringSpec::default()),
        ))
    }

    fn write_parameters(&self, kind: &TypeKind, writer: &mut BytesMut) -> Result<()> {
        let TypeKind::String(spec) = kind else {
            return Err(unexpected_kind(self, kind));
        };
        codec::write_str(writer, spec.encoding.name());
        Ok(())
    }

    fn read_parameters(&self, _cx: &DefinitionContext<'_>, reader: &mut Bytes) -> Result<TypeKind> {
        let encoding = TextEncoding::from_name(&codec::read_str(reader)?)?;
        Ok(TypeKind::String(StringSpec::new(encoding)))
    }
}

pub struct ArrayCategory;

impl Category for ArrayCategory {
    fn id(&self) -> u8 {
        ARRAY
    }

    fn name(&self) -> &'static str {
        "array"
    }

    fn is_primitive(&self) -> bool {
        false
    }

    fn write_parameters(&self, kind: &TypeKind, writer: &mut BytesMut) -> Result<()> {
        let TypeKind::Array(spec) = kind else {
            return Err(unexpected_kind(self, kind));
        };
        codec::write_len(writer, spec.element.id());
        writer.put_u8(spec.embedding.to_byte());
        Ok(())
    }

    fn read_parameters(&self, cx: &DefinitionContext<'_>, reader: &mut Bytes) -> Result<TypeKind> {
        let element = cx.type_ref(codec::read_len(reader)?)?;
        let embedding = Embedding::from_byte(codec::read_u8(reader)?)?;
        Ok(TypeKind::Array(ArraySpec::new(element, embedding)))
    }
}

pub struct StructCategory;

impl Category for StructCategory {
    fn id(&self) -> u8 {
        STRUCT
    }

    fn name(&self) -> &'static str {
        "struct"
    }

    fn is_primitive(&self) -> bool {
        false
    }

    fn write_parameters(&self, kind: &TypeKind, writer: &mut BytesMut) -> Result<()> {
        let TypeKind::Struct(spec) = kind else {
            return Err(unexpected_kind(self, kind));
        };
        codec::write_len(writer, spec.fields().len());
        for field in spec.fields() {
            codec::write_str(writer, &field.name);
            codec::write_str(writer, &field.description);
            codec::write_len(writer, field.ty.id());
            writer.put_u8(field.embedding.to_byte());
        }
        Ok(())
    }

    fn read_parameters(&self, cx: &DefinitionContext<'_>, reader: &mut Bytes) -> Result<TypeKind> {
        let count = codec::read_len(reader)?;
        let mut fields = Vec::with_capacity(count.min(reader.len()));
        for _ in 0..count {
            let name = codec::read_str(reader)?;
            let description = codec::read_str(reader)?;
            let ty = cx.type_ref(codec::read_len(reader)?)?;
            let embedding = Embedding::from_byte(codec::read_u8(reader)?)?;
            fields.push(Field::new(name, description, ty, embedding));
        }
        Ok(TypeKind::Struct(StructSpec::new(fields)?))
    }
}

static CATEGORIES: [Option<&'static dyn Category>; CATEGORY_SLOTS] = [
    Some(&VarIntCategory),
    Some(&IntCategory),
    Some(&BooleanCategory),
    Some(&FloatCategory),
    Some(&BFloat16Category),
    Some(&StringCategory),
    Some(&ArrayCategory),
    Some(&StructCategory),
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
];

/// Looks up the descriptor for a category id.
pub fn category(id: u8) -> Result<&'static dyn Category> {
    CATEGORIES
        .get(id as usize)
        .copied()
        .flatten()
        .ok_or(CondensedError::UnknownCategory(id))
}

/// All assigned categories in id order.
pub fn categories() -> impl Iterator<Item = &'static dyn Category> {
    CATEGORIES.iter().flatten().copied()
}

/// Writes a full type definition message: category id, type id, name, description, parameters.
pub fn write_definition(ty: &CondensedType, writer: &mut BytesMut) -> Result<()> {
    let category = ty.category();
    codec::write_unsigned_varint(writer, u64::from(category.id()));
    codec::write_len(writer, ty.id());
    codec::write_str(writer, ty.name());
    codec::write_str(writer, ty.description());
    category.write_parameters(ty.kind(), writer)
}

/// Reads the rest of a definition message whose leading category id was already consumed.
pub fn read_definition(
    category_id: u8,
    registry: &TypeRegistry,
    reader: &mut Bytes,
) -> Result<CondensedType> {
    let category = category(category_id)?;
    let id = codec::read_len(reader)?;
    let name = codec::read_str(reader)?;
    let description = codec::read_str(reader)?;
    let kind = category.read_parameters(&DefinitionContext::new(registry, id, &name), reader)?;
    let ty = CondensedType::new(id, name, description, kind);
    ty.validate()?;
    Ok(ty)
}
