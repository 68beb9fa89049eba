//! Stream framing: the magic token, the start message, and the message dispatch on the leading
//! id.

use crate::category::{self, CATEGORY_SLOTS};
use crate::codec;
use crate::embedding::ReadCaches;
use crate::registry::TypeRegistry;
use crate::stream::{ReaderOptions, WriterOptions};
use crate::types::{CondensedType, ReadContext, WriteContext};
use crate::value::Value;
use crate::{CondensedError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cell::RefCell;
use std::rc::Rc;

/// Written raw (no length prefix) at the start of every stream.
pub const MAGIC: &[u8; 14] = b"CondensedData!";

/// Version of the header layout and message framing.
pub const FORMAT_VERSION: u64 = 1;

/// The header that follows the magic token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartMessage {
    pub format_version: u64,
    pub generator_name: String,
    pub generator_version: String,
    pub generator_configuration: String,
    pub compression: String,
}

impl StartMessage {
    pub fn new(options: &WriterOptions) -> Self {
        StartMessage {
            format_version: FORMAT_VERSION,
            generator_name: options.generator_name.clone(),
            generator_version: options.generator_version.clone(),
            generator_configuration: options.generator_configuration.clone(),
            compression: options.compression.clone(),
        }
    }

    pub fn write(&self, writer: &mut BytesMut) {
        codec::write_unsigned_varint(writer, self.format_version);
        codec::write_str(writer, &self.generator_name);
        codec::write_str(writer, &self.generator_version);
        codec::write_str(writer, &self.generator_configuration);
        codec::write_str(writer, &self.compression);
    }

    /// # Errors
    /// `UnsupportedVersion` unless the version is [`FORMAT_VERSION`].
    pub fn read(reader: &mut Bytes) -> Result<Self> {
        let format_version = codec::read_unsigned_varint(reader)?;
        if format_version != FORMAT_VERSION {
            return Err(CondensedError::UnsupportedVersion {
                found: format_version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(StartMessage {
            format_version,
            generator_name: codec::read_str(reader)?,
            generator_version: codec::read_str(reader)?,
            generator_configuration: codec::read_str(reader)?,
            compression: codec::read_str(reader)?,
        })
    }
}

pub fn write_magic(writer: &mut BytesMut) {
    writer.put_slice(MAGIC);
}

/// # Errors
/// `BadMagic` if the input does not start with [`MAGIC`].
pub fn read_magic(reader: &mut Bytes) -> Result<()> {
    let available = reader.remaining().min(MAGIC.len());
    let found = reader.copy_to_bytes(available);
    if found.as_ref() != MAGIC.as_slice() {
        return Err(CondensedError::BadMagic {
            expected: MAGIC.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// One decoded instance and its type.
#[derive(Debug, Clone)]
pub struct Instance {
    pub ty: Rc<CondensedType>,
    pub value: Value,
}

/// Everything a stream is made of, in the order a reader meets it.
#[derive(Debug, Clone)]
pub enum Message {
    Start(StartMessage),
    TypeDefinition(Rc<CondensedType>),
    Instance(Instance),
}

/// Writes an instance message: the type id, then the value inline.
pub(crate) fn write_instance(
    cx: &mut WriteContext<'_>,
    ty: &CondensedType,
    value: &Value,
    writer: &mut BytesMut,
) -> Result<()> {
    if ty.id() < CATEGORY_SLOTS {
        return Err(CondensedError::ReservedTypeId { id: ty.id() });
    }
    codec::write_len(writer, ty.id());
    ty.write_value(cx, value, writer)
}

/// Reads one message after the header, registering definitions as they arrive.
pub(crate) fn read_message(
    registry: &mut TypeRegistry,
    caches: &Rc<RefCell<ReadCaches>>,
    options: &ReaderOptions,
    reader: &mut Bytes,
) -> Result<Message> {
    let id = codec::read_len(reader)?;
    if id < CATEGORY_SLOTS {
        let ty = category::read_definition(id as u8, registry, reader)?;
        return Ok(Message::TypeDefinition(registry.insert_at(ty, options.max_type_id)?));
    }
    let ty = Rc::clone(registry.get(id)?);
    let value = ty.read_value(&ReadContext::new(registry, caches, options), reader)?;
    Ok(Message::Instance(Instance { ty, value }))
}
