//! Output and input streams.
//!
//! An [`OutputStream`] writes the header, then type definitions and instances as they are
//! produced. An [`InputStream`] rebuilds the same type table and caches message by message.
//! Each stream owns its own registry and caches; nothing is shared between streams.

use crate::category::{self, CATEGORY_SLOTS};
use crate::embedding::{KeyAdapter, ReadCaches, WriteCaches};
use crate::host::Condensed;
use crate::message::{self, Instance, Message, StartMessage};
use crate::registry::{TypeGraph, TypeRegistry, TypeSink};
use crate::types::{CondensedType, WriteContext};
use crate::value::Value;
use crate::{CondensedError, Result};
use bytes::{Buf, Bytes, BytesMut};
use log::debug;
use std::any::TypeId;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

/// Generator identification written into the stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub generator_name: String,
    pub generator_version: String,
    pub generator_configuration: String,
    /// Identifies the compression a collaborator wraps around the raw stream, if any.
    pub compression: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            generator_name: env!("CARGO_PKG_NAME").to_string(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            generator_configuration: String::new(),
            compression: String::new(),
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generator(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.generator_name = name.into();
        self.generator_version = version.into();
        self
    }

    pub fn configuration(mut self, configuration: impl Into<String>) -> Self {
        self.generator_configuration = configuration.into();
        self
    }

    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = compression.into();
        self
    }
}

/// Limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Longest accepted string, in bytes.
    pub max_string_len: usize,
    /// Largest accepted array element count.
    pub max_array_len: usize,
    /// Highest type id a definition may claim.
    pub max_type_id: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            max_string_len: 64 * 1024 * 1024,
            max_array_len: 16 * 1024 * 1024,
            max_type_id: 1 << 20,
        }
    }
}

impl ReaderOptions {
    pub fn max_string_len(mut self, len: usize) -> Self {
        self.max_string_len = len;
        self
    }

    pub fn max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    pub fn max_type_id(mut self, id: usize) -> Self {
        self.max_type_id = id;
        self
    }
}

/// Writes a stream to `W`.
///
/// Every message is assembled in a buffer and handed to the sink in one `write_all`. An
/// instance that fails to encode leaves no bytes behind and its cache appends are rolled
/// back, so the stream stays readable and the caller may go on. A failing sink aborts the
/// stream.
pub struct OutputStream<W: Write> {
    sink: W,
    registry: TypeRegistry,
    caches: WriteCaches,
    host_types: TypeGraph<TypeId>,
    buffer: BytesMut,
    instances: u64,
    aborted: bool,
}

impl<W: Write> OutputStream<W> {
    /// Writes the magic token and header to `sink`.
    pub fn new(mut sink: W, options: WriterOptions) -> Result<Self> {
        let mut buffer = BytesMut::new();
        message::write_magic(&mut buffer);
        StartMessage::new(&options).write(&mut buffer);
        sink.write_all(&buffer)?;
        debug!(
            "opened output stream ({} {})",
            options.generator_name, options.generator_version
        );
        buffer.clear();
        Ok(OutputStream {
            sink,
            registry: TypeRegistry::new(),
            caches: WriteCaches::new(),
            host_types: TypeGraph::new(),
            buffer,
            instances: 0,
            aborted: false,
        })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The sink, holding everything written so far.
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    fn check_open(&self) -> Result<()> {
        if self.aborted {
            return Err(CondensedError::Aborted);
        }
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.sink.write_all(bytes) {
            self.aborted = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Registers the type built by `factory` and writes its definition.
    ///
    /// The factory receives the id the type will get, so it can refer to itself.
    pub fn define_type<F>(&mut self, factory: F) -> Result<Rc<CondensedType>>
    where
        F: FnOnce(usize) -> Result<CondensedType>,
    {
        self.check_open()?;
        let id = self.reserve_type();
        match factory(id).and_then(|ty| self.complete_type(ty)) {
            Ok(ty) => Ok(ty),
            Err(e) => {
                self.release_type(id);
                Err(e)
            }
        }
    }

    /// Writes one instance of a type registered in this stream.
    ///
    /// # Errors
    /// - `ReservedTypeId` for default types, which cannot carry instances
    /// - `NoSuchType` for types not registered in this stream
    /// - any encoding error of the value; the stream is left as if the call never happened
    pub fn write_instance(&mut self, ty: &Rc<CondensedType>, value: &Value) -> Result<()> {
        self.check_open()?;
        match self.registry.get(ty.id()) {
            Ok(registered) if Rc::ptr_eq(registered, ty) => {}
            _ if ty.id() < CATEGORY_SLOTS => {
                return Err(CondensedError::ReservedTypeId { id: ty.id() })
            }
            _ => return Err(CondensedError::NoSuchType { id: ty.id() }),
        }
        let checkpoint = self.caches.checkpoint();
        self.buffer.clear();
        let mut cx = WriteContext::new(&self.registry, &mut self.caches);
        if let Err(e) = message::write_instance(&mut cx, ty, value, &mut self.buffer) {
            self.caches.rollback(checkpoint);
            self.buffer.clear();
            return Err(e);
        }
        let buffer = std::mem::take(&mut self.buffer);
        let written = self.emit(&buffer);
        self.buffer = buffer;
        self.buffer.clear();
        written?;
        self.caches.commit();
        self.instances += 1;
        Ok(())
    }

    /// The stream type of a host type, defining it (and the types it uses) on first use.
    pub fn type_of<T: Condensed>(&mut self) -> Result<Rc<CondensedType>> {
        self.check_open()?;
        let mut graph = std::mem::take(&mut self.host_types);
        let defined = T::define(self, &mut graph);
        self.host_types = graph;
        let id = defined?.id();
        Ok(Rc::clone(self.registry.get(id)?))
    }

    /// Writes a host record, defining its type on first use.
    pub fn write<T: Condensed>(&mut self, record: &T) -> Result<()> {
        let ty = self.type_of::<T>()?;
        self.write_instance(&ty, &record.to_value())
    }

    /// Uses `adapter` to find values of `ty` in the reference caches.
    pub fn set_key_adapter(&mut self, ty: &CondensedType, adapter: Rc<dyn KeyAdapter>) {
        self.caches.set_adapter(ty.id(), adapter);
    }

    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.sink.flush()?;
        Ok(())
    }

    /// Flushes and returns the sink.
    pub fn close(mut self) -> Result<W> {
        self.flush()?;
        debug!(
            "closed output stream: {} types, {} instances",
            self.registry.custom_types().count(),
            self.instances
        );
        Ok(self.sink)
    }
}

impl<W: Write> TypeSink for OutputStream<W> {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn reserve_type(&mut self) -> usize {
        self.registry.reserve()
    }

    /// Registers the type and writes its definition message.
    fn complete_type(&mut self, ty: CondensedType) -> Result<Rc<CondensedType>> {
        self.check_open()?;
        let mut definition = BytesMut::new();
        category::write_definition(&ty, &mut definition)?;
        let ty = self.registry.fill(ty)?;
        self.emit(&definition)?;
        Ok(ty)
    }

    fn release_type(&mut self, id: usize) {
        self.registry.release(id)
    }
}

/// Reads a stream.
///
/// The magic token and header are checked when the stream is opened. The first message
/// returned by [`read_next_message`](Self::read_next_message) is the header itself. Any error
/// aborts the stream; later reads fail with `Aborted`.
///
/// Decoded values stay usable after the stream moves on or is dropped: their deferred
/// entries hold on to the caches they resolve from.
pub struct InputStream {
    data: Bytes,
    header: StartMessage,
    registry: TypeRegistry,
    caches: Rc<RefCell<ReadCaches>>,
    options: ReaderOptions,
    started: bool,
    aborted: bool,
}

impl InputStream {
    /// Reads `source` to the end and opens the stream.
    ///
    /// The whole stream is held in memory for as long as the stream or any value decoded from
    /// it is alive. Very large recordings cost their full size in memory.
    pub fn open<R: Read>(mut source: R, options: ReaderOptions) -> Result<Self> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Self::with_options(Bytes::from(data), options)
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self> {
        Self::with_options(bytes.into(), ReaderOptions::default())
    }

    pub fn with_options(mut data: Bytes, options: ReaderOptions) -> Result<Self> {
        message::read_magic(&mut data)?;
        let header = StartMessage::read(&mut data)?;
        debug!(
            "opened input stream written by {} {}",
            header.generator_name, header.generator_version
        );
        Ok(InputStream {
            data,
            header,
            registry: TypeRegistry::new(),
            caches: Rc::new(RefCell::new(ReadCaches::new())),
            options,
            started: false,
            aborted: false,
        })
    }

    pub fn header(&self) -> &StartMessage {
        &self.header
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Reads the next message, or `None` at the end of the stream.
    pub fn read_next_message(&mut self) -> Result<Option<Message>> {
        if self.aborted {
            return Err(CondensedError::Aborted);
        }
        if !self.started {
            self.started = true;
            return Ok(Some(Message::Start(self.header.clone())));
        }
        if !self.data.has_remaining() {
            return Ok(None);
        }
        match message::read_message(&mut self.registry, &self.caches, &self.options, &mut self.data)
        {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                debug!("input stream aborted: {}", e);
                self.aborted = true;
                Err(e)
            }
        }
    }

    /// Reads up to and including the next instance, registering the definitions before it.
    pub fn read_next_instance(&mut self) -> Result<Option<Instance>> {
        loop {
            match self.read_next_message()? {
                None => return Ok(None),
                Some(Message::Instance(instance)) => return Ok(Some(instance)),
                Some(_) => continue,
            }
        }
    }

    /// Reads the next instance as a host record.
    pub fn read_as<T: Condensed>(&mut self) -> Result<Option<T>> {
        self.read_next_instance()?
            .map(|instance| T::from_value(&instance.value))
            .transpose()
    }

    /// Bytes left after the last message read.
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }
}

/// Iterates instances until the end of the stream. After an error has been yielded the
/// iterator ends.
impl Iterator for InputStream {
    type Item = Result<Instance>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next_instance() {
            Ok(Some(instance)) => Some(Ok(instance)),
            Ok(None) | Err(CondensedError::Aborted) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
