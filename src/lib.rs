//! # condensed-encoder
//!
//! A compact, self-describing binary encoding for long streams of repetitive, richly-structured
//! records (profiling and tracing events are the motivating case).
//!
//! - The stream carries its own schema: every type is defined inline the first time it is used,
//!   so no external schema file is needed to read it back
//! - Integers are written as zig-zag varints or fixed-width little-endian values with an
//!   explicit overflow policy; floats as IEEE-754 binary32 or a 16-bit reduced float
//! - Struct fields and array elements can be deduplicated: a value is written once into a
//!   per-type cache and referenced by index afterwards
//! - Decoded structs and arrays are lazy, read-only views that resolve cached entries on access
//! - `#[derive(Condensed)]` maps plain Rust structs onto struct types
//!
//! ## Wire layout
//!
//! A stream starts with the magic token and a [`StartMessage`]. After that, each message begins
//! with an unsigned varint. Ids `0..16` are category ids and introduce a type definition; any
//! other id names a registered type and is followed by one instance of it.
//!
//! ## Embedding attributes
//!
//! - `#[condensed(embedding = "inline")]`: the value is written in full every time (the default)
//! - `#[condensed(embedding = "reference")]`: values are deduplicated per value type across the stream
//! - `#[condensed(embedding = "reference_per_type")]`: deduplicated per value type and declaring type
//! - `#[condensed(name = "...", description = "...")]`: override the field or type name and description
//! - `#[condensed(skip)]`: the field is not written and reads back as `Default::default()`
//!
//! `Option<T>` fields default to `reference`, since only referenced slots can hold a null.
//!
//! ## Feature Flags
//!
//! - `serde_json`: converts decoded values into `serde_json::Value` for dumping.

pub mod category;
pub mod codec;
pub mod embedding;
mod features;
pub mod host;
pub mod message;
pub mod registry;
pub mod stream;
pub mod types;
pub mod value;

use bytes::Bytes;
pub use condensed_encoder_derive::Condensed;

pub use category::{Category, CATEGORY_SLOTS};
pub use codec::{Overflow, TextEncoding};
pub use embedding::{CacheKey, Embedding, KeyAdapter, ReadCaches, StructuralKeys, WriteCaches};
pub use host::{Condensed, StructMapping};
pub use message::{Instance, Message, StartMessage, FORMAT_VERSION, MAGIC};
pub use registry::{TypeGraph, TypeRegistry, TypeSink};
pub use stream::{InputStream, OutputStream, ReaderOptions, WriterOptions};
pub use types::{
    ArraySpec, CondensedType, Field, IntSpec, LazyTypeRef, ReadContext, StringSpec, StructSpec,
    TypeKind, TypeRef, VarIntSpec, WriteContext,
};
pub use value::{Accessor, Entry, ReadList, ReadStruct, Value};

/// Errors that can occur while encoding or decoding a stream.
///
/// Protocol violations and data errors abort the stream they occur in; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum CondensedError {
    /// The underlying byte sink or source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The value could not be encoded (e.g., an invalid type parameter).
    #[error("Encode error: {0}")]
    Encode(String),
    /// The data could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
    /// The buffer did not contain enough data to complete the operation.
    #[error("Insufficient data in buffer")]
    InsufficientData,
    #[error("Bad magic token: expected {expected:?}, got {found:?}")]
    BadMagic { expected: Vec<u8>, found: Vec<u8> },
    #[error("Unsupported format version {found}, expected {expected}")]
    UnsupportedVersion { found: u64, expected: u64 },
    /// The id names no registered type, or only a reserved slot.
    #[error("No type registered with id {id}")]
    NoSuchType { id: usize },
    /// A structural category (array, struct) was used where a default type is required.
    #[error("Category {category} has no default type")]
    NoDefaultType { category: u8 },
    #[error("Unknown category id {0}")]
    UnknownCategory(u8),
    #[error("Type id {id} is already registered")]
    DuplicateType { id: usize },
    /// Ids below 16 introduce type definitions and cannot carry instances.
    #[error("Id {id} is reserved for category definitions")]
    ReservedTypeId { id: usize },
    #[error("Invalid embedding tag {0}")]
    InvalidEmbedding(u8),
    /// A fixed-width integer write under `Overflow::Error` got a value outside its range.
    /// Nothing was written for the value.
    #[error("Value {value} out of range for {bytes}-byte integer (signed: {signed})")]
    Range { value: i64, bytes: u8, signed: bool },
    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: &'static str },
    /// Nulls can only be written through reference-embedded fields and elements.
    #[error("Null value for inline-embedded type {ty}")]
    NullNotAllowed { ty: String },
    /// Decoded containers are read-only views.
    #[error("Read-only value: {0} is not supported")]
    ReadOnly(&'static str),
    /// An earlier error already aborted this stream.
    #[error("Stream aborted after an earlier error")]
    Aborted,
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, CondensedError>;

/// Convenience function to encode a sequence of records into a complete stream.
///
/// Types are defined on first use; the stream header uses [`WriterOptions::default`].
///
/// # Example
/// ```rust
/// use condensed_encoder::{decode, encode, Condensed};
///
/// #[derive(Condensed, PartialEq, Debug)]
/// struct GcEvent {
///     id: i32,
///     #[condensed(embedding = "reference")]
///     name: String,
/// }
///
/// let events = vec![
///     GcEvent { id: 1, name: "G1 Young".to_string() },
///     GcEvent { id: 2, name: "G1 Young".to_string() },
/// ];
/// let bytes = encode(&events).unwrap();
/// let decoded: Vec<GcEvent> = decode(bytes).unwrap();
/// assert_eq!(events, decoded);
/// ```
pub fn encode<'a, T, I>(records: I) -> Result<Bytes>
where
    T: Condensed + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut stream = OutputStream::new(Vec::new(), WriterOptions::default())?;
    for record in records {
        stream.write(record)?;
    }
    Ok(Bytes::from(stream.close()?))
}

/// Convenience function to decode every instance of a stream as `T`.
///
/// See [`encode`] for an example.
pub fn decode<T: Condensed>(bytes: impl Into<Bytes>) -> Result<Vec<T>> {
    let mut stream = InputStream::from_bytes(bytes)?;
    let mut records = Vec::new();
    while let Some(record) = stream.read_as::<T>()? {
        records.push(record);
    }
    Ok(records)
}
