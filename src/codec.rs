//! Primitive wire codec.
//!
//! Everything above this module is built from these routines:
//!
//! - unsigned varints (little-endian base-128 groups, high bit = more groups follow)
//! - signed varints (zig-zag mapped before the unsigned encoding)
//! - fixed-width little-endian integers of 1..=8 bytes with an [`Overflow`] policy
//! - IEEE-754 binary32 floats and the reduced 16-bit `bfloat16` variant
//! - length-prefixed strings under a [`TextEncoding`]
//! - flag bytes packing up to eight booleans
//!
//! The codec has no knowledge of types; callers decide what to write and in which order.

use crate::{CondensedError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use half::bf16;
use std::borrow::Cow;

/// Maximum number of bytes a 64-bit varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

// --- varint ---

/// Writes `value` as an unsigned varint.
pub fn write_unsigned_varint(writer: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        writer.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    writer.put_u8(value as u8);
}

/// Reads an unsigned varint.
///
/// # Errors
/// Returns `InsufficientData` if the buffer ends inside the varint and
/// `Decode` if the groups do not fit into 64 bits.
pub fn read_unsigned_varint(reader: &mut Bytes) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if reader.remaining() == 0 {
            return Err(CondensedError::InsufficientData);
        }
        let byte = reader.get_u8();
        let group = u64::from(byte & 0x7F);
        if shift == 63 && group > 1 {
            return Err(CondensedError::Decode(
                "varint overflows 64 bits".to_string(),
            ));
        }
        result |= group << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(CondensedError::Decode(
                "varint longer than 10 bytes".to_string(),
            ));
        }
    }
}

/// Writes a 32-bit unsigned varint. The wire format is shared with the 64-bit variant.
pub fn write_unsigned_varint32(writer: &mut BytesMut, value: u32) {
    write_unsigned_varint(writer, u64::from(value));
}

/// Reads an unsigned varint that must fit into 32 bits.
pub fn read_unsigned_varint32(reader: &mut Bytes) -> Result<u32> {
    let value = read_unsigned_varint(reader)?;
    u32::try_from(value)
        .map_err(|_| CondensedError::Decode(format!("varint {} does not fit into u32", value)))
}

/// Maps a signed integer onto an unsigned one so that small magnitudes stay small.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// 32-bit zig-zag mapping.
#[inline]
pub fn zigzag_encode32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode32`].
#[inline]
pub fn zigzag_decode32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Writes `value` as a zig-zag encoded varint.
pub fn write_signed_varint(writer: &mut BytesMut, value: i64) {
    write_unsigned_varint(writer, zigzag_encode(value));
}

/// Reads a zig-zag encoded varint.
pub fn read_signed_varint(reader: &mut Bytes) -> Result<i64> {
    Ok(zigzag_decode(read_unsigned_varint(reader)?))
}

/// Writes a 32-bit signed varint.
pub fn write_signed_varint32(writer: &mut BytesMut, value: i32) {
    write_unsigned_varint(writer, u64::from(zigzag_encode32(value)));
}

/// Reads a zig-zag encoded varint that must fit into 32 bits.
pub fn read_signed_varint32(reader: &mut Bytes) -> Result<i32> {
    Ok(zigzag_decode32(read_unsigned_varint32(reader)?))
}

/// Writes a length or count. Lengths are plain unsigned varints.
#[inline]
pub fn write_len(writer: &mut BytesMut, len: usize) {
    write_unsigned_varint(writer, len as u64);
}

/// Reads a length or count written by [`write_len`].
#[inline]
pub fn read_len(reader: &mut Bytes) -> Result<usize> {
    let len = read_unsigned_varint(reader)?;
    usize::try_from(len).map_err(|_| CondensedError::Decode(format!("length {} too large", len)))
}

// --- fixed-width integers ---

/// What a fixed-width integer write does with a value outside its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Overflow {
    /// Fail the write with [`CondensedError::Range`] before anything is written.
    #[default]
    Error,
    /// Clamp the value to the nearest representable bound.
    Saturate,
}

fn check_width(bytes: u8) -> Result<()> {
    if (1..=8).contains(&bytes) {
        Ok(())
    } else {
        Err(CondensedError::Encode(format!(
            "integer width must be between 1 and 8 bytes, got {}",
            bytes
        )))
    }
}

/// Returns the inclusive range representable with `bytes` bytes.
///
/// Signed: `[-2^(8·bytes-1), 2^(8·bytes-1)-1]`. Unsigned: `[0, 2^(8·bytes)-1]`,
/// capped at `i64::MAX` for 8-byte unsigned integers since values travel as `i64`.
pub fn int_bounds(bytes: u8, signed: bool) -> (i64, i64) {
    let bits = 8 * u32::from(bytes.clamp(1, 8));
    match (signed, bits) {
        (true, 64) => (i64::MIN, i64::MAX),
        (true, _) => (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1),
        (false, 64) => (0, i64::MAX),
        (false, _) => (0, (1i64 << bits) - 1),
    }
}

/// Writes `value` little-endian in `bytes` bytes.
///
/// # Errors
/// With [`Overflow::Error`], a value outside [`int_bounds`] fails with
/// [`CondensedError::Range`] and nothing is written.
pub fn write_int(
    writer: &mut BytesMut,
    value: i64,
    bytes: u8,
    signed: bool,
    overflow: Overflow,
) -> Result<()> {
    check_width(bytes)?;
    let (min, max) = int_bounds(bytes, signed);
    let value = if value < min || value > max {
        match overflow {
            Overflow::Error => {
                return Err(CondensedError::Range {
                    value,
                    bytes,
                    signed,
                })
            }
            Overflow::Saturate => value.clamp(min, max),
        }
    } else {
        value
    };
    writer.put_int_le(value, bytes as usize);
    Ok(())
}

/// Reads a little-endian integer of `bytes` bytes, sign-extending when `signed`.
pub fn read_int(reader: &mut Bytes, bytes: u8, signed: bool) -> Result<i64> {
    check_width(bytes)?;
    if reader.remaining() < bytes as usize {
        return Err(CondensedError::InsufficientData);
    }
    if signed {
        return Ok(reader.get_int_le(bytes as usize));
    }
    let raw = reader.get_uint_le(bytes as usize);
    i64::try_from(raw).map_err(|_| {
        CondensedError::Decode(format!("unsigned value {} exceeds the i64 range", raw))
    })
}

/// Writes a fraction in `[0, 1]` scaled by `2^(8·bytes)` as a saturating unsigned integer.
pub fn write_percentage(writer: &mut BytesMut, value: f64, bytes: u8) -> Result<()> {
    check_width(bytes)?;
    let scaled = value * 2f64.powi(8 * i32::from(bytes));
    write_int(writer, scaled as i64, bytes, false, Overflow::Saturate)
}

/// Reads a fraction written by [`write_percentage`].
pub fn read_percentage(reader: &mut Bytes, bytes: u8) -> Result<f64> {
    let raw = read_int(reader, bytes, false)?;
    Ok(raw as f64 / 2f64.powi(8 * i32::from(bytes)))
}

// --- floats ---

/// Writes the raw IEEE-754 bit pattern of `value`, 4 bytes little-endian.
pub fn write_f32(writer: &mut BytesMut, value: f32) {
    writer.put_f32_le(value);
}

pub fn read_f32(reader: &mut Bytes) -> Result<f32> {
    if reader.remaining() < 4 {
        return Err(CondensedError::InsufficientData);
    }
    Ok(reader.get_f32_le())
}

/// Converts to the 16-bit reduced float: float32's sign and exponent with the
/// mantissa rounded to nearest, ties to even.
#[inline]
pub fn f32_to_bfloat16_bits(value: f32) -> u16 {
    bf16::from_f32(value).to_bits()
}

/// Widens a reduced float back to `f32`. Exact.
#[inline]
pub fn bfloat16_bits_to_f32(bits: u16) -> f32 {
    bf16::from_bits(bits).to_f32()
}

/// Writes `value` as a 2-byte reduced float.
pub fn write_bfloat16(writer: &mut BytesMut, value: f32) {
    writer.put_u16_le(f32_to_bfloat16_bits(value));
}

pub fn read_bfloat16(reader: &mut Bytes) -> Result<f32> {
    if reader.remaining() < 2 {
        return Err(CondensedError::InsufficientData);
    }
    Ok(bfloat16_bits_to_f32(reader.get_u16_le()))
}

// --- strings ---

/// Text encodings a string type can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl TextEncoding {
    /// Name written into string type definitions.
    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Ascii => "US-ASCII",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(TextEncoding::Utf8),
            "ISO-8859-1" | "LATIN1" => Ok(TextEncoding::Latin1),
            "US-ASCII" | "ASCII" => Ok(TextEncoding::Ascii),
            _ => Err(CondensedError::Decode(format!(
                "unsupported text encoding: {}",
                name
            ))),
        }
    }

    /// Characters the encoding cannot represent become `?`.
    fn encode<'a>(&self, value: &'a str) -> Cow<'a, [u8]> {
        match self {
            TextEncoding::Utf8 => Cow::Borrowed(value.as_bytes()),
            TextEncoding::Ascii if value.is_ascii() => Cow::Borrowed(value.as_bytes()),
            TextEncoding::Ascii => {
                Cow::Owned(value.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }).collect())
            }
            TextEncoding::Latin1 => Cow::Owned(
                value
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<String> {
        match self {
            TextEncoding::Utf8 => {
                String::from_utf8(bytes).map_err(|e| CondensedError::Decode(e.to_string()))
            }
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            TextEncoding::Ascii => Ok(bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { char::REPLACEMENT_CHARACTER })
                .collect()),
        }
    }
}

/// Writes a varint byte length followed by the encoded bytes. The empty string is a single `0`.
pub fn write_string(writer: &mut BytesMut, value: &str, encoding: TextEncoding) {
    let bytes = encoding.encode(value);
    write_len(writer, bytes.len());
    writer.put_slice(&bytes);
}

/// Reads a string written by [`write_string`].
pub fn read_string(reader: &mut Bytes, encoding: TextEncoding) -> Result<String> {
    let len = read_len(reader)?;
    if len == 0 {
        return Ok(String::new());
    }
    if reader.remaining() < len {
        return Err(CondensedError::InsufficientData);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    encoding.decode(bytes)
}

/// UTF-8 shorthand used for names and descriptions in type definitions.
#[inline]
pub fn write_str(writer: &mut BytesMut, value: &str) {
    write_string(writer, value, TextEncoding::Utf8);
}

#[inline]
pub fn read_str(reader: &mut Bytes) -> Result<String> {
    read_string(reader, TextEncoding::Utf8)
}

// --- flags ---

/// Packs up to eight booleans into one byte, flag `i` in bit `i` counting from the LSB.
pub fn write_flags(writer: &mut BytesMut, flags: &[bool]) -> Result<()> {
    if flags.len() > 8 {
        return Err(CondensedError::Encode(format!(
            "a flag byte holds at most 8 flags, got {}",
            flags.len()
        )));
    }
    let byte = flags
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &set)| if set { acc | (1 << i) } else { acc });
    writer.put_u8(byte);
    Ok(())
}

/// Unpacks a flag byte written by [`write_flags`].
pub fn read_flags(reader: &mut Bytes) -> Result<[bool; 8]> {
    if reader.remaining() == 0 {
        return Err(CondensedError::InsufficientData);
    }
    let byte = reader.get_u8();
    let mut flags = [false; 8];
    for (i, flag) in flags.iter_mut().enumerate() {
        *flag = byte & (1 << i) != 0;
    }
    Ok(flags)
}

/// Reads a single raw byte.
pub fn read_u8(reader: &mut Bytes) -> Result<u8> {
    if reader.remaining() == 0 {
        return Err(CondensedError::InsufficientData);
    }
    Ok(reader.get_u8())
}
