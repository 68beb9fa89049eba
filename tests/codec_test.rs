use bytes::{Bytes, BytesMut};
use condensed_encoder::codec::*;
use condensed_encoder::CondensedError;
use proptest::prelude::*;

fn unsigned_round_trip(value: u64) -> u64 {
    let mut writer = BytesMut::new();
    write_unsigned_varint(&mut writer, value);
    let mut reader = writer.freeze();
    let decoded = read_unsigned_varint(&mut reader).unwrap();
    assert!(reader.is_empty());
    decoded
}

fn signed_round_trip(value: i64) -> i64 {
    let mut writer = BytesMut::new();
    write_signed_varint(&mut writer, value);
    let mut reader = writer.freeze();
    read_signed_varint(&mut reader).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 1_000, ..ProptestConfig::default() })]

    #[test]
    fn unsigned_varint_round_trip(v in proptest::num::u64::ANY) {
        prop_assert_eq!(unsigned_round_trip(v), v);
    }

    #[test]
    fn signed_varint_round_trip(v in proptest::num::i64::ANY) {
        prop_assert_eq!(signed_round_trip(v), v);
    }

    #[test]
    fn varint32_round_trip(u in proptest::num::u32::ANY, i in proptest::num::i32::ANY) {
        let mut writer = BytesMut::new();
        write_unsigned_varint32(&mut writer, u);
        write_signed_varint32(&mut writer, i);
        let mut reader = writer.freeze();
        prop_assert_eq!(read_unsigned_varint32(&mut reader).unwrap(), u);
        prop_assert_eq!(read_signed_varint32(&mut reader).unwrap(), i);
    }

    #[test]
    fn zigzag_is_a_bijection(v in proptest::num::i64::ANY, w in proptest::num::i32::ANY) {
        prop_assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        prop_assert_eq!(zigzag_decode32(zigzag_encode32(w)), w);
    }

    #[test]
    fn fixed_width_saturates(v in proptest::num::i64::ANY, bytes in 1u8..=8, signed in proptest::bool::ANY) {
        let (min, max) = int_bounds(bytes, signed);
        let mut writer = BytesMut::new();
        write_int(&mut writer, v, bytes, signed, Overflow::Saturate).unwrap();
        prop_assert_eq!(writer.len(), bytes as usize);
        let mut reader = writer.freeze();
        prop_assert_eq!(read_int(&mut reader, bytes, signed).unwrap(), v.clamp(min, max));
    }

    #[test]
    fn bfloat16_keeps_the_exponent_range(v in proptest::num::f32::NORMAL) {
        let widened = bfloat16_bits_to_f32(f32_to_bfloat16_bits(v));
        prop_assert!(widened.is_finite() || v.abs() > 3.0e38);
        // 8 bits of mantissa: relative error at most 2^-8.
        if widened.is_finite() {
            prop_assert!(((widened - v) / v).abs() <= 1.0 / 256.0);
        }
    }

    #[test]
    fn utf8_strings_round_trip(s in ".*") {
        let mut writer = BytesMut::new();
        write_string(&mut writer, &s, TextEncoding::Utf8);
        let mut reader = writer.freeze();
        prop_assert_eq!(read_string(&mut reader, TextEncoding::Utf8).unwrap(), s);
    }
}

#[test]
fn varint_edge_values() {
    for v in [0i64, -1, 1, i64::MIN, i64::MAX, i32::MIN as i64, i32::MAX as i64] {
        assert_eq!(signed_round_trip(v), v);
    }
    for v in [0u64, 1, 127, 128, 16_383, 16_384, u64::MAX] {
        assert_eq!(unsigned_round_trip(v), v);
    }
}

#[test]
fn varint_byte_layout() {
    let mut writer = BytesMut::new();
    write_unsigned_varint(&mut writer, 300);
    assert_eq!(&writer[..], &[0xAC, 0x02]);

    let mut writer = BytesMut::new();
    write_unsigned_varint(&mut writer, u64::MAX);
    assert_eq!(writer.len(), MAX_VARINT_LEN);

    // zig-zag: -1 -> 1, 1 -> 2
    let mut writer = BytesMut::new();
    write_signed_varint(&mut writer, -1);
    write_signed_varint(&mut writer, 1);
    assert_eq!(&writer[..], &[0x01, 0x02]);
}

#[test]
fn truncated_varint_is_insufficient_data() {
    let mut reader = Bytes::from_static(&[0x80, 0x80]);
    assert!(matches!(
        read_unsigned_varint(&mut reader),
        Err(CondensedError::InsufficientData)
    ));
}

#[test]
fn overlong_varint_is_rejected() {
    let mut reader = Bytes::from_static(&[0xFF; 11]);
    assert!(matches!(
        read_unsigned_varint(&mut reader),
        Err(CondensedError::Decode(_))
    ));
}

#[test]
fn unsigned_varint32_rejects_wide_values() {
    let mut writer = BytesMut::new();
    write_unsigned_varint(&mut writer, u64::from(u32::MAX) + 1);
    let mut reader = writer.freeze();
    assert!(read_unsigned_varint32(&mut reader).is_err());
}

#[test]
fn fixed_width_bounds() {
    assert_eq!(int_bounds(1, true), (-128, 127));
    assert_eq!(int_bounds(1, false), (0, 255));
    assert_eq!(int_bounds(2, true), (-32_768, 32_767));
    assert_eq!(int_bounds(4, false), (0, u32::MAX as i64));
    assert_eq!(int_bounds(8, true), (i64::MIN, i64::MAX));
    assert_eq!(int_bounds(8, false), (0, i64::MAX));
}

#[test]
fn fixed_width_error_writes_nothing() {
    let mut writer = BytesMut::new();
    write_int(&mut writer, 1, 2, true, Overflow::Error).unwrap();
    let before = writer.len();

    let result = write_int(&mut writer, 200, 1, true, Overflow::Error);
    assert!(matches!(
        result,
        Err(CondensedError::Range {
            value: 200,
            bytes: 1,
            signed: true
        })
    ));
    assert_eq!(writer.len(), before);

    assert!(write_int(&mut writer, -1, 4, false, Overflow::Error).is_err());
    assert_eq!(writer.len(), before);
}

#[test]
fn fixed_width_saturate_clamps_both_ends() {
    let mut writer = BytesMut::new();
    write_int(&mut writer, 1_000, 1, true, Overflow::Saturate).unwrap();
    write_int(&mut writer, -1_000, 1, true, Overflow::Saturate).unwrap();
    write_int(&mut writer, -5, 2, false, Overflow::Saturate).unwrap();
    write_int(&mut writer, 70_000, 2, false, Overflow::Saturate).unwrap();
    let mut reader = writer.freeze();
    assert_eq!(read_int(&mut reader, 1, true).unwrap(), 127);
    assert_eq!(read_int(&mut reader, 1, true).unwrap(), -128);
    assert_eq!(read_int(&mut reader, 2, false).unwrap(), 0);
    assert_eq!(read_int(&mut reader, 2, false).unwrap(), 65_535);
}

#[test]
fn fixed_width_is_little_endian() {
    let mut writer = BytesMut::new();
    write_int(&mut writer, 0x0102_0304, 4, true, Overflow::Error).unwrap();
    assert_eq!(&writer[..], &[0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn invalid_width_is_rejected() {
    let mut writer = BytesMut::new();
    assert!(write_int(&mut writer, 0, 0, true, Overflow::Error).is_err());
    assert!(write_int(&mut writer, 0, 9, true, Overflow::Saturate).is_err());
    assert!(writer.is_empty());
}

#[test]
fn percentage_scales_and_saturates() {
    let mut writer = BytesMut::new();
    write_percentage(&mut writer, 0.5, 1).unwrap();
    write_percentage(&mut writer, 1.0, 1).unwrap();
    write_percentage(&mut writer, -0.25, 2).unwrap();
    assert_eq!(&writer[..3], &[128, 255, 0]);
    let mut reader = writer.freeze();
    assert_eq!(read_percentage(&mut reader, 1).unwrap(), 0.5);
    assert_eq!(read_percentage(&mut reader, 1).unwrap(), 255.0 / 256.0);
    assert_eq!(read_percentage(&mut reader, 2).unwrap(), 0.0);
}

#[test]
fn float32_is_raw_bits() {
    let mut writer = BytesMut::new();
    write_f32(&mut writer, 1.0);
    assert_eq!(&writer[..], &1.0f32.to_le_bytes());
    write_f32(&mut writer, f32::NAN);
    let mut reader = writer.freeze();
    assert_eq!(read_f32(&mut reader).unwrap(), 1.0);
    assert!(read_f32(&mut reader).unwrap().is_nan());
}

#[test]
fn bfloat16_rounds_to_nearest_even() {
    // Exactly representable values survive unchanged.
    for v in [0.0f32, 1.0, -2.0, 0.5, 1.5, f32::from_bits(0x7F00_0000)] {
        let bits = f32_to_bfloat16_bits(v);
        assert_eq!(bits, (v.to_bits() >> 16) as u16, "{}", v);
    }
    // 1 + 2^-8 sits halfway between 1 and 1 + 2^-7: ties go to the even mantissa (1.0).
    let halfway = f32::from_bits(0x3F80_8000);
    assert_eq!(bfloat16_bits_to_f32(f32_to_bfloat16_bits(halfway)), 1.0);
    // Slightly above halfway rounds up.
    let above = f32::from_bits(0x3F80_8001);
    assert_eq!(f32_to_bfloat16_bits(above), 0x3F81);

    let mut writer = BytesMut::new();
    write_bfloat16(&mut writer, 1.5);
    assert_eq!(writer.len(), 2);
    let mut reader = writer.freeze();
    assert_eq!(read_bfloat16(&mut reader).unwrap(), 1.5);
}

#[test]
fn empty_string_is_a_single_zero() {
    let mut writer = BytesMut::new();
    write_str(&mut writer, "");
    assert_eq!(&writer[..], &[0]);
    let mut reader = writer.freeze();
    assert_eq!(read_str(&mut reader).unwrap(), "");
}

#[test]
fn string_length_is_in_bytes() {
    let mut writer = BytesMut::new();
    write_str(&mut writer, "né");
    assert_eq!(writer[0], 3);
}

#[test]
fn narrow_encodings_replace_unmappable_characters() {
    let mut writer = BytesMut::new();
    write_string(&mut writer, "café €", TextEncoding::Latin1);
    write_string(&mut writer, "café", TextEncoding::Ascii);
    let mut reader = writer.freeze();
    assert_eq!(read_string(&mut reader, TextEncoding::Latin1).unwrap(), "café ?");
    assert_eq!(read_string(&mut reader, TextEncoding::Ascii).unwrap(), "caf?");
}

#[test]
fn encoding_names() {
    for encoding in [TextEncoding::Utf8, TextEncoding::Latin1, TextEncoding::Ascii] {
        assert_eq!(TextEncoding::from_name(encoding.name()).unwrap(), encoding);
    }
    assert!(TextEncoding::from_name("EBCDIC").is_err());
}

#[test]
fn truncated_string_is_insufficient_data() {
    let mut reader = Bytes::from_static(&[5, b'a', b'b']);
    assert!(matches!(
        read_str(&mut reader),
        Err(CondensedError::InsufficientData)
    ));
}

#[test]
fn flags_pack_from_the_lowest_bit() {
    let mut writer = BytesMut::new();
    write_flags(&mut writer, &[true, false, true]).unwrap();
    assert_eq!(&writer[..], &[0b101]);
    let mut reader = writer.freeze();
    let flags = read_flags(&mut reader).unwrap();
    assert_eq!(flags, [true, false, true, false, false, false, false, false]);

    let mut writer = BytesMut::new();
    assert!(write_flags(&mut writer, &[false; 9]).is_err());
}
