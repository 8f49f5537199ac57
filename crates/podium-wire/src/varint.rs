//! LEB128 variable-length integers.
//!
//! Small type codes and counts dominate the control-plane traffic, so both
//! signed and unsigned integers are encoded in 7-bit groups: one byte for
//! anything below 128 (64 for signed). Floating-point values are scaled by a
//! fixed precision factor and truncated to a signed integer, trading
//! precision for bandwidth deterministically.

use bytes::{Buf, BufMut};

use crate::error::WireError;

/// Scale applied to `f64` values before integer encoding. Everything beyond
/// the 7th decimal digit is dropped on the wire.
pub const FLOAT_PRECISION: f64 = 10_000_000.0;

/// Longest accepted encoding; anything longer is rejected as malformed
/// rather than silently wrapped.
const MAX_VARINT_BYTES: usize = 10;

pub fn put_uvarint(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

pub fn get_uvarint(buf: &mut impl Buf) -> Result<u64, WireError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for _ in 0..MAX_VARINT_BYTES {
        if !buf.has_remaining() {
            return Err(WireError::Exhausted);
        }
        let byte = buf.get_u8();
        // the 10th byte may only carry the single remaining bit.
        if shift == 63 && byte > 1 {
            return Err(WireError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(WireError::VarintOverflow)
}

pub fn put_svarint(buf: &mut impl BufMut, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7; // arithmetic shift keeps the sign.
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

pub fn get_svarint(buf: &mut impl Buf) -> Result<i64, WireError> {
    let mut value: i64 = 0;
    let mut shift = 0u32;
    for _ in 0..MAX_VARINT_BYTES {
        if !buf.has_remaining() {
            return Err(WireError::Exhausted);
        }
        let byte = buf.get_u8();
        value |= i64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                value |= -1i64 << shift; // sign extension.
            }
            return Ok(value);
        }
    }
    Err(WireError::VarintOverflow)
}

pub fn put_f64(buf: &mut impl BufMut, value: f64) {
    put_svarint(buf, (value * FLOAT_PRECISION) as i64);
}

pub fn get_f64(buf: &mut impl Buf) -> Result<f64, WireError> {
    Ok(get_svarint(buf)? as f64 / FLOAT_PRECISION)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u_round_trip(v: u64) -> u64 {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, v);
        get_uvarint(&mut buf.as_slice()).unwrap()
    }

    fn s_round_trip(v: i64) -> i64 {
        let mut buf = Vec::new();
        put_svarint(&mut buf, v);
        get_svarint(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn unsigned_round_trip() {
        for v in [
            0u64,
            1,
            127,
            128,
            255,
            16_383,
            16_384,
            u32::MAX as u64,
            u64::MAX - 1,
            u64::MAX,
        ] {
            assert_eq!(u_round_trip(v), v);
        }
    }

    #[test]
    fn signed_round_trip() {
        for v in [
            0i64,
            1,
            -1,
            63,
            64,
            -64,
            -65,
            127,
            -128,
            i32::MIN as i64,
            i32::MAX as i64,
            i64::MIN,
            i64::MAX,
        ] {
            assert_eq!(s_round_trip(v), v);
        }
    }

    #[test]
    fn small_values_cost_one_byte() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, 127);
        assert_eq!(buf.len(), 1);

        buf.clear();
        put_svarint(&mut buf, 63);
        assert_eq!(buf.len(), 1);

        buf.clear();
        put_svarint(&mut buf, -64);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn truncated_input_is_exhausted_not_panic() {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, u64::MAX);
        for cut in 0..buf.len() {
            let mut partial = &buf[..cut];
            assert!(matches!(
                get_uvarint(&mut partial),
                Err(WireError::Exhausted)
            ));
        }
        let mut partial: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            get_svarint(&mut partial),
            Err(WireError::Exhausted)
        ));
    }

    #[test]
    fn over_long_encodings_are_rejected() {
        let bad = [0x80u8; 11];
        assert!(matches!(
            get_uvarint(&mut &bad[..]),
            Err(WireError::VarintOverflow)
        ));
        assert!(matches!(
            get_svarint(&mut &bad[..]),
            Err(WireError::VarintOverflow)
        ));
    }

    #[test]
    fn float_round_trip_within_precision() {
        for v in [0.0, 1.0, -1.0, 3.14159265, -123.4567891, 1e6, -1e6] {
            let mut buf = Vec::new();
            put_f64(&mut buf, v);
            let back = get_f64(&mut buf.as_slice()).unwrap();
            assert!((back - v).abs() < 1.0 / FLOAT_PRECISION, "{v} -> {back}");
        }
    }

    #[test]
    fn float_truncates_beyond_seventh_digit() {
        let mut buf = Vec::new();
        put_f64(&mut buf, 0.123456789);
        let back = get_f64(&mut buf.as_slice()).unwrap();
        assert_eq!(back, 0.1234567);
    }
}
