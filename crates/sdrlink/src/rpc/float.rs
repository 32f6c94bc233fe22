// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Portable FLOAT64 wire encoding.
//!
//! A double travels as an INT32 exponent plus an INT64 mantissa with
//! `value = mantissa * 2^(exponent - MANT_BITS)`. Splitting through the
//! exponent keeps the encoding exact for every finite double regardless of
//! the platform float representation.

/// Mantissa bits of an IEEE-754 double.
pub const MANT_BITS: i32 = 53;

/// Split into a fraction in [0.5, 1) and a power-of-two exponent.
/// Zero and non-finite values pass through with a zero exponent.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let bits = value.to_bits();
    let exp_field = ((bits >> 52) & 0x7ff) as i32;
    if exp_field == 0 {
        // subnormal: scale into the normal range first
        let (frac, exp) = frexp(value * 2f64.powi(64));
        return (frac, exp - 64);
    }
    let exp = exp_field - 1022;
    let frac = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (frac, exp)
}

/// Scale by a power of two.
fn ldexp(value: f64, exp: i32) -> f64 {
    // split the scale to stay in range for extreme exponents
    if !(-1022..=1023).contains(&exp) {
        let half = exp / 2;
        return value * 2f64.powi(half) * 2f64.powi(exp - half);
    }
    value * 2f64.powi(exp)
}

/// Encode a double as (exponent, mantissa).
pub fn encode(value: f64) -> (i32, i64) {
    let (frac, exp) = frexp(value);
    let man = ldexp(frac, MANT_BITS) as i64;
    (exp, man)
}

/// Decode (exponent, mantissa) back to a double.
pub fn decode(exp: i32, man: i64) -> f64 {
    ldexp(man as f64, exp - MANT_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: f64) -> f64 {
        let (exp, man) = encode(value);
        decode(exp, man)
    }

    #[test]
    fn test_roundtrip_exact() {
        for value in [
            0.0,
            1.0,
            -1.0,
            0.5,
            3.14159,
            -2.75e9,
            1e-300,
            -1e300,
            f64::MIN_POSITIVE,
            123456789.123456789,
        ] {
            assert_eq!(roundtrip(value), value, "value {}", value);
        }
    }

    #[test]
    fn test_roundtrip_subnormal() {
        let tiny = f64::MIN_POSITIVE / 1024.0;
        assert_eq!(roundtrip(tiny), tiny);
    }

    #[test]
    fn test_roundtrip_random() {
        for _ in 0..1000 {
            let value = (fastrand::f64() - 0.5) * fastrand::i32(..) as f64;
            assert_eq!(roundtrip(value), value);
        }
    }

    #[test]
    fn test_encode_one() {
        // 1.0 = 0.5 * 2^1, mantissa = 0.5 * 2^53
        let (exp, man) = encode(1.0);
        assert_eq!(exp, 1);
        assert_eq!(man, 1i64 << 52);
    }
}
