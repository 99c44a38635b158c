//! Lexicographic encoding of floats.
//!
//! Non-negative floats are mapped onto `u64` so that the natural integer
//! order matches how "simple" a float is: small non-negative integral values
//! come first, in numeric order, followed by every other float ordered by
//! exponent (1.0-ish exponents first) and then by a bit-reversed fractional
//! mantissa, so that `1.5` is simpler than `1.25`.

use half::f16;

const MAX_EXPONENT: u64 = 0x7FF;
const BIAS: u64 = 1023;
const MANTISSA_MASK: u64 = (1 << 52) - 1;
const SIMPLE_BITS: u32 = 56;

/// Width in bits of a float choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FloatWidth {
    Width16,
    Width32,
    Width64,
}

impl FloatWidth {
    pub fn bits(self) -> u32 {
        match self {
            FloatWidth::Width16 => 16,
            FloatWidth::Width32 => 32,
            FloatWidth::Width64 => 64,
        }
    }

    /// Round `value` to the nearest float representable at this width.
    pub fn narrow(self, value: f64) -> f64 {
        match self {
            FloatWidth::Width16 => f16::from_f64(value).to_f64(),
            FloatWidth::Width32 => value as f32 as f64,
            FloatWidth::Width64 => value,
        }
    }

    pub fn is_representable(self, value: f64) -> bool {
        value.is_nan() || self.narrow(value).to_bits() == value.to_bits()
    }
}

impl Default for FloatWidth {
    fn default() -> Self {
        FloatWidth::Width64
    }
}

fn encode_exponent(e: u64) -> u64 {
    if e == MAX_EXPONENT {
        MAX_EXPONENT
    } else if e >= BIAS {
        e - BIAS
    } else {
        2 * BIAS - e
    }
}

fn decode_exponent(k: u64) -> u64 {
    if k == MAX_EXPONENT {
        MAX_EXPONENT
    } else if k <= BIAS {
        k + BIAS
    } else {
        2 * BIAS - k
    }
}

fn reverse_bits(x: u64, n: u32) -> u64 {
    if n == 0 {
        return 0;
    }
    x.reverse_bits() >> (64 - n)
}

// Involution: applying it twice gives back the original mantissa.
fn update_mantissa(exponent: u64, mantissa: u64) -> u64 {
    let unbiased = exponent as i64 - BIAS as i64;
    if unbiased <= 0 {
        reverse_bits(mantissa, 52)
    } else if unbiased <= 51 {
        let fractional_bits = 52 - unbiased as u32;
        let fractional = mantissa & ((1 << fractional_bits) - 1);
        (mantissa ^ fractional) | reverse_bits(fractional, fractional_bits)
    } else {
        mantissa
    }
}

/// Is `f` a non-negative integer small enough to be encoded directly?
pub fn is_simple(f: f64) -> bool {
    if !f.is_finite() || f < 0.0 || f.trunc() != f || f.is_sign_negative() {
        return false;
    }
    let i = f as u64;
    i as f64 == f && (64 - i.leading_zeros()) <= SIMPLE_BITS
}

/// Encode a non-negative float. The sign bit of `f` is ignored.
pub fn float_to_lex(f: f64) -> u64 {
    let f = f.abs();
    if is_simple(f) {
        return f as u64;
    }
    let bits = f.to_bits() & !(1u64 << 63);
    let exponent = bits >> 52;
    let mantissa = update_mantissa(exponent, bits & MANTISSA_MASK);
    (1 << 63) | (encode_exponent(exponent) << 52) | mantissa
}

/// Inverse of [`float_to_lex`].
pub fn lex_to_float(i: u64) -> f64 {
    if i >> 63 != 0 {
        let exponent = decode_exponent((i >> 52) & MAX_EXPONENT);
        let mantissa = update_mantissa(exponent, i & MANTISSA_MASK);
        f64::from_bits((exponent << 52) | mantissa)
    } else {
        (i & ((1 << SIMPLE_BITS) - 1)) as f64
    }
}

/// Rank used when comparing two floats for simplicity. NaN is the most
/// complex value, then magnitude via [`float_to_lex`], then sign.
pub fn float_sort_key(f: f64) -> (u128, u128) {
    let negative = f.is_sign_negative() as u128;
    if f.is_nan() {
        (u64::MAX as u128 + 1, negative)
    } else {
        (float_to_lex(f) as u128, negative)
    }
}

/// `a <= b` where `-0.0 < 0.0`.
pub fn sign_aware_lte(a: f64, b: f64) -> bool {
    if a == 0.0 && b == 0.0 {
        a.is_sign_negative() || !b.is_sign_negative()
    } else {
        a <= b
    }
}
