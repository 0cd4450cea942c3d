//! Float32 register decoding.
//!
//! Every Emonio measurement is one IEEE-754 single spread over two holding
//! registers. The device sends the low-order register first, so catalog
//! entries normally set `word_swap`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 2 registers for a float32 value, got {0}")]
    RegisterCount(usize),
}

/// Decodes two registers into an `f32`.
///
/// With `word_swap` the register order is reversed before the words are joined;
/// bytes inside each register are never reordered. NaN and infinities are
/// returned as-is.
pub fn decode_f32(registers: &[u16], word_swap: bool) -> Result<f32, DecodeError> {
    let [first, second] = <[u16; 2]>::try_from(registers)
        .map_err(|_| DecodeError::RegisterCount(registers.len()))?;
    let (high, low) = if word_swap {
        (second, first)
    } else {
        (first, second)
    };
    let bits = (u32::from(high) << 16) | u32::from(low);
    Ok(f32::from_bits(bits))
}

/// Inverse of [`decode_f32`]: the register pair a device would send for `value`.
pub fn encode_f32(value: f32, word_swap: bool) -> [u16; 2] {
    let bits = value.to_bits();
    let high = (bits >> 16) as u16;
    let low = (bits & 0xFFFF) as u16;
    if word_swap {
        [low, high]
    } else {
        [high, low]
    }
}

/// Widens to `f64` and rounds to two decimals, ties to even.
pub fn round_hundredths(value: f32) -> f64 {
    let wide = f64::from(value);
    if !wide.is_finite() {
        return wide;
    }
    (wide * 100.0).round_ties_even() / 100.0
}
