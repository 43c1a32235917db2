//! Sub-byte packing into 32-bit storage words
//!
//! Weights are packed along K: word `(k / eps, n)` holds the values for
//! `k = row * eps .. (row + 1) * eps`, with value `k` at bit offset
//! `(k % eps) * bits`.
//!
//! ```text
//! bits = 4, eps = 8
//! word (r, n): | q7 | q6 | q5 | q4 | q3 | q2 | q1 | q0 |
//!              31                                     0
//! ```

use crate::error::{RayoError, Result};
use crate::tensor::Tensor;

/// Width of a packed storage word in bits
pub const WORD_BITS: u32 = 32;

/// Bit widths the kernels can unpack
pub const SUPPORTED_BIT_WIDTHS: [u32; 4] = [1, 2, 4, 8];

/// Validate a weight bit width
///
/// # Errors
///
/// Returns `InvalidInput` for widths outside [`SUPPORTED_BIT_WIDTHS`].
pub fn check_bit_width(bits: u32) -> Result<()> {
    if SUPPORTED_BIT_WIDTHS.contains(&bits) {
        Ok(())
    } else {
        Err(RayoError::InvalidInput(format!(
            "Unsupported weight bit width {bits} (expected one of {SUPPORTED_BIT_WIDTHS:?})"
        )))
    }
}

/// Mask selecting one unpacked value: `2^bits - 1`
#[must_use]
pub const fn unpack_mask(bits: u32) -> u32 {
    if bits >= WORD_BITS {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Number of `bits`-wide values that fit in one storage word
#[must_use]
pub const fn elements_per_sample(bits: u32) -> usize {
    (WORD_BITS / bits) as usize
}

/// Bit offset of reduction index `k` inside its storage word
#[inline]
#[must_use]
pub const fn shift_for(k: usize, elements_per_sample: usize, bits: u32) -> u32 {
    (k % elements_per_sample) as u32 * bits
}

/// Extract one value from a packed word: `(word >> shift) & mask`
#[inline]
#[must_use]
pub const fn unpack(word: u32, shift: u32, mask: u32) -> u32 {
    (word >> shift) & mask
}

/// Pack a `[K, N]` tensor of unsigned integers into `[K / eps, N]` words
///
/// # Errors
///
/// Returns `InvalidInput` if the bit width is unsupported, `K` is not a
/// multiple of the values-per-word, or a value does not fit in `bits`.
pub fn pack_weights(values: &Tensor<u8>, bits: u32) -> Result<Tensor<u32>> {
    check_bit_width(bits)?;
    let eps = elements_per_sample(bits);
    let (k, n) = values.shape();
    if k % eps != 0 {
        return Err(RayoError::InvalidInput(format!(
            "K={k} is not a multiple of {eps} values per {WORD_BITS}-bit word"
        )));
    }

    let mask = unpack_mask(bits);
    let mut words = vec![0u32; (k / eps) * n];
    for kk in 0..k {
        let shift = shift_for(kk, eps, bits);
        let row = kk / eps;
        for nn in 0..n {
            let q = u32::from(values.at(kk, nn));
            if q > mask {
                return Err(RayoError::InvalidInput(format!(
                    "Value {q} at ({kk}, {nn}) does not fit in {bits} bits"
                )));
            }
            words[row * n + nn] |= q << shift;
        }
    }
    Tensor::from_vec(k / eps, n, words)
}

/// Inverse of [`pack_weights`]
#[must_use]
pub fn unpack_weights(packed: &Tensor<u32>, bits: u32) -> Tensor<u8> {
    let eps = elements_per_sample(bits);
    let mask = unpack_mask(bits);
    Tensor::from_fn(packed.rows() * eps, packed.cols(), |kk, nn| {
        unpack(packed.at(kk / eps, nn), shift_for(kk, eps, bits), mask) as u8
    })
}
