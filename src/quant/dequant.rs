//! Dequantization engine shared by both kernel variants
//!
//! Turns a tile of packed weight words into floating-point values using
//! per-group scale / zero-point metadata:
//!
//! | mode             | value                         |
//! |------------------|-------------------------------|
//! | `NoZero`         | `q * scale[g, n]`             |
//! | `ScalarZero`     | `(q - z) * scale[g, n]`       |
//! | `PerGroupZero`   | `(q - zero[g, n]) * scale[g, n]` |
//! | `ShiftOnly`      | `q - zero`                    |
//! | `Fma`            | `q * scale[g, n] + zero`      |
//!
//! where `g = k / group_size`. Channel scaling is applied to the accumulator
//! after the reduction, see [`ChannelScaleMode`].

use crate::dtype::Element;
use crate::quant::pack::{shift_for, unpack};
use crate::tensor::Tensor;

/// How per-group metadata combines with an unpacked integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupMode {
    /// `q * scale`
    NoZero,
    /// `(q - z) * scale` with a single zero-point broadcast to all groups
    ScalarZero,
    /// `(q - zero[g, n]) * scale[g, n]`
    PerGroupZero,
    /// `q - zero`, no scale
    ShiftOnly,
    /// `q * scale + zero`
    Fma,
}

impl GroupMode {
    /// Whether the mode reads `scale[g, n]`
    #[must_use]
    pub const fn uses_scales(self) -> bool {
        !matches!(self, Self::ShiftOnly)
    }

    /// Whether the mode reads a zero-point
    #[must_use]
    pub const fn uses_zeros(self) -> bool {
        !matches!(self, Self::NoZero)
    }
}

/// Row / column scaling of the accumulator after the main reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelScaleMode {
    /// No channel scaling
    None,
    /// `acc[m, n] *= scales[0, n]`
    WeightOnly,
    /// `acc[m, n] *= activation_scales[m]`
    ActivationOnly,
    /// `acc[m, n] *= activation_scales[m] * scales[0, n]`
    WeightAndActivation,
}

impl ChannelScaleMode {
    /// Whether row 0 of the weight scales is applied per output column
    #[must_use]
    pub const fn scales_weights(self) -> bool {
        matches!(self, Self::WeightOnly | Self::WeightAndActivation)
    }

    /// Whether per-row activation scales are applied
    #[must_use]
    pub const fn scales_activations(self) -> bool {
        matches!(self, Self::ActivationOnly | Self::WeightAndActivation)
    }
}

/// Static unpacking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequantParams {
    /// Bits per weight value
    pub bit_width: u32,
    /// `2^bit_width - 1`
    pub unpack_mask: u32,
    /// Values per packed word
    pub elements_per_sample: usize,
    /// K elements sharing one metadata entry
    pub group_size: usize,
}

/// Source of the zero-point
#[derive(Debug, Clone, Copy)]
pub enum ZeroPoint<'a, S> {
    /// Mode does not use a zero-point
    Absent,
    /// Single value for every group and column
    Scalar(f32),
    /// `zero[g, n]`
    PerGroup(&'a Tensor<S>),
}

/// Dequantizer bound to one call's metadata
#[derive(Debug, Clone, Copy)]
pub struct Dequantizer<'a, S> {
    params: DequantParams,
    mode: GroupMode,
    scales: &'a Tensor<S>,
    zero: ZeroPoint<'a, S>,
}

impl<'a, S: Element> Dequantizer<'a, S> {
    /// Bind parameters and metadata. Shapes are validated by the launch driver.
    #[must_use]
    pub fn new(
        params: DequantParams,
        mode: GroupMode,
        scales: &'a Tensor<S>,
        zero: ZeroPoint<'a, S>,
    ) -> Self {
        Self {
            params,
            mode,
            scales,
            zero,
        }
    }

    /// Unpacking parameters
    #[must_use]
    pub fn params(&self) -> &DequantParams {
        &self.params
    }

    /// Metadata group for reduction index `k`
    #[inline]
    #[must_use]
    pub fn group_of(&self, k: usize) -> usize {
        k / self.params.group_size
    }

    /// Unpack the integer for reduction index `k` from its storage word
    #[inline]
    #[must_use]
    pub fn unpack(&self, word: u32, k: usize) -> u32 {
        let shift = shift_for(k, self.params.elements_per_sample, self.params.bit_width);
        unpack(word, shift, self.params.unpack_mask)
    }

    #[inline]
    fn zero_at(&self, group: usize, n: usize) -> f32 {
        match self.zero {
            ZeroPoint::Absent => 0.0,
            ZeroPoint::Scalar(z) => z,
            ZeroPoint::PerGroup(zeros) => zeros.at(group, n).to_f32(),
        }
    }

    /// Dequantize a single unpacked integer
    #[inline]
    #[must_use]
    pub fn dequantize(&self, q: u32, group: usize, n: usize) -> f32 {
        let q = q as f32;
        match self.mode {
            GroupMode::NoZero => q * self.scales.at(group, n).to_f32(),
            GroupMode::ScalarZero | GroupMode::PerGroupZero => {
                (q - self.zero_at(group, n)) * self.scales.at(group, n).to_f32()
            }
            GroupMode::ShiftOnly => q - self.zero_at(group, n),
            GroupMode::Fma => q * self.scales.at(group, n).to_f32() + self.zero_at(group, n),
        }
    }

    /// Dequantize a `[k_len, n_len]` tile of packed words
    ///
    /// `words[i * n_len + j]` is the storage word holding reduction index
    /// `k_offsets[i]` for output column `n_offsets[j]`. Only in-bounds offsets
    /// may be passed; masked lanes are left to the caller.
    pub fn dequantize_tile(
        &self,
        words: &[u32],
        k_offsets: &[usize],
        n_offsets: &[usize],
        out: &mut [f32],
    ) {
        let n_len = n_offsets.len();
        for (i, &k) in k_offsets.iter().enumerate() {
            let group = self.group_of(k);
            let row = &words[i * n_len..(i + 1) * n_len];
            let dst = &mut out[i * n_len..(i + 1) * n_len];
            for ((d, &word), &n) in dst.iter_mut().zip(row).zip(n_offsets) {
                *d = self.dequantize(self.unpack(word, k), group, n);
            }
        }
    }
}
