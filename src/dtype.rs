//! Element types
//!
//! Activations and outputs are half precision (`f16` / `bf16`), metadata may
//! be half or single precision, and reductions run in `f32` (optionally
//! rounded to `f16` per partial sum).

use std::fmt;

use half::{bf16, f16};

/// Runtime dtype tag carried through the launch path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// IEEE 754 half precision
    F16,
    /// bfloat16
    BF16,
    /// IEEE 754 single precision
    F32,
}

impl DType {
    /// Size of one element in bytes
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F16 | Self::BF16 => 2,
            Self::F32 => 4,
        }
    }

    /// True for the 16-bit float formats
    #[must_use]
    pub const fn is_half(self) -> bool {
        matches!(self, Self::F16 | Self::BF16)
    }

    /// Round an `f32` through this dtype and back
    #[inline]
    #[must_use]
    pub fn round(self, value: f32) -> f32 {
        match self {
            Self::F16 => f16::from_f32(value).to_f32(),
            Self::BF16 => bf16::from_f32(value).to_f32(),
            Self::F32 => value,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F16 => "float16",
            Self::BF16 => "bfloat16",
            Self::F32 => "float32",
        };
        f.write_str(name)
    }
}

/// Scalar element stored in a [`Tensor`](crate::Tensor) that the kernels can read
pub trait Element: Copy + Send + Sync + fmt::Debug + 'static {
    /// Dtype tag for this element type
    const DTYPE: DType;

    /// Widen to `f32`
    fn to_f32(self) -> f32;

    /// Narrow from `f32` (round to nearest even)
    fn from_f32(value: f32) -> Self;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}
