//! Problem shapes and autotune cache keys

use std::fmt;

use crate::kernels::KernelVariant;

/// Dimensions of one quantized matmul call: `C[M, N] = A[M, K] @ W[K, N]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProblemShape {
    /// Activation rows (batch / tokens)
    pub m: usize,
    /// Output features
    pub n: usize,
    /// Reduction dimension
    pub k: usize,
    /// Number of K elements sharing one scale / zero-point
    pub group_size: usize,
    /// Sub-byte weight values packed per 32-bit storage word
    pub elements_per_sample: usize,
}

impl ProblemShape {
    /// Create a new problem shape
    #[must_use]
    pub const fn new(
        m: usize,
        n: usize,
        k: usize,
        group_size: usize,
        elements_per_sample: usize,
    ) -> Self {
        Self {
            m,
            n,
            k,
            group_size,
            elements_per_sample,
        }
    }

    /// Number of metadata groups along K
    #[must_use]
    pub const fn num_groups(&self) -> usize {
        self.k.div_ceil(self.group_size)
    }

    /// Number of packed weight rows along K
    #[must_use]
    pub const fn packed_rows(&self) -> usize {
        self.k / self.elements_per_sample
    }

    /// Cache key for this shape under the given matmul family
    #[must_use]
    pub const fn signature(&self, matmul: KernelVariant) -> ShapeSignature {
        ShapeSignature {
            matmul,
            m: self.m,
            n: self.n,
            k: self.k,
            group_size: self.group_size,
            elements_per_sample: self.elements_per_sample,
        }
    }
}

/// Identity of an autotune cache entry
///
/// Two calls with equal signatures always receive the same configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeSignature {
    /// Matmul family the configuration belongs to
    pub matmul: KernelVariant,
    /// Activation rows
    pub m: usize,
    /// Output features
    pub n: usize,
    /// Reduction dimension
    pub k: usize,
    /// Quantization group size
    pub group_size: usize,
    /// Values per packed word
    pub elements_per_sample: usize,
}

impl ShapeSignature {
    /// Shape this signature was derived from
    #[must_use]
    pub const fn shape(&self) -> ProblemShape {
        ProblemShape::new(
            self.m,
            self.n,
            self.k,
            self.group_size,
            self.elements_per_sample,
        )
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(M={}, N={}, K={}, group_size={}, elements_per_sample={})",
            self.matmul, self.m, self.n, self.k, self.group_size, self.elements_per_sample
        )
    }
}
