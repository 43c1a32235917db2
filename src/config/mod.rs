//! Kernel execution configurations
//!
//! A [`KernelConfig`] fixes every tunable of one launch: tile shape, warp and
//! stage counts, and the memory / accumulation strategy knobs. Candidates come
//! from [`ConfigSpace`], are filtered by [`ConfigPruner`], and the winner is
//! memoized per shape in the [`ConfigCache`](crate::ConfigCache).
//!
//! [`default_config`] gives a single always-available configuration per
//! hardware tier, used when search is disabled.

pub mod pruner;
pub mod space;
pub mod tuned;

pub use pruner::{ConfigPruner, PrunedCandidates, PrunerParams};
pub use space::ConfigSpace;
pub use tuned::tuned_config;

use crate::kernels::KernelVariant;

/// Which operand tile is fetched first in each K step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoadOrder {
    /// Activation tile, then weight tile
    AFirst,
    /// Weight tile, then activation tile
    BFirst,
}

/// Cache eviction hint for quantization metadata loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EvictionPolicy {
    /// No hint
    Default,
    /// Evict first
    EvictFirst,
    /// Evict last
    EvictLast,
}

/// Memory ordering of the output atomic adds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AtomicMode {
    /// No ordering beyond atomicity
    Relaxed,
    /// Acquire / release ordering
    Strict,
}

/// How a dequantized tile meets the activation tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DotProductMode {
    /// Matrix-multiply instruction, weight operand rounded to the input dtype
    DotInstruction,
    /// Elementwise multiply then sum, full `f32` operands
    MultiplyReduce,
}

/// One execution configuration
///
/// Eviction hints are carried for parity with device launches; the CPU
/// executor has no cache to steer and ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelConfig {
    /// Kernel family this configuration launches
    pub variant: KernelVariant,
    /// Activation rows per tile
    pub block_size_m: usize,
    /// Output columns per tile
    pub block_size_n: usize,
    /// Reduction elements per K-slice
    pub block_size_k: usize,
    /// Warps per program
    pub num_warps: usize,
    /// Software pipeline stages
    pub num_stages: usize,
    /// Cooperative thread arrays per program
    pub num_ctas: usize,
    /// Operand fetch order
    pub load_order: LoadOrder,
    /// Metadata eviction hint
    pub meta_eviction: EvictionPolicy,
    /// Output atomic ordering
    pub atomic_mode: AtomicMode,
    /// Dot product formulation
    pub dot_product_mode: DotProductMode,
}

impl KernelConfig {
    /// Configuration with the given tile shape and default strategy knobs
    #[must_use]
    pub const fn new(
        variant: KernelVariant,
        block_size_m: usize,
        block_size_n: usize,
        block_size_k: usize,
    ) -> Self {
        Self {
            variant,
            block_size_m,
            block_size_n,
            block_size_k,
            num_warps: 4,
            num_stages: 2,
            num_ctas: 1,
            load_order: LoadOrder::BFirst,
            meta_eviction: EvictionPolicy::Default,
            atomic_mode: AtomicMode::Relaxed,
            dot_product_mode: match variant {
                KernelVariant::GemmSplitK => DotProductMode::DotInstruction,
                KernelVariant::GemvRevSplitK => DotProductMode::MultiplyReduce,
            },
        }
    }

    /// Set warp and stage counts
    #[must_use]
    pub const fn with_pipeline(mut self, num_warps: usize, num_stages: usize) -> Self {
        self.num_warps = num_warps;
        self.num_stages = num_stages;
        self
    }

    /// Set the operand load order
    #[must_use]
    pub const fn with_load_order(mut self, load_order: LoadOrder) -> Self {
        self.load_order = load_order;
        self
    }

    /// Set the metadata eviction hint
    #[must_use]
    pub const fn with_meta_eviction(mut self, policy: EvictionPolicy) -> Self {
        self.meta_eviction = policy;
        self
    }

    /// Set the atomic ordering
    #[must_use]
    pub const fn with_atomic_mode(mut self, mode: AtomicMode) -> Self {
        self.atomic_mode = mode;
        self
    }

    /// Set the dot product formulation
    #[must_use]
    pub const fn with_dot_product_mode(mut self, mode: DotProductMode) -> Self {
        self.dot_product_mode = mode;
        self
    }

    /// Occupancy measure `block_size_n * block_size_k`
    #[must_use]
    pub const fn block_area(&self) -> usize {
        self.block_size_n * self.block_size_k
    }
}

/// Coarse hardware generation used to pick default configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HardwareTier {
    /// Consumer parts and anything unrecognized
    #[default]
    Generic,
    /// Compute capability 8.0
    Ampere,
    /// Compute capability 9.0
    Hopper,
}

impl HardwareTier {
    /// Tier for a `(major, minor)` compute capability
    #[must_use]
    pub const fn from_compute_capability(major: u32, minor: u32) -> Self {
        match (major, minor) {
            (8, 0) => Self::Ampere,
            (9, 0) => Self::Hopper,
            _ => Self::Generic,
        }
    }
}

/// Single fallback configuration for a kernel family on a hardware tier
#[must_use]
pub const fn default_config(variant: KernelVariant, tier: HardwareTier) -> KernelConfig {
    match (variant, tier) {
        (KernelVariant::GemmSplitK, HardwareTier::Generic) => {
            KernelConfig::new(variant, 16, 32, 32).with_pipeline(4, 3)
        }
        (KernelVariant::GemmSplitK, HardwareTier::Ampere | HardwareTier::Hopper) => {
            KernelConfig::new(variant, 16, 32, 128).with_pipeline(4, 2)
        }
        (KernelVariant::GemvRevSplitK, HardwareTier::Generic) => {
            KernelConfig::new(variant, 1, 256, 32).with_pipeline(4, 2)
        }
        (KernelVariant::GemvRevSplitK, HardwareTier::Ampere | HardwareTier::Hopper) => {
            KernelConfig::new(variant, 1, 256, 16).with_pipeline(2, 1)
        }
    }
}
