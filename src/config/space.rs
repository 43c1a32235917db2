//! Cartesian candidate space for the autotuner

use super::{AtomicMode, DotProductMode, EvictionPolicy, KernelConfig, LoadOrder};
use crate::kernels::KernelVariant;

/// Candidate axes for one kernel family
///
/// [`ConfigSpace::iter`] walks the full product lazily; the pruner decides
/// what survives for a given shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSpace {
    /// Kernel family every candidate launches
    pub variant: KernelVariant,
    /// `block_size_n` values
    pub block_sizes_n: Vec<usize>,
    /// `block_size_k` values
    pub block_sizes_k: Vec<usize>,
    /// `num_warps` values
    pub num_warps: Vec<usize>,
    /// `num_stages` values
    pub num_stages: Vec<usize>,
    /// Operand load orders
    pub load_orders: Vec<LoadOrder>,
    /// Metadata eviction hints
    pub meta_evictions: Vec<EvictionPolicy>,
    /// Output atomic orderings
    pub atomic_modes: Vec<AtomicMode>,
    /// Dot product formulations
    pub dot_product_modes: Vec<DotProductMode>,
}

impl ConfigSpace {
    /// Full search space for `variant`
    #[must_use]
    pub fn for_variant(variant: KernelVariant) -> Self {
        Self {
            variant,
            block_sizes_n: vec![32, 64, 128, 256],
            block_sizes_k: vec![16, 32, 64],
            num_warps: vec![1, 2, 4],
            num_stages: vec![1, 2],
            load_orders: vec![LoadOrder::AFirst, LoadOrder::BFirst],
            meta_evictions: vec![
                EvictionPolicy::Default,
                EvictionPolicy::EvictFirst,
                EvictionPolicy::EvictLast,
            ],
            atomic_modes: vec![AtomicMode::Relaxed, AtomicMode::Strict],
            dot_product_modes: vec![DotProductMode::DotInstruction, DotProductMode::MultiplyReduce],
        }
    }

    /// Restrict `block_size_n` values
    #[must_use]
    pub fn with_block_sizes_n(mut self, values: impl Into<Vec<usize>>) -> Self {
        self.block_sizes_n = values.into();
        self
    }

    /// Restrict `block_size_k` values
    #[must_use]
    pub fn with_block_sizes_k(mut self, values: impl Into<Vec<usize>>) -> Self {
        self.block_sizes_k = values.into();
        self
    }

    /// Restrict warp counts
    #[must_use]
    pub fn with_num_warps(mut self, values: impl Into<Vec<usize>>) -> Self {
        self.num_warps = values.into();
        self
    }

    /// Restrict pipeline stage counts
    #[must_use]
    pub fn with_num_stages(mut self, values: impl Into<Vec<usize>>) -> Self {
        self.num_stages = values.into();
        self
    }

    /// Restrict load orders
    #[must_use]
    pub fn with_load_orders(mut self, values: impl Into<Vec<LoadOrder>>) -> Self {
        self.load_orders = values.into();
        self
    }

    /// Restrict eviction hints
    #[must_use]
    pub fn with_meta_evictions(mut self, values: impl Into<Vec<EvictionPolicy>>) -> Self {
        self.meta_evictions = values.into();
        self
    }

    /// Restrict atomic orderings
    #[must_use]
    pub fn with_atomic_modes(mut self, values: impl Into<Vec<AtomicMode>>) -> Self {
        self.atomic_modes = values.into();
        self
    }

    /// Restrict dot product formulations
    #[must_use]
    pub fn with_dot_product_modes(mut self, values: impl Into<Vec<DotProductMode>>) -> Self {
        self.dot_product_modes = values.into();
        self
    }

    /// Number of candidates [`ConfigSpace::iter`] yields
    #[must_use]
    pub fn len(&self) -> usize {
        self.block_sizes_n.len()
            * self.block_sizes_k.len()
            * self.num_warps.len()
            * self.num_stages.len()
            * self.strategy_count()
    }

    /// True when some axis is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn strategy_count(&self) -> usize {
        self.load_orders.len()
            * self.meta_evictions.len()
            * self.atomic_modes.len()
            * self.dot_product_modes.len()
    }

    fn strategies(&self) -> Vec<(LoadOrder, EvictionPolicy, AtomicMode, DotProductMode)> {
        let mut out = Vec::with_capacity(self.strategy_count());
        for &load in &self.load_orders {
            for &evict in &self.meta_evictions {
                for &atomic in &self.atomic_modes {
                    for &dot in &self.dot_product_modes {
                        out.push((load, evict, atomic, dot));
                    }
                }
            }
        }
        out
    }

    /// Lazily enumerate every candidate
    ///
    /// `block_size_m` is the family default for a single activation row; the
    /// pruner normalizes it to the actual `M`.
    pub fn iter(&self) -> impl Iterator<Item = KernelConfig> + '_ {
        let variant = self.variant;
        let block_m = variant.block_size_m_for(1);
        let strategies = self.strategies();
        self.block_sizes_n.iter().flat_map(move |&bn| {
            let strategies = strategies.clone();
            self.block_sizes_k.iter().flat_map(move |&bk| {
                let strategies = strategies.clone();
                self.num_warps.iter().flat_map(move |&warps| {
                    let strategies = strategies.clone();
                    self.num_stages.iter().flat_map(move |&stages| {
                        strategies
                            .clone()
                            .into_iter()
                            .map(move |(load, evict, atomic, dot)| {
                                KernelConfig::new(variant, block_m, bn, bk)
                                    .with_pipeline(warps, stages)
                                    .with_load_order(load)
                                    .with_meta_eviction(evict)
                                    .with_atomic_mode(atomic)
                                    .with_dot_product_mode(dot)
                            })
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_full_space_size() {
        let space = ConfigSpace::for_variant(KernelVariant::GemvRevSplitK);
        // 4 * 3 tiles, 3 * 2 pipelines, 2 * 3 * 2 * 2 strategies
        assert_eq!(space.len(), 12 * 6 * 24);
        assert_eq!(space.iter().count(), space.len());
    }

    #[test]
    fn test_candidates_are_distinct() {
        let space = ConfigSpace::for_variant(KernelVariant::GemmSplitK);
        let unique: HashSet<_> = space.iter().collect();
        assert_eq!(unique.len(), space.len());
        assert!(space.iter().all(|c| c.variant == KernelVariant::GemmSplitK));
        assert!(space.iter().all(|c| c.num_ctas == 1 && c.block_size_m == 16));
    }

    #[test]
    fn test_restricted_space() {
        let space = ConfigSpace::for_variant(KernelVariant::GemvRevSplitK)
            .with_block_sizes_n([64])
            .with_block_sizes_k([32])
            .with_num_warps([4])
            .with_num_stages([1])
            .with_load_orders([LoadOrder::BFirst])
            .with_meta_evictions([EvictionPolicy::Default])
            .with_atomic_modes([AtomicMode::Relaxed])
            .with_dot_product_modes([DotProductMode::MultiplyReduce]);
        let all: Vec<_> = space.iter().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].block_area(), 2048);
        assert_eq!(all[0].block_size_m, 1);
    }

    #[test]
    fn test_empty_axis() {
        let space = ConfigSpace::for_variant(KernelVariant::GemmSplitK).with_num_stages(Vec::new());
        assert!(space.is_empty());
        assert_eq!(space.iter().next(), None);
    }
}
