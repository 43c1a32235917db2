//! Shape-aware candidate pruning
//!
//! For a shape already in the cache the pruner yields only the cached winner.
//! Otherwise it normalizes each candidate to the shape, drops the ones that
//! cannot launch, and deduplicates what remains. Survivors are produced
//! lazily so a search can stop early.

use std::collections::HashSet;
use std::sync::Arc;

use super::KernelConfig;
use crate::cache::ConfigCache;
use crate::kernels::KernelVariant;
use crate::shape::ProblemShape;

/// Tunable pruning thresholds
///
/// The occupancy band bounds `block_size_n * block_size_k`; the defaults are
/// empirical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunerParams {
    /// Smallest accepted block area
    pub min_block_area: usize,
    /// Largest accepted block area
    pub max_block_area: usize,
    /// Cap on `block_size_k` for the reversed split-K family when `M > 1`
    pub revsplitk_multi_row_max_k: usize,
}

impl Default for PrunerParams {
    fn default() -> Self {
        Self {
            min_block_area: 1024,
            max_block_area: 32768,
            revsplitk_multi_row_max_k: 32,
        }
    }
}

impl PrunerParams {
    /// Set the occupancy band
    #[must_use]
    pub fn with_block_area(mut self, min: usize, max: usize) -> Self {
        self.min_block_area = min;
        self.max_block_area = max;
        self
    }

    /// Adapt a candidate to `shape`, or reject it
    ///
    /// `block_size_m` is set by the family, `block_size_k` is clamped to the
    /// group size and `K`. Rejections: occupancy band, `K` not divisible by
    /// `block_size_k * split_factor`, and for the reversed split-K family a
    /// double slice straddling a metadata group.
    #[must_use]
    pub fn normalize(&self, config: &KernelConfig, shape: &ProblemShape) -> Option<KernelConfig> {
        let variant = config.variant;
        let split = variant.split_factor();
        let mut c = *config;

        c.block_size_m = variant.block_size_m_for(shape.m);
        c.block_size_k = c.block_size_k.min(shape.k).min(shape.group_size);
        if variant == KernelVariant::GemvRevSplitK && shape.m > 1 {
            c.block_size_k = c.block_size_k.min(self.revsplitk_multi_row_max_k);
        }
        if c.block_size_k == 0 || c.block_size_n == 0 {
            return None;
        }

        let area = c.block_area();
        if area < self.min_block_area || area > self.max_block_area {
            return None;
        }
        if shape.k % (c.block_size_k * split) != 0 {
            return None;
        }
        if variant == KernelVariant::GemvRevSplitK && c.block_size_k * split > shape.group_size {
            return None;
        }
        Some(c)
    }
}

/// Candidate filter bound to a config cache
#[derive(Debug, Clone)]
pub struct ConfigPruner {
    params: PrunerParams,
    cache: Arc<ConfigCache>,
}

impl ConfigPruner {
    /// Pruner consulting `cache` for previously resolved shapes
    #[must_use]
    pub fn new(params: PrunerParams, cache: Arc<ConfigCache>) -> Self {
        Self { params, cache }
    }

    /// Thresholds in use
    #[must_use]
    pub fn params(&self) -> &PrunerParams {
        &self.params
    }

    /// Filter `candidates` for `shape` under kernel family `variant`
    ///
    /// Yields exactly the cached winner when the signature is known. Otherwise
    /// yields each normalized, valid, first-seen candidate of `variant`.
    pub fn prune<I>(
        &self,
        candidates: I,
        shape: &ProblemShape,
        variant: KernelVariant,
    ) -> PrunedCandidates<I::IntoIter>
    where
        I: IntoIterator<Item = KernelConfig>,
    {
        if let Some(winner) = self.cache.get(&shape.signature(variant)) {
            return PrunedCandidates::Cached(Some(winner));
        }
        PrunedCandidates::Search(Survivors {
            inner: candidates.into_iter(),
            shape: *shape,
            variant,
            params: self.params,
            seen: HashSet::new(),
        })
    }
}

/// Lazy output of [`ConfigPruner::prune`]
#[derive(Debug)]
pub enum PrunedCandidates<I> {
    /// Signature found in the cache: its winner only
    Cached(Option<KernelConfig>),
    /// Signature unknown: filtered candidates
    Search(Survivors<I>),
}

impl<I> PrunedCandidates<I> {
    /// True when the cached winner bypasses the search
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

impl<I: Iterator<Item = KernelConfig>> Iterator for PrunedCandidates<I> {
    type Item = KernelConfig;

    fn next(&mut self) -> Option<KernelConfig> {
        match self {
            Self::Cached(winner) => winner.take(),
            Self::Search(survivors) => survivors.next(),
        }
    }
}

/// Filtering iterator behind [`PrunedCandidates::Search`]
#[derive(Debug)]
pub struct Survivors<I> {
    inner: I,
    shape: ProblemShape,
    variant: KernelVariant,
    params: PrunerParams,
    seen: HashSet<KernelConfig>,
}

impl<I: Iterator<Item = KernelConfig>> Iterator for Survivors<I> {
    type Item = KernelConfig;

    fn next(&mut self) -> Option<KernelConfig> {
        for candidate in self.inner.by_ref() {
            if candidate.variant != self.variant {
                continue;
            }
            let Some(config) = self.params.normalize(&candidate, &self.shape) else {
                continue;
            };
            if self.seen.insert(config) {
                return Some(config);
            }
        }
        None
    }
}
