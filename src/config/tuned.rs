//! Pre-tuned configurations for well-known projection shapes
//!
//! Entries cover the attention and MLP projections of Qwen2.5-32B. Reversed
//! split-K entries are single token at one and two way tensor parallelism.
//! Atomic split-K entries are one way, batch 2 to 8 and 27 to 31.

use super::KernelConfig;
use crate::kernels::KernelVariant;
use crate::shape::ProblemShape;

/// `(M, N, K, group_size, elements_per_sample)` plus tile and pipeline
struct TunedEntry {
    key: (usize, usize, usize, usize, usize),
    block: (usize, usize, usize),
    num_stages: usize,
    num_warps: usize,
}

const fn entry(
    key: (usize, usize, usize, usize, usize),
    block: (usize, usize, usize),
    num_stages: usize,
    num_warps: usize,
) -> TunedEntry {
    TunedEntry {
        key,
        block,
        num_stages,
        num_warps,
    }
}

const GEMV_REVSPLITK: &[TunedEntry] = &[
    // tp1
    entry((1, 7168, 5120, 128, 8), (1, 256, 32), 1, 4),
    entry((1, 5120, 5120, 128, 8), (1, 256, 32), 2, 4),
    entry((1, 55296, 5120, 128, 8), (1, 128, 16), 1, 2),
    entry((1, 5120, 27648, 128, 8), (1, 128, 32), 1, 2),
    entry((1, 55296, 5120, 32, 16), (1, 256, 16), 1, 2),
    entry((1, 5120, 27648, 32, 16), (1, 256, 16), 1, 2),
    // tp2
    entry((1, 3584, 5120, 128, 8), (1, 256, 32), 1, 4),
    entry((1, 5120, 2560, 128, 8), (1, 256, 32), 2, 4),
    entry((1, 27648, 5120, 128, 8), (1, 128, 16), 1, 2),
    entry((1, 5120, 13824, 128, 8), (1, 128, 32), 1, 2),
    entry((1, 27648, 5120, 32, 16), (1, 256, 16), 1, 2),
    entry((1, 5120, 13824, 32, 16), (1, 256, 16), 1, 2),
];

const GEMM_SPLITK: &[TunedEntry] = &[
    // batch 2
    entry((2, 7168, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((2, 5120, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((2, 55296, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((2, 5120, 27648, 128, 8), (16, 32, 64), 1, 2),
    entry((2, 55296, 5120, 32, 16), (16, 64, 32), 1, 4),
    entry((2, 5120, 27648, 32, 16), (16, 32, 32), 1, 4),
    // batch 3
    entry((3, 7168, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((3, 5120, 5120, 128, 8), (16, 32, 128), 1, 4),
    entry((3, 55296, 5120, 128, 8), (16, 32, 128), 1, 4),
    entry((3, 5120, 27648, 128, 8), (16, 32, 64), 1, 2),
    entry((3, 55296, 5120, 32, 16), (16, 64, 32), 1, 4),
    entry((3, 5120, 27648, 32, 16), (16, 32, 32), 1, 4),
    // batch 4
    entry((4, 7168, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((4, 5120, 5120, 128, 8), (16, 32, 128), 2, 4),
    entry((4, 55296, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((4, 5120, 27648, 128, 8), (16, 32, 64), 1, 2),
    entry((4, 55296, 5120, 32, 16), (16, 64, 32), 1, 4),
    entry((4, 5120, 27648, 32, 16), (16, 32, 32), 1, 4),
    // batch 5
    entry((5, 7168, 5120, 128, 8), (16, 64, 64), 1, 4),
    entry((5, 5120, 5120, 128, 8), (16, 32, 128), 2, 4),
    entry((5, 55296, 5120, 128, 8), (16, 32, 128), 1, 4),
    entry((5, 5120, 27648, 128, 8), (16, 32, 64), 1, 2),
    entry((5, 55296, 5120, 32, 16), (16, 64, 32), 1, 4),
    entry((5, 5120, 27648, 32, 16), (16, 32, 32), 2, 4),
    // batch 6
    entry((6, 7168, 5120, 128, 8), (16, 64, 64), 1, 4),
    entry((6, 5120, 5120, 128, 8), (16, 32, 128), 2, 4),
    entry((6, 55296, 5120, 128, 8), (16, 32, 64), 1, 2),
    entry((6, 5120, 27648, 128, 8), (16, 32, 64), 2, 2),
    entry((6, 55296, 5120, 32, 16), (16, 64, 32), 1, 4),
    entry((6, 5120, 27648, 32, 16), (16, 32, 32), 1, 4),
    // batch 7
    entry((7, 7168, 5120, 128, 8), (16, 32, 128), 1, 4),
    entry((7, 5120, 5120, 128, 8), (16, 32, 128), 1, 4),
    entry((7, 55296, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((7, 5120, 27648, 128, 8), (16, 32, 64), 1, 2),
    entry((7, 55296, 5120, 32, 16), (16, 64, 32), 1, 4),
    entry((7, 5120, 27648, 32, 16), (16, 32, 32), 1, 4),
    // batch 8
    entry((8, 7168, 5120, 128, 8), (16, 64, 64), 2, 4),
    entry((8, 5120, 5120, 128, 8), (16, 32, 128), 1, 4),
    entry((8, 55296, 5120, 128, 8), (16, 32, 64), 2, 2),
    entry((8, 5120, 27648, 128, 8), (16, 32, 64), 1, 2),
    entry((8, 55296, 5120, 32, 16), (16, 64, 32), 2, 4),
    entry((8, 5120, 27648, 32, 16), (16, 32, 32), 1, 4),
    // batch 27
    entry((27, 7168, 5120, 128, 8), (32, 64, 64), 1, 2),
    entry((27, 5120, 5120, 128, 8), (32, 64, 64), 1, 4),
    entry((27, 55296, 5120, 128, 8), (32, 64, 64), 1, 4),
    entry((27, 5120, 27648, 128, 8), (32, 32, 128), 1, 4),
    entry((27, 55296, 5120, 32, 16), (32, 64, 32), 2, 4),
    entry((27, 5120, 27648, 32, 16), (32, 32, 32), 1, 2),
    // batch 29
    entry((29, 7168, 5120, 128, 8), (32, 64, 64), 1, 4),
    entry((29, 5120, 5120, 128, 8), (32, 32, 128), 2, 4),
    entry((29, 55296, 5120, 128, 8), (32, 64, 64), 2, 4),
    entry((29, 5120, 27648, 128, 8), (32, 64, 32), 1, 4),
    entry((29, 55296, 5120, 32, 16), (32, 64, 32), 1, 4),
    entry((29, 5120, 27648, 32, 16), (32, 64, 32), 1, 4),
    // batch 30
    entry((30, 7168, 5120, 128, 8), (32, 64, 64), 1, 4),
    entry((30, 5120, 5120, 128, 8), (32, 32, 128), 1, 4),
    entry((30, 55296, 5120, 128, 8), (32, 64, 64), 1, 4),
    entry((30, 5120, 27648, 128, 8), (32, 64, 32), 2, 4),
    entry((30, 55296, 5120, 32, 16), (32, 64, 32), 1, 4),
    entry((30, 5120, 27648, 32, 16), (32, 64, 32), 1, 4),
    // batch 31
    entry((31, 5120, 5120, 128, 8), (32, 32, 128), 1, 4),
    entry((31, 55296, 5120, 128, 8), (32, 64, 64), 1, 4),
    entry((31, 5120, 27648, 128, 8), (32, 64, 32), 2, 4),
    entry((31, 55296, 5120, 32, 16), (32, 64, 32), 1, 4),
    entry((31, 5120, 27648, 32, 16), (32, 64, 32), 1, 4),
];

/// Pre-tuned configuration for `shape` under `variant`, if one is known
#[must_use]
pub fn tuned_config(shape: &ProblemShape, variant: KernelVariant) -> Option<KernelConfig> {
    let table = match variant {
        KernelVariant::GemvRevSplitK => GEMV_REVSPLITK,
        KernelVariant::GemmSplitK => GEMM_SPLITK,
    };
    let key = (
        shape.m,
        shape.n,
        shape.k,
        shape.group_size,
        shape.elements_per_sample,
    );
    table.iter().find(|e| e.key == key).map(|e| {
        let (bm, bn, bk) = e.block;
        KernelConfig::new(variant, bm, bn, bk).with_pipeline(e.num_warps, e.num_stages)
    })
}
