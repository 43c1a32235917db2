//! Reversed split-K program
//!
//! Program `(pid, pid_k)` reduces the two consecutive slices starting at
//! `2 * pid_k * BK` into one local accumulator and issues a single atomic add
//! per output cell. Tile location, dequantization and masking are shared with
//! the atomic split-K program.

use super::{AtomicOutput, KernelArgs, ProgramScratch, Tile};
use crate::dtype::Element;

/// Body of one reversed split-K program
pub(crate) fn program<A: Element, S: Element>(
    args: &KernelArgs<'_, A, S>,
    pid: usize,
    pid_k: usize,
    out: &AtomicOutput,
    scratch: &mut ProgramScratch,
) {
    let tile = Tile::locate(pid, &args.shape, &args.config);
    if tile.is_empty() {
        return;
    }
    let block_k = args.config.block_size_k;
    let k_start = pid_k * 2 * block_k;

    scratch.begin(&tile);
    args.accumulate_slice(&tile, k_start, scratch);
    args.accumulate_slice(&tile, k_start + block_k, scratch);
    args.store_tile(&tile, &scratch.acc, out);
}
