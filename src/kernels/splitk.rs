//! Atomic split-K program
//!
//! Program `(pid, pid_k)` owns output tile `pid` and reduction slice
//! `[pid_k * BK, (pid_k + 1) * BK)`. Its partial tile is atomically added into
//! the output, so `num_pid_k` programs contribute to every output cell.

use super::{AtomicOutput, KernelArgs, ProgramScratch, Tile};
use crate::dtype::Element;

/// Body of one atomic split-K program
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
    scratch.begin(&tile);
    args.accumulate_slice(&tile, pid_k * args.config.block_size_k, scratch);
    args.store_tile(&tile, &scratch.acc, out);
}
