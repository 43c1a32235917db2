//! Quantized GEMV kernels
//!
//! CPU executor for the two split-K kernel families. Every grid program is a
//! pure function of its coordinates `(pid, pid_k)`: it loads an activation
//! tile and a packed-weight tile for its K-slice, dequantizes through the
//! shared [`Dequantizer`], reduces in `f32` and atomically adds the partial
//! tile into a pre-zeroed [`AtomicOutput`]. Programs never synchronize with
//! each other, so the grid is dispatched with rayon when the `parallel`
//! feature is enabled.
//!
//! ## Variants
//!
//! - [`KernelVariant::GemmSplitK`]: one `block_size_k` slice per program
//! - [`KernelVariant::GemvRevSplitK`]: two consecutive slices per program,
//!   summed locally before a single atomic add (halves the atomics for `M = 1`)
//!
//! Results are reproducible only up to floating-point summation order.

pub mod revsplitk;
pub mod splitk;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{AtomicMode, DotProductMode, KernelConfig, LoadOrder};
use crate::dtype::{DType, Element};
use crate::error::{RayoError, Result};
use crate::quant::{ChannelScaleMode, Dequantizer};
use crate::shape::ProblemShape;
use crate::tensor::Tensor;

/// Largest `M` routed to reversed split-K unless a launcher overrides it
pub const DEFAULT_REVSPLITK_MAX_M: usize = 1;

/// M tiles per swizzle group
pub const SWIZZLE_GROUP_M: usize = 8;

/// Kernel family, also the matmul tag of a [`ShapeSignature`](crate::ShapeSignature)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelVariant {
    /// Atomic split-K: one K-slice per program
    GemmSplitK,
    /// Reversed split-K: two K-slices per program, one atomic add
    GemvRevSplitK,
}

impl KernelVariant {
    /// Number of `block_size_k` slices each program reduces
    #[must_use]
    pub const fn split_factor(self) -> usize {
        match self {
            Self::GemmSplitK => 1,
            Self::GemvRevSplitK => 2,
        }
    }

    /// Kernel name used in cache keys and logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GemmSplitK => "GEMM_SPLITK",
            Self::GemvRevSplitK => "GEMV_REVSPLITK",
        }
    }

    /// Family picked for `m` activation rows: reversed split-K up to
    /// `revsplitk_max_m` rows, atomic split-K above
    #[must_use]
    pub const fn select_for(m: usize, revsplitk_max_m: usize) -> Self {
        if m <= revsplitk_max_m {
            Self::GemvRevSplitK
        } else {
            Self::GemmSplitK
        }
    }

    /// `block_size_m` the family runs with for `m` activation rows
    #[must_use]
    pub const fn block_size_m_for(self, m: usize) -> usize {
        match self {
            Self::GemvRevSplitK => 1,
            Self::GemmSplitK => {
                if m <= 16 {
                    16
                } else {
                    32
                }
            }
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map a linear program id to `(pid_m, pid_n)` with grouped M ordering
///
/// Consecutive ids walk down `group_m` M-tiles before moving to the next
/// N-tile, so neighbouring programs share weight columns.
#[must_use]
pub fn swizzle_tile(
    pid: usize,
    m: usize,
    n: usize,
    block_size_m: usize,
    block_size_n: usize,
    group_m: usize,
) -> (usize, usize) {
    let grid_m = m.div_ceil(block_size_m);
    let grid_n = n.div_ceil(block_size_n);
    let width = group_m * grid_n;
    let group_id = pid / width;
    let group_size = (grid_m - group_id * group_m).min(group_m);
    let pid_m = group_id * group_m + pid % group_size;
    let pid_n = (pid % width) / group_size;
    (pid_m, pid_n)
}

/// Launch grid: `(num_pid_m * num_pid_n) x num_pid_k` programs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGrid {
    /// Tiles along M
    pub num_pid_m: usize,
    /// Tiles along N
    pub num_pid_n: usize,
    /// Programs along K
    pub num_pid_k: usize,
}

impl LaunchGrid {
    /// Ceiling-divide the problem by the block sizes and split factor
    ///
    /// # Errors
    ///
    /// Returns `LaunchFailed` if a block size is zero or the grid is empty.
    pub fn new(shape: &ProblemShape, config: &KernelConfig) -> Result<Self> {
        if config.block_size_m == 0 || config.block_size_n == 0 || config.block_size_k == 0 {
            return Err(RayoError::LaunchFailed(format!(
                "Zero block size in {config:?}"
            )));
        }
        let k_step = config.block_size_k * config.variant.split_factor();
        let grid = Self {
            num_pid_m: shape.m.div_ceil(config.block_size_m),
            num_pid_n: shape.n.div_ceil(config.block_size_n),
            num_pid_k: shape.k.div_ceil(k_step),
        };
        if grid.total() == 0 {
            return Err(RayoError::LaunchFailed(format!(
                "Empty grid for M={}, N={}, K={}",
                shape.m, shape.n, shape.k
            )));
        }
        Ok(grid)
    }

    /// Size of grid axis 0
    #[must_use]
    pub const fn tiles(&self) -> usize {
        self.num_pid_m * self.num_pid_n
    }

    /// Total number of programs
    #[must_use]
    pub const fn total(&self) -> usize {
        self.tiles() * self.num_pid_k
    }

    /// `(pid, pid_k)` for a flat program index
    #[must_use]
    pub const fn coords(&self, index: usize) -> (usize, usize) {
        (index % self.tiles(), index / self.tiles())
    }
}

/// Output buffer accepting concurrent float additions
///
/// Cells hold `f32` bit patterns and are updated with a compare-exchange
/// loop, so the final value of a cell is the sum of its contributions in
/// whatever order they landed.
#[derive(Debug)]
pub struct AtomicOutput {
    rows: usize,
    cols: usize,
    cells: Vec<AtomicU32>,
}

impl AtomicOutput {
    /// Pre-zeroed `rows x cols` buffer
    #[must_use]
    pub fn zeroed(rows: usize, cols: usize) -> Self {
        let cells = (0..rows * cols).map(|_| AtomicU32::new(0)).collect();
        Self { rows, cols, cells }
    }

    /// Shape as (rows, cols)
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Zero every cell
    pub fn reset(&self) {
        for cell in &self.cells {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Atomically add `value` into cell `(row, col)`
    pub fn add(&self, row: usize, col: usize, value: f32, mode: AtomicMode) {
        let (set, fetch) = match mode {
            AtomicMode::Relaxed => (Ordering::Relaxed, Ordering::Relaxed),
            AtomicMode::Strict => (Ordering::AcqRel, Ordering::Acquire),
        };
        let cell = &self.cells[row * self.cols + col];
        let mut current = cell.load(fetch);
        loop {
            let next = (f32::from_bits(current) + value).to_bits();
            match cell.compare_exchange_weak(current, next, set, fetch) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current value of cell `(row, col)`
    #[must_use]
    pub fn load(&self, row: usize, col: usize) -> f32 {
        f32::from_bits(self.cells[row * self.cols + col].load(Ordering::Acquire))
    }

    /// Consume the buffer into a row-major `f32` tensor
    #[must_use]
    pub fn into_tensor(self) -> Tensor<f32> {
        let (rows, cols) = (self.rows, self.cols);
        let values = self
            .cells
            .into_iter()
            .map(|cell| f32::from_bits(cell.into_inner()))
            .collect::<Vec<_>>();
        Tensor::from_fn(rows, cols, |r, c| values[r * cols + c])
    }
}

/// Everything a grid program reads
///
/// Shapes and dtype combinations are validated by the launch driver before
/// one of these is built.
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs<'a, A, S> {
    /// `[M, K]` activations (any strides)
    pub activation: &'a Tensor<A>,
    /// `[K / eps, N]` packed weight words
    pub packed: &'a Tensor<u32>,
    /// `[groups, N]` scales, row 0 doubles as the weight channel scale
    pub scales: &'a Tensor<S>,
    /// `[M, 1]` activation channel scales
    pub activation_scales: Option<&'a Tensor<S>>,
    /// Per-group dequantization
    pub dequant: Dequantizer<'a, S>,
    /// Problem dimensions
    pub shape: ProblemShape,
    /// Execution configuration
    pub config: KernelConfig,
    /// Activation dtype (dot operands are rounded to it)
    pub input_dtype: DType,
    /// Accumulator dtype
    pub accum_dtype: DType,
    /// Metadata dtype (channel-scaled accumulators are rounded to it)
    pub meta_dtype: DType,
    /// Post-reduction channel scaling
    pub channel_scale_mode: ChannelScaleMode,
}

/// Clipped tile coordinates of one program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tile {
    pub m0: usize,
    pub n0: usize,
    pub m_len: usize,
    pub n_len: usize,
}

impl Tile {
    pub(crate) fn locate(pid: usize, shape: &ProblemShape, config: &KernelConfig) -> Self {
        let (pid_m, pid_n) = swizzle_tile(
            pid,
            shape.m,
            shape.n,
            config.block_size_m,
            config.block_size_n,
            SWIZZLE_GROUP_M,
        );
        let m0 = pid_m * config.block_size_m;
        let n0 = pid_n * config.block_size_n;
        Self {
            m0,
            n0,
            m_len: config.block_size_m.min(shape.m.saturating_sub(m0)),
            n_len: config.block_size_n.min(shape.n.saturating_sub(n0)),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.m_len == 0 || self.n_len == 0
    }
}

/// Buffers one worker reuses across the programs it runs
#[derive(Debug, Default)]
pub(crate) struct ProgramScratch {
    ks: Vec<usize>,
    n_offsets: Vec<usize>,
    words: Vec<u32>,
    a: Vec<f32>,
    b: Vec<f32>,
    pub(crate) acc: Vec<f32>,
}

impl ProgramScratch {
    /// Zero the accumulator and record the column offsets of `tile`
    pub(crate) fn begin(&mut self, tile: &Tile) {
        self.acc.clear();
        self.acc.resize(tile.m_len * tile.n_len, 0.0);
        self.n_offsets.clear();
        self.n_offsets.extend(tile.n0..tile.n0 + tile.n_len);
    }
}

impl<A: Element, S: Element> KernelArgs<'_, A, S> {
    fn load_activation(&self, tile: &Tile, ks: &[usize], a: &mut Vec<f32>) {
        a.clear();
        for m in tile.m0..tile.m0 + tile.m_len {
            a.extend(ks.iter().map(|&k| self.activation.at(m, k).to_f32()));
        }
    }

    fn load_weights(
        &self,
        ks: &[usize],
        n_offsets: &[usize],
        words: &mut Vec<u32>,
        b: &mut Vec<f32>,
    ) {
        let eps = self.dequant.params().elements_per_sample;
        words.clear();
        for &k in ks {
            words.extend(n_offsets.iter().map(|&n| self.packed.at(k / eps, n)));
        }
        b.clear();
        b.resize(ks.len() * n_offsets.len(), 0.0);
        self.dequant.dequantize_tile(words, ks, n_offsets, b);
    }

    /// Reduce the K-slice `[k_start, k_start + block_size_k)` into `scratch.acc`
    ///
    /// Out-of-range K lanes contribute zero. [`ProgramScratch::begin`] must
    /// have been called for `tile`.
    pub(crate) fn accumulate_slice(&self, tile: &Tile, k_start: usize, scratch: &mut ProgramScratch) {
        let k_end = (k_start + self.config.block_size_k).min(self.shape.k);
        if k_start >= k_end {
            return;
        }
        let ProgramScratch {
            ks,
            n_offsets,
            words,
            a,
            b,
            acc,
        } = scratch;
        ks.clear();
        ks.extend(k_start..k_end);

        match self.config.load_order {
            LoadOrder::AFirst => {
                self.load_activation(tile, ks, a);
                self.load_weights(ks, n_offsets, words, b);
            }
            LoadOrder::BFirst => {
                self.load_weights(ks, n_offsets, words, b);
                self.load_activation(tile, ks, a);
            }
        }

        if self.config.dot_product_mode == DotProductMode::DotInstruction {
            for v in b.iter_mut() {
                *v = self.input_dtype.round(*v);
            }
        }

        let k_len = ks.len();
        let n_len = tile.n_len;
        for i in 0..tile.m_len {
            let a_row = &a[i * k_len..(i + 1) * k_len];
            let acc_row = &mut acc[i * n_len..(i + 1) * n_len];
            for (kk, &av) in a_row.iter().enumerate() {
                let b_row = &b[kk * n_len..(kk + 1) * n_len];
                for (c, &bv) in acc_row.iter_mut().zip(b_row) {
                    *c += av * bv;
                }
            }
        }
    }

    /// Channel-scale, round to the accumulator dtype and atomically add
    pub(crate) fn store_tile(&self, tile: &Tile, acc: &[f32], out: &AtomicOutput) {
        let mode = self.channel_scale_mode;
        for i in 0..tile.m_len {
            let m = tile.m0 + i;
            let row_scale = match self.activation_scales {
                Some(sa) if mode.scales_activations() => sa.at(m, 0).to_f32(),
                _ => 1.0,
            };
            for j in 0..tile.n_len {
                let n = tile.n0 + j;
                let mut v = self.accum_dtype.round(acc[i * tile.n_len + j]);
                if mode != ChannelScaleMode::None {
                    let col_scale = if mode.scales_weights() {
                        self.scales.at(0, n).to_f32()
                    } else {
                        1.0
                    };
                    v = self.meta_dtype.round(v) * (row_scale * col_scale);
                }
                out.add(m, n, v, self.config.atomic_mode);
            }
        }
    }

    fn run_program(
        &self,
        grid: &LaunchGrid,
        index: usize,
        out: &AtomicOutput,
        scratch: &mut ProgramScratch,
    ) {
        let (pid, pid_k) = grid.coords(index);
        match self.config.variant {
            KernelVariant::GemmSplitK => splitk::program(self, pid, pid_k, out, scratch),
            KernelVariant::GemvRevSplitK => revsplitk::program(self, pid, pid_k, out, scratch),
        }
    }
}

/// Run every program of the grid into `out`
///
/// `out` must be zeroed and shaped `[M, N]`; contributions are summed into it.
///
/// # Errors
///
/// Returns `LaunchFailed` if the grid cannot be formed or `out` has the wrong
/// shape. A failed launch writes nothing.
pub fn execute<A: Element, S: Element>(args: &KernelArgs<'_, A, S>, out: &AtomicOutput) -> Result<()> {
    if out.shape() != (args.shape.m, args.shape.n) {
        return Err(RayoError::LaunchFailed(format!(
            "Output buffer {:?} does not match ({}, {})",
            out.shape(),
            args.shape.m,
            args.shape.n
        )));
    }
    let grid = LaunchGrid::new(&args.shape, &args.config)?;

    #[cfg(feature = "parallel")]
    (0..grid.total())
        .into_par_iter()
        .for_each_init(ProgramScratch::default, |scratch, index| {
            args.run_program(&grid, index, out, scratch);
        });

    #[cfg(not(feature = "parallel"))]
    {
        let mut scratch = ProgramScratch::default();
        for index in 0..grid.total() {
            args.run_program(&grid, index, out, &mut scratch);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_config, HardwareTier};
    use crate::quant::{
        elements_per_sample, pack_weights, unpack_mask, DequantParams, GroupMode, ZeroPoint,
    };
    use half::f16;
    use std::sync::Arc;

    #[test]
    fn test_variant_tags() {
        assert_eq!(KernelVariant::GemmSplitK.to_string(), "GEMM_SPLITK");
        assert_eq!(KernelVariant::GemvRevSplitK.split_factor(), 2);
        assert_eq!(
            KernelVariant::select_for(1, DEFAULT_REVSPLITK_MAX_M),
            KernelVariant::GemvRevSplitK
        );
        assert_eq!(
            KernelVariant::select_for(4, DEFAULT_REVSPLITK_MAX_M),
            KernelVariant::GemmSplitK
        );
        assert_eq!(KernelVariant::select_for(4, 4), KernelVariant::GemvRevSplitK);
        assert_eq!(KernelVariant::GemmSplitK.block_size_m_for(16), 16);
        assert_eq!(KernelVariant::GemmSplitK.block_size_m_for(17), 32);
    }

    #[test]
    fn test_swizzle_covers_every_tile_once() {
        let (m, n, bm, bn): (usize, usize, usize, usize) = (100, 130, 16, 64);
        let grid_m = m.div_ceil(bm);
        let grid_n = n.div_ceil(bn);
        let mut seen = vec![false; grid_m * grid_n];
        for pid in 0..grid_m * grid_n {
            let (pm, pn) = swizzle_tile(pid, m, n, bm, bn, SWIZZLE_GROUP_M);
            assert!(pm < grid_m && pn < grid_n, "pid {pid} -> ({pm}, {pn})");
            assert!(!seen[pm * grid_n + pn], "tile ({pm}, {pn}) visited twice");
            seen[pm * grid_n + pn] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_swizzle_single_row_is_linear() {
        for pid in 0..5 {
            assert_eq!(swizzle_tile(pid, 1, 320, 1, 64, SWIZZLE_GROUP_M), (0, pid));
        }
    }

    #[test]
    fn test_launch_grid_dimensions() {
        let shape = ProblemShape::new(1, 130, 4096, 128, 8);
        let mut config = default_config(KernelVariant::GemvRevSplitK, HardwareTier::Generic);
        config.block_size_n = 64;
        config.block_size_k = 32;
        let grid = LaunchGrid::new(&shape, &config).unwrap();
        assert_eq!(grid.num_pid_n, 3);
        assert_eq!(grid.num_pid_k, 64);
        assert_eq!(grid.coords(grid.tiles() + 2), (2, 1));

        config.block_size_k = 0;
        assert!(matches!(
            LaunchGrid::new(&shape, &config),
            Err(RayoError::LaunchFailed(_))
        ));
    }

    #[test]
    fn test_atomic_output_sums_four_slices() {
        let out = Arc::new(AtomicOutput::zeroed(1, 1));
        let handles: Vec<_> = [1.0f32, 2.0, 3.0, 4.0]
            .into_iter()
            .map(|v| {
                let out = Arc::clone(&out);
                std::thread::spawn(move || out.add(0, 0, v, AtomicMode::Relaxed))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!((out.load(0, 0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_atomic_output_reset_and_strict_mode() {
        let out = AtomicOutput::zeroed(2, 3);
        out.add(1, 2, 1.5, AtomicMode::Strict);
        out.add(1, 2, 1.5, AtomicMode::Strict);
        assert_eq!(out.load(1, 2), 3.0);
        out.reset();
        assert_eq!(out.load(1, 2), 0.0);
        out.add(0, 1, -2.0, AtomicMode::Relaxed);
        let t = out.into_tensor();
        assert_eq!(t.to_vec(), vec![0.0, -2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_reused_scratch_matches_fresh_buffers() {
        // N = 40 with BN = 32 leaves a narrow tail tile after a full one, so
        // the shared buffers shrink and grow between programs
        let (m, n, k) = (3, 40, 64);
        let activation: Tensor<f16> =
            Tensor::from_fn(m, k, |r, c| f16::from_f32(((r + c) % 5) as f32 - 2.0));
        let q = Tensor::from_fn(k, n, |kk, nn| ((kk * 3 + nn) % 16) as u8);
        let packed = pack_weights(&q, 4).unwrap();
        let scales: Tensor<f16> = Tensor::full(2, n, f16::from_f32(0.5));
        let params = DequantParams {
            bit_width: 4,
            unpack_mask: unpack_mask(4),
            elements_per_sample: elements_per_sample(4),
            group_size: 32,
        };
        let shape = ProblemShape::new(m, n, k, 32, 8);
        for variant in [KernelVariant::GemmSplitK, KernelVariant::GemvRevSplitK] {
            let mut config = default_config(variant, HardwareTier::Generic);
            config.block_size_m = variant.block_size_m_for(m);
            config.block_size_n = 32;
            config.block_size_k = 16;
            let args = KernelArgs {
                activation: &activation,
                packed: &packed,
                scales: &scales,
                activation_scales: None,
                dequant: Dequantizer::new(params, GroupMode::NoZero, &scales, ZeroPoint::Absent),
                shape,
                config,
                input_dtype: DType::F16,
                accum_dtype: DType::F32,
                meta_dtype: DType::F16,
                channel_scale_mode: ChannelScaleMode::None,
            };
            let grid = LaunchGrid::new(&shape, &config).unwrap();

            let shared = AtomicOutput::zeroed(m, n);
            let mut scratch = ProgramScratch::default();
            let fresh = AtomicOutput::zeroed(m, n);
            for index in 0..grid.total() {
                args.run_program(&grid, index, &shared, &mut scratch);
                args.run_program(&grid, index, &fresh, &mut ProgramScratch::default());
            }
            assert_eq!(shared.into_tensor().to_vec(), fresh.into_tensor().to_vec(), "{variant}");
        }
    }
}
