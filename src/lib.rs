//! # rayo: Fused Dequantize-GEMV for Weight-Only Quantized Inference
//!
//! Multiplies half-precision activations by weights packed at 1, 2, 4 or 8
//! bits per value inside `u32` words, dequantizing on the fly with per-group
//! scale / zero-point metadata.
//!
//! Two split-K kernel families share one dequantization engine:
//!
//! - **atomic split-K**: every program reduces one K-slice and atomically
//!   adds its partial tile into the output
//! - **reversed split-K**: every program reduces two consecutive K-slices
//!   and issues a single atomic add, the better fit for `M = 1`
//!
//! The best configuration per shape is found by pruned, timed search and
//! memoized in a process-wide [`ConfigCache`].
//!
//! ## Quick Start
//!
//! ```rust
//! use half::f16;
//! use rayo::autotune::{AutotuneSettings, Autotuner};
//! use rayo::launch::{ForwardArgs, Launcher};
//! use rayo::quant::pack_weights;
//! use rayo::Tensor;
//!
//! let x: Tensor<f16> = Tensor::full(1, 64, f16::ONE);
//! let w = pack_weights(&Tensor::full(64, 8, 1u8), 4).unwrap();
//! let scales: Tensor<f16> = Tensor::full(1, 8, f16::ONE);
//!
//! let launcher = Launcher::new(Autotuner::new(AutotuneSettings::disabled()));
//! let y = launcher
//!     .forward(&ForwardArgs::new(&x, &w, &scales, 4, 64))
//!     .unwrap()
//!     .to_f32();
//! assert!((y.get(0, 3).unwrap() - 64.0).abs() < 1e-2);
//! ```
//!
//! ## Modules
//!
//! - [`quant`] - packing and the dequantization engine
//! - [`kernels`] - split-K programs, launch grid, atomic output
//! - [`config`] - configuration space, pruner, default and pre-tuned configs
//! - [`autotune`] - benchmarking strategies and the search driver
//! - [`cache`] - shape-keyed configuration memo
//! - [`launch`] - validation and dispatch (`forward`, `forward_shape`)
//! - [`reference`] - scalar reference implementation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Precision loss in u32 -> f32 of unpacked integers is bounded by the bit width
#![allow(clippy::cast_precision_loss)]
// Shift amounts and unpacked values fit in u32 / u8
#![allow(clippy::cast_possible_truncation)]
// Config and tensor names in docs are not all code spans
#![allow(clippy::doc_markdown)]
// Index-based loops mirror the tile math
#![allow(clippy::needless_range_loop)]
#![allow(clippy::module_name_repetitions)]

pub mod autotune;
pub mod cache;
pub mod config;
pub mod dtype;
pub mod error;
pub mod kernels;
pub mod launch;
pub mod quant;
pub mod reference;
pub mod shape;
pub mod tensor;

pub use autotune::{AutotuneSettings, Autotuner, Benchmarker, FirstViable, TimedSearch};
pub use cache::ConfigCache;
pub use config::{
    default_config, AtomicMode, ConfigPruner, ConfigSpace, DotProductMode, EvictionPolicy,
    HardwareTier, KernelConfig, LoadOrder, PrunerParams,
};
pub use dtype::{DType, Element};
pub use error::{RayoError, Result};
pub use kernels::KernelVariant;
pub use launch::{forward, forward_shape, ForwardArgs, Launcher, OutputTensor};
pub use quant::{ChannelScaleMode, GroupMode};
pub use shape::{ProblemShape, ShapeSignature};
pub use tensor::Tensor;
