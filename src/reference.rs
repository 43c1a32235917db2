//! Scalar reference: unpack, dequantize, multiply, sum
//!
//! Straight triple loop in `f32` with no tiling, splitting or atomics. Kernel
//! outputs are compared against it with a tolerance.

use crate::dtype::Element;
use crate::error::Result;
use crate::launch::ForwardArgs;
use crate::quant::pack::{shift_for, unpack};
use crate::quant::GroupMode;
use crate::tensor::Tensor;

/// Dequantize the packed weights into a dense `[K, N]` `f32` matrix
///
/// # Errors
///
/// Returns the validation error of `args`.
pub fn dequantize_weights<A: Element, S: Element>(args: &ForwardArgs<'_, A, S>) -> Result<Tensor<f32>> {
    let shape = args.validate()?;
    let eps = args.elements_per_sample;
    let zero = |g: usize, n: usize| -> f32 {
        match args.zeros {
            Some(z) if args.zero_is_scalar => z.at(0, 0).to_f32(),
            Some(z) => z.at(g, n).to_f32(),
            None => 0.0,
        }
    };
    Ok(Tensor::from_fn(shape.k, shape.n, |k, n| {
        let word = args.packed_weights.at(k / eps, n);
        let q = unpack(word, shift_for(k, eps, args.bit_width), args.unpack_mask) as f32;
        let g = k / args.group_size;
        let scale = || args.scales.at(g, n).to_f32();
        match args.group_mode {
            GroupMode::NoZero => q * scale(),
            GroupMode::ScalarZero | GroupMode::PerGroupZero => (q - zero(g, n)) * scale(),
            GroupMode::ShiftOnly => q - zero(g, n),
            GroupMode::Fma => q * scale() + zero(g, n),
        }
    }))
}

/// Reference `[M, N]` result in `f32`, bias and channel scales included
///
/// # Errors
///
/// Returns the validation error of `args`.
pub fn reference_forward<A: Element, S: Element>(args: &ForwardArgs<'_, A, S>) -> Result<Tensor<f32>> {
    let w = dequantize_weights(args)?;
    let (m, k) = args.activation.shape();
    let n = w.cols();
    let bias = args.dump_bias_value.unwrap_or(0.0);
    let mode = args.channel_scale_mode;

    Ok(Tensor::from_fn(m, n, |i, j| {
        let mut acc = 0.0f32;
        for kk in 0..k {
            acc += args.activation.at(i, kk).to_f32() * w.at(kk, j);
        }
        if mode.scales_weights() {
            acc *= args.scales.at(0, j).to_f32();
        }
        if mode.scales_activations() {
            if let Some(sa) = args.activation_scales {
                acc *= sa.at(i, 0).to_f32();
            }
        }
        acc + bias
    }))
}
