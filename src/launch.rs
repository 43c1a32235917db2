//! Launch driver
//!
//! Validates a call, picks the kernel family, resolves a configuration through
//! the [`Autotuner`], runs the grid into a zeroed atomic buffer and finalizes
//! the output (bias, dtype conversion).
//!
//! # Example
//!
//! ```
//! use half::f16;
//! use rayo::autotune::{AutotuneSettings, Autotuner};
//! use rayo::launch::{ForwardArgs, Launcher};
//! use rayo::quant::pack_weights;
//! use rayo::Tensor;
//!
//! // y = x @ W with 4-bit weights, K = 32, N = 4, one group
//! let x: Tensor<f16> = Tensor::full(1, 32, f16::ONE);
//! let w = pack_weights(&Tensor::full(32, 4, 3u8), 4).unwrap();
//! let scales: Tensor<f16> = Tensor::full(1, 4, f16::from_f32(0.5));
//!
//! let launcher = Launcher::new(Autotuner::new(AutotuneSettings::disabled()));
//! let args = ForwardArgs::new(&x, &w, &scales, 4, 32);
//! let y = launcher.forward(&args).unwrap().to_f32();
//! assert_eq!(y.shape(), (1, 4));
//! assert!((y.get(0, 0).unwrap() - 48.0).abs() < 1e-2);
//! ```

use half::{bf16, f16};
use tracing::instrument;

use crate::autotune::{AutotuneSettings, Autotuner};
use crate::config::KernelConfig;
use crate::dtype::{DType, Element};
use crate::error::{RayoError, Result};
use crate::kernels::{self, AtomicOutput, KernelArgs, KernelVariant, DEFAULT_REVSPLITK_MAX_M};
use crate::quant::pack::{check_bit_width, elements_per_sample, unpack_mask};
use crate::quant::{ChannelScaleMode, DequantParams, Dequantizer, GroupMode, ZeroPoint};
use crate::shape::ProblemShape;
use crate::tensor::Tensor;

/// Arguments of one quantized matmul call
///
/// Activation element type `A` and metadata element type `S` must agree with
/// `input_dtype` and `meta_dtype`.
#[derive(Debug, Clone, Copy)]
pub struct ForwardArgs<'a, A, S> {
    /// `[M, K]` activations
    pub activation: &'a Tensor<A>,
    /// `[K / elements_per_sample, N]` packed weights
    pub packed_weights: &'a Tensor<u32>,
    /// `[K / group_size, N]` scales (`[1, N]` suffices when no group mode reads them)
    pub scales: &'a Tensor<S>,
    /// `[K / group_size, N]` zero-points, or a single element when `zero_is_scalar`
    pub zeros: Option<&'a Tensor<S>>,
    /// `[M, 1]` activation channel scales
    pub activation_scales: Option<&'a Tensor<S>>,
    /// Bits per weight value
    pub bit_width: u32,
    /// K elements per metadata group
    pub group_size: usize,
    /// `2^bit_width - 1`
    pub unpack_mask: u32,
    /// Values per packed word
    pub elements_per_sample: usize,
    /// Activation dtype
    pub input_dtype: DType,
    /// Output dtype
    pub output_dtype: DType,
    /// Accumulator dtype
    pub accum_dtype: DType,
    /// Scale / zero-point dtype
    pub meta_dtype: DType,
    /// Post-reduction channel scaling
    pub channel_scale_mode: ChannelScaleMode,
    /// Per-group dequantization formula
    pub group_mode: GroupMode,
    /// Zero-point is a single broadcast value
    pub zero_is_scalar: bool,
    /// Activation is plain row-major
    pub data_contiguous: bool,
    /// Bias added to every output element
    pub dump_bias_value: Option<f32>,
}

impl<'a, A: Element, S: Element> ForwardArgs<'a, A, S> {
    /// Arguments with derived packing constants and no zero-point, channel
    /// scaling or bias
    #[must_use]
    pub fn new(
        activation: &'a Tensor<A>,
        packed_weights: &'a Tensor<u32>,
        scales: &'a Tensor<S>,
        bit_width: u32,
        group_size: usize,
    ) -> Self {
        Self {
            activation,
            packed_weights,
            scales,
            zeros: None,
            activation_scales: None,
            bit_width,
            group_size,
            unpack_mask: unpack_mask(bit_width.clamp(1, 32)),
            elements_per_sample: elements_per_sample(bit_width.clamp(1, 32)),
            input_dtype: A::DTYPE,
            output_dtype: A::DTYPE,
            accum_dtype: DType::F32,
            meta_dtype: S::DTYPE,
            channel_scale_mode: ChannelScaleMode::None,
            group_mode: GroupMode::NoZero,
            zero_is_scalar: false,
            data_contiguous: activation.is_contiguous(),
            dump_bias_value: None,
        }
    }

    /// Per-group zero-points with the given group mode
    #[must_use]
    pub fn with_zeros(mut self, zeros: &'a Tensor<S>, group_mode: GroupMode) -> Self {
        self.zeros = Some(zeros);
        self.group_mode = group_mode;
        self.zero_is_scalar = false;
        self
    }

    /// Single broadcast zero-point (`zero` is a one-element tensor)
    #[must_use]
    pub fn with_scalar_zero(mut self, zero: &'a Tensor<S>, group_mode: GroupMode) -> Self {
        self.zeros = Some(zero);
        self.group_mode = group_mode;
        self.zero_is_scalar = true;
        self
    }

    /// Set the group mode
    #[must_use]
    pub fn with_group_mode(mut self, group_mode: GroupMode) -> Self {
        self.group_mode = group_mode;
        self
    }

    /// Channel scaling, with activation scales when the mode reads them
    #[must_use]
    pub fn with_channel_scale(
        mut self,
        mode: ChannelScaleMode,
        activation_scales: Option<&'a Tensor<S>>,
    ) -> Self {
        self.channel_scale_mode = mode;
        self.activation_scales = activation_scales;
        self
    }

    /// Set the output dtype
    #[must_use]
    pub fn with_output_dtype(mut self, dtype: DType) -> Self {
        self.output_dtype = dtype;
        self
    }

    /// Set the accumulator dtype
    #[must_use]
    pub fn with_accum_dtype(mut self, dtype: DType) -> Self {
        self.accum_dtype = dtype;
        self
    }

    /// Declare whether the activation is plain row-major
    #[must_use]
    pub fn with_data_contiguous(mut self, contiguous: bool) -> Self {
        self.data_contiguous = contiguous;
        self
    }

    /// Add `bias` to every output element
    #[must_use]
    pub fn with_bias(mut self, bias: f32) -> Self {
        self.dump_bias_value = Some(bias);
        self
    }

    fn check_dtypes(&self) -> Result<()> {
        if !self.input_dtype.is_half() {
            return Err(RayoError::UnsupportedConfig(format!(
                "input dtype {} (expected float16 or bfloat16)",
                self.input_dtype
            )));
        }
        if A::DTYPE != self.input_dtype {
            return Err(RayoError::UnsupportedConfig(format!(
                "activation elements are {} but input dtype is {}",
                A::DTYPE,
                self.input_dtype
            )));
        }
        if S::DTYPE != self.meta_dtype {
            return Err(RayoError::UnsupportedConfig(format!(
                "metadata elements are {} but meta dtype is {}",
                S::DTYPE,
                self.meta_dtype
            )));
        }
        match (self.accum_dtype, self.input_dtype) {
            (DType::F32, _) | (DType::F16, DType::F16) => Ok(()),
            (accum, input) => Err(RayoError::UnsupportedConfig(format!(
                "accumulator {accum} with input {input}"
            ))),
        }
    }

    fn check_quant(&self) -> Result<()> {
        check_bit_width(self.bit_width)?;
        if self.unpack_mask != unpack_mask(self.bit_width) {
            return Err(RayoError::InvalidInput(format!(
                "unpack mask {:#x} does not match {} bits",
                self.unpack_mask, self.bit_width
            )));
        }
        if self.elements_per_sample != elements_per_sample(self.bit_width) {
            return Err(RayoError::InvalidInput(format!(
                "{} values per word does not match {} bits",
                self.elements_per_sample, self.bit_width
            )));
        }
        if self.group_size == 0 {
            return Err(RayoError::InvalidInput("group size must be positive".into()));
        }
        match (self.group_mode, self.zero_is_scalar) {
            (GroupMode::ScalarZero, false) => Err(RayoError::UnsupportedConfig(
                "scalar-zero group mode requires a scalar zero-point".into(),
            )),
            (GroupMode::PerGroupZero, true) => Err(RayoError::UnsupportedConfig(
                "per-group-zero group mode requires a zero-point tensor".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Validate the call and derive its problem shape
    ///
    /// # Errors
    ///
    /// `UnsupportedConfig` for dtype or group-mode combinations the kernels
    /// cannot run, `InvalidInput` / `SizeMismatch` for malformed tensors.
    pub fn validate(&self) -> Result<ProblemShape> {
        self.check_dtypes()?;
        self.check_quant()?;

        let (m, k) = self.activation.shape();
        let n = self.packed_weights.cols();
        if m == 0 || n == 0 || k == 0 {
            return Err(RayoError::InvalidInput(format!(
                "empty problem M={m}, N={n}, K={k}"
            )));
        }
        if self.data_contiguous && !self.activation.is_contiguous() {
            return Err(RayoError::InvalidInput(
                "activation declared contiguous but has strides".into(),
            ));
        }
        let eps = self.elements_per_sample;
        if k % eps != 0 {
            return Err(RayoError::InvalidInput(format!(
                "K={k} is not a multiple of {eps} values per word"
            )));
        }
        let shape = ProblemShape::new(m, n, k, self.group_size, eps);

        expect_size("packed_weights.rows", shape.packed_rows(), self.packed_weights.rows())?;
        expect_size("scales.cols", n, self.scales.cols())?;
        if self.group_mode.uses_scales() {
            expect_size("scales.rows", shape.num_groups(), self.scales.rows())?;
        } else if self.channel_scale_mode.scales_weights() && self.scales.rows() == 0 {
            expect_size("scales.rows", 1, 0)?;
        }

        if self.group_mode.uses_zeros() {
            let zeros = self.zeros.ok_or_else(|| {
                RayoError::InvalidInput(format!("{:?} group mode needs zero-points", self.group_mode))
            })?;
            if self.zero_is_scalar {
                expect_size("zeros.numel", 1, zeros.numel())?;
            } else {
                expect_size("zeros.rows", shape.num_groups(), zeros.rows())?;
                expect_size("zeros.cols", n, zeros.cols())?;
            }
        }

        if self.channel_scale_mode.scales_activations() {
            let sa = self.activation_scales.ok_or_else(|| {
                RayoError::InvalidInput(format!(
                    "{:?} channel scaling needs activation scales",
                    self.channel_scale_mode
                ))
            })?;
            expect_size("activation_scales.rows", m, sa.rows())?;
            expect_size("activation_scales.cols", 1, sa.cols())?;
        }

        Ok(shape)
    }

    fn zero_point(&self) -> ZeroPoint<'a, S> {
        match (self.group_mode.uses_zeros(), self.zeros) {
            (true, Some(z)) if self.zero_is_scalar => ZeroPoint::Scalar(z.at(0, 0).to_f32()),
            (true, Some(z)) => ZeroPoint::PerGroup(z),
            _ => ZeroPoint::Absent,
        }
    }

    fn kernel_args(&self, shape: ProblemShape, config: KernelConfig) -> KernelArgs<'a, A, S> {
        let params = DequantParams {
            bit_width: self.bit_width,
            unpack_mask: self.unpack_mask,
            elements_per_sample: self.elements_per_sample,
            group_size: self.group_size,
        };
        KernelArgs {
            activation: self.activation,
            packed: self.packed_weights,
            scales: self.scales,
            activation_scales: self.activation_scales,
            dequant: Dequantizer::new(params, self.group_mode, self.scales, self.zero_point()),
            shape,
            config,
            input_dtype: self.input_dtype,
            accum_dtype: self.accum_dtype,
            meta_dtype: self.meta_dtype,
            channel_scale_mode: self.channel_scale_mode,
        }
    }

    fn finalize(&self, out: AtomicOutput) -> OutputTensor {
        let bias = self.dump_bias_value.unwrap_or(0.0);
        let values = out.into_tensor();
        OutputTensor::from_f32(&values.map(|v| v + bias), self.output_dtype)
    }
}

fn expect_size(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RayoError::SizeMismatch {
            what,
            expected,
            actual,
        })
    }
}

/// `[M, N]` result in the requested output dtype
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTensor {
    /// Half precision output
    F16(Tensor<f16>),
    /// bfloat16 output
    BF16(Tensor<bf16>),
    /// Single precision output
    F32(Tensor<f32>),
}

impl OutputTensor {
    fn from_f32(values: &Tensor<f32>, dtype: DType) -> Self {
        match dtype {
            DType::F16 => Self::F16(values.map(f16::from_f32)),
            DType::BF16 => Self::BF16(values.map(bf16::from_f32)),
            DType::F32 => Self::F32(values.clone()),
        }
    }

    /// Zero-filled output
    #[must_use]
    pub fn zeros(rows: usize, cols: usize, dtype: DType) -> Self {
        Self::from_f32(&Tensor::full(rows, cols, 0.0), dtype)
    }

    /// Element dtype
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::F16(_) => DType::F16,
            Self::BF16(_) => DType::BF16,
            Self::F32(_) => DType::F32,
        }
    }

    /// Shape as (M, N)
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::F16(t) => t.shape(),
            Self::BF16(t) => t.shape(),
            Self::F32(t) => t.shape(),
        }
    }

    /// Widen to `f32`
    #[must_use]
    pub fn to_f32(&self) -> Tensor<f32> {
        match self {
            Self::F16(t) => t.to_f32(),
            Self::BF16(t) => t.to_f32(),
            Self::F32(t) => t.clone(),
        }
    }
}

/// Kernel dispatcher bound to an autotuner
#[derive(Debug)]
pub struct Launcher {
    tuner: Autotuner,
    variant_override: Option<KernelVariant>,
    revsplitk_max_m: usize,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new(Autotuner::new(AutotuneSettings::from_env()))
    }
}

impl Launcher {
    /// Launcher resolving configurations through `tuner`
    #[must_use]
    pub fn new(tuner: Autotuner) -> Self {
        Self {
            tuner,
            variant_override: None,
            revsplitk_max_m: DEFAULT_REVSPLITK_MAX_M,
        }
    }

    /// Always launch `variant` instead of choosing from `M`
    #[must_use]
    pub fn with_variant(mut self, variant: KernelVariant) -> Self {
        self.variant_override = Some(variant);
        self
    }

    /// Route shapes with up to `max_m` activation rows to reversed split-K
    ///
    /// Defaults to [`DEFAULT_REVSPLITK_MAX_M`]. Ignored when a variant is
    /// forced with [`Launcher::with_variant`].
    #[must_use]
    pub fn with_revsplitk_max_m(mut self, max_m: usize) -> Self {
        self.revsplitk_max_m = max_m;
        self
    }

    /// Autotuner in use
    #[must_use]
    pub fn tuner(&self) -> &Autotuner {
        &self.tuner
    }

    /// Kernel family for `m` activation rows
    #[must_use]
    pub fn variant_for(&self, m: usize) -> KernelVariant {
        self.variant_override
            .unwrap_or_else(|| KernelVariant::select_for(m, self.revsplitk_max_m))
    }

    /// Compute `activation @ dequantize(packed_weights)`
    ///
    /// # Errors
    ///
    /// Validation errors, `NoViableConfig` from the search, or
    /// `LaunchFailed` from the final launch.
    #[instrument(
        skip(self, args),
        fields(
            m = args.activation.rows(),
            n = args.packed_weights.cols(),
            k = args.activation.cols(),
            group_size = args.group_size,
            bits = args.bit_width
        )
    )]
    pub fn forward<A: Element, S: Element>(&self, args: &ForwardArgs<'_, A, S>) -> Result<OutputTensor> {
        let shape = args.validate()?;
        let variant = self.variant_for(shape.m);

        // only allocated if the tuner actually runs a candidate
        let mut scratch = None;
        let config = self.tuner.resolve(&shape, variant, &mut |candidate| {
            let buffer = trial_output(&mut scratch, &shape);
            kernels::execute(&args.kernel_args(shape, *candidate), buffer)
        })?;

        let out = AtomicOutput::zeroed(shape.m, shape.n);
        kernels::execute(&args.kernel_args(shape, config), &out)?;
        Ok(args.finalize(out))
    }

    /// Run with an explicit configuration, bypassing the tuner
    ///
    /// # Errors
    ///
    /// Validation errors or `LaunchFailed`.
    pub fn run_with_config<A: Element, S: Element>(
        &self,
        args: &ForwardArgs<'_, A, S>,
        config: &KernelConfig,
    ) -> Result<OutputTensor> {
        let shape = args.validate()?;
        let out = AtomicOutput::zeroed(shape.m, shape.n);
        kernels::execute(&args.kernel_args(shape, *config), &out)?;
        Ok(args.finalize(out))
    }

    /// Output buffer `forward` would produce, without computing it
    ///
    /// # Errors
    ///
    /// The same validation errors as [`Launcher::forward`].
    pub fn forward_shape<A: Element, S: Element>(
        &self,
        args: &ForwardArgs<'_, A, S>,
    ) -> Result<OutputTensor> {
        forward_shape(args)
    }
}

/// Zeroed trial buffer, created on first use and reused after
fn trial_output<'s>(slot: &'s mut Option<AtomicOutput>, shape: &ProblemShape) -> &'s AtomicOutput {
    let buffer = slot.get_or_insert_with(|| AtomicOutput::zeroed(shape.m, shape.n));
    buffer.reset();
    buffer
}

/// [`Launcher::forward`] on a default launcher (process-wide cache)
///
/// # Errors
///
/// See [`Launcher::forward`].
pub fn forward<A: Element, S: Element>(args: &ForwardArgs<'_, A, S>) -> Result<OutputTensor> {
    Launcher::default().forward(args)
}

/// Zero-filled `[M, N]` buffer in the output dtype, after validation
///
/// # Errors
///
/// The same validation errors as [`Launcher::forward`].
pub fn forward_shape<A: Element, S: Element>(
    args: &ForwardArgs<'_, A, S>,
) -> Result<OutputTensor> {
    let shape = args.validate()?;
    Ok(OutputTensor::zeros(shape.m, shape.n, args.output_dtype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autotune::FirstViable;
    use crate::cache::ConfigCache;
    use crate::config::{default_config, HardwareTier};
    use crate::quant::pack_weights;
    use std::sync::Arc;

    fn launcher(settings: AutotuneSettings) -> Launcher {
        Launcher::new(
            Autotuner::new(settings)
                .with_cache(Arc::new(ConfigCache::new()))
                .with_benchmarker(Box::new(FirstViable)),
        )
    }

    struct Fixture {
        x: Tensor<f16>,
        w: Tensor<u32>,
        scales: Tensor<f16>,
    }

    fn fixture(m: usize, n: usize, k: usize) -> Fixture {
        Fixture {
            x: Tensor::full(m, k, f16::ONE),
            w: pack_weights(&Tensor::full(k, n, 2u8), 4).unwrap(),
            scales: Tensor::full(k / 32, n, f16::from_f32(0.25)),
        }
    }

    #[test]
    fn test_forward_shape_no_compute() {
        let f = fixture(3, 40, 64);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32).with_output_dtype(DType::BF16);
        let out = forward_shape(&args).unwrap();
        assert_eq!(out.shape(), (3, 40));
        assert_eq!(out.dtype(), DType::BF16);
        assert!(out.to_f32().to_vec().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_forward_with_default_config() {
        let f = fixture(1, 40, 64);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32);
        let out = launcher(AutotuneSettings::disabled()).forward(&args).unwrap();
        assert_eq!(out.dtype(), DType::F16);
        // 64 * 2 * 0.25
        for v in out.to_f32().to_vec() {
            assert!((v - 32.0).abs() < 1e-2, "v={v}");
        }
    }

    #[test]
    fn test_bias_added_once() {
        let f = fixture(2, 8, 64);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32)
            .with_output_dtype(DType::F32)
            .with_bias(1.5);
        let config = default_config(KernelVariant::GemmSplitK, HardwareTier::Generic);
        let out = launcher(AutotuneSettings::disabled())
            .run_with_config(&args, &config)
            .unwrap();
        for v in out.to_f32().to_vec() {
            assert!((v - 33.5).abs() < 1e-3, "v={v}");
        }
    }

    #[test]
    fn test_group_mode_pairing_rejected() {
        let f = fixture(1, 8, 64);
        let zeros: Tensor<f16> = Tensor::full(2, 8, f16::ONE);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32)
            .with_zeros(&zeros, GroupMode::ScalarZero);
        assert!(matches!(args.validate(), Err(RayoError::UnsupportedConfig(_))));

        let scalar: Tensor<f16> = Tensor::full(1, 1, f16::ONE);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32)
            .with_scalar_zero(&scalar, GroupMode::PerGroupZero);
        assert!(matches!(args.validate(), Err(RayoError::UnsupportedConfig(_))));
    }

    #[test]
    fn test_dtype_combinations() {
        let f = fixture(1, 8, 64);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32).with_accum_dtype(DType::F16);
        assert!(args.validate().is_ok());

        let xb: Tensor<bf16> = Tensor::full(1, 64, bf16::ONE);
        let args = ForwardArgs::new(&xb, &f.w, &f.scales, 4, 32).with_accum_dtype(DType::F16);
        assert!(matches!(args.validate(), Err(RayoError::UnsupportedConfig(_))));

        let xf: Tensor<f32> = Tensor::full(1, 64, 1.0);
        let args = ForwardArgs::new(&xf, &f.w, &f.scales, 4, 32);
        assert!(matches!(args.validate(), Err(RayoError::UnsupportedConfig(_))));

        let mut args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32);
        args.meta_dtype = DType::F32;
        assert!(matches!(args.validate(), Err(RayoError::UnsupportedConfig(_))));
    }

    #[test]
    fn test_shape_mismatches() {
        let f = fixture(1, 8, 64);
        let bad_scales: Tensor<f16> = Tensor::full(3, 8, f16::ONE);
        let args = ForwardArgs::new(&f.x, &f.w, &bad_scales, 4, 32);
        assert_eq!(
            args.validate(),
            Err(RayoError::SizeMismatch {
                what: "scales.rows",
                expected: 2,
                actual: 3
            })
        );

        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32)
            .with_channel_scale(ChannelScaleMode::ActivationOnly, None);
        assert!(matches!(args.validate(), Err(RayoError::InvalidInput(_))));

        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 3, 32);
        assert!(matches!(args.validate(), Err(RayoError::InvalidInput(_))));
    }

    #[test]
    fn test_contiguity_flag_checked() {
        let f = fixture(2, 8, 64);
        // [2, 64] view over column-major storage
        let xt: Tensor<f16> = Tensor::full(64, 2, f16::ONE).transpose();
        let args = ForwardArgs::new(&xt, &f.w, &f.scales, 4, 32);
        assert!(!args.data_contiguous);
        assert!(args.validate().is_ok());
        let args = args.with_data_contiguous(true);
        assert!(matches!(args.validate(), Err(RayoError::InvalidInput(_))));
    }

    #[test]
    fn test_revsplitk_row_threshold() {
        let l = launcher(AutotuneSettings::disabled()).with_revsplitk_max_m(4);
        assert_eq!(l.variant_for(3), KernelVariant::GemvRevSplitK);
        assert_eq!(l.variant_for(4), KernelVariant::GemvRevSplitK);
        assert_eq!(l.variant_for(5), KernelVariant::GemmSplitK);

        // M = 3 through reversed split-K still matches the closed form
        let f = fixture(3, 40, 64);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32).with_output_dtype(DType::F32);
        let out = l.forward(&args).unwrap();
        for v in out.to_f32().to_vec() {
            assert!((v - 32.0).abs() < 1e-3, "v={v}");
        }
    }

    #[test]
    fn test_trial_output_created_lazily_and_rezeroed() {
        let shape = ProblemShape::new(2, 3, 64, 32, 8);
        let mut slot = None;
        trial_output(&mut slot, &shape).add(1, 2, 4.0, crate::config::AtomicMode::Relaxed);
        assert_eq!(slot.as_ref().map(AtomicOutput::shape), Some((2, 3)));
        let again = trial_output(&mut slot, &shape);
        assert_eq!(again.load(1, 2), 0.0);
    }

    #[test]
    fn test_cached_forward_skips_trials() {
        let cache = Arc::new(ConfigCache::new());
        let f = fixture(1, 40, 64);
        let args = ForwardArgs::new(&f.x, &f.w, &f.scales, 4, 32);
        let shape = args.validate().unwrap();
        let pinned = default_config(KernelVariant::GemvRevSplitK, HardwareTier::Generic);
        cache.insert(shape.signature(KernelVariant::GemvRevSplitK), pinned);

        let mut trials = 0;
        let tuner = Autotuner::new(AutotuneSettings::quick())
            .with_cache(Arc::clone(&cache))
            .with_benchmarker(Box::new(FirstViable));
        let config = tuner
            .resolve(&shape, KernelVariant::GemvRevSplitK, &mut |_| {
                trials += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(config, pinned);
        assert_eq!(trials, 0);
        assert!(Launcher::new(tuner).forward(&args).is_ok());
    }

    #[test]
    fn test_variant_selection() {
        let l = launcher(AutotuneSettings::disabled());
        assert_eq!(l.variant_for(1), KernelVariant::GemvRevSplitK);
        assert_eq!(l.variant_for(8), KernelVariant::GemmSplitK);
        let forced = launcher(AutotuneSettings::disabled()).with_variant(KernelVariant::GemmSplitK);
        assert_eq!(forced.variant_for(1), KernelVariant::GemmSplitK);
    }
}
