//! Autotune cache behavior through the launcher
//!
//! Every test builds its own cache so results do not depend on test order.

use std::sync::Arc;
use std::thread;

use half::f16;
use rayo::autotune::{AutotuneSettings, Autotuner, FirstViable};
use rayo::quant::pack_weights;
use rayo::{
    default_config, ConfigCache, ForwardArgs, HardwareTier, KernelVariant, Launcher,
    PrunerParams, RayoError, Tensor,
};

struct Inputs {
    x: Tensor<f16>,
    w: Tensor<u32>,
    scales: Tensor<f16>,
}

impl Inputs {
    fn new(m: usize, n: usize, k: usize, group_size: usize) -> Self {
        let q = Tensor::from_fn(k, n, |kk, nn| ((kk + nn) % 16) as u8);
        Self {
            x: Tensor::full(m, k, f16::from_f32(0.5)),
            w: pack_weights(&q, 4).unwrap(),
            scales: Tensor::full(k / group_size, n, f16::ONE),
        }
    }

    fn args(&self, group_size: usize) -> ForwardArgs<'_, f16, f16> {
        ForwardArgs::new(&self.x, &self.w, &self.scales, 4, group_size)
    }
}

fn launcher(settings: AutotuneSettings, cache: &Arc<ConfigCache>) -> Launcher {
    Launcher::new(
        Autotuner::new(settings)
            .with_cache(Arc::clone(cache))
            .with_benchmarker(Box::new(FirstViable)),
    )
}

#[test]
fn test_first_forward_populates_cache() {
    let cache = Arc::new(ConfigCache::new());
    let l = launcher(AutotuneSettings::quick(), &cache);
    let inputs = Inputs::new(1, 256, 512, 128);
    let args = inputs.args(128);
    let shape = args.validate().unwrap();

    assert!(cache.is_empty());
    l.forward(&args).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&shape.signature(KernelVariant::GemvRevSplitK)));
}

#[test]
fn test_second_forward_reuses_winner() {
    let cache = Arc::new(ConfigCache::new());
    let l = launcher(AutotuneSettings::quick(), &cache);
    let inputs = Inputs::new(1, 256, 512, 128);
    let args = inputs.args(128);
    let signature = args.validate().unwrap().signature(KernelVariant::GemvRevSplitK);

    let y1 = l.forward(&args).unwrap().to_f32();
    let winner = cache.get(&signature).unwrap();
    let y2 = l.forward(&args).unwrap().to_f32();

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&signature), Some(winner));
    for (a, b) in y1.to_vec().iter().zip(y2.to_vec()) {
        assert!((a - b).abs() <= 1e-3 * a.abs().max(1.0));
    }
}

#[test]
fn test_signatures_are_per_variant() {
    let cache = Arc::new(ConfigCache::new());
    let inputs = Inputs::new(2, 256, 512, 128);
    let args = inputs.args(128);
    let shape = args.validate().unwrap();

    for variant in [KernelVariant::GemmSplitK, KernelVariant::GemvRevSplitK] {
        launcher(AutotuneSettings::quick(), &cache)
            .with_variant(variant)
            .forward(&args)
            .unwrap();
    }
    assert_eq!(cache.len(), 2);
    let gemm = cache.get(&shape.signature(KernelVariant::GemmSplitK)).unwrap();
    let gemv = cache.get(&shape.signature(KernelVariant::GemvRevSplitK)).unwrap();
    assert_eq!(gemm.variant, KernelVariant::GemmSplitK);
    assert_eq!(gemv.variant, KernelVariant::GemvRevSplitK);
    // multi-row reversed split-K keeps its K block small
    assert!(gemv.block_size_k <= 32);
}

#[test]
fn test_concurrent_first_calls_agree() {
    let cache = Arc::new(ConfigCache::new());
    let l = launcher(AutotuneSettings::quick(), &cache);
    let inputs = Inputs::new(1, 256, 1024, 128);
    let args = inputs.args(128);
    let reference = launcher(AutotuneSettings::disabled(), &Arc::new(ConfigCache::new()))
        .forward(&args)
        .unwrap()
        .to_f32();

    let outputs: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| l.forward(&args).unwrap().to_f32()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // racing searches may each insert; one entry remains
    assert_eq!(cache.len(), 1);
    for y in &outputs {
        for (a, e) in y.to_vec().iter().zip(reference.to_vec()) {
            assert!((a - e).abs() <= 1e-3 * e.abs().max(1.0), "{a} vs {e}");
        }
    }
}

#[test]
fn test_disabled_search_leaves_cache_empty() {
    let cache = Arc::new(ConfigCache::new());
    let settings = AutotuneSettings::disabled().with_hardware(HardwareTier::Ampere);
    let l = launcher(settings, &cache);
    let inputs = Inputs::new(1, 256, 512, 128);
    let args = inputs.args(128);

    let via_forward = l.forward(&args).unwrap().to_f32();
    let explicit = l
        .run_with_config(
            &args,
            &default_config(KernelVariant::GemvRevSplitK, HardwareTier::Ampere),
        )
        .unwrap()
        .to_f32();

    assert!(cache.is_empty());
    assert_eq!(via_forward.to_vec(), explicit.to_vec());
}

#[test]
fn test_env_override_disables_search() {
    let settings = AutotuneSettings::new().with_env_override(Some("off"));
    assert!(!settings.enabled);

    let cache = Arc::new(ConfigCache::new());
    let inputs = Inputs::new(1, 256, 512, 128);
    launcher(settings, &cache).forward(&inputs.args(128)).unwrap();
    assert!(cache.is_empty());
}

#[test]
fn test_empty_search_space_is_no_viable_config() {
    let cache = Arc::new(ConfigCache::new());
    let l = Launcher::new(
        Autotuner::new(AutotuneSettings::quick())
            .with_cache(Arc::clone(&cache))
            .with_benchmarker(Box::new(FirstViable))
            .with_pruner_params(PrunerParams::default().with_block_area(1 << 20, 1 << 21)),
    );
    let inputs = Inputs::new(1, 256, 512, 128);
    let args = inputs.args(128);
    let signature = args.validate().unwrap().signature(KernelVariant::GemvRevSplitK);

    let err = l.forward(&args).unwrap_err();
    assert_eq!(err, RayoError::NoViableConfig { signature });
    assert!(cache.is_empty());
}

#[test]
fn test_preloaded_cache_entry_is_used() {
    let cache = Arc::new(ConfigCache::new());
    let inputs = Inputs::new(1, 256, 512, 128);
    let args = inputs.args(128);
    let signature = args.validate().unwrap().signature(KernelVariant::GemvRevSplitK);
    let pinned = rayo::KernelConfig::new(KernelVariant::GemvRevSplitK, 1, 128, 64);
    cache.insert(signature, pinned);

    // a band that rejects everything cannot matter once the signature is known
    let l = Launcher::new(
        Autotuner::new(AutotuneSettings::quick())
            .with_cache(Arc::clone(&cache))
            .with_benchmarker(Box::new(FirstViable))
            .with_pruner_params(PrunerParams::default().with_block_area(1 << 20, 1 << 21)),
    );
    l.forward(&args).unwrap();
    assert_eq!(cache.get(&signature), Some(pinned));
}
