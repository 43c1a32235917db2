//! Configuration search and memoization
//!
//! [`Autotuner::resolve`] returns the configuration for a shape:
//!
//! 1. search disabled: the hardware-tier default, no cache write
//! 2. signature cached: the cached winner
//! 3. otherwise: pre-tuned entry or full [`ConfigSpace`], pruned, then handed
//!    to a [`Benchmarker`]; the winner is cached
//!
//! The first call for an unseen shape blocks for the whole search. Later
//! calls are a cache read.
//!
//! # Examples
//!
//! ```
//! use rayo::autotune::AutotuneSettings;
//! use std::time::Duration;
//!
//! let settings = AutotuneSettings::new()
//!     .with_warmup(Duration::from_millis(5))
//!     .with_rep(Duration::from_millis(10))
//!     .with_time_budget(Duration::from_millis(200))
//!     .build();
//! assert!(settings.enabled);
//! assert_eq!(settings.rep, Duration::from_millis(10));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::{self, ConfigCache};
use crate::config::{
    default_config, tuned_config, ConfigPruner, ConfigSpace, HardwareTier, KernelConfig,
    PrunerParams,
};
use crate::error::{RayoError, Result};
use crate::kernels::KernelVariant;
use crate::shape::{ProblemShape, ShapeSignature};

/// Environment variable that disables search when set to `0` or `false`
pub const AUTOTUNE_ENV: &str = "RAYO_AUTOTUNE";

/// One trial execution of a candidate
pub type Trial<'a> = dyn FnMut(&KernelConfig) -> Result<()> + 'a;

/// Strategy that picks a winner from pruned candidates
///
/// Implementations run `trial` as often as they need. A candidate whose trial
/// fails is skipped; if none succeeds the result is `NoViableConfig`.
pub trait Benchmarker: Send + Sync + fmt::Debug {
    /// Select the best candidate for `signature`
    ///
    /// # Errors
    ///
    /// Returns `NoViableConfig` when no candidate executes.
    fn search(
        &self,
        candidates: &mut dyn Iterator<Item = KernelConfig>,
        signature: &ShapeSignature,
        trial: &mut Trial<'_>,
    ) -> Result<KernelConfig>;
}

/// Wall-clock benchmarking with per-candidate time budgets
///
/// A candidate is run untimed until `warmup` has elapsed, then timed until
/// `rep` has elapsed (at least once). Its score is the median run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedSearch {
    /// Untimed run budget per candidate
    pub warmup: Duration,
    /// Timed run budget per candidate
    pub rep: Duration,
    /// Stop taking new candidates once this much time has passed and a winner exists
    pub time_budget: Option<Duration>,
}

impl TimedSearch {
    /// Benchmarker using the settings' trial counts and budget
    #[must_use]
    pub fn from_settings(settings: &AutotuneSettings) -> Self {
        Self {
            warmup: settings.warmup,
            rep: settings.rep,
            time_budget: settings.time_budget,
        }
    }

    fn measure(&self, config: &KernelConfig, trial: &mut Trial<'_>) -> Result<Duration> {
        let warmup_start = Instant::now();
        while warmup_start.elapsed() < self.warmup {
            trial(config)?;
        }

        let mut times = Vec::new();
        let timed_start = Instant::now();
        loop {
            let start = Instant::now();
            trial(config)?;
            times.push(start.elapsed());
            if timed_start.elapsed() >= self.rep {
                break;
            }
        }
        times.sort_unstable();
        Ok(times[times.len() / 2])
    }
}

impl Benchmarker for TimedSearch {
    fn search(
        &self,
        candidates: &mut dyn Iterator<Item = KernelConfig>,
        signature: &ShapeSignature,
        trial: &mut Trial<'_>,
    ) -> Result<KernelConfig> {
        let start = Instant::now();
        let mut best: Option<(KernelConfig, Duration)> = None;
        let mut tried = 0usize;

        for config in candidates {
            if let (Some(budget), Some(_)) = (self.time_budget, best.as_ref()) {
                if start.elapsed() >= budget {
                    debug!(%signature, tried, "time budget exhausted");
                    break;
                }
            }
            tried += 1;
            match self.measure(&config, trial) {
                Ok(median) => {
                    debug!(%signature, ?config, ?median, "candidate timed");
                    if best.map_or(true, |(_, t)| median < t) {
                        best = Some((config, median));
                    }
                }
                Err(e) => warn!(%signature, ?config, error = %e, "candidate failed"),
            }
        }

        best.map(|(config, _)| config)
            .ok_or(RayoError::NoViableConfig {
                signature: *signature,
            })
    }
}

/// Deterministic benchmarker: the first candidate whose single trial succeeds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstViable;

impl Benchmarker for FirstViable {
    fn search(
        &self,
        candidates: &mut dyn Iterator<Item = KernelConfig>,
        signature: &ShapeSignature,
        trial: &mut Trial<'_>,
    ) -> Result<KernelConfig> {
        for config in candidates {
            match trial(&config) {
                Ok(()) => return Ok(config),
                Err(e) => warn!(%signature, ?config, error = %e, "candidate failed"),
            }
        }
        Err(RayoError::NoViableConfig {
            signature: *signature,
        })
    }
}

/// Autotuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutotuneSettings {
    /// Run the search; when false the tier default is used
    pub enabled: bool,
    /// Untimed run budget per candidate
    pub warmup: Duration,
    /// Timed run budget per candidate
    pub rep: Duration,
    /// Optional wall-clock cap on the search
    pub time_budget: Option<Duration>,
    /// Hardware tier for default configurations
    pub hardware: HardwareTier,
    /// Seed the search with the pre-tuned table when the shape is known
    pub use_tuned_table: bool,
}

impl Default for AutotuneSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup: Duration::from_millis(50),
            rep: Duration::from_millis(50),
            time_budget: None,
            hardware: HardwareTier::Generic,
            use_tuned_table: true,
        }
    }
}

impl AutotuneSettings {
    /// Default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with `enabled` taken from `RAYO_AUTOTUNE`
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_env_override(std::env::var(AUTOTUNE_ENV).ok().as_deref())
    }

    /// Apply a `RAYO_AUTOTUNE` value: `0` / `false` / `off` disable search
    #[must_use]
    pub fn with_env_override(mut self, value: Option<&str>) -> Self {
        if let Some(v) = value {
            let v = v.trim();
            if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("off") {
                self.enabled = false;
            }
        }
        self
    }

    /// Enable or disable search
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the untimed run budget per candidate
    #[must_use]
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the timed run budget per candidate (one run at minimum)
    #[must_use]
    pub fn with_rep(mut self, rep: Duration) -> Self {
        self.rep = rep;
        self
    }

    /// Cap the search wall-clock time
    #[must_use]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Set the hardware tier
    #[must_use]
    pub fn with_hardware(mut self, hardware: HardwareTier) -> Self {
        self.hardware = hardware;
        self
    }

    /// Use or ignore the pre-tuned table
    #[must_use]
    pub fn with_tuned_table(mut self, enabled: bool) -> Self {
        self.use_tuned_table = enabled;
        self
    }

    /// Finalize (builder symmetry)
    #[must_use]
    pub fn build(self) -> Self {
        self
    }

    /// Search disabled: always the tier default
    #[must_use]
    pub fn disabled() -> Self {
        Self::new().with_enabled(false)
    }

    /// Short searches for interactive use and tests
    ///
    /// - 1 ms warmup per candidate
    /// - 3 ms timed per candidate
    /// - 2 second budget
    #[must_use]
    pub fn quick() -> Self {
        Self::new()
            .with_warmup(Duration::from_millis(1))
            .with_rep(Duration::from_millis(3))
            .with_time_budget(Duration::from_secs(2))
    }
}

/// Search driver owning the cache, pruner thresholds and benchmarker
#[derive(Debug)]
pub struct Autotuner {
    cache: Arc<ConfigCache>,
    settings: AutotuneSettings,
    pruner_params: PrunerParams,
    benchmarker: Box<dyn Benchmarker>,
}

impl Autotuner {
    /// Tuner on the process-wide cache with timed search
    #[must_use]
    pub fn new(settings: AutotuneSettings) -> Self {
        let benchmarker = Box::new(TimedSearch::from_settings(&settings));
        Self {
            cache: cache::global(),
            settings,
            pruner_params: PrunerParams::default(),
            benchmarker,
        }
    }

    /// Use `cache` instead of the process-wide one
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ConfigCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the benchmarking strategy
    #[must_use]
    pub fn with_benchmarker(mut self, benchmarker: Box<dyn Benchmarker>) -> Self {
        self.benchmarker = benchmarker;
        self
    }

    /// Replace the pruning thresholds
    #[must_use]
    pub fn with_pruner_params(mut self, params: PrunerParams) -> Self {
        self.pruner_params = params;
        self
    }

    /// Cache backing this tuner
    #[must_use]
    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &AutotuneSettings {
        &self.settings
    }

    /// Configuration to launch `shape` with under `variant`
    ///
    /// `trial` executes one candidate; it is only called on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns `NoViableConfig` if nothing survives pruning or every
    /// surviving candidate fails its trial.
    pub fn resolve(
        &self,
        shape: &ProblemShape,
        variant: KernelVariant,
        trial: &mut Trial<'_>,
    ) -> Result<KernelConfig> {
        if !self.settings.enabled {
            return Ok(default_config(variant, self.settings.hardware));
        }

        let signature = shape.signature(variant);
        if let Some(config) = self.cache.get(&signature) {
            debug!(%signature, "config cache hit");
            return Ok(config);
        }

        let space = ConfigSpace::for_variant(variant);
        let seed = if self.settings.use_tuned_table {
            tuned_config(shape, variant)
        } else {
            None
        };
        let candidates: Box<dyn Iterator<Item = KernelConfig> + '_> = match seed {
            Some(config) => {
                debug!(%signature, "seeding search from tuned table");
                Box::new(std::iter::once(config))
            }
            None => Box::new(space.iter()),
        };

        let pruner = ConfigPruner::new(self.pruner_params, Arc::clone(&self.cache));
        let mut pruned = pruner.prune(candidates, shape, variant);
        let winner = self.benchmarker.search(&mut pruned, &signature, trial)?;

        self.cache.insert(signature, winner);
        info!(%signature, config = ?winner, "autotune selected configuration");
        Ok(winner)
    }
}
