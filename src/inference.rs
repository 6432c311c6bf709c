//! End-to-end posterior inference for one model on one observation set:
//! validate, fit a point estimate, sample around it, flatten and summarize.

use ndarray::Array2;
use tracing::{info, info_span};

use crate::config::Config;
use crate::data::ObservationSet;
use crate::ensemble::{EnsembleChain, EnsembleSampler};
use crate::errors::{CosmoError, Result};
use crate::likelihood::Posterior;
use crate::model::{DistanceModel, Parametrization, PriorBounds};
use crate::optimize::{fit, PointEstimate};
use crate::stats::{summarize, MarginalSummary};

/// Everything one run needs, borrowed for the run's duration.
#[derive(Debug, Clone)]
pub struct RunContext<'a, M: DistanceModel> {
    model: &'a M,
    prior: PriorBounds,
    observations: &'a ObservationSet,
    seed: u64,
    config: &'a Config,
    label: String,
    progress: bool,
}

impl<'a, M: DistanceModel> RunContext<'a, M> {
    pub fn new(
        model: &'a M,
        prior: PriorBounds,
        observations: &'a ObservationSet,
        seed: u64,
        config: &'a Config,
    ) -> Self {
        Self {
            model,
            prior,
            observations,
            seed,
            config,
            label: "model".to_string(),
            progress: false,
        }
    }

    /// Name used in logs and carried on the result.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Show an indicatif progress bar while sampling.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the whole pipeline.
    ///
    /// # Errors
    ///
    /// - [`CosmoError::InvalidInput`] if there are fewer observations
    ///   than parameters plus one (checked before any fitting or sampling).
    /// - [`CosmoError::Config`] for an invalid configuration, including fewer than
    ///   `max(2 * n_dim, 4)` walkers for this model.
    /// - Whatever the point estimator or the sampler report.
    pub fn execute(&self) -> Result<InferenceRun> {
        let span = info_span!("inference", model = %self.label, seed = self.seed);
        let _guard = span.enter();

        let n_dim = self.model.n_free() + 1;
        self.observations.ensure_identifiable(n_dim)?;
        self.config.validate()?;
        let min_walkers = (2 * n_dim).max(4);
        if self.config.sampler.n_walkers < min_walkers {
            return Err(CosmoError::Config(format!(
                "{} needs at least {min_walkers} walkers for {n_dim} parameters, got {}",
                self.label, self.config.sampler.n_walkers
            )));
        }

        let posterior = Posterior::new(self.model, &self.prior, self.observations);
        let estimate = fit(&posterior, &self.config.fit)?;

        let sc = &self.config.sampler;
        let mut sampler = EnsembleSampler::new(posterior, sc.n_walkers)?
            .set_seed(self.seed)
            .set_stretch_scale(sc.stretch_scale)?
            .set_parallel(sc.parallel);
        sampler.initialize_ball(&estimate.theta, sc.jitter)?;
        let chain = if self.progress {
            sampler.run_progress(sc.n_steps, sc.burn_in)?
        } else {
            sampler.run(sc.n_steps, sc.burn_in)?
        };

        let param_names: Vec<String> = self
            .model
            .theta_names()
            .into_iter()
            .map(String::from)
            .collect();
        let samples = chain.samples();
        let name_refs: Vec<&str> = param_names.iter().map(String::as_str).collect();
        let summary = summarize(&samples, &name_refs)?;
        for s in &summary {
            info!(
                param = %s.name,
                median = s.median,
                minus = s.median - s.q16,
                plus = s.q84 - s.median,
                "posterior"
            );
        }

        Ok(InferenceRun {
            label: self.label.clone(),
            seed: self.seed,
            param_names,
            observations: self.observations.clone(),
            point_estimate: estimate,
            chain,
            samples,
            summary,
        })
    }
}

/// Result of one inference run.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRun {
    label: String,
    seed: u64,
    param_names: Vec<String>,
    observations: ObservationSet,
    point_estimate: PointEstimate,
    chain: EnsembleChain,
    samples: Array2<f64>,
    summary: Vec<MarginalSummary>,
}

impl InferenceRun {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn point_estimate(&self) -> &PointEstimate {
        &self.point_estimate
    }

    /// Raw per-walker chain, burn-in included.
    pub fn chain(&self) -> &EnsembleChain {
        &self.chain
    }

    /// Post-burn-in samples, one row per draw.
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    pub fn summary(&self) -> &[MarginalSummary] {
        &self.summary
    }

    /// Names of the sampled parameters, `lnsig` last.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }
}

/// Runs `model` against `observations` with its default prior box.
pub fn run(
    model: &Parametrization,
    observations: &ObservationSet,
    seed: u64,
    config: &Config,
) -> Result<InferenceRun> {
    RunContext::new(model, model.prior_bounds(), observations, seed, config)
        .with_label(model.label())
        .execute()
}

/// Runs the H0-only, Omega_M-only and joint models concurrently.
///
/// The models get the seeds from [`model_seeds`], so each result matches the
/// corresponding single [`run`].
pub fn run_all(observations: &ObservationSet, seed: u64, config: &Config) -> Result<Vec<InferenceRun>> {
    let h0 = Parametrization::h0();
    let omega_m = Parametrization::omega_m();
    let joint = Parametrization::joint();
    let [s0, s1, s2] = model_seeds(seed);
    let (a, (b, c)) = rayon::join(
        || run(&h0, observations, s0, config),
        || {
            rayon::join(
                || run(&omega_m, observations, s1, config),
                || run(&joint, observations, s2, config),
            )
        },
    );
    Ok(vec![a?, b?, c?])
}

/// Seeds for the H0-only, Omega_M-only and joint runs of [`run_all`]:
/// `seed`, `seed + 1` and `seed + 2`, wrapping at `u64::MAX`.
pub fn model_seeds(seed: u64) -> [u64; 3] {
    [seed, seed.wrapping_add(1), seed.wrapping_add(2)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hubble_flow(h0: f64, n: usize) -> ObservationSet {
        let model = Parametrization::h0();
        let z: Vec<f64> = (1..=n).map(|i| 0.01 + 0.09 * i as f64 / n as f64).collect();
        let dm: Vec<f64> = z
            .iter()
            .map(|&z| model.distance_modulus(z, &[h0]).unwrap())
            .collect();
        // Deterministic +-0.1 mag wiggle standing in for scatter.
        let dm = dm
            .iter()
            .enumerate()
            .map(|(i, m)| m + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        ObservationSet::from_vecs(z, dm, vec![0.05; n]).unwrap()
    }

    fn small_config() -> Config {
        let mut config = Config::default();
        config.sampler.n_walkers = 32;
        config.sampler.n_steps = 300;
        config.sampler.burn_in = 50;
        config
    }

    #[test]
    fn test_h0_run_shapes_and_recovery() {
        let obs = hubble_flow(68.0, 40);
        let config = small_config();
        let result = run(&Parametrization::h0(), &obs, 99, &config).unwrap();

        assert_eq!(result.label(), "CH0");
        assert_eq!(result.param_names(), ["H0", "lnsig"]);
        assert_eq!(result.chain().chain().dim(), (32, 300, 2));
        assert_eq!(result.samples().dim(), (32 * 250, 2));
        assert_eq!(result.summary().len(), 2);
        assert_eq!(result.observations(), &obs);

        let h0 = &result.summary()[0];
        assert!(
            (h0.median - 68.0).abs() < 1.0,
            "H0 median {} too far from 68",
            h0.median
        );
        assert!(h0.q16 < h0.median && h0.median < h0.q84);
        // Scatter ~ 0.1 around the truth
        let lnsig = &result.summary()[1];
        assert!(lnsig.median > (0.03_f64).ln() && lnsig.median < (0.3_f64).ln());
    }

    #[test]
    fn test_too_few_points_fails_before_sampling() {
        let obs = ObservationSet::from_vecs(vec![0.05, 0.06], vec![36.7, 37.1], vec![0.1, 0.1])
            .unwrap();
        let err = run(&Parametrization::joint(), &obs, 1, &small_config()).unwrap_err();
        assert!(matches!(err, CosmoError::InvalidInput(_)), "got {err:?}");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let obs = hubble_flow(70.0, 10);
        let mut config = small_config();
        config.sampler.n_walkers = 5;
        let err = run(&Parametrization::h0(), &obs, 1, &config).unwrap_err();
        assert!(matches!(err, CosmoError::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_too_few_walkers_for_joint_model_is_a_config_error() {
        // Four walkers is enough for the two-parameter models but not the joint one.
        let obs = hubble_flow(70.0, 10);
        let mut config = small_config();
        config.sampler.n_walkers = 4;
        assert!(config.validate().is_ok());
        let err = run(&Parametrization::joint(), &obs, 1, &config).unwrap_err();
        assert!(matches!(err, CosmoError::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_model_seeds_wrap_at_max() {
        assert_eq!(model_seeds(10), [10, 11, 12]);
        assert_eq!(model_seeds(u64::MAX - 1), [u64::MAX - 1, u64::MAX, 0]);
        assert_eq!(model_seeds(u64::MAX), [u64::MAX, 0, 1]);
    }

    #[test]
    fn test_run_all_accepts_largest_seed() {
        let obs = hubble_flow(70.0, 12);
        let mut config = small_config();
        config.sampler.n_walkers = 8;
        config.sampler.n_steps = 20;
        config.sampler.burn_in = 5;
        let runs = run_all(&obs, u64::MAX, &config).unwrap();
        let seeds: Vec<u64> = runs.iter().map(|r| r.seed()).collect();
        assert_eq!(seeds, vec![u64::MAX, 0, 1]);
    }
}
