/*!
# Affine-invariant ensemble sampler

Goodman & Weare stretch move over an ensemble of walkers. The ensemble is split into
two halves; each half is moved in turn using the other half as the complementary set:

```text
Y = X_j + z (X_k - X_j),    z ~ g(z) ∝ 1/sqrt(z) on [1/a, a]
accept with probability min(1, z^(n_dim - 1) p(Y) / p(X_k))
```

## Determinism

For each half, every random number the half needs (stretch factor, complementary
index, acceptance uniform) is drawn sequentially from one seeded [`SmallRng`] before
any density is evaluated. Only the density evaluations are handed to rayon, and the
accept/reject pass is again sequential. A run is therefore bit-identical for a
given seed whether or not walkers are evaluated in parallel.

## Example

```rust
use cosmo_mcmc::core::Target;
use cosmo_mcmc::ensemble::EnsembleSampler;

struct StdNormal;

impl Target for StdNormal {
    fn n_dim(&self) -> usize {
        2
    }
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        -0.5 * theta.iter().map(|x| x * x).sum::<f64>()
    }
}

let mut sampler = EnsembleSampler::new(StdNormal, 16).unwrap().set_seed(42);
sampler.initialize_ball(&[0.0, 0.0], 0.1).unwrap();
let chain = sampler.run(200, 50).unwrap();
assert_eq!(chain.chain().dim(), (16, 200, 2));
assert_eq!(chain.samples().nrows(), 16 * 150);
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::{run_chain, run_chain_with_progress, MarkovChain, Target, Trace};
use crate::errors::{CosmoError, Result};

/// Stretch-move ensemble sampler over a [`Target`].
#[derive(Debug, Clone)]
pub struct EnsembleSampler<T: Target> {
    target: T,
    /// n_walkers × n_dim
    walkers: Array2<f64>,
    log_probs: Array1<f64>,
    accepted: Vec<usize>,
    steps_taken: usize,
    stretch_scale: f64,
    parallel: bool,
    initialized: bool,
    /// The random seed.
    pub seed: u64,
    rng: SmallRng,
}

/// Random numbers for one walker update, drawn before evaluation.
struct Draw {
    z: f64,
    log_u: f64,
}

impl<T: Target> EnsembleSampler<T> {
    /// Creates an uninitialized sampler with `n_walkers` walkers.
    ///
    /// The walker count must be even and at least `max(4, 2 * n_dim)` so that each
    /// half spans the parameter space. The seed is random until [`Self::set_seed`].
    pub fn new(target: T, n_walkers: usize) -> Result<Self> {
        let n_dim = target.n_dim();
        if n_dim == 0 {
            return Err(CosmoError::Sampler("target has zero dimensions".into()));
        }
        let min_walkers = (2 * n_dim).max(4);
        if n_walkers % 2 != 0 || n_walkers < min_walkers {
            return Err(CosmoError::Sampler(format!(
                "need an even number of at least {min_walkers} walkers for {n_dim} dimensions, got {n_walkers}"
            )));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            target,
            walkers: Array2::zeros((n_walkers, n_dim)),
            log_probs: Array1::from_elem(n_walkers, f64::NEG_INFINITY),
            accepted: vec![0; n_walkers],
            steps_taken: 0,
            stretch_scale: 2.0,
            parallel: true,
            initialized: false,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Reseeds the sampler's random number generator.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Sets the stretch scale `a` (default 2.0).
    pub fn set_stretch_scale(mut self, a: f64) -> Result<Self> {
        if !(a.is_finite() && a > 1.0) {
            return Err(CosmoError::Sampler(format!(
                "stretch scale must be > 1, got {a}"
            )));
        }
        self.stretch_scale = a;
        Ok(self)
    }

    /// Toggles rayon evaluation of proposals. Results do not depend on this.
    pub fn set_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn n_walkers(&self) -> usize {
        self.walkers.nrows()
    }

    pub fn n_dim(&self) -> usize {
        self.walkers.ncols()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Places every walker at `center + scale * N(0, 1)` per dimension.
    ///
    /// Normals are drawn walker by walker from the sampler's RNG.
    pub fn initialize_ball(&mut self, center: &[f64], scale: f64) -> Result<()> {
        if center.len() != self.n_dim() {
            return Err(CosmoError::Sampler(format!(
                "ball center has {} coordinates, target has {}",
                center.len(),
                self.n_dim()
            )));
        }
        if !(scale.is_finite() && scale >= 0.0) {
            return Err(CosmoError::Sampler(format!(
                "ball scale must be finite and >= 0, got {scale}"
            )));
        }
        let (n_walkers, n_dim) = self.walkers.dim();
        let mut positions = Array2::zeros((n_walkers, n_dim));
        for mut walker in positions.outer_iter_mut() {
            for (x, &c) in walker.iter_mut().zip(center) {
                let noise: f64 = self.rng.sample(StandardNormal);
                *x = c + scale * noise;
            }
        }
        self.set_walkers(positions)
    }

    /// Sets explicit starting positions (n_walkers × n_dim).
    ///
    /// # Errors
    ///
    /// [`CosmoError::SamplerDegenerate`] if no walker has a finite log-density.
    pub fn set_walkers(&mut self, positions: Array2<f64>) -> Result<()> {
        if positions.dim() != self.walkers.dim() {
            return Err(CosmoError::Sampler(format!(
                "walker positions have shape {:?}, expected {:?}",
                positions.dim(),
                self.walkers.dim()
            )));
        }
        let rows: Vec<Vec<f64>> = positions.outer_iter().map(|w| w.to_vec()).collect();
        let log_probs = Array1::from(self.evaluate(&rows))
            .mapv(|lp| if lp.is_nan() { f64::NEG_INFINITY } else { lp });
        if log_probs.iter().all(|lp| *lp == f64::NEG_INFINITY) {
            return Err(CosmoError::SamplerDegenerate(
                "every walker starts with zero posterior density".into(),
            ));
        }
        self.walkers = positions;
        self.log_probs = log_probs;
        self.accepted.iter_mut().for_each(|a| *a = 0);
        self.steps_taken = 0;
        self.initialized = true;
        Ok(())
    }

    /// Runs `n_steps` steps and returns the recorded chain.
    ///
    /// `discard` is the burn-in that [`EnsembleChain::samples`] drops; the raw chain
    /// keeps every step.
    ///
    /// # Errors
    ///
    /// - [`CosmoError::Sampler`] if the walkers were never initialized or
    ///   `discard >= n_steps`.
    /// - [`CosmoError::SamplerDegenerate`] if every walker ends at zero density.
    pub fn run(&mut self, n_steps: usize, discard: usize) -> Result<EnsembleChain> {
        self.check_run(n_steps, discard)?;
        let trace = run_chain(self, n_steps);
        self.finish(trace, discard)
    }

    /// Like [`Self::run`], with a progress bar showing the acceptance rate and the
    /// largest R-hat across dimensions.
    pub fn run_progress(&mut self, n_steps: usize, discard: usize) -> Result<EnsembleChain> {
        self.check_run(n_steps, discard)?;
        let pb = ProgressBar::new(n_steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .map_err(|e| CosmoError::Sampler(format!("progress template: {e}")))?
                .progress_chars("##-"),
        );
        pb.set_prefix("Ensemble");
        let chain = self.run_with_progress_bar(n_steps, discard, &pb);
        pb.finish_with_message("Done!");
        chain
    }

    /// [`Self::run`] reporting to a caller-owned bar, which is left unfinished.
    /// The chain is the same as without a bar.
    pub fn run_with_progress_bar(
        &mut self,
        n_steps: usize,
        discard: usize,
        pb: &ProgressBar,
    ) -> Result<EnsembleChain> {
        self.check_run(n_steps, discard)?;
        let trace = run_chain_with_progress(self, n_steps, pb);
        self.finish(trace, discard)
    }

    fn check_run(&self, n_steps: usize, discard: usize) -> Result<()> {
        if !self.initialized {
            return Err(CosmoError::Sampler(
                "walkers must be initialized before running".into(),
            ));
        }
        if discard >= n_steps {
            return Err(CosmoError::Sampler(format!(
                "burn-in ({discard}) must be smaller than the number of steps ({n_steps})"
            )));
        }
        Ok(())
    }

    fn finish(&self, trace: Trace, discard: usize) -> Result<EnsembleChain> {
        if self.log_probs.iter().all(|lp| *lp == f64::NEG_INFINITY) {
            return Err(CosmoError::SamplerDegenerate(
                "every walker ended with zero posterior density".into(),
            ));
        }
        let acceptance = self.acceptance_fraction();
        info!(
            walkers = self.n_walkers(),
            steps = self.steps_taken,
            mean_acceptance = acceptance.mean().unwrap_or(f64::NAN),
            "ensemble run finished"
        );
        Ok(EnsembleChain {
            trace,
            acceptance,
            burn_in: discard,
        })
    }

    /// Accepted moves per walker divided by steps taken since initialization.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        let steps = self.steps_taken.max(1) as f64;
        self.accepted.iter().map(|&a| a as f64 / steps).collect()
    }

    fn evaluate(&self, points: &[Vec<f64>]) -> Vec<f64> {
        if self.parallel {
            points
                .par_iter()
                .map(|p| self.target.unnorm_log_prob(p))
                .collect()
        } else {
            points
                .iter()
                .map(|p| self.target.unnorm_log_prob(p))
                .collect()
        }
    }

    /// Moves the walkers in `active` using a snapshot of `complement`.
    fn update_half(&mut self, active: std::ops::Range<usize>, complement: std::ops::Range<usize>) {
        let a = self.stretch_scale;
        let n_dim = self.n_dim();
        let others = self.walkers.slice(s![complement, ..]).to_owned();

        let mut draws = Vec::with_capacity(active.len());
        let mut proposals = Vec::with_capacity(active.len());
        for k in active.clone() {
            let u: f64 = self.rng.gen();
            let z = ((a - 1.0) * u + 1.0).powi(2) / a;
            let j = self.rng.gen_range(0..others.nrows());
            let log_u = self.rng.gen::<f64>().ln();

            let x_k = self.walkers.row(k);
            let x_j = others.row(j);
            let proposal: Vec<f64> = x_j
                .iter()
                .zip(x_k.iter())
                .map(|(&c, &x)| c + z * (x - c))
                .collect();
            draws.push(Draw { z, log_u });
            proposals.push(proposal);
        }

        let new_log_probs = self.evaluate(&proposals);

        for ((k, draw), (proposal, new_lp)) in active
            .zip(draws)
            .zip(proposals.into_iter().zip(new_log_probs))
        {
            if new_lp == f64::NEG_INFINITY || new_lp.is_nan() {
                continue;
            }
            let log_ratio = (n_dim as f64 - 1.0) * draw.z.ln() + new_lp - self.log_probs[k];
            if draw.log_u < log_ratio {
                self.walkers
                    .row_mut(k)
                    .assign(&ArrayView1::from(proposal.as_slice()));
                self.log_probs[k] = new_lp;
                self.accepted[k] += 1;
            }
        }
    }
}

impl<T: Target> MarkovChain for EnsembleSampler<T> {
    /// One stretch-move sweep: first half against the second, then the reverse.
    ///
    /// Stepping an uninitialized sampler moves walkers sitting at the origin; use
    /// [`EnsembleSampler::run`] to get that checked.
    fn step(&mut self) -> ArrayView2<'_, f64> {
        let n_walkers = self.n_walkers();
        let half = n_walkers / 2;
        self.update_half(0..half, half..n_walkers);
        self.update_half(half..n_walkers, 0..half);
        self.steps_taken += 1;
        if self.steps_taken % 100 == 0 {
            debug!(
                step = self.steps_taken,
                accepted = self.accepted.iter().sum::<usize>(),
                "ensemble progress"
            );
        }
        self.walkers.view()
    }

    fn current_state(&self) -> ArrayView2<'_, f64> {
        self.walkers.view()
    }

    fn current_log_prob(&self) -> ArrayView1<'_, f64> {
        self.log_probs.view()
    }
}

/// Output of an ensemble run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleChain {
    trace: Trace,
    acceptance: Array1<f64>,
    burn_in: usize,
}

impl EnsembleChain {
    /// Raw positions, walker × step × dimension, burn-in included.
    pub fn chain(&self) -> &Array3<f64> {
        &self.trace.positions
    }

    /// Log-posterior of every recorded position, walker × step.
    pub fn log_probs(&self) -> &Array2<f64> {
        &self.trace.log_probs
    }

    /// Fraction of accepted moves per walker.
    pub fn acceptance_fraction(&self) -> &Array1<f64> {
        &self.acceptance
    }

    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    pub fn n_walkers(&self) -> usize {
        self.trace.positions.len_of(Axis(0))
    }

    pub fn n_steps(&self) -> usize {
        self.trace.positions.len_of(Axis(1))
    }

    /// Drops the first `discard` steps of every walker and stacks what is left,
    /// walker after walker, into `(n_walkers * (n_steps - discard)) × n_dim`.
    pub fn flat_samples(&self, discard: usize) -> Array2<f64> {
        let (n_walkers, n_steps, n_dim) = self.trace.positions.dim();
        let kept = n_steps.saturating_sub(discard);
        let tail = self.trace.positions.slice(s![.., discard.min(n_steps).., ..]);
        let mut out = Array2::zeros((n_walkers * kept, n_dim));
        for (w, walker) in tail.outer_iter().enumerate() {
            out.slice_mut(s![w * kept..(w + 1) * kept, ..]).assign(&walker);
        }
        out
    }

    /// [`Self::flat_samples`] with the burn-in given to [`EnsembleSampler::run`].
    pub fn samples(&self) -> Array2<f64> {
        self.flat_samples(self.burn_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Independent 2D Gaussian with means (1, -2) and standard deviations (0.5, 2).
    struct Gaussian2D;

    impl Target for Gaussian2D {
        fn n_dim(&self) -> usize {
            2
        }
        fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
            let a = (theta[0] - 1.0) / 0.5;
            let b = (theta[1] + 2.0) / 2.0;
            -0.5 * (a * a + b * b)
        }
    }

    /// Standard normal restricted to x > 0.
    struct HalfNormal;

    impl Target for HalfNormal {
        fn n_dim(&self) -> usize {
            1
        }
        fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
            if theta[0] <= 0.0 {
                f64::NEG_INFINITY
            } else {
                -0.5 * theta[0] * theta[0]
            }
        }
    }

    struct Nowhere;

    impl Target for Nowhere {
        fn n_dim(&self) -> usize {
            2
        }
        fn unnorm_log_prob(&self, _theta: &[f64]) -> f64 {
            f64::NEG_INFINITY
        }
    }

    fn gaussian_run(seed: u64, parallel: bool) -> EnsembleChain {
        let mut sampler = EnsembleSampler::new(Gaussian2D, 32)
            .unwrap()
            .set_seed(seed)
            .set_parallel(parallel);
        sampler.initialize_ball(&[1.0, -2.0], 1e-2).unwrap();
        sampler.run(300, 50).unwrap()
    }

    #[test]
    fn test_progress_run_matches_plain_run() {
        let plain = gaussian_run(11, true);

        let mut sampler = EnsembleSampler::new(Gaussian2D, 32)
            .unwrap()
            .set_seed(11)
            .set_parallel(true);
        sampler.initialize_ball(&[1.0, -2.0], 1e-2).unwrap();
        let pb = ProgressBar::hidden();
        let with_bar = sampler.run_with_progress_bar(300, 50, &pb).unwrap();

        assert_eq!(plain, with_bar);
        assert_eq!(pb.position(), 300);
        let msg = pb.message();
        assert!(msg.starts_with("p(accept)"), "message: {msg}");
        assert!(!msg.contains("NaN"), "R-hat never updated: {msg}");
    }

    #[test]
    fn test_same_seed_same_chain() {
        let a = gaussian_run(7, true);
        let b = gaussian_run(7, true);
        assert_eq!(a, b, "Identical seeds must reproduce the chain exactly");
        let c = gaussian_run(8, true);
        assert_ne!(a.chain(), c.chain());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        assert_eq!(gaussian_run(11, true), gaussian_run(11, false));
    }

    #[test]
    fn test_gaussian_moments() {
        let mut sampler = EnsembleSampler::new(Gaussian2D, 64).unwrap().set_seed(3);
        sampler.initialize_ball(&[0.0, 0.0], 0.5).unwrap();
        let chain = sampler.run(2_000, 500).unwrap();
        let samples = chain.samples();
        assert_eq!(samples.dim(), (64 * 1_500, 2));

        let mean = samples.mean_axis(Axis(0)).unwrap();
        let std = samples.std_axis(Axis(0), 1.0);
        assert_abs_diff_eq!(mean[0], 1.0, epsilon = 0.1);
        assert_abs_diff_eq!(mean[1], -2.0, epsilon = 0.3);
        assert_abs_diff_eq!(std[0], 0.5, epsilon = 0.1);
        assert_abs_diff_eq!(std[1], 2.0, epsilon = 0.3);

        let acc = chain.acceptance_fraction().mean().unwrap();
        assert!(acc > 0.2 && acc < 0.95, "Unexpected acceptance rate {acc}");
    }

    #[test]
    fn test_never_steps_into_zero_density() {
        let mut sampler = EnsembleSampler::new(HalfNormal, 8).unwrap().set_seed(5);
        sampler.initialize_ball(&[0.0], 0.01).unwrap();
        // Walkers drawn below zero start at -inf; no accepted move may land there.
        let chain = sampler.run(500, 0).unwrap();
        let last = chain.chain().slice(s![.., 499, 0]).to_owned();
        let lp_last = chain.log_probs().slice(s![.., 499]).to_owned();
        for (x, lp) in last.iter().zip(lp_last.iter()) {
            if lp.is_finite() {
                assert!(*x > 0.0);
            }
        }
        let finite_steps = chain.log_probs().iter().filter(|lp| lp.is_finite()).count();
        assert!(finite_steps > 0);
    }

    #[test]
    fn test_uninitialized_run_is_an_error() {
        let mut sampler = EnsembleSampler::new(Gaussian2D, 8).unwrap();
        assert!(!sampler.is_initialized());
        assert!(matches!(sampler.run(10, 0), Err(CosmoError::Sampler(_))));
    }

    #[test]
    fn test_degenerate_start_is_an_error() {
        let mut sampler = EnsembleSampler::new(Nowhere, 8).unwrap().set_seed(1);
        assert!(matches!(
            sampler.initialize_ball(&[0.0, 0.0], 1.0),
            Err(CosmoError::SamplerDegenerate(_))
        ));
        assert!(!sampler.is_initialized());
    }

    #[test]
    fn test_invalid_setup() {
        assert!(EnsembleSampler::new(Gaussian2D, 3).is_err());
        assert!(EnsembleSampler::new(Gaussian2D, 2).is_err());
        let sampler = EnsembleSampler::new(Gaussian2D, 4).unwrap();
        assert!(sampler.set_stretch_scale(1.0).is_err());

        let mut sampler = EnsembleSampler::new(Gaussian2D, 4).unwrap();
        assert!(sampler.initialize_ball(&[0.0], 0.1).is_err());
        sampler.initialize_ball(&[0.0, 0.0], 0.1).unwrap();
        assert!(matches!(sampler.run(10, 10), Err(CosmoError::Sampler(_))));
    }

    #[test]
    fn test_flat_samples_are_walker_major() {
        let trace = Trace {
            positions: Array3::from_shape_fn((2, 3, 1), |(w, s, _)| (10 * w + s) as f64),
            log_probs: Array2::zeros((2, 3)),
        };
        let chain = EnsembleChain {
            trace,
            acceptance: Array1::zeros(2),
            burn_in: 1,
        };
        assert_eq!(chain.samples(), array![[1.0], [2.0], [11.0], [12.0]]);
        assert_eq!(chain.flat_samples(0).nrows(), 6);
        assert_eq!(chain.flat_samples(5).nrows(), 0);
    }
}
