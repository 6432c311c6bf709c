//! Core abstractions shared by the samplers: the log-density seam ([`Target`]),
//! a stepping chain ([`MarkovChain`]) and the loops that record a chain's trace.

use indicatif::ProgressBar;
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::stats::RhatMulti;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// An unnormalized log-density over `n_dim`-dimensional real vectors.
///
/// Implementations must be `Sync`: ensemble walkers are evaluated in parallel.
/// Zero probability is expressed as `f64::NEG_INFINITY`, never as a panic.
pub trait Target: Sync {
    /// Dimensionality of the parameter space.
    fn n_dim(&self) -> usize;

    /// Returns the log of the unnormalized density at `theta`.
    fn unnorm_log_prob(&self, theta: &[f64]) -> f64;
}

/// A chain whose state is a set of walkers, one row per walker.
pub trait MarkovChain {
    /// Does one iteration of the chain, returning the new walker positions.
    fn step(&mut self) -> ArrayView2<'_, f64>;

    /// Current walker positions without stepping.
    fn current_state(&self) -> ArrayView2<'_, f64>;

    /// Log-density of every walker at its current position.
    fn current_log_prob(&self) -> ArrayView1<'_, f64>;
}

/// Positions and log-densities recorded while running a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// walker × step × dimension
    pub positions: Array3<f64>,
    /// walker × step
    pub log_probs: Array2<f64>,
}

impl Trace {
    fn with_shape(n_walkers: usize, n_steps: usize, dim: usize) -> Self {
        Self {
            positions: Array3::zeros((n_walkers, n_steps, dim)),
            log_probs: Array2::zeros((n_walkers, n_steps)),
        }
    }

    fn record<M: MarkovChain>(&mut self, i: usize, chain: &M) {
        self.positions
            .slice_mut(s![.., i, ..])
            .assign(&chain.current_state());
        self.log_probs
            .slice_mut(s![.., i])
            .assign(&chain.current_log_prob());
    }
}

/// Runs `chain` for `n_steps` and records every step.
pub fn run_chain<M: MarkovChain>(chain: &mut M, n_steps: usize) -> Trace {
    let (n_walkers, dim) = chain.current_state().dim();
    let mut out = Trace::with_shape(n_walkers, n_steps, dim);

    for i in 0..n_steps {
        chain.step();
        out.record(i, chain);
    }

    out
}

/// Like [`run_chain`], but reports progress, acceptance rate and the largest
/// potential scale reduction factor across dimensions on `pb`.
pub fn run_chain_with_progress<M: MarkovChain>(
    chain: &mut M,
    n_steps: usize,
    pb: &ProgressBar,
) -> Trace {
    let (n_walkers, dim) = chain.current_state().dim();
    let mut out = Trace::with_shape(n_walkers, n_steps, dim);
    let mut psr = RhatMulti::new(n_walkers, dim);
    let mut n_moved = 0_usize;
    let mut last_update = Instant::now();

    pb.set_length(n_steps as u64);

    for i in 0..n_steps {
        let before = chain.current_state().to_owned();
        let after = chain.step().to_owned();
        n_moved += before
            .outer_iter()
            .zip(after.outer_iter())
            .filter(|(b, a)| b != a)
            .count();
        out.record(i, chain);

        let flat: Vec<f64> = after.iter().copied().collect();
        if let Err(e) = psr.step(&flat) {
            debug!(step = i, error = %e, "skipping R-hat update");
        }

        if last_update.elapsed() >= UPDATE_INTERVAL || i + 1 == n_steps {
            let accept_rate = n_moved as f64 / ((i + 1) * n_walkers) as f64;
            let max_rhat = psr.max().unwrap_or(f64::NAN);
            pb.set_position(i as u64 + 1);
            pb.set_message(format!(
                "p(accept)≈{:.2} max(rhat)≈{:.3}",
                accept_rate, max_rhat
            ));
            last_update = Instant::now();
        }
    }

    out
}
