//! Chain diagnostics and marginal posterior summaries.

use ndarray::prelude::*;
use ndarray_stats::interpolate::Linear;
use ndarray_stats::QuantileExt;
use noisy_float::types::n64;

use crate::errors::{CosmoError, Result};

/// Streaming potential scale reduction factor (R-hat) over several chains.
///
/// Each call to [`RhatMulti::step`] receives one draw per chain, laid out
/// row-major as `n_chains × n_params`. In the ensemble sampler every walker is
/// treated as a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RhatMulti {
    n: usize,
    mean: Array2<f64>,    // n_chains x n_params
    mean_sq: Array2<f64>, // n_chains x n_params
    n_chains: usize,
    n_params: usize,
}

impl RhatMulti {
    pub fn new(n_chains: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::<f64>::zeros((n_chains, n_params)),
            mean_sq: Array2::<f64>::zeros((n_chains, n_params)),
            n_chains,
            n_params,
        }
    }

    pub fn step(&mut self, x: &[f64]) -> Result<()> {
        let x_arr = ArrayView2::<f64>::from_shape((self.n_chains, self.n_params), x)
            .map_err(|e| CosmoError::InvalidInput(format!("R-hat draw has wrong shape: {e}")))?;
        self.n += 1;
        let n = self.n as f64;

        self.mean = (&self.mean * (n - 1.0) + &x_arr) / n;
        if self.n == 1 {
            self.mean_sq = x_arr.mapv(|v| v * v);
        } else {
            self.mean_sq = (&self.mean_sq * (n - 1.0) + &x_arr.mapv(|v| v * v)) / n;
        };
        Ok(())
    }

    pub fn all(&self) -> Result<Array1<f64>> {
        if self.n < 2 || self.n_chains < 2 {
            return Err(CosmoError::InvalidInput(
                "R-hat needs at least two chains and two draws".into(),
            ));
        }
        let mean_chain = self
            .mean
            .mean_axis(Axis(0))
            .ok_or_else(|| CosmoError::InvalidInput("empty chain set".into()))?;
        let n_chains = self.n_chains as f64;
        let n = self.n as f64;
        let fac = n / (n_chains - 1.0);
        let between = (&self.mean - &mean_chain.insert_axis(Axis(0)))
            .mapv(|v| v * v)
            .sum_axis(Axis(0))
            * fac;
        let sm2 = (&self.mean_sq - &self.mean.mapv(|v| v * v)) * n / (n - 1.0);
        let within = sm2
            .mean_axis(Axis(0))
            .ok_or_else(|| CosmoError::InvalidInput("empty chain set".into()))?;
        let var = &within * ((n - 1.0) / n) + between * (1.0 / n);
        Ok((var / within).mapv(f64::sqrt))
    }

    pub fn max(&self) -> Result<f64> {
        let all = self.all()?;
        Ok(*all.max_skipnan())
    }
}

/// Marginal statistics of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalSummary {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub q16: f64,
    pub median: f64,
    pub q84: f64,
}

/// Mean, spread and the 16/50/84 percentiles of every column of `samples`.
pub fn summarize(samples: &Array2<f64>, names: &[&str]) -> Result<Vec<MarginalSummary>> {
    let (n, dim) = samples.dim();
    if n < 2 {
        return Err(CosmoError::InvalidInput(format!(
            "need at least two samples to summarize, got {n}"
        )));
    }
    if names.len() != dim {
        return Err(CosmoError::InvalidInput(format!(
            "{} parameter names for {dim} columns",
            names.len()
        )));
    }

    let mean = samples
        .mean_axis(Axis(0))
        .ok_or_else(|| CosmoError::InvalidInput("empty sample set".into()))?;
    let std = samples.std_axis(Axis(0), 1.0);

    let mut scratch = samples.to_owned();
    let mut quantile = |q: f64| {
        scratch
            .quantile_axis_skipnan_mut(Axis(0), n64(q), &Linear)
            .map_err(|e| CosmoError::InvalidInput(format!("quantile failed: {e}")))
    };
    let q16 = quantile(0.16)?;
    let q50 = quantile(0.5)?;
    let q84 = quantile(0.84)?;

    Ok((0..dim)
        .map(|j| MarginalSummary {
            name: names[j].to_string(),
            mean: mean[j],
            std: std[j],
            q16: q16[j],
            median: q50[j],
            q84: q84[j],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn run_rhat_test(data0: Array2<f64>, data1: Array2<f64>, expected: Array1<f64>, tol: f64) {
        let mut psr = RhatMulti::new(3, 4);
        psr.step(data0.as_slice().unwrap()).unwrap();
        psr.step(data1.as_slice().unwrap()).unwrap();
        let rhat = psr.all().unwrap();
        let diff = *(rhat.clone() - expected.clone())
            .mapv(f64::abs)
            .max()
            .unwrap();
        assert!(
            diff < tol,
            "Mismatch in Rhat. Got {:?}, expected {:?}, diff = {:?}",
            rhat,
            expected,
            diff
        );
    }

    #[test]
    fn test_rhat_1() {
        // Step 0 data (chains x params)
        let data_step_0 = arr2(&[
            [0.0, 1.0, 0.0, 1.0], // chain 0
            [1.0, 2.0, 0.0, 2.0], // chain 1
            [0.0, 0.0, 0.0, 2.0], // chain 2
        ]);

        // Step 1 data (chains x params)
        let data_step_1 = arr2(&[
            [1.0, 2.0, 2.0, 0.0], // chain 0
            [1.0, 1.0, 1.0, 1.0], // chain 1
            [0.0, 1.0, 0.0, 0.0], // chain 2
        ]);
        let expected = array![std::f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn test_rhat_2() {
        let data_step_0 = arr2(&[
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 2.0],
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 0.0, 2.0],
            [1.0, 2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0, 2.0],
        ]);
        let expected = array![std::f64::consts::FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn test_rhat_rejects_wrong_shape_and_too_few_draws() {
        let mut psr = RhatMulti::new(2, 2);
        assert!(psr.step(&[1.0, 2.0, 3.0]).is_err());
        psr.step(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(psr.max().is_err());
    }

    #[test]
    fn test_summary_of_uniform_grid() {
        // Column 0: 0..=100, column 1: 10 * column 0.
        let samples = Array2::from_shape_fn((101, 2), |(i, j)| i as f64 * if j == 0 { 1.0 } else { 10.0 });
        let summary = summarize(&samples, &["a", "b"]).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "a");
        assert_abs_diff_eq!(summary[0].mean, 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summary[0].median, 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summary[0].q16, 16.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary[0].q84, 84.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary[1].q84, 840.0, epsilon = 1e-9);
        // Sample std of 0..=100 is sqrt(101 * 102 / 12) ~= 29.3002
        assert_abs_diff_eq!(summary[0].std, 29.300170647967224, epsilon = 1e-9);
    }

    #[test]
    fn test_summary_rejects_bad_input() {
        let one = Array2::<f64>::zeros((1, 2));
        assert!(summarize(&one, &["a", "b"]).is_err());
        let two = Array2::<f64>::zeros((5, 2));
        assert!(summarize(&two, &["a"]).is_err());
    }
}
