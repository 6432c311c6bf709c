/*!
# Point estimator

Two stages, both prior-free:

1. An unweighted Levenberg–Marquardt least-squares fit of the distance-modulus model to
   `(z, dm)` seeds the free cosmological parameters. Measurement errors and scatter
   are ignored here; the fit is only a starting point.
2. `lnsig = ln(initial_scatter)` is appended and the full negative log-likelihood is
   minimized with Nelder–Mead.

A least-squares failure is fatal ([`CosmoError::FitDidNotConverge`]): a bad seed would
silently corrupt the whole posterior run. A Nelder–Mead run that stops without
converging still returns its best iterate, flagged with `converged = false`.
*/

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use ndarray::ArrayView1;
use tracing::{debug, info, warn};

use crate::config::FitConfig;
use crate::errors::{CosmoError, Result};
use crate::likelihood::Posterior;
use crate::model::DistanceModel;

/// Maximum-likelihood estimate of `theta = [params.., lnsig]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointEstimate {
    /// Best parameter vector found by the minimizer.
    pub theta: Vec<f64>,
    /// Negative log-likelihood at `theta`.
    pub nll: f64,
    /// Whether Nelder–Mead reported convergence.
    pub converged: bool,
    /// Nelder–Mead iterations used.
    pub iterations: u64,
    /// Free parameters from the least-squares seed.
    pub least_squares: Vec<f64>,
}

/// Outcome of [`minimize_nll`].
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMeadFit {
    /// Best iterate, or the start if no finite improvement was found.
    pub theta: Vec<f64>,
    pub nll: f64,
    pub converged: bool,
    pub iterations: u64,
}

/// Unweighted (or `1/edm`-weighted) nonlinear least squares of `model` against `dm`.
struct CurveFit<'a, M: DistanceModel> {
    model: &'a M,
    z: ArrayView1<'a, f64>,
    dm: ArrayView1<'a, f64>,
    edm: Option<ArrayView1<'a, f64>>,
    params: DVector<f64>,
}

impl<M: DistanceModel> CurveFit<'_, M> {
    fn residuals_at(&self, params: &[f64]) -> Option<DVector<f64>> {
        let prediction = self.model.predict(self.z, params).ok()?;
        let mut out = DVector::<f64>::zeros(self.z.len());
        for (i, r) in out.iter_mut().enumerate() {
            let weight = self.edm.map_or(1.0, |e| 1.0 / e[i]);
            *r = (prediction[i] - self.dm[i]) * weight;
        }
        if out.iter().all(|r| r.is_finite()) {
            Some(out)
        } else {
            None
        }
    }
}

impl<M: DistanceModel> LeastSquaresProblem<f64, Dyn, Dyn> for CurveFit<'_, M> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals_at(self.params.as_slice())
    }

    /// Central finite differences.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let n_params = self.params.len();
        let mut jac = DMatrix::<f64>::zeros(self.z.len(), n_params);
        let mut probe = self.params.as_slice().to_vec();
        for j in 0..n_params {
            let x = self.params[j];
            let h = 1e-6 * x.abs().max(1.0);
            probe[j] = x + h;
            let plus = self.residuals_at(&probe)?;
            probe[j] = x - h;
            let minus = self.residuals_at(&probe)?;
            probe[j] = x;
            jac.set_column(j, &((plus - minus) / (2.0 * h)));
        }
        Some(jac)
    }
}

/// Least-squares seed for the free model parameters.
///
/// Pass `edm` to weight residuals by `1/edm`; `None` gives the plain unweighted fit.
///
/// # Errors
///
/// [`CosmoError::FitDidNotConverge`] when Levenberg–Marquardt terminates unsuccessfully
/// (singular Jacobian, evaluation budget exhausted, residuals undefined at the start).
pub fn curve_fit<'a, M: DistanceModel>(
    model: &'a M,
    z: ArrayView1<'a, f64>,
    dm: ArrayView1<'a, f64>,
    edm: Option<ArrayView1<'a, f64>>,
) -> Result<Vec<f64>> {
    let problem = CurveFit {
        model,
        z,
        dm,
        edm,
        params: DVector::from_vec(model.initial_guess()),
    };
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    if !report.termination.was_successful() {
        return Err(CosmoError::FitDidNotConverge(format!(
            "least squares terminated with {:?} after {} evaluations",
            report.termination, report.number_of_evaluations
        )));
    }
    let params: Vec<f64> = problem.params.iter().copied().collect();
    if params.iter().any(|p| !p.is_finite()) {
        return Err(CosmoError::FitDidNotConverge(format!(
            "least squares produced non-finite parameters {params:?}"
        )));
    }
    debug!(
        ?params,
        objective = report.objective_function,
        evaluations = report.number_of_evaluations,
        "least-squares seed"
    );
    Ok(params)
}

/// `argmin` view of the negative log-likelihood.
struct NegLogLikelihood<'p, 'a, M: DistanceModel> {
    posterior: &'p Posterior<'a, M>,
}

impl<M: DistanceModel> CostFunction for NegLogLikelihood<'_, '_, M> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.posterior.negative_log_likelihood(theta))
    }
}

/// Nelder–Mead simplex around `theta0`: 5% steps, or 2.5e-4 for zero coordinates.
fn initial_simplex(theta0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = vec![theta0.to_vec()];
    for i in 0..theta0.len() {
        let mut vertex = theta0.to_vec();
        vertex[i] = if vertex[i] != 0.0 {
            vertex[i] * 1.05
        } else {
            2.5e-4
        };
        simplex.push(vertex);
    }
    simplex
}

/// Minimizes the negative log-likelihood from `theta0` (priors are not enforced).
pub fn minimize_nll<M: DistanceModel>(
    posterior: &Posterior<'_, M>,
    theta0: &[f64],
    config: &FitConfig,
) -> Result<NelderMeadFit> {
    let start_cost = posterior.negative_log_likelihood(theta0);
    if !start_cost.is_finite() {
        return Err(CosmoError::FitDidNotConverge(format!(
            "negative log-likelihood is not finite at the seed {theta0:?}"
        )));
    }

    let solver = NelderMead::new(initial_simplex(theta0))
        .with_sd_tolerance(config.sd_tolerance)
        .map_err(|e| CosmoError::Config(format!("Nelder-Mead tolerance: {e}")))?;
    let problem = NegLogLikelihood { posterior };
    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(config.max_iters))
        .run()
        .map_err(|e| CosmoError::FitDidNotConverge(format!("Nelder-Mead failed: {e}")))?;

    let state = result.state();
    let iterations = state.get_iter();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    let (theta, nll) = match state.get_best_param() {
        Some(best) if state.get_best_cost().is_finite() => (best.clone(), state.get_best_cost()),
        _ => (theta0.to_vec(), start_cost),
    };
    Ok(NelderMeadFit {
        theta,
        nll,
        converged,
        iterations,
    })
}

/// Two-stage maximum-likelihood point estimate.
///
/// # Errors
///
/// [`CosmoError::FitDidNotConverge`] if the least-squares seed fails, or if the
/// negative log-likelihood is undefined at the seed.
pub fn fit<M: DistanceModel>(posterior: &Posterior<'_, M>, config: &FitConfig) -> Result<PointEstimate> {
    let model = posterior.model();
    let obs = posterior.observations();
    let n_free = model.n_free();

    let mut seed = curve_fit(model, obs.z(), obs.dm(), None)?;
    let free_bounds = &posterior.prior().bounds()[..n_free];
    let in_prior = |p: &[f64]| p.iter().zip(free_bounds).all(|(&x, &(lo, hi))| lo < x && x < hi);
    if config.weighted_retry && !in_prior(seed.as_slice()) {
        warn!(?seed, "least-squares seed outside prior box, refitting with 1/edm weights");
        match curve_fit(model, obs.z(), obs.dm(), Some(obs.edm())) {
            Ok(weighted) => seed = weighted,
            Err(e) => warn!(error = %e, "weighted refit failed, keeping unweighted seed"),
        }
    }

    let mut theta0 = seed.clone();
    theta0.push(config.initial_scatter.ln());

    let NelderMeadFit {
        theta,
        nll,
        converged,
        iterations,
    } = minimize_nll(posterior, &theta0, config)?;
    if converged {
        info!(?theta, nll, iterations, "maximum-likelihood fit converged");
    } else {
        warn!(
            ?theta,
            nll, iterations, "Nelder-Mead stopped without converging; using best iterate"
        );
    }

    Ok(PointEstimate {
        theta,
        nll,
        converged,
        iterations,
        least_squares: seed,
    })
}
