/*!
# Likelihood engine

Gaussian likelihood of observed distance moduli with per-point measurement errors
plus an intrinsic scatter \(\sigma = e^{\ln\sigma}\):

\[
\ln L(\theta) = -\tfrac{1}{2} \sum_i \left[ (\mu_i - \mu(z_i;\theta))^2 w_i - \ln w_i \right],
\qquad w_i = \frac{1}{\sigma_{\mu,i}^2 + e^{2\ln\sigma}}
\]

The \(-\ln w_i\) term keeps the likelihood normalized across different scatter values.
Unphysical cosmologies are not errors here: they evaluate to `-inf`.
*/

use tracing::trace;

use crate::core::Target;
use crate::data::ObservationSet;
use crate::model::{DistanceModel, PriorBounds};

/// Log-posterior of one model on one observation set.
///
/// Borrows everything it needs; cloning the data per evaluation is never necessary.
#[derive(Debug, Clone)]
pub struct Posterior<'a, M: DistanceModel> {
    model: &'a M,
    prior: &'a PriorBounds,
    observations: &'a ObservationSet,
}

impl<'a, M: DistanceModel> Posterior<'a, M> {
    pub fn new(model: &'a M, prior: &'a PriorBounds, observations: &'a ObservationSet) -> Self {
        Self {
            model,
            prior,
            observations,
        }
    }

    pub fn model(&self) -> &'a M {
        self.model
    }

    pub fn prior(&self) -> &'a PriorBounds {
        self.prior
    }

    pub fn observations(&self) -> &'a ObservationSet {
        self.observations
    }

    /// Length of `theta`: free model parameters plus `lnsig`.
    pub fn n_dim(&self) -> usize {
        self.model.n_free() + 1
    }

    /// Gaussian log-likelihood with intrinsic scatter. `theta = [params.., lnsig]`.
    ///
    /// Returns `-inf` for a malformed `theta`, an unphysical cosmology, or any
    /// non-finite intermediate result.
    pub fn log_likelihood(&self, theta: &[f64]) -> f64 {
        if theta.len() != self.n_dim() {
            return f64::NEG_INFINITY;
        }
        let (params, lnsig) = theta.split_at(self.model.n_free());
        let scatter_var = (2.0 * lnsig[0]).exp();

        let prediction = match self.model.predict(self.observations.z(), params) {
            Ok(p) => p,
            Err(e) => {
                trace!(?theta, error = %e, "model outside physical domain");
                return f64::NEG_INFINITY;
            }
        };

        let sum: f64 = prediction
            .iter()
            .zip(self.observations.dm().iter())
            .zip(self.observations.edm().iter())
            .map(|((&model, &dm), &edm)| {
                let inv_var = 1.0 / (edm * edm + scatter_var);
                let resid = dm - model;
                resid * resid * inv_var - inv_var.ln()
            })
            .sum();

        let ll = -0.5 * sum;
        if ll.is_nan() || ll == f64::INFINITY {
            f64::NEG_INFINITY
        } else {
            ll
        }
    }

    /// Flat prior over the configured open box.
    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        self.prior.log_prior(theta)
    }

    /// `log_prior + log_likelihood`; the model is never evaluated outside the prior.
    pub fn log_posterior(&self, theta: &[f64]) -> f64 {
        let lp = self.log_prior(theta);
        if !lp.is_finite() {
            return f64::NEG_INFINITY;
        }
        lp + self.log_likelihood(theta)
    }

    /// Objective for the point estimator: `-log_likelihood`, priors ignored.
    pub fn negative_log_likelihood(&self, theta: &[f64]) -> f64 {
        -self.log_likelihood(theta)
    }
}

impl<M: DistanceModel> Target for Posterior<'_, M> {
    fn n_dim(&self) -> usize {
        Posterior::n_dim(self)
    }

    fn unnorm_log_prob(&self, theta: &[f64]) -> f64 {
        self.log_posterior(theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DomainError;
    use crate::model::Parametrization;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Constant-offset model that counts how often it is evaluated.
    struct CountingModel {
        calls: AtomicUsize,
    }

    impl DistanceModel for CountingModel {
        fn n_free(&self) -> usize {
            1
        }
        fn param_names(&self) -> Vec<&'static str> {
            vec!["offset"]
        }
        fn distance_modulus(&self, _z: f64, params: &[f64]) -> Result<f64, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(params[0])
        }
        fn initial_guess(&self) -> Vec<f64> {
            vec![0.0]
        }
    }

    fn small_set() -> ObservationSet {
        ObservationSet::from_vecs(vec![0.1, 0.2, 0.3], vec![1.0, 2.0, 3.0], vec![0.5, 0.5, 1.0])
            .unwrap()
    }

    #[test]
    fn test_log_likelihood_matches_hand_computation() {
        let model = CountingModel {
            calls: AtomicUsize::new(0),
        };
        let prior = PriorBounds::new(vec![(-10.0, 10.0), (-10.0, 2.0)]);
        let obs = small_set();
        let post = Posterior::new(&model, &prior, &obs);

        let (offset, lnsig) = (2.0, (0.5_f64).ln());
        let s2: f64 = 0.25;
        let expected = -0.5
            * [(1.0, 0.5), (2.0, 0.5), (3.0, 1.0)]
                .iter()
                .map(|&(dm, e): &(f64, f64)| {
                    let w = 1.0 / (e * e + s2);
                    (dm - offset).powi(2) * w - w.ln()
                })
                .sum::<f64>();
        assert_relative_eq!(post.log_likelihood(&[offset, lnsig]), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_posterior_short_circuits_outside_prior() {
        let model = CountingModel {
            calls: AtomicUsize::new(0),
        };
        let prior = PriorBounds::new(vec![(-10.0, 10.0), (-10.0, 2.0)]);
        let obs = small_set();
        let post = Posterior::new(&model, &prior, &obs);

        for theta in [[11.0, 0.0], [0.0, 2.0], [10.0, -1.0], [0.0, -10.0], [f64::NAN, 0.0]] {
            assert_eq!(post.log_posterior(&theta), f64::NEG_INFINITY);
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);

        assert!(post.log_posterior(&[1.0, 0.0]).is_finite());
        assert_eq!(model.calls.load(Ordering::SeqCst), obs.len());
    }

    #[test]
    fn test_posterior_equals_likelihood_inside_prior() {
        let model = Parametrization::h0();
        let prior = model.prior_bounds();
        let obs = ObservationSet::from_vecs(
            vec![0.01, 0.02, 0.03],
            vec![33.2, 34.8, 35.7],
            vec![0.1, 0.1, 0.1],
        )
        .unwrap();
        let post = Posterior::new(&model, &prior, &obs);
        let theta = [70.0, -2.0];
        assert_eq!(post.log_posterior(&theta), post.log_likelihood(&theta));
        assert_eq!(post.unnorm_log_prob(&theta), post.log_posterior(&theta));
        assert_eq!(
            post.negative_log_likelihood(&theta),
            -post.log_likelihood(&theta)
        );
    }

    #[test]
    fn test_unphysical_cosmology_gives_negative_infinity() {
        // Omega_M = 0 with Omega_L = 2 makes E(z)^2 negative beyond z ~ 0.41.
        let model = Parametrization::H0 {
            omega_m: 0.0,
            omega_l: 2.0,
        };
        let prior = model.prior_bounds();
        let obs =
            ObservationSet::from_vecs(vec![0.1, 1.0], vec![38.0, 44.0], vec![0.1, 0.1]).unwrap();
        let post = Posterior::new(&model, &prior, &obs);
        assert_eq!(post.log_likelihood(&[70.0, -2.0]), f64::NEG_INFINITY);
        assert_eq!(post.log_posterior(&[70.0, -2.0]), f64::NEG_INFINITY);
        assert_eq!(post.negative_log_likelihood(&[70.0, -2.0]), f64::INFINITY);
    }

    #[test]
    fn test_malformed_theta() {
        let model = Parametrization::joint();
        let prior = model.prior_bounds();
        let obs = small_set();
        let post = Posterior::new(&model, &prior, &obs);
        assert_eq!(post.log_likelihood(&[70.0, -1.0]), f64::NEG_INFINITY);
    }
}
