/*!
# Distance-modulus models

A model maps a redshift and a vector of *free* cosmological parameters to a predicted
distance modulus. Three parametrizations share a single engine and differ only in
which of {H0, Omega_M} is free:

| Variant                       | Free parameters   | Fixed / derived                      |
|-------------------------------|-------------------|--------------------------------------|
| [`Parametrization::H0`]       | H0                | Omega_M, Omega_L fixed (0.3, 0.7)    |
| [`Parametrization::OmegaM`]   | Omega_M           | H0 fixed (70), Omega_L = 1 - Omega_M |
| [`Parametrization::H0OmegaM`] | H0, Omega_M       | Omega_L = 1 - Omega_M                |

The full parameter vector `theta` seen by the likelihood is the free parameters
followed by the log-scatter term `lnsig`.

```rust
use cosmo_mcmc::model::{DistanceModel, Parametrization};

let model = Parametrization::joint();
assert_eq!(model.n_free(), 2);
assert_eq!(model.theta_names(), vec!["H0", "Omega_M", "lnsig"]);
let mu = model.distance_modulus(0.05, &[70.0, 0.3]).unwrap();
assert!(mu > 36.0 && mu < 37.0);
```
*/

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::cosmology::{distance_modulus, luminosity_distance};
use crate::errors::DomainError;

/// Open prior interval for the Hubble constant (km/s/Mpc).
pub const H0_BOUNDS: (f64, f64) = (50.0, 85.0);
/// Open prior interval for the matter density.
pub const OMEGA_M_BOUNDS: (f64, f64) = (0.01, 0.9);
/// Open prior interval for the log intrinsic scatter (mag).
pub const LNSIG_BOUNDS: (f64, f64) = (-10.0, 2.0);

/// A point in (H0, Omega_M, Omega_L) space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cosmology {
    pub h0: f64,
    pub omega_m: f64,
    pub omega_l: f64,
}

impl Cosmology {
    /// Luminosity distance in Mpc at redshift `z`.
    pub fn luminosity_distance(&self, z: f64) -> Result<f64, DomainError> {
        luminosity_distance(z, self.omega_m, self.omega_l, self.h0)
    }

    /// Distance modulus at redshift `z`.
    pub fn distance_modulus(&self, z: f64) -> Result<f64, DomainError> {
        self.luminosity_distance(z).map(distance_modulus)
    }
}

/// Anything that predicts distance moduli from free parameters.
///
/// The likelihood and the point estimator only talk to this trait, so alternative
/// models (or instrumented ones in tests) can be plugged in.
pub trait DistanceModel: Sync {
    /// Number of free cosmological parameters (excluding `lnsig`).
    fn n_free(&self) -> usize;

    /// Names of the free cosmological parameters, in order.
    fn param_names(&self) -> Vec<&'static str>;

    /// Predicted distance modulus at a single redshift.
    fn distance_modulus(&self, z: f64, params: &[f64]) -> Result<f64, DomainError>;

    /// Starting point for the least-squares seed.
    fn initial_guess(&self) -> Vec<f64>;

    /// Names of the full `theta` vector, i.e. the free parameters plus `lnsig`.
    fn theta_names(&self) -> Vec<&'static str> {
        let mut names = self.param_names();
        names.push("lnsig");
        names
    }

    /// Predicted distance moduli for a batch of redshifts.
    fn predict(&self, z: ArrayView1<'_, f64>, params: &[f64]) -> Result<Array1<f64>, DomainError> {
        let mut out = Array1::<f64>::zeros(z.len());
        for (o, &zi) in out.iter_mut().zip(z.iter()) {
            *o = self.distance_modulus(zi, params)?;
        }
        Ok(out)
    }
}

/// The three supported choices of free cosmological parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parametrization {
    /// H0 free; Omega_M and Omega_L held fixed.
    H0 { omega_m: f64, omega_l: f64 },
    /// Omega_M free in a flat universe; H0 held fixed.
    OmegaM { h0: f64 },
    /// H0 and Omega_M free in a flat universe.
    H0OmegaM,
}

impl Parametrization {
    /// H0-only model with the concordance densities (0.3, 0.7).
    pub fn h0() -> Self {
        Parametrization::H0 {
            omega_m: 0.3,
            omega_l: 0.7,
        }
    }

    /// Omega_M-only model with H0 = 70 km/s/Mpc.
    pub fn omega_m() -> Self {
        Parametrization::OmegaM { h0: 70.0 }
    }

    /// Joint H0 / Omega_M model.
    pub fn joint() -> Self {
        Parametrization::H0OmegaM
    }

    /// Short identifier used for output file names.
    pub fn label(&self) -> &'static str {
        match self {
            Parametrization::H0 { .. } => "CH0",
            Parametrization::OmegaM { .. } => "COm",
            Parametrization::H0OmegaM => "CH0_Om",
        }
    }

    /// Maps free parameters to a full cosmology.
    ///
    /// # Errors
    ///
    /// [`DomainError::InvalidArgument`] if `params` has the wrong length.
    pub fn cosmology(&self, params: &[f64]) -> Result<Cosmology, DomainError> {
        if params.len() != self.n_free() {
            return Err(DomainError::InvalidArgument("wrong number of model parameters"));
        }
        Ok(match *self {
            Parametrization::H0 { omega_m, omega_l } => Cosmology {
                h0: params[0],
                omega_m,
                omega_l,
            },
            Parametrization::OmegaM { h0 } => Cosmology {
                h0,
                omega_m: params[0],
                omega_l: 1.0 - params[0],
            },
            Parametrization::H0OmegaM => Cosmology {
                h0: params[0],
                omega_m: params[1],
                omega_l: 1.0 - params[1],
            },
        })
    }

    /// Prior box for the full `theta` vector (free parameters, then `lnsig`).
    pub fn prior_bounds(&self) -> PriorBounds {
        let mut bounds = match self {
            Parametrization::H0 { .. } => vec![H0_BOUNDS],
            Parametrization::OmegaM { .. } => vec![OMEGA_M_BOUNDS],
            Parametrization::H0OmegaM => vec![H0_BOUNDS, OMEGA_M_BOUNDS],
        };
        bounds.push(LNSIG_BOUNDS);
        PriorBounds::new(bounds)
    }
}

impl DistanceModel for Parametrization {
    fn n_free(&self) -> usize {
        match self {
            Parametrization::H0 { .. } | Parametrization::OmegaM { .. } => 1,
            Parametrization::H0OmegaM => 2,
        }
    }

    fn param_names(&self) -> Vec<&'static str> {
        match self {
            Parametrization::H0 { .. } => vec!["H0"],
            Parametrization::OmegaM { .. } => vec!["Omega_M"],
            Parametrization::H0OmegaM => vec!["H0", "Omega_M"],
        }
    }

    fn distance_modulus(&self, z: f64, params: &[f64]) -> Result<f64, DomainError> {
        self.cosmology(params)?.distance_modulus(z)
    }

    fn initial_guess(&self) -> Vec<f64> {
        match self {
            Parametrization::H0 { .. } => vec![70.0],
            Parametrization::OmegaM { .. } => vec![0.3],
            Parametrization::H0OmegaM => vec![70.0, 0.3],
        }
    }
}

/// Flat prior on an open box: zero log-density strictly inside, `-inf` elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorBounds {
    bounds: Vec<(f64, f64)>,
}

impl PriorBounds {
    pub fn new(bounds: Vec<(f64, f64)>) -> Self {
        Self { bounds }
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// True iff `theta` has the right length and every component lies strictly inside.
    pub fn contains(&self, theta: &[f64]) -> bool {
        theta.len() == self.bounds.len()
            && theta
                .iter()
                .zip(&self.bounds)
                .all(|(&x, &(lo, hi))| lo < x && x < hi)
    }

    /// Log of the (improper) flat prior density.
    pub fn log_prior(&self, theta: &[f64]) -> f64 {
        if self.contains(theta) {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::luminosity_distance;
    use ndarray::array;

    #[test]
    fn test_parameter_mapping() {
        let c = Parametrization::h0().cosmology(&[65.0]).unwrap();
        assert_eq!((c.h0, c.omega_m, c.omega_l), (65.0, 0.3, 0.7));

        let c = Parametrization::omega_m().cosmology(&[0.25]).unwrap();
        assert_eq!((c.h0, c.omega_m, c.omega_l), (70.0, 0.25, 0.75));

        let c = Parametrization::joint().cosmology(&[72.0, 0.4]).unwrap();
        assert_eq!(c.h0, 72.0);
        assert_eq!(c.omega_m, 0.4);
        assert!((c.omega_l - 0.6).abs() < 1e-15);
    }

    #[test]
    fn test_wrong_parameter_count() {
        assert!(Parametrization::joint().cosmology(&[70.0]).is_err());
        assert!(Parametrization::h0()
            .distance_modulus(0.1, &[70.0, 0.3])
            .is_err());
    }

    #[test]
    fn test_modulus_matches_distance() {
        let models = [
            (Parametrization::h0(), vec![68.0]),
            (Parametrization::omega_m(), vec![0.35]),
            (Parametrization::joint(), vec![74.0, 0.2]),
        ];
        let z = array![0.001, 0.01, 0.05, 0.3, 1.2];
        for (model, params) in models.iter() {
            let mu = model.predict(z.view(), params).unwrap();
            let c = model.cosmology(params).unwrap();
            for (&zi, &mi) in z.iter().zip(mu.iter()) {
                let dl = luminosity_distance(zi, c.omega_m, c.omega_l, c.h0).unwrap();
                assert!(
                    (mi - (5.0 * dl.log10() + 25.0)).abs() < 1e-9,
                    "{model:?} at z = {zi}: {mi}"
                );
            }
        }
    }

    #[test]
    fn test_prior_box_is_open() {
        let prior = Parametrization::joint().prior_bounds();
        assert_eq!(prior.len(), 3);
        assert_eq!(prior.log_prior(&[70.0, 0.3, -1.0]), 0.0);

        // Each bound, exactly on the edge and just outside.
        let inside = [70.0, 0.3, -1.0];
        for (i, &(lo, hi)) in prior.bounds().iter().enumerate() {
            for x in [lo, hi, lo - 1e-9, hi + 1e-9] {
                let mut theta = inside;
                theta[i] = x;
                assert_eq!(prior.log_prior(&theta), f64::NEG_INFINITY, "{theta:?}");
            }
            for x in [lo + 1e-9, hi - 1e-9] {
                let mut theta = inside;
                theta[i] = x;
                assert_eq!(prior.log_prior(&theta), 0.0, "{theta:?}");
            }
        }
    }

    #[test]
    fn test_prior_rejects_length_mismatch_and_nan() {
        let prior = Parametrization::h0().prior_bounds();
        assert_eq!(prior.log_prior(&[70.0]), f64::NEG_INFINITY);
        assert_eq!(prior.log_prior(&[f64::NAN, 0.0]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_theta_names() {
        assert_eq!(Parametrization::h0().theta_names(), vec!["H0", "lnsig"]);
        assert_eq!(Parametrization::omega_m().theta_names(), vec!["Omega_M", "lnsig"]);
    }
}
