//! Observation sets: validated parallel arrays of (z_cmb, distance modulus, error).

use ndarray::{Array1, ArrayView1};

use crate::errors::{CosmoError, Result};

/// Immutable catalog of redshift / distance-modulus measurements.
///
/// Construction validates the arrays once, so everything downstream can assume
/// matching lengths, finite values and strictly positive uncertainties.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    z: Array1<f64>,
    dm: Array1<f64>,
    edm: Array1<f64>,
}

impl ObservationSet {
    /// Builds an observation set.
    ///
    /// # Errors
    ///
    /// [`CosmoError::InvalidInput`] if the arrays are empty, differ in length, contain
    /// non-finite values, negative redshifts or non-positive uncertainties.
    pub fn new(z: Array1<f64>, dm: Array1<f64>, edm: Array1<f64>) -> Result<Self> {
        if z.is_empty() {
            return Err(CosmoError::InvalidInput("observation set is empty".into()));
        }
        if z.len() != dm.len() || z.len() != edm.len() {
            return Err(CosmoError::InvalidInput(format!(
                "mismatched array lengths: z = {}, dm = {}, edm = {}",
                z.len(),
                dm.len(),
                edm.len()
            )));
        }
        for (i, ((&zi, &mi), &ei)) in z.iter().zip(dm.iter()).zip(edm.iter()).enumerate() {
            if !(zi.is_finite() && mi.is_finite() && ei.is_finite()) {
                return Err(CosmoError::InvalidInput(format!(
                    "non-finite value in row {i}: z = {zi}, dm = {mi}, edm = {ei}"
                )));
            }
            if zi < 0.0 {
                return Err(CosmoError::InvalidInput(format!(
                    "negative redshift in row {i}: {zi}"
                )));
            }
            if ei <= 0.0 {
                return Err(CosmoError::InvalidInput(format!(
                    "non-positive uncertainty in row {i}: {ei}"
                )));
            }
        }
        Ok(Self { z, dm, edm })
    }

    /// Convenience constructor from plain vectors.
    pub fn from_vecs(z: Vec<f64>, dm: Vec<f64>, edm: Vec<f64>) -> Result<Self> {
        Self::new(Array1::from(z), Array1::from(dm), Array1::from(edm))
    }

    /// Checks there are more points than parameters in `theta` (free params + lnsig).
    pub fn ensure_identifiable(&self, n_dim: usize) -> Result<()> {
        if self.len() < n_dim + 1 {
            return Err(CosmoError::InvalidInput(format!(
                "{} observation(s) cannot constrain {} parameters; need at least {}",
                self.len(),
                n_dim,
                n_dim + 1
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    pub fn z(&self) -> ArrayView1<'_, f64> {
        self.z.view()
    }

    pub fn dm(&self) -> ArrayView1<'_, f64> {
        self.dm.view()
    }

    pub fn edm(&self) -> ArrayView1<'_, f64> {
        self.edm.view()
    }
}
