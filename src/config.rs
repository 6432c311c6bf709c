//! Run configuration: sampler and point-estimator settings, loadable from TOML.
//!
//! ```toml
//! [sampler]
//! n_walkers = 500
//! n_steps = 500
//! burn_in = 50
//!
//! [fit]
//! initial_scatter = 0.3
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{CosmoError, Result};

/// Settings for the affine-invariant ensemble sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of walkers; must be even and at least 4.
    pub n_walkers: usize,
    /// Steps per walker, burn-in included.
    pub n_steps: usize,
    /// Leading steps dropped from every walker before flattening.
    pub burn_in: usize,
    /// Standard deviation of the Gaussian ball around the point estimate.
    pub jitter: f64,
    /// Stretch-move scale `a` (> 1).
    pub stretch_scale: f64,
    /// Evaluate walkers with rayon.
    pub parallel: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_walkers: 500,
            n_steps: 500,
            burn_in: 50,
            jitter: 1e-4,
            stretch_scale: 2.0,
            parallel: true,
        }
    }
}

/// Settings for the two-stage point estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Scatter (mag) whose log seeds `lnsig` before minimization.
    pub initial_scatter: f64,
    /// Iteration cap for Nelder–Mead.
    pub max_iters: u64,
    /// Simplex standard-deviation tolerance for Nelder–Mead.
    pub sd_tolerance: f64,
    /// Retry the least-squares seed with 1/edm weights when it falls outside the prior.
    pub weighted_retry: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            initial_scatter: 0.3,
            max_iters: 5_000,
            sd_tolerance: 1e-10,
            weighted_retry: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampler: SamplerConfig,
    pub fit: FitConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.sampler;
        if s.n_walkers < 4 || s.n_walkers % 2 != 0 {
            return Err(CosmoError::Config(format!(
                "n_walkers must be even and >= 4, got {}",
                s.n_walkers
            )));
        }
        if s.burn_in >= s.n_steps {
            return Err(CosmoError::Config(format!(
                "burn_in ({}) must be smaller than n_steps ({})",
                s.burn_in, s.n_steps
            )));
        }
        if !(s.jitter.is_finite() && s.jitter > 0.0) {
            return Err(CosmoError::Config(format!("jitter must be > 0, got {}", s.jitter)));
        }
        if !(s.stretch_scale.is_finite() && s.stretch_scale > 1.0) {
            return Err(CosmoError::Config(format!(
                "stretch_scale must be > 1, got {}",
                s.stretch_scale
            )));
        }
        let f = &self.fit;
        if !(f.initial_scatter.is_finite() && f.initial_scatter > 0.0) {
            return Err(CosmoError::Config(format!(
                "initial_scatter must be > 0, got {}",
                f.initial_scatter
            )));
        }
        if f.max_iters == 0 {
            return Err(CosmoError::Config("max_iters must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let c = Config::default();
        assert_eq!(c.sampler.n_walkers, 500);
        assert_eq!(c.sampler.n_steps, 500);
        assert_eq!(c.sampler.burn_in, 50);
        assert_eq!(c.sampler.jitter, 1e-4);
        assert_eq!(c.fit.initial_scatter, 0.3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = Config::from_toml_str("[sampler]\nn_walkers = 64\nn_steps = 100\n").unwrap();
        assert_eq!(c.sampler.n_walkers, 64);
        assert_eq!(c.sampler.n_steps, 100);
        assert_eq!(c.sampler.burn_in, 50);
        assert_eq!(c.fit, FitConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml_str("[sampler]\nn_walkers = 7\n"),
            Err(CosmoError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[sampler]\nn_steps = 10\nburn_in = 10\n"),
            Err(CosmoError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[fit]\ninitial_scatter = 0.0\n"),
            Err(CosmoError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[sampler\n"),
            Err(CosmoError::Config(_))
        ));
    }
}
