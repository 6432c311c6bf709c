//! Error types shared across the crate.
//!
//! Two families exist. [`DomainError`] describes an unphysical point in parameter
//! space; the likelihood absorbs it into a log-probability of negative infinity and
//! it never escapes the sampler. [`CosmoError`] covers everything the caller must see:
//! bad input, a fit that did not converge, a degenerate ensemble, and I/O.

use thiserror::Error;

/// Result alias for fallible crate operations.
pub type Result<T> = std::result::Result<T, CosmoError>;

/// Raised when a cosmology cannot be evaluated at some redshift.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum DomainError {
    /// E(z)^2 dropped to zero or below somewhere in the integration range.
    #[error("expansion rate squared is non-positive ({value}) at z = {z}")]
    NonPositiveExpansion { z: f64, value: f64 },

    /// E(z)^2 or an intermediate quantity was NaN or infinite.
    #[error("non-finite expansion rate at z = {z}")]
    NonFinite { z: f64 },

    /// Redshift or Hubble constant outside the region the integral is defined on.
    #[error("invalid distance argument: {0}")]
    InvalidArgument(&'static str),
}

/// Errors surfaced to callers of the inference pipeline.
#[derive(Error, Debug)]
pub enum CosmoError {
    /// Observation set or parameter vector rejected at the boundary.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Least-squares seeding failed to converge.
    #[error("Fit did not converge: {0}")]
    FitDidNotConverge(String),

    /// Every walker sits at zero posterior probability.
    #[error("Sampler degenerate: {0}")]
    SamplerDegenerate(String),

    /// Sampler misuse (e.g. running before the ensemble was initialized).
    #[error("Sampler error: {0}")]
    Sampler(String),

    /// Configuration loading or validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog line could not be parsed.
    #[error("Parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// I/O operation error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<toml::de::Error> for CosmoError {
    fn from(err: toml::de::Error) -> Self {
        CosmoError::Config(err.to_string())
    }
}
