//! Reading distance catalogs and writing sampler output.

pub mod catalog;

#[cfg(feature = "csv")]
pub mod csv;
