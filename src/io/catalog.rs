//! Whitespace-separated distance catalogs.
//!
//! One object per line; `#` starts a comment and blank lines are skipped. Columns:
//!
//! | index | content                          |
//! |-------|----------------------------------|
//! | 0     | right ascension (deg)            |
//! | 1     | declination (deg)                |
//! | 2     | heliocentric redshift            |
//! | 3     | unused                           |
//! | 4     | luminosity distance (Mpc)        |
//! | 5     | luminosity distance error (Mpc)  |
//!
//! Extra columns are ignored.

use std::f64::consts::LN_10;
use std::path::Path;
use tracing::debug;

use crate::cosmology::{distance_modulus, SPEED_OF_LIGHT_KM_S};
use crate::data::ObservationSet;
use crate::errors::{CosmoError, Result};

/// CMB dipole speed in km/s.
pub const CMB_DIPOLE_SPEED: f64 = 371.0;
/// CMB dipole apex right ascension (deg).
pub const CMB_DIPOLE_RA: f64 = 168.0119;
/// CMB dipole apex declination (deg).
pub const CMB_DIPOLE_DEC: f64 = -6.9830;

const N_COLUMNS: usize = 6;

/// One catalog line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogRow {
    pub ra: f64,
    pub dec: f64,
    pub z_helio: f64,
    pub distance: f64,
    pub distance_err: f64,
}

/// Parses catalog text. Line numbers in errors are 1-based.
pub fn parse_catalog(text: &str) -> Result<Vec<CatalogRow>> {
    let mut rows = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < N_COLUMNS {
            return Err(CosmoError::Parse {
                line: idx + 1,
                reason: format!("expected {N_COLUMNS} columns, found {}", fields.len()),
            });
        }
        let value = |col: usize| -> Result<f64> {
            fields[col].parse::<f64>().map_err(|e| CosmoError::Parse {
                line: idx + 1,
                reason: format!("column {col} ({:?}): {e}", fields[col]),
            })
        };
        rows.push(CatalogRow {
            ra: value(0)?,
            dec: value(1)?,
            z_helio: value(2)?,
            distance: value(4)?,
            distance_err: value(5)?,
        });
    }
    Ok(rows)
}

/// Reads and parses a catalog file.
pub fn read_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogRow>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let rows = parse_catalog(&text)?;
    debug!(path = %path.as_ref().display(), rows = rows.len(), "read catalog");
    Ok(rows)
}

/// Converts a heliocentric redshift to the CMB rest frame.
///
/// `ra` and `dec` are in degrees. The observer's motion along the line of sight,
/// `v cos(theta)` with `theta` the angle to the dipole apex, is removed:
/// `1 + z_cmb = (1 + z_helio) / (1 - v cos(theta) / c)`.
pub fn helio_to_cmb(z_helio: f64, ra: f64, dec: f64) -> f64 {
    let (ra, dec) = (ra.to_radians(), dec.to_radians());
    let (ra0, dec0) = (CMB_DIPOLE_RA.to_radians(), CMB_DIPOLE_DEC.to_radians());
    let cos_theta = dec.sin() * dec0.sin() + dec.cos() * dec0.cos() * (ra - ra0).cos();
    let v_los = CMB_DIPOLE_SPEED * cos_theta;
    (1.0 + z_helio) / (1.0 - v_los / SPEED_OF_LIGHT_KM_S) - 1.0
}

/// Distance (Mpc) and its error to a distance modulus and its first-order error.
pub fn dist_to_modulus(distance: f64, distance_err: f64) -> Result<(f64, f64)> {
    if !(distance.is_finite() && distance > 0.0) {
        return Err(CosmoError::InvalidInput(format!(
            "distance must be positive and finite, got {distance}"
        )));
    }
    let dm = distance_modulus(distance);
    let edm = 5.0 * distance_err / (distance * LN_10);
    Ok((dm, edm))
}

/// Rows to an [`ObservationSet`] of (z_cmb, dm, edm).
pub fn observations_from_rows(rows: &[CatalogRow]) -> Result<ObservationSet> {
    let mut z = Vec::with_capacity(rows.len());
    let mut dm = Vec::with_capacity(rows.len());
    let mut edm = Vec::with_capacity(rows.len());
    for row in rows {
        let (m, e) = dist_to_modulus(row.distance, row.distance_err)?;
        z.push(helio_to_cmb(row.z_helio, row.ra, row.dec));
        dm.push(m);
        edm.push(e);
    }
    ObservationSet::from_vecs(z, dm, edm)
}

/// Reads a catalog file straight into an [`ObservationSet`].
pub fn load_observations<P: AsRef<Path>>(path: P) -> Result<ObservationSet> {
    observations_from_rows(&read_catalog(path)?)
}
