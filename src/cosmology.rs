/*!
# Cosmological distances

Luminosity distance in a Friedmann–Lemaître universe with matter, a cosmological
constant and (implicitly) curvature:

\[
E(z) = \sqrt{\Omega_M (1+z)^3 + \Omega_\Lambda + (1 - \Omega_M - \Omega_\Lambda)(1+z)^2}
\]

\[
d_L = (1+z) \frac{c}{H_0} \int_0^z \frac{dz'}{E(z')}
\]

The integral is evaluated with an adaptive 21-point Gauss–Kronrod rule. This is the
hot path of the whole crate (one integral per data point per likelihood call), so the
integrator works on the stack and never allocates.

```rust
use cosmo_mcmc::cosmology::{distance_modulus, luminosity_distance};

let dl = luminosity_distance(0.05, 0.3, 0.7, 70.0).unwrap();
assert!(dl > 200.0 && dl < 230.0);
let mu = distance_modulus(dl);
assert!((mu - (5.0 * dl.log10() + 25.0)).abs() < 1e-12);
```
*/

use crate::errors::DomainError;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

const REL_TOL: f64 = 1e-6;
const ABS_TOL: f64 = 1e-12;
const MAX_DEPTH: u32 = 30;

// Kronrod abscissae on [-1, 1] (positive half, descending). Odd indices are the
// 10-point Gauss nodes.
const XGK: [f64; 11] = [
    0.995_657_163_025_808_1,
    0.973_906_528_517_171_7,
    0.930_157_491_355_708_2,
    0.865_063_366_688_984_5,
    0.780_817_726_586_416_9,
    0.679_409_568_299_024_4,
    0.562_757_134_668_604_7,
    0.433_395_394_129_247_2,
    0.294_392_862_701_460_2,
    0.148_874_338_981_631_2,
    0.0,
];

const WGK: [f64; 11] = [
    0.011_694_638_867_371_874,
    0.032_558_162_307_964_73,
    0.054_755_896_574_351_996,
    0.075_039_674_810_919_95,
    0.093_125_454_583_697_6,
    0.109_387_158_802_297_64,
    0.123_491_976_262_065_85,
    0.134_709_217_311_473_33,
    0.142_775_938_577_060_08,
    0.147_739_104_901_338_49,
    0.149_445_554_002_916_9,
];

const WG: [f64; 5] = [
    0.066_671_344_308_688_14,
    0.149_451_349_150_580_6,
    0.219_086_362_515_982_04,
    0.269_266_719_309_996_35,
    0.295_524_224_714_752_87,
];

/// Dimensionless expansion rate E(z) = H(z)/H0.
///
/// # Errors
///
/// [`DomainError::NonPositiveExpansion`] when E(z)^2 <= 0 and [`DomainError::NonFinite`]
/// when it is NaN or infinite.
#[inline]
pub fn expansion_rate(z: f64, omega_m: f64, omega_l: f64) -> Result<f64, DomainError> {
    let a = 1.0 + z;
    let a2 = a * a;
    let omega_k = 1.0 - omega_m - omega_l;
    let e2 = omega_m * a2 * a + omega_l + omega_k * a2;
    if !e2.is_finite() {
        return Err(DomainError::NonFinite { z });
    }
    if e2 <= 0.0 {
        return Err(DomainError::NonPositiveExpansion { z, value: e2 });
    }
    Ok(e2.sqrt())
}

/// Dimensionless comoving distance \(\int_0^z dz'/E(z')\).
///
/// # Errors
///
/// Any domain error raised by [`expansion_rate`] inside `[0, z]`, or
/// [`DomainError::InvalidArgument`] for a negative or non-finite redshift.
pub fn comoving_integral(z: f64, omega_m: f64, omega_l: f64) -> Result<f64, DomainError> {
    if !z.is_finite() || z < 0.0 {
        return Err(DomainError::InvalidArgument("redshift must be finite and >= 0"));
    }
    if z == 0.0 {
        return Ok(0.0);
    }
    // The Kronrod nodes never touch the endpoints.
    expansion_rate(z, omega_m, omega_l)?;
    let integrand = |x: f64| expansion_rate(x, omega_m, omega_l).map(|e| 1.0 / e);
    adaptive_kronrod(&integrand, 0.0, z, REL_TOL, 0)
}

/// Luminosity distance in Mpc.
///
/// # Arguments
///
/// * `z` - Redshift, `z >= 0`.
/// * `omega_m` - Matter density parameter.
/// * `omega_l` - Cosmological-constant density parameter. `omega_m + omega_l` need not be 1.
/// * `h0` - Hubble constant in km/s/Mpc, strictly positive.
///
/// # Errors
///
/// Returns a [`DomainError`] for unphysical parameters; callers in the likelihood map
/// this to zero probability.
pub fn luminosity_distance(
    z: f64,
    omega_m: f64,
    omega_l: f64,
    h0: f64,
) -> Result<f64, DomainError> {
    if !(h0.is_finite() && h0 > 0.0) {
        return Err(DomainError::InvalidArgument("H0 must be finite and > 0"));
    }
    let integral = comoving_integral(z, omega_m, omega_l)?;
    Ok((1.0 + z) * SPEED_OF_LIGHT_KM_S / h0 * integral)
}

/// Distance modulus for a luminosity distance in Mpc: `5 log10(d) + 25`.
#[inline]
pub fn distance_modulus(dl_mpc: f64) -> f64 {
    5.0 * dl_mpc.log10() + 25.0
}

/// One G10/K21 panel on `[a, b]`; returns `(kronrod, |kronrod - gauss|)`.
fn kronrod_panel<F>(f: &F, a: f64, b: f64) -> Result<(f64, f64), DomainError>
where
    F: Fn(f64) -> Result<f64, DomainError>,
{
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);

    let fc = f(center)?;
    let mut kronrod = WGK[10] * fc;
    let mut gauss = 0.0;
    for i in 0..10 {
        let dx = half * XGK[i];
        let pair = f(center - dx)? + f(center + dx)?;
        kronrod += WGK[i] * pair;
        if i % 2 == 1 {
            gauss += WG[i / 2] * pair;
        }
    }
    let kronrod = kronrod * half;
    let gauss = gauss * half;
    if !kronrod.is_finite() {
        return Err(DomainError::NonFinite { z: center });
    }
    Ok((kronrod, (kronrod - gauss).abs()))
}

fn adaptive_kronrod<F>(f: &F, a: f64, b: f64, rel_tol: f64, depth: u32) -> Result<f64, DomainError>
where
    F: Fn(f64) -> Result<f64, DomainError>,
{
    let (value, err) = kronrod_panel(f, a, b)?;
    if err <= (rel_tol * value.abs()).max(ABS_TOL) || depth >= MAX_DEPTH {
        return Ok(value);
    }
    let mid = 0.5 * (a + b);
    let left = adaptive_kronrod(f, a, mid, rel_tol, depth + 1)?;
    let right = adaptive_kronrod(f, mid, b, rel_tol, depth + 1)?;
    Ok(left + right)
}
