//! # Thin-lens parabolic reconstruction
//!
//! In the thin-lens approximation the quadrupole is a kick `[[1, 0], [−k, 1]]`
//! (`k = K1·L`) followed by a drift of length `d = drift + L/2`. The squared beam size
//! at the sensor is then a parabola in `k`:
//!
//! ```text
//! σ²(k) = A·k² + B·k + C
//!
//! A = d²·s11
//! B = −2·d·s11 − 2·d²·s12
//! C = s11 + 2·d·s12 + d²·s22
//! ```
//!
//! Fitting `(A, B, C)` and inverting these relations gives the sigma matrix at the
//! thin-lens location. For the vertical plane the strength is negated before fitting;
//! the α derived from the fit is used as is.
//!
//! A non-positive leading coefficient `A` has no physical sigma matrix and is reported
//! as [`ReconstructionError::NonPositiveCurvature`].
use itertools::{Itertools, MinMaxResult};
use log::debug;

use crate::{
    constants::{Meter, K1L},
    emittance_errors::{EmittanceError, ReconstructionError},
    optics::OpticsState,
    reconstruction::{
        ensure_distinct_points, least_squares::solve_normal_equations, ReconstructionMethod,
        SigmaMatrix, TwissResult,
    },
    scan::ScanResult,
    strength::StrengthConverter,
};

/// Fitted `σ² = a·k² + b·k + c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parabola {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Parabola {
    #[inline]
    pub fn eval(&self, k: K1L) -> f64 {
        (self.a * k + self.b) * k + self.c
    }

    /// Strength at the waist of the parabola.
    pub fn vertex(&self) -> K1L {
        -self.b / (2.0 * self.a)
    }

    /// Sigma matrix at the thin-lens location for a lens-to-sensor distance `d`.
    pub fn to_sigma_matrix(&self, d: Meter) -> SigmaMatrix {
        let d2 = d * d;
        let s11 = self.a / d2;
        let s12 = -(self.b + 2.0 * self.a / d) / (2.0 * d2);
        let s22 = (self.c - s11 - 2.0 * d * s12) / d2;
        SigmaMatrix::new(s11, s12, s22)
    }
}

/// One sample of the fitted curve, for overlay on the measured scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub k1l: K1L,
    pub sigma_squared: f64,
}

/// Thin-lens reconstruction output: the contract result plus the fitted curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinLensSolution {
    pub twiss: TwissResult,
    pub sigma: SigmaMatrix,
    pub parabola: Parabola,
    /// Range of `K1·L` covered by the scan (plane sign applied).
    pub k1l_range: (K1L, K1L),
}

impl ThinLensSolution {
    /// Sample the fitted parabola at `n` evenly spaced strengths over the scanned range.
    pub fn fitted_curve(&self, n: usize) -> Vec<CurvePoint> {
        let (lo, hi) = self.k1l_range;
        let last = n.saturating_sub(1).max(1) as f64;
        (0..n)
            .map(|i| {
                let k1l = lo + (hi - lo) * i as f64 / last;
                CurvePoint {
                    k1l,
                    sigma_squared: self.parabola.eval(k1l),
                }
            })
            .collect()
    }
}

/// Fit the thin-lens parabola of a scan.
///
/// Arguments
/// -----------------
/// * `scan`: Readback currents and beam sizes of one plane.
/// * `optics`: Optics state providing calibration, energy and lengths.
///
/// Return
/// ----------
/// * The [`ThinLensSolution`], or
///   - [`EmittanceError::InvalidConfiguration`] for an invalid optics state,
///   - [`EmittanceError::Reconstruction`] with fewer than three distinct strengths, a
///     singular fit, a non-positive leading coefficient or a degenerate emittance.
///
/// See also
/// ------------
/// * [`Parabola::to_sigma_matrix`] – Closed-form inversion of the fit.
pub fn solve(scan: &ScanResult, optics: &OpticsState) -> Result<ThinLensSolution, EmittanceError> {
    optics.validate()?;
    let converter = StrengthConverter::new(optics)?;
    let plane = scan.plane();
    let k1l = converter.k1l(scan.currents(), optics.energy, plane)?;
    ensure_distinct_points(&k1l)?;

    let rows: Vec<[f64; 3]> = k1l.iter().map(|&k| [k * k, k, 1.0]).collect();
    let coeffs = solve_normal_equations(&rows, &scan.sigma_squared())?;
    let parabola = Parabola {
        a: coeffs[0],
        b: coeffs[1],
        c: coeffs[2],
    };
    if parabola.a.is_nan() || parabola.a <= 0.0 {
        return Err(ReconstructionError::NonPositiveCurvature(parabola.a).into());
    }

    let sigma = parabola.to_sigma_matrix(optics.thin_lens_distance());
    debug!(
        "Thin-lens fit ({plane}, {} points): a={:e}, b={:e}, c={:e}, waist at K1L={:.4}",
        scan.len(),
        parabola.a,
        parabola.b,
        parabola.c,
        parabola.vertex()
    );

    let twiss = TwissResult::from_sigma(
        &sigma,
        plane,
        ReconstructionMethod::ThinLens,
        optics.lorentz_gamma()?,
        scan.len(),
    )?;

    let k1l_range = match k1l.iter().copied().minmax() {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(k) => (k, k),
        MinMaxResult::MinMax(lo, hi) => (lo, hi),
    };

    Ok(ThinLensSolution {
        twiss,
        sigma,
        parabola,
        k1l_range,
    })
}

#[cfg(test)]
mod thin_lens_fit_test {
    use super::*;
    use crate::{constants::Plane, optics::Calibration};
    use approx::assert_relative_eq;

    fn optics() -> OpticsState {
        OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2])).unwrap()
    }

    /// σ from the exact thin-lens model, for a given plane.
    fn thin_lens_scan(optics: &OpticsState, sigma: &SigmaMatrix, plane: Plane) -> ScanResult {
        let conv = StrengthConverter::new(optics).unwrap();
        let d = optics.thin_lens_distance();
        let currents: Vec<f64> = (0..11).map(|i| -5.0 + i as f64).collect();
        let sigmas = conv
            .k1l(&currents, optics.energy, plane)
            .unwrap()
            .iter()
            .map(|&k| sigma.propagate_size_squared(1.0 - d * k, d).sqrt())
            .collect();
        ScanResult::from_columns(plane, currents, sigmas).unwrap()
    }

    #[test]
    fn test_parabola_inversion() {
        let sigma = SigmaMatrix::new(3e-8, -1e-9, 4e-10);
        let d = 2.0;
        let p = Parabola {
            a: d * d * sigma.s11,
            b: -2.0 * d * sigma.s11 - 2.0 * d * d * sigma.s12,
            c: sigma.s11 + 2.0 * d * sigma.s12 + d * d * sigma.s22,
        };
        let back = p.to_sigma_matrix(d);
        assert_relative_eq!(back.s11, sigma.s11, max_relative = 1e-12);
        assert_relative_eq!(back.s12, sigma.s12, max_relative = 1e-10);
        assert_relative_eq!(back.s22, sigma.s22, max_relative = 1e-8);
    }

    #[test]
    fn test_exact_recovery() {
        let optics = optics();
        let truth = SigmaMatrix::from_twiss(4e-9, 6.0, -0.8);

        for plane in [Plane::Horizontal, Plane::Vertical] {
            let sol = solve(&thin_lens_scan(&optics, &truth, plane), &optics).unwrap();
            assert_relative_eq!(sol.sigma.s11, truth.s11, max_relative = 1e-6);
            assert_relative_eq!(sol.sigma.s12, truth.s12, max_relative = 1e-6);
            assert_relative_eq!(sol.sigma.s22, truth.s22, max_relative = 1e-6);
            assert_relative_eq!(sol.twiss.alpha, -0.8, max_relative = 1e-6);
            assert_eq!(sol.twiss.method, ReconstructionMethod::ThinLens);
        }
    }

    #[test]
    fn test_fitted_curve_passes_through_data() {
        let optics = optics();
        let truth = SigmaMatrix::from_twiss(4e-9, 6.0, -0.8);
        let scan = thin_lens_scan(&optics, &truth, Plane::Horizontal);
        let sol = solve(&scan, &optics).unwrap();

        let curve = sol.fitted_curve(11);
        assert_eq!(curve.len(), 11);
        // The scan currents are evenly spaced, so the samples coincide with the data
        for (pt, sigma) in curve.iter().zip(scan.sigmas()) {
            assert_relative_eq!(pt.sigma_squared, sigma * sigma, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_non_positive_curvature() {
        let optics = optics();
        // Concave σ² in k
        let currents = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        let sigmas = currents
            .iter()
            .map(|&i: &f64| (1e-6 - 1e-8 * i * i).sqrt())
            .collect();
        let scan = ScanResult::from_columns(Plane::Horizontal, currents, sigmas).unwrap();

        assert!(matches!(
            solve(&scan, &optics),
            Err(EmittanceError::Reconstruction(
                ReconstructionError::NonPositiveCurvature(_)
            ))
        ));
    }
}
