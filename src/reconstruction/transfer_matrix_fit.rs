//! # Transfer-matrix least-squares reconstruction
//!
//! For every scan point the readback current is converted to `K1`, the thick-lens
//! transport from the quadrupole entrance to the sensor is built, and its position
//! row gives one line of the design matrix:
//!
//! ```text
//! [ R11²   2·R11·R12   R12² ] · [s11 s12 s22]ᵀ ≈ σ²
//! ```
//!
//! `(R11, R12)` are used for the horizontal plane, `(R33, R34)` for the vertical one.
//! The system is solved by ordinary least squares (no weighting); the resulting sigma
//! matrix is expressed at the quadrupole entrance.
use log::debug;

use crate::{
    constants::Plane,
    emittance_errors::EmittanceError,
    optics::OpticsState,
    reconstruction::{
        ensure_distinct_points, least_squares::solve_normal_equations, ReconstructionMethod,
        SigmaMatrix, TwissResult,
    },
    scan::ScanResult,
    strength::StrengthConverter,
    transfer_matrix::{build, plane_coefficients},
};

/// Fit the sigma matrix at the quadrupole entrance.
///
/// Arguments
/// -----------------
/// * `scan`: Readback currents and beam sizes of one plane.
/// * `optics`: Optics state providing calibration, energy and lengths.
///
/// Return
/// ----------
/// * The fitted [`SigmaMatrix`], or
///   - [`EmittanceError::InvalidConfiguration`] for an invalid optics state,
///   - [`EmittanceError::Reconstruction`] with fewer than three distinct strengths or a
///     singular normal matrix.
pub fn fit_sigma_matrix(
    scan: &ScanResult,
    optics: &OpticsState,
) -> Result<SigmaMatrix, EmittanceError> {
    optics.validate()?;
    let converter = StrengthConverter::new(optics)?;
    // Physical strengths; the vertical sign lives in the 4×4 block
    let k1 = converter.k1(scan.currents(), optics.energy, Plane::Horizontal)?;
    ensure_distinct_points(&k1)?;

    let plane = scan.plane();
    let rows: Vec<[f64; 3]> = build(&k1, optics.drift_length, optics.quad_length)
        .iter()
        .map(|m| {
            let (r11, r12) = plane_coefficients(m, plane);
            [r11 * r11, 2.0 * r11 * r12, r12 * r12]
        })
        .collect();

    let s = solve_normal_equations(&rows, &scan.sigma_squared())?;
    debug!(
        "Transfer-matrix fit ({plane}, {} points): s11={:e}, s12={:e}, s22={:e}",
        scan.len(),
        s[0],
        s[1],
        s[2]
    );
    Ok(SigmaMatrix::new(s[0], s[1], s[2]))
}

/// Reconstruct Twiss parameters with the transfer-matrix method.
///
/// See also
/// ------------
/// * [`fit_sigma_matrix`] – The least-squares step.
/// * [`TwissResult::from_sigma`] – Sigma matrix → Twiss derivation.
pub fn reconstruct(scan: &ScanResult, optics: &OpticsState) -> Result<TwissResult, EmittanceError> {
    let sigma = fit_sigma_matrix(scan, optics)?;
    Ok(TwissResult::from_sigma(
        &sigma,
        scan.plane(),
        ReconstructionMethod::TransferMatrix,
        optics.lorentz_gamma()?,
        scan.len(),
    )?)
}

#[cfg(test)]
mod transfer_matrix_fit_test {
    use super::*;
    use crate::{
        emittance_errors::ReconstructionError, optics::Calibration,
        transfer_matrix::quad_to_screen,
    };
    use approx::assert_relative_eq;

    fn optics() -> OpticsState {
        OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2])).unwrap()
    }

    /// Exact σ for each current, from the thick-lens model.
    fn synthetic_scan(optics: &OpticsState, sigma: &SigmaMatrix, plane: Plane) -> ScanResult {
        let conv = StrengthConverter::new(optics).unwrap();
        let currents: Vec<f64> = (0..15).map(|i| -7.0 + i as f64).collect();
        let k1 = conv.k1(&currents, optics.energy, plane).unwrap();
        let sigmas = k1
            .iter()
            .map(|&k| {
                let m = quad_to_screen(k, optics.quad_length, optics.drift_length);
                sigma.propagate_size_squared(m[(0, 0)], m[(0, 1)]).sqrt()
            })
            .collect();
        ScanResult::from_columns(plane, currents, sigmas).unwrap()
    }

    #[test]
    fn test_exact_recovery_both_planes() {
        let optics = optics();
        let truth = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);

        for plane in [Plane::Horizontal, Plane::Vertical] {
            let scan = synthetic_scan(&optics, &truth, plane);
            let fit = fit_sigma_matrix(&scan, &optics).unwrap();
            assert_relative_eq!(fit.s11, truth.s11, max_relative = 1e-6);
            assert_relative_eq!(fit.s12, truth.s12, max_relative = 1e-6);
            assert_relative_eq!(fit.s22, truth.s22, max_relative = 1e-6);

            let twiss = reconstruct(&scan, &optics).unwrap();
            assert_eq!(twiss.plane, plane);
            assert_relative_eq!(twiss.emittance, 5e-9, max_relative = 1e-6);
            assert_relative_eq!(twiss.beta, 8.0, max_relative = 1e-6);
            assert_relative_eq!(twiss.alpha, 1.2, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_too_few_points() {
        let optics = optics();
        let scan =
            ScanResult::from_columns(Plane::Horizontal, vec![1.0, 1.0, 2.0], vec![1e-3; 3])
                .unwrap();
        assert_eq!(
            reconstruct(&scan, &optics),
            Err(EmittanceError::Reconstruction(
                ReconstructionError::InsufficientPoints { got: 2, need: 3 }
            ))
        );
    }

    #[test]
    fn test_missing_calibration() {
        let mut optics = optics();
        optics.calibration = None;
        let scan = ScanResult::from_columns(
            Plane::Horizontal,
            vec![1.0, 2.0, 3.0],
            vec![1e-3, 2e-3, 3e-3],
        )
        .unwrap();
        assert!(matches!(
            reconstruct(&scan, &optics),
            Err(EmittanceError::InvalidConfiguration(_))
        ));
    }
}
