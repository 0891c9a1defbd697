//! # Emittance reconstruction
//!
//! Turns a completed [`ScanResult`] and the session [`OpticsState`] into a
//! [`TwissResult`] with one of two interchangeable strategies:
//!
//! * [`ReconstructionMethod::TransferMatrix`] – thick-lens transport matrices and an
//!   ordinary least-squares fit of `σ² = R11²·s11 + 2·R11·R12·s12 + R12²·s22`
//!   ([`transfer_matrix_fit`]).
//! * [`ReconstructionMethod::ThinLens`] – parabolic fit of `σ²` against `K1·L` inverted
//!   through the thin-lens + drift model ([`thin_lens_fit`]).
//!
//! Both strategies end with the same sigma matrix → Twiss derivation:
//!
//! ```text
//! ε = sqrt(|s11·s22 − s12²|)    β = s11/ε    α = −s12/ε    γ = s22/ε
//! εn = ε · E_total / E_rest
//! ```
//!
//! Reconstruction is a pure computation: it never touches the hardware and can be
//! repeated on the same scan. The two methods are independent; a failure of one does
//! not affect the other (see [`reconstruct_all`]).
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    constants::Plane, emittance_errors::EmittanceError, emittance_errors::ReconstructionError,
    optics::OpticsState, scan::ScanResult,
};

mod least_squares;
pub mod thin_lens_fit;
pub mod transfer_matrix_fit;

/// Minimum number of distinct scan strengths needed by both strategies.
pub const MIN_DISTINCT_POINTS: usize = 3;

/// Second moments of the beam distribution in one plane at a reference location.
///
/// `s11` is the size squared (m²), `s12` the size-divergence correlation (m·rad)
/// and `s22` the divergence squared (rad²).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaMatrix {
    pub s11: f64,
    pub s12: f64,
    pub s22: f64,
}

impl SigmaMatrix {
    pub fn new(s11: f64, s12: f64, s22: f64) -> Self {
        SigmaMatrix { s11, s12, s22 }
    }

    /// Sigma matrix of a beam with given Twiss parameters and geometric emittance.
    pub fn from_twiss(emittance: f64, beta: f64, alpha: f64) -> Self {
        let gamma = (1.0 + alpha * alpha) / beta;
        SigmaMatrix::new(emittance * beta, -emittance * alpha, emittance * gamma)
    }

    #[inline]
    pub fn determinant(&self) -> f64 {
        self.s11 * self.s22 - self.s12 * self.s12
    }

    /// Geometric emittance, `sqrt(|det Σ|)`. Never negative, never NaN for finite input.
    #[inline]
    pub fn emittance(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Squared beam size after a transport with position row `(r11, r12)`.
    #[inline]
    pub fn propagate_size_squared(&self, r11: f64, r12: f64) -> f64 {
        r11 * r11 * self.s11 + 2.0 * r11 * r12 * self.s12 + r12 * r12 * self.s22
    }
}

/// Reconstruction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconstructionMethod {
    TransferMatrix,
    ThinLens,
}

impl ReconstructionMethod {
    pub const ALL: [ReconstructionMethod; 2] = [
        ReconstructionMethod::TransferMatrix,
        ReconstructionMethod::ThinLens,
    ];

    /// Reconstruct the Twiss parameters of a scan with this strategy.
    ///
    /// Arguments
    /// -----------------
    /// * `scan`: Completed (or reloaded) scan of one plane.
    /// * `optics`: Optics state of the session.
    ///
    /// Return
    /// ----------
    /// * The [`TwissResult`], an [`EmittanceError::InvalidConfiguration`] for a bad optics
    ///   state, or an [`EmittanceError::Reconstruction`] for degenerate data.
    ///
    /// See also
    /// ------------
    /// * [`transfer_matrix_fit::reconstruct`] – Thick-lens least squares.
    /// * [`thin_lens_fit::solve`] – Thin-lens parabola, also returning the fitted curve.
    pub fn reconstruct(
        &self,
        scan: &ScanResult,
        optics: &OpticsState,
    ) -> Result<TwissResult, EmittanceError> {
        match self {
            ReconstructionMethod::TransferMatrix => transfer_matrix_fit::reconstruct(scan, optics),
            ReconstructionMethod::ThinLens => Ok(thin_lens_fit::solve(scan, optics)?.twiss),
        }
    }
}

impl fmt::Display for ReconstructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconstructionMethod::TransferMatrix => write!(f, "transfer-matrix"),
            ReconstructionMethod::ThinLens => write!(f, "thin-lens"),
        }
    }
}

/// Run every strategy on the same scan.
///
/// Each entry holds its own outcome; an error in one method leaves the other intact.
pub fn reconstruct_all(
    scan: &ScanResult,
    optics: &OpticsState,
) -> Vec<(ReconstructionMethod, Result<TwissResult, EmittanceError>)> {
    ReconstructionMethod::ALL
        .iter()
        .map(|m| (*m, m.reconstruct(scan, optics)))
        .collect()
}

/// Reconstructed beam parameters for one plane and one method.
///
/// Fields
/// -----------------
/// * `emittance` – geometric emittance (m·rad).
/// * `normalized_emittance` – `emittance · E_total / E_rest` (m·rad).
/// * `beta`, `alpha`, `gamma` – Twiss parameters at the reconstruction point.
/// * `n_points` – number of scan points used by the fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwissResult {
    pub plane: Plane,
    pub method: ReconstructionMethod,
    pub emittance: f64,
    pub normalized_emittance: f64,
    pub beta: f64,
    pub alpha: f64,
    pub gamma: f64,
    pub n_points: usize,
}

impl TwissResult {
    /// Derive Twiss parameters from a sigma matrix.
    ///
    /// Return
    /// ----------
    /// * [`ReconstructionError::DegenerateEmittance`] when the emittance is zero or not finite.
    pub fn from_sigma(
        sigma: &SigmaMatrix,
        plane: Plane,
        method: ReconstructionMethod,
        lorentz_gamma: f64,
        n_points: usize,
    ) -> Result<Self, ReconstructionError> {
        let emittance = sigma.emittance();
        if !(emittance > 0.0 && emittance.is_finite()) {
            return Err(ReconstructionError::DegenerateEmittance);
        }

        Ok(TwissResult {
            plane,
            method,
            emittance,
            normalized_emittance: emittance * lorentz_gamma,
            beta: sigma.s11 / emittance,
            alpha: -sigma.s12 / emittance,
            gamma: sigma.s22 / emittance,
            n_points,
        })
    }
}

impl fmt::Display for TwissResult {
    /// Emittances in mm·mrad (µm), β in m.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] εn = {:.4} mm·mrad, ε = {:.4e} m·rad, β = {:.4} m, α = {:.4}, γ = {:.4} 1/m ({} points)",
            self.plane,
            self.method,
            self.normalized_emittance * 1e6,
            self.emittance,
            self.beta,
            self.alpha,
            self.gamma,
            self.n_points
        )
    }
}

/// Fail with [`ReconstructionError::InsufficientPoints`] below [`MIN_DISTINCT_POINTS`].
pub(crate) fn ensure_distinct_points(strengths: &[f64]) -> Result<(), ReconstructionError> {
    let got = least_squares::distinct_count(strengths);
    if got < MIN_DISTINCT_POINTS {
        return Err(ReconstructionError::InsufficientPoints {
            got,
            need: MIN_DISTINCT_POINTS,
        });
    }
    Ok(())
}
