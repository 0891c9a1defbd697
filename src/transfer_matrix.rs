//! # Linear transport matrices
//!
//! Closed-form first-order transport through a drift and a thick quadrupole, and
//! their composition from the quadrupole entrance to the beam-size sensor:
//!
//! ```text
//! M = D(d) · Q(K1, L)
//!
//! Q(K1 > 0) = [  cos φ        sin φ / √K ]     φ = √|K1| · L
//!             [ -√K sin φ     cos φ      ]
//!
//! Q(K1 < 0) = [  cosh φ       sinh φ / √K ]
//!             [  √K sinh φ    cosh φ      ]
//!
//! Q(K1 = 0) = D(L)
//! ```
//!
//! The 4×4 form stacks the horizontal block (strength `K1`) and the vertical block
//! (strength `−K1`). The coefficients feeding the least-squares design matrix are
//! `(R11, R12)` for the horizontal plane and `(R33, R34)` for the vertical one.
use nalgebra::{Matrix2, Matrix4};

use crate::constants::{Meter, Plane, K1};

/// Drift of length `length`.
#[inline]
pub fn drift(length: Meter) -> Matrix2<f64> {
    Matrix2::new(1.0, length, 0.0, 1.0)
}

/// Thick quadrupole of strength `k1` (1/m², positive focusing) and length `length`.
pub fn quadrupole(k1: K1, length: Meter) -> Matrix2<f64> {
    if k1 == 0.0 {
        return drift(length);
    }

    let sqrt_k = k1.abs().sqrt();
    let phi = sqrt_k * length;
    if k1 > 0.0 {
        let (s, c) = phi.sin_cos();
        Matrix2::new(c, s / sqrt_k, -sqrt_k * s, c)
    } else {
        let (s, c) = (phi.sinh(), phi.cosh());
        Matrix2::new(c, s / sqrt_k, sqrt_k * s, c)
    }
}

/// Transport from the quadrupole entrance to the sensor for one plane.
#[inline]
pub fn quad_to_screen(k1: K1, quad_length: Meter, drift_length: Meter) -> Matrix2<f64> {
    drift(drift_length) * quadrupole(k1, quad_length)
}

/// Uncoupled 4×4 transport from the quadrupole entrance to the sensor.
///
/// `k1` is given in the horizontal convention; the vertical block uses `-k1`.
pub fn quad_to_screen_4d(k1: K1, quad_length: Meter, drift_length: Meter) -> Matrix4<f64> {
    let mut m = Matrix4::zeros();
    m.fixed_view_mut::<2, 2>(0, 0)
        .copy_from(&quad_to_screen(k1, quad_length, drift_length));
    m.fixed_view_mut::<2, 2>(2, 2)
        .copy_from(&quad_to_screen(-k1, quad_length, drift_length));
    m
}

/// Position-row coefficients of a 4×4 transport for a plane: `(R11, R12)` or `(R33, R34)`.
#[inline]
pub fn plane_coefficients(m: &Matrix4<f64>, plane: Plane) -> (f64, f64) {
    match plane {
        Plane::Horizontal => (m[(0, 0)], m[(0, 1)]),
        Plane::Vertical => (m[(2, 2)], m[(2, 3)]),
    }
}

/// Build the quadrupole-to-sensor transport for every strength of a scan.
///
/// Arguments
/// -----------------
/// * `k1_values`: Quadrupole strengths (1/m², horizontal convention).
/// * `drift_length`: Drift from the quadrupole exit to the sensor (m).
/// * `quad_length`: Quadrupole effective length (m).
///
/// Return
/// ----------
/// * One 4×4 transport matrix per strength.
///
/// See also
/// ------------
/// * [`plane_coefficients`] – Extracts the coefficients used by the least-squares fit.
pub fn build(k1_values: &[K1], drift_length: Meter, quad_length: Meter) -> Vec<Matrix4<f64>> {
    k1_values
        .iter()
        .map(|&k1| quad_to_screen_4d(k1, quad_length, drift_length))
        .collect()
}
