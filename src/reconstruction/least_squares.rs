use nalgebra::{Matrix3, Vector3};

use crate::{constants::EPS, emittance_errors::ReconstructionError};

/// Smallest accepted ratio between the extreme singular values of the scaled
/// normal matrix.
const RCOND_MIN: f64 = 1e-13;

/// Ordinary least squares for a three-parameter linear model, through the normal
/// equations `AᵀA·x = Aᵀb`.
///
/// The normal matrix is equilibrated (unit diagonal) before the conditioning check,
/// so columns carrying different physical units do not trigger false singularities.
///
/// Arguments
/// -----------------
/// * `rows`: Rows of the design matrix `A`.
/// * `rhs`: Observations `b`, one per row.
///
/// Return
/// ----------
/// * The solution `x`, or [`ReconstructionError::SingularNormalMatrix`] when the rows do
///   not determine the three parameters.
pub(crate) fn solve_normal_equations(
    rows: &[[f64; 3]],
    rhs: &[f64],
) -> Result<Vector3<f64>, ReconstructionError> {
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    for (row, &y) in rows.iter().zip(rhs) {
        let r = Vector3::from(*row);
        ata += r * r.transpose();
        atb += r * y;
    }

    let diag = ata.diagonal();
    if diag.iter().any(|&d| !(d > 0.0 && d.is_finite())) {
        return Err(ReconstructionError::SingularNormalMatrix);
    }
    let scale = Matrix3::from_diagonal(&diag.map(|d| 1.0 / d.sqrt()));
    let scaled = scale * ata * scale;

    let sv = scaled.singular_values();
    if sv.min() <= RCOND_MIN * sv.max() {
        return Err(ReconstructionError::SingularNormalMatrix);
    }

    let y = scaled
        .cholesky()
        .ok_or(ReconstructionError::SingularNormalMatrix)?
        .solve(&(scale * atb));
    Ok(scale * y)
}

/// Number of distinct values, up to a relative tolerance.
pub(crate) fn distinct_count(values: &[f64]) -> usize {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let scale = sorted
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);
    sorted.dedup_by(|a, b| (*a - *b).abs() <= EPS * scale);
    sorted.len()
}

#[cfg(test)]
mod least_squares_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_quadratic() {
        // y = 2x² - 3x + 0.5
        let xs = [-2.0, -1.0, 0.0, 0.5, 3.0];
        let rows: Vec<[f64; 3]> = xs.iter().map(|&x| [x * x, x, 1.0]).collect();
        let rhs: Vec<f64> = xs.iter().map(|&x| 2.0 * x * x - 3.0 * x + 0.5).collect();

        let sol = solve_normal_equations(&rows, &rhs).unwrap();
        assert_relative_eq!(sol[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(sol[1], -3.0, epsilon = 1e-10);
        assert_relative_eq!(sol[2], 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_singular_rows() {
        // Two distinct abscissae cannot determine a parabola
        let xs = [1.0, 1.0, 2.0, 2.0];
        let rows: Vec<[f64; 3]> = xs.iter().map(|&x| [x * x, x, 1.0]).collect();
        assert_eq!(
            solve_normal_equations(&rows, &[1.0, 1.0, 2.0, 2.0]),
            Err(ReconstructionError::SingularNormalMatrix)
        );
        assert_eq!(
            solve_normal_equations(&[], &[]),
            Err(ReconstructionError::SingularNormalMatrix)
        );
    }

    #[test]
    fn test_distinct_count() {
        assert_eq!(distinct_count(&[1.0, 1.0, 2.0, 3.0, 3.0 + 1e-15]), 3);
        assert_eq!(distinct_count(&[]), 0);
        assert_eq!(distinct_count(&[0.0, -0.0, f64::NAN]), 1);
    }
}
