//! Weighted linear least squares via normal equations and LU
//! decomposition with scaled partial pivoting.
//!
//! The solver deliberately keeps two robustness behaviors of long
//! standing: near-zero pivots are clamped to a small positive floor
//! instead of dividing by zero, and any solved value that comes out
//! NaN or infinite is replaced by zero so it cannot poison later
//! channels or iterations.

use crate::common::constants::PIVOT_FLOOR;
use crate::domain::{QuantError, QuantResult};

#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresFit {
    pub coefficients: Vec<f64>,
    pub variances: Vec<f64>,
    pub chi_squared: f64,
}

/// Fit `measured ~ sum(c_j * basis_j)` with per-channel weights
/// `1/sigma^2`. `design` holds the `n_params` basis vectors
/// back to back, each of the same length as `measured`.
pub fn linear_least_squares(
    measured: &[f64],
    sigma: &[f64],
    design: &[f64],
    n_params: usize,
) -> QuantResult<LeastSquaresFit> {
    let n_data = measured.len();
    if n_data == 0 || n_params == 0 {
        return Err(QuantError::invalid_input(
            "SOLVER.EMPTY",
            format!("empty system: {n_data} channels, {n_params} parameters"),
        ));
    }
    if sigma.len() != n_data {
        return Err(QuantError::invalid_input(
            "SOLVER.SIGMA_LENGTH",
            format!("sigma length {} does not match {n_data} channels", sigma.len()),
        ));
    }
    if design.len() != n_params * n_data {
        return Err(QuantError::invalid_input(
            "SOLVER.DESIGN_SHAPE",
            format!(
                "design matrix length {} does not match {n_params} x {n_data}",
                design.len()
            ),
        ));
    }
    if let Some(bad) = sigma.iter().find(|value| !(**value > 0.0)) {
        return Err(QuantError::invalid_input(
            "SOLVER.SIGMA_POSITIVE",
            format!("sigma values must be positive and finite, got {bad}"),
        ));
    }

    // Accumulate the symmetric normal-equations matrix and the
    // right-hand side with weighted sums.
    let mut normal = vec![0.0_f64; n_params * n_params];
    let mut rhs = vec![0.0_f64; n_params];
    for i in 0..n_data {
        let weight = 1.0 / (sigma[i] * sigma[i]);
        for j in 0..n_params {
            let wt = design[j * n_data + i] * weight;
            for k in 0..=j {
                normal[j * n_params + k] += wt * design[k * n_data + i];
            }
            rhs[j] += measured[i] * wt;
        }
    }
    for j in 1..n_params {
        for k in 0..j {
            normal[k * n_params + j] = normal[j * n_params + k];
        }
    }

    let decomposition = LuDecomposition::decompose(normal, n_params)?;
    let mut coefficients = rhs;
    decomposition.substitute(&mut coefficients);

    let mut chi_squared = 0.0;
    for i in 0..n_data {
        let mut model = 0.0;
        for (j, coefficient) in coefficients.iter().enumerate() {
            model += coefficient * design[j * n_data + i];
        }
        let diff = (measured[i] - model) / sigma[i];
        chi_squared += diff * diff;
    }

    // Invert the normal matrix one identity column at a time; the
    // diagonal of the inverse gives the coefficient variances.
    let mut variances = vec![0.0_f64; n_params];
    for (j, variance) in variances.iter_mut().enumerate() {
        let mut column = vec![0.0_f64; n_params];
        column[j] = 1.0;
        decomposition.substitute(&mut column);
        *variance = column[j];
    }

    Ok(LeastSquaresFit {
        coefficients,
        variances,
        chi_squared,
    })
}

/// LU decomposition with scaled partial pivoting, in place over a
/// row-major square matrix. Tracks the row permutation and the sign
/// of the determinant.
#[derive(Debug, Clone)]
pub struct LuDecomposition {
    matrix: Vec<f64>,
    n: usize,
    permutation: Vec<usize>,
    determinant_sign: f64,
}

impl LuDecomposition {
    pub fn decompose(mut matrix: Vec<f64>, n: usize) -> QuantResult<Self> {
        debug_assert_eq!(matrix.len(), n * n);
        let mut scale = vec![0.0_f64; n];
        let mut determinant_sign = 1.0;
        for i in 0..n {
            let mut largest = 0.0_f64;
            for j in 0..n {
                let magnitude = matrix[i * n + j].abs();
                if magnitude > largest {
                    largest = magnitude;
                }
            }
            if largest == 0.0 {
                return Err(QuantError::singular_system(
                    "SOLVER.SINGULAR",
                    format!("normal-equations row {i} is identically zero"),
                ));
            }
            scale[i] = 1.0 / largest;
        }

        let mut permutation = vec![0_usize; n];
        for j in 0..n {
            for i in 0..j {
                let mut sum = matrix[i * n + j];
                for k in 0..i {
                    sum -= matrix[i * n + k] * matrix[k * n + j];
                }
                matrix[i * n + j] = sum;
            }
            let mut largest = 0.0_f64;
            let mut pivot_row = j;
            for i in j..n {
                let mut sum = matrix[i * n + j];
                for k in 0..j {
                    sum -= matrix[i * n + k] * matrix[k * n + j];
                }
                matrix[i * n + j] = sum;
                let candidate = scale[i] * sum.abs();
                if candidate >= largest {
                    largest = candidate;
                    pivot_row = i;
                }
            }
            if pivot_row != j {
                for k in 0..n {
                    matrix.swap(pivot_row * n + k, j * n + k);
                }
                determinant_sign = -determinant_sign;
                scale[pivot_row] = scale[j];
            }
            permutation[j] = pivot_row;
            if matrix[j * n + j] == 0.0 {
                matrix[j * n + j] = PIVOT_FLOOR;
            }
            if j != n - 1 {
                let inverse_pivot = 1.0 / matrix[j * n + j];
                for i in (j + 1)..n {
                    matrix[i * n + j] *= inverse_pivot;
                }
            }
        }

        Ok(Self {
            matrix,
            n,
            permutation,
            determinant_sign,
        })
    }

    pub const fn determinant_sign(&self) -> f64 {
        self.determinant_sign
    }

    /// Forward/backward substitution in place. Non-finite results are
    /// zeroed as they appear.
    pub fn substitute(&self, rhs: &mut [f64]) {
        let n = self.n;
        debug_assert_eq!(rhs.len(), n);
        let mut first_nonzero: Option<usize> = None;
        for i in 0..n {
            let pivot = self.permutation[i];
            let mut sum = rhs[pivot];
            rhs[pivot] = rhs[i];
            if let Some(start) = first_nonzero {
                for j in start..i {
                    sum -= self.matrix[i * n + j] * rhs[j];
                }
            } else if sum != 0.0 {
                first_nonzero = Some(i);
            }
            rhs[i] = if sum.is_finite() { sum } else { 0.0 };
        }
        for i in (0..n).rev() {
            let mut sum = rhs[i];
            for j in (i + 1)..n {
                sum -= self.matrix[i * n + j] * rhs[j];
            }
            let solved = sum / self.matrix[i * n + i];
            rhs[i] = if solved.is_finite() { solved } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{linear_least_squares, LuDecomposition};
    use crate::domain::QuantErrorCategory;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn lu_solve_round_trips_well_conditioned_system() {
        // A * x = b with x = (1, -2, 3)
        let a = vec![4.0, 1.0, 0.5, 1.0, 3.0, -1.0, 0.5, -1.0, 5.0];
        let x_true = [1.0, -2.0, 3.0];
        let mut b = vec![0.0; 3];
        for i in 0..3 {
            for j in 0..3 {
                b[i] += a[i * 3 + j] * x_true[j];
            }
        }
        let decomposition = LuDecomposition::decompose(a, 3).expect("nonsingular");
        decomposition.substitute(&mut b);
        for (solved, expected) in b.iter().zip(x_true) {
            assert_close(*solved, expected, 1.0e-10);
        }
    }

    #[test]
    fn zero_row_is_a_singular_system() {
        let a = vec![1.0, 2.0, 0.0, 0.0];
        let error = LuDecomposition::decompose(a, 2).expect_err("singular");
        assert_eq!(error.category(), QuantErrorCategory::SingularSystem);
    }

    #[test]
    fn fit_recovers_known_coefficients_with_unit_chi_square_scale() {
        // measured = 3 * basis0 + 0.5 * basis1, exactly.
        let n = 64;
        let basis0: Vec<f64> = (0..n).map(|i| 1.0 + (i as f64 * 0.1).sin().powi(2)).collect();
        let basis1: Vec<f64> = (0..n).map(|i| (i as f64) * 0.25).collect();
        let measured: Vec<f64> = (0..n).map(|i| 3.0 * basis0[i] + 0.5 * basis1[i]).collect();
        let sigma = vec![1.0; n];
        let mut design = basis0.clone();
        design.extend_from_slice(&basis1);

        let fit = linear_least_squares(&measured, &sigma, &design, 2).expect("fit");
        assert_close(fit.coefficients[0], 3.0, 1.0e-9);
        assert_close(fit.coefficients[1], 0.5, 1.0e-9);
        assert_close(fit.chi_squared, 0.0, 1.0e-12);
        assert!(fit.variances.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn variances_scale_with_measurement_noise_level() {
        let n = 128;
        let basis: Vec<f64> = vec![1.0; n];
        let measured: Vec<f64> = vec![10.0; n];
        let tight = linear_least_squares(&measured, &vec![1.0; n], &basis, 1).expect("fit");
        let loose = linear_least_squares(&measured, &vec![2.0; n], &basis, 1).expect("fit");
        // Variance of a weighted mean is sigma^2 / n.
        assert_close(tight.variances[0], 1.0 / n as f64, 1.0e-12);
        assert_close(loose.variances[0], 4.0 / n as f64, 1.0e-12);
    }

    #[test]
    fn all_zero_basis_vector_reports_singular_system() {
        let n = 16;
        let mut design = vec![1.0; n];
        design.extend(std::iter::repeat_n(0.0, n));
        let measured = vec![5.0; n];
        let sigma = vec![1.0; n];
        let error = linear_least_squares(&measured, &sigma, &design, 2).expect_err("singular");
        assert_eq!(error.category(), QuantErrorCategory::SingularSystem);
    }

    #[test]
    fn input_validation_rejects_bad_shapes_and_sigmas() {
        let error = linear_least_squares(&[], &[], &[], 1).expect_err("empty");
        assert_eq!(error.category(), QuantErrorCategory::InvalidInput);

        let error =
            linear_least_squares(&[1.0, 2.0], &[1.0, 0.0], &[1.0, 1.0], 1).expect_err("sigma");
        assert_eq!(error.category(), QuantErrorCategory::InvalidInput);

        let error =
            linear_least_squares(&[1.0, 2.0], &[1.0, 1.0], &[1.0], 1).expect_err("shape");
        assert_eq!(error.category(), QuantErrorCategory::InvalidInput);
    }

    #[test]
    fn determinant_sign_tracks_row_swaps() {
        let identity_like = vec![0.0, 1.0, 1.0, 0.0];
        let decomposition = LuDecomposition::decompose(identity_like, 2).expect("nonsingular");
        assert_eq!(decomposition.determinant_sign(), -1.0);
    }
}
