pub mod lfit;

pub use lfit::{linear_least_squares, LeastSquaresFit, LuDecomposition};

/// Result of a weighted straight-line regression `y = a + b x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub intercept: f64,
    pub slope: f64,
    pub intercept_sigma: f64,
    pub slope_sigma: f64,
    pub chi_squared: f64,
}

/// Weighted least-squares fit of a straight line. Points carry
/// standard deviations in `sigma`; if every sigma is zero the fit
/// falls back to unweighted and scales the parameter uncertainties by
/// the scatter of the data.
pub fn fit_weighted_line(x: &[f64], y: &[f64], sigma: &[f64]) -> Option<LineFit> {
    let n = x.len();
    if n < 2 || y.len() != n || sigma.len() != n {
        return None;
    }
    let weighted = sigma.iter().any(|s| *s > 0.0);

    let mut sum_weights = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    if weighted {
        for i in 0..n {
            let weight = 1.0 / (sigma[i] * sigma[i]);
            sum_weights += weight;
            sum_x += x[i] * weight;
            sum_y += y[i] * weight;
        }
    } else {
        for i in 0..n {
            sum_x += x[i];
            sum_y += y[i];
        }
        sum_weights = n as f64;
    }
    let x_mean = sum_x / sum_weights;

    let mut st2 = 0.0;
    let mut slope = 0.0;
    if weighted {
        for i in 0..n {
            let t = (x[i] - x_mean) / sigma[i];
            st2 += t * t;
            slope += t * y[i] / sigma[i];
        }
    } else {
        for i in 0..n {
            let t = x[i] - x_mean;
            st2 += t * t;
            slope += t * y[i];
        }
    }
    if st2 == 0.0 {
        return None;
    }
    slope /= st2;
    let intercept = (sum_y - sum_x * slope) / sum_weights;
    let mut intercept_sigma = ((1.0 + sum_x * sum_x / (sum_weights * st2)) / sum_weights).sqrt();
    let mut slope_sigma = (1.0 / st2).sqrt();

    let mut chi_squared = 0.0;
    if weighted {
        for i in 0..n {
            let chi = (y[i] - intercept - slope * x[i]) / sigma[i];
            chi_squared += chi * chi;
        }
    } else {
        for i in 0..n {
            let chi = y[i] - intercept - slope * x[i];
            chi_squared += chi * chi;
        }
        let scatter = if n > 2 {
            (chi_squared / (n - 2) as f64).sqrt()
        } else {
            0.0
        };
        intercept_sigma *= scatter;
        slope_sigma *= scatter;
    }

    Some(LineFit {
        intercept,
        slope,
        intercept_sigma,
        slope_sigma,
        chi_squared,
    })
}

/// In-place numerical differentiation with smoothed central
/// differences (Froberg's scheme), matching the stencil used when the
/// fit linearizes peak shifts against the residual.
pub fn differentiate(d: &mut [f64]) {
    let n = d.len();
    if n < 2 {
        return;
    }
    let mut t1 = d[0];
    d[0] = d[1] - t1;
    if n > 2 {
        let mut t2 = d[1];
        d[1] = 0.5 * (d[2] - t1);
        if n > 4 {
            let mut t3 = d[2];
            d[2] = 0.5 * (d[3] - t2 - (1.0 / 6.0) * (d[4] - 2.0 * t3 + t1));
            if n > 6 {
                for i in 3..(n - 3) {
                    let t4 = d[i];
                    d[i] = 0.5
                        * (d[i + 1] - t3 - (1.0 / 6.0) * (d[i + 2] - 2.0 * t4 + t2)
                            + (1.0 / 30.0) * (d[i + 3] - 3.0 * d[i + 1] + 3.0 * t3 - t1));
                    t1 = t2;
                    t2 = t3;
                    t3 = t4;
                }
            }
            let t4 = d[n - 3];
            if n == 5 {
                t3 = t2;
                t2 = t1;
            }
            d[n - 3] = 0.5 * (d[n - 2] - t3 - (1.0 / 6.0) * (d[n - 1] - 2.0 * t4 + t2));
            t2 = t4;
        }
        if n == 3 {
            t2 = t1;
        }
        t1 = d[n - 2];
        d[n - 2] = 0.5 * (d[n - 1] - t2);
    }
    d[n - 1] -= t1;
}

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

/// Compensated summation, used for component-shape integrals where a
/// naive sum loses the small channels.
pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;
    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::{differentiate, fit_weighted_line, stable_sum};

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn weighted_line_fit_recovers_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|v| 2.5 - 0.75 * v).collect();
        let sigma = [0.1; 5];
        let fit = fit_weighted_line(&x, &y, &sigma).expect("fit");
        assert_close(fit.intercept, 2.5, 1.0e-10);
        assert_close(fit.slope, -0.75, 1.0e-10);
        assert_close(fit.chi_squared, 0.0, 1.0e-12);
        assert!(fit.slope_sigma > 0.0);
    }

    #[test]
    fn unweighted_fallback_scales_uncertainties_by_scatter() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.1, 0.9, 2.1, 2.9];
        let zeros = [0.0; 4];
        let fit = fit_weighted_line(&x, &y, &zeros).expect("fit");
        assert_close(fit.slope, 0.98, 0.05);
        assert!(fit.slope_sigma > 0.0);
    }

    #[test]
    fn degenerate_inputs_return_none() {
        assert!(fit_weighted_line(&[1.0], &[1.0], &[0.1]).is_none());
        assert!(fit_weighted_line(&[2.0, 2.0], &[1.0, 3.0], &[0.0, 0.0]).is_none());
    }

    #[test]
    fn differentiate_matches_slope_of_linear_ramp() {
        let mut d: Vec<f64> = (0..12).map(|i| 3.0 * i as f64).collect();
        differentiate(&mut d);
        // Interior points of a linear ramp differentiate exactly.
        for value in &d[1..11] {
            assert_close(*value, 3.0, 1.0e-9);
        }
    }

    #[test]
    fn differentiate_handles_short_arrays() {
        let mut empty: Vec<f64> = vec![];
        differentiate(&mut empty);
        let mut single = vec![4.0];
        differentiate(&mut single);
        assert_eq!(single, vec![4.0]);
        let mut pair = vec![1.0, 3.0];
        differentiate(&mut pair);
        assert_eq!(pair, vec![2.0, 2.0]);
    }

    #[test]
    fn stable_sum_reduces_order_loss_for_large_and_small_values() {
        let input = [1.0e16, 1.0, -1.0e16];
        assert_eq!(stable_sum(&input), 0.0);
    }
}
