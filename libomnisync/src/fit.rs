//! Least-squares polynomial fit of reference time against source time.
//!
//! Source times are centered and scaled to `[-1, 1]` before the Vandermonde system is
//! solved with a Householder QR decomposition, then the coefficients are expanded back
//! to the raw time axis. Acquisition timestamps are large and closely spaced, so the
//! unscaled normal equations lose most of their precision.
use crate::error::{Result, SyncError};
use crate::mapping::{ClockMapping, MatchedPulsePair};

/// Relative pivot size below which the design matrix is treated as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Fits `reference_time = P(source_time)` with `P` of the given degree.
///
/// Deterministic for a given input order. Fails with [`SyncError::DegenerateFit`] when
/// there are fewer pairs than coefficients or the source times cannot support the degree.
pub fn fit_polynomial(pairs: &[MatchedPulsePair], degree: usize) -> Result<ClockMapping> {
    let degenerate = || SyncError::DegenerateFit {
        degree,
        pairs: pairs.len(),
    };
    let n_coef = degree + 1;
    if degree == 0 || pairs.len() < n_coef {
        return Err(degenerate());
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.source_time).sum::<f64>() / n;
    let half_width = pairs
        .iter()
        .map(|p| (p.source_time - mean_x).abs())
        .fold(0.0, f64::max);
    if !(half_width.is_finite() && half_width > 0.0) {
        return Err(degenerate());
    }
    let normalized = |x: f64| (x - mean_x) / half_width;

    // column-major Vandermonde matrix, lowest power first
    let mut columns: Vec<Vec<f64>> = (0..n_coef)
        .map(|power| {
            pairs
                .iter()
                .map(|p| normalized(p.source_time).powi(power as i32))
                .collect()
        })
        .collect();
    let mean_y = pairs.iter().map(|p| p.reference_time).sum::<f64>() / n;
    let mut rhs: Vec<f64> = pairs.iter().map(|p| p.reference_time - mean_y).collect();
    let mut scaled = solve_least_squares(&mut columns, &mut rhs).ok_or_else(degenerate)?;

    let ss_res: f64 = pairs
        .iter()
        .map(|p| {
            let t = normalized(p.source_time);
            let predicted = scaled.iter().rev().fold(0.0, |acc, c| acc * t + c);
            (p.reference_time - mean_y - predicted).powi(2)
        })
        .sum();
    let r_squared = r_squared(pairs, mean_y, ss_res);
    scaled[0] += mean_y;

    let coefficients = expand_scaled(&scaled, mean_x, half_width);
    ClockMapping::new(coefficients, r_squared).ok_or_else(degenerate)
}

fn r_squared(pairs: &[MatchedPulsePair], mean_y: f64, ss_res: f64) -> Option<f64> {
    let first = pairs.first()?.reference_time;
    if pairs.iter().all(|p| p.reference_time == first) {
        return None;
    }
    let ss_tot: f64 = pairs
        .iter()
        .map(|p| (p.reference_time - mean_y).powi(2))
        .sum();
    (ss_tot > 0.0).then(|| (1.0 - ss_res / ss_tot).clamp(0.0, 1.0))
}

/// Householder QR least squares on `columns` (each of length `rhs.len()`).
///
/// Both arguments are overwritten. Returns the solution lowest power first, or `None`
/// when the matrix is rank deficient.
fn solve_least_squares(columns: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    let rows = rhs.len();
    let cols = columns.len();
    let scale = columns
        .iter()
        .map(|c| norm(c))
        .fold(0.0, f64::max);

    for k in 0..cols {
        let col_norm = norm(&columns[k][k..]);
        if col_norm <= RANK_TOLERANCE * scale {
            return None;
        }
        let alpha = if columns[k][k] > 0.0 {
            -col_norm
        } else {
            col_norm
        };
        let mut v: Vec<f64> = columns[k][k..].to_vec();
        v[0] -= alpha;
        let v_norm_sq: f64 = v.iter().map(|x| x * x).sum();
        if v_norm_sq == 0.0 {
            continue;
        }

        let reflect = |target: &mut [f64]| {
            let dot: f64 = v.iter().zip(&target[k..]).map(|(a, b)| a * b).sum();
            let factor = 2.0 * dot / v_norm_sq;
            for (t, vi) in target[k..].iter_mut().zip(&v) {
                *t -= factor * vi;
            }
        };
        for column in columns[k..].iter_mut() {
            reflect(column.as_mut_slice());
        }
        reflect(&mut *rhs);
    }

    let mut solution = vec![0.0; cols];
    for k in (0..cols).rev() {
        let tail: f64 = ((k + 1)..cols)
            .map(|j| columns[j][k] * solution[j])
            .sum();
        solution[k] = (rhs[k] - tail) / columns[k][k];
    }
    debug_assert!(rows >= cols);
    solution.iter().all(|c| c.is_finite()).then_some(solution)
}

fn norm(values: &[f64]) -> f64 {
    values.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Converts coefficients of `P((x - mean) / half_width)`, lowest power first, into
/// coefficients of `x`, highest power first.
fn expand_scaled(scaled: &[f64], mean: f64, half_width: f64) -> Vec<f64> {
    let degree = scaled.len() - 1;
    let mut raw = vec![0.0; scaled.len()];
    for (k, c) in scaled.iter().enumerate() {
        let c = c / half_width.powi(k as i32);
        let mut binomial = 1.0;
        for j in (0..=k).rev() {
            // term: C(k, j) x^j (-mean)^(k - j)
            raw[j] += c * binomial * (-mean).powi((k - j) as i32);
            binomial = binomial * j as f64 / (k - j + 1) as f64;
        }
    }
    raw.reverse();
    debug_assert_eq!(raw.len(), degree + 1);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs_from(xs: &[f64], f: impl Fn(f64) -> f64) -> Vec<MatchedPulsePair> {
        xs.iter().map(|&x| MatchedPulsePair::new(x, f(x))).collect()
    }

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() <= tol, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn recovers_offset_and_unit_scale() {
        let pairs = pairs_from(&[0.0, 1.0, 2.0, 3.0, 4.0], |x| x + 10.0);
        let mapping = fit_polynomial(&pairs, 1).unwrap();
        assert_close(mapping.coefficients(), &[1.0, 10.0], 1e-9);
        assert!((mapping.r_squared().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn recovers_drift_at_realistic_magnitudes() {
        // acquisition seconds against epoch seconds with 20 ppm drift
        let xs: Vec<f64> = (0..200).map(|i| 3.0 + i as f64 * 10.37 + (i % 7) as f64 * 0.013).collect();
        let scale = 1.000_02;
        let offset = 1_711_632_142.25;
        let pairs = pairs_from(&xs, |x| scale * x + offset);
        let mapping = fit_polynomial(&pairs, 1).unwrap();
        assert!((mapping.coefficients()[0] - scale).abs() < 1e-8);
        assert!((mapping.coefficients()[1] - offset).abs() < 1e-4);
        for p in &pairs {
            assert!((mapping.project(p.source_time) - p.reference_time).abs() < 1e-5);
        }
    }

    #[test]
    fn recovers_quadratic() {
        let pairs = pairs_from(&[-2.0, -1.0, 0.5, 1.0, 3.0, 4.0], |x| 0.25 * x * x - 2.0 * x + 7.0);
        let mapping = fit_polynomial(&pairs, 2).unwrap();
        assert_close(mapping.coefficients(), &[0.25, -2.0, 7.0], 1e-9);
    }

    #[test]
    fn noisy_data_has_r_squared_below_one() {
        let pairs = vec![
            MatchedPulsePair::new(0.0, 0.0),
            MatchedPulsePair::new(1.0, 1.2),
            MatchedPulsePair::new(2.0, 1.9),
            MatchedPulsePair::new(3.0, 3.1),
        ];
        let r2 = fit_polynomial(&pairs, 1).unwrap().r_squared().unwrap();
        assert!(r2 > 0.9 && r2 < 1.0);
    }

    #[test]
    fn constant_reference_has_undefined_r_squared() {
        let pairs = pairs_from(&[0.0, 1.0, 2.0], |_| 5.0);
        let mapping = fit_polynomial(&pairs, 1).unwrap();
        assert_eq!(mapping.r_squared(), None);
        assert_close(mapping.coefficients(), &[0.0, 5.0], 1e-12);
    }

    #[test]
    fn too_few_pairs_is_degenerate() {
        let pairs = pairs_from(&[1.0], |x| x);
        assert!(matches!(
            fit_polynomial(&pairs, 1),
            Err(SyncError::DegenerateFit { degree: 1, pairs: 1 })
        ));
        let pairs = pairs_from(&[1.0, 2.0], |x| x);
        assert!(matches!(
            fit_polynomial(&pairs, 2),
            Err(SyncError::DegenerateFit { degree: 2, pairs: 2 })
        ));
    }

    #[test]
    fn repeated_source_times_are_degenerate() {
        let pairs = vec![MatchedPulsePair::new(2.0, 1.0), MatchedPulsePair::new(2.0, 3.0)];
        assert!(matches!(
            fit_polynomial(&pairs, 1),
            Err(SyncError::DegenerateFit { .. })
        ));
        // three pairs but only two distinct abscissae cannot pin down a parabola
        let pairs = pairs_from(&[0.0, 0.0, 1.0], |x| x);
        assert!(fit_polynomial(&pairs, 2).is_err());
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let pairs = pairs_from(&[0.1, 0.7, 1.9, 2.2, 3.8], |x| 0.999 * x - 4.0);
        assert_eq!(
            fit_polynomial(&pairs, 1).unwrap(),
            fit_polynomial(&pairs, 1).unwrap()
        );
    }
}
