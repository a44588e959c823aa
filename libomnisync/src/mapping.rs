//! Fitted clock mappings and their application to acquisition-clock timestamps.
use serde::{Deserialize, Serialize};

use crate::dio::DigitalPulseTrace;

/// A pulse observed on both clocks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchedPulsePair {
    pub source_time: f64,
    pub reference_time: f64,
}

impl MatchedPulsePair {
    #[must_use]
    pub fn new(source_time: f64, reference_time: f64) -> Self {
        Self {
            source_time,
            reference_time,
        }
    }
}

/// Polynomial from acquisition-clock seconds to behavioral-clock seconds.
///
/// Coefficients are stored highest degree first, so a degree 1 mapping is
/// `[scale, offset]` and maps `t` to `scale * t + offset`.
///
/// Mappings are replaced wholesale, never edited; there are no setters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockMapping {
    coefficients: Vec<f64>,
    /// `None` when every reference time was identical.
    r_squared: Option<f64>,
    degree: usize,
}

impl ClockMapping {
    /// Returns `None` for a constant polynomial; a mapping has degree one or more.
    #[must_use]
    pub fn new(coefficients: Vec<f64>, r_squared: Option<f64>) -> Option<Self> {
        let degree = coefficients.len().checked_sub(1).filter(|d| *d >= 1)?;
        Some(Self {
            coefficients,
            r_squared,
            degree,
        })
    }

    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    #[must_use]
    pub fn r_squared(&self) -> Option<f64> {
        self.r_squared
    }

    #[must_use]
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Evaluates the mapping at `t`.
    ///
    /// Any finite input is accepted. Accuracy is only characterized inside the span of
    /// the pulses the mapping was fitted on; beyond it the polynomial is extrapolated.
    #[must_use]
    pub fn project(&self, t: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, c| acc * t + c)
    }

    #[must_use]
    pub fn project_all(&self, timestamps: &[f64]) -> Vec<f64> {
        timestamps.iter().map(|&t| self.project(t)).collect()
    }

    /// Every sample of a digital trace on the behavioral clock, paired with its state.
    #[must_use]
    pub fn project_trace(&self, trace: &DigitalPulseTrace) -> Vec<(f64, bool)> {
        trace
            .timed_states()
            .map(|(t, state)| (self.project(t), state))
            .collect()
    }

    /// Root-mean-square difference, in seconds, between the reference times and the
    /// projected source times. `None` for an empty set.
    #[must_use]
    pub fn rms_residual(&self, pairs: &[MatchedPulsePair]) -> Option<f64> {
        if pairs.is_empty() {
            return None;
        }
        let sum_sq: f64 = pairs
            .iter()
            .map(|p| (p.reference_time - self.project(p.source_time)).powi(2))
            .sum();
        Some((sum_sq / pairs.len() as f64).sqrt())
    }
}

/// Applies `mapping` elementwise. See [`ClockMapping::project`] for the extrapolation caveat.
#[must_use]
pub fn project(mapping: &ClockMapping, timestamps: &[f64]) -> Vec<f64> {
    mapping.project_all(timestamps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine(scale: f64, offset: f64) -> ClockMapping {
        ClockMapping::new(vec![scale, offset], Some(1.0)).unwrap()
    }

    #[test]
    fn constant_polynomials_are_not_mappings() {
        assert!(ClockMapping::new(vec![3.0], None).is_none());
        assert!(ClockMapping::new(vec![], None).is_none());
        assert_eq!(affine(1.0, 0.0).degree(), 1);
    }

    #[test]
    fn highest_degree_first() {
        let quadratic = ClockMapping::new(vec![2.0, -1.0, 0.5], None).unwrap();
        assert_eq!(quadratic.degree(), 2);
        assert_eq!(quadratic.project(3.0), 2.0 * 9.0 - 3.0 + 0.5);
        assert_eq!(affine(1.0, 10.0).project(2.5), 12.5);
    }

    #[test]
    fn extrapolates_outside_fitted_range() {
        let mapping = affine(1.0001, -3.0);
        assert_eq!(
            project(&mapping, &[-100.0, 1e6]),
            vec![1.0001 * -100.0 - 3.0, 1.0001 * 1e6 - 3.0]
        );
    }

    #[test]
    fn projects_trace_samples() {
        let trace = DigitalPulseTrace::from_states(&[false, true], 2.0).unwrap();
        assert_eq!(
            affine(2.0, 1.0).project_trace(&trace),
            vec![(1.0, false), (2.0, true)]
        );
    }

    #[test]
    fn rms_residual_of_matched_pairs() {
        let mapping = affine(1.0, 0.0);
        let pairs = [MatchedPulsePair::new(0.0, 1.0), MatchedPulsePair::new(1.0, 0.0)];
        assert_eq!(mapping.rms_residual(&pairs), Some(1.0));
        assert_eq!(mapping.rms_residual(&[]), None);
    }

    #[test]
    fn ron_round_trip_is_exact() {
        let mapping = ClockMapping::new(vec![1.000_012_345_678_9, 1_711_632_142.123_456_7], Some(0.999_999_87))
            .unwrap();
        let encoded = ron::ser::to_string(&mapping).unwrap();
        let decoded: ClockMapping = ron::de::from_str(&encoded).unwrap();
        assert_eq!(decoded, mapping);

        let undefined = ClockMapping::new(vec![0.0, 4.0], None).unwrap();
        let decoded: ClockMapping =
            ron::de::from_str(&ron::ser::to_string(&undefined).unwrap()).unwrap();
        assert_eq!(decoded.r_squared(), None);
    }
}
