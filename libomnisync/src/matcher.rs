//! One-to-one alignment of two pulse sequences recorded on different clocks.
//!
//! Every candidate alignment drops some pulses from the head of one sequence and keeps
//! the longest run that overlaps the other. Each candidate is scored with its own
//! affine least-squares fit, and the lowest mean squared residual wins.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dio::PulseTimestampSequence;
use crate::error::{Result, SyncError};
use crate::mapping::MatchedPulsePair;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Extra offsets searched beyond the length difference of the two sequences.
    pub slack: usize,
    /// Candidates whose mean squared residual (s²) lies within this distance of the
    /// best one are considered equally good.
    pub tie_tolerance: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            slack: 2,
            tie_tolerance: 1e-12,
        }
    }
}

/// Where the two sequences line up.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    /// Leading pulses dropped from the source sequence.
    pub source_skip: usize,
    /// Leading pulses dropped from the reference sequence.
    pub reference_skip: usize,
    pub len: usize,
    /// Mean squared residual of the affine fit over the window, in s².
    pub cost: f64,
}

impl Alignment {
    /// Positive when the source sequence starts earlier.
    #[must_use]
    pub fn offset(&self) -> isize {
        self.source_skip as isize - self.reference_skip as isize
    }

    fn leading_drops(&self) -> usize {
        self.source_skip + self.reference_skip
    }

    fn total_drops(&self, source_len: usize, reference_len: usize) -> usize {
        source_len + reference_len - 2 * self.len
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PulseMatch {
    pub pairs: Vec<MatchedPulsePair>,
    pub alignment: Alignment,
}

/// Aligns `source` against `reference`.
///
/// All candidate offsets are searched, including for sequences of equal length.
/// Fails with [`SyncError::InsufficientPulses`] when either side has fewer than two
/// pulses or no candidate window has a usable spread of source times.
pub fn match_pulses(
    source: &PulseTimestampSequence,
    reference: &PulseTimestampSequence,
    config: &MatchConfig,
) -> Result<PulseMatch> {
    let (a, b) = (source.as_slice(), reference.as_slice());
    let insufficient = || SyncError::InsufficientPulses {
        source_pulses: a.len(),
        reference_pulses: b.len(),
    };
    if a.len() < 2 || b.len() < 2 {
        return Err(insufficient());
    }

    let shorter = a.len().min(b.len());
    let min_window = shorter.min(3).max(shorter.saturating_sub(config.slack));
    let reach = a.len().abs_diff(b.len()) + config.slack;

    let mut candidates = vec![];
    for source_skip in 0..=reach.min(a.len() - 1) {
        candidates.push((source_skip, 0));
    }
    for reference_skip in 1..=reach.min(b.len() - 1) {
        candidates.push((0, reference_skip));
    }

    let candidates: Vec<Alignment> = candidates
        .into_iter()
        .filter_map(|(source_skip, reference_skip)| {
            let len = (a.len() - source_skip).min(b.len() - reference_skip);
            if len < min_window {
                return None;
            }
            let cost = affine_cost(
                &a[source_skip..source_skip + len],
                &b[reference_skip..reference_skip + len],
            )?;
            Some(Alignment {
                source_skip,
                reference_skip,
                len,
                cost,
            })
        })
        .collect();

    let best_cost = candidates
        .iter()
        .map(|c| c.cost)
        .min_by(f64::total_cmp)
        .ok_or_else(insufficient)?;
    let alignment = candidates
        .iter()
        .filter(|c| c.cost - best_cost <= config.tie_tolerance)
        .min_by_key(|c| (c.total_drops(a.len(), b.len()), c.leading_drops(), c.offset()))
        .copied()
        .ok_or_else(insufficient)?;

    debug!(
        source_skip = alignment.source_skip,
        reference_skip = alignment.reference_skip,
        len = alignment.len,
        cost = alignment.cost,
        candidates = candidates.len(),
        "Selected pulse alignment"
    );

    let pairs = a[alignment.source_skip..]
        .iter()
        .zip(&b[alignment.reference_skip..])
        .take(alignment.len)
        .map(|(&s, &r)| MatchedPulsePair::new(s, r))
        .collect();
    Ok(PulseMatch { pairs, alignment })
}

/// Mean squared residual of the least-squares line through `(xs, ys)`.
///
/// `None` when all `xs` coincide.
fn affine_cost(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (sxx, sxy) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            let dx = x - mean_x;
            (sxx + dx * dx, sxy + dx * (y - mean_y))
        });
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let rss: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - mean_y - slope * (x - mean_x)).powi(2))
        .sum();
    Some(rss / n)
}
