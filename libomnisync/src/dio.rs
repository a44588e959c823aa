//! Digital input (DIO) traces and rising-edge pulse extraction.
//!
//! A [`DigitalPulseTrace`] is an ordered list of `(sample_index, state)` samples on the
//! acquisition clock. Exported DIO files only store state changes, so consecutive samples
//! are usually far apart; dense traces work the same way.
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::session::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DioSample {
    pub sample_index: u64,
    pub state: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DigitalPulseTrace {
    samples: Vec<DioSample>,
    sampling_rate_hz: f64,
}

impl DigitalPulseTrace {
    /// Builds a trace, rejecting sample indices that do not strictly increase and
    /// sampling rates that are not a positive finite number.
    pub fn new(samples: Vec<DioSample>, sampling_rate_hz: f64) -> Result<Self> {
        check_rate(sampling_rate_hz)?;
        if let Some((_, bad)) = samples
            .iter()
            .tuple_windows()
            .find(|(prev, next)| next.sample_index <= prev.sample_index)
        {
            return Err(SyncError::InvalidTrace {
                sample_index: bad.sample_index,
            });
        }
        Ok(Self {
            samples,
            sampling_rate_hz,
        })
    }

    /// Dense trace where the sample index is the position in `states`.
    pub fn from_states(states: &[bool], sampling_rate_hz: f64) -> Result<Self> {
        check_rate(sampling_rate_hz)?;
        Ok(Self {
            samples: states
                .iter()
                .enumerate()
                .map(|(i, &state)| DioSample {
                    sample_index: i as u64,
                    state,
                })
                .collect(),
            sampling_rate_hz,
        })
    }

    #[must_use]
    pub fn samples(&self) -> &[DioSample] {
        &self.samples
    }

    #[must_use]
    pub fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample indices at which the line goes from low to high.
    ///
    /// The first sample is never an edge, whatever its state.
    pub fn rising_edge_indices(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples
            .iter()
            .tuple_windows()
            .filter(|(prev, next)| !prev.state && next.state)
            .map(|(_, next)| next.sample_index)
    }

    /// Rising edges converted to seconds on the acquisition clock.
    #[must_use]
    pub fn rising_edges(&self) -> PulseTimestampSequence {
        let rate = self.sampling_rate_hz;
        PulseTimestampSequence::from_sorted(
            self.rising_edge_indices()
                .map(|index| index as f64 / rate)
                .collect(),
        )
    }

    /// Every sample converted to seconds, paired with its state.
    pub fn timed_states(&self) -> impl Iterator<Item = (f64, bool)> + '_ {
        let rate = self.sampling_rate_hz;
        self.samples
            .iter()
            .map(move |s| (s.sample_index as f64 / rate, s.state))
    }
}

fn check_rate(rate_hz: f64) -> Result<()> {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Ok(())
    } else {
        Err(SyncError::InvalidSamplingRate { rate_hz })
    }
}

/// Non-decreasing timestamps, in seconds, on a single clock.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseTimestampSequence(Vec<f64>);

impl PulseTimestampSequence {
    /// Sorts the timestamps ascending; NaN values are dropped.
    #[must_use]
    pub fn from_unsorted(mut times: Vec<f64>) -> Self {
        times.retain(|t| !t.is_nan());
        times.sort_by(f64::total_cmp);
        Self(times)
    }

    pub(crate) fn from_sorted(times: Vec<f64>) -> Self {
        debug_assert!(times.is_sorted());
        Self(times)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

/// Access to the digital traces recorded by the acquisition system.
pub trait DigitalTraceSource: Sync {
    /// Fails with [`SyncError::ChannelNotFound`] when the channel has no recorded trace.
    fn digital_trace(&self, session: &SessionId, channel: u32) -> Result<DigitalPulseTrace>;

    fn sampling_rate_hz(&self, session: &SessionId) -> Result<f64>;
}

/// Number of rising edges per channel, for every channel in `channels` that has a trace.
pub fn scan_channels(
    source: &dyn DigitalTraceSource,
    session: &SessionId,
    channels: impl IntoIterator<Item = u32>,
) -> Result<Vec<(u32, usize)>> {
    let mut counts = vec![];
    for channel in channels {
        match source.digital_trace(session, channel) {
            Ok(trace) => counts.push((channel, trace.rising_edge_indices().count())),
            Err(SyncError::ChannelNotFound { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(counts)
}
