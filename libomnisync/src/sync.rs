//! Timestamp synchronization of one session: decode, load, match, fit, store.
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dio::DigitalTraceSource;
use crate::events::ReferencePulseSource;
use crate::error::{Result, SyncError};
use crate::fit::fit_polynomial;
use crate::mapping::{ClockMapping, MatchedPulsePair};
use crate::matcher::{Alignment, MatchConfig, match_pulses};
use crate::session::{MappingStore, SessionId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncOptions {
    pub degree: usize,
    pub matching: MatchConfig,
    /// Recompute and replace a cached mapping.
    pub overwrite: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            degree: 1,
            matching: MatchConfig::default(),
            overwrite: false,
        }
    }
}

/// A freshly computed mapping together with the data it was fitted on.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncReport {
    pub mapping: ClockMapping,
    pub pairs: Vec<MatchedPulsePair>,
    pub alignment: Alignment,
    pub source_pulses: usize,
    pub reference_pulses: usize,
}

impl SyncReport {
    /// Root-mean-square residual in seconds over the matched pulses.
    #[must_use]
    pub fn rms_error(&self) -> f64 {
        self.mapping.rms_residual(&self.pairs).unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    Computed(SyncReport),
    /// A mapping was already stored and `overwrite` was not requested.
    Cached(ClockMapping),
}

impl SyncOutcome {
    #[must_use]
    pub fn mapping(&self) -> &ClockMapping {
        match self {
            SyncOutcome::Computed(report) => &report.mapping,
            SyncOutcome::Cached(mapping) => mapping,
        }
    }

    #[must_use]
    pub fn into_mapping(self) -> ClockMapping {
        match self {
            SyncOutcome::Computed(report) => report.mapping,
            SyncOutcome::Cached(mapping) => mapping,
        }
    }
}

pub struct Synchronizer<'a> {
    traces: &'a dyn DigitalTraceSource,
    references: &'a dyn ReferencePulseSource,
    store: &'a dyn MappingStore,
    options: SyncOptions,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        traces: &'a dyn DigitalTraceSource,
        references: &'a dyn ReferencePulseSource,
        store: &'a dyn MappingStore,
        options: SyncOptions,
    ) -> Self {
        Self {
            traces,
            references,
            store,
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Computes a mapping without looking at or touching the store.
    pub fn compute(&self, session: &SessionId, channel: u32) -> Result<SyncReport> {
        let trace = self.traces.digital_trace(session, channel)?;
        let source = trace.rising_edges();
        debug!(%session, channel, pulses = source.len(), "Decoded DIO pulses");

        let reference = self.references.reference_pulse_times(session)?;
        let matched = match_pulses(&source, &reference, &self.options.matching)?;
        if matched.pairs.len() < source.len().min(reference.len()) {
            warn!(
                %session,
                source_pulses = source.len(),
                reference_pulses = reference.len(),
                matched = matched.pairs.len(),
                "Only part of the shorter pulse sequence could be matched"
            );
        }

        let mapping = fit_polynomial(&matched.pairs, self.options.degree)?;
        Ok(SyncReport {
            mapping,
            pairs: matched.pairs,
            alignment: matched.alignment,
            source_pulses: source.len(),
            reference_pulses: reference.len(),
        })
    }

    /// Returns the stored mapping of `session`, computing and storing one first when
    /// there is none or `overwrite` is set.
    pub fn synchronize(&self, session: &SessionId, channel: u32) -> Result<SyncOutcome> {
        if !self.options.overwrite
            && let Some(mapping) = self.store.load_cached_mapping(session)?
        {
            info!(%session, "Timestamp sync already computed, skipping");
            return Ok(SyncOutcome::Cached(mapping));
        }

        let report = self.compute(session, channel)?;
        match self
            .store
            .store_mapping(session, &report.mapping, self.options.overwrite)
        {
            Ok(()) => {}
            // stored concurrently since the cache check above
            Err(e @ SyncError::AlreadyExists { .. }) => {
                return match self.store.load_cached_mapping(session)? {
                    Some(mapping) => Ok(SyncOutcome::Cached(mapping)),
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        }

        info!(
            %session,
            coefficients = ?report.mapping.coefficients(),
            r_squared = ?report.mapping.r_squared(),
            rms_error_s = report.rms_error(),
            matched = report.pairs.len(),
            "Timestamp sync complete"
        );
        Ok(SyncOutcome::Computed(report))
    }
}
