//! Per-session preprocessing and batch runs over many sessions.
//!
//! A session goes through context setup, ephys context setup and timestamp
//! synchronization. Data-quality problems skip the session with a logged stage;
//! anything else halts the batch.
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::dio::{DigitalTraceSource, scan_channels};
use crate::error::{Result, Stage, SyncError};
use crate::events::ReferencePulseSource;
use crate::layout::DataLayout;
use crate::session::{EphysContext, MappingStore, SessionContext, SessionId};
use crate::sync::{SyncOptions, SyncOutcome, Synchronizer};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SessionOutcome {
    Synchronized {
        matched_pulses: usize,
        rms_error_s: f64,
        r_squared: Option<f64>,
    },
    AlreadySynchronized,
    NotEphys,
    Skipped {
        stage: Stage,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOptions {
    pub channel: u32,
    /// Replace stored session and ephys contexts.
    pub overwrite_context: bool,
    pub sync: SyncOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            channel: 2,
            overwrite_context: false,
            sync: SyncOptions::default(),
        }
    }
}

pub struct Pipeline<'a> {
    layout: DataLayout,
    traces: &'a dyn DigitalTraceSource,
    synchronizer: Synchronizer<'a>,
    channel: u32,
    overwrite_context: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        layout: DataLayout,
        traces: &'a dyn DigitalTraceSource,
        references: &'a dyn ReferencePulseSource,
        store: &'a dyn MappingStore,
        options: PipelineOptions,
    ) -> Self {
        Self {
            layout,
            traces,
            synchronizer: Synchronizer::new(traces, references, store, options.sync),
            channel: options.channel,
            overwrite_context: options.overwrite_context,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Runs every preprocessing step of one session.
    ///
    /// Recoverable errors are logged with their stage and returned as
    /// [`SessionOutcome::Skipped`]; other errors are returned as is.
    pub fn process_session(&self, id: &SessionId) -> Result<SessionOutcome> {
        let _span = info_span!("session", session = %id).entered();
        match self.run_steps(id) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_recoverable() => {
                let stage = e.stage();
                warn!(session = %id, %stage, "Skipping session during {stage}: {e}");
                Ok(SessionOutcome::Skipped {
                    stage,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                error!(session = %id, stage = %e.stage(), "Session failed: {e}");
                Err(e)
            }
        }
    }

    fn run_steps(&self, id: &SessionId) -> Result<SessionOutcome> {
        let context = SessionContext::load_or_initialize(&self.layout, id)?;
        keep_existing(context.store(&self.layout, self.overwrite_context), "session context")?;
        if !context.is_ephys() {
            info!(session = %id, kind = %context.kind, "Not an ephys session, skipping timestamp sync");
            return Ok(SessionOutcome::NotEphys);
        }

        let ephys = EphysContext::load_or_initialize(&self.layout, self.traces, id)?;
        keep_existing(ephys.store(&self.layout, self.overwrite_context), "ephys context")?;

        Ok(match self.synchronizer.synchronize(id, self.channel)? {
            SyncOutcome::Computed(report) => SessionOutcome::Synchronized {
                matched_pulses: report.pairs.len(),
                rms_error_s: report.rms_error(),
                r_squared: report.mapping.r_squared(),
            },
            SyncOutcome::Cached(_) => SessionOutcome::AlreadySynchronized,
        })
    }

    /// Rising-edge counts of DIO channels `1..=max_channel` that have a trace.
    pub fn scan_channels(&self, id: &SessionId, max_channel: u32) -> Result<Vec<(u32, usize)>> {
        scan_channels(self.traces, id, 1..=max_channel)
    }

    /// Processes `sessions` on `threads` workers (0 picks one per core), stopping at the
    /// first unrecoverable error.
    pub fn run_batch(&self, sessions: &[SessionId], threads: usize) -> Result<BatchSummary> {
        self.run_cancellable_batch(sessions, threads, &AtomicBool::new(false))
    }

    /// Like [`Pipeline::run_batch`], but no new session is started once `cancel` is set.
    /// Sessions already finished keep their results.
    pub fn run_cancellable_batch(
        &self,
        sessions: &[SessionId],
        threads: usize,
        cancel: &AtomicBool,
    ) -> Result<BatchSummary> {
        let halted = AtomicBool::new(false);
        let run = || {
            sessions
                .par_iter()
                .map(|id| {
                    if cancel.load(Ordering::Relaxed) || halted.load(Ordering::Relaxed) {
                        return Ok((id.clone(), None));
                    }
                    match self.process_session(id) {
                        Ok(outcome) => Ok((id.clone(), Some(outcome))),
                        Err(e) => {
                            halted.store(true, Ordering::Relaxed);
                            Err(e)
                        }
                    }
                })
                .collect::<Result<Vec<_>>>()
        };

        let results = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                warn!("Failed to create a thread pool, using the global one: {e:?}");
                run()
            }
        }?;

        let mut summary = BatchSummary::default();
        for (id, outcome) in results {
            match outcome {
                Some(outcome) => summary.outcomes.push((id, outcome)),
                None => summary.not_started.push(id),
            }
        }
        if !summary.not_started.is_empty() {
            info!("Batch cancelled, {} sessions not started", summary.not_started.len());
        }
        debug!(?summary, "Batch finished");
        Ok(summary)
    }
}

/// An existing record is fine when it is not meant to be replaced.
fn keep_existing(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(SyncError::AlreadyExists { session }) => {
            debug!(%session, "Keeping stored {what}");
            Ok(())
        }
        other => other,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Finished sessions in input order.
    pub outcomes: Vec<(SessionId, SessionOutcome)>,
    /// Sessions that were never started because the batch was cancelled.
    pub not_started: Vec<SessionId>,
}

impl BatchSummary {
    fn count(&self, pred: impl Fn(&SessionOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    #[must_use]
    pub fn synchronized(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::Synchronized { .. }))
    }

    #[must_use]
    pub fn already_synchronized(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::AlreadySynchronized))
    }

    #[must_use]
    pub fn not_ephys(&self) -> usize {
        self.count(|o| matches!(o, SessionOutcome::NotEphys))
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&SessionId, Stage, &str)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            SessionOutcome::Skipped { stage, reason } => Some((id, *stage, reason.as_str())),
            _ => None,
        })
    }
}
