#![deny(unused_crate_dependencies)]
//! Cross-clock timestamp synchronization for multi-modal neuroscience sessions.
//!
//! Sync pulses recorded on the electrophysiology clock (digital input traces) are matched
//! against the same pulses logged on the behavioral clock, and a polynomial
//! [`ClockMapping`] is fitted so that any acquisition timestamp can be projected onto
//! behavioral time.

pub mod config;
pub mod dio;
pub mod error;
pub mod events;
pub mod experiment;
pub mod export;
pub mod fit;
pub mod layout;
pub mod logs;
pub mod mapping;
pub mod matcher;
pub mod pipeline;
pub mod pose;
pub mod session;
pub mod sync;
pub mod trials;
pub mod trodes;
pub mod util;
pub mod waveform;

pub use dio::{DigitalPulseTrace, DigitalTraceSource, PulseTimestampSequence};
pub use error::{Result, Stage, SyncError};
pub use events::{EventLogSource, MarkerSelector, ReferencePulseSource};
pub use fit::fit_polynomial;
pub use layout::DataLayout;
pub use mapping::{ClockMapping, MatchedPulsePair, project};
pub use matcher::{MatchConfig, match_pulses};
pub use pipeline::{BatchSummary, Pipeline, PipelineOptions, SessionOutcome};
pub use session::{FileStore, MappingStore, MemoryStore, SessionId};
pub use sync::{SyncOptions, SyncOutcome, SyncReport, Synchronizer};
