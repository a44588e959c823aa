//! Error taxonomy of the synchronization pipeline.
use camino::Utf8PathBuf;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// The pipeline stage an error or skip decision belongs to.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[display("session setup")]
    Session,
    #[display("pulse decoding")]
    Decode,
    #[display("reference loading")]
    LoadReference,
    #[display("pulse matching")]
    Match,
    #[display("clock fitting")]
    Fit,
    #[display("storage")]
    Store,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no digital trace recorded for channel Din{channel}")]
    ChannelNotFound { channel: u32 },

    #[error("no sync marker stream found (tried {tried:?})")]
    NoSyncTopicFound { tried: Vec<String> },

    #[error("not enough pulses to synchronize: {source_pulses} source, {reference_pulses} reference")]
    InsufficientPulses {
        source_pulses: usize,
        reference_pulses: usize,
    },

    #[error("cannot fit a degree {degree} mapping to {pairs} matched pairs")]
    DegenerateFit { degree: usize, pairs: usize },

    #[error("a cached result already exists for {session}")]
    AlreadyExists { session: SessionId },

    #[error("no exported digital inputs for {session}")]
    NoDioExport { session: SessionId },

    #[error("digital trace is not strictly increasing at sample {sample_index}")]
    InvalidTrace { sample_index: u64 },

    #[error("trodes channel {trodes_id} is not in the channel map")]
    UnknownChannel { trodes_id: u32 },

    #[error("sampling rate must be a positive number of Hz, got {rate_hz}")]
    InvalidSamplingRate { rate_hz: f64 },

    #[error("malformed file {path}: {reason}")]
    Malformed {
        stage: Stage,
        path: Utf8PathBuf,
        reason: String,
    },

    #[error("failed to access {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode {what}: {reason}")]
    Serialization { what: String, reason: String },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(
        stage: Stage,
        path: impl Into<Utf8PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        SyncError::Malformed {
            stage,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Data-quality conditions that skip a session instead of halting a batch.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::ChannelNotFound { .. }
                | SyncError::NoSyncTopicFound { .. }
                | SyncError::InsufficientPulses { .. }
                | SyncError::DegenerateFit { .. }
                | SyncError::AlreadyExists { .. }
                | SyncError::NoDioExport { .. }
        )
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            SyncError::ChannelNotFound { .. }
            | SyncError::NoDioExport { .. }
            | SyncError::InvalidTrace { .. }
            | SyncError::InvalidSamplingRate { .. } => Stage::Decode,
            SyncError::UnknownChannel { .. } => Stage::Session,
            SyncError::NoSyncTopicFound { .. } => Stage::LoadReference,
            SyncError::InsufficientPulses { .. } => Stage::Match,
            SyncError::DegenerateFit { .. } => Stage::Fit,
            SyncError::AlreadyExists { .. }
            | SyncError::Io { .. }
            | SyncError::Serialization { .. } => Stage::Store,
            SyncError::Malformed { stage, .. } => *stage,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_quality_errors_are_recoverable() {
        assert!(SyncError::ChannelNotFound { channel: 2 }.is_recoverable());
        assert!(
            SyncError::InsufficientPulses {
                source_pulses: 0,
                reference_pulses: 4
            }
            .is_recoverable()
        );
        assert!(
            SyncError::NoSyncTopicFound {
                tried: vec!["/sync".to_string()]
            }
            .is_recoverable()
        );
    }

    #[test]
    fn storage_failures_halt() {
        let err = SyncError::io(
            "/nowhere/clock_mapping.ron",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(!err.is_recoverable());
        assert_eq!(err.stage(), Stage::Store);
    }

    #[test]
    fn malformed_files_keep_their_stage() {
        let err = SyncError::malformed(Stage::LoadReference, "/data/events.jsonl", "line 3");
        assert_eq!(err.stage(), Stage::LoadReference);
        assert!(!err.is_recoverable());
        assert_eq!(
            SyncError::InvalidSamplingRate { rate_hz: 0.0 }.stage(),
            Stage::Decode
        );
    }

    #[test]
    fn stage_names_are_readable() {
        assert_eq!(Stage::LoadReference.to_string(), "reference loading");
        assert_eq!(
            SyncError::DegenerateFit { degree: 1, pairs: 1 }.stage(),
            Stage::Fit
        );
    }
}
