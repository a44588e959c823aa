//! On-disk layout of the data directory.
//!
//! ```text
//! <data>/<animal>/ephys_channel_map.toml
//! <data>/<animal>/<session>/raw/Trodes/<session>_merged.rec
//! <data>/<animal>/<session>/raw/Trodes/<session>_merged.DIO/*.dio_Din<N>.dat
//! <data>/<animal>/<session>/raw/ROS/*.jsonl
//! <data>/<animal>/<session>/extracted/
//! ```
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{Result, SyncError};
use crate::session::SessionId;

pub const SESSION_CONTEXT_FILE: &str = "session_context.ron";
pub const EPHYS_CONTEXT_FILE: &str = "ephys_context.ron";
pub const CLOCK_MAPPING_FILE: &str = "clock_mapping.ron";
pub const TRIAL_TIMES_FILE: &str = "trial_times.json";
pub const POSITION_TIMES_FILE: &str = "position_times.json";
pub const CHANNEL_MAP_FILE: &str = "ephys_channel_map.toml";
pub const EVENT_LOG_EXTENSION: &str = "jsonl";
pub const WAVEFORM_EXTENSIONS: [&str; 3] = ["vcd", "fst", "ghw"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    data_dir: Utf8PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    #[must_use]
    pub fn animal_dir(&self, animal: &str) -> Utf8PathBuf {
        self.data_dir.join(animal)
    }

    #[must_use]
    pub fn channel_map_path(&self, animal: &str) -> Utf8PathBuf {
        self.animal_dir(animal).join(CHANNEL_MAP_FILE)
    }

    #[must_use]
    pub fn session_dir(&self, id: &SessionId) -> Utf8PathBuf {
        self.animal_dir(&id.animal).join(&id.session)
    }

    fn trodes_dir(&self, id: &SessionId) -> Utf8PathBuf {
        self.session_dir(id).join("raw").join("Trodes")
    }

    #[must_use]
    pub fn recording_path(&self, id: &SessionId) -> Utf8PathBuf {
        self.trodes_dir(id)
            .join(format!("{}_merged.rec", id.session))
    }

    #[must_use]
    pub fn dio_dir(&self, id: &SessionId) -> Utf8PathBuf {
        self.trodes_dir(id)
            .join(format!("{}_merged.DIO", id.session))
    }

    /// First existing `<session>_dio.{vcd,fst,ghw}` file.
    #[must_use]
    pub fn waveform_path(&self, id: &SessionId) -> Option<Utf8PathBuf> {
        WAVEFORM_EXTENSIONS
            .iter()
            .map(|ext| {
                self.trodes_dir(id)
                    .join(format!("{}_dio.{ext}", id.session))
            })
            .find(|p| p.is_file())
    }

    #[must_use]
    pub fn behavior_dir(&self, id: &SessionId) -> Utf8PathBuf {
        self.session_dir(id).join("raw").join("ROS")
    }

    /// The behavioral event log of a session; the first one by name when there are several.
    pub fn event_log_path(&self, id: &SessionId) -> Result<Option<Utf8PathBuf>> {
        let dir = self.behavior_dir(id);
        let entries = match dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::io(&dir, e)),
        };
        Ok(entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.into_path())
            .filter(|p| p.extension() == Some(EVENT_LOG_EXTENSION))
            .min())
    }

    #[must_use]
    pub fn extracted_dir(&self, id: &SessionId) -> Utf8PathBuf {
        self.session_dir(id).join("extracted")
    }

    #[must_use]
    pub fn session_context_path(&self, id: &SessionId) -> Utf8PathBuf {
        self.extracted_dir(id).join(SESSION_CONTEXT_FILE)
    }

    #[must_use]
    pub fn ephys_context_path(&self, id: &SessionId) -> Utf8PathBuf {
        self.extracted_dir(id).join(EPHYS_CONTEXT_FILE)
    }

    #[must_use]
    pub fn clock_mapping_path(&self, id: &SessionId) -> Utf8PathBuf {
        self.extracted_dir(id).join(CLOCK_MAPPING_FILE)
    }

    #[must_use]
    pub fn trial_times_path(&self, id: &SessionId) -> Utf8PathBuf {
        self.extracted_dir(id).join(TRIAL_TIMES_FILE)
    }

    #[must_use]
    pub fn position_times_path(&self, id: &SessionId) -> Utf8PathBuf {
        self.extracted_dir(id).join(POSITION_TIMES_FILE)
    }

    /// A session counts as electrophysiology when its raw recording exists.
    #[must_use]
    pub fn has_recording(&self, id: &SessionId) -> bool {
        self.recording_path(id).exists()
    }
}
