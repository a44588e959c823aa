//! Per-session context records.
//!
//! Records follow a load, compute, replace cycle: [`SessionContext::load_or_initialize`]
//! returns a value and [`SessionContext::store`] writes it back in one atomic step.
//! A stored record is never overwritten unless the caller asks for it.
mod channel_map;
mod extension;
mod store;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use channel_map::{ChannelMap, ChannelMapEntry};
pub use extension::{ExtensionMap, ExtensionValue};
pub use store::{FileStore, MappingRecord, MappingStore, MemoryStore};
pub(crate) use store::write_atomically;

use crate::dio::DigitalTraceSource;
use crate::error::Result;
use crate::layout::DataLayout;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub animal: String,
    pub session: String,
}

impl SessionId {
    pub fn new(animal: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            animal: animal.into(),
            session: session.into(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.animal, self.session)
    }
}

impl FromStr for SessionId {
    type Err = String;

    /// Parses `animal/session`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((animal, session))
                if !animal.is_empty() && !session.is_empty() && !session.contains('/') =>
            {
                Ok(Self::new(animal, session))
            }
            _ => Err(format!("expected <animal>/<session>, got `{s}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub enum SessionKind {
    #[display("ephys")]
    Ephys,
    #[display("behaviour")]
    Behaviour,
}

/// Which build of the pipeline produced a record, and when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub package_version: String,
    pub git_describe: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            package_version: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("VERGEN_GIT_DESCRIBE").map(str::to_string),
            processed_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub id: SessionId,
    pub kind: SessionKind,
    #[serde(default)]
    pub custom: ExtensionMap,
    pub version: VersionInfo,
}

impl SessionContext {
    /// A fresh context. Sessions with a raw recording are electrophysiology sessions.
    #[must_use]
    pub fn initialize(layout: &DataLayout, id: &SessionId) -> Self {
        let kind = if layout.has_recording(id) {
            SessionKind::Ephys
        } else {
            SessionKind::Behaviour
        };
        Self {
            id: id.clone(),
            kind,
            custom: ExtensionMap::new(),
            version: VersionInfo::current(),
        }
    }

    pub fn load(layout: &DataLayout, id: &SessionId) -> Result<Option<Self>> {
        store::read_record(&layout.session_context_path(id), "session context")
    }

    pub fn load_or_initialize(layout: &DataLayout, id: &SessionId) -> Result<Self> {
        match Self::load(layout, id)? {
            Some(context) => Ok(context),
            None => {
                info!(session = %id, "Initializing session context");
                Ok(Self::initialize(layout, id))
            }
        }
    }

    /// Fails with [`crate::SyncError::AlreadyExists`] when a record is present and
    /// `overwrite` is false.
    pub fn store(&self, layout: &DataLayout, overwrite: bool) -> Result<()> {
        store::write_record(
            &layout.session_context_path(&self.id),
            &self.id,
            "session context",
            self,
            overwrite,
        )
    }

    #[must_use]
    pub fn is_ephys(&self) -> bool {
        self.kind == SessionKind::Ephys
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EphysContext {
    pub id: SessionId,
    pub sampling_rate_hz: f64,
    #[serde(default)]
    pub channels: ChannelMap,
    #[serde(default)]
    pub custom: ExtensionMap,
    pub version: VersionInfo,
}

impl EphysContext {
    /// Reads the sampling rate and the animal's channel map. A missing channel map
    /// leaves the context without channels.
    pub fn initialize(
        layout: &DataLayout,
        traces: &dyn DigitalTraceSource,
        id: &SessionId,
    ) -> Result<Self> {
        let map_path = layout.channel_map_path(&id.animal);
        let channels = match ChannelMap::read(&map_path)? {
            Some(channels) => channels,
            None => {
                warn!(session = %id, "No channel map at {map_path}");
                ChannelMap::default()
            }
        };
        Ok(Self {
            id: id.clone(),
            sampling_rate_hz: traces.sampling_rate_hz(id)?,
            channels,
            custom: ExtensionMap::new(),
            version: VersionInfo::current(),
        })
    }

    pub fn load(layout: &DataLayout, id: &SessionId) -> Result<Option<Self>> {
        store::read_record(&layout.ephys_context_path(id), "ephys context")
    }

    pub fn load_or_initialize(
        layout: &DataLayout,
        traces: &dyn DigitalTraceSource,
        id: &SessionId,
    ) -> Result<Self> {
        match Self::load(layout, id)? {
            Some(context) => Ok(context),
            None => {
                info!(session = %id, "Initializing ephys context");
                Self::initialize(layout, traces, id)
            }
        }
    }

    pub fn store(&self, layout: &DataLayout, overwrite: bool) -> Result<()> {
        store::write_record(
            &layout.ephys_context_path(&self.id),
            &self.id,
            "ephys context",
            self,
            overwrite,
        )
    }

    /// Hardware ids of the given trodes channels.
    pub fn trodes_to_headstage_ids(&self, ids: &[u32]) -> Result<Vec<u32>> {
        self.channels.trodes_to_headstage_ids(ids)
    }
}
