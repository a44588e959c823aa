//! Behavioral event logs recorded on the middleware clock.
//!
//! One JSON object per line:
//!
//! ```text
//! {"topic": "/sync_pulse", "time_ns": 1711632142250000000}
//! {"topic": "/rosout", "time_ns": 1711632143000000000, "msg": "START OF TRIAL ['A', 'B', 'C']"}
//! {"topic": "/headstage_pose_in_maze", "time_ns": 1711632143010000000, "pose": {"x": 0.1, "y": 0.2, "z": 0.0}}
//! ```
use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dio::PulseTimestampSequence;
use crate::error::{Result, Stage, SyncError};
use crate::layout::DataLayout;
use crate::session::SessionId;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub time_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<Position>,
}

impl Event {
    /// Event time in seconds on the behavioral clock.
    #[must_use]
    pub fn time_s(&self) -> f64 {
        (self.time_ns / NANOS_PER_SECOND) as f64
            + (self.time_ns % NANOS_PER_SECOND) as f64 / NANOS_PER_SECOND as f64
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    #[must_use]
    pub fn from_events(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn read(path: &Utf8Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Utf8Path, content: &str) -> Result<Self> {
        let events = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str::<Event>(line).map_err(|e| {
                    SyncError::malformed(
                        Stage::LoadReference,
                        path,
                        format!("line {}: {e}", number + 1),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Read {} events from {path}", events.len());
        Ok(Self { events })
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn topics(&self) -> BTreeSet<&str> {
        self.events.iter().map(|e| e.topic.as_str()).collect()
    }

    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.events.iter().any(|e| e.topic == topic)
    }

    /// Events on `topic` in time order. Events with equal times keep their log order.
    #[must_use]
    pub fn on_topic(&self, topic: &str) -> Vec<&Event> {
        let mut events: Vec<&Event> = self.events.iter().filter(|e| e.topic == topic).collect();
        events.sort_by_key(|e| e.time_ns);
        events
    }

    /// `(seconds, text)` of every event on `topic` carrying a message, in time order.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<(f64, String)> {
        self.on_topic(topic)
            .into_iter()
            .filter_map(|e| e.msg.clone().map(|m| (e.time_s(), m)))
            .collect()
    }

    /// Pulse-emission times from the first marker topic present in the log.
    pub fn pulse_times(&self, markers: &MarkerSelector) -> Result<(String, PulseTimestampSequence)> {
        let topic = markers
            .candidates()
            .find(|topic| self.has_topic(topic))
            .ok_or_else(|| SyncError::NoSyncTopicFound {
                tried: markers.candidates().map(str::to_string).collect(),
            })?;
        if topic != markers.primary {
            warn!("Sync topic {} missing, using fallback {topic}", markers.primary);
        }
        let times = self.on_topic(topic).iter().map(|e| e.time_s()).collect();
        Ok((
            topic.to_string(),
            PulseTimestampSequence::from_unsorted(times),
        ))
    }
}

/// Topics carrying sync-pulse emission markers, in order of preference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSelector {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl MarkerSelector {
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks,
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// Access to the sync-pulse times recorded by the behavioral system.
pub trait ReferencePulseSource: Sync {
    /// Ascending pulse times in seconds. Fails with [`SyncError::NoSyncTopicFound`]
    /// when no marker stream is available.
    fn reference_pulse_times(&self, session: &SessionId) -> Result<PulseTimestampSequence>;
}

/// Reads pulse times from the session's event log under a [`DataLayout`].
#[derive(Clone, Debug)]
pub struct EventLogSource {
    layout: DataLayout,
    markers: MarkerSelector,
}

impl EventLogSource {
    pub fn new(layout: DataLayout, markers: MarkerSelector) -> Self {
        Self { layout, markers }
    }

    pub fn event_log(&self, session: &SessionId) -> Result<Option<EventLog>> {
        let Some(path) = self.layout.event_log_path(session)? else {
            return Ok(None);
        };
        EventLog::read(&path).map(Some)
    }

    pub fn event_log_path(&self, session: &SessionId) -> Result<Option<Utf8PathBuf>> {
        self.layout.event_log_path(session)
    }
}

impl ReferencePulseSource for EventLogSource {
    fn reference_pulse_times(&self, session: &SessionId) -> Result<PulseTimestampSequence> {
        let Some(log) = self.event_log(session)? else {
            warn!(%session, "No behavioral event log found");
            return Err(SyncError::NoSyncTopicFound {
                tried: self.markers.candidates().map(str::to_string).collect(),
            });
        };
        let (topic, times) = log.pulse_times(&self.markers)?;
        debug!(%session, topic = %topic, pulses = times.len(), "Loaded reference pulses");
        Ok(times)
    }
}
