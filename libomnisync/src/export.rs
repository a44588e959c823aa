//! Per-session JSON outputs derived from the behavioral event log.
use serde::Serialize;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::events::EventLog;
use crate::layout::DataLayout;
use crate::pose::{PositionSample, extract_positions};
use crate::session::{SessionId, write_atomically};
use crate::trials::{TrialRecord, extract_trials};

fn write_json<T: Serialize>(
    path: &camino::Utf8Path,
    session: &SessionId,
    what: &str,
    value: &T,
    overwrite: bool,
) -> Result<()> {
    let encoded = serde_json::to_string_pretty(value).map_err(|e| SyncError::Serialization {
        what: what.to_string(),
        reason: e.to_string(),
    })?;
    write_atomically(path, session, &encoded, overwrite)
}

/// Folds the controller messages on `rosout_topic` into trials and writes
/// `trial_times.json`.
pub fn export_trials(
    layout: &DataLayout,
    session: &SessionId,
    log: &EventLog,
    rosout_topic: &str,
    overwrite: bool,
) -> Result<Vec<TrialRecord>> {
    let messages = log.messages(rosout_topic);
    let trials = extract_trials(messages.iter().map(|(t, m)| (*t, m.as_str())));
    let path = layout.trial_times_path(session);
    write_json(&path, session, "trial times", &trials, overwrite)?;
    info!(%session, "Saved {} trials to {path}", trials.len());
    Ok(trials)
}

/// Writes `position_times.json` from the first available tracking topic.
///
/// Nothing is written when the log has no tracking data.
pub fn export_positions(
    layout: &DataLayout,
    session: &SessionId,
    log: &EventLog,
    pose_topics: &[String],
    overwrite: bool,
) -> Result<Vec<PositionSample>> {
    let positions = extract_positions(log, pose_topics);
    if positions.is_empty() {
        info!(%session, "No pose data found, nothing saved");
        return Ok(positions);
    }
    let path = layout.position_times_path(session);
    write_json(&path, session, "position times", &positions, overwrite)?;
    info!(%session, "Saved {} positions to {path}", positions.len());
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::events::{Event, Position};

    fn event(topic: &str, time_ns: u64, msg: Option<&str>, pose: Option<Position>) -> Event {
        Event {
            topic: topic.to_string(),
            time_ns,
            msg: msg.map(str::to_string),
            pose,
        }
    }

    #[test]
    fn writes_trials_and_refuses_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap());
        let id = SessionId::new("NC1", "20250101_000000");
        let log = EventLog::from_events(vec![
            event("/rosout", 1_000_000_000, Some("START OF TRIAL ['A', 'B', 'C']"), None),
            event("/rosout", 2_000_000_000, Some("SUCCESS"), None),
        ]);

        let trials = export_trials(&layout, &id, &log, "/rosout", false).unwrap();
        assert_eq!(trials.len(), 1);
        let written: Vec<TrialRecord> =
            serde_json::from_str(&std::fs::read_to_string(layout.trial_times_path(&id)).unwrap())
                .unwrap();
        assert_eq!(written, trials);

        assert!(matches!(
            export_trials(&layout, &id, &log, "/rosout", false),
            Err(SyncError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn empty_positions_write_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap());
        let id = SessionId::new("NC1", "20250101_000000");
        let log = EventLog::from_events(vec![event("/rosout", 1, Some("hello"), None)]);
        let topics = vec!["/headstage_pose_in_maze".to_string()];
        assert!(export_positions(&layout, &id, &log, &topics, false).unwrap().is_empty());
        assert!(!layout.position_times_path(&id).exists());

        let log = EventLog::from_events(vec![event(
            "/headstage_pose_in_maze",
            1,
            None,
            Some(Position { x: 1.0, y: 2.0, z: 3.0 }),
        )]);
        assert_eq!(export_positions(&layout, &id, &log, &topics, false).unwrap().len(), 1);
        assert!(layout.position_times_path(&id).exists());
    }
}
