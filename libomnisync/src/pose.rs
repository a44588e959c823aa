//! Animal position time series from the tracking topics of an event log.
use serde::{Deserialize, Serialize};

use crate::events::EventLog;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Tracking topic the sample came from.
    pub source: String,
}

/// Positions from the first topic in `topics` that is present in `log`, in time order.
///
/// Events on the chosen topic without a pose are skipped. Empty when no topic is present.
#[must_use]
pub fn extract_positions(log: &EventLog, topics: &[String]) -> Vec<PositionSample> {
    let Some(topic) = topics.iter().find(|t| log.has_topic(t)) else {
        return vec![];
    };
    let source = source_name(topic);
    log.on_topic(topic)
        .into_iter()
        .filter_map(|event| {
            event.pose.map(|pose| PositionSample {
                time: event.time_s(),
                x: pose.x,
                y: pose.y,
                z: pose.z,
                source: source.clone(),
            })
        })
        .collect()
}

/// `/headstage_pose_in_maze` becomes `headstage`.
fn source_name(topic: &str) -> String {
    let name = topic.trim_start_matches('/');
    name.split_once('_')
        .map_or(name, |(head, _)| head)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, Position};

    fn pose_event(topic: &str, time_ns: u64, x: f64) -> Event {
        Event {
            topic: topic.to_string(),
            time_ns,
            msg: None,
            pose: Some(Position { x, y: 0.0, z: 0.0 }),
        }
    }

    fn topics() -> Vec<String> {
        vec![
            "/headstage_pose_in_maze".to_string(),
            "/harness_pose_in_maze".to_string(),
        ]
    }

    #[test]
    fn headstage_has_priority() {
        let log = EventLog::from_events(vec![
            pose_event("/harness_pose_in_maze", 1_000_000_000, 9.0),
            pose_event("/headstage_pose_in_maze", 2_000_000_000, 2.0),
            pose_event("/headstage_pose_in_maze", 1_000_000_000, 1.0),
        ]);
        let positions = extract_positions(&log, &topics());
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].x, 1.0);
        assert_eq!(positions[1].time, 2.0);
        assert_eq!(positions[0].source, "headstage");
    }

    #[test]
    fn falls_back_to_harness() {
        let log = EventLog::from_events(vec![pose_event("/harness_pose_in_maze", 5, 3.0)]);
        let positions = extract_positions(&log, &topics());
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].source, "harness");
    }

    #[test]
    fn no_tracking_topic() {
        let log = EventLog::from_events(vec![]);
        assert!(extract_positions(&log, &topics()).is_empty());
    }
}
