//! Synthetic data directories for the integration tests.
#![allow(dead_code)]

use std::fs;

use camino::Utf8PathBuf;
use libomnisync::events::Event;
use libomnisync::{DataLayout, SessionId};

pub const RATE: u32 = 30_000;
/// Behavioral clock epoch of the synthetic sessions, in seconds.
pub const EPOCH_S: f64 = 1_711_632_140.0;

pub struct DataDir {
    _tmp: tempfile::TempDir,
    pub layout: DataLayout,
}

pub fn data_dir() -> DataDir {
    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
    DataDir {
        _tmp: tmp,
        layout: DataLayout::new(root),
    }
}

impl DataDir {
    /// Marks `id` as an ephys session and writes an exported DIO file for `channel`
    /// with one 10 ms pulse starting at each of `edges_s`.
    pub fn write_dio(&self, id: &SessionId, channel: u32, edges_s: &[f64]) {
        let rec = self.layout.recording_path(id);
        fs::create_dir_all(rec.parent().unwrap()).unwrap();
        fs::write(&rec, b"").unwrap();

        let dio_dir = self.layout.dio_dir(id);
        fs::create_dir_all(&dio_dir).unwrap();
        let mut bytes = format!(
            "<Start settings>\nDescription: Digital input channel\nByte_order: little endian\n\
             Clock rate: {RATE}\nFields: <time uint32><state uint8>\n<End settings>\n"
        )
        .into_bytes();
        let mut record = |time: u32, state: u8| {
            bytes.extend_from_slice(&time.to_le_bytes());
            bytes.push(state);
        };
        record(0, 0);
        for edge in edges_s {
            let start = (edge * f64::from(RATE)).round() as u32;
            record(start, 1);
            record(start + RATE / 100, 0);
        }
        let name = format!("{}_merged.dio_Din{channel}.dat", id.session);
        fs::write(dio_dir.join(name), bytes).unwrap();
    }

    /// Writes the animal's channel map from `(trodes_id, hardware_id, exclude)` rows.
    pub fn write_channel_map(&self, animal: &str, rows: &[(u32, u32, bool)]) {
        let path = self.layout.channel_map_path(animal);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let content: String = rows
            .iter()
            .map(|(trodes_id, hardware_id, exclude)| {
                format!(
                    "[[channels]]\ntrodes_id = {trodes_id}\n\
                     headstage_hardware_id = {hardware_id}\nexclude = {exclude}\n\n"
                )
            })
            .collect();
        fs::write(path, content).unwrap();
    }

    pub fn write_events(&self, id: &SessionId, events: &[Event]) {
        let dir = self.layout.behavior_dir(id);
        fs::create_dir_all(&dir).unwrap();
        let lines: Vec<String> = events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        fs::write(dir.join("events.jsonl"), lines.join("\n")).unwrap();
    }

    /// A directory for a session without any recording.
    pub fn behaviour_session(&self, id: &SessionId) {
        fs::create_dir_all(self.layout.behavior_dir(id)).unwrap();
    }
}

pub fn event_at(topic: &str, seconds: f64) -> Event {
    Event {
        topic: topic.to_string(),
        time_ns: (seconds * 1e9).round() as u64,
        msg: None,
        pose: None,
    }
}

pub fn message_at(topic: &str, seconds: f64, msg: &str) -> Event {
    Event {
        msg: Some(msg.to_string()),
        ..event_at(topic, seconds)
    }
}

/// Behavioral time of an acquisition time for the synthetic clock pair.
pub fn behavioral_time(acquisition_s: f64) -> f64 {
    EPOCH_S + 1.000_02 * acquisition_s
}

pub const SYNC_EDGES: [f64; 7] = [1.0, 2.5, 3.1, 4.7, 6.2, 8.0, 9.4];
