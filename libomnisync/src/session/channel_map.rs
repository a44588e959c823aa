//! Per-animal electrode channel map.
//!
//! ```toml
//! [[channels]]
//! trodes_id = 1
//! headstage_hardware_id = 32
//! exclude = false
//! ```
use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::{Result, Stage, SyncError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapEntry {
    pub trodes_id: u32,
    pub headstage_hardware_id: u32,
    #[serde(default)]
    pub exclude: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ChannelMapFile {
    #[serde(default)]
    channels: Vec<ChannelMapEntry>,
}

/// Channels that were not excluded, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    pub channel_trodes_id: Vec<u32>,
    /// Parallel to `channel_trodes_id`.
    pub channel_headstage_hardware_id: Vec<u32>,
    /// Channels taking part in analysis; starts out as every mapped channel.
    pub channel_trodes_id_include: Vec<u32>,
}

impl ChannelMap {
    /// `Ok(None)` when the file does not exist.
    pub fn read(path: &Utf8Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::io(path, e)),
        };
        Self::parse(path, &content).map(Some)
    }

    fn parse(path: &Utf8Path, content: &str) -> Result<Self> {
        let file: ChannelMapFile = toml::from_str(content)
            .map_err(|e| SyncError::malformed(Stage::Session, path, e.to_string()))?;
        Self::from_entries(path, file.channels)
    }

    fn from_entries(path: &Utf8Path, entries: Vec<ChannelMapEntry>) -> Result<Self> {
        let mut map = Self::default();
        for entry in entries.into_iter().filter(|e| !e.exclude) {
            if map.channel_trodes_id.contains(&entry.trodes_id) {
                return Err(SyncError::malformed(
                    Stage::Session,
                    path,
                    format!("trodes_id {} is mapped twice", entry.trodes_id),
                ));
            }
            map.channel_trodes_id.push(entry.trodes_id);
            map.channel_headstage_hardware_id
                .push(entry.headstage_hardware_id);
        }
        map.channel_trodes_id_include = map.channel_trodes_id.clone();
        Ok(map)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channel_trodes_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel_trodes_id.is_empty()
    }

    /// Hardware ids of `ids`, in the same order. Fails on the first id that is not mapped.
    pub fn trodes_to_headstage_ids(&self, ids: &[u32]) -> Result<Vec<u32>> {
        let lookup: BTreeMap<u32, u32> = self
            .channel_trodes_id
            .iter()
            .copied()
            .zip(self.channel_headstage_hardware_id.iter().copied())
            .collect();
        ids.iter()
            .map(|id| {
                lookup
                    .get(id)
                    .copied()
                    .ok_or(SyncError::UnknownChannel { trodes_id: *id })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"
        [[channels]]
        trodes_id = 1
        headstage_hardware_id = 32

        [[channels]]
        trodes_id = 2
        headstage_hardware_id = 33
        exclude = true

        [[channels]]
        trodes_id = 3
        headstage_hardware_id = 7
        exclude = false
    "#;

    #[test]
    fn excluded_channels_are_dropped() {
        let map = ChannelMap::parse(Utf8Path::new("map.toml"), MAP).unwrap();
        assert_eq!(map.channel_trodes_id, vec![1, 3]);
        assert_eq!(map.channel_headstage_hardware_id, vec![32, 7]);
        assert_eq!(map.channel_trodes_id_include, vec![1, 3]);
    }

    #[test]
    fn unknown_trodes_id_is_an_error() {
        let map = ChannelMap::parse(Utf8Path::new("map.toml"), MAP).unwrap();
        assert_eq!(map.trodes_to_headstage_ids(&[3, 1]).unwrap(), vec![7, 32]);
        assert!(matches!(
            map.trodes_to_headstage_ids(&[1, 2]),
            Err(SyncError::UnknownChannel { trodes_id: 2 })
        ));
    }

    #[test]
    fn duplicate_and_unparsable_maps_are_rejected() {
        let duplicate = "[[channels]]\ntrodes_id = 1\nheadstage_hardware_id = 1\n\
                         [[channels]]\ntrodes_id = 1\nheadstage_hardware_id = 2\n";
        let err = ChannelMap::parse(Utf8Path::new("map.toml"), duplicate).unwrap_err();
        assert_eq!(err.stage(), Stage::Session);
        assert!(ChannelMap::parse(Utf8Path::new("map.toml"), "[[channels]]\ntrodes_id = 1").is_err());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(tmp.path().join("map.toml")).unwrap();
        assert_eq!(ChannelMap::read(&path).unwrap(), None);
        std::fs::write(&path, MAP).unwrap();
        assert_eq!(ChannelMap::read(&path).unwrap().map(|m| m.len()), Some(2));
    }
}
