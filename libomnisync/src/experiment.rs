//! Experiment manifest: which sessions of which animals take part in a batch.
//!
//! ```toml
//! [[sessions]]
//! animal = "NC40008"
//! session = "20250328_134136"
//! include = true
//! ```
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, Stage, SyncError};
use crate::layout::DataLayout;
use crate::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub animal: String,
    pub session: String,
    #[serde(default = "default_include")]
    pub include: bool,
}

fn default_include() -> bool {
    true
}

impl ManifestEntry {
    #[must_use]
    pub fn id(&self) -> SessionId {
        SessionId::new(&self.animal, &self.session)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentManifest {
    #[serde(default)]
    pub sessions: Vec<ManifestEntry>,
}

/// Included sessions of one animal, in manifest order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnimalBatch {
    pub animal: String,
    pub sessions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestStatus {
    Written { sessions: usize },
    /// The manifest existed and was left alone.
    Kept,
}

/// Directory name prefixes that mark animals and sessions in the data directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPrefixes {
    pub animal: String,
    pub session: String,
}

impl ExperimentManifest {
    /// Every `<animal>/<session>` directory pair under `layout`, all included.
    pub fn scan(layout: &DataLayout, prefixes: &ScanPrefixes) -> Result<Self> {
        let mut sessions = vec![];
        for animal_dir in sorted_subdirs(layout.data_dir(), &prefixes.animal)? {
            let Some(animal) = animal_dir.file_name() else {
                continue;
            };
            for session_dir in sorted_subdirs(&animal_dir, &prefixes.session)? {
                if let Some(session) = session_dir.file_name() {
                    sessions.push(ManifestEntry {
                        animal: animal.to_string(),
                        session: session.to_string(),
                        include: true,
                    });
                }
            }
        }
        Ok(Self { sessions })
    }

    /// Writes a freshly scanned manifest to `path`.
    ///
    /// An existing manifest is kept unless `overwrite` is set. Fails when the data
    /// directory contains no sessions.
    pub fn initialize(
        layout: &DataLayout,
        prefixes: &ScanPrefixes,
        path: &Utf8Path,
        overwrite: bool,
    ) -> Result<ManifestStatus> {
        if path.exists() && !overwrite {
            warn!("Experiment manifest already exists at {path}, skipping generation");
            return Ok(ManifestStatus::Kept);
        }
        let manifest = Self::scan(layout, prefixes)?;
        if manifest.sessions.is_empty() {
            return Err(SyncError::malformed(
                Stage::Session,
                layout.data_dir(),
                "no sessions found, cannot create an experiment manifest",
            ));
        }
        manifest.save(path)?;
        info!(
            "Wrote {} session entries to {path}",
            manifest.sessions.len()
        );
        Ok(ManifestStatus::Written {
            sessions: manifest.sessions.len(),
        })
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| SyncError::malformed(Stage::Session, path, e.to_string()))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| SyncError::Serialization {
            what: "experiment manifest".to_string(),
            reason: e.to_string(),
        })?;
        if let Some(dir) = path.parent().filter(|d| !d.as_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
        }
        std::fs::write(path, content).map_err(|e| SyncError::io(path, e))
    }

    /// Included sessions grouped per animal, animals in order of first appearance.
    #[must_use]
    pub fn batches(&self) -> Vec<AnimalBatch> {
        let mut batches: Vec<AnimalBatch> = vec![];
        for entry in self.sessions.iter().filter(|e| e.include) {
            match batches.iter_mut().find(|b| b.animal == entry.animal) {
                Some(batch) => batch.sessions.push(entry.session.clone()),
                None => batches.push(AnimalBatch {
                    animal: entry.animal.clone(),
                    sessions: vec![entry.session.clone()],
                }),
            }
        }
        batches
    }

    /// Included sessions in batch order.
    #[must_use]
    pub fn included(&self) -> Vec<SessionId> {
        self.batches()
            .into_iter()
            .flat_map(|batch| {
                let animal = batch.animal;
                batch
                    .sessions
                    .into_iter()
                    .map(move |session| SessionId::new(animal.clone(), session))
            })
            .collect()
    }
}

fn sorted_subdirs(dir: &Utf8Path, prefix: &str) -> Result<Vec<Utf8PathBuf>> {
    let entries = dir.read_dir_utf8().map_err(|e| SyncError::io(dir, e))?;
    Ok(entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_name().starts_with(prefix))
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.into_path())
        .sorted()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> ScanPrefixes {
        ScanPrefixes {
            animal: "NC".to_string(),
            session: "20".to_string(),
        }
    }

    fn data_dir() -> (tempfile::TempDir, DataLayout) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        for dir in [
            "NC40024/20250404_101010",
            "NC40023/20250405_090000",
            "NC40023/20250404_120000",
            "NC40023/notes",
            "scratch/20250101_000000",
        ] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        (tmp, DataLayout::new(root))
    }

    #[test]
    fn scan_finds_prefixed_directories_in_order() {
        let (_tmp, layout) = data_dir();
        let manifest = ExperimentManifest::scan(&layout, &prefixes()).unwrap();
        let ids: Vec<String> = manifest.sessions.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "NC40023/20250404_120000",
                "NC40023/20250405_090000",
                "NC40024/20250404_101010"
            ]
        );
    }

    #[test]
    fn initialize_keeps_existing_manifest() {
        let (_tmp, layout) = data_dir();
        let path = layout.data_dir().join("experiment.toml");
        assert_eq!(
            ExperimentManifest::initialize(&layout, &prefixes(), &path, false).unwrap(),
            ManifestStatus::Written { sessions: 3 }
        );

        let mut edited = ExperimentManifest::load(&path).unwrap();
        edited.sessions[0].include = false;
        edited.save(&path).unwrap();
        assert_eq!(
            ExperimentManifest::initialize(&layout, &prefixes(), &path, false).unwrap(),
            ManifestStatus::Kept
        );
        assert_eq!(ExperimentManifest::load(&path).unwrap(), edited);
    }

    #[test]
    fn empty_data_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let layout = DataLayout::new(root.clone());
        assert!(
            ExperimentManifest::initialize(&layout, &prefixes(), &root.join("m.toml"), false)
                .is_err()
        );
    }

    #[test]
    fn included_sessions_grouped_by_animal() {
        let manifest: ExperimentManifest = toml::from_str(
            r#"
            [[sessions]]
            animal = "NC40024"
            session = "20250404_101010"

            [[sessions]]
            animal = "NC40023"
            session = "20250404_120000"
            include = false

            [[sessions]]
            animal = "NC40023"
            session = "20250405_090000"

            [[sessions]]
            animal = "NC40024"
            session = "20250406_101010"
            "#,
        )
        .unwrap();
        assert_eq!(
            manifest.batches(),
            vec![
                AnimalBatch {
                    animal: "NC40024".to_string(),
                    sessions: vec!["20250404_101010".to_string(), "20250406_101010".to_string()],
                },
                AnimalBatch {
                    animal: "NC40023".to_string(),
                    sessions: vec!["20250405_090000".to_string()],
                },
            ]
        );
        assert_eq!(manifest.included().len(), 3);
    }
}
