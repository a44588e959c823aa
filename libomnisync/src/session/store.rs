//! Atomic record files and clock mapping caches.
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use camino::Utf8Path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SessionId, VersionInfo};
use crate::error::{Result, Stage, SyncError};
use crate::layout::DataLayout;
use crate::mapping::ClockMapping;

pub(crate) fn read_record<T: DeserializeOwned>(path: &Utf8Path, what: &str) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::io(path, e)),
    };
    ron::de::from_bytes(&bytes)
        .map(Some)
        .map_err(|e| SyncError::Serialization {
            what: format!("{what} in {path}"),
            reason: e.to_string(),
        })
}

/// Encodes `value` as RON and writes it with [`write_atomically`].
pub(crate) fn write_record<T: Serialize>(
    path: &Utf8Path,
    session: &SessionId,
    what: &str,
    value: &T,
    overwrite: bool,
) -> Result<()> {
    let encoded = ron::Options::default()
        .to_string_pretty(value, ron::ser::PrettyConfig::default())
        .map_err(|e| SyncError::Serialization {
            what: what.to_string(),
            reason: e.to_string(),
        })?;
    write_atomically(path, session, &encoded, overwrite)?;
    debug!(%session, "Wrote {what} to {path}");
    Ok(())
}

/// Writes `contents` to a temporary file next to `path` and renames it into place, so a
/// reader sees either the previous file or the new one.
///
/// Without `overwrite` the rename refuses to replace an existing file and the call
/// fails with [`SyncError::AlreadyExists`], leaving the existing file untouched.
pub(crate) fn write_atomically(
    path: &Utf8Path,
    session: &SessionId,
    contents: &str,
    overwrite: bool,
) -> Result<()> {
    let already_exists = || SyncError::AlreadyExists {
        session: session.clone(),
    };
    if !overwrite && path.exists() {
        return Err(already_exists());
    }

    let dir = path.parent().ok_or_else(|| {
        SyncError::malformed(Stage::Store, path, "output path has no parent directory")
    })?;
    std::fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SyncError::io(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| SyncError::io(dir, e))?;

    let persisted = if overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    match persisted {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Err(already_exists()),
        Err(e) => Err(SyncError::io(path, e.error)),
    }
}

/// Cache of fitted clock mappings, one per session.
pub trait MappingStore: Sync {
    fn load_cached_mapping(&self, session: &SessionId) -> Result<Option<ClockMapping>>;

    /// Fails with [`SyncError::AlreadyExists`] when a mapping is cached and `overwrite`
    /// is false; the cached mapping is left as it was.
    fn store_mapping(
        &self,
        session: &SessionId,
        mapping: &ClockMapping,
        overwrite: bool,
    ) -> Result<()>;
}

/// On-disk form of a cached mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: SessionId,
    pub mapping: ClockMapping,
    pub version: VersionInfo,
}

/// Mappings stored as `clock_mapping.ron` in each session's extracted directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    layout: DataLayout,
}

impl FileStore {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub fn load_record(&self, session: &SessionId) -> Result<Option<MappingRecord>> {
        read_record(&self.layout.clock_mapping_path(session), "clock mapping")
    }
}

impl MappingStore for FileStore {
    fn load_cached_mapping(&self, session: &SessionId) -> Result<Option<ClockMapping>> {
        Ok(self.load_record(session)?.map(|record| record.mapping))
    }

    fn store_mapping(
        &self,
        session: &SessionId,
        mapping: &ClockMapping,
        overwrite: bool,
    ) -> Result<()> {
        let record = MappingRecord {
            id: session.clone(),
            mapping: mapping.clone(),
            version: VersionInfo::current(),
        };
        write_record(
            &self.layout.clock_mapping_path(session),
            session,
            "clock mapping",
            &record,
            overwrite,
        )
    }
}

/// In-process store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    mappings: Mutex<HashMap<SessionId, ClockMapping>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, ClockMapping>> {
        self.mappings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl MappingStore for MemoryStore {
    fn load_cached_mapping(&self, session: &SessionId) -> Result<Option<ClockMapping>> {
        Ok(self.lock().get(session).cloned())
    }

    fn store_mapping(
        &self,
        session: &SessionId,
        mapping: &ClockMapping,
        overwrite: bool,
    ) -> Result<()> {
        let mut mappings = self.lock();
        if !overwrite && mappings.contains_key(session) {
            return Err(SyncError::AlreadyExists {
                session: session.clone(),
            });
        }
        mappings.insert(session.clone(), mapping.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    fn mapping(offset: f64) -> ClockMapping {
        ClockMapping::new(vec![1.0, offset], Some(1.0)).unwrap()
    }

    fn check_store(store: &dyn MappingStore) {
        let id = SessionId::new("NC40008", "20250328_134136");
        assert_eq!(store.load_cached_mapping(&id).unwrap(), None);

        store.store_mapping(&id, &mapping(10.0), false).unwrap();
        let err = store.store_mapping(&id, &mapping(20.0), false).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }));
        assert_eq!(store.load_cached_mapping(&id).unwrap(), Some(mapping(10.0)));

        store.store_mapping(&id, &mapping(20.0), true).unwrap();
        assert_eq!(store.load_cached_mapping(&id).unwrap(), Some(mapping(20.0)));
    }

    #[test]
    fn memory_store_refuses_silent_overwrite() {
        check_store(&MemoryStore::new());
    }

    #[test]
    fn file_store_refuses_silent_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        check_store(&FileStore::new(DataLayout::new(root)));
    }

    #[test]
    fn no_temporary_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let layout = DataLayout::new(root);
        let store = FileStore::new(layout.clone());
        let id = SessionId::new("NC1", "20250101_000000");
        store.store_mapping(&id, &mapping(1.0), false).unwrap();
        let _ = store.store_mapping(&id, &mapping(2.0), false);

        let names: Vec<String> = std::fs::read_dir(layout.extracted_dir(&id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["clock_mapping.ron".to_string()]);
    }

    #[test]
    fn corrupt_record_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let layout = DataLayout::new(root);
        let id = SessionId::new("NC1", "20250101_000000");
        std::fs::create_dir_all(layout.extracted_dir(&id)).unwrap();
        std::fs::write(layout.clock_mapping_path(&id), "not ron (").unwrap();
        let err = FileStore::new(layout).load_cached_mapping(&id).unwrap_err();
        assert!(matches!(err, SyncError::Serialization { .. }));
    }
}
