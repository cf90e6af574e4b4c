//! Keyed on-disk blob store.
//!
//! Maps `(track id, resource kind)` to a single file under the store root:
//!
//! ```text
//! <root>/audio/<sha256(id)>
//! <root>/art/<sha256(id)>
//! <root>/thumbnail/<sha256(id)>
//! <root>/tmp/            # download staging, same filesystem as the blobs
//! ```
//!
//! Writes go through a temp file in `tmp/` followed by a rename, so a reader
//! never sees a half-written blob. An existing blob is always removed before a
//! new one takes its key.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempPath};

use crate::core::models::{ResourceKind, TrackId};
use crate::error::Result;

const TMP_SUBDIR: &str = "tmp";

/// Result of a delete, so callers can log absent-vs-present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    Absent,
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct ByteStore {
    root: PathBuf,
}

impl ByteStore {
    /// Open (and create) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the directory layout cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in ResourceKind::ALL {
            std::fs::create_dir_all(root.join(kind.as_str()))?;
        }
        std::fs::create_dir_all(root.join(TMP_SUBDIR))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the blob for a key, whether or not it exists.
    #[must_use]
    pub fn path_for(&self, id: &TrackId, kind: ResourceKind) -> PathBuf {
        let digest = Sha256::digest(id.as_str().as_bytes());
        self.root.join(kind.as_str()).join(hex::encode(digest))
    }

    #[must_use]
    pub fn contains(&self, id: &TrackId, kind: ResourceKind) -> bool {
        self.path_for(id, kind).is_file()
    }

    /// Size on disk, if present.
    #[must_use]
    pub fn blob_size(&self, id: &TrackId, kind: ResourceKind) -> Option<u64> {
        std::fs::metadata(self.path_for(id, kind))
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|m| m.len())
    }

    /// Store `bytes` under the key, replacing any existing blob.
    ///
    /// # Errors
    /// Returns an I/O error if the temp file cannot be written or renamed.
    /// The previous blob (if any) is gone at that point; callers must not mark
    /// the resource as cached.
    pub fn put(&self, id: &TrackId, kind: ResourceKind, bytes: &[u8]) -> Result<()> {
        let mut temp = self.temp_file()?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;

        self.remove_existing(id, kind)?;
        let dest = self.path_for(id, kind);
        temp.persist(&dest).map_err(|e| e.error)?;
        tracing::trace!(track_id = %id, %kind, bytes = bytes.len(), "Stored blob");
        Ok(())
    }

    /// Move a downloaded temp file into the store.
    ///
    /// The rename only falls back to copy + remove when the source lives on a
    /// different filesystem.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be moved or copied.
    pub fn put_from_temporary_file(
        &self,
        id: &TrackId,
        kind: ResourceKind,
        path: &Path,
    ) -> Result<()> {
        self.remove_existing(id, kind)?;
        let dest = self.path_for(id, kind);

        match std::fs::rename(path, &dest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                std::fs::copy(path, &dest)?;
                std::fs::remove_file(path)?;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::trace!(track_id = %id, %kind, "Moved download into store");
        Ok(())
    }

    /// Read a blob. Absent blobs are `Ok(None)`, never an error.
    ///
    /// # Errors
    /// Returns an I/O error for failures other than "not found".
    pub fn get(&self, id: &TrackId, kind: ResourceKind) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(id, kind)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a blob. Deleting an absent blob is not an error.
    ///
    /// # Errors
    /// Returns an I/O error for failures other than "not found".
    pub fn delete(&self, id: &TrackId, kind: ResourceKind) -> Result<DeleteOutcome> {
        match std::fs::remove_file(self.path_for(id, kind)) {
            Ok(()) => Ok(DeleteOutcome::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::Absent),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every kind of blob for a track.
    ///
    /// # Errors
    /// Returns the first I/O error; remaining kinds are still attempted.
    pub fn purge_track(&self, id: &TrackId) -> Result<()> {
        let mut first_err = None;
        for kind in ResourceKind::ALL {
            if let Err(e) = self.delete(id, *kind) {
                tracing::warn!(track_id = %id, %kind, error = %e, "Failed to delete blob");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Temp file in the staging area; removed on drop unless persisted.
    ///
    /// # Errors
    /// Returns an I/O error if the staging directory is unwritable.
    pub fn temp_file(&self) -> Result<NamedTempFile> {
        Ok(NamedTempFile::new_in(self.root.join(TMP_SUBDIR))?)
    }

    /// Temp path for a streaming download; removed on drop unless kept.
    ///
    /// # Errors
    /// Returns an I/O error if the staging directory is unwritable.
    pub fn temp_path(&self) -> Result<TempPath> {
        Ok(self.temp_file()?.into_temp_path())
    }

    /// Clear leftovers from interrupted downloads.
    ///
    /// # Errors
    /// Returns an I/O error if the staging directory cannot be listed.
    pub fn sweep_temp(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(self.root.join(TMP_SUBDIR))?.flatten() {
            if entry.path().is_file() && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove_existing(&self, id: &TrackId, kind: ResourceKind) -> Result<()> {
        if self.delete(id, kind)? == DeleteOutcome::Removed {
            tracing::warn!(
                track_id = %id,
                %kind,
                "Cache file already existed before write; replaced it"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, ByteStore) {
        let tmp = TempDir::new().unwrap();
        let store = ByteStore::open(tmp.path().join("blobs")).unwrap();
        (tmp, store)
    }

    #[test]
    fn put_get_delete() {
        let (_tmp, store) = open_store();
        let id = TrackId::new("track-1");

        assert_eq!(store.get(&id, ResourceKind::Audio).unwrap(), None);
        store.put(&id, ResourceKind::Audio, b"abc").unwrap();
        assert!(store.contains(&id, ResourceKind::Audio));
        assert!(!store.contains(&id, ResourceKind::Art));
        assert_eq!(
            store.get(&id, ResourceKind::Audio).unwrap(),
            Some(b"abc".to_vec())
        );
        assert_eq!(store.blob_size(&id, ResourceKind::Audio), Some(3));

        assert_eq!(
            store.delete(&id, ResourceKind::Audio).unwrap(),
            DeleteOutcome::Removed
        );
        assert_eq!(
            store.delete(&id, ResourceKind::Audio).unwrap(),
            DeleteOutcome::Absent
        );
    }

    #[test]
    fn put_replaces_existing_blob() {
        let (_tmp, store) = open_store();
        let id = TrackId::new("t");
        store.put(&id, ResourceKind::Art, b"old-contents").unwrap();
        store.put(&id, ResourceKind::Art, b"new").unwrap();
        assert_eq!(
            store.get(&id, ResourceKind::Art).unwrap(),
            Some(b"new".to_vec())
        );
    }

    #[test]
    fn put_leaves_no_temp_files() {
        let (_tmp, store) = open_store();
        store
            .put(&TrackId::new("t"), ResourceKind::Audio, b"x")
            .unwrap();
        let leftovers = std::fs::read_dir(store.root().join(TMP_SUBDIR))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn put_from_temporary_file_moves() {
        let (_tmp, store) = open_store();
        let id = TrackId::new("moved");
        let temp = store.temp_path().unwrap();
        std::fs::write(&temp, b"downloaded").unwrap();

        store
            .put_from_temporary_file(&id, ResourceKind::Audio, &temp)
            .unwrap();
        assert!(!temp.exists());
        assert_eq!(
            store.get(&id, ResourceKind::Audio).unwrap(),
            Some(b"downloaded".to_vec())
        );
    }

    #[test]
    fn ids_with_path_characters_are_safe() {
        let (_tmp, store) = open_store();
        let id = TrackId::new("../../etc/passwd");
        store.put(&id, ResourceKind::Audio, b"x").unwrap();
        let path = store.path_for(&id, ResourceKind::Audio);
        assert!(path.starts_with(store.root()));
    }

    #[test]
    fn purge_track_removes_all_kinds() {
        let (_tmp, store) = open_store();
        let id = TrackId::new("t");
        for kind in ResourceKind::ALL {
            store.put(&id, *kind, b"x").unwrap();
        }
        store.purge_track(&id).unwrap();
        for kind in ResourceKind::ALL {
            assert!(!store.contains(&id, *kind));
        }
    }

    #[test]
    fn sweep_temp_clears_staging() {
        let (_tmp, store) = open_store();
        let temp = store.temp_path().unwrap();
        std::fs::write(&temp, b"partial").unwrap();
        let kept = temp.keep().unwrap();
        assert_eq!(store.sweep_temp().unwrap(), 1);
        assert!(!kept.exists());
    }
}
