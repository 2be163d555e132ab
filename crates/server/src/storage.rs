//! Attachment storage for scanned images
//!
//! Scans land in a single directory under names derived from the local time,
//! e.g. `20240131T154502.jpg`. The name doubles as the download id.

use chrono::{Local, NaiveDateTime};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("invalid attachment id '{0}'")]
    InvalidId(String),

    #[error("attachment '{0}' not found")]
    NotFound(String),

    #[error("attachment storage error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    /// Open the store, creating `dir` if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AttachmentError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a fresh attachment named after the current local time
    ///
    /// The file is created empty so concurrent allocations in the same
    /// second get distinct names.
    pub fn allocate(&self) -> Result<(String, PathBuf), AttachmentError> {
        self.allocate_at(Local::now().naive_local())
    }

    fn allocate_at(&self, now: NaiveDateTime) -> Result<(String, PathBuf), AttachmentError> {
        let stem = now.format("%Y%m%dT%H%M%S").to_string();

        for n in 0u32.. {
            let id = match n {
                0 => format!("{}.{}", stem, EXTENSION),
                n => format!("{}-{}.{}", stem, n, EXTENSION),
            };
            let path = self.dir.join(&id);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    debug!("Allocated attachment {}", path.display());
                    return Ok((id, path));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AttachmentError::InvalidId(stem))
    }

    /// Path of an existing attachment
    pub fn resolve(&self, id: &str) -> Result<PathBuf, AttachmentError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(AttachmentError::InvalidId(id.to_string()));
        }

        let path = self.dir.join(id);
        if path.is_file() {
            Ok(path)
        } else {
            Err(AttachmentError::NotFound(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 31)
            .and_then(|d| d.and_hms_opt(15, 45, 2))
            .unwrap()
    }

    #[test]
    fn test_allocate_uses_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        let (id, path) = store.allocate_at(fixed_time()).unwrap();
        assert_eq!(id, "20240131T154502.jpg");
        assert_eq!(path, dir.path().join(&id));
        assert!(path.exists());
    }

    #[test]
    fn test_allocate_same_second_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        let (first, _) = store.allocate_at(fixed_time()).unwrap();
        let (second, _) = store.allocate_at(fixed_time()).unwrap();
        let (third, _) = store.allocate_at(fixed_time()).unwrap();

        assert_eq!(first, "20240131T154502.jpg");
        assert_eq!(second, "20240131T154502-1.jpg");
        assert_eq!(third, "20240131T154502-2.jpg");
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("attachment");

        let store = AttachmentStore::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.dir(), nested.as_path());
    }

    #[test]
    fn test_resolve_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();
        let (id, path) = store.allocate().unwrap();

        assert_eq!(store.resolve(&id).unwrap(), path);
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        for id in ["", "../secret", "a/b.jpg", "..", "a\\b.jpg"] {
            assert!(
                matches!(store.resolve(id), Err(AttachmentError::InvalidId(_))),
                "{:?} accepted",
                id
            );
        }
    }

    #[test]
    fn test_resolve_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.resolve("20000101T000000.jpg"),
            Err(AttachmentError::NotFound(_))
        ));
    }
}
