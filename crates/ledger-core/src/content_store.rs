// crates/ledger-core/src/content_store.rs
// ============================================================================
// Module: Content-Addressed Store
// Description: Directory-backed, hash-addressed storage for artifact payloads.
// Purpose: Give every artifact a durable, deduplicated, tamper-evident home
//          keyed by the canonical hash of its content.
// Dependencies: cap-std, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Content lives under `<root>/content/<first-two-hex-chars>/<hash>.json`.
//! Writes land in a sibling temporary file first and are made visible with a
//! single rename, so a reader never observes a partially written blob.
//! Repeated stores of identical content are no-ops after the first (the
//! target path already exists).

use std::ffi::OsString;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use cap_std::fs::OpenOptions;
use thiserror::Error;

use crate::hashing::StoredContent;
use crate::hashing::content_id_for;
use crate::identifiers::ContentId;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the content-addressed store.
#[derive(Debug, Error)]
pub enum ContentStoreError {
    /// An I/O operation against the backing directory failed.
    #[error("content store io error: {0}")]
    Io(String),
    /// The stored envelope could not be parsed as JSON.
    #[error("corrupt content blob {0}: {1}")]
    Corrupt(ContentId, String),
    /// Canonicalization of content prior to hashing failed.
    #[error("failed to canonicalize content: {0}")]
    Canonicalization(String),
    /// A requested content id does not exist in the store.
    #[error("content not found: {0}")]
    NotFound(ContentId),
    /// Verification found the stored bytes do not hash to their own id.
    #[error("content {0} failed verification")]
    VerificationFailed(ContentId),
}

impl From<crate::hashing::HashError> for ContentStoreError {
    fn from(err: crate::hashing::HashError) -> Self {
        Self::Canonicalization(err.to_string())
    }
}

// ============================================================================
// SECTION: ContentStore
// ============================================================================

/// Directory-backed content-addressed store.
///
/// # Invariants
/// - All filesystem access is scoped to `root` via a capability handle; no
///   ambient path outside `root` is ever touched.
/// - `store` is idempotent: storing semantically-equal content twice leaves
///   exactly one file on disk.
#[derive(Debug)]
pub struct ContentStore {
    root: Dir,
}

impl ContentStore {
    /// Opens (creating if necessary) a content store rooted at `path`.
    ///
    /// # Errors
    /// Returns [`ContentStoreError::Io`] if the directory cannot be created
    /// or opened.
    pub fn open(path: &Path) -> Result<Self, ContentStoreError> {
        std::fs::create_dir_all(path).map_err(|err| ContentStoreError::Io(err.to_string()))?;
        let root =
            Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| ContentStoreError::Io(err.to_string()))?;
        Ok(Self { root })
    }

    /// Stores content, returning its canonical content id. Idempotent.
    ///
    /// # Errors
    /// Returns [`ContentStoreError`] on canonicalization or I/O failure.
    pub fn store(&self, content: &StoredContent) -> Result<ContentId, ContentStoreError> {
        let content_id = content_id_for(content)?;
        let envelope = content.to_envelope();
        let relative = relative_path_for(&content_id);
        if self.blob_exists(&relative) {
            return Ok(content_id);
        }
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|err| ContentStoreError::Canonicalization(err.to_string()))?;
        self.write_atomic(&relative, &bytes)?;
        Ok(content_id)
    }

    /// Loads content by id, returning `None` if it does not exist.
    ///
    /// # Errors
    /// Returns [`ContentStoreError::Corrupt`] if the stored bytes are not
    /// valid JSON, or [`ContentStoreError::Io`] on read failure.
    pub fn get(&self, content_id: &ContentId) -> Result<Option<StoredContent>, ContentStoreError> {
        let relative = relative_path_for(content_id);
        let Some(bytes) = self.read_blob(&relative)? else {
            return Ok(None);
        };
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| ContentStoreError::Corrupt(content_id.clone(), err.to_string()))?;
        Ok(Some(StoredContent::from_envelope(value)))
    }

    /// Loads content by id, failing with [`ContentStoreError::NotFound`] if absent.
    ///
    /// # Errors
    /// Returns [`ContentStoreError::NotFound`] if the blob does not exist, or
    /// any error from [`ContentStore::get`].
    pub fn require(&self, content_id: &ContentId) -> Result<StoredContent, ContentStoreError> {
        self.get(content_id)?
            .ok_or_else(|| ContentStoreError::NotFound(content_id.clone()))
    }

    /// Returns true if a blob for this content id is present on disk.
    #[must_use]
    pub fn exists(&self, content_id: &ContentId) -> bool {
        self.blob_exists(&relative_path_for(content_id))
    }

    /// Re-reads a stored blob and confirms it still hashes to its own id.
    ///
    /// # Errors
    /// Returns [`ContentStoreError::NotFound`] if absent, or
    /// [`ContentStoreError::VerificationFailed`] if the hash no longer matches.
    pub fn verify(&self, content_id: &ContentId) -> Result<(), ContentStoreError> {
        let content = self.require(content_id)?;
        let recomputed = content_id_for(&content)?;
        if &recomputed == content_id {
            Ok(())
        } else {
            Err(ContentStoreError::VerificationFailed(content_id.clone()))
        }
    }

    fn blob_exists(&self, relative: &Path) -> bool {
        self.root.metadata(relative).is_ok()
    }

    fn read_blob(&self, relative: &Path) -> Result<Option<Vec<u8>>, ContentStoreError> {
        match self.root.open(relative) {
            Ok(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)
                    .map_err(|err| ContentStoreError::Io(err.to_string()))?;
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ContentStoreError::Io(err.to_string())),
        }
    }

    /// Writes bytes to `relative` via a sibling temp file and an atomic rename.
    ///
    /// `relative` is always of the shape `content/<xx>/<hash>.json`, so a
    /// parent directory is guaranteed.
    fn write_atomic(&self, relative: &Path, bytes: &[u8]) -> Result<(), ContentStoreError> {
        let parent = relative.parent().filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
            ContentStoreError::Io(format!("invalid blob path: {}", relative.display()))
        })?;
        self.root
            .create_dir_all(parent)
            .map_err(|err| ContentStoreError::Io(err.to_string()))?;
        let dir = self.root.open_dir(parent).map_err(io_err)?;
        let file_name = relative.file_name().ok_or_else(|| {
            ContentStoreError::Io(format!("invalid blob path: {}", relative.display()))
        })?;
        self.write_atomic_in_dir(&dir, Path::new(file_name), bytes)
    }

    fn write_atomic_in_dir(
        &self,
        dir: &Dir,
        file_name: &Path,
        bytes: &[u8],
    ) -> Result<(), ContentStoreError> {
        for attempt in 0_u32 .. 64 {
            let temp_name = temp_file_name(file_name, attempt);
            let mut options = OpenOptions::new();
            options.write(true).create_new(true);
            match dir.open_with(&temp_name, &options) {
                Ok(mut temp_file) => {
                    if let Err(err) = temp_file.write_all(bytes) {
                        let _ = dir.remove_file(&temp_name);
                        return Err(ContentStoreError::Io(err.to_string()));
                    }
                    if let Err(err) = temp_file.sync_all() {
                        let _ = dir.remove_file(&temp_name);
                        return Err(ContentStoreError::Io(err.to_string()));
                    }
                    if let Err(err) = dir.rename(&temp_name, dir, file_name) {
                        let _ = dir.remove_file(&temp_name);
                        return Err(ContentStoreError::Io(err.to_string()));
                    }
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(ContentStoreError::Io(err.to_string())),
            }
        }
        Err(ContentStoreError::Io("unable to allocate temporary blob file".to_owned()))
    }
}

fn io_err(err: std::io::Error) -> ContentStoreError {
    ContentStoreError::Io(err.to_string())
}

fn relative_path_for(content_id: &ContentId) -> PathBuf {
    let hash = content_id.as_str();
    let prefix: String = hash.chars().take(2).collect();
    PathBuf::from("content").join(prefix).join(format!("{hash}.json"))
}

fn temp_file_name(file_name: &Path, attempt: u32) -> PathBuf {
    let mut temp = OsString::from(".tmp-");
    temp.push(file_name.as_os_str());
    temp.push(format!(".{}.{attempt}", std::process::id()));
    PathBuf::from(temp)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn store_and_get_round_trip_mapping_content() {
        let dir = tempdir().expect("tempdir");
        let store = ContentStore::open(dir.path()).expect("open store");
        let content = StoredContent::Json(json!({"operation": "graph.load"}));
        let id = store.store(&content).expect("store content");
        let fetched = store.require(&id).expect("content present");
        match fetched {
            StoredContent::Json(value) => assert_eq!(value, json!({"operation": "graph.load"})),
            _ => panic!("expected json content"),
        }
    }

    #[test]
    fn storing_identical_content_twice_deduplicates() {
        let dir = tempdir().expect("tempdir");
        let store = ContentStore::open(dir.path()).expect("open store");
        let content = StoredContent::Json(json!({"a": 1, "b": 2}));
        let first = store.store(&content).expect("first store");
        let second = store.store(&content).expect("second store");
        assert_eq!(first, second);

        let prefix: String = first.as_str().chars().take(2).collect();
        let blob_dir = dir.path().join("content").join(prefix);
        let count = std::fs::read_dir(blob_dir).expect("read dir").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn verify_detects_tampering() {
        let dir = tempdir().expect("tempdir");
        let store = ContentStore::open(dir.path()).expect("open store");
        let content = StoredContent::Json(json!({"x": 1}));
        let id = store.store(&content).expect("store");
        store.verify(&id).expect("verification should pass");

        let prefix: String = id.as_str().chars().take(2).collect();
        let path = dir.path().join("content").join(prefix).join(format!("{}.json", id.as_str()));
        std::fs::write(&path, b"{\"tampered\":true}").expect("overwrite blob");
        let err = store.verify(&id).unwrap_err();
        assert!(matches!(err, ContentStoreError::VerificationFailed(_)));
    }

    #[test]
    fn missing_content_returns_not_found_on_require() {
        let dir = tempdir().expect("tempdir");
        let store = ContentStore::open(dir.path()).expect("open store");
        let missing = ContentId::new("0".repeat(64));
        let err = store.require(&missing).unwrap_err();
        assert!(matches!(err, ContentStoreError::NotFound(_)));
    }
}
