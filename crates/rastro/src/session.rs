//! Fingerprint persistence across page loads.
//!
//! A [`SessionStore`] writes one JSON file per session id under its root
//! directory. Loading is tolerant: entries that fail structural validation
//! are skipped with a warning instead of failing the whole session, so one
//! corrupted record never costs the rest of the identities.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;
use crate::result::{RastroError, RastroResult};

/// On-disk session format version
const SESSION_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    saved_at_ms: u64,
    fingerprints: Vec<serde_json::Value>,
}

/// Directory-backed store of per-session fingerprint sets
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on first save.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist the fingerprint set for a session, replacing any previous set
    pub fn save(
        &self,
        session_id: &str,
        fingerprints: &[Fingerprint],
        now_ms: u64,
    ) -> RastroResult<()> {
        fs::create_dir_all(&self.root).map_err(store_error)?;
        let file = SessionFile {
            version: SESSION_FORMAT_VERSION,
            saved_at_ms: now_ms,
            fingerprints: fingerprints
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()
                .map_err(store_error)?,
        };
        let json = serde_json::to_string_pretty(&file).map_err(store_error)?;
        let path = self.session_path(session_id);
        fs::write(&path, json).map_err(store_error)?;
        debug!(
            session = session_id,
            count = fingerprints.len(),
            "session saved"
        );
        Ok(())
    }

    /// Load the fingerprint set for a session.
    ///
    /// A missing session loads as an empty set. Malformed entries are
    /// skipped; only an unreadable or unparseable file is an error.
    pub fn load(&self, session_id: &str) -> RastroResult<Vec<Fingerprint>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&path).map_err(store_error)?;
        let file: SessionFile = serde_json::from_str(&json).map_err(store_error)?;
        if file.version != SESSION_FORMAT_VERSION {
            return Err(RastroError::SessionStore {
                message: format!("unsupported session format version {}", file.version),
            });
        }
        let mut fingerprints = Vec::with_capacity(file.fingerprints.len());
        for value in file.fingerprints {
            match serde_json::from_value::<Fingerprint>(value) {
                Ok(fingerprint) => fingerprints.push(fingerprint),
                Err(err) => {
                    warn!(session = session_id, error = %err, "skipping malformed fingerprint");
                }
            }
        }
        debug!(
            session = session_id,
            count = fingerprints.len(),
            "session loaded"
        );
        Ok(fingerprints)
    }

    /// Whether a session file exists
    #[must_use]
    pub fn exists(&self, session_id: &str) -> bool {
        self.session_path(session_id).exists()
    }

    /// Remove a session file. Removing a missing session is not an error.
    pub fn delete(&self, session_id: &str) -> RastroResult<()> {
        let path = self.session_path(session_id);
        if path.exists() {
            fs::remove_file(&path).map_err(store_error)?;
        }
        Ok(())
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(session_id)))
    }
}

fn store_error(err: impl std::fmt::Display) -> RastroError {
    RastroError::SessionStore {
        message: err.to_string(),
    }
}

/// Reduce a session id to a safe file stem
fn sanitize(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{LiveDocument, LiveNode};

    fn sample_fingerprints() -> Vec<Fingerprint> {
        let doc = LiveDocument::new();
        let button = LiveNode::new("button")
            .with_attr("data-testid", "cta")
            .with_text("Sign up");
        let input = LiveNode::new("input").with_attr("name", "email");
        doc.append_child(&doc.root(), button.clone());
        doc.append_child(&doc.root(), input.clone());
        vec![
            Fingerprint::capture(&button, doc.viewport(), 1_000),
            Fingerprint::capture(&input, doc.viewport(), 1_000),
        ]
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let fingerprints = sample_fingerprints();
        store.save("checkout", &fingerprints, 2_000).unwrap();
        let loaded = store.load("checkout").unwrap();
        assert_eq!(loaded, fingerprints);
    }

    #[test]
    fn test_missing_session_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load("never-saved").unwrap().is_empty());
        assert!(!store.exists("never-saved"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let fingerprints = sample_fingerprints();
        store.save("mixed", &fingerprints, 0).unwrap();

        // corrupt one entry: drop the required tag field
        let path = dir.path().join("mixed.json");
        let mut file: SessionFile =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        file.fingerprints[0]
            .as_object_mut()
            .unwrap()
            .remove("tag");
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let loaded = store.load("mixed").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], fingerprints[1]);
    }

    #[test]
    fn test_unsupported_version_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save("old", &[], 0).unwrap();
        let path = dir.path().join("old.json");
        let json = fs::read_to_string(&path)
            .unwrap()
            .replace("\"version\": 1", "\"version\": 99");
        fs::write(&path, json).unwrap();
        assert!(store.load("old").is_err());
    }

    #[test]
    fn test_session_id_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save("https://a.example/checkout?step=2", &[], 0).unwrap();
        assert!(store.exists("https://a.example/checkout?step=2"));
        // slashes never escape the store root
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save("gone", &[], 0).unwrap();
        store.delete("gone").unwrap();
        assert!(!store.exists("gone"));
        store.delete("gone").unwrap();
    }
}
