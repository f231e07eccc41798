//! # File Session Store
//!
//! One pretty-printed JSON document per session at `<root>/<key>.json`.
//!
//! A save writes the full document to a uniquely named temp file in the same
//! directory, flushes it to disk, and renames it over the target. Readers
//! see either the previous document or the new one, never a partial write.
//! Session keys are restricted to `[A-Za-z0-9._:-]` without a leading dot,
//! so a key can never address a path outside the root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use veil_core::SessionKey;
use veil_state::OnboardingSession;

use crate::{check_revision, decode_document, encode_document, PersistenceError, SessionStore};

/// JSON-file-per-session store.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    /// Store documents under `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }

    async fn read_document(
        &self,
        key: &SessionKey,
    ) -> Result<Option<OnboardingSession>, PersistenceError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        decode_document(key, value).map(Some)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<OnboardingSession>, PersistenceError> {
        self.read_document(key).await
    }

    async fn save(&self, session: &OnboardingSession) -> Result<(), PersistenceError> {
        let key = session.session_key();
        let stored = match self.read_document(key).await {
            Ok(stored) => stored.map(|s| s.revision()),
            // An unreadable document is replaced rather than blocking the user forever.
            Err(PersistenceError::Corrupt { reason, .. }) => {
                tracing::warn!(session = %key, %reason, "overwriting corrupt session document");
                None
            }
            Err(e) => return Err(e),
        };
        check_revision(session, stored)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let bytes = encode_document(session)?;
        let target = self.path_for(key);
        let tmp = self
            .root
            .join(format!("{}.json.{}.tmp", key.as_str(), uuid::Uuid::new_v4()));

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&target, e));
        }

        tracing::debug!(
            session = %key,
            revision = session.revision(),
            step = %session.current_step(),
            path = %target.display(),
            "session saved"
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::Timestamp;
    use veil_state::OnboardingStep;

    fn now() -> Timestamp {
        Timestamp::parse("2026-04-01T08:00:00Z").unwrap()
    }

    fn committed_session() -> OnboardingSession {
        let mut s = OnboardingSession::new(SessionKey::new("device-1").unwrap(), now());
        s.next_step(now()).unwrap();
        s
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));
        let s = committed_session();
        store.save(&s).await.unwrap();

        let loaded = store.load(s.session_key()).await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert_eq!(loaded.current_step(), OnboardingStep::PhoneVerification);
    }

    #[tokio::test]
    async fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let key = SessionKey::new("nobody").unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_temp_files_remain_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let s = committed_session();
        store.save(&s).await.unwrap();
        store.save(&s.reset(now())).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["device-1.json".to_string()]);
    }

    #[tokio::test]
    async fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let s = committed_session();
        let mut value = serde_json::to_value(&s).unwrap();
        value["schema_version"] = serde_json::json!(2);
        std::fs::write(dir.path().join("device-1.json"), value.to_string()).unwrap();

        assert!(matches!(
            store.load(s.session_key()).await,
            Err(PersistenceError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_document_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        std::fs::write(dir.path().join("device-1.json"), b"{not json").unwrap();
        let key = SessionKey::new("device-1").unwrap();
        assert!(matches!(
            store.load(&key).await,
            Err(PersistenceError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let s = committed_session();
        store.save(&s).await.unwrap();
        assert!(matches!(
            store.save(&s).await,
            Err(PersistenceError::StaleRevision { attempted: 1, stored: 1, .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let s = committed_session();
        store.save(&s).await.unwrap();
        store.delete(s.session_key()).await.unwrap();
        store.delete(s.session_key()).await.unwrap();
        assert!(store.load(s.session_key()).await.unwrap().is_none());
    }
}
