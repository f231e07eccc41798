//! In-memory session store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use veil_core::SessionKey;
use veil_state::OnboardingSession;

use crate::{check_revision, PersistenceError, SessionStore};

/// Thread-safe, cloneable in-memory store. Clones share the same map.
///
/// The lock is `parking_lot` and never held across `.await`.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    data: Arc<RwLock<HashMap<SessionKey, OnboardingSession>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` and `delete` fail until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "memory store writes disabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<OnboardingSession>, PersistenceError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn save(&self, session: &OnboardingSession) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut guard = self.data.write();
        check_revision(session, guard.get(session.session_key()).map(|s| s.revision()))?;
        guard.insert(session.session_key().clone(), session.clone());
        tracing::debug!(
            session = %session.session_key(),
            revision = session.revision(),
            step = %session.current_step(),
            "session saved to memory"
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::Timestamp;

    fn committed_session() -> OnboardingSession {
        let now = Timestamp::parse("2026-04-01T08:00:00Z").unwrap();
        let mut s = OnboardingSession::new(SessionKey::new("device-1").unwrap(), now);
        s.next_step(now).unwrap();
        s
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = MemorySessionStore::new();
        let s = committed_session();
        store.save(&s).await.unwrap();
        assert_eq!(store.load(s.session_key()).await.unwrap(), Some(s));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_key_loads_none() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new("nobody").unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clones_share_data() {
        let store = MemorySessionStore::new();
        let other = store.clone();
        let s = committed_session();
        store.save(&s).await.unwrap();
        assert!(other.load(s.session_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn injected_failure_blocks_writes() {
        let store = MemorySessionStore::new();
        store.fail_writes(true);
        let s = committed_session();
        assert!(matches!(
            store.save(&s).await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert!(store.is_empty());
        store.fail_writes(false);
        store.save(&s).await.unwrap();
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemorySessionStore::new();
        let s = committed_session();
        store.save(&s).await.unwrap();
        assert!(matches!(
            store.save(&s).await,
            Err(PersistenceError::StaleRevision { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemorySessionStore::new();
        let s = committed_session();
        store.save(&s).await.unwrap();
        store.delete(s.session_key()).await.unwrap();
        store.delete(s.session_key()).await.unwrap();
        assert!(store.load(s.session_key()).await.unwrap().is_none());
    }
}
