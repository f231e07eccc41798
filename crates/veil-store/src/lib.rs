//! # veil-store — Onboarding Session Persistence
//!
//! The [`SessionStore`] trait is the durability seam under the step
//! sequencer. A session is written as one versioned JSON document per
//! [`SessionKey`]; the sequencer only reports success for a mutation after
//! `save` returns `Ok`.
//!
//! ## Backends
//!
//! - [`MemorySessionStore`]: process-local map, for tests and the demo.
//!   Supports injected write failures.
//! - [`FileSessionStore`]: one `<key>.json` file per session under a root
//!   directory, replaced atomically with a temp file and rename.
//! - `PgSessionStore` (feature `postgres`): JSONB document table via SQLx.
//!
//! ## Revision guard
//!
//! Every backend rejects a save whose `revision` is not greater than the
//! stored one with [`PersistenceError::StaleRevision`]. Two sequencers
//! working from the same loaded document cannot silently overwrite each
//! other's commits.

pub mod file;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
#[cfg(feature = "postgres")]
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use thiserror::Error;
use veil_core::SessionKey;
use veil_state::{OnboardingSession, SESSION_SCHEMA_VERSION};

/// Storage failures. Fatal to the transition being committed.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The stored document could not be decoded, or the session could not
    /// be encoded.
    #[error("corrupt session document for {key}: {reason}")]
    Corrupt {
        /// Session key.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// The stored document was written by an unknown schema version.
    #[error("session {key} has schema version {found}, supported version is {supported}")]
    UnsupportedVersion {
        /// Session key.
        key: String,
        /// Version found in the document.
        found: u64,
        /// Version this build reads.
        supported: u32,
    },

    /// A newer revision is already stored.
    #[error("stale write for {key}: revision {attempted} does not follow stored revision {stored}")]
    StaleRevision {
        /// Session key.
        key: String,
        /// Revision being written.
        attempted: u64,
        /// Revision already stored.
        stored: u64,
    },

    /// Backend refused the operation.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable storage for onboarding sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Load the session stored under `key`, if any.
    async fn load(&self, key: &SessionKey) -> Result<Option<OnboardingSession>, PersistenceError>;

    /// Persist `session` under its own key, replacing any earlier document.
    async fn save(&self, session: &OnboardingSession) -> Result<(), PersistenceError>;

    /// Remove the session stored under `key`. Missing keys are not an error.
    async fn delete(&self, key: &SessionKey) -> Result<(), PersistenceError>;
}

/// Encode a session as its JSON document.
pub(crate) fn encode_document(session: &OnboardingSession) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec_pretty(session).map_err(|e| PersistenceError::Corrupt {
        key: session.session_key().to_string(),
        reason: e.to_string(),
    })
}

/// Decode a JSON document, checking the schema version before the shape.
pub(crate) fn decode_document(
    key: &SessionKey,
    value: serde_json::Value,
) -> Result<OnboardingSession, PersistenceError> {
    let corrupt = |reason: String| PersistenceError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| corrupt("missing schema_version".to_string()))?;
    if version != u64::from(SESSION_SCHEMA_VERSION) {
        return Err(PersistenceError::UnsupportedVersion {
            key: key.to_string(),
            found: version,
            supported: SESSION_SCHEMA_VERSION,
        });
    }

    let session: OnboardingSession =
        serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
    if session.session_key() != key {
        return Err(corrupt(format!(
            "document belongs to {}",
            session.session_key()
        )));
    }
    Ok(session)
}

/// Reject a write that does not move the revision forward.
pub(crate) fn check_revision(
    session: &OnboardingSession,
    stored: Option<u64>,
) -> Result<(), PersistenceError> {
    match stored {
        Some(stored) if session.revision() <= stored => Err(PersistenceError::StaleRevision {
            key: session.session_key().to_string(),
            attempted: session.revision(),
            stored,
        }),
        _ => Ok(()),
    }
}
