//! PostgreSQL session store.
//!
//! Sessions live in the `onboarding_sessions` table as a JSONB document,
//! with the key, step and revision mirrored into columns for querying.
//! The revision guard runs inside the upsert, so concurrent writers from
//! different processes are ordered by the database.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use veil_core::SessionKey;
use veil_state::OnboardingSession;

use crate::{decode_document, PersistenceError, SessionStore};

/// JSONB-backed session store.
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Connect to `url` and apply the embedded migrations.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(url)
            .await?;
        tracing::info!("Connected to PostgreSQL");
        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before first use.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::Database(e.into()))?;
        tracing::info!("session store migrations applied");
        Ok(())
    }

    async fn stored_revision(&self, key: &SessionKey) -> Result<Option<i64>, PersistenceError> {
        let revision: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM onboarding_sessions WHERE session_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(revision.map(|(r,)| r))
    }
}

fn to_i64(key: &SessionKey, revision: u64) -> Result<i64, PersistenceError> {
    i64::try_from(revision).map_err(|_| PersistenceError::Corrupt {
        key: key.to_string(),
        reason: format!("revision {revision} exceeds BIGINT"),
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<OnboardingSession>, PersistenceError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT document FROM onboarding_sessions WHERE session_key = $1")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(document,)| decode_document(key, document)).transpose()
    }

    async fn save(&self, session: &OnboardingSession) -> Result<(), PersistenceError> {
        let key = session.session_key();
        let document = serde_json::to_value(session).map_err(|e| PersistenceError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let revision = to_i64(key, session.revision())?;
        let schema_version = i32::try_from(session.schema_version()).unwrap_or(i32::MAX);

        let result = sqlx::query(
            "INSERT INTO onboarding_sessions
                 (session_key, schema_version, current_step, revision, document, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (session_key) DO UPDATE SET
                 schema_version = EXCLUDED.schema_version,
                 current_step = EXCLUDED.current_step,
                 revision = EXCLUDED.revision,
                 document = EXCLUDED.document,
                 updated_at = EXCLUDED.updated_at
             WHERE onboarding_sessions.revision < EXCLUDED.revision",
        )
        .bind(key.as_str())
        .bind(schema_version)
        .bind(session.current_step().name())
        .bind(revision)
        .bind(&document)
        .bind(*session.updated_at().as_datetime())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let stored = self.stored_revision(key).await?.unwrap_or_default();
            return Err(PersistenceError::StaleRevision {
                key: key.to_string(),
                attempted: session.revision(),
                stored: u64::try_from(stored).unwrap_or_default(),
            });
        }

        tracing::debug!(
            session = %key,
            revision = session.revision(),
            step = %session.current_step(),
            "session saved to postgres"
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM onboarding_sessions WHERE session_key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
