/// Postgres-backed session store.
///
/// Rotation maps to a single conditional UPDATE, so the exactly-one-winner
/// guarantee rides on the database's row-level atomicity; no in-process
/// locks are involved.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewSession, Session, SessionStore};
use crate::error::StoreError;

const SESSION_COLUMNS: &str =
    "id, user_id, token_hash, family_id, user_agent, ip, revoked_at, expires_at, created_at";

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, family_id, user_agent, ip, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.token_hash)
        .bind(new.family_id)
        .bind(&new.meta.user_agent)
        .bind(&new.meta.ip)
        .bind(new.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions
            WHERE token_hash = $1 AND expires_at > $2
            "#,
        ))
        .bind(token_hash)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        // Compare-and-swap: zero rows back means a concurrent rotation (or a
        // revocation) got there first.
        let rotated = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET token_hash = $3, expires_at = $4
            WHERE id = $1 AND token_hash = $2 AND revoked_at IS NULL
            RETURNING {SESSION_COLUMNS}
            "#,
        ))
        .bind(session_id)
        .bind(expected_hash)
        .bind(new_hash)
        .bind(new_expiry)
        .fetch_optional(&self.pool)
        .await?;

        rotated.ok_or(StoreError::Conflict)
    }

    async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = $1
            WHERE id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn revoke_family(&self, user_id: Uuid, family_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = $1
            WHERE user_id = $2 AND family_id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .bind(family_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
