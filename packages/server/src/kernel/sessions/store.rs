//! Session storage backends.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::session::Session;
use crate::common::Lookup;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<()>;

    async fn find(&self, session_id: &str) -> Result<Lookup<Session>>;

    async fn list(&self) -> Result<Vec<Session>>;

    /// Set the given non-`None` fields. False when the session is unknown.
    async fn update_client_info(
        &self,
        session_id: &str,
        client_name: Option<&str>,
        client_version: Option<&str>,
    ) -> Result<bool>;

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn remove(&self, session_id: &str) -> Result<bool>;

    /// Delete sessions last active at or before `cutoff`; returns their ids.
    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Sessions in the `crawl_sessions` table, shared by every process that
/// talks to the same database.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn insert(&self, session: Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_sessions (
                session_id, transport, created_at, last_active,
                client_ip, user_agent, client_name, client_version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&session.session_id)
        .bind(session.transport)
        .bind(session.created_at)
        .bind(session.last_active)
        .bind(&session.client_ip)
        .bind(&session.user_agent)
        .bind(&session.client_name)
        .bind(&session.client_version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, session_id: &str) -> Result<Lookup<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM crawl_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session.into())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>("SELECT * FROM crawl_sessions ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        Ok(sessions)
    }

    async fn update_client_info(
        &self,
        session_id: &str,
        client_name: Option<&str>,
        client_version: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_sessions
            SET client_name = COALESCE($2, client_name),
                client_version = COALESCE($3, client_version)
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(client_name)
        .bind(client_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE crawl_sessions SET last_active = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM crawl_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let removed = sqlx::query_scalar::<_, String>(
            "DELETE FROM crawl_sessions WHERE last_active <= $1 RETURNING session_id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(removed)
    }
}
