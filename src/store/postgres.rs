//! Postgres store.
//!
//! Queries are run through the runtime API and instrumented with `db.query`
//! spans. Schema migrations live with the embedding service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{AuthStore, CrmTokenRecord, Session, User};
use crate::error::Error;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        password_salt: row.get("password_salt"),
        role: row.get("role"),
        token_generation: row.get("token_generation"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        device: row.get("device"),
        browser: row.get("browser"),
        os: row.get("os"),
        location: row.get("location"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        last_activity_at: row.get("last_activity_at"),
    }
}

fn crm_token_from_row(row: &sqlx::postgres::PgRow) -> CrmTokenRecord {
    CrmTokenRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: row.get("expires_at"),
        scopes: row.get("scopes"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn insert_user(&self, user: User) -> Result<(), Error> {
        let query = r"
            INSERT INTO users
                (id, email, password_hash, password_salt, role, token_generation,
                 last_login_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.password_salt)
            .bind(&user.role)
            .bind(user.token_generation)
            .bind(user.last_login_at)
            .bind(user.created_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    Error::AlreadyExists
                } else {
                    Error::unavailable("insert user", err)
                }
            })?;
        Ok(())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let query = "SELECT * FROM users WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| Error::unavailable("lookup user by email", err))?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, Error> {
        let query = "SELECT * FROM users WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| Error::unavailable("lookup user by id", err))?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        let query = "UPDATE users SET last_login_at = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| Error::unavailable("record login", err))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn bump_token_generation(&self, id: Uuid) -> Result<i64, Error> {
        let query = r"
            UPDATE users
            SET token_generation = token_generation + 1
            WHERE id = $1
            RETURNING token_generation
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| Error::unavailable("bump token generation", err))?;
        row.map(|row| row.get("token_generation"))
            .ok_or(Error::NotFound)
    }

    async fn insert_session(&self, session: Session) -> Result<(), Error> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, ip_address, user_agent, device, browser, os,
                 location, is_active, created_at, last_activity_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ";
        sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(&session.device)
            .bind(&session.browser)
            .bind(&session.os)
            .bind(&session.location)
            .bind(session.is_active)
            .bind(session.created_at)
            .bind(session.last_activity_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| Error::unavailable("insert session", err))?;
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, Error> {
        let query = "SELECT * FROM sessions WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| Error::unavailable("lookup session", err))?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        // Guarded on is_active so a touch can never resurrect a session.
        let query = "UPDATE sessions SET last_activity_at = $2 WHERE id = $1 AND is_active";
        sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| Error::unavailable("touch session", err))?;
        Ok(())
    }

    async fn deactivate_session(&self, id: Uuid) -> Result<(), Error> {
        let query = "UPDATE sessions SET is_active = FALSE WHERE id = $1 AND is_active";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| Error::unavailable("deactivate session", err))?;
        Ok(())
    }

    async fn deactivate_user_sessions(&self, user_id: Uuid) -> Result<u64, Error> {
        let query = "UPDATE sessions SET is_active = FALSE WHERE user_id = $1 AND is_active";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| Error::unavailable("deactivate user sessions", err))?;
        Ok(result.rows_affected())
    }

    async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, Error> {
        let query = r"
            SELECT * FROM sessions
            WHERE user_id = $1 AND is_active
            ORDER BY last_activity_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| Error::unavailable("list active sessions", err))?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn active_sessions_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        let query = r"
            SELECT * FROM sessions
            WHERE user_id = $1 AND is_active AND created_at > $2
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(since)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| Error::unavailable("list recent sessions", err))?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn deactivate_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let query = r"
            UPDATE sessions
            SET is_active = FALSE
            WHERE is_active AND last_activity_at < $1
        ";
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| Error::unavailable("sweep idle sessions", err))?;
        Ok(result.rows_affected())
    }

    async fn upsert_crm_token(&self, record: CrmTokenRecord) -> Result<(), Error> {
        // Single atomic statement keyed on user_id; no read-then-branch
        // window for concurrent callbacks to race through.
        let query = r"
            INSERT INTO crm_tokens
                (id, user_id, access_token, refresh_token, expires_at, scopes, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                scopes = EXCLUDED.scopes,
                updated_at = EXCLUDED.updated_at
        ";
        sqlx::query(query)
            .bind(record.id)
            .bind(record.user_id)
            .bind(&record.access_token)
            .bind(&record.refresh_token)
            .bind(record.expires_at)
            .bind(&record.scopes)
            .bind(record.updated_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| Error::unavailable("upsert crm token", err))?;
        Ok(())
    }

    async fn crm_token_by_user(&self, user_id: Uuid) -> Result<Option<CrmTokenRecord>, Error> {
        let query = "SELECT * FROM crm_tokens WHERE user_id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| Error::unavailable("lookup crm token", err))?;
        Ok(row.as_ref().map(crm_token_from_row))
    }

    async fn delete_crm_tokens(&self, user_id: Uuid) -> Result<u64, Error> {
        let query = "DELETE FROM crm_tokens WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(|err| Error::unavailable("delete crm tokens", err))?;
        Ok(result.rows_affected())
    }
}
