//! Persistence collaborator: records and the [`AuthStore`] trait.
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! development, and [`PgStore`] backed by Postgres.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;

/// An account. `token_generation` is a monotonic counter; bumping it
/// invalidates every refresh token issued before the bump.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub password_salt: String,
    pub role: String,
    pub token_generation: i64,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A tracked authenticated device/browser instance, independent of token
/// lifetime. `is_active` moves true→false exactly once and never back.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub device: String,
    pub browser: String,
    pub os: String,
    pub location: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Stored partner CRM credentials. At most one row exists per user.
#[derive(Debug, Clone)]
pub struct CrmTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: String,
    pub updated_at: DateTime<Utc>,
}

/// Storage operations the control plane depends on.
///
/// Implementations must keep `upsert_crm_token` atomic with respect to the
/// `user_id` key and must map email uniqueness violations to
/// [`Error::AlreadyExists`]. Bulk deactivation methods report how many rows
/// actually transitioned.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn insert_user(&self, user: User) -> Result<(), Error>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, Error>;
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error>;
    /// Increment the user's token generation and return the new value.
    async fn bump_token_generation(&self, id: Uuid) -> Result<i64, Error>;

    async fn insert_session(&self, session: Session) -> Result<(), Error>;
    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, Error>;
    /// Set `last_activity_at` on an active session. Inactive or unknown
    /// sessions are left untouched; this is not an error.
    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error>;
    async fn deactivate_session(&self, id: Uuid) -> Result<(), Error>;
    async fn deactivate_user_sessions(&self, user_id: Uuid) -> Result<u64, Error>;
    /// Active sessions for the user, most recently active first.
    async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, Error>;
    async fn active_sessions_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error>;
    async fn deactivate_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, Error>;

    /// Insert or replace the single CRM token row for the record's user in
    /// one atomic step. An existing row keeps its id.
    async fn upsert_crm_token(&self, record: CrmTokenRecord) -> Result<(), Error>;
    async fn crm_token_by_user(&self, user_id: Uuid) -> Result<Option<CrmTokenRecord>, Error>;
    async fn delete_crm_tokens(&self, user_id: Uuid) -> Result<u64, Error>;
}
