//! In-memory store.
//!
//! Intended for tests/dev. Not optimized for large session counts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use super::{AuthStore, CrmTokenRecord, Session, User};
use crate::error::Error;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    crm_tokens: HashMap<Uuid, CrmTokenRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, Error> {
        self.tables
            .read()
            .map_err(|_| Error::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, Error> {
        self.tables
            .write()
            .map_err(|_| Error::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<(), Error> {
        let mut tables = self.write()?;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(Error::AlreadyExists);
        }
        tables.users.insert(user.id, user);
        Ok(())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        let tables = self.read()?;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, Error> {
        let tables = self.read()?;
        Ok(tables.users.get(&id).cloned())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        let mut tables = self.write()?;
        let user = tables.users.get_mut(&id).ok_or(Error::NotFound)?;
        user.last_login_at = Some(at);
        Ok(())
    }

    async fn bump_token_generation(&self, id: Uuid) -> Result<i64, Error> {
        let mut tables = self.write()?;
        let user = tables.users.get_mut(&id).ok_or(Error::NotFound)?;
        user.token_generation += 1;
        Ok(user.token_generation)
    }

    async fn insert_session(&self, session: Session) -> Result<(), Error> {
        let mut tables = self.write()?;
        tables.sessions.insert(session.id, session);
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, Error> {
        let tables = self.read()?;
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn touch_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        let mut tables = self.write()?;
        if let Some(session) = tables.sessions.get_mut(&id) {
            if session.is_active {
                session.last_activity_at = at;
            }
        }
        Ok(())
    }

    async fn deactivate_session(&self, id: Uuid) -> Result<(), Error> {
        let mut tables = self.write()?;
        if let Some(session) = tables.sessions.get_mut(&id) {
            session.is_active = false;
        }
        Ok(())
    }

    async fn deactivate_user_sessions(&self, user_id: Uuid) -> Result<u64, Error> {
        let mut tables = self.write()?;
        let mut affected = 0;
        for session in tables.sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn active_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, Error> {
        let tables = self.read()?;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn active_sessions_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        let tables = self.read()?;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active && s.created_at > since)
            .cloned()
            .collect())
    }

    async fn deactivate_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, Error> {
        let mut tables = self.write()?;
        let mut affected = 0;
        for session in tables.sessions.values_mut() {
            if session.is_active && session.last_activity_at < cutoff {
                session.is_active = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn upsert_crm_token(&self, record: CrmTokenRecord) -> Result<(), Error> {
        let mut tables = self.write()?;
        // Single keyed write; an existing row keeps its id.
        if let Some(existing) = tables
            .crm_tokens
            .values_mut()
            .find(|t| t.user_id == record.user_id)
        {
            existing.access_token = record.access_token;
            existing.refresh_token = record.refresh_token;
            existing.expires_at = record.expires_at;
            existing.scopes = record.scopes;
            existing.updated_at = record.updated_at;
        } else {
            tables.crm_tokens.insert(record.id, record);
        }
        Ok(())
    }

    async fn crm_token_by_user(&self, user_id: Uuid) -> Result<Option<CrmTokenRecord>, Error> {
        let tables = self.read()?;
        Ok(tables
            .crm_tokens
            .values()
            .find(|t| t.user_id == user_id)
            .cloned())
    }

    async fn delete_crm_tokens(&self, user_id: Uuid) -> Result<u64, Error> {
        let mut tables = self.write()?;
        let before = tables.crm_tokens.len();
        tables.crm_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - tables.crm_tokens.len()) as u64)
    }
}
