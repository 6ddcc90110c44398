//! Login, registration, refresh, and logout flows.

use chrono::Utc;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::Error;
use crate::password;
use crate::permissions;
use crate::session::{ClientContext, SessionRegistry};
use crate::store::{AuthStore, User};
use crate::token::TokenAuthority;

/// Advisory raised when a login lands on an account already active from
/// several distinct locations. Non-fatal; the login itself succeeded.
#[derive(Debug, Clone)]
pub struct SecurityAlert {
    pub locations: Vec<String>,
}

/// Everything a successful login or registration hands back.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    pub security_alert: Option<SecurityAlert>,
}

/// Normalize an email for lookup/uniqueness checks.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Composes the token authority and session registry into the caller-facing
/// authentication flows. Built explicitly from its collaborators; holds no
/// global state.
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    tokens: Arc<TokenAuthority>,
    sessions: Arc<SessionRegistry>,
    config: AuthConfig,
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuthStore>,
        tokens: Arc<TokenAuthority>,
        sessions: Arc<SessionRegistry>,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            sessions,
            config,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenAuthority> {
        &self.tokens
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Verify credentials and open a new session.
    ///
    /// Unknown email and wrong password both fail with
    /// [`Error::InvalidCredentials`] so callers cannot probe which accounts
    /// exist. The suspicious-activity check runs after issuance and comes
    /// back as a non-fatal advisory.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ctx: &ClientContext,
    ) -> Result<LoginOutcome, Error> {
        let email = normalize_email(email);
        let mut user = self
            .store
            .user_by_email(&email)
            .await?
            .ok_or(Error::InvalidCredentials)?;
        if !password::verify_password(password, &user.password_hash)? {
            return Err(Error::InvalidCredentials);
        }

        let now = Utc::now();
        self.store.record_login(user.id, now).await?;
        user.last_login_at = Some(now);

        let session = self.sessions.create(user.id, ctx).await?;
        let access_token = self.tokens.issue_access_token(&user, session.id)?;
        let refresh_token = self.tokens.issue_refresh_token(&user, session.id)?;

        let report = self.sessions.detect_suspicious(user.id).await;
        let security_alert = report.suspicious.then(|| SecurityAlert {
            locations: report.locations,
        });

        info!(user_id = %user.id, session_id = %session.id, "user logged in");
        Ok(LoginOutcome {
            user,
            access_token,
            refresh_token,
            session_id: session.id,
            security_alert,
        })
    }

    /// Create an account and log it straight in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: &str,
        ctx: &ClientContext,
    ) -> Result<LoginOutcome, Error> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(Error::Validation("invalid email address".to_string()));
        }
        if password.is_empty() {
            return Err(Error::Validation("password must not be empty".to_string()));
        }
        if !permissions::known_roles().iter().any(|known| *known == role) {
            return Err(Error::Validation(format!("unknown role: {role}")));
        }
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let (password_hash, password_salt) = password::hash_password(password)?;
        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash,
            password_salt,
            role: role.to_string(),
            token_generation: 0,
            last_login_at: None,
            created_at: Utc::now(),
        };
        // The store still enforces uniqueness, so a racing registration for
        // the same email surfaces as AlreadyExists rather than a duplicate.
        self.store.insert_user(user.clone()).await?;

        let session = self.sessions.create(user.id, ctx).await?;
        let access_token = self.tokens.issue_access_token(&user, session.id)?;
        let refresh_token = self.tokens.issue_refresh_token(&user, session.id)?;

        info!(user_id = %user.id, role, "user registered");
        Ok(LoginOutcome {
            user,
            access_token,
            refresh_token,
            session_id: session.id,
            security_alert: None,
        })
    }

    /// Mint a fresh access token from a refresh token.
    ///
    /// The refresh token itself is not rotated. A generation mismatch means
    /// the user logged out everywhere since issuance and fails closed as
    /// [`Error::TokenRevoked`].
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, Error> {
        let claims = self.tokens.validate_refresh_token(refresh_token)?;
        let user = self
            .store
            .user_by_id(claims.sub)
            .await?
            .ok_or(Error::NotFound)?;
        if user.token_generation != claims.generation {
            return Err(Error::TokenRevoked);
        }
        self.tokens.issue_access_token(&user, claims.sid)
    }

    /// Revoke the access token and close the session.
    ///
    /// Idempotent: an undecodable token has nothing left to revoke and is
    /// only logged.
    pub async fn logout(
        &self,
        access_token: &str,
        session_id: Option<Uuid>,
    ) -> Result<(), Error> {
        if let Err(err) = self.tokens.revoke(access_token) {
            debug!("nothing to revoke at logout: {err}");
        }
        if let Some(session_id) = session_id {
            self.sessions.invalidate(session_id).await?;
        }
        Ok(())
    }

    /// Log the user out of every device.
    ///
    /// Bumping the token generation invalidates every outstanding refresh
    /// token at once; the sessions are deactivated afterwards. Returns the
    /// number of sessions affected.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, Error> {
        let generation = self.store.bump_token_generation(user_id).await?;
        let affected = self.sessions.invalidate_all(user_id).await?;
        info!(%user_id, generation, affected, "user logged out everywhere");
        Ok(affected)
    }

    /// Idle-session sweep entry point for the scheduler, using the configured
    /// timeout.
    pub async fn sweep_idle_sessions(&self) -> Result<u64, Error> {
        self.sessions
            .sweep_idle(self.config.idle_timeout_minutes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NoopGeoLocator;
    use crate::store::MemoryStore;

    fn service() -> AuthService {
        let config = AuthConfig::new("access-secret".to_string().into(), "refresh-secret".to_string().into());
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        let tokens = Arc::new(TokenAuthority::new(config.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            store.clone(),
            Arc::new(NoopGeoLocator),
        ));
        AuthService::new(store, tokens, sessions, config)
    }

    fn ctx() -> ClientContext {
        ClientContext {
            ip: "198.51.100.7".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/124.0".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_fail_alike() {
        let service = service();
        service
            .register("agent@example.com", "hunter2!", "AGENT", &ctx())
            .await
            .unwrap();

        let missing = service.login("ghost@example.com", "hunter2!", &ctx()).await;
        let wrong = service.login("agent@example.com", "wrong", &ctx()).await;
        assert!(matches!(missing, Err(Error::InvalidCredentials)));
        assert!(matches!(wrong, Err(Error::InvalidCredentials)));
    }

    #[tokio::test]
    async fn login_normalizes_email_and_records_it() {
        let service = service();
        service
            .register("Agent@Example.COM", "hunter2!", "AGENT", &ctx())
            .await
            .unwrap();

        let outcome = service
            .login(" agent@example.com ", "hunter2!", &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.user.email, "agent@example.com");
        assert!(outcome.user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let service = service();
        service
            .register("agent@example.com", "hunter2!", "AGENT", &ctx())
            .await
            .unwrap();
        let result = service
            .register("agent@example.com", "other-pass", "MANAGER", &ctx())
            .await;
        assert!(matches!(result, Err(Error::AlreadyExists)));
    }

    #[tokio::test]
    async fn registration_validates_inputs() {
        let service = service();
        assert!(matches!(
            service.register("not-an-email", "hunter2!", "AGENT", &ctx()).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.register("a@example.com", "", "AGENT", &ctx()).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service.register("a@example.com", "hunter2!", "INTERN", &ctx()).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn refresh_fails_closed_after_generation_bump() {
        let service = service();
        let outcome = service
            .register("agent@example.com", "hunter2!", "AGENT", &ctx())
            .await
            .unwrap();

        assert!(service.refresh(&outcome.refresh_token).await.is_ok());
        service.logout_all(outcome.user.id).await.unwrap();
        assert!(matches!(
            service.refresh(&outcome.refresh_token).await,
            Err(Error::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn logout_tolerates_garbage_tokens() {
        let service = service();
        let outcome = service
            .register("agent@example.com", "hunter2!", "AGENT", &ctx())
            .await
            .unwrap();

        service
            .logout("not-a-token", Some(outcome.session_id))
            .await
            .unwrap();
        assert!(service
            .sessions()
            .list_active(outcome.user.id)
            .await
            .unwrap()
            .is_empty());
    }
}
