//! Configuration for token signing, session policy, and the CRM integration.

use anyhow::{Context, Result};
use chrono::Duration;
use secrecy::SecretString;
use std::time::Duration as StdDuration;

const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 7;
const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 30;

const DEFAULT_CRM_AUTH_URL: &str = "https://app.hubspot.com/oauth/authorize";
const DEFAULT_CRM_TOKEN_URL: &str = "https://api.hubapi.com/oauth/v1/token";
const DEFAULT_CRM_SCOPES: &str = "contacts content timeline";
const DEFAULT_REFRESH_AHEAD_SECONDS: i64 = 5 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Signing secrets and lifetime policy for the authentication core.
///
/// Access and refresh tokens are signed with independent secrets so a leak of
/// one never compromises the other class.
#[derive(Clone)]
pub struct AuthConfig {
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl_minutes: i64,
    refresh_ttl_days: i64,
    idle_timeout_minutes: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(access_secret: SecretString, refresh_secret: SecretString) -> Self {
        Self {
            access_secret,
            refresh_secret,
            access_ttl_minutes: DEFAULT_ACCESS_TTL_MINUTES,
            refresh_ttl_days: DEFAULT_REFRESH_TTL_DAYS,
            idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
        }
    }

    /// Read secrets and overrides from the environment.
    ///
    /// `AUTH_ACCESS_SECRET` and `AUTH_REFRESH_SECRET` are required; the TTLs
    /// fall back to 15 minutes and 7 days.
    pub fn from_env() -> Result<Self> {
        let access_secret = std::env::var("AUTH_ACCESS_SECRET")
            .context("AUTH_ACCESS_SECRET must be set")?
            .into();
        let refresh_secret = std::env::var("AUTH_REFRESH_SECRET")
            .context("AUTH_REFRESH_SECRET must be set")?
            .into();

        let mut config = Self::new(access_secret, refresh_secret);
        if let Ok(minutes) = std::env::var("AUTH_ACCESS_TTL_MINUTES") {
            config.access_ttl_minutes = minutes
                .parse()
                .context("AUTH_ACCESS_TTL_MINUTES must be an integer")?;
        }
        if let Ok(days) = std::env::var("AUTH_REFRESH_TTL_DAYS") {
            config.refresh_ttl_days = days
                .parse()
                .context("AUTH_REFRESH_TTL_DAYS must be an integer")?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_access_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_days(mut self, days: i64) -> Self {
        self.refresh_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_idle_timeout_minutes(mut self, minutes: i64) -> Self {
        self.idle_timeout_minutes = minutes;
        self
    }

    pub(crate) fn access_secret(&self) -> &SecretString {
        &self.access_secret
    }

    pub(crate) fn refresh_secret(&self) -> &SecretString {
        &self.refresh_secret
    }

    pub(crate) fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_ttl_minutes)
    }

    pub(crate) fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }

    #[must_use]
    pub fn idle_timeout_minutes(&self) -> i64 {
        self.idle_timeout_minutes
    }
}

/// OAuth client settings for the partner CRM.
#[derive(Clone)]
pub struct CrmConfig {
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    scopes: String,
    auth_url: String,
    token_url: String,
    state_secret: SecretString,
    refresh_ahead_seconds: i64,
    request_timeout: StdDuration,
}

impl CrmConfig {
    #[must_use]
    pub fn new(
        client_id: String,
        client_secret: SecretString,
        redirect_uri: String,
        state_secret: SecretString,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes: DEFAULT_CRM_SCOPES.to_string(),
            auth_url: DEFAULT_CRM_AUTH_URL.to_string(),
            token_url: DEFAULT_CRM_TOKEN_URL.to_string(),
            state_secret,
            refresh_ahead_seconds: DEFAULT_REFRESH_AHEAD_SECONDS,
            request_timeout: StdDuration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        }
    }

    /// Read the OAuth client settings from the environment.
    ///
    /// `CRM_CLIENT_ID`, `CRM_CLIENT_SECRET`, `CRM_REDIRECT_URI`, and
    /// `CRM_STATE_SECRET` are required; endpoints and scopes default to the
    /// partner's published values.
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("CRM_CLIENT_ID").context("CRM_CLIENT_ID must be set")?;
        let client_secret = std::env::var("CRM_CLIENT_SECRET")
            .context("CRM_CLIENT_SECRET must be set")?
            .into();
        let redirect_uri =
            std::env::var("CRM_REDIRECT_URI").context("CRM_REDIRECT_URI must be set")?;
        let state_secret = std::env::var("CRM_STATE_SECRET")
            .context("CRM_STATE_SECRET must be set")?
            .into();

        let mut config = Self::new(client_id, client_secret, redirect_uri, state_secret);
        if let Ok(scopes) = std::env::var("CRM_SCOPES") {
            config.scopes = scopes;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: String) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_auth_url(mut self, auth_url: String) -> Self {
        self.auth_url = auth_url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, token_url: String) -> Self {
        self.token_url = token_url;
        self
    }

    #[must_use]
    pub fn with_refresh_ahead_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ahead_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: StdDuration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &str {
        &self.scopes
    }

    #[must_use]
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub(crate) fn state_secret(&self) -> &SecretString {
        &self.state_secret
    }

    pub(crate) fn refresh_ahead(&self) -> Duration {
        Duration::seconds(self.refresh_ahead_seconds)
    }

    #[must_use]
    pub fn request_timeout(&self) -> StdDuration {
        self.request_timeout
    }
}
