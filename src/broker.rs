//! OAuth2 credential broker for the partner CRM.
//!
//! Holds one token row per connected user and renews it ahead of expiry so
//! partner-API calls never start with a stale credential. The refresh path is
//! serialized per user: concurrent callers wait on the in-flight refresh and
//! reuse its result instead of issuing a second grant.

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::CrmConfig;
use crate::error::Error;
use crate::store::{AuthStore, CrmTokenRecord};

type HmacSha256 = Hmac<Sha256>;

/// Token endpoint response, form-encoded grant flavors both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenGrant {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: i64,
    pub scope: Option<String>,
}

/// The partner's token endpoint.
///
/// Implementations post a form-encoded grant request and surface
/// [`Error::NetworkTimeout`] on a timed-out call and [`Error::ExchangeFailed`]
/// on a non-success response, carrying whatever detail the partner returned.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant, Error>;
}

/// Reqwest-backed endpoint with a bounded request timeout.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenEndpoint {
    pub fn new(config: &CrmConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| Error::unavailable("build http client", err))?;
        Ok(Self {
            client,
            token_url: config.token_url().to_string(),
        })
    }
}

/// Error body shape most OAuth providers return alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct PartnerError {
    error: Option<String>,
    error_description: Option<String>,
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant, Error> {
        let response = self
            .client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    Error::NetworkTimeout
                } else {
                    Error::unavailable("reach partner token endpoint", err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<PartnerError>(&body)
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or(body);
            return Err(Error::ExchangeFailed(format!(
                "partner returned {status}: {detail}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| Error::ExchangeFailed(format!("unreadable partner response: {err}")))
    }
}

#[derive(Debug, serde::Serialize, Deserialize)]
struct StatePayload {
    user_id: Uuid,
}

fn state_tag(secret: &[u8], payload_b64: &str) -> Result<Vec<u8>, Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| Error::unavailable("initialize state mac", err))?;
    mac.update(payload_b64.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Brokers OAuth credentials for the partner CRM on behalf of each user.
pub struct CrmTokenBroker {
    config: CrmConfig,
    store: Arc<dyn AuthStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    refresh_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CrmTokenBroker {
    #[must_use]
    pub fn new(
        config: CrmConfig,
        store: Arc<dyn AuthStore>,
        endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            config,
            store,
            endpoint,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Authorization URL the user's browser is sent to.
    ///
    /// The `state` parameter is base64url JSON carrying the user id plus an
    /// HMAC tag, so the callback can reject anything we did not mint. The
    /// embedding service must still bind the callback to the authenticated
    /// caller; the tag alone does not prove who presented it.
    pub fn authorization_url(&self, user_id: Uuid) -> Result<String, Error> {
        let state = self.encode_state(user_id)?;
        let mut url = Url::parse(self.config.auth_url())
            .map_err(|err| Error::unavailable("parse partner auth url", err))?;
        url.query_pairs_mut()
            .append_pair("client_id", self.config.client_id())
            .append_pair("redirect_uri", self.config.redirect_uri())
            .append_pair("scope", self.config.scopes())
            .append_pair("state", &state);
        Ok(url.to_string())
    }

    fn encode_state(&self, user_id: Uuid) -> Result<String, Error> {
        let payload = serde_json::to_vec(&StatePayload { user_id })
            .map_err(|err| Error::unavailable("encode state", err))?;
        let payload_b64 = Base64UrlUnpadded::encode_string(&payload);
        let tag = state_tag(
            self.config.state_secret().expose_secret().as_bytes(),
            &payload_b64,
        )?;
        Ok(format!(
            "{payload_b64}.{}",
            Base64UrlUnpadded::encode_string(&tag)
        ))
    }

    /// Verify a callback `state` parameter and return the user id it names.
    pub fn decode_state(&self, state: &str) -> Result<Uuid, Error> {
        let (payload_b64, tag_b64) = state
            .split_once('.')
            .ok_or_else(|| Error::ExchangeFailed("malformed state parameter".to_string()))?;
        let tag = Base64UrlUnpadded::decode_vec(tag_b64)
            .map_err(|_| Error::ExchangeFailed("malformed state parameter".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(
            self.config.state_secret().expose_secret().as_bytes(),
        )
        .map_err(|err| Error::unavailable("initialize state mac", err))?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| Error::ExchangeFailed("state parameter failed verification".to_string()))?;

        let payload = Base64UrlUnpadded::decode_vec(payload_b64)
            .map_err(|_| Error::ExchangeFailed("malformed state parameter".to_string()))?;
        let payload: StatePayload = serde_json::from_slice(&payload)
            .map_err(|_| Error::ExchangeFailed("malformed state parameter".to_string()))?;
        Ok(payload.user_id)
    }

    /// Exchange an authorization code and store the resulting credentials.
    pub async fn exchange_code(&self, code: &str, user_id: Uuid) -> Result<(), Error> {
        debug!(%user_id, grant_type = "authorization_code", "exchanging code with partner");
        let grant = self
            .endpoint
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.config.client_id()),
                ("client_secret", self.config.client_secret().expose_secret()),
                ("redirect_uri", self.config.redirect_uri()),
                ("code", code),
            ])
            .await?;

        let access_token = grant
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::ExchangeFailed("partner omitted the access token".to_string()))?;
        let refresh_token = grant.refresh_token.unwrap_or_default();
        let now = Utc::now();

        self.store
            .upsert_crm_token(CrmTokenRecord {
                id: Uuid::new_v4(),
                user_id,
                access_token,
                refresh_token,
                expires_at: now + Duration::seconds(grant.expires_in),
                scopes: grant
                    .scope
                    .unwrap_or_else(|| self.config.scopes().to_string()),
                updated_at: now,
            })
            .await?;

        info!(%user_id, "partner CRM connected");
        Ok(())
    }

    /// Return an access token that is safe to use right now.
    ///
    /// Inside the refresh-ahead window the stored pair is renewed first; one
    /// renewal runs per user at a time and late arrivals reuse its outcome.
    pub async fn valid_access_token(&self, user_id: Uuid) -> Result<String, Error> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let record = self
            .store
            .crm_token_by_user(user_id)
            .await?
            .ok_or(Error::NotConnected)?;

        let now = Utc::now();
        if now < record.expires_at - self.config.refresh_ahead() {
            return Ok(record.access_token);
        }
        self.refresh(record).await
    }

    async fn refresh(&self, record: CrmTokenRecord) -> Result<String, Error> {
        debug!(user_id = %record.user_id, grant_type = "refresh_token", "refreshing partner token");
        let grant = self
            .endpoint
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id()),
                ("client_secret", self.config.client_secret().expose_secret()),
                ("refresh_token", &record.refresh_token),
            ])
            .await?;

        let access_token = grant
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::ExchangeFailed("partner omitted the access token".to_string()))?;
        let now = Utc::now();
        let refreshed = CrmTokenRecord {
            id: record.id,
            user_id: record.user_id,
            access_token: access_token.clone(),
            // Partners may omit the refresh token on renewal; keep ours.
            refresh_token: grant.refresh_token.unwrap_or(record.refresh_token),
            expires_at: now + Duration::seconds(grant.expires_in),
            scopes: record.scopes,
            updated_at: now,
        };
        self.store.upsert_crm_token(refreshed).await?;
        Ok(access_token)
    }

    /// Whether the user has a stored integration. Never raises; a lookup
    /// failure reads as "not connected".
    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        match self.store.crm_token_by_user(user_id).await {
            Ok(record) => record.is_some(),
            Err(err) => {
                warn!(%user_id, "connection lookup failed, reporting disconnected: {err}");
                false
            }
        }
    }

    /// Drop the stored credentials for the user.
    pub async fn disconnect(&self, user_id: Uuid) -> Result<(), Error> {
        let removed = self.store.delete_crm_tokens(user_id).await?;
        if removed > 0 {
            info!(%user_id, "partner CRM disconnected");
        }
        Ok(())
    }

    async fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        // Drop locks nobody is holding before growing the map.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user_id).or_default().clone()
    }
}
