//! Access/refresh token issuance, validation, and revocation.
//!
//! Tokens are HS256-signed JWTs assembled directly over `hmac`/`sha2`.
//! Access and refresh tokens are signed with independent secrets; a refresh
//! token additionally embeds the user's token generation so every
//! outstanding refresh token can be cut off by bumping the counter.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::Error;
use crate::store::User;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// User id.
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    /// Session the token is bound to.
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: Uuid,
    /// Token generation at issue time; compared against the user's current
    /// generation on every refresh.
    #[serde(rename = "gen")]
    pub generation: i64,
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// The minimum every token must carry for revocation bookkeeping.
#[derive(Debug, Deserialize)]
struct RevocationClaims {
    jti: String,
    exp: i64,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value).map_err(|_| Error::TokenInvalid)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(part: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(part).map_err(|_| Error::TokenInvalid)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::TokenInvalid)
}

fn sign_hs256<T: Serialize>(secret: &[u8], claims: &T) -> Result<String, Error> {
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| Error::unavailable("initialize token mac", err))?;
    mac.update(signing_input.as_bytes());
    let tag = mac.finalize().into_bytes();
    let tag_b64 = Base64UrlUnpadded::encode_string(&tag);

    Ok(format!("{signing_input}.{tag_b64}"))
}

struct TokenParts<'a> {
    header: TokenHeader,
    claims_b64: &'a str,
    signing_input: String,
    signature: Vec<u8>,
}

fn split_token(token: &str) -> Result<TokenParts<'_>, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenInvalid)?;
    let claims_b64 = parts.next().ok_or(Error::TokenInvalid)?;
    let tag_b64 = parts.next().ok_or(Error::TokenInvalid)?;
    if parts.next().is_some() {
        return Err(Error::TokenInvalid);
    }
    let header: TokenHeader = b64d_json(header_b64)?;
    let signature = Base64UrlUnpadded::decode_vec(tag_b64).map_err(|_| Error::TokenInvalid)?;
    Ok(TokenParts {
        header,
        claims_b64,
        signing_input: format!("{header_b64}.{claims_b64}"),
        signature,
    })
}

/// Process-wide set of revoked token identifiers.
///
/// Keyed by `jti`, each entry bounded by the token's own expiry and dropped
/// by [`RevocationSet::prune`] once that expiry passes. The set lives in this
/// process only: with several instances running, a token revoked on one
/// instance stays accepted on the others until it expires. Deployments that
/// need cross-instance revocation must back this with shared storage.
#[derive(Default)]
pub struct RevocationSet {
    entries: RwLock<HashMap<String, i64>>,
}

impl RevocationSet {
    fn insert(&self, jti: String, exp: i64) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(jti, exp);
        }
    }

    fn contains(&self, jti: &str) -> bool {
        // Fail closed: a poisoned lock reads as revoked.
        self.entries
            .read()
            .map_or(true, |entries| entries.contains_key(jti))
    }

    fn prune(&self, now: i64) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, exp| *exp > now);
        before - entries.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }
}

/// Issues, validates, and revokes the crate's own signed tokens.
pub struct TokenAuthority {
    config: AuthConfig,
    revoked: RevocationSet,
}

impl TokenAuthority {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            revoked: RevocationSet::default(),
        }
    }

    /// Sign a short-lived access token bound to the user and session.
    pub fn issue_access_token(&self, user: &User, session_id: Uuid) -> Result<String, Error> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role.clone(),
            sid: session_id,
            iat: now.timestamp(),
            exp: (now + self.config.access_ttl()).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        sign_hs256(self.config.access_secret().expose_secret().as_bytes(), &claims)
    }

    /// Sign a refresh token carrying the user's current token generation.
    pub fn issue_refresh_token(&self, user: &User, session_id: Uuid) -> Result<String, Error> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: user.id,
            generation: user.token_generation,
            sid: session_id,
            iat: now.timestamp(),
            exp: (now + self.config.refresh_ttl()).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        sign_hs256(self.config.refresh_secret().expose_secret().as_bytes(), &claims)
    }

    /// Validate an access token and return its claims.
    ///
    /// Fails with [`Error::TokenRevoked`], [`Error::TokenExpired`], or
    /// [`Error::TokenInvalid`] (bad shape or signature).
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, Error> {
        self.validate(token, self.config.access_secret().expose_secret().as_bytes())
    }

    /// Validate a refresh token and return its claims.
    ///
    /// The caller still has to compare the embedded generation against the
    /// user's current one and treat a mismatch as revoked.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, Error> {
        self.validate(token, self.config.refresh_secret().expose_secret().as_bytes())
    }

    fn validate<T: DeserializeOwned>(&self, token: &str, secret: &[u8]) -> Result<T, Error> {
        let parts = split_token(token)?;
        if parts.header.alg != "HS256" {
            return Err(Error::TokenInvalid);
        }

        // Revocation wins over every other verdict, so a revoked-but-expired
        // token still reports as revoked.
        let stamp: RevocationClaims = b64d_json(parts.claims_b64)?;
        if self.revoked.contains(&stamp.jti) {
            return Err(Error::TokenRevoked);
        }

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|err| Error::unavailable("initialize token mac", err))?;
        mac.update(parts.signing_input.as_bytes());
        mac.verify_slice(&parts.signature)
            .map_err(|_| Error::TokenInvalid)?;

        if stamp.exp <= Utc::now().timestamp() {
            return Err(Error::TokenExpired);
        }

        b64d_json(parts.claims_b64)
    }

    /// Insert the token's identifier into the revocation set.
    ///
    /// The signature is not re-checked here; revoking a token the caller
    /// could not have validated is harmless, while an undecodable blob is
    /// rejected as [`Error::TokenInvalid`].
    pub fn revoke(&self, token: &str) -> Result<(), Error> {
        let parts = split_token(token)?;
        let stamp: RevocationClaims = b64d_json(parts.claims_b64)?;
        self.revoked.insert(stamp.jti, stamp.exp);
        Ok(())
    }

    /// Drop revocation entries whose own expiry has passed.
    ///
    /// Scheduler-triggered and idempotent; safe to run concurrently with
    /// validation.
    pub fn prune_revoked(&self) -> usize {
        self.revoked.prune(Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use chrono::Utc;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(AuthConfig::new("access-secret".to_string().into(), "refresh-secret".to_string().into()))
    }

    fn expired_authority() -> TokenAuthority {
        // Negative TTLs produce tokens that are already past their expiry.
        TokenAuthority::new(
            AuthConfig::new("access-secret".to_string().into(), "refresh-secret".to_string().into())
                .with_access_ttl_minutes(-5)
                .with_refresh_ttl_days(-1),
        )
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "agent@example.com".to_string(),
            password_hash: "hash".to_string(),
            password_salt: "salt".to_string(),
            role: "AGENT".to_string(),
            token_generation: 3,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn access_token_round_trip() {
        let authority = authority();
        let user = test_user();
        let session_id = Uuid::new_v4();

        let token = authority.issue_access_token(&user, session_id).unwrap();
        let claims = authority.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, "AGENT");
        assert_eq!(claims.sid, session_id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn refresh_token_embeds_generation() {
        let authority = authority();
        let user = test_user();
        let token = authority.issue_refresh_token(&user, Uuid::new_v4()).unwrap();
        let claims = authority.validate_refresh_token(&token).unwrap();
        assert_eq!(claims.generation, 3);
    }

    #[test]
    fn secrets_are_not_interchangeable() {
        let authority = authority();
        let user = test_user();
        let refresh = authority.issue_refresh_token(&user, Uuid::new_v4()).unwrap();
        assert!(matches!(
            authority.validate_access_token(&refresh),
            Err(Error::TokenInvalid)
        ));
    }

    #[test]
    fn expired_token_is_reported_expired() {
        let authority = expired_authority();
        let user = test_user();
        let token = authority.issue_access_token(&user, Uuid::new_v4()).unwrap();
        assert!(matches!(
            authority.validate_access_token(&token),
            Err(Error::TokenExpired)
        ));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let authority = authority();
        let user = test_user();
        let token = authority.issue_access_token(&user, Uuid::new_v4()).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = b64e_json(&serde_json::json!({
            "sub": user.id,
            "email": user.email,
            "role": "ADMIN",
            "sid": Uuid::new_v4(),
            "iat": 0,
            "exp": i64::MAX,
            "jti": "forged",
        }))
        .unwrap();
        parts[1] = &forged;
        let tampered = parts.join(".");

        assert!(matches!(
            authority.validate_access_token(&tampered),
            Err(Error::TokenInvalid)
        ));
    }

    #[test]
    fn revoked_token_fails_while_siblings_survive() {
        let authority = authority();
        let user = test_user();
        let session_id = Uuid::new_v4();
        let revoked = authority.issue_access_token(&user, session_id).unwrap();
        let kept = authority.issue_access_token(&user, session_id).unwrap();

        authority.revoke(&revoked).unwrap();
        assert!(matches!(
            authority.validate_access_token(&revoked),
            Err(Error::TokenRevoked)
        ));
        assert!(authority.validate_access_token(&kept).is_ok());
    }

    #[test]
    fn revocation_outranks_expiry() {
        let authority = expired_authority();
        let user = test_user();
        let token = authority.issue_access_token(&user, Uuid::new_v4()).unwrap();
        authority.revoke(&token).unwrap();
        assert!(matches!(
            authority.validate_access_token(&token),
            Err(Error::TokenRevoked)
        ));
    }

    #[test]
    fn revoking_garbage_is_invalid() {
        let authority = authority();
        assert!(matches!(
            authority.revoke("definitely-not-a-token"),
            Err(Error::TokenInvalid)
        ));
    }

    #[test]
    fn prune_drops_only_expired_entries() {
        let expired = expired_authority();
        let user = test_user();
        let stale = expired.issue_access_token(&user, Uuid::new_v4()).unwrap();

        let authority = authority();
        let live = authority.issue_access_token(&user, Uuid::new_v4()).unwrap();
        authority.revoke(&stale).unwrap();
        authority.revoke(&live).unwrap();
        assert_eq!(authority.revoked.len(), 2);

        assert_eq!(authority.prune_revoked(), 1);
        assert_eq!(authority.revoked.len(), 1);
        // The pruned token now fails on its own expiry instead.
        assert!(matches!(
            authority.validate_access_token(&stale),
            Err(Error::TokenExpired)
        ));
        assert!(matches!(
            authority.validate_access_token(&live),
            Err(Error::TokenRevoked)
        ));
    }
}
