//! End-to-end flows over the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use custodia::{
    AuthConfig, AuthService, AuthStore, ClientContext, Error, MemoryStore, SessionRegistry,
    StaticGeoLocator, TokenAuthority,
};

const FIREFOX_LINUX: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

fn stack() -> (AuthService, Arc<MemoryStore>) {
    let config = AuthConfig::new("access-secret".to_string().into(), "refresh-secret".to_string().into());
    let store = Arc::new(MemoryStore::new());
    let geo = StaticGeoLocator::new([
        ("203.0.113.1".to_string(), "Paris, FR".to_string()),
        ("203.0.113.2".to_string(), "Tokyo, JP".to_string()),
        ("203.0.113.3".to_string(), "Lima, PE".to_string()),
    ]);
    let tokens = Arc::new(TokenAuthority::new(config.clone()));
    let sessions = Arc::new(SessionRegistry::new(store.clone(), Arc::new(geo)));
    (
        AuthService::new(store.clone(), tokens, sessions, config),
        store,
    )
}

fn ctx(ip: &str) -> ClientContext {
    ClientContext {
        ip: ip.to_string(),
        user_agent: FIREFOX_LINUX.to_string(),
    }
}

#[tokio::test]
async fn register_login_refresh_logout_all() {
    let (service, _store) = stack();

    let registered = service
        .register("a@x.com", "Pw1!", "AGENT", &ctx("203.0.113.1"))
        .await
        .unwrap();
    assert_eq!(registered.user.role, "AGENT");

    let login = service
        .login("a@x.com", "Pw1!", &ctx("203.0.113.1"))
        .await
        .unwrap();
    let access = service
        .tokens()
        .validate_access_token(&login.access_token)
        .unwrap();
    assert_eq!(access.role, "AGENT");
    assert_eq!(access.sid, login.session_id);

    let refreshed = service.refresh(&login.refresh_token).await.unwrap();
    let refreshed_claims = service.tokens().validate_access_token(&refreshed).unwrap();
    assert_eq!(refreshed_claims.role, "AGENT");
    assert_eq!(refreshed_claims.sub, login.user.id);

    let affected = service.logout_all(login.user.id).await.unwrap();
    assert!(affected >= 2, "register and login sessions both close");
    assert!(matches!(
        service.refresh(&login.refresh_token).await,
        Err(Error::TokenRevoked)
    ));
}

#[tokio::test]
async fn logout_revokes_only_the_presented_token() {
    let (service, _store) = stack();
    let outcome = service
        .register("a@x.com", "Pw1!", "AGENT", &ctx("203.0.113.1"))
        .await
        .unwrap();
    let second = service
        .login("a@x.com", "Pw1!", &ctx("203.0.113.1"))
        .await
        .unwrap();

    service
        .logout(&outcome.access_token, Some(outcome.session_id))
        .await
        .unwrap();

    assert!(matches!(
        service.tokens().validate_access_token(&outcome.access_token),
        Err(Error::TokenRevoked)
    ));
    // The other session's token is untouched.
    assert!(service
        .tokens()
        .validate_access_token(&second.access_token)
        .is_ok());

    let active = service.sessions().list_active(outcome.user.id).await.unwrap();
    assert!(active.iter().all(|s| s.id != outcome.session_id));
}

#[tokio::test]
async fn login_from_three_locations_raises_the_advisory() {
    let (service, _store) = stack();
    service
        .register("a@x.com", "Pw1!", "AGENT", &ctx("203.0.113.1"))
        .await
        .unwrap();

    let tokyo = service
        .login("a@x.com", "Pw1!", &ctx("203.0.113.2"))
        .await
        .unwrap();
    assert!(tokyo.security_alert.is_none(), "two locations stay quiet");

    let lima = service
        .login("a@x.com", "Pw1!", &ctx("203.0.113.3"))
        .await
        .unwrap();
    let alert = lima.security_alert.expect("third location flags the account");
    assert_eq!(alert.locations.len(), 3);
    assert!(alert.locations.contains(&"Lima, PE".to_string()));
}

#[tokio::test]
async fn repeat_logins_from_one_location_stay_quiet() {
    let (service, _store) = stack();
    service
        .register("a@x.com", "Pw1!", "AGENT", &ctx("203.0.113.1"))
        .await
        .unwrap();
    for _ in 0..3 {
        let outcome = service
            .login("a@x.com", "Pw1!", &ctx("203.0.113.1"))
            .await
            .unwrap();
        assert!(outcome.security_alert.is_none());
    }
}

#[tokio::test]
async fn configured_idle_sweep_reaps_stale_sessions() {
    let (service, store) = stack();
    let outcome = service
        .register("a@x.com", "Pw1!", "AGENT", &ctx("203.0.113.1"))
        .await
        .unwrap();
    let fresh = service
        .login("a@x.com", "Pw1!", &ctx("203.0.113.1"))
        .await
        .unwrap();

    store
        .touch_session(outcome.session_id, Utc::now() - Duration::minutes(31))
        .await
        .unwrap();
    store
        .touch_session(fresh.session_id, Utc::now() - Duration::minutes(10))
        .await
        .unwrap();

    // Default timeout is 30 minutes.
    assert_eq!(service.sweep_idle_sessions().await.unwrap(), 1);
    let active = service.sessions().list_active(outcome.user.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, fresh.session_id);
}

#[tokio::test]
async fn touching_a_swept_session_does_not_revive_it() {
    let (service, store) = stack();
    let outcome = service
        .register("a@x.com", "Pw1!", "AGENT", &ctx("203.0.113.1"))
        .await
        .unwrap();
    store
        .touch_session(outcome.session_id, Utc::now() - Duration::minutes(45))
        .await
        .unwrap();
    assert_eq!(service.sweep_idle_sessions().await.unwrap(), 1);

    service.sessions().touch(outcome.session_id).await.unwrap();
    assert!(service
        .sessions()
        .list_active(outcome.user.id)
        .await
        .unwrap()
        .is_empty());
}
