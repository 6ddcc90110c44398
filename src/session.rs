//! Session lifecycle and the suspicious-activity heuristic.

use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::Error;
use crate::store::{AuthStore, Session};

/// Location used when the lookup has no answer; filtered out of the
/// suspicious-activity heuristic.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Trailing window inspected by [`SessionRegistry::detect_suspicious`].
const SUSPICIOUS_WINDOW_MINUTES: i64 = 60;
/// More than this many distinct known locations inside the window flags the
/// account.
const SUSPICIOUS_LOCATION_LIMIT: usize = 2;

/// Client details captured at login/register time.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: String,
}

/// Resolves an IP address to an approximate location such as `"Paris, FR"`.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: &str) -> Option<String>;
}

/// Locator that never resolves anything; sessions land on `"unknown"`.
#[derive(Clone, Debug)]
pub struct NoopGeoLocator;

impl GeoLocator for NoopGeoLocator {
    fn locate(&self, _ip: &str) -> Option<String> {
        None
    }
}

/// Table-backed locator for tests and fixed fleets.
#[derive(Default)]
pub struct StaticGeoLocator {
    entries: std::collections::HashMap<String, String>,
}

impl StaticGeoLocator {
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

impl GeoLocator for StaticGeoLocator {
    fn locate(&self, ip: &str) -> Option<String> {
        self.entries.get(ip).cloned()
    }
}

/// What the user agent string resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAgent {
    pub device: String,
    pub browser: String,
    pub os: String,
}

/// Classify a raw user agent into device class, browser, and OS.
///
/// Substring matching is deliberate: the goal is a coarse label for the
/// sessions list, not full fidelity. Order matters where one product string
/// embeds another (Edge carries "Chrome", Chrome carries "Safari").
#[must_use]
pub fn parse_user_agent(user_agent: &str) -> ParsedAgent {
    let device = if user_agent.contains("iPad") || user_agent.contains("Tablet") {
        "tablet"
    } else if user_agent.contains("Mobile")
        || user_agent.contains("iPhone")
        || user_agent.contains("Android")
    {
        "mobile"
    } else if user_agent.is_empty() {
        "unknown"
    } else {
        "desktop"
    };

    let browser = if user_agent.contains("Edg/") || user_agent.contains("Edge/") {
        "Edge"
    } else if user_agent.contains("Firefox/") {
        "Firefox"
    } else if user_agent.contains("Chrome/") || user_agent.contains("CriOS/") {
        "Chrome"
    } else if user_agent.contains("Safari/") {
        "Safari"
    } else {
        "unknown"
    };

    let os = if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        "iOS"
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        "macOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        "unknown"
    };

    ParsedAgent {
        device: device.to_string(),
        browser: browser.to_string(),
        os: os.to_string(),
    }
}

/// Result of the multiple-locations heuristic.
///
/// This is a heuristic, not a verdict: shared VPN egress points produce
/// false positives and logins from unresolvable addresses produce false
/// negatives. Callers surface it as an advisory only.
#[derive(Debug, Clone)]
pub struct SuspiciousActivity {
    pub suspicious: bool,
    pub locations: Vec<String>,
    pub sessions: Vec<Session>,
}

impl SuspiciousActivity {
    fn none() -> Self {
        Self {
            suspicious: false,
            locations: Vec::new(),
            sessions: Vec::new(),
        }
    }
}

/// Creates, tracks, idles-out, and flags sessions.
pub struct SessionRegistry {
    store: Arc<dyn AuthStore>,
    geo: Arc<dyn GeoLocator>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, geo: Arc<dyn GeoLocator>) -> Self {
        Self { store, geo }
    }

    /// Create and persist a new active session for the user.
    pub async fn create(&self, user_id: Uuid, ctx: &ClientContext) -> Result<Session, Error> {
        let agent = parse_user_agent(&ctx.user_agent);
        let location = self
            .geo
            .locate(&ctx.ip)
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            ip_address: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            device: agent.device,
            browser: agent.browser,
            os: agent.os,
            location,
            is_active: true,
            created_at: now,
            last_activity_at: now,
        };
        self.store.insert_session(session.clone()).await?;
        Ok(session)
    }

    /// Record activity on a session. Inactive or unknown sessions are left
    /// alone; the hook must never fail an authenticated request or bring a
    /// session back to life.
    pub async fn touch(&self, session_id: Uuid) -> Result<(), Error> {
        self.store.touch_session(session_id, Utc::now()).await
    }

    /// Deactivate one session. Idempotent.
    pub async fn invalidate(&self, session_id: Uuid) -> Result<(), Error> {
        self.store.deactivate_session(session_id).await
    }

    /// Deactivate every active session for the user; returns the count
    /// affected.
    pub async fn invalidate_all(&self, user_id: Uuid) -> Result<u64, Error> {
        self.store.deactivate_user_sessions(user_id).await
    }

    /// Active sessions, most recently active first.
    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>, Error> {
        self.store.active_sessions(user_id).await
    }

    /// Deactivate sessions idle longer than the timeout; returns the count.
    ///
    /// Scheduler-triggered, idempotent, and safe alongside live traffic: the
    /// only transition it performs is active→inactive.
    pub async fn sweep_idle(&self, timeout_minutes: i64) -> Result<u64, Error> {
        let cutoff = Utc::now() - Duration::minutes(timeout_minutes);
        let affected = self.store.deactivate_idle_sessions(cutoff).await?;
        if affected > 0 {
            tracing::info!(affected, "swept idle sessions");
        }
        Ok(affected)
    }

    /// Flag accounts whose recent active sessions spread over more than
    /// [`SUSPICIOUS_LOCATION_LIMIT`] distinct known locations.
    ///
    /// Never raises: when the store fails the heuristic degrades to "not
    /// suspicious" rather than blocking a login.
    pub async fn detect_suspicious(&self, user_id: Uuid) -> SuspiciousActivity {
        let since = Utc::now() - Duration::minutes(SUSPICIOUS_WINDOW_MINUTES);
        let sessions = match self.store.active_sessions_since(user_id, since).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(%user_id, "suspicious-activity lookup failed, degrading: {err}");
                return SuspiciousActivity::none();
            }
        };

        let locations: BTreeSet<String> = sessions
            .iter()
            .map(|s| s.location.clone())
            .filter(|l| l != UNKNOWN_LOCATION)
            .collect();

        SuspiciousActivity {
            suspicious: locations.len() > SUSPICIOUS_LOCATION_LIMIT,
            locations: locations.into_iter().collect(),
            sessions,
        }
    }
}
