//! Identity and session control plane for a multi-tenant CRM.
//!
//! The crate covers four concerns and the orchestration on top of them:
//!
//! - [`permissions`] — pure role→capability resolution with inheritance.
//! - [`token`] — HS256 access/refresh token issuance, validation, and
//!   revocation, with independent signing secrets per token class.
//! - [`session`] — session lifecycle, idle sweeping, and the
//!   multiple-locations suspicious-activity heuristic.
//! - [`broker`] — the OAuth2 credential broker for the partner CRM, with
//!   refresh-ahead renewal serialized per user.
//! - [`auth`] — login/register/refresh/logout flows composing the above.
//!
//! Persistence sits behind the [`store::AuthStore`] trait; [`store::MemoryStore`]
//! backs tests and development, [`store::PgStore`] backs production. HTTP
//! routing, rate limiting, and schema migrations belong to the embedding
//! service.

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod password;
pub mod permissions;
pub mod session;
pub mod store;
pub mod token;

pub use auth::{AuthService, LoginOutcome, SecurityAlert};
pub use broker::{CrmTokenBroker, HttpTokenEndpoint, TokenEndpoint, TokenGrant};
pub use config::{AuthConfig, CrmConfig};
pub use error::Error;
pub use session::{
    ClientContext, GeoLocator, NoopGeoLocator, SessionRegistry, StaticGeoLocator,
    SuspiciousActivity,
};
pub use store::{AuthStore, CrmTokenRecord, MemoryStore, PgStore, Session, User};
pub use token::{AccessClaims, RefreshClaims, TokenAuthority};
