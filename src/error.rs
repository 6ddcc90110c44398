//! Crate-wide error kinds.

use thiserror::Error;

/// Failure kinds surfaced by the control plane.
///
/// Domain failures are typed so callers can map them to their own outcomes;
/// [`Error::Unavailable`] is the one infrastructure kind and is kept distinct
/// from every domain error.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown account or wrong password; one kind for both so callers
    /// cannot probe which emails exist.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account already exists")]
    AlreadyExists,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token")]
    TokenInvalid,
    #[error("token revoked")]
    TokenRevoked,
    /// No CRM integration exists for the user.
    #[error("integration not connected")]
    NotConnected,
    /// The partner rejected a grant request, or its response was unusable.
    #[error("code exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("partner request timed out")]
    NetworkTimeout,
    #[error("not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    /// Storage or another backing service failed.
    #[error("infrastructure unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Wrap an infrastructure failure with the operation that hit it.
    pub(crate) fn unavailable(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Unavailable(format!("{operation}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn credential_errors_do_not_leak_detail() {
        assert_eq!(Error::InvalidCredentials.to_string(), "invalid credentials");
    }

    #[test]
    fn unavailable_carries_operation_context() {
        let err = Error::unavailable("lookup user", "connection refused");
        assert_eq!(
            err.to_string(),
            "infrastructure unavailable: lookup user: connection refused"
        );
    }
}
