//! Typed failure taxonomy surfaced by the engine.
//!
//! Every component returns these as values; there is no flow control via
//! panics. The orchestrator maps them to caller-visible outcomes and
//! suppresses detail where enumeration resistance requires it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate email at registration. Intentionally revealed: uniqueness
    /// cannot be enforced without it.
    #[error("email already registered")]
    Conflict,

    /// Bad password, unknown email, or inactive account - one signal, to
    /// resist account enumeration.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account temporarily locked")]
    AccountLocked,

    #[error("email not verified")]
    AccountUnverified,

    #[error("too many attempts, please try again later")]
    RateLimited,

    /// Unknown, expired, or revoked token.
    #[error("invalid or expired token")]
    TokenInvalid,

    /// Lockout-guard block on the submitted email or the source IP.
    #[error("access temporarily blocked")]
    Unauthorized,

    #[error("MFA is not configured for this account")]
    MfaNotConfigured,

    #[error("MFA is already enabled for this account")]
    MfaAlreadyEnabled,

    /// Generic registration failure after the account row exists; detail is
    /// deliberately not surfaced to the caller.
    #[error("registration failed")]
    RegistrationFailed,

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    /// Whether this failure may be shown to an unauthenticated caller
    /// without widening an enumeration channel.
    pub fn is_caller_visible(&self) -> bool {
        !matches!(self, AuthError::Store(_) | AuthError::Email(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_email_errors_are_internal() {
        assert!(!AuthError::Store(anyhow::anyhow!("boom")).is_caller_visible());
        assert!(!AuthError::Email("smtp down".into()).is_caller_visible());
        assert!(AuthError::InvalidCredentials.is_caller_visible());
        assert!(AuthError::RateLimited.is_caller_visible());
    }

    #[test]
    fn credential_failures_share_one_message() {
        // Unknown email and wrong password must be indistinguishable
        let msg = AuthError::InvalidCredentials.to_string();
        assert_eq!(msg, "invalid credentials");
        assert!(!msg.contains("email"));
        assert!(!msg.contains("password"));
    }
}
