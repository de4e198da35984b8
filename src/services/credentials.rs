//! Credential validation and account lock state.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use crate::config::SecurityConfig;
use crate::models::{Account, AuthEvent, AuthEventType};
use crate::services::error::AuthError;
use crate::stores::{AccountStore, AuthEventStore};

#[derive(Clone)]
pub struct CredentialValidator {
    accounts: Arc<dyn AccountStore>,
    events: Arc<dyn AuthEventStore>,
    max_failed_logins: i32,
    lockout: Duration,
}

impl CredentialValidator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn AuthEventStore>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            accounts,
            events,
            max_failed_logins: config.max_failed_logins as i32,
            lockout: Duration::minutes(config.lockout_minutes),
        }
    }

    /// Check a password against the stored hash, driving the account's
    /// failed-attempt and lock state.
    ///
    /// Unknown and inactive emails fail identically to a wrong password, so
    /// the outcome never confirms whether an email is registered. A locked
    /// account fails with `AccountLocked` regardless of the password until
    /// the lock expires.
    pub async fn validate(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let account = match self.accounts.find_by_email(email).await? {
            Some(account) if account.active => account,
            _ => return Err(AuthError::InvalidCredentials),
        };

        if account.is_locked() {
            return Err(AuthError::AccountLocked);
        }

        if !crate::utils::verify_password(password, &account.password_hash) {
            // Atomic increment; concurrent failures cannot lose updates
            let attempts = self.accounts.increment_failed_logins(account.id).await?;

            if attempts >= self.max_failed_logins {
                let until = Utc::now() + self.lockout;
                self.accounts.lock(account.id, until).await?;
                tracing::warn!(account_id = %account.id, "Account locked after repeated failures");

                let event = AuthEvent::new(
                    AuthEventType::AccountLocked,
                    false,
                    Some(account.id),
                    None,
                    None,
                    Some(json!({ "failed_attempts": attempts })),
                );
                if let Err(e) = self.events.insert(&event).await {
                    tracing::error!(error = %e, "Failed to write auth event");
                }
            }

            return Err(AuthError::InvalidCredentials);
        }

        Ok(account)
    }
}
