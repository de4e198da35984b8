//! Account model - the credential-bearing identity record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account entity.
///
/// The lock state is derived from `locked_until` on every read; it is never
/// stored as a boolean, so the stored timestamp cannot drift from the flag.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub verified: bool,
    pub active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    /// Role names, resolved to capability sets by the caller.
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new unverified, active account.
    pub fn new(email: String, password_hash: String, first_name: String, last_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            first_name,
            last_name,
            verified: false,
            active: true,
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
            email_verification_token: None,
            email_verification_expires: None,
            password_reset_token: None,
            password_reset_expires: None,
            roles: vec!["user".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account is currently locked out.
    pub fn is_locked(&self) -> bool {
        self.locked_until.is_some_and(|until| until > Utc::now())
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Public projection without credential or token fields.
    pub fn sanitized(&self) -> AccountPublic {
        AccountPublic {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            verified: self.verified,
            roles: self.roles.clone(),
        }
    }
}

/// Account response for callers (no sensitive fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPublic {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub verified: bool,
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_account_starts_unverified_and_unlocked() {
        let account = Account::new(
            "a@example.com".into(),
            "$argon2id$hash".into(),
            "Ada".into(),
            "Lovelace".into(),
        );

        assert!(!account.verified);
        assert!(account.active);
        assert!(!account.is_locked());
        assert_eq!(account.failed_login_attempts, 0);
        assert_eq!(account.roles, vec!["user".to_string()]);
    }

    #[test]
    fn lock_state_is_derived_from_timestamp() {
        let mut account = Account::new(
            "a@example.com".into(),
            "hash".into(),
            "Ada".into(),
            "Lovelace".into(),
        );

        account.locked_until = Some(Utc::now() + Duration::minutes(15));
        assert!(account.is_locked());

        account.locked_until = Some(Utc::now() - Duration::seconds(1));
        assert!(!account.is_locked());

        account.locked_until = None;
        assert!(!account.is_locked());
    }

    #[test]
    fn sanitized_drops_credential_fields() {
        let account = Account::new(
            "a@example.com".into(),
            "hash".into(),
            "Ada".into(),
            "Lovelace".into(),
        );
        let public = account.sanitized();

        assert_eq!(public.id, account.id);
        assert_eq!(public.email, account.email);
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_reset_token").is_none());
    }
}
