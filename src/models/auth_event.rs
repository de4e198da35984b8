//! Auth event model - append-only security event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Security event kinds recorded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventType {
    LoginSuccess,
    LoginFailed,
    Logout,
    TokenRefresh,
    PasswordReset,
    EmailVerified,
    MfaEnabled,
    MfaDisabled,
    AccountLocked,
    SuspiciousActivity,
}

impl AuthEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventType::LoginSuccess => "login_success",
            AuthEventType::LoginFailed => "login_failed",
            AuthEventType::Logout => "logout",
            AuthEventType::TokenRefresh => "token_refresh",
            AuthEventType::PasswordReset => "password_reset",
            AuthEventType::EmailVerified => "email_verified",
            AuthEventType::MfaEnabled => "mfa_enabled",
            AuthEventType::MfaDisabled => "mfa_disabled",
            AuthEventType::AccountLocked => "account_locked",
            AuthEventType::SuspiciousActivity => "suspicious_activity",
        }
    }
}

/// One security event. Immutable once written; the engine never updates or
/// deletes rows in this log.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuthEvent {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub event_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

impl AuthEvent {
    pub fn new(
        event_type: AuthEventType,
        success: bool,
        account_id: Option<Uuid>,
        ip_address: Option<String>,
        user_agent: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            event_type: event_type.as_str().to_string(),
            ip_address,
            user_agent,
            metadata,
            success,
            created_at: Utc::now(),
        }
    }

    pub fn is_type(&self, event_type: AuthEventType) -> bool {
        self.event_type == event_type.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_round_trips_as_snake_case() {
        let event = AuthEvent::new(
            AuthEventType::SuspiciousActivity,
            false,
            Some(Uuid::new_v4()),
            Some("10.0.0.1".into()),
            None,
            Some(json!({"reason": "multiple ip addresses"})),
        );

        assert_eq!(event.event_type, "suspicious_activity");
        assert!(event.is_type(AuthEventType::SuspiciousActivity));
        assert!(!event.is_type(AuthEventType::LoginSuccess));
    }
}
