//! Login attempt model - persistent failure counter per identifier.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Failure counter for one identifier (an email or an IP address).
///
/// Rows are created on the first failure, incremented on each subsequent
/// failure, and deleted outright on a success for the identifier.
#[derive(Debug, Clone, FromRow)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub identifier: String,
    pub attempts: i32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn new(identifier: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            attempts: 1,
            blocked_until: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the identifier is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocked_until.is_some_and(|until| until > Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn block_state_is_derived() {
        let mut attempt = LoginAttempt::new("a@example.com".into());
        assert!(!attempt.is_blocked());

        attempt.blocked_until = Some(Utc::now() + Duration::minutes(15));
        assert!(attempt.is_blocked());

        attempt.blocked_until = Some(Utc::now() - Duration::seconds(1));
        assert!(!attempt.is_blocked());
    }
}
