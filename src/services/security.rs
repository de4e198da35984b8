//! Security primitives: rate limiting, lockout, suspicious-activity
//! detection, and the auth event log.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::models::{Account, AuthEvent, AuthEventType, LoginAttempt};
use crate::services::error::AuthError;
use crate::stores::{AuthEventStore, CounterStore, LoginAttemptStore};

/// Aggregate view over an account's recent auth events.
#[derive(Debug, Serialize)]
pub struct SecuritySummary {
    pub total_events: usize,
    pub successful_logins: usize,
    pub failed_logins: usize,
    pub unique_ips: usize,
    pub suspicious_activities: usize,
    pub recent_events: Vec<AuthEvent>,
}

#[derive(Clone)]
pub struct SecurityService {
    events: Arc<dyn AuthEventStore>,
    attempts: Arc<dyn LoginAttemptStore>,
    counters: Arc<dyn CounterStore>,
    lockout_threshold: i32,
    lockout: Duration,
}

impl SecurityService {
    pub fn new(
        events: Arc<dyn AuthEventStore>,
        attempts: Arc<dyn LoginAttemptStore>,
        counters: Arc<dyn CounterStore>,
        config: &SecurityConfig,
    ) -> Self {
        Self {
            events,
            attempts,
            counters,
            lockout_threshold: config.max_failed_logins as i32,
            lockout: Duration::minutes(config.lockout_minutes),
        }
    }

    /// Append an auth event. Best-effort: a write failure is logged and
    /// swallowed so it can never mask the error being reported.
    pub async fn log_event(
        &self,
        event_type: AuthEventType,
        success: bool,
        account_id: Option<Uuid>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = AuthEvent::new(
            event_type,
            success,
            account_id,
            ip_address.map(str::to_string),
            user_agent.map(str::to_string),
            metadata,
        );

        if let Err(e) = self.events.insert(&event).await {
            tracing::error!(
                error = %e,
                event_type = %event.event_type,
                "Failed to write auth event"
            );
        }
    }

    /// Fixed-window rate limiter. One atomic increment per call; allowed
    /// while the post-increment count stays within `max_attempts`. A new
    /// window starts only once the TTL expires.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        max_attempts: u32,
        window_seconds: u64,
    ) -> Result<bool, AuthError> {
        let key = format!("rate_limit:{identifier}");
        let count = self.counters.increment_with_ttl(&key, window_seconds).await?;
        Ok(count <= i64::from(max_attempts))
    }

    /// Record a failed attempt against an identifier (email or IP). The
    /// lockout threshold sets a block for the configured duration.
    pub async fn record_failure(&self, identifier: &str) -> Result<LoginAttempt, AuthError> {
        let mut attempt = self.attempts.increment(identifier).await?;

        if attempt.attempts >= self.lockout_threshold && !attempt.is_blocked() {
            let until = Utc::now() + self.lockout;
            self.attempts.set_blocked_until(identifier, until).await?;
            attempt.blocked_until = Some(until);
            tracing::warn!(
                identifier = %identifier,
                attempts = attempt.attempts,
                "Identifier blocked after repeated failures"
            );
        }

        Ok(attempt)
    }

    pub async fn is_blocked(&self, identifier: &str) -> Result<bool, AuthError> {
        Ok(self
            .attempts
            .find(identifier)
            .await?
            .is_some_and(|attempt| attempt.is_blocked()))
    }

    /// Drop the failure counter for an identifier, typically on a success.
    pub async fn clear_attempts(&self, identifier: &str) -> Result<(), AuthError> {
        self.attempts.delete(identifier).await?;
        Ok(())
    }

    /// Scan the most recent successful logins for the account; more than
    /// three distinct IPs flags the account and writes a suspicious-activity
    /// event. Observational only: the caller decides nothing on the result.
    pub async fn detect_suspicious_activity(
        &self,
        account: &Account,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<bool, AuthError> {
        let recent = self
            .events
            .recent_by_type(account.id, AuthEventType::LoginSuccess, 10)
            .await?;

        let unique_ips: BTreeSet<&str> = recent
            .iter()
            .filter_map(|event| event.ip_address.as_deref())
            .collect();

        if unique_ips.len() > 3 {
            self.log_event(
                AuthEventType::SuspiciousActivity,
                false,
                Some(account.id),
                ip_address,
                user_agent,
                Some(json!({
                    "reason": "Multiple IP addresses",
                    "unique_ips": unique_ips.iter().collect::<Vec<_>>(),
                })),
            )
            .await;
            return Ok(true);
        }

        Ok(false)
    }

    /// Most recent events for an account, newest first.
    pub async fn recent_events(
        &self,
        account_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuthEvent>, AuthError> {
        let mut events = self
            .events
            .for_account_since(account_id, DateTime::<Utc>::MIN_UTC)
            .await?;
        events.truncate(limit);
        Ok(events)
    }

    /// Aggregate security metrics over the trailing `days`.
    pub async fn security_summary(
        &self,
        account_id: Uuid,
        days: i64,
    ) -> Result<SecuritySummary, AuthError> {
        let since = Utc::now() - Duration::days(days);
        let events = self.events.for_account_since(account_id, since).await?;

        let unique_ips: BTreeSet<&str> = events
            .iter()
            .filter_map(|event| event.ip_address.as_deref())
            .collect();

        Ok(SecuritySummary {
            total_events: events.len(),
            successful_logins: events
                .iter()
                .filter(|e| e.is_type(AuthEventType::LoginSuccess))
                .count(),
            failed_logins: events
                .iter()
                .filter(|e| e.is_type(AuthEventType::LoginFailed))
                .count(),
            unique_ips: unique_ips.len(),
            suspicious_activities: events
                .iter()
                .filter(|e| e.is_type(AuthEventType::SuspiciousActivity))
                .count(),
            recent_events: events.into_iter().take(20).collect(),
        })
    }
}
