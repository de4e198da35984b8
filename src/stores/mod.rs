//! Store handles consumed by the engine.
//!
//! Every component receives its stores as `Arc<dyn Trait>` at construction;
//! there is no globally reachable client state. Two backends ship with the
//! crate: Postgres + Redis for production and mutex-guarded in-memory
//! implementations for tests and local development.
//!
//! Atomicity requirements live at this seam, not in the services: the
//! counter increment, the failed-login increments, and the refresh-token
//! revocation are each a single store operation.

mod memory;
mod postgres;
mod redis;

pub use memory::{MemoryCounters, MemoryStores};
pub use postgres::Database;
pub use redis::RedisCounters;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Account, AuthEvent, AuthEventType, LoginAttempt, MfaFactor, MfaType, RefreshToken};

/// Durable account records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: &Account) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn find_by_verification_token(&self, token: &str) -> Result<Option<Account>>;
    async fn find_by_reset_token(&self, token: &str) -> Result<Option<Account>>;

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: DateTime<Utc>,
    ) -> Result<()>;

    /// Set `verified = true` and clear the verification token fields.
    /// Returns false when the account does not exist.
    async fn mark_verified(&self, id: Uuid) -> Result<bool>;

    async fn set_reset_token(&self, id: Uuid, token: &str, expires: DateTime<Utc>) -> Result<()>;

    /// Replace the password hash and clear any pending reset token.
    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Atomically increment the failed-login counter, returning the
    /// post-increment value. Must be a single conditional update so
    /// concurrent failures cannot lose increments.
    async fn increment_failed_logins(&self, id: Uuid) -> Result<i32>;

    /// Set the lock expiry and zero the failed-login counter in one update.
    async fn lock(&self, id: Uuid, until: DateTime<Utc>) -> Result<()>;

    async fn clear_failed_logins(&self, id: Uuid) -> Result<()>;
    async fn touch_last_login(&self, id: Uuid) -> Result<()>;
}

/// Durable refresh-token records.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: &RefreshToken) -> Result<()>;

    /// Look up a token by hash, excluding revoked rows.
    async fn find_active_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>>;

    /// Compare-and-set `revoked = false -> true` for the hash. Returns true
    /// iff this call performed the transition; of N concurrent calls on one
    /// token exactly one observes true.
    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool>;

    /// Revoke every token owned by the account; returns how many rows
    /// transitioned.
    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64>;
}

/// Append-only auth event log.
#[async_trait]
pub trait AuthEventStore: Send + Sync {
    async fn insert(&self, event: &AuthEvent) -> Result<()>;

    /// Most recent events of one type for an account, newest first.
    async fn recent_by_type(
        &self,
        account_id: Uuid,
        event_type: AuthEventType,
        limit: i64,
    ) -> Result<Vec<AuthEvent>>;

    /// Events for an account since a timestamp, newest first.
    async fn for_account_since(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>>;
}

/// Persistent lockout counters keyed by identifier (email or IP).
#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    /// Atomic upsert-increment: create the row at 1 or add 1, returning the
    /// updated row.
    async fn increment(&self, identifier: &str) -> Result<LoginAttempt>;

    async fn set_blocked_until(&self, identifier: &str, until: DateTime<Utc>) -> Result<()>;
    async fn find(&self, identifier: &str) -> Result<Option<LoginAttempt>>;
    async fn delete(&self, identifier: &str) -> Result<()>;
}

/// Enrolled MFA factors.
#[async_trait]
pub trait MfaFactorStore: Send + Sync {
    async fn insert(&self, factor: &MfaFactor) -> Result<()>;
    async fn find(&self, account_id: Uuid, factor_type: MfaType) -> Result<Option<MfaFactor>>;

    /// Replace the secret and backup codes of a pending factor (re-enroll).
    async fn update_secret(
        &self,
        id: Uuid,
        secret_enc: &str,
        backup_codes_enc: &[String],
    ) -> Result<()>;

    async fn enable(&self, id: Uuid, verified_at: DateTime<Utc>) -> Result<()>;
    async fn update_backup_codes(&self, id: Uuid, backup_codes_enc: &[String]) -> Result<()>;

    /// Delete the factor; returns false when none existed.
    async fn delete(&self, account_id: Uuid, factor_type: MfaType) -> Result<bool>;
}

/// Fast counter / allow-list store with TTL semantics.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    /// Atomic fixed-window increment: the first call of a window creates the
    /// key at 1 with the TTL; later calls within the live window increment
    /// without touching the TTL. Returns the post-increment count.
    async fn increment_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64>;

    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
