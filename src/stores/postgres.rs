//! PostgreSQL implementations of the durable record stores.
//!
//! Conditional updates carry their guard in the WHERE clause and report
//! success through `rows_affected`, so the compare-and-set semantics the
//! engine relies on are enforced by the database, not by process-local
//! locking. Schema management is owned by the deployment, not this crate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{Account, AuthEvent, AuthEventType, LoginAttempt, MfaFactor, MfaType, RefreshToken};
use crate::stores::{
    AccountStore, AuthEventStore, LoginAttemptStore, MfaFactorStore, RefreshTokenStore,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                anyhow!("database health check failed: {e}")
            })?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for Database {
    async fn insert(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, email, password_hash, first_name, last_name, verified, active,
                last_login, failed_login_attempts, locked_until,
                email_verification_token, email_verification_expires,
                password_reset_token, password_reset_expires,
                roles, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.verified)
        .bind(account.active)
        .bind(account.last_login)
        .bind(account.failed_login_attempts)
        .bind(account.locked_until)
        .bind(&account.email_verification_token)
        .bind(account.email_verification_expires)
        .bind(&account.password_reset_token)
        .bind(account.password_reset_expires)
        .bind(&account.roles)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))
    }

    async fn find_by_verification_token(&self, token: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email_verification_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE password_reset_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET email_verification_token = $1, email_verification_expires = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(token)
        .bind(expires)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn mark_verified(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET verified = TRUE,
                email_verification_token = NULL,
                email_verification_expires = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_reset_token(&self, id: Uuid, token: &str, expires: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET password_reset_token = $1, password_reset_expires = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(token)
        .bind(expires)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $1,
                password_reset_token = NULL,
                password_reset_expires = NULL,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn increment_failed_logins(&self, id: Uuid) -> Result<i32> {
        let (count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE accounts
            SET failed_login_attempts = failed_login_attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(count)
    }

    async fn lock(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET locked_until = $1, failed_login_attempts = 0, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(until)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn clear_failed_logins(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET failed_login_attempts = 0, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE accounts SET last_login = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for Database {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (
                id, account_id, token_hash, expires_at, device_info, ip_address, revoked, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.id)
        .bind(token.account_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(&token.device_info)
        .bind(&token.ip_address)
        .bind(token.revoked)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn find_active_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM refresh_tokens WHERE token_hash = $1 AND revoked = FALSE",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool> {
        // The revoked = FALSE guard makes this a compare-and-set: concurrent
        // callers race on one row and the database picks a single winner.
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE token_hash = $1 AND revoked = FALSE",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE account_id = $1 AND revoked = FALSE",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthEventStore for Database {
    async fn insert(&self, event: &AuthEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auth_events (
                id, account_id, event_type, ip_address, user_agent, metadata, success, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.account_id)
        .bind(&event.event_type)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.metadata)
        .bind(event.success)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn recent_by_type(
        &self,
        account_id: Uuid,
        event_type: AuthEventType,
        limit: i64,
    ) -> Result<Vec<AuthEvent>> {
        sqlx::query_as::<_, AuthEvent>(
            r#"
            SELECT * FROM auth_events
            WHERE account_id = $1 AND event_type = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(account_id)
        .bind(event_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))
    }

    async fn for_account_since(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>> {
        sqlx::query_as::<_, AuthEvent>(
            r#"
            SELECT * FROM auth_events
            WHERE account_id = $1 AND created_at >= $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))
    }
}

#[async_trait]
impl LoginAttemptStore for Database {
    async fn increment(&self, identifier: &str) -> Result<LoginAttempt> {
        // Upsert keeps the increment a single statement so concurrent
        // failures for one identifier never lose counts.
        sqlx::query_as::<_, LoginAttempt>(
            r#"
            INSERT INTO login_attempts (id, identifier, attempts, blocked_until, created_at)
            VALUES ($1, $2, 1, NULL, NOW())
            ON CONFLICT (identifier)
            DO UPDATE SET attempts = login_attempts.attempts + 1
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(identifier)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))
    }

    async fn set_blocked_until(&self, identifier: &str, until: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE login_attempts SET blocked_until = $1 WHERE identifier = $2")
            .bind(until)
            .bind(identifier)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn find(&self, identifier: &str) -> Result<Option<LoginAttempt>> {
        sqlx::query_as::<_, LoginAttempt>("SELECT * FROM login_attempts WHERE identifier = $1")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow!(e))
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        sqlx::query("DELETE FROM login_attempts WHERE identifier = $1")
            .bind(identifier)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

#[async_trait]
impl MfaFactorStore for Database {
    async fn insert(&self, factor: &MfaFactor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_factors (
                id, account_id, factor_type, secret_enc, backup_codes_enc,
                enabled, verified_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(factor.id)
        .bind(factor.account_id)
        .bind(&factor.factor_type)
        .bind(&factor.secret_enc)
        .bind(&factor.backup_codes_enc)
        .bind(factor.enabled)
        .bind(factor.verified_at)
        .bind(factor.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn find(&self, account_id: Uuid, factor_type: MfaType) -> Result<Option<MfaFactor>> {
        sqlx::query_as::<_, MfaFactor>(
            "SELECT * FROM mfa_factors WHERE account_id = $1 AND factor_type = $2",
        )
        .bind(account_id)
        .bind(factor_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))
    }

    async fn update_secret(
        &self,
        id: Uuid,
        secret_enc: &str,
        backup_codes_enc: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE mfa_factors SET secret_enc = $1, backup_codes_enc = $2 WHERE id = $3")
            .bind(secret_enc)
            .bind(backup_codes_enc)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn enable(&self, id: Uuid, verified_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE mfa_factors SET enabled = TRUE, verified_at = $1 WHERE id = $2")
            .bind(verified_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn update_backup_codes(&self, id: Uuid, backup_codes_enc: &[String]) -> Result<()> {
        sqlx::query("UPDATE mfa_factors SET backup_codes_enc = $1 WHERE id = $2")
            .bind(backup_codes_enc)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn delete(&self, account_id: Uuid, factor_type: MfaType) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM mfa_factors WHERE account_id = $1 AND factor_type = $2",
        )
        .bind(account_id)
        .bind(factor_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }
}
