//! In-memory store implementations for tests and local development.
//!
//! Each map is guarded by one mutex, which makes every trait operation
//! atomic in-process; the compare-and-set and increment guarantees match
//! what the Postgres and Redis backends enforce.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Account, AuthEvent, AuthEventType, LoginAttempt, MfaFactor, MfaType, RefreshToken};
use crate::stores::{
    AccountStore, AuthEventStore, CounterStore, LoginAttemptStore, MfaFactorStore,
    RefreshTokenStore,
};

fn guard<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|e| anyhow!("{what} mutex poisoned: {e}"))
}

/// In-memory durable record store.
#[derive(Default)]
pub struct MemoryStores {
    accounts: Mutex<HashMap<Uuid, Account>>,
    refresh_tokens: Mutex<HashMap<String, RefreshToken>>,
    auth_events: Mutex<Vec<AuthEvent>>,
    login_attempts: Mutex<HashMap<String, LoginAttempt>>,
    mfa_factors: Mutex<HashMap<(Uuid, String), MfaFactor>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first. Test helper.
    pub fn events(&self) -> Result<Vec<AuthEvent>> {
        Ok(guard(&self.auth_events, "auth events")?.clone())
    }
}

#[async_trait]
impl AccountStore for MemoryStores {
    async fn insert(&self, account: &Account) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            return Err(anyhow!("duplicate email"));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(guard(&self.accounts, "accounts")?.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(guard(&self.accounts, "accounts")?
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_verification_token(&self, token: &str) -> Result<Option<Account>> {
        Ok(guard(&self.accounts, "accounts")?
            .values()
            .find(|a| a.email_verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<Account>> {
        Ok(guard(&self.accounts, "accounts")?
            .values()
            .find(|a| a.password_reset_token.as_deref() == Some(token))
            .cloned())
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token: &str,
        expires: DateTime<Utc>,
    ) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if let Some(account) = accounts.get_mut(&id) {
            account.email_verification_token = Some(token.to_string());
            account.email_verification_expires = Some(expires);
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_verified(&self, id: Uuid) -> Result<bool> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        match accounts.get_mut(&id) {
            Some(account) => {
                account.verified = true;
                account.email_verification_token = None;
                account.email_verification_expires = None;
                account.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_reset_token(&self, id: Uuid, token: &str, expires: DateTime<Utc>) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if let Some(account) = accounts.get_mut(&id) {
            account.password_reset_token = Some(token.to_string());
            account.password_reset_expires = Some(expires);
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if let Some(account) = accounts.get_mut(&id) {
            account.password_hash = password_hash.to_string();
            account.password_reset_token = None;
            account.password_reset_expires = None;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_failed_logins(&self, id: Uuid) -> Result<i32> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("account not found"))?;
        account.failed_login_attempts += 1;
        account.updated_at = Utc::now();
        Ok(account.failed_login_attempts)
    }

    async fn lock(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if let Some(account) = accounts.get_mut(&id) {
            account.locked_until = Some(until);
            account.failed_login_attempts = 0;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn clear_failed_logins(&self, id: Uuid) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if let Some(account) = accounts.get_mut(&id) {
            account.failed_login_attempts = 0;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<()> {
        let mut accounts = guard(&self.accounts, "accounts")?;
        if let Some(account) = accounts.get_mut(&id) {
            account.last_login = Some(Utc::now());
            account.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStores {
    async fn insert(&self, token: &RefreshToken) -> Result<()> {
        let mut tokens = guard(&self.refresh_tokens, "refresh tokens")?;
        if tokens.contains_key(&token.token_hash) {
            return Err(anyhow!("duplicate token hash"));
        }
        tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_active_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>> {
        Ok(guard(&self.refresh_tokens, "refresh tokens")?
            .get(token_hash)
            .filter(|t| !t.revoked)
            .cloned())
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool> {
        let mut tokens = guard(&self.refresh_tokens, "refresh tokens")?;
        match tokens.get_mut(token_hash) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64> {
        let mut tokens = guard(&self.refresh_tokens, "refresh tokens")?;
        let mut revoked = 0;
        for token in tokens.values_mut() {
            if token.account_id == account_id && !token.revoked {
                token.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl AuthEventStore for MemoryStores {
    async fn insert(&self, event: &AuthEvent) -> Result<()> {
        guard(&self.auth_events, "auth events")?.push(event.clone());
        Ok(())
    }

    async fn recent_by_type(
        &self,
        account_id: Uuid,
        event_type: AuthEventType,
        limit: i64,
    ) -> Result<Vec<AuthEvent>> {
        Ok(guard(&self.auth_events, "auth events")?
            .iter()
            .rev()
            .filter(|e| e.account_id == Some(account_id) && e.is_type(event_type))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn for_account_since(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>> {
        Ok(guard(&self.auth_events, "auth events")?
            .iter()
            .rev()
            .filter(|e| e.account_id == Some(account_id) && e.created_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LoginAttemptStore for MemoryStores {
    async fn increment(&self, identifier: &str) -> Result<LoginAttempt> {
        let mut attempts = guard(&self.login_attempts, "login attempts")?;
        let attempt = attempts
            .entry(identifier.to_string())
            .and_modify(|a| a.attempts += 1)
            .or_insert_with(|| LoginAttempt::new(identifier.to_string()));
        Ok(attempt.clone())
    }

    async fn set_blocked_until(&self, identifier: &str, until: DateTime<Utc>) -> Result<()> {
        let mut attempts = guard(&self.login_attempts, "login attempts")?;
        if let Some(attempt) = attempts.get_mut(identifier) {
            attempt.blocked_until = Some(until);
        }
        Ok(())
    }

    async fn find(&self, identifier: &str) -> Result<Option<LoginAttempt>> {
        Ok(guard(&self.login_attempts, "login attempts")?
            .get(identifier)
            .cloned())
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        guard(&self.login_attempts, "login attempts")?.remove(identifier);
        Ok(())
    }
}

#[async_trait]
impl MfaFactorStore for MemoryStores {
    async fn insert(&self, factor: &MfaFactor) -> Result<()> {
        let mut factors = guard(&self.mfa_factors, "mfa factors")?;
        let key = (factor.account_id, factor.factor_type.clone());
        if factors.contains_key(&key) {
            return Err(anyhow!("factor already enrolled"));
        }
        factors.insert(key, factor.clone());
        Ok(())
    }

    async fn find(&self, account_id: Uuid, factor_type: MfaType) -> Result<Option<MfaFactor>> {
        Ok(guard(&self.mfa_factors, "mfa factors")?
            .get(&(account_id, factor_type.as_str().to_string()))
            .cloned())
    }

    async fn update_secret(
        &self,
        id: Uuid,
        secret_enc: &str,
        backup_codes_enc: &[String],
    ) -> Result<()> {
        let mut factors = guard(&self.mfa_factors, "mfa factors")?;
        if let Some(factor) = factors.values_mut().find(|f| f.id == id) {
            factor.secret_enc = secret_enc.to_string();
            factor.backup_codes_enc = backup_codes_enc.to_vec();
        }
        Ok(())
    }

    async fn enable(&self, id: Uuid, verified_at: DateTime<Utc>) -> Result<()> {
        let mut factors = guard(&self.mfa_factors, "mfa factors")?;
        if let Some(factor) = factors.values_mut().find(|f| f.id == id) {
            factor.enabled = true;
            factor.verified_at = Some(verified_at);
        }
        Ok(())
    }

    async fn update_backup_codes(&self, id: Uuid, backup_codes_enc: &[String]) -> Result<()> {
        let mut factors = guard(&self.mfa_factors, "mfa factors")?;
        if let Some(factor) = factors.values_mut().find(|f| f.id == id) {
            factor.backup_codes_enc = backup_codes_enc.to_vec();
        }
        Ok(())
    }

    async fn delete(&self, account_id: Uuid, factor_type: MfaType) -> Result<bool> {
        let mut factors = guard(&self.mfa_factors, "mfa factors")?;
        Ok(factors
            .remove(&(account_id, factor_type.as_str().to_string()))
            .is_some())
    }
}

struct CounterEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory counter / allow-list store with TTL semantics.
#[derive(Default)]
pub struct MemoryCounters {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = guard(&self.entries, "counters")?;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        guard(&self.entries, "counters")?.insert(
            key.to_string(),
            CounterEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn increment_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64> {
        let mut entries = guard(&self.entries, "counters")?;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                let count = entry.value.parse::<i64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    CounterEntry {
                        value: "1".to_string(),
                        expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        guard(&self.entries, "counters")?.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = guard(&self.entries, "counters")?;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = guard(&self.entries, "counters")?;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revoke_by_hash_is_a_one_way_cas() {
        let stores = MemoryStores::new();
        let token = RefreshToken::new(
            Uuid::new_v4(),
            "secret",
            Utc::now() + chrono::Duration::days(1),
            None,
            None,
        );
        RefreshTokenStore::insert(&stores, &token).await.unwrap();

        assert!(stores.revoke_by_hash(&token.token_hash).await.unwrap());
        // Second transition attempt loses
        assert!(!stores.revoke_by_hash(&token.token_hash).await.unwrap());
        assert!(stores
            .find_active_by_hash(&token.token_hash)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn counter_window_expires() {
        let counters = MemoryCounters::new();
        assert_eq!(counters.increment_with_ttl("k", 1).await.unwrap(), 1);
        assert_eq!(counters.increment_with_ttl("k", 1).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        // New window starts at 1 after the TTL elapses
        assert_eq!(counters.increment_with_ttl("k", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prefix_listing_skips_expired_entries() {
        let counters = MemoryCounters::new();
        counters.set_with_ttl("access_token:a:1", "valid", 60).await.unwrap();
        counters.set_with_ttl("access_token:a:2", "valid", 60).await.unwrap();
        counters.set_with_ttl("access_token:b:1", "valid", 60).await.unwrap();

        let mut keys = counters.keys_with_prefix("access_token:a:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["access_token:a:1", "access_token:a:2"]);
    }
}
