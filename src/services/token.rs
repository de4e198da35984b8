//! Access and refresh token lifecycle.
//!
//! Access tokens are short-lived signed claim sets whose hashes also live in
//! a TTL'd allow-list, so revocation takes effect before signature expiry.
//! Refresh tokens are opaque 256-bit secrets stored only as SHA-256 hashes.
//! Rotation is serialized by a compare-and-set on the stored revoked flag,
//! never by an in-process lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{parse_duration, JwtConfig};
use crate::models::{Account, RefreshToken};
use crate::services::error::AuthError;
use crate::services::jwt::JwtService;
use crate::stores::{AccountStore, CounterStore, RefreshTokenStore};

/// One issued session: a signed access token and an opaque refresh secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenService {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    accounts: Arc<dyn AccountStore>,
    counters: Arc<dyn CounterStore>,
    jwt: JwtService,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        accounts: Arc<dyn AccountStore>,
        counters: Arc<dyn CounterStore>,
        config: &JwtConfig,
    ) -> Result<Self, AuthError> {
        let refresh_ttl = parse_duration(&config.refresh_token_ttl)?;
        Ok(Self {
            refresh_tokens,
            accounts,
            counters,
            jwt: JwtService::new(config),
            refresh_ttl,
        })
    }

    /// Issue a fresh token pair for an account.
    ///
    /// The refresh-token row is persisted before the secret is handed back,
    /// so a caller can never hold a secret the store does not know about.
    pub async fn issue(
        &self,
        account: &Account,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> Result<TokenPair, AuthError> {
        let access_token = self.jwt.sign_access_token(account)?;
        let refresh_secret = generate_secure_token();

        let row = RefreshToken::new(
            account.id,
            &refresh_secret,
            Utc::now() + self.refresh_ttl,
            device_info,
            ip_address,
        );
        self.refresh_tokens.insert(&row).await?;

        self.counters
            .set_with_ttl(
                &access_token_key(account.id, &access_token),
                "valid",
                self.jwt.access_token_ttl_seconds() as u64,
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh_secret,
        })
    }

    /// Exchange a refresh token for a fresh pair, revoking the one
    /// presented.
    ///
    /// The revocation is a store-level compare-and-set: of N concurrent
    /// calls on one token, exactly one observes the transition and issues a
    /// pair; the rest fail `TokenInvalid`.
    pub async fn rotate(&self, refresh_token: &str) -> Result<(TokenPair, Uuid), AuthError> {
        let token_hash = RefreshToken::hash_token(refresh_token);

        let stored = self
            .refresh_tokens
            .find_active_by_hash(&token_hash)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if stored.is_expired() {
            return Err(AuthError::TokenInvalid);
        }

        if !self.refresh_tokens.revoke_by_hash(&token_hash).await? {
            // Lost the race: another rotation already consumed this token
            return Err(AuthError::TokenInvalid);
        }

        let account = self
            .accounts
            .find_by_id(stored.account_id)
            .await?
            .filter(|account| account.active)
            .ok_or(AuthError::TokenInvalid)?;

        let pair = self
            .issue(&account, stored.device_info, stored.ip_address)
            .await?;
        Ok((pair, account.id))
    }

    /// Revoke exactly the presented refresh token. Unknown or
    /// already-revoked tokens are a no-op.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        let token_hash = RefreshToken::hash_token(refresh_token);
        self.refresh_tokens.revoke_by_hash(&token_hash).await?;
        Ok(())
    }

    /// Revoke every refresh token and drop every access-token allow-list
    /// entry for the account, ending all sessions before natural expiry.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<(), AuthError> {
        let revoked = self.refresh_tokens.revoke_all_for_account(account_id).await?;

        let keys = self
            .counters
            .keys_with_prefix(&format!("access_token:{account_id}:"))
            .await?;
        for key in &keys {
            self.counters.delete(key).await?;
        }

        tracing::info!(
            account_id = %account_id,
            refresh_tokens = revoked,
            access_tokens = keys.len(),
            "Revoked all tokens for account"
        );
        Ok(())
    }

    /// Allow-list membership check for an access token.
    pub async fn is_access_token_valid(
        &self,
        token: &str,
        account_id: Uuid,
    ) -> Result<bool, AuthError> {
        Ok(self
            .counters
            .exists(&access_token_key(account_id, token))
            .await?)
    }

    /// Drop a single access token from the allow-list.
    pub async fn revoke_access_token(
        &self,
        token: &str,
        account_id: Uuid,
    ) -> Result<(), AuthError> {
        self.counters
            .delete(&access_token_key(account_id, token))
            .await?;
        Ok(())
    }
}

fn access_token_key(account_id: Uuid, token: &str) -> String {
    format!("access_token:{account_id}:{}", RefreshToken::hash_token(token))
}

/// 256-bit random opaque token, hex encoded (64 characters).
pub(crate) fn generate_secure_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryCounters, MemoryStores};

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-unit-tests-only!".into(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl: "7d".into(),
        }
    }

    async fn service_with_account() -> (TokenService, Arc<MemoryStores>, Account) {
        let stores = Arc::new(MemoryStores::new());
        let counters = Arc::new(MemoryCounters::new());
        let service =
            TokenService::new(stores.clone(), stores.clone(), counters, &jwt_config()).unwrap();

        let account = Account::new(
            "a@example.com".into(),
            "hash".into(),
            "Ada".into(),
            "Lovelace".into(),
        );
        AccountStore::insert(stores.as_ref(), &account).await.unwrap();

        (service, stores, account)
    }

    #[tokio::test]
    async fn issue_persists_only_the_refresh_hash() {
        let (service, stores, account) = service_with_account().await;

        let pair = service.issue(&account, Some("cli".into()), None).await.unwrap();
        assert_eq!(pair.refresh_token.len(), 64);
        assert!(pair.refresh_token.chars().all(|c| c.is_ascii_hexdigit()));

        let hash = RefreshToken::hash_token(&pair.refresh_token);
        let stored = stores.find_active_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(stored.account_id, account.id);
        assert_ne!(stored.token_hash, pair.refresh_token);

        assert!(service
            .is_access_token_valid(&pair.access_token, account.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rotation_consumes_the_presented_token() {
        let (service, _, account) = service_with_account().await;
        let pair = service.issue(&account, None, None).await.unwrap();

        let (next, owner) = service.rotate(&pair.refresh_token).await.unwrap();
        assert_eq!(owner, account.id);
        assert_ne!(next.refresh_token, pair.refresh_token);

        // The consumed token never rotates again
        let err = service.rotate(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));

        // The replacement still does
        assert!(service.rotate(&next.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_rotations_allow_exactly_one_winner() {
        let (service, _, account) = service_with_account().await;
        let pair = service.issue(&account, None, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(
                async move { service.rotate(&token).await.is_ok() },
            ));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn expired_refresh_token_does_not_rotate() {
        let (service, stores, account) = service_with_account().await;

        let secret = generate_secure_token();
        let row = RefreshToken::new(
            account.id,
            &secret,
            Utc::now() - Duration::seconds(1),
            None,
            None,
        );
        RefreshTokenStore::insert(stores.as_ref(), &row).await.unwrap();

        let err = service.rotate(&secret).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn unknown_refresh_token_does_not_rotate() {
        let (service, _, _) = service_with_account().await;
        let err = service.rotate("deadbeef").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn revoke_all_ends_every_session() {
        let (service, _, account) = service_with_account().await;

        let first = service.issue(&account, Some("laptop".into()), None).await.unwrap();
        let second = service.issue(&account, Some("phone".into()), None).await.unwrap();

        service.revoke_all(account.id).await.unwrap();

        assert!(matches!(
            service.rotate(&first.refresh_token).await.unwrap_err(),
            AuthError::TokenInvalid
        ));
        assert!(matches!(
            service.rotate(&second.refresh_token).await.unwrap_err(),
            AuthError::TokenInvalid
        ));
        assert!(!service
            .is_access_token_valid(&first.access_token, account.id)
            .await
            .unwrap());
        assert!(!service
            .is_access_token_valid(&second.access_token, account.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn revoke_targets_only_the_presented_token() {
        let (service, _, account) = service_with_account().await;

        let first = service.issue(&account, None, None).await.unwrap();
        let second = service.issue(&account, None, None).await.unwrap();

        service.revoke(&first.refresh_token).await.unwrap();

        assert!(matches!(
            service.rotate(&first.refresh_token).await.unwrap_err(),
            AuthError::TokenInvalid
        ));
        assert!(service.rotate(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn single_access_token_can_be_revoked() {
        let (service, _, account) = service_with_account().await;
        let pair = service.issue(&account, None, None).await.unwrap();

        service
            .revoke_access_token(&pair.access_token, account.id)
            .await
            .unwrap();
        assert!(!service
            .is_access_token_valid(&pair.access_token, account.id)
            .await
            .unwrap());
    }
}
