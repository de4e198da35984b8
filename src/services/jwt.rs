//! Access-token signing and validation.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::models::Account;

/// Signs and validates HS256 access tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_ttl_minutes: i64,
}

/// Access-token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (account ID)
    pub sub: String,
    pub email: String,
    pub roles: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_token_ttl_minutes: config.access_token_ttl_minutes,
        }
    }

    /// Sign an access token for an account.
    pub fn sign_access_token(&self, account: &Account) -> Result<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            roles: account.roles.clone(),
            exp: (now + Duration::minutes(self.access_token_ttl_minutes)).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("failed to encode access token: {e}"))
    }

    /// Validate signature and expiry, returning the claims.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow!("invalid access token: {e}"))
    }

    pub fn access_token_ttl_minutes(&self) -> i64 {
        self.access_token_ttl_minutes
    }

    /// Access token TTL in seconds, for allow-list entries and client info.
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-unit-tests-only!".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl: "7d".to_string(),
        }
    }

    fn test_account() -> Account {
        let mut account = Account::new(
            "test@example.com".into(),
            "hash".into(),
            "Test".into(),
            "User".into(),
        );
        account.roles = vec!["user".into(), "admin".into()];
        account
    }

    #[test]
    fn sign_and_validate_round_trip() {
        let service = JwtService::new(&test_config());
        let account = test_account();

        let token = service.sign_access_token(&account).unwrap();
        assert!(!token.is_empty());

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, account.id.to_string());
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.roles, vec!["user".to_string(), "admin".to_string()]);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let service = JwtService::new(&test_config());
        let other = JwtService::new(&JwtConfig {
            secret: "a-completely-different-secret-value!".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl: "7d".to_string(),
        });

        let token = other.sign_access_token(&test_account()).unwrap();
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let service = JwtService::new(&test_config());
        assert!(service.validate_access_token("not.a.jwt").is_err());
    }
}
