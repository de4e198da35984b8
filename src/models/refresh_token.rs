//! Refresh token model - one row per issued opaque refresh secret.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored refresh token. Only the SHA-256 hash of the opaque secret is
/// persisted; the secret itself is handed to the caller once and never
/// written anywhere.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    /// Terminal once set; a revoked token is never un-revoked.
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        account_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            token_hash: Self::hash_token(token),
            expires_at,
            device_info,
            ip_address,
            revoked: false,
            created_at: Utc::now(),
        }
    }

    /// SHA-256 hex digest of a token value.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        !self.revoked && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn stores_hash_not_secret() {
        let token = RefreshToken::new(
            Uuid::new_v4(),
            "opaque-secret",
            Utc::now() + Duration::days(7),
            Some("cli".into()),
            Some("127.0.0.1".into()),
        );

        assert_ne!(token.token_hash, "opaque-secret");
        // SHA-256 hex digest is 64 characters
        assert_eq!(token.token_hash.len(), 64);
        assert_eq!(token.token_hash, RefreshToken::hash_token("opaque-secret"));
    }

    #[test]
    fn validity_tracks_expiry_and_revocation() {
        let mut token = RefreshToken::new(
            Uuid::new_v4(),
            "t",
            Utc::now() + Duration::days(7),
            None,
            None,
        );
        assert!(token.is_valid());

        token.revoked = true;
        assert!(!token.is_valid());

        token.revoked = false;
        token.expires_at = Utc::now() - Duration::seconds(1);
        assert!(token.is_expired());
        assert!(!token.is_valid());
    }
}
