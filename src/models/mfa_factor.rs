//! MFA factor model - enrolled second factors, one per (account, type).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Supported factor types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaType {
    Totp,
}

impl MfaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaType::Totp => "totp",
        }
    }
}

/// Enrolled factor. The secret and backup codes are stored only in their
/// AES-256-GCM encrypted form.
#[derive(Debug, Clone, FromRow)]
pub struct MfaFactor {
    pub id: Uuid,
    pub account_id: Uuid,
    pub factor_type: String,
    pub secret_enc: String,
    pub backup_codes_enc: Vec<String>,
    pub enabled: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MfaFactor {
    /// Create a pending (not yet verified) factor.
    pub fn new(
        account_id: Uuid,
        factor_type: MfaType,
        secret_enc: String,
        backup_codes_enc: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            factor_type: factor_type.as_str().to_string(),
            secret_enc,
            backup_codes_enc,
            enabled: false,
            verified_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_factor_starts_pending() {
        let factor = MfaFactor::new(
            Uuid::new_v4(),
            MfaType::Totp,
            "enc-secret".into(),
            vec!["enc-code".into()],
        );

        assert_eq!(factor.factor_type, "totp");
        assert!(!factor.enabled);
        assert!(factor.verified_at.is_none());
    }
}
