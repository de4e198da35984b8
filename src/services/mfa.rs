//! TOTP and backup-code multi-factor authentication.
//!
//! Secrets and backup codes are persisted only after authenticated
//! encryption; the plaintext values leave the engine exactly once, at
//! enrollment (and once more for backup codes, at activation).

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::models::{Account, AuthEvent, AuthEventType, MfaFactor, MfaType};
use crate::services::error::AuthError;
use crate::stores::{AuthEventStore, MfaFactorStore};
use crate::utils::SecretCipher;

const TOTP_STEP: u64 = 30;
const TOTP_DIGITS: usize = 6;
/// Accept codes up to two steps away from the current one (±60 s drift).
const TOTP_SKEW: u8 = 2;

const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LENGTH: usize = 8;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Plaintext enrollment material, returned once and never again.
#[derive(Debug, Serialize)]
pub struct TotpEnrollment {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TotpVerification {
    pub verified: bool,
    /// Present only on the verification that activates the factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_codes: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MfaStatus {
    pub enabled: bool,
    pub types: Vec<MfaType>,
}

#[derive(Clone)]
pub struct MfaService {
    factors: Arc<dyn MfaFactorStore>,
    events: Arc<dyn AuthEventStore>,
    cipher: SecretCipher,
    issuer: String,
}

impl MfaService {
    pub fn new(
        factors: Arc<dyn MfaFactorStore>,
        events: Arc<dyn AuthEventStore>,
        cipher: SecretCipher,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            factors,
            events,
            cipher,
            issuer: issuer.into(),
        }
    }

    /// Start TOTP enrollment: generate a secret and backup codes, persist
    /// them encrypted, and return the plaintext material one time.
    /// Re-enrolling a still-pending factor replaces its secret; an enabled
    /// factor must be disabled first.
    pub async fn enroll_totp(&self, account: &Account) -> Result<TotpEnrollment, AuthError> {
        let existing = self.factors.find(account.id, MfaType::Totp).await?;
        if existing.as_ref().is_some_and(|factor| factor.enabled) {
            return Err(AuthError::MfaAlreadyEnabled);
        }

        let secret = Secret::generate_secret().to_encoded().to_string();
        let backup_codes = generate_backup_codes();

        let secret_enc = self.cipher.encrypt(&secret)?;
        let backup_codes_enc = self.encrypt_codes(&backup_codes)?;

        match existing {
            Some(factor) => {
                self.factors
                    .update_secret(factor.id, &secret_enc, &backup_codes_enc)
                    .await?;
            }
            None => {
                let factor =
                    MfaFactor::new(account.id, MfaType::Totp, secret_enc, backup_codes_enc);
                self.factors.insert(&factor).await?;
            }
        }

        let provisioning_uri = self.build_totp(&secret, &account.email)?.get_url();

        Ok(TotpEnrollment {
            secret,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Verify a TOTP code within the ±2-step tolerance window. The first
    /// success activates the factor and returns the backup codes one final
    /// time.
    pub async fn verify_totp(
        &self,
        account: &Account,
        code: &str,
    ) -> Result<TotpVerification, AuthError> {
        let factor = self
            .factors
            .find(account.id, MfaType::Totp)
            .await?
            .ok_or(AuthError::MfaNotConfigured)?;

        let secret = self.cipher.decrypt(&factor.secret_enc)?;
        let totp = self.build_totp(&secret, &account.email)?;

        if !totp.check_current(code).unwrap_or(false) {
            return Ok(TotpVerification {
                verified: false,
                backup_codes: None,
            });
        }

        if !factor.enabled {
            self.factors.enable(factor.id, Utc::now()).await?;
            self.log_event(AuthEventType::MfaEnabled, account.id).await;

            let backup_codes = self.decrypt_codes(&factor.backup_codes_enc)?;
            return Ok(TotpVerification {
                verified: true,
                backup_codes: Some(backup_codes),
            });
        }

        Ok(TotpVerification {
            verified: true,
            backup_codes: None,
        })
    }

    /// Check a single-use backup code. A match removes the code from the
    /// stored list; no enabled factor or no match reads as a plain `false`.
    pub async fn verify_backup_code(
        &self,
        account: &Account,
        code: &str,
    ) -> Result<bool, AuthError> {
        let Some(factor) = self.factors.find(account.id, MfaType::Totp).await? else {
            return Ok(false);
        };
        if !factor.enabled {
            return Ok(false);
        }

        let mut matched = None;
        for (index, encrypted) in factor.backup_codes_enc.iter().enumerate() {
            if self.cipher.decrypt(encrypted)? == code {
                matched = Some(index);
                break;
            }
        }
        let Some(index) = matched else {
            return Ok(false);
        };

        let mut remaining = factor.backup_codes_enc.clone();
        remaining.remove(index);
        self.factors
            .update_backup_codes(factor.id, &remaining)
            .await?;

        Ok(true)
    }

    /// Remove the factor entirely.
    pub async fn disable(&self, account: &Account, factor_type: MfaType) -> Result<(), AuthError> {
        if !self.factors.delete(account.id, factor_type).await? {
            return Err(AuthError::MfaNotConfigured);
        }
        self.log_event(AuthEventType::MfaDisabled, account.id).await;
        Ok(())
    }

    /// Replace the backup-code list of an enabled factor, returning the new
    /// plaintext set once.
    pub async fn generate_new_backup_codes(
        &self,
        account: &Account,
    ) -> Result<Vec<String>, AuthError> {
        let factor = self
            .factors
            .find(account.id, MfaType::Totp)
            .await?
            .filter(|factor| factor.enabled)
            .ok_or(AuthError::MfaNotConfigured)?;

        let backup_codes = generate_backup_codes();
        let backup_codes_enc = self.encrypt_codes(&backup_codes)?;
        self.factors
            .update_backup_codes(factor.id, &backup_codes_enc)
            .await?;

        Ok(backup_codes)
    }

    pub async fn status(&self, account: &Account) -> Result<MfaStatus, AuthError> {
        let types: Vec<MfaType> = match self.factors.find(account.id, MfaType::Totp).await? {
            Some(factor) if factor.enabled => vec![MfaType::Totp],
            _ => Vec::new(),
        };
        Ok(MfaStatus {
            enabled: !types.is_empty(),
            types,
        })
    }

    fn build_totp(&self, secret: &str, account_name: &str) -> Result<TOTP, AuthError> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Store(anyhow!("invalid TOTP secret: {e:?}")))?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some(self.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| AuthError::Store(anyhow!("failed to build TOTP: {e}")))
    }

    fn encrypt_codes(&self, codes: &[String]) -> Result<Vec<String>, AuthError> {
        codes
            .iter()
            .map(|code| self.cipher.encrypt(code).map_err(AuthError::Store))
            .collect()
    }

    fn decrypt_codes(&self, encrypted: &[String]) -> Result<Vec<String>, AuthError> {
        encrypted
            .iter()
            .map(|code| self.cipher.decrypt(code).map_err(AuthError::Store))
            .collect()
    }

    async fn log_event(&self, event_type: AuthEventType, account_id: Uuid) {
        let event = AuthEvent::new(event_type, true, Some(account_id), None, None, None);
        if let Err(e) = self.events.insert(&event).await {
            tracing::error!(error = %e, event_type = %event.event_type, "Failed to write auth event");
        }
    }
}

fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            (0..BACKUP_CODE_LENGTH)
                .map(|_| BACKUP_CODE_ALPHABET[rng.gen_range(0..BACKUP_CODE_ALPHABET.len())] as char)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStores;

    fn service() -> (MfaService, Arc<MemoryStores>) {
        let stores = Arc::new(MemoryStores::new());
        let service = MfaService::new(
            stores.clone(),
            stores.clone(),
            SecretCipher::new([9u8; 32]),
            "auth-engine",
        );
        (service, stores)
    }

    fn account() -> Account {
        Account::new(
            "a@example.com".into(),
            "hash".into(),
            "Ada".into(),
            "Lovelace".into(),
        )
    }

    #[tokio::test]
    async fn enrollment_returns_plaintext_and_stores_ciphertext() {
        let (service, stores) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        assert_eq!(enrollment.backup_codes.len(), 10);
        assert!(enrollment
            .backup_codes
            .iter()
            .all(|code| code.len() == 8
                && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())));
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(enrollment.provisioning_uri.contains("issuer=auth-engine"));

        let factor = stores.find(account.id, MfaType::Totp).await.unwrap().unwrap();
        assert!(!factor.enabled);
        assert_ne!(factor.secret_enc, enrollment.secret);
        for (stored, plain) in factor.backup_codes_enc.iter().zip(&enrollment.backup_codes) {
            assert_ne!(stored, plain);
        }
    }

    #[tokio::test]
    async fn reenrolling_pending_factor_replaces_the_secret() {
        let (service, stores) = service();
        let account = account();

        let first = service.enroll_totp(&account).await.unwrap();
        let second = service.enroll_totp(&account).await.unwrap();
        assert_ne!(first.secret, second.secret);

        let factor = stores.find(account.id, MfaType::Totp).await.unwrap().unwrap();
        let decrypted = service.cipher.decrypt(&factor.secret_enc).unwrap();
        assert_eq!(decrypted, second.secret);
    }

    #[tokio::test]
    async fn first_verification_enables_and_returns_backup_codes() {
        let (service, stores) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();
        let code = totp.generate_current().unwrap();

        let result = service.verify_totp(&account, &code).await.unwrap();
        assert!(result.verified);
        assert_eq!(result.backup_codes, Some(enrollment.backup_codes));

        let factor = stores.find(account.id, MfaType::Totp).await.unwrap().unwrap();
        assert!(factor.enabled);
        assert!(factor.verified_at.is_some());
        assert!(stores
            .events()
            .unwrap()
            .iter()
            .any(|e| e.is_type(AuthEventType::MfaEnabled)));

        // Later verifications no longer reveal the codes
        let code = totp.generate_current().unwrap();
        let result = service.verify_totp(&account, &code).await.unwrap();
        assert!(result.verified);
        assert!(result.backup_codes.is_none());
    }

    #[tokio::test]
    async fn wrong_code_does_not_verify() {
        let (service, stores) = service();
        let account = account();

        service.enroll_totp(&account).await.unwrap();
        let result = service.verify_totp(&account, "000000").await.unwrap();
        assert!(!result.verified);

        let factor = stores.find(account.id, MfaType::Totp).await.unwrap().unwrap();
        assert!(!factor.enabled);
    }

    #[tokio::test]
    async fn totp_window_spans_two_steps_each_way() {
        let (service, _) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();

        // Step-aligned reference time
        let t = 1_700_000_010u64;
        let code = totp.generate(t);

        assert!(totp.check(&code, t));
        assert!(totp.check(&code, t + 30));
        assert!(totp.check(&code, t + 60));
        assert!(totp.check(&code, t - 30));
        assert!(totp.check(&code, t - 60));
        assert!(!totp.check(&code, t + 90));
    }

    #[tokio::test]
    async fn enabled_factor_rejects_reenrollment() {
        let (service, _) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();
        let code = totp.generate_current().unwrap();
        service.verify_totp(&account, &code).await.unwrap();

        let err = service.enroll_totp(&account).await.unwrap_err();
        assert!(matches!(err, AuthError::MfaAlreadyEnabled));
    }

    #[tokio::test]
    async fn backup_codes_are_single_use() {
        let (service, _) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();
        let code = totp.generate_current().unwrap();
        service.verify_totp(&account, &code).await.unwrap();

        let backup = enrollment.backup_codes[0].clone();
        assert!(service.verify_backup_code(&account, &backup).await.unwrap());
        assert!(!service.verify_backup_code(&account, &backup).await.unwrap());

        // The other codes are unaffected
        let other = enrollment.backup_codes[1].clone();
        assert!(service.verify_backup_code(&account, &other).await.unwrap());
    }

    #[tokio::test]
    async fn backup_codes_require_an_enabled_factor() {
        let (service, _) = service();
        let account = account();

        // No factor at all
        assert!(!service.verify_backup_code(&account, "ABCD1234").await.unwrap());

        // Pending factor is not enough
        let enrollment = service.enroll_totp(&account).await.unwrap();
        let backup = enrollment.backup_codes[0].clone();
        assert!(!service.verify_backup_code(&account, &backup).await.unwrap());
    }

    #[tokio::test]
    async fn disable_removes_the_factor() {
        let (service, stores) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();
        let code = totp.generate_current().unwrap();
        service.verify_totp(&account, &code).await.unwrap();

        service.disable(&account, MfaType::Totp).await.unwrap();
        assert!(stores.find(account.id, MfaType::Totp).await.unwrap().is_none());
        assert!(stores
            .events()
            .unwrap()
            .iter()
            .any(|e| e.is_type(AuthEventType::MfaDisabled)));

        let err = service.disable(&account, MfaType::Totp).await.unwrap_err();
        assert!(matches!(err, AuthError::MfaNotConfigured));
    }

    #[tokio::test]
    async fn regenerating_backup_codes_invalidates_the_old_set() {
        let (service, _) = service();
        let account = account();

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();
        let code = totp.generate_current().unwrap();
        service.verify_totp(&account, &code).await.unwrap();

        let fresh = service.generate_new_backup_codes(&account).await.unwrap();
        assert_eq!(fresh.len(), 10);

        let old = enrollment.backup_codes[0].clone();
        assert!(!service.verify_backup_code(&account, &old).await.unwrap());
        assert!(service.verify_backup_code(&account, &fresh[0]).await.unwrap());
    }

    #[tokio::test]
    async fn regeneration_requires_an_enabled_factor() {
        let (service, _) = service();
        let account = account();

        let err = service.generate_new_backup_codes(&account).await.unwrap_err();
        assert!(matches!(err, AuthError::MfaNotConfigured));

        service.enroll_totp(&account).await.unwrap();
        let err = service.generate_new_backup_codes(&account).await.unwrap_err();
        assert!(matches!(err, AuthError::MfaNotConfigured));
    }

    #[tokio::test]
    async fn status_reflects_enabled_factors() {
        let (service, _) = service();
        let account = account();

        let status = service.status(&account).await.unwrap();
        assert!(!status.enabled);
        assert!(status.types.is_empty());

        let enrollment = service.enroll_totp(&account).await.unwrap();
        let totp = service.build_totp(&enrollment.secret, &account.email).unwrap();
        let code = totp.generate_current().unwrap();
        service.verify_totp(&account, &code).await.unwrap();

        let status = service.status(&account).await.unwrap();
        assert!(status.enabled);
        assert_eq!(status.types, vec![MfaType::Totp]);
    }
}
