//! Auth orchestrator: register, login, logout, and password-reset flows.
//!
//! Composes the validator, lockout guard, rate limiter, token issuer, and
//! mail sender with fixed ordering and side-effect guarantees. Failures are
//! mapped to caller-visible outcomes here; detail is suppressed wherever it
//! would widen an account-enumeration channel.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::config::RateLimitConfig;
use crate::dtos::auth::{
    LoginRequest, MessageResponse, PasswordResetConfirm, PasswordResetRequest, RegisterRequest,
    RegisterResponse,
};
use crate::models::{Account, AccountPublic, AuthEventType};
use crate::services::credentials::CredentialValidator;
use crate::services::error::AuthError;
use crate::services::mail::MailSender;
use crate::services::security::SecurityService;
use crate::services::token::{generate_secure_token, TokenPair, TokenService};
use crate::stores::AccountStore;
use crate::utils::hash_password;

const REGISTERED_MESSAGE: &str =
    "Registration successful. Please check your email to verify your account.";
/// Returned for every forgot-password request, found or not.
const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for that email, a password reset message has been sent.";

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub account: AccountPublic,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    validator: CredentialValidator,
    tokens: TokenService,
    security: SecurityService,
    mail: Arc<dyn MailSender>,
    rate_limits: RateLimitConfig,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        validator: CredentialValidator,
        tokens: TokenService,
        security: SecurityService,
        mail: Arc<dyn MailSender>,
        rate_limits: RateLimitConfig,
    ) -> Self {
        Self {
            accounts,
            validator,
            tokens,
            security,
            mail,
            rate_limits,
        }
    }

    /// Create an account and start email verification.
    ///
    /// A duplicate email is reported as `Conflict` (uniqueness cannot be
    /// enforced silently). Once the account row exists, any later failure -
    /// including mail delivery - leaves the row in place, records a failed
    /// event, and surfaces only a generic registration error.
    pub async fn register(
        &self,
        req: RegisterRequest,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RegisterResponse, AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let ip_key = ip_address.unwrap_or("unknown");
        if !self
            .security
            .check_rate_limit(
                &format!("register:{ip_key}"),
                self.rate_limits.register_attempts,
                self.rate_limits.register_window_seconds,
            )
            .await?
        {
            return Err(AuthError::RateLimited);
        }

        if self.accounts.find_by_email(&req.email).await?.is_some() {
            return Err(AuthError::Conflict);
        }

        let password_hash = hash_password(&req.password)?;
        let account = Account::new(req.email, password_hash, req.first_name, req.last_name);
        self.accounts.insert(&account).await?;
        tracing::info!(account_id = %account.id, "Account registered");

        match self.begin_email_verification(&account).await {
            Ok(()) => {
                self.security
                    .log_event(
                        AuthEventType::LoginSuccess,
                        true,
                        Some(account.id),
                        ip_address,
                        user_agent,
                        Some(json!({ "action": "register" })),
                    )
                    .await;

                Ok(RegisterResponse {
                    account_id: account.id,
                    message: REGISTERED_MESSAGE.to_string(),
                })
            }
            Err(e) => {
                self.security
                    .log_event(
                        AuthEventType::LoginFailed,
                        false,
                        Some(account.id),
                        ip_address,
                        user_agent,
                        Some(json!({ "action": "register", "error": e.to_string() })),
                    )
                    .await;

                Err(AuthError::RegistrationFailed)
            }
        }
    }

    async fn begin_email_verification(&self, account: &Account) -> Result<(), AuthError> {
        let token = generate_secure_token();
        self.accounts
            .set_verification_token(account.id, &token, Utc::now() + Duration::hours(24))
            .await?;
        self.mail
            .send_verification_email(&account.email, &token)
            .await?;
        Ok(())
    }

    /// Authenticate and open a session.
    pub async fn login(
        &self,
        req: LoginRequest,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        device_info: Option<&str>,
    ) -> Result<LoginResponse, AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let ip_key = ip_address.unwrap_or("unknown");
        if self.security.is_blocked(&req.email).await? || self.security.is_blocked(ip_key).await? {
            return Err(AuthError::Unauthorized);
        }

        if !self
            .security
            .check_rate_limit(
                &format!("login:{ip_key}"),
                self.rate_limits.login_attempts,
                self.rate_limits.login_window_seconds,
            )
            .await?
        {
            return Err(AuthError::RateLimited);
        }

        let account = match self.validator.validate(&req.email, &req.password).await {
            Ok(account) => account,
            Err(AuthError::InvalidCredentials) => {
                self.security.record_failure(&req.email).await?;
                self.security.record_failure(ip_key).await?;
                self.security
                    .log_event(
                        AuthEventType::LoginFailed,
                        false,
                        None,
                        ip_address,
                        user_agent,
                        Some(json!({ "email": req.email })),
                    )
                    .await;
                return Err(AuthError::InvalidCredentials);
            }
            Err(AuthError::AccountLocked) => {
                self.security
                    .log_event(
                        AuthEventType::LoginFailed,
                        false,
                        None,
                        ip_address,
                        user_agent,
                        Some(json!({ "email": req.email, "reason": "account_locked" })),
                    )
                    .await;
                return Err(AuthError::AccountLocked);
            }
            Err(e) => return Err(e),
        };

        if !account.verified {
            return Err(AuthError::AccountUnverified);
        }

        // Flag only; login proceeds regardless of the outcome
        self.security
            .detect_suspicious_activity(&account, ip_address, user_agent)
            .await?;

        self.security.clear_attempts(&req.email).await?;
        self.security.clear_attempts(ip_key).await?;

        self.accounts.touch_last_login(account.id).await?;
        self.accounts.clear_failed_logins(account.id).await?;

        let tokens = self
            .tokens
            .issue(
                &account,
                device_info.map(str::to_string),
                ip_address.map(str::to_string),
            )
            .await?;

        self.security
            .log_event(
                AuthEventType::LoginSuccess,
                true,
                Some(account.id),
                ip_address,
                user_agent,
                None,
            )
            .await;

        Ok(LoginResponse {
            account: account.sanitized(),
            tokens,
        })
    }

    /// Rotate a refresh token into a fresh pair.
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let (tokens, account_id) = self.tokens.rotate(refresh_token).await?;

        self.security
            .log_event(
                AuthEventType::TokenRefresh,
                true,
                Some(account_id),
                ip_address,
                user_agent,
                None,
            )
            .await;

        Ok(tokens)
    }

    /// End one session by revoking exactly the presented refresh token.
    pub async fn logout(
        &self,
        refresh_token: &str,
        account_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<MessageResponse, AuthError> {
        self.tokens.revoke(refresh_token).await?;

        self.security
            .log_event(
                AuthEventType::Logout,
                true,
                Some(account_id),
                ip_address,
                user_agent,
                None,
            )
            .await;

        Ok(MessageResponse::new("Logged out successfully."))
    }

    /// End every session for the account.
    pub async fn logout_all(
        &self,
        account_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<MessageResponse, AuthError> {
        self.tokens.revoke_all(account_id).await?;

        self.security
            .log_event(
                AuthEventType::Logout,
                true,
                Some(account_id),
                ip_address,
                user_agent,
                Some(json!({ "action": "logout_all" })),
            )
            .await;

        Ok(MessageResponse::new("Logged out of all devices."))
    }

    /// Redeem an email-verification token.
    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse, AuthError> {
        let account = self
            .accounts
            .find_by_verification_token(token)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        match account.email_verification_expires {
            Some(expires) if expires > Utc::now() => {}
            _ => return Err(AuthError::TokenInvalid),
        }

        if !self.accounts.mark_verified(account.id).await? {
            return Err(AuthError::TokenInvalid);
        }

        self.security
            .log_event(
                AuthEventType::EmailVerified,
                true,
                Some(account.id),
                None,
                None,
                None,
            )
            .await;

        // Delivery failure here never fails the verification
        if let Err(e) = self
            .mail
            .send_welcome_email(&account.email, &account.first_name)
            .await
        {
            tracing::warn!(error = %e, account_id = %account.id, "Failed to send welcome email");
        }

        Ok(MessageResponse::new("Email verified successfully."))
    }

    /// Start a password reset. The response body is identical whether or
    /// not the email maps to an account; only the rate limiter may say no.
    pub async fn forgot_password(
        &self,
        req: PasswordResetRequest,
        ip_address: Option<&str>,
    ) -> Result<MessageResponse, AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let ip_key = ip_address.unwrap_or("unknown");
        for key in [
            format!("forgot_password:{ip_key}"),
            format!("forgot_password:{}", req.email),
        ] {
            if !self
                .security
                .check_rate_limit(
                    &key,
                    self.rate_limits.forgot_password_attempts,
                    self.rate_limits.forgot_password_window_seconds,
                )
                .await?
            {
                return Err(AuthError::RateLimited);
            }
        }

        if let Err(e) = self.begin_password_reset(&req.email, ip_address).await {
            tracing::debug!(error = %e, "Password reset request not fulfilled");
        }

        Ok(MessageResponse::new(RESET_REQUESTED_MESSAGE))
    }

    async fn begin_password_reset(
        &self,
        email: &str,
        ip_address: Option<&str>,
    ) -> Result<(), AuthError> {
        let Some(account) = self.accounts.find_by_email(email).await? else {
            return Ok(());
        };

        let token = generate_secure_token();
        self.accounts
            .set_reset_token(account.id, &token, Utc::now() + Duration::hours(1))
            .await?;
        self.mail
            .send_password_reset_email(&account.email, &token)
            .await?;

        self.security
            .log_event(
                AuthEventType::PasswordReset,
                true,
                Some(account.id),
                ip_address,
                None,
                Some(json!({ "action": "request" })),
            )
            .await;

        Ok(())
    }

    /// Complete a password reset and force re-authentication everywhere.
    pub async fn reset_password(
        &self,
        req: PasswordResetConfirm,
        ip_address: Option<&str>,
    ) -> Result<MessageResponse, AuthError> {
        req.validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let account = self
            .accounts
            .find_by_reset_token(&req.token)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        match account.password_reset_expires {
            Some(expires) if expires > Utc::now() => {}
            _ => return Err(AuthError::TokenInvalid),
        }

        let password_hash = hash_password(&req.new_password)?;
        self.accounts.set_password(account.id, &password_hash).await?;

        self.tokens.revoke_all(account.id).await?;

        self.security
            .log_event(
                AuthEventType::PasswordReset,
                true,
                Some(account.id),
                ip_address,
                None,
                Some(json!({ "action": "complete" })),
            )
            .await;

        Ok(MessageResponse::new("Password has been reset successfully."))
    }
}
