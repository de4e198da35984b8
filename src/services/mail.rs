//! Mail sender collaborator seam.
//!
//! Template rendering and delivery infrastructure live outside the engine;
//! this module only defines the seam and a plain-text SMTP implementation.
//! Delivery failures are the caller's concern: the orchestrator logs them
//! for most flows and propagates them only during registration.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};

use crate::config::SmtpConfig;
use crate::services::error::AuthError;

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_verification_email(&self, to_email: &str, token: &str) -> Result<(), AuthError>;
    async fn send_password_reset_email(&self, to_email: &str, token: &str)
        -> Result<(), AuthError>;
    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), AuthError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AuthError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AuthError::Email(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "SMTP mailer initialized");

        Ok(Self {
            mailer,
            from: config.from.clone(),
        })
    }

    async fn send(&self, to_email: &str, subject: &str, body: String) -> Result<(), AuthError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AuthError::Email(e.to_string()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AuthError::Email(e.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AuthError::Email(e.to_string()))?;

        // SmtpTransport is blocking; keep it off the async runtime
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| AuthError::Email(e.to_string()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(AuthError::Email(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send_verification_email(&self, to_email: &str, token: &str) -> Result<(), AuthError> {
        let body = format!(
            "Welcome!\n\nUse this token to verify your email address:\n\n{token}\n\n\
             The token expires in 24 hours. If you didn't create an account, \
             please ignore this email.\n"
        );
        self.send(to_email, "Verify your email address", body).await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
    ) -> Result<(), AuthError> {
        let body = format!(
            "We received a request to reset your password.\n\n\
             Use this token to choose a new one:\n\n{token}\n\n\
             The token expires in 1 hour. If you didn't request a reset, \
             please ignore this email.\n"
        );
        self.send(to_email, "Reset your password", body).await
    }

    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), AuthError> {
        let body = format!(
            "Welcome, {name}!\n\nYour account has been verified and is ready to use.\n"
        );
        self.send(to_email, "Welcome", body).await
    }
}

/// Mail recorded by [`MockMailSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMail {
    Verification { to: String, token: String },
    PasswordReset { to: String, token: String },
    Welcome { to: String, name: String },
}

/// Recording mock for tests and local development.
#[derive(Default)]
pub struct MockMailSender {
    sent: Mutex<Vec<SentMail>>,
    fail_sends: bool,
}

impl MockMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose every send fails, for exercising delivery-failure paths.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    fn record(&self, mail: SentMail) -> Result<(), AuthError> {
        if self.fail_sends {
            return Err(AuthError::Email("mock delivery failure".into()));
        }
        self.sent
            .lock()
            .map_err(|_| AuthError::Email("mock mailbox poisoned".into()))?
            .push(mail);
        Ok(())
    }
}

#[async_trait]
impl MailSender for MockMailSender {
    async fn send_verification_email(&self, to_email: &str, token: &str) -> Result<(), AuthError> {
        self.record(SentMail::Verification {
            to: to_email.to_string(),
            token: token.to_string(),
        })
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
    ) -> Result<(), AuthError> {
        self.record(SentMail::PasswordReset {
            to: to_email.to_string(),
            token: token.to_string(),
        })
    }

    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), AuthError> {
        self.record(SentMail::Welcome {
            to: to_email.to_string(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_sent_mail() {
        let mock = MockMailSender::new();
        mock.send_verification_email("a@example.com", "tok-1")
            .await
            .unwrap();
        mock.send_welcome_email("a@example.com", "Ada").await.unwrap();

        assert_eq!(
            mock.sent(),
            vec![
                SentMail::Verification {
                    to: "a@example.com".into(),
                    token: "tok-1".into()
                },
                SentMail::Welcome {
                    to: "a@example.com".into(),
                    name: "Ada".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn failing_mock_reports_delivery_error() {
        let mock = MockMailSender::failing();
        let err = mock
            .send_password_reset_email("a@example.com", "tok-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Email(_)));
        assert!(mock.sent().is_empty());
    }
}
