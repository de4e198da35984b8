//! Engine configuration, loaded once at startup from the environment.

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_ttl_minutes: i64,
    /// Duration string, `<int><unit>` with unit in {d,h,m,s}.
    pub refresh_token_ttl: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 64 hex characters (32 bytes) for the MFA secret cipher.
    pub mfa_encryption_key: String,
    pub totp_issuer: String,
    pub max_failed_logins: u32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub forgot_password_attempts: u32,
    pub forgot_password_window_seconds: u64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str.parse().map_err(|e: String| anyhow!(e))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("auth-engine"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            postgres: PostgresConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                access_token_ttl_minutes: get_env(
                    "JWT_ACCESS_TOKEN_TTL_MINUTES",
                    Some("15"),
                    is_prod,
                )?
                .parse()
                .map_err(|e: std::num::ParseIntError| anyhow!(e))?,
                refresh_token_ttl: get_env("JWT_REFRESH_TOKEN_TTL", Some("7d"), is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", None, is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| anyhow!(e))?,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASS", None, is_prod)?,
                from: get_env("SMTP_FROM", None, is_prod)?,
            },
            security: SecurityConfig {
                mfa_encryption_key: get_env("MFA_ENCRYPTION_KEY", None, is_prod)?,
                totp_issuer: get_env("TOTP_ISSUER", Some("auth-engine"), is_prod)?,
                max_failed_logins: get_env("MAX_FAILED_LOGINS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                lockout_minutes: get_env("LOCKOUT_MINUTES", Some("15"), is_prod)?
                    .parse()
                    .unwrap_or(15),
            },
            rate_limit: RateLimitConfig {
                register_attempts: get_env("RATE_LIMIT_REGISTER_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                register_window_seconds: get_env(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
                login_attempts: get_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                login_window_seconds: get_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(900),
                forgot_password_attempts: get_env(
                    "RATE_LIMIT_FORGOT_PASSWORD_ATTEMPTS",
                    Some("3"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3),
                forgot_password_window_seconds: get_env(
                    "RATE_LIMIT_FORGOT_PASSWORD_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jwt.access_token_ttl_minutes <= 0 {
            return Err(anyhow!("JWT_ACCESS_TOKEN_TTL_MINUTES must be positive"));
        }

        parse_duration(&self.jwt.refresh_token_ttl)
            .map_err(|e| anyhow!("JWT_REFRESH_TOKEN_TTL: {e}"))?;

        let key = hex::decode(&self.security.mfa_encryption_key)
            .map_err(|e| anyhow!("MFA_ENCRYPTION_KEY must be hex: {e}"))?;
        if key.len() != 32 {
            return Err(anyhow!("MFA_ENCRYPTION_KEY must be 32 bytes (64 hex chars)"));
        }

        if self.environment == Environment::Prod && self.jwt.secret.len() < 32 {
            return Err(anyhow!("JWT_SECRET must be at least 32 bytes in production"));
        }

        Ok(())
    }

    /// The cipher key for MFA secrets. `validate()` has already checked the
    /// format, so this only fails on a hand-built config.
    pub fn mfa_cipher_key(&self) -> Result<[u8; 32]> {
        let bytes = hex::decode(&self.security.mfa_encryption_key)
            .map_err(|e| anyhow!("MFA_ENCRYPTION_KEY must be hex: {e}"))?;
        bytes
            .try_into()
            .map_err(|_| anyhow!("MFA_ENCRYPTION_KEY must be 32 bytes"))
    }
}

/// Parse a `<int><unit>` duration string, unit in {d,h,m,s}.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let (digits, unit) = value.split_at(value.len().saturating_sub(1));
    let amount: i64 = digits
        .parse()
        .map_err(|_| anyhow!("invalid duration: {value:?}"))?;
    if amount < 0 {
        return Err(anyhow!("invalid duration: {value:?}"));
    }
    match unit {
        "d" => Ok(Duration::days(amount)),
        "h" => Ok(Duration::hours(amount)),
        "m" => Ok(Duration::minutes(amount)),
        "s" => Ok(Duration::seconds(amount)),
        _ => Err(anyhow!("invalid duration unit: {value:?}")),
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(anyhow!("{key} is required in production but not set"))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(anyhow!("{key} is required but not set"))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_duration("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("45s").unwrap(), Duration::seconds(45));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("7").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("7w").is_err());
        assert!(parse_duration("-3d").is_err());
        assert!(parse_duration("3.5h").is_err());
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
