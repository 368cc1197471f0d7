use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;

use crate::lifecycle::LifecyclePolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,

    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub s3_public_base_url: String,

    pub paymongo_secret_key: String,
    pub paymongo_webhook_secret: String,
    pub paymongo_api_base: String,
    pub app_base_url: String,

    pub brevo_api_key: Option<String>,
    pub brevo_api_base: String,
    pub mail_sender_email: String,
    pub mail_sender_name: String,

    pub rabbitmq_url: Option<String>,
    pub ocr_poll_interval_secs: u64,
    pub ocr_batch_size: i64,
    pub ocr_failure_rate: f64,

    pub lifecycle_interval_secs: Option<u64>,
    pub invoice_due_days: i64,
    pub suspend_grace_days: i64,
    pub cancel_after_suspended_days: i64,
    pub pending_expiry_days: i64,

    pub admin_bootstrap: Option<AdminBootstrap>,
}

#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let s3_bucket = required("S3_BUCKET")?;
        let s3_public_base_url = optional("S3_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", s3_bucket));

        let admin_bootstrap = match (
            optional("ADMIN_USERNAME"),
            optional("ADMIN_EMAIL"),
            optional("ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminBootstrap {
                username,
                email,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_ttl_days: parsed("JWT_TTL_DAYS", 30)?,

            s3_bucket,
            s3_endpoint: optional("S3_ENDPOINT"),
            s3_public_base_url,

            paymongo_secret_key: required("PAYMONGO_SECRET_KEY")?,
            paymongo_webhook_secret: required("PAYMONGO_WEBHOOK_SECRET")?,
            paymongo_api_base: optional("PAYMONGO_API_BASE")
                .unwrap_or_else(|| "https://api.paymongo.com".to_string()),
            app_base_url: optional("APP_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),

            brevo_api_key: optional("BREVO_API_KEY"),
            brevo_api_base: optional("BREVO_API_BASE")
                .unwrap_or_else(|| "https://api.brevo.com".to_string()),
            mail_sender_email: optional("MAIL_SENDER_EMAIL")
                .unwrap_or_else(|| "no-reply@wastewise.local".to_string()),
            mail_sender_name: optional("MAIL_SENDER_NAME")
                .unwrap_or_else(|| "WasteWise".to_string()),

            rabbitmq_url: optional("RABBITMQ_URL"),
            ocr_poll_interval_secs: parsed("OCR_POLL_INTERVAL_SECS", 30)?,
            ocr_batch_size: parsed("OCR_BATCH_SIZE", 50)?,
            ocr_failure_rate: parse_rate("OCR_FAILURE_RATE", optional("OCR_FAILURE_RATE"), 0.05)?,

            lifecycle_interval_secs: optional_parsed("LIFECYCLE_INTERVAL_SECS")?,
            invoice_due_days: parsed("INVOICE_DUE_DAYS", 7)?,
            suspend_grace_days: parsed("SUSPEND_GRACE_DAYS", 3)?,
            cancel_after_suspended_days: parsed("CANCEL_AFTER_SUSPENDED_DAYS", 30)?,
            pending_expiry_days: parsed("PENDING_EXPIRY_DAYS", 14)?,

            admin_bootstrap,
        })
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            invoice_due_days: self.invoice_due_days,
            suspend_grace_days: self.suspend_grace_days,
            cancel_after_suspended_days: self.cancel_after_suspended_days,
            pending_expiry_days: self.pending_expiry_days,
        }
    }
}

/// Settings for the one-shot `lifecycle` binary. HTTP, storage and payment
/// provider variables are not required here.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub database_url: String,
    pub policy: LifecyclePolicy,
    pub brevo_api_key: Option<String>,
    pub brevo_api_base: String,
    pub mail_sender_email: String,
    pub mail_sender_name: String,
}

impl JobConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            policy: LifecyclePolicy {
                invoice_due_days: parsed("INVOICE_DUE_DAYS", 7)?,
                suspend_grace_days: parsed("SUSPEND_GRACE_DAYS", 3)?,
                cancel_after_suspended_days: parsed("CANCEL_AFTER_SUSPENDED_DAYS", 30)?,
                pending_expiry_days: parsed("PENDING_EXPIRY_DAYS", 14)?,
            },
            brevo_api_key: optional("BREVO_API_KEY"),
            brevo_api_base: optional("BREVO_API_BASE")
                .unwrap_or_else(|| "https://api.brevo.com".to_string()),
            mail_sender_email: optional("MAIL_SENDER_EMAIL")
                .unwrap_or_else(|| "no-reply@wastewise.local".to_string()),
            mail_sender_name: optional("MAIL_SENDER_NAME")
                .unwrap_or_else(|| "WasteWise".to_string()),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    Ok(optional_parsed(key)?.unwrap_or(default))
}

fn optional_parsed<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    optional(key)
        .map(|raw| parse_value(key, &raw))
        .transpose()
}

pub(crate) fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

pub(crate) fn parse_rate(
    key: &'static str,
    raw: Option<String>,
    default: f64,
) -> Result<f64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let rate: f64 = parse_value(key, &raw)?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("{rate} is outside 0..=1"),
        });
    }
    Ok(rate)
}
