//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `NETWORK_WEBHOOK_SECRET` (required): shared HMAC secret for card-network webhooks
/// - `CARD_ENCRYPTION_KEY` (required): base64 of a 32-byte AES-256 key
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `CARD_IIN` (optional): issuer prefix for generated PANs, defaults to 4532015
/// - `NOTIFICATION_URL` / `NOTIFICATION_SECRET` (optional): mail relay endpoint;
///   notifications are only logged when unset
/// - `EXPIRY_NOTICE_SCHEDULE` / `EXPIRY_SWEEP_SCHEDULE` (optional): cron
///   expressions (seconds field first) for the expiry jobs
/// - `MAX_TOP_UP_CENTS` (optional): largest single top-up, defaults to 1,000,000.00
/// - `TRUSTED_PROXY_DEPTH` (optional): reverse proxies in front of the service;
///   `X-Forwarded-For` is ignored when 0 (the default)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    pub network_webhook_secret: String,

    pub card_encryption_key: String,

    #[serde(default = "default_card_iin")]
    pub card_iin: String,

    /// Deadline for processing one webhook event
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    pub notification_url: Option<String>,

    pub notification_secret: Option<String>,

    #[serde(default = "default_notification_attempts")]
    pub notification_attempts: u32,

    #[serde(default = "default_notification_retry_delay")]
    pub notification_retry_delay_secs: u64,

    #[serde(default = "default_expiry_notice_schedule")]
    pub expiry_notice_schedule: String,

    #[serde(default = "default_expiry_sweep_schedule")]
    pub expiry_sweep_schedule: String,

    /// Failed bearer-token attempts allowed per client within the window
    #[serde(default = "default_auth_max_failures")]
    pub auth_max_failures: u32,

    #[serde(default = "default_auth_failure_window")]
    pub auth_failure_window_secs: u64,

    #[serde(default)]
    pub trusted_proxy_depth: usize,

    #[serde(default = "default_max_top_up")]
    pub max_top_up_cents: i64,
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_card_iin() -> String {
    "4532015".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_notification_attempts() -> u32 {
    3
}

fn default_notification_retry_delay() -> u64 {
    2
}

/// 07:00 UTC daily
fn default_expiry_notice_schedule() -> String {
    "0 0 7 * * *".to_string()
}

/// 07:05 UTC daily
fn default_expiry_sweep_schedule() -> String {
    "0 5 7 * * *".to_string()
}

fn default_auth_max_failures() -> u32 {
    5
}

fn default_auth_failure_window() -> u64 {
    15 * 60
}

fn default_max_top_up() -> i64 {
    100_000_000
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }

    /// Validate values envy cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        let iin_len = self.card_iin.len();
        if !(6..=8).contains(&iin_len) || !self.card_iin.chars().all(|c| c.is_ascii_digit()) {
            return Err("CARD_IIN must be 6 to 8 digits".to_string());
        }

        if self.network_webhook_secret.is_empty() {
            return Err("NETWORK_WEBHOOK_SECRET must not be empty".to_string());
        }

        if self.notification_url.is_some()
            && self.notification_secret.as_deref().is_none_or(str::is_empty)
        {
            return Err("NOTIFICATION_SECRET is required when NOTIFICATION_URL is set".to_string());
        }

        if self.notification_attempts == 0 {
            return Err("NOTIFICATION_ATTEMPTS must be at least 1".to_string());
        }

        if self.auth_max_failures == 0 {
            return Err("AUTH_MAX_FAILURES must be at least 1".to_string());
        }

        if self.max_top_up_cents <= 0 {
            return Err("MAX_TOP_UP_CENTS must be positive".to_string());
        }

        Ok(())
    }
}
