// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// VAPID identity used to authenticate Web Push requests.
#[derive(Debug, Clone)]
pub struct VapidConfig {
    /// PKCS#8 PEM of the P-256 signing key.
    pub private_key_pem: String,
    /// Uncompressed public key, base64url (the `k=` parameter).
    pub public_key: String,
    /// Contact URI (`mailto:` or `https:`) placed in the `sub` claim.
    pub subject: String,
}

/// Inspectra configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Bearer secret for the scheduler endpoints
    pub cron_secret: String,
    /// HS256 secret for actor tokens
    pub jwt_secret: String,
    /// Shared webhook secret; webhooks are disabled when unset
    pub webhook_secret: Option<String>,
    /// Outbound webhook receivers
    pub webhook_urls: Vec<String>,
    /// Root directory of the filesystem object store
    pub storage_dir: PathBuf,
    /// Externally reachable base URL used in signed object links
    pub public_base_url: String,
    /// Secret for signing object URLs
    pub url_signing_secret: String,
    /// Per-delivery timeout for push sends
    pub push_timeout: Duration,
    /// VAPID identity, when configured
    pub vapid: Option<VapidConfig>,
    /// How far ahead of the due date assignees are reminded
    pub reminder_window: chrono::Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `INSPECTRA_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `INSPECTRA_CRON_SECRET`: bearer secret for `/cron/*`
    /// - `INSPECTRA_JWT_SECRET`: HS256 secret for actor tokens
    ///
    /// Optional (with defaults):
    /// - `INSPECTRA_HTTP_PORT` (default: 8080)
    /// - `INSPECTRA_WEBHOOK_SECRET`, `INSPECTRA_WEBHOOK_URLS` (comma-separated)
    /// - `INSPECTRA_STORAGE_DIR` (default: `.data/objects`)
    /// - `INSPECTRA_PUBLIC_BASE_URL` (default: `http://localhost:<port>`)
    /// - `INSPECTRA_URL_SIGNING_SECRET` (default: the JWT secret)
    /// - `INSPECTRA_PUSH_TIMEOUT_SECS` (default: 10)
    /// - `INSPECTRA_VAPID_PRIVATE_KEY_PEM`, `INSPECTRA_VAPID_PUBLIC_KEY`,
    ///   `INSPECTRA_VAPID_SUBJECT` (all three or none)
    /// - `INSPECTRA_REMINDER_WINDOW_HOURS` (default: 24)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("INSPECTRA_DATABASE_URL")?;
        let cron_secret = required("INSPECTRA_CRON_SECRET")?;
        let jwt_secret = required("INSPECTRA_JWT_SECRET")?;

        let http_port: u16 = std::env::var("INSPECTRA_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("INSPECTRA_HTTP_PORT", "must be a valid port number"))?;

        let webhook_urls = optional("INSPECTRA_WEBHOOK_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let push_timeout_secs: u64 = std::env::var("INSPECTRA_PUSH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|s| *s > 0)
            .ok_or(ConfigError::Invalid(
                "INSPECTRA_PUSH_TIMEOUT_SECS",
                "must be a positive integer",
            ))?;

        let reminder_hours: i64 = std::env::var("INSPECTRA_REMINDER_WINDOW_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .ok()
            .filter(|h| *h >= 0)
            .ok_or(ConfigError::Invalid(
                "INSPECTRA_REMINDER_WINDOW_HOURS",
                "must be a non-negative integer",
            ))?;

        let vapid = match (
            optional("INSPECTRA_VAPID_PRIVATE_KEY_PEM"),
            optional("INSPECTRA_VAPID_PUBLIC_KEY"),
            optional("INSPECTRA_VAPID_SUBJECT"),
        ) {
            (Some(pem), Some(public_key), Some(subject)) => Some(VapidConfig {
                // PEMs usually arrive with escaped newlines through env files.
                private_key_pem: pem.replace("\\n", "\n"),
                public_key,
                subject,
            }),
            (None, None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "INSPECTRA_VAPID_PRIVATE_KEY_PEM",
                    "VAPID private key, public key and subject must be set together",
                ));
            }
        };

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            cron_secret,
            url_signing_secret: optional("INSPECTRA_URL_SIGNING_SECRET")
                .unwrap_or_else(|| jwt_secret.clone()),
            jwt_secret,
            webhook_secret: optional("INSPECTRA_WEBHOOK_SECRET"),
            webhook_urls,
            storage_dir: optional("INSPECTRA_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".data/objects")),
            public_base_url: optional("INSPECTRA_PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{}", http_port)),
            push_timeout: Duration::from_secs(push_timeout_secs),
            vapid,
            reminder_window: chrono::Duration::hours(reminder_hours),
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

/// Unset and empty are treated the same.
fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
