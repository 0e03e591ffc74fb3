//! Webhook Engine Configuration
//!
//! All settings are externally supplied. The signing secret is loaded from
//! the environment only and is redacted from Debug output.
//!
//! # Environment Variables
//!
//! - `STOCKKEEP_WEBHOOK_SECRET` (required): shared signing secret
//! - `STOCKKEEP_WEBHOOK_SIGNATURE_HEADER` (optional): header carrying the
//!   signature, default `x-stockkeep-signature`
//! - `STOCKKEEP_WEBHOOK_TOLERANCE_SECS` (optional): replay tolerance
//!   window, default 300
//! - `STOCKKEEP_WEBHOOK_TIMEOUT_SECS` (optional): post-admission processing
//!   budget, default 5
//! - `STOCKKEEP_WEBHOOK_RECLAIM_SECS` (optional): age after which a stuck
//!   in-progress ledger record is re-admitted, default 60
//! - `STOCKKEEP_WEBHOOK_CAS_RETRIES` (optional): per-delivery bound on
//!   aggregate compare-and-swap retries, default 4

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::webhook::error::ConfigError;

/// Default replay tolerance window.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Default post-admission processing budget.
///
/// Providers time out deliveries after a few seconds; finishing inside
/// that budget keeps acknowledgements meaningful.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(5);

/// Default reclaim window for stuck in-progress ledger records.
pub const DEFAULT_RECLAIM: Duration = Duration::from_secs(60);

/// Default bound on compare-and-swap retries per delivery.
pub const DEFAULT_CAS_RETRIES: u32 = 4;

/// Default name of the signature header.
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-stockkeep-signature";

/// Settings for the webhook ingestion engine.
#[derive(Clone)]
pub struct WebhookConfig {
    /// Shared signing secret, never logged
    pub signing_secret: Vec<u8>,

    /// Header the provider sends the signature in
    pub signature_header: String,

    /// Replay tolerance window for signed timestamps
    pub replay_tolerance: Duration,

    /// Time budget for everything after ledger admission
    pub processing_timeout: Duration,

    /// Age after which a stuck in-progress ledger record is reclaimed
    pub inprogress_reclaim: Duration,

    /// Bound on aggregate compare-and-swap retries per delivery
    pub max_cas_retries: u32,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("signing_secret", &"[redacted]")
            .field("signature_header", &self.signature_header)
            .field("replay_tolerance", &self.replay_tolerance)
            .field("processing_timeout", &self.processing_timeout)
            .field("inprogress_reclaim", &self.inprogress_reclaim)
            .field("max_cas_retries", &self.max_cas_retries)
            .finish()
    }
}

impl WebhookConfig {
    /// Load the configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingSecret` if `STOCKKEEP_WEBHOOK_SECRET`
    /// is not set, and `ConfigError::Invalid` for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var("STOCKKEEP_WEBHOOK_SECRET").map_err(|_| ConfigError::MissingSecret)?;
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if secret.len() < 32 {
            warn!("STOCKKEEP_WEBHOOK_SECRET is shorter than 32 characters");
        }

        let signature_header = env::var("STOCKKEEP_WEBHOOK_SIGNATURE_HEADER")
            .unwrap_or_else(|_| DEFAULT_SIGNATURE_HEADER.to_string())
            .to_ascii_lowercase();
        if http::header::HeaderName::try_from(signature_header.as_str()).is_err() {
            return Err(ConfigError::Invalid {
                name: "STOCKKEEP_WEBHOOK_SIGNATURE_HEADER",
                message: format!("{signature_header:?} is not a valid header name"),
            });
        }

        Ok(Self {
            signing_secret: secret.into_bytes(),
            signature_header,
            replay_tolerance: duration_from_env("STOCKKEEP_WEBHOOK_TOLERANCE_SECS", DEFAULT_TOLERANCE)?,
            processing_timeout: duration_from_env(
                "STOCKKEEP_WEBHOOK_TIMEOUT_SECS",
                DEFAULT_PROCESSING_TIMEOUT,
            )?,
            inprogress_reclaim: duration_from_env("STOCKKEEP_WEBHOOK_RECLAIM_SECS", DEFAULT_RECLAIM)?,
            max_cas_retries: u32_from_env("STOCKKEEP_WEBHOOK_CAS_RETRIES", DEFAULT_CAS_RETRIES)?,
        })
    }

    /// Configuration for tests: fixed secret, tight timeouts.
    pub fn test_config() -> Self {
        Self {
            signing_secret: b"whsec_test_secret_0123456789abcdef".to_vec(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            replay_tolerance: DEFAULT_TOLERANCE,
            processing_timeout: Duration::from_secs(2),
            inprogress_reclaim: Duration::from_millis(200),
            max_cas_retries: 4,
        }
    }
}

fn duration_from_env(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::Invalid {
                name,
                message: e.to_string(),
            }),
    }
}

fn u32_from_env(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
            name,
            message: e.to_string(),
        }),
    }
}
