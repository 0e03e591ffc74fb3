//! Error types for StockKeep Billing
//!
//! This module provides the crate-level error hierarchy using `thiserror`.
//! Subsystem errors live next to their subsystems (see
//! [`crate::webhook::error`]); this type ties them together for callers
//! that wire the whole engine.

use thiserror::Error;

use crate::webhook::error::{ConfigError, WebhookError};

/// The main error type for StockKeep Billing operations
#[derive(Error, Debug)]
pub enum Error {
    /// Webhook processing errors
    #[error("webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Error::Generic(msg.into())
    }
}

/// Result type alias for StockKeep Billing operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::error::SignatureError;

    #[test]
    fn test_error_display() {
        let err = Error::Webhook(WebhookError::Signature(SignatureError::Mismatch));
        assert!(err.to_string().contains("webhook error"));

        let err = Error::Config(ConfigError::MissingSecret);
        assert!(err.to_string().contains("STOCKKEEP_WEBHOOK_SECRET"));
    }

    #[test]
    fn test_generic_error() {
        let err = Error::generic("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_from_conversions() {
        fn returns_crate_error() -> Result<()> {
            let parse: serde_json::Result<serde_json::Value> = serde_json::from_str("{");
            parse?;
            Ok(())
        }
        assert!(matches!(returns_crate_error(), Err(Error::Json(_))));
    }
}
