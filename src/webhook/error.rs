//! Error types for webhook ingestion.
//!
//! Each pipeline stage has its own error enum so callers can tell a
//! rejected delivery (bad signature, malformed payload) apart from a
//! retryable infrastructure failure (ledger or store unavailable). The
//! distinction drives the HTTP status the ingress returns, which in turn
//! drives the provider's retry behavior.

use thiserror::Error;

/// Signature verification failures.
///
/// All variants reject the delivery before any state is touched.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The signature header could not be parsed into (timestamp, signature) pairs
    #[error("malformed signature header")]
    Malformed,

    /// The signed timestamp is older than the replay tolerance window
    #[error("signed timestamp outside the {0}s tolerance window")]
    Expired(u64),

    /// No signature in the header matched the computed digest
    #[error("no signature matched the payload digest")]
    Mismatch,
}

/// Event decoding failures.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The payload is not a well-formed event envelope
    #[error("invalid event payload: {0}")]
    InvalidFormat(String),

    /// The event type is not one this consumer recognizes.
    ///
    /// Not fatal upstream: the provider may introduce event types this
    /// service does not yet handle, and those deliveries are acknowledged
    /// and ignored rather than rejected.
    #[error("unrecognized event type: {0}")]
    UnknownType(String),
}

/// Idempotency ledger failures.
///
/// A ledger failure must always propagate as a retryable error. Swallowing
/// it risks double-processing the next identical delivery once the backing
/// store recovers and reports the event as unseen.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The backing store could not be reached
    #[error("idempotency ledger unavailable: {0}")]
    Unavailable(String),
}

/// Subscription store and tenant directory failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("subscription store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors raised while loading the webhook engine settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing required signing secret environment variable
    #[error("STOCKKEEP_WEBHOOK_SECRET environment variable not set")]
    MissingSecret,

    /// A configuration value could not be parsed
    #[error("invalid configuration value for {name}: {message}")]
    Invalid {
        /// Name of the offending setting
        name: &'static str,
        /// What went wrong
        message: String,
    },
}

/// The combined error type for one webhook delivery attempt.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Request carried no signature header
    #[error("missing signature header")]
    MissingSignatureHeader,

    /// Request body was empty
    #[error("empty request body")]
    EmptyBody,

    /// Signature verification failed
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    /// Event decoding failed
    #[error("event decoding failed: {0}")]
    Decode(#[from] DecodeError),

    /// Idempotency ledger failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Subscription store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event references a provider customer no tenant is registered for.
    ///
    /// Checkout webhooks can race tenant provisioning, so this is surfaced
    /// as retryable and the provider's redelivery absorbs the gap.
    #[error("no tenant registered for provider customer {0}")]
    TenantUnknown(String),

    /// Processing exceeded the configured time budget
    #[error("processing timed out after {0}ms")]
    Timeout(u64),

    /// Per-tenant compare-and-swap retries were exhausted
    #[error("aggregate contention exhausted for tenant {0}")]
    ContentionExhausted(String),
}

impl WebhookError {
    /// Whether the provider should retry this delivery.
    ///
    /// Rejections (bad signature, malformed payload) are terminal for the
    /// payload as sent; infrastructure failures are worth redelivering.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::Ledger(_)
                | WebhookError::Store(_)
                | WebhookError::TenantUnknown(_)
                | WebhookError::Timeout(_)
                | WebhookError::ContentionExhausted(_)
        )
    }

    /// Short category label used for metrics breakdowns.
    pub fn category(&self) -> &'static str {
        match self {
            WebhookError::MissingSignatureHeader => "missing_signature",
            WebhookError::EmptyBody => "empty_body",
            WebhookError::Signature(_) => "signature",
            WebhookError::Decode(_) => "decode",
            WebhookError::Ledger(_) => "ledger",
            WebhookError::Store(_) => "store",
            WebhookError::TenantUnknown(_) => "tenant_unknown",
            WebhookError::Timeout(_) => "timeout",
            WebhookError::ContentionExhausted(_) => "contention",
        }
    }
}

/// Result type alias for webhook processing.
pub type WebhookResult<T> = std::result::Result<T, WebhookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WebhookError::Signature(SignatureError::Mismatch);
        assert!(err.to_string().contains("signature verification failed"));

        let err = WebhookError::Decode(DecodeError::InvalidFormat("not json".to_string()));
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WebhookError::Ledger(LedgerError::Unavailable("down".into())).is_retryable());
        assert!(WebhookError::TenantUnknown("cus_123".into()).is_retryable());
        assert!(WebhookError::Timeout(5000).is_retryable());

        assert!(!WebhookError::Signature(SignatureError::Mismatch).is_retryable());
        assert!(!WebhookError::EmptyBody.is_retryable());
        assert!(!WebhookError::Decode(DecodeError::InvalidFormat("x".into())).is_retryable());
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(
            WebhookError::Signature(SignatureError::Expired(300)).category(),
            "signature"
        );
        assert_eq!(WebhookError::ContentionExhausted("t".into()).category(), "contention");
    }
}
