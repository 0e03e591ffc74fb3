//! Payment Provider Webhook Ingestion
//!
//! Receives asynchronous billing events from the payment provider,
//! authenticates them, and applies each exactly once to the owning
//! tenant's subscription. The provider's delivery contract is hostile by
//! default: payloads may be forged, deliveries repeat (at-least-once with
//! retries), arrive out of order, and the process may crash mid-update.
//!
//! # Architecture
//!
//! ```text
//! Request -> Signature Verify -> Decode -> Idempotency Ledger -> Reconcile -> Enforce
//!                  |                |              |                              |
//!                  v                v              v                              v
//!             400/401             400      202 (duplicate)              Entitlement Sink
//! ```
//!
//! A rejection at any stage before the ledger leaves no record, so the
//! provider's retry re-enters from scratch. After admission, failure flips
//! the ledger record to failed and the delivery is not acknowledged.
//!
//! # Security
//!
//! - Signing secret loaded from the environment, never logged
//! - Constant-time signature comparison to prevent timing attacks
//! - Raw body handed through byte-exact so verification stays sound
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stockkeep_billing::billing::entitlements::{EntitlementTable, LoggingSink};
//! use stockkeep_billing::billing::store::{InMemorySubscriptionStore, InMemoryTenantDirectory};
//! use stockkeep_billing::webhook::config::WebhookConfig;
//! use stockkeep_billing::webhook::engine::WebhookEngine;
//! use stockkeep_billing::webhook::handler::{webhook_router, WebhookState};
//! use stockkeep_billing::webhook::ledger::InMemoryLedger;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = WebhookConfig::from_env()?;
//! let ledger = Arc::new(InMemoryLedger::new(config.inprogress_reclaim));
//! let engine = WebhookEngine::new(
//!     config,
//!     EntitlementTable::default(),
//!     ledger,
//!     Arc::new(InMemorySubscriptionStore::new()),
//!     Arc::new(InMemoryTenantDirectory::new()),
//!     Arc::new(LoggingSink),
//! );
//! let app = webhook_router(Arc::new(WebhookState::new(engine)));
//! // ... serve with axum
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod ledger;
pub mod signature;

// Re-export commonly used items
pub use config::WebhookConfig;
pub use engine::{DeliveryOutcome, WebhookEngine};
pub use error::{
    ConfigError, DecodeError, LedgerError, SignatureError, StoreError, WebhookError, WebhookResult,
};
pub use event::{EventEnvelope, EventKind, PlanChangePayload};
pub use handler::{webhook_handler, webhook_router, WebhookState};
pub use ledger::{Admission, IdempotencyLedger, IdempotencyRecord, InMemoryLedger, LedgerStatus};
pub use signature::SignatureVerifier;
