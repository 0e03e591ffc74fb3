//! StockKeep Billing - Webhook Ingestion & Subscription Reconciliation
//!
//! This crate is the billing-event engine of the StockKeep platform. It
//! receives asynchronous, possibly-duplicated, possibly-reordered events
//! from the payment provider, authenticates them, and applies each exactly
//! once to the owning tenant's subscription, with plan-limit side effects.
//!
//! # Features
//!
//! - **Signature Verification**: HMAC-SHA256 over the raw body with
//!   constant-time comparison and a replay tolerance window
//! - **Idempotency**: a durable ledger of event ids gates admission, so
//!   at-least-once delivery never double-applies an event
//! - **Reconciliation**: a pure state machine over
//!   `(subscription status, event kind)` with ordering by high-water mark
//! - **Entitlements**: per-tenant resource caps derived from the committed
//!   subscription state and published to downstream consumers
//!
//! # Architecture
//!
//! ```text
//! Provider ──▶ HTTP Ingress ──▶ Signature Verifier ──▶ Event Decoder
//!                                                           │
//!                                                           ▼
//!              Entitlement Sink ◀── Plan Limit      Idempotency Ledger
//!                                   Enforcer               │
//!                                      ▲                   ▼
//!                                      └──── Subscription Reconciler
//!                                            (per-tenant CAS)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stockkeep_billing::billing::entitlements::{EntitlementTable, NoOpSink};
//! use stockkeep_billing::billing::store::{InMemorySubscriptionStore, InMemoryTenantDirectory};
//! use stockkeep_billing::webhook::config::WebhookConfig;
//! use stockkeep_billing::webhook::engine::WebhookEngine;
//! use stockkeep_billing::webhook::ledger::InMemoryLedger;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WebhookConfig::from_env()?;
//!     let engine = WebhookEngine::new(
//!         config.clone(),
//!         EntitlementTable::default(),
//!         Arc::new(InMemoryLedger::new(config.inprogress_reclaim)),
//!         Arc::new(InMemorySubscriptionStore::new()),
//!         Arc::new(InMemoryTenantDirectory::new()),
//!         Arc::new(NoOpSink),
//!     );
//!
//!     let outcome = engine.ingest(b"raw body", "t=...,v1=...").await?;
//!     println!("delivery outcome: {}", outcome.as_str());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod billing;
pub mod error;
pub mod metrics;
pub mod webhook;

// Re-exports for convenience
pub use billing::entitlements::{EntitlementSnapshot, EntitlementTable, PlanLimitEnforcer};
pub use billing::subscription::{
    reconcile, PlanTier, ReconcileOutcome, SubscriptionAggregate, SubscriptionStatus, TenantId,
};
pub use error::{Error, Result};
pub use webhook::config::WebhookConfig;
pub use webhook::engine::{DeliveryOutcome, WebhookEngine};
pub use webhook::event::{EventEnvelope, EventKind};
pub use webhook::handler::{webhook_router, WebhookState};
pub use webhook::ledger::{IdempotencyLedger, InMemoryLedger};
pub use webhook::signature::SignatureVerifier;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
