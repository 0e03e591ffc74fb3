//! Webhook Processing Engine
//!
//! Drives one delivery through the full pipeline:
//!
//! ```text
//! raw body + header
//!       |
//! [Verify Signature] --> reject, no state touched
//!       |
//! [Decode Envelope]  --> reject, no state touched
//!       |
//! [Ledger try_begin] --> AlreadyApplied / InProgress --> ack as duplicate
//!       |
//! [Resolve Tenant]
//!       |
//! [Reconcile under CAS] --> Stale / Ignored --> mark applied, ack
//!       |
//! [Enforce Entitlements]
//!       |
//! [Ledger mark_applied] --> ack
//! ```
//!
//! Failures before admission leave no trace, so the provider's retry
//! re-enters from scratch. Failures after admission flip the ledger record
//! to failed and surface an error, so the delivery is not acknowledged and
//! a legitimate retry is not mistaken for a duplicate.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::billing::entitlements::{EntitlementSink, EntitlementTable, PlanLimitEnforcer};
use crate::billing::store::{CasOutcome, SubscriptionStore, TenantDirectory};
use crate::billing::subscription::{reconcile, ReconcileOutcome, SubscriptionAggregate};
use crate::webhook::config::WebhookConfig;
use crate::webhook::error::{WebhookError, WebhookResult};
use crate::webhook::event::EventEnvelope;
use crate::webhook::ledger::{Admission, IdempotencyLedger};
use crate::webhook::signature::SignatureVerifier;

/// Final classification of one delivery attempt, as reported to ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The event mutated the tenant's subscription
    Applied,
    /// The event was superseded by a later-ordered one; no mutation
    Stale,
    /// Unknown type or no matching transition; no mutation
    Ignored,
    /// This exact event already mutated state on an earlier delivery
    Duplicate,
    /// Another delivery of the same event is being processed right now
    InFlight,
}

impl DeliveryOutcome {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Stale => "stale",
            Self::Ignored => "ignored",
            Self::Duplicate => "duplicate",
            Self::InFlight => "in_flight",
        }
    }

    /// Whether this outcome means the delivery was a repeat of an
    /// already-admitted event.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate | Self::InFlight)
    }
}

/// The webhook ingestion and reconciliation engine.
///
/// Stateless apart from its injected collaborators; one instance serves
/// arbitrarily many concurrent deliveries.
pub struct WebhookEngine {
    verifier: SignatureVerifier,
    config: WebhookConfig,
    enforcer: PlanLimitEnforcer,
    ledger: Arc<dyn IdempotencyLedger>,
    subscriptions: Arc<dyn SubscriptionStore>,
    tenants: Arc<dyn TenantDirectory>,
    sink: Arc<dyn EntitlementSink>,
}

impl WebhookEngine {
    /// Wire an engine from its configuration and collaborators.
    pub fn new(
        config: WebhookConfig,
        entitlements: EntitlementTable,
        ledger: Arc<dyn IdempotencyLedger>,
        subscriptions: Arc<dyn SubscriptionStore>,
        tenants: Arc<dyn TenantDirectory>,
        sink: Arc<dyn EntitlementSink>,
    ) -> Self {
        let verifier = SignatureVerifier::new(config.signing_secret.clone(), config.replay_tolerance);
        Self {
            verifier,
            enforcer: PlanLimitEnforcer::new(entitlements),
            config,
            ledger,
            subscriptions,
            tenants,
            sink,
        }
    }

    /// Name of the header deliveries carry their signature in.
    pub fn signature_header(&self) -> &str {
        &self.config.signature_header
    }

    /// Process one delivery: raw body bytes plus the signature header value.
    ///
    /// The body must be the exact bytes the provider sent; any re-encoding
    /// upstream breaks signature verification.
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> WebhookResult<DeliveryOutcome> {
        if raw_body.is_empty() {
            return Err(WebhookError::EmptyBody);
        }

        self.verifier.verify(raw_body, signature_header)?;
        let event = EventEnvelope::decode(raw_body)?;

        match self.ledger.try_begin(&event.id).await? {
            Admission::AlreadyApplied => {
                debug!(event_id = %event.id, "duplicate delivery, already applied");
                return Ok(DeliveryOutcome::Duplicate);
            }
            Admission::InProgress => {
                debug!(event_id = %event.id, "duplicate delivery, processing in flight");
                return Ok(DeliveryOutcome::InFlight);
            }
            Admission::Admitted => {}
        }

        let budget = self.config.processing_timeout;
        let applied = match timeout(budget, self.apply(&event)).await {
            Ok(result) => result,
            Err(_) => Err(WebhookError::Timeout(budget.as_millis() as u64)),
        };

        match applied {
            Ok(outcome) => {
                // Stale and Ignored are intentional no-ops and still count
                // as applied, otherwise the provider would retry forever.
                self.ledger.mark_applied(&event.id).await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(mark_err) = self.ledger.mark_failed(&event.id).await {
                    warn!(
                        event_id = %event.id,
                        error = %mark_err,
                        "failed to mark event as failed in idempotency ledger"
                    );
                }
                Err(err)
            }
        }
    }

    /// Everything after admission: resolve the tenant, reconcile under a
    /// per-tenant compare-and-swap, enforce entitlements.
    async fn apply(&self, event: &EventEnvelope) -> WebhookResult<DeliveryOutcome> {
        if let Err(err) = event.known_kind() {
            debug!(event_id = %event.id, error = %err, "acknowledging unhandled event type");
            return Ok(DeliveryOutcome::Ignored);
        }

        let customer = event.customer_ref()?;
        let tenant_id = self
            .tenants
            .tenant_for_customer(&customer)
            .await?
            .ok_or_else(|| WebhookError::TenantUnknown(customer.clone()))?;

        for attempt in 0..=self.config.max_cas_retries {
            let current = match self.subscriptions.load(&tenant_id).await? {
                Some(versioned) => versioned,
                None => {
                    // First event for this tenant: provision an aggregate
                    // awaiting checkout. insert is idempotent under races.
                    self.subscriptions
                        .insert(&SubscriptionAggregate::provision(tenant_id.clone()))
                        .await?
                }
            };

            let (next, outcome) = reconcile(&current.aggregate, event)?;
            match outcome {
                ReconcileOutcome::Stale => {
                    debug!(event_id = %event.id, tenant_id = %tenant_id, "stale event, no-op");
                    return Ok(DeliveryOutcome::Stale);
                }
                ReconcileOutcome::Ignored => {
                    debug!(
                        event_id = %event.id,
                        tenant_id = %tenant_id,
                        event_type = %event.event_type,
                        status = current.aggregate.status.as_str(),
                        "no transition for event, ignored"
                    );
                    return Ok(DeliveryOutcome::Ignored);
                }
                ReconcileOutcome::Applied => {}
            }

            match self
                .subscriptions
                .compare_and_swap(current.version, &next)
                .await?
            {
                CasOutcome::Committed => {
                    let snapshot = self.enforcer.enforce(&next);
                    if let Err(err) = self.sink.publish(&snapshot).await {
                        // The snapshot is derived state; consumers can
                        // recompute it from the committed aggregate.
                        warn!(
                            tenant_id = %tenant_id,
                            error = %err,
                            "entitlement sink publish failed"
                        );
                    }

                    info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        tenant_id = %tenant_id,
                        status = next.status.as_str(),
                        plan_tier = next.plan_tier.as_str(),
                        "subscription reconciled"
                    );
                    return Ok(DeliveryOutcome::Applied);
                }
                CasOutcome::Conflict => {
                    debug!(
                        event_id = %event.id,
                        tenant_id = %tenant_id,
                        attempt,
                        "aggregate version conflict, reloading"
                    );
                }
            }
        }

        Err(WebhookError::ContentionExhausted(tenant_id.to_string()))
    }
}
