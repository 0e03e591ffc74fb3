//! Subscription Aggregate and Reconciliation
//!
//! The subscription aggregate is the authoritative billing state for one
//! tenant. It is mutated only through [`reconcile`], a pure transition
//! function over `(current state, event)`. Keeping the transition pure means
//! two independent runs over the same inputs always produce the same
//! `(new state, outcome)` pair, which is what makes the state machine
//! testable without any store behind it.
//!
//! Ordering is enforced with a high-water mark: `last_applied_event_at`
//! never decreases, and any event stamped at or before it is a stale no-op.
//! Provider deliveries are reordered routinely (a late payment event can
//! arrive after the cancellation that superseded it), so staleness is an
//! expected outcome, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::webhook::error::DecodeError;
use crate::webhook::event::{EventEnvelope, EventKind};

/// Opaque tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Generate a fresh tenant id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Plan tiers offered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// No payment on file; the default tier
    Free,
    /// Entry paid tier
    Basic,
    /// Standard paid tier
    Pro,
    /// Highest tier, custom contracts
    Enterprise,
}

impl PlanTier {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Billing status of a tenant's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up and entitled to the plan's limits
    Active,
    /// A payment failed; entitlements continue through the grace period
    PastDue,
    /// Subscription ended; entitlements collapse to the free tier
    Cancelled,
    /// Checkout started but not yet completed
    Incomplete,
}

impl SubscriptionStatus {
    /// Whether the tenant is still entitled to its paid plan's limits.
    ///
    /// `PastDue` counts: a failed payment starts a grace period rather than
    /// revoking anything immediately.
    pub fn is_entitled(&self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Incomplete => "incomplete",
        }
    }
}

/// Authoritative per-tenant subscription state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionAggregate {
    /// Tenant this subscription belongs to
    pub tenant_id: TenantId,

    /// Current plan tier
    pub plan_tier: PlanTier,

    /// Current billing status
    pub status: SubscriptionStatus,

    /// End of the currently paid-for period
    #[serde(with = "chrono::serde::ts_seconds")]
    pub current_period_end: DateTime<Utc>,

    /// High-water mark of the newest event applied to this aggregate.
    ///
    /// Invariant: monotonically non-decreasing.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_applied_event_at: DateTime<Utc>,
}

impl SubscriptionAggregate {
    /// A freshly provisioned aggregate awaiting its first checkout.
    pub fn provision(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            plan_tier: PlanTier::Free,
            status: SubscriptionStatus::Incomplete,
            current_period_end: DateTime::UNIX_EPOCH,
            last_applied_event_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// How reconciliation classified one event against the current aggregate.
///
/// This is not an error channel: `Stale` and `Ignored` are successful,
/// intentional no-ops and the delivery carrying them is still acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The aggregate changed
    Applied,
    /// The event is older than the high-water mark; nothing changed
    Stale,
    /// The `(status, event type)` pair has no transition; nothing changed
    Ignored,
}

/// Apply one event to the current aggregate.
///
/// Transition table, keyed by `(current status, event kind)`:
///
/// | current      | event                                   | next      |
/// |--------------|-----------------------------------------|-----------|
/// | incomplete   | checkout.completed                      | active    |
/// | active       | subscription.updated                    | active    |
/// | active       | invoice.payment_failed                  | past_due  |
/// | past_due     | checkout.completed / payment_succeeded  | active    |
/// | active or past_due | subscription.cancelled            | cancelled |
/// | cancelled    | anything                                | cancelled |
///
/// Anything not in the table yields [`ReconcileOutcome::Ignored`] with no
/// mutation. The provider's event taxonomy evolves, so an unmatched pair is
/// never an error.
///
/// Errors only when a matched transition needs payload fields the event
/// does not carry.
pub fn reconcile(
    current: &SubscriptionAggregate,
    event: &EventEnvelope,
) -> Result<(SubscriptionAggregate, ReconcileOutcome), DecodeError> {
    // Ordering tie-break comes first: anything at or before the high-water
    // mark has already been superseded.
    if event.occurred_at <= current.last_applied_event_at {
        return Ok((current.clone(), ReconcileOutcome::Stale));
    }

    use EventKind::*;
    use SubscriptionStatus::*;

    let next = match (current.status, event.kind()) {
        (Incomplete, CheckoutCompleted) => {
            let plan = event.plan_change_payload()?;
            SubscriptionAggregate {
                status: Active,
                plan_tier: plan.plan_tier,
                current_period_end: plan.current_period_end,
                last_applied_event_at: event.occurred_at,
                ..current.clone()
            }
        }
        (Active, SubscriptionUpdated) => {
            let plan = event.plan_change_payload()?;
            SubscriptionAggregate {
                plan_tier: plan.plan_tier,
                current_period_end: plan.current_period_end,
                last_applied_event_at: event.occurred_at,
                ..current.clone()
            }
        }
        (Active, InvoicePaymentFailed) => SubscriptionAggregate {
            status: PastDue,
            last_applied_event_at: event.occurred_at,
            ..current.clone()
        },
        (PastDue, CheckoutCompleted) => {
            let plan = event.plan_change_payload()?;
            SubscriptionAggregate {
                status: Active,
                plan_tier: plan.plan_tier,
                current_period_end: plan.current_period_end,
                last_applied_event_at: event.occurred_at,
                ..current.clone()
            }
        }
        (PastDue, InvoicePaymentSucceeded) => SubscriptionAggregate {
            status: Active,
            last_applied_event_at: event.occurred_at,
            ..current.clone()
        },
        (Active | PastDue, SubscriptionCancelled) => SubscriptionAggregate {
            status: Cancelled,
            last_applied_event_at: event.occurred_at,
            ..current.clone()
        },
        // Cancellation is terminal; a returning tenant gets a fresh
        // aggregate through provisioning before its events land here.
        (Cancelled, _) => return Ok((current.clone(), ReconcileOutcome::Ignored)),
        _ => return Ok((current.clone(), ReconcileOutcome::Ignored)),
    };

    Ok((next, ReconcileOutcome::Applied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(kind: &str, occurred_at: i64, object: serde_json::Value) -> EventEnvelope {
        let raw = serde_json::json!({
            "id": format!("evt_{kind}_{occurred_at}"),
            "type": kind,
            "occurred_at": occurred_at,
            "data": { "object": object }
        });
        EventEnvelope::decode(raw.to_string().as_bytes()).unwrap()
    }

    fn plan_object(tier: &str, period_end: i64) -> serde_json::Value {
        serde_json::json!({
            "customer": "cus_test",
            "plan_tier": tier,
            "current_period_end": period_end
        })
    }

    fn customer_object() -> serde_json::Value {
        serde_json::json!({ "customer": "cus_test" })
    }

    fn aggregate(status: SubscriptionStatus, tier: PlanTier, hwm: i64) -> SubscriptionAggregate {
        SubscriptionAggregate {
            tenant_id: TenantId::new(),
            plan_tier: tier,
            status,
            current_period_end: DateTime::from_timestamp(hwm + 86_400, 0).unwrap(),
            last_applied_event_at: DateTime::from_timestamp(hwm, 0).unwrap(),
        }
    }

    #[test]
    fn test_checkout_activates_incomplete() {
        let current = aggregate(SubscriptionStatus::Incomplete, PlanTier::Free, 0);
        let ev = event("checkout.completed", 1_000, plan_object("pro", 2_000_000));

        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.plan_tier, PlanTier::Pro);
        assert_eq!(next.last_applied_event_at.timestamp(), 1_000);
        assert_eq!(next.current_period_end.timestamp(), 2_000_000);
    }

    #[test]
    fn test_update_changes_plan() {
        let current = aggregate(SubscriptionStatus::Active, PlanTier::Basic, 1_000);
        let ev = event("subscription.updated", 2_000, plan_object("enterprise", 3_000_000));

        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.plan_tier, PlanTier::Enterprise);
    }

    #[test]
    fn test_payment_failure_starts_grace_period() {
        let current = aggregate(SubscriptionStatus::Active, PlanTier::Pro, 1_000);
        let ev = event("invoice.payment_failed", 2_000, customer_object());

        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(next.status, SubscriptionStatus::PastDue);
        // The tier survives the grace period
        assert_eq!(next.plan_tier, PlanTier::Pro);
    }

    #[test]
    fn test_payment_success_clears_grace_period() {
        let current = aggregate(SubscriptionStatus::PastDue, PlanTier::Pro, 1_000);
        let ev = event("invoice.payment_succeeded", 2_000, customer_object());

        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(next.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_checkout_clears_grace_period() {
        let current = aggregate(SubscriptionStatus::PastDue, PlanTier::Basic, 1_000);
        let ev = event("checkout.completed", 2_000, plan_object("pro", 4_000_000));

        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.plan_tier, PlanTier::Pro);
    }

    #[test]
    fn test_cancellation_from_active_and_past_due() {
        for status in [SubscriptionStatus::Active, SubscriptionStatus::PastDue] {
            let current = aggregate(status, PlanTier::Pro, 1_000);
            let ev = event("subscription.cancelled", 2_000, customer_object());

            let (next, outcome) = reconcile(&current, &ev).unwrap();
            assert_eq!(outcome, ReconcileOutcome::Applied);
            assert_eq!(next.status, SubscriptionStatus::Cancelled);
        }
    }

    #[test]
    fn test_cancelled_is_terminal() {
        let current = aggregate(SubscriptionStatus::Cancelled, PlanTier::Pro, 1_000);
        for kind in [
            "checkout.completed",
            "subscription.updated",
            "subscription.cancelled",
            "invoice.payment_failed",
            "invoice.payment_succeeded",
        ] {
            let object = plan_object("enterprise", 9_000_000);
            let ev = event(kind, 2_000, object);
            let (next, outcome) = reconcile(&current, &ev).unwrap();
            assert_eq!(outcome, ReconcileOutcome::Ignored, "kind {kind}");
            assert_eq!(next, current);
        }
    }

    #[test]
    fn test_stale_event_is_noop() {
        let current = aggregate(SubscriptionStatus::Active, PlanTier::Pro, 5_000);
        let ev = event("subscription.updated", 3_000, plan_object("free", 1));

        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Stale);
        assert_eq!(next, current);
    }

    #[test]
    fn test_equal_timestamp_is_stale() {
        let current = aggregate(SubscriptionStatus::Active, PlanTier::Pro, 5_000);
        let ev = event("subscription.cancelled", 5_000, customer_object());

        let (_, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Stale);
    }

    #[test]
    fn test_unmatched_pairs_are_ignored() {
        // Payment success against a healthy subscription has no transition
        let current = aggregate(SubscriptionStatus::Active, PlanTier::Pro, 1_000);
        let ev = event("invoice.payment_succeeded", 2_000, customer_object());
        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(next, current);

        // Checkout against an already-active subscription likewise
        let ev = event("checkout.completed", 2_000, plan_object("basic", 1));
        let (_, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
    }

    #[test]
    fn test_unknown_event_kind_is_ignored() {
        let current = aggregate(SubscriptionStatus::Active, PlanTier::Pro, 1_000);
        let ev = event("customer.updated", 2_000, customer_object());
        let (next, outcome) = reconcile(&current, &ev).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(next, current);
    }

    #[test]
    fn test_high_water_mark_never_decreases() {
        let mut current = aggregate(SubscriptionStatus::Incomplete, PlanTier::Free, 0);
        let timestamps = [5_000i64, 1_000, 9_000, 8_999, 9_000, 12_000];
        let mut hwm = current.last_applied_event_at;

        for (i, ts) in timestamps.into_iter().enumerate() {
            let ev = event("checkout.completed", ts, plan_object("pro", ts + 100));
            let (next, _) = reconcile(&current, &ev).unwrap();
            assert!(
                next.last_applied_event_at >= hwm,
                "step {i}: high-water mark regressed"
            );
            hwm = next.last_applied_event_at;
            current = next;
        }
    }

    #[test]
    fn test_matched_transition_with_missing_payload_errors() {
        let current = aggregate(SubscriptionStatus::Incomplete, PlanTier::Free, 0);
        let ev = event("checkout.completed", 1_000, serde_json::json!({}));
        assert!(reconcile(&current, &ev).is_err());
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let current = aggregate(SubscriptionStatus::Incomplete, PlanTier::Free, 0);
        let ev = event("checkout.completed", 1_000, plan_object("pro", 2_000_000));

        let (a, oa) = reconcile(&current, &ev).unwrap();
        let (b, ob) = reconcile(&current, &ev).unwrap();
        assert_eq!(a, b);
        assert_eq!(oa, ob);
    }
}
