//! Plan Limit Enforcement
//!
//! Derives a tenant's resource entitlements from its subscription state.
//! The snapshot is a cache, not authoritative state: it is rebuilt whenever
//! the aggregate's tier or status changes and is safe to discard and
//! recompute at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::subscription::{PlanTier, SubscriptionAggregate, SubscriptionStatus, TenantId};

/// Resource caps granted by a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    /// Maximum number of SKUs the tenant may track
    pub max_skus: u32,
    /// Maximum number of user seats
    pub max_users: u32,
    /// Maximum invoices issued per calendar month
    pub max_invoices_per_month: u32,
}

/// Per-tier cap table, supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementTable {
    free: Entitlements,
    basic: Entitlements,
    pro: Entitlements,
    enterprise: Entitlements,
}

impl EntitlementTable {
    /// Parse a table from its JSON representation.
    ///
    /// Deployments override the built-in caps through the
    /// `STOCKKEEP_ENTITLEMENTS` environment variable.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Caps for one tier.
    pub fn caps_for(&self, tier: PlanTier) -> Entitlements {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Basic => self.basic,
            PlanTier::Pro => self.pro,
            PlanTier::Enterprise => self.enterprise,
        }
    }
}

impl Default for EntitlementTable {
    fn default() -> Self {
        Self {
            free: Entitlements {
                max_skus: 50,
                max_users: 2,
                max_invoices_per_month: 20,
            },
            basic: Entitlements {
                max_skus: 1_000,
                max_users: 10,
                max_invoices_per_month: 500,
            },
            pro: Entitlements {
                max_skus: 25_000,
                max_users: 50,
                max_invoices_per_month: 10_000,
            },
            enterprise: Entitlements {
                max_skus: 1_000_000,
                max_users: 1_000,
                max_invoices_per_month: 250_000,
            },
        }
    }
}

/// Derived per-tenant limits, rebuilt after every applied reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    /// Tenant the snapshot belongs to
    pub tenant_id: TenantId,

    /// Plan tier on the aggregate when the snapshot was computed
    pub plan_tier: PlanTier,

    /// Subscription status when the snapshot was computed
    pub status: SubscriptionStatus,

    /// Effective caps after grace-period and cancellation rules
    pub caps: Entitlements,

    /// When the snapshot was computed
    pub computed_at: DateTime<Utc>,
}

/// Maps subscription state to effective entitlements.
#[derive(Debug, Clone)]
pub struct PlanLimitEnforcer {
    table: EntitlementTable,
}

impl PlanLimitEnforcer {
    /// Build an enforcer over the given cap table.
    pub fn new(table: EntitlementTable) -> Self {
        Self { table }
    }

    /// Derive the entitlement snapshot for an aggregate.
    ///
    /// `past_due` keeps the paid tier's caps: a failed payment opens a
    /// grace period, it does not revoke anything. Only `cancelled` and
    /// `incomplete` collapse to the free tier.
    pub fn enforce(&self, aggregate: &SubscriptionAggregate) -> EntitlementSnapshot {
        let effective_tier = if aggregate.status.is_entitled() {
            aggregate.plan_tier
        } else {
            PlanTier::Free
        };

        EntitlementSnapshot {
            tenant_id: aggregate.tenant_id.clone(),
            plan_tier: aggregate.plan_tier,
            status: aggregate.status,
            caps: self.table.caps_for(effective_tier),
            computed_at: Utc::now(),
        }
    }
}

impl Default for PlanLimitEnforcer {
    fn default() -> Self {
        Self::new(EntitlementTable::default())
    }
}

/// Downstream consumer of entitlement changes.
///
/// The engine publishes a snapshot after every reconciliation that mutated
/// the aggregate. Publication is best-effort: the snapshot is derived state
/// and consumers can always recompute from the aggregate.
#[async_trait::async_trait]
pub trait EntitlementSink: Send + Sync + 'static {
    /// Deliver one snapshot to the consumer.
    async fn publish(&self, snapshot: &EntitlementSnapshot) -> anyhow::Result<()>;
}

/// Sink that logs each snapshot.
#[derive(Clone)]
pub struct LoggingSink;

#[async_trait::async_trait]
impl EntitlementSink for LoggingSink {
    async fn publish(&self, snapshot: &EntitlementSnapshot) -> anyhow::Result<()> {
        tracing::info!(
            tenant_id = %snapshot.tenant_id,
            plan_tier = snapshot.plan_tier.as_str(),
            status = snapshot.status.as_str(),
            max_skus = snapshot.caps.max_skus,
            max_users = snapshot.caps.max_users,
            "entitlements updated"
        );
        Ok(())
    }
}

/// No-op sink for testing
#[derive(Clone)]
pub struct NoOpSink;

#[async_trait::async_trait]
impl EntitlementSink for NoOpSink {
    async fn publish(&self, _snapshot: &EntitlementSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn aggregate(status: SubscriptionStatus, tier: PlanTier) -> SubscriptionAggregate {
        SubscriptionAggregate {
            tenant_id: TenantId::new(),
            plan_tier: tier,
            status,
            current_period_end: DateTime::UNIX_EPOCH,
            last_applied_event_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_active_uses_plan_caps() {
        let enforcer = PlanLimitEnforcer::default();
        let snapshot = enforcer.enforce(&aggregate(SubscriptionStatus::Active, PlanTier::Pro));

        assert_eq!(snapshot.caps, EntitlementTable::default().caps_for(PlanTier::Pro));
        assert_eq!(snapshot.plan_tier, PlanTier::Pro);
    }

    #[test]
    fn test_past_due_keeps_plan_caps() {
        let enforcer = PlanLimitEnforcer::default();
        let snapshot = enforcer.enforce(&aggregate(SubscriptionStatus::PastDue, PlanTier::Enterprise));

        // Grace period: caps do not collapse on a failed payment
        assert_eq!(
            snapshot.caps,
            EntitlementTable::default().caps_for(PlanTier::Enterprise)
        );
    }

    #[test]
    fn test_cancelled_collapses_to_free() {
        let enforcer = PlanLimitEnforcer::default();
        let snapshot = enforcer.enforce(&aggregate(SubscriptionStatus::Cancelled, PlanTier::Pro));

        assert_eq!(snapshot.caps, EntitlementTable::default().caps_for(PlanTier::Free));
        // The snapshot still reports the aggregate's nominal tier
        assert_eq!(snapshot.plan_tier, PlanTier::Pro);
    }

    #[test]
    fn test_incomplete_collapses_to_free() {
        let enforcer = PlanLimitEnforcer::default();
        let snapshot = enforcer.enforce(&aggregate(SubscriptionStatus::Incomplete, PlanTier::Basic));
        assert_eq!(snapshot.caps, EntitlementTable::default().caps_for(PlanTier::Free));
    }

    #[test]
    fn test_table_from_json() {
        let json = r#"{
            "free":       { "max_skus": 1,   "max_users": 1,  "max_invoices_per_month": 1 },
            "basic":      { "max_skus": 10,  "max_users": 2,  "max_invoices_per_month": 10 },
            "pro":        { "max_skus": 100, "max_users": 20, "max_invoices_per_month": 100 },
            "enterprise": { "max_skus": 1000,"max_users": 200,"max_invoices_per_month": 1000 }
        }"#;

        let table = EntitlementTable::from_json(json).unwrap();
        assert_eq!(table.caps_for(PlanTier::Pro).max_skus, 100);
        assert!(EntitlementTable::from_json("{}").is_err());
    }
}
