//! Subscription Store and Tenant Directory
//!
//! Persistence seams the engine depends on. Both are narrow traits so the
//! backing implementation can be swapped for a real database offering
//! atomic conditional writes; the in-memory versions serve single-process
//! deployments and tests.
//!
//! Aggregates are versioned. Writers must pass the version they loaded,
//! and a mismatch reports [`CasOutcome::Conflict`] instead of overwriting:
//! two events for the same tenant processed concurrently must not race,
//! and the loser re-reconciles against the freshly committed aggregate.
//! Unrelated tenants never contend with each other.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::billing::subscription::{SubscriptionAggregate, TenantId};
use crate::webhook::error::StoreError;

/// An aggregate together with the version that guards its next write.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedAggregate {
    /// Monotonic per-tenant write counter
    pub version: u64,
    /// The aggregate state at that version
    pub aggregate: SubscriptionAggregate,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed and the version advanced
    Committed,
    /// Someone else committed first; reload and retry
    Conflict,
}

/// Versioned persistence for subscription aggregates.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Load a tenant's aggregate, if one exists.
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<VersionedAggregate>, StoreError>;

    /// Insert a fresh aggregate if the tenant has none.
    ///
    /// Idempotent: when a record already exists the stored one is returned
    /// untouched, so concurrent provisioning attempts converge.
    async fn insert(
        &self,
        aggregate: &SubscriptionAggregate,
    ) -> Result<VersionedAggregate, StoreError>;

    /// Replace the aggregate iff its stored version equals `expected_version`.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        aggregate: &SubscriptionAggregate,
    ) -> Result<CasOutcome, StoreError>;
}

/// RwLock-backed store for single-process deployments and tests.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    records: RwLock<HashMap<TenantId, VersionedAggregate>>,
}

impl InMemorySubscriptionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn load(&self, tenant_id: &TenantId) -> Result<Option<VersionedAggregate>, StoreError> {
        Ok(self.records.read().get(tenant_id).cloned())
    }

    async fn insert(
        &self,
        aggregate: &SubscriptionAggregate,
    ) -> Result<VersionedAggregate, StoreError> {
        let mut records = self.records.write();
        let entry = records
            .entry(aggregate.tenant_id.clone())
            .or_insert_with(|| VersionedAggregate {
                version: 1,
                aggregate: aggregate.clone(),
            });
        Ok(entry.clone())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        aggregate: &SubscriptionAggregate,
    ) -> Result<CasOutcome, StoreError> {
        let mut records = self.records.write();
        match records.get_mut(&aggregate.tenant_id) {
            Some(entry) if entry.version == expected_version => {
                *entry = VersionedAggregate {
                    version: expected_version + 1,
                    aggregate: aggregate.clone(),
                };
                Ok(CasOutcome::Committed)
            }
            Some(_) => Ok(CasOutcome::Conflict),
            None => Ok(CasOutcome::Conflict),
        }
    }
}

/// Resolves provider customer references to tenants.
///
/// Owned by the tenant-provisioning service; the engine only reads it.
#[async_trait]
pub trait TenantDirectory: Send + Sync + 'static {
    /// Find the tenant a provider customer reference belongs to.
    async fn tenant_for_customer(&self, customer_ref: &str)
        -> Result<Option<TenantId>, StoreError>;
}

/// In-memory directory for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryTenantDirectory {
    mappings: RwLock<HashMap<String, TenantId>>,
}

impl InMemoryTenantDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider customer reference for a tenant.
    pub fn register(&self, customer_ref: impl Into<String>, tenant_id: TenantId) {
        self.mappings.write().insert(customer_ref.into(), tenant_id);
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn tenant_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<TenantId>, StoreError> {
        Ok(self.mappings.read().get(customer_ref).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::subscription::{PlanTier, SubscriptionStatus};
    use chrono::DateTime;

    fn aggregate(tenant_id: TenantId) -> SubscriptionAggregate {
        SubscriptionAggregate::provision(tenant_id)
    }

    #[tokio::test]
    async fn test_load_missing_tenant() {
        let store = InMemorySubscriptionStore::new();
        assert_eq!(store.load(&TenantId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_then_load() {
        let store = InMemorySubscriptionStore::new();
        let tenant = TenantId::new();

        let stored = store.insert(&aggregate(tenant.clone())).await.unwrap();
        assert_eq!(stored.version, 1);

        let loaded = store.load(&tenant).await.unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = InMemorySubscriptionStore::new();
        let tenant = TenantId::new();

        let mut first = aggregate(tenant.clone());
        store.insert(&first).await.unwrap();

        // A second insert must not clobber the stored record
        first.status = SubscriptionStatus::Active;
        first.plan_tier = PlanTier::Pro;
        let second = store.insert(&first).await.unwrap();
        assert_eq!(second.aggregate.status, SubscriptionStatus::Incomplete);
        assert_eq!(second.version, 1);
    }

    #[tokio::test]
    async fn test_cas_commits_and_advances_version() {
        let store = InMemorySubscriptionStore::new();
        let tenant = TenantId::new();
        store.insert(&aggregate(tenant.clone())).await.unwrap();

        let mut next = aggregate(tenant.clone());
        next.status = SubscriptionStatus::Active;
        next.last_applied_event_at = DateTime::from_timestamp(1_000, 0).unwrap();

        assert_eq!(
            store.compare_and_swap(1, &next).await.unwrap(),
            CasOutcome::Committed
        );

        let loaded = store.load(&tenant).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.aggregate.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_cas_detects_conflict() {
        let store = InMemorySubscriptionStore::new();
        let tenant = TenantId::new();
        store.insert(&aggregate(tenant.clone())).await.unwrap();

        let mut next = aggregate(tenant.clone());
        next.status = SubscriptionStatus::Active;
        store.compare_and_swap(1, &next).await.unwrap();

        // A writer that loaded version 1 is now behind
        let mut other = aggregate(tenant.clone());
        other.status = SubscriptionStatus::Cancelled;
        assert_eq!(
            store.compare_and_swap(1, &other).await.unwrap(),
            CasOutcome::Conflict
        );

        let loaded = store.load(&tenant).await.unwrap().unwrap();
        assert_eq!(loaded.aggregate.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_cas_on_missing_tenant_conflicts() {
        let store = InMemorySubscriptionStore::new();
        let next = aggregate(TenantId::new());
        assert_eq!(
            store.compare_and_swap(1, &next).await.unwrap(),
            CasOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_tenant_directory_lookup() {
        let directory = InMemoryTenantDirectory::new();
        let tenant = TenantId::new();
        directory.register("cus_42", tenant.clone());

        assert_eq!(
            directory.tenant_for_customer("cus_42").await.unwrap(),
            Some(tenant)
        );
        assert_eq!(directory.tenant_for_customer("cus_unknown").await.unwrap(), None);
    }
}
