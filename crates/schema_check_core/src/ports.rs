//! Storage port traits.
//! Implemented by schema_check_postgres and by the in-memory stores in
//! `crate::memory`. Core logic depends only on these traits.

use async_trait::async_trait;
use uuid::Uuid;

use crate::audit::{ChangelogEntry, CheckOperation, OverrideRecord, StoredOperation, TargetResult};
use crate::error::Result;
use crate::governance::traffic::OperationOverride;
use crate::jobs::{OrganizationWebhook, OutboxJob};
use crate::types::{
    Contract, FeatureFlag, FederatedGraph, Namespace, Proposal, SchemaVersion, Subgraph, TargetKey,
};

/// Read side of the control-plane catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // ── Namespaces ─────────────────────────────────────────────

    /// Resolve a namespace by name within an organization. `NotFound` when absent.
    async fn namespace_by_name(&self, organization_id: Uuid, name: &str) -> Result<Namespace>;

    // ── Graph membership ───────────────────────────────────────

    /// All subgraphs in the namespace, feature subgraphs included.
    async fn subgraphs(&self, namespace_id: Uuid) -> Result<Vec<Subgraph>>;

    async fn federated_graphs(&self, namespace_id: Uuid) -> Result<Vec<FederatedGraph>>;

    /// Contracts whose source graph lives in the namespace.
    async fn contracts(&self, namespace_id: Uuid) -> Result<Vec<Contract>>;

    async fn feature_flags(&self, namespace_id: Uuid) -> Result<Vec<FeatureFlag>>;

    // ── Governance inputs ──────────────────────────────────────

    /// Proposals for graphs in the namespace, any state.
    async fn proposals(&self, namespace_id: Uuid) -> Result<Vec<Proposal>>;

    async fn operation_overrides(&self, namespace_id: Uuid) -> Result<Vec<OperationOverride>>;

    async fn webhooks(&self, organization_id: Uuid) -> Result<Vec<OrganizationWebhook>>;
}

/// Audit trail and schema-version pointers.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Open the transaction that scopes PERSIST and ACTIVATE for one operation.
    async fn begin(&self) -> Result<Box<dyn CheckTx>>;

    /// Load an operation and every row it wrote. `NotFound` when absent.
    async fn load_operation(&self, operation_id: Uuid) -> Result<StoredOperation>;

    async fn latest_valid_version(&self, target: &TargetKey) -> Result<Option<SchemaVersion>>;

    /// Returns false if the operation was already overridden.
    async fn record_override(&self, record: &OverrideRecord) -> Result<bool>;
}

/// One open transaction. Dropping it without `commit` discards every write.
#[async_trait]
pub trait CheckTx: Send {
    // ── Persist ────────────────────────────────────────────────

    async fn insert_operation(&mut self, operation: &CheckOperation) -> Result<()>;

    async fn insert_target_result(&mut self, result: &TargetResult) -> Result<()>;

    // ── Activate ───────────────────────────────────────────────

    /// Insert the subgraph, or overwrite its routing, labels and published SDL.
    async fn upsert_subgraph(&mut self, subgraph: &Subgraph) -> Result<()>;

    async fn delete_subgraph(&mut self, subgraph_id: Uuid) -> Result<()>;

    /// Insert an immutable version. Returns false when the id already exists.
    async fn insert_schema_version(&mut self, version: &SchemaVersion) -> Result<bool>;

    async fn record_activation(&mut self, operation_id: Uuid, version_id: Uuid) -> Result<()>;

    async fn insert_changelog(&mut self, entries: &[ChangelogEntry]) -> Result<()>;

    async fn enqueue(&mut self, job: &OutboxJob) -> Result<()>;

    /// Move the target's "latest valid" pointer from `expected` to
    /// `version_id`. Fails with `ConcurrentUpdate` when the pointer no longer
    /// holds `expected`. Callers issue these last.
    async fn advance_latest_valid(
        &mut self,
        target: &TargetKey,
        expected: Option<Uuid>,
        version_id: Uuid,
    ) -> Result<()>;

    // ── Completion ─────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Durable queue of downstream jobs written by ACTIVATE.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim the oldest unprocessed job, if any.
    async fn claim_next(&self, claimer_id: &str) -> Result<Option<OutboxJob>>;

    async fn mark_processed(&self, job_id: Uuid) -> Result<()>;

    /// Release the claim so the job is retried later.
    async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()>;
}
