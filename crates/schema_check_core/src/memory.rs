//! In-memory implementations of the storage ports.
//!
//! One shared `MemoryStore` backs the catalog, the audit trail and the job
//! queue so that ACTIVATE writes (new subgraphs, published SDL) are visible to
//! later catalog reads. Transactions buffer their writes and apply them on
//! commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{ChangelogEntry, CheckOperation, OverrideRecord, StoredOperation, TargetResult};
use crate::error::{Result, SchemaCheckError};
use crate::governance::traffic::OperationOverride;
use crate::jobs::{OrganizationWebhook, OutboxJob};
use crate::ports::{AuditStore, CatalogStore, CheckTx, JobQueue};
use crate::types::{
    Contract, FeatureFlag, FederatedGraph, Namespace, Proposal, SchemaVersion, Subgraph, TargetKey,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Claimed,
    Processed,
    DeadLetter,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: OutboxJob,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct State {
    namespaces: Vec<Namespace>,
    subgraphs: Vec<Subgraph>,
    graphs: Vec<FederatedGraph>,
    contracts: Vec<Contract>,
    flags: Vec<FeatureFlag>,
    proposals: Vec<Proposal>,
    operation_overrides: HashMap<Uuid, Vec<OperationOverride>>,
    webhooks: Vec<OrganizationWebhook>,

    operations: HashMap<Uuid, CheckOperation>,
    targets: HashMap<Uuid, Vec<TargetResult>>,
    activations: HashMap<Uuid, Vec<Uuid>>,
    override_records: HashMap<Uuid, OverrideRecord>,
    versions: HashMap<Uuid, SchemaVersion>,
    latest: HashMap<TargetKey, Uuid>,
    changelog: Vec<ChangelogEntry>,
    outbox: Vec<QueuedJob>,
}

impl State {
    fn graph_namespace(&self, graph_id: Uuid) -> Option<Uuid> {
        self.graphs
            .iter()
            .find(|g| g.id == graph_id)
            .map(|g| g.namespace_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes and job claims fail with an infrastructure error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchemaCheckError::Infrastructure(
                "memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }

    // ── Seeding ────────────────────────────────────────────────

    pub async fn add_namespace(&self, namespace: Namespace) {
        self.state.write().await.namespaces.push(namespace);
    }

    pub async fn add_subgraph(&self, subgraph: Subgraph) {
        self.state.write().await.subgraphs.push(subgraph);
    }

    pub async fn add_federated_graph(&self, graph: FederatedGraph) {
        self.state.write().await.graphs.push(graph);
    }

    pub async fn add_contract(&self, contract: Contract) {
        self.state.write().await.contracts.push(contract);
    }

    pub async fn add_feature_flag(&self, flag: FeatureFlag) {
        self.state.write().await.flags.push(flag);
    }

    pub async fn add_proposal(&self, proposal: Proposal) {
        self.state.write().await.proposals.push(proposal);
    }

    pub async fn add_operation_override(&self, namespace_id: Uuid, o: OperationOverride) {
        self.state
            .write()
            .await
            .operation_overrides
            .entry(namespace_id)
            .or_default()
            .push(o);
    }

    pub async fn add_webhook(&self, webhook: OrganizationWebhook) {
        self.state.write().await.webhooks.push(webhook);
    }

    // ── Inspection ─────────────────────────────────────────────

    pub async fn latest_pointer(&self, target: &TargetKey) -> Option<Uuid> {
        self.state.read().await.latest.get(target).copied()
    }

    pub async fn version_count(&self) -> usize {
        self.state.read().await.versions.len()
    }

    pub async fn changelog(&self) -> Vec<ChangelogEntry> {
        self.state.read().await.changelog.clone()
    }

    pub async fn jobs(&self) -> Vec<QueuedJob> {
        self.state.read().await.outbox.clone()
    }

    pub async fn subgraph_by_name(&self, namespace_id: Uuid, name: &str) -> Option<Subgraph> {
        self.state
            .read()
            .await
            .subgraphs
            .iter()
            .find(|s| s.namespace_id == namespace_id && s.name == name)
            .cloned()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn namespace_by_name(&self, organization_id: Uuid, name: &str) -> Result<Namespace> {
        self.state
            .read()
            .await
            .namespaces
            .iter()
            .find(|n| n.organization_id == organization_id && n.name == name)
            .cloned()
            .ok_or_else(|| SchemaCheckError::NotFound(format!("namespace {name}")))
    }

    async fn subgraphs(&self, namespace_id: Uuid) -> Result<Vec<Subgraph>> {
        let state = self.state.read().await;
        Ok(state
            .subgraphs
            .iter()
            .filter(|s| s.namespace_id == namespace_id)
            .cloned()
            .collect())
    }

    async fn federated_graphs(&self, namespace_id: Uuid) -> Result<Vec<FederatedGraph>> {
        let state = self.state.read().await;
        Ok(state
            .graphs
            .iter()
            .filter(|g| g.namespace_id == namespace_id)
            .cloned()
            .collect())
    }

    async fn contracts(&self, namespace_id: Uuid) -> Result<Vec<Contract>> {
        let state = self.state.read().await;
        Ok(state
            .contracts
            .iter()
            .filter(|c| state.graph_namespace(c.source_graph_id) == Some(namespace_id))
            .cloned()
            .collect())
    }

    async fn feature_flags(&self, namespace_id: Uuid) -> Result<Vec<FeatureFlag>> {
        let state = self.state.read().await;
        Ok(state
            .flags
            .iter()
            .filter(|f| f.namespace_id == namespace_id)
            .cloned()
            .collect())
    }

    async fn proposals(&self, namespace_id: Uuid) -> Result<Vec<Proposal>> {
        let state = self.state.read().await;
        Ok(state
            .proposals
            .iter()
            .filter(|p| state.graph_namespace(p.federated_graph_id) == Some(namespace_id))
            .cloned()
            .collect())
    }

    async fn operation_overrides(&self, namespace_id: Uuid) -> Result<Vec<OperationOverride>> {
        Ok(self
            .state
            .read()
            .await
            .operation_overrides
            .get(&namespace_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn webhooks(&self, organization_id: Uuid) -> Result<Vec<OrganizationWebhook>> {
        let state = self.state.read().await;
        Ok(state
            .webhooks
            .iter()
            .filter(|w| w.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CheckTx>> {
        self.check_available()?;
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }

    async fn load_operation(&self, operation_id: Uuid) -> Result<StoredOperation> {
        let state = self.state.read().await;
        let operation = state
            .operations
            .get(&operation_id)
            .cloned()
            .ok_or_else(|| SchemaCheckError::NotFound(format!("check {operation_id}")))?;
        Ok(StoredOperation {
            operation,
            targets: state.targets.get(&operation_id).cloned().unwrap_or_default(),
            activated_versions: state
                .activations
                .get(&operation_id)
                .cloned()
                .unwrap_or_default(),
            override_record: state.override_records.get(&operation_id).cloned(),
        })
    }

    async fn latest_valid_version(&self, target: &TargetKey) -> Result<Option<SchemaVersion>> {
        let state = self.state.read().await;
        Ok(state
            .latest
            .get(target)
            .and_then(|id| state.versions.get(id))
            .cloned())
    }

    async fn record_override(&self, record: &OverrideRecord) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.override_records.contains_key(&record.operation_id) {
            return Ok(false);
        }
        state
            .override_records
            .insert(record.operation_id, record.clone());
        Ok(true)
    }
}

enum PendingWrite {
    Operation(CheckOperation),
    Target(TargetResult),
    UpsertSubgraph(Subgraph),
    DeleteSubgraph(Uuid),
    Version(SchemaVersion),
    Activation(Uuid, Uuid),
    Changelog(Vec<ChangelogEntry>),
    Enqueue(OutboxJob),
    Advance {
        target: TargetKey,
        expected: Option<Uuid>,
        version_id: Uuid,
    },
}

pub struct MemoryTx {
    store: MemoryStore,
    pending: Vec<PendingWrite>,
}

#[async_trait]
impl CheckTx for MemoryTx {
    async fn insert_operation(&mut self, operation: &CheckOperation) -> Result<()> {
        self.pending.push(PendingWrite::Operation(operation.clone()));
        Ok(())
    }

    async fn insert_target_result(&mut self, result: &TargetResult) -> Result<()> {
        self.pending.push(PendingWrite::Target(result.clone()));
        Ok(())
    }

    async fn upsert_subgraph(&mut self, subgraph: &Subgraph) -> Result<()> {
        self.pending.push(PendingWrite::UpsertSubgraph(subgraph.clone()));
        Ok(())
    }

    async fn delete_subgraph(&mut self, subgraph_id: Uuid) -> Result<()> {
        self.pending.push(PendingWrite::DeleteSubgraph(subgraph_id));
        Ok(())
    }

    async fn insert_schema_version(&mut self, version: &SchemaVersion) -> Result<bool> {
        let exists = self
            .store
            .state
            .read()
            .await
            .versions
            .contains_key(&version.version_id)
            || self.pending.iter().any(
                |w| matches!(w, PendingWrite::Version(v) if v.version_id == version.version_id),
            );
        if !exists {
            self.pending.push(PendingWrite::Version(version.clone()));
        }
        Ok(!exists)
    }

    async fn record_activation(&mut self, operation_id: Uuid, version_id: Uuid) -> Result<()> {
        self.pending
            .push(PendingWrite::Activation(operation_id, version_id));
        Ok(())
    }

    async fn insert_changelog(&mut self, entries: &[ChangelogEntry]) -> Result<()> {
        self.pending.push(PendingWrite::Changelog(entries.to_vec()));
        Ok(())
    }

    async fn enqueue(&mut self, job: &OutboxJob) -> Result<()> {
        self.pending.push(PendingWrite::Enqueue(job.clone()));
        Ok(())
    }

    async fn advance_latest_valid(
        &mut self,
        target: &TargetKey,
        expected: Option<Uuid>,
        version_id: Uuid,
    ) -> Result<()> {
        self.pending.push(PendingWrite::Advance {
            target: *target,
            expected,
            version_id,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { store, pending } = *self;
        store.check_available()?;
        let mut state = store.state.write().await;
        // Pointer swaps are checked before anything is applied.
        for write in &pending {
            if let PendingWrite::Advance {
                target, expected, ..
            } = write
            {
                if state.latest.get(target).copied() != *expected {
                    return Err(SchemaCheckError::ConcurrentUpdate(format!(
                        "latest valid version of {target} changed during the operation"
                    )));
                }
            }
        }
        for write in pending {
            match write {
                PendingWrite::Operation(op) => {
                    state.operations.insert(op.id, op);
                }
                PendingWrite::Target(t) => {
                    state.targets.entry(t.operation_id).or_default().push(t);
                }
                PendingWrite::UpsertSubgraph(s) => {
                    match state.subgraphs.iter_mut().find(|e| e.id == s.id) {
                        Some(existing) => *existing = s,
                        None => state.subgraphs.push(s),
                    }
                }
                PendingWrite::DeleteSubgraph(id) => state.subgraphs.retain(|s| s.id != id),
                PendingWrite::Version(v) => {
                    state.versions.insert(v.version_id, v);
                }
                PendingWrite::Activation(op, v) => {
                    state.activations.entry(op).or_default().push(v);
                }
                PendingWrite::Changelog(entries) => state.changelog.extend(entries),
                PendingWrite::Enqueue(job) => state.outbox.push(QueuedJob {
                    job,
                    status: JobStatus::Pending,
                    last_error: None,
                }),
                PendingWrite::Advance {
                    target, version_id, ..
                } => {
                    state.latest.insert(target, version_id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn claim_next(&self, _claimer_id: &str) -> Result<Option<OutboxJob>> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(entry) = state
            .outbox
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending)
        else {
            return Ok(None);
        };
        entry.status = JobStatus::Claimed;
        entry.job.attempt_count += 1;
        Ok(Some(entry.job.clone()))
    }

    async fn mark_processed(&self, job_id: Uuid) -> Result<()> {
        self.update_job(job_id, JobStatus::Processed, None).await
    }

    async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update_job(job_id, JobStatus::Pending, Some(error)).await
    }

    async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.update_job(job_id, JobStatus::DeadLetter, Some(error))
            .await
    }
}

impl MemoryStore {
    async fn update_job(&self, job_id: Uuid, status: JobStatus, error: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .iter_mut()
            .find(|j| j.job.id == job_id)
            .ok_or_else(|| SchemaCheckError::NotFound(format!("job {job_id}")))?;
        entry.status = status;
        if let Some(e) = error {
            entry.last_error = Some(e.to_string());
        }
        Ok(())
    }
}
