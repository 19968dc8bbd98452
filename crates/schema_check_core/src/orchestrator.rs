//! CheckService: the check/publish/delete pipeline.
//!
//! One operation walks `INIT → NORMALIZE → RESOLVE_TARGETS → COMPOSE_PER_TARGET →
//! DIFF_PER_TARGET → GOVERN_PER_TARGET → AGGREGATE → PERSIST → ACTIVATE → DONE`.
//! Everything up to AGGREGATE runs under the operation deadline. PERSIST and
//! ACTIVATE share one transaction and the "latest valid" pointer writes are its
//! last statements.
//!
//! `CheckServiceImpl` takes its ports via `Arc<dyn Port>` so the same pipeline
//! runs against Postgres or the in-memory stores.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{
    overall_verdict, ChangelogEntry, CheckOperation, CheckReport, CompositionAttempt,
    OperationKind, OverrideRecord, StoredOperation, TargetResult,
};
use crate::composer::{ComposedSchema, Composer, CompositionError, FederationComposer};
use crate::config::EngineConfig;
use crate::diff::diff_schemas;
use crate::error::{Result, SchemaCheckError};
use crate::governance::extension::ExtensionTransport;
use crate::governance::lint::lint_schema;
use crate::governance::proposal::{evaluate_proposals, ProposalGate};
use crate::governance::pruning::prune_check;
use crate::governance::traffic::{TrafficFilter, TrafficInspector};
use crate::governance::{GateContext, GateOutcome, GovernanceGate};
use crate::jobs::{
    CacheWarmerJob, GraphRef, JobPayload, OrganizationRef, OutboxJob, SchemaUpdatedEvent,
};
use crate::labels::parse_labels;
use crate::normalize::{normalize, NormalizedSchema};
use crate::ports::{AuditStore, CatalogStore, CheckTx};
use crate::principal::Principal;
use crate::resolver::{resolve_targets, ResolveRequest, ResolvedTarget};
use crate::types::{Namespace, SchemaVersion, Subgraph, TargetKey, TargetKind};

// ── Requests ──────────────────────────────────────────────────

/// Body of a check or publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaChangeRequest {
    pub namespace: String,
    pub subgraph_name: String,
    pub schema_sdl: String,
    /// Replaces the subgraph's labels. Required to check a subgraph that does not exist yet.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// Required to publish a subgraph that does not exist yet.
    #[serde(default)]
    pub routing_url: Option<String>,
    #[serde(default)]
    pub subscription_url: Option<String>,
    #[serde(default)]
    pub subscription_protocol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSubgraphRequest {
    pub namespace: String,
    pub subgraph_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForceSuccessRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Init,
    Normalize,
    ResolveTargets,
    ComposePerTarget,
    DiffPerTarget,
    GovernPerTarget,
    Aggregate,
    Persist,
    Activate,
    Done,
    Failed,
}

fn transition(correlation_id: Uuid, state: OperationState) {
    info!(correlation_id = %correlation_id, state = %state, "operation state");
}

// ── CheckService trait ────────────────────────────────────────

/// Entry points of the engine. Every method takes the caller explicitly.
#[async_trait]
pub trait CheckService: Send + Sync {
    /// Validate a proposed subgraph schema against every target it affects.
    async fn check(&self, principal: &Principal, req: SchemaChangeRequest) -> Result<CheckReport>;

    /// Check, then activate the new schema when every target passes.
    async fn publish(&self, principal: &Principal, req: SchemaChangeRequest)
        -> Result<CheckReport>;

    /// Remove a subgraph and recompose everything that contained it.
    async fn delete(&self, principal: &Principal, req: DeleteSubgraphRequest)
        -> Result<CheckReport>;

    /// Read back a recorded operation. The verdict is recomputed from its rows.
    async fn get_check(&self, principal: &Principal, operation_id: Uuid) -> Result<CheckReport>;

    /// Record an operator override of a check's breaking-change findings.
    async fn force_check_success(
        &self,
        principal: &Principal,
        operation_id: Uuid,
        reason: Option<String>,
    ) -> Result<CheckReport>;
}

// ── CheckServiceImpl ──────────────────────────────────────────

pub struct CheckServiceImpl {
    pub catalog: Arc<dyn CatalogStore>,
    pub audit: Arc<dyn AuditStore>,
    pub composer: Arc<dyn Composer>,
    pub gate: GovernanceGate,
    pub config: EngineConfig,
    permits: Arc<Semaphore>,
}

impl CheckServiceImpl {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        audit: Arc<dyn AuditStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            audit,
            composer: Arc::new(FederationComposer::new()),
            gate: GovernanceGate::new()
                .with_extension_timing(config.extension_timeout(), config.extension_retry_backoff()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_compositions.max(1))),
            config,
        }
    }

    /// Replace the built-in composer (builder pattern).
    pub fn with_composer(mut self, composer: Arc<dyn Composer>) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_extension_transport(mut self, transport: Arc<dyn ExtensionTransport>) -> Self {
        self.gate = self.gate.with_extension_transport(transport);
        self
    }

    pub fn with_traffic_inspector(mut self, inspector: Arc<dyn TrafficInspector>) -> Self {
        self.gate = self.gate.with_traffic_inspector(inspector);
        self
    }

    async fn load_scoped(&self, principal: &Principal, operation_id: Uuid) -> Result<StoredOperation> {
        let stored = self.audit.load_operation(operation_id).await?;
        if stored.operation.organization_id != principal.organization_id {
            return Err(SchemaCheckError::NotFound(format!("check {operation_id}")));
        }
        Ok(stored)
    }
}

/// Normalized operation input shared by check, publish and delete.
struct OperationInput {
    kind: OperationKind,
    namespace: String,
    subgraph_name: String,
    proposed_sdl: Option<String>,
    labels: Option<Vec<String>>,
    routing_url: Option<String>,
    subscription_url: Option<String>,
    subscription_protocol: Option<String>,
}

impl OperationInput {
    fn from_change(kind: OperationKind, req: SchemaChangeRequest) -> Result<Self> {
        if req.schema_sdl.trim().is_empty() {
            return Err(SchemaCheckError::InvalidInput("schema_sdl is empty".into()));
        }
        Ok(Self {
            kind,
            namespace: req.namespace,
            subgraph_name: req.subgraph_name,
            proposed_sdl: Some(req.schema_sdl),
            labels: req.labels,
            routing_url: req.routing_url,
            subscription_url: req.subscription_url,
            subscription_protocol: req.subscription_protocol,
        })
    }

    fn from_delete(req: DeleteSubgraphRequest) -> Self {
        Self {
            kind: OperationKind::Delete,
            namespace: req.namespace,
            subgraph_name: req.subgraph_name,
            proposed_sdl: None,
            labels: None,
            routing_url: None,
            subscription_url: None,
            subscription_protocol: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(SchemaCheckError::InvalidInput("namespace is empty".into()));
        }
        if self.subgraph_name.trim().is_empty() {
            return Err(SchemaCheckError::InvalidInput("subgraph_name is empty".into()));
        }
        Ok(())
    }

    /// The subgraph as it would look after this operation, and whether it is new.
    fn changed_subgraph(&self, namespace: &Namespace, existing: Option<&Subgraph>) -> Result<Subgraph> {
        let labels = self
            .labels
            .as_deref()
            .map(|raw| parse_labels(raw))
            .transpose()?;

        match (existing, self.kind) {
            (Some(current), OperationKind::Delete) => Ok(current.clone()),
            (Some(current), _) => {
                let mut s = current.clone();
                if let Some(labels) = labels {
                    s.labels = labels;
                }
                if let Some(url) = &self.routing_url {
                    s.routing_url = url.clone();
                }
                if self.subscription_url.is_some() {
                    s.subscription_url = self.subscription_url.clone();
                }
                if self.subscription_protocol.is_some() {
                    s.subscription_protocol = self.subscription_protocol.clone();
                }
                s.sdl = self.proposed_sdl.clone();
                Ok(s)
            }
            (None, OperationKind::Delete) => Err(SchemaCheckError::NotFound(format!(
                "subgraph {} in namespace {}",
                self.subgraph_name, namespace.name
            ))),
            (None, kind) => {
                let labels = match (labels, kind) {
                    (Some(l), _) => l,
                    (None, OperationKind::Publish) => BTreeSet::new(),
                    (None, _) => {
                        return Err(SchemaCheckError::InvalidInput(format!(
                            "subgraph {} does not exist; labels are required to check it",
                            self.subgraph_name
                        )))
                    }
                };
                let routing_url = match (&self.routing_url, kind) {
                    (Some(url), _) if !url.trim().is_empty() => url.clone(),
                    (_, OperationKind::Publish) => {
                        return Err(SchemaCheckError::InvalidInput(format!(
                            "subgraph {} does not exist; routing_url is required to create it",
                            self.subgraph_name
                        )))
                    }
                    _ => String::new(),
                };
                Ok(Subgraph {
                    id: Uuid::new_v4(),
                    namespace_id: namespace.id,
                    name: self.subgraph_name.clone(),
                    routing_url,
                    subscription_url: self.subscription_url.clone(),
                    subscription_protocol: self.subscription_protocol.clone(),
                    labels,
                    sdl: self.proposed_sdl.clone(),
                    base_subgraph_id: None,
                })
            }
        }
    }
}

/// Output of the evaluation phase (everything before PERSIST).
struct Evaluation {
    changed: Subgraph,
    targets: Vec<TargetResult>,
    /// Latest valid version each target was diffed against. Activation
    /// swaps the pointer only if it still holds this version.
    baselines: HashMap<TargetKey, SchemaVersion>,
}

struct Composed {
    attempt: CompositionAttempt,
    schema: Option<ComposedSchema>,
}

impl Composed {
    fn from_result(result: std::result::Result<ComposedSchema, Vec<CompositionError>>, ms: u64) -> Self {
        match result {
            Ok(schema) => Self {
                attempt: CompositionAttempt {
                    is_composable: true,
                    errors: Vec::new(),
                    composed_sdl: Some(schema.federated_sdl.clone()),
                    client_sdl: Some(schema.federated_client_sdl.clone()),
                    duration_ms: ms,
                },
                schema: Some(schema),
            },
            Err(errors) => Self {
                attempt: CompositionAttempt {
                    is_composable: false,
                    errors,
                    composed_sdl: None,
                    client_sdl: None,
                    duration_ms: ms,
                },
                schema: None,
            },
        }
    }
}

impl CheckServiceImpl {
    #[tracing::instrument(
        skip_all,
        fields(
            kind = %input.kind,
            namespace = %input.namespace,
            subgraph = %input.subgraph_name,
            correlation_id = tracing::field::Empty
        )
    )]
    async fn run(&self, principal: &Principal, input: OperationInput) -> Result<CheckReport> {
        input.validate()?;
        let operation_id = Uuid::new_v4();
        tracing::Span::current().record("correlation_id", tracing::field::display(operation_id));
        transition(operation_id, OperationState::Init);

        let namespace = self
            .catalog
            .namespace_by_name(principal.organization_id, &input.namespace)
            .await?;
        let mut operation = CheckOperation {
            id: operation_id,
            kind: input.kind,
            organization_id: principal.organization_id,
            namespace_id: namespace.id,
            subgraph_id: None,
            subgraph_name: input.subgraph_name.clone(),
            proposed_sdl: input.proposed_sdl.clone(),
            actor_id: principal.actor_id.clone(),
            proposal_match_message: None,
            infra_error: None,
            created_at: Utc::now(),
        };

        let deadline = self.config.operation_timeout();
        let evaluated =
            tokio::time::timeout(deadline, self.evaluate(&namespace, &input, &mut operation)).await;

        let evaluation = match evaluated {
            Ok(Ok(evaluation)) => evaluation,
            Ok(Err(e)) => {
                transition(operation_id, OperationState::Failed);
                if e.is_retryable() {
                    error!(correlation_id = %operation_id, error = %e, "operation failed");
                }
                return Err(e);
            }
            Err(_) => {
                error!(
                    correlation_id = %operation_id,
                    timeout_secs = deadline.as_secs(),
                    "operation deadline exceeded"
                );
                transition(operation_id, OperationState::Failed);
                operation.infra_error = Some(format!(
                    "operation timed out after {}s",
                    deadline.as_secs()
                ));
                let mut tx = self.audit.begin().await?;
                tx.insert_operation(&operation).await?;
                tx.commit().await?;
                return Ok(CheckReport::from_stored(&StoredOperation {
                    operation,
                    targets: Vec::new(),
                    activated_versions: Vec::new(),
                    override_record: None,
                }));
            }
        };

        let verdict = overall_verdict(&operation, &evaluation.targets, false);
        info!(correlation_id = %operation_id, state = %OperationState::Aggregate, verdict = %verdict, targets = evaluation.targets.len(), "operation state");
        let activate = operation.kind.activates() && verdict.is_success();

        transition(operation_id, OperationState::Persist);
        let mut tx = self.audit.begin().await?;
        let activated = match self
            .persist(tx.as_mut(), &operation, &evaluation, activate, &namespace)
            .await
        {
            Ok(activated) => activated,
            Err(e) => {
                error!(correlation_id = %operation_id, error = %e, "persist failed, rolling back");
                if let Err(rb) = tx.rollback().await {
                    warn!(correlation_id = %operation_id, error = %rb, "rollback failed");
                }
                transition(operation_id, OperationState::Failed);
                return Err(e);
            }
        };
        if let Err(e) = tx.commit().await {
            error!(correlation_id = %operation_id, error = %e, "commit failed");
            transition(operation_id, OperationState::Failed);
            return Err(e);
        }
        transition(operation_id, OperationState::Done);

        Ok(CheckReport::from_stored(&StoredOperation {
            operation,
            targets: evaluation.targets,
            activated_versions: activated,
            override_record: None,
        }))
    }

    async fn evaluate(
        &self,
        namespace: &Namespace,
        input: &OperationInput,
        operation: &mut CheckOperation,
    ) -> Result<Evaluation> {
        let op_id = operation.id;
        let settings = &namespace.settings;

        transition(op_id, OperationState::Normalize);
        let proposed = input.proposed_sdl.as_deref().map(normalize);

        transition(op_id, OperationState::ResolveTargets);
        let subgraphs = self.catalog.subgraphs(namespace.id).await?;
        let existing = subgraphs
            .iter()
            .find(|s| s.name == input.subgraph_name)
            .cloned();
        let changed = input.changed_subgraph(namespace, existing.as_ref())?;
        operation.subgraph_id = Some(changed.id);

        let graphs = self.catalog.federated_graphs(namespace.id).await?;
        let contracts = self.catalog.contracts(namespace.id).await?;
        let flags = self.catalog.feature_flags(namespace.id).await?;
        let resolved = resolve_targets(&ResolveRequest {
            kind: input.kind,
            changed: &changed,
            namespace_subgraphs: &subgraphs,
            federated_graphs: &graphs,
            contracts: &contracts,
            feature_flags: &flags,
        });
        info!(correlation_id = %op_id, targets = resolved.len(), "targets resolved");

        if resolved.is_empty() {
            if let Some(Err(e)) = &proposed {
                return Err(e.clone().into());
            }
            return Ok(Evaluation {
                changed,
                targets: Vec::new(),
                baselines: HashMap::new(),
            });
        }

        // Governance inputs computed once per operation.
        let proposed_schema = proposed.as_ref().and_then(|r| r.as_ref().ok());
        let previous = existing
            .as_ref()
            .and_then(|s| s.sdl.as_deref())
            .and_then(|sdl| normalize(sdl).ok())
            .unwrap_or_else(NormalizedSchema::empty);
        let lint_issues = match proposed_schema {
            Some(schema) if settings.lint_enabled => lint_schema(schema, &settings.lint_rules),
            _ => Vec::new(),
        };
        let pruning_issues = match proposed_schema {
            Some(schema) if settings.pruning_enabled => prune_check(
                &previous,
                &diff_schemas(&previous, schema),
                &settings.pruning_rules,
            ),
            _ => Vec::new(),
        };

        let proposal = if settings.proposals.enabled && !changed.is_feature_subgraph() {
            let graph_ids: BTreeSet<Uuid> = resolved
                .iter()
                .map(|t| t.target.federated_graph_id)
                .collect();
            let proposals: Vec<_> = self
                .catalog
                .proposals(namespace.id)
                .await?
                .into_iter()
                .filter(|p| graph_ids.contains(&p.federated_graph_id))
                .collect();
            let gate = match input.kind {
                OperationKind::Check => ProposalGate::Check,
                OperationKind::Publish | OperationKind::Delete => ProposalGate::Publish,
            };
            evaluate_proposals(
                &settings.proposals,
                gate,
                &changed.name,
                input.proposed_sdl.as_deref(),
                &proposals,
            )
        } else {
            None
        };
        operation.proposal_match_message = proposal
            .as_ref()
            .and_then(|p| p.mismatch.as_ref())
            .map(|m| m.message.clone());

        let overrides = if settings.traffic_check_enabled {
            self.catalog.operation_overrides(namespace.id).await?
        } else {
            Vec::new()
        };
        let days = self.config.traffic_window_days(settings.checks_timeframe_days);

        transition(op_id, OperationState::ComposePerTarget);
        let composed = self.compose_all(&resolved).await?;

        transition(op_id, OperationState::DiffPerTarget);
        let mut diffs = Vec::with_capacity(resolved.len());
        let mut baselines = HashMap::new();
        for (r, c) in resolved.iter().zip(&composed) {
            let Some(schema) = &c.schema else {
                diffs.push(Vec::new());
                continue;
            };
            let old = match self.audit.latest_valid_version(&r.target.key).await? {
                Some(v) => {
                    let parsed = normalize(&v.client_sdl).unwrap_or_else(|e| {
                        warn!(target = %r.target.key, error = %e, "stored client schema does not parse, diffing against empty");
                        NormalizedSchema::empty()
                    });
                    baselines.insert(r.target.key, v);
                    parsed
                }
                None => NormalizedSchema::empty(),
            };
            diffs.push(diff_schemas(&old, &schema.client_schema));
        }

        transition(op_id, OperationState::GovernPerTarget);
        let reports = join_all(resolved.iter().zip(&composed).zip(&diffs).map(
            |((r, c), changes)| {
                self.gate.evaluate(GateContext {
                    settings,
                    namespace: &namespace.name,
                    subgraph_name: &changed.name,
                    target: &r.target,
                    composable: c.attempt.is_composable,
                    composed_sdl: c.attempt.composed_sdl.as_deref(),
                    changes,
                    lint_issues: &lint_issues,
                    pruning_issues: &pruning_issues,
                    proposal: proposal.as_ref(),
                    overrides: &overrides,
                    traffic_filter: TrafficFilter {
                        organization_id: namespace.organization_id,
                        federated_graph_id: r.target.federated_graph_id,
                        subgraph_id: Some(changed.id),
                        days,
                    },
                    gate_breaking_changes: input.kind == OperationKind::Check,
                })
            },
        ))
        .await;

        let linkages = proposal
            .as_ref()
            .map(|p| p.linkages.clone())
            .unwrap_or_default();
        let now = Utc::now();
        let targets = resolved
            .into_iter()
            .zip(composed)
            .zip(diffs)
            .zip(reports)
            .map(|(((r, c), changes), report)| {
                debug!(
                    correlation_id = %op_id,
                    target = %r.target.key,
                    name = %r.target.name,
                    composable = c.attempt.is_composable,
                    changes = changes.len(),
                    outcome = %report.outcome,
                    "target evaluated"
                );
                if report.outcome != GateOutcome::Pass {
                    warn!(
                        correlation_id = %op_id,
                        target = %r.target.key,
                        findings = report.findings.len(),
                        outcome = %report.outcome,
                        "governance did not pass"
                    );
                }
                TargetResult {
                    check_id: Uuid::new_v4(),
                    operation_id: op_id,
                    target: r.target.key,
                    target_name: r.target.name,
                    federated_graph_id: r.target.federated_graph_id,
                    composition: c.attempt,
                    changes,
                    lint_issues: lint_issues.clone(),
                    pruning_issues: pruning_issues.clone(),
                    findings: report.findings,
                    extension: report.extension,
                    traffic: report.traffic,
                    proposal_linkages: linkages.clone(),
                    gate_outcome: report.outcome,
                    created_at: now,
                }
            })
            .collect();

        Ok(Evaluation {
            changed,
            targets,
            baselines,
        })
    }

    /// Compose base graphs and feature-flag variants on the bounded pool, then
    /// derive contracts from their base graph's composition.
    async fn compose_all(&self, resolved: &[ResolvedTarget]) -> Result<Vec<Composed>> {
        let tasks = resolved
            .iter()
            .enumerate()
            .filter(|(_, r)| r.target.contract.is_none())
            .map(|(i, r)| {
                let composer = Arc::clone(&self.composer);
                let permits = Arc::clone(&self.permits);
                let subgraphs = r.subgraphs.clone();
                async move {
                    let permit = permits.acquire_owned().await.ok();
                    // Composition is CPU-bound; the permit lives as long as the blocking task.
                    let joined = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        let started = Instant::now();
                        let result = composer.compose(&subgraphs);
                        (result, started.elapsed().as_millis() as u64)
                    })
                    .await;
                    (i, joined)
                }
            });

        let mut out: Vec<Option<Composed>> = resolved.iter().map(|_| None).collect();
        for (i, joined) in join_all(tasks).await {
            let (result, ms) =
                joined.map_err(|e| SchemaCheckError::Internal(anyhow!("composition task failed: {e}")))?;
            out[i] = Some(Composed::from_result(result, ms));
        }

        for (i, r) in resolved.iter().enumerate() {
            let Some(filter) = &r.target.contract else {
                continue;
            };
            let base = resolved.iter().position(|b| {
                b.target.key.kind == TargetKind::FederatedGraph
                    && b.target.key.target_id == r.target.federated_graph_id
            });
            let started = Instant::now();
            let result = match base.and_then(|b| out[b].as_ref()) {
                Some(Composed {
                    schema: Some(base_schema),
                    ..
                }) => self.composer.apply_contract(base_schema, filter),
                Some(Composed { attempt, .. }) => Err(attempt.errors.clone()),
                None => Err(vec![CompositionError::new(
                    crate::error::CODE_COMPOSE_CONTRACT,
                    format!(
                        "base graph {} was not composed",
                        r.target.federated_graph_name
                    ),
                )]),
            };
            out[i] = Some(Composed::from_result(
                result,
                started.elapsed().as_millis() as u64,
            ));
        }

        out.into_iter()
            .map(|c| c.ok_or_else(|| SchemaCheckError::Internal(anyhow!("target left uncomposed"))))
            .collect()
    }

    /// PERSIST, then ACTIVATE when allowed. Returns the activated version ids.
    async fn persist(
        &self,
        tx: &mut dyn CheckTx,
        operation: &CheckOperation,
        evaluation: &Evaluation,
        activate: bool,
        namespace: &Namespace,
    ) -> Result<Vec<Uuid>> {
        tx.insert_operation(operation).await?;
        for target in &evaluation.targets {
            tx.insert_target_result(target).await?;
        }
        if !activate {
            return Ok(Vec::new());
        }

        transition(operation.id, OperationState::Activate);
        match operation.kind {
            OperationKind::Publish => tx.upsert_subgraph(&evaluation.changed).await?,
            OperationKind::Delete => tx.delete_subgraph(evaluation.changed.id).await?,
            OperationKind::Check => {}
        }

        let now = Utc::now();
        let mut pointers = Vec::new();
        for t in &evaluation.targets {
            let (Some(sdl), Some(client_sdl)) =
                (&t.composition.composed_sdl, &t.composition.client_sdl)
            else {
                continue;
            };
            let baseline = evaluation.baselines.get(&t.target);
            // An unchanged composition keeps the current version; anything else,
            // including a revert to older content, gets a fresh one.
            let (version, created) = match baseline {
                Some(current) if current.has_content(sdl, client_sdl) => (current.clone(), false),
                _ => {
                    let version = SchemaVersion::new(t.target, sdl.clone(), client_sdl.clone());
                    let created = tx.insert_schema_version(&version).await?;
                    (version, created)
                }
            };
            debug!(
                correlation_id = %operation.id,
                target = %t.target,
                version_id = %version.version_id,
                created,
                "schema version"
            );
            tx.record_activation(operation.id, version.version_id).await?;

            if t.target.kind == TargetKind::FederatedGraph && !t.changes.is_empty() {
                let entries: Vec<ChangelogEntry> = t
                    .changes
                    .iter()
                    .map(|change| ChangelogEntry {
                        schema_version_id: version.version_id,
                        federated_graph_id: t.federated_graph_id,
                        change: change.clone(),
                        created_at: now,
                    })
                    .collect();
                tx.insert_changelog(&entries).await?;
            }

            if t.target.kind == TargetKind::FederatedGraph {
                tx.enqueue(&OutboxJob::new(
                    operation.id,
                    JobPayload::CacheWarmerRecompute(CacheWarmerJob {
                        organization_id: operation.organization_id,
                        federated_graph_id: t.federated_graph_id,
                        range_in_hours: self.config.cache_warmer_range_hours,
                    }),
                ))
                .await?;
            }
            if t.target.kind != TargetKind::FeatureFlagVariant {
                tx.enqueue(&OutboxJob::new(
                    operation.id,
                    JobPayload::FederatedGraphSchemaUpdated(SchemaUpdatedEvent {
                        federated_graph: GraphRef {
                            id: t.target.target_id,
                            name: t.target_name.clone(),
                            namespace: namespace.name.clone(),
                        },
                        organization: OrganizationRef {
                            id: operation.organization_id,
                        },
                        errors: false,
                        actor_id: operation.actor_id.clone(),
                    }),
                ))
                .await?;
            }
            pointers.push((t.target, baseline.map(|v| v.version_id), version.version_id));
        }

        for (target, expected, version_id) in &pointers {
            tx.advance_latest_valid(target, *expected, *version_id).await?;
        }
        info!(
            correlation_id = %operation.id,
            activated = pointers.len(),
            "latest valid pointers advanced"
        );
        Ok(pointers.into_iter().map(|(_, _, v)| v).collect())
    }
}

#[async_trait]
impl CheckService for CheckServiceImpl {
    async fn check(&self, principal: &Principal, req: SchemaChangeRequest) -> Result<CheckReport> {
        self.run(principal, OperationInput::from_change(OperationKind::Check, req)?)
            .await
    }

    async fn publish(
        &self,
        principal: &Principal,
        req: SchemaChangeRequest,
    ) -> Result<CheckReport> {
        self.run(principal, OperationInput::from_change(OperationKind::Publish, req)?)
            .await
    }

    async fn delete(
        &self,
        principal: &Principal,
        req: DeleteSubgraphRequest,
    ) -> Result<CheckReport> {
        self.run(principal, OperationInput::from_delete(req)).await
    }

    async fn get_check(&self, principal: &Principal, operation_id: Uuid) -> Result<CheckReport> {
        let stored = self.load_scoped(principal, operation_id).await?;
        Ok(CheckReport::from_stored(&stored))
    }

    #[tracing::instrument(skip(self, principal, reason), fields(actor = %principal.actor_id))]
    async fn force_check_success(
        &self,
        principal: &Principal,
        operation_id: Uuid,
        reason: Option<String>,
    ) -> Result<CheckReport> {
        let stored = self.load_scoped(principal, operation_id).await?;
        if stored.operation.kind != OperationKind::Check {
            return Err(SchemaCheckError::InvalidInput(format!(
                "operation {operation_id} is a {}; only checks can be forced to success",
                stored.operation.kind
            )));
        }
        let record = OverrideRecord {
            operation_id,
            actor_id: principal.actor_id.clone(),
            reason,
            created_at: Utc::now(),
        };
        if self.audit.record_override(&record).await? {
            info!(correlation_id = %operation_id, "check forced to success");
        } else {
            debug!(correlation_id = %operation_id, "check was already overridden");
        }
        let stored = self.audit.load_operation(operation_id).await?;
        Ok(CheckReport::from_stored(&stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use crate::audit::Verdict;
    use crate::error::{CODE_BREAKING_UNVERIFIED, CODE_PROPOSAL_MISMATCH, CODE_TRAFFIC_CLIENT_USAGE};
    use crate::governance::extension::tests::ScriptedTransport;
    use crate::governance::extension::{
        CheckExtensionConfig, ExtensionRequest, ExtensionResponse, ExtensionVerdict,
    };
    use crate::governance::traffic::tests::FixedInspector;
    use crate::jobs::JobPayload;
    use crate::labels::LabelMatcher;
    use crate::memory::MemoryStore;
    use crate::types::{
        Contract, FeatureFlag, FederatedGraph, NamespaceSettings, Proposal, ProposalState,
        ProposalSubgraph, TargetKey,
    };

    const PRODUCTS: &str = r#"
        type Product @key(fields: "upc") {
          upc: String!
          name: String @tag(name: "public")
          price: Int
        }
        type Query { topProducts(first: Int = 5): [Product] }
    "#;

    const REVIEWS: &str = r#"
        type Review @key(fields: "id") {
          id: ID!
          body: String
          product: Product
        }
        type Product @key(fields: "upc") {
          upc: String!
          reviews: [Review]
        }
        type Query { review(id: ID!): Review }
    "#;

    const INVENTORY: &str = r#"
        type Review @key(fields: "id") {
          id: ID!
          body: String @external
          summary: String @requires(fields: "body")
        }
        type Query { inStock: Boolean }
    "#;

    struct Fixture {
        store: MemoryStore,
        principal: Principal,
        namespace: Namespace,
        prod: FederatedGraph,
    }

    impl Fixture {
        async fn new(settings: NamespaceSettings) -> Self {
            let org = Uuid::new_v4();
            let store = MemoryStore::new();
            let namespace = Namespace {
                id: Uuid::new_v4(),
                organization_id: org,
                name: "default".into(),
                settings,
            };
            store.add_namespace(namespace.clone()).await;
            let prod = FederatedGraph {
                id: Uuid::new_v4(),
                namespace_id: namespace.id,
                name: "prod".into(),
                routing_url: "http://router/graphql".into(),
                label_matchers: vec![LabelMatcher::parse("team=core").unwrap()],
            };
            store.add_federated_graph(prod.clone()).await;
            for (name, sdl) in [("products", PRODUCTS), ("inventory", INVENTORY)] {
                store.add_subgraph(subgraph(namespace.id, name, Some(sdl))).await;
            }
            Self {
                store,
                principal: Principal::new("alice", org),
                namespace,
                prod,
            }
        }

        fn service(&self) -> CheckServiceImpl {
            CheckServiceImpl::new(
                Arc::new(self.store.clone()),
                Arc::new(self.store.clone()),
                EngineConfig::default().extension_retry_backoff_ms(1),
            )
        }

        fn prod_key(&self) -> TargetKey {
            TargetKey {
                target_id: self.prod.id,
                kind: TargetKind::FederatedGraph,
            }
        }

        async fn seed_reviews(&self) -> Subgraph {
            let reviews = subgraph(self.namespace.id, "reviews", Some(REVIEWS));
            self.store.add_subgraph(reviews.clone()).await;
            reviews
        }
    }

    fn subgraph(namespace_id: Uuid, name: &str, sdl: Option<&str>) -> Subgraph {
        Subgraph {
            id: Uuid::new_v4(),
            namespace_id,
            name: name.into(),
            routing_url: format!("http://{name}"),
            subscription_url: None,
            subscription_protocol: None,
            labels: parse_labels(&["team=core"]).unwrap(),
            sdl: sdl.map(str::to_string),
            base_subgraph_id: None,
        }
    }

    fn change(sdl: &str) -> SchemaChangeRequest {
        SchemaChangeRequest {
            namespace: "default".into(),
            subgraph_name: "reviews".into(),
            schema_sdl: sdl.into(),
            labels: Some(vec!["team=core".into()]),
            routing_url: Some("http://reviews".into()),
            subscription_url: None,
            subscription_protocol: None,
        }
    }

    fn with_rating() -> String {
        REVIEWS.replace("body: String\n", "body: String\n          rating: Int\n")
    }

    fn without_body() -> String {
        REVIEWS.replace("body: String\n", "")
    }

    fn without_product() -> String {
        REVIEWS.replace("product: Product\n", "")
    }

    // ── Scenarios ──────────────────────────────────────────────

    #[tokio::test]
    async fn nullable_field_addition_passes() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();

        let report = svc.check(&fx.principal, change(&with_rating())).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.targets.len(), 1);
        let target = &report.targets[0];
        assert!(target.is_composable);
        assert_eq!(target.changes.len(), 1);
        assert_eq!(target.changes[0].change_type, crate::diff::ChangeType::Added);
        assert!(!target.changes[0].is_breaking());
        assert!(!target.has_breaking_changes);
    }

    #[tokio::test]
    async fn removing_referenced_field_is_not_composable() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let p1 = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(p1.verdict, Verdict::Success);
        let pointer = fx.store.latest_pointer(&fx.prod_key()).await;
        assert_eq!(pointer, Some(p1.activated_version_ids[0]));

        let p2 = svc.publish(&fx.principal, change(&without_body())).await.unwrap();
        assert_eq!(p2.verdict, Verdict::NotComposable);
        assert!(!p2.targets[0].is_composable);
        assert!(!p2.targets[0].composition_errors.is_empty());
        assert!(p2.activated_version_ids.is_empty());
        assert_eq!(fx.store.latest_pointer(&fx.prod_key()).await, pointer);

        let stored = fx
            .store
            .subgraph_by_name(fx.namespace.id, "reviews")
            .await
            .unwrap();
        assert_eq!(stored.sdl.as_deref(), Some(REVIEWS));

        let read_back = svc.get_check(&fx.principal, p2.operation_id).await.unwrap();
        assert_eq!(read_back.verdict, Verdict::NotComposable);
        assert_eq!(read_back.targets.len(), 1);
    }

    #[tokio::test]
    async fn extension_outage_is_infrastructure_error() {
        let settings = NamespaceSettings {
            check_extension: Some(CheckExtensionConfig {
                endpoint: "http://ext/check".into(),
                secret: "s3cret".into(),
                include_schema_changes: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let fx = Fixture::new(settings).await;
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(500, "oops"),
            ScriptedTransport::ok(500, "oops"),
        ]));
        let svc = fx.service().with_extension_transport(transport.clone());

        let report = svc.check(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::InfrastructureError);
        assert_ne!(report.verdict, Verdict::GovernanceViolation);
        let ext = report.targets[0].extension.as_ref().unwrap();
        assert_eq!(ext.verdict, ExtensionVerdict::InfraError);
        assert_eq!(ext.attempts.len(), 2);
        assert_eq!(transport.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn extension_fail_is_governance_violation() {
        let settings = NamespaceSettings {
            check_extension: Some(CheckExtensionConfig {
                endpoint: "http://ext/check".into(),
                secret: "s3cret".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let fx = Fixture::new(settings).await;
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(
            200,
            r#"{"pass": false, "message": "no"}"#,
        )]));
        let svc = fx.service().with_extension_transport(transport);
        let report = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::GovernanceViolation);
        assert_eq!(fx.store.latest_pointer(&fx.prod_key()).await, None);
    }

    #[tokio::test]
    async fn one_failing_target_fails_operation_and_both_are_persisted() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        // A second graph that does not contain inventory composes fine.
        let other = FederatedGraph {
            id: Uuid::new_v4(),
            namespace_id: fx.namespace.id,
            name: "edge".into(),
            routing_url: "http://edge/graphql".into(),
            label_matchers: vec![LabelMatcher::parse("edge=yes").unwrap()],
        };
        fx.store.add_federated_graph(other.clone()).await;
        let svc = fx.service();
        svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();

        let mut req = change(&without_body());
        req.labels = Some(vec!["team=core".into(), "edge=yes".into()]);
        let report = svc.check(&fx.principal, req).await.unwrap();
        assert_eq!(report.targets.len(), 2);
        let edge = report.targets.iter().find(|t| t.target_name == "edge").unwrap();
        let prod = report.targets.iter().find(|t| t.target_name == "prod").unwrap();
        assert!(edge.is_composable);
        assert!(!prod.is_composable);
        assert_eq!(report.verdict, Verdict::NotComposable);

        let read_back = svc.get_check(&fx.principal, report.operation_id).await.unwrap();
        assert_eq!(read_back.targets.len(), 2);
    }

    #[tokio::test]
    async fn failed_publish_keeps_previous_pointer() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let p1 = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        let p2 = svc.publish(&fx.principal, change(&without_body())).await.unwrap();
        assert!(!p2.verdict.is_success());
        let latest = svc
            .audit
            .latest_valid_version(&fx.prod_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version_id, p1.activated_version_ids[0]);
    }

    #[tokio::test]
    async fn republishing_same_schema_is_idempotent() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let p1 = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        let count = fx.store.version_count().await;
        let p2 = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(p1.activated_version_ids, p2.activated_version_ids);
        assert_eq!(fx.store.version_count().await, count);
        assert!(p2.targets[0].changes.is_empty());
    }

    #[tokio::test]
    async fn publish_activates_and_enqueues_jobs() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let report = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);

        let created = fx
            .store
            .subgraph_by_name(fx.namespace.id, "reviews")
            .await
            .unwrap();
        assert_eq!(created.sdl.as_deref(), Some(REVIEWS));

        let changelog = fx.store.changelog().await;
        assert!(!changelog.is_empty());
        assert!(changelog
            .iter()
            .all(|e| e.schema_version_id == report.activated_version_ids[0]));

        let jobs = fx.store.jobs().await;
        let types: Vec<&str> = jobs.iter().map(|j| j.job.job.job_type()).collect();
        assert_eq!(
            types,
            vec![
                crate::jobs::JOB_CACHE_WARMER_RECOMPUTE,
                crate::jobs::JOB_WEBHOOK_SCHEMA_UPDATED
            ]
        );
        match &jobs[1].job.job {
            JobPayload::FederatedGraphSchemaUpdated(e) => {
                assert_eq!(e.federated_graph.id, fx.prod.id);
                assert_eq!(e.actor_id, "alice");
                assert!(!e.errors);
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_never_activates() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let report = svc.check(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert!(report.activated_version_ids.is_empty());
        assert_eq!(fx.store.latest_pointer(&fx.prod_key()).await, None);
        assert!(fx.store.jobs().await.is_empty());
        assert!(fx
            .store
            .subgraph_by_name(fx.namespace.id, "reviews")
            .await
            .is_none());
    }

    // ── Target fan-out ─────────────────────────────────────────

    #[tokio::test]
    async fn unmatched_subgraph_short_circuits() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let mut req = change(REVIEWS);
        req.labels = Some(vec!["team=elsewhere".into()]);
        let report = svc.check(&fx.principal, req).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert!(report.targets.is_empty());
        let read_back = svc.get_check(&fx.principal, report.operation_id).await.unwrap();
        assert_eq!(read_back.verdict, Verdict::Success);
    }

    #[tokio::test]
    async fn new_subgraph_requires_labels_for_check_and_url_for_publish() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let mut req = change(REVIEWS);
        req.labels = None;
        let err = svc.check(&fx.principal, req).await.unwrap_err();
        assert_eq!(err.http_status(), 400);

        let mut req = change(REVIEWS);
        req.routing_url = None;
        let err = svc.publish(&fx.principal, req).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn invalid_sdl_fails_targets_not_the_call() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let report = svc.check(&fx.principal, change("type Query {")).await.unwrap();
        assert_eq!(report.verdict, Verdict::NotComposable);
        assert!(!report.targets[0].composition_errors.is_empty());

        let mut req = change("type Query {");
        req.labels = Some(vec!["team=elsewhere".into()]);
        let err = svc.check(&fx.principal, req).await.unwrap_err();
        assert_eq!(err.http_status(), 422);
    }

    #[tokio::test]
    async fn contracts_are_composed_from_base() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let contract = Contract {
            id: Uuid::new_v4(),
            name: "public".into(),
            source_graph_id: fx.prod.id,
            exclude_tags: ["public".to_string()].into(),
            include_tags: BTreeSet::new(),
        };
        fx.store.add_contract(contract.clone()).await;
        let svc = fx.service();
        let report = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.targets.len(), 2);
        assert_eq!(report.targets[1].target_kind, TargetKind::Contract);
        assert_eq!(report.activated_version_ids.len(), 2);

        let contract_key = TargetKey {
            target_id: contract.id,
            kind: TargetKind::Contract,
        };
        let version = svc
            .audit
            .latest_valid_version(&contract_key)
            .await
            .unwrap()
            .unwrap();
        assert!(!version.client_sdl.contains("name: String"));
        assert!(version.client_sdl.contains("upc: String!"));
        // Changelog is only written for the base graph.
        assert!(fx
            .store
            .changelog()
            .await
            .iter()
            .all(|e| e.schema_version_id != version.version_id));
    }

    #[tokio::test]
    async fn feature_flag_variant_swaps_in_feature_subgraph() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let reviews = fx.seed_reviews().await;
        let mut feature = subgraph(
            fx.namespace.id,
            "reviews-next",
            Some(&REVIEWS.replace("body: String\n", "body: String\n          stars: Int\n")),
        );
        feature.base_subgraph_id = Some(reviews.id);
        feature.labels = BTreeSet::new();
        fx.store.add_subgraph(feature.clone()).await;
        fx.store
            .add_feature_flag(FeatureFlag {
                id: Uuid::new_v4(),
                namespace_id: fx.namespace.id,
                name: "next".into(),
                enabled: true,
                labels: BTreeSet::new(),
                feature_subgraph_ids: vec![feature.id],
            })
            .await;

        let svc = fx.service();
        let report = svc.publish(&fx.principal, change(&with_rating())).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        let kinds: Vec<TargetKind> = report.targets.iter().map(|t| t.target_kind).collect();
        assert_eq!(
            kinds,
            vec![TargetKind::FederatedGraph, TargetKind::FeatureFlagVariant]
        );
        let variant = &report.targets[1];
        assert!(variant
            .changes
            .iter()
            .any(|c| c.path == "Review.stars"));
        assert!(!variant.changes.iter().any(|c| c.path == "Review.rating"));
        let jobs = fx.store.jobs().await;
        assert_eq!(jobs.len(), 2);
    }

    // ── Governance ─────────────────────────────────────────────

    fn proposal(graph: Uuid, sdl: &str) -> Proposal {
        Proposal {
            id: Uuid::new_v4(),
            name: "p-1".into(),
            federated_graph_id: graph,
            state: ProposalState::Approved,
            subgraphs: vec![ProposalSubgraph {
                subgraph_name: "reviews".into(),
                schema_sdl: sdl.into(),
                is_deleted: false,
            }],
        }
    }

    #[tokio::test]
    async fn disabled_proposals_attach_nothing() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        fx.store.add_proposal(proposal(fx.prod.id, PRODUCTS)).await;
        let svc = fx.service();
        let report = svc.check(&fx.principal, change(REVIEWS)).await.unwrap();
        assert!(report.proposal_match_message.is_none());
        for t in &report.targets {
            assert!(t.proposal_linkages.is_empty());
            assert!(!t
                .governance_findings
                .iter()
                .any(|f| f.code == CODE_PROPOSAL_MISMATCH));
        }
    }

    #[tokio::test]
    async fn proposal_mismatch_blocks_publish_but_warns_check() {
        let mut settings = NamespaceSettings::default();
        settings.proposals.enabled = true;
        let fx = Fixture::new(settings).await;
        fx.store.add_proposal(proposal(fx.prod.id, &with_rating())).await;
        let svc = fx.service();

        let check = svc.check(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(check.verdict, Verdict::Success);
        assert!(check.proposal_match_message.is_some());
        assert_eq!(check.targets[0].proposal_linkages.len(), 1);

        let publish = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(publish.verdict, Verdict::GovernanceViolation);

        let matching = svc.publish(&fx.principal, change(&with_rating())).await.unwrap();
        assert_eq!(matching.verdict, Verdict::Success);
        assert!(matching.proposal_match_message.is_none());
        assert!(matching.targets[0].proposal_linkages[0].proposal_match);
    }

    #[tokio::test]
    async fn unverified_breaking_check_can_be_forced() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();

        let report = svc.check(&fx.principal, change(&without_product())).await.unwrap();
        assert_eq!(report.verdict, Verdict::GovernanceViolation);
        assert!(report.targets[0].has_breaking_changes);
        assert!(report.targets[0]
            .governance_findings
            .iter()
            .any(|f| f.code == CODE_BREAKING_UNVERIFIED));

        let forced = svc
            .force_check_success(&fx.principal, report.operation_id, Some("approved".into()))
            .await
            .unwrap();
        assert!(forced.forced);
        assert_eq!(forced.verdict, Verdict::Success);
        let again = svc.get_check(&fx.principal, report.operation_id).await.unwrap();
        assert_eq!(again.verdict, Verdict::Success);
    }

    #[tokio::test]
    async fn breaking_publish_is_not_traffic_gated() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        let report = svc.publish(&fx.principal, change(&without_product())).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert!(report.targets[0].has_breaking_changes);

        let err = svc
            .force_check_success(&fx.principal, report.operation_id, None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn client_traffic_decides_breaking_checks() {
        let settings = NamespaceSettings {
            traffic_check_enabled: true,
            ..Default::default()
        };
        let fx = Fixture::new(settings).await;
        let unused = fx.service().with_traffic_inspector(Arc::new(FixedInspector::new(&[])));
        unused.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        let report = unused.check(&fx.principal, change(&without_product())).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);

        let used = fx
            .service()
            .with_traffic_inspector(Arc::new(FixedInspector::new(&["product"])));
        let report = used.check(&fx.principal, change(&without_product())).await.unwrap();
        assert_eq!(report.verdict, Verdict::GovernanceViolation);
        assert!(report.targets[0]
            .governance_findings
            .iter()
            .any(|f| f.code == CODE_TRAFFIC_CLIENT_USAGE));
        assert_eq!(report.targets[0].traffic.affected_operations.len(), 1);
    }

    // ── Delete ─────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_recomposes_without_subgraph() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        fx.seed_reviews().await;
        let svc = fx.service();
        let report = svc
            .delete(
                &fx.principal,
                DeleteSubgraphRequest {
                    namespace: "default".into(),
                    subgraph_name: "inventory".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert!(fx
            .store
            .subgraph_by_name(fx.namespace.id, "inventory")
            .await
            .is_none());
        assert!(fx.store.latest_pointer(&fx.prod_key()).await.is_some());

        let err = svc
            .delete(
                &fx.principal,
                DeleteSubgraphRequest {
                    namespace: "default".into(),
                    subgraph_name: "inventory".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    // ── Failure handling ───────────────────────────────────────

    struct HangingTransport;

    #[async_trait]
    impl ExtensionTransport for HangingTransport {
        async fn post(&self, _request: &ExtensionRequest) -> anyhow::Result<ExtensionResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ExtensionResponse {
                status: 200,
                body: br#"{"pass": true}"#.to_vec(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_closed() {
        let settings = NamespaceSettings {
            check_extension: Some(CheckExtensionConfig {
                endpoint: "http://ext/check".into(),
                secret: "s3cret".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let fx = Fixture::new(settings).await;
        let mut svc = fx.service().with_extension_transport(Arc::new(HangingTransport));
        svc.config = svc.config.clone().operation_timeout_secs(1);

        let report = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::InfrastructureError);
        assert!(report.infra_error.is_some());
        assert!(report.activated_version_ids.is_empty());
        assert_eq!(fx.store.latest_pointer(&fx.prod_key()).await, None);

        let read_back = svc.get_check(&fx.principal, report.operation_id).await.unwrap();
        assert_eq!(read_back.verdict, Verdict::InfrastructureError);
    }

    #[tokio::test]
    async fn store_outage_is_retryable_error() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        fx.store.set_unavailable(true);
        let err = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), 503);
    }

    #[tokio::test]
    async fn checks_are_scoped_to_organization() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();
        let report = svc.check(&fx.principal, change(REVIEWS)).await.unwrap();
        let stranger = Principal::new("mallory", Uuid::new_v4());
        let err = svc.get_check(&stranger, report.operation_id).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn relabelled_subgraph_leaves_its_old_graph() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let edge = FederatedGraph {
            id: Uuid::new_v4(),
            namespace_id: fx.namespace.id,
            name: "edge".into(),
            routing_url: "http://edge/graphql".into(),
            label_matchers: vec![LabelMatcher::parse("edge=yes").unwrap()],
        };
        fx.store.add_federated_graph(edge).await;
        let svc = fx.service();
        svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();

        let mut moved = change(REVIEWS);
        moved.labels = Some(vec!["edge=yes".into()]);

        // inventory still needs reviews' `body`, so prod cannot lose it yet.
        let blocked = svc.publish(&fx.principal, moved.clone()).await.unwrap();
        let names: Vec<&str> = blocked.targets.iter().map(|t| t.target_name.as_str()).collect();
        assert_eq!(names, vec!["edge", "prod"]);
        assert_eq!(blocked.verdict, Verdict::NotComposable);
        let stored = fx
            .store
            .subgraph_by_name(fx.namespace.id, "reviews")
            .await
            .unwrap();
        assert!(stored.labels.iter().any(|l| l.to_string() == "team=core"));

        svc.delete(
            &fx.principal,
            DeleteSubgraphRequest {
                namespace: "default".into(),
                subgraph_name: "inventory".into(),
            },
        )
        .await
        .unwrap();

        let report = svc.publish(&fx.principal, moved).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.activated_version_ids.len(), 2);
        let prod = fx
            .store
            .latest_valid_version(&fx.prod_key())
            .await
            .unwrap()
            .unwrap();
        assert!(report.activated_version_ids.contains(&prod.version_id));
        assert!(!prod.client_sdl.contains("Review"));
        assert!(prod.client_sdl.contains("topProducts"));
    }

    #[tokio::test]
    async fn reverting_schema_creates_new_version() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        let svc = fx.service();

        let v1 = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        let v2 = svc.publish(&fx.principal, change(&with_rating())).await.unwrap();
        let v3 = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        let (v1, v2, v3) = (
            v1.activated_version_ids[0],
            v2.activated_version_ids[0],
            v3.activated_version_ids[0],
        );
        assert_ne!(v1, v2);
        assert_ne!(v3, v1);
        assert_ne!(v3, v2);
        assert_eq!(fx.store.latest_pointer(&fx.prod_key()).await, Some(v3));
        assert_eq!(fx.store.version_count().await, 3);

        // Republishing the current content keeps the current version.
        let again = svc.publish(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(again.activated_version_ids, vec![v3]);
        assert_eq!(fx.store.version_count().await, 3);
    }

    /// Lets another publish move pointers right before the transaction opens.
    struct InterleavedAudit {
        store: MemoryStore,
        interloper: std::sync::Mutex<Option<SchemaVersion>>,
    }

    #[async_trait]
    impl AuditStore for InterleavedAudit {
        async fn begin(&self) -> Result<Box<dyn CheckTx>> {
            let interloper = self.interloper.lock().unwrap().take();
            if let Some(version) = interloper {
                let expected = self.store.latest_pointer(&version.target).await;
                let mut tx = self.store.begin().await?;
                tx.insert_schema_version(&version).await?;
                tx.advance_latest_valid(&version.target, expected, version.version_id)
                    .await?;
                tx.commit().await?;
            }
            self.store.begin().await
        }

        async fn load_operation(&self, operation_id: Uuid) -> Result<StoredOperation> {
            self.store.load_operation(operation_id).await
        }

        async fn latest_valid_version(&self, target: &TargetKey) -> Result<Option<SchemaVersion>> {
            self.store.latest_valid_version(target).await
        }

        async fn record_override(&self, record: &OverrideRecord) -> Result<bool> {
            self.store.record_override(record).await
        }
    }

    #[tokio::test]
    async fn pointer_moved_during_operation_fails_retryably() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        fx.service()
            .publish(&fx.principal, change(REVIEWS))
            .await
            .unwrap();

        let interloper = SchemaVersion::new(
            fx.prod_key(),
            "type Query { a: Int }".into(),
            "type Query { a: Int }".into(),
        );
        let audit = Arc::new(InterleavedAudit {
            store: fx.store.clone(),
            interloper: std::sync::Mutex::new(Some(interloper.clone())),
        });
        let svc = CheckServiceImpl::new(
            Arc::new(fx.store.clone()),
            audit,
            EngineConfig::default(),
        );

        let err = svc
            .publish(&fx.principal, change(&with_rating()))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaCheckError::ConcurrentUpdate(_)));
        assert!(err.is_retryable());
        assert_eq!(err.http_status(), 409);
        assert_eq!(
            fx.store.latest_pointer(&fx.prod_key()).await,
            Some(interloper.version_id)
        );
        let stored = fx
            .store
            .subgraph_by_name(fx.namespace.id, "reviews")
            .await
            .unwrap();
        assert_eq!(stored.sdl.as_deref(), Some(REVIEWS));

        // A resubmission evaluates against the new pointer and lands.
        let retried = svc
            .publish(&fx.principal, change(&with_rating()))
            .await
            .unwrap();
        assert_eq!(retried.verdict, Verdict::Success);
        assert_eq!(
            fx.store.latest_pointer(&fx.prod_key()).await,
            Some(retried.activated_version_ids[0])
        );
    }

    /// Federation composer that blocks its thread and records peak overlap.
    #[derive(Default)]
    struct SlowComposer {
        inner: FederationComposer,
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    impl Composer for SlowComposer {
        fn compose(
            &self,
            subgraphs: &[crate::composer::SubgraphInput],
        ) -> std::result::Result<ComposedSchema, Vec<CompositionError>> {
            use std::sync::atomic::Ordering::SeqCst;
            let now = self.in_flight.fetch_add(1, SeqCst) + 1;
            self.peak.fetch_max(now, SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(100));
            self.in_flight.fetch_sub(1, SeqCst);
            self.inner.compose(subgraphs)
        }
    }

    #[tokio::test]
    async fn compositions_run_off_the_runtime_thread_within_the_bound() {
        let fx = Fixture::new(NamespaceSettings::default()).await;
        for name in ["edge", "staging"] {
            fx.store
                .add_federated_graph(FederatedGraph {
                    id: Uuid::new_v4(),
                    namespace_id: fx.namespace.id,
                    name: name.into(),
                    routing_url: format!("http://{name}/graphql"),
                    label_matchers: vec![LabelMatcher::parse("team=core").unwrap()],
                })
                .await;
        }
        let composer = Arc::new(SlowComposer::default());
        let svc = CheckServiceImpl::new(
            Arc::new(fx.store.clone()),
            Arc::new(fx.store.clone()),
            EngineConfig::default().max_concurrent_compositions(2),
        )
        .with_composer(composer.clone());

        // The test runtime has a single thread, so any overlap means the
        // blocking compose calls ran elsewhere.
        let report = svc.check(&fx.principal, change(REVIEWS)).await.unwrap();
        assert_eq!(report.verdict, Verdict::Success);
        assert_eq!(report.targets.len(), 3);
        assert_eq!(composer.peak.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
