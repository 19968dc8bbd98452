//! Postgres implementations of the schema_check_core port traits.
//!
//! `PgStore` wraps a PgPool. All SQL is runtime-checked (sqlx::query, not
//! sqlx::query!) to avoid a compile-time database requirement. Structured
//! audit payloads are stored as JSONB.

use std::str::FromStr;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use schema_check_core::audit::{
    ChangelogEntry, CheckOperation, OperationKind, OverrideRecord, StoredOperation, TargetResult,
};
use schema_check_core::error::{Result, SchemaCheckError};
use schema_check_core::governance::traffic::OperationOverride;
use schema_check_core::governance::GateOutcome;
use schema_check_core::jobs::{OrganizationWebhook, OutboxJob};
use schema_check_core::ports::{AuditStore, CatalogStore, CheckTx, JobQueue};
use schema_check_core::types::{
    Contract, FeatureFlag, FederatedGraph, Namespace, Proposal, ProposalState, SchemaVersion,
    Subgraph, TargetKey, TargetKind,
};

use crate::sqlx_types::{PgOperationRow, PgSubgraphRow, PgTargetRow};

/// Connection and pool failures are retryable infrastructure errors; anything
/// else the driver reports is internal.
pub(crate) fn db_err(e: sqlx::Error) -> SchemaCheckError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SchemaCheckError::Infrastructure(e.to_string()),
        other => SchemaCheckError::Internal(anyhow!(other)),
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| SchemaCheckError::Internal(anyhow!(e)))
}

pub(crate) fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SchemaCheckError::Internal(anyhow!(e)))
}

pub(crate) fn parse_enum<T: FromStr>(column: &str, raw: &str) -> Result<T> {
    T::from_str(raw).map_err(|_| {
        SchemaCheckError::Internal(anyhow!("unexpected {column} value in database: {raw}"))
    })
}

// ── PgStore ───────────────────────────────────────────────────

/// Postgres-backed catalog, audit trail and outbox.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn namespace_by_name(&self, organization_id: Uuid, name: &str) -> Result<Namespace> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, serde_json::Value)>(
            r#"
            SELECT id, organization_id, name, settings
            FROM schema_check.namespaces
            WHERE organization_id = $1 AND name = $2
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some((id, organization_id, name, settings)) = row else {
            return Err(SchemaCheckError::NotFound(format!("namespace {name}")));
        };
        Ok(Namespace {
            id,
            organization_id,
            name,
            settings: from_json(settings)?,
        })
    }

    async fn subgraphs(&self, namespace_id: Uuid) -> Result<Vec<Subgraph>> {
        let rows = sqlx::query_as::<_, PgSubgraphRow>(
            r#"
            SELECT id, namespace_id, name, routing_url, subscription_url,
                   subscription_protocol, labels, sdl, base_subgraph_id
            FROM schema_check.subgraphs
            WHERE namespace_id = $1
            ORDER BY name
            "#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Subgraph::try_from).collect()
    }

    async fn federated_graphs(&self, namespace_id: Uuid) -> Result<Vec<FederatedGraph>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, String, serde_json::Value)>(
            r#"
            SELECT id, namespace_id, name, routing_url, label_matchers
            FROM schema_check.federated_graphs
            WHERE namespace_id = $1
            ORDER BY name
            "#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|(id, namespace_id, name, routing_url, matchers)| {
                Ok(FederatedGraph {
                    id,
                    namespace_id,
                    name,
                    routing_url,
                    label_matchers: from_json(matchers)?,
                })
            })
            .collect()
    }

    async fn contracts(&self, namespace_id: Uuid) -> Result<Vec<Contract>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Uuid, Vec<String>, Vec<String>)>(
            r#"
            SELECT c.id, c.name, c.source_graph_id, c.exclude_tags, c.include_tags
            FROM schema_check.contracts c
            JOIN schema_check.federated_graphs g ON g.id = c.source_graph_id
            WHERE g.namespace_id = $1
            ORDER BY c.name
            "#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, name, source_graph_id, exclude, include)| Contract {
                id,
                name,
                source_graph_id,
                exclude_tags: exclude.into_iter().collect(),
                include_tags: include.into_iter().collect(),
            })
            .collect())
    }

    async fn feature_flags(&self, namespace_id: Uuid) -> Result<Vec<FeatureFlag>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, bool, serde_json::Value, Vec<Uuid>)>(
            r#"
            SELECT id, namespace_id, name, enabled, labels, feature_subgraph_ids
            FROM schema_check.feature_flags
            WHERE namespace_id = $1
            ORDER BY name
            "#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|(id, namespace_id, name, enabled, labels, feature_subgraph_ids)| {
                Ok(FeatureFlag {
                    id,
                    namespace_id,
                    name,
                    enabled,
                    labels: from_json(labels)?,
                    feature_subgraph_ids,
                })
            })
            .collect()
    }

    async fn proposals(&self, namespace_id: Uuid) -> Result<Vec<Proposal>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Uuid, String, serde_json::Value)>(
            r#"
            SELECT p.id, p.name, p.federated_graph_id, p.state, p.subgraphs
            FROM schema_check.proposals p
            JOIN schema_check.federated_graphs g ON g.id = p.federated_graph_id
            WHERE g.namespace_id = $1
            ORDER BY p.created_at, p.name
            "#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|(id, name, federated_graph_id, state, subgraphs)| {
                Ok(Proposal {
                    id,
                    name,
                    federated_graph_id,
                    state: parse_enum::<ProposalState>("proposal state", &state)?,
                    subgraphs: from_json(subgraphs)?,
                })
            })
            .collect()
    }

    async fn operation_overrides(&self, namespace_id: Uuid) -> Result<Vec<OperationOverride>> {
        let rows = sqlx::query_as::<_, (String, bool, serde_json::Value)>(
            r#"
            SELECT operation_hash, ignore_all, changes
            FROM schema_check.operation_overrides
            WHERE namespace_id = $1
            "#,
        )
        .bind(namespace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|(operation_hash, ignore_all, changes)| {
                Ok(OperationOverride {
                    operation_hash,
                    ignore_all,
                    changes: from_json(changes)?,
                })
            })
            .collect()
    }

    async fn webhooks(&self, organization_id: Uuid) -> Result<Vec<OrganizationWebhook>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, Option<String>, serde_json::Value)>(
            r#"
            SELECT id, organization_id, endpoint, secret, events
            FROM schema_check.organization_webhooks
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|(id, organization_id, endpoint, secret, events)| {
                Ok(OrganizationWebhook {
                    id,
                    organization_id,
                    endpoint,
                    secret,
                    events: from_json(events)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn CheckTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgCheckTx { tx }))
    }

    async fn load_operation(&self, operation_id: Uuid) -> Result<StoredOperation> {
        let op = sqlx::query_as::<_, PgOperationRow>(
            r#"
            SELECT id, kind, organization_id, namespace_id, subgraph_id, subgraph_name,
                   proposed_sdl, actor_id, proposal_match_message, infra_error, created_at
            FROM schema_check.check_operations
            WHERE id = $1
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| SchemaCheckError::NotFound(format!("check {operation_id}")))?;

        let targets = sqlx::query_as::<_, PgTargetRow>(
            r#"
            SELECT check_id, operation_id, target_id, target_kind, target_name,
                   federated_graph_id, composition, changes, lint_issues, pruning_issues,
                   findings, extension, traffic, proposal_linkages, gate_outcome, created_at
            FROM schema_check.schema_checks
            WHERE operation_id = $1
            ORDER BY seq
            "#,
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let activated_versions = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT version_id
            FROM schema_check.operation_activations
            WHERE operation_id = $1
            ORDER BY seq
            "#,
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let override_record = sqlx::query_as::<_, (Uuid, String, Option<String>, DateTime<Utc>)>(
            r#"
            SELECT operation_id, actor_id, reason, created_at
            FROM schema_check.check_overrides
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|(operation_id, actor_id, reason, created_at)| OverrideRecord {
            operation_id,
            actor_id,
            reason,
            created_at,
        });

        Ok(StoredOperation {
            operation: op.try_into()?,
            targets: targets
                .into_iter()
                .map(TargetResult::try_from)
                .collect::<Result<_>>()?,
            activated_versions,
            override_record,
        })
    }

    async fn latest_valid_version(&self, target: &TargetKey) -> Result<Option<SchemaVersion>> {
        let row = sqlx::query_as::<_, (Uuid, String, String, bool, DateTime<Utc>)>(
            r#"
            SELECT v.version_id, v.sdl, v.client_sdl, v.is_composable, v.created_at
            FROM schema_check.latest_valid_versions l
            JOIN schema_check.schema_versions v ON v.version_id = l.version_id
            WHERE l.target_id = $1 AND l.target_kind = $2
            "#,
        )
        .bind(target.target_id)
        .bind(target.kind.as_ref())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(
            |(version_id, sdl, client_sdl, is_composable, created_at)| SchemaVersion {
                version_id,
                target: *target,
                sdl,
                client_sdl,
                is_composable,
                created_at,
            },
        ))
    }

    async fn record_override(&self, record: &OverrideRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO schema_check.check_overrides (operation_id, actor_id, reason, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(record.operation_id)
        .bind(&record.actor_id)
        .bind(&record.reason)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

// ── PgCheckTx ─────────────────────────────────────────────────

/// The transaction shared by PERSIST and ACTIVATE. Dropping it rolls back.
pub struct PgCheckTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CheckTx for PgCheckTx {
    async fn insert_operation(&mut self, op: &CheckOperation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.check_operations (
                id, kind, organization_id, namespace_id, subgraph_id, subgraph_name,
                proposed_sdl, actor_id, proposal_match_message, infra_error, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(op.id)
        .bind(op.kind.as_ref())
        .bind(op.organization_id)
        .bind(op.namespace_id)
        .bind(op.subgraph_id)
        .bind(&op.subgraph_name)
        .bind(&op.proposed_sdl)
        .bind(&op.actor_id)
        .bind(&op.proposal_match_message)
        .bind(&op.infra_error)
        .bind(op.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_target_result(&mut self, r: &TargetResult) -> Result<()> {
        let extension = r.extension.as_ref().map(to_json).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO schema_check.schema_checks (
                check_id, operation_id, target_id, target_kind, target_name,
                federated_graph_id, is_composable, composition, changes, lint_issues,
                pruning_issues, findings, extension, traffic, proposal_linkages,
                gate_outcome, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(r.check_id)
        .bind(r.operation_id)
        .bind(r.target.target_id)
        .bind(r.target.kind.as_ref())
        .bind(&r.target_name)
        .bind(r.federated_graph_id)
        .bind(r.is_composable())
        .bind(to_json(&r.composition)?)
        .bind(to_json(&r.changes)?)
        .bind(to_json(&r.lint_issues)?)
        .bind(to_json(&r.pruning_issues)?)
        .bind(to_json(&r.findings)?)
        .bind(extension)
        .bind(to_json(&r.traffic)?)
        .bind(to_json(&r.proposal_linkages)?)
        .bind(r.gate_outcome.as_ref())
        .bind(r.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_subgraph(&mut self, s: &Subgraph) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.subgraphs (
                id, namespace_id, name, routing_url, subscription_url,
                subscription_protocol, labels, sdl, base_subgraph_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET routing_url = EXCLUDED.routing_url,
                subscription_url = EXCLUDED.subscription_url,
                subscription_protocol = EXCLUDED.subscription_protocol,
                labels = EXCLUDED.labels,
                sdl = EXCLUDED.sdl,
                updated_at = now()
            "#,
        )
        .bind(s.id)
        .bind(s.namespace_id)
        .bind(&s.name)
        .bind(&s.routing_url)
        .bind(&s.subscription_url)
        .bind(&s.subscription_protocol)
        .bind(to_json(&s.labels)?)
        .bind(&s.sdl)
        .bind(s.base_subgraph_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_subgraph(&mut self, subgraph_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM schema_check.subgraphs WHERE id = $1")
            .bind(subgraph_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_schema_version(&mut self, v: &SchemaVersion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO schema_check.schema_versions (
                version_id, target_id, target_kind, sdl, client_sdl, is_composable, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (version_id) DO NOTHING
            "#,
        )
        .bind(v.version_id)
        .bind(v.target.target_id)
        .bind(v.target.kind.as_ref())
        .bind(&v.sdl)
        .bind(&v.client_sdl)
        .bind(v.is_composable)
        .bind(v.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_activation(&mut self, operation_id: Uuid, version_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.operation_activations (operation_id, version_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(operation_id)
        .bind(version_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_changelog(&mut self, entries: &[ChangelogEntry]) -> Result<()> {
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO schema_check.changelog (
                    schema_version_id, federated_graph_id, change, created_at
                ) VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(e.schema_version_id)
            .bind(e.federated_graph_id)
            .bind(to_json(&e.change)?)
            .bind(e.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn enqueue(&mut self, job: &OutboxJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.outbox_jobs (
                id, operation_id, job_type, job, attempt_count, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(job.operation_id)
        .bind(job.job.job_type())
        .bind(to_json(&job.job)?)
        .bind(job.attempt_count as i32)
        .bind(job.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn advance_latest_valid(
        &mut self,
        target: &TargetKey,
        expected: Option<Uuid>,
        version_id: Uuid,
    ) -> Result<()> {
        // Compare-and-swap against the pointer the operation was evaluated on.
        let result = match expected {
            Some(previous) => sqlx::query(
                r#"
                UPDATE schema_check.latest_valid_versions
                SET version_id = $3, updated_at = now()
                WHERE target_id = $1 AND target_kind = $2 AND version_id = $4
                "#,
            )
            .bind(target.target_id)
            .bind(target.kind.as_ref())
            .bind(version_id)
            .bind(previous)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?,
            None => sqlx::query(
                r#"
                INSERT INTO schema_check.latest_valid_versions (target_id, target_kind, version_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (target_id, target_kind) DO NOTHING
                "#,
            )
            .bind(target.target_id)
            .bind(target.kind.as_ref())
            .bind(version_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?,
        };
        if result.rows_affected() != 1 {
            return Err(SchemaCheckError::ConcurrentUpdate(format!(
                "latest valid version of {target} changed during the operation"
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}

// ── Outbox ────────────────────────────────────────────────────

#[async_trait]
impl JobQueue for PgStore {
    async fn claim_next(&self, claimer_id: &str) -> Result<Option<OutboxJob>> {
        // Atomic claim using CTE + FOR UPDATE SKIP LOCKED.
        // Dead-lettered jobs (failed_at set) are never re-claimed.
        let row = sqlx::query_as::<_, (Uuid, Uuid, serde_json::Value, i32, DateTime<Utc>)>(
            r#"
            WITH claimable AS (
                SELECT outbox_seq
                FROM schema_check.outbox_jobs
                WHERE processed_at IS NULL
                  AND failed_at IS NULL
                  AND (claimed_at IS NULL OR claim_timeout_at < now())
                ORDER BY outbox_seq
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE schema_check.outbox_jobs j
            SET claimed_at = now(),
                claimer_id = $1,
                claim_timeout_at = now() + interval '5 minutes',
                attempt_count = attempt_count + 1
            FROM claimable c
            WHERE j.outbox_seq = c.outbox_seq
            RETURNING j.id, j.operation_id, j.job, j.attempt_count, j.created_at
            "#,
        )
        .bind(claimer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|(id, operation_id, job, attempt_count, created_at)| {
            Ok(OutboxJob {
                id,
                operation_id,
                job: from_json(job)?,
                attempt_count: attempt_count as u32,
                created_at,
            })
        })
        .transpose()
    }

    async fn mark_processed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schema_check.outbox_jobs
            SET processed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schema_check.outbox_jobs
            SET claimed_at = NULL,
                claimer_id = NULL,
                claim_timeout_at = NULL,
                last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_dead_letter(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schema_check.outbox_jobs
            SET failed_at = now(),
                last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// ── Row conversions ───────────────────────────────────────────

impl TryFrom<PgOperationRow> for CheckOperation {
    type Error = SchemaCheckError;

    fn try_from(r: PgOperationRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            kind: parse_enum::<OperationKind>("operation kind", &r.kind)?,
            organization_id: r.organization_id,
            namespace_id: r.namespace_id,
            subgraph_id: r.subgraph_id,
            subgraph_name: r.subgraph_name,
            proposed_sdl: r.proposed_sdl,
            actor_id: r.actor_id,
            proposal_match_message: r.proposal_match_message,
            infra_error: r.infra_error,
            created_at: r.created_at,
        })
    }
}

impl TryFrom<PgTargetRow> for TargetResult {
    type Error = SchemaCheckError;

    fn try_from(r: PgTargetRow) -> Result<Self> {
        Ok(Self {
            check_id: r.check_id,
            operation_id: r.operation_id,
            target: TargetKey {
                target_id: r.target_id,
                kind: parse_enum::<TargetKind>("target kind", &r.target_kind)?,
            },
            target_name: r.target_name,
            federated_graph_id: r.federated_graph_id,
            composition: from_json(r.composition)?,
            changes: from_json(r.changes)?,
            lint_issues: from_json(r.lint_issues)?,
            pruning_issues: from_json(r.pruning_issues)?,
            findings: from_json(r.findings)?,
            extension: r.extension.map(from_json).transpose()?,
            traffic: from_json(r.traffic)?,
            proposal_linkages: from_json(r.proposal_linkages)?,
            gate_outcome: parse_enum::<GateOutcome>("gate outcome", &r.gate_outcome)?,
            created_at: r.created_at,
        })
    }
}

impl TryFrom<PgSubgraphRow> for Subgraph {
    type Error = SchemaCheckError;

    fn try_from(r: PgSubgraphRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            namespace_id: r.namespace_id,
            name: r.name,
            routing_url: r.routing_url,
            subscription_url: r.subscription_url,
            subscription_protocol: r.subscription_protocol,
            labels: from_json(r.labels)?,
            sdl: r.sdl,
            base_subgraph_id: r.base_subgraph_id,
        })
    }
}
