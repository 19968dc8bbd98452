//! Audit records written by an operation and the verdict derived from them.
//!
//! Rows are write-once. The overall verdict is never stored; it is recomputed
//! from the per-target rows (plus an optional operator override) on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::composer::CompositionError;
use crate::diff::SchemaChange;
use crate::governance::extension::CheckExtensionResult;
use crate::governance::lint::LintIssue;
use crate::governance::proposal::ProposalLinkage;
use crate::governance::pruning::PruningIssue;
use crate::governance::traffic::TrafficSummary;
use crate::governance::{GateOutcome, GovernanceFinding};
use crate::types::{TargetKey, TargetKind};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    Check,
    Publish,
    Delete,
}

impl OperationKind {
    pub fn activates(&self) -> bool {
        matches!(self, Self::Publish | Self::Delete)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Success,
    NotComposable,
    GovernanceViolation,
    InfrastructureError,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One client-visible check/publish/delete. Its id is the correlation id of
/// every row it writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub organization_id: Uuid,
    pub namespace_id: Uuid,
    pub subgraph_id: Option<Uuid>,
    pub subgraph_name: String,
    /// `None` for deletes.
    pub proposed_sdl: Option<String>,
    pub actor_id: String,
    pub proposal_match_message: Option<String>,
    /// Operation-level failure (timeout, store outage) recorded before commit.
    pub infra_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-target composition outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionAttempt {
    pub is_composable: bool,
    pub errors: Vec<CompositionError>,
    pub composed_sdl: Option<String>,
    pub client_sdl: Option<String>,
    pub duration_ms: u64,
}

/// Everything recorded for one (operation, target) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    pub check_id: Uuid,
    pub operation_id: Uuid,
    pub target: TargetKey,
    pub target_name: String,
    pub federated_graph_id: Uuid,
    pub composition: CompositionAttempt,
    pub changes: Vec<SchemaChange>,
    pub lint_issues: Vec<LintIssue>,
    pub pruning_issues: Vec<PruningIssue>,
    pub findings: Vec<GovernanceFinding>,
    pub extension: Option<CheckExtensionResult>,
    pub traffic: TrafficSummary,
    pub proposal_linkages: Vec<ProposalLinkage>,
    pub gate_outcome: GateOutcome,
    pub created_at: DateTime<Utc>,
}

impl TargetResult {
    pub fn is_composable(&self) -> bool {
        self.composition.is_composable
    }

    pub fn has_breaking_changes(&self) -> bool {
        self.changes.iter().any(SchemaChange::is_breaking)
    }

    /// Verdict for this target alone. A forced override ignores breaking-change findings.
    pub fn verdict(&self, forced: bool) -> Verdict {
        if self.gate_outcome == GateOutcome::InfrastructureError {
            return Verdict::InfrastructureError;
        }
        if !self.is_composable() {
            return Verdict::NotComposable;
        }
        let blocked = self
            .findings
            .iter()
            .any(|f| f.blocking && !(forced && f.is_overridable()));
        if blocked {
            Verdict::GovernanceViolation
        } else {
            Verdict::Success
        }
    }
}

/// Operator override of a failed check's breaking-change findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub operation_id: Uuid,
    pub actor_id: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Changelog entry written on activation of a federated graph version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub schema_version_id: Uuid,
    pub federated_graph_id: Uuid,
    pub change: SchemaChange,
    pub created_at: DateTime<Utc>,
}

/// Operation plus all of its children, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOperation {
    pub operation: CheckOperation,
    pub targets: Vec<TargetResult>,
    pub activated_versions: Vec<Uuid>,
    pub override_record: Option<OverrideRecord>,
}

/// Pure function of the children. Precedence: infrastructure, composition,
/// governance, success. An operation with no targets is a successful no-op.
pub fn overall_verdict(
    operation: &CheckOperation,
    targets: &[TargetResult],
    forced: bool,
) -> Verdict {
    if operation.infra_error.is_some() {
        return Verdict::InfrastructureError;
    }
    let verdicts: Vec<Verdict> = targets.iter().map(|t| t.verdict(forced)).collect();
    for v in [
        Verdict::InfrastructureError,
        Verdict::NotComposable,
        Verdict::GovernanceViolation,
    ] {
        if verdicts.contains(&v) {
            return v;
        }
    }
    Verdict::Success
}

// ── Report ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub check_id: Uuid,
    pub target_id: Uuid,
    pub target_kind: TargetKind,
    pub target_name: String,
    pub federated_graph_id: Uuid,
    pub verdict: Verdict,
    pub is_composable: bool,
    pub has_breaking_changes: bool,
    pub composition_errors: Vec<CompositionError>,
    pub changes: Vec<SchemaChange>,
    pub lint_issues: Vec<LintIssue>,
    pub pruning_issues: Vec<PruningIssue>,
    pub governance_findings: Vec<GovernanceFinding>,
    pub extension: Option<CheckExtensionResult>,
    pub traffic: TrafficSummary,
    pub proposal_linkages: Vec<ProposalLinkage>,
}

/// Response for check, publish, delete and get-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub subgraph_name: String,
    pub verdict: Verdict,
    pub forced: bool,
    pub infra_error: Option<String>,
    pub proposal_match_message: Option<String>,
    pub targets: Vec<TargetReport>,
    pub activated_version_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CheckReport {
    pub fn from_stored(stored: &StoredOperation) -> Self {
        let forced = stored.override_record.is_some();
        let op = &stored.operation;
        Self {
            operation_id: op.id,
            kind: op.kind,
            subgraph_name: op.subgraph_name.clone(),
            verdict: overall_verdict(op, &stored.targets, forced),
            forced,
            infra_error: op.infra_error.clone(),
            proposal_match_message: op.proposal_match_message.clone(),
            targets: stored
                .targets
                .iter()
                .map(|t| TargetReport {
                    check_id: t.check_id,
                    target_id: t.target.target_id,
                    target_kind: t.target.kind,
                    target_name: t.target_name.clone(),
                    federated_graph_id: t.federated_graph_id,
                    verdict: t.verdict(forced),
                    is_composable: t.is_composable(),
                    has_breaking_changes: t.has_breaking_changes(),
                    composition_errors: t.composition.errors.clone(),
                    changes: t.changes.clone(),
                    lint_issues: t.lint_issues.clone(),
                    pruning_issues: t.pruning_issues.clone(),
                    governance_findings: t.findings.clone(),
                    extension: t.extension.clone(),
                    traffic: t.traffic.clone(),
                    proposal_linkages: t.proposal_linkages.clone(),
                })
                .collect(),
            activated_version_ids: stored.activated_versions.clone(),
            created_at: op.created_at,
        }
    }
}
