//! Catalog types: namespaces, subgraphs, federated graphs, contracts,
//! feature flags, proposals and schema versions.
//! Pure value types. No sqlx, no DB dependencies.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::governance::extension::CheckExtensionConfig;
use crate::governance::lint::LintRuleConfig;
use crate::governance::pruning::PruningRuleConfig;
use crate::labels::{Label, LabelMatcher};

// ── Severity ───────────────────────────────────────────────────

/// Severity shared by lint rules, pruning rules and proposal conformance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Warn,
    Error,
}

// ── Namespace ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub settings: NamespaceSettings,
}

/// Governance configuration attached to a namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSettings {
    pub lint_enabled: bool,
    pub lint_rules: Vec<LintRuleConfig>,
    pub pruning_enabled: bool,
    pub pruning_rules: Vec<PruningRuleConfig>,
    pub proposals: ProposalSettings,
    pub check_extension: Option<CheckExtensionConfig>,
    /// Traffic lookback; clamped by `EngineConfig::traffic_window_days`.
    pub checks_timeframe_days: Option<u32>,
    pub traffic_check_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalSettings {
    pub enabled: bool,
    pub check_severity: Severity,
    pub publish_severity: Severity,
}

impl Default for ProposalSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            check_severity: Severity::Warn,
            publish_severity: Severity::Error,
        }
    }
}

// ── Subgraph ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subgraph {
    pub id: Uuid,
    pub namespace_id: Uuid,
    pub name: String,
    pub routing_url: String,
    pub subscription_url: Option<String>,
    pub subscription_protocol: Option<String>,
    pub labels: BTreeSet<Label>,
    /// SDL of the last successful publish. `None` until first publish.
    pub sdl: Option<String>,
    /// Set for feature subgraphs: the base subgraph this one stands in for.
    pub base_subgraph_id: Option<Uuid>,
}

impl Subgraph {
    pub fn is_feature_subgraph(&self) -> bool {
        self.base_subgraph_id.is_some()
    }
}

// ── Federated graph / contract / feature flag ──────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedGraph {
    pub id: Uuid,
    pub namespace_id: Uuid,
    pub name: String,
    pub routing_url: String,
    pub label_matchers: Vec<LabelMatcher>,
}

/// A tag-filtered variant of a base federated graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub name: String,
    pub source_graph_id: Uuid,
    pub exclude_tags: BTreeSet<String>,
    pub include_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub id: Uuid,
    pub namespace_id: Uuid,
    pub name: String,
    pub enabled: bool,
    /// Graph scoping. Empty means the flag applies to every graph that
    /// contains one of its base subgraphs.
    pub labels: BTreeSet<Label>,
    pub feature_subgraph_ids: Vec<Uuid>,
}

// ── Composition targets ────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetKind {
    FederatedGraph,
    Contract,
    FeatureFlagVariant,
}

/// Identity of anything with its own "latest valid" schema pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub target_id: Uuid,
    pub kind: TargetKind,
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.target_id)
    }
}

/// Include/exclude tag filter applied to a base composition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub exclude_tags: BTreeSet<String>,
    pub include_tags: BTreeSet<String>,
}

impl From<&Contract> for TagFilter {
    fn from(c: &Contract) -> Self {
        Self {
            exclude_tags: c.exclude_tags.clone(),
            include_tags: c.include_tags.clone(),
        }
    }
}

/// One thing that must be recomposed for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionTarget {
    pub key: TargetKey,
    pub name: String,
    /// The base federated graph. Equal to `key.target_id` for `FederatedGraph`.
    pub federated_graph_id: Uuid,
    pub federated_graph_name: String,
    pub contract: Option<TagFilter>,
    pub feature_flag_id: Option<Uuid>,
}

impl CompositionTarget {
    pub fn federated_graph(graph: &FederatedGraph) -> Self {
        Self {
            key: TargetKey {
                target_id: graph.id,
                kind: TargetKind::FederatedGraph,
            },
            name: graph.name.clone(),
            federated_graph_id: graph.id,
            federated_graph_name: graph.name.clone(),
            contract: None,
            feature_flag_id: None,
        }
    }

    pub fn contract(graph: &FederatedGraph, contract: &Contract) -> Self {
        Self {
            key: TargetKey {
                target_id: contract.id,
                kind: TargetKind::Contract,
            },
            name: contract.name.clone(),
            federated_graph_id: graph.id,
            federated_graph_name: graph.name.clone(),
            contract: Some(TagFilter::from(contract)),
            feature_flag_id: None,
        }
    }

    /// Variant id is derived from (graph, flag) so it is stable across runs.
    pub fn feature_flag_variant(graph: &FederatedGraph, flag: &FeatureFlag) -> Self {
        let seed = format!("{}:{}", graph.id, flag.id);
        Self {
            key: TargetKey {
                target_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()),
                kind: TargetKind::FeatureFlagVariant,
            },
            name: format!("{}:{}", graph.name, flag.name),
            federated_graph_id: graph.id,
            federated_graph_name: graph.name.clone(),
            contract: None,
            feature_flag_id: Some(flag.id),
        }
    }
}

// ── Proposals ──────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    Draft,
    Approved,
    Published,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSubgraph {
    pub subgraph_name: String,
    pub schema_sdl: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub name: String,
    pub federated_graph_id: Uuid,
    pub state: ProposalState,
    pub subgraphs: Vec<ProposalSubgraph>,
}

// ── Schema versions ────────────────────────────────────────────

/// Immutable composed schema for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version_id: Uuid,
    pub target: TargetKey,
    pub sdl: String,
    pub client_sdl: String,
    pub is_composable: bool,
    pub created_at: DateTime<Utc>,
}

impl SchemaVersion {
    /// A fresh version row. Ids are never derived from content: reverting to
    /// an earlier schema produces a new version.
    pub fn new(target: TargetKey, sdl: String, client_sdl: String) -> Self {
        Self {
            version_id: Uuid::new_v4(),
            target,
            sdl,
            client_sdl,
            is_composable: true,
            created_at: Utc::now(),
        }
    }

    pub fn has_content(&self, sdl: &str, client_sdl: &str) -> bool {
        self.sdl == sdl && self.client_sdl == client_sdl
    }
}
