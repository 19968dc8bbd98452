//! Row shapes read with `sqlx::query_as`. Conversions to core types live in `store`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct PgOperationRow {
    pub id: Uuid,
    pub kind: String,
    pub organization_id: Uuid,
    pub namespace_id: Uuid,
    pub subgraph_id: Option<Uuid>,
    pub subgraph_name: String,
    pub proposed_sdl: Option<String>,
    pub actor_id: String,
    pub proposal_match_message: Option<String>,
    pub infra_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgTargetRow {
    pub check_id: Uuid,
    pub operation_id: Uuid,
    pub target_id: Uuid,
    pub target_kind: String,
    pub target_name: String,
    pub federated_graph_id: Uuid,
    pub composition: serde_json::Value,
    pub changes: serde_json::Value,
    pub lint_issues: serde_json::Value,
    pub pruning_issues: serde_json::Value,
    pub findings: serde_json::Value,
    pub extension: Option<serde_json::Value>,
    pub traffic: serde_json::Value,
    pub proposal_linkages: serde_json::Value,
    pub gate_outcome: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgSubgraphRow {
    pub id: Uuid,
    pub namespace_id: Uuid,
    pub name: String,
    pub routing_url: String,
    pub subscription_url: Option<String>,
    pub subscription_protocol: Option<String>,
    pub labels: serde_json::Value,
    pub sdl: Option<String>,
    pub base_subgraph_id: Option<Uuid>,
}
