//! Downstream job contracts and outbound webhook configuration.
//!
//! Jobs are written to the outbox in the same transaction as the publish
//! and delivered later by the dispatcher. The core never performs them inline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const JOB_CACHE_WARMER_RECOMPUTE: &str = "cache_warmer.recompute";
pub const JOB_WEBHOOK_SCHEMA_UPDATED: &str = "webhook.federated_graph_schema_updated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWarmerJob {
    pub organization_id: Uuid,
    pub federated_graph_id: Uuid,
    pub range_in_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRef {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub id: Uuid,
}

/// `FEDERATED_GRAPH_SCHEMA_UPDATED` organization event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaUpdatedEvent {
    pub federated_graph: GraphRef,
    pub organization: OrganizationRef,
    pub errors: bool,
    pub actor_id: String,
}

impl SchemaUpdatedEvent {
    pub const EVENT_NAME: &'static str = "FEDERATED_GRAPH_SCHEMA_UPDATED";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type", content = "payload")]
pub enum JobPayload {
    #[serde(rename = "cache_warmer.recompute")]
    CacheWarmerRecompute(CacheWarmerJob),
    #[serde(rename = "webhook.federated_graph_schema_updated")]
    FederatedGraphSchemaUpdated(SchemaUpdatedEvent),
}

impl JobPayload {
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::CacheWarmerRecompute(_) => JOB_CACHE_WARMER_RECOMPUTE,
            Self::FederatedGraphSchemaUpdated(_) => JOB_WEBHOOK_SCHEMA_UPDATED,
        }
    }
}

/// A job row as stored in, or claimed from, the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub job: JobPayload,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

impl OutboxJob {
    pub fn new(operation_id: Uuid, job: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_id,
            job,
            attempt_count: 0,
            created_at: Utc::now(),
        }
    }
}

// ── Webhook configuration ──────────────────────────────────────

/// Per-event filter attached to an organization webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventMeta {
    FederatedGraphSchemaUpdated { federated_graph_ids: Vec<Uuid> },
    ProposalStateUpdated { federated_graph_ids: Vec<Uuid> },
    MonographSchemaUpdated { monograph_ids: Vec<Uuid> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationWebhook {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub endpoint: String,
    /// HMAC key for the `X-Signature-SHA256` header. Unsigned when absent.
    pub secret: Option<String>,
    pub events: Vec<WebhookEventMeta>,
}

impl OrganizationWebhook {
    /// A webhook fires for a schema update only when its meta lists the graph.
    pub fn wants_schema_update(&self, federated_graph_id: Uuid) -> bool {
        !self.endpoint.is_empty()
            && self.events.iter().any(|meta| match meta {
                WebhookEventMeta::FederatedGraphSchemaUpdated {
                    federated_graph_ids,
                } => federated_graph_ids.contains(&federated_graph_id),
                _ => false,
            })
    }
}

/// Body posted to organization webhooks.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDelivery<'a> {
    pub version: u32,
    pub event: &'static str,
    pub payload: &'a SchemaUpdatedEvent,
}
