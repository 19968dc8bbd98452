//! Catalog writes. The engine only reads the catalog; these are used by
//! provisioning and by the harness to seed namespaces and graphs.

use schema_check_core::error::Result;
use schema_check_core::governance::traffic::OperationOverride;
use schema_check_core::jobs::OrganizationWebhook;
use schema_check_core::types::{
    Contract, FeatureFlag, FederatedGraph, Namespace, Proposal, Subgraph,
};
use uuid::Uuid;

use crate::store::{db_err, to_json, PgStore};

impl PgStore {
    pub async fn create_namespace(&self, ns: &Namespace) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.namespaces (id, organization_id, name, settings)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(ns.id)
        .bind(ns.organization_id)
        .bind(&ns.name)
        .bind(to_json(&ns.settings)?)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Replace a namespace's governance settings.
    pub async fn update_namespace_settings(&self, ns: &Namespace) -> Result<()> {
        sqlx::query("UPDATE schema_check.namespaces SET settings = $2 WHERE id = $1")
            .bind(ns.id)
            .bind(to_json(&ns.settings)?)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_subgraph(&self, s: &Subgraph) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.subgraphs (
                id, namespace_id, name, routing_url, subscription_url,
                subscription_protocol, labels, sdl, base_subgraph_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_federated_graph(&self, g: &FederatedGraph) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.federated_graphs (id, namespace_id, name, routing_url, label_matchers)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(g.id)
        .bind(g.namespace_id)
        .bind(&g.name)
        .bind(&g.routing_url)
        .bind(to_json(&g.label_matchers)?)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_contract(&self, c: &Contract) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.contracts (id, name, source_graph_id, exclude_tags, include_tags)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(c.id)
        .bind(&c.name)
        .bind(c.source_graph_id)
        .bind(c.exclude_tags.iter().cloned().collect::<Vec<_>>())
        .bind(c.include_tags.iter().cloned().collect::<Vec<_>>())
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_feature_flag(&self, f: &FeatureFlag) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.feature_flags (
                id, namespace_id, name, enabled, labels, feature_subgraph_ids
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(f.id)
        .bind(f.namespace_id)
        .bind(&f.name)
        .bind(f.enabled)
        .bind(to_json(&f.labels)?)
        .bind(&f.feature_subgraph_ids)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_proposal(&self, p: &Proposal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.proposals (id, name, federated_graph_id, state, subgraphs)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(p.id)
        .bind(&p.name)
        .bind(p.federated_graph_id)
        .bind(p.state.as_ref())
        .bind(to_json(&p.subgraphs)?)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn upsert_operation_override(
        &self,
        namespace_id: Uuid,
        o: &OperationOverride,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.operation_overrides (namespace_id, operation_hash, ignore_all, changes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (namespace_id, operation_hash) DO UPDATE
            SET ignore_all = EXCLUDED.ignore_all,
                changes = EXCLUDED.changes
            "#,
        )
        .bind(namespace_id)
        .bind(&o.operation_hash)
        .bind(o.ignore_all)
        .bind(to_json(&o.changes)?)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn create_webhook(&self, w: &OrganizationWebhook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_check.organization_webhooks (id, organization_id, endpoint, secret, events)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(w.id)
        .bind(w.organization_id)
        .bind(&w.endpoint)
        .bind(&w.secret)
        .bind(to_json(&w.events)?)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
