//! OutboxDispatcher: background task that claims outbox jobs written by
//! publish/delete and delivers them downstream.
//!
//! Two job types: cache-warmer recomputation and the organization webhook for
//! `FEDERATED_GRAPH_SCHEMA_UPDATED`. Jobs are committed in the same transaction
//! as the operation that produced them, so delivery is at-least-once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schema_check_core::governance::extension::{sign, SIGNATURE_HEADER};
use schema_check_core::jobs::{
    CacheWarmerJob, JobPayload, OutboxJob, SchemaUpdatedEvent, WebhookDelivery,
};
use schema_check_core::ports::{CatalogStore, JobQueue};

const CLAIMER_ID: &str = "dispatcher-1";
const WEBHOOK_PAYLOAD_VERSION: u32 = 1;

/// Executes one claimed job. An `Err` counts as a failed attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &OutboxJob) -> anyhow::Result<()>;
}

/// Background outbox dispatcher that claims and processes outbox jobs.
pub struct OutboxDispatcher {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    interval: Duration,
    max_fails: u32,
}

impl OutboxDispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        interval: Duration,
        max_fails: u32,
    ) -> Self {
        Self {
            queue,
            handler,
            interval,
            max_fails,
        }
    }

    /// Run the dispatcher loop. This never returns under normal operation.
    /// Spawn it as a background task via `tokio::spawn`.
    pub async fn run(&self) {
        tracing::info!(
            "OutboxDispatcher started (poll interval={:?}, max_fails={})",
            self.interval,
            self.max_fails
        );
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.interval).await,
                Err(e) => {
                    tracing::error!("Outbox claim failed: {e}");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }

    /// Claim and process at most one job. Returns `false` when the queue is empty.
    pub async fn tick(&self) -> schema_check_core::Result<bool> {
        let Some(job) = self.queue.claim_next(CLAIMER_ID).await? else {
            return Ok(false);
        };
        let job_id = job.id;
        let job_type = job.job.job_type();
        tracing::debug!(%job_id, job_type, attempt = job.attempt_count, "processing outbox job");

        match self.handler.handle(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue.mark_processed(job_id).await {
                    tracing::error!("Failed to mark outbox job {job_id} as processed: {e}");
                }
            }
            Err(e) => {
                let error = format!("{e:#}");
                tracing::error!(%job_id, job_type, "outbox job failed: {error}");
                if job.attempt_count >= self.max_fails {
                    tracing::error!(
                        "DEAD LETTER: job {job_id} exceeded max_fails={}",
                        self.max_fails
                    );
                    if let Err(mark_err) = self.queue.mark_dead_letter(job_id, &error).await {
                        tracing::error!("Failed to dead-letter outbox job {job_id}: {mark_err}");
                    }
                } else if let Err(mark_err) = self.queue.record_failure(job_id, &error).await {
                    tracing::error!(
                        "Failed to record failure for outbox job {job_id}: {mark_err}"
                    );
                }
            }
        }
        Ok(true)
    }
}

/// Delivers jobs to the cache warmer and to organization webhooks over HTTP.
pub struct DownstreamJobHandler {
    catalog: Arc<dyn CatalogStore>,
    client: reqwest::Client,
    cache_warmer_url: Option<String>,
}

impl DownstreamJobHandler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        client: reqwest::Client,
        cache_warmer_url: Option<String>,
    ) -> Self {
        Self {
            catalog,
            client,
            cache_warmer_url,
        }
    }

    async fn warm_cache(&self, job: &CacheWarmerJob) -> anyhow::Result<()> {
        let Some(url) = self.cache_warmer_url.as_deref() else {
            tracing::debug!(
                graph = %job.federated_graph_id,
                "no cache warmer configured; dropping recompute job"
            );
            return Ok(());
        };
        let resp = self.client.post(url).json(job).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("cache warmer returned {}", resp.status());
        }
        Ok(())
    }

    async fn notify_webhooks(&self, event: &SchemaUpdatedEvent) -> anyhow::Result<()> {
        let graph_id = event.federated_graph.id;
        let webhooks = self
            .catalog
            .webhooks(event.organization.id)
            .await
            .map_err(anyhow::Error::from)?;

        let delivery = WebhookDelivery {
            version: WEBHOOK_PAYLOAD_VERSION,
            event: SchemaUpdatedEvent::EVENT_NAME,
            payload: event,
        };
        let body = serde_json::to_vec(&delivery)?;

        let mut failures = Vec::new();
        for hook in webhooks.iter().filter(|w| w.wants_schema_update(graph_id)) {
            let mut req = self
                .client
                .post(&hook.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(secret) = hook.secret.as_deref() {
                req = req.header(SIGNATURE_HEADER, sign(secret, &body)?);
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(webhook = %hook.id, graph = %graph_id, "webhook delivered");
                }
                Ok(resp) => failures.push(format!("{} returned {}", hook.endpoint, resp.status())),
                Err(e) => failures.push(format!("{}: {e}", hook.endpoint)),
            }
        }
        if !failures.is_empty() {
            anyhow::bail!("webhook delivery failed: {}", failures.join("; "));
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for DownstreamJobHandler {
    async fn handle(&self, job: &OutboxJob) -> anyhow::Result<()> {
        match &job.job {
            JobPayload::CacheWarmerRecompute(j) => self.warm_cache(j).await,
            JobPayload::FederatedGraphSchemaUpdated(e) => self.notify_webhooks(e).await,
        }
    }
}
