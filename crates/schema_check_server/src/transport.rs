//! reqwest-backed delivery of signed check-extension requests.

use std::time::Duration;

use async_trait::async_trait;
use schema_check_core::governance::extension::{
    ExtensionRequest, ExtensionResponse, ExtensionTransport, SIGNATURE_HEADER,
};

#[derive(Clone)]
pub struct HttpExtensionTransport {
    client: reqwest::Client,
}

impl HttpExtensionTransport {
    /// `connect_timeout` bounds the TCP handshake only; the per-attempt
    /// deadline is enforced by the extension client.
    pub fn new(connect_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExtensionTransport for HttpExtensionTransport {
    async fn post(&self, request: &ExtensionRequest) -> anyhow::Result<ExtensionResponse> {
        let resp = self
            .client
            .post(&request.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, &request.signature)
            .body(request.body.clone())
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        tracing::debug!(endpoint = %request.endpoint, status, "check extension responded");
        Ok(ExtensionResponse { status, body })
    }
}
