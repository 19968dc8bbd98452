//! External check-extension callout.
//!
//! The payload is signed with HMAC-SHA256 keyed by the namespace secret and
//! POSTed to the configured endpoint. A non-2xx status or transport failure is
//! retried once after a backoff; if that also fails the result is an
//! infrastructure error, never a `fail` verdict.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::diff::SchemaChange;
use crate::governance::lint::LintIssue;
use crate::governance::pruning::PruningIssue;
use crate::governance::traffic::OperationUsage;
use crate::normalize::digest;
use crate::types::TargetKey;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature-SHA256";
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckExtensionConfig {
    pub endpoint: String,
    pub secret: String,
    pub include_composed_sdl: bool,
    pub include_schema_changes: bool,
    pub include_lint_issues: bool,
    pub include_pruning_issues: bool,
    pub include_affected_operations: bool,
}

impl std::fmt::Debug for CheckExtensionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckExtensionConfig")
            .field("endpoint", &self.endpoint)
            .field("secret", &"<redacted>")
            .field("include_composed_sdl", &self.include_composed_sdl)
            .field("include_schema_changes", &self.include_schema_changes)
            .field("include_lint_issues", &self.include_lint_issues)
            .field("include_pruning_issues", &self.include_pruning_issues)
            .field("include_affected_operations", &self.include_affected_operations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionTarget {
    pub id: uuid::Uuid,
    pub kind: String,
    pub name: String,
}

/// Body sent to the endpoint. Optional sections follow the include flags.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionPayload {
    pub version: u32,
    pub namespace: String,
    pub subgraph_name: String,
    pub target: ExtensionTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composed_sdl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_changes: Option<Vec<SchemaChange>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint_issues: Option<Vec<LintIssue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruning_issues: Option<Vec<PruningIssue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_operations: Option<Vec<OperationUsage>>,
}

/// Everything the payload may contain; the config decides what is sent.
pub struct PayloadSource<'a> {
    pub namespace: &'a str,
    pub subgraph_name: &'a str,
    pub target: &'a TargetKey,
    pub target_name: &'a str,
    pub composed_sdl: Option<&'a str>,
    pub schema_changes: &'a [SchemaChange],
    pub lint_issues: &'a [LintIssue],
    pub pruning_issues: &'a [PruningIssue],
    pub affected_operations: &'a [OperationUsage],
}

impl ExtensionPayload {
    pub fn build(config: &CheckExtensionConfig, src: &PayloadSource<'_>) -> Self {
        Self {
            version: 1,
            namespace: src.namespace.to_string(),
            subgraph_name: src.subgraph_name.to_string(),
            target: ExtensionTarget {
                id: src.target.target_id,
                kind: src.target.kind.as_ref().to_string(),
                name: src.target_name.to_string(),
            },
            composed_sdl: config
                .include_composed_sdl
                .then(|| src.composed_sdl.map(str::to_string))
                .flatten(),
            schema_changes: config
                .include_schema_changes
                .then(|| src.schema_changes.to_vec()),
            lint_issues: config.include_lint_issues.then(|| src.lint_issues.to_vec()),
            pruning_issues: config
                .include_pruning_issues
                .then(|| src.pruning_issues.to_vec()),
            affected_operations: config
                .include_affected_operations
                .then(|| src.affected_operations.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRequest {
    pub endpoint: String,
    pub body: Vec<u8>,
    /// Hex HMAC-SHA256 of `body`, sent as `X-Signature-SHA256`.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// HTTP delivery of a signed extension request.
#[async_trait]
pub trait ExtensionTransport: Send + Sync {
    async fn post(&self, request: &ExtensionRequest) -> anyhow::Result<ExtensionResponse>;
}

#[derive(Debug, Clone, Deserialize)]
struct VerdictBody {
    pass: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtensionVerdict {
    Pass,
    Fail,
    InfraError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionAttempt {
    pub attempt: u32,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckExtensionResult {
    pub endpoint: String,
    pub signed_payload_digest: String,
    pub verdict: ExtensionVerdict,
    pub message: Option<String>,
    pub attempts: Vec<ExtensionAttempt>,
}

/// Hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid HMAC key"))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a received signature.
pub fn verify(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Runs the callout with its own timeout and at most one retry.
pub struct ExtensionClient<'a> {
    pub transport: &'a dyn ExtensionTransport,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl ExtensionClient<'_> {
    pub async fn call(
        &self,
        config: &CheckExtensionConfig,
        payload: &ExtensionPayload,
    ) -> CheckExtensionResult {
        let infra = |digest: String, message: String, attempts: Vec<ExtensionAttempt>| {
            CheckExtensionResult {
                endpoint: config.endpoint.clone(),
                signed_payload_digest: digest,
                verdict: ExtensionVerdict::InfraError,
                message: Some(message),
                attempts,
            }
        };

        let body = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => return infra(String::new(), format!("payload encoding: {e}"), vec![]),
        };
        let payload_digest = digest_bytes(&body);
        let signature = match sign(&config.secret, &body) {
            Ok(s) => s,
            Err(e) => return infra(payload_digest, e.to_string(), vec![]),
        };
        let request = ExtensionRequest {
            endpoint: config.endpoint.clone(),
            body,
            signature,
        };

        let mut attempts = Vec::new();
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(self.backoff).await;
            }
            debug!(endpoint = %config.endpoint, attempt, "calling check extension");

            let outcome = tokio::time::timeout(self.timeout, self.transport.post(&request)).await;
            let response = match outcome {
                Err(_) => {
                    attempts.push(ExtensionAttempt {
                        attempt,
                        status: None,
                        error: Some(format!("timed out after {}ms", self.timeout.as_millis())),
                    });
                    warn!(endpoint = %config.endpoint, attempt, "check extension timed out");
                    continue;
                }
                Ok(Err(e)) => {
                    attempts.push(ExtensionAttempt {
                        attempt,
                        status: None,
                        error: Some(e.to_string()),
                    });
                    warn!(endpoint = %config.endpoint, attempt, error = %e, "check extension unreachable");
                    continue;
                }
                Ok(Ok(r)) => r,
            };

            if !(200..300).contains(&response.status) {
                attempts.push(ExtensionAttempt {
                    attempt,
                    status: Some(response.status),
                    error: None,
                });
                warn!(endpoint = %config.endpoint, attempt, status = response.status, "check extension returned non-2xx");
                continue;
            }

            attempts.push(ExtensionAttempt {
                attempt,
                status: Some(response.status),
                error: None,
            });
            return match serde_json::from_slice::<VerdictBody>(&response.body) {
                Ok(v) => CheckExtensionResult {
                    endpoint: config.endpoint.clone(),
                    signed_payload_digest: payload_digest,
                    verdict: if v.pass {
                        ExtensionVerdict::Pass
                    } else {
                        ExtensionVerdict::Fail
                    },
                    message: v.message,
                    attempts,
                },
                Err(e) => infra(
                    payload_digest,
                    format!("unparsable check extension response: {e}"),
                    attempts,
                ),
            };
        }

        infra(
            payload_digest,
            format!("check extension failed after {MAX_ATTEMPTS} attempts"),
            attempts,
        )
    }
}

fn digest_bytes(body: &[u8]) -> String {
    digest(&String::from_utf8_lossy(body))
}
