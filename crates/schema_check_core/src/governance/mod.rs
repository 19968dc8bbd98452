//! Governance gate.
//!
//! Runs once per target after composition and diff. Lint, pruning and proposal
//! results are computed once per operation and shared across targets; traffic
//! and the check extension are evaluated per target.

pub mod extension;
pub mod lint;
pub mod proposal;
pub mod pruning;
pub mod traffic;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::warn;

use crate::diff::SchemaChange;
use crate::error::{
    CODE_BREAKING_UNVERIFIED, CODE_EXTENSION_FAIL, CODE_EXTENSION_UNREACHABLE, CODE_LINT_ERROR,
    CODE_PROPOSAL_MISMATCH, CODE_PRUNING_ERROR, CODE_TRAFFIC_CLIENT_USAGE,
};
use crate::types::{CompositionTarget, NamespaceSettings, Severity};

use extension::{
    CheckExtensionResult, ExtensionClient, ExtensionPayload, ExtensionTransport, ExtensionVerdict,
    PayloadSource,
};
use lint::LintIssue;
use proposal::ProposalEvaluation;
use pruning::PruningIssue;
use traffic::{
    inspect_breaking_changes, OperationOverride, TrafficFilter, TrafficInspector, TrafficSummary,
};

/// One governance reason recorded against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceFinding {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub blocking: bool,
}

impl GovernanceFinding {
    fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
            blocking: severity == Severity::Error,
        }
    }

    /// Breaking-change findings an operator may force past.
    pub fn is_overridable(&self) -> bool {
        self.code == CODE_TRAFFIC_CLIENT_USAGE || self.code == CODE_BREAKING_UNVERIFIED
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GateOutcome {
    Pass,
    Fail,
    InfrastructureError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub findings: Vec<GovernanceFinding>,
    pub extension: Option<CheckExtensionResult>,
    pub traffic: TrafficSummary,
    pub outcome: GateOutcome,
}

/// Per-target inputs to the gate.
pub struct GateContext<'a> {
    pub settings: &'a NamespaceSettings,
    pub namespace: &'a str,
    pub subgraph_name: &'a str,
    pub target: &'a CompositionTarget,
    /// Traffic and the extension are only consulted for composable targets.
    pub composable: bool,
    pub composed_sdl: Option<&'a str>,
    pub changes: &'a [SchemaChange],
    pub lint_issues: &'a [LintIssue],
    pub pruning_issues: &'a [PruningIssue],
    pub proposal: Option<&'a ProposalEvaluation>,
    pub overrides: &'a [OperationOverride],
    pub traffic_filter: TrafficFilter,
    /// Whether breaking changes without verified-safe traffic block. Checks
    /// gate on them; publishes only record the traffic summary.
    pub gate_breaking_changes: bool,
}

#[derive(Clone)]
pub struct GovernanceGate {
    extension_transport: Option<Arc<dyn ExtensionTransport>>,
    traffic_inspector: Option<Arc<dyn TrafficInspector>>,
    extension_timeout: Duration,
    extension_backoff: Duration,
}

impl Default for GovernanceGate {
    fn default() -> Self {
        Self {
            extension_transport: None,
            traffic_inspector: None,
            extension_timeout: Duration::from_secs(30),
            extension_backoff: Duration::from_millis(500),
        }
    }
}

impl GovernanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension_transport(mut self, transport: Arc<dyn ExtensionTransport>) -> Self {
        self.extension_transport = Some(transport);
        self
    }

    pub fn with_traffic_inspector(mut self, inspector: Arc<dyn TrafficInspector>) -> Self {
        self.traffic_inspector = Some(inspector);
        self
    }

    pub fn with_extension_timing(mut self, timeout: Duration, backoff: Duration) -> Self {
        self.extension_timeout = timeout;
        self.extension_backoff = backoff;
        self
    }

    pub async fn evaluate(&self, ctx: GateContext<'_>) -> GateReport {
        let mut findings = Vec::new();

        // Lint and pruning
        let lint_errors = ctx.lint_issues.iter().filter(|i| i.is_error()).count();
        if ctx.settings.lint_enabled && lint_errors > 0 {
            findings.push(GovernanceFinding::new(
                CODE_LINT_ERROR,
                Severity::Error,
                format!("{lint_errors} lint error(s)"),
            ));
        }
        let pruning_errors = ctx.pruning_issues.iter().filter(|i| i.is_error()).count();
        if ctx.settings.pruning_enabled && pruning_errors > 0 {
            findings.push(GovernanceFinding::new(
                CODE_PRUNING_ERROR,
                Severity::Error,
                format!("{pruning_errors} graph pruning error(s)"),
            ));
        }

        // Proposal conformance
        if let Some(mismatch) = ctx.proposal.and_then(|p| p.mismatch.as_ref()) {
            findings.push(GovernanceFinding::new(
                CODE_PROPOSAL_MISMATCH,
                mismatch.severity,
                mismatch.message.clone(),
            ));
        }

        if !ctx.composable {
            return GateReport {
                outcome: if findings.iter().any(|f| f.blocking) {
                    GateOutcome::Fail
                } else {
                    GateOutcome::Pass
                },
                findings,
                extension: None,
                traffic: TrafficSummary::default(),
            };
        }

        // Client traffic for breaking changes
        let traffic = inspect_breaking_changes(
            self.traffic_inspector.as_deref(),
            ctx.settings.traffic_check_enabled,
            ctx.changes,
            ctx.overrides,
            &ctx.traffic_filter,
        )
        .await;
        let breaking = ctx.changes.iter().filter(|c| c.is_breaking()).count();
        if breaking > 0 && ctx.gate_breaking_changes {
            if traffic.has_unsafe_client_traffic {
                findings.push(GovernanceFinding::new(
                    CODE_TRAFFIC_CLIENT_USAGE,
                    Severity::Error,
                    format!(
                        "{breaking} breaking change(s) affect {} client operation(s) in the last {} day(s)",
                        traffic.stats.total_operations - traffic.stats.safe_operations,
                        ctx.traffic_filter.days
                    ),
                ));
            } else if traffic.skipped || !traffic.uninspectable_changes.is_empty() {
                findings.push(GovernanceFinding::new(
                    CODE_BREAKING_UNVERIFIED,
                    Severity::Error,
                    format!("{breaking} breaking change(s) could not be verified against client traffic"),
                ));
            }
        }

        // Check extension
        let extension = match (&ctx.settings.check_extension, &self.extension_transport) {
            (Some(config), Some(transport)) if !config.endpoint.is_empty() => {
                let payload = ExtensionPayload::build(
                    config,
                    &PayloadSource {
                        namespace: ctx.namespace,
                        subgraph_name: ctx.subgraph_name,
                        target: &ctx.target.key,
                        target_name: &ctx.target.name,
                        composed_sdl: ctx.composed_sdl,
                        schema_changes: ctx.changes,
                        lint_issues: ctx.lint_issues,
                        pruning_issues: ctx.pruning_issues,
                        affected_operations: &traffic.affected_operations,
                    },
                );
                let client = ExtensionClient {
                    transport: transport.as_ref(),
                    timeout: self.extension_timeout,
                    backoff: self.extension_backoff,
                };
                Some(client.call(config, &payload).await)
            }
            (Some(config), None) if !config.endpoint.is_empty() => {
                warn!(endpoint = %config.endpoint, "check extension configured but no transport installed");
                Some(CheckExtensionResult {
                    endpoint: config.endpoint.clone(),
                    signed_payload_digest: String::new(),
                    verdict: ExtensionVerdict::InfraError,
                    message: Some("no check extension transport available".into()),
                    attempts: Vec::new(),
                })
            }
            _ => None,
        };
        match extension.as_ref().map(|e| e.verdict) {
            Some(ExtensionVerdict::Fail) => findings.push(GovernanceFinding::new(
                CODE_EXTENSION_FAIL,
                Severity::Error,
                extension
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .unwrap_or_else(|| "check extension rejected the change".into()),
            )),
            Some(ExtensionVerdict::InfraError) => findings.push(GovernanceFinding::new(
                CODE_EXTENSION_UNREACHABLE,
                Severity::Error,
                extension
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .unwrap_or_else(|| "check extension unreachable".into()),
            )),
            _ => {}
        }

        let outcome = if matches!(
            extension.as_ref().map(|e| e.verdict),
            Some(ExtensionVerdict::InfraError)
        ) {
            GateOutcome::InfrastructureError
        } else if findings.iter().any(|f| f.blocking) {
            GateOutcome::Fail
        } else {
            GateOutcome::Pass
        };

        GateReport {
            findings,
            extension,
            traffic,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_schemas;
    use crate::governance::extension::tests::ScriptedTransport;
    use crate::governance::extension::CheckExtensionConfig;
    use crate::governance::proposal::ProposalMismatch;
    use crate::governance::traffic::tests::FixedInspector;
    use crate::normalize::normalize;
    use crate::types::FederatedGraph;
    use uuid::Uuid;

    fn target() -> CompositionTarget {
        CompositionTarget::federated_graph(&FederatedGraph {
            id: Uuid::new_v4(),
            namespace_id: Uuid::new_v4(),
            name: "prod".into(),
            routing_url: "http://router".into(),
            label_matchers: vec![],
        })
    }

    fn filter() -> TrafficFilter {
        TrafficFilter {
            organization_id: Uuid::nil(),
            federated_graph_id: Uuid::nil(),
            subgraph_id: None,
            days: 7,
        }
    }

    fn removal() -> Vec<SchemaChange> {
        diff_schemas(
            &normalize("type Query { a: Int, b: Int }").unwrap(),
            &normalize("type Query { a: Int }").unwrap(),
        )
    }

    async fn run(
        gate: &GovernanceGate,
        settings: &NamespaceSettings,
        changes: &[SchemaChange],
        proposal: Option<&ProposalEvaluation>,
    ) -> GateReport {
        let t = target();
        gate.evaluate(GateContext {
            settings,
            namespace: "default",
            subgraph_name: "reviews",
            target: &t,
            composable: true,
            composed_sdl: Some("type Query { a: Int }"),
            changes,
            lint_issues: &[],
            pruning_issues: &[],
            proposal,
            overrides: &[],
            traffic_filter: filter(),
            gate_breaking_changes: true,
        })
        .await
    }

    #[tokio::test]
    async fn no_changes_pass() {
        let r = run(&GovernanceGate::new(), &NamespaceSettings::default(), &[], None).await;
        assert_eq!(r.outcome, GateOutcome::Pass);
        assert!(r.findings.is_empty());
        assert!(r.extension.is_none());
    }

    #[tokio::test]
    async fn breaking_without_traffic_check_blocks() {
        let r = run(&GovernanceGate::new(), &NamespaceSettings::default(), &removal(), None).await;
        assert_eq!(r.outcome, GateOutcome::Fail);
        assert_eq!(r.findings[0].code, CODE_BREAKING_UNVERIFIED);
        assert!(r.findings[0].is_overridable());
    }

    #[tokio::test]
    async fn publish_records_traffic_without_gating() {
        let changes = removal();
        let t = target();
        let r = GovernanceGate::new()
            .evaluate(GateContext {
                settings: &NamespaceSettings::default(),
                namespace: "default",
                subgraph_name: "reviews",
                target: &t,
                composable: true,
                composed_sdl: None,
                changes: &changes,
                lint_issues: &[],
                pruning_issues: &[],
                proposal: None,
                overrides: &[],
                traffic_filter: filter(),
                gate_breaking_changes: false,
            })
            .await;
        assert_eq!(r.outcome, GateOutcome::Pass);
        assert!(r.findings.is_empty());
        assert!(r.traffic.skipped);
    }

    #[tokio::test]
    async fn breaking_without_client_usage_passes() {
        let gate = GovernanceGate::new().with_traffic_inspector(Arc::new(FixedInspector::new(&[])));
        let settings = NamespaceSettings {
            traffic_check_enabled: true,
            ..Default::default()
        };
        let r = run(&gate, &settings, &removal(), None).await;
        assert_eq!(r.outcome, GateOutcome::Pass);
    }

    #[tokio::test]
    async fn breaking_with_client_usage_fails() {
        let gate =
            GovernanceGate::new().with_traffic_inspector(Arc::new(FixedInspector::new(&["b"])));
        let settings = NamespaceSettings {
            traffic_check_enabled: true,
            ..Default::default()
        };
        let r = run(&gate, &settings, &removal(), None).await;
        assert_eq!(r.outcome, GateOutcome::Fail);
        assert_eq!(r.findings[0].code, CODE_TRAFFIC_CLIENT_USAGE);
    }

    #[tokio::test]
    async fn warn_proposal_mismatch_does_not_block() {
        let eval = ProposalEvaluation {
            linkages: vec![],
            mismatch: Some(ProposalMismatch {
                severity: Severity::Warn,
                message: "no match".into(),
            }),
        };
        let r = run(&GovernanceGate::new(), &NamespaceSettings::default(), &[], Some(&eval)).await;
        assert_eq!(r.outcome, GateOutcome::Pass);
        assert_eq!(r.findings.len(), 1);
        assert!(!r.findings[0].blocking);
    }

    #[tokio::test]
    async fn extension_outage_is_infrastructure() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(500, ""),
            ScriptedTransport::ok(500, ""),
        ]));
        let gate = GovernanceGate::new()
            .with_extension_transport(transport.clone())
            .with_extension_timing(Duration::from_secs(1), Duration::from_millis(1));
        let settings = NamespaceSettings {
            check_extension: Some(CheckExtensionConfig {
                endpoint: "http://ext".into(),
                secret: "k".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let r = run(&gate, &settings, &[], None).await;
        assert_eq!(r.outcome, GateOutcome::InfrastructureError);
        assert_eq!(r.extension.unwrap().attempts.len(), 2);
        assert_eq!(transport.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn extension_fail_is_violation() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(
            200,
            r#"{"pass":false}"#,
        )]));
        let gate = GovernanceGate::new().with_extension_transport(transport);
        let settings = NamespaceSettings {
            check_extension: Some(CheckExtensionConfig {
                endpoint: "http://ext".into(),
                secret: "k".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let r = run(&gate, &settings, &[], None).await;
        assert_eq!(r.outcome, GateOutcome::Fail);
        assert_eq!(r.findings[0].code, CODE_EXTENSION_FAIL);
    }
}
