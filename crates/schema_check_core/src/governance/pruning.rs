//! Graph pruning rules over the subgraph's own change set.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::diff::{ChangeKind, SchemaChange};
use crate::governance::lint::LintLocation;
use crate::normalize::{has_directive, NormalizedSchema};
use crate::types::Severity;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PruningRule {
    RequireDeprecationBeforeDeletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningRuleConfig {
    pub rule: PruningRule,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningIssue {
    pub rule: PruningRule,
    pub severity: Severity,
    pub field_path: String,
    pub message: String,
    pub location: LintLocation,
}

impl PruningIssue {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Evaluate pruning rules. `previous` is the subgraph's last published schema
/// and `changes` its diff against the proposed one.
pub fn prune_check(
    previous: &NormalizedSchema,
    changes: &[SchemaChange],
    rules: &[PruningRuleConfig],
) -> Vec<PruningIssue> {
    let mut issues = Vec::new();
    for cfg in rules {
        match cfg.rule {
            PruningRule::RequireDeprecationBeforeDeletion => {
                for change in changes.iter().filter(|c| c.kind == ChangeKind::FieldRemoved) {
                    let Some((type_name, field_name)) = change.path.split_once('.') else {
                        continue;
                    };
                    let was_deprecated = previous
                        .get(type_name)
                        .and_then(|t| t.field(field_name))
                        .is_some_and(|f| has_directive(&f.directives, "deprecated"));
                    if !was_deprecated {
                        issues.push(PruningIssue {
                            rule: cfg.rule,
                            severity: cfg.severity,
                            field_path: change.path.clone(),
                            message: format!(
                                "Field {field_name} of type {type_name} was removed without being deprecated first."
                            ),
                            location: LintLocation::default(),
                        });
                    }
                }
            }
        }
    }
    issues
}
