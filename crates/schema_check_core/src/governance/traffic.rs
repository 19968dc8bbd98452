//! Client-traffic impact of breaking changes.
//!
//! Breaking changes are translated into usage queries and handed to a
//! `TrafficInspector` (the analytics store). Namespace operation overrides
//! mark matching usages safe.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::diff::{ChangeKind, SchemaChange};
use crate::normalize::TypeRef;

/// One usage query derived from a breaking change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectorChange {
    /// Index into the target's change list.
    pub change_index: usize,
    pub type_name: Option<String>,
    pub named_type: Option<String>,
    pub field_name: Option<String>,
    pub path: Option<Vec<String>>,
    pub is_input: bool,
    pub is_argument: bool,
    pub is_null: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficFilter {
    pub organization_id: Uuid,
    pub federated_graph_id: Uuid,
    pub subgraph_id: Option<Uuid>,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationUsage {
    pub change_index: usize,
    pub operation_hash: String,
    pub operation_name: String,
    pub operation_type: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_safe_override: bool,
}

/// Analytics lookup of operations that exercised the changed schema elements.
#[async_trait]
pub trait TrafficInspector: Send + Sync {
    async fn inspect(
        &self,
        changes: &[InspectorChange],
        filter: &TrafficFilter,
    ) -> anyhow::Result<Vec<OperationUsage>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOverride {
    pub change_type: ChangeKind,
    pub path: String,
}

/// Per-operation override configured on a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOverride {
    pub operation_hash: String,
    pub ignore_all: bool,
    pub changes: Vec<ChangeOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationUsageStats {
    pub total_operations: usize,
    pub safe_operations: usize,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSummary {
    /// The check was disabled, had no inspector or the lookup failed.
    pub skipped: bool,
    pub inspected_changes: usize,
    /// Breaking changes with no usage query; they cannot be verified.
    pub uninspectable_changes: Vec<usize>,
    pub affected_operations: Vec<OperationUsage>,
    pub stats: OperationUsageStats,
    pub has_unsafe_client_traffic: bool,
}

impl TrafficSummary {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Shape of an input-position type change, used to pick the nullability filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeChangeCategory {
    OptionalToRequiredSame,
    OptionalToRequiredDifferent,
    RequiredToRequiredDifferent,
    OptionalToOptionalDifferent,
}

fn type_change_category(old: &TypeRef, new: &TypeRef) -> TypeChangeCategory {
    let from_required = old.is_non_null();
    let to_required = new.is_non_null();
    let same = old.nullable() == new.nullable();
    match (same, from_required, to_required) {
        (false, false, true) => TypeChangeCategory::OptionalToRequiredDifferent,
        (false, true, true) => TypeChangeCategory::RequiredToRequiredDifferent,
        (false, false, false) => TypeChangeCategory::OptionalToOptionalDifferent,
        _ => TypeChangeCategory::OptionalToRequiredSame,
    }
}

fn parse_type(s: &Option<String>) -> Option<TypeRef> {
    let s = s.as_deref()?.trim();
    if let Some(inner) = s.strip_suffix('!') {
        return Some(TypeRef::NonNull(Box::new(parse_type(&Some(inner.to_string()))?)));
    }
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return Some(TypeRef::List(Box::new(parse_type(&Some(inner.to_string()))?)));
    }
    (!s.is_empty()).then(|| TypeRef::Named(s.to_string()))
}

/// Translate one breaking change into a usage query.
///
/// `None` means the change cannot be checked against traffic.
pub fn to_inspector_change(index: usize, change: &SchemaChange) -> Option<InspectorChange> {
    let path = split_path(&change.path);
    let base = InspectorChange {
        change_index: index,
        ..InspectorChange::default()
    };
    let first = path.first().cloned();

    match change.kind {
        ChangeKind::SchemaQueryTypeChanged
        | ChangeKind::SchemaMutationTypeChanged
        | ChangeKind::SchemaSubscriptionTypeChanged
        | ChangeKind::DirectiveAdded
        | ChangeKind::DirectiveRemoved => None,

        ChangeKind::TypeRemoved
        | ChangeKind::TypeKindChanged
        | ChangeKind::ObjectTypeInterfaceAdded
        | ChangeKind::ObjectTypeInterfaceRemoved => Some(InspectorChange {
            type_name: first,
            ..base
        }),

        ChangeKind::FieldRemoved | ChangeKind::FieldTypeChanged => Some(InspectorChange {
            type_name: first,
            field_name: path.get(1).cloned(),
            ..base
        }),

        ChangeKind::UnionMemberRemoved
        | ChangeKind::EnumValueAdded
        | ChangeKind::EnumValueRemoved => Some(InspectorChange {
            named_type: first,
            ..base
        }),

        ChangeKind::InputFieldTypeChanged => {
            let (old, new) = (parse_type(&change.old_type)?, parse_type(&change.new_type)?);
            Some(match type_change_category(&old, &new) {
                TypeChangeCategory::OptionalToRequiredSame => InspectorChange {
                    type_name: first,
                    field_name: path.get(1).cloned(),
                    is_input: true,
                    is_null: Some(true),
                    ..base
                },
                TypeChangeCategory::OptionalToRequiredDifferent
                | TypeChangeCategory::RequiredToRequiredDifferent => InspectorChange {
                    path: first.map(|p| vec![p]),
                    is_input: true,
                    is_null: Some(false),
                    ..base
                },
                TypeChangeCategory::OptionalToOptionalDifferent => InspectorChange {
                    type_name: first,
                    field_name: path.get(1).cloned(),
                    is_input: true,
                    is_null: Some(false),
                    ..base
                },
            })
        }

        ChangeKind::InputFieldAdded | ChangeKind::InputFieldRemoved => Some(InspectorChange {
            path: first.map(|p| vec![p]),
            is_input: true,
            is_null: Some(false),
            ..base
        }),

        ChangeKind::FieldArgumentTypeChanged => {
            let (old, new) = (parse_type(&change.old_type)?, parse_type(&change.new_type)?);
            let is_null = match type_change_category(&old, &new) {
                TypeChangeCategory::OptionalToRequiredSame => Some(true),
                TypeChangeCategory::OptionalToOptionalDifferent => Some(false),
                _ => None,
            };
            Some(InspectorChange {
                path: Some(path.iter().skip(1).cloned().collect()),
                type_name: first,
                field_name: path.get(2).cloned(),
                is_argument: true,
                is_null,
                ..base
            })
        }

        ChangeKind::FieldArgumentAdded => Some(InspectorChange {
            path: Some(path.iter().skip(1).take(1).cloned().collect()),
            type_name: first,
            ..base
        }),

        ChangeKind::FieldArgumentRemoved => Some(InspectorChange {
            path: Some(path.iter().skip(1).cloned().collect()),
            type_name: first,
            is_argument: true,
            ..base
        }),

        // Additions, deprecations and default changes never break existing operations.
        ChangeKind::TypeAdded
        | ChangeKind::FieldAdded
        | ChangeKind::FieldDeprecationAdded
        | ChangeKind::FieldDeprecationRemoved
        | ChangeKind::FieldArgumentDefaultChanged
        | ChangeKind::InputFieldDefaultValueChanged
        | ChangeKind::EnumValueDeprecationReasonAdded
        | ChangeKind::EnumValueDeprecationReasonRemoved
        | ChangeKind::UnionMemberAdded => None,
    }
}

/// Kinds that `to_inspector_change` deliberately ignores rather than cannot inspect.
fn is_safe_to_ignore(kind: ChangeKind) -> bool {
    matches!(
        kind,
        ChangeKind::TypeAdded
            | ChangeKind::FieldAdded
            | ChangeKind::FieldDeprecationAdded
            | ChangeKind::FieldDeprecationRemoved
            | ChangeKind::FieldArgumentDefaultChanged
            | ChangeKind::InputFieldDefaultValueChanged
            | ChangeKind::EnumValueDeprecationReasonAdded
            | ChangeKind::EnumValueDeprecationReasonRemoved
            | ChangeKind::UnionMemberAdded
            | ChangeKind::DirectiveAdded
    )
}

/// Mark usages covered by a namespace override as safe.
pub fn apply_overrides(
    usages: &mut [OperationUsage],
    changes: &[SchemaChange],
    overrides: &[OperationOverride],
) {
    for usage in usages.iter_mut() {
        let Some(ov) = overrides
            .iter()
            .find(|o| o.operation_hash == usage.operation_hash)
        else {
            continue;
        };
        let Some(change) = changes.get(usage.change_index) else {
            continue;
        };
        if ov.ignore_all
            || ov
                .changes
                .iter()
                .any(|c| c.change_type == change.kind && c.path == change.path)
        {
            usage.is_safe_override = true;
        }
    }
}

/// Dedupe by operation hash and summarize.
pub fn collect_operation_usage_stats(usages: &[OperationUsage]) -> OperationUsageStats {
    let mut seen = HashSet::new();
    let unique: Vec<&OperationUsage> = usages
        .iter()
        .filter(|u| seen.insert(u.operation_hash.as_str()))
        .collect();

    OperationUsageStats {
        total_operations: unique.len(),
        safe_operations: unique.iter().filter(|u| u.is_safe_override).count(),
        first_seen_at: unique.iter().map(|u| u.first_seen_at).min(),
        last_seen_at: unique.iter().map(|u| u.last_seen_at).max(),
    }
}

/// Look up client traffic for the breaking subset of `changes`.
pub async fn inspect_breaking_changes(
    inspector: Option<&dyn TrafficInspector>,
    enabled: bool,
    changes: &[SchemaChange],
    overrides: &[OperationOverride],
    filter: &TrafficFilter,
) -> TrafficSummary {
    let breaking: Vec<(usize, &SchemaChange)> = changes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_breaking())
        .collect();
    if breaking.is_empty() {
        return TrafficSummary::default();
    }
    let Some(inspector) = inspector.filter(|_| enabled) else {
        return TrafficSummary::skipped();
    };

    let mut queries = Vec::new();
    let mut uninspectable = Vec::new();
    for (i, change) in breaking {
        match to_inspector_change(i, change) {
            Some(q) => queries.push(q),
            None if is_safe_to_ignore(change.kind) => {}
            None => uninspectable.push(i),
        }
    }

    let mut usages = if queries.is_empty() {
        Vec::new()
    } else {
        match inspector.inspect(&queries, filter).await {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, federated_graph_id = %filter.federated_graph_id, "traffic inspection failed");
                return TrafficSummary {
                    uninspectable_changes: uninspectable,
                    ..TrafficSummary::skipped()
                };
            }
        }
    };
    apply_overrides(&mut usages, changes, overrides);
    let stats = collect_operation_usage_stats(&usages);

    TrafficSummary {
        skipped: false,
        inspected_changes: queries.len(),
        uninspectable_changes: uninspectable,
        has_unsafe_client_traffic: usages.iter().any(|u| !u.is_safe_override),
        affected_operations: usages,
        stats,
    }
}
